//! The advertiser's view of topic registration: [`Registration`] drives
//! placing "I serve this topic" records on remote registrars.
//!
//! A [`Registration`] owns a 40-bucket table ([`RegBucket`]) partitioning
//! candidate registrars by log-distance to the topic, plus a single
//! [`AttemptHeap`] ordering every Waiting/Registered attempt by its next
//! scheduled action. Buckets reference attempts by [`RegAttemptId`] into an
//! internal slab rather than owning them directly, so the heap can hold the
//! same handles without aliasing a `&mut RegAttempt` from two places.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::clock::{Clock, Instant};
use crate::distance::{logdist, random_id_at};
use crate::heap::{AttemptHeap, AttemptKey, HeapArena};
use crate::record::{NodeId, NodeRecord, TopicId};
use crate::{DiscoveryError, Result, REG_BUCKETS, STANDBY_LIMIT};

/// Handle to a [`RegAttempt`] held by a [`Registration`]. Stable for the
/// attempt's lifetime; invalidated once the attempt is destroyed.
pub type RegAttemptId = AttemptKey;

/// Where a [`RegAttempt`] sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegAttemptState {
    /// Known candidate, not yet actively retried.
    Standby,
    /// Queued for (or awaiting a response to) a registration attempt.
    Waiting,
    /// Confirmed; holds an advertisement until `next_time` (its TTL).
    Registered,
}

const NUM_STATES: usize = 3;

/// One advertiser-side record per registrar candidate.
#[derive(Debug, Clone)]
pub struct RegAttempt {
    /// The candidate's node record. Replaced wholesale on sequence upgrade.
    pub node: NodeRecord,
    /// Current lifecycle state.
    pub state: RegAttemptState,
    /// Absolute instant of this attempt's next scheduled action.
    pub next_time: Instant,
    /// Ticket bytes from the registrar; empty until one is received.
    pub ticket: Vec<u8>,
    /// Accumulated elapsed wait across ticket-deferral retries.
    pub total_wait_time: Duration,
    /// Number of ticket deferrals observed so far (ambient extension used by
    /// `max_retries`; see `SPEC_FULL.md` §3/§9).
    pub retries: u32,
    /// Index of the owning bucket.
    bucket: usize,
    /// Heap slot: `>= 0` queued, `-1` not queued, `-2` request in flight.
    heap_index: isize,
}

impl RegAttempt {
    fn new(node: NodeRecord, bucket: usize, next_time: Instant) -> Self {
        Self {
            node,
            state: RegAttemptState::Standby,
            next_time,
            ticket: Vec::new(),
            total_wait_time: Duration::ZERO,
            retries: 0,
            bucket,
            heap_index: -1,
        }
    }
}

/// A minimal slab arena: stable integer keys, `O(1)` insert/remove, slot
/// reuse via a free list. Exists so buckets and the heap can both hold a
/// [`RegAttemptId`] into the same storage without aliasing a `&mut`.
#[derive(Debug, Default)]
struct Slab<T> {
    entries: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> Slab<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, value: T) -> usize {
        if let Some(key) = self.free.pop() {
            self.entries[key] = Some(value);
            key
        } else {
            self.entries.push(Some(value));
            self.entries.len() - 1
        }
    }

    fn remove(&mut self, key: usize) -> T {
        let value = self.entries[key].take().expect("remove of vacant slab slot");
        self.free.push(key);
        value
    }

    fn get(&self, key: usize) -> &T {
        self.entries[key].as_ref().expect("access to vacant slab slot")
    }

    fn get_mut(&mut self, key: usize) -> &mut T {
        self.entries[key].as_mut().expect("access to vacant slab slot")
    }
}

impl HeapArena for Slab<RegAttempt> {
    fn time_of(&self, key: AttemptKey) -> Instant {
        self.get(key).next_time
    }

    fn heap_index_of(&self, key: AttemptKey) -> isize {
        self.get(key).heap_index
    }

    fn set_heap_index(&mut self, key: AttemptKey, index: isize) {
        self.get_mut(key).heap_index = index;
    }
}

/// Fixed-depth bucket partitioning candidate registrars by log-distance to
/// the topic.
#[derive(Debug)]
pub struct RegBucket {
    /// Log-distance this bucket represents, used to steer
    /// [`Registration::lookup_target`].
    dist: u32,
    att: HashMap<NodeId, RegAttemptId>,
    count: [usize; NUM_STATES],
}

impl RegBucket {
    fn new(dist: u32) -> Self {
        Self {
            dist,
            att: HashMap::new(),
            count: [0; NUM_STATES],
        }
    }

    /// Number of attempts in the given state.
    pub fn count(&self, state: RegAttemptState) -> usize {
        self.count[state as usize]
    }
}

/// `i = max(0, logdist(topic, id) - 256 + 39)`, i.e. `max(0, logdist - 217)`.
fn bucket_index(topic: &TopicId, id: &NodeId) -> usize {
    let d = logdist(topic, id) as i64;
    (d - 217).max(0) as usize
}

/// Configuration snapshot for a [`Registration`].
#[derive(Clone)]
pub struct RegistrationConfig {
    /// The local node's ID; filtered out of every ingest.
    pub self_id: NodeId,
    /// Monotonic time source.
    pub clock: Arc<dyn Clock>,
    /// Target count of Waiting attempts per bucket.
    pub reg_bucket_size: usize,
    /// Optional cap on a registrar's advertised wait time; ticket responses
    /// exceeding it destroy the attempt instead of rescheduling it.
    /// `None` (the default) preserves the source's unbounded behavior.
    pub max_wait_time: Option<Duration>,
    /// Optional cap on ticket-deferral retries per attempt. `None` (the
    /// default) preserves the source's unbounded behavior.
    pub max_retries: Option<u32>,
}

impl RegistrationConfig {
    /// Construct a config with no retry/wait caps (the source's behavior).
    pub fn new(self_id: NodeId, clock: Arc<dyn Clock>, reg_bucket_size: usize) -> Self {
        Self {
            self_id,
            clock,
            reg_bucket_size,
            max_wait_time: None,
            max_retries: None,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.reg_bucket_size == 0 {
            return Err(DiscoveryError::Config(
                "reg_bucket_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The advertiser's per-topic registration state machine.
///
/// Pure and single-threaded: every method call is a discrete transition, and
/// the caller is responsible for serializing access (see `SPEC_FULL.md` §5).
pub struct Registration {
    topic: TopicId,
    cfg: RegistrationConfig,
    buckets: Vec<RegBucket>,
    heap: AttemptHeap,
    attempts: Slab<RegAttempt>,
}

impl Registration {
    /// Create a new, empty registration state for `topic`.
    pub fn new(topic: TopicId, cfg: RegistrationConfig) -> Result<Self> {
        cfg.validate()?;
        let buckets = (0..REG_BUCKETS)
            .map(|i| RegBucket::new(217 + i as u32))
            .collect();
        Ok(Self {
            topic,
            cfg,
            buckets,
            heap: AttemptHeap::new(),
            attempts: Slab::new(),
        })
    }

    /// The topic this instance advertises.
    pub fn topic(&self) -> TopicId {
        self.topic
    }

    /// Inspect an attempt without mutating it. Panics if `id` is stale.
    pub fn attempt(&self, id: RegAttemptId) -> &RegAttempt {
        self.attempts.get(id)
    }

    /// The distance band covered by bucket `i`, mainly for tests/diagnostics.
    pub fn bucket_dist(&self, i: usize) -> u32 {
        self.buckets[i].dist
    }

    /// Number of attempts in `state` across the whole table.
    pub fn bucket_count(&self, i: usize, state: RegAttemptState) -> usize {
        self.buckets[i].count(state)
    }

    /// The ID to steer the next iterative lookup toward.
    ///
    /// Returns a random ID at the distance of the first bucket with zero
    /// Registered attempts, biasing exploration toward uncovered distance
    /// bands. If every bucket already holds a Registered attempt, returns the
    /// topic ID itself.
    pub fn lookup_target(&self) -> NodeId {
        for bucket in &self.buckets {
            if bucket.count(RegAttemptState::Registered) == 0 {
                return random_id_at(&self.topic, bucket.dist);
            }
        }
        self.topic
    }

    /// Fold freshly discovered candidates into the table.
    pub fn add_nodes(&mut self, candidates: &[NodeRecord]) {
        let now = self.cfg.clock.now();
        for candidate in candidates {
            if candidate.id == self.cfg.self_id {
                continue;
            }
            let idx = bucket_index(&self.topic, &candidate.id);

            if let Some(&key) = self.buckets[idx].att.get(&candidate.id) {
                let attempt = self.attempts.get_mut(key);
                if attempt.node.is_superseded_by(candidate) {
                    attempt.node = candidate.clone();
                }
                continue;
            }

            if self.buckets[idx].count(RegAttemptState::Standby) >= STANDBY_LIMIT {
                trace!(
                    bucket = idx,
                    node_id = %hex::encode(candidate.id),
                    "registration bucket full, dropping candidate"
                );
                continue;
            }

            let key = self
                .attempts
                .insert(RegAttempt::new(candidate.clone(), idx, now));
            let bucket = &mut self.buckets[idx];
            bucket.att.insert(candidate.id, key);
            bucket.count[RegAttemptState::Standby as usize] += 1;

            let Registration {
                buckets,
                attempts,
                heap,
                cfg,
                ..
            } = self;
            Self::refill(&mut buckets[idx], attempts, heap, cfg.reg_bucket_size, now);
        }
    }

    /// Promote Standby attempts to Waiting until the bucket's target
    /// concurrency is reached or it runs out of candidates.
    fn refill(
        bucket: &mut RegBucket,
        attempts: &mut Slab<RegAttempt>,
        heap: &mut AttemptHeap,
        reg_bucket_size: usize,
        now: Instant,
    ) {
        while bucket.count(RegAttemptState::Waiting) < reg_bucket_size {
            let candidate = bucket
                .att
                .values()
                .copied()
                .find(|&key| attempts.get(key).state == RegAttemptState::Standby);
            let Some(key) = candidate else { break };

            let attempt = attempts.get_mut(key);
            attempt.state = RegAttemptState::Waiting;
            attempt.next_time = now;
            bucket.count[RegAttemptState::Standby as usize] -= 1;
            bucket.count[RegAttemptState::Waiting as usize] += 1;
            heap.push(key, attempts);
        }
    }

    /// Earliest `next_time` across all queued attempts, or `None` ("Never")
    /// if nothing is queued.
    pub fn next_update_time(&self) -> Option<Instant> {
        self.heap.peek().map(|key| self.attempts.get(key).next_time)
    }

    /// Advance the state machine to the current time.
    ///
    /// Returns the ripe attempt the caller should `start_request` next, or
    /// `None` if nothing is ready yet (or a Registered attempt just expired —
    /// call `update` again to check the new heap top).
    ///
    /// # Panics
    ///
    /// Panics if the heap top is a Standby attempt, which would violate the
    /// invariant that Standby attempts are never queued.
    pub fn update(&mut self) -> Option<RegAttemptId> {
        let now = self.cfg.clock.now();
        let key = self.heap.peek()?;
        let (state, next_time) = {
            let a = self.attempts.get(key);
            (a.state, a.next_time)
        };

        if now < next_time {
            return None;
        }

        match state {
            RegAttemptState::Waiting => Some(key),
            RegAttemptState::Registered => {
                debug!(
                    node_id = %hex::encode(self.attempts.get(key).node.id),
                    "advertisement expired"
                );
                self.destroy_and_refill(key, now);
                None
            }
            RegAttemptState::Standby => {
                unreachable!("Standby attempt must never be queued on the heap")
            }
        }
    }

    /// Transition a Waiting attempt to "in flight": pulls it off the heap and
    /// marks it so no further scheduling touches it until a `handle_*` call.
    ///
    /// # Panics
    ///
    /// Panics if `id`'s attempt is not currently Waiting.
    pub fn start_request(&mut self, id: RegAttemptId) {
        {
            let attempt = self.attempts.get(id);
            assert_eq!(
                attempt.state,
                RegAttemptState::Waiting,
                "start_request on an attempt that is not Waiting"
            );
        }
        self.heap.remove(id, &mut self.attempts);
        self.attempts.get_mut(id).heap_index = -2;
    }

    /// Registrar returned a ticket: reschedule the attempt after `wait_time`.
    ///
    /// # Panics
    ///
    /// Panics if `id`'s attempt is not currently in flight.
    pub fn handle_ticket_response(&mut self, id: RegAttemptId, ticket: Vec<u8>, wait_time: Duration) {
        let now = self.cfg.clock.now();
        self.assert_in_flight(id, "handle_ticket_response");

        let exceeds_wait = self.cfg.max_wait_time.is_some_and(|max| wait_time > max);
        let exceeds_retries = {
            let attempt = self.attempts.get(id);
            self.cfg
                .max_retries
                .is_some_and(|max| attempt.retries + 1 > max)
        };

        if exceeds_wait || exceeds_retries {
            debug!(
                node_id = %hex::encode(self.attempts.get(id).node.id),
                "ticket exceeds configured cap, dropping attempt"
            );
            self.destroy_and_refill(id, now);
            return;
        }

        let attempt = self.attempts.get_mut(id);
        attempt.ticket = ticket;
        attempt.total_wait_time += wait_time;
        attempt.retries += 1;
        attempt.next_time = now.saturating_add(wait_time);
        self.heap.push(id, &mut self.attempts);
    }

    /// Registrar confirmed the advertisement: mark Registered with a TTL.
    ///
    /// # Panics
    ///
    /// Panics if `id`'s attempt is not currently in flight.
    pub fn handle_registered(&mut self, id: RegAttemptId, ttl: Duration) {
        let now = self.cfg.clock.now();
        self.assert_in_flight(id, "handle_registered");

        let bucket_idx = {
            let attempt = self.attempts.get_mut(id);
            attempt.state = RegAttemptState::Registered;
            attempt.next_time = now.saturating_add(ttl);
            attempt.bucket
        };
        self.heap.push(id, &mut self.attempts);

        let Registration {
            buckets,
            attempts,
            heap,
            cfg,
            ..
        } = self;
        let bucket = &mut buckets[bucket_idx];
        bucket.count[RegAttemptState::Waiting as usize] -= 1;
        bucket.count[RegAttemptState::Registered as usize] += 1;
        Self::refill(bucket, attempts, heap, cfg.reg_bucket_size, now);
    }

    /// Registrar refused, or the request failed: destroy the attempt and
    /// promote a different Standby candidate if one is available.
    ///
    /// # Panics
    ///
    /// Panics if `id`'s attempt is not currently in flight.
    pub fn handle_error_response(&mut self, id: RegAttemptId, err: impl Into<String>) {
        let now = self.cfg.clock.now();
        self.assert_in_flight(id, "handle_error_response");
        let err = err.into();
        debug!(
            node_id = %hex::encode(self.attempts.get(id).node.id),
            %err,
            "registration attempt failed"
        );
        self.destroy_and_refill(id, now);
    }

    fn assert_in_flight(&self, id: RegAttemptId, op: &'static str) {
        let heap_index = self.attempts.get(id).heap_index;
        assert_eq!(heap_index, -2, "{op} called on an attempt that is not in flight");
    }

    fn destroy_and_refill(&mut self, id: RegAttemptId, now: Instant) {
        let Registration {
            buckets,
            attempts,
            heap,
            cfg,
            ..
        } = self;

        let (bucket_idx, node_id, state, heap_index) = {
            let a = attempts.get(id);
            (a.bucket, a.node.id, a.state, a.heap_index)
        };
        if heap_index >= 0 {
            heap.remove(id, attempts);
        }

        let bucket = &mut buckets[bucket_idx];
        bucket.att.remove(&node_id);
        bucket.count[state as usize] -= 1;
        attempts.remove(id);

        Self::refill(bucket, attempts, heap, cfg.reg_bucket_size, now);
    }
}
