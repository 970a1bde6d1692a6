//! The seeker's view of topic discovery: [`Search`] collects topic-bearing
//! peer records by driving iterative lookups and direct queries.
//!
//! Unlike [`crate::registration`], a [`Search`] needs no heap — buckets are
//! scanned directly for query targets, and there is no per-attempt schedule
//! to order. The interesting state is the far→close bucket table plus a FIFO
//! buffer of results pending consumption.

use std::collections::{HashMap, HashSet};
use std::collections::VecDeque;
use std::sync::Arc;

use tracing::trace;

use crate::clock::Clock;
use crate::distance::logdist;
use crate::record::{NodeId, NodeRecord, TopicId};
use crate::{DiscoveryError, Result, SEARCH_BUCKETS, SEARCH_DONE_THRESHOLD};

/// One bucket of the seeker's distance-indexed candidate table.
#[derive(Debug)]
pub struct SearchBucket {
    /// Log-distance this bucket represents.
    dist: u32,
    /// Candidates discovered but not yet queried.
    new: HashMap<NodeId, NodeRecord>,
    /// Candidates already queried.
    asked: HashSet<NodeId>,
    /// Count of result records attributed to queries against this bucket.
    num_results: u64,
}

impl SearchBucket {
    fn new(dist: u32) -> Self {
        Self {
            dist,
            new: HashMap::new(),
            asked: HashSet::new(),
            num_results: 0,
        }
    }

    /// Results this bucket's queries have produced, mainly for diagnostics.
    pub fn num_results(&self) -> u64 {
        self.num_results
    }
}

/// `i = min(39, 256 - logdist(topic, id))`.
fn bucket_index(topic: &TopicId, id: &NodeId) -> usize {
    let d = logdist(topic, id);
    (256 - d).min((SEARCH_BUCKETS - 1) as u32) as usize
}

/// Configuration snapshot for a [`Search`].
#[derive(Clone)]
pub struct SearchConfig {
    /// The local node's ID; filtered out of every ingest.
    pub self_id: NodeId,
    /// Monotonic time source. Retained for parity with [`crate::registration`]
    /// and for drivers that want to timestamp results; the search state
    /// machine itself is event-driven rather than schedule-driven.
    pub clock: Arc<dyn Clock>,
    /// Cap on `|new| + |asked|` per bucket.
    pub search_bucket_size: usize,
}

impl SearchConfig {
    /// Construct a config.
    pub fn new(self_id: NodeId, clock: Arc<dyn Clock>, search_bucket_size: usize) -> Self {
        Self {
            self_id,
            clock,
            search_bucket_size,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.search_bucket_size == 0 {
            return Err(DiscoveryError::Config(
                "search_bucket_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The seeker's per-topic discovery state machine.
///
/// Pure and single-threaded, like [`crate::registration::Registration`]: the
/// caller externally serializes every method call.
pub struct Search {
    topic: TopicId,
    cfg: SearchConfig,
    buckets: Vec<SearchBucket>,
    result_buffer: VecDeque<NodeRecord>,
    num_results: u64,
    queries_without_new_nodes: u32,
}

impl Search {
    /// Create a new, empty search state for `topic`.
    pub fn new(topic: TopicId, cfg: SearchConfig) -> Result<Self> {
        cfg.validate()?;
        let buckets = (0..SEARCH_BUCKETS)
            .map(|i| SearchBucket::new(256 - i as u32))
            .collect();
        Ok(Self {
            topic,
            cfg,
            buckets,
            result_buffer: VecDeque::new(),
            num_results: 0,
            queries_without_new_nodes: 0,
        })
    }

    /// The topic this instance is searching for.
    pub fn topic(&self) -> TopicId {
        self.topic
    }

    /// Number of results delivered across this search's lifetime.
    pub fn total_results(&self) -> u64 {
        self.num_results
    }

    /// The distance band covered by bucket `i`, mainly for tests/diagnostics.
    pub fn bucket_dist(&self, i: usize) -> u32 {
        self.buckets[i].dist
    }

    /// `true` once the buffer is drained, every bucket's `new` set is empty,
    /// and the last two lookup batches each produced nothing new.
    pub fn is_done(&self) -> bool {
        self.result_buffer.is_empty()
            && self.buckets.iter().all(|b| b.new.is_empty())
            && self.queries_without_new_nodes >= SEARCH_DONE_THRESHOLD
    }

    /// Fold a batch of discovered candidates into the table.
    ///
    /// `src` identifies the node the batch came from (the iterative lookup's
    /// most recently contacted peer), used only for diagnostics; it does not
    /// gate ingestion.
    pub fn add_nodes(&mut self, src: Option<&NodeRecord>, found: &[NodeRecord]) {
        let mut any_new = false;
        for candidate in found {
            if candidate.id == self.cfg.self_id {
                continue;
            }
            let idx = bucket_index(&self.topic, &candidate.id);
            let bucket = &mut self.buckets[idx];

            let already_known = bucket.new.contains_key(&candidate.id) || bucket.asked.contains(&candidate.id);
            if !already_known {
                any_new = true;
            }

            if bucket.asked.contains(&candidate.id) {
                continue;
            }

            if let Some(existing) = bucket.new.get(&candidate.id) {
                if existing.is_superseded_by(candidate) {
                    bucket.new.insert(candidate.id, candidate.clone());
                }
                continue;
            }

            if bucket.new.len() + bucket.asked.len() >= self.cfg.search_bucket_size {
                trace!(
                    bucket = idx,
                    node_id = %hex::encode(candidate.id),
                    "search bucket full, dropping candidate"
                );
                continue;
            }

            bucket.new.insert(candidate.id, candidate.clone());
        }

        if any_new {
            self.queries_without_new_nodes = 0;
        } else {
            self.queries_without_new_nodes += 1;
        }

        let _ = src;
    }

    /// A candidate to direct-query next: any node from the first non-empty
    /// `new` set, scanning buckets far→close. No removal; call
    /// [`Search::add_query_results`] to move it into `asked`.
    pub fn query_target(&self) -> Option<NodeRecord> {
        self.buckets
            .iter()
            .find_map(|b| b.new.values().next().cloned())
    }

    /// Record the outcome of directly querying `from`: it moves from `new` to
    /// `asked`, and every result node (other than ourselves) is appended to
    /// the result buffer. Results do not feed back into the candidate table.
    pub fn add_query_results(&mut self, from: &NodeRecord, results: &[NodeRecord]) {
        let idx = bucket_index(&self.topic, &from.id);
        let bucket = &mut self.buckets[idx];
        bucket.new.remove(&from.id);
        bucket.asked.insert(from.id);

        for result in results {
            if result.id == self.cfg.self_id {
                continue;
            }
            bucket.num_results += 1;
            self.num_results += 1;
            self.result_buffer.push_back(result.clone());
        }
    }

    /// The result buffer's head, without removing it.
    pub fn peek_result(&self) -> Option<&NodeRecord> {
        self.result_buffer.front()
    }

    /// Remove the result buffer's head.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is empty.
    pub fn pop_result(&mut self) -> NodeRecord {
        self.result_buffer
            .pop_front()
            .expect("pop_result called on an empty result buffer")
    }
}
