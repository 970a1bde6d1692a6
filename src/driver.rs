//! The driver contract: the external collaborators [`crate::registration`]
//! and [`crate::search`] are driven by, described as traits.
//!
//! This module intentionally contains no control loop. The core state
//! machines are pure and synchronous; everything here exists to pin down the
//! *shape* of the runtime that wires them to a transport, a Kademlia lookup
//! engine, and a clock, the way [`BootstrapTransport`] pins down the shape of
//! the network I/O `bootstrap` needs without performing any of it itself.
//!
//! A concrete driver runs three cooperating activities per active topic:
//!
//! 1. **Control loop** — owns a [`crate::registration::Registration`] or
//!    [`crate::search::Search`] and is its *only* caller. It arms a single
//!    alarm at `next_update_time()` (Registration only; Search has no
//!    schedule of its own), and on wake calls `update()`, forwarding any
//!    returned attempt to the request worker.
//! 2. **Lookup worker** — implements [`LookupTransport`]: given a target
//!    `NodeId`, runs an iterative Kademlia lookup and returns the resulting
//!    batches. Intermediate batches feed `Registration::add_nodes`; only the
//!    terminal, closest-result batch feeds `Search::add_nodes`.
//! 3. **Request worker** — implements [`RegistrationTransport`] or
//!    [`SearchTransport`]: performs one wire round-trip (topic-register or
//!    topic-query) for a ripe attempt or query target and reports the
//!    outcome back to the control loop.
//!
//! The three activities communicate by message passing over bounded channels
//! (capacity 0 or 1), never by sharing the state object, so the
//! single-threaded invariant the core relies on is mechanically enforced
//! rather than merely documented. A `start_request` call must be answered by
//! exactly one of `handle_ticket_response`, `handle_registered`, or
//! `handle_error_response` before the same attempt is rescheduled; the
//! channel discipline is what guarantees no second request starts against an
//! attempt that already has `heap_index == -2`.
//!
//! Minimum inter-lookup pacing for a Search driver is 3 seconds
//! ([`SEARCH_LOOKUP_MIN_DELAY`](crate::SEARCH_LOOKUP_MIN_DELAY)); this is a
//! hard minimum. The Registration-side pacing is a tunable the driver
//! chooses, not a contract the core enforces.

use std::net::SocketAddr;
use std::time::Duration;

use crate::record::{NodeId, NodeRecord};
use crate::registration::RegAttemptId;

/// Outcome of a topic-register wire round-trip, decoded by the wire-codec
/// collaborator and handed to the control loop.
#[derive(Clone, Debug)]
pub enum RegisterOutcome {
    /// The registrar asked the advertiser to wait before retrying.
    TicketDeferred {
        /// Opaque bytes to present on the next attempt.
        ticket: Vec<u8>,
        /// How long to wait before retrying.
        wait_time: Duration,
    },
    /// The registrar accepted the advertisement.
    Confirmed {
        /// How long the advertisement remains valid.
        ttl: Duration,
    },
    /// The round-trip failed: network error, timeout, or malformed response.
    Failed(String),
}

/// Runs iterative Kademlia lookups on behalf of the control loop.
///
/// A driver implementation wraps whatever lookup engine it already has; this
/// trait exists only so `Registration`/`Search` tests can inject a fake one.
pub trait LookupTransport: Send + Sync {
    /// Perform an iterative lookup toward `target`, returning the neighbor
    /// batches observed along the way. Intermediate batches should be fed to
    /// `Registration::add_nodes` as they arrive; only the final batch (the
    /// closest set found) should be fed to `Search::add_nodes`.
    fn lookup(
        &self,
        target: NodeId,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Vec<NodeRecord>, Box<dyn std::error::Error + Send + Sync>>> + Send;
}

/// Performs the registrar-side wire round-trip for a ripe [`RegAttemptId`].
pub trait RegistrationTransport: Send + Sync {
    /// Send a topic-register message to `target` and await the decoded
    /// response. `attempt` identifies which in-flight attempt this
    /// round-trip is for, so the control loop can route the outcome back
    /// into the right `handle_*` call.
    fn register(
        &self,
        target: SocketAddr,
        attempt: RegAttemptId,
        ticket: &[u8],
        timeout: Duration,
    ) -> impl std::future::Future<Output = RegisterOutcome> + Send;
}

/// Performs the seeker-side wire round-trip for a query target.
pub trait SearchTransport: Send + Sync {
    /// Send a topic-query message to `target` and return the nodes it claims
    /// to know about for the topic.
    fn query(
        &self,
        target: &NodeRecord,
        timeout: Duration,
    ) -> impl std::future::Future<Output = std::result::Result<Vec<NodeRecord>, Box<dyn std::error::Error + Send + Sync>>> + Send;
}
