//! Topic-based peer discovery core, layered atop a Kademlia-style routing table.
//!
//! This crate implements the two state machines that drive topic advertisement
//! and topic search in a permissionless discv5-style network:
//!
//! - [`registration`] — the advertiser's view: place a record of "I serve topic
//!   T" on remote registrar nodes, retrying on tickets and expiring on TTL.
//! - [`search`] — the seeker's view: walk the DHT toward a topic and collect
//!   the peer records registrars hand back.
//!
//! Both state machines are pure, single-threaded, and clock-driven: they never
//! perform I/O, never spawn tasks, and never block. They expose decisions
//! ("who should I contact next", "is this search done") and accept events
//! ("a lookup produced these nodes", "this registrar gave me a ticket"). The
//! surrounding driver — UDP transport, wire codec, iterative lookup engine,
//! JSON-RPC surface — is out of scope; [`driver`] only describes the contract
//! such a driver must satisfy.
//!
//! ## Key parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | Registration buckets | 40 |
//! | Search buckets | 40 |
//! | Max Standby attempts per registration bucket | 20 |
//! | Search minimum inter-lookup delay | 3 seconds |
//! | Topic / node identifier width | 256 bits |

pub mod clock;
pub mod distance;
pub mod driver;
pub mod heap;
pub mod record;
pub mod registration;
pub mod search;

/// Number of buckets in the registration table (one per 39-wide slice of the
/// far end of the distance range, clamping everything closer into bucket 0).
pub const REG_BUCKETS: usize = 40;

/// Number of buckets in the search table.
pub const SEARCH_BUCKETS: usize = 40;

/// Maximum number of Standby attempts a single registration bucket may hold.
pub const STANDBY_LIMIT: usize = 20;

/// Minimum elapsed time between successive iterative lookups started by a
/// Search driver.
pub const SEARCH_LOOKUP_MIN_DELAY: std::time::Duration = std::time::Duration::from_secs(3);

/// Number of consecutive empty lookups a Search tolerates before considering
/// itself exhausted of new candidates. See [`search::Search::is_done`].
pub const SEARCH_DONE_THRESHOLD: u32 = 2;

/// Errors surfaced across the crate's public, recoverable API.
///
/// Invariant violations — calling [`registration::Registration::start_request`]
/// on a non-Waiting attempt, or [`search::Search::pop_result`] on an empty
/// buffer — are not represented here. Those are programmer errors; the state
/// machines panic rather than return a `Result`, so misuse can't be silently
/// swallowed by a caller that forgets to check.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A `RegistrationConfig` or `SearchConfig` failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Convenience result type for the crate's recoverable (non-invariant) errors.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
