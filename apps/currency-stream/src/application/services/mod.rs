//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `CacheStore`: Cache key layout, bulk memo path, and snapshot writes
//! - `IngestionPoller`: Single-flight poll cycle and snapshot swap
//! - `FanoutBroadcaster`: Global and per-topic snapshot delivery
//! - `QuoteQueryService`: Cache-backed reads and health

pub mod broadcaster;
pub mod cache_store;
pub mod poller;
pub mod query;

pub use broadcaster::{BroadcastReport, FanoutBroadcaster, FanoutConfig};
pub use cache_store::{CachePolicy, CacheStore, bulk_key, code_key};
pub use poller::{CycleOutcome, CyclePhase, IngestionPoller, SyncStatus};
pub use query::{AllCurrencies, BulkLookup, QueryError, QuoteQueryService};
