//! Security subsystem: request admission.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → origin.rs (CORS preflight, reject untrusted browser origins)
//!     → rate_limit.rs (sliding-window limit per policy and subject)
//!         → counter_store.rs (shared Redis sorted sets, or process memory)
//!     → Pass to application
//! ```
//!
//! # Design Decisions
//! - Origin policy is pure and immutable after startup
//! - Policy violations become structured 4xx responses, never faults
//! - Rate limiting fails open when the counter store is unavailable

pub mod counter_store;
pub mod origin;
pub mod rate_limit;

pub use counter_store::{CounterStore, MemoryCounterStore, RedisCounterStore, StoreError, WindowBatch};
pub use origin::{is_allowed, normalize_origin, parse_allow_list, AllowList, OriginPolicy};
pub use rate_limit::{KeyExtractor, RateLimitOutcome, RateLimitPolicy, RateLimiter, RateLimiters};
