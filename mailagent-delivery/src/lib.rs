//! Delivery of queued mail jobs through a relay
//!
//! This crate provides:
//! - Decoding of mail jobs and derivation of their envelope
//! - A bounded pool of relay sessions with an acquire timeout
//! - Per-worker send rate limiting
//! - The processor that ties these together for a single job

mod error;
pub mod job;
pub mod pool;
mod processor;
pub mod rate_limiter;

// Re-export error types
pub use error::{DeliveryError, PoolError};
// Re-export core types
pub use job::{JobId, MailJob, PreparedMail};
pub use pool::{Lease, Pool};
pub use processor::DeliveryProcessor;
pub use rate_limiter::RateLimiter;
