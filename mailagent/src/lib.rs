//! Outbound mail relay agent
//!
//! Consumes mail jobs from broker queues and submits them to a relay:
//! - [`Agent`] declares the queues and runs the configured workers
//! - [`Worker`] consumes one queue with its own relay pool and rate limiter
//! - [`Handler`] is what a worker does with each message

pub mod agent;
mod error;
pub mod handler;
pub mod worker;

pub use agent::{Agent, procfile, wait_for_signal};
pub use error::WorkerError;
pub use handler::Handler;
pub use worker::{Worker, WorkerReport, worker_name};
