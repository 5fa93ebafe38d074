//! Shared fixtures for the agent's integration tests.

#![allow(dead_code)] // Not every test binary uses every helper

pub mod harness;
#[path = "../../../mailagent-smtp/tests/support/mock_server.rs"]
pub mod mock_server;

pub use harness::{AgentHarness, job, wait_until};
pub use mock_server::{MockSmtpServer, SmtpCommand};
