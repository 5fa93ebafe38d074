//! Submission client for the outbound relay.
//!
//! A session runs connect → greeting → EHLO → STARTTLS → EHLO → AUTH once, then
//! carries any number of `MAIL`/`RCPT`/`DATA` transactions until `QUIT`.
//!
//! ```no_run
//! use mailagent_common::config::RelayConfig;
//! use mailagent_smtp::client::SmtpSession;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let relay = RelayConfig::default();
//! let mut session = SmtpSession::open(&relay).await?;
//!
//! let refused = session
//!     .send_mail(
//!         "sender@example.com",
//!         &["recipient@example.com".to_string()],
//!         "Subject: Hello\r\n\r\nHello World",
//!     )
//!     .await?;
//! assert!(refused.is_empty());
//!
//! session.quit().await;
//! # Ok(())
//! # }
//! ```

mod connection;
mod error;
mod response;
mod session;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use session::{Capabilities, SmtpSession, encode_data};
