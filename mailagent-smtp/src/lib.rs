pub mod client;
pub mod testing;
pub mod transport;

pub use client::{ClientError, SmtpSession};
pub use transport::{Connector, SubmissionConnector, Transport};
