pub mod backends;
pub mod broker;
pub mod error;
pub mod types;

pub use backends::{AmqpBroker, AmqpConnector, MemoryBroker};
pub use broker::{Broker, BrokerConnector, Subscription};
pub use error::{BrokerError, Result};
pub use types::{Acknowledger, ConsumeOptions, Delivery, Publication, QueueDeclaration};
