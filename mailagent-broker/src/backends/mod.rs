pub mod amqp;
pub mod memory;

pub use amqp::{AmqpBroker, AmqpConnector};
pub use memory::MemoryBroker;
