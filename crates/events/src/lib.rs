//! `hhrec-events` — broker mechanics: work queue, fan-out channel, wire messages.
//!
//! Transport-backed implementations (Redis) live in `hhrec-infra`; this crate holds
//! the contracts and the in-memory broker used by tests and dev mode.

pub mod broker;
pub mod bus;
pub mod error;
pub mod in_memory_broker;
pub mod in_memory_bus;
pub mod messages;

pub use broker::{BrokerConnection, BrokerConnector, Delivery, QueueTopology};
pub use bus::{FanoutChannel, SubscriberLiveness, Subscription};
pub use error::BrokerError;
pub use in_memory_broker::{DeadLetter, InMemoryBroker, InMemoryConnection};
pub use in_memory_bus::InMemoryFanout;
pub use messages::{JobMessage, ResultMessage};
