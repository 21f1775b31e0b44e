// Courier Infrastructure - AMQP Adapter
// Implements: Broker, Consumer, Delivery over lapin

mod broker;
mod connection;
mod consumer;
mod error;

pub use broker::AmqpBroker;
pub use connection::{connect, redact_url};
pub use consumer::{AmqpConsumer, AmqpDelivery};
pub use error::is_claim_refusal;
