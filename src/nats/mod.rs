/// NATS JetStream integration module
///
/// Publishes finalized activity records as acknowledged JetStream messages

pub mod message_envelope;
pub mod client;
pub mod sink;

pub use message_envelope::ActivityEnvelope;
pub use client::{NatsClient, NatsConfig};
pub use sink::NatsSink;
