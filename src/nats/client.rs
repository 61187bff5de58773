/// NATS JetStream client for activity publishing
///
/// Provides connection management and acknowledged publishing of activity
/// envelopes to a JetStream stream.

use async_nats::jetstream;
use std::time::Duration;

use crate::error::SinkError;
use crate::nats::message_envelope::ActivityEnvelope;

#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub stream_name: String,
    /// Records are published to `<subject_prefix>.<sink name>`
    pub subject_prefix: String,
    pub max_age: Duration,
    pub max_bytes: i64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        let env_or = |key: &str, fallback: &str| std::env::var(key).unwrap_or_else(|_| fallback.to_owned());
        Self {
            url: env_or("NATS_URL", "nats://localhost:4222"),
            stream_name: env_or("NATS_STREAM", "ACTIVITIES"),
            subject_prefix: env_or("NATS_SUBJECT_PREFIX", "activities"),
            // one day, at most 1 GiB
            max_age: Duration::from_secs(86_400),
            max_bytes: 1 << 30,
        }
    }
}

impl NatsConfig {
    pub fn subject_for(&self, source: &str) -> String {
        format!("{}.{}", self.subject_prefix, source)
    }
}

fn transport(err: impl std::fmt::Display) -> SinkError {
    SinkError::Transport(err.to_string())
}

#[derive(Clone)]
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    /// Connect to NATS and make sure the activity stream exists
    pub async fn connect(config: &NatsConfig) -> Result<Self, SinkError> {
        let client = async_nats::connect(&config.url).await.map_err(transport)?;
        let context = jetstream::new(client.clone());
        let stream = jetstream::stream::Config {
            name: config.stream_name.clone(),
            subjects: vec![format!("{}.>", config.subject_prefix)],
            max_age: config.max_age,
            max_bytes: config.max_bytes,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        };
        context.get_or_create_stream(stream).await.map_err(transport)?;
        tracing::info!(url = %config.url, stream = %config.stream_name, "NATS activity stream ready");

        Ok(Self { client, jetstream: context })
    }

    /// Publish an envelope and wait for the JetStream acknowledgment
    pub async fn publish(&self, subject: &str, envelope: &ActivityEnvelope<'_>) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(envelope)?;

        let ack = self
            .jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(transport)?;
        ack.await.map_err(transport)?;

        tracing::debug!("Published activity {} to {}", envelope.message_id, subject);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.client.connection_state(), async_nats::connection::State::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_for_source() {
        let config = NatsConfig {
            url: "nats://localhost:4222".to_string(),
            stream_name: "ACTIVITIES".to_string(),
            subject_prefix: "activities".to_string(),
            max_age: Duration::from_secs(60),
            max_bytes: 1024,
        };
        assert_eq!(config.subject_for("orders"), "activities.orders");
    }
}
