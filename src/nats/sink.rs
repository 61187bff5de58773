//! Sink publishing activity records to NATS JetStream.
//!
//! Sinks are called from plain threads, so the sink owns a current-thread
//! tokio runtime and blocks on each publish. The connection is opened
//! lazily and dropped on `reset`, which makes the next send reconnect.

use std::sync::{Mutex, MutexGuard};

use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::activity::ActivityRecord;
use crate::error::SinkError;
use crate::nats::client::{NatsClient, NatsConfig};
use crate::nats::message_envelope::ActivityEnvelope;
use crate::outputs::ActivitySink;

pub struct NatsSink {
    name: String,
    subject: String,
    config: NatsConfig,
    runtime: Runtime,
    client: Mutex<Option<NatsClient>>,
}

impl NatsSink {
    pub fn new(name: impl Into<String>, config: NatsConfig) -> Result<Self, SinkError> {
        let name = name.into();
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            subject: config.subject_for(&name),
            name,
            config,
            runtime,
            client: Mutex::new(None),
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<NatsClient>>, SinkError> {
        self.client
            .lock()
            .map_err(|_| SinkError::Transport("client lock poisoned".to_string()))
    }

    fn connected(&self, guard: &mut Option<NatsClient>) -> Result<NatsClient, SinkError> {
        match guard {
            Some(client) if client.is_connected() => Ok(client.clone()),
            _ => {
                let client = self.runtime.block_on(NatsClient::connect(&self.config))?;
                *guard = Some(client.clone());
                Ok(client)
            }
        }
    }
}

impl ActivitySink for NatsSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self) -> Result<(), SinkError> {
        let mut guard = self.lock()?;
        self.connected(&mut guard)?;
        info!("NATS sink {} publishing to {}", self.name, self.subject);
        Ok(())
    }

    fn send(&self, record: &ActivityRecord) -> Result<(), SinkError> {
        let mut guard = self.lock()?;
        let client = self.connected(&mut guard)?;
        let envelope = ActivityEnvelope::new(&self.name, record);
        self.runtime.block_on(client.publish(&self.subject, &envelope))
    }

    fn reset(&self) -> Result<(), SinkError> {
        if self.lock()?.take().is_some() {
            debug!("NATS sink {} dropped its connection", self.name);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        self.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sink_subject_uses_name() {
        let config = NatsConfig {
            url: "nats://127.0.0.1:1".to_string(),
            stream_name: "ACTIVITIES".to_string(),
            subject_prefix: "tracking".to_string(),
            max_age: Duration::from_secs(60),
            max_bytes: 1024,
        };
        let sink = NatsSink::new("payments", config).unwrap();
        assert_eq!(sink.subject(), "tracking.payments");
        assert_eq!(sink.name(), "payments");
        assert!(sink.reset().is_ok());
    }
}
