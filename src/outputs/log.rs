//! Sink that writes each record to the log at info level.

use tracing::info;

use crate::activity::ActivityRecord;
use crate::error::SinkError;
use crate::outputs::ActivitySink;

pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new("log")
    }
}

impl ActivitySink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, record: &ActivityRecord) -> Result<(), SinkError> {
        let json = record.to_json()?;
        info!(target: "activity", sink = %self.name, "{}", json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_serializes_record() {
        let sink = LogSink::default();
        assert_eq!(sink.name(), "log");
        assert!(sink.send(&ActivityRecord::new()).is_ok());
    }
}
