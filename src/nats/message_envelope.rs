/// Activity envelope for NATS JetStream
///
/// Wraps a finalized activity record with the metadata consumers need to
/// deduplicate and trace it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::activity::ActivityRecord;

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEnvelope<'a> {
    /// Unique message ID, also sent as the JetStream dedup header
    pub message_id: Uuid,

    /// Name of the sink that published the record
    pub source: &'a str,

    pub published_at: DateTime<Utc>,

    pub record: &'a ActivityRecord,
}

impl<'a> ActivityEnvelope<'a> {
    pub fn new(source: &'a str, record: &'a ActivityRecord) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            source,
            published_at: Utc::now(),
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::keys;

    #[test]
    fn test_envelope_wraps_record() {
        let mut record = ActivityRecord::new();
        record.put(keys::ACTIVITY_NAME, Some("login"));

        let envelope = ActivityEnvelope::new("orders", &record);
        let json: serde_json::Value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["source"], "orders");
        assert_eq!(json["record"]["activity_name"], "login");
        assert!(Uuid::parse_str(json["message_id"].as_str().unwrap()).is_ok());
    }
}
