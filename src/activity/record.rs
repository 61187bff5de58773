//! Flat key/value materialization of a finalized activity, handed to sinks.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// Label used for unset resource names.
pub const UNSPECIFIED_LABEL: &str = "<UNSPECIFIED>";

/// Record keys, in delivery order.
pub mod keys {
    pub const APPL_NAME: &str = "appl_name";
    pub const SERVER_NAME: &str = "server_name";
    pub const SERVER_IP: &str = "server_ip";
    pub const SERVER_OS: &str = "server_os";
    pub const USER_NAME: &str = "user_name";
    pub const RESOURCE_MGR: &str = "resource_mgr";
    pub const RESOURCE_MGR_TYPE: &str = "resource_mgr_type";
    pub const ACTIVITY_NAME: &str = "activity_name";
    pub const ACTIVITY_TYPE: &str = "activity_type";
    pub const START_TIME: &str = "start_time";
    pub const END_TIME: &str = "end_time";
    pub const ELAPSED_TIME: &str = "elapsed_time";
    pub const STATUS_CODE: &str = "status_code";
    pub const REASON_CODE: &str = "reason_code";
    pub const ERROR_MSG: &str = "error_msg";
    pub const SEVERITY: &str = "severity";
    pub const LOCATION: &str = "location";
    pub const CORRELATOR: &str = "correlator";
    pub const RESOURCE: &str = "resource";
    pub const RESOURCE_TYPE: &str = "resource_type";
    pub const SIGNATURE: &str = "signature";
    pub const TRANSPORT: &str = "transport";
    pub const TAG: &str = "tag";
    pub const VALUE: &str = "value";
    pub const MSG_DATA: &str = "msg_data";
    pub const MSG_BIN_DATA: &str = "msg_bin_data";
    pub const MSG_SIZE: &str = "msg_size";
    pub const LUW_TYPE: &str = "luw_type";
    pub const LUW_STATUS: &str = "luw_status";
    pub const PROCESS_ID: &str = "process_id";
    pub const THREAD_ID: &str = "thread_id";
}

/// Ordered set of record attributes. Serializes as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ActivityRecord {
    fields: IndexMap<String, Value>,
}

impl ActivityRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `key`. `None` leaves the key out.
    pub fn put<V: Into<Value>>(&mut self, key: &str, value: Option<V>) {
        if let Some(v) = value {
            self.fields.insert(key.to_string(), v.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn signature(&self) -> Option<&str> {
        self.get_str(keys::SIGNATURE)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_skips_none() {
        let mut record = ActivityRecord::new();
        record.put(keys::TAG, Some("t1"));
        record.put::<&str>(keys::VALUE, None);
        record.put(keys::ELAPSED_TIME, Some(150_000i64));

        assert_eq!(record.len(), 2);
        assert_eq!(record.get_str(keys::TAG), Some("t1"));
        assert_eq!(record.get_i64(keys::ELAPSED_TIME), Some(150_000));
    }

    #[test]
    fn test_serializes_in_insertion_order() {
        let mut record = ActivityRecord::new();
        record.put(keys::SIGNATURE, Some("abc"));
        record.put(keys::APPL_NAME, Some("orders"));

        assert_eq!(record.to_json().unwrap(), r#"{"signature":"abc","appl_name":"orders"}"#);
    }
}
