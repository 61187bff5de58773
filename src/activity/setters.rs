//! Typed setters for activity fields, looked up by field type.
//!
//! Each setter coerces a generic [`FieldValue`] to the attribute's own
//! representation. New field types are supported by registering another
//! setter; nothing dispatches on the field type by hand.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};

use crate::activity::types::{OpCompCode, OpLevel, OpType, ResourceManagerType, ResourceType, TransportType};
use crate::activity::{ActivityInfo, MessageData};
use crate::error::FieldError;
use crate::fields::timestamp::{self, TimeUnits};
use crate::fields::FieldType;
use crate::value::FieldValue;

/// A typed setter. `format` is the field's configured format, used when a
/// timestamp still arrives as text.
pub type Setter = fn(&mut ActivityInfo, &FieldValue, Option<&str>) -> Result<(), String>;

/// Registry of setters keyed by field type.
pub struct SetterRegistry {
    setters: HashMap<FieldType, Setter>,
}

impl SetterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            setters: HashMap::new(),
        }
    }

    /// Registry holding a setter for every [`FieldType`].
    pub fn standard() -> &'static SetterRegistry {
        static STANDARD: OnceLock<SetterRegistry> = OnceLock::new();
        STANDARD.get_or_init(|| {
            let mut registry = SetterRegistry::new();
            registry.register_standard();
            registry
        })
    }

    pub fn register(&mut self, field_type: FieldType, setter: Setter) {
        self.setters.insert(field_type, setter);
    }

    pub fn has(&self, field_type: FieldType) -> bool {
        self.setters.contains_key(&field_type)
    }

    /// Set `field_type` on `ai`.
    ///
    /// # Errors
    /// `Unrecognized` when no setter is registered, `InvalidValue` when the
    /// value cannot be coerced
    pub fn apply(
        &self,
        ai: &mut ActivityInfo,
        field_type: FieldType,
        value: &FieldValue,
        format: Option<&str>,
    ) -> Result<(), FieldError> {
        let setter = self.setters.get(&field_type).ok_or_else(|| FieldError::Unrecognized {
            field: field_type.to_string(),
        })?;
        setter(ai, value, format).map_err(|reason| FieldError::InvalidValue {
            field: field_type.to_string(),
            value: value.to_string(),
            reason,
        })
    }

    fn register_standard(&mut self) {
        self.register(FieldType::ApplName, |ai, v, _| set_text(&mut ai.appl_name, v));
        self.register(FieldType::ServerName, |ai, v, _| set_text(&mut ai.server_name, v));
        self.register(FieldType::ServerIp, |ai, v, _| set_text(&mut ai.server_ip, v));
        self.register(FieldType::ServerOs, |ai, v, _| set_text(&mut ai.server_os, v));
        self.register(FieldType::UserName, |ai, v, _| set_text(&mut ai.user_name, v));
        self.register(FieldType::ResourceMgr, |ai, v, _| set_text(&mut ai.resource_mgr, v));
        self.register(FieldType::Resource, |ai, v, _| set_text(&mut ai.resource, v));
        self.register(FieldType::ActivityName, |ai, v, _| set_text(&mut ai.activity_name, v));
        self.register(FieldType::ErrorMsg, |ai, v, _| set_text(&mut ai.error_msg, v));
        self.register(FieldType::Location, |ai, v, _| set_text(&mut ai.location, v));
        self.register(FieldType::Correlator, |ai, v, _| set_text(&mut ai.correlator, v));
        self.register(FieldType::Signature, |ai, v, _| set_text(&mut ai.signature, v));
        self.register(FieldType::TrackingId, |ai, v, _| set_text(&mut ai.signature, v));
        self.register(FieldType::Tag, |ai, v, _| set_text(&mut ai.tag, v));
        self.register(FieldType::Value, |ai, v, _| set_text(&mut ai.value, v));

        self.register(FieldType::ActivityType, |ai, v, _| {
            ai.activity_type = Some(OpType::map(v));
            Ok(())
        });
        self.register(FieldType::ResMgrType, |ai, v, _| {
            ai.resource_mgr_type = Some(enum_value(v, ResourceManagerType::from_value, "resource manager type")?);
            Ok(())
        });
        self.register(FieldType::ResType, |ai, v, _| {
            ai.resource_type = Some(enum_value(v, ResourceType::from_value, "resource type")?);
            Ok(())
        });
        self.register(FieldType::StatusCode, |ai, v, _| {
            ai.status_code = Some(enum_value(v, OpCompCode::from_value, "completion code")?);
            Ok(())
        });
        self.register(FieldType::Transport, |ai, v, _| {
            ai.transport = Some(enum_value(v, TransportType::from_value, "transport type")?);
            Ok(())
        });
        self.register(FieldType::Severity, |ai, v, _| {
            ai.severity = Some(severity_value(v)?);
            Ok(())
        });

        self.register(FieldType::StartTime, |ai, v, format| {
            ai.start_time = Some(timestamp_value(v, format)?);
            Ok(())
        });
        self.register(FieldType::EndTime, |ai, v, format| {
            ai.end_time = Some(timestamp_value(v, format)?);
            Ok(())
        });

        self.register(FieldType::ElapsedTime, |ai, v, _| {
            ai.elapsed_time = Some(int_value(v)?);
            Ok(())
        });
        self.register(FieldType::ReasonCode, |ai, v, _| {
            ai.reason_code = Some(int_value(v)?);
            Ok(())
        });
        self.register(FieldType::ProcessId, |ai, v, _| {
            ai.process_id = Some(int_value(v)?);
            Ok(())
        });
        self.register(FieldType::ThreadId, |ai, v, _| {
            ai.thread_id = Some(int_value(v)?);
            Ok(())
        });

        self.register(FieldType::ActivityData, |ai, v, _| {
            ai.data = Some(match v {
                FieldValue::Binary(bytes) => MessageData::Binary(bytes.clone()),
                other => MessageData::Text(text_value(other)),
            });
            Ok(())
        });
    }
}

impl Default for SetterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// String rendering used for text attributes.
pub(crate) fn text_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        other => other.to_string(),
    }
}

fn set_text(slot: &mut Option<String>, value: &FieldValue) -> Result<(), String> {
    *slot = Some(text_value(value));
    Ok(())
}

fn int_value(value: &FieldValue) -> Result<i64, String> {
    match value {
        FieldValue::Int(i) => Ok(*i),
        FieldValue::Float(f) => float_to_int(*f),
        FieldValue::Bool(b) => Ok(*b as i64),
        FieldValue::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Ok(i),
                Err(_) => s
                    .parse::<f64>()
                    .map_err(|_| "not an integer".to_string())
                    .and_then(float_to_int),
            }
        }
        _ => Err("not an integer".to_string()),
    }
}

/// Truncates toward zero; values outside the `i64` range are rejected
/// instead of saturating.
fn float_to_int(f: f64) -> Result<i64, String> {
    if f.is_finite() && f.abs() < i64::MAX as f64 {
        Ok(f as i64)
    } else {
        Err(format!("{} is out of integer range", f))
    }
}

fn timestamp_value(value: &FieldValue, format: Option<&str>) -> Result<DateTime<Utc>, String> {
    match value {
        FieldValue::Timestamp(ts) => Ok(*ts),
        FieldValue::Int(i) => timestamp::from_epoch(*i, TimeUnits::Milliseconds),
        FieldValue::Float(f) => timestamp::from_epoch_f64(*f, TimeUnits::Milliseconds),
        FieldValue::String(s) => timestamp::parse(s, format),
        _ => Err("not a timestamp".to_string()),
    }
}

fn enum_value<T>(value: &FieldValue, parse: fn(&FieldValue) -> Option<T>, kind: &str) -> Result<T, String> {
    parse(value).ok_or_else(|| format!("not a valid {}", kind))
}

/// Severity accepts an `OpLevel` name or its ordinal.
fn severity_value(value: &FieldValue) -> Result<OpLevel, String> {
    OpLevel::from_value(value).ok_or_else(|| "not a valid severity".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_covers_every_field_type() {
        let registry = SetterRegistry::standard();
        for field_type in FieldType::ALL {
            assert!(registry.has(field_type), "no setter for {}", field_type);
        }
    }

    #[test]
    fn test_empty_registry_reports_unrecognized() {
        let registry = SetterRegistry::new();
        let mut ai = ActivityInfo::new();
        let err = registry
            .apply(&mut ai, FieldType::Tag, &"x".into(), None)
            .unwrap_err();
        assert!(matches!(err, FieldError::Unrecognized { .. }));
    }

    #[test]
    fn test_severity_setter() {
        let registry = SetterRegistry::standard();
        let mut ai = ActivityInfo::new();

        registry.apply(&mut ai, FieldType::Severity, &"WARNING".into(), None).unwrap();
        assert_eq!(ai.severity, Some(OpLevel::Warning));

        registry.apply(&mut ai, FieldType::Severity, &FieldValue::Int(6), None).unwrap();
        assert_eq!(ai.severity, Some(OpLevel::Error));

        assert!(registry.apply(&mut ai, FieldType::Severity, &"LOUD".into(), None).is_err());
    }

    #[test]
    fn test_status_code_rejects_unknown() {
        let registry = SetterRegistry::standard();
        let mut ai = ActivityInfo::new();
        let err = registry
            .apply(&mut ai, FieldType::StatusCode, &"BROKEN".into(), None)
            .unwrap_err();
        assert!(matches!(err, FieldError::InvalidValue { ref field, .. } if field == "StatusCode"));
    }

    #[test]
    fn test_time_setters_parse_text_with_format() {
        let registry = SetterRegistry::standard();
        let mut ai = ActivityInfo::new();
        registry
            .apply(&mut ai, FieldType::StartTime, &"2016-01-02 10:11:12".into(), Some("yyyy-MM-dd HH:mm:ss"))
            .unwrap();
        assert_eq!(ai.start_time.map(|t| t.timestamp()), Some(1451729472));
    }

    #[test]
    fn test_elapsed_time_requires_integer() {
        let registry = SetterRegistry::standard();
        let mut ai = ActivityInfo::new();
        registry.apply(&mut ai, FieldType::ElapsedTime, &"42".into(), None).unwrap();
        assert_eq!(ai.elapsed_time, Some(42));
        assert!(registry.apply(&mut ai, FieldType::ElapsedTime, &"later".into(), None).is_err());
    }

    #[test]
    fn test_integer_setters_reject_out_of_range_floats() {
        let registry = SetterRegistry::standard();
        let mut ai = ActivityInfo::new();
        registry.apply(&mut ai, FieldType::ReasonCode, &"2.9".into(), None).unwrap();
        assert_eq!(ai.reason_code, Some(2));

        assert!(registry.apply(&mut ai, FieldType::ElapsedTime, &"1e300".into(), None).is_err());
        assert!(registry
            .apply(&mut ai, FieldType::ElapsedTime, &FieldValue::Float(f64::NAN), None)
            .is_err());
        assert!(registry
            .apply(&mut ai, FieldType::ProcessId, &FieldValue::Float(-1e19), None)
            .is_err());
        assert_eq!(ai.elapsed_time, None);
    }

    #[test]
    fn test_activity_data_keeps_binary() {
        let registry = SetterRegistry::standard();
        let mut ai = ActivityInfo::new();
        registry
            .apply(&mut ai, FieldType::ActivityData, &FieldValue::Binary(vec![0, 1]), None)
            .unwrap();
        assert_eq!(ai.data, Some(MessageData::Binary(vec![0, 1])));
    }
}
