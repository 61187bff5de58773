//! The normalized activity entity.
//!
//! An [`ActivityInfo`] is created per raw item by a parser, filled field by
//! field, finalized (server and time resolution, signature) right before
//! delivery and then materialized as an [`ActivityRecord`].

pub mod host_cache;
pub mod record;
pub mod setters;
pub mod types;

use chrono::{DateTime, Duration, Utc};
use tracing::trace;
use uuid::Uuid;

use crate::error::FieldError;
use crate::fields::{timestamp, ActivityField, FieldType, Locator};
use crate::value::{FieldValue, ResolvedValue};

pub use host_cache::{DnsLookup, HostCache, HostLookup};
pub use record::{keys, ActivityRecord, UNSPECIFIED_LABEL};
pub use setters::SetterRegistry;
pub use types::{
    ActivityStatus, LuwType, OpCompCode, OpLevel, OpType, ResourceManagerType, ResourceType, TransportType,
};

/// Message payload of an activity.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageData {
    Text(String),
    Binary(Vec<u8>),
}

impl MessageData {
    pub fn len(&self) -> usize {
        match self {
            MessageData::Text(s) => s.chars().count(),
            MessageData::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutable bag of normalized activity attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityInfo {
    pub server_name: Option<String>,
    pub server_ip: Option<String>,
    pub server_os: Option<String>,
    pub appl_name: Option<String>,
    pub user_name: Option<String>,

    pub resource_mgr: Option<String>,
    pub resource_mgr_type: Option<ResourceManagerType>,
    pub resource: Option<String>,
    pub resource_type: Option<ResourceType>,

    pub activity_name: Option<String>,
    pub activity_type: Option<OpType>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Microseconds.
    pub elapsed_time: Option<i64>,
    pub status_code: Option<OpCompCode>,
    pub reason_code: Option<i64>,
    pub error_msg: Option<String>,
    pub severity: Option<OpLevel>,
    pub location: Option<String>,
    pub correlator: Option<String>,

    pub signature: Option<String>,
    pub transport: Option<TransportType>,
    pub tag: Option<String>,
    pub value: Option<String>,
    pub data: Option<MessageData>,

    pub process_id: Option<i64>,
    pub thread_id: Option<i64>,
}

impl ActivityInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a resolved value for `field`.
    ///
    /// `locators` are the locators the value came from (as they applied to
    /// this read); empty when the value was produced without locators.
    /// Composite values are joined with the field separator, timestamps
    /// rendered with their locator's format. A `Null` result leaves the
    /// attribute untouched.
    ///
    /// # Errors
    /// Composite values for enumeration fields, a value count that differs
    /// from the locator count, and any coercion failure of the setter
    pub fn apply_field(
        &mut self,
        field: &ActivityField,
        value: ResolvedValue,
        locators: &[&Locator],
    ) -> Result<(), FieldError> {
        trace!("Applying field {} from {:?}", field, value);

        let field_value = match value.normalize() {
            ResolvedValue::Composite(values) => {
                if field.is_enumeration() {
                    return Err(FieldError::EnumerationComposite {
                        field: field.to_string(),
                    });
                }
                if values.len() != locators.len() {
                    return Err(FieldError::LocatorCountMismatch {
                        field: field.to_string(),
                        expected: locators.len(),
                        actual: values.len(),
                    });
                }

                let mut joined = String::new();
                for (i, (v, locator)) in values.into_iter().zip(locators).enumerate() {
                    if i > 0 {
                        joined.push_str(&field.separator);
                    }
                    match format_for_field(field, Some(*locator), v) {
                        FieldValue::Null => {}
                        FieldValue::Timestamp(ts) if locator.format.is_some() => {
                            joined.push_str(&timestamp::format(&ts, locator.format.as_deref()));
                        }
                        other => joined.push_str(&setters::text_value(&other)),
                    }
                }
                FieldValue::String(joined)
            }
            // several locators but one value: already combined upstream
            ResolvedValue::Scalar(v) if locators.len() > 1 => v,
            ResolvedValue::Scalar(v) => format_for_field(field, locators.first().copied(), v),
        };

        if field_value.is_null() {
            trace!("Field {} resolves to null value, not applying field", field);
            return Ok(());
        }

        let format = locators.first().and_then(|l| l.format.as_deref());
        self.set_field(field.field_type, &field_value, format)
    }

    /// Set one attribute through the standard setter registry.
    pub fn set_field(
        &mut self,
        field_type: FieldType,
        value: &FieldValue,
        format: Option<&str>,
    ) -> Result<(), FieldError> {
        SetterRegistry::standard().apply(self, field_type, value, format)?;
        trace!("Set field {} to '{}'", field_type, value);
        Ok(())
    }

    /// Current value of one attribute as text, `None` while unset.
    pub fn field_text(&self, field_type: FieldType) -> Option<String> {
        let ts = |t: &Option<DateTime<Utc>>| t.map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true));
        let label = |l: Option<&'static str>| l.map(str::to_string);
        match field_type {
            FieldType::ApplName => self.appl_name.clone(),
            FieldType::ServerName => self.server_name.clone(),
            FieldType::ServerIp => self.server_ip.clone(),
            FieldType::ServerOs => self.server_os.clone(),
            FieldType::UserName => self.user_name.clone(),
            FieldType::ResourceMgr => self.resource_mgr.clone(),
            FieldType::ResMgrType => label(self.resource_mgr_type.map(ResourceManagerType::label)),
            FieldType::Resource => self.resource.clone(),
            FieldType::ResType => label(self.resource_type.map(ResourceType::label)),
            FieldType::ActivityName => self.activity_name.clone(),
            FieldType::ActivityType => label(self.activity_type.map(OpType::label)),
            FieldType::StartTime => ts(&self.start_time),
            FieldType::EndTime => ts(&self.end_time),
            FieldType::ElapsedTime => self.elapsed_time.map(|v| v.to_string()),
            FieldType::StatusCode => label(self.status_code.map(OpCompCode::label)),
            FieldType::ReasonCode => self.reason_code.map(|v| v.to_string()),
            FieldType::ErrorMsg => self.error_msg.clone(),
            FieldType::Severity => label(self.severity.map(OpLevel::label)),
            FieldType::Location => self.location.clone(),
            FieldType::Correlator => self.correlator.clone(),
            FieldType::TrackingId | FieldType::Signature => self.signature.clone(),
            FieldType::Transport => label(self.transport.map(TransportType::label)),
            FieldType::Tag => self.tag.clone(),
            FieldType::Value => self.value.clone(),
            FieldType::ActivityData => match &self.data {
                Some(MessageData::Text(text)) => Some(text.clone()),
                Some(MessageData::Binary(bytes)) => Some(hex::encode(bytes)),
                None => None,
            },
            FieldType::ProcessId => self.process_id.map(|v| v.to_string()),
            FieldType::ThreadId => self.thread_id.map(|v| v.to_string()),
        }
    }

    /// Resolve whichever of server name/IP is missing through `cache`.
    /// With neither set, the local host is used.
    pub fn resolve_server(&mut self, cache: &HostCache) {
        let has_name = self.server_name.as_deref().is_some_and(|s| !s.is_empty());
        let has_ip = self.server_ip.as_deref().is_some_and(|s| !s.is_empty());

        match (has_name, has_ip) {
            (false, false) => {
                let (name, ip) = cache.local_host();
                self.server_name = name;
                self.server_ip = ip;
                self.server_os = None;
            }
            (false, true) => {
                let ip = self.server_ip.clone().unwrap_or_default();
                // unresolvable addresses stand in for the name
                self.server_name = Some(cache.name_for_ip(&ip).unwrap_or(ip));
            }
            (true, false) => {
                let name = self.server_name.as_deref().unwrap_or_default();
                self.server_ip = cache.ip_for_name(name);
            }
            (true, true) => {}
        }
    }

    /// Fill in missing times relative to the current time.
    pub fn determine_times(&mut self) {
        self.determine_times_at(Utc::now());
    }

    /// Fill in missing start/end times from the other plus the elapsed
    /// time, which defaults to 0. With neither set, `now` ends the
    /// activity.
    pub fn determine_times_at(&mut self, now: DateTime<Utc>) {
        let elapsed = self.elapsed_time.filter(|e| *e >= 0).unwrap_or(0);
        self.elapsed_time = Some(elapsed);
        let span = Duration::microseconds(elapsed);

        // times past the representable range clamp to its bounds
        let later = |t: DateTime<Utc>| t.checked_add_signed(span).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let earlier = |t: DateTime<Utc>| t.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC);

        match (self.start_time, self.end_time) {
            (Some(start), None) => self.end_time = Some(later(start)),
            (None, Some(end)) => self.start_time = Some(earlier(end)),
            (None, None) => {
                self.end_time = Some(now);
                self.start_time = Some(earlier(now));
            }
            (Some(_), Some(_)) => {}
        }
    }

    /// Prepare for delivery: resolve server identity and times, and make
    /// sure the activity has a signature and a correlator.
    pub fn finalize(&mut self, cache: &HostCache) {
        self.resolve_server(cache);
        self.determine_times();
        if self.signature.as_deref().map_or(true, str::is_empty) {
            self.signature = Some(Uuid::new_v4().to_string());
        }
        if self.correlator.as_deref().map_or(true, str::is_empty) {
            self.correlator = self.signature.clone();
        }
    }

    /// Logical unit of work role implied by the operation type.
    pub fn luw_type(&self) -> Option<LuwType> {
        match self.activity_type {
            Some(OpType::Receive) => Some(LuwType::Consumer),
            Some(OpType::Send) => Some(LuwType::Producer),
            _ => None,
        }
    }

    pub fn luw_status(&self) -> ActivityStatus {
        if self.status_code == Some(OpCompCode::Error) {
            ActivityStatus::Exception
        } else {
            ActivityStatus::End
        }
    }

    /// Flat record with the stable key set. Unset resource names carry
    /// [`UNSPECIFIED_LABEL`]; unset enumerations their neutral default.
    pub fn to_record(&self) -> ActivityRecord {
        let mut r = ActivityRecord::new();
        let ts = |t: &Option<DateTime<Utc>>| t.map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true));
        let unspecified = |s: &Option<String>| {
            Some(
                s.clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| UNSPECIFIED_LABEL.to_string()),
            )
        };

        r.put(keys::APPL_NAME, self.appl_name.clone());
        r.put(keys::SERVER_NAME, self.server_name.clone());
        r.put(keys::SERVER_IP, self.server_ip.clone());
        r.put(keys::SERVER_OS, self.server_os.clone());
        r.put(keys::USER_NAME, self.user_name.clone());
        r.put(keys::RESOURCE_MGR, unspecified(&self.resource_mgr));
        r.put(
            keys::RESOURCE_MGR_TYPE,
            Some(self.resource_mgr_type.unwrap_or(ResourceManagerType::Unknown).label()),
        );
        r.put(keys::ACTIVITY_NAME, self.activity_name.clone());
        r.put(keys::ACTIVITY_TYPE, Some(self.activity_type.unwrap_or(OpType::Other).label()));
        r.put(keys::START_TIME, ts(&self.start_time));
        r.put(keys::END_TIME, ts(&self.end_time));
        r.put(keys::ELAPSED_TIME, Some(self.elapsed_time.unwrap_or(0)));
        r.put(keys::STATUS_CODE, Some(self.status_code.unwrap_or(OpCompCode::Success).label()));
        r.put(keys::REASON_CODE, Some(self.reason_code.unwrap_or(0)));
        r.put(keys::ERROR_MSG, self.error_msg.clone());
        r.put(keys::SEVERITY, Some(self.severity.unwrap_or(OpLevel::Info).label()));
        r.put(keys::LOCATION, self.location.clone());
        r.put(keys::CORRELATOR, self.correlator.clone());
        r.put(keys::RESOURCE, unspecified(&self.resource));
        r.put(keys::RESOURCE_TYPE, Some(self.resource_type.unwrap_or(ResourceType::Unknown).label()));
        r.put(keys::SIGNATURE, self.signature.clone());
        r.put(keys::TRANSPORT, Some(self.transport.unwrap_or(TransportType::Unknown).label()));
        r.put(keys::TAG, self.tag.clone());
        r.put(keys::VALUE, self.value.clone());
        match &self.data {
            Some(MessageData::Text(text)) => r.put(keys::MSG_DATA, Some(text.clone())),
            Some(MessageData::Binary(bytes)) => r.put(keys::MSG_BIN_DATA, Some(hex::encode(bytes))),
            None => {}
        }
        r.put(keys::MSG_SIZE, self.data.as_ref().map(|d| d.len() as u64));
        r.put(keys::LUW_TYPE, self.luw_type().map(LuwType::label));
        r.put(keys::LUW_STATUS, Some(self.luw_status().label()));
        r.put(keys::PROCESS_ID, self.process_id);
        r.put(keys::THREAD_ID, self.thread_id);
        r
    }
}

/// Field-level normalization applied on top of locator formatting:
/// enumeration text is upper-cased (all-digit text becomes an ordinal) and
/// elapsed times are converted to microseconds from the locator's units.
fn format_for_field(field: &ActivityField, locator: Option<&Locator>, value: FieldValue) -> FieldValue {
    let value = match value {
        FieldValue::String(s) if field.is_enumeration() => {
            let trimmed = s.trim();
            if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
                trimmed
                    .parse::<i64>()
                    .map(FieldValue::Int)
                    .unwrap_or_else(|_| FieldValue::String(s.clone()))
            } else {
                FieldValue::String(trimmed.to_uppercase())
            }
        }
        other => other,
    };

    if field.field_type != FieldType::ElapsedTime {
        return value;
    }
    let units = match locator.and_then(|l| l.units) {
        Some(units) => units,
        None => return value,
    };
    match value {
        FieldValue::Int(i) => FieldValue::Int(units.to_micros(i)),
        FieldValue::Float(f) => {
            let micros = units.to_micros_f64(f).round();
            if micros.is_finite() && micros.abs() < i64::MAX as f64 {
                FieldValue::Int(micros as i64)
            } else {
                FieldValue::Float(micros)
            }
        }
        FieldValue::String(s) => match s.trim().parse::<i64>() {
            Ok(i) => FieldValue::Int(units.to_micros(i)),
            // left for the setter to reject
            Err(_) => FieldValue::String(s),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::host_cache::tests::CountingLookup;
    use crate::fields::{DataType, TimeUnits};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_field_text_renders_set_attributes() {
        let mut ai = ActivityInfo::new();
        assert_eq!(ai.field_text(FieldType::Severity), None);

        ai.severity = Some(OpLevel::Warning);
        ai.elapsed_time = Some(1500);
        ai.signature = Some("sig".to_string());
        ai.start_time = Some(Utc.timestamp_opt(0, 0).unwrap());
        assert_eq!(ai.field_text(FieldType::Severity).as_deref(), Some("WARNING"));
        assert_eq!(ai.field_text(FieldType::ElapsedTime).as_deref(), Some("1500"));
        assert_eq!(ai.field_text(FieldType::TrackingId).as_deref(), Some("sig"));
        assert_eq!(
            ai.field_text(FieldType::StartTime).as_deref(),
            Some("1970-01-01T00:00:00.000000Z")
        );
    }

    #[test]
    fn test_determine_times_from_start() {
        let mut ai = ActivityInfo::new();
        ai.start_time = Some(t(1000));
        ai.elapsed_time = Some(5);
        ai.determine_times_at(t(5000));

        assert_eq!(ai.end_time, Some(t(1000) + Duration::microseconds(5)));
    }

    #[test]
    fn test_determine_times_from_end() {
        let mut ai = ActivityInfo::new();
        ai.end_time = Some(t(1000));
        ai.elapsed_time = Some(5);
        ai.determine_times_at(t(5000));

        assert_eq!(ai.start_time, Some(t(1000) - Duration::microseconds(5)));
    }

    #[test]
    fn test_determine_times_defaults_to_now() {
        let mut ai = ActivityInfo::new();
        ai.determine_times_at(t(5000));

        assert_eq!(ai.elapsed_time, Some(0));
        assert_eq!(ai.end_time, Some(t(5000)));
        assert_eq!(ai.start_time, Some(t(5000)));
    }

    #[test]
    fn test_determine_times_clamps_huge_elapsed() {
        let mut ai = ActivityInfo::new();
        ai.start_time = Some(t(5000));
        ai.elapsed_time = Some(i64::MAX);
        ai.determine_times_at(t(9000));
        assert_eq!(ai.end_time, Some(DateTime::<Utc>::MAX_UTC));

        let mut ai = ActivityInfo::new();
        ai.elapsed_time = Some(i64::MAX);
        ai.determine_times_at(t(9000));
        assert_eq!(ai.end_time, Some(t(9000)));
        assert_eq!(ai.start_time, Some(DateTime::<Utc>::MIN_UTC));
    }

    #[test]
    fn test_negative_elapsed_clamped() {
        let mut ai = ActivityInfo::new();
        ai.elapsed_time = Some(-7);
        ai.determine_times_at(t(10));
        assert_eq!(ai.elapsed_time, Some(0));
    }

    #[test]
    fn test_elapsed_time_converted_to_micros() {
        let field = ActivityField::new(FieldType::ElapsedTime);
        let locator = Locator::index(2)
            .data_type(DataType::Number)
            .units(TimeUnits::Milliseconds);

        let mut ai = ActivityInfo::new();
        ai.apply_field(&field, ResolvedValue::Scalar(FieldValue::Int(150)), &[&locator])
            .unwrap();
        assert_eq!(ai.elapsed_time, Some(150_000));
    }

    #[test]
    fn test_enumeration_text_normalized() {
        let field = ActivityField::new(FieldType::StatusCode);
        let locator = Locator::index(1);
        let mut ai = ActivityInfo::new();

        ai.apply_field(&field, ResolvedValue::Scalar(" warning ".into()), &[&locator])
            .unwrap();
        assert_eq!(ai.status_code, Some(OpCompCode::Warning));

        ai.apply_field(&field, ResolvedValue::Scalar("2".into()), &[&locator])
            .unwrap();
        assert_eq!(ai.status_code, Some(OpCompCode::Error));
    }

    #[test]
    fn test_composite_rules() {
        let l1 = Locator::index(1);
        let l2 = Locator::index(2);
        let pair = ResolvedValue::Composite(vec!["a".into(), "b".into()]);

        let mut ai = ActivityInfo::new();
        let enum_field = ActivityField::new(FieldType::Transport);
        assert!(matches!(
            ai.apply_field(&enum_field, pair.clone(), &[&l1, &l2]),
            Err(FieldError::EnumerationComposite { .. })
        ));

        let tag = ActivityField::new(FieldType::Tag).with_separator("-");
        assert!(matches!(
            ai.apply_field(&tag, pair.clone(), &[&l1]),
            Err(FieldError::LocatorCountMismatch { expected: 1, actual: 2, .. })
        ));

        ai.apply_field(&tag, pair, &[&l1, &l2]).unwrap();
        assert_eq!(ai.tag.as_deref(), Some("a-b"));
    }

    #[test]
    fn test_composite_renders_timestamps_with_format() {
        let date = Locator::index(1).data_type(DataType::Timestamp).format("yyyy-MM-dd");
        let name = Locator::index(2);
        let field = ActivityField::new(FieldType::Value).with_separator(" ");
        let mut ai = ActivityInfo::new();

        ai.apply_field(
            &field,
            ResolvedValue::Composite(vec![FieldValue::Timestamp(t(0)), "boot".into()]),
            &[&date, &name],
        )
        .unwrap();
        assert_eq!(ai.value.as_deref(), Some("1970-01-01 boot"));
    }

    #[test]
    fn test_null_is_no_op() {
        let field = ActivityField::new(FieldType::Tag);
        let mut ai = ActivityInfo::new();
        ai.tag = Some("kept".to_string());
        ai.apply_field(&field, ResolvedValue::Scalar(FieldValue::Null), &[&Locator::index(1)])
            .unwrap();
        assert_eq!(ai.tag.as_deref(), Some("kept"));
    }

    #[test]
    fn test_resolve_server_from_ip() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = HostCache::new(Box::new(CountingLookup { calls: calls.clone() }));

        let mut ai = ActivityInfo::new();
        ai.server_ip = Some("10.0.0.1".to_string());
        ai.resolve_server(&cache);
        assert_eq!(ai.server_name.as_deref(), Some("db01"));

        let mut other = ActivityInfo::new();
        other.server_name = Some("db01".to_string());
        other.resolve_server(&cache);
        assert_eq!(other.server_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_server_unresolvable_ip() {
        let cache = HostCache::new(Box::new(CountingLookup::default()));
        let mut ai = ActivityInfo::new();
        ai.server_ip = Some("172.16.0.5".to_string());
        ai.resolve_server(&cache);
        assert_eq!(ai.server_name.as_deref(), Some("172.16.0.5"));
    }

    #[test]
    fn test_finalize_generates_signature_and_correlator() {
        let cache = HostCache::new(Box::new(CountingLookup::default()));
        let mut ai = ActivityInfo::new();
        ai.finalize(&cache);

        let sig = ai.signature.clone().unwrap();
        assert!(Uuid::parse_str(&sig).is_ok());
        assert_eq!(ai.correlator.as_deref(), Some(sig.as_str()));
        assert_eq!(ai.server_name.as_deref(), Some("localhost"));
    }

    #[test]
    fn test_to_record_defaults() {
        let mut ai = ActivityInfo::new();
        ai.activity_name = Some("login".to_string());
        ai.activity_type = Some(OpType::Send);
        ai.data = Some(MessageData::Text("hello".to_string()));

        let record = ai.to_record();
        assert_eq!(record.get_str(keys::ACTIVITY_NAME), Some("login"));
        assert_eq!(record.get_str(keys::RESOURCE), Some(UNSPECIFIED_LABEL));
        assert_eq!(record.get_str(keys::SEVERITY), Some("INFO"));
        assert_eq!(record.get_str(keys::STATUS_CODE), Some("SUCCESS"));
        assert_eq!(record.get_str(keys::LUW_TYPE), Some("PRODUCER"));
        assert_eq!(record.get_i64(keys::MSG_SIZE), Some(5));
        assert!(record.get(keys::TAG).is_none());
    }
}
