//! Messaging-middleware flavour of the XML parser. `Correlator` and
//! `TrackingId` values made of several message attributes are collapsed
//! into one stable message signature.
//!
//! Signature components, in order: message type, format, message id,
//! user, putting application type, putting application name, put date,
//! put time. Absent or blank components are skipped.

use base64::Engine;
use tracing::trace;

use crate::activity::setters::text_value;
use crate::activity::ActivityInfo;
use crate::error::{ConfigError, FieldError, ParseError};
use crate::fields::{ActivityField, FieldType, ValueHook};
use crate::parsers::xml::ActivityXmlParser;
use crate::parsers::{prop_is, props, ActivityParser, RawItem};
use crate::runtime::StreamContext;
use crate::value::{FieldValue, ResolvedValue};

const DEFAULT_SIGNATURE_DELIM: &str = ",";
const SIGNATURE_ITEMS: usize = 8;

/// MD5 over the present signature components, Base64 encoded.
///
/// # Errors
/// A message type that is not an integer
pub fn compute_signature(items: &[FieldValue]) -> Result<String, String> {
    let mut digest = md5::Context::new();
    for (i, item) in items.iter().enumerate().take(SIGNATURE_ITEMS) {
        let text = match item {
            FieldValue::Null => continue,
            FieldValue::Binary(bytes) => {
                if i == 2 {
                    digest.consume(bytes);
                    continue;
                }
                text_value(item)
            }
            other => text_value(other),
        };
        if text.trim().is_empty() {
            continue;
        }

        match i {
            0 => {
                let msg_type = match item {
                    FieldValue::Int(t) => *t,
                    _ => text
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| format!("message type '{}' is not an integer", text.trim()))?,
                };
                digest.consume(msg_type.to_string().as_bytes());
            }
            2 => digest.consume(text.as_bytes()),
            3 => digest.consume(text.trim().to_lowercase().as_bytes()),
            _ => digest.consume(text.trim().as_bytes()),
        }
    }
    Ok(base64::engine::general_purpose::STANDARD.encode(digest.compute().0))
}

/// Replaces multi-part `Correlator`/`TrackingId` values with their
/// signature. A single text value is split on the delimiter first.
pub struct SignatureHook {
    delimiter: String,
}

impl SignatureHook {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }
}

impl Default for SignatureHook {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNATURE_DELIM)
    }
}

impl ValueHook for SignatureHook {
    fn adjust(&self, field: &ActivityField, value: ResolvedValue) -> Result<ResolvedValue, FieldError> {
        if !matches!(field.field_type, FieldType::Correlator | FieldType::TrackingId) {
            return Ok(value);
        }

        let items = match value {
            ResolvedValue::Composite(items) => items,
            ResolvedValue::Scalar(FieldValue::List(items)) => items,
            ResolvedValue::Scalar(FieldValue::String(s))
                if !self.delimiter.is_empty() && s.contains(&self.delimiter) =>
            {
                s.split(self.delimiter.as_str()).map(FieldValue::from).collect()
            }
            other => return Ok(other),
        };

        let signature = compute_signature(&items).map_err(|reason| FieldError::InvalidValue {
            field: field.to_string(),
            value: FieldValue::List(items.clone()).to_string(),
            reason,
        })?;
        trace!("Computed signature {} for field {}", signature, field);
        Ok(ResolvedValue::Scalar(FieldValue::String(signature)))
    }
}

/// XML parser whose tracking values are message signatures.
pub struct MessageActivityXmlParser {
    inner: ActivityXmlParser,
}

impl MessageActivityXmlParser {
    pub fn new(name: impl Into<String>) -> Self {
        let mut inner = ActivityXmlParser::new(name);
        inner.set_value_hook(Box::new(SignatureHook::default()));
        Self { inner }
    }
}

impl ActivityParser for MessageActivityXmlParser {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn set_properties(&mut self, properties: &[(String, String)]) -> Result<(), ConfigError> {
        for (name, value) in properties {
            if prop_is(name, props::SIGNATURE_DELIM) {
                if value.is_empty() {
                    return Err(ConfigError::InvalidProperty {
                        name: name.clone(),
                        value: value.clone(),
                        reason: "delimiter is empty".to_string(),
                    });
                }
                self.inner.set_value_hook(Box::new(SignatureHook::new(value.as_str())));
            }
        }
        self.inner.set_properties(properties)
    }

    fn add_field(&mut self, field: ActivityField) -> Result<(), ConfigError> {
        self.inner.add_field(field)
    }

    fn supports(&self, item: &RawItem) -> bool {
        self.inner.supports(item)
    }

    fn parse(&self, ctx: &StreamContext, item: &RawItem) -> Result<Option<ActivityInfo>, ParseError> {
        self.inner.parse(ctx, item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Locator;

    fn strings(items: &[&str]) -> Vec<FieldValue> {
        items.iter().map(|s| FieldValue::from(*s)).collect()
    }

    #[test]
    fn test_signature_of_all_components() {
        let items = strings(&["8", "MQSTR", "abc", " Bob ", "11", "app.exe", "20160101", "10101010"]);
        assert_eq!(compute_signature(&items).unwrap(), "Y9fn4/NngHPODrUVLzSg+A==");
    }

    #[test]
    fn test_absent_components_skipped() {
        let mut items = strings(&["8", " MQSTR"]);
        items.push(FieldValue::Null);
        items.push(FieldValue::from(""));
        assert_eq!(compute_signature(&items).unwrap(), "Vo4hEr26ADq6UgIGi0Q8jQ==");
    }

    #[test]
    fn test_user_is_case_insensitive() {
        let a = compute_signature(&strings(&["1", "", "", "ALICE"])).unwrap();
        let b = compute_signature(&strings(&["1", "", "", "alice "])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_non_numeric_type_rejected() {
        assert!(compute_signature(&strings(&["datagram"])).is_err());
    }

    #[test]
    fn test_hook_leaves_other_fields_alone() {
        let hook = SignatureHook::default();
        let field = ActivityField::new(FieldType::Tag);
        let value = ResolvedValue::Scalar("8,MQSTR".into());
        assert_eq!(hook.adjust(&field, value.clone()).unwrap(), value);
    }

    #[test]
    fn test_hook_splits_delimited_text() {
        let hook = SignatureHook::new(";");
        let field = ActivityField::new(FieldType::Correlator);
        let adjusted = hook
            .adjust(&field, ResolvedValue::Scalar("8;MQSTR".into()))
            .unwrap();
        assert_eq!(adjusted, ResolvedValue::Scalar("Vo4hEr26ADq6UgIGi0Q8jQ==".into()));
    }

    #[test]
    fn test_parser_computes_correlator() {
        let mut parser = MessageActivityXmlParser::new("mq");
        parser
            .add_field(
                ActivityField::new(FieldType::Correlator)
                    .with_locator(Locator::path("/msg/type"))
                    .with_locator(Locator::path("/msg/format"))
                    .with_locator(Locator::path("/msg/id")),
            )
            .unwrap();

        let ai = parser
            .parse(
                &StreamContext::empty(),
                &"<msg><type>8</type><format>MQSTR</format></msg>".into(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(ai.correlator.as_deref(), Some("Vo4hEr26ADq6UgIGi0Q8jQ=="));
    }
}
