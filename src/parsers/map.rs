//! Parser for key/value items: ready-made maps or JSON object text.
//! `Label` locators are dotted key paths (`user.address.city`,
//! `items.[0].id`), `Path` locators the same with `/` separators.

use serde_json::Value;
use tracing::trace;

use crate::activity::ActivityInfo;
use crate::error::{ConfigError, FieldError, ParseError};
use crate::extraction::{Extracted, Extractor, FieldPath};
use crate::fields::{ActivityField, Locator, LocatorType};
use crate::parsers::{next_text, parse_bool, prop_is, props, ActivityParser, ParserCore, RawItem};
use crate::runtime::StreamContext;
use crate::value::FieldValue;

pub struct ActivityMapParser {
    core: ParserCore,
    require_all: bool,
}

impl ActivityMapParser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: ParserCore::new(name),
            require_all: false,
        }
    }

    fn object(&self, item: &RawItem) -> Result<Option<Value>, ParseError> {
        if let RawItem::Map(map) = item {
            return Ok(Some(Value::Object(map.clone())));
        }
        let Some(text) = next_text(&self.core.name, item)? else {
            return Ok(None);
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(v @ Value::Object(_)) => Ok(Some(v)),
            Ok(_) => Err(ParseError::malformed(&self.core.name, "expected a JSON object")),
            Err(e) => Err(ParseError::malformed(&self.core.name, e.to_string())),
        }
    }
}

struct MapSource<'a>(&'a Value);

impl Extractor for MapSource<'_> {
    fn extract(&self, locator: &Locator) -> Result<Option<Extracted>, FieldError> {
        let path = match locator.locator_type {
            LocatorType::Label => FieldPath::dotted(locator.location.trim()),
            LocatorType::Path => FieldPath::new(locator.location.trim(), "/"),
            _ => {
                return Err(FieldError::Unresolvable {
                    locator: locator.to_string(),
                    reason: "not a key locator".to_string(),
                })
            }
        };

        let found: Vec<&Value> = path.lookup(self.0).into_iter().filter(|v| !v.is_null()).collect();
        let value = match found.as_slice() {
            [] => return Ok(None),
            [single] => FieldValue::from_json(single),
            many => FieldValue::List(many.iter().map(|v| FieldValue::from_json(v)).collect()),
        };
        Ok(Some(Extracted::new(value)))
    }
}

impl ActivityParser for ActivityMapParser {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn set_properties(&mut self, properties: &[(String, String)]) -> Result<(), ConfigError> {
        for (name, value) in properties {
            if prop_is(name, props::REQUIRE_ALL) {
                self.require_all = parse_bool(name, value)?;
            } else {
                trace!("Parser {} ignoring property {}", self.core.name, name);
            }
        }
        Ok(())
    }

    fn add_field(&mut self, field: ActivityField) -> Result<(), ConfigError> {
        for locator in &field.locators {
            if matches!(locator.locator_type, LocatorType::Index | LocatorType::MatchNum) {
                return Err(ConfigError::InvalidLocator {
                    field: field.to_string(),
                    locator: locator.to_string(),
                    reason: "map fields are located by key".to_string(),
                });
            }
        }
        self.core.mapper.add_field(field)
    }

    fn supports(&self, _item: &RawItem) -> bool {
        true
    }

    fn parse(&self, ctx: &StreamContext, item: &RawItem) -> Result<Option<ActivityInfo>, ParseError> {
        let Some(object) = self.object(item)? else {
            return Ok(None);
        };

        let mut ai = ActivityInfo::new();
        if !self
            .core
            .mapper
            .map_fields(&mut ai, ctx, &MapSource(&object), self.require_all)?
        {
            return Ok(None);
        }
        Ok(Some(ai))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::OpCompCode;
    use crate::fields::{DataType, FieldType};
    use serde_json::json;

    fn parser() -> ActivityMapParser {
        let mut p = ActivityMapParser::new("map");
        p.add_field(ActivityField::new(FieldType::UserName).with_locator(Locator::label("user.name")))
            .unwrap();
        p.add_field(ActivityField::new(FieldType::StatusCode).with_locator(Locator::path("result/code")))
            .unwrap();
        p.add_field(
            ActivityField::new(FieldType::ReasonCode)
                .with_locator(Locator::label("result.reason").data_type(DataType::Number)),
        )
        .unwrap();
        p
    }

    #[test]
    fn test_map_item() {
        let map = json!({"user": {"name": "carol"}, "result": {"code": "warning", "reason": 2033}});
        let Value::Object(map) = map else { unreachable!() };

        let ai = parser()
            .parse(&StreamContext::empty(), &RawItem::Map(map))
            .unwrap()
            .unwrap();
        assert_eq!(ai.user_name.as_deref(), Some("carol"));
        assert_eq!(ai.status_code, Some(OpCompCode::Warning));
        assert_eq!(ai.reason_code, Some(2033));
    }

    #[test]
    fn test_json_text_item() {
        let ai = parser()
            .parse(&StreamContext::empty(), &r#"{"user": {"name": "dave"}}"#.into())
            .unwrap()
            .unwrap();
        assert_eq!(ai.user_name.as_deref(), Some("dave"));
        assert_eq!(ai.status_code, None);
    }

    #[test]
    fn test_non_object_is_malformed() {
        assert!(parser().parse(&StreamContext::empty(), &"[1, 2]".into()).is_err());
        assert!(parser().parse(&StreamContext::empty(), &"{oops".into()).is_err());
    }

    #[test]
    fn test_index_locator_rejected() {
        let mut p = ActivityMapParser::new("map");
        assert!(p
            .add_field(ActivityField::new(FieldType::Tag).with_locator(Locator::index(1)))
            .is_err());
    }
}
