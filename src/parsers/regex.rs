//! Regular-expression parser. The pattern must match the whole input;
//! `Index` locators read capture groups by number, `Label` locators by
//! name, and `MatchNum` locators the n-th match of the pattern anywhere in
//! the input.

use regex::Regex;
use tracing::{debug, trace};

use crate::activity::ActivityInfo;
use crate::error::{ConfigError, FieldError, ParseError};
use crate::extraction::{Extracted, Extractor};
use crate::fields::{ActivityField, Locator, LocatorType};
use crate::parsers::{compile_full_match, next_text, prop_is, props, ActivityParser, ParserCore, RawItem};
use crate::runtime::StreamContext;

pub struct ActivityRegexParser {
    core: ParserCore,
    /// Anchored form used for group extraction.
    full: Option<Regex>,
    /// Unanchored form used to enumerate matches.
    find: Option<Regex>,
}

impl ActivityRegexParser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: ParserCore::new(name),
            full: None,
            find: None,
        }
    }
}

struct Matches<'t> {
    groups: regex::Captures<'t>,
    matches: Vec<&'t str>,
}

impl Extractor for Matches<'_> {
    fn extract(&self, locator: &Locator) -> Result<Option<Extracted>, FieldError> {
        let found = match locator.locator_type {
            LocatorType::Index => locator
                .position()
                .and_then(|group| self.groups.get(group))
                .map(|m| m.as_str()),
            LocatorType::Label => self.groups.name(locator.location.trim()).map(|m| m.as_str()),
            LocatorType::MatchNum => locator
                .position()
                .and_then(|n| n.checked_sub(1))
                .and_then(|n| self.matches.get(n).copied()),
            _ => {
                return Err(FieldError::Unresolvable {
                    locator: locator.to_string(),
                    reason: "not a pattern locator".to_string(),
                })
            }
        };
        Ok(found.map(Extracted::new))
    }
}

impl ActivityParser for ActivityRegexParser {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn set_properties(&mut self, properties: &[(String, String)]) -> Result<(), ConfigError> {
        for (name, value) in properties {
            if prop_is(name, props::PATTERN) {
                if value.is_empty() {
                    return Err(ConfigError::InvalidProperty {
                        name: name.clone(),
                        value: value.clone(),
                        reason: "pattern is empty".to_string(),
                    });
                }
                self.full = Some(compile_full_match(name, value)?);
                self.find = Some(Regex::new(value).map_err(|e| ConfigError::InvalidProperty {
                    name: name.clone(),
                    value: value.clone(),
                    reason: e.to_string(),
                })?);
                debug!("Parser {} set property {} = {}", self.core.name, name, value);
            } else {
                trace!("Parser {} ignoring property {}", self.core.name, name);
            }
        }
        Ok(())
    }

    fn add_field(&mut self, field: ActivityField) -> Result<(), ConfigError> {
        for locator in &field.locators {
            if let LocatorType::Path = locator.locator_type {
                return Err(ConfigError::InvalidLocator {
                    field: field.to_string(),
                    locator: locator.to_string(),
                    reason: "pattern fields are located by group or match number".to_string(),
                });
            }
            if let (LocatorType::Label, Some(full)) = (locator.locator_type, &self.full) {
                let name = locator.location.trim();
                if !full.capture_names().flatten().any(|n| n == name) {
                    return Err(ConfigError::InvalidLocator {
                        field: field.to_string(),
                        locator: locator.to_string(),
                        reason: format!("pattern has no group named '{}'", name),
                    });
                }
            }
        }
        self.core.mapper.add_field(field)
    }

    fn supports(&self, item: &RawItem) -> bool {
        !matches!(item, RawItem::Map(_))
    }

    fn parse(&self, ctx: &StreamContext, item: &RawItem) -> Result<Option<ActivityInfo>, ParseError> {
        let (Some(full), Some(find)) = (&self.full, &self.find) else {
            return Err(ParseError::InvalidState {
                parser: self.core.name.clone(),
                reason: format!("{} property is not set", props::PATTERN),
            });
        };

        let Some(text) = next_text(&self.core.name, item)? else {
            return Ok(None);
        };
        if text.is_empty() {
            return Ok(None);
        }

        let Some(groups) = full.captures(&text) else {
            debug!("Input does not match pattern of parser {}, skipping", self.core.name);
            return Ok(None);
        };
        let source = Matches {
            groups,
            matches: find.find_iter(&text).map(|m| m.as_str().trim()).collect(),
        };

        let mut ai = ActivityInfo::new();
        if !self.core.mapper.map_fields(&mut ai, ctx, &source, false)? {
            return Ok(None);
        }
        Ok(Some(ai))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::OpLevel;
    use crate::fields::FieldType;

    fn parser(pattern: &str) -> ActivityRegexParser {
        let mut parser = ActivityRegexParser::new("re");
        parser
            .set_properties(&[("Pattern".to_string(), pattern.to_string())])
            .unwrap();
        parser
    }

    #[test]
    fn test_groups_by_number_and_name() {
        let mut p = parser(r"(?P<level>\w+) \[(\w+)\] (.*)");
        p.add_field(ActivityField::new(FieldType::Severity).with_locator(Locator::label("level")))
            .unwrap();
        p.add_field(ActivityField::new(FieldType::ApplName).with_locator(Locator::index(2)))
            .unwrap();
        p.add_field(ActivityField::new(FieldType::ErrorMsg).with_locator(Locator::index(3)))
            .unwrap();

        let ai = p
            .parse(&StreamContext::empty(), &"error [billing] disk full".into())
            .unwrap()
            .unwrap();
        assert_eq!(ai.severity, Some(OpLevel::Error));
        assert_eq!(ai.appl_name.as_deref(), Some("billing"));
        assert_eq!(ai.error_msg.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_no_full_match_skips() {
        let p = parser(r"\d+");
        assert!(p.parse(&StreamContext::empty(), &"12 apples".into()).unwrap().is_none());
    }

    #[test]
    fn test_match_number() {
        let mut p = parser(r"\w+=\w+(?:;\s*)?");
        p.add_field(
            ActivityField::new(FieldType::Tag)
                .with_locator(Locator::new(LocatorType::MatchNum, "1")),
        )
        .unwrap();

        let ai = p.parse(&StreamContext::empty(), &"a=1; ".into()).unwrap().unwrap();
        assert_eq!(ai.tag.as_deref(), Some("a=1;"));
    }

    #[test]
    fn test_unknown_group_name_rejected() {
        let mut p = parser(r"(?P<level>\w+)");
        let field = ActivityField::new(FieldType::Severity).with_locator(Locator::label("lvl"));
        assert!(p.add_field(field).is_err());
    }

    #[test]
    fn test_missing_pattern_is_error() {
        let p = ActivityRegexParser::new("re");
        assert!(p.parse(&StreamContext::empty(), &"x".into()).is_err());
    }
}
