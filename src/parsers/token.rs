//! Delimited-text parser. Splits a line into tokens and maps fields by
//! 1-based token index.

use regex::Regex;
use tracing::{debug, trace};

use crate::activity::ActivityInfo;
use crate::error::{ConfigError, FieldError, ParseError};
use crate::extraction::{Extracted, Extractor};
use crate::fields::{ActivityField, FieldType, Locator, LocatorType};
use crate::parsers::{compile_full_match, next_text, parse_bool, prop_is, props, ActivityParser, ParserCore, RawItem};
use crate::runtime::StreamContext;
use crate::value::ResolvedValue;

const DEFAULT_DELIM: &str = ",";

pub struct ActivityTokenParser {
    core: ParserCore,
    /// Every character is a delimiter on its own.
    delimiters: Vec<char>,
    strip_quotes: bool,
    pattern: Option<Regex>,
}

impl ActivityTokenParser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: ParserCore::new(name),
            delimiters: DEFAULT_DELIM.chars().collect(),
            strip_quotes: true,
            pattern: None,
        }
    }

    /// Split `line` into tokens. Empty tokens are kept so indices stay
    /// stable; a delimiter inside double quotes is literal and `""` inside
    /// quotes is an escaped quote.
    pub fn tokenize(&self, line: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        if line.is_empty() {
            return tokens;
        }

        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if self.strip_quotes && c == '"' {
                if in_quotes && chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
                continue;
            }
            if !in_quotes && self.delimiters.contains(&c) {
                tokens.push(std::mem::take(&mut current));
                continue;
            }
            current.push(c);
        }
        tokens.push(current);
        tokens
    }
}

struct Tokens<'a>(&'a [String]);

impl Extractor for Tokens<'_> {
    fn extract(&self, locator: &Locator) -> Result<Option<Extracted>, FieldError> {
        let index = locator.position().ok_or_else(|| FieldError::Unresolvable {
            locator: locator.to_string(),
            reason: "token locators must be numeric".to_string(),
        })?;
        Ok(index
            .checked_sub(1)
            .and_then(|i| self.0.get(i))
            .map(|token| Extracted::new(token.as_str())))
    }
}

impl ActivityParser for ActivityTokenParser {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn set_properties(&mut self, properties: &[(String, String)]) -> Result<(), ConfigError> {
        for (name, value) in properties {
            if prop_is(name, props::FIELD_DELIM) {
                if value.is_empty() {
                    return Err(ConfigError::InvalidProperty {
                        name: name.clone(),
                        value: value.clone(),
                        reason: "delimiter set is empty".to_string(),
                    });
                }
                self.delimiters = value.chars().collect();
            } else if prop_is(name, props::PATTERN) {
                self.pattern = if value.is_empty() {
                    None
                } else {
                    Some(compile_full_match(name, value)?)
                };
            } else if prop_is(name, props::STRIP_QUOTES) {
                self.strip_quotes = parse_bool(name, value)?;
            } else {
                trace!("Parser {} ignoring property {}", self.core.name, name);
                continue;
            }
            debug!("Parser {} set property {} = {}", self.core.name, name, value);
        }
        Ok(())
    }

    fn add_field(&mut self, field: ActivityField) -> Result<(), ConfigError> {
        for locator in &field.locators {
            let valid = match locator.locator_type {
                LocatorType::Index => locator.position().is_some_and(|p| p >= 1),
                t => t.is_property(),
            };
            if !valid {
                return Err(ConfigError::InvalidLocator {
                    field: field.to_string(),
                    locator: locator.to_string(),
                    reason: "token fields are located by 1-based index".to_string(),
                });
            }
        }
        self.core.mapper.add_field(field)
    }

    fn supports(&self, item: &RawItem) -> bool {
        !matches!(item, RawItem::Map(_))
    }

    fn parse(&self, ctx: &StreamContext, item: &RawItem) -> Result<Option<ActivityInfo>, ParseError> {
        let Some(line) = next_text(&self.core.name, item)? else {
            return Ok(None);
        };
        if line.is_empty() {
            return Ok(None);
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(&line) {
                debug!("Input does not match pattern of parser {}, skipping", self.core.name);
                return Ok(None);
            }
        }

        let tokens = self.tokenize(&line);
        trace!("Parser {} split input into {} token(s)", self.core.name, tokens.len());

        let mut ai = ActivityInfo::new();
        let data_field = ActivityField::new(FieldType::ActivityData);
        self.core
            .mapper
            .apply_value(&mut ai, &data_field, ResolvedValue::Scalar(line.into()), &[])
            .map_err(|e| ParseError::field(data_field.to_string(), e))?;

        if !self.core.mapper.map_fields(&mut ai, ctx, &Tokens(&tokens), false)? {
            return Ok(None);
        }
        Ok(Some(ai))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{MessageData, OpCompCode, OpType};
    use crate::fields::{DataType, TimeUnits};

    fn props(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_tokenize_keeps_empty_tokens() {
        let parser = ActivityTokenParser::new("p");
        assert_eq!(parser.tokenize("a,,b,"), vec!["a", "", "b", ""]);
        assert!(parser.tokenize("").is_empty());
    }

    #[test]
    fn test_tokenize_quotes() {
        let parser = ActivityTokenParser::new("p");
        assert_eq!(parser.tokenize(r#""x,y",z"#), vec!["x,y", "z"]);
        assert_eq!(parser.tokenize(r#""say ""hi""",2"#), vec![r#"say "hi""#, "2"]);

        let mut raw = ActivityTokenParser::new("p");
        raw.set_properties(&props(&[("StripQuotes", "false")])).unwrap();
        assert_eq!(raw.tokenize(r#""x,y",z"#), vec![r#""x"#, r#"y""#, "z"]);
    }

    #[test]
    fn test_delimiter_charset() {
        let mut parser = ActivityTokenParser::new("p");
        parser.set_properties(&props(&[("FieldDelim", "|;")])).unwrap();
        assert_eq!(parser.tokenize("a|b;c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_delimiter_rejected() {
        let mut parser = ActivityTokenParser::new("p");
        assert!(parser.set_properties(&props(&[("FieldDelim", "")])).is_err());
    }

    #[test]
    fn test_zero_index_rejected() {
        let mut parser = ActivityTokenParser::new("p");
        let field = ActivityField::new(FieldType::Tag).with_locator(Locator::index(0));
        assert!(parser.add_field(field).is_err());

        let label = ActivityField::new(FieldType::Tag).with_locator(Locator::label("x"));
        assert!(parser.add_field(label).is_err());
    }

    #[test]
    fn test_parse_maps_fields() {
        let mut parser = ActivityTokenParser::new("p");
        parser
            .add_field(ActivityField::new(FieldType::ActivityName).with_locator(Locator::index(1)))
            .unwrap();
        parser
            .add_field(
                ActivityField::new(FieldType::ElapsedTime)
                    .with_locator(Locator::index(2).data_type(DataType::Number).units(TimeUnits::Milliseconds)),
            )
            .unwrap();
        parser
            .add_field(ActivityField::new(FieldType::StatusCode).with_locator(Locator::index(3)))
            .unwrap();

        let ai = parser
            .parse(&StreamContext::empty(), &"login,150,success".into())
            .unwrap()
            .unwrap();

        assert_eq!(ai.activity_name.as_deref(), Some("login"));
        assert_eq!(ai.elapsed_time, Some(150_000));
        assert_eq!(ai.status_code, Some(OpCompCode::Success));
        assert_eq!(ai.data, Some(MessageData::Text("login,150,success".to_string())));
        assert_eq!(ai.activity_type, None::<OpType>);
    }

    #[test]
    fn test_pattern_mismatch_skips() {
        let mut parser = ActivityTokenParser::new("p");
        parser.set_properties(&props(&[("Pattern", r"\w+,\d+")])).unwrap();

        let ctx = StreamContext::empty();
        assert!(parser.parse(&ctx, &"login,abc".into()).unwrap().is_none());
        assert!(parser.parse(&ctx, &"login,12".into()).unwrap().is_some());
        // partial matches do not count
        assert!(parser.parse(&ctx, &"login,12,extra".into()).unwrap().is_none());
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let parser = ActivityTokenParser::new("p");
        assert!(parser.parse(&StreamContext::empty(), &"".into()).unwrap().is_none());
    }

    #[test]
    fn test_bad_value_names_field() {
        let mut parser = ActivityTokenParser::new("p");
        parser
            .add_field(ActivityField::new(FieldType::Severity).with_locator(Locator::index(1)))
            .unwrap();

        let err = parser
            .parse(&StreamContext::empty(), &"LOUD".into())
            .unwrap_err();
        assert!(err.to_string().starts_with("Failed parsing data for field Severity"));
    }
}
