//! Locator resolution against parsed raw items.
//!
//! Each parser wraps its parsed form of a raw item (token list, XML
//! document, regex matches, JSON object) in an [`Extractor`] so field
//! resolution works the same way regardless of the data shape.

use std::fmt;

use serde_json::Value;

use crate::error::FieldError;
use crate::fields::{Locator, LocatorOverrides};
use crate::value::FieldValue;

/// A raw value found by a locator, plus any inline metadata that travels
/// with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub value: FieldValue,
    pub overrides: LocatorOverrides,
}

impl Extracted {
    pub fn new(value: impl Into<FieldValue>) -> Self {
        Self {
            value: value.into(),
            overrides: LocatorOverrides::default(),
        }
    }

    pub fn with_overrides(value: impl Into<FieldValue>, overrides: LocatorOverrides) -> Self {
        Self {
            value: value.into(),
            overrides,
        }
    }
}

/// Trait for parsed raw items that can resolve item-addressing locators
/// (`Index`, `Path`, `Label`, `MatchNum`).
///
/// Returns `Ok(None)` when the location is absent from the item, which is
/// not an error.
pub trait Extractor {
    fn extract(&self, locator: &Locator) -> Result<Option<Extracted>, FieldError>;
}

/// Key path into a nested JSON map, such as `user.address.city` or
/// `items.[0].name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    text: String,
    steps: Vec<PathStep>,
}

/// One hop of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Object member by name
    Key(String),
    /// Array element, written `[n]`
    Item(usize),
    /// `*` or `[*]`: all array elements or all object values
    Any,
}

impl PathStep {
    fn from_token(token: &str) -> Self {
        match token {
            "*" | "[*]" => PathStep::Any,
            _ => token
                .strip_prefix('[')
                .and_then(|t| t.strip_suffix(']'))
                .and_then(|n| n.parse().ok())
                .map(PathStep::Item)
                .unwrap_or_else(|| PathStep::Key(token.to_owned())),
        }
    }
}

impl FieldPath {
    /// Splits `path` on `separator`, dropping empty pieces so leading or
    /// doubled separators are harmless.
    ///
    /// ```
    /// use activity_streams::extraction::FieldPath;
    ///
    /// let path = FieldPath::new("/user/address/city", "/");
    /// assert_eq!(path.steps().len(), 3);
    /// ```
    pub fn new(path: &str, separator: &str) -> Self {
        let steps = path
            .split(separator)
            .filter(|t| !t.is_empty())
            .map(PathStep::from_token)
            .collect();
        Self {
            text: path.to_owned(),
            steps,
        }
    }

    /// Dot separated form used by `Label` locators.
    pub fn dotted(path: &str) -> Self {
        Self::new(path, ".")
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Every value the path reaches in `root`. Wildcards fan out, so the
    /// result may hold more than one value.
    pub fn lookup<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        self.steps.iter().fold(vec![root], |found, step| {
            found
                .into_iter()
                .flat_map(|value| -> Vec<&'a Value> {
                    match (step, value) {
                        (PathStep::Key(name), Value::Object(map)) => map.get(name).into_iter().collect(),
                        (PathStep::Item(i), Value::Array(items)) => items.get(*i).into_iter().collect(),
                        (PathStep::Any, Value::Array(items)) => items.iter().collect(),
                        (PathStep::Any, Value::Object(map)) => map.values().collect(),
                        _ => Vec::new(),
                    }
                })
                .collect()
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_steps_from_tokens() {
        let path = FieldPath::dotted("orders.[2].*.sku");
        assert_eq!(
            path.steps(),
            &[
                PathStep::Key("orders".into()),
                PathStep::Item(2),
                PathStep::Any,
                PathStep::Key("sku".into()),
            ]
        );
        assert_eq!(path.to_string(), "orders.[2].*.sku");
    }

    #[test]
    fn test_malformed_index_is_a_key() {
        let path = FieldPath::new("//list/[x]/", "/");
        assert_eq!(path.steps(), &[PathStep::Key("list".into()), PathStep::Key("[x]".into())]);
    }

    #[test]
    fn test_lookup_nested() {
        let doc = json!({"user": {"name": "Alice", "tags": ["a", "b"]}});

        let name = FieldPath::dotted("user.name");
        assert_eq!(name.lookup(&doc), vec![&json!("Alice")]);

        let second_tag = FieldPath::dotted("user.tags.[1]");
        assert_eq!(second_tag.lookup(&doc), vec![&json!("b")]);

        let missing = FieldPath::dotted("user.email");
        assert!(missing.lookup(&doc).is_empty());
    }

    #[test]
    fn test_lookup_wildcard() {
        let doc = json!({"items": [{"id": 1}, {"id": 2}]});
        let ids = FieldPath::dotted("items.*.id");
        assert_eq!(ids.lookup(&doc), vec![&json!(1), &json!(2)]);
    }
}
