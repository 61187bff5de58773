//! Value transformations: XPath expressions evaluated over a field's value
//! and the attributes already set on the activity record.
//!
//! `$fieldValue` is the value being transformed; `$ApplName`,
//! `$Severity` and the other field names read the record. Unset fields
//! read as an empty string.

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::activity::ActivityInfo;
use crate::error::FieldError;
use crate::fields::FieldType;
use crate::parsers::xpath::{Namespaces, Variables, XPath};
use crate::value::FieldValue;

pub const FIELD_VALUE_VARIABLE: &str = "fieldValue";

/// When a transformation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformPhase {
    /// On each locator's raw value, before it is formatted.
    Raw,
    /// On the field's resolved value, before it is applied.
    #[default]
    Formatted,
}

impl FromStr for TransformPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(TransformPhase::Raw),
            "formatted" => Ok(TransformPhase::Formatted),
            other => Err(format!("unknown transformation phase '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueTransform {
    pub name: String,
    pub phase: TransformPhase,
    expression: XPath,
}

impl ValueTransform {
    pub fn xpath(name: impl Into<String>, expression: &str) -> Result<Self, String> {
        Ok(Self {
            name: name.into(),
            phase: TransformPhase::default(),
            expression: XPath::compile(expression)?,
        })
    }

    pub fn phase(mut self, phase: TransformPhase) -> Self {
        self.phase = phase;
        self
    }

    pub fn expression(&self) -> &str {
        self.expression.as_str()
    }

    /// Evaluate against `value` and the attributes set on `ai`.
    ///
    /// # Returns
    /// The result as text; an empty result becomes `Null` so the field is
    /// left unset
    pub fn transform(&self, value: &FieldValue, ai: &ActivityInfo) -> Result<FieldValue, FieldError> {
        let mut vars: Variables = FieldType::ALL
            .iter()
            .filter_map(|ft| ai.field_text(*ft).map(|text| (ft.name().to_string(), text)))
            .collect();
        let current = match value {
            FieldValue::Null => String::new(),
            other => crate::activity::setters::text_value(other),
        };
        vars.insert(FIELD_VALUE_VARIABLE.to_string(), current);

        let result = self
            .expression
            .evaluate_detached(&vars, &Namespaces::new())
            .map_err(|reason| FieldError::Transform {
                name: self.name.clone(),
                reason,
            })?;
        trace!("Transformation {} produced '{}'", self.name, result);
        Ok(if result.is_empty() {
            FieldValue::Null
        } else {
            FieldValue::String(result)
        })
    }
}

impl fmt::Display for ValueTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.expression)
    }
}
