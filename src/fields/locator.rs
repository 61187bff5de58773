//! Field locators: where a raw value lives and how to coerce it.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use base64::Engine;

use crate::error::FormatError;
use crate::fields::timestamp::{self, TimeUnits};
use crate::value::FieldValue;

/// How a locator addresses its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocatorType {
    /// 1-based position in a tokenized record, or a regex group number.
    Index,
    /// Path expression into a structured document.
    Path,
    /// Named element: map key path or named regex group.
    Label,
    /// 1-based regex match number.
    MatchNum,
    /// Stream property, falling back to the process environment.
    EnvProperty,
    StreamProperty,
}

impl LocatorType {
    /// Property locators read the stream context instead of the raw item.
    pub fn is_property(self) -> bool {
        matches!(self, LocatorType::EnvProperty | LocatorType::StreamProperty)
    }
}

impl FromStr for LocatorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "index" => Ok(LocatorType::Index),
            "path" | "xpath" => Ok(LocatorType::Path),
            "label" => Ok(LocatorType::Label),
            "matchnum" | "rematchnum" => Ok(LocatorType::MatchNum),
            "envproperty" => Ok(LocatorType::EnvProperty),
            "streamproperty" => Ok(LocatorType::StreamProperty),
            other => Err(format!("unknown locator type '{}'", other)),
        }
    }
}

impl fmt::Display for LocatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LocatorType::Index => "Index",
            LocatorType::Path => "Path",
            LocatorType::Label => "Label",
            LocatorType::MatchNum => "MatchNum",
            LocatorType::EnvProperty => "EnvProperty",
            LocatorType::StreamProperty => "StreamProperty",
        };
        write!(f, "{}", name)
    }
}

/// Declared type a located value is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    #[default]
    String,
    Number,
    Timestamp,
    Binary,
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" => Ok(DataType::String),
            "number" => Ok(DataType::Number),
            "timestamp" | "datetime" => Ok(DataType::Timestamp),
            "binary" => Ok(DataType::Binary),
            other => Err(format!("unknown data type '{}'", other)),
        }
    }
}

pub const FORMAT_HEX_BINARY: &str = "hexBinary";
pub const FORMAT_BASE64_BINARY: &str = "base64Binary";

/// Inline metadata found next to a value (e.g. XML element attributes)
/// that takes precedence over the locator's configuration for one read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocatorOverrides {
    pub data_type: Option<String>,
    pub format: Option<String>,
    pub units: Option<String>,
    pub locale: Option<String>,
}

impl LocatorOverrides {
    pub fn is_empty(&self) -> bool {
        self.data_type.is_none()
            && self.format.is_none()
            && self.units.is_none()
            && self.locale.is_none()
    }
}

/// A rule for extracting one value from a raw item.
#[derive(Debug, Clone, PartialEq)]
pub struct Locator {
    pub locator_type: LocatorType,
    pub location: String,
    pub data_type: DataType,
    pub format: Option<String>,
    pub units: Option<TimeUnits>,
    pub locale: Option<String>,
    pub required: bool,
}

impl Locator {
    pub fn new(locator_type: LocatorType, location: impl Into<String>) -> Self {
        Self {
            locator_type,
            location: location.into(),
            data_type: DataType::String,
            format: None,
            units: None,
            locale: None,
            required: true,
        }
    }

    pub fn index(position: usize) -> Self {
        Self::new(LocatorType::Index, position.to_string())
    }

    pub fn path(expr: impl Into<String>) -> Self {
        Self::new(LocatorType::Path, expr)
    }

    pub fn label(name: impl Into<String>) -> Self {
        Self::new(LocatorType::Label, name)
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn units(mut self, units: TimeUnits) -> Self {
        self.units = Some(units);
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Numeric location for `Index` and `MatchNum` locators.
    pub fn position(&self) -> Option<usize> {
        self.location.trim().parse().ok()
    }

    /// The locator as it applies to one read: inline metadata overlaid on
    /// the configured values. Borrows when there is nothing to overlay.
    pub fn with_overrides(&self, overrides: &LocatorOverrides) -> Result<Cow<'_, Locator>, FormatError> {
        if overrides.is_empty() {
            return Ok(Cow::Borrowed(self));
        }

        let mut effective = self.clone();
        if let Some(dt) = &overrides.data_type {
            effective.data_type = dt.parse().map_err(|e| self.format_error(dt, e))?;
        }
        if let Some(format) = &overrides.format {
            effective.format = Some(format.clone());
        }
        if let Some(units) = &overrides.units {
            effective.units = Some(units.parse().map_err(|e| self.format_error(units, e))?);
        }
        if let Some(locale) = &overrides.locale {
            effective.locale = Some(locale.clone());
        }
        Ok(Cow::Owned(effective))
    }

    /// Coerce a raw value to this locator's data type.
    pub fn format_value(&self, raw: FieldValue) -> Result<FieldValue, FormatError> {
        if raw.is_null() {
            return Ok(raw);
        }
        match self.data_type {
            DataType::String => Ok(raw),
            DataType::Number => self.to_number(raw),
            DataType::Timestamp => self.to_timestamp(raw),
            DataType::Binary => self.to_binary(raw),
        }
    }

    fn to_number(&self, raw: FieldValue) -> Result<FieldValue, FormatError> {
        let text = match raw {
            FieldValue::Int(_) | FieldValue::Float(_) => return Ok(raw),
            FieldValue::Bool(b) => return Ok(FieldValue::Int(b as i64)),
            FieldValue::String(s) => s,
            FieldValue::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            other => return Err(self.format_error(&other.to_string(), "not a numeric value")),
        };

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(FieldValue::Null);
        }

        let normalized = if self.format.is_some() || self.locale.is_some() {
            normalize_number(trimmed, self.locale.as_deref())
        } else {
            trimmed.trim_start_matches('+').to_string()
        };

        if let Ok(i) = normalized.parse::<i64>() {
            return Ok(FieldValue::Int(i));
        }
        if let Ok(f) = normalized.parse::<f64>() {
            return Ok(FieldValue::Float(f));
        }
        if let Some(hex) = normalized.strip_prefix("0x").or_else(|| normalized.strip_prefix("0X")) {
            if let Ok(i) = i64::from_str_radix(hex, 16) {
                return Ok(FieldValue::Int(i));
            }
        }
        Err(self.format_error(&text, "not a number"))
    }

    fn to_timestamp(&self, raw: FieldValue) -> Result<FieldValue, FormatError> {
        let units = self.units.unwrap_or(TimeUnits::Milliseconds);
        let parsed = match raw {
            FieldValue::Timestamp(_) => return Ok(raw),
            FieldValue::Int(i) => timestamp::from_epoch(i, units),
            FieldValue::Float(f) => timestamp::from_epoch_f64(f, units),
            FieldValue::String(ref s) => {
                let s = s.trim();
                if s.is_empty() {
                    return Ok(FieldValue::Null);
                }
                match (&self.format, s.parse::<i64>(), s.parse::<f64>()) {
                    (None, Ok(i), _) => timestamp::from_epoch(i, units),
                    (None, Err(_), Ok(f)) => timestamp::from_epoch_f64(f, units),
                    (format, _, _) => timestamp::parse(s, format.as_deref()),
                }
            }
            ref other => Err(format!("cannot convert {} to a timestamp", other)),
        };
        parsed
            .map(FieldValue::Timestamp)
            .map_err(|reason| self.format_error(&raw.to_string(), reason))
    }

    fn to_binary(&self, raw: FieldValue) -> Result<FieldValue, FormatError> {
        let text = match raw {
            FieldValue::Binary(_) => return Ok(raw),
            FieldValue::String(s) => s,
            other => other.to_string(),
        };

        let decoded = match self.format.as_deref() {
            Some(f) if f.eq_ignore_ascii_case(FORMAT_HEX_BINARY) => {
                let digits = text.trim();
                let digits = digits
                    .strip_prefix("0x")
                    .or_else(|| digits.strip_prefix("0X"))
                    .unwrap_or(digits);
                hex::decode(digits).map_err(|e| self.format_error(&text, e.to_string()))?
            }
            Some(f) if f.eq_ignore_ascii_case(FORMAT_BASE64_BINARY) => {
                base64::engine::general_purpose::STANDARD
                    .decode(text.trim())
                    .map_err(|e| self.format_error(&text, e.to_string()))?
            }
            _ => text.into_bytes(),
        };
        Ok(FieldValue::Binary(decoded))
    }

    fn format_error(&self, value: &str, reason: impl Into<String>) -> FormatError {
        FormatError {
            locator: self.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.locator_type, self.location)
    }
}

/// Strip grouping separators and turn the decimal separator into `.` using
/// the conventions of the locale's language.
fn normalize_number(text: &str, locale: Option<&str>) -> String {
    let language = locale
        .and_then(|l| l.split(|c| c == '_' || c == '-').next())
        .map(|l| l.to_ascii_lowercase())
        .unwrap_or_default();

    let (group, decimal): (&[char], char) = match language.as_str() {
        "de" | "es" | "it" | "pt" | "nl" | "da" | "tr" | "id" => (&['.'], ','),
        "fr" | "ru" | "sv" | "fi" | "nb" | "no" | "cs" | "pl" | "uk" | "lt" => {
            (&[' ', '\u{a0}', '\u{202f}'], ',')
        }
        _ => (&[','], '.'),
    };

    text.trim_start_matches('+')
        .chars()
        .filter(|c| !group.contains(c))
        .map(|c| if c == decimal { '.' } else { c })
        .collect()
}
