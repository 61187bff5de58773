//! Activity parsers: turn one raw item into an [`ActivityInfo`].
//!
//! Every parser owns a [`FieldMapper`] with its configured fields and wraps
//! its parsed form of the item in an [`Extractor`](crate::extraction::Extractor)
//! so field resolution is shared. A parser returns `Ok(None)` for input it
//! cannot or should not turn into an activity (empty input, pattern
//! mismatch, missing required values); that is a skip, not an error.

pub mod map;
pub mod message;
pub mod regex;
pub mod token;
pub mod xml;
pub mod xpath;

use std::fmt;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::activity::ActivityInfo;
use crate::error::{ConfigError, ParseError};
use crate::fields::{ActivityField, FieldMapper};
use crate::runtime::StreamContext;

pub use self::map::ActivityMapParser;
pub use self::message::{compute_signature, MessageActivityXmlParser, SignatureHook};
pub use self::regex::ActivityRegexParser;
pub use self::token::ActivityTokenParser;
pub use self::xml::ActivityXmlParser;

/// Parser property names.
pub mod props {
    pub const FIELD_DELIM: &str = "FieldDelim";
    pub const PATTERN: &str = "Pattern";
    pub const STRIP_QUOTES: &str = "StripQuotes";
    pub const NAMESPACE: &str = "Namespace";
    pub const REQUIRE_ALL: &str = "RequireAll";
    pub const SIGNATURE_DELIM: &str = "SignatureDelim";
}

/// Reader shared between a source and the parser consuming it. The source
/// hands out the same reader until the parser drains it.
#[derive(Clone)]
pub struct SharedReader {
    inner: Arc<Mutex<Box<dyn BufRead + Send>>>,
    eof: Arc<AtomicBool>,
}

impl SharedReader {
    pub fn new(reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(reader)),
            eof: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Read one line without its terminator. `Ok(None)` at end of input.
    pub fn read_line(&self) -> io::Result<Option<String>> {
        let mut reader = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "reader lock poisoned"))?;
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            self.eof.store(true, Ordering::SeqCst);
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SharedReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedReader").field("eof", &self.is_eof()).finish()
    }
}

/// One undivided unit of source data.
#[derive(Debug, Clone)]
pub enum RawItem {
    Text(String),
    Bytes(Vec<u8>),
    Map(serde_json::Map<String, serde_json::Value>),
    Reader(SharedReader),
}

impl RawItem {
    /// Size in bytes for stream statistics. Readers and maps report 0.
    pub fn byte_len(&self) -> u64 {
        match self {
            RawItem::Text(s) => s.len() as u64,
            RawItem::Bytes(b) => b.len() as u64,
            RawItem::Map(_) | RawItem::Reader(_) => 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RawItem::Text(_) => "text",
            RawItem::Bytes(_) => "bytes",
            RawItem::Map(_) => "map",
            RawItem::Reader(_) => "reader",
        }
    }
}

impl From<&str> for RawItem {
    fn from(s: &str) -> Self {
        RawItem::Text(s.to_string())
    }
}

impl From<String> for RawItem {
    fn from(s: String) -> Self {
        RawItem::Text(s)
    }
}

/// Converts raw items of the shapes it supports into activities.
pub trait ActivityParser: Send + Sync {
    fn name(&self) -> &str;

    /// Apply parser properties. Unknown names are ignored.
    fn set_properties(&mut self, props: &[(String, String)]) -> Result<(), ConfigError>;

    fn add_field(&mut self, field: ActivityField) -> Result<(), ConfigError>;

    fn supports(&self, item: &RawItem) -> bool;

    /// Parse one item.
    ///
    /// # Returns
    /// `Ok(None)` when the item yields no activity
    ///
    /// # Errors
    /// `ParseError` naming the field in progress when a value cannot be
    /// resolved or applied
    fn parse(&self, ctx: &StreamContext, item: &RawItem) -> Result<Option<ActivityInfo>, ParseError>;
}

/// Fields shared by all parser implementations.
pub(crate) struct ParserCore {
    pub(crate) name: String,
    pub(crate) mapper: FieldMapper,
}

impl ParserCore {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mapper: FieldMapper::new(),
        }
    }
}

pub(crate) fn prop_is(name: &str, expected: &str) -> bool {
    name.trim().eq_ignore_ascii_case(expected)
}

pub(crate) fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidProperty {
            name: name.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

/// Compile a pattern that must match the whole input.
pub(crate) fn compile_full_match(name: &str, pattern: &str) -> Result<::regex::Regex, ConfigError> {
    ::regex::Regex::new(&format!(r"\A(?:{})\z", pattern)).map_err(|e| ConfigError::InvalidProperty {
        name: name.to_string(),
        value: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Text of a `Text` or `Bytes` item, or the next line of a `Reader` item.
pub(crate) fn next_text(parser: &str, item: &RawItem) -> Result<Option<String>, ParseError> {
    match item {
        RawItem::Text(s) => Ok(Some(s.clone())),
        RawItem::Bytes(b) => Ok(Some(String::from_utf8_lossy(b).into_owned())),
        RawItem::Reader(r) => r
            .read_line()
            .map_err(|e| ParseError::malformed(parser, e.to_string())),
        RawItem::Map(_) => Err(ParseError::InvalidState {
            parser: parser.to_string(),
            reason: "map items are not supported".to_string(),
        }),
    }
}
