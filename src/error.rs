//! Error types for configuration, field resolution, parsing, delivery and
//! stream execution.
//!
//! Item-level errors ([`ParseError`], [`FieldError`]) are recoverable: the
//! runtime logs them and skips the item. [`StreamError::is_fatal`] separates
//! the errors that halt a stream from those that do not.

use std::fmt;
use std::io;

/// Invalid or contradictory configuration. Raised before a stream starts.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidProperty {
        name: String,
        value: String,
        reason: String,
    },
    ConflictingProperties {
        first: String,
        second: String,
    },
    MissingProperty(String),
    EnumerationMultiLocator {
        field: String,
    },
    InvalidLocator {
        field: String,
        locator: String,
        reason: String,
    },
    UnknownFieldType(String),
    UnknownParser(String),
    Load(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidProperty { name, value, reason } => {
                write!(f, "Invalid value '{}' for property '{}': {}", value, name, reason)
            }
            ConfigError::ConflictingProperties { first, second } => {
                write!(f, "Cannot set both '{}' and '{}'", first, second)
            }
            ConfigError::MissingProperty(name) => {
                write!(f, "Required property '{}' is not set", name)
            }
            ConfigError::EnumerationMultiLocator { field } => write!(
                f,
                "Field '{}': multiple locators are not supported for enumeration-based fields",
                field
            ),
            ConfigError::InvalidLocator { field, locator, reason } => {
                write!(f, "Field '{}' has invalid locator '{}': {}", field, locator, reason)
            }
            ConfigError::UnknownFieldType(name) => write!(f, "Unknown field type: {}", name),
            ConfigError::UnknownParser(name) => write!(f, "Unknown parser: {}", name),
            ConfigError::Load(msg) => write!(f, "Failed to load configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A raw value could not be coerced to the locator's declared data type.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatError {
    pub locator: String,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Locator '{}' cannot format value '{}': {}",
            self.locator, self.value, self.reason
        )
    }
}

impl std::error::Error for FormatError {}

/// Failure to apply a resolved value to an activity field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    Format(FormatError),
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
    EnumerationComposite {
        field: String,
    },
    LocatorCountMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },
    Unrecognized {
        field: String,
    },
    Unresolvable {
        locator: String,
        reason: String,
    },
    Transform {
        name: String,
        reason: String,
    },
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::Format(err) => write!(f, "{}", err),
            FieldError::InvalidValue { field, value, reason } => {
                write!(f, "Field '{}' rejects value '{}': {}", field, value, reason)
            }
            FieldError::EnumerationComposite { field } => write!(
                f,
                "Field '{}': multiple locators are not supported for enumeration-based fields",
                field
            ),
            FieldError::LocatorCountMismatch { field, expected, actual } => write!(
                f,
                "Field '{}': number of values ({}) does not match number of locators ({})",
                field, actual, expected
            ),
            FieldError::Unrecognized { field } => write!(f, "Unrecognized activity field: {}", field),
            FieldError::Unresolvable { locator, reason } => {
                write!(f, "Cannot resolve locator '{}': {}", locator, reason)
            }
            FieldError::Transform { name, reason } => {
                write!(f, "Transformation '{}' failed: {}", name, reason)
            }
        }
    }
}

impl std::error::Error for FieldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FieldError::Format(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FormatError> for FieldError {
    fn from(err: FormatError) -> Self {
        FieldError::Format(err)
    }
}

/// A raw item could not be turned into an activity record.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    Field {
        field: String,
        cause: FieldError,
    },
    Malformed {
        parser: String,
        reason: String,
    },
    InvalidState {
        parser: String,
        reason: String,
    },
}

impl ParseError {
    pub fn field(field: impl Into<String>, cause: FieldError) -> Self {
        ParseError::Field {
            field: field.into(),
            cause,
        }
    }

    pub fn malformed(parser: impl Into<String>, reason: impl Into<String>) -> Self {
        ParseError::Malformed {
            parser: parser.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Field { field, cause } => {
                write!(f, "Failed parsing data for field {}: {}", field, cause)
            }
            ParseError::Malformed { parser, reason } => {
                write!(f, "{}: malformed input: {}", parser, reason)
            }
            ParseError::InvalidState { parser, reason } => write!(f, "{}: {}", parser, reason),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Field { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// Failure reported by an output sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkError {
    Transport(String),
    Serialization(String),
    Closed,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Transport(msg) => write!(f, "Sink transport error: {}", msg),
            SinkError::Serialization(msg) => write!(f, "Sink serialization error: {}", msg),
            SinkError::Closed => write!(f, "Sink is closed"),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err.to_string())
    }
}

impl From<io::Error> for SinkError {
    fn from(err: io::Error) -> Self {
        SinkError::Transport(err.to_string())
    }
}

/// Outcome of a delivery that did not reach the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryError {
    /// Sink failure with no cancellable context to retry in.
    Sink(SinkError),
    /// The owning stream was halted while retrying.
    Halted { attempts: u32 },
    RetriesExhausted { attempts: u32, last: SinkError },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::Sink(err) => write!(f, "Failed recording activity: {}", err),
            DeliveryError::Halted { attempts } => {
                write!(f, "Stream halted after {} delivery attempt(s)", attempts)
            }
            DeliveryError::RetriesExhausted { attempts, last } => write!(
                f,
                "Delivery abandoned after {} attempt(s), last error: {}",
                attempts, last
            ),
        }
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeliveryError::Sink(err) => Some(err),
            DeliveryError::RetriesExhausted { last, .. } => Some(last),
            DeliveryError::Halted { .. } => None,
        }
    }
}

impl From<SinkError> for DeliveryError {
    fn from(err: SinkError) -> Self {
        DeliveryError::Sink(err)
    }
}

/// Errors surfaced by an input stream's lifecycle.
#[derive(Debug)]
pub enum StreamError {
    Configuration(ConfigError),
    /// The source is in a state it cannot recover from. Halts the stream.
    Fatal(String),
    Io(io::Error),
    Parse(ParseError),
    Delivery(DeliveryError),
}

impl StreamError {
    pub fn fatal(msg: impl Into<String>) -> Self {
        StreamError::Fatal(msg.into())
    }

    /// Whether this error must halt the stream rather than skip one item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::Configuration(_) | StreamError::Fatal(_))
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Configuration(err) => write!(f, "{}", err),
            StreamError::Fatal(msg) => write!(f, "Stream failure: {}", msg),
            StreamError::Io(err) => write!(f, "IO error: {}", err),
            StreamError::Parse(err) => write!(f, "{}", err),
            StreamError::Delivery(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Configuration(err) => Some(err),
            StreamError::Io(err) => Some(err),
            StreamError::Parse(err) => Some(err),
            StreamError::Delivery(err) => Some(err),
            StreamError::Fatal(_) => None,
        }
    }
}

impl From<ConfigError> for StreamError {
    fn from(err: ConfigError) -> Self {
        StreamError::Configuration(err)
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::Io(err)
    }
}

impl From<ParseError> for StreamError {
    fn from(err: ParseError) -> Self {
        StreamError::Parse(err)
    }
}

impl From<DeliveryError> for StreamError {
    fn from(err: DeliveryError) -> Self {
        StreamError::Delivery(err)
    }
}
