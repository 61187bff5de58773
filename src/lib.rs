//! # activity-streams: Configurable Activity Ingestion
//!
//! Reads raw records from heterogeneous sources, parses them into
//! normalized activity records with configurable field mappings and
//! delivers them to a tracking sink.
//!
//! ## Features
//!
//! - **Field mapping**: locators pick values by token index, XPath, label,
//!   regex match or stream property and coerce them to numbers, timestamps
//!   or binary data
//! - **Parsers**: delimited tokens, XML documents, message-tracking XML with
//!   computed signatures, regular expressions and JSON maps
//! - **Stream runtime**: inline or pooled processing with bounded-queue
//!   backpressure, lifecycle listeners and statistics
//! - **Delivery**: fixed-interval retry that stops when the stream halts
//! - **NATS JetStream sink** (feature: `nats`, on by default)
//!
//! ## Example: token stream
//!
//! ```
//! use std::sync::Arc;
//! use activity_streams::fields::{ActivityField, FieldType, Locator};
//! use activity_streams::inputs::IterSource;
//! use activity_streams::outputs::LogSink;
//! use activity_streams::parsers::{ActivityParser, ActivityTokenParser};
//! use activity_streams::runtime::StreamRuntime;
//!
//! let mut parser = ActivityTokenParser::new("tokens");
//! parser
//!     .add_field(ActivityField::new(FieldType::ActivityName).with_locator(Locator::index(1)))
//!     .unwrap();
//!
//! let source = IterSource::lines(["login,150", "logout,20"]);
//! let mut stream = StreamRuntime::new("example", Box::new(source), Arc::new(LogSink::default()));
//! stream.add_parser(Arc::new(parser));
//!
//! let stats = stream.run().unwrap();
//! assert_eq!(stats.delivered_activities, 2);
//! ```

// Core modules
pub mod error;
pub mod value;
pub mod extraction;
pub mod fields;
pub mod activity;

// Parsing, sources and sinks
pub mod parsers;
pub mod inputs;
pub mod outputs;

// Stream runtime and configuration
pub mod runtime;
pub mod config;

// NATS JetStream integration
#[cfg(feature = "nats")]
pub mod nats;

// Re-export key types
pub use error::{ConfigError, DeliveryError, FieldError, FormatError, ParseError, SinkError, StreamError};
pub use value::{FieldValue, ResolvedValue};
pub use extraction::{Extractor, FieldPath};
pub use fields::{ActivityField, FieldMapper, FieldType, Locator, LocatorType};
pub use activity::{ActivityInfo, ActivityRecord, HostCache};
pub use parsers::{ActivityParser, RawItem};
pub use outputs::{ActivityDelivery, ActivitySink};

// Re-export runtime types
pub use runtime::{
    ActivitySource, CancellationToken, InputStreamListener, StreamContext, StreamHandle, StreamRuntime,
    StreamStats, StreamStatus,
};
pub use config::StreamsConfig;

#[cfg(feature = "nats")]
pub use nats::{ActivityEnvelope, NatsConfig, NatsSink};
