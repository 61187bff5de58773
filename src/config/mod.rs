//! Streams configuration loader.
//!
//! Loads parser and stream definitions from YAML and wires them into ready
//! to run [`StreamRuntime`]s. Parsers are defined once and may be shared by
//! several streams; all streams built from one file share a host cache.
//!
//! ```yaml
//! parsers:
//!   - name: Tokens
//!     type: token
//!     properties:
//!       FieldDelim: ","
//!     fields:
//!       - field: activity_name
//!         locators:
//!           - { type: Index, location: 1 }
//!         transformations:
//!           - { name: trim, script: "normalize-space($fieldValue)" }
//! streams:
//!   - name: orders
//!     parsers: [Tokens]
//!     properties:
//!       FileName: orders.log
//!     output:
//!       type: ndjson
//!       path: orders.ndjson
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use crate::activity::HostCache;
use crate::error::ConfigError;
use crate::fields::{ActivityField, DataType, FieldType, Locator, LocatorType, TimeUnits, ValueTransform};
use crate::inputs::LineSource;
use crate::outputs::{ActivitySink, LogSink, NdjsonSink};
use crate::parsers::{
    ActivityMapParser, ActivityParser, ActivityRegexParser, ActivityTokenParser, ActivityXmlParser,
    MessageActivityXmlParser,
};
use crate::runtime::StreamRuntime;

#[derive(Debug, Clone, Deserialize)]
pub struct StreamsConfig {
    #[serde(default)]
    pub parsers: Vec<ParserDef>,
    #[serde(default)]
    pub streams: Vec<StreamDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParserDef {
    pub name: String,
    /// `token`, `xml`, `message-xml`, `regex` or `map`
    #[serde(rename = "type")]
    pub parser_type: String,
    #[serde(default)]
    pub properties: IndexMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub field: String,
    #[serde(default)]
    pub locators: Vec<LocatorDef>,
    #[serde(default)]
    pub separator: String,
    #[serde(default)]
    pub transformations: Vec<TransformDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransformDef {
    #[serde(default)]
    pub name: Option<String>,
    /// Only `xpath` expressions are evaluated.
    #[serde(default = "default_transform_lang")]
    pub lang: String,
    #[serde(alias = "expression")]
    pub script: String,
    #[serde(default)]
    pub phase: Option<String>,
}

fn default_transform_lang() -> String {
    "xpath".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocatorDef {
    #[serde(rename = "type", default = "default_locator_type")]
    pub locator_type: String,
    pub location: serde_yaml::Value,
    pub datatype: Option<String>,
    pub format: Option<String>,
    pub units: Option<String>,
    pub locale: Option<String>,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_locator_type() -> String {
    "Index".to_string()
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamDef {
    pub name: String,
    /// Only `line` sources can be configured from a file.
    #[serde(default = "default_source")]
    pub source: String,
    pub parsers: Vec<String>,
    #[serde(default)]
    pub properties: IndexMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub output: OutputDef,
}

fn default_source() -> String {
    "line".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputDef {
    #[default]
    Log,
    Stdout,
    Ndjson {
        path: PathBuf,
    },
    #[cfg(feature = "nats")]
    Nats {
        url: Option<String>,
        stream: Option<String>,
        subject_prefix: Option<String>,
    },
}

/// Render scalar YAML values as property strings.
fn scalar(name: &str, value: &serde_yaml::Value) -> Result<String, ConfigError> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(ConfigError::InvalidProperty {
            name: name.to_string(),
            value: format!("{:?}", other),
            reason: "expected a scalar value".to_string(),
        }),
    }
}

fn properties(map: &IndexMap<String, serde_yaml::Value>) -> Result<Vec<(String, String)>, ConfigError> {
    map.iter()
        .map(|(name, value)| Ok((name.clone(), scalar(name, value)?)))
        .collect()
}

impl StreamsConfig {
    /// Load streams configuration from a YAML file.
    ///
    /// # Arguments
    /// * `path` - Path to the streams YAML file
    ///
    /// # Errors
    /// `ConfigError::Load` if the file cannot be read or is not valid YAML
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            ConfigError::Load(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Load(format!("Failed to parse YAML: {}", e)))
    }

    /// Build every configured stream.
    ///
    /// # Errors
    /// The first configuration problem found: unknown parser or field,
    /// invalid property or locator, or a sink that cannot be created
    pub fn build(&self) -> Result<Vec<StreamRuntime>, ConfigError> {
        let mut parsers: HashMap<&str, Arc<dyn ActivityParser>> = HashMap::new();
        for def in &self.parsers {
            parsers.insert(def.name.as_str(), def.build()?);
        }

        let hosts = HostCache::system();
        self.streams
            .iter()
            .map(|def| def.build(&parsers, Arc::clone(&hosts)))
            .collect()
    }
}

impl ParserDef {
    pub fn build(&self) -> Result<Arc<dyn ActivityParser>, ConfigError> {
        let kind = self.parser_type.trim().to_ascii_lowercase();
        let mut parser: Box<dyn ActivityParser> = match kind.as_str() {
            "token" => Box::new(ActivityTokenParser::new(&self.name)),
            "xml" => Box::new(ActivityXmlParser::new(&self.name)),
            "message-xml" | "message" => Box::new(MessageActivityXmlParser::new(&self.name)),
            "regex" => Box::new(ActivityRegexParser::new(&self.name)),
            "map" => Box::new(ActivityMapParser::new(&self.name)),
            _ => return Err(ConfigError::UnknownParser(self.parser_type.clone())),
        };

        let props = properties(&self.properties)?;
        debug!("Parser {} ({}) properties: {:?}", self.name, kind, props);
        parser.set_properties(&props)?;
        for field in &self.fields {
            parser.add_field(field.build()?)?;
        }
        Ok(Arc::from(parser))
    }
}

impl FieldDef {
    pub fn build(&self) -> Result<ActivityField, ConfigError> {
        let field_type: FieldType = self
            .field
            .parse()
            .map_err(ConfigError::UnknownFieldType)?;
        let mut field = ActivityField::new(field_type).with_separator(self.separator.clone());
        for locator in &self.locators {
            field = field.with_locator(locator.build(&self.field)?);
        }
        for (i, transform) in self.transformations.iter().enumerate() {
            field = field.with_transformation(transform.build(&self.field, i)?);
        }
        Ok(field)
    }
}

impl TransformDef {
    pub fn build(&self, field: &str, index: usize) -> Result<ValueTransform, ConfigError> {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("{}Transformation{}", field, index + 1));
        let invalid = |reason: String| ConfigError::InvalidProperty {
            name: format!("{}.transformations.{}", field, name),
            value: self.script.clone(),
            reason,
        };

        if !self.lang.eq_ignore_ascii_case("xpath") {
            return Err(invalid(format!("unsupported language '{}'", self.lang)));
        }
        let mut transform = ValueTransform::xpath(name.clone(), &self.script).map_err(invalid)?;
        if let Some(phase) = &self.phase {
            transform = transform.phase(phase.parse().map_err(invalid)?);
        }
        Ok(transform)
    }
}

impl LocatorDef {
    pub fn build(&self, field: &str) -> Result<Locator, ConfigError> {
        let location = scalar(field, &self.location)?;
        let invalid = |reason: String| ConfigError::InvalidLocator {
            field: field.to_string(),
            locator: location.clone(),
            reason,
        };

        let locator_type: LocatorType = self.locator_type.parse().map_err(invalid)?;
        let mut locator = Locator::new(locator_type, location.clone());
        if let Some(datatype) = &self.datatype {
            locator = locator.data_type(datatype.parse::<DataType>().map_err(invalid)?);
        }
        if let Some(units) = &self.units {
            locator = locator.units(units.parse::<TimeUnits>().map_err(invalid)?);
        }
        if let Some(format) = &self.format {
            locator = locator.format(format.clone());
        }
        if let Some(locale) = &self.locale {
            locator = locator.locale(locale.clone());
        }
        if !self.required {
            locator = locator.optional();
        }
        Ok(locator)
    }
}

impl StreamDef {
    fn build(
        &self,
        parsers: &HashMap<&str, Arc<dyn ActivityParser>>,
        hosts: Arc<HostCache>,
    ) -> Result<StreamRuntime, ConfigError> {
        if !self.source.eq_ignore_ascii_case("line") {
            return Err(ConfigError::InvalidProperty {
                name: "source".to_string(),
                value: self.source.clone(),
                reason: "only line sources can be configured".to_string(),
            });
        }

        let mut runtime = StreamRuntime::new(&self.name, Box::new(LineSource::new()), self.output.build(&self.name)?)
            .with_host_cache(hosts);
        runtime.set_properties(&properties(&self.properties)?)?;
        for name in &self.parsers {
            let parser = parsers
                .get(name.as_str())
                .ok_or_else(|| ConfigError::UnknownParser(name.clone()))?;
            runtime.add_parser(Arc::clone(parser));
        }
        Ok(runtime)
    }
}

impl OutputDef {
    fn build(&self, stream: &str) -> Result<Arc<dyn ActivitySink>, ConfigError> {
        let sink: Arc<dyn ActivitySink> = match self {
            OutputDef::Log => Arc::new(LogSink::new(stream)),
            OutputDef::Stdout => Arc::new(NdjsonSink::stdout()),
            OutputDef::Ndjson { path } => Arc::new(NdjsonSink::file(path)),
            #[cfg(feature = "nats")]
            OutputDef::Nats { url, stream: nats_stream, subject_prefix } => {
                let mut config = crate::nats::NatsConfig::default();
                if let Some(url) = url {
                    config.url = url.clone();
                }
                if let Some(name) = nats_stream {
                    config.stream_name = name.clone();
                }
                if let Some(prefix) = subject_prefix {
                    config.subject_prefix = prefix.clone();
                }
                let sink = crate::nats::NatsSink::new(stream, config)
                    .map_err(|e| ConfigError::Load(format!("Failed to create NATS sink: {}", e)))?;
                Arc::new(sink)
            }
        };
        Ok(sink)
    }
}
