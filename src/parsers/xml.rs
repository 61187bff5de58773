//! XML document parser. Fields are located by path expressions; the
//! selected element's `datatype`, `format`, `locale` and `units` attributes
//! override the locator for that read.
//!
//! Reader items are consumed line by line. A line starting with `<?xml`
//! closes the document buffered so far, so several documents can follow
//! each other in one stream.

use std::collections::HashMap;
use std::sync::Mutex;

use roxmltree::{Document, ParsingOptions};
use tracing::{debug, trace};

use crate::activity::ActivityInfo;
use crate::error::{ConfigError, FieldError, ParseError};
use crate::extraction::{Extracted, Extractor};
use crate::fields::{ActivityField, Locator, LocatorOverrides, LocatorType, ValueHook};
use crate::parsers::xpath::{Namespaces, XPath};
use crate::parsers::{parse_bool, prop_is, props, ActivityParser, ParserCore, RawItem, SharedReader};
use crate::runtime::StreamContext;

const XML_DECLARATION: &str = "<?xml";

pub struct ActivityXmlParser {
    core: ParserCore,
    namespaces: Namespaces,
    require_all: bool,
    paths: HashMap<String, XPath>,
    /// Partial document carried between reads of a reader item.
    pending: Mutex<String>,
}

impl ActivityXmlParser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: ParserCore::new(name),
            namespaces: Namespaces::new(),
            require_all: false,
            paths: HashMap::new(),
            pending: Mutex::new(String::new()),
        }
    }

    pub(crate) fn set_value_hook(&mut self, hook: Box<dyn ValueHook>) {
        self.core.mapper.set_hook(hook);
    }

    /// Bind a `prefix=uri` namespace declaration.
    fn add_namespace(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let (prefix, uri) = value
            .split_once('=')
            .map(|(p, u)| (p.trim(), u.trim()))
            .filter(|(p, u)| !p.is_empty() && !u.is_empty())
            .ok_or_else(|| ConfigError::InvalidProperty {
                name: name.to_string(),
                value: value.to_string(),
                reason: "expected prefix=uri".to_string(),
            })?;
        debug!("Parser {} binding namespace {} to {}", self.core.name, prefix, uri);
        self.namespaces.bind(prefix, uri);
        Ok(())
    }

    /// Next complete document from `reader`, or `None` when both the reader
    /// and the carried-over buffer are exhausted.
    fn next_document(&self, reader: &SharedReader) -> Result<Option<String>, ParseError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| ParseError::InvalidState {
                parser: self.core.name.clone(),
                reason: "document buffer lock poisoned".to_string(),
            })?;

        loop {
            let line = reader
                .read_line()
                .map_err(|e| ParseError::malformed(&self.core.name, e.to_string()))?;
            match line {
                Some(line) => {
                    if line.trim_start().starts_with(XML_DECLARATION) && !pending.trim().is_empty() {
                        let document = std::mem::replace(&mut *pending, line);
                        pending.push('\n');
                        return Ok(Some(document));
                    }
                    pending.push_str(&line);
                    pending.push('\n');
                }
                None => {
                    let document = std::mem::take(&mut *pending);
                    return Ok(if document.trim().is_empty() { None } else { Some(document) });
                }
            }
        }
    }

    fn parse_document(&self, ctx: &StreamContext, text: &str) -> Result<Option<ActivityInfo>, ParseError> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(text, options)
            .map_err(|e| ParseError::malformed(&self.core.name, e.to_string()))?;

        let source = XmlSource {
            doc: &doc,
            paths: &self.paths,
            namespaces: &self.namespaces,
        };
        let mut ai = ActivityInfo::new();
        if !self.core.mapper.map_fields(&mut ai, ctx, &source, self.require_all)? {
            debug!("Parser {} missing a required value, skipping document", self.core.name);
            return Ok(None);
        }
        Ok(Some(ai))
    }
}

struct XmlSource<'a, 'input> {
    doc: &'a Document<'input>,
    paths: &'a HashMap<String, XPath>,
    namespaces: &'a Namespaces,
}

impl Extractor for XmlSource<'_, '_> {
    fn extract(&self, locator: &Locator) -> Result<Option<Extracted>, FieldError> {
        let path = self.paths.get(&locator.location).ok_or_else(|| FieldError::Unresolvable {
            locator: locator.to_string(),
            reason: "path was not compiled".to_string(),
        })?;

        let found = path
            .evaluate(self.doc, self.namespaces)
            .map_err(|reason| FieldError::Unresolvable {
                locator: locator.to_string(),
                reason,
            })?;
        let Some(found) = found else {
            return Ok(None);
        };
        let value = found.value.trim();
        if value.is_empty() {
            return Ok(None);
        }

        let mut overrides = LocatorOverrides::default();
        for (name, attr) in found.attributes {
            match name.as_str() {
                "datatype" => overrides.data_type = Some(attr),
                "format" => overrides.format = Some(attr),
                "locale" => overrides.locale = Some(attr),
                "units" => overrides.units = Some(attr),
                _ => {}
            }
        }
        trace!("Path {} selected '{}'", path, value);
        Ok(Some(Extracted::with_overrides(value, overrides)))
    }
}

impl ActivityParser for ActivityXmlParser {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn set_properties(&mut self, properties: &[(String, String)]) -> Result<(), ConfigError> {
        for (name, value) in properties {
            if prop_is(name, props::NAMESPACE) {
                self.add_namespace(name, value)?;
            } else if prop_is(name, props::REQUIRE_ALL) {
                self.require_all = parse_bool(name, value)?;
                debug!("Parser {} set property {} = {}", self.core.name, name, value);
            } else {
                trace!("Parser {} ignoring property {}", self.core.name, name);
            }
        }
        Ok(())
    }

    fn add_field(&mut self, field: ActivityField) -> Result<(), ConfigError> {
        let mut compiled = Vec::new();
        for locator in &field.locators {
            match locator.locator_type {
                LocatorType::Path | LocatorType::Label => {
                    let path = XPath::compile(&locator.location).map_err(|reason| ConfigError::InvalidLocator {
                        field: field.to_string(),
                        locator: locator.to_string(),
                        reason,
                    })?;
                    compiled.push((locator.location.clone(), path));
                }
                t if t.is_property() => {}
                _ => {
                    return Err(ConfigError::InvalidLocator {
                        field: field.to_string(),
                        locator: locator.to_string(),
                        reason: "XML fields are located by path".to_string(),
                    })
                }
            }
        }
        self.core.mapper.add_field(field)?;
        self.paths.extend(compiled);
        Ok(())
    }

    fn supports(&self, item: &RawItem) -> bool {
        !matches!(item, RawItem::Map(_))
    }

    fn parse(&self, ctx: &StreamContext, item: &RawItem) -> Result<Option<ActivityInfo>, ParseError> {
        let text = match item {
            RawItem::Text(s) => s.clone(),
            RawItem::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            RawItem::Reader(reader) => match self.next_document(reader)? {
                Some(doc) => doc,
                None => return Ok(None),
            },
            RawItem::Map(_) => {
                return Err(ParseError::InvalidState {
                    parser: self.core.name.clone(),
                    reason: "map items are not supported".to_string(),
                })
            }
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        self.parse_document(ctx, &text)
    }
}
