//! In-process source over any iterator of raw items.

use crate::error::StreamError;
use crate::parsers::RawItem;
use crate::runtime::ActivitySource;

pub struct IterSource {
    items: Box<dyn Iterator<Item = RawItem> + Send>,
    properties: Vec<(String, String)>,
    /// Item count when the iterator reported an exact size.
    total: Option<u64>,
}

impl IterSource {
    pub fn new<I>(items: I) -> Self
    where
        I: IntoIterator<Item = RawItem>,
        I::IntoIter: Send + 'static,
    {
        let items = items.into_iter();
        let total = match items.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower as u64),
            _ => None,
        };
        Self {
            items: Box::new(items),
            properties: Vec::new(),
            total,
        }
    }

    /// Convenience for text lines.
    pub fn lines<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        let items: Vec<RawItem> = lines.into_iter().map(|l| RawItem::Text(l.into())).collect();
        Self::new(items)
    }

    /// Expose a property to `StreamProperty` locators.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }
}

impl ActivitySource for IterSource {
    fn next_item(&mut self) -> Result<Option<RawItem>, StreamError> {
        Ok(self.items.next())
    }

    fn properties(&self) -> Vec<(String, String)> {
        self.properties.clone()
    }

    fn total_items(&self) -> Option<u64> {
        self.total
    }
}
