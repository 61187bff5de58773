//! Line-oriented source over a file or a single TCP connection.
//!
//! With `ReadLines` on (the default) every line is its own raw item. With it
//! off the source hands out one shared reader until it is drained, so a
//! parser can consume several lines per activity (multi-line XML).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::TcpListener;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::{ConfigError, StreamError};
use crate::parsers::{parse_bool, prop_is, RawItem, SharedReader};
use crate::runtime::ActivitySource;

/// Source property names.
pub mod props {
    pub const FILE_NAME: &str = "FileName";
    pub const PORT: &str = "Port";
    pub const READ_LINES: &str = "ReadLines";
}

pub struct LineSource {
    file_name: Option<PathBuf>,
    port: Option<u16>,
    read_lines: bool,
    listener: Option<TcpListener>,
    reader: Option<SharedReader>,
    total_bytes: Option<u64>,
}

impl Default for LineSource {
    fn default() -> Self {
        Self {
            file_name: None,
            port: None,
            read_lines: true,
            listener: None,
            reader: None,
            total_bytes: None,
        }
    }
}

impl LineSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from an already open reader instead of `FileName`/`Port`.
    pub fn from_reader(reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            reader: Some(SharedReader::new(reader)),
            ..Self::default()
        }
    }

    pub fn read_lines(mut self, read_lines: bool) -> Self {
        self.read_lines = read_lines;
        self
    }

    fn conflict() -> ConfigError {
        ConfigError::ConflictingProperties {
            first: props::FILE_NAME.to_string(),
            second: props::PORT.to_string(),
        }
    }

    /// Accept the single client connection a port source reads from.
    fn reader(&mut self) -> Result<&SharedReader, StreamError> {
        if self.reader.is_none() {
            let listener = self
                .listener
                .take()
                .ok_or_else(|| StreamError::fatal("line source is not initialized"))?;
            debug!("Waiting for connection on {:?}", listener.local_addr());
            let (socket, peer) = listener.accept()?;
            info!("Accepted connection from {}, reading data from socket", peer);
            self.reader = Some(SharedReader::new(Box::new(BufReader::new(socket))));
        }
        self.reader
            .as_ref()
            .ok_or_else(|| StreamError::fatal("line source has no reader"))
    }
}

impl ActivitySource for LineSource {
    fn set_properties(&mut self, properties: &[(String, String)]) -> Result<(), ConfigError> {
        for (name, value) in properties {
            if prop_is(name, props::FILE_NAME) {
                if self.port.is_some() {
                    return Err(Self::conflict());
                }
                self.file_name = Some(PathBuf::from(value));
            } else if prop_is(name, props::PORT) {
                if self.file_name.is_some() {
                    return Err(Self::conflict());
                }
                let port = value.trim().parse().map_err(|_| ConfigError::InvalidProperty {
                    name: name.clone(),
                    value: value.clone(),
                    reason: "expected a TCP port number".to_string(),
                })?;
                self.port = Some(port);
            } else if prop_is(name, props::READ_LINES) {
                self.read_lines = parse_bool(name, value)?;
            }
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), StreamError> {
        if self.reader.is_some() {
            return Ok(());
        }
        if let Some(path) = &self.file_name {
            let file = File::open(path)?;
            self.total_bytes = Some(file.metadata()?.len());
            info!("Reading activity data from file {}", path.display());
            self.reader = Some(SharedReader::new(Box::new(BufReader::new(file))));
        } else if let Some(port) = self.port {
            self.listener = Some(TcpListener::bind(("0.0.0.0", port))?);
            info!("Listening for activity data on port {}", port);
        } else {
            return Err(ConfigError::MissingProperty(format!(
                "{} or {}",
                props::FILE_NAME,
                props::PORT
            ))
            .into());
        }
        Ok(())
    }

    fn next_item(&mut self) -> Result<Option<RawItem>, StreamError> {
        let read_lines = self.read_lines;
        let reader = self.reader()?;
        if read_lines {
            return Ok(reader.read_line()?.map(RawItem::Text));
        }
        if reader.is_eof() {
            return Ok(None);
        }
        Ok(Some(RawItem::Reader(reader.clone())))
    }

    fn properties(&self) -> Vec<(String, String)> {
        let mut properties = Vec::new();
        if let Some(path) = &self.file_name {
            properties.push((props::FILE_NAME.to_string(), path.display().to_string()));
        }
        if let Some(port) = self.port {
            properties.push((props::PORT.to_string(), port.to_string()));
        }
        properties
    }

    fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    fn cleanup(&mut self) {
        self.reader = None;
        self.listener = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn props(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_file_and_port_conflict() {
        let mut source = LineSource::new();
        let err = source
            .set_properties(&props(&[("FileName", "a.log"), ("Port", "9000")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingProperties { .. }));
    }

    #[test]
    fn test_no_input_fails_initialize() {
        let err = LineSource::new().initialize().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_reads_file_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "first\r\nsecond\n").unwrap();
        let path = file.path().display().to_string();

        let mut source = LineSource::new();
        source.set_properties(&props(&[("filename", &path)])).unwrap();
        source.initialize().unwrap();

        assert_eq!(source.total_bytes(), Some(14));
        assert_eq!(source.properties(), props(&[("FileName", &path)]));
        assert!(matches!(source.next_item().unwrap(), Some(RawItem::Text(s)) if s == "first"));
        assert!(matches!(source.next_item().unwrap(), Some(RawItem::Text(s)) if s == "second"));
        assert!(source.next_item().unwrap().is_none());
    }

    #[test]
    fn test_reader_mode_hands_out_reader_until_drained() {
        let mut source = LineSource::from_reader(Box::new(Cursor::new("a\nb\n"))).read_lines(false);
        source.initialize().unwrap();

        let Some(RawItem::Reader(reader)) = source.next_item().unwrap() else {
            panic!("expected reader item");
        };
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("a"));
        assert!(source.next_item().unwrap().is_some());
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("b"));
        assert_eq!(reader.read_line().unwrap(), None);
        assert!(source.next_item().unwrap().is_none());
    }

    #[test]
    fn test_invalid_port() {
        let err = LineSource::new()
            .set_properties(&props(&[("Port", "http")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProperty { .. }));
    }
}
