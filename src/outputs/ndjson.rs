//! NDJSON sink: one JSON record per line, to a file, stdout or any writer.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::debug;

use crate::activity::ActivityRecord;
use crate::error::SinkError;
use crate::outputs::ActivitySink;

/// NDJSON (Newline Delimited JSON) writer
///
/// Writes values as NDJSON, one JSON object per line.
pub struct NdjsonWriter<W: Write> {
    writer: W,
}

impl<W: Write> NdjsonWriter<W> {
    /// Create a new NDJSON writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a single value as an NDJSON line
    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<(), SinkError> {
        let json = serde_json::to_string(value)?;
        writeln!(self.writer, "{}", json)?;
        Ok(())
    }

    /// Flush the underlying writer
    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

enum Target {
    File(PathBuf),
    Stdout,
    /// Caller-supplied writer; cannot be reopened once dropped.
    Writer,
}

type BoxedWriter = NdjsonWriter<Box<dyn Write + Send>>;

pub struct NdjsonSink {
    name: String,
    target: Target,
    writer: Mutex<Option<BoxedWriter>>,
}

impl NdjsonSink {
    /// Append records to `path`, creating it when missing.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("ndjson:{}", path.display()),
            target: Target::File(path),
            writer: Mutex::new(None),
        }
    }

    pub fn stdout() -> Self {
        Self {
            name: "ndjson:stdout".to_string(),
            target: Target::Stdout,
            writer: Mutex::new(None),
        }
    }

    pub fn from_writer(name: impl Into<String>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            name: name.into(),
            target: Target::Writer,
            writer: Mutex::new(Some(NdjsonWriter::new(writer))),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<BoxedWriter>>, SinkError> {
        self.writer
            .lock()
            .map_err(|_| SinkError::Transport("writer lock poisoned".to_string()))
    }

    fn open(&self) -> Result<BoxedWriter, SinkError> {
        let writer: Box<dyn Write + Send> = match &self.target {
            Target::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                debug!("Opened NDJSON output {}", path.display());
                Box::new(BufWriter::new(file))
            }
            Target::Stdout => Box::new(io::stdout()),
            Target::Writer => return Err(SinkError::Closed),
        };
        Ok(NdjsonWriter::new(writer))
    }
}

impl ActivitySink for NdjsonSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self) -> Result<(), SinkError> {
        let mut guard = self.lock()?;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        Ok(())
    }

    fn send(&self, record: &ActivityRecord) -> Result<(), SinkError> {
        let mut guard = self.lock()?;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        let writer = guard.as_mut().ok_or(SinkError::Closed)?;
        writer.write(record)?;
        writer.flush()
    }

    fn reset(&self) -> Result<(), SinkError> {
        let mut guard = self.lock()?;
        if matches!(self.target, Target::Writer) {
            return match guard.as_mut() {
                Some(writer) => writer.flush(),
                None => Ok(()),
            };
        }
        guard.take();
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        let mut guard = self.lock()?;
        match guard.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }
}
