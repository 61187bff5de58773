//! Stream lifecycle and task listeners.
//!
//! Listeners are called synchronously, in registration order, from the
//! thread that raised the event. Every method has an empty default so a
//! listener only implements what it cares about.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::StreamError;
use crate::runtime::stats::StreamStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamStatus {
    New,
    Started,
    Success,
    Failure,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StreamStatus::New => "NEW",
            StreamStatus::Started => "STARTED",
            StreamStatus::Success => "SUCCESS",
            StreamStatus::Failure => "FAILURE",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

#[allow(unused_variables)]
pub trait InputStreamListener: Send + Sync {
    /// `total` is 0 when the source size is unknown.
    fn on_progress_update(&self, stream: &str, current: u64, total: u64) {}

    fn on_success(&self, stream: &str) {}

    fn on_failure(&self, stream: &str, message: &str, error: Option<&StreamError>, code: Option<i32>) {}

    fn on_status_change(&self, stream: &str, status: StreamStatus) {}

    fn on_finish(&self, stream: &str, stats: &StreamStats) {}

    fn on_stream_event(&self, stream: &str, level: EventLevel, message: &str, source: &str) {}
}

#[allow(unused_variables)]
pub trait StreamTasksListener: Send + Sync {
    /// A task was turned away by a full queue; its item is lost.
    fn on_reject(&self, stream: &str, item: u64) {}

    /// Queued tasks discarded by a forced shutdown.
    fn on_drop_off(&self, stream: &str, dropped: usize) {}
}

/// Registered listeners of one stream.
#[derive(Clone, Default)]
pub struct Listeners {
    stream: Vec<Arc<dyn InputStreamListener>>,
    tasks: Vec<Arc<dyn StreamTasksListener>>,
}

impl Listeners {
    pub fn add_stream_listener(&mut self, listener: Arc<dyn InputStreamListener>) {
        self.stream.push(listener);
    }

    pub fn add_tasks_listener(&mut self, listener: Arc<dyn StreamTasksListener>) {
        self.tasks.push(listener);
    }

    pub fn progress(&self, stream: &str, current: u64, total: u64) {
        self.stream.iter().for_each(|l| l.on_progress_update(stream, current, total));
    }

    pub fn success(&self, stream: &str) {
        self.stream.iter().for_each(|l| l.on_success(stream));
    }

    pub fn failure(&self, stream: &str, message: &str, error: Option<&StreamError>, code: Option<i32>) {
        self.stream.iter().for_each(|l| l.on_failure(stream, message, error, code));
    }

    pub fn status_change(&self, stream: &str, status: StreamStatus) {
        self.stream.iter().for_each(|l| l.on_status_change(stream, status));
    }

    pub fn finish(&self, stream: &str, stats: &StreamStats) {
        self.stream.iter().for_each(|l| l.on_finish(stream, stats));
    }

    pub fn event(&self, stream: &str, level: EventLevel, message: &str, source: &str) {
        self.stream
            .iter()
            .for_each(|l| l.on_stream_event(stream, level, message, source));
    }

    pub fn reject(&self, stream: &str, item: u64) {
        self.tasks.iter().for_each(|l| l.on_reject(stream, item));
    }

    pub fn drop_off(&self, stream: &str, dropped: usize) {
        self.tasks.iter().for_each(|l| l.on_drop_off(stream, dropped));
    }

    /// Release every listener.
    pub fn clear(&mut self) {
        self.stream.clear();
        self.tasks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_empty() && self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl InputStreamListener for Recorder {
        fn on_status_change(&self, stream: &str, status: StreamStatus) {
            self.calls.lock().unwrap().push(format!("{}:{}", stream, status));
        }

        fn on_success(&self, stream: &str) {
            self.calls.lock().unwrap().push(format!("{}:ok", stream));
        }
    }

    #[test]
    fn test_fan_out_in_order() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let mut listeners = Listeners::default();
        listeners.add_stream_listener(first.clone());
        listeners.add_stream_listener(second.clone());

        listeners.status_change("s", StreamStatus::Started);
        listeners.success("s");
        // not implemented by Recorder: default no-op
        listeners.progress("s", 1, 0);

        for recorder in [&first, &second] {
            assert_eq!(*recorder.calls.lock().unwrap(), vec!["s:STARTED", "s:ok"]);
        }

        listeners.clear();
        assert!(listeners.is_empty());
    }
}
