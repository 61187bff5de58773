//! Lock-free stream counters and their serializable snapshot.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Counters updated by the owner thread and workers. Snapshots read each
/// counter on its own, so they are approximate while the stream runs.
#[derive(Debug, Default)]
pub struct StreamCounters {
    current: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    lost: AtomicU64,
    streamed_bytes: AtomicU64,
    total_bytes: AtomicU64,
    total_items: AtomicU64,
    started: OnceLock<Instant>,
}

impl StreamCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn mark_started(&self) {
        let _ = self.started.set(Instant::now());
    }

    /// Count a fetched item and return its 1-based position.
    pub(crate) fn next_item(&self, bytes: u64) -> u64 {
        self.streamed_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.current.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn add_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_lost(&self, count: u64) {
        self.lost.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn set_total_bytes(&self, total: u64) {
        self.total_bytes.store(total, Ordering::Relaxed);
    }

    pub(crate) fn set_total_items(&self, total: u64) {
        self.total_items.store(total, Ordering::Relaxed);
    }

    /// Items the source announced up front, 0 when unknown.
    pub fn total_items(&self) -> u64 {
        self.total_items.load(Ordering::Relaxed)
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, stream: &str) -> StreamStats {
        StreamStats {
            stream: stream.to_string(),
            total_activities: self.total_items(),
            current_activity: self.current(),
            delivered_activities: self.delivered.load(Ordering::Relaxed),
            skipped_activities: self.skipped(),
            lost_activities: self.lost.load(Ordering::Relaxed),
            streamed_bytes: self.streamed_bytes.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            elapsed: self.started.get().map(Instant::elapsed).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStats {
    pub stream: String,
    /// Items the source holds when it knows up front, else 0.
    pub total_activities: u64,
    /// Items fetched from the source so far.
    pub current_activity: u64,
    pub delivered_activities: u64,
    pub skipped_activities: u64,
    /// Items rejected by a full queue or dropped at shutdown.
    pub lost_activities: u64,
    pub streamed_bytes: u64,
    /// Size of the whole input when the source knows it, else 0.
    pub total_bytes: u64,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// `H:mm:ss.SSS`
fn format_hms(d: Duration) -> String {
    let millis = d.as_millis();
    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis / 1_000) % 60;
    format!("{}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis % 1_000)
}

impl fmt::Display for StreamStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream={}, activities={}", self.stream, self.current_activity)?;
        if self.total_activities > 0 {
            write!(f, "/{}", self.total_activities)?;
        }
        write!(
            f,
            ", delivered={}, skipped={}, lost={}, bytes={}",
            self.delivered_activities,
            self.skipped_activities,
            self.lost_activities,
            self.streamed_bytes
        )?;
        if self.total_bytes > 0 {
            write!(f, "/{}", self.total_bytes)?;
        }
        write!(f, ", elapsed={}", format_hms(self.elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = StreamCounters::new();
        assert_eq!(counters.next_item(10), 1);
        assert_eq!(counters.next_item(5), 2);
        counters.add_skipped();
        counters.add_delivered();
        counters.add_lost(3);
        counters.set_total_items(7);

        let stats = counters.snapshot("s1");
        assert_eq!(stats.total_activities, 7);
        assert_eq!(stats.current_activity, 2);
        assert_eq!(stats.streamed_bytes, 15);
        assert_eq!(stats.skipped_activities, 1);
        assert_eq!(stats.delivered_activities, 1);
        assert_eq!(stats.lost_activities, 3);
        assert_eq!(stats.elapsed, Duration::ZERO);
    }

    #[test]
    fn test_hms_format() {
        assert_eq!(format_hms(Duration::from_millis(3_723_004)), "1:02:03.004");
        assert_eq!(format_hms(Duration::ZERO), "0:00:00.000");
    }

    #[test]
    fn test_stats_serialize_elapsed_as_millis() {
        let mut stats = StreamCounters::new().snapshot("s");
        stats.elapsed = Duration::from_millis(1500);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["elapsed"], 1500);
        assert_eq!(json["stream"], "s");
    }
}
