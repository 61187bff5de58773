//! Input stream runtime: pulls raw items from a source, parses them into
//! activities and hands them to the delivery wrapper.
//!
//! Lifecycle: `NEW → STARTED → SUCCESS | FAILURE`, then cleanup. Items are
//! processed on the owner thread, or on a worker pool when
//! `UseExecutorService` is set. Per-item failures are counted as skipped
//! and never stop the stream; a fatal source or initialization error does.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::activity::HostCache;
use crate::error::{ConfigError, DeliveryError, StreamError};
use crate::outputs::{ActivityDelivery, ActivitySink};
use crate::parsers::{ActivityParser, RawItem};
use crate::runtime::context::{CancellationToken, StreamContext};
use crate::runtime::executor::WorkerPool;
use crate::runtime::listeners::{
    EventLevel, InputStreamListener, Listeners, StreamStatus, StreamTasksListener,
};
use crate::runtime::settings::StreamSettings;
use crate::runtime::stats::{StreamCounters, StreamStats};

/// Where a stream's raw items come from.
pub trait ActivitySource: Send {
    /// Apply source properties. Unknown names are ignored.
    fn set_properties(&mut self, _properties: &[(String, String)]) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Open the underlying input. Called once on the owner thread.
    fn initialize(&mut self) -> Result<(), StreamError> {
        Ok(())
    }

    /// Next raw item; `Ok(None)` is a clean end of input. May block.
    fn next_item(&mut self) -> Result<Option<RawItem>, StreamError>;

    /// Properties exposed to `StreamProperty` locators.
    fn properties(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Size of the whole input, when known up front.
    fn total_bytes(&self) -> Option<u64> {
        None
    }

    /// Number of items the input holds, when known up front.
    fn total_items(&self) -> Option<u64> {
        None
    }

    fn cleanup(&mut self) {}
}

/// Parses items and delivers the resulting activities. Shared by the owner
/// thread and pool workers.
struct ItemProcessor {
    stream: String,
    parsers: Vec<Arc<dyn ActivityParser>>,
    delivery: ActivityDelivery,
    ctx: StreamContext,
    counters: Arc<StreamCounters>,
}

impl ItemProcessor {
    /// Run [`Self::process`], counting the item as skipped if handling it
    /// panics. The calling thread keeps going either way.
    fn process_guarded(&self, index: u64, item: RawItem) {
        if panic::catch_unwind(AssertUnwindSafe(|| self.process(index, item))).is_err() {
            error!(
                "Stream {} panicked while processing activity item {}, skipping",
                self.stream, index
            );
            self.counters.add_skipped();
        }
    }

    fn process(&self, index: u64, item: RawItem) {
        let mut parsed = None;
        for parser in self.parsers.iter().filter(|p| p.supports(&item)) {
            match parser.parse(&self.ctx, &item) {
                Ok(Some(ai)) => {
                    parsed = Some(ai);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Stream {} failed to parse activity item {} with parser {}: {}",
                        self.stream,
                        index,
                        parser.name(),
                        e
                    );
                    self.counters.add_skipped();
                    return;
                }
            }
        }

        let Some(ai) = parsed else {
            if matches!(&item, RawItem::Reader(r) if r.is_eof()) {
                debug!("Stream {} reader item {} exhausted", self.stream, index);
            } else {
                debug!("Stream {} produced no activity from item {}, skipping", self.stream, index);
                self.counters.add_skipped();
            }
            return;
        };

        match self.delivery.deliver(ai, Some(self.ctx.token())) {
            Ok(_) => self.counters.add_delivered(),
            Err(DeliveryError::Halted { attempts }) => {
                warn!(
                    "Stream {} halted before activity item {} was delivered ({} attempt(s))",
                    self.stream, index, attempts
                );
                self.counters.add_lost(1);
            }
            Err(e) => {
                error!("Stream {} could not deliver activity item {}: {}", self.stream, index, e);
                self.counters.add_lost(1);
            }
        }
    }
}

pub struct StreamRuntime {
    name: String,
    source: Box<dyn ActivitySource>,
    parsers: Vec<Arc<dyn ActivityParser>>,
    sink: Arc<dyn ActivitySink>,
    hosts: Arc<HostCache>,
    settings: StreamSettings,
    properties: Vec<(String, String)>,
    listeners: Listeners,
    token: CancellationToken,
    counters: Arc<StreamCounters>,
    status: StreamStatus,
}

impl StreamRuntime {
    pub fn new(name: impl Into<String>, source: Box<dyn ActivitySource>, sink: Arc<dyn ActivitySink>) -> Self {
        Self {
            name: name.into(),
            source,
            parsers: Vec::new(),
            sink,
            hosts: HostCache::system(),
            settings: StreamSettings::default(),
            properties: Vec::new(),
            listeners: Listeners::default(),
            token: CancellationToken::new(),
            counters: Arc::new(StreamCounters::new()),
            status: StreamStatus::New,
        }
    }

    /// Share a host cache between streams instead of the per-stream default.
    pub fn with_host_cache(mut self, hosts: Arc<HostCache>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    /// Parsers are tried in the order added; the first to produce an
    /// activity wins.
    pub fn add_parser(&mut self, parser: Arc<dyn ActivityParser>) {
        self.parsers.push(parser);
    }

    pub fn add_listener(&mut self, listener: Arc<dyn InputStreamListener>) {
        self.listeners.add_stream_listener(listener);
    }

    pub fn add_tasks_listener(&mut self, listener: Arc<dyn StreamTasksListener>) {
        self.listeners.add_tasks_listener(listener);
    }

    /// Apply stream properties to the runtime settings and the source.
    /// All properties are also visible to `StreamProperty` locators.
    pub fn set_properties(&mut self, properties: &[(String, String)]) -> Result<(), ConfigError> {
        self.settings.apply(properties)?;
        self.source.set_properties(properties)?;
        self.properties.extend_from_slice(properties);
        Ok(())
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn counters(&self) -> Arc<StreamCounters> {
        Arc::clone(&self.counters)
    }

    /// Run on a dedicated owner thread.
    pub fn spawn(self) -> io::Result<StreamHandle> {
        let name = self.name.clone();
        let token = self.token.clone();
        let counters = self.counters();
        let thread = thread::Builder::new()
            .name(format!("stream-{}", name))
            .spawn(move || self.run())?;
        Ok(StreamHandle {
            name,
            token,
            counters,
            thread,
        })
    }

    /// Run the stream to completion on the calling thread.
    ///
    /// # Returns
    /// Final statistics, or the error that failed the stream
    pub fn run(mut self) -> Result<StreamStats, StreamError> {
        info!("Starting stream {}", self.name);
        self.counters.mark_started();
        self.set_status(StreamStatus::Started);

        let outcome = match self.initialize() {
            Ok(processor) => self.read_items(processor),
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(()) => {
                self.listeners.success(&self.name);
                self.set_status(StreamStatus::Success);
            }
            Err(e) => {
                error!("Stream {} failed: {}", self.name, e);
                self.listeners.failure(&self.name, &e.to_string(), Some(e), None);
                self.set_status(StreamStatus::Failure);
            }
        }

        let stats = self.counters.snapshot(&self.name);
        info!("Stream {} ended: {}", self.name, stats);
        self.listeners.finish(&self.name, &stats);
        self.cleanup();

        outcome.map(|()| stats)
    }

    fn set_status(&mut self, status: StreamStatus) {
        self.status = status;
        self.listeners.status_change(&self.name, status);
    }

    fn initialize(&mut self) -> Result<Arc<ItemProcessor>, StreamError> {
        if self.parsers.is_empty() {
            return Err(StreamError::Configuration(ConfigError::MissingProperty(format!(
                "parser for stream {}",
                self.name
            ))));
        }
        self.source.initialize()?;
        self.sink.initialize().map_err(DeliveryError::from)?;
        if let Some(total) = self.source.total_bytes() {
            self.counters.set_total_bytes(total);
        }
        if let Some(total) = self.source.total_items() {
            self.counters.set_total_items(total);
        }

        let mut properties = self.source.properties();
        properties.extend(self.properties.iter().cloned());
        let ctx = StreamContext::with_token(&self.name, properties, self.token.clone());

        let delivery = ActivityDelivery::new(Arc::clone(&self.sink), Arc::clone(&self.hosts))
            .with_policy(self.settings.delivery_policy());

        Ok(Arc::new(ItemProcessor {
            stream: self.name.clone(),
            parsers: self.parsers.clone(),
            delivery,
            ctx,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn read_items(&mut self, processor: Arc<ItemProcessor>) -> Result<(), StreamError> {
        let pool = match self.settings.executor_config() {
            Some(config) => Some(WorkerPool::start(config)?),
            None => None,
        };
        let total = self.source.total_items().unwrap_or(0);

        let mut outcome = Ok(());
        while !self.token.is_cancelled() {
            let item = match self.source.next_item() {
                Ok(Some(item)) => item,
                Ok(None) => {
                    info!("Stream {} reached end of input", self.name);
                    break;
                }
                Err(StreamError::Parse(e)) => {
                    warn!("Stream {} skipping unreadable item: {}", self.name, e);
                    self.counters.add_skipped();
                    continue;
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };

            let index = self.counters.next_item(item.byte_len());
            self.listeners.progress(&self.name, index, total);

            // a shared reader is consumed sequentially, so it never goes to the pool
            match &pool {
                Some(_) if matches!(item, RawItem::Reader(_)) => processor.process_guarded(index, item),
                None => processor.process_guarded(index, item),
                Some(pool) => {
                    let worker = Arc::clone(&processor);
                    let task = Box::new(move || worker.process_guarded(index, item));
                    if pool.submit(task, &self.token).is_err() {
                        warn!(
                            "Stream {} executor queue is full, activity item {} rejected",
                            self.name, index
                        );
                        self.counters.add_lost(1);
                        self.listeners.reject(&self.name, index);
                    }
                }
            }
        }

        if let Some(pool) = pool {
            let dropped = pool.shutdown();
            if dropped > 0 {
                self.counters.add_lost(dropped as u64);
                self.listeners.drop_off(&self.name, dropped);
                self.listeners.event(
                    &self.name,
                    EventLevel::Warning,
                    &format!("{} queued activity item(s) dropped at shutdown", dropped),
                    "executor",
                );
            }
        }
        outcome
    }

    fn cleanup(&mut self) {
        if let Err(e) = self.sink.close() {
            warn!("Stream {} failed to close sink {}: {}", self.name, self.sink.name(), e);
        }
        self.source.cleanup();
        self.listeners.clear();
        debug!("Stream {} cleaned up", self.name);
    }
}

/// Handle to a stream running on its owner thread.
pub struct StreamHandle {
    name: String,
    token: CancellationToken,
    counters: Arc<StreamCounters>,
    thread: JoinHandle<Result<StreamStats, StreamError>>,
}

impl StreamHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the stream to stop. Returns immediately.
    pub fn halt(&self) {
        info!("Halting stream {}", self.name);
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Statistics so far.
    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot(&self.name)
    }

    pub fn join(self) -> Result<StreamStats, StreamError> {
        self.thread
            .join()
            .map_err(|_| StreamError::fatal(format!("stream {} thread panicked", self.name)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::host_cache::tests::CountingLookup;
    use crate::activity::{keys, ActivityRecord};
    use crate::error::SinkError;
    use crate::fields::{ActivityField, FieldType, Locator};
    use crate::parsers::ActivityTokenParser;
    use std::sync::Mutex;

    struct Items(std::vec::IntoIter<Result<Option<RawItem>, StreamError>>);

    impl Items {
        fn lines(lines: &[&str]) -> Box<Self> {
            let items: Vec<_> = lines.iter().map(|l| Ok(Some(RawItem::from(*l)))).collect();
            Box::new(Self(items.into_iter()))
        }
    }

    impl ActivitySource for Items {
        fn next_item(&mut self) -> Result<Option<RawItem>, StreamError> {
            self.0.next().unwrap_or(Ok(None))
        }

        fn total_items(&self) -> Option<u64> {
            Some(self.0.len() as u64)
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<ActivityRecord>>);

    impl ActivitySink for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn send(&self, record: &ActivityRecord) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Statuses(Mutex<Vec<StreamStatus>>);

    impl InputStreamListener for Statuses {
        fn on_status_change(&self, _stream: &str, status: StreamStatus) {
            self.0.lock().unwrap().push(status);
        }
    }

    fn token_parser() -> Arc<dyn ActivityParser> {
        let mut parser = ActivityTokenParser::new("tokens");
        parser
            .add_field(ActivityField::new(FieldType::ActivityName).with_locator(Locator::index(1)))
            .unwrap();
        parser
            .add_field(ActivityField::new(FieldType::Severity).with_locator(Locator::index(2)))
            .unwrap();
        Arc::new(parser)
    }

    fn runtime(source: Box<dyn ActivitySource>, sink: Arc<Collect>) -> StreamRuntime {
        let mut rt = StreamRuntime::new("test", source, sink)
            .with_host_cache(Arc::new(HostCache::new(Box::new(CountingLookup::default()))));
        rt.add_parser(token_parser());
        rt
    }

    #[test]
    fn test_sync_run_delivers_and_skips() {
        let sink = Arc::new(Collect::default());
        let statuses = Arc::new(Statuses::default());
        let mut rt = runtime(Items::lines(&["login,INFO", "", "logout,LOUD", "query,DEBUG"]), sink.clone());
        rt.add_listener(statuses.clone());

        let stats = rt.run().unwrap();
        assert_eq!(stats.current_activity, 4);
        assert_eq!(stats.delivered_activities, 2);
        assert_eq!(stats.skipped_activities, 2);

        let records = sink.0.lock().unwrap();
        let names: Vec<_> = records.iter().map(|r| r.get_str(keys::ACTIVITY_NAME)).collect();
        assert_eq!(names, vec![Some("login"), Some("query")]);
        assert_eq!(
            *statuses.0.lock().unwrap(),
            vec![StreamStatus::Started, StreamStatus::Success]
        );
    }

    #[test]
    fn test_fatal_source_error_fails_stream() {
        let items = vec![
            Ok(Some(RawItem::from("login,INFO"))),
            Err(StreamError::fatal("queue manager gone")),
            Ok(Some(RawItem::from("never,INFO"))),
        ];
        let sink = Arc::new(Collect::default());
        let statuses = Arc::new(Statuses::default());
        let mut rt = runtime(Box::new(Items(items.into_iter())), sink.clone());
        rt.add_listener(statuses.clone());

        assert!(matches!(rt.run(), Err(StreamError::Fatal(_))));
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert_eq!(
            *statuses.0.lock().unwrap(),
            vec![StreamStatus::Started, StreamStatus::Failure]
        );
    }

    #[test]
    fn test_missing_parser_is_configuration_error() {
        let rt = StreamRuntime::new("bare", Items::lines(&["x"]), Arc::new(Collect::default()));
        let err = rt.run().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_pooled_run_delivers_everything() {
        let lines: Vec<String> = (0..50).map(|i| format!("op{},INFO", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let sink = Arc::new(Collect::default());
        let mut rt = runtime(Items::lines(&refs), sink.clone());
        rt.set_properties(&[
            ("UseExecutorService".to_string(), "true".to_string()),
            ("ExecutorThreadsQuantity".to_string(), "3".to_string()),
        ])
        .unwrap();

        let stats = rt.run().unwrap();
        assert_eq!(stats.delivered_activities, 50);
        assert_eq!(sink.0.lock().unwrap().len(), 50);
    }

    #[test]
    fn test_spawned_stream_halts() {
        struct Endless;

        impl ActivitySource for Endless {
            fn next_item(&mut self) -> Result<Option<RawItem>, StreamError> {
                thread::sleep(std::time::Duration::from_millis(1));
                Ok(Some(RawItem::from("tick,INFO")))
            }
        }

        let sink = Arc::new(Collect::default());
        let handle = runtime(Box::new(Endless), sink).spawn().unwrap();
        while handle.stats().current_activity < 3 {
            thread::sleep(std::time::Duration::from_millis(1));
        }
        handle.halt();
        let stats = handle.join().unwrap();
        assert!(stats.delivered_activities >= 3);
    }

    /// Panics on the item `boom`, otherwise defers to the token parser.
    struct Explosive(Arc<dyn ActivityParser>);

    impl ActivityParser for Explosive {
        fn name(&self) -> &str {
            "explosive"
        }

        fn set_properties(&mut self, _props: &[(String, String)]) -> Result<(), ConfigError> {
            Ok(())
        }

        fn add_field(&mut self, _field: ActivityField) -> Result<(), ConfigError> {
            Ok(())
        }

        fn supports(&self, _item: &RawItem) -> bool {
            true
        }

        fn parse(
            &self,
            ctx: &StreamContext,
            item: &RawItem,
        ) -> Result<Option<crate::activity::ActivityInfo>, crate::error::ParseError> {
            if matches!(item, RawItem::Text(t) if t == "boom") {
                panic!("parser blew up");
            }
            self.0.parse(ctx, item)
        }
    }

    fn explosive_runtime(sink: Arc<Collect>, pooled: bool) -> StreamRuntime {
        let mut rt = StreamRuntime::new("fragile", Items::lines(&["a,INFO", "boom", "b,INFO"]), sink)
            .with_host_cache(Arc::new(HostCache::new(Box::new(CountingLookup::default()))));
        rt.add_parser(Arc::new(Explosive(token_parser())));
        if pooled {
            rt.set_properties(&[
                ("UseExecutorService".to_string(), "true".to_string()),
                ("ExecutorThreadsQuantity".to_string(), "2".to_string()),
            ])
            .unwrap();
        }
        rt
    }

    #[test]
    fn test_panicking_item_is_skipped_inline() {
        let sink = Arc::new(Collect::default());
        let statuses = Arc::new(Statuses::default());
        let mut rt = explosive_runtime(sink.clone(), false);
        rt.add_listener(statuses.clone());

        let stats = rt.run().unwrap();
        assert_eq!(stats.delivered_activities, 2);
        assert_eq!(stats.skipped_activities, 1);
        assert_eq!(stats.total_activities, 3);
        assert_eq!(sink.0.lock().unwrap().len(), 2);
        assert_eq!(
            *statuses.0.lock().unwrap(),
            vec![StreamStatus::Started, StreamStatus::Success]
        );
    }

    #[test]
    fn test_panicking_item_is_skipped_on_pool() {
        let sink = Arc::new(Collect::default());
        let stats = explosive_runtime(sink.clone(), true).run().unwrap();
        assert_eq!(stats.delivered_activities, 2);
        assert_eq!(stats.skipped_activities, 1);
        assert_eq!(stats.lost_activities, 0);
    }
}
