//! Input stream runtime.
//!
//! A [`StreamRuntime`] owns one source, an ordered list of parsers and one
//! sink. It reads on its own thread and either processes items inline or
//! hands them to a bounded/unbounded [`WorkerPool`].

pub mod context;
pub mod executor;
pub mod listeners;
pub mod settings;
pub mod stats;
pub mod stream;

// Re-export key types
pub use context::{CancellationToken, StreamContext};
pub use executor::{ExecutorConfig, WorkerPool};
pub use listeners::{EventLevel, InputStreamListener, Listeners, StreamStatus, StreamTasksListener};
pub use settings::StreamSettings;
pub use stats::{StreamCounters, StreamStats};
pub use stream::{ActivitySource, StreamHandle, StreamRuntime};
