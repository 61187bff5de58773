//! Output sinks and the delivery wrapper in front of them.

pub mod delivery;
pub mod log;
pub mod ndjson;

use crate::activity::ActivityRecord;
use crate::error::SinkError;

pub use delivery::{ActivityDelivery, DeliveryPolicy, RetrySleeper, TokenSleeper};
pub use log::LogSink;
pub use ndjson::NdjsonSink;

/// Receives finalized activity records.
///
/// Sinks are shared between the stream owner thread and pool workers, so
/// every method takes `&self`.
pub trait ActivitySink: Send + Sync {
    fn name(&self) -> &str;

    /// Establish the connection. Called once before the first record.
    fn initialize(&self) -> Result<(), SinkError> {
        Ok(())
    }

    fn send(&self, record: &ActivityRecord) -> Result<(), SinkError>;

    /// Drop any broken connection so the next `send` starts afresh.
    fn reset(&self) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
