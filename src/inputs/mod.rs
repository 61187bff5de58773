//! Activity sources feeding the stream runtime.

pub mod iter_stream;
pub mod line_stream;

pub use iter_stream::IterSource;
pub use line_stream::LineSource;
