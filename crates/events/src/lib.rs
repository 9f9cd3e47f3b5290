//! Job output fan-out.
//!
//! - [`JobEventBus`]: in-process publish/subscribe hub for [`JobEvent`]s,
//!   backed by `tokio::sync::broadcast`.
//! - [`LogBuffer`]: per-job history of captured output lines, replayed to
//!   viewers that connect after a job started.

pub mod bus;
pub mod log_buffer;

pub use bus::{JobEvent, JobEventBus};
pub use log_buffer::{LogBuffer, LogEntry, LogStream};
