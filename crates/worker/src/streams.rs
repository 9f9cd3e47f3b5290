//! Reader tasks for a child's stdout and stderr.
//!
//! Each stream has its own task; a task appends to the [`LogBuffer`] and
//! then publishes the same entry, one line at a time, so per-stream order is
//! identical in history and on the bus.

use std::sync::Arc;
use std::time::Duration;

use sdjobs_core::output::OutputFilter;
use sdjobs_core::types::JobId;
use sdjobs_events::{JobEvent, JobEventBus, LogBuffer, LogStream};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

const READ_CHUNK: usize = 8 * 1024;

/// Destination of one job's captured output.
#[derive(Clone)]
pub(crate) struct LogSink {
    pub job_id: JobId,
    pub buffer: Arc<LogBuffer>,
    pub bus: Arc<JobEventBus>,
}

impl LogSink {
    fn emit(&self, stream: LogStream, message: String) {
        let entry = self.buffer.append(&self.job_id, stream, message);
        self.bus.publish(JobEvent::Log(entry));
    }
}

/// Kills a process that keeps running after reporting on stderr.
pub(crate) struct Watchdog {
    pub delay: Duration,
    /// Fired on expiry.
    pub kill: CancellationToken,
    /// Fired by the runner once the process has exited.
    pub exited: CancellationToken,
}

impl Watchdog {
    fn arm(&self, job_id: &str) {
        let delay = self.delay;
        let kill = self.kill.clone();
        let exited = self.exited.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = exited.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    tracing::warn!(job_id = %job_id, "Process still running after stderr output, terminating");
                    kill.cancel();
                }
            }
        });
    }
}

/// Filter stdout into lines until EOF.
pub(crate) async fn read_stdout<R>(mut reader: R, mut filter: OutputFilter, sink: LogSink)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in filter.push(&buf[..n]) {
                    sink.emit(LogStream::Stdout, line);
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %sink.job_id, error = %e, "stdout read failed");
                break;
            }
        }
    }
    for line in filter.finish() {
        sink.emit(LogStream::Stdout, line);
    }
}

/// Forward stderr chunk by chunk until EOF; the first chunk arms `watchdog`.
pub(crate) async fn read_stderr<R>(mut reader: R, sink: LogSink, watchdog: Watchdog)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut armed = false;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if !armed {
                    watchdog.arm(&sink.job_id);
                    armed = true;
                }
                let text = String::from_utf8_lossy(&buf[..n]);
                let text = text.trim();
                if !text.is_empty() {
                    sink.emit(LogStream::Stderr, text.to_string());
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %sink.job_id, error = %e, "stderr read failed");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
