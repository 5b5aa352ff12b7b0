//! Log monitoring for a running session.
//!
//! Polls a `LogSource` at a fixed interval and forwards every line to a sink.
//! Stops when the source reports `finished`, when a line equals the completion
//! marker, when the caller raises the cancel flag, or when the deadline passes.
//! Monitoring never changes session state; cancelling it does not terminate
//! the remote session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::remote::{ApiError, LogSource};

/// Why monitoring stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    Completed,
    Cancelled,
    DeadlineReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSummary {
    pub exit: MonitorExit,
    pub lines: usize,
    /// Offset to resume from.
    pub next_offset: u64,
}

#[derive(Debug, Clone)]
pub struct LogMonitor {
    pub poll_interval: Duration,
    pub completion_marker: Option<String>,
    pub deadline: Option<Duration>,
}

impl Default for LogMonitor {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            completion_marker: None,
            deadline: None,
        }
    }
}

impl LogMonitor {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..Self::default()
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.completion_marker = Some(marker.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Poll until one of the stop conditions holds. Transport errors end the run.
    pub fn run<S, F>(
        &self,
        source: &S,
        session_id: &str,
        start_offset: u64,
        cancel: &AtomicBool,
        mut sink: F,
    ) -> Result<MonitorSummary, ApiError>
    where
        S: LogSource + ?Sized,
        F: FnMut(&str),
    {
        let started = Instant::now();
        let mut offset = start_offset;
        let mut lines = 0usize;

        let summary = |exit, lines, offset| MonitorSummary {
            exit,
            lines,
            next_offset: offset,
        };

        loop {
            if cancel.load(Ordering::Relaxed) {
                info!(session_id, lines, "log monitoring cancelled");
                return Ok(summary(MonitorExit::Cancelled, lines, offset));
            }

            let batch = source.poll_logs(session_id, offset)?;
            debug!(session_id, offset, received = batch.lines.len(), "log batch");
            // Servers that do not track offsets echo 0; fall back to counting lines.
            offset = if batch.next_offset > offset {
                batch.next_offset
            } else {
                offset + batch.lines.len() as u64
            };

            for line in &batch.lines {
                sink(line);
                lines += 1;
                if self.completion_marker.as_deref() == Some(line.trim()) {
                    info!(session_id, lines, "completion marker seen");
                    return Ok(summary(MonitorExit::Completed, lines, offset));
                }
            }

            if batch.finished {
                info!(session_id, lines, "session output finished");
                return Ok(summary(MonitorExit::Completed, lines, offset));
            }

            if let Some(deadline) = self.deadline {
                if started.elapsed() >= deadline {
                    info!(session_id, lines, "log monitoring deadline reached");
                    return Ok(summary(MonitorExit::DeadlineReached, lines, offset));
                }
            }

            if !self.poll_interval.is_zero() {
                std::thread::sleep(self.poll_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::LogBatch;
    use std::sync::Mutex;

    /// Source that replays a fixed script of batches, then reports nothing new.
    struct Scripted {
        batches: Mutex<Vec<LogBatch>>,
        offsets_seen: Mutex<Vec<u64>>,
    }

    impl Scripted {
        fn new(mut batches: Vec<LogBatch>) -> Self {
            batches.reverse();
            Self {
                batches: Mutex::new(batches),
                offsets_seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl LogSource for Scripted {
        fn poll_logs(&self, _session_id: &str, offset: u64) -> Result<LogBatch, ApiError> {
            self.offsets_seen.lock().unwrap().push(offset);
            Ok(self.batches.lock().unwrap().pop().unwrap_or_default())
        }
    }

    fn batch(lines: &[&str], next_offset: u64, finished: bool) -> LogBatch {
        LogBatch {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            next_offset,
            finished,
        }
    }

    #[test]
    fn stops_when_source_finishes() {
        let source = Scripted::new(vec![
            batch(&["a", "b"], 2, false),
            batch(&["c"], 3, true),
        ]);
        let cancel = AtomicBool::new(false);
        let mut seen = Vec::new();
        let summary = LogMonitor::new(Duration::ZERO)
            .run(&source, "s1", 0, &cancel, |l| seen.push(l.to_string()))
            .unwrap();
        assert_eq!(summary.exit, MonitorExit::Completed);
        assert_eq!(summary.lines, 3);
        assert_eq!(summary.next_offset, 3);
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(*source.offsets_seen.lock().unwrap(), vec![0, 2]);
    }

    #[test]
    fn stops_on_completion_marker() {
        let source = Scripted::new(vec![batch(&["working", "DONE", "ignored"], 3, false)]);
        let cancel = AtomicBool::new(false);
        let mut count = 0;
        let summary = LogMonitor::new(Duration::ZERO)
            .with_marker("DONE")
            .run(&source, "s1", 0, &cancel, |_| count += 1)
            .unwrap();
        assert_eq!(summary.exit, MonitorExit::Completed);
        assert_eq!(count, 2);
    }

    #[test]
    fn cancel_flag_stops_before_polling() {
        let source = Scripted::new(vec![batch(&["x"], 1, false)]);
        let cancel = AtomicBool::new(true);
        let summary = LogMonitor::new(Duration::ZERO)
            .run(&source, "s1", 7, &cancel, |_| {})
            .unwrap();
        assert_eq!(summary.exit, MonitorExit::Cancelled);
        assert_eq!(summary.next_offset, 7);
        assert!(source.offsets_seen.lock().unwrap().is_empty());
    }

    #[test]
    fn deadline_ends_an_idle_session() {
        let source = Scripted::new(vec![]);
        let cancel = AtomicBool::new(false);
        let summary = LogMonitor::new(Duration::from_millis(1))
            .with_deadline(Duration::from_millis(20))
            .run(&source, "s1", 0, &cancel, |_| {})
            .unwrap();
        assert_eq!(summary.exit, MonitorExit::DeadlineReached);
        assert_eq!(summary.lines, 0);
    }

    #[test]
    fn offset_advances_by_line_count_when_server_echoes_zero() {
        let source = Scripted::new(vec![batch(&["a", "b"], 0, false), batch(&[], 0, true)]);
        let cancel = AtomicBool::new(false);
        let summary = LogMonitor::new(Duration::ZERO)
            .run(&source, "s1", 10, &cancel, |_| {})
            .unwrap();
        assert_eq!(summary.next_offset, 12);
        assert_eq!(*source.offsets_seen.lock().unwrap(), vec![10, 12]);
    }
}
