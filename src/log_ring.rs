//! In-process log ring buffer surfaced at `GET /api/logs` (§11.2).
//!
//! Capacity 100, drop-oldest. Every module that wants an entry visible on
//! the operator-facing log endpoint pushes here alongside its `tracing`
//! event, so the two never diverge.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

const CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

pub struct LogRing {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl LogRing {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    pub fn push(&self, level: LogLevel, message: impl Into<String>) {
        let mut entries = self.entries.lock();
        if entries.len() == CAPACITY {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        });
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Emit a `tracing` event and push the same message onto the ring buffer.
#[macro_export]
macro_rules! record {
    ($ring:expr, info, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        tracing::info!("{msg}");
        $ring.push($crate::log_ring::LogLevel::Info, msg);
    }};
    ($ring:expr, warn, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        tracing::warn!("{msg}");
        $ring.push($crate::log_ring::LogLevel::Warning, msg);
    }};
    ($ring:expr, error, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        tracing::error!("{msg}");
        $ring.push($crate::log_ring::LogLevel::Error, msg);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_beyond_capacity() {
        let ring = LogRing::new();
        for i in 0..CAPACITY + 10 {
            ring.push(LogLevel::Info, format!("entry {i}"));
        }
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), CAPACITY);
        assert_eq!(snapshot.first().unwrap().message, "entry 10");
        assert_eq!(snapshot.last().unwrap().message, format!("entry {}", CAPACITY + 9));
    }
}
