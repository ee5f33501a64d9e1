// Trading event log: fills, rejections, runtime and API errors.
//
// Producers enqueue without waiting; a background task drains the channel
// and appends to a size-rotated file. A dropped event is acceptable, a
// blocked trading task is not, so nothing here ever surfaces to callers.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Fill,
    Rejection,
    RuntimeError,
    ApiError,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Fill => write!(f, "FILL"),
            EventKind::Rejection => write!(f, "REJECTION"),
            EventKind::RuntimeError => write!(f, "RUNTIME_ERROR"),
            EventKind::ApiError => write!(f, "API_ERROR"),
        }
    }
}

#[derive(Debug)]
struct Event {
    kind: EventKind,
    message: String,
    ts_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Handle to the event log. Cheap to clone; every component gets one from
/// `main` rather than reaching for process-global state.
#[derive(Debug, Clone)]
pub struct EventLog {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventLog {
    /// Spawns the drain task and returns the producer handle.
    pub fn spawn(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let mut writer = RotatingWriter::new(path.into(), max_bytes, backups);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let line = format!("{} - {} - {}\n", event.ts_ms, event.kind, event.message);
                if let Err(e) = writer.append(&line) {
                    // The sink swallows its own failures; diagnostics only.
                    warn!(error = %e, "event log write failed");
                }
            }
        });

        Self { tx }
    }

    /// Non-blocking; errors (closed channel) are ignored by design.
    pub fn publish(&self, kind: EventKind, message: impl Into<String>) {
        let _ = self.tx.send(Event {
            kind,
            message: message.into(),
            ts_ms: now_ms(),
        });
    }
}

/// Append-only file writer with size-based rotation and a bounded number of
/// numbered backups (`log`, `log.1`, .., `log.N`).
struct RotatingWriter {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: Option<File>,
    written: u64,
}

impl RotatingWriter {
    fn new(path: PathBuf, max_bytes: u64, backups: usize) -> Self {
        Self {
            path,
            max_bytes,
            backups,
            file: None,
            written: 0,
        }
    }

    fn append(&mut self, line: &str) -> std::io::Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.written = file.metadata()?.len();
            self.file = Some(file);
        }

        if self.written + line.len() as u64 > self.max_bytes {
            self.rotate()?;
        }

        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes())?;
            self.written += line.len() as u64;
        }
        Ok(())
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.file = None;
        // Shift log.N-1 -> log.N, .., log -> log.1; the oldest falls off.
        for i in (1..self.backups).rev() {
            let from = self.backup_path(i);
            if from.exists() {
                fs::rename(&from, self.backup_path(i + 1))?;
            }
        }
        if self.backups > 0 && self.path.exists() {
            fs::rename(&self.path, self.backup_path(1))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        self.file = Some(file);
        Ok(())
    }

    fn backup_path(&self, i: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{i}"));
        PathBuf::from(name)
    }
}
