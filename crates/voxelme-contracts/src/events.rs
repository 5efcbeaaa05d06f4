use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::themes::Season;

/// Lifecycle facts worth keeping for diagnostics. None of them carry image
/// data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    ImageSelected {
        token: u64,
        source: String,
    },
    ThemeSelected {
        theme: Season,
    },
    GenerationStarted {
        token: u64,
        theme: Season,
        provider: String,
        model: String,
    },
    GenerationSucceeded {
        token: u64,
        produced_at: String,
    },
    GenerationFailed {
        token: u64,
        stage: String,
        kind: String,
        message: String,
    },
    GenerationDiscarded {
        token: u64,
        current_token: u64,
        succeeded: bool,
    },
    SessionReset {
        token: u64,
        superseded_in_flight: bool,
    },
}

#[derive(Serialize)]
struct EventRecord<'a> {
    session_id: &'a str,
    ts: String,
    #[serde(flatten)]
    event: &'a SessionEvent,
}

/// Append-only `events.jsonl` for one session: one compact record per line,
/// `type` plus `session_id` and `ts` alongside the event fields.
#[derive(Debug, Clone)]
pub struct SessionEventLog {
    inner: Arc<SessionEventLogInner>,
}

#[derive(Debug)]
struct SessionEventLogInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl SessionEventLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionEventLogInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    /// Log tagged with a fresh random session id.
    pub fn for_new_session(path: impl Into<PathBuf>) -> Self {
        Self::new(path, uuid::Uuid::new_v4().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Appends `event` and returns the record as written.
    pub fn record(&self, event: &SessionEvent) -> anyhow::Result<Value> {
        let record = serde_json::to_value(EventRecord {
            session_id: &self.inner.session_id,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            event,
        })?;
        let line = serde_json::to_string(&record)?;

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("session event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        writeln!(file, "{line}")?;
        Ok(record)
    }
}
