use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Keys every record owns; a payload cannot replace them.
const RESERVED_KEYS: [&str; 3] = ["type", "session_id", "ts"];

/// One line of `events.jsonl`: the session envelope plus a flat payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub event_type: String,
    pub session_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl EventRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Session log appended to by every pipeline stage. Clones share one file
/// handle, opened on the first event.
#[derive(Debug, Clone)]
pub struct EventWriter {
    log: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            log: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.log.path
    }

    pub fn session_id(&self) -> &str {
        &self.log.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> Result<EventRecord> {
        let record = EventRecord {
            event_type: event_type.to_string(),
            session_id: self.log.session_id.clone(),
            ts: now_utc_iso(),
            payload: payload
                .into_iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
                .collect(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = self
            .log
            .file
            .lock()
            .map_err(|_| anyhow!("session log lock poisoned"))?;
        if file.is_none() {
            *file = Some(open_for_append(&self.log.path)?);
        }
        if let Some(file) = file.as_mut() {
            file.write_all(line.as_bytes())
                .with_context(|| format!("failed appending to {}", self.log.path.display()))?;
        }
        Ok(record)
    }

    /// Every record in the log, oldest first. Lines that do not parse as a
    /// record are skipped.
    pub fn read_all(&self) -> Result<Vec<EventRecord>> {
        if !self.log.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.log.path)
            .with_context(|| format!("failed reading {}", self.log.path.display()))?;
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<EventRecord>(line).ok())
            .collect())
    }
}

fn open_for_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed opening {}", path.display()))
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
