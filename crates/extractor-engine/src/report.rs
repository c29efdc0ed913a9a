use std::sync::Mutex;

use extractor_contracts::events::{EventPayload, EventWriter};
use serde_json::{json, Value};

use crate::error::ExtractError;

/// Where the pipeline sends operator-visible reports.
pub trait Reporter {
    fn error(&self, error: &ExtractError);
    fn warning(&self, message: &str);
    fn progress(&self, completed: usize, total: usize, label: &str);
    /// Structured milestone (`pass_started`, `item_generated`, ...).
    fn record(&self, event_type: &str, payload: EventPayload);
}

/// Writes every report to `events.jsonl`; errors and progress are echoed to
/// stderr as well.
#[derive(Debug, Clone)]
pub struct EventReporter {
    events: EventWriter,
    echo: bool,
}

impl EventReporter {
    pub fn new(events: EventWriter) -> Self {
        Self { events, echo: true }
    }

    pub fn quiet(events: EventWriter) -> Self {
        Self {
            events,
            echo: false,
        }
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.events.emit(event_type, payload) {
            eprintln!(
                "object-extractor: failed to write {} event to {}: {err:#}",
                event_type,
                self.events.path().display()
            );
        }
    }
}

impl Reporter for EventReporter {
    fn error(&self, error: &ExtractError) {
        if self.echo {
            eprintln!("error: {error}");
        }
        self.emit("error", payload(json!({
            "kind": error.kind(),
            "message": error.to_string(),
        })));
    }

    fn warning(&self, message: &str) {
        if self.echo {
            eprintln!("warning: {message}");
        }
        self.emit("warning", payload(json!({ "message": message })));
    }

    fn progress(&self, completed: usize, total: usize, label: &str) {
        let fraction = if total == 0 {
            1.0
        } else {
            completed as f64 / total as f64
        };
        if self.echo {
            eprintln!("[{completed}/{total}] {label}");
        }
        self.emit("progress", payload(json!({
            "completed": completed,
            "total": total,
            "fraction": fraction,
            "label": label,
        })));
    }

    fn record(&self, event_type: &str, payload: EventPayload) {
        self.emit(event_type, payload);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportEntry {
    Error(ExtractError),
    Warning(String),
    Progress {
        completed: usize,
        total: usize,
        label: String,
    },
    Record {
        event_type: String,
        payload: EventPayload,
    },
}

/// Keeps reports in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    entries: Mutex<Vec<ReportEntry>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ReportEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<ExtractError> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                ReportEntry::Error(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                ReportEntry::Warning(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn progress_fractions(&self) -> Vec<(usize, usize)> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                ReportEntry::Progress {
                    completed, total, ..
                } => Some((completed, total)),
                _ => None,
            })
            .collect()
    }

    pub fn record_types(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                ReportEntry::Record { event_type, .. } => Some(event_type),
                _ => None,
            })
            .collect()
    }

    fn push(&self, entry: ReportEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

impl Reporter for MemoryReporter {
    fn error(&self, error: &ExtractError) {
        self.push(ReportEntry::Error(error.clone()));
    }

    fn warning(&self, message: &str) {
        self.push(ReportEntry::Warning(message.to_string()));
    }

    fn progress(&self, completed: usize, total: usize, label: &str) {
        self.push(ReportEntry::Progress {
            completed,
            total,
            label: label.to_string(),
        });
    }

    fn record(&self, event_type: &str, payload: EventPayload) {
        self.push(ReportEntry::Record {
            event_type: event_type.to_string(),
            payload,
        });
    }
}

pub(crate) fn payload(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use extractor_contracts::events::EventWriter;
    use serde_json::Value;

    use super::{EventReporter, MemoryReporter, Reporter};
    use crate::error::ExtractError;

    #[test]
    fn event_reporter_writes_error_and_progress_events() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-1");
        let reporter = EventReporter::quiet(writer.clone());

        reporter.error(&ExtractError::Fetch("status 404".to_string()));
        reporter.progress(1, 4, "木");

        let events = writer.read_all()?;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "error");
        assert_eq!(events[0].get("kind"), Some(&Value::from("fetch")));
        assert_eq!(events[1].event_type, "progress");
        assert_eq!(events[1].get("fraction"), Some(&Value::from(0.25)));
        Ok(())
    }

    #[test]
    fn memory_reporter_splits_entries_by_kind() {
        let reporter = MemoryReporter::new();
        reporter.warning("skipped");
        reporter.error(&ExtractError::DetectionParse("bad".to_string()));
        reporter.progress(2, 2, "done");

        assert_eq!(reporter.warnings(), vec!["skipped".to_string()]);
        assert_eq!(reporter.errors().len(), 1);
        assert_eq!(reporter.progress_fractions(), vec![(2, 2)]);
        assert_eq!(reporter.entries().len(), 3);
    }
}
