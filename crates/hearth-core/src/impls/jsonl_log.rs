//! JSON-lines interaction log.
//!
//! One `LogEvent` per line, appended with `O_APPEND` and synced before
//! `append` returns.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::json_file::quarantine_file;
use crate::ports::{InteractionLog, LogEvent, StoreError};

#[derive(Debug, Clone)]
pub struct JsonlInteractionLog {
    path: PathBuf,
}

impl JsonlInteractionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_append(&self) -> Result<fs::File, StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))
    }

    fn truncate_to(&self, len: u64) -> Result<(), StoreError> {
        let file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.set_len(len)
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::io(&self.path, e))
    }
}

impl InteractionLog for JsonlInteractionLog {
    fn append(&self, event: &LogEvent) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(event)
            .map_err(|e| StoreError::Unavailable(format!("failed to serialize event: {e}")))?;
        line.push('\n');

        let mut file = self.open_append()?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| StoreError::io(&self.path, e))
    }

    fn load(&self) -> Result<Vec<LogEvent>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(StoreError::corrupt(self.describe(), "log is not valid UTF-8"));
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let lines: Vec<(usize, &str)> = contents
            .split_inclusive('\n')
            .scan(0usize, |offset, line| {
                let start = *offset;
                *offset += line.len();
                Some((start, line))
            })
            .filter(|(_, line)| !line.trim().is_empty())
            .collect();

        let mut events = Vec::with_capacity(lines.len());
        for (index, (start, line)) in lines.iter().enumerate() {
            match serde_json::from_str::<LogEvent>(line.trim_end()) {
                Ok(event) => events.push(event),
                Err(e) if index + 1 == lines.len() => {
                    // interrupted append
                    warn!(
                        log = %self.describe(),
                        line = index + 1,
                        error = %e,
                        "dropping partially written final log line"
                    );
                    self.truncate_to(*start as u64)?;
                    return Ok(events);
                }
                Err(e) => {
                    return Err(StoreError::corrupt(
                        format!("{}:{}", self.describe(), index + 1),
                        e,
                    ));
                }
            }
        }

        if !contents.is_empty() && !contents.ends_with('\n') {
            let mut file = self.open_append()?;
            file.write_all(b"\n")
                .map_err(|e| StoreError::io(&self.path, e))?;
        }
        Ok(events)
    }

    fn quarantine(&self) -> Result<Option<String>, StoreError> {
        quarantine_file(&self.path)
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Feedback, FeedbackSignal, RecordId};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;
    use ulid::Ulid;

    fn feedback_event() -> LogEvent {
        LogEvent::FeedbackAttached {
            record_id: RecordId::from_ulid(Ulid::new()),
            feedback: Feedback {
                signal: FeedbackSignal::Positive,
                correction: None,
                attached_at: Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap(),
            },
        }
    }

    fn log_in(dir: &TempDir) -> JsonlInteractionLog {
        JsonlInteractionLog::new(dir.path().join("interactions.jsonl"))
    }

    #[test]
    fn appends_one_tagged_line_per_event() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        let (a, b) = (feedback_event(), feedback_event());
        log.append(&a).unwrap();
        log.append(&b).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first["event"], "feedback_attached");

        assert_eq!(log.load().unwrap(), vec![a, b]);
    }

    #[test]
    fn missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(log_in(&dir).load().unwrap().is_empty());
    }

    #[test]
    fn torn_final_line_is_dropped_and_truncated() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        let event = feedback_event();
        log.append(&event).unwrap();
        let good_len = fs::metadata(log.path()).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(b"{\"event\":\"recor").unwrap();

        assert_eq!(log.load().unwrap(), vec![event.clone()]);
        assert_eq!(fs::metadata(log.path()).unwrap().len(), good_len);

        // appends after recovery land on their own line
        log.append(&event).unwrap();
        assert_eq!(log.load().unwrap().len(), 2);
    }

    #[test]
    fn interior_corruption_is_an_error() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.append(&feedback_event()).unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(b"garbage\n").unwrap();
        log.append(&feedback_event()).unwrap();

        let err = log.load().unwrap_err();
        assert!(err.is_corrupt());
        assert!(err.to_string().contains(":2"));

        log.quarantine().unwrap();
        assert!(log.load().unwrap().is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let log = log_in(&dir);
        log.append(&feedback_event()).unwrap();
        log.clear().unwrap();
        log.clear().unwrap();
        assert!(log.load().unwrap().is_empty());
    }
}
