//! Event history persistence - newline-delimited JSON per subject
//!
//! Directory structure:
//! ```text
//! {data_dir}/
//!   subjects/
//!     {subject_id}/
//!       events.jsonl   # Event log (newline-delimited JSON)
//! ```
//!
//! The log can be read back and folded through the reducer to
//! reconstruct a subject's state after a restart.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use rb_core::stream::{apply, EventEnvelope, ExecutionState, ReducerLimits};

use crate::error::{MonitorError, Result};

/// Store for per-subject event history
#[derive(Debug, Clone)]
pub struct EventLogStore {
    /// Base directory for subject logs
    base_dir: PathBuf,
}

impl EventLogStore {
    /// Create a new event log store
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: data_dir.as_ref().join("subjects"),
        }
    }

    fn subject_dir(&self, subject_id: &str) -> PathBuf {
        self.base_dir.join(subject_id)
    }

    fn events_path(&self, subject_id: &str) -> PathBuf {
        self.subject_dir(subject_id).join("events.jsonl")
    }

    /// Subject ids double as directory names; reject anything that
    /// could escape the store
    fn validate_subject_id(subject_id: &str) -> Result<()> {
        if subject_id.is_empty()
            || subject_id == "."
            || subject_id == ".."
            || subject_id.contains('/')
            || subject_id.contains('\\')
        {
            return Err(MonitorError::Core(rb_core::Error::InvalidInput(format!(
                "Invalid subject id: {:?}",
                subject_id
            ))));
        }
        Ok(())
    }

    fn ensure_subject_dir(&self, subject_id: &str) -> Result<PathBuf> {
        let dir = self.subject_dir(subject_id);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    /// Append an envelope to its subject's event log
    pub fn append(&self, event: &EventEnvelope) -> Result<()> {
        Self::validate_subject_id(&event.subject_id)?;
        self.ensure_subject_dir(&event.subject_id)?;
        let path = self.events_path(&event.subject_id);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut writer = BufWriter::new(file);
        let json = event.to_json()?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Load all events for a subject.
    ///
    /// Returns an empty vector when no log exists. Blank lines are
    /// ignored; malformed lines are skipped with a warning.
    pub fn load(&self, subject_id: &str) -> Result<Vec<EventEnvelope>> {
        Self::validate_subject_id(subject_id)?;
        let path = self.events_path(subject_id);

        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!("Failed to read line {} in events file: {}", line_num, e);
                    continue;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            match EventEnvelope::from_json(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(
                        "Failed to parse event at line {} in {}: {}",
                        line_num,
                        path.display(),
                        e
                    );
                    continue;
                }
            }
        }

        Ok(events)
    }

    /// Reconstruct a subject's state by folding its stored history.
    ///
    /// Returns `None` when no events are stored for the subject.
    pub fn replay(
        &self,
        subject_id: &str,
        limits: &ReducerLimits,
    ) -> Result<Option<ExecutionState>> {
        let events = self.load(subject_id)?;

        let mut state = None;
        for event in events {
            state = Some(apply(state, event, limits));
        }

        Ok(state)
    }

    /// List all subjects with a stored event log
    pub fn list_subjects(&self) -> Result<Vec<String>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut subjects: Vec<String> = fs::read_dir(&self.base_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();

        subjects.sort();
        Ok(subjects)
    }

    /// Delete a subject's event history
    pub fn delete(&self, subject_id: &str) -> Result<()> {
        Self::validate_subject_id(subject_id)?;
        let dir = self.subject_dir(subject_id);

        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            debug!("Deleted event log for subject: {}", subject_id);
        }

        Ok(())
    }

    /// Number of stored events for a subject
    pub fn event_count(&self, subject_id: &str) -> Result<u32> {
        Self::validate_subject_id(subject_id)?;
        let path = self.events_path(subject_id);

        if !path.exists() {
            return Ok(0);
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);
        let count = reader
            .lines()
            .filter(|l| l.as_ref().map(|s| !s.trim().is_empty()).unwrap_or(false))
            .count();

        Ok(count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rb_core::stream::ExecutionStatus;
    use tempfile::TempDir;

    fn create_test_store() -> (EventLogStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = EventLogStore::new(temp_dir.path());
        (store, temp_dir)
    }

    #[test]
    fn test_append_and_load() {
        let (store, _temp) = create_test_store();
        let subject_id = uuid::Uuid::new_v4().to_string();

        store
            .append(&EventEnvelope::started(&subject_id, "Build", "agent-1", "api"))
            .unwrap();
        store
            .append(&EventEnvelope::output(&subject_id, "hello\n", false))
            .unwrap();
        store
            .append(&EventEnvelope::completed(&subject_id, "ok", 100))
            .unwrap();

        let events = store.load(&subject_id).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].subject_id, subject_id);
        assert_eq!(store.event_count(&subject_id).unwrap(), 3);
    }

    #[test]
    fn test_load_missing_subject_returns_empty() {
        let (store, _temp) = create_test_store();
        assert!(store.load("never-seen").unwrap().is_empty());
        assert_eq!(store.event_count("never-seen").unwrap(), 0);
    }

    #[test]
    fn test_load_skips_blank_and_malformed_lines() {
        let (store, temp_dir) = create_test_store();
        let subject_id = "task-1";

        store
            .append(&EventEnvelope::started(subject_id, "Build", "agent-1", "api"))
            .unwrap();

        let path = temp_dir
            .path()
            .join("subjects")
            .join(subject_id)
            .join("events.jsonl");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{not valid json").unwrap();
        writeln!(file).unwrap();

        let events = store.load(subject_id).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_replay_reconstructs_state() {
        let (store, _temp) = create_test_store();
        let subject_id = "task-1";

        store
            .append(&EventEnvelope::started(subject_id, "Build", "agent-1", "api"))
            .unwrap();
        store
            .append(&EventEnvelope::output(subject_id, "line1\n", false))
            .unwrap();
        store
            .append(&EventEnvelope::completed(subject_id, "ok", 500))
            .unwrap();

        let state = store
            .replay(subject_id, &ReducerLimits::default())
            .unwrap()
            .unwrap();

        assert_eq!(state.subject_id, subject_id);
        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.stdout, "line1\n");
        assert_eq!(state.result.as_deref(), Some("ok"));
    }

    #[test]
    fn test_replay_without_history_is_none() {
        let (store, _temp) = create_test_store();
        assert!(store
            .replay("task-1", &ReducerLimits::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_list_and_delete_subjects() {
        let (store, _temp) = create_test_store();

        for id in ["task-b", "task-a"] {
            store
                .append(&EventEnvelope::started(id, "X", "agent-1", "api"))
                .unwrap();
        }

        assert_eq!(store.list_subjects().unwrap(), vec!["task-a", "task-b"]);

        store.delete("task-a").unwrap();
        assert_eq!(store.list_subjects().unwrap(), vec!["task-b"]);

        // Deleting an absent subject is a no-op
        store.delete("task-a").unwrap();
    }

    #[test]
    fn test_rejects_path_escaping_subject_ids() {
        let (store, _temp) = create_test_store();

        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(store.load(bad).is_err(), "expected rejection for {:?}", bad);
        }
    }
}
