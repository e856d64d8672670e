use crate::detection::DetectionRecord;
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Add,
    Update,
    Delete,
    Undo,
}

/// One committed annotation edit.
///
/// `before` is the record as it was prior to the action (absent for adds) and
/// `after` the record the action left behind (absent for deletes). `position`
/// is the record's index in the dataset array when the action ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEntry {
    pub action_id: String,
    pub dataset: String,
    pub kind: ActionKind,
    pub record_id: String,
    pub position: usize,
    pub before: Option<DetectionRecord>,
    pub after: Option<DetectionRecord>,
    /// For undo entries, the action that was reverted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub undoes: Option<String>,
    pub at: DateTime<Utc>,
}

impl ActionEntry {
    pub fn new(
        dataset: &str,
        kind: ActionKind,
        record_id: &str,
        position: usize,
        before: Option<DetectionRecord>,
        after: Option<DetectionRecord>,
    ) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            dataset: dataset.to_string(),
            kind,
            record_id: record_id.to_string(),
            position,
            before,
            after,
            undoes: None,
            at: Utc::now(),
        }
    }
}

/// In-memory view of the append-only action log (one JSON entry per line)
#[derive(Debug, Default)]
pub struct ActionHistory {
    entries: Vec<ActionEntry>,
}

impl ActionHistory {
    /// Reads the whole log; a missing log is an empty history
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(log_error(path, e)),
        };

        let entries = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<ActionEntry>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| log_error(path, e))?;
        Ok(Self { entries })
    }

    /// Find an action by id
    pub fn find(&self, action_id: &str) -> Option<&ActionEntry> {
        self.entries.iter().find(|e| e.action_id == action_id)
    }

    /// The undo entry that reverted `action_id`, if any
    pub fn undone_by(&self, action_id: &str) -> Option<&ActionEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == ActionKind::Undo && e.undoes.as_deref() == Some(action_id))
    }

    /// Entries for one dataset, oldest first
    pub fn for_dataset<'a>(&'a self, dataset: &'a str) -> impl Iterator<Item = &'a ActionEntry> {
        self.entries.iter().filter(move |e| e.dataset == dataset)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Appends one entry to the log and syncs it to disk
pub fn append(path: &Path, entry: &ActionEntry) -> StoreResult<()> {
    let mut line = serde_json::to_vec(entry).map_err(|e| log_error(path, e))?;
    line.push(b'\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| log_error(path, e))?;
    file.write_all(&line).map_err(|e| log_error(path, e))?;
    file.sync_data().map_err(|e| log_error(path, e))?;
    Ok(())
}

fn log_error(path: &Path, e: impl std::fmt::Display) -> StoreError {
    StoreError::ActionLog {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;

    fn record(id: &str) -> DetectionRecord {
        DetectionRecord {
            id: id.to_string(),
            tracker_id: Some(1),
            frame_index: 0,
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
            class_id: 2,
            class_name: "car".to_string(),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = ActionHistory::load(&dir.path().join("none.jsonl")).unwrap();
        assert!(history.is_empty());
        assert!(history.iter().next().is_none());
    }

    #[test]
    fn test_append_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.jsonl");

        let add = ActionEntry::new("clip", ActionKind::Add, "a", 0, None, Some(record("a")));
        append(&path, &add).unwrap();
        let mut undo = ActionEntry::new("clip", ActionKind::Undo, "a", 0, Some(record("a")), None);
        undo.undoes = Some(add.action_id.clone());
        append(&path, &undo).unwrap();
        let other = ActionEntry::new("other", ActionKind::Delete, "z", 3, Some(record("z")), None);
        append(&path, &other).unwrap();

        let history = ActionHistory::load(&path).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history.find(&add.action_id), Some(&add));
        assert_eq!(
            history.undone_by(&add.action_id).map(|e| e.action_id.clone()),
            Some(undo.action_id.clone())
        );
        assert!(history.undone_by(&other.action_id).is_none());
        assert_eq!(history.for_dataset("clip").count(), 2);
        assert_eq!(history.iter().last().map(|e| e.kind), Some(ActionKind::Delete));
    }

    #[test]
    fn test_corrupt_log_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.jsonl");
        fs::write(&path, "{not json\n").unwrap();
        assert!(matches!(
            ActionHistory::load(&path),
            Err(StoreError::ActionLog { .. })
        ));
    }
}
