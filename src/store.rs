//! Annotation edits over persisted detection datasets.
//!
//! Every edit is a whole-file read-modify-write. Edits to one dataset are
//! serialized by a per-dataset lock, and the file's SHA-256 is re-checked
//! right before the atomic replace so that writers outside this process are
//! detected rather than overwritten. Each committed edit is appended to an
//! action log from which it can later be undone.

use crate::dataset::{self, encode_records, parse_records};
use crate::detection::{BBox, DetectionRecord};
use crate::error::{StoreError, StoreResult};
use crate::history::{self, ActionEntry, ActionHistory, ActionKind};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

/// File name of the action log inside the datasets directory
pub const ACTION_LOG_FILE: &str = "annotation_actions.jsonl";

/// Editable fields of a detection record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFields {
    pub bbox: BBox,
    pub tracker_id: Option<u64>,
    pub frame_index: u64,
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
}

impl RecordFields {
    fn validate(&self) -> StoreResult<()> {
        if !self.bbox.is_valid() {
            return Err(StoreError::InvalidBox(self.bbox.into()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(StoreError::InvalidConfidence(self.confidence));
        }
        Ok(())
    }

    fn into_record(self, id: String) -> DetectionRecord {
        DetectionRecord {
            id,
            tracker_id: self.tracker_id,
            frame_index: self.frame_index,
            bbox: self.bbox,
            class_id: self.class_id,
            class_name: self.class_name,
            confidence: self.confidence,
        }
    }
}

/// Identifies a committed edit
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub action_id: String,
    pub record_id: String,
}

pub struct AnnotationStore {
    datasets_dir: PathBuf,
    log_path: PathBuf,
    max_retries: u32,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    log_lock: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Name recorded in the action log: the dataset file stem
fn dataset_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn version_of(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Index of the single record with `record_id`
fn position_of(records: &[DetectionRecord], record_id: &str) -> StoreResult<usize> {
    let mut matches = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.id == record_id)
        .map(|(i, _)| i);
    let first = matches
        .next()
        .ok_or_else(|| StoreError::RecordNotFound(record_id.to_string()))?;
    let extra = matches.count();
    if extra > 0 {
        return Err(StoreError::DuplicateId {
            id: record_id.to_string(),
            count: extra + 1,
        });
    }
    Ok(first)
}

impl AnnotationStore {
    pub fn new(datasets_dir: impl Into<PathBuf>, max_retries: u32) -> Self {
        let datasets_dir = datasets_dir.into();
        Self {
            log_path: datasets_dir.join(ACTION_LOG_FILE),
            datasets_dir,
            max_retries,
            locks: Mutex::new(HashMap::new()),
            log_lock: Mutex::new(()),
        }
    }

    /// Current records of a dataset
    pub fn records(&self, dataset: &str) -> StoreResult<Vec<DetectionRecord>> {
        let path = dataset::resolve_dataset(&self.datasets_dir, dataset)?;
        dataset::load_records(&path)
    }

    /// Snapshot of the action log
    pub fn history(&self) -> StoreResult<ActionHistory> {
        let _guard = lock(&self.log_lock);
        ActionHistory::load(&self.log_path)
    }

    /// Inserts a new record with a fresh id at the front of the dataset.
    ///
    /// New records go first, ahead of the existing (chronological) history.
    pub fn add(&self, dataset: &str, fields: RecordFields) -> StoreResult<Receipt> {
        fields.validate()?;
        let path = dataset::resolve_dataset(&self.datasets_dir, dataset)?;
        let record = fields.into_record(uuid::Uuid::new_v4().to_string());

        let dataset_lock = self.dataset_lock(&path);
        let _guard = lock(&dataset_lock);
        let ((), prior) = self.commit(&path, |records| {
            records.insert(0, record.clone());
            Ok(())
        })?;

        let entry = ActionEntry::new(&dataset_name(&path), ActionKind::Add, &record.id, 0, None, Some(record.clone()));
        self.log_or_rollback(&path, &prior, &entry)?;
        info!(dataset, record_id = %record.id, action_id = %entry.action_id, "added record");
        Ok(Receipt {
            action_id: entry.action_id,
            record_id: record.id,
        })
    }

    /// Overwrites every editable field of the record in place
    pub fn update(&self, dataset: &str, record_id: &str, fields: RecordFields) -> StoreResult<Receipt> {
        fields.validate()?;
        let path = dataset::resolve_dataset(&self.datasets_dir, dataset)?;
        let updated = fields.into_record(record_id.to_string());

        let dataset_lock = self.dataset_lock(&path);
        let _guard = lock(&dataset_lock);
        let ((position, before), prior) = self.commit(&path, |records| {
            let position = position_of(records, record_id)?;
            let before = std::mem::replace(&mut records[position], updated.clone());
            Ok((position, before))
        })?;

        let entry = ActionEntry::new(
            &dataset_name(&path),
            ActionKind::Update,
            record_id,
            position,
            Some(before),
            Some(updated),
        );
        self.log_or_rollback(&path, &prior, &entry)?;
        info!(dataset, record_id, action_id = %entry.action_id, "updated record");
        Ok(Receipt {
            action_id: entry.action_id,
            record_id: record_id.to_string(),
        })
    }

    /// Removes the record with `record_id`.
    ///
    /// Exactly one record must carry the id; zero matches is `RecordNotFound`
    /// and several is `DuplicateId`, both without touching the file.
    pub fn delete(&self, dataset: &str, record_id: &str) -> StoreResult<Receipt> {
        let path = dataset::resolve_dataset(&self.datasets_dir, dataset)?;

        let dataset_lock = self.dataset_lock(&path);
        let _guard = lock(&dataset_lock);
        let ((position, removed), prior) = self.commit(&path, |records| {
            let position = position_of(records, record_id)?;
            Ok((position, records.remove(position)))
        })?;

        let entry = ActionEntry::new(&dataset_name(&path), ActionKind::Delete, record_id, position, Some(removed), None);
        self.log_or_rollback(&path, &prior, &entry)?;
        info!(dataset, record_id, action_id = %entry.action_id, "deleted record");
        Ok(Receipt {
            action_id: entry.action_id,
            record_id: record_id.to_string(),
        })
    }

    /// Reverts a committed add, update or delete.
    ///
    /// Any action in the log can be undone once, in any order, as long as the
    /// dataset still allows the inverse (an added record must still exist, a
    /// deleted id must not have been reused). Undo entries cannot be undone.
    pub fn undo(&self, action_id: &str) -> StoreResult<Receipt> {
        let target = self
            .history()?
            .find(action_id)
            .cloned()
            .ok_or_else(|| StoreError::ActionNotFound(action_id.to_string()))?;
        if target.kind == ActionKind::Undo {
            return Err(StoreError::NotUndoable(action_id.to_string()));
        }

        let path = dataset::resolve_dataset(&self.datasets_dir, &target.dataset)?;
        let dataset_lock = self.dataset_lock(&path);
        let _guard = lock(&dataset_lock);

        // re-check under the dataset lock so two undos of one action cannot both apply
        if self.history()?.undone_by(action_id).is_some() {
            return Err(StoreError::AlreadyUndone(action_id.to_string()));
        }

        let precondition = |reason: &str| StoreError::UndoPrecondition {
            action_id: action_id.to_string(),
            reason: reason.to_string(),
        };

        let ((position, before, after), prior) = self.commit(&path, |records| match target.kind {
            ActionKind::Add => {
                let position = match position_of(records, &target.record_id) {
                    Err(StoreError::RecordNotFound(_)) => {
                        return Err(precondition("added record no longer exists"));
                    }
                    other => other?,
                };
                Ok((position, Some(records.remove(position)), None))
            }
            ActionKind::Update => {
                let prior = target
                    .before
                    .clone()
                    .ok_or_else(|| precondition("update entry has no prior value"))?;
                let position = match position_of(records, &target.record_id) {
                    Err(StoreError::RecordNotFound(_)) => {
                        return Err(precondition("updated record no longer exists"));
                    }
                    other => other?,
                };
                if target.after.as_ref() != Some(&records[position]) {
                    return Err(precondition("record changed since the update"));
                }
                let current = std::mem::replace(&mut records[position], prior.clone());
                Ok((position, Some(current), Some(prior)))
            }
            ActionKind::Delete => {
                let prior = target
                    .before
                    .clone()
                    .ok_or_else(|| precondition("delete entry has no prior value"))?;
                if records.iter().any(|r| r.id == target.record_id) {
                    return Err(precondition("record id is in use again"));
                }
                let position = target.position.min(records.len());
                records.insert(position, prior.clone());
                Ok((position, None, Some(prior)))
            }
            ActionKind::Undo => Err(StoreError::NotUndoable(action_id.to_string())),
        })?;

        let mut entry = ActionEntry::new(
            &target.dataset,
            ActionKind::Undo,
            &target.record_id,
            position,
            before,
            after,
        );
        entry.undoes = Some(action_id.to_string());
        self.log_or_rollback(&path, &prior, &entry)?;
        info!(
            dataset = %target.dataset,
            record_id = %target.record_id,
            undone = action_id,
            "undid action"
        );
        Ok(Receipt {
            action_id: entry.action_id,
            record_id: target.record_id,
        })
    }

    fn dataset_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        lock(&self.locks)
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    /// Appends `entry` to the action log. If that fails the dataset is put
    /// back to `prior` so an edit never stands without its undo entry. The
    /// caller must hold the dataset lock.
    fn log_or_rollback(&self, path: &Path, prior: &[u8], entry: &ActionEntry) -> StoreResult<()> {
        let logged = {
            let _guard = lock(&self.log_lock);
            history::append(&self.log_path, entry)
        };
        if let Err(e) = logged {
            warn!(action_id = %entry.action_id, error = %e, "action log append failed, rolling back");
            if let Err(rollback) = self.write_atomic(path, prior) {
                error!(path = %path.display(), error = %rollback, "rollback failed, dataset keeps unlogged edit");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Reads the dataset, applies `mutate` and atomically writes the result.
    /// Returns the mutation's output and the file contents it replaced.
    ///
    /// The caller must hold the dataset lock. If the file changed on disk
    /// between the read and the write, the whole transaction is retried from a
    /// fresh read, up to `max_retries` times.
    fn commit<T>(
        &self,
        path: &Path,
        mut mutate: impl FnMut(&mut Vec<DetectionRecord>) -> StoreResult<T>,
    ) -> StoreResult<(T, Vec<u8>)> {
        let read = |path: &Path| {
            fs::read(path).map_err(|source| StoreError::Unreadable {
                path: path.to_path_buf(),
                source,
            })
        };

        for attempt in 0..=self.max_retries {
            let bytes = read(path)?;
            let version = version_of(&bytes);
            let mut records = parse_records(path, &bytes)?;
            let out = mutate(&mut records)?;

            let encoded = encode_records(&records).map_err(|e| StoreError::WriteFailed {
                path: path.to_path_buf(),
                source: e.into(),
            })?;

            if version_of(&read(path)?) != version {
                warn!(path = %path.display(), attempt, "dataset changed during edit, retrying");
                continue;
            }
            self.write_atomic(path, &encoded)?;
            return Ok((out, bytes));
        }
        Err(StoreError::Conflict(path.display().to_string()))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let write_failed = |source: std::io::Error| StoreError::WriteFailed {
            path: path.to_path_buf(),
            source,
        };
        let dir = path.parent().unwrap_or(self.datasets_dir.as_path());
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_failed)?;
        tmp.write_all(bytes).map_err(write_failed)?;
        tmp.as_file().sync_all().map_err(write_failed)?;
        tmp.persist(path).map_err(|e| write_failed(e.error))?;
        Ok(())
    }
}
