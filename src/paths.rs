use crate::dataset;
use crate::detection::{BBox, DetectionRecord};
use crate::error::StoreResult;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Full observed history of one tracked object, as parallel sequences
/// ordered by frame index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPath {
    pub tracker_id: u64,
    pub bboxes: Vec<BBox>,
    pub frame_indices: Vec<u64>,
    pub class_ids: Vec<u32>,
    pub class_names: Vec<String>,
    pub confidences: Vec<f32>,
}

impl ObjectPath {
    fn new(tracker_id: u64) -> Self {
        Self {
            tracker_id,
            bboxes: Vec::new(),
            frame_indices: Vec::new(),
            class_ids: Vec::new(),
            class_names: Vec::new(),
            confidences: Vec::new(),
        }
    }

    fn push(&mut self, record: &DetectionRecord) {
        self.bboxes.push(record.bbox);
        self.frame_indices.push(record.frame_index);
        self.class_ids.push(record.class_id);
        self.class_names.push(record.class_name.clone());
        self.confidences.push(record.confidence);
    }

    fn replace_last(&mut self, record: &DetectionRecord) {
        if let Some(last) = self.bboxes.last_mut() {
            *last = record.bbox;
        }
        if let Some(last) = self.class_ids.last_mut() {
            *last = record.class_id;
        }
        if let Some(last) = self.class_names.last_mut() {
            *last = record.class_name.clone();
        }
        if let Some(last) = self.confidences.last_mut() {
            *last = record.confidence;
        }
    }

}

/// Regroups per-frame records into one path per tracker id.
///
/// Records without a tracker id are skipped. Paths come out in the order their
/// tracker id is first seen; within a path records are stably sorted by frame
/// index and a repeated frame keeps the later record. Missing frames are not
/// interpolated.
pub fn build_paths(records: &[DetectionRecord]) -> Vec<ObjectPath> {
    let mut groups: IndexMap<u64, Vec<&DetectionRecord>> = IndexMap::new();
    for record in records {
        if let Some(tracker_id) = record.tracker_id {
            groups.entry(tracker_id).or_default().push(record);
        }
    }

    groups
        .into_iter()
        .map(|(tracker_id, mut group)| {
            group.sort_by_key(|r| r.frame_index);
            let mut path = ObjectPath::new(tracker_id);
            for record in group {
                if path.frame_indices.last() == Some(&record.frame_index) {
                    path.replace_last(record);
                } else {
                    path.push(record);
                }
            }
            path
        })
        .collect()
}

/// Loads a dataset file and builds its paths
pub fn build_paths_from_file(dataset_path: &Path) -> StoreResult<Vec<ObjectPath>> {
    let records = dataset::load_records(dataset_path)?;
    Ok(build_paths(&records))
}

/// Writes paths as a pretty-printed JSON array
pub fn write_paths(paths: &[ObjectPath], output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(paths)?;
    fs::write(output, json).with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(())
}
