use crate::detection::DetectionRecord;
use crate::error::{StoreError, StoreResult};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Normalizes an uploaded file name for storage in the videos directory
pub fn video_file_name(upload_name: &str) -> String {
    upload_name.trim().replace(' ', "_")
}

/// Dataset file name for a video: `clip.mp4` -> `clip.json`
pub fn dataset_file_name(video_name: &str) -> String {
    let stem = Path::new(video_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| video_name.to_string());
    format!("{}.json", stem)
}

/// Paths export name for a video: `clip.mp4` -> `clip_paths.json`
pub fn paths_file_name(video_name: &str) -> String {
    let dataset = dataset_file_name(video_name);
    format!("{}_paths.json", dataset.trim_end_matches(".json"))
}

/// Resolves a dataset name (`clip` or `clip.json`) inside `datasets_dir`,
/// rejecting anything that could escape it.
pub fn resolve_dataset(datasets_dir: &Path, name: &str) -> StoreResult<PathBuf> {
    let name = name.trim();
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.starts_with('.')
    {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    let file = if name.ends_with(".json") {
        name.to_string()
    } else {
        format!("{}.json", name)
    };
    Ok(datasets_dir.join(file))
}

/// Reads a whole dataset file into memory
pub fn load_records(path: &Path) -> StoreResult<Vec<DetectionRecord>> {
    let bytes = fs::read(path).map_err(|source| StoreError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    parse_records(path, &bytes)
}

pub(crate) fn parse_records(path: &Path, bytes: &[u8]) -> StoreResult<Vec<DetectionRecord>> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Encodes records in the same layout the detection sink writes: a JSON array
/// with one record per line
pub fn encode_records(records: &[DetectionRecord]) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(records.len() * 160 + 4);
    out.push(b'[');
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(b"\n  ");
        serde_json::to_writer(&mut out, record)?;
    }
    if !records.is_empty() {
        out.push(b'\n');
    }
    out.extend_from_slice(b"]\n");
    Ok(out)
}

/// Aggregate statistics over a dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub records: usize,
    pub frames: usize,
    pub tracks: usize,
    pub untracked: usize,
    /// Class histogram, most frequent first
    pub classes: Vec<ClassCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassCount {
    pub class_id: u32,
    pub class_name: String,
    pub count: usize,
}

/// Accumulates per-class counts as records stream past
#[derive(Debug, Default, Clone)]
pub struct ClassHistogram {
    counts: BTreeMap<u32, (String, usize)>,
}

impl ClassHistogram {
    pub fn add(&mut self, record: &DetectionRecord) {
        let entry = self
            .counts
            .entry(record.class_id)
            .or_insert_with(|| (record.class_name.clone(), 0));
        entry.1 += 1;
    }

    /// Counts ordered by frequency, ties broken by class id
    pub fn into_sorted(self) -> Vec<ClassCount> {
        let mut classes: Vec<ClassCount> = self
            .counts
            .into_iter()
            .map(|(class_id, (class_name, count))| ClassCount {
                class_id,
                class_name,
                count,
            })
            .collect();
        classes.sort_by(|a, b| b.count.cmp(&a.count).then(a.class_id.cmp(&b.class_id)));
        classes
    }
}

impl DatasetSummary {
    pub fn from_records(records: &[DetectionRecord]) -> Self {
        let mut frames = BTreeSet::new();
        let mut tracks = BTreeSet::new();
        let mut histogram = ClassHistogram::default();
        let mut untracked = 0;

        for record in records {
            frames.insert(record.frame_index);
            match record.tracker_id {
                Some(id) => {
                    tracks.insert(id);
                }
                None => untracked += 1,
            }
            histogram.add(record);
        }

        Self {
            records: records.len(),
            frames: frames.len(),
            tracks: tracks.len(),
            untracked,
            classes: histogram.into_sorted(),
        }
    }
}
