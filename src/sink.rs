use crate::detection::DetectionRecord;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Streams detection records into a JSON array file.
///
/// The opening bracket is written on creation and the closing bracket when the
/// sink is finished or dropped, so an aborted run still leaves a parseable
/// (truncated) array behind. Each record is serialized in full before any of
/// its bytes reach the file.
pub struct DetectionSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: usize,
}

impl DetectionSink {
    /// Creates (or truncates) the dataset file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)
            .with_context(|| format!("Failed to create dataset {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(b"[")?;
        debug!(path = %path.display(), "opened detection sink");
        Ok(Self {
            path,
            writer: Some(writer),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Appends one record to the array
    pub fn append(&mut self, record: &DetectionRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        let writer = self
            .writer
            .as_mut()
            .context("detection sink already finished")?;
        if self.written > 0 {
            writer.write_all(b",")?;
        }
        writer.write_all(b"\n  ")?;
        writer.write_all(&bytes)?;
        self.written += 1;
        Ok(())
    }

    /// Closes the array and flushes the file to disk, returning the record count
    pub fn finish(mut self) -> Result<usize> {
        if let Some(writer) = self.writer.take() {
            close(writer, self.written)
                .with_context(|| format!("Failed to finalize dataset {}", self.path.display()))?;
        }
        Ok(self.written)
    }
}

fn close(mut writer: BufWriter<File>, written: usize) -> std::io::Result<()> {
    if written > 0 {
        writer.write_all(b"\n")?;
    }
    writer.write_all(b"]\n")?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

impl Drop for DetectionSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = close(writer, self.written) {
                warn!(path = %self.path.display(), error = %e, "failed to finalize dataset");
            } else {
                warn!(
                    path = %self.path.display(),
                    records = self.written,
                    "detection sink closed early, dataset truncated"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;

    fn record(id: &str, frame_index: u64) -> DetectionRecord {
        DetectionRecord {
            id: id.to_string(),
            tracker_id: Some(1),
            frame_index,
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
            class_id: 2,
            class_name: "car".to_string(),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_finish_writes_valid_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.json");
        let mut sink = DetectionSink::create(&path).unwrap();
        sink.append(&record("a", 0)).unwrap();
        sink.append(&record("b", 1)).unwrap();
        assert_eq!(sink.finish().unwrap(), 2);

        let records: Vec<DetectionRecord> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].frame_index, 1);
    }

    #[test]
    fn test_empty_run_is_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        DetectionSink::create(&path).unwrap().finish().unwrap();
        let records: Vec<DetectionRecord> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_drop_without_finish_still_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aborted.json");
        {
            let mut sink = DetectionSink::create(&path).unwrap();
            sink.append(&record("a", 0)).unwrap();
        }
        let records: Vec<DetectionRecord> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_second_run_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.json");
        let mut sink = DetectionSink::create(&path).unwrap();
        sink.append(&record("a", 0)).unwrap();
        sink.append(&record("b", 1)).unwrap();
        sink.finish().unwrap();

        let mut sink = DetectionSink::create(&path).unwrap();
        sink.append(&record("c", 0)).unwrap();
        sink.finish().unwrap();

        let records: Vec<DetectionRecord> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "c");
    }
}
