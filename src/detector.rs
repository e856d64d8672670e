use crate::detection::{BBox, Detection, Detector};
use anyhow::Result;
use std::path::Path;
use tracing::debug;
use usls::{Config, DataLoader, Hbb, Image, models::YOLO};

/// Object detector backed by a usls YOLO model
pub struct YoloDetector {
    model: YOLO,
    min_confidence: f32,
    classes: Vec<String>,
}

impl YoloDetector {
    /// Loads the model described by `config`.
    ///
    /// Detections below `min_confidence` are dropped. When `classes` is not
    /// empty only those class names are kept.
    pub fn new(config: Config, min_confidence: f32, classes: Vec<String>) -> Result<Self> {
        let model = YOLO::new(config.commit()?)?;
        Ok(Self {
            model,
            min_confidence,
            classes,
        })
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Image) -> Result<Vec<Detection>> {
        let ys = self.model.forward(std::slice::from_ref(frame))?;
        let mut detections = Vec::new();
        for y in ys.iter() {
            if let Some(hbbs) = y.hbbs() {
                detections.extend(
                    hbbs.iter()
                        .filter_map(to_detection)
                        .filter(|d| keep(d, self.min_confidence, &self.classes)),
                );
            }
        }
        debug!(count = detections.len(), "frame detections");
        Ok(detections)
    }
}

/// Converts a model box; boxes without a class id cannot be tracked and are dropped
fn to_detection(hbb: &Hbb) -> Option<Detection> {
    let class_id = hbb.id()? as u32;
    Some(Detection {
        bbox: BBox::from_xywh(hbb.xmin(), hbb.ymin(), hbb.width(), hbb.height()),
        class_id,
        class_name: hbb.name().unwrap_or_default().to_string(),
        confidence: hbb.confidence().unwrap_or(0.0),
    })
}

fn keep(detection: &Detection, min_confidence: f32, classes: &[String]) -> bool {
    detection.confidence >= min_confidence
        && detection.bbox.is_valid()
        && (classes.is_empty() || classes.iter().any(|c| *c == detection.class_name))
}

/// Opens a video for single-frame batches, decoded in presentation order
pub fn open_video(path: &Path) -> Result<DataLoader> {
    let source = path.to_string_lossy();
    DataLoader::new(&source)?.with_batch(1).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(class_name: &str, confidence: f32) -> Detection {
        Detection {
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
            class_id: 2,
            class_name: class_name.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_keep_applies_confidence_threshold() {
        assert!(keep(&detection("car", 0.5), 0.25, &[]));
        assert!(keep(&detection("car", 0.25), 0.25, &[]));
        assert!(!keep(&detection("car", 0.1), 0.25, &[]));
    }

    #[test]
    fn test_keep_applies_class_filter() {
        let classes = vec!["car".to_string(), "truck".to_string()];
        assert!(keep(&detection("truck", 0.9), 0.0, &classes));
        assert!(!keep(&detection("person", 0.9), 0.0, &classes));
    }

    #[test]
    fn test_keep_rejects_degenerate_box() {
        let mut d = detection("car", 0.9);
        d.bbox = BBox::new(5.0, 5.0, 5.0, 9.0);
        assert!(!keep(&d, 0.0, &[]));
    }
}
