use anyhow::Result;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use usls::Image;

/// Axis-aligned box in pixel coordinates, serialized as `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// `true` when the corners are ordered (x1 < x2, y1 < y2)
    pub fn is_valid(&self) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2
    }

    /// Intersection over union with another box, 0.0 when disjoint
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One scored, classified box returned by a detector for a single frame
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
}

/// A detection after the tracker has (or has not yet) assigned an identity
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedDetection {
    pub detection: Detection,
    pub tracker_id: Option<u64>,
}

/// Object detection capability: one frame in, scored boxes out
pub trait Detector {
    fn detect(&mut self, frame: &Image) -> Result<Vec<Detection>>;
}

/// Multi-object tracking capability.
///
/// Implementations keep motion history between calls, so `update` must be fed
/// the detections of consecutive frames in order, one stream at a time.
/// Detections the tracker cannot associate or confirm may be dropped.
pub trait Tracker {
    fn update(&mut self, detections: Vec<Detection>) -> Result<Vec<TrackedDetection>>;

    /// Forgets all tracks so the next `update` starts a fresh stream
    fn reset(&mut self);
}

/// One observed object in one frame, as persisted in a dataset file.
///
/// Decoding accepts the flattened sink layout (`x1..y2` or `x_min..y_max`)
/// as well as a `bbox` array, with snake_case or camelCase field names.
/// Rows written by supervision's JSON sink carry no `id` and store a missing
/// tracker id as `""`; such rows get an id derived from their content, so the
/// same file always decodes to the same ids.
/// Encoding always produces the flattened snake_case layout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawRecord")]
pub struct DetectionRecord {
    pub id: String,
    pub tracker_id: Option<u64>,
    pub frame_index: u64,
    pub bbox: BBox,
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
}

impl DetectionRecord {
    /// Builds a record with a freshly generated id
    pub fn new(tracked: TrackedDetection, frame_index: u64) -> Self {
        let TrackedDetection {
            detection,
            tracker_id,
        } = tracked;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracker_id,
            frame_index,
            bbox: detection.bbox,
            class_id: detection.class_id,
            class_name: detection.class_name,
            confidence: detection.confidence,
        }
    }
}

impl Serialize for DetectionRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("DetectionRecord", 10)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("tracker_id", &self.tracker_id)?;
        s.serialize_field("frame_index", &self.frame_index)?;
        s.serialize_field("x1", &self.bbox.x1)?;
        s.serialize_field("y1", &self.bbox.y1)?;
        s.serialize_field("x2", &self.bbox.x2)?;
        s.serialize_field("y2", &self.bbox.y2)?;
        s.serialize_field("class_id", &self.class_id)?;
        s.serialize_field("class_name", &self.class_name)?;
        s.serialize_field("confidence", &self.confidence)?;
        s.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseId {
    Number(u64),
    Text(String),
}

/// Tracker id as a number, a numeric string, or `""`/`null` for none
fn loose_tracker_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    match Option::<LooseId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(LooseId::Number(n)) => Ok(Some(n)),
        Some(LooseId::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(LooseId::Text(s)) => s.trim().parse().map(Some).map_err(de::Error::custom),
    }
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "trackerId", deserialize_with = "loose_tracker_id")]
    tracker_id: Option<u64>,
    #[serde(alias = "frameId", alias = "frame_id")]
    frame_index: u64,
    #[serde(default)]
    bbox: Option<[f32; 4]>,
    #[serde(default, alias = "x_min")]
    x1: Option<f32>,
    #[serde(default, alias = "y_min")]
    y1: Option<f32>,
    #[serde(default, alias = "x_max")]
    x2: Option<f32>,
    #[serde(default, alias = "y_max")]
    y2: Option<f32>,
    #[serde(alias = "classId")]
    class_id: u32,
    #[serde(default, alias = "className")]
    class_name: String,
    confidence: f32,
}

impl TryFrom<RawRecord> for DetectionRecord {
    type Error = String;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let bbox = match (raw.bbox, raw.x1, raw.y1, raw.x2, raw.y2) {
            (Some(b), ..) => BBox::from(b),
            (None, Some(x1), Some(y1), Some(x2), Some(y2)) => BBox::new(x1, y1, x2, y2),
            _ => {
                return Err(format!(
                    "record {} in frame {} has no bounding box",
                    raw.id.as_deref().unwrap_or("without id"),
                    raw.frame_index
                ));
            }
        };
        let id = match raw.id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => content_id(raw.tracker_id, raw.frame_index, &bbox, raw.class_id, raw.confidence),
        };
        Ok(Self {
            id,
            tracker_id: raw.tracker_id,
            frame_index: raw.frame_index,
            bbox,
            class_id: raw.class_id,
            class_name: raw.class_name,
            confidence: raw.confidence,
        })
    }
}

/// Name-based UUID for rows that were written without an id
fn content_id(tracker_id: Option<u64>, frame_index: u64, bbox: &BBox, class_id: u32, confidence: f32) -> String {
    let key = format!(
        "{:?}|{}|{}|{}|{}|{}|{}|{}",
        tracker_id, frame_index, bbox.x1, bbox.y1, bbox.x2, bbox.y2, class_id, confidence
    );
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-5);
        assert_eq!(a.iou(&BBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_bbox_validity() {
        assert!(BBox::new(0.0, 0.0, 1.0, 1.0).is_valid());
        assert!(!BBox::new(5.0, 0.0, 5.0, 1.0).is_valid());
        assert!(!BBox::new(0.0, 3.0, 1.0, 2.0).is_valid());
    }

    #[test]
    fn test_decode_bbox_array_camel_case() {
        let json = r#"{"id":"a","trackerId":1,"frameId":0,"bbox":[0,0,10,10],
            "classId":2,"className":"car","confidence":0.9}"#;
        let record: DetectionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.tracker_id, Some(1));
        assert_eq!(record.frame_index, 0);
        assert_eq!(record.bbox, BBox::new(0.0, 0.0, 10.0, 10.0));
        assert_eq!(record.class_name, "car");
    }

    #[test]
    fn test_decode_flattened_sink_layout() {
        let json = r#"{"id":"b","tracker_id":null,"frame_index":4,"x_min":1.5,"y_min":2,
            "x_max":3,"y_max":4,"class_id":7,"class_name":"truck","confidence":0.4}"#;
        let record: DetectionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.tracker_id, None);
        assert_eq!(record.bbox, BBox::new(1.5, 2.0, 3.0, 4.0));
        assert_eq!(record.class_id, 7);
    }

    #[test]
    fn test_decode_supervision_json_sink_rows() {
        let json = r#"[
            {"x_min": 10.5, "y_min": 20.0, "x_max": 50.0, "y_max": 80.0, "class_id": 2,
             "confidence": 0.87, "tracker_id": 1, "class_name": "car", "frame_index": 0},
            {"x_min": 300.0, "y_min": 40.0, "x_max": 360.0, "y_max": 90.0, "class_id": 7,
             "confidence": 0.31, "tracker_id": "", "class_name": "truck", "frame_index": 0},
            {"x_min": 12.0, "y_min": 21.0, "x_max": 52.0, "y_max": 81.0, "class_id": 2,
             "confidence": 0.85, "tracker_id": "1", "class_name": "car", "frame_index": 1}
        ]"#;
        let records: Vec<DetectionRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].tracker_id, Some(1));
        assert_eq!(records[1].tracker_id, None);
        assert_eq!(records[2].tracker_id, Some(1));
        assert_eq!(records[0].bbox, BBox::new(10.5, 20.0, 50.0, 80.0));
        assert!(records.iter().all(|r| !r.id.is_empty()));
        assert_ne!(records[0].id, records[2].id);

        // ids are stable across decodes so they can be used for edits
        let again: Vec<DetectionRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(again[1].id, records[1].id);
    }

    #[test]
    fn test_decode_rejects_non_numeric_tracker_id() {
        let json = r#"{"x_min":0,"y_min":0,"x_max":1,"y_max":1,"class_id":2,
            "confidence":0.5,"tracker_id":"abc","frame_index":0}"#;
        assert!(serde_json::from_str::<DetectionRecord>(json).is_err());
    }

    #[test]
    fn test_decode_without_box_fails() {
        let json = r#"{"id":"c","frame_index":0,"x1":1,"class_id":2,"confidence":0.5}"#;
        assert!(serde_json::from_str::<DetectionRecord>(json).is_err());
    }

    #[test]
    fn test_encode_is_flattened() {
        let record = DetectionRecord {
            id: "a".into(),
            tracker_id: Some(3),
            frame_index: 9,
            bbox: BBox::new(1.0, 2.0, 3.0, 4.0),
            class_id: 2,
            class_name: "car".into(),
            confidence: 0.5,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["x1"], 1.0);
        assert_eq!(value["y2"], 4.0);
        assert_eq!(value["tracker_id"], 3);
        assert!(value.get("bbox").is_none());

        let back: DetectionRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
