use crate::detection::{BBox, Detection, TrackedDetection, Tracker};
use anyhow::Result;
use std::cmp::Ordering;

/// Tuning knobs for [`IouTracker`]
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Minimum IoU for a detection to continue an existing track
    pub iou_threshold: f32,
    /// Frames a track survives without a match before it is dropped
    pub lost_track_buffer: u32,
    /// Consecutive matches needed before a track gets an id
    pub min_hits: u32,
    /// Minimum confidence for an unmatched detection to start a track
    pub activation_threshold: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            lost_track_buffer: 30,
            min_hits: 1,
            activation_threshold: 0.25,
        }
    }
}

#[derive(Debug, Clone)]
struct Track {
    bbox: BBox,
    class_id: u32,
    hits: u32,
    missing: u32,
    id: Option<u64>,
}

/// Greedy IoU association tracker.
///
/// Detections are matched to live tracks of the same class in descending
/// confidence order. A track is confirmed, and receives the next id, once it
/// has been matched `min_hits` times in a row; detections of unconfirmed tracks
/// are not emitted.
pub struct IouTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
}

impl IouTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl Tracker for IouTracker {
    fn update(&mut self, mut detections: Vec<Detection>) -> Result<Vec<TrackedDetection>> {
        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });

        let mut matched = vec![false; self.tracks.len()];
        let mut output = Vec::with_capacity(detections.len());

        for detection in detections {
            let best = self
                .tracks
                .iter()
                .enumerate()
                .filter(|(i, t)| !matched[*i] && t.class_id == detection.class_id)
                .map(|(i, t)| (i, t.bbox.iou(&detection.bbox)))
                .filter(|(_, iou)| *iou >= self.config.iou_threshold)
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

            match best {
                Some((i, _)) => {
                    matched[i] = true;
                    let track = &mut self.tracks[i];
                    track.bbox = detection.bbox;
                    track.hits += 1;
                    track.missing = 0;
                    if track.id.is_none() && track.hits >= self.config.min_hits {
                        track.id = Some(self.next_id);
                        self.next_id += 1;
                    }
                    if let Some(id) = track.id {
                        output.push(TrackedDetection {
                            detection,
                            tracker_id: Some(id),
                        });
                    }
                }
                None if detection.confidence >= self.config.activation_threshold => {
                    let mut track = Track {
                        bbox: detection.bbox,
                        class_id: detection.class_id,
                        hits: 1,
                        missing: 0,
                        id: None,
                    };
                    if self.config.min_hits <= 1 {
                        track.id = Some(self.next_id);
                        self.next_id += 1;
                        output.push(TrackedDetection {
                            detection,
                            tracker_id: track.id,
                        });
                    }
                    self.tracks.push(track);
                    matched.push(true);
                }
                None => {}
            }
        }

        let lost_track_buffer = self.config.lost_track_buffer;
        let mut index = 0;
        self.tracks.retain_mut(|track| {
            let was_matched = matched[index];
            index += 1;
            if was_matched {
                return true;
            }
            track.missing += 1;
            // unconfirmed tracks need consecutive hits
            if track.id.is_none() {
                return false;
            }
            track.missing <= lost_track_buffer
        });

        Ok(output)
    }

    fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(x: f32, confidence: f32) -> Detection {
        Detection {
            bbox: BBox::from_xywh(x, 100.0, 50.0, 30.0),
            class_id: 2,
            class_name: "car".to_string(),
            confidence,
        }
    }

    #[test]
    fn test_identity_persists_across_frames() {
        let mut tracker = IouTracker::default();
        let first = tracker.update(vec![car(0.0, 0.9), car(300.0, 0.8)]).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].tracker_id, Some(1));
        assert_eq!(first[1].tracker_id, Some(2));

        let second = tracker.update(vec![car(305.0, 0.8), car(5.0, 0.9)]).unwrap();
        let ids: Vec<_> = second.iter().map(|t| (t.detection.bbox.x1, t.tracker_id)).collect();
        assert!(ids.contains(&(5.0, Some(1))));
        assert!(ids.contains(&(305.0, Some(2))));
    }

    #[test]
    fn test_class_mismatch_starts_new_track() {
        let mut tracker = IouTracker::default();
        tracker.update(vec![car(0.0, 0.9)]).unwrap();
        let mut truck = car(0.0, 0.9);
        truck.class_id = 7;
        let out = tracker.update(vec![truck]).unwrap();
        assert_eq!(out[0].tracker_id, Some(2));
    }

    #[test]
    fn test_confirmation_drops_tentative_detections() {
        let mut tracker = IouTracker::new(TrackerConfig {
            min_hits: 3,
            ..TrackerConfig::default()
        });
        assert!(tracker.update(vec![car(0.0, 0.9)]).unwrap().is_empty());
        assert!(tracker.update(vec![car(2.0, 0.9)]).unwrap().is_empty());
        let third = tracker.update(vec![car(4.0, 0.9)]).unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].tracker_id, Some(1));
    }

    #[test]
    fn test_low_confidence_does_not_start_track() {
        let mut tracker = IouTracker::default();
        assert!(tracker.update(vec![car(0.0, 0.1)]).unwrap().is_empty());
        assert_eq!(tracker.tracks.len(), 0);
    }

    #[test]
    fn test_lost_track_expires() {
        let mut tracker = IouTracker::new(TrackerConfig {
            lost_track_buffer: 2,
            ..TrackerConfig::default()
        });
        tracker.update(vec![car(0.0, 0.9)]).unwrap();
        tracker.update(vec![]).unwrap();
        tracker.update(vec![]).unwrap();
        assert_eq!(tracker.tracks.len(), 1);
        tracker.update(vec![]).unwrap();
        assert_eq!(tracker.tracks.len(), 0);

        let out = tracker.update(vec![car(0.0, 0.9)]).unwrap();
        assert_eq!(out[0].tracker_id, Some(2));
    }

    #[test]
    fn test_reset_restarts_ids() {
        let mut tracker = IouTracker::default();
        tracker.update(vec![car(0.0, 0.9)]).unwrap();
        tracker.reset();
        let out = tracker.update(vec![car(500.0, 0.9)]).unwrap();
        assert_eq!(out[0].tracker_id, Some(1));
    }
}
