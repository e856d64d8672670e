use crate::config::Settings;
use crate::dataset::{self, ClassCount, ClassHistogram};
use crate::detection::{DetectionRecord, Detector, Tracker};
use crate::detector;
use crate::frame_rate::{self, FrameRateCheck, FrameRateCorrector, MediaProbe};
use crate::progress::DetectionProgress;
use crate::sink::DetectionSink;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use usls::Image;

/// Aggregate statistics of one processing run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSummary {
    pub dataset: PathBuf,
    pub frames: u64,
    /// Frame count the container declared, if it could be probed
    pub declared_frames: Option<u64>,
    pub records: usize,
    pub tracks: usize,
    pub classes: Vec<ClassCount>,
}

impl ProcessSummary {
    /// Declared frames the decoder never delivered
    pub fn missing_frames(&self) -> u64 {
        self.declared_frames
            .map_or(0, |declared| declared.saturating_sub(self.frames))
    }
}

/// Runs detection and tracking over the frames of one video at a time.
///
/// The processor owns its detector and tracker. Tracking state is only valid
/// when frames arrive strictly in order, which `&mut self` guarantees: one
/// processor cannot run two videos concurrently.
pub struct VideoProcessor<D: Detector, T: Tracker> {
    detector: D,
    tracker: T,
    show_progress: bool,
}

impl<D: Detector, T: Tracker> VideoProcessor<D, T> {
    pub fn new(detector: D, tracker: T) -> Self {
        Self {
            detector,
            tracker,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Detects, tracks and stamps one frame
    pub fn detect_frame(&mut self, frame: &Image, frame_index: u64) -> Result<Vec<DetectionRecord>> {
        let detections = self
            .detector
            .detect(frame)
            .with_context(|| format!("Detection failed on frame {}", frame_index))?;
        let tracked = self
            .tracker
            .update(detections)
            .with_context(|| format!("Tracking failed on frame {}", frame_index))?;
        Ok(tracked
            .into_iter()
            .map(|t| DetectionRecord::new(t, frame_index))
            .collect())
    }

    /// Feeds `frames` through detection and tracking in order, appending every
    /// record to `sink`.
    ///
    /// Stops at the end of the stream or after `declared_frames`, whichever
    /// comes first. Any frame error aborts the run; the frame is never skipped
    /// because the tracker would fall out of step with the written records.
    pub fn process_frames<I>(
        &mut self,
        frames: I,
        declared_frames: Option<u64>,
        frame_rate: f64,
        sink: &mut DetectionSink,
    ) -> Result<ProcessSummary>
    where
        I: IntoIterator<Item = Result<Image>>,
    {
        self.tracker.reset();
        let mut progress = DetectionProgress::new(declared_frames, frame_rate, self.show_progress);
        let mut histogram = ClassHistogram::default();
        let mut tracks = BTreeSet::new();
        let mut frame_index: u64 = 0;

        for frame in frames {
            if declared_frames.is_some_and(|n| frame_index >= n) {
                debug!(frame_index, "declared frame count reached");
                break;
            }
            let frame = frame.with_context(|| format!("Failed to decode frame {}", frame_index))?;
            let records = self.detect_frame(&frame, frame_index)?;
            for record in &records {
                histogram.add(record);
                if let Some(id) = record.tracker_id {
                    tracks.insert(id);
                }
                sink.append(record)?;
            }
            progress.update_frame(records.len());
            frame_index += 1;
        }
        progress.finish();

        Ok(ProcessSummary {
            dataset: sink.path().to_path_buf(),
            frames: frame_index,
            declared_frames,
            records: sink.written(),
            tracks: tracks.len(),
            classes: histogram.into_sorted(),
        })
    }
}

/// Validates the video's frame rate (replacing it with a corrected copy when
/// needed), then runs detection and tracking over it into
/// `<datasets_dir>/<stem>.json`.
pub fn process_video<D, T, P>(
    settings: &Settings,
    video_name: &str,
    processor: &mut VideoProcessor<D, T>,
    corrector: &FrameRateCorrector<P>,
) -> Result<ProcessSummary>
where
    D: Detector,
    T: Tracker,
    P: MediaProbe,
{
    let video_name = dataset::video_file_name(video_name);
    let video_path = settings.videos_dir.join(&video_name);
    if !video_path.is_file() {
        bail!("Video not found: {}", video_path.display());
    }

    match corrector.validate_and_correct(&video_path, None) {
        Ok(FrameRateCheck::Corrected { path, .. }) => {
            frame_rate::replace_original(&video_path, &path)?;
        }
        Ok(FrameRateCheck::Consistent { .. }) => {}
        Err(e) => warn!(video = %video_path.display(), error = %e, "frame rate validation skipped"),
    }

    let (declared_frames, frame_rate) = match corrector.probe().probe(&video_path) {
        Ok(meta) => (
            Some(meta.declared_frames.unwrap_or_else(|| meta.expected_frames())),
            meta.frame_rate,
        ),
        Err(e) => {
            warn!(error = %e, "could not probe video, frame count unknown");
            (None, settings.fallback_fps)
        }
    };

    let data_loader = detector::open_video(&video_path)
        .with_context(|| format!("Failed to open video {}", video_path.display()))?;
    let frames = (&data_loader).into_iter().flatten().map(Ok);

    let dataset_path = settings
        .datasets_dir
        .join(dataset::dataset_file_name(&video_name));
    let mut sink = DetectionSink::create(&dataset_path)?;
    let summary = processor.process_frames(frames, declared_frames, frame_rate, &mut sink)?;
    sink.finish()?;

    // the decoder ends the stream quietly on a bad packet, so a short run is
    // the only sign of it
    if summary.missing_frames() > settings.frame_tolerance {
        warn!(
            video = %video_name,
            decoded = summary.frames,
            declared = ?summary.declared_frames,
            "stream ended before the declared frame count"
        );
    }

    info!(
        video = %video_name,
        dataset = %dataset_path.display(),
        frames = summary.frames,
        records = summary.records,
        tracks = summary.tracks,
        "processed video"
    );
    Ok(summary)
}
