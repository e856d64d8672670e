use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

/// Progress display for the detection loop
pub struct DetectionProgress {
    progress_bar: ProgressBar,
    start_time: Instant,
    total_frames: Option<u64>,
    frame_rate: f64,
    processed_frames: u64,
    detections: u64,
}

impl DetectionProgress {
    /// Creates a bar when the frame count is known and a spinner otherwise.
    /// A hidden tracker still counts but draws nothing.
    pub fn new(total_frames: Option<u64>, frame_rate: f64, visible: bool) -> Self {
        let progress_bar = match (visible, total_frames) {
            (false, _) => ProgressBar::hidden(),
            (true, Some(total)) => {
                let bar = ProgressBar::new(total);
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} frames ({percent}%) | {msg}",
                ) {
                    bar.set_style(style.progress_chars("#>-"));
                }
                bar
            }
            (true, None) => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {pos} frames | {msg}")
                {
                    bar.set_style(style);
                }
                bar
            }
        };
        progress_bar.set_message("Starting...");

        Self {
            progress_bar,
            start_time: Instant::now(),
            total_frames,
            frame_rate: if frame_rate > 0.0 { frame_rate } else { 30.0 },
            processed_frames: 0,
            detections: 0,
        }
    }

    /// Records one processed frame and the number of detections it produced
    pub fn update_frame(&mut self, detections: usize) {
        self.processed_frames += 1;
        self.detections += detections as u64;
        self.progress_bar.inc(1);
        let msg = self.progress_message();
        self.progress_bar.set_message(msg);
    }

    fn progress_message(&self) -> String {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            self.processed_frames as f64 / elapsed
        } else {
            0.0
        };
        let position = format_duration(self.processed_frames as f64 / self.frame_rate);

        match self.total_frames {
            Some(total) if fps > 0.0 => {
                let remaining = total.saturating_sub(self.processed_frames);
                format!(
                    "{} | {} detections | Speed: {:.1} fps | ETA: {}",
                    position,
                    self.detections,
                    fps,
                    format_duration(remaining as f64 / fps)
                )
            }
            _ => format!(
                "{} | {} detections | Speed: {:.1} fps",
                position, self.detections, fps
            ),
        }
    }

    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let avg_fps = if elapsed > 0.0 {
            self.processed_frames as f64 / elapsed
        } else {
            0.0
        };
        self.progress_bar.finish_with_message(format!(
            "Completed! Video: {} | {} detections | Processing: {} | Avg FPS: {:.1}",
            format_duration(self.processed_frames as f64 / self.frame_rate),
            self.detections,
            format_duration(elapsed),
            avg_fps
        ));
    }
}

/// Formats a duration in seconds to h:mm:ss format
fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0:00");
        assert_eq!(format_duration(90.0), "1:30");
        assert_eq!(format_duration(3661.0), "1:01:01");
    }

    #[test]
    fn test_hidden_progress_counts() {
        let mut progress = DetectionProgress::new(Some(10), 25.0, false);
        progress.update_frame(3);
        progress.update_frame(0);
        progress.finish();
        assert_eq!(progress.processed_frames, 2);
        assert_eq!(progress.detections, 3);
    }

    #[test]
    fn test_invalid_frame_rate_falls_back() {
        let progress = DetectionProgress::new(None, 0.0, false);
        assert_eq!(progress.frame_rate, 30.0);
    }
}
