//! Frame-rate validation and correction.
//!
//! A video whose container claims `duration × fps` frames but decodes to a
//! different number of frames confuses everything downstream that maps frame
//! indices to timestamps. The corrector detects that mismatch and re-encodes a
//! copy at a constant rate.

use crate::error::{MediaError, MediaResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Container-level facts about a video, gathered without decoding it
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub path: PathBuf,
    /// Average frame rate reported by the container
    pub frame_rate: f64,
    /// Nominal stream rate (`r_frame_rate`), `None` when unknown or non-positive
    pub stream_frame_rate: Option<f64>,
    /// Duration in seconds
    pub duration: f64,
    /// Frame count stored in the stream header, when present
    pub declared_frames: Option<u64>,
}

impl VideoMetadata {
    /// Frames the container promises: round(frame_rate × duration)
    pub fn expected_frames(&self) -> u64 {
        (self.frame_rate * self.duration).round().max(0.0) as u64
    }
}

/// External tooling the corrector depends on
pub trait MediaProbe {
    /// Reads duration and rates from container metadata
    fn probe(&self, video: &Path) -> MediaResult<VideoMetadata>;

    /// Counts frames with an independent decode pass
    fn count_frames(&self, video: &Path) -> MediaResult<u64>;

    /// Re-encodes `input` at a constant `fps` into `output`
    fn reencode(&self, input: &Path, output: &Path, fps: f64) -> MediaResult<()>;
}

/// Outcome of a successful validation
#[derive(Debug, Clone, PartialEq)]
pub enum FrameRateCheck {
    /// Decoded and expected counts agree within tolerance; nothing was written
    Consistent { expected: u64, actual: u64 },
    /// A corrected copy was written next to the original, which is untouched
    Corrected {
        path: PathBuf,
        expected: u64,
        actual: u64,
        fps: f64,
    },
}

impl FrameRateCheck {
    pub fn corrected_path(&self) -> Option<&Path> {
        match self {
            FrameRateCheck::Consistent { .. } => None,
            FrameRateCheck::Corrected { path, .. } => Some(path),
        }
    }
}

pub struct FrameRateCorrector<P: MediaProbe> {
    probe: P,
    tolerance: u64,
    fallback_fps: f64,
}

impl<P: MediaProbe> FrameRateCorrector<P> {
    pub fn new(probe: P, tolerance: u64, fallback_fps: f64) -> Self {
        Self {
            probe,
            tolerance,
            fallback_fps,
        }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Compares the container's expected frame count with the decoded count and,
    /// when they differ by more than the tolerance, re-encodes a copy at
    /// `target_fps` (or the stream's own rate, or the fallback rate).
    ///
    /// The original file is never modified here; see [`replace_original`].
    pub fn validate_and_correct(
        &self,
        video: &Path,
        target_fps: Option<f64>,
    ) -> MediaResult<FrameRateCheck> {
        let metadata = self.probe.probe(video)?;
        let target_fps = target_fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .or(metadata.stream_frame_rate);

        let expected = metadata.expected_frames();
        let actual = self.probe.count_frames(video)?;

        if actual.abs_diff(expected) <= self.tolerance {
            info!(video = %video.display(), expected, actual, "frame count consistent");
            return Ok(FrameRateCheck::Consistent { expected, actual });
        }

        let fps = match target_fps {
            Some(fps) => fps,
            None => {
                warn!(
                    video = %video.display(),
                    fallback = self.fallback_fps,
                    "frame rate unknown, using fallback"
                );
                self.fallback_fps
            }
        };
        warn!(video = %video.display(), expected, actual, fps, "frame count mismatch, re-encoding");

        let corrected = corrected_path(video);
        if let Err(e) = self.probe.reencode(video, &corrected, fps) {
            discard(&corrected);
            return Err(e);
        }

        let target = (fps * metadata.duration).round().max(0.0) as u64;
        let recounted = match self.probe.count_frames(&corrected) {
            Ok(n) => n,
            Err(e) => {
                discard(&corrected);
                return Err(e);
            }
        };
        if recounted.abs_diff(target) > self.tolerance {
            discard(&corrected);
            return Err(MediaError::CorrectionIneffective {
                expected: target,
                actual: recounted,
            });
        }

        info!(corrected = %corrected.display(), frames = recounted, "frame rate corrected");
        Ok(FrameRateCheck::Corrected {
            path: corrected,
            expected,
            actual,
            fps,
        })
    }
}

/// Removes a corrected copy that will not be used
fn discard(corrected: &Path) {
    if !corrected.exists() {
        return;
    }
    if let Err(e) = fs::remove_file(corrected) {
        warn!(path = %corrected.display(), error = %e, "could not remove corrected copy");
    }
}

/// Sibling path used for the re-encoded copy: `clip.mp4` -> `clip.retimed.mp4`
pub fn corrected_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match video.extension() {
        Some(ext) => format!("{}.retimed.{}", stem, ext.to_string_lossy()),
        None => format!("{}.retimed", stem),
    };
    video.with_file_name(name)
}

/// Replaces `original` with `corrected` by deleting the original and renaming
/// the copy into its place.
///
/// This permanently overwrites the source video. If either step fails the
/// corrected copy stays where it is and the error names it, so the caller can
/// clean it up or retry.
pub fn replace_original(original: &Path, corrected: &Path) -> MediaResult<()> {
    let fail = |source| MediaError::ReplaceFailed {
        original: original.to_path_buf(),
        orphan: corrected.to_path_buf(),
        source,
    };
    fs::remove_file(original).map_err(fail)?;
    fs::rename(corrected, original).map_err(fail)?;
    info!(video = %original.display(), "replaced original with corrected copy");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    /// Fake tooling: frame counts per path, re-encode writes a marker file and
    /// registers `round(fps × duration)` frames for the output
    struct FakeProbe {
        duration: f64,
        avg_rate: f64,
        stream_rate: Option<f64>,
        frames: RefCell<HashMap<PathBuf, u64>>,
        reencodes: Cell<usize>,
        fail_encode: bool,
        /// Frames the re-encoded copy misses its target by
        encode_shortfall: u64,
        /// Leave the re-encoded copy uncountable
        unreadable_output: bool,
    }

    impl FakeProbe {
        fn new(video: &Path, duration: f64, avg_rate: f64, decoded: u64) -> Self {
            let mut frames = HashMap::new();
            frames.insert(video.to_path_buf(), decoded);
            Self {
                duration,
                avg_rate,
                stream_rate: Some(avg_rate),
                frames: RefCell::new(frames),
                reencodes: Cell::new(0),
                fail_encode: false,
                encode_shortfall: 0,
                unreadable_output: false,
            }
        }
    }

    impl MediaProbe for FakeProbe {
        fn probe(&self, video: &Path) -> MediaResult<VideoMetadata> {
            Ok(VideoMetadata {
                path: video.to_path_buf(),
                frame_rate: self.avg_rate,
                stream_frame_rate: self.stream_rate,
                duration: self.duration,
                declared_frames: None,
            })
        }

        fn count_frames(&self, video: &Path) -> MediaResult<u64> {
            self.frames
                .borrow()
                .get(video)
                .copied()
                .ok_or_else(|| MediaError::FileNotFound(video.to_path_buf()))
        }

        fn reencode(&self, _input: &Path, output: &Path, fps: f64) -> MediaResult<()> {
            self.reencodes.set(self.reencodes.get() + 1);
            fs::write(output, b"partial")?;
            if self.fail_encode {
                return Err(MediaError::EncodeFailed {
                    exit_code: Some(1),
                    stderr: None,
                });
            }
            fs::write(output, b"corrected")?;
            if !self.unreadable_output {
                let frames = ((fps * self.duration).round() as u64).saturating_sub(self.encode_shortfall);
                self.frames.borrow_mut().insert(output.to_path_buf(), frames);
            }
            Ok(())
        }
    }

    fn video_file(dir: &Path) -> PathBuf {
        let path = dir.join("clip.mp4");
        fs::write(&path, b"original bytes").unwrap();
        path
    }

    #[test]
    fn test_consistent_video_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let video = video_file(dir.path());
        let probe = FakeProbe::new(&video, 10.0, 30.0, 300);
        let corrector = FrameRateCorrector::new(probe, 1, 30.0);

        let check = corrector.validate_and_correct(&video, None).unwrap();
        assert_eq!(
            check,
            FrameRateCheck::Consistent {
                expected: 300,
                actual: 300
            }
        );
        assert_eq!(corrector.probe().reencodes.get(), 0);
        assert_eq!(fs::read(&video).unwrap(), b"original bytes");
        assert!(!corrected_path(&video).exists());
    }

    #[test]
    fn test_off_by_one_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let video = video_file(dir.path());
        let corrector = FrameRateCorrector::new(FakeProbe::new(&video, 10.0, 30.0, 299), 1, 30.0);
        let check = corrector.validate_and_correct(&video, None).unwrap();
        assert!(matches!(check, FrameRateCheck::Consistent { .. }));
    }

    #[test]
    fn test_mismatch_triggers_reencode() {
        let dir = tempfile::tempdir().unwrap();
        let video = video_file(dir.path());
        let corrector = FrameRateCorrector::new(FakeProbe::new(&video, 10.0, 30.0, 295), 1, 30.0);

        let check = corrector.validate_and_correct(&video, Some(25.0)).unwrap();
        let path = check.corrected_path().unwrap().to_path_buf();
        assert_eq!(path, dir.path().join("clip.retimed.mp4"));
        assert_eq!(corrector.probe().reencodes.get(), 1);

        let recount = corrector.probe().count_frames(&path).unwrap();
        assert!(recount.abs_diff(250) <= 1);
        // original is left alone until the caller replaces it
        assert_eq!(fs::read(&video).unwrap(), b"original bytes");

        replace_original(&video, &path).unwrap();
        assert_eq!(fs::read(&video).unwrap(), b"corrected");
        assert!(!path.exists());
    }

    #[test]
    fn test_unknown_rate_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let video = video_file(dir.path());
        let mut probe = FakeProbe::new(&video, 10.0, 30.0, 280);
        probe.stream_rate = None;
        let corrector = FrameRateCorrector::new(probe, 1, 24.0);

        match corrector.validate_and_correct(&video, None).unwrap() {
            FrameRateCheck::Corrected { fps, .. } => assert_eq!(fps, 24.0),
            other => panic!("expected correction, got {:?}", other),
        }
    }

    #[test]
    fn test_ineffective_correction_removes_copy() {
        let dir = tempfile::tempdir().unwrap();
        let video = video_file(dir.path());
        let mut probe = FakeProbe::new(&video, 10.0, 30.0, 200);
        probe.encode_shortfall = 12;
        let corrector = FrameRateCorrector::new(probe, 1, 30.0);

        let err = corrector.validate_and_correct(&video, None).unwrap_err();
        assert!(matches!(
            err,
            MediaError::CorrectionIneffective {
                expected: 300,
                actual: 288
            }
        ));
        assert!(!corrected_path(&video).exists());
        assert_eq!(fs::read(&video).unwrap(), b"original bytes");
    }

    #[test]
    fn test_uncountable_copy_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let video = video_file(dir.path());
        let mut probe = FakeProbe::new(&video, 10.0, 30.0, 200);
        probe.unreadable_output = true;
        let corrector = FrameRateCorrector::new(probe, 1, 30.0);

        assert!(corrector.validate_and_correct(&video, None).is_err());
        assert!(!corrected_path(&video).exists());
    }

    #[test]
    fn test_failed_encode_cleans_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let video = video_file(dir.path());
        let mut probe = FakeProbe::new(&video, 10.0, 30.0, 200);
        probe.fail_encode = true;
        let corrector = FrameRateCorrector::new(probe, 1, 30.0);

        let err = corrector.validate_and_correct(&video, None).unwrap_err();
        assert!(matches!(err, MediaError::EncodeFailed { .. }));
        assert!(!corrected_path(&video).exists());
        assert_eq!(fs::read(&video).unwrap(), b"original bytes");
    }

    #[test]
    fn test_replace_failure_leaves_orphan() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.mp4");
        let corrected = dir.path().join("gone.retimed.mp4");
        fs::write(&corrected, b"corrected").unwrap();

        let err = replace_original(&missing, &corrected).unwrap_err();
        match err {
            MediaError::ReplaceFailed { orphan, .. } => assert_eq!(orphan, corrected),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(corrected.exists());
    }

    #[test]
    fn test_corrected_path() {
        assert_eq!(
            corrected_path(Path::new("/v/my_clip.mp4")),
            PathBuf::from("/v/my_clip.retimed.mp4")
        );
        assert_eq!(corrected_path(Path::new("raw")), PathBuf::from("raw.retimed"));
    }
}
