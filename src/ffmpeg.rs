use crate::error::{MediaError, MediaResult};
use crate::frame_rate::{MediaProbe, VideoMetadata};
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Probes and re-encodes videos by shelling out to `ffprobe` and `ffmpeg`
#[derive(Debug, Clone, Default)]
pub struct Ffmpeg;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_frames: Option<String>,
    duration: Option<String>,
}

/// Checks that both ffmpeg and ffprobe are installed and on the PATH
pub fn check_ffmpeg_installed() -> MediaResult<()> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;
    Ok(())
}

fn run_ffprobe(args: &[&str], video: &Path) -> MediaResult<Output> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;
    if !video.exists() {
        return Err(MediaError::FileNotFound(video.to_path_buf()));
    }

    let output = Command::new("ffprobe")
        .args(args)
        .arg(video)
        .stdin(Stdio::null())
        .output()?;

    if !output.status.success() {
        return Err(MediaError::probe_failed(
            format!("ffprobe exited with {}", output.status),
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
        ));
    }
    Ok(output)
}

fn parse_video_stream(stdout: &[u8]) -> MediaResult<FfprobeOutput> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| MediaError::UnparsableProbe(e.to_string()))?;
    if !probe.streams.iter().any(|s| s.codec_type == "video") {
        return Err(MediaError::UnparsableProbe("no video stream".to_string()));
    }
    Ok(probe)
}

/// Parses an ffprobe rate such as "30/1", "30000/1001" or "29.97".
/// "0/0" and other degenerate rates yield `None`.
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => s.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

impl MediaProbe for Ffmpeg {
    fn probe(&self, video: &Path) -> MediaResult<VideoMetadata> {
        let output = run_ffprobe(
            &[
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ],
            video,
        )?;
        let probe = parse_video_stream(&output.stdout)?;
        metadata_from_probe(video, &probe)
    }

    fn count_frames(&self, video: &Path) -> MediaResult<u64> {
        let output = run_ffprobe(
            &[
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-count_frames",
                "-show_entries",
                "stream=codec_type,nb_read_frames",
                "-print_format",
                "json",
            ],
            video,
        )?;
        // -show_entries leaves out the format section
        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| MediaError::UnparsableProbe(e.to_string()))?;
        let streams: Vec<FfprobeStream> = serde_json::from_value(value["streams"].clone())
            .map_err(|e| MediaError::UnparsableProbe(e.to_string()))?;
        streams
            .iter()
            .find(|s| s.codec_type == "video")
            .and_then(|s| s.nb_read_frames.as_deref())
            .and_then(|n| n.trim().parse::<u64>().ok())
            .ok_or_else(|| MediaError::UnparsableProbe("missing nb_read_frames".to_string()))
    }

    fn reencode(&self, input: &Path, output: &Path, fps: f64) -> MediaResult<()> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;
        let filter = format!("fps={}", fps);
        debug!(input = %input.display(), output = %output.display(), %filter, "re-encoding video");

        let result = Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-i"])
            .arg(input)
            .args(["-filter:v", &filter, "-c:a", "copy"])
            .arg(output)
            .stdin(Stdio::null())
            .output()?;

        if !result.status.success() {
            return Err(MediaError::EncodeFailed {
                exit_code: result.status.code(),
                stderr: Some(String::from_utf8_lossy(&result.stderr).to_string()),
            });
        }
        Ok(())
    }
}

fn metadata_from_probe(video: &Path, probe: &FfprobeOutput) -> MediaResult<VideoMetadata> {
    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::UnparsableProbe("no video stream".to_string()))?;

    let duration = probe
        .format
        .duration
        .as_deref()
        .or(stream.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .ok_or_else(|| MediaError::UnparsableProbe("missing duration".to_string()))?;

    let frame_rate = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .ok_or_else(|| MediaError::UnparsableProbe("missing avg_frame_rate".to_string()))?;

    Ok(VideoMetadata {
        path: video.to_path_buf(),
        frame_rate,
        stream_frame_rate: stream.r_frame_rate.as_deref().and_then(parse_frame_rate),
        duration,
        declared_frames: stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.trim().parse::<u64>().ok()),
    })
}
