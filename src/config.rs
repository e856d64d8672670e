use crate::cli::{Args, ProcessArgs};
use crate::tracker::TrackerConfig;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use usls::{Config, NAMES_COCO_80};

/// Runtime settings shared by every subcommand
#[derive(Debug, Clone)]
pub struct Settings {
    pub videos_dir: PathBuf,
    pub datasets_dir: PathBuf,
    /// Frame rate assumed when a video cannot be probed
    pub fallback_fps: f64,
    /// Allowed difference between expected and decoded frame counts
    pub frame_tolerance: u64,
    /// Attempts made after a concurrent dataset write before giving up
    pub max_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            videos_dir: PathBuf::from("./videos"),
            datasets_dir: PathBuf::from("./datasets"),
            fallback_fps: 30.0,
            frame_tolerance: 1,
            max_retries: 3,
        }
    }
}

impl Settings {
    pub fn from_args(args: &Args) -> Self {
        Self {
            videos_dir: PathBuf::from(&args.videos_dir),
            datasets_dir: PathBuf::from(&args.datasets_dir),
            ..Self::default()
        }
    }

    /// Creates the videos and datasets directories if they do not exist
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.videos_dir, &self.datasets_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn tracker_config(args: &ProcessArgs) -> TrackerConfig {
    TrackerConfig {
        iou_threshold: args.iou_threshold,
        lost_track_buffer: args.lost_track_buffer,
        min_hits: args.min_hits.max(1),
        activation_threshold: args.confidence,
    }
}

/// Builds a YOLO detection model configuration from command line arguments
pub fn build_model_config(args: &ProcessArgs) -> Result<Config> {
    let config = Config::yolo()
        .with_model_file(args.model.as_ref().map_or("", String::as_str))
        .with_task("det".parse()?)
        .with_version(args.ver.try_into()?)
        .with_scale(args.scale.parse()?)
        .with_model_dtype(args.dtype.parse()?)
        .with_model_device(args.device.parse()?)
        .with_class_confs(&[args.confidence])
        .with_class_names(&NAMES_COCO_80)
        .with_model_num_dry_run(2);

    Ok(config)
}
