use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trafficpath::cli::{self, Command};
use trafficpath::config::{self, Settings};
use trafficpath::dataset::{self, DatasetSummary};
use trafficpath::detector::YoloDetector;
use trafficpath::ffmpeg::{self, Ffmpeg};
use trafficpath::frame_rate::{self, FrameRateCheck, FrameRateCorrector};
use trafficpath::history::ActionEntry;
use trafficpath::paths;
use trafficpath::store::{AnnotationStore, Receipt};
use trafficpath::tracker::IouTracker;
use trafficpath::video_processor::{self, VideoProcessor};

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

fn print_receipt(receipt: &Receipt) {
    println!("action {} record {}", receipt.action_id, receipt.record_id);
}

fn main() -> Result<()> {
    init_logging();
    let args: cli::Args = argh::from_env();
    let settings = Settings::from_args(&args);
    settings.ensure_dirs()?;

    let store = AnnotationStore::new(&settings.datasets_dir, settings.max_retries);

    match args.command {
        Command::Process(process) => {
            if let Err(e) = ffmpeg::check_ffmpeg_installed() {
                warn!(error = %e, "frame rate validation unavailable");
            }
            let model_config = config::build_model_config(&process)?;
            let detector = YoloDetector::new(model_config, process.confidence, process.class.clone())?;
            let tracker = IouTracker::new(config::tracker_config(&process));
            let mut processor = VideoProcessor::new(detector, tracker).with_progress(!process.headless);
            let corrector = FrameRateCorrector::new(Ffmpeg, settings.frame_tolerance, settings.fallback_fps);

            let summary = video_processor::process_video(&settings, &process.video, &mut processor, &corrector)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Validate(validate) => {
            ffmpeg::check_ffmpeg_installed()?;
            let video = settings.videos_dir.join(dataset::video_file_name(&validate.video));
            let corrector = FrameRateCorrector::new(Ffmpeg, validate.tolerance, settings.fallback_fps);
            match corrector.validate_and_correct(&video, validate.target_fps)? {
                FrameRateCheck::Consistent { expected, actual } => {
                    println!("Frame count consistent: expected {}, decoded {}", expected, actual);
                }
                FrameRateCheck::Corrected { path, expected, actual, fps } => {
                    println!(
                        "Frame count mismatch: expected {}, decoded {}; re-encoded at {:.3} fps",
                        expected, actual, fps
                    );
                    if validate.replace {
                        frame_rate::replace_original(&video, &path)?;
                        println!("Replaced {}", video.display());
                    } else {
                        println!("Corrected copy saved to: {}", path.display());
                    }
                }
            }
        }
        Command::Paths(p) => {
            let dataset_path = dataset::resolve_dataset(&settings.datasets_dir, &p.dataset)?;
            let object_paths = paths::build_paths_from_file(&dataset_path)?;
            let output = match p.output {
                Some(output) => PathBuf::from(output),
                None => settings.datasets_dir.join(dataset::paths_file_name(&p.dataset)),
            };
            paths::write_paths(&object_paths, &output)?;
            info!(paths = object_paths.len(), output = %output.display(), "wrote object paths");
            println!("Paths saved to: {}", output.display());
        }
        Command::Summary(s) => {
            let records = store.records(&s.dataset)?;
            let summary = DatasetSummary::from_records(&records);
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Add(add) => print_receipt(&store.add(&add.dataset, add.fields())?),
        Command::Update(update) => {
            print_receipt(&store.update(&update.dataset, &update.id, update.fields())?)
        }
        Command::Delete(delete) => print_receipt(&store.delete(&delete.dataset, &delete.id)?),
        Command::Undo(undo) => print_receipt(&store.undo(&undo.action_id)?),
        Command::History(h) => {
            let history = store.history().context("Failed to read action log")?;
            let entries: Box<dyn Iterator<Item = &ActionEntry>> = match &h.dataset {
                Some(dataset) => Box::new(history.for_dataset(dataset.trim_end_matches(".json"))),
                None => Box::new(history.iter()),
            };
            for entry in entries {
                println!(
                    "{} {} {:?} {} {}",
                    entry.at.format("%Y-%m-%d %H:%M:%S"),
                    entry.action_id,
                    entry.kind,
                    entry.dataset,
                    entry.record_id
                );
            }
        }
    }

    Ok(())
}
