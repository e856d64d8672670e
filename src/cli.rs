use crate::detection::BBox;
use crate::store::RecordFields;
use argh::FromArgs;

/// Traffic video detection, tracking and annotation editing
#[derive(FromArgs, Debug)]
pub struct Args {
    /// directory holding uploaded videos
    #[argh(option, default = "String::from(\"./videos\")")]
    pub videos_dir: String,

    /// directory holding detection datasets and the action log
    #[argh(option, default = "String::from(\"./datasets\")")]
    pub datasets_dir: String,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
pub enum Command {
    Process(ProcessArgs),
    Validate(ValidateArgs),
    Paths(PathsArgs),
    Summary(SummaryArgs),
    Add(AddArgs),
    Update(UpdateArgs),
    Delete(DeleteArgs),
    Undo(UndoArgs),
    History(HistoryArgs),
}

/// Detect and track objects in a video and write its dataset
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "process")]
pub struct ProcessArgs {
    /// video file name inside the videos directory
    #[argh(positional)]
    pub video: String,

    /// model file, defaults to the hub model for the version and scale
    #[argh(option)]
    pub model: Option<String>,

    /// model dtype
    #[argh(option, default = "String::from(\"auto\")")]
    pub dtype: String,

    /// version
    #[argh(option, default = "8.0")]
    pub ver: f32,

    /// device: cuda, cpu, mps
    #[argh(option, default = "String::from(\"cpu:0\")")]
    pub device: String,

    /// scale: n, s, m, l
    #[argh(option, default = "String::from(\"m\")")]
    pub scale: String,

    /// minimum detection confidence
    #[argh(option, default = "0.25")]
    pub confidence: f32,

    /// keep only these class names (repeatable)
    #[argh(option)]
    pub class: Vec<String>,

    /// minimum IoU for a detection to continue a track
    #[argh(option, default = "0.3")]
    pub iou_threshold: f32,

    /// frames a lost track is kept before it is dropped
    #[argh(option, default = "30")]
    pub lost_track_buffer: u32,

    /// consecutive matches before a track is assigned an id
    #[argh(option, default = "1")]
    pub min_hits: u32,

    /// hide the progress bar
    #[argh(switch)]
    pub headless: bool,
}

/// Check a video's frame count against its frame rate and duration
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "validate")]
pub struct ValidateArgs {
    /// video file name inside the videos directory
    #[argh(positional)]
    pub video: String,

    /// frame rate to re-encode at, defaults to the probed rate
    #[argh(option)]
    pub target_fps: Option<f64>,

    /// allowed difference between expected and decoded frame counts
    #[argh(option, default = "1")]
    pub tolerance: u64,

    /// replace the original with the corrected copy
    #[argh(switch)]
    pub replace: bool,
}

/// Build per-object paths from a dataset and write `<name>_paths.json`
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "paths")]
pub struct PathsArgs {
    /// dataset name
    #[argh(positional)]
    pub dataset: String,

    /// output file, defaults to `<name>_paths.json` in the datasets directory
    #[argh(option)]
    pub output: Option<String>,
}

/// Print record, frame, track and class counts of a dataset
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "summary")]
pub struct SummaryArgs {
    /// dataset name
    #[argh(positional)]
    pub dataset: String,
}

/// Insert a new detection record at the front of a dataset
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "add")]
pub struct AddArgs {
    /// dataset name
    #[argh(positional)]
    pub dataset: String,

    /// left edge
    #[argh(option)]
    pub x1: f32,

    /// top edge
    #[argh(option)]
    pub y1: f32,

    /// right edge
    #[argh(option)]
    pub x2: f32,

    /// bottom edge
    #[argh(option)]
    pub y2: f32,

    /// tracker id, omitted for untracked records
    #[argh(option)]
    pub tracker_id: Option<u64>,

    /// frame index
    #[argh(option)]
    pub frame: u64,

    /// class id
    #[argh(option)]
    pub class_id: u32,

    /// class name
    #[argh(option)]
    pub class_name: String,

    /// confidence
    #[argh(option, default = "1.0")]
    pub confidence: f32,
}

impl AddArgs {
    pub fn fields(&self) -> RecordFields {
        RecordFields {
            bbox: BBox::new(self.x1, self.y1, self.x2, self.y2),
            tracker_id: self.tracker_id,
            frame_index: self.frame,
            class_id: self.class_id,
            class_name: self.class_name.clone(),
            confidence: self.confidence,
        }
    }
}

/// Replace the fields of an existing record, keeping its id
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "update")]
pub struct UpdateArgs {
    /// dataset name
    #[argh(positional)]
    pub dataset: String,

    /// record id
    #[argh(positional)]
    pub id: String,

    /// left edge
    #[argh(option)]
    pub x1: f32,

    /// top edge
    #[argh(option)]
    pub y1: f32,

    /// right edge
    #[argh(option)]
    pub x2: f32,

    /// bottom edge
    #[argh(option)]
    pub y2: f32,

    /// tracker id, omitted for untracked records
    #[argh(option)]
    pub tracker_id: Option<u64>,

    /// frame index
    #[argh(option)]
    pub frame: u64,

    /// class id
    #[argh(option)]
    pub class_id: u32,

    /// class name
    #[argh(option)]
    pub class_name: String,

    /// confidence
    #[argh(option, default = "1.0")]
    pub confidence: f32,
}

impl UpdateArgs {
    pub fn fields(&self) -> RecordFields {
        RecordFields {
            bbox: BBox::new(self.x1, self.y1, self.x2, self.y2),
            tracker_id: self.tracker_id,
            frame_index: self.frame,
            class_id: self.class_id,
            class_name: self.class_name.clone(),
            confidence: self.confidence,
        }
    }
}

/// Remove a record from a dataset
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "delete")]
pub struct DeleteArgs {
    /// dataset name
    #[argh(positional)]
    pub dataset: String,

    /// record id
    #[argh(positional)]
    pub id: String,
}

/// Revert a previously committed edit
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "undo")]
pub struct UndoArgs {
    /// action id printed by add, update or delete
    #[argh(positional)]
    pub action_id: String,
}

/// List committed edits, oldest first
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "history")]
pub struct HistoryArgs {
    /// only show edits to this dataset
    #[argh(option)]
    pub dataset: Option<String>,
}
