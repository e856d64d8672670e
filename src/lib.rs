pub mod cli;
pub mod config;
pub mod dataset;
pub mod detection;
pub mod detector;
pub mod error;
pub mod ffmpeg;
pub mod frame_rate;
pub mod history;
pub mod paths;
pub mod progress;
pub mod sink;
pub mod store;
pub mod tracker;
pub mod video_processor;
