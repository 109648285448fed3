//! Peak volume analysis and normalization for MP3 files.
//!
//! Files are registered, measured with ffmpeg's `volumedetect`, then re-encoded with a uniform
//! gain so their peak lands on a chosen target. The engine runs one job at a time; the
//! [`scheduler::Pipeline`] is the only caller.

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod gain;
pub mod intake;
pub mod models;
pub mod parser;
pub mod registry;
pub mod scheduler;
pub mod tui;

pub use error::{PipelineError, Result};
