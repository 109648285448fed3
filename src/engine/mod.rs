//! The media engine boundary.
//!
//! The engine is an opaque, stateful, non-reentrant collaborator: it stores named blobs in a
//! working area, runs one command at a time over them, and narrates the run as log lines and
//! progress fractions. Only [`EngineGateway`] talks to it.

pub mod ffmpeg;
pub mod gateway;

use std::io;

use crate::error::Result;

pub use ffmpeg::{CancelHandle, FfmpegEngine};
pub use gateway::EngineGateway;

/// Something the engine reported while a command was running.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Log(String),
    Progress(f32),
}

pub trait Engine {
    /// Bring the engine up. Called once before any other method.
    fn load(&mut self) -> Result<()>;

    fn write_file(&mut self, name: &str, data: &[u8]) -> io::Result<()>;

    fn read_file(&mut self, name: &str) -> io::Result<Vec<u8>>;

    fn delete_file(&mut self, name: &str) -> io::Result<()>;

    /// Run one command to completion. `on_event` receives every log line and progress
    /// update produced by this invocation and nothing else.
    fn exec(&mut self, args: &[String], on_event: &mut dyn FnMut(EngineEvent)) -> Result<()>;
}
