use std::io;

use thiserror::Error;

use crate::models::FileId;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The engine could not be started. Fatal for the session.
    #[error("media engine failed to start: {0}")]
    EngineBootstrap(String),

    #[error("media engine is not ready")]
    EngineNotReady,

    /// A second job was requested while one is still in flight.
    #[error("media engine is busy with job {0}")]
    EngineBusy(u64),

    #[error("media engine invocation failed: {0}")]
    EngineInvocation(String),

    #[error("failed to remove working file {name}: {source}")]
    Cleanup {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Precondition(String),

    #[error("invalid transition for {id}: {reason}")]
    InvalidTransition { id: FileId, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
