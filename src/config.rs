use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::gateway::DEFAULT_ENCODER;
use crate::engine::{EngineGateway, FfmpegEngine};
use crate::error::{PipelineError, Result};
use crate::gain::DEFAULT_TARGET_PEAK_DB;
use crate::scheduler::Pipeline;

/// Settings read from an optional TOML file; command-line flags override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ffmpeg_path: PathBuf,
    pub encoder: String,
    pub target_peak_db: f64,
    pub out_dir: PathBuf,
    /// Abort an engine invocation after this many seconds. Unset or 0 waits forever.
    pub job_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            encoder: DEFAULT_ENCODER.to_string(),
            target_peak_db: DEFAULT_TARGET_PEAK_DB,
            out_dir: PathBuf::from("."),
            job_timeout_secs: None,
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// A not-yet-loaded ffmpeg engine configured from these settings.
    pub fn build_engine(&self) -> FfmpegEngine {
        FfmpegEngine::new(&self.ffmpeg_path).with_timeout(self.job_timeout())
    }

    pub fn pipeline_for(&self, engine: FfmpegEngine) -> Pipeline<FfmpegEngine> {
        Pipeline::new(EngineGateway::new(engine).with_encoder(&self.encoder))
    }

    pub fn build_pipeline(&self) -> Pipeline<FfmpegEngine> {
        self.pipeline_for(self.build_engine())
    }
}
