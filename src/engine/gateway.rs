use std::io;
use std::path::Path;

use tracing::{debug, error, info, warn};

use super::{Engine, EngineEvent};
use crate::error::{PipelineError, Result};
use crate::gain::volume_filter;
use crate::models::{
    normalized_name, Artifact, EngineJob, EngineStatus, FileId, JobId, JobKind, TrackedFile,
    VolumeAnalysis,
};
use crate::parser::parse_volume;

pub const DEFAULT_ENCODER: &str = "libmp3lame";

/// Sole owner of the engine. Every invocation runs under a [`JobGuard`] that fills the
/// single current-job slot and empties it again on every exit path.
pub struct EngineGateway<E: Engine> {
    engine: E,
    status: EngineStatus,
    encoder: String,
    current_job: Option<EngineJob>,
    next_job: u64,
    cleanup_failures: usize,
}

impl<E: Engine> EngineGateway<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            status: EngineStatus::Loading,
            encoder: DEFAULT_ENCODER.to_string(),
            current_job: None,
            next_job: 1,
            cleanup_failures: 0,
        }
    }

    pub fn with_encoder(mut self, encoder: impl Into<String>) -> Self {
        self.encoder = encoder.into();
        self
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status == EngineStatus::Ready
    }

    pub fn current_job(&self) -> Option<&EngineJob> {
        self.current_job.as_ref()
    }

    /// Working files that could not be removed so far.
    pub fn cleanup_failures(&self) -> usize {
        self.cleanup_failures
    }

    /// Bootstrap the engine. A failure is final: later calls report it again without retrying.
    pub fn load(&mut self) -> Result<()> {
        match &self.status {
            EngineStatus::Ready => Ok(()),
            EngineStatus::Failed(message) => Err(PipelineError::EngineBootstrap(message.clone())),
            EngineStatus::Loading => match self.engine.load() {
                Ok(()) => {
                    info!("media engine ready");
                    self.status = EngineStatus::Ready;
                    Ok(())
                }
                Err(e) => {
                    let message = match e {
                        PipelineError::EngineBootstrap(message) => message,
                        other => other.to_string(),
                    };
                    error!(error = %message, "media engine failed to start");
                    self.status = EngineStatus::Failed(message.clone());
                    Err(PipelineError::EngineBootstrap(message))
                }
            },
        }
    }

    fn acquire(&mut self, file: &FileId, kind: JobKind) -> Result<JobGuard<'_, E>> {
        if !self.is_ready() {
            return Err(PipelineError::EngineNotReady);
        }
        if let Some(job) = &self.current_job {
            return Err(PipelineError::EngineBusy(job.id.0));
        }
        let job = EngineJob {
            id: JobId(self.next_job),
            file: file.clone(),
            kind,
        };
        self.next_job += 1;
        debug!(job = %job.id, file = %job.file, ?kind, "engine job acquired");
        self.current_job = Some(job);
        Ok(JobGuard { gateway: self })
    }

    /// Measure peak and mean volume with the `volumedetect` filter.
    pub fn analyze_loudness(&mut self, file: &TrackedFile) -> Result<VolumeAnalysis> {
        let mut guard = self.acquire(&file.id, JobKind::Analyze)?;
        let input = format!("{}-analysis.mp3", guard.job_id());

        let outcome = guard.run_analysis(&file.source.path, &input);
        guard.cleanup(&[&input]);

        if let Ok(result) = &outcome {
            info!(file = %file.id, peak_db = ?result.peak_db, mean_db = ?result.mean_db, "analysis finished");
        }
        outcome
    }

    /// Re-encode the file with a uniform gain and return the result as an artifact.
    pub fn apply_gain(
        &mut self,
        file: &TrackedFile,
        gain_db: f64,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<Artifact> {
        let mut guard = self.acquire(&file.id, JobKind::Normalize { gain_db })?;
        let input = format!("{}-norm-in.mp3", guard.job_id());
        let output = format!("{}-normalized.mp3", guard.job_id());

        let outcome = guard.run_gain(&file.source.path, &input, &output, gain_db, on_progress);
        guard.cleanup(&[&input, &output]);

        let data = outcome?;
        info!(file = %file.id, gain_db, bytes = data.len(), "normalization finished");
        Ok(Artifact::new(normalized_name(file.name()), data))
    }
}

/// Holds the current-job slot for the lifetime of one invocation.
struct JobGuard<'a, E: Engine> {
    gateway: &'a mut EngineGateway<E>,
}

impl<E: Engine> JobGuard<'_, E> {
    fn job_id(&self) -> JobId {
        self.gateway
            .current_job
            .as_ref()
            .map(|job| job.id)
            .unwrap_or(JobId(0))
    }

    fn stage_input(&mut self, source: &Path, name: &str) -> Result<()> {
        let data = std::fs::read(source).map_err(|e| {
            PipelineError::EngineInvocation(format!("failed to read {}: {}", source.display(), e))
        })?;
        self.gateway
            .engine
            .write_file(name, &data)
            .map_err(|e| PipelineError::EngineInvocation(format!("failed to stage {}: {}", name, e)))
    }

    fn run_analysis(&mut self, source: &Path, input: &str) -> Result<VolumeAnalysis> {
        self.stage_input(source, input)?;
        let args = to_args(&[
            "-hide_banner",
            "-nostdin",
            "-i",
            input,
            "-af",
            "volumedetect",
            "-f",
            "null",
            "-",
        ]);
        // The sink lives only for this call, so no other job's lines can reach it.
        let mut lines = Vec::new();
        self.gateway.engine.exec(&args, &mut |event| {
            if let EngineEvent::Log(line) = event {
                lines.push(line);
            }
        })?;
        Ok(parse_volume(&lines))
    }

    fn run_gain(
        &mut self,
        source: &Path,
        input: &str,
        output: &str,
        gain_db: f64,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<Vec<u8>> {
        self.stage_input(source, input)?;
        let filter = volume_filter(gain_db);
        let encoder = self.gateway.encoder.clone();
        let args = to_args(&[
            "-hide_banner",
            "-nostdin",
            "-y",
            "-i",
            input,
            "-af",
            &filter,
            "-c:a",
            &encoder,
            output,
        ]);
        self.gateway.engine.exec(&args, &mut |event| {
            if let EngineEvent::Progress(fraction) = event {
                on_progress(fraction.clamp(0.0, 1.0));
            }
        })?;
        self.gateway
            .engine
            .read_file(output)
            .map_err(|e| PipelineError::EngineInvocation(format!("failed to read {}: {}", output, e)))
    }

    /// Remove working files. Failures are logged and counted, never returned.
    fn cleanup(&mut self, names: &[&str]) {
        for name in names {
            match self.gateway.engine.delete_file(name) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    let failure = PipelineError::Cleanup {
                        name: name.to_string(),
                        source: e,
                    };
                    warn!(job = %self.job_id(), error = %failure, "cleanup failed");
                    self.gateway.cleanup_failures += 1;
                }
            }
        }
    }
}

impl<E: Engine> Drop for JobGuard<'_, E> {
    fn drop(&mut self) {
        if let Some(job) = self.gateway.current_job.take() {
            debug!(job = %job.id, "engine job released");
        }
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}
