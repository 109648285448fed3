//! Drives files through analysis and normalization, one engine invocation at a time.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineGateway};
use crate::error::PipelineError;
use crate::gain::{compute_gain, sanitize_target};
use crate::models::{
    Artifact, BatchReport, FileId, IncomingFile, NormalizeState, PipelineEvent, Transition,
};
use crate::registry::FileRegistry;

/// Files awaiting normalization in registry order. Drained strictly one at a time:
/// the next item starts only after the previous one reached a terminal state.
#[derive(Debug, Default)]
pub struct NormalizeQueue {
    pending: VecDeque<FileId>,
}

impl NormalizeQueue {
    /// Capture the registry as it is now. Files added later are not part of this run.
    pub fn snapshot(registry: &FileRegistry) -> Self {
        Self {
            pending: registry.ids().into(),
        }
    }

    pub fn pop(&mut self) -> Option<FileId> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

enum NormalizeOutcome {
    Normalized,
    Failed,
    Skipped,
}

pub struct Pipeline<E: Engine> {
    registry: FileRegistry,
    gateway: EngineGateway<E>,
    events: Option<Sender<PipelineEvent>>,
}

fn emit(events: &Option<Sender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

impl<E: Engine> Pipeline<E> {
    pub fn new(gateway: EngineGateway<E>) -> Self {
        Self {
            registry: FileRegistry::new(),
            gateway,
            events: None,
        }
    }

    /// Publish every state change to `events`.
    pub fn with_events(mut self, events: Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn gateway(&self) -> &EngineGateway<E> {
        &self.gateway
    }

    pub fn load_engine(&mut self) -> crate::error::Result<()> {
        let result = self.gateway.load();
        emit(
            &self.events,
            PipelineEvent::EngineStatus(self.gateway.status().clone()),
        );
        result
    }

    /// Register new files and analyze everything still pending.
    pub fn add_files(&mut self, files: impl IntoIterator<Item = IncomingFile>) -> Vec<FileId> {
        let added = self.registry.add(files);
        for id in &added {
            if let Some(file) = self.registry.get(id) {
                emit(&self.events, PipelineEvent::FileAdded(file.clone()));
            }
        }
        self.drain_analysis();
        added
    }

    /// Analyze the first pending file, if the engine is free. Returns the file handled.
    pub fn step_analysis(&mut self) -> Option<FileId> {
        if !self.gateway.is_ready() || self.gateway.current_job().is_some() {
            return None;
        }
        let file = self.registry.first_pending_analysis()?.clone();
        if !self.transition(&file.id, Transition::AnalysisStarted) {
            return None;
        }

        let transition = match self.gateway.analyze_loudness(&file) {
            Ok(result) => Transition::AnalysisSucceeded(result),
            Err(e) => {
                warn!(file = %file.id, error = %e, "analysis failed");
                Transition::AnalysisFailed(e.to_string())
            }
        };
        self.transition(&file.id, transition);
        Some(file.id)
    }

    /// Keep analyzing until nothing is pending. Returns how many files were handled.
    pub fn drain_analysis(&mut self) -> usize {
        let mut handled = 0;
        while self.step_analysis().is_some() {
            handled += 1;
        }
        handled
    }

    /// Normalize every file currently registered so its peak lands on `target_peak_db`.
    pub fn normalize_all(&mut self, target_peak_db: f64) -> BatchReport {
        let mut report = BatchReport::default();
        if !self.gateway.is_ready() {
            warn!("normalization requested before the media engine is ready");
            return report;
        }

        let target = sanitize_target(target_peak_db);
        let mut queue = NormalizeQueue::snapshot(&self.registry);
        info!(files = queue.len(), target_peak_db = target, "normalization started");
        emit(&self.events, PipelineEvent::BatchStarted { total: queue.len() });

        while let Some(id) = queue.pop() {
            match self.normalize_one(&id, target) {
                NormalizeOutcome::Normalized => report.normalized += 1,
                NormalizeOutcome::Failed => report.failed += 1,
                NormalizeOutcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            normalized = report.normalized,
            failed = report.failed,
            skipped = report.skipped,
            "normalization finished"
        );
        emit(&self.events, PipelineEvent::BatchFinished(report));
        report
    }

    fn normalize_one(&mut self, id: &FileId, target_peak_db: f64) -> NormalizeOutcome {
        let Some(file) = self.registry.get(id).cloned() else {
            return NormalizeOutcome::Skipped;
        };
        if matches!(file.normalize, NormalizeState::Done(_)) {
            debug!(file = %id, "already normalized");
            return NormalizeOutcome::Skipped;
        }
        let Some(peak) = file.known_peak() else {
            let e = PipelineError::Precondition("analysis result unavailable".into());
            warn!(file = %id, error = %e, "cannot normalize");
            self.transition(id, Transition::NormalizeFailed(e.to_string()));
            return NormalizeOutcome::Failed;
        };
        if !self.transition(id, Transition::NormalizeStarted) {
            return NormalizeOutcome::Failed;
        }

        let gain_db = compute_gain(peak, target_peak_db);
        debug!(file = %id, peak_db = peak, gain_db, "applying gain");

        let registry = &mut self.registry;
        let events = &self.events;
        let outcome = self.gateway.apply_gain(&file, gain_db, &mut |fraction| {
            if registry
                .update_by_id(id, Transition::NormalizeProgress(fraction))
                .is_ok()
            {
                emit(
                    events,
                    PipelineEvent::NormalizeProgress {
                        id: id.clone(),
                        fraction,
                    },
                );
            }
        });

        match outcome {
            Ok(artifact) => {
                self.transition(id, Transition::NormalizeSucceeded(artifact));
                NormalizeOutcome::Normalized
            }
            Err(e) => {
                warn!(file = %id, error = %e, "normalization failed");
                self.transition(id, Transition::NormalizeFailed(e.to_string()));
                NormalizeOutcome::Failed
            }
        }
    }

    pub fn artifact(&self, id: &FileId) -> Option<&Artifact> {
        self.registry.get(id).and_then(|f| f.artifact())
    }

    fn transition(&mut self, id: &FileId, transition: Transition) -> bool {
        if self.registry.update_by_id(id, transition).is_err() {
            return false;
        }
        if let Some(file) = self.registry.get(id) {
            emit(&self.events, PipelineEvent::FileUpdated(file.clone()));
        }
        true
    }
}

/// Requests accepted by the pipeline worker, handled strictly in arrival order.
#[derive(Debug)]
pub enum Command {
    AddFiles(Vec<IncomingFile>),
    NormalizeAll { target_peak_db: f64 },
    Shutdown,
}

/// Handle to the single thread that owns the pipeline.
pub struct WorkerHandle<E: Engine> {
    commands: Sender<Command>,
    thread: JoinHandle<Pipeline<E>>,
}

impl<E: Engine> WorkerHandle<E> {
    /// Queue a command. Returns false once the worker has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn add_files(&self, files: Vec<IncomingFile>) -> bool {
        self.send(Command::AddFiles(files))
    }

    pub fn normalize_all(&self, target_peak_db: f64) -> bool {
        self.send(Command::NormalizeAll { target_peak_db })
    }

    /// Stop after the commands already queued and hand the pipeline back.
    pub fn shutdown(self) -> Option<Pipeline<E>> {
        let _ = self.commands.send(Command::Shutdown);
        self.thread.join().ok()
    }
}

/// Run `pipeline` on its own thread. The engine is loaded first; its status is published
/// before any command is processed.
pub fn spawn_worker<E>(pipeline: Pipeline<E>, events: Sender<PipelineEvent>) -> WorkerHandle<E>
where
    E: Engine + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Command>();
    let thread = std::thread::spawn(move || {
        let mut pipeline = pipeline.with_events(events);
        if let Err(e) = pipeline.load_engine() {
            warn!(error = %e, "pipeline worker running without an engine");
        }
        for command in rx {
            match command {
                Command::AddFiles(files) => {
                    pipeline.add_files(files);
                }
                Command::NormalizeAll { target_peak_db } => {
                    pipeline.normalize_all(target_peak_db);
                }
                Command::Shutdown => break,
            }
        }
        pipeline
    });
    WorkerHandle {
        commands: tx,
        thread,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn incoming(name: &str) -> IncomingFile {
        IncomingFile {
            path: PathBuf::from(name),
            name: name.to_string(),
            size: 1,
            modified_ms: 0,
            media_type: None,
            duration_secs: None,
        }
    }

    #[test]
    fn test_queue_is_a_snapshot_in_registry_order() {
        let mut registry = FileRegistry::new();
        let ids = registry.add(vec![incoming("a.mp3"), incoming("b.mp3")]);

        let mut queue = NormalizeQueue::snapshot(&registry);
        registry.add(vec![incoming("c.mp3")]);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().as_ref(), Some(&ids[0]));
        assert_eq!(queue.pop().as_ref(), Some(&ids[1]));
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }
}
