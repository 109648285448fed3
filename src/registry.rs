use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::models::{AnalysisState, FileId, IncomingFile, TrackedFile, Transition};

/// Ordered collection of every file in the session and the only place their state changes.
#[derive(Debug, Default)]
pub struct FileRegistry {
    files: Vec<TrackedFile>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register MPEG audio files that are not already tracked, in arrival order.
    /// Returns the ids of the files actually added.
    pub fn add(&mut self, incoming: impl IntoIterator<Item = IncomingFile>) -> Vec<FileId> {
        let mut seen: HashSet<(String, u64, u64)> = self
            .files
            .iter()
            .map(|f| owned_key(&f.source))
            .collect();

        let mut added = Vec::new();
        for source in incoming {
            if !source.is_mpeg_audio() {
                debug!(name = %source.name, "rejected: not MPEG audio");
                continue;
            }
            if !seen.insert(owned_key(&source)) {
                debug!(name = %source.name, "rejected: already registered");
                continue;
            }
            let file = TrackedFile::new(source);
            debug!(file = %file.id, "registered");
            added.push(file.id.clone());
            self.files.push(file);
        }
        added
    }

    /// Apply one transition to the file with `id`. An unknown id is ignored.
    pub fn update_by_id(&mut self, id: &FileId, transition: Transition) -> Result<()> {
        let Some(file) = self.files.iter_mut().find(|f| &f.id == id) else {
            debug!(file = %id, "update for unknown file ignored");
            return Ok(());
        };
        file.apply(transition).map_err(|reason| {
            warn!(file = %id, %reason, "transition rejected");
            PipelineError::InvalidTransition {
                id: id.clone(),
                reason,
            }
        })
    }

    pub fn files(&self) -> &[TrackedFile] {
        &self.files
    }

    pub fn get(&self, id: &FileId) -> Option<&TrackedFile> {
        self.files.iter().find(|f| &f.id == id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Snapshot of the current order.
    pub fn ids(&self) -> Vec<FileId> {
        self.files.iter().map(|f| f.id.clone()).collect()
    }

    pub fn first_pending_analysis(&self) -> Option<&TrackedFile> {
        self.files
            .iter()
            .find(|f| f.analysis == AnalysisState::Pending)
    }

    /// True while any analysis is still waiting or running.
    pub fn is_busy(&self) -> bool {
        self.files
            .iter()
            .any(|f| matches!(f.analysis, AnalysisState::Pending | AnalysisState::Running))
    }
}

fn owned_key(source: &IncomingFile) -> (String, u64, u64) {
    let (name, size, modified) = source.dedup_key();
    (name.to_string(), size, modified)
}
