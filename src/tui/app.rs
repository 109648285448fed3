use std::path::PathBuf;

use crate::models::{
    AnalysisState, EngineStatus, FileId, NormalizeState, PipelineEvent, TrackedFile,
};

#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Main,
    About,
    /// Typing the path of a file or directory to add.
    AddPath,
}

/// UI-side mirror of the pipeline, rebuilt from worker events.
pub struct App {
    pub files: Vec<TrackedFile>,
    pub engine: EngineStatus,
    pub target_peak_db: f64,
    pub out_dir: PathBuf,
    pub view: View,
    pub selected: usize,
    pub scroll_offset: usize,
    pub should_quit: bool,
    pub batch_running: bool,
    pub message: Option<String>,
    pub input: String,
    /// Visible height of the file table (updated each frame by the renderer)
    pub visible_rows: usize,
}

impl App {
    pub fn new(out_dir: PathBuf, target_peak_db: f64) -> Self {
        Self {
            files: Vec::new(),
            engine: EngineStatus::Loading,
            target_peak_db,
            out_dir,
            view: View::Main,
            selected: 0,
            scroll_offset: 0,
            should_quit: false,
            batch_running: false,
            message: None,
            input: String::new(),
            visible_rows: 20,
        }
    }

    pub fn apply_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::EngineStatus(status) => {
                self.engine = status;
            }
            PipelineEvent::FileAdded(file) => {
                self.files.push(file);
            }
            PipelineEvent::FileUpdated(file) => {
                if let Some(slot) = self.find_mut(&file.id) {
                    *slot = file;
                }
            }
            PipelineEvent::NormalizeProgress { id, fraction } => {
                if let Some(slot) = self.find_mut(&id) {
                    slot.normalize_progress = fraction;
                }
            }
            PipelineEvent::BatchStarted { total } => {
                self.batch_running = true;
                self.message = Some(format!("Normalizing {} files...", total));
            }
            PipelineEvent::BatchFinished(report) => {
                self.batch_running = false;
                self.message = Some(format!(
                    "{} normalized, {} failed, {} skipped",
                    report.normalized, report.failed, report.skipped
                ));
            }
        }
    }

    fn find_mut(&mut self, id: &FileId) -> Option<&mut TrackedFile> {
        self.files.iter_mut().find(|f| &f.id == id)
    }

    pub fn analyzing(&self) -> bool {
        self.files
            .iter()
            .any(|f| matches!(f.analysis, AnalysisState::Pending | AnalysisState::Running))
    }

    pub fn can_normalize(&self) -> bool {
        self.engine == EngineStatus::Ready
            && !self.files.is_empty()
            && !self.analyzing()
            && !self.batch_running
    }

    pub fn analyzed_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.analysis, AnalysisState::Done(_)))
            .count()
    }

    pub fn normalized_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.normalize, NormalizeState::Done(_)))
            .count()
    }

    /// Nudge the target peak, kept on a 0.1 dB grid.
    pub fn adjust_target(&mut self, delta: f64) {
        self.target_peak_db = ((self.target_peak_db + delta) * 10.0).round() / 10.0;
    }

    /// Write the selected file's normalized output into the output directory.
    pub fn save_selected(&mut self) {
        let Some(file) = self.files.get(self.selected) else {
            return;
        };
        let Some(artifact) = file.artifact() else {
            self.message = Some(format!("{} has not been normalized yet", file.name()));
            return;
        };
        let result = std::fs::create_dir_all(&self.out_dir)
            .and_then(|_| artifact.save_in(&self.out_dir));
        self.message = Some(match result {
            Ok(path) => format!("Saved to {}", path.display()),
            Err(e) => format!("Error: {}", e),
        });
    }

    pub fn begin_add_path(&mut self) {
        self.input.clear();
        self.view = View::AddPath;
    }

    pub fn cancel_add_path(&mut self) {
        self.input.clear();
        self.view = View::Main;
    }

    /// Leave the prompt, returning the typed path unless it was blank.
    pub fn take_input_path(&mut self) -> Option<PathBuf> {
        self.view = View::Main;
        let text = std::mem::take(&mut self.input);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }

    pub fn select_next(&mut self) {
        if !self.files.is_empty() {
            self.selected = (self.selected + 1).min(self.files.len() - 1);
            self.ensure_visible();
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
        self.ensure_visible();
    }

    /// Adjust scroll_offset so that self.selected is within the visible window.
    fn ensure_visible(&mut self) {
        if self.visible_rows == 0 {
            return;
        }
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
        } else if self.selected >= self.scroll_offset + self.visible_rows {
            self.scroll_offset = self.selected - self.visible_rows + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Artifact, BatchReport, IncomingFile, Transition, VolumeAnalysis};

    fn file(name: &str) -> TrackedFile {
        TrackedFile::new(IncomingFile {
            path: PathBuf::from(name),
            name: name.to_string(),
            size: 10,
            modified_ms: 0,
            media_type: None,
            duration_secs: None,
        })
    }

    #[test]
    fn test_events_update_mirror() {
        let mut app = App::new(PathBuf::from("."), -1.0);
        let mut a = file("a.mp3");
        app.apply_event(PipelineEvent::EngineStatus(EngineStatus::Ready));
        app.apply_event(PipelineEvent::FileAdded(a.clone()));
        assert!(app.analyzing());
        assert!(!app.can_normalize());

        a.apply(Transition::AnalysisStarted).unwrap();
        a.apply(Transition::AnalysisSucceeded(VolumeAnalysis {
            peak_db: Some(-4.0),
            mean_db: Some(-17.0),
        }))
        .unwrap();
        app.apply_event(PipelineEvent::FileUpdated(a.clone()));
        assert_eq!(app.analyzed_count(), 1);
        assert!(app.can_normalize());

        app.apply_event(PipelineEvent::BatchStarted { total: 1 });
        assert!(!app.can_normalize());
        app.apply_event(PipelineEvent::BatchFinished(BatchReport {
            normalized: 1,
            failed: 0,
            skipped: 0,
        }));
        assert!(app.can_normalize());
        assert_eq!(app.message.as_deref(), Some("1 normalized, 0 failed, 0 skipped"));
    }

    #[test]
    fn test_add_path_prompt() {
        let mut app = App::new(PathBuf::from("."), -1.0);
        app.begin_add_path();
        assert_eq!(app.view, View::AddPath);
        app.input.push_str("  ~/music/album  ");
        assert_eq!(app.take_input_path(), Some(PathBuf::from("~/music/album")));
        assert_eq!(app.view, View::Main);
        assert!(app.input.is_empty());

        app.begin_add_path();
        app.input.push_str("   ");
        assert_eq!(app.take_input_path(), None);

        app.begin_add_path();
        app.input.push('x');
        app.cancel_add_path();
        assert_eq!(app.view, View::Main);
        assert!(app.input.is_empty());
    }

    #[test]
    fn test_adjust_target_stays_on_grid() {
        let mut app = App::new(PathBuf::from("."), -1.0);
        app.adjust_target(0.1);
        app.adjust_target(0.1);
        assert_eq!(app.target_peak_db, -0.8);
        app.adjust_target(-0.3);
        assert_eq!(app.target_peak_db, -1.1);
    }

    #[test]
    fn test_save_selected_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = App::new(dir.path().join("out"), -1.0);
        let mut a = file("a.mp3");
        a.apply(Transition::AnalysisStarted).unwrap();
        a.apply(Transition::AnalysisSucceeded(VolumeAnalysis {
            peak_db: Some(-4.0),
            mean_db: None,
        }))
        .unwrap();
        app.files.push(a.clone());

        app.save_selected();
        assert_eq!(app.message.as_deref(), Some("a.mp3 has not been normalized yet"));

        a.apply(Transition::NormalizeStarted).unwrap();
        a.apply(Transition::NormalizeSucceeded(Artifact::new(
            "a_normalized.mp3".into(),
            b"ID3".to_vec(),
        )))
        .unwrap();
        app.files[0] = a;
        app.save_selected();
        let saved = dir.path().join("out").join("a_normalized.mp3");
        assert_eq!(std::fs::read(saved).unwrap(), b"ID3");
    }
}
