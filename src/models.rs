use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub const MPEG_AUDIO_MIME: &str = "audio/mpeg";

/// Stable identity of a tracked file: `name-size-mtime-<random hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileId(String);

impl FileId {
    pub fn generate(source: &IncomingFile) -> Self {
        Self(format!(
            "{}-{}-{}-{:08x}",
            source.name,
            source.size,
            source.modified_ms,
            rand::random::<u32>()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file offered for intake. The content is only ever read from `path`.
#[derive(Debug, Clone, Serialize)]
pub struct IncomingFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub modified_ms: u64,
    /// Media type declared by the container, if one could be sniffed.
    pub media_type: Option<String>,
    pub duration_secs: Option<f64>,
}

impl IncomingFile {
    /// Key used to reject files that look identical to one already registered.
    pub fn dedup_key(&self) -> (&str, u64, u64) {
        (&self.name, self.size, self.modified_ms)
    }

    pub fn is_mpeg_audio(&self) -> bool {
        self.media_type.as_deref() == Some(MPEG_AUDIO_MIME) || has_mp3_suffix(&self.name)
    }
}

/// Case-insensitive `.mp3` suffix check.
pub fn has_mp3_suffix(name: &str) -> bool {
    mp3_suffix_start(name).is_some()
}

fn mp3_suffix_start(name: &str) -> Option<usize> {
    let start = name.len().checked_sub(4)?;
    if name.is_char_boundary(start) && name[start..].eq_ignore_ascii_case(".mp3") {
        Some(start)
    } else {
        None
    }
}

/// Output name for a normalized file: `song.MP3` becomes `song_normalized.mp3`.
pub fn normalized_name(name: &str) -> String {
    let stem = match mp3_suffix_start(name) {
        Some(start) => &name[..start],
        None => name,
    };
    format!("{}_normalized.mp3", stem)
}

/// Result of a volume measurement. `None` means the engine never reported the figure.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VolumeAnalysis {
    pub peak_db: Option<f64>,
    pub mean_db: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum AnalysisState {
    Pending,
    Running,
    Done(VolumeAnalysis),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum NormalizeState {
    Idle,
    Processing,
    Done(Artifact),
    Error(String),
}

/// A normalized output held in memory until the user saves it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub name: String,
    pub mime_type: &'static str,
    pub size: u64,
    #[serde(skip_serializing)]
    data: Arc<[u8]>,
}

impl Artifact {
    pub fn new(name: String, data: Vec<u8>) -> Self {
        Self {
            name,
            mime_type: MPEG_AUDIO_MIME,
            size: data.len() as u64,
            data: data.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Write the artifact into `dir` under its own name, returning the full path.
    ///
    /// Existing files are never overwritten: when `song_normalized.mp3` is taken the artifact
    /// lands in `song_normalized-2.mp3`, then `-3`, and so on.
    pub fn save_in(&self, dir: &Path) -> io::Result<PathBuf> {
        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let path = dir.join(numbered_name(&self.name, attempt));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&self.data)?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free file name for {} in {}", self.name, dir.display()),
        ))
    }
}

const MAX_SAVE_ATTEMPTS: u32 = 1000;

/// `name` for the first attempt, `stem-N.ext` after that.
fn numbered_name(name: &str, attempt: u32) -> String {
    if attempt == 1 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, attempt, ext),
        _ => format!("{}-{}", name, attempt),
    }
}

/// One user-supplied file and where it is in the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedFile {
    pub id: FileId,
    pub source: IncomingFile,
    pub analysis: AnalysisState,
    pub normalize: NormalizeState,
    pub normalize_progress: f32,
}

impl TrackedFile {
    pub fn new(source: IncomingFile) -> Self {
        Self {
            id: FileId::generate(&source),
            source,
            analysis: AnalysisState::Pending,
            normalize: NormalizeState::Idle,
            normalize_progress: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    /// The measured peak, if analysis finished and reported one.
    pub fn known_peak(&self) -> Option<f64> {
        match &self.analysis {
            AnalysisState::Done(result) => result.peak_db,
            _ => None,
        }
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match &self.normalize {
            NormalizeState::Done(artifact) => Some(artifact),
            _ => None,
        }
    }

    /// Apply one lifecycle transition, or explain why it is not allowed from the current state.
    pub fn apply(&mut self, transition: Transition) -> Result<(), String> {
        match transition {
            Transition::AnalysisStarted => {
                if self.analysis != AnalysisState::Pending {
                    return Err("analysis can only start from pending".into());
                }
                self.analysis = AnalysisState::Running;
            }
            Transition::AnalysisSucceeded(result) => {
                self.require_analysis_running()?;
                self.analysis = AnalysisState::Done(result);
            }
            Transition::AnalysisFailed(message) => {
                self.require_analysis_running()?;
                self.analysis = AnalysisState::Error(message);
            }
            Transition::NormalizeStarted => {
                if !matches!(self.normalize, NormalizeState::Idle | NormalizeState::Error(_)) {
                    return Err("normalization can only start from idle or error".into());
                }
                if self.known_peak().is_none() {
                    return Err("normalization requires a known peak".into());
                }
                self.normalize = NormalizeState::Processing;
                self.normalize_progress = 0.0;
            }
            Transition::NormalizeProgress(fraction) => {
                self.require_processing()?;
                self.normalize_progress = fraction.clamp(0.0, 1.0);
            }
            Transition::NormalizeSucceeded(artifact) => {
                self.require_processing()?;
                self.normalize = NormalizeState::Done(artifact);
                self.normalize_progress = 1.0;
            }
            Transition::NormalizeFailed(message) => {
                if matches!(self.normalize, NormalizeState::Done(_)) {
                    return Err("normalization already completed".into());
                }
                self.normalize = NormalizeState::Error(message);
            }
        }
        Ok(())
    }

    fn require_analysis_running(&self) -> Result<(), String> {
        if self.analysis == AnalysisState::Running {
            Ok(())
        } else {
            Err("analysis is not running".into())
        }
    }

    fn require_processing(&self) -> Result<(), String> {
        if self.normalize == NormalizeState::Processing {
            Ok(())
        } else {
            Err("normalization is not in progress".into())
        }
    }
}

/// A partial state change applied through the registry.
#[derive(Debug, Clone)]
pub enum Transition {
    AnalysisStarted,
    AnalysisSucceeded(VolumeAnalysis),
    AnalysisFailed(String),
    NormalizeStarted,
    NormalizeProgress(f32),
    NormalizeSucceeded(Artifact),
    NormalizeFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JobKind {
    Analyze,
    Normalize { gain_db: f64 },
}

/// The one engine invocation currently in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineJob {
    pub id: JobId,
    pub file: FileId,
    pub kind: JobKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum EngineStatus {
    Loading,
    Ready,
    Failed(String),
}

/// Sent from the pipeline worker to observers (TUI, CLI reporting).
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    EngineStatus(EngineStatus),
    FileAdded(TrackedFile),
    FileUpdated(TrackedFile),
    NormalizeProgress { id: FileId, fraction: f32 },
    BatchStarted { total: usize },
    BatchFinished(BatchReport),
}

/// Outcome counts of one normalize-all run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub normalized: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(name: &str) -> IncomingFile {
        IncomingFile {
            path: PathBuf::from(name),
            name: name.to_string(),
            size: 1024,
            modified_ms: 1_700_000_000_000,
            media_type: None,
            duration_secs: None,
        }
    }

    fn analyzed(peak: Option<f64>) -> TrackedFile {
        let mut file = TrackedFile::new(incoming("a.mp3"));
        file.apply(Transition::AnalysisStarted).unwrap();
        file.apply(Transition::AnalysisSucceeded(VolumeAnalysis {
            peak_db: peak,
            mean_db: Some(-20.0),
        }))
        .unwrap();
        file
    }

    #[test]
    fn test_normalized_name() {
        assert_eq!(normalized_name("song.mp3"), "song_normalized.mp3");
        assert_eq!(normalized_name("SONG.MP3"), "SONG_normalized.mp3");
        assert_eq!(normalized_name("take.two.Mp3"), "take.two_normalized.mp3");
        assert_eq!(normalized_name("noext"), "noext_normalized.mp3");
        assert_eq!(normalized_name("ö.mp3"), "ö_normalized.mp3");
    }

    #[test]
    fn test_is_mpeg_audio() {
        assert!(incoming("track.MP3").is_mpeg_audio());
        assert!(!incoming("track.wav").is_mpeg_audio());
        let mut sniffed = incoming("untitled");
        sniffed.media_type = Some(MPEG_AUDIO_MIME.to_string());
        assert!(sniffed.is_mpeg_audio());
    }

    #[test]
    fn test_ids_disambiguate_identical_sources() {
        let a = FileId::generate(&incoming("a.mp3"));
        let b = FileId::generate(&incoming("a.mp3"));
        assert!(a.as_str().starts_with("a.mp3-1024-1700000000000-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_analysis_transitions() {
        let mut file = TrackedFile::new(incoming("a.mp3"));
        assert!(file.apply(Transition::AnalysisSucceeded(VolumeAnalysis::default())).is_err());
        file.apply(Transition::AnalysisStarted).unwrap();
        assert!(file.apply(Transition::AnalysisStarted).is_err());
        file.apply(Transition::AnalysisFailed("boom".into())).unwrap();
        assert_eq!(file.analysis, AnalysisState::Error("boom".into()));
    }

    #[test]
    fn test_normalize_requires_known_peak() {
        let mut file = analyzed(None);
        assert!(file.apply(Transition::NormalizeStarted).is_err());
        assert_eq!(file.normalize, NormalizeState::Idle);

        let mut pending = TrackedFile::new(incoming("b.mp3"));
        assert!(pending.apply(Transition::NormalizeStarted).is_err());
    }

    #[test]
    fn test_save_in_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let first = Artifact::new("01_normalized.mp3".into(), b"FIRST".to_vec());
        let second = Artifact::new("01_normalized.mp3".into(), b"SECOND!".to_vec());
        let third = Artifact::new("01_normalized.mp3".into(), b"THIRD".to_vec());

        let a = first.save_in(dir.path()).unwrap();
        let b = second.save_in(dir.path()).unwrap();
        let c = third.save_in(dir.path()).unwrap();

        assert_eq!(a, dir.path().join("01_normalized.mp3"));
        assert_eq!(b, dir.path().join("01_normalized-2.mp3"));
        assert_eq!(c, dir.path().join("01_normalized-3.mp3"));
        assert_eq!(std::fs::read(&a).unwrap(), b"FIRST");
        assert_eq!(std::fs::read(&b).unwrap(), b"SECOND!");
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("a_normalized.mp3", 1), "a_normalized.mp3");
        assert_eq!(numbered_name("a_normalized.mp3", 4), "a_normalized-4.mp3");
        assert_eq!(numbered_name(".hidden", 2), ".hidden-2");
    }

    #[test]
    fn test_normalize_retry_from_error() {
        let mut file = analyzed(Some(-3.0));
        file.apply(Transition::NormalizeStarted).unwrap();
        file.apply(Transition::NormalizeFailed("engine".into())).unwrap();
        file.apply(Transition::NormalizeStarted).unwrap();
        file.apply(Transition::NormalizeProgress(1.7)).unwrap();
        assert_eq!(file.normalize_progress, 1.0);
        file.apply(Transition::NormalizeSucceeded(Artifact::new("a_normalized.mp3".into(), vec![1, 2])))
            .unwrap();
        assert_eq!(file.artifact().map(|a| a.size), Some(2));
        assert!(file.apply(Transition::NormalizeStarted).is_err());
    }
}
