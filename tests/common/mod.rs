//! A scripted in-memory engine for exercising the pipeline without ffmpeg.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use peaknorm::engine::{Engine, EngineEvent, EngineGateway};
use peaknorm::error::{PipelineError, Result};
use peaknorm::models::IncomingFile;
use peaknorm::scheduler::Pipeline;

/// What one `exec` call does: lines to log, progress to report, and whether it fails.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub lines: Vec<String>,
    pub progress: Vec<f32>,
    pub error: Option<String>,
}

impl Reply {
    pub fn volume(peak: f64, mean: f64) -> Self {
        Self {
            lines: vec![
                "Input #0, mp3, from 'in.mp3':".to_string(),
                format!("[Parsed_volumedetect_0 @ 0x55d1] mean_volume: {:.1} dB", mean),
                format!("[Parsed_volumedetect_0 @ 0x55d1] max_volume: {:.1} dB", peak),
            ],
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            lines: vec!["[Parsed_volumedetect_0 @ 0x55d1] n_samples: 0".to_string()],
            ..Self::default()
        }
    }

    pub fn encoded() -> Self {
        Self {
            lines: vec!["size=     512kB time=00:00:05.00 bitrate= 128.0kbits/s".to_string()],
            progress: vec![0.25, 0.5, 1.0],
            error: None,
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            lines: vec![message.to_string()],
            progress: Vec::new(),
            error: Some(message.to_string()),
        }
    }
}

#[derive(Debug, Default)]
pub struct EngineState {
    pub loads: usize,
    pub load_error: Option<String>,
    pub files: HashMap<String, Vec<u8>>,
    pub writes: Vec<String>,
    pub deletes: Vec<String>,
    pub exec_calls: Vec<Vec<String>>,
    pub replies: VecDeque<Reply>,
    pub active: usize,
    pub max_active: usize,
    pub fail_deletes: bool,
}

/// Engine double whose state stays reachable after it is moved into a pipeline.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    state: Arc<Mutex<EngineState>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap()
    }

    pub fn push_reply(&self, reply: Reply) {
        self.state().replies.push_back(reply);
    }

    pub fn fail_load(&self, message: &str) {
        self.state().load_error = Some(message.to_string());
    }

    pub fn exec_count(&self) -> usize {
        self.state().exec_calls.len()
    }
}

fn is_encode(args: &[String]) -> bool {
    args.iter().any(|a| a == "-c:a")
}

fn default_reply(args: &[String]) -> Reply {
    if is_encode(args) {
        Reply::encoded()
    } else {
        Reply::volume(-3.2, -18.7)
    }
}

impl Engine for ScriptedEngine {
    fn load(&mut self) -> Result<()> {
        let mut state = self.state();
        state.loads += 1;
        match &state.load_error {
            Some(message) => Err(PipelineError::EngineBootstrap(message.clone())),
            None => Ok(()),
        }
    }

    fn write_file(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        state.writes.push(name.to_string());
        state.files.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn read_file(&mut self, name: &str) -> io::Result<Vec<u8>> {
        self.state()
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn delete_file(&mut self, name: &str) -> io::Result<()> {
        let mut state = self.state();
        state.deletes.push(name.to_string());
        if state.fail_deletes {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
        }
        match state.files.remove(name) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, name.to_string())),
        }
    }

    fn exec(&mut self, args: &[String], on_event: &mut dyn FnMut(EngineEvent)) -> Result<()> {
        let reply = {
            let mut state = self.state();
            state.exec_calls.push(args.to_vec());
            state.active += 1;
            state.max_active = state.max_active.max(state.active);
            state.replies.pop_front().unwrap_or_else(|| default_reply(args))
        };

        for line in &reply.lines {
            on_event(EngineEvent::Log(line.clone()));
        }
        for fraction in &reply.progress {
            on_event(EngineEvent::Progress(*fraction));
        }

        let mut state = self.state();
        state.active -= 1;
        if let Some(message) = reply.error {
            return Err(PipelineError::EngineInvocation(message));
        }
        if is_encode(args) {
            let input = args
                .iter()
                .position(|a| a == "-i")
                .and_then(|i| args.get(i + 1))
                .and_then(|name| state.files.get(name).cloned())
                .unwrap_or_default();
            if let Some(output) = args.last() {
                state.files.insert(output.clone(), input);
            }
        }
        Ok(())
    }
}

pub fn pipeline(engine: &ScriptedEngine) -> Pipeline<ScriptedEngine> {
    Pipeline::new(EngineGateway::new(engine.clone()))
}

/// Write a small stand-in MP3 and describe it for intake.
pub fn mp3_file(dir: &Path, name: &str, contents: &[u8]) -> IncomingFile {
    let path: PathBuf = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    IncomingFile {
        path,
        name: name.to_string(),
        size: contents.len() as u64,
        modified_ms: 1_700_000_000_000,
        media_type: None,
        duration_secs: None,
    }
}
