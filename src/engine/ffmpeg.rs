use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tracing::{debug, info};

use super::{Engine, EngineEvent};
use crate::error::{PipelineError, Result};
use crate::parser::ProgressTracker;

/// How often a running invocation checks its deadline and cancellation flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stops the running ffmpeg child, and refuses new ones, once cancelled. Shared with
/// whoever needs to abort work from outside the worker thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs the `ffmpeg` binary as a child process over a private temporary directory.
pub struct FfmpegEngine {
    ffmpeg_path: PathBuf,
    timeout: Option<Duration>,
    cancel: CancelHandle,
    workdir: Option<TempDir>,
}

impl FfmpegEngine {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout: None,
            cancel: CancelHandle::default(),
            workdir: None,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Kill any invocation that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn workdir(&self) -> io::Result<&Path> {
        self.workdir
            .as_ref()
            .map(TempDir::path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "ffmpeg engine is not loaded"))
    }
}

impl Engine for FfmpegEngine {
    fn load(&mut self) -> Result<()> {
        let output = Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                PipelineError::EngineBootstrap(format!(
                    "failed to start {}: {}",
                    self.ffmpeg_path.display(),
                    e
                ))
            })?;
        if !output.status.success() {
            return Err(PipelineError::EngineBootstrap(format!(
                "{} -version exited with {}",
                self.ffmpeg_path.display(),
                output.status
            )));
        }
        let version = String::from_utf8_lossy(&output.stdout);
        info!(version = version.lines().next().unwrap_or("unknown"), "ffmpeg available");

        let workdir = tempfile::Builder::new()
            .prefix("peaknorm-")
            .tempdir()
            .map_err(|e| {
                PipelineError::EngineBootstrap(format!("failed to create working directory: {}", e))
            })?;
        debug!(path = %workdir.path().display(), "engine working directory created");
        self.workdir = Some(workdir);
        Ok(())
    }

    fn write_file(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        std::fs::write(self.workdir()?.join(name), data)
    }

    fn read_file(&mut self, name: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.workdir()?.join(name))
    }

    fn delete_file(&mut self, name: &str) -> io::Result<()> {
        std::fs::remove_file(self.workdir()?.join(name))
    }

    fn exec(&mut self, args: &[String], on_event: &mut dyn FnMut(EngineEvent)) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::EngineInvocation("cancelled".into()));
        }
        let workdir = self.workdir()?.to_path_buf();
        let mut child = Command::new(&self.ffmpeg_path)
            .args(args)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::EngineInvocation(format!("failed to spawn ffmpeg: {}", e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PipelineError::EngineInvocation("ffmpeg stderr unavailable".into()))?;
        let (tx, rx) = mpsc::channel::<String>();
        let reader = std::thread::spawn(move || forward_lines(stderr, tx));

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut tracker = ProgressTracker::new();
        let mut last_line = String::new();

        loop {
            if let Some(reason) = self.interruption(deadline) {
                stop(&mut child, reader);
                debug!(%reason, "ffmpeg invocation interrupted");
                return Err(PipelineError::EngineInvocation(reason));
            }
            let line = match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            if let Some(fraction) = tracker.observe(&line) {
                on_event(EngineEvent::Progress(fraction));
            }
            if !line.trim().is_empty() {
                last_line.clone_from(&line);
            }
            on_event(EngineEvent::Log(line));
        }

        let status = child.wait()?;
        let _ = reader.join();
        if status.success() {
            on_event(EngineEvent::Progress(1.0));
            Ok(())
        } else {
            Err(PipelineError::EngineInvocation(format!(
                "ffmpeg exited with {}: {}",
                status,
                last_line.trim()
            )))
        }
    }
}

impl FfmpegEngine {
    fn interruption(&self, deadline: Option<Instant>) -> Option<String> {
        if self.cancel.is_cancelled() {
            return Some("cancelled".to_string());
        }
        match (deadline, self.timeout) {
            (Some(deadline), Some(timeout)) if Instant::now() >= deadline => {
                Some(format!("timed out after {}s", timeout.as_secs()))
            }
            _ => None,
        }
    }
}

fn stop(child: &mut Child, reader: JoinHandle<()>) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = reader.join();
}

/// Forward stderr line by line. ffmpeg ends status lines with `\r`, so both
/// terminators split.
fn forward_lines(mut stderr: impl Read, tx: Sender<String>) {
    let mut buf = [0u8; 4096];
    let mut line = Vec::new();
    loop {
        let n = match stderr.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !line.is_empty() {
                    if tx.send(String::from_utf8_lossy(&line).into_owned()).is_err() {
                        return;
                    }
                    line.clear();
                }
            } else {
                line.push(byte);
            }
        }
    }
    if !line.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&line).into_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(input: &[u8]) -> Vec<String> {
        let (tx, rx) = mpsc::channel();
        forward_lines(input, tx);
        rx.into_iter().collect()
    }

    #[test]
    fn test_forward_lines_splits_carriage_returns() {
        let lines = collect(b"Duration: 00:00:10.00\nsize=1kB time=00:00:01.00\rsize=2kB time=00:00:02.00\r\nend");
        assert_eq!(
            lines,
            vec![
                "Duration: 00:00:10.00",
                "size=1kB time=00:00:01.00",
                "size=2kB time=00:00:02.00",
                "end",
            ]
        );
    }

    #[test]
    fn test_unloaded_engine_has_no_storage() {
        let mut engine = FfmpegEngine::new("ffmpeg");
        assert!(engine.write_file("x.mp3", b"data").is_err());
        assert!(engine.exec(&[], &mut |_| {}).is_err());
    }

    /// A stand-in ffmpeg that answers `-version` and hangs on anything else.
    #[cfg(unix)]
    fn hanging_ffmpeg(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("ffmpeg");
        std::fs::write(
            &path,
            "#!/bin/sh\nif [ \"$1\" = \"-version\" ]; then\n  echo \"ffmpeg version 6.0-test\"\n  exit 0\nfi\nexec sleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_hung_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = FfmpegEngine::new(hanging_ffmpeg(dir.path()))
            .with_timeout(Some(Duration::from_secs(1)));
        engine.load().unwrap();

        let started = Instant::now();
        let result = engine.exec(&args(&["-i", "in.mp3", "-f", "null", "-"]), &mut |_| {});
        assert!(started.elapsed() < Duration::from_secs(10));
        match result {
            Err(PipelineError::EngineInvocation(msg)) => assert_eq!(msg, "timed out after 1s"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_releases_the_job_slot() {
        use crate::engine::EngineGateway;
        use crate::models::{IncomingFile, TrackedFile};

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.mp3");
        std::fs::write(&source, b"ID3").unwrap();
        let file = TrackedFile::new(IncomingFile {
            path: source,
            name: "a.mp3".to_string(),
            size: 3,
            modified_ms: 0,
            media_type: None,
            duration_secs: None,
        });

        let engine = FfmpegEngine::new(hanging_ffmpeg(dir.path()))
            .with_timeout(Some(Duration::from_secs(1)));
        let mut gateway = EngineGateway::new(engine);
        gateway.load().unwrap();

        for _ in 0..2 {
            match gateway.analyze_loudness(&file) {
                Err(PipelineError::EngineInvocation(msg)) => {
                    assert_eq!(msg, "timed out after 1s")
                }
                other => panic!("expected timeout, got {:?}", other),
            }
            assert!(gateway.current_job().is_none());
        }
        assert_eq!(gateway.cleanup_failures(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_stops_running_and_future_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = FfmpegEngine::new(hanging_ffmpeg(dir.path()));
        engine.load().unwrap();

        let cancel = engine.cancel_handle();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            cancel.cancel();
        });

        let started = Instant::now();
        let result = engine.exec(&args(&["-i", "in.mp3"]), &mut |_| {});
        canceller.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(result, Err(PipelineError::EngineInvocation(ref m)) if m == "cancelled"));

        let again = engine.exec(&args(&["-i", "in.mp3"]), &mut |_| {});
        assert!(matches!(again, Err(PipelineError::EngineInvocation(ref m)) if m == "cancelled"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dropping_engine_removes_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = FfmpegEngine::new(hanging_ffmpeg(dir.path()));
        engine.load().unwrap();
        engine.write_file("job-1-analysis.mp3", b"ID3").unwrap();

        let workdir = engine.workdir().unwrap().to_path_buf();
        assert!(workdir.join("job-1-analysis.mp3").exists());
        drop(engine);
        assert!(!workdir.exists());
    }

    #[test]
    fn test_missing_binary_fails_bootstrap() {
        let mut engine = FfmpegEngine::new("/nonexistent/peaknorm-ffmpeg");
        match engine.load() {
            Err(PipelineError::EngineBootstrap(msg)) => assert!(msg.contains("failed to start")),
            other => panic!("expected bootstrap error, got {:?}", other),
        }
    }
}
