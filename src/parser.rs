//! Extraction of structured figures from ffmpeg's free-text diagnostics.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::VolumeAnalysis;

static MAX_VOLUME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)max_volume:\s*([-+]?\d+(?:\.\d+)?)\s*dB").expect("valid max_volume pattern")
});

static MEAN_VOLUME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)mean_volume:\s*([-+]?\d+(?:\.\d+)?)\s*dB").expect("valid mean_volume pattern")
});

static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid duration pattern")
});

static PROGRESS_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("valid time pattern")
});

fn capture_f64(re: &Regex, line: &str) -> Option<f64> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Scan the log of a `volumedetect` run for peak and mean volume.
///
/// The last reading of each kind wins, since a stream may report more than one pass.
/// A figure that never appears is left as `None`.
pub fn parse_volume<I, S>(lines: I) -> VolumeAnalysis
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut result = VolumeAnalysis::default();
    for line in lines {
        let line = line.as_ref();
        if let Some(peak) = capture_f64(&MAX_VOLUME, line) {
            result.peak_db = Some(peak);
        }
        if let Some(mean) = capture_f64(&MEAN_VOLUME, line) {
            result.mean_db = Some(mean);
        }
    }
    result
}

fn capture_timestamp(re: &Regex, line: &str) -> Option<f64> {
    let caps = re.captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Input duration in seconds from a `Duration: HH:MM:SS.xx` header line.
pub fn parse_duration(line: &str) -> Option<f64> {
    capture_timestamp(&DURATION, line)
}

/// Output position in seconds from a `time=HH:MM:SS.xx` status line.
pub fn parse_progress_time(line: &str) -> Option<f64> {
    capture_timestamp(&PROGRESS_TIME, line)
}

/// Turns a stream of ffmpeg log lines into completion fractions.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    duration_secs: Option<f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns a fraction in `[0, 1]` when the line reports a position.
    pub fn observe(&mut self, line: &str) -> Option<f32> {
        if self.duration_secs.is_none() {
            if let Some(duration) = parse_duration(line) {
                self.duration_secs = Some(duration);
                return None;
            }
        }
        let duration = self.duration_secs.filter(|d| *d > 0.0)?;
        let position = parse_progress_time(line)?;
        Some((position / duration).clamp(0.0, 1.0) as f32)
    }
}
