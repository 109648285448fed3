use serde::Serialize;

use crate::models::{AnalysisState, NormalizeState, TrackedFile};

/// Format a duration in seconds as "M:SS".
pub fn format_duration(secs: f64) -> String {
    let total_secs = secs.round() as u64;
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    format!("{}:{:02}", minutes, seconds)
}

/// Human-readable byte count: B, KB or MB.
pub fn format_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// A decibel figure, or "unknown" when the engine never reported it.
pub fn format_db(value: Option<f64>) -> String {
    match value {
        Some(db) => format!("{:.2} dB", db),
        None => "unknown".to_string(),
    }
}

/// One-word-ish summary of where a file is in the pipeline.
pub fn status_label(file: &TrackedFile) -> String {
    match &file.analysis {
        AnalysisState::Pending => "pending".to_string(),
        AnalysisState::Running => "analyzing".to_string(),
        AnalysisState::Error(msg) => format!("analysis failed: {}", msg),
        AnalysisState::Done(_) => match &file.normalize {
            NormalizeState::Idle => "analyzed".to_string(),
            NormalizeState::Processing => {
                format!("normalizing {}%", (file.normalize_progress * 100.0).round() as u32)
            }
            NormalizeState::Done(artifact) => format!("normalized -> {}", artifact.name),
            NormalizeState::Error(msg) => format!("normalize failed: {}", msg),
        },
    }
}

fn peak_and_mean(file: &TrackedFile) -> (Option<f64>, Option<f64>) {
    match &file.analysis {
        AnalysisState::Done(result) => (result.peak_db, result.mean_db),
        _ => (None, None),
    }
}

/// Format the session as a table.
pub fn format_table(files: &[TrackedFile]) -> String {
    let separator = "\u{2500}".repeat(72);
    let mut output = String::new();

    output.push_str(&format!(
        "{:>11} {:>11} {:>8} {:>9}  {}\n",
        "Peak", "Mean", "Duration", "Size", "File"
    ));
    output.push_str(&separator);
    output.push('\n');

    for file in files {
        let (peak, mean) = peak_and_mean(file);
        output.push_str(&format!(
            "{:>11} {:>11} {:>8} {:>9}  {}  [{}]\n",
            format_db(peak),
            format_db(mean),
            file.source
                .duration_secs
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
            format_file_size(file.source.size),
            file.name(),
            status_label(file),
        ));
    }

    output.push_str(&separator);
    output.push('\n');

    let normalized = files
        .iter()
        .filter(|f| matches!(f.normalize, NormalizeState::Done(_)))
        .count();
    output.push_str(&format!(
        "Number of files:   {}\n\
         Normalized:        {}",
        files.len(),
        normalized,
    ));

    output
}

#[derive(Serialize)]
struct Report<'a> {
    target_peak_db: f64,
    files: &'a [TrackedFile],
}

/// Format the session as pretty-printed JSON.
pub fn format_json(files: &[TrackedFile], target_peak_db: f64) -> String {
    let report = Report {
        target_peak_db,
        files,
    };
    serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
}

/// Format the session as CSV.
pub fn format_csv(files: &[TrackedFile]) -> String {
    let mut output = String::from("File,Peak dB,Mean dB,Size,Status\n");
    for file in files {
        let (peak, mean) = peak_and_mean(file);
        let db = |v: Option<f64>| v.map(|d| format!("{:.2}", d)).unwrap_or_default();
        output.push_str(&format!(
            "{},{},{},{},{}\n",
            csv_field(file.name()),
            db(peak),
            db(mean),
            file.source.size,
            csv_field(&status_label(file)),
        ));
    }
    output
}

fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
