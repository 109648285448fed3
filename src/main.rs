use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use peaknorm::config::Config;
use peaknorm::format;
use peaknorm::intake;
use peaknorm::models::{AnalysisState, NormalizeState};

#[derive(Parser)]
#[command(name = "peaknorm", about = "Normalize the peak level of MP3 files with ffmpeg")]
struct Cli {
    /// MP3 files, or directories containing them
    paths: Vec<PathBuf>,

    /// Target peak level in dB (default: -1)
    #[arg(short, long, allow_negative_numbers = true)]
    target: Option<f64>,

    /// Directory the normalized files are written to (default: current directory)
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Output as JSON instead of table
    #[arg(long)]
    json: bool,

    /// Output as CSV instead of table
    #[arg(long)]
    csv: bool,

    /// Measure only, do not write normalized files
    #[arg(long)]
    analyze_only: bool,

    /// Launch interactive TUI
    #[arg(long)]
    tui: bool,

    /// Path to the ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Audio encoder used for the normalized output
    #[arg(long)]
    encoder: Option<String>,

    /// Abort any single ffmpeg run after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write logs to this file (the TUI logs nowhere otherwise)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(target) = self.target {
            config.target_peak_db = target;
        }
        if let Some(dir) = &self.out_dir {
            config.out_dir = dir.clone();
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            config.ffmpeg_path = ffmpeg.clone();
        }
        if let Some(encoder) = &self.encoder {
            config.encoder = encoder.clone();
        }
        if self.timeout.is_some() {
            config.job_timeout_secs = self.timeout;
        }
        Ok(config)
    }
}

fn init_logging(verbose: u8, tui: bool, log_file: Option<&Path>) -> Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("peaknorm={}", level)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            builder.with_writer(Mutex::new(file)).with_ansi(false).init();
        }
        // The terminal belongs to the UI.
        None if tui => {}
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn run_batch(cli: &Cli, config: &Config) -> Result<()> {
    let inputs = intake::collect_inputs(&cli.paths).context("Failed to read input files")?;

    let mut pipeline = config.build_pipeline();
    let added = pipeline.add_files(inputs);
    if added.is_empty() {
        anyhow::bail!("No MP3 files found in the given paths");
    }

    pipeline.load_engine().with_context(|| {
        format!(
            "ffmpeg is required; check that '{}' is installed or pass --ffmpeg",
            config.ffmpeg_path.display()
        )
    })?;
    pipeline.drain_analysis();

    if !cli.analyze_only {
        let report = pipeline.normalize_all(config.target_peak_db);
        if report.normalized > 0 {
            std::fs::create_dir_all(&config.out_dir).with_context(|| {
                format!("Failed to create output directory {}", config.out_dir.display())
            })?;
        }
        for file in pipeline.registry().files() {
            if let Some(artifact) = file.artifact() {
                let path = artifact
                    .save_in(&config.out_dir)
                    .with_context(|| format!("Failed to save {}", artifact.name))?;
                eprintln!("Saved {}", path.display());
            }
        }
    }

    let files = pipeline.registry().files();
    if cli.json {
        println!("{}", format::format_json(files, config.target_peak_db));
    } else if cli.csv {
        print!("{}", format::format_csv(files));
    } else {
        println!("{}", format::format_table(files));
    }

    let failed = files
        .iter()
        .filter(|f| {
            matches!(f.analysis, AnalysisState::Error(_))
                || matches!(f.normalize, NormalizeState::Error(_))
        })
        .count();
    if failed > 0 {
        anyhow::bail!("{} of {} files failed", failed, files.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.json && cli.csv {
        anyhow::bail!("--json and --csv cannot be used together");
    }
    if cli.tui && (cli.json || cli.csv) {
        anyhow::bail!("--tui cannot be combined with --json or --csv");
    }
    if cli.paths.is_empty() {
        anyhow::bail!("No input given: pass one or more MP3 files or directories");
    }

    let config = cli.resolve_config()?;
    init_logging(cli.verbose, cli.tui, cli.log_file.as_deref())?;

    if cli.tui {
        return peaknorm::tui::run(&cli.paths, &config);
    }
    run_batch(&cli, &config)
}
