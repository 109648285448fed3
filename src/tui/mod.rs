pub mod app;
pub mod ui;

use std::io;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tracing::warn;

use crate::config::Config;
use crate::engine::FfmpegEngine;
use crate::intake::collect_inputs;
use crate::models::PipelineEvent;
use crate::scheduler::{spawn_worker, WorkerHandle};

use app::{App, View};

const TARGET_STEP_DB: f64 = 0.1;

pub fn run(paths: &[PathBuf], config: &Config) -> Result<()> {
    let inputs = collect_inputs(paths).context("Failed to read input files")?;

    let mut app = App::new(config.out_dir.clone(), config.target_peak_db);

    let engine = config.build_engine();
    let cancel = engine.cancel_handle();

    // The worker owns the pipeline; the UI only mirrors its events.
    let (tx, rx) = mpsc::channel::<PipelineEvent>();
    let worker = spawn_worker(config.pipeline_for(engine), tx);
    worker.add_files(inputs);

    // Setup terminal
    enable_raw_mode()?;
    io::stdout().execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, rx, &worker);

    if app.batch_running || app.analyzing() {
        app.message = Some("Finishing: stopping ffmpeg...".into());
        let _ = terminal.draw(|frame| ui::render(frame, &mut app));
    }
    // Kill any running ffmpeg and join the worker so its working directory is removed.
    cancel.cancel();
    if worker.shutdown().is_none() {
        warn!("pipeline worker panicked");
    }

    // Restore terminal
    disable_raw_mode()?;
    io::stdout().execute(LeaveAlternateScreen)?;

    result
}

fn add_path(app: &mut App, worker: &WorkerHandle<FfmpegEngine>, path: PathBuf) {
    match collect_inputs(std::slice::from_ref(&path)) {
        Ok(inputs) if inputs.is_empty() => {
            app.message = Some(format!("No files in {}", path.display()));
        }
        Ok(inputs) => {
            let count = inputs.len();
            app.message = Some(if worker.add_files(inputs) {
                format!("Adding {} file(s) from {}", count, path.display())
            } else {
                "Error: pipeline worker stopped".to_string()
            });
        }
        Err(e) => {
            app.message = Some(format!("Error: {}", e));
        }
    }
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    rx: mpsc::Receiver<PipelineEvent>,
    worker: &WorkerHandle<FfmpegEngine>,
) -> Result<()> {
    loop {
        terminal.draw(|frame| ui::render(frame, app))?;

        while let Ok(event) = rx.try_recv() {
            app.apply_event(event);
        }

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match app.view {
                    View::Main => match key.code {
                        KeyCode::Char('q') => {
                            app.should_quit = true;
                        }
                        KeyCode::Char('a') => {
                            app.view = View::About;
                        }
                        KeyCode::Char('o') => {
                            app.begin_add_path();
                        }
                        KeyCode::Char('j') | KeyCode::Down => {
                            app.select_next();
                        }
                        KeyCode::Char('k') | KeyCode::Up => {
                            app.select_prev();
                        }
                        KeyCode::Char('+') | KeyCode::Char('=') => {
                            if !app.batch_running {
                                app.adjust_target(TARGET_STEP_DB);
                            }
                        }
                        KeyCode::Char('-') => {
                            if !app.batch_running {
                                app.adjust_target(-TARGET_STEP_DB);
                            }
                        }
                        KeyCode::Char('n') => {
                            if app.can_normalize() {
                                // Marked here so a second keypress cannot queue another run
                                // before the worker reports BatchStarted.
                                app.batch_running = true;
                                if !worker.normalize_all(app.target_peak_db) {
                                    app.batch_running = false;
                                    app.message = Some("Error: pipeline worker stopped".into());
                                }
                            }
                        }
                        KeyCode::Char('s') => {
                            app.save_selected();
                        }
                        _ => {}
                    },
                    View::About => match key.code {
                        KeyCode::Esc | KeyCode::Char('q') => {
                            app.view = View::Main;
                        }
                        _ => {}
                    },
                    View::AddPath => match key.code {
                        KeyCode::Enter => {
                            if let Some(path) = app.take_input_path() {
                                add_path(app, worker, path);
                            }
                        }
                        KeyCode::Esc => {
                            app.cancel_add_path();
                        }
                        KeyCode::Backspace => {
                            app.input.pop();
                        }
                        KeyCode::Char(c) => {
                            app.input.push(c);
                        }
                        _ => {}
                    },
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
