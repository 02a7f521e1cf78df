//! Sakura command line player
//!
//! Usage:
//!   sakura list <DIR>                      - List sheet files
//!   sakura play <SHEET> [--start-ms MS]    - Play a sheet, logging each key
//!
//! While playing, type commands on stdin: `p` (pause/resume), `seek <ms>`, `q`.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use crossbeam_channel::{RecvTimeoutError, Sender};
use sk_core::{KeyMapping, PlaybackConfig, list_sheets, load_sheet};
use sk_engine::{ActuatorError, NoteActuator, PlayerCommand, SessionController, SessionEvent};

#[derive(Parser)]
#[command(name = "sakura", about = "Score auto-player", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sheet files in a directory
    List {
        /// Directory to search (recursive)
        dir: PathBuf,
    },
    /// Play a sheet
    Play {
        /// Sheet file (.json, .txt, .skysheet)
        sheet: PathBuf,

        /// Start position in milliseconds
        #[arg(short, long, default_value_t = 0)]
        start_ms: u64,

        /// Playback config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override executor thread count
        #[arg(short, long)]
        workers: Option<usize>,

        /// Key mapping (JSON object: sheet key → action)
        #[arg(short, long)]
        mapping: Option<PathBuf>,
    },
}

/// Actuator that reports each action through the log
struct LogActuator;

impl NoteActuator for LogActuator {
    fn perform(&self, action: &str) -> Result<(), ActuatorError> {
        log::info!("[Keys] {}", action);
        Ok(())
    }

    fn cleanup(&self) {
        log::debug!("[Keys] Released");
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::List { dir } => list(&dir),
        Commands::Play {
            sheet,
            start_ms,
            config,
            workers,
            mapping,
        } => play(&sheet, start_ms, config.as_deref(), workers, mapping.as_deref()),
    }
}

fn list(dir: &Path) -> Result<()> {
    let sheets = list_sheets(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    if sheets.is_empty() {
        bail!("No sheets found in {}", dir.display());
    }

    for path in sheets {
        match load_sheet(&path) {
            Ok(sheet) => println!(
                "{}  {} by {} ({} notes)",
                path.display(),
                sheet.name,
                sheet.author,
                sheet.song_notes.len()
            ),
            Err(e) => println!("{}  <unreadable: {}>", path.display(), e),
        }
    }
    Ok(())
}

fn play(
    sheet_path: &Path,
    start_ms: u64,
    config_path: Option<&Path>,
    workers: Option<usize>,
    mapping_path: Option<&Path>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => PlaybackConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PlaybackConfig::default(),
    };
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }

    let mapping = match mapping_path {
        Some(path) => load_mapping(path)?,
        None => KeyMapping::sky_default(),
    };

    let sheet = load_sheet(sheet_path)
        .with_context(|| format!("Failed to load sheet {}", sheet_path.display()))?;
    let song_id = sheet_path.display().to_string();

    let controller = SessionController::new(Arc::new(LogActuator), mapping, config);
    let events = controller.subscribe();

    controller
        .play(&song_id, &sheet.song_notes, (start_ms > 0).then_some(start_ms))
        .with_context(|| format!("Cannot play '{}'", sheet.name))?;
    log::info!("Playing '{}' by {} (p = pause, seek <ms>, q = quit)", sheet.name, sheet.author);

    spawn_stdin_reader(controller.command_sender())?;

    loop {
        controller.pump_commands();

        match events.recv_timeout(Duration::from_millis(50)) {
            Ok(SessionEvent::Finished { .. }) => {
                log::info!("Finished");
                break;
            }
            Ok(SessionEvent::Terminated { .. }) => {
                log::info!("Stopped at {}ms", controller.position());
                break;
            }
            Ok(event) => log::debug!("{:?}", event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    controller.shutdown();
    Ok(())
}

fn load_mapping(path: &Path) -> Result<KeyMapping> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read mapping {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid mapping {}", path.display()))
}

/// Forward stdin lines as player commands. The thread ends with stdin.
fn spawn_stdin_reader(commands: Sender<PlayerCommand>) -> Result<()> {
    thread::Builder::new()
        .name("sk-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<PlayerCommand>() {
                    Ok(command) => {
                        if commands.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("{}", e),
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(())
}
