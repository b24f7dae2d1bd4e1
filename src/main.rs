//! Prism shell: headless front end for the persisted window state, download
//! history and auto-update lifecycle.

mod headless;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::mpsc;
use tracing_subscriber::EnvFilter;

use prism_shared::config::{self, AppConfig};
use prism_shared::updater::{self, ReleaseFeedClient};
use prism_shared::window_state::{self, WindowDefaults};
use prism_shared::{paths, DownloadHistory, UpdatePhase, UpdateSequencer, WindowStateStore};

use headless::ConsoleNotifier;

const CRASH_MESSAGE: &str = "An unexpected error occurred. Please restart the application.";

#[derive(Parser)]
#[command(name = "prism", version, about)]
struct Cli {
    /// Set by the previous executable after a self-update.
    #[arg(long, hide = true)]
    updated: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one update lifecycle against the release feed.
    Run {
        /// Skip the startup settle delay.
        #[arg(long)]
        check_now: bool,
    },

    /// Show the persisted window geometry.
    WindowState {
        /// Forget the saved geometry.
        #[arg(long)]
        reset: bool,
    },

    /// Show completed downloads, newest first.
    History {
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Empty the history.
        #[arg(long)]
        clear: bool,
    },

    /// Show the effective configuration.
    Config {
        /// Write the defaults to the config file.
        #[arg(long)]
        write_default: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("prism=info,prism_shared=info")),
        )
        .init();
    install_panic_hook();

    let cli = Cli::parse();

    // Clean up .old exe from a previous self-update
    updater::cleanup_old_exe();
    if cli.updated {
        println!("Updated to v{} successfully!", updater::APP_VERSION);
    }

    let config = config::load_config();

    match cli.command.unwrap_or(Command::Run { check_now: false }) {
        Command::Run { check_now } => run(&config, check_now),
        Command::WindowState { reset } => show_window_state(&config, reset),
        Command::History { limit, clear } => show_history(&config, limit, clear),
        Command::Config { write_default } => show_config(&config, write_default),
    }
}

/// Report panics the way the desktop shell does: log, tell the user, and
/// leave termination to the default hook.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("uncaught panic: {info}");
        eprintln!("{CRASH_MESSAGE}");
        default_hook(info);
    }));
}

fn run(config: &AppConfig, check_now: bool) -> anyhow::Result<()> {
    if !config.auto_update && !check_now {
        println!("Automatic updates are disabled. Use `prism run --check-now` to check manually.");
        return Ok(());
    }

    let (tx, rx) = mpsc::channel();
    let client = ReleaseFeedClient::new(&config.feed_url, &config.asset_name, tx);
    let mut sequencer = UpdateSequencer::new(
        client,
        ConsoleNotifier::default(),
        config.install_policy,
        config.settle_delay(),
    );

    println!("Prism v{}", updater::APP_VERSION);
    if check_now {
        sequencer.request_check();
    } else {
        sequencer.schedule_startup_check(std::time::Instant::now());
    }

    let session = headless::drive(&mut sequencer, &rx, config.install_policy);
    if session.phase == UpdatePhase::Idle {
        if let Some(error) = session.error {
            tracing::warn!("update cycle ended with an error: {error}");
        }
    }
    Ok(())
}

fn show_window_state(config: &AppConfig, reset: bool) -> anyhow::Result<()> {
    let store = WindowStateStore::new(paths::window_state_path());
    if reset {
        store
            .clear()
            .with_context(|| format!("cannot remove {}", store.path().display()))?;
        println!("Window state reset.");
        return Ok(());
    }

    let saved = store.load_or_none();
    let geometry = window_state::resolve(saved.as_ref(), &WindowDefaults::from(config));
    if saved.is_none() {
        println!("No saved window state; new windows open with the defaults.");
    }
    println!("{}", serde_json::to_string_pretty(&geometry)?);
    Ok(())
}

fn show_history(config: &AppConfig, limit: Option<usize>, clear: bool) -> anyhow::Result<()> {
    let history =
        DownloadHistory::new(paths::download_history_path()).with_limit(config.history_limit);
    if clear {
        history
            .clear()
            .with_context(|| format!("cannot clear {}", history.path().display()))?;
        println!("Download history cleared.");
        return Ok(());
    }

    let entries = history.entries();
    if entries.is_empty() {
        println!("No downloads yet.");
        return Ok(());
    }
    for entry in entries.iter().take(limit.unwrap_or(usize::MAX)) {
        println!("{}  {:>12}  {}  {}", entry.date, entry.size, entry.name, entry.path);
    }
    Ok(())
}

fn show_config(config: &AppConfig, write_default: bool) -> anyhow::Result<()> {
    if write_default {
        config::save_config(&AppConfig::default());
        println!("Wrote defaults to {}", paths::config_path().display());
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
