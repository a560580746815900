pub mod commands;
pub mod config;
pub mod error;
pub mod instance;
pub mod leader;
pub mod lock;
pub mod models;
pub mod notify;
pub mod playback;
pub mod settings;
pub mod store;
pub mod sync;
pub mod timer;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};

use commands::{execute, parse_command, Command, HELP};
use config::InstanceConfig;
use instance::{Instance, InstanceDeps};
use lock::FileLockService;
use notify::LogSoundSink;
use playback::PlayerFactory;
use settings::SettingsStore;
use store::SqliteStore;

pub use error::{CatalogError, LockError, PlaybackError, StoreError, TimerError};
pub use leader::{LeaderElection, LeadershipObserver, LeadershipToken};
pub use lock::{LockGuard, LockService, MemoryLockService, UnavailableLock};
pub use notify::{Notice, NoticeLevel, Notifier, SoundSink};
pub use playback::{HeadlessControl, HeadlessPlayerFactory, JournalEntry, PlaybackResource};
pub use settings::{Settings, SettingsProvider, StaticSettings};
pub use store::{MemoryStore, Repository, StateStore};

/// Runs one instance against the shared data directory, driven by commands
/// read from stdin.
pub fn run() -> Result<()> {
    let config = InstanceConfig::from_env();

    // RUST_LOG overrides the default level.
    let default_level = if config.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .init();

    info!("FocusDeck starting up...");

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: InstanceConfig) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("Failed to create data directory {}", config.data_dir.display())
    })?;

    let store = SqliteStore::open(config.store_path(), config.store_poll_interval)?;
    let settings = Arc::new(SettingsStore::new(config.settings_path())?);
    let deps = InstanceDeps {
        store: Arc::new(store),
        lock: Arc::new(FileLockService::new(
            config.lock_path(),
            config.lock_poll_interval,
        )),
        settings: settings.clone(),
        sounds: Arc::new(LogSoundSink),
        players: player_factory(),
    };

    let instance = Instance::launch(deps, &config).await;
    let mut notices = instance.notices();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notice = notices.recv() => match notice {
                Ok(notice) => eprintln!("[{:?}] {}", notice.level, notice.message),
                Err(RecvError::Lagged(missed)) => warn!("{missed} notices dropped"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let command = match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => command,
                    Err(err) => {
                        println!("{err:#}");
                        continue;
                    }
                };
                if command == Command::Reload {
                    if let Err(err) = settings.reload() {
                        println!("error: {err:#}");
                        continue;
                    }
                }
                match execute(&instance, command).await {
                    Ok(reply) => println!("{reply}"),
                    Err(err) => println!("error: {err:#}"),
                }
            }
        }
    }

    instance.shutdown().await;
    info!("FocusDeck stopped");
    Ok(())
}

#[cfg(feature = "audio")]
fn player_factory() -> Arc<dyn PlayerFactory> {
    Arc::new(playback::AudioEngineFactory)
}

#[cfg(not(feature = "audio"))]
fn player_factory() -> Arc<dyn PlayerFactory> {
    info!("Built without the `audio` feature; playback commands are logged only");
    Arc::new(HeadlessPlayerFactory::default())
}
