//! pp - keyboard-first video playlist controller for mpv.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub mod cli;
pub mod config;
pub mod error;
pub mod mpv;
pub mod playlist;
pub mod resume;
pub mod session;
pub mod terminal;

pub use config::AppConfig;
pub use error::AppError;

use cli::Args;
use mpv::{KeybindOptions, MpvClient, MpvIpc, MpvProcess, StagedFiles, StartOptions};
use playlist::Order;
use resume::TimestampStore;
use session::{Session, SessionOptions};
use terminal::{RawModeGuard, TerminalKeys};

const DIAL_DEADLINE: Duration = Duration::from_secs(5);
const QUIT_DEADLINE: Duration = Duration::from_secs(2);
const SETUP_TIMEOUT: Duration = Duration::from_secs(2);

fn init_logging() {
  env_logger::Builder::from_env(env_logger::Env::new().filter_or("PP_LOG", "warn"))
    .format_timestamp_millis()
    .init();
}

/// Parse arguments, run a session, and map the outcome to an exit code.
pub async fn run() -> ExitCode {
  let args = Args::parse();
  init_logging();

  match run_with(args).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("pp: {}", e);
      ExitCode::FAILURE
    }
  }
}

fn load_config(args: &Args) -> Result<AppConfig, AppError> {
  let base = match args.config.clone().or_else(AppConfig::default_path) {
    Some(path) => AppConfig::load_or_default(&path),
    None => AppConfig::default(),
  };
  let config = args.apply(base);
  config.validate().map_err(AppError::Config)?;
  Ok(config)
}

fn open_store(config: &AppConfig) -> TimestampStore {
  if !(config.persist_resume && config.resume) {
    return TimestampStore::in_memory();
  }
  let path = config
    .timestamps_path
    .clone()
    .unwrap_or_else(resume::default_timestamps_path);
  let mut store = TimestampStore::new(path);
  store.load();
  log::info!("Loaded {} resume timestamps", store.len());
  store
}

async fn run_with(args: Args) -> Result<(), AppError> {
  let config = load_config(&args)?;

  let mpv_path = mpv::resolve_mpv(config.mpv_path.as_deref())?;
  let order = if config.latest { Order::Latest } else { Order::Name };
  let playlist = playlist::build_playlist(&args.path, order)?;
  let timestamps = Arc::new(Mutex::new(open_store(&config)));

  let _raw = RawModeGuard::enable()?;

  let staged = StagedFiles::new()?;
  let playlist_path = staged.write_playlist(&playlist.files)?;
  let input_conf = staged.write_input_conf(KeybindOptions {
    seek_short: config.seek_short,
    seek_long: config.seek_long,
  })?;
  let nav_script = staged.write_nav_script()?;

  let process = MpvProcess::start(
    &mpv_path,
    &StartOptions {
      socket_path: staged.socket_path().to_path_buf(),
      playlist_path: Some(playlist_path),
      playlist_start: playlist.start,
      input_conf_path: Some(input_conf),
      script_paths: vec![nav_script],
      keep_open: true,
    },
  )?;

  let result = drive(&config, playlist, &staged, timestamps.clone()).await;

  process.quit(QUIT_DEADLINE).await;
  if let Err(e) = process.wait().await {
    log::warn!("{}", e);
  }

  if let Err(e) = timestamps.lock().save() {
    log::warn!("Final save of resume timestamps failed: {}", e);
  }
  result
}

/// Connect to the running player and hand control to the session until it ends.
async fn drive(
  config: &AppConfig,
  playlist: playlist::Playlist,
  staged: &StagedFiles,
  timestamps: Arc<Mutex<TimestampStore>>,
) -> Result<(), AppError> {
  let ipc = MpvIpc::dial(staged.socket_path(), DIAL_DEADLINE).await?;
  let client = MpvClient::new(ipc);

  if let Err(e) = client.set_property("mute", config.mute, SETUP_TIMEOUT).await {
    log::warn!("Failed to set mute: {}", e);
  }

  let session = Session::new(
    client.clone(),
    playlist.files,
    playlist.start,
    SessionOptions {
      seek_short: config.seek_short,
      seek_long: config.seek_long,
      continuous: config.continuous,
      autoplay: config.autoplay,
      wrap: config.wrap,
      resume: config.resume,
    },
    timestamps,
  );

  if let Err(e) = session.restore_position().await {
    log::warn!("Resume failed: {}", e);
  }
  if config.autoplay {
    if let Err(e) = client.set_property("pause", false, SETUP_TIMEOUT).await {
      log::warn!("Failed to start playback: {}", e);
    }
  }
  session.show_help().await;

  // Lets a pending command-mode prompt return once MPV goes away.
  let shutdown = CancellationToken::new();
  let watcher = {
    let client = client.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
      client.closed().await;
      shutdown.cancel();
    })
  };

  let result = session.run(&mut TerminalKeys::new(shutdown)).await;
  client.close();
  let _ = watcher.await;
  result.map_err(AppError::from)
}
