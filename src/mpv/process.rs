//! MPV process detection, spawning and shutdown.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found: {0}")]
  NotFound(String),
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] std::io::Error),
  #[error("Failed to wait for MPV: {0}")]
  Wait(std::io::Error),
}

/// Launch settings. The argument list built from these is fixed.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
  pub socket_path: PathBuf,
  pub playlist_path: Option<PathBuf>,
  pub playlist_start: usize,
  pub input_conf_path: Option<PathBuf>,
  pub script_paths: Vec<PathBuf>,
  /// Keep the last frame open at the end of the playlist.
  pub keep_open: bool,
}

impl StartOptions {
  pub fn to_args(&self) -> Vec<String> {
    let mut args = vec![
      "--no-terminal".to_string(),
      format!("--input-ipc-server={}", self.socket_path.display()),
      "--input-default-bindings=no".to_string(),
      "--input-terminal=no".to_string(),
    ];

    args.push(if self.keep_open { "--keep-open=yes" } else { "--keep-open=no" }.to_string());

    if let Some(conf) = &self.input_conf_path {
      args.push(format!("--input-conf={}", conf.display()));
    }
    for script in &self.script_paths {
      args.push(format!("--script={}", script.display()));
    }
    if let Some(playlist) = &self.playlist_path {
      args.push(format!("--playlist={}", playlist.display()));
      args.push(format!("--playlist-start={}", self.playlist_start));
    }
    args
  }
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(windows)]
  let common_paths: &[&str] = &[
    r"C:\Program Files\mpv\mpv.exe",
    r"C:\Program Files (x86)\mpv\mpv.exe",
    r"C:\mpv\mpv.exe",
  ];
  #[cfg(target_os = "macos")]
  let common_paths: &[&str] = &[
    "/usr/local/bin/mpv",
    "/opt/homebrew/bin/mpv",
    "/Applications/mpv.app/Contents/MacOS/mpv",
  ];
  #[cfg(not(any(windows, target_os = "macos")))]
  let common_paths: &[&str] = &["/usr/bin/mpv", "/usr/local/bin/mpv"];

  common_paths.iter().map(PathBuf::from).find(|p| p.exists())
}

/// Resolve an explicit executable name or path, falling back to auto-detection.
pub fn resolve_mpv(explicit: Option<&str>) -> Result<PathBuf, ProcessError> {
  match explicit {
    Some(name) => which::which(name).map_err(|_| ProcessError::NotFound(name.to_string())),
    None => find_mpv().ok_or_else(|| ProcessError::NotFound("mpv".to_string())),
  }
}

/// A running MPV subprocess.
pub struct MpvProcess {
  child: tokio::sync::Mutex<Child>,
  #[cfg_attr(not(unix), allow(dead_code))]
  pid: Option<u32>,
  interrupted: AtomicBool,
}

impl MpvProcess {
  /// Spawn MPV with IPC enabled.
  pub fn start(mpv_path: &Path, opts: &StartOptions) -> Result<Self, ProcessError> {
    let args = opts.to_args();
    log::info!("Spawning MPV: {:?} with IPC: {}", mpv_path, opts.socket_path.display());
    log::debug!("MPV args: {:?}", args);

    let child = Command::new(mpv_path)
      .args(&args)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .spawn()?;
    let pid = child.id();

    Ok(Self {
      child: tokio::sync::Mutex::new(child),
      pid,
      interrupted: AtomicBool::new(false),
    })
  }

  /// Ask MPV to exit and wait up to `deadline` for it to do so.
  ///
  /// Returns normally whether or not the process was still running. The interrupt is sent once.
  pub async fn quit(&self, deadline: Duration) {
    if !self.interrupted.swap(true, Ordering::SeqCst) {
      self.interrupt().await;
    }

    let mut child = self.child.lock().await;
    match tokio::time::timeout(deadline, child.wait()).await {
      Ok(Ok(status)) => log::info!("MPV process exited with: {}", status),
      Ok(Err(e)) => log::warn!("wait() failed: {}", e),
      Err(_) => log::warn!("MPV did not exit within {:?}", deadline),
    }
  }

  #[cfg(unix)]
  async fn interrupt(&self) {
    let mut child = self.child.lock().await;
    // Already reaped: nothing to signal, and the pid may have been reused.
    if let Ok(Some(_)) = child.try_wait() {
      return;
    }
    let Some(pid) = self.pid else {
      return;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
      return;
    };
    // SAFETY: plain signal delivery to our own child; no memory is shared.
    let rc = unsafe { libc::kill(pid, libc::SIGINT) };
    if rc != 0 {
      log::debug!("SIGINT to MPV failed: {}", std::io::Error::last_os_error());
    }
  }

  #[cfg(not(unix))]
  async fn interrupt(&self) {
    let mut child = self.child.lock().await;
    if let Err(e) = child.start_kill() {
      log::debug!("kill request to MPV failed: {}", e);
    }
  }

  /// Block until MPV exits. Any exit status counts as success; only failures to wait propagate.
  pub async fn wait(&self) -> Result<(), ProcessError> {
    let status = self.child.lock().await.wait().await.map_err(ProcessError::Wait)?;
    if !status.success() {
      log::debug!("MPV exited with {}", status);
    }
    Ok(())
  }
}
