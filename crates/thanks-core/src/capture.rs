//! Best-effort diagnostic screen captures.
//!
//! On unexpected faults a full-screen image goes to `captures/` with a
//! timestamped name. Capture failures are logged and otherwise ignored.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::Local;
use tracing::{info, warn};

use crate::config::CaptureConfig;

#[derive(Debug, Clone)]
pub struct ScreenCapture {
    dir: PathBuf,
    config: CaptureConfig,
}

impl ScreenCapture {
    pub fn new(dir: impl Into<PathBuf>, config: CaptureConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
        }
    }

    /// Capture the screen, blocking until the capture command exits.
    /// Returns the image path on success.
    pub fn capture(&self, reason: &str) -> Option<PathBuf> {
        if !self.config.enabled {
            return None;
        }
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!("[capture] cannot create {:?}: {}", self.dir, e);
            return None;
        }

        let path = self.dir.join(capture_file_name(reason));
        let args = substitute_path(&self.config.args, &path);
        let status = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(s) if s.success() => {
                info!("[capture] saved {:?}", path);
                Some(path)
            }
            Ok(s) => {
                warn!("[capture] {} exited with {}", self.config.program, s);
                None
            }
            Err(e) => {
                warn!("[capture] failed to run {}: {}", self.config.program, e);
                None
            }
        }
    }

    /// Async wrapper for use from the poll loop.
    pub async fn capture_async(&self, reason: &str) -> Option<PathBuf> {
        let this = self.clone();
        let reason = reason.to_string();
        tokio::task::spawn_blocking(move || this.capture(&reason))
            .await
            .ok()
            .flatten()
    }
}

fn capture_file_name(reason: &str) -> String {
    let slug: String = reason
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let slug = slug.trim_matches('-');
    format!(
        "capture-{}-{}.png",
        Local::now().format("%Y%m%d-%H%M%S"),
        if slug.is_empty() { "fault" } else { slug }
    )
}

fn substitute_path(args: &[String], path: &Path) -> Vec<String> {
    let path = path.to_string_lossy();
    args.iter().map(|a| a.replace("{path}", &path)).collect()
}
