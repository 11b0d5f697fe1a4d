//! The UI automation step, seen from the poll loop as an opaque blocking call.
//!
//! The real work (opening the watch page, clicking through the Super Thanks
//! dialog, typing the message, closing the tab) lives in an external program.
//! Whatever it reports comes back as a string; the core never interprets it.

use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::capture::ScreenCapture;
use crate::config::ActuatorConfig;

pub trait Actuator: Send + Sync {
    /// Run the automation for one video. Blocks for tens of seconds and
    /// reports failures in the returned string instead of panicking.
    fn perform(&self, video_id: &str, message: &str) -> String;
}

/// Runs the configured automation program once per job.
pub struct CommandActuator {
    config: ActuatorConfig,
    capture: Option<ScreenCapture>,
}

impl CommandActuator {
    pub fn new(config: ActuatorConfig, capture: Option<ScreenCapture>) -> Self {
        Self { config, capture }
    }

    pub fn watch_url(&self, video_id: &str) -> String {
        self.config.watch_url_template.replace("{video_id}", video_id)
    }

    fn args_for(&self, video_id: &str, message: &str) -> Vec<String> {
        let url = self.watch_url(video_id);
        self.config
            .args
            .iter()
            .map(|a| {
                a.replace("{url}", &url)
                    .replace("{video_id}", video_id)
                    .replace("{message}", message)
            })
            .collect()
    }

    fn failed(&self, video_id: &str, detail: String) -> String {
        warn!("[actuator] {} {}", video_id, detail);
        if let Some(capture) = &self.capture {
            capture.capture(&format!("actuator-{}", video_id));
        }
        detail
    }
}

impl Actuator for CommandActuator {
    fn perform(&self, video_id: &str, message: &str) -> String {
        let args = self.args_for(video_id, message);
        info!("[actuator] {} running {} {:?}", video_id, self.config.program, args);

        let output = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(out) if out.status.success() => {
                let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
                if stdout.is_empty() {
                    "completed".to_string()
                } else {
                    stdout
                }
            }
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                self.failed(
                    video_id,
                    format!("automation exited {}: {}", out.status, stderr.trim()),
                )
            }
            Err(e) => self.failed(
                video_id,
                format!("failed to start {}: {}", self.config.program, e),
            ),
        }
    }
}

/// Logs jobs without touching the screen.
#[derive(Debug, Default)]
pub struct DryRunActuator;

impl Actuator for DryRunActuator {
    fn perform(&self, video_id: &str, message: &str) -> String {
        info!("[actuator] dry run for {} with message {:?}", video_id, message);
        "dry run".to_string()
    }
}
