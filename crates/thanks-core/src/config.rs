use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Files the watcher reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Channel list CSV (`username,channel_id,message`).
    #[serde(default = "default_channel_list")]
    pub channel_list: PathBuf,
    /// Completion ledger JSON.
    #[serde(default = "default_ledger")]
    pub ledger: PathBuf,
    /// Directory for diagnostic screen captures.
    #[serde(default = "default_captures_dir")]
    pub captures_dir: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Target wall-clock length of one poll cycle.
    #[serde(default = "default_cycle_secs")]
    pub cycle_secs: u64,
    /// Probes still running after this long are abandoned for the cycle.
    #[serde(default = "default_cycle_deadline_secs")]
    pub cycle_deadline_secs: u64,
    #[serde(default = "default_probe_workers")]
    pub probe_workers: usize,
    /// Each worker holds its slot at least this long per probe, which caps
    /// the request rate at `probe_workers / min_probe_secs`.
    #[serde(default = "default_min_probe_secs")]
    pub min_probe_secs: u64,
    /// Delay before retrying a cycle that failed as a whole.
    #[serde(default = "default_error_delay_secs")]
    pub error_delay_secs: u64,
    /// Process-lifetime cap on dispatch jobs.
    #[serde(default = "default_budget")]
    pub budget: u32,
    /// Number of forced re-dispatches of an already-seen video (startup validation).
    #[serde(default)]
    pub test_runs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_url_template")]
    pub url_template: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_base_timeout_secs")]
    pub base_timeout_secs: u64,
    /// Added to the timeout for every consecutive transient failure.
    #[serde(default = "default_backoff_step_secs")]
    pub backoff_step_secs: u64,
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,
    /// Cross-check the page blob against the channel's Atom feed.
    #[serde(default)]
    pub verify_with_feed: bool,
    #[serde(default = "default_feed_url_template")]
    pub feed_url_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// Automation program run once per dispatch job.
    #[serde(default = "default_actuator_program")]
    pub program: String,
    /// Arguments; `{url}`, `{video_id}` and `{message}` are substituted.
    #[serde(default = "default_actuator_args")]
    pub args: Vec<String>,
    #[serde(default = "default_watch_url_template")]
    pub watch_url_template: String,
    /// Log jobs instead of running the automation program.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_enabled")]
    pub enabled: bool,
    #[serde(default = "default_capture_program")]
    pub program: String,
    /// Arguments; `{path}` is substituted with the output image path.
    #[serde(default = "default_capture_args")]
    pub args: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            channel_list: default_channel_list(),
            ledger: default_ledger(),
            captures_dir: default_captures_dir(),
            log_file: default_log_file(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            cycle_secs: default_cycle_secs(),
            cycle_deadline_secs: default_cycle_deadline_secs(),
            probe_workers: default_probe_workers(),
            min_probe_secs: default_min_probe_secs(),
            error_delay_secs: default_error_delay_secs(),
            budget: default_budget(),
            test_runs: 0,
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
            user_agent: default_user_agent(),
            base_timeout_secs: default_base_timeout_secs(),
            backoff_step_secs: default_backoff_step_secs(),
            max_timeout_secs: default_max_timeout_secs(),
            verify_with_feed: false,
            feed_url_template: default_feed_url_template(),
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            program: default_actuator_program(),
            args: default_actuator_args(),
            watch_url_template: default_watch_url_template(),
            dry_run: false,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: default_capture_enabled(),
            program: default_capture_program(),
            args: default_capture_args(),
        }
    }
}

impl PollConfig {
    pub fn cycle_length(&self) -> Duration {
        Duration::from_secs(self.cycle_secs)
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle_deadline_secs)
    }

    pub fn min_probe_time(&self) -> Duration {
        Duration::from_secs(self.min_probe_secs)
    }

    pub fn error_delay(&self) -> Duration {
        Duration::from_secs(self.error_delay_secs)
    }
}

fn default_channel_list() -> PathBuf {
    platform::config_dir().join("channel_list.csv")
}

fn default_ledger() -> PathBuf {
    platform::data_dir().join("completed.json")
}

fn default_captures_dir() -> PathBuf {
    platform::data_dir().join("captures")
}

fn default_log_file() -> PathBuf {
    platform::data_dir().join("thanks.log")
}

fn default_cycle_secs() -> u64 {
    60
}

fn default_cycle_deadline_secs() -> u64 {
    55
}

fn default_probe_workers() -> usize {
    10
}

fn default_min_probe_secs() -> u64 {
    5
}

fn default_error_delay_secs() -> u64 {
    5
}

fn default_budget() -> u32 {
    100
}

fn default_url_template() -> String {
    "https://www.youtube.com/channel/{channel_id}/videos".to_string()
}

fn default_user_agent() -> String {
    platform::BROWSER_USER_AGENT.to_string()
}

fn default_base_timeout_secs() -> u64 {
    10
}

fn default_backoff_step_secs() -> u64 {
    5
}

fn default_max_timeout_secs() -> u64 {
    40
}

fn default_feed_url_template() -> String {
    "https://www.youtube.com/feeds/videos.xml?channel_id={channel_id}".to_string()
}

fn default_actuator_program() -> String {
    "send-super-thanks".to_string()
}

fn default_actuator_args() -> Vec<String> {
    vec!["{url}".to_string(), "{message}".to_string()]
}

fn default_watch_url_template() -> String {
    "https://www.youtube.com/watch?v={video_id}".to_string()
}

fn default_capture_enabled() -> bool {
    true
}

fn default_capture_program() -> String {
    platform::default_capture_command().0
}

fn default_capture_args() -> Vec<String> {
    platform::default_capture_command().1
}

impl Config {
    /// Load from the default location, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
