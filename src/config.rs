//! Configuration for reelpipe.
//!
//! Configuration sources (highest priority first):
//! 1. `--config <path>`
//! 2. `$REELPIPE_CONFIG`
//! 3. `./config.yaml`
//! 4. Built-in defaults
//!
//! The workspace root (where content, output, logs and state live) is
//! `$REELPIPE_HOME` if set, else `workspace` from the config file (relative
//! to the file's directory), else the config file's directory, else the
//! current directory.

pub mod paths;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;
use crate::core::scheduler::Cadence;
use crate::domain::PrivacyStatus;

use paths::Layout;

pub const CONFIG_ENV: &str = "REELPIPE_CONFIG";
pub const HOME_ENV: &str = "REELPIPE_HOME";
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Shorts constraints
pub const SHORTS_RESOLUTION: (u32, u32) = (1080, 1920);
pub const SHORTS_MAX_SECS: u32 = 60;
pub const SHORTS_SPEED: f32 = 1.25;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Workspace root, relative to the config file
    pub workspace: Option<String>,

    /// Selects the topic pool
    pub niche: String,

    /// Target narration length in seconds
    pub duration: u32,

    pub resolution: (u32, u32),
    pub fps: u32,

    /// Cadence name (`daily`, `twice_daily`, `thrice_daily`, `weekly`) or interval (`6h`)
    pub schedule: String,

    pub privacy_status: PrivacyStatus,
    pub upload_enabled: bool,

    /// Publishes allowed per 24h window
    pub daily_quota: u32,

    pub category_id: String,
    pub made_for_kids: bool,

    /// Speech rate multiplier for normal videos
    pub narration_speed: f32,

    pub topics_pool: BTreeMap<String, Vec<String>>,
    pub backends: BackendsConfig,
    pub publish: PublishConfig,
    pub assets: AssetsConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            workspace: None,
            niche: "tech_facts".to_string(),
            duration: 60,
            resolution: (1920, 1080),
            fps: 30,
            schedule: "daily".to_string(),
            privacy_status: PrivacyStatus::Public,
            upload_enabled: true,
            daily_quota: 6,
            category_id: "28".to_string(),
            made_for_kids: false,
            narration_speed: 1.0,
            topics_pool: BTreeMap::new(),
            backends: BackendsConfig::default(),
            publish: PublishConfig::default(),
            assets: AssetsConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Per-backend attempt bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub primary: Duration,
    pub fallback: Duration,
}

impl Timeouts {
    fn from_secs(primary: u64, fallback: u64) -> Self {
        Self {
            primary: Duration::from_secs(primary),
            fallback: Duration::from_secs(fallback),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub content: ContentBackendConfig,
    pub narration: NarrationBackendConfig,
    pub render: RenderBackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentBackendConfig {
    pub primary_timeout_seconds: u64,
    pub fallback_timeout_seconds: u64,
    pub model: String,
}

impl Default for ContentBackendConfig {
    fn default() -> Self {
        Self {
            primary_timeout_seconds: 60,
            fallback_timeout_seconds: 10,
            model: "gemini-2.0-flash".to_string(),
        }
    }
}

impl ContentBackendConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts::from_secs(self.primary_timeout_seconds, self.fallback_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationBackendConfig {
    pub primary_timeout_seconds: u64,
    pub fallback_timeout_seconds: u64,
    pub voice_id: String,
    pub model_id: String,
    /// Piper voice model (.onnx), relative to the workspace
    pub piper_model: String,
}

impl Default for NarrationBackendConfig {
    fn default() -> Self {
        Self {
            primary_timeout_seconds: 120,
            fallback_timeout_seconds: 300,
            voice_id: "onwK4e9ZLuTAKqWW03F9".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            piper_model: "assets/voices/en_US-lessac-medium.onnx".to_string(),
        }
    }
}

impl NarrationBackendConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts::from_secs(self.primary_timeout_seconds, self.fallback_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderBackendConfig {
    pub primary_timeout_seconds: u64,
    pub fallback_timeout_seconds: u64,
    /// Background clips for the local renderer, relative to the workspace
    pub clip_dir: String,
    pub background_color: String,
}

impl Default for RenderBackendConfig {
    fn default() -> Self {
        Self {
            primary_timeout_seconds: 900,
            fallback_timeout_seconds: 900,
            clip_dir: "assets/clips".to_string(),
            background_color: "0x101018".to_string(),
        }
    }
}

impl RenderBackendConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts::from_secs(self.primary_timeout_seconds, self.fallback_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub retry: RetryPolicy,

    /// Bound on a single upload attempt
    pub timeout_seconds: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout_seconds: 600,
        }
    }
}

impl PublishConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Background music mixed under the narration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub background_music: bool,

    /// Music gain relative to the narration (0.0 - 1.0)
    pub music_volume: f32,

    /// Music tracks, relative to the workspace
    pub music_dir: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            background_music: true,
            music_volume: 0.15,
            music_dir: "assets/music".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Wait after an unexpected run error (capped at the cadence interval)
    pub cooldown_seconds: u64,

    /// Pause between `--count` runs
    pub between_runs_seconds: u64,

    /// Stop after this many unexpected errors in a row (0 = never)
    pub max_consecutive_errors: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 300,
            between_runs_seconds: 10,
            max_consecutive_errors: 5,
        }
    }
}

/// Configuration with defaults applied and paths made absolute
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub settings: ConfigFile,
    pub cadence: Cadence,
    /// Absolute workspace root
    pub workspace: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn layout(&self) -> Layout {
        Layout::new(&self.workspace)
    }

    /// Resolve a workspace-relative setting
    pub fn workspace_path(&self, path: &str) -> PathBuf {
        resolve_path(&self.workspace, path)
    }

    /// Topics configured for the active niche
    pub fn topics(&self) -> Vec<String> {
        self.settings
            .topics_pool
            .get(&self.settings.niche)
            .cloned()
            .unwrap_or_default()
    }
}

/// Find the config file: explicit path, then env, then ./config.yaml
fn find_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = expand_home(&env_path);
        if !path.exists() {
            anyhow::bail!("{} points to a missing file: {}", CONFIG_ENV, path.display());
        }
        return Ok(Some(path));
    }

    let local = std::env::current_dir()
        .context("Failed to determine current directory")?
        .join(DEFAULT_CONFIG_FILE);
    Ok(local.exists().then_some(local))
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(yaml: &str) -> Result<ConfigFile> {
    if yaml.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    Ok(serde_yaml::from_str(yaml)?)
}

/// `~/x` -> `$HOME/x`
fn expand_home(path_str: &str) -> PathBuf {
    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path_str)
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = expand_home(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(&path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path))
    }
}

/// Check ranges the type system cannot
fn validate(settings: &ConfigFile) -> Result<()> {
    let (w, h) = settings.resolution;
    if w == 0 || h == 0 {
        anyhow::bail!("resolution must be non-zero, got {}x{}", w, h);
    }
    if settings.fps == 0 {
        anyhow::bail!("fps must be positive");
    }
    if settings.duration == 0 {
        anyhow::bail!("duration must be positive");
    }
    if settings.niche.trim().is_empty() {
        anyhow::bail!("niche must not be empty");
    }
    if settings.narration_speed <= 0.0 {
        anyhow::bail!("narration_speed must be positive");
    }
    if !(0.0..=1.0).contains(&settings.assets.music_volume) {
        anyhow::bail!(
            "assets.music_volume must be between 0 and 1, got {}",
            settings.assets.music_volume
        );
    }
    if settings.publish.timeout_seconds == 0 {
        anyhow::bail!("publish.timeout_seconds must be positive");
    }
    Ok(())
}

/// Load configuration from all sources
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_file = find_config_file(explicit)?;

    let settings = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };
    resolve(settings, config_file)
}

/// Apply env overrides and validation to parsed settings
pub fn resolve(settings: ConfigFile, config_file: Option<PathBuf>) -> Result<ResolvedConfig> {
    validate(&settings)?;

    let cadence: Cadence = settings
        .schedule
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
        .context("Invalid schedule")?;

    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let base_dir = match config_file.as_ref().and_then(|p| p.parent()) {
        Some(dir) if dir.as_os_str().is_empty() => cwd.clone(),
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => cwd.join(dir),
        None => cwd.clone(),
    };

    let workspace = if let Ok(env_home) = std::env::var(HOME_ENV) {
        resolve_path(&cwd, &env_home)
    } else if let Some(ref ws) = settings.workspace {
        resolve_path(&base_dir, ws)
    } else {
        base_dir
    };

    Ok(ResolvedConfig {
        settings,
        cadence,
        workspace,
        config_file,
    })
}
