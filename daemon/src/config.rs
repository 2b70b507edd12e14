use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::event::DaemonEvent;

pub const MIN_PENDING_TIMEOUT_MS: u64 = 1_000;
pub const MAX_PENDING_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_PENDING_TIMEOUT_MS: u64 = 10_000;

pub const MIN_DEBOUNCE_MS: u64 = 20;
pub const MAX_DEBOUNCE_MS: u64 = 2_000;
pub const DEFAULT_DEBOUNCE_MS: u64 = 140;

pub const MIN_SELF_WRITE_WINDOW_MS: u64 = 10;
pub const MAX_SELF_WRITE_WINDOW_MS: u64 = 1_000;
pub const DEFAULT_SELF_WRITE_WINDOW_MS: u64 = 100;

/// The baseline must stay away from both ends of the range, otherwise presses
/// in one direction produce no change at all.
pub const MIN_BASELINE_LEVEL: f32 = 0.1;
pub const MAX_BASELINE_LEVEL: f32 = 0.9;
pub const DEFAULT_BASELINE_LEVEL: f32 = 0.5;

/// A leading `~` is expanded to the user's home directory at runtime.
pub const DEFAULT_ARTIFACT_DIR: &str = "~/Pictures/Luma";

pub const DEFAULT_CAPTURE_LATENCY_MS: u64 = 120;

/// Root configuration structure. Deserialized from `<data dir>/Luma/config.toml`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CameraPosition {
    #[default]
    Front,
    Back,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Lens {
    #[default]
    Wide,
    UltraWide,
    Telephoto,
}

/// Device selection and request bookkeeping.  Read once, at first configure.
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default)]
    pub camera_position: CameraPosition,
    #[serde(default)]
    pub lens: Lens,
    /// Pending captures older than this fail with a timeout. Clamped to [1000, 120000].
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            camera_position: CameraPosition::default(),
            lens: Lens::default(),
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        }
    }
}

impl SessionConfig {
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_millis(
            self.pending_timeout_ms
                .clamp(MIN_PENDING_TIMEOUT_MS, MAX_PENDING_TIMEOUT_MS),
        )
    }
}

/// Physical-button trigger timing.  Re-applied on config reload.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TriggerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum spacing between accepted presses. Clamped to [20, 2000].
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
    /// How long a change after our own baseline write is ignored. Clamped to [10, 1000].
    #[serde(default = "default_self_write_window")]
    pub self_write_window_ms: u64,
    /// Level written back after every accepted press. Clamped to [0.1, 0.9].
    #[serde(default = "default_baseline")]
    pub baseline_level: f32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            self_write_window_ms: DEFAULT_SELF_WRITE_WINDOW_MS,
            baseline_level: DEFAULT_BASELINE_LEVEL,
        }
    }
}

impl TriggerConfig {
    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS))
    }

    pub fn self_write_window(&self) -> Duration {
        Duration::from_millis(
            self.self_write_window_ms
                .clamp(MIN_SELF_WRITE_WINDOW_MS, MAX_SELF_WRITE_WINDOW_MS),
        )
    }

    pub fn effective_baseline(&self) -> f32 {
        if self.baseline_level.is_nan() {
            return DEFAULT_BASELINE_LEVEL;
        }
        self.baseline_level.clamp(MIN_BASELINE_LEVEL, MAX_BASELINE_LEVEL)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// Directory captured artifacts are written into.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { artifact_dir: DEFAULT_ARTIFACT_DIR.to_string() }
    }
}

impl OutputConfig {
    /// Returns `artifact_dir` with a leading `~` replaced by the home directory.
    pub fn resolved_artifact_dir(&self) -> PathBuf {
        expand_home(&self.artifact_dir)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    Granted,
    Denied,
    #[default]
    Undetermined,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AccessConfig {
    /// Initial camera authorization before any prompt is answered.
    #[serde(default)]
    pub camera: AccessPolicy,
}

/// Parameters for the simulated camera shipped with the daemon.
#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default = "default_true")]
    pub camera_available: bool,
    #[serde(default = "default_capture_latency")]
    pub capture_latency_ms: u64,
    /// Every Nth capture reports a hardware error. 0 disables.
    #[serde(default)]
    pub fail_every: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            camera_available: true,
            capture_latency_ms: DEFAULT_CAPTURE_LATENCY_MS,
            fail_every: 0,
        }
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches(['/', '\\']));
        }
    }
    PathBuf::from(raw)
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!("failed to create config watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            warn!("config path {} has no parent directory", path.display());
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        warn!("failed to watch config directory {}: {e}", watch_dir.display());
        return;
    }
    info!(dir = %watch_dir.display(), "watching config");

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("failed to reload config: {e:#}"),
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_pending_timeout() -> u64 {
    DEFAULT_PENDING_TIMEOUT_MS
}

fn default_debounce() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_self_write_window() -> u64 {
    DEFAULT_SELF_WRITE_WINDOW_MS
}

fn default_baseline() -> f32 {
    DEFAULT_BASELINE_LEVEL
}

fn default_artifact_dir() -> String {
    DEFAULT_ARTIFACT_DIR.to_string()
}

fn default_capture_latency() -> u64 {
    DEFAULT_CAPTURE_LATENCY_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn config_default_values() {
        let c = Config::default();
        assert_eq!(c.session.camera_position, CameraPosition::Front);
        assert_eq!(c.session.lens, Lens::Wide);
        assert_eq!(c.session.pending_timeout_ms, DEFAULT_PENDING_TIMEOUT_MS);
        assert!(c.trigger.enabled);
        assert_eq!(c.trigger.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(c.trigger.self_write_window_ms, DEFAULT_SELF_WRITE_WINDOW_MS);
        assert_eq!(c.trigger.baseline_level, DEFAULT_BASELINE_LEVEL);
        assert_eq!(c.output.artifact_dir, DEFAULT_ARTIFACT_DIR);
        assert_eq!(c.access.camera, AccessPolicy::Undetermined);
        assert!(c.simulation.camera_available);
        assert_eq!(c.simulation.fail_every, 0);
    }

    // ── clamping ──────────────────────────────────────────────────────────────

    #[test]
    fn pending_timeout_is_clamped() {
        let mut s = SessionConfig::default();
        s.pending_timeout_ms = 5;
        assert_eq!(s.pending_timeout(), Duration::from_millis(MIN_PENDING_TIMEOUT_MS));
        s.pending_timeout_ms = 10_000_000;
        assert_eq!(s.pending_timeout(), Duration::from_millis(MAX_PENDING_TIMEOUT_MS));
    }

    #[test]
    fn trigger_timings_are_clamped() {
        let t = TriggerConfig {
            debounce_ms: 0,
            self_write_window_ms: 99_999,
            ..TriggerConfig::default()
        };
        assert_eq!(t.debounce_interval(), Duration::from_millis(MIN_DEBOUNCE_MS));
        assert_eq!(t.self_write_window(), Duration::from_millis(MAX_SELF_WRITE_WINDOW_MS));
    }

    #[test]
    fn baseline_is_never_pinned_at_range_ends() {
        let low = TriggerConfig { baseline_level: 0.0, ..TriggerConfig::default() };
        let high = TriggerConfig { baseline_level: 1.0, ..TriggerConfig::default() };
        let nan = TriggerConfig { baseline_level: f32::NAN, ..TriggerConfig::default() };
        assert_eq!(low.effective_baseline(), MIN_BASELINE_LEVEL);
        assert_eq!(high.effective_baseline(), MAX_BASELINE_LEVEL);
        assert_eq!(nan.effective_baseline(), DEFAULT_BASELINE_LEVEL);
    }

    // ── artifact dir ──────────────────────────────────────────────────────────

    #[test]
    fn artifact_dir_without_tilde_is_unchanged() {
        let o = OutputConfig { artifact_dir: "/srv/captures".into() };
        assert_eq!(o.resolved_artifact_dir(), PathBuf::from("/srv/captures"));
    }

    #[test]
    fn artifact_dir_tilde_expands_to_home() {
        let Some(home) = dirs::home_dir() else { return };
        let o = OutputConfig::default();
        assert_eq!(o.resolved_artifact_dir(), home.join("Pictures/Luma"));
    }

    // ── load_or_default ───────────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_or_default(&path).unwrap();
        assert_eq!(config.trigger.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(config.access.camera, AccessPolicy::Undetermined);
    }

    #[test]
    fn load_or_default_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[session]
camera_position = "back"
lens = "ultra_wide"
pending_timeout_ms = 5000

[trigger]
enabled = false
debounce_ms = 200
self_write_window_ms = 80
baseline_level = 0.4

[output]
artifact_dir = "/tmp/luma"

[access]
camera = "granted"

[simulation]
camera_available = false
capture_latency_ms = 10
fail_every = 3
"#,
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.session.camera_position, CameraPosition::Back);
        assert_eq!(config.session.lens, Lens::UltraWide);
        assert_eq!(config.session.pending_timeout_ms, 5000);
        assert!(!config.trigger.enabled);
        assert_eq!(config.trigger.debounce_ms, 200);
        assert_eq!(config.trigger.self_write_window_ms, 80);
        assert_eq!(config.trigger.baseline_level, 0.4);
        assert_eq!(config.output.artifact_dir, "/tmp/luma");
        assert_eq!(config.access.camera, AccessPolicy::Granted);
        assert!(!config.simulation.camera_available);
        assert_eq!(config.simulation.capture_latency_ms, 10);
        assert_eq!(config.simulation.fail_every, 3);
    }

    #[test]
    fn load_or_default_partial_toml_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[trigger]\ndebounce_ms = 300\n").unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.trigger.debounce_ms, 300);
        assert!(config.trigger.enabled);
        assert_eq!(config.trigger.self_write_window_ms, DEFAULT_SELF_WRITE_WINDOW_MS);
        assert_eq!(config.session.lens, Lens::Wide);
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn load_or_default_rejects_unknown_lens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nlens = \"fisheye\"\n").unwrap();
        assert!(load_or_default(&path).is_err());
    }
}
