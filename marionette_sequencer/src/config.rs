//! Configuration loading with validation.
//!
//! Unified config-dir layout:
//!
//! ```text
//! config/
//! ├── config.toml      engine settings (+ shared service fields)
//! ├── channels.toml    channel limits table
//! └── sequences/       *.json sequence definitions
//! ```
//!
//! Loading is fail-fast at every level: a bad channel entry rejects the
//! whole table, a bad sequence rejects the whole library, and nothing is
//! partially installed.

use crate::library::{LibraryError, SequenceLibrary};
use marionette_common::channel::{ChannelConfigError, ChannelLimits, ChannelTable};
use marionette_common::config::{ConfigError, ConfigLoader, SharedConfig};
use marionette_common::consts::DEFAULT_SINK_FAILURE_LIMIT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

// ─── Error Type ─────────────────────────────────────────────────────

/// Configuration loading/validation error for the whole config dir.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// `config.toml` failed to load.
    #[error("engine config: {0}")]
    Engine(#[from] ConfigError),

    /// `channels.toml` could not be read or parsed.
    #[error("channel config at {path}: {reason}")]
    Channels { path: String, reason: String },

    /// A channel entry failed validation.
    #[error("channel config: {0}")]
    ChannelTable(#[from] ChannelConfigError),

    /// The sequence library failed to load.
    #[error("sequence library: {0}")]
    Library(#[from] LibraryError),
}

// ─── Engine Settings ────────────────────────────────────────────────

/// What the engine does on an operator `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopBehavior {
    /// Re-dispatch each channel's last commanded position once.
    #[default]
    HoldLast,
    /// Park every affected channel at its home position.
    GoToHome,
    /// Command nothing (hardware holds or drifts on its own).
    NoOp,
}

fn default_sink_failure_limit() -> u32 {
    DEFAULT_SINK_FAILURE_LIMIT
}

fn default_sequences_dir() -> PathBuf {
    PathBuf::from("sequences")
}

/// Tunable sequencer behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencerSettings {
    /// Consecutive all-channel dispatch failures before playback stops.
    #[serde(default = "default_sink_failure_limit")]
    pub sink_failure_limit: u32,

    /// Final dispatch policy on operator stop.
    #[serde(default)]
    pub stop_behavior: StopBehavior,

    /// Drive channels to their emergency positions if the tick task
    /// crashes. Default off: forcing motion on a crash can itself be
    /// unsafe, so the fallback is to stop commanding and hold last.
    #[serde(default)]
    pub fault_drives_emergency: bool,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            sink_failure_limit: DEFAULT_SINK_FAILURE_LIMIT,
            stop_behavior: StopBehavior::default(),
            fault_drives_emergency: false,
        }
    }
}

/// Top-level `config.toml` structure.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Service identity + log level.
    pub shared: SharedConfig,

    /// Sequencer tunables.
    #[serde(default)]
    pub sequencer: SequencerSettings,

    /// Sequence definition directory, relative to the config dir.
    #[serde(default = "default_sequences_dir")]
    pub sequences_dir: PathBuf,
}

impl ConfigLoader for EngineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.sequencer.sink_failure_limit == 0 {
            return Err(ConfigError::ValidationError(
                "sink_failure_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ─── Channels File ──────────────────────────────────────────────────

/// `channels.toml` structure: an array of channel limit tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsFile {
    /// Per-channel limit entries.
    pub channels: Vec<ChannelLimits>,
}

// ─── Loaded Config Bundle ───────────────────────────────────────────

/// Complete validated configuration, ready for engine construction.
#[derive(Debug)]
pub struct LoadedConfig {
    pub engine: EngineConfig,
    pub table: ChannelTable,
    pub library: SequenceLibrary,
}

// ─── Loading Functions ──────────────────────────────────────────────

/// Load and validate the full configuration from a config directory.
///
/// 1. Parse `config.toml` → `EngineConfig`
/// 2. Parse `channels.toml` → `ChannelTable` (validated)
/// 3. Load `<sequences_dir>/*.json` → `SequenceLibrary` (validated)
pub fn load_config_dir(dir: &Path) -> Result<LoadedConfig, ConfigLoadError> {
    let engine = EngineConfig::load(&dir.join("config.toml"))?;

    let channels_path = dir.join("channels.toml");
    let raw = std::fs::read_to_string(&channels_path).map_err(|e| ConfigLoadError::Channels {
        path: channels_path.display().to_string(),
        reason: e.to_string(),
    })?;
    let channels_file: ChannelsFile =
        toml::from_str(&raw).map_err(|e| ConfigLoadError::Channels {
            path: channels_path.display().to_string(),
            reason: e.to_string(),
        })?;
    let table = ChannelTable::from_limits(&channels_file.channels)?;

    let sequences_dir = dir.join(&engine.sequences_dir);
    let library = SequenceLibrary::load_dir(&sequences_dir)?;

    info!(
        service = engine.shared.service_name,
        channels = table.len(),
        sequences = library.len(),
        "configuration loaded"
    );

    Ok(LoadedConfig {
        engine,
        table,
        library,
    })
}
