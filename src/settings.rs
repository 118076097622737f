use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Mutable runtime settings, owned and written by the operator, re-read by
/// the loop on every inner tick. Absent keys fall back to the defaults the
/// source was built with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_monitoring")]
    pub monitoring: bool,
    /// Minimum qualifying ride price.
    #[serde(default = "default_price")]
    pub price: f64,
    /// Sleep between inner ticks, in seconds.
    #[serde(default = "default_interval")]
    pub interval: f64,
}

fn default_monitoring() -> bool {
    true
}

fn default_price() -> f64 {
    300.0
}

fn default_interval() -> f64 {
    60.0
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            monitoring: default_monitoring(),
            price: default_price(),
            interval: default_interval(),
        }
    }
}

impl Settings {
    /// Negative intervals clamp to zero; values a `Duration` cannot hold
    /// (overflow, NaN) fall back to the built-in default. The file is
    /// operator-written, so a bad value must never take the loop down.
    pub fn interval_duration(&self) -> Duration {
        match Duration::try_from_secs_f64(self.interval.max(0.0)) {
            Ok(interval) => interval,
            Err(_) => {
                warn!("interval {} is out of range — using default", self.interval);
                Duration::from_secs_f64(default_interval())
            }
        }
    }

    /// Defaults from the `DEFAULT_SETTINGS` env blob, or built-ins when the
    /// variable is absent.
    pub fn defaults_from_env() -> Result<Self> {
        match std::env::var("DEFAULT_SETTINGS") {
            Ok(blob) => {
                serde_json::from_str(&blob).context("failed to parse DEFAULT_SETTINGS")
            }
            Err(_) => Ok(Self::default()),
        }
    }
}

/// Provider of the current runtime settings.
///
/// The loop only reads; whoever owns the backing store writes. Tests swap
/// in an in-memory, time-varying source.
pub trait SettingsSource: Send + Sync {
    fn current(&self) -> Settings;
}

/// JSON-file-backed settings source. Creates the file from the default
/// blob on first run; each `current()` call re-reads it.
pub struct FileSettings {
    path: PathBuf,
    defaults: Settings,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>, defaults: Settings) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            write_settings(&path, &defaults)?;
        }
        Ok(Self { path, defaults })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    let contents =
        serde_json::to_string_pretty(settings).context("failed to serialize settings")?;
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

impl SettingsSource for FileSettings {
    /// An unreadable or corrupt file degrades to the defaults with a
    /// warning rather than aborting the cycle.
    fn current(&self) -> Settings {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("failed to read {}: {e} — using defaults", self.path.display());
                return self.defaults;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("failed to parse {}: {e} — using defaults", self.path.display());
                self.defaults
            }
        }
    }
}
