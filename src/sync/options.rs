//! Synchronisation options and their TOML representation.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use super::metrics::{default_metrics, SyncMetrics};

/// Default change ratio above which an indexed file is re-inserted in bulk.
pub const DEFAULT_MAX_CHANGE_RATIO: f64 = 0.5;
/// Default number of proxy lists resolved per transaction.
pub const DEFAULT_PROXY_CHUNK_SIZE: usize = 5_000;
/// Default number of derived nodes evaluated per transaction.
pub const DEFAULT_DERIVED_CHUNK_SIZE: usize = 1_000;
/// Default number of processed items between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: usize = 25_000;

/// Tuning knobs for a [`super::ModelUpdater`].
#[derive(Clone)]
pub struct SyncOptions {
    /// Change ratio above which a file is deleted and re-inserted.
    pub max_change_ratio: f64,
    /// Proxy lists resolved per transaction.
    pub proxy_chunk_size: usize,
    /// Derived nodes evaluated per transaction.
    pub derived_chunk_size: usize,
    /// Items processed between progress log lines.
    pub progress_interval: usize,
    /// Metrics sink.
    pub metrics: Arc<dyn SyncMetrics>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_change_ratio: DEFAULT_MAX_CHANGE_RATIO,
            proxy_chunk_size: DEFAULT_PROXY_CHUNK_SIZE,
            derived_chunk_size: DEFAULT_DERIVED_CHUNK_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            metrics: default_metrics(),
        }
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("max_change_ratio", &self.max_change_ratio)
            .field("proxy_chunk_size", &self.proxy_chunk_size)
            .field("derived_chunk_size", &self.derived_chunk_size)
            .field("progress_interval", &self.progress_interval)
            .finish_non_exhaustive()
    }
}

impl SyncOptions {
    /// Options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the change ratio threshold.
    pub fn max_change_ratio(mut self, ratio: f64) -> Self {
        self.max_change_ratio = ratio;
        self
    }

    /// Sets the proxy resolution chunk size.
    pub fn proxy_chunk_size(mut self, size: usize) -> Self {
        self.proxy_chunk_size = size;
        self
    }

    /// Sets the derivation chunk size.
    pub fn derived_chunk_size(mut self, size: usize) -> Self {
        self.derived_chunk_size = size;
        self
    }

    /// Sets the progress log interval.
    pub fn progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn SyncMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Parses options from TOML. Absent keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawOptions = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            origin: "<inline>".to_string(),
            source,
        })?;
        raw.into_options()
    }

    /// Reads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawOptions = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })?;
        raw.into_options()
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.max_change_ratio) {
            return Err(ConfigError::Invalid {
                field: "max_change_ratio",
                reason: format!("{} is outside [0, 1]", self.max_change_ratio),
            });
        }
        for (field, value) in [
            ("proxy_chunk_size", self.proxy_chunk_size),
            ("derived_chunk_size", self.derived_chunk_size),
            ("progress_interval", self.progress_interval),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOptions {
    max_change_ratio: Option<f64>,
    proxy_chunk_size: Option<usize>,
    derived_chunk_size: Option<usize>,
    progress_interval: Option<usize>,
}

impl RawOptions {
    fn into_options(self) -> Result<SyncOptions, ConfigError> {
        let defaults = SyncOptions::default();
        let options = SyncOptions {
            max_change_ratio: self.max_change_ratio.unwrap_or(defaults.max_change_ratio),
            proxy_chunk_size: self.proxy_chunk_size.unwrap_or(defaults.proxy_chunk_size),
            derived_chunk_size: self
                .derived_chunk_size
                .unwrap_or(defaults.derived_chunk_size),
            progress_interval: self.progress_interval.unwrap_or(defaults.progress_interval),
            metrics: defaults.metrics,
        };
        options.validate()?;
        Ok(options)
    }
}

/// Errors raised while loading [`SyncOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read sync config {}: {source}", path.display())]
    Read {
        /// File that was read.
        path: PathBuf,
        /// I/O failure.
        source: std::io::Error,
    },
    /// The config text is not valid TOML for these options.
    #[error("failed to parse sync config {origin}: {source}")]
    Parse {
        /// File path, or a description of an in-memory source.
        origin: String,
        /// Parser failure.
        source: toml::de::Error,
    },
    /// A value parsed but is out of range.
    #[error("invalid sync config value for {field}: {reason}")]
    Invalid {
        /// Option name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
