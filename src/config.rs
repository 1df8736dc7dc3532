//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the bike-pulse.toml file.
//! It provides a centralized way to configure the station feed, the map view and the
//! per-category pulse styles, with a few environment overrides layered on top.
//!
//! ## Environment Overrides
//! - `BIKE_PULSE_API_URL`: replaces `feed.base_url`
//! - `BIKE_PULSE_POLL_SECS`: replaces `feed.poll_interval_secs`
//! - `MAPBOX_TOKEN`: replaces `map.access_token`

use crate::pulse::{DEFAULT_ICON_SIZE, MAX_ICON_SIZE};
use crate::risk::{CategoryStyles, PulseStyle, RiskCategory};
use crate::Position;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Config file read when no `--config` path is given.
pub const DEFAULT_CONFIG_PATH: &str = "bike-pulse.toml";

pub const ENV_API_URL: &str = "BIKE_PULSE_API_URL";
pub const ENV_POLL_SECS: &str = "BIKE_PULSE_POLL_SECS";
pub const ENV_ACCESS_TOKEN: &str = "MAPBOX_TOKEN";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("map access token missing (set {} or map.access_token)", ENV_ACCESS_TOKEN)]
    MissingAccessToken,
}

/// Application configuration loaded from bike-pulse.toml
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Station feed location and polling cadence
    pub feed: FeedConfig,
    /// Initial map view and engine credentials
    pub map: MapConfig,
    /// Marker icon size, repaint rate and per-category styles
    pub pulse: PulseConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Backend base URL; the stations endpoint is `<base_url>/api/stations`
    pub base_url: String,
    pub poll_interval_secs: u64,
    /// Per-request timeout
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MapConfig {
    /// Required only in live map mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// `[lon, lat]`
    pub center: Position,
    pub zoom: f64,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PulseConfig {
    /// Edge length of each square marker icon in pixels
    pub icon_size: u32,
    /// Repaint rate of the animation clock
    pub frame_rate_hz: u32,
    pub critical: PulseStyle,
    pub low: PulseStyle,
    pub healthy: PulseStyle,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            base_url: "http://localhost:5000".to_string(),
            poll_interval_secs: 60,
            request_timeout_secs: 15,
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            access_token: None,
            center: Position {
                lon: -73.9857,
                lat: 40.7484,
            }, // Midtown Manhattan
            zoom: 13.0,
        }
    }
}

impl Default for PulseConfig {
    fn default() -> Self {
        let styles = CategoryStyles::default();
        PulseConfig {
            icon_size: DEFAULT_ICON_SIZE,
            frame_rate_hz: 30,
            critical: styles.critical,
            low: styles.low,
            healthy: styles.healthy,
        }
    }
}

impl PulseConfig {
    pub fn styles(&self) -> CategoryStyles {
        CategoryStyles {
            critical: self.critical,
            low: self.low,
            healthy: self.healthy,
        }
    }
}

impl Config {
    /// Load configuration from bike-pulse.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), feed = %config.feed.base_url, "Loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Invalid config file format, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save current configuration to `path`
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        info!(path = %path.as_ref().display(), "Configuration saved");
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    ///
    /// An unparsable poll interval is logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.feed.base_url = url;
        }
        if let Some(token) = lookup(ENV_ACCESS_TOKEN) {
            self.map.access_token = Some(token);
        }
        if let Some(secs) = lookup(ENV_POLL_SECS) {
            match secs.trim().parse::<u64>() {
                Ok(secs) => self.feed.poll_interval_secs = secs,
                Err(e) => warn!(value = %secs, error = %e, "Ignoring {}", ENV_POLL_SECS),
            }
        }
    }

    /// Reject values that would stall the poller or the animation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("feed.base_url is empty".to_string()));
        }
        if self.feed.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "feed.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.pulse.icon_size == 0 {
            return Err(ConfigError::Invalid(
                "pulse.icon_size must be positive".to_string(),
            ));
        }
        if self.pulse.icon_size > MAX_ICON_SIZE {
            return Err(ConfigError::Invalid(format!(
                "pulse.icon_size must be at most {}",
                MAX_ICON_SIZE
            )));
        }
        if self.pulse.frame_rate_hz == 0 {
            return Err(ConfigError::Invalid(
                "pulse.frame_rate_hz must be positive".to_string(),
            ));
        }
        let styles = self.pulse.styles();
        for category in RiskCategory::ALL {
            if styles.get(category).period_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "pulse.{}.period_ms must be positive",
                    category.label().to_lowercase()
                )));
            }
        }
        Ok(())
    }

    /// The map access token, required for live map mode.
    pub fn require_access_token(&self) -> Result<&str, ConfigError> {
        match self.map.access_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(ConfigError::MissingAccessToken),
        }
    }

    pub fn stations_url(&self) -> String {
        crate::feed::stations_url(&self.feed.base_url)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.feed.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.request_timeout_secs)
    }

    /// Time between two repaints of the pulse icons.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.pulse.frame_rate_hz.max(1)))
    }
}
