use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, ShowSyncError};

const ENV_PREFIX: &str = "SHOWSYNC_";

/// Top-level configuration structure for the player.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub dmx: DmxConfig,
    pub playback: PlaybackConfig,
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Loads the configuration file when it exists, falling back to the
    /// defaults otherwise, then applies `SHOWSYNC_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                let config: AppConfig = serde_json::from_str(&raw)?;
                tracing::info!(path = %path.display(), "configuration loaded");
                config
            }
            Some(path) => {
                tracing::info!(path = %path.display(), "no configuration file, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides looked up by key (`DMX_MODE`, `DMX_IP`,
    /// `DMX_UNIVERSE`, `LOG_LEVEL`, `TICK_MS`). Values that fail to parse are
    /// logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("DMX_MODE") {
            match serde_json::from_value::<DmxMode>(serde_json::Value::String(mode.clone())) {
                Ok(mode) => self.dmx.mode = mode,
                Err(_) => tracing::warn!(%mode, "ignoring unknown DMX mode override"),
            }
        }
        if let Some(ip) = lookup("DMX_IP") {
            self.dmx.ip = ip;
        }
        if let Some(universe) = lookup("DMX_UNIVERSE") {
            match universe.parse() {
                Ok(value) => self.dmx.universe = value,
                Err(_) => tracing::warn!(%universe, "ignoring invalid DMX universe override"),
            }
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = Some(level);
        }
        if let Some(tick) = lookup("TICK_MS") {
            match tick.parse() {
                Ok(value) => self.playback.tick_interval_ms = value,
                Err(_) => tracing::warn!(%tick, "ignoring invalid tick interval override"),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dmx.fps == 0 {
            return Err(ShowSyncError::config("dmx.fps must be greater than zero"));
        }
        if self.playback.tick_interval_ms == 0 {
            return Err(ShowSyncError::config(
                "playback.tickIntervalMs must be greater than zero",
            ));
        }
        if self.dmx.mode == DmxMode::Sacn && !(1..=63_999).contains(&self.dmx.universe) {
            return Err(ShowSyncError::config(format!(
                "sACN universe {} is outside 1..=63999",
                self.dmx.universe
            )));
        }
        Ok(())
    }
}

/// Which wire protocol carries the DMX frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmxMode {
    Artnet,
    Sacn,
    Usb,
}

/// USB adapter families and their framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsbDriver {
    EnttecOpen,
    EnttecPro,
    Dmxking,
}

/// Configuration specific to the DMX transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DmxConfig {
    pub enabled: bool,
    pub mode: DmxMode,
    pub ip: String,
    pub port: u16,
    pub universe: u16,
    pub sacn_multicast: bool,
    pub sacn_priority: u8,
    pub source_name: String,
    pub usb_port: String,
    pub usb_driver: UsbDriver,
    pub usb_baudrate: u32,
    pub fps: u32,
    pub send_timeout_ms: u64,
}

impl Default for DmxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: DmxMode::Artnet,
            ip: "255.255.255.255".to_string(),
            port: 6454,
            universe: 0,
            sacn_multicast: true,
            sacn_priority: 100,
            source_name: "showsync".to_string(),
            usb_port: "/dev/ttyUSB0".to_string(),
            usb_driver: UsbDriver::EnttecPro,
            usb_baudrate: 250_000,
            fps: 40,
            send_timeout_ms: 20,
        }
    }
}

impl DmxConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn is_broadcast(&self) -> bool {
        self.ip == "255.255.255.255" || self.ip.ends_with(".255")
    }
}

/// Configuration of the tick loop and scene start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaybackConfig {
    pub tick_interval_ms: u64,
    pub blackout_timeout_ms: u64,
    /// Decoder drift beyond this is corrected with a seek. Zero disables it.
    pub drift_tolerance_ms: u64,
    pub autoplay: bool,
    pub start_scene_id: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 25,
            blackout_timeout_ms: 100,
            drift_tolerance_ms: 250,
            autoplay: true,
            start_scene_id: None,
        }
    }
}

impl PlaybackConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn blackout_timeout(&self) -> Duration {
        Duration::from_millis(self.blackout_timeout_ms)
    }

    pub fn drift_tolerance(&self) -> Duration {
        Duration::from_millis(self.drift_tolerance_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_the_dmx_cadence() {
        let config = AppConfig::default();
        assert_eq!(config.playback.tick_interval_ms, 25);
        assert_eq!(config.dmx.fps, 40);
        assert_eq!(config.dmx.port, 6454);
        assert!(config.dmx.is_broadcast());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_partial_file_and_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "dmx": {{ "mode": "sacn", "universe": 3 }}, "logLevel": null }}"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.dmx.mode, DmxMode::Sacn);
        assert_eq!(config.dmx.universe, 3);
        assert_eq!(config.dmx.usb_baudrate, 250_000);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config.dmx.mode, DmxMode::Artnet);
    }

    #[test]
    fn environment_overrides_apply_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = [
            ("DMX_MODE", "usb"),
            ("DMX_IP", "10.0.0.20"),
            ("DMX_UNIVERSE", "not-a-number"),
            ("TICK_MS", "20"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.dmx.mode, DmxMode::Usb);
        assert_eq!(config.dmx.ip, "10.0.0.20");
        assert_eq!(config.dmx.universe, 0);
        assert_eq!(config.playback.tick_interval_ms, 20);
    }

    #[test]
    fn rejects_zero_tick_interval() {
        let mut config = AppConfig::default();
        config.playback.tick_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ShowSyncError::Configuration(_)));
    }
}
