//! Simulation tuning loaded from an optional TOML file.
//!
//! Every key is optional; anything missing falls back to [`SimConfig::default`].
//! Addressing (IP, ports, instance count) lives on the command line instead.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::SimError;

/// Bounding volume the simulated drones may occupy, in centimetres.
///
/// Horizontal axes span `-horizontal..=horizontal`; height spans `0..=ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Bounds {
    pub horizontal: f64,
    pub ceiling: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            horizontal: 2000.0,
            ceiling: 3000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SimConfig {
    /// Integrator tick period (ms).
    pub tick_ms: u64,
    /// Telemetry broadcast period (ms).
    pub broadcast_ms: u64,
    /// Hover height reached after `takeoff` (cm).
    pub takeoff_height: f64,
    /// Initial `speed` setting (cm/s).
    pub default_speed: u32,
    /// Exponential approach rate toward the target (1/s).
    pub ease_rate: f64,
    /// Minimum yaw rate while turning (deg/s).
    pub yaw_rate: f64,
    /// Battery drain while airborne (%/s).
    pub flight_drain: f64,
    /// Battery drain while on the ground (%/s).
    pub idle_drain: f64,
    pub takeoff_min_battery: u8,
    pub flip_min_battery: u8,
    pub temp_low: i32,
    pub temp_high: i32,
    /// Barometric pressure at ground level (hPa).
    pub baro_ground: f64,
    /// Peak uniform jitter applied to broadcast baro readings (hPa).
    pub baro_noise: f64,
    pub wifi_snr: u8,
    pub sdk_version: String,
    pub bounds: Bounds,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_ms: 20,
            broadcast_ms: 100,
            takeoff_height: 80.0,
            default_speed: 50,
            ease_rate: 4.0,
            yaw_rate: 90.0,
            flight_drain: 0.1,
            idle_drain: 0.0,
            takeoff_min_battery: 10,
            flip_min_battery: 50,
            temp_low: 20,
            temp_high: 25,
            baro_ground: 1013.25,
            baro_noise: 0.0,
            wifi_snr: 90,
            sdk_version: "20".to_string(),
            bounds: Bounds::default(),
        }
    }
}

impl SimConfig {
    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> Result<Self, SimError> {
        let content = std::fs::read_to_string(config_path).map_err(SimError::ConfigRead)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SimError> {
        Ok(toml::from_str(content)?)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = SimConfig::from_toml("").unwrap();
        assert_eq!(config, SimConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let config = SimConfig::from_toml(
            r#"
            tick-ms = 10
            flight-drain = 2.5

            [bounds]
            ceiling = 500.0
            "#,
        )
        .unwrap();
        assert_eq!(config.tick_ms, 10);
        assert_eq!(config.flight_drain, 2.5);
        assert_eq!(config.bounds.ceiling, 500.0);
        assert_eq!(config.bounds.horizontal, Bounds::default().horizontal);
        assert_eq!(config.broadcast_ms, 100);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let err = SimConfig::from_toml("tick-ms = \"fast\"").unwrap_err();
        assert!(matches!(err, SimError::ConfigParse(_)));
    }
}
