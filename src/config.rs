//! Machine configuration.
//!
//! The transition graph is fixed; what varied between the historical
//! prototypes (threshold pairs, per-activity energy costs, whether launch
//! deploys on its own) is captured here, with [`PolicyPreset`] naming the
//! known variants.

use crate::power::PowerConfig;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Energy costs measured on the bench prototype, in watt-hours.
const IDLE_DRAIN_WH: f64 = 0.01;
const DETUMBLE_ENTRY_WH: f64 = 0.05;
const DETUMBLE_TICK_WH: f64 = 0.15;
const TELEMETRY_ENTRY_WH: f64 = 0.02;
const TELEMETRY_TICK_WH: f64 = 0.21;
const RADIO_ACTIVATION_WH: f64 = 1.5;

/// One recorded profile sample per minute.
pub const DEFAULT_TICK_MINUTES: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyCosts {
    /// Housekeeping drain applied by every tick that reaches LEO.
    pub idle_drain_wh: f64,
    pub detumble_entry_wh: f64,
    pub detumble_tick_wh: f64,
    pub telemetry_entry_wh: f64,
    pub telemetry_tick_wh: f64,
    pub radio_activation_wh: f64,
}

impl Default for EnergyCosts {
    fn default() -> Self {
        Self {
            idle_drain_wh: IDLE_DRAIN_WH,
            detumble_entry_wh: DETUMBLE_ENTRY_WH,
            detumble_tick_wh: DETUMBLE_TICK_WH,
            telemetry_entry_wh: TELEMETRY_ENTRY_WH,
            telemetry_tick_wh: TELEMETRY_TICK_WH,
            radio_activation_wh: RADIO_ACTIVATION_WH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub power: PowerConfig,
    pub costs: EnergyCosts,
    /// Simulated duration of one tick, used to integrate generated power.
    pub tick_minutes: f64,
    /// Launch posts `LeoReached` to itself on entry.
    pub auto_deploy: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            power: PowerConfig::default(),
            costs: EnergyCosts::default(),
            tick_minutes: DEFAULT_TICK_MINUTES,
            auto_deploy: false,
        }
    }
}

impl MachineConfig {
    pub fn from_preset(preset: PolicyPreset) -> Self {
        let (low_fraction, high_fraction) = preset.thresholds();
        Self {
            power: PowerConfig {
                low_fraction,
                high_fraction,
                ..PowerConfig::default()
            },
            auto_deploy: matches!(preset, PolicyPreset::Firmware),
            ..Self::default()
        }
    }

    /// Credit each battery sample with the wall-clock time it covers when
    /// samples arrive every `ticks` ticks of a `ticks_per_second` timer.
    pub fn with_sample_period(mut self, ticks: u32, ticks_per_second: u32) -> Self {
        self.tick_minutes = f64::from(ticks) / f64::from(ticks_per_second) / 60.0;
        self
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let power = &self.power;
        if !(power.capacity_wh.is_finite() && power.capacity_wh > 0.0) {
            return Err(ConfigError::InvalidCapacity(power.capacity_wh));
        }
        if !power.initial_energy_wh.is_finite() {
            return Err(ConfigError::InvalidInitialEnergy(power.initial_energy_wh));
        }
        let thresholds_ordered = (0.0..=1.0).contains(&power.low_fraction)
            && (0.0..=1.0).contains(&power.high_fraction)
            && power.low_fraction <= power.high_fraction;
        if !thresholds_ordered {
            return Err(ConfigError::InvalidThresholds {
                low: power.low_fraction,
                high: power.high_fraction,
            });
        }
        if !(self.tick_minutes.is_finite() && self.tick_minutes > 0.0) {
            return Err(ConfigError::InvalidTickDuration(self.tick_minutes));
        }
        let costs = [
            self.costs.idle_drain_wh,
            self.costs.detumble_entry_wh,
            self.costs.detumble_tick_wh,
            self.costs.telemetry_entry_wh,
            self.costs.telemetry_tick_wh,
            self.costs.radio_activation_wh,
        ];
        if let Some(&cost) = costs.iter().find(|cost| !(cost.is_finite() && **cost >= 0.0)) {
            return Err(ConfigError::InvalidCost(cost));
        }
        Ok(())
    }
}

/// Threshold pairs used by the different prototype builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PolicyPreset {
    /// Shed below 50 %, resume at 65 %.
    #[default]
    Canonical,
    /// Flight firmware prototype: shed below 30 %, resume above 50 %,
    /// deploys itself out of launch.
    Firmware,
    /// Mode diagram: shed below 60 %, resume above 65 %.
    DesignDoc,
}

impl PolicyPreset {
    pub const NAMES: [&'static str; 3] = ["canonical", "firmware", "design"];

    /// `(low_fraction, high_fraction)`
    pub fn thresholds(self) -> (f64, f64) {
        match self {
            PolicyPreset::Canonical => (0.50, 0.65),
            PolicyPreset::Firmware => (0.30, 0.50),
            PolicyPreset::DesignDoc => (0.60, 0.65),
        }
    }
}

impl FromStr for PolicyPreset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "canonical" => Ok(PolicyPreset::Canonical),
            "firmware" => Ok(PolicyPreset::Firmware),
            "design" => Ok(PolicyPreset::DesignDoc),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }
}

impl fmt::Display for PolicyPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyPreset::Canonical => "canonical",
            PolicyPreset::Firmware => "firmware",
            PolicyPreset::DesignDoc => "design",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("battery capacity must be positive, got {0}")]
    InvalidCapacity(f64),
    #[error("initial energy must be finite, got {0}")]
    InvalidInitialEnergy(f64),
    #[error("thresholds must satisfy 0 <= low <= high <= 1, got low={low} high={high}")]
    InvalidThresholds { low: f64, high: f64 },
    #[error("tick duration must be positive, got {0} minutes")]
    InvalidTickDuration(f64),
    #[error("energy costs must be non-negative, got {0}")]
    InvalidCost(f64),
    #[error("unknown policy preset `{0}`")]
    UnknownPreset(String),
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MachineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.power.low_fraction, 0.50);
        assert_eq!(config.power.high_fraction, 0.65);
        assert!(!config.auto_deploy);
    }

    #[test]
    fn test_presets() {
        let firmware = MachineConfig::from_preset(PolicyPreset::Firmware);
        assert_eq!(firmware.power.low_fraction, 0.30);
        assert_eq!(firmware.power.high_fraction, 0.50);
        assert!(firmware.auto_deploy);

        let design = MachineConfig::from_preset(PolicyPreset::DesignDoc);
        assert_eq!(design.power.low_fraction, 0.60);
        assert!(design.validate().is_ok());

        for name in PolicyPreset::NAMES {
            let preset: PolicyPreset = name.parse().unwrap();
            assert_eq!(preset.to_string(), name);
        }
        assert!("nominal".parse::<PolicyPreset>().is_err());
    }

    #[test]
    fn test_sample_period_sets_tick_duration() {
        let config = MachineConfig::from_preset(PolicyPreset::Firmware).with_sample_period(10, 100);
        assert!((config.tick_minutes - 0.1 / 60.0).abs() < 1e-12);
        assert!(config.auto_deploy);
        assert!(config.validate().is_ok());

        let per_minute = MachineConfig::default().with_sample_period(6000, 100);
        assert!((per_minute.tick_minutes - DEFAULT_TICK_MINUTES).abs() < 1e-12);

        assert!(matches!(
            MachineConfig::default().with_sample_period(0, 100).validate(),
            Err(ConfigError::InvalidTickDuration(_))
        ));
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = MachineConfig::from_json(r#"{"tick_minutes": 0.5, "auto_deploy": true}"#).unwrap();
        assert_eq!(config.tick_minutes, 0.5);
        assert!(config.auto_deploy);
        assert_eq!(config.costs, EnergyCosts::default());
    }

    #[test]
    fn test_json_round_trip() {
        let config = MachineConfig::from_preset(PolicyPreset::DesignDoc);
        let json = config.to_json().unwrap();
        assert_eq!(MachineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_validation_rejects_inverted_thresholds() {
        let mut config = MachineConfig::default();
        config.power.low_fraction = 0.8;
        config.power.high_fraction = 0.4;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThresholds { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = MachineConfig::default();
        config.power.capacity_wh = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCapacity(_))));

        let mut config = MachineConfig::default();
        config.tick_minutes = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTickDuration(_))));

        let mut config = MachineConfig::default();
        config.costs.radio_activation_wh = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCost(_))));

        assert!(matches!(
            MachineConfig::from_json("{not json"),
            Err(ConfigError::Json(_))
        ));
    }
}
