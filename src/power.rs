//! Battery energy bookkeeping.
//!
//! Stored energy is tracked in watt-hours against a fixed pack capacity, and
//! the shed/resume thresholds are fractions of that capacity.

use serde::{Deserialize, Serialize};

/// 48 Wh pack (4.5 A max) on the flight unit.
pub const BATTERY_CAPACITY_WH: f64 = 48.0;
pub const DEFAULT_LOW_FRACTION: f64 = 0.50;
pub const DEFAULT_HIGH_FRACTION: f64 = 0.65;

const MINUTES_PER_HOUR: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub capacity_wh: f64,
    pub initial_energy_wh: f64,
    pub low_fraction: f64,
    pub high_fraction: f64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            capacity_wh: BATTERY_CAPACITY_WH,
            initial_energy_wh: 0.0,
            low_fraction: DEFAULT_LOW_FRACTION,
            high_fraction: DEFAULT_HIGH_FRACTION,
        }
    }
}

/// Snapshot of the battery for telemetry and trace output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerState {
    pub stored_energy_wh: f64,
    pub capacity_wh: f64,
    pub fraction: f64,
    pub depleted: bool,
}

/// Stored-energy bookkeeping against a fixed capacity.
///
/// The model never clamps: negative energy is a modeling gap the caller is
/// expected to observe through [`PowerModel::is_depleted`], not a state the
/// model hides.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerModel {
    stored_energy_wh: f64,
    capacity_wh: f64,
    low_fraction: f64,
    high_fraction: f64,
}

impl PowerModel {
    pub fn new(config: &PowerConfig) -> Self {
        Self {
            stored_energy_wh: config.initial_energy_wh,
            capacity_wh: config.capacity_wh,
            low_fraction: config.low_fraction,
            high_fraction: config.high_fraction,
        }
    }

    pub fn apply_delta(&mut self, amount_wh: f64) {
        self.stored_energy_wh += amount_wh;
    }

    pub fn fraction_of_capacity(&self) -> f64 {
        self.stored_energy_wh / self.capacity_wh
    }

    pub fn is_below(&self, threshold: f64) -> bool {
        self.fraction_of_capacity() < threshold
    }

    pub fn is_above_or_equal(&self, threshold: f64) -> bool {
        self.fraction_of_capacity() >= threshold
    }

    pub fn is_low(&self) -> bool {
        self.is_below(self.low_fraction)
    }

    pub fn is_high(&self) -> bool {
        self.is_above_or_equal(self.high_fraction)
    }

    pub fn is_depleted(&self) -> bool {
        self.stored_energy_wh < 0.0
    }

    /// Integrate one tick of generated power. Charging saturates at capacity
    /// and is a no-op once the pack is full.
    pub fn charge_from_generation(&mut self, watts: f64, tick_minutes: f64) {
        if self.stored_energy_wh >= self.capacity_wh {
            return;
        }
        let gained_wh = watts * tick_minutes / MINUTES_PER_HOUR;
        self.stored_energy_wh = (self.stored_energy_wh + gained_wh).min(self.capacity_wh);
    }

    /// Overwrite the stored energy, e.g. to seed a test or a ground override.
    pub fn set_stored_energy(&mut self, energy_wh: f64) {
        self.stored_energy_wh = energy_wh;
    }

    /// Set stored energy to `fraction` of capacity.
    pub fn set_fraction(&mut self, fraction: f64) {
        self.stored_energy_wh = fraction * self.capacity_wh;
    }

    pub fn stored_energy_wh(&self) -> f64 {
        self.stored_energy_wh
    }

    pub fn capacity_wh(&self) -> f64 {
        self.capacity_wh
    }

    pub fn low_fraction(&self) -> f64 {
        self.low_fraction
    }

    pub fn high_fraction(&self) -> f64 {
        self.high_fraction
    }

    pub fn get_state(&self) -> PowerState {
        PowerState {
            stored_energy_wh: self.stored_energy_wh,
            capacity_wh: self.capacity_wh,
            fraction: self.fraction_of_capacity(),
            depleted: self.is_depleted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn model_with(initial_energy_wh: f64) -> PowerModel {
        PowerModel::new(&PowerConfig {
            initial_energy_wh,
            ..PowerConfig::default()
        })
    }

    #[test]
    fn test_apply_delta_does_not_clamp() {
        let mut power = model_with(0.5);
        power.apply_delta(-1.5);

        assert!((power.stored_energy_wh() + 1.0).abs() < EPSILON);
        assert!(power.is_depleted());
        assert!(power.fraction_of_capacity() < 0.0);
    }

    #[test]
    fn test_threshold_queries() {
        let mut power = model_with(0.0);
        power.set_fraction(0.50);
        assert!(!power.is_below(0.50));
        assert!(power.is_above_or_equal(0.50));
        assert!(!power.is_low());
        assert!(!power.is_high());

        power.set_stored_energy(BATTERY_CAPACITY_WH * 0.75);
        assert!(power.is_high());

        power.set_fraction(0.49);
        assert!(power.is_low());
    }

    #[test]
    fn test_charge_from_generation() {
        let mut power = model_with(10.0);
        // 6 W for one minute is 0.1 Wh
        power.charge_from_generation(6.0, 1.0);
        assert!((power.stored_energy_wh() - 10.1).abs() < EPSILON);
    }

    #[test]
    fn test_charge_saturates_at_capacity() {
        let mut power = model_with(BATTERY_CAPACITY_WH - 0.05);
        power.charge_from_generation(60.0, 1.0);
        assert!((power.stored_energy_wh() - BATTERY_CAPACITY_WH).abs() < EPSILON);

        power.charge_from_generation(60.0, 1.0);
        assert!((power.stored_energy_wh() - BATTERY_CAPACITY_WH).abs() < EPSILON);
    }

    #[test]
    fn test_charge_is_noop_above_capacity() {
        let mut power = model_with(BATTERY_CAPACITY_WH + 1.0);
        power.charge_from_generation(60.0, 1.0);
        assert!((power.stored_energy_wh() - (BATTERY_CAPACITY_WH + 1.0)).abs() < EPSILON);
    }

    #[test]
    fn test_depleted_pack_recovers_by_charging() {
        let mut power = model_with(-0.5);
        power.charge_from_generation(60.0, 1.0);
        assert!((power.stored_energy_wh() - 0.5).abs() < EPSILON);
        assert!(!power.is_depleted());
    }
}
