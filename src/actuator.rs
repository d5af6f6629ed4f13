//! Outbound actuation calls into the peripheral layer.
//!
//! The mode policy only decides *that* a line should switch; how the LED,
//! radio, ADCS or payload rails are driven belongs to the board support code
//! behind [`Actuator`].

use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subsystem {
    Led,
    Radio,
    Adcs,
    Payload,
    Telemetry,
}

impl Subsystem {
    pub const ALL: [Subsystem; 5] = [
        Subsystem::Led,
        Subsystem::Radio,
        Subsystem::Adcs,
        Subsystem::Payload,
        Subsystem::Telemetry,
    ];
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subsystem::Led => "LED",
            Subsystem::Radio => "RADIO",
            Subsystem::Adcs => "ADCS",
            Subsystem::Payload => "PAYLOAD",
            Subsystem::Telemetry => "TELEMETRY",
        };
        f.write_str(name)
    }
}

/// Fire-and-forget power switching. Implementations must not block.
pub trait Actuator: Send {
    fn set_subsystem_power(&mut self, subsystem: Subsystem, on: bool);
}

/// Discards every call. Used by the simulator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullActuator;

impl Actuator for NullActuator {
    fn set_subsystem_power(&mut self, _subsystem: Subsystem, _on: bool) {}
}

/// Reports every switch through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingActuator;

impl Actuator for LoggingActuator {
    fn set_subsystem_power(&mut self, subsystem: Subsystem, on: bool) {
        info!("TURN {} {}", if on { "ON" } else { "OFF" }, subsystem);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actuation {
    pub subsystem: Subsystem,
    pub on: bool,
}

/// Keeps every call in a log shared between clones, so a test can hand one
/// clone to the machine and inspect the other.
#[derive(Debug, Default, Clone)]
pub struct RecordingActuator {
    log: Arc<Mutex<std::vec::Vec<Actuation>>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actuations(&self) -> std::vec::Vec<Actuation> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Last commanded level of `subsystem`, if it was ever switched.
    pub fn last_state(&self, subsystem: Subsystem) -> Option<bool> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|actuation| actuation.subsystem == subsystem)
            .map(|actuation| actuation.on)
    }
}

impl Actuator for RecordingActuator {
    fn set_subsystem_power(&mut self, subsystem: Subsystem, on: bool) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Actuation { subsystem, on });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_actuator_shares_log_between_clones() {
        let recorder = RecordingActuator::new();
        let mut handle = recorder.clone();

        handle.set_subsystem_power(Subsystem::Radio, true);
        handle.set_subsystem_power(Subsystem::Adcs, true);
        handle.set_subsystem_power(Subsystem::Radio, false);

        assert_eq!(recorder.actuations().len(), 3);
        assert_eq!(recorder.last_state(Subsystem::Radio), Some(false));
        assert_eq!(recorder.last_state(Subsystem::Adcs), Some(true));
        assert_eq!(recorder.last_state(Subsystem::Payload), None);

        recorder.clear();
        assert!(recorder.actuations().is_empty());
    }
}
