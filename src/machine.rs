//! The owned mode-manager instance.
//!
//! A [`Machine`] ties the engine, the mode policy, its context and the event
//! queue together. Nothing here is global: every test or binary builds its
//! own machine, and only the dispatch loop (`&mut self`) ever touches it.

use crate::actuator::{Actuator, NullActuator};
use crate::config::{ConfigError, MachineConfig};
use crate::event::{Event, EventConsumer, EventQueue};
use crate::hsm::{verify_tree, Hsm, HsmError, Outcome};
use crate::policy::{Mode, ModeContext, ModePolicy};
use crate::power::{PowerModel, PowerState};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("state machine fault: {0}")]
    Fault(#[from] HsmError),
    #[error("machine halted after a fault; reset required")]
    Halted,
    #[error("event queue full, dropped {0}")]
    QueueFull(Event),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Point-in-time view of the machine for telemetry and the CLI summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineStatus {
    pub mode: Mode,
    pub systems_active: bool,
    pub pending_transmit: bool,
    pub power: PowerState,
    pub queued_events: usize,
    pub halted: bool,
}

#[derive(Debug)]
pub struct Machine {
    config: MachineConfig,
    hsm: Hsm<ModePolicy>,
    ctx: ModeContext,
    queue: EventQueue,
    halted: Option<HsmError>,
}

impl Machine {
    /// Build a machine that discards actuation calls.
    pub fn new(config: MachineConfig) -> Result<Self, MachineError> {
        Self::with_actuator(config, Box::new(NullActuator))
    }

    /// Validate `config`, check the mode tree and enter `Launch`.
    pub fn with_actuator(
        config: MachineConfig,
        actuator: Box<dyn Actuator>,
    ) -> Result<Self, MachineError> {
        config.validate()?;
        verify_tree::<ModePolicy>(&Mode::ALL)?;

        let mut machine = Self {
            ctx: ModeContext::new(&config, actuator),
            config,
            hsm: Hsm::new(),
            queue: EventQueue::new(),
            halted: None,
        };
        machine.start()?;
        Ok(machine)
    }

    fn start(&mut self) -> Result<(), MachineError> {
        let entered = self.hsm.start(&mut self.ctx)?;
        info!(mode = %self.mode(), ?entered, "mode manager started");
        self.flush_outbox();
        Ok(())
    }

    /// Run one event to completion. A contract violation halts the machine.
    pub fn dispatch(&mut self, event: Event) -> Result<Outcome<Mode>, MachineError> {
        if self.halted.is_some() {
            return Err(MachineError::Halted);
        }

        let was_depleted = self.ctx.power.is_depleted();
        let outcome = match self.hsm.dispatch(&mut self.ctx, &event) {
            Ok(outcome) => outcome,
            Err(fault) => {
                error!(%fault, %event, "state machine fault, halting");
                self.halted = Some(fault);
                return Err(MachineError::Fault(fault));
            }
        };

        match &outcome {
            Outcome::Transitioned(transition) => info!(
                %event,
                from = %transition.source,
                to = %transition.target,
                fraction = self.ctx.power.fraction_of_capacity(),
                "mode transition"
            ),
            Outcome::Ignored => debug!(%event, mode = %self.mode(), "event ignored"),
            Outcome::Handled { .. } => {}
        }

        if self.ctx.power.is_depleted() && !was_depleted {
            warn!(
                stored_wh = self.ctx.power.stored_energy_wh(),
                "battery depleted below zero"
            );
        }

        self.flush_outbox();
        Ok(outcome)
    }

    /// Queue an event for a later [`Machine::process_events`].
    pub fn post(&mut self, event: Event) -> Result<(), MachineError> {
        self.queue.post(event).map_err(MachineError::QueueFull)
    }

    /// Dispatch queued events in FIFO order until the queue is empty,
    /// including anything posted by the handlers along the way.
    pub fn process_events(&mut self) -> Result<usize, MachineError> {
        if self.halted.is_some() {
            return Err(MachineError::Halted);
        }
        let mut processed = 0;
        while self.step()?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    /// Dispatch the oldest queued event, if any, and hand back its outcome.
    pub fn step(&mut self) -> Result<Option<Outcome<Mode>>, MachineError> {
        if self.halted.is_some() {
            return Err(MachineError::Halted);
        }
        match self.queue.pop() {
            Some(event) => self.dispatch(event).map(Some),
            None => Ok(None),
        }
    }

    /// Dispatch everything currently available from an external producer.
    pub fn drain(&mut self, consumer: &mut EventConsumer<'_>) -> Result<usize, MachineError> {
        let mut processed = 0;
        while let Some(event) = consumer.dequeue() {
            self.dispatch(event)?;
            processed += 1 + self.process_events()?;
        }
        Ok(processed)
    }

    fn flush_outbox(&mut self) {
        for event in self.ctx.take_outbox() {
            if let Err(event) = self.queue.post(event) {
                warn!(%event, "event queue full, self-posted event dropped");
            }
        }
    }

    /// Rebuild from the stored configuration, clearing any fault.
    pub fn reset(&mut self) -> Result<(), MachineError> {
        warn!(fault = ?self.halted, "resetting mode manager");
        self.ctx.rebuild(&self.config);
        self.hsm = Hsm::new();
        self.queue.clear();
        self.halted = None;
        self.start()
    }

    /// Current leaf mode.
    pub fn mode(&self) -> Mode {
        // Always set once `start` has run in the constructor.
        self.hsm.current().unwrap_or(Mode::Launch)
    }

    /// True when `mode` is the current leaf or one of its super-states.
    pub fn is_in(&self, mode: Mode) -> bool {
        self.hsm.is_in(mode)
    }

    pub fn power(&self) -> &PowerModel {
        &self.ctx.power
    }

    pub fn power_mut(&mut self) -> &mut PowerModel {
        &mut self.ctx.power
    }

    pub fn systems_active(&self) -> bool {
        self.ctx.systems_active
    }

    pub fn set_systems_active(&mut self, active: bool) {
        self.ctx.systems_active = active;
    }

    pub fn pending_transmit(&self) -> bool {
        self.ctx.pending_transmit
    }

    pub fn set_pending_transmit(&mut self, pending: bool) {
        self.ctx.pending_transmit = pending;
    }

    pub fn queued_events(&self) -> usize {
        self.queue.len()
    }

    pub fn fault(&self) -> Option<HsmError> {
        self.halted
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    #[cfg(test)]
    pub(crate) fn latch_fault(&mut self, fault: HsmError) {
        self.halted = Some(fault);
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn status(&self) -> MachineStatus {
        MachineStatus {
            mode: self.mode(),
            systems_active: self.ctx.systems_active,
            pending_transmit: self.ctx.pending_transmit,
            power: self.ctx.power.get_state(),
            queued_events: self.queue.len(),
            halted: self.is_halted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Signal;

    #[test]
    fn test_machine_starts_in_launch() {
        let machine = Machine::new(MachineConfig::default()).unwrap();
        assert_eq!(machine.mode(), Mode::Launch);
        assert!(!machine.systems_active());
        assert_eq!(machine.queued_events(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = MachineConfig::default();
        config.power.capacity_wh = -1.0;
        assert!(matches!(
            Machine::new(config),
            Err(MachineError::Config(ConfigError::InvalidCapacity(_)))
        ));
    }

    #[test]
    fn test_auto_deploy_queues_leo_reached() {
        let config = MachineConfig {
            auto_deploy: true,
            ..MachineConfig::default()
        };
        let mut machine = Machine::new(config).unwrap();
        assert_eq!(machine.queued_events(), 1);

        assert_eq!(machine.process_events().unwrap(), 1);
        assert_eq!(machine.mode(), Mode::Charge);
    }

    #[test]
    fn test_post_reports_full_queue() {
        let mut machine = Machine::new(MachineConfig::default()).unwrap();
        while machine.post(Event::from(Signal::TransmitDone)).is_ok() {}

        let result = machine.post(Event::TICK);
        assert!(matches!(result, Err(MachineError::QueueFull(event)) if event == Event::TICK));
    }

    #[test]
    fn test_fault_latch_until_reset() {
        let mut machine = Machine::new(MachineConfig::default()).unwrap();
        machine.dispatch(Event::LEO_REACHED).unwrap();
        machine.post(Event::TICK).unwrap();
        machine.latch_fault(HsmError::DepthExceeded);

        assert!(machine.is_halted());
        assert_eq!(machine.fault(), Some(HsmError::DepthExceeded));
        assert!(matches!(machine.dispatch(Event::TICK), Err(MachineError::Halted)));
        assert!(matches!(machine.process_events(), Err(MachineError::Halted)));
        assert!(matches!(machine.step(), Err(MachineError::Halted)));
        assert_eq!(machine.queued_events(), 1);
        assert!(machine.status().halted);
        assert_eq!(machine.mode(), Mode::Charge);

        machine.reset().unwrap();

        assert!(!machine.is_halted());
        assert_eq!(machine.fault(), None);
        assert_eq!(machine.mode(), Mode::Launch);
        assert_eq!(machine.queued_events(), 0);
        assert!(machine.dispatch(Event::LEO_REACHED).is_ok());
    }

    #[test]
    fn test_step_returns_outcomes_in_order() {
        let mut machine = Machine::new(MachineConfig::default()).unwrap();
        machine.post(Event::LEO_REACHED).unwrap();
        machine.post(Event::TICK).unwrap();

        let first = machine.step().unwrap().unwrap();
        assert_eq!(first.transition().map(|t| t.target), Some(Mode::Charge));
        assert_eq!(machine.step().unwrap(), Some(Outcome::Handled { by: Mode::Leo }));
        assert_eq!(machine.step().unwrap(), None);
    }

    #[test]
    fn test_status_snapshot() {
        let mut machine = Machine::new(MachineConfig::default()).unwrap();
        machine.dispatch(Event::LEO_REACHED).unwrap();
        machine.power_mut().set_fraction(0.25);

        let status = machine.status();
        assert_eq!(status.mode, Mode::Charge);
        assert!(!status.halted);
        assert!((status.power.fraction - 0.25).abs() < 1e-9);

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"mode\":\"Charge\""));
    }
}
