//! # CubeSat Mode Manager
//!
//! Hierarchical state machine that decides which spacecraft subsystems may
//! run given the stored battery energy, plus a replay simulator that drives
//! it from recorded solar-generation profiles.
//!
//! ## Features
//!
//! - **HSM engine**: leaf-first dispatch, external transitions through the
//!   least common ancestor, compound initial transitions
//! - **Mode policy**: launch, charge and active modes with hysteresis between
//!   the shed and resume thresholds
//! - **Bounded event queue**: lock-free SPSC ring shared with the tick source
//! - **Power model**: stored energy against a fixed capacity, never clamped
//! - **Profile replay**: deterministic text or JSON traces
//!
//! ## Quick Start
//!
//! ```rust
//! use cubesat::{Event, Machine, MachineConfig, Mode};
//!
//! let mut machine = Machine::new(MachineConfig::default()).unwrap();
//! machine.dispatch(Event::LEO_REACHED).unwrap();
//! assert_eq!(machine.mode(), Mode::Charge);
//!
//! machine.power_mut().set_fraction(0.9);
//! machine.dispatch(Event::TICK).unwrap();
//! assert!(machine.is_in(Mode::Active));
//! ```
//!
//! ## Architecture
//!
//! - [`hsm`] - Generic state machine engine
//! - [`policy`] - The mode tree and its guarded transitions
//! - [`machine`] - Owned instance tying engine, policy and queue together
//! - [`event`] - Signals and the event queue
//! - [`power`] - Battery bookkeeping
//! - [`actuator`] - Outbound subsystem power switching
//! - [`config`] - Thresholds, energy costs and presets
//! - [`simulation`] - Power-profile replay

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod actuator;
pub mod config;
pub mod event;
pub mod hsm;
pub mod machine;
pub mod policy;
pub mod power;
pub mod simulation;

// Re-export main public types for convenience
pub use actuator::{Actuator, LoggingActuator, NullActuator, RecordingActuator, Subsystem};
pub use config::{ConfigError, EnergyCosts, MachineConfig, PolicyPreset};
pub use event::{Event, EventQueue, Signal};
pub use hsm::{HsmError, Outcome};
pub use machine::{Machine, MachineError, MachineStatus};
pub use policy::Mode;
pub use power::PowerModel;
pub use simulation::{PowerProfile, SimulationReport, Simulator, TraceFormat};
