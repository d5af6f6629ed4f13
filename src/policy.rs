//! CubeSat operating modes and the guarded rules that move between them.
//!
//! ```text
//!  (top)
//!  ├── Launch ──[LEO_REACHED]──▶ Leo
//!  └── Leo            init ▶ Charge
//!      ├── Charge     ◀──[TICK, < low && active]── (any Active leaf)
//!      └── Active     init ▶ Transmit if pending_transmit, else Detumble
//!          ├── Payload
//!          │   ├── Detumble  ──[TICK]──▶ Telemetry
//!          │   └── Telemetry ──[TICK]──▶ Active (pending_transmit = true)
//!          └── Radio
//!              ├── Transmit  ──[TICK]──▶ Receive
//!              └── Receive   ──[TICK]──▶ Active
//! ```
//!
//! Guards read the energy level as it was when the event was dispatched;
//! a tick's own drain is applied after the decision.

use crate::actuator::{Actuator, Subsystem};
use crate::config::{EnergyCosts, MachineConfig};
use crate::event::{Event, Signal};
use crate::hsm::{Response, StateTree};
use crate::power::PowerModel;
use core::fmt;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Self-posted events buffered during one dispatch.
pub const OUTBOX_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Launch,
    Leo,
    Charge,
    Active,
    Payload,
    Detumble,
    Telemetry,
    Radio,
    Transmit,
    Receive,
}

impl Mode {
    pub const ALL: [Mode; 10] = [
        Mode::Launch,
        Mode::Leo,
        Mode::Charge,
        Mode::Active,
        Mode::Payload,
        Mode::Detumble,
        Mode::Telemetry,
        Mode::Radio,
        Mode::Transmit,
        Mode::Receive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Mode::Launch => "Launch",
            Mode::Leo => "Leo",
            Mode::Charge => "Charge",
            Mode::Active => "Active",
            Mode::Payload => "Payload",
            Mode::Detumble => "Detumble",
            Mode::Telemetry => "Telemetry",
            Mode::Radio => "Radio",
            Mode::Transmit => "Transmit",
            Mode::Receive => "Receive",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the mode handlers may read or change.
pub struct ModeContext {
    pub power: PowerModel,
    pub systems_active: bool,
    pub pending_transmit: bool,
    pub costs: EnergyCosts,
    pub tick_minutes: f64,
    pub auto_deploy: bool,
    actuator: Box<dyn Actuator>,
    outbox: Vec<Event, OUTBOX_DEPTH>,
}

impl ModeContext {
    pub fn new(config: &MachineConfig, actuator: Box<dyn Actuator>) -> Self {
        Self {
            power: PowerModel::new(&config.power),
            systems_active: false,
            pending_transmit: false,
            costs: config.costs,
            tick_minutes: config.tick_minutes,
            auto_deploy: config.auto_deploy,
            actuator,
            outbox: Vec::new(),
        }
    }

    /// Return to the freshly constructed state, keeping the actuator.
    pub(crate) fn rebuild(&mut self, config: &MachineConfig) {
        self.power = PowerModel::new(&config.power);
        self.systems_active = false;
        self.pending_transmit = false;
        self.costs = config.costs;
        self.tick_minutes = config.tick_minutes;
        self.auto_deploy = config.auto_deploy;
        self.outbox.clear();
    }

    fn switch(&mut self, subsystem: Subsystem, on: bool) {
        self.actuator.set_subsystem_power(subsystem, on);
    }

    /// Queue an event for the machine to process after the current dispatch.
    fn post(&mut self, event: Event) {
        if self.outbox.push(event).is_err() {
            warn!(%event, "outbox full, self-posted event dropped");
        }
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<Event, OUTBOX_DEPTH> {
        core::mem::take(&mut self.outbox)
    }

    /// Systems are up but the pack has fallen under the shed threshold.
    fn must_shed_load(&self) -> bool {
        self.systems_active && self.power.is_low()
    }
}

impl fmt::Debug for ModeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeContext")
            .field("power", &self.power)
            .field("systems_active", &self.systems_active)
            .field("pending_transmit", &self.pending_transmit)
            .field("outbox", &self.outbox)
            .finish_non_exhaustive()
    }
}

/// The CubeSat mode tree.
#[derive(Debug)]
pub struct ModePolicy;

impl StateTree for ModePolicy {
    type State = Mode;
    type Context = ModeContext;
    type Event = Event;

    fn initial() -> Mode {
        Mode::Launch
    }

    fn parent(mode: Mode) -> Option<Mode> {
        match mode {
            Mode::Launch | Mode::Leo => None,
            Mode::Charge | Mode::Active => Some(Mode::Leo),
            Mode::Payload | Mode::Radio => Some(Mode::Active),
            Mode::Detumble | Mode::Telemetry => Some(Mode::Payload),
            Mode::Transmit | Mode::Receive => Some(Mode::Radio),
        }
    }

    fn on_entry(mode: Mode, ctx: &mut ModeContext) {
        debug!("entry {mode}");
        match mode {
            Mode::Launch => launch_entry(ctx),
            Mode::Leo => ctx.switch(Subsystem::Led, true),
            Mode::Charge => charge_entry(ctx),
            Mode::Payload => ctx.switch(Subsystem::Payload, true),
            Mode::Detumble => {
                ctx.switch(Subsystem::Adcs, true);
                ctx.power.apply_delta(-ctx.costs.detumble_entry_wh);
            }
            Mode::Telemetry => {
                ctx.switch(Subsystem::Telemetry, true);
                ctx.power.apply_delta(-ctx.costs.telemetry_entry_wh);
            }
            Mode::Radio => {
                ctx.switch(Subsystem::Radio, true);
                ctx.power.apply_delta(-ctx.costs.radio_activation_wh);
            }
            Mode::Active | Mode::Transmit | Mode::Receive => {}
        }
    }

    fn on_exit(mode: Mode, ctx: &mut ModeContext) {
        debug!("exit {mode}");
        match mode {
            Mode::Leo => ctx.switch(Subsystem::Led, false),
            Mode::Payload => ctx.switch(Subsystem::Payload, false),
            Mode::Detumble => ctx.switch(Subsystem::Adcs, false),
            Mode::Telemetry => ctx.switch(Subsystem::Telemetry, false),
            Mode::Radio => {
                ctx.switch(Subsystem::Radio, false);
                ctx.pending_transmit = false;
            }
            Mode::Launch | Mode::Charge | Mode::Active | Mode::Transmit | Mode::Receive => {}
        }
    }

    fn on_init(mode: Mode, ctx: &mut ModeContext) -> Option<Mode> {
        match mode {
            Mode::Leo => Some(Mode::Charge),
            Mode::Active if ctx.pending_transmit => Some(Mode::Transmit),
            Mode::Active => Some(Mode::Detumble),
            _ => None,
        }
    }

    fn on_event(mode: Mode, ctx: &mut ModeContext, event: &Event) -> Response<Mode> {
        match mode {
            Mode::Launch => launch(event),
            Mode::Leo => leo(ctx, event),
            Mode::Active => active(ctx, event),
            Mode::Detumble => detumble(ctx, event),
            Mode::Telemetry => telemetry(ctx, event),
            Mode::Radio => radio(event),
            Mode::Transmit => transmit(ctx, event),
            Mode::Receive => receive(ctx, event),
            Mode::Charge | Mode::Payload => Response::Unhandled,
        }
    }
}

// ---------------------------------------------------------------------------
// Launch
// ---------------------------------------------------------------------------

fn launch_entry(ctx: &mut ModeContext) {
    for subsystem in Subsystem::ALL {
        ctx.switch(subsystem, false);
    }
    if ctx.auto_deploy {
        ctx.post(Event::LEO_REACHED);
    }
}

fn launch(event: &Event) -> Response<Mode> {
    match event.signal {
        Signal::LeoReached => {
            info!("orbit reached, leaving launch");
            Response::Transition(Mode::Leo)
        }
        _ => Response::Unhandled,
    }
}

// ---------------------------------------------------------------------------
// Leo: owns the battery policy for everything below it
// ---------------------------------------------------------------------------

fn leo(ctx: &mut ModeContext, event: &Event) -> Response<Mode> {
    match event.signal {
        Signal::Tick => {
            let low = ctx.must_shed_load();
            let high = ctx.power.is_high();
            ctx.power.apply_delta(-ctx.costs.idle_drain_wh);

            if low {
                info!(
                    fraction = ctx.power.fraction_of_capacity(),
                    "battery low, shedding load"
                );
                ctx.systems_active = false;
                Response::Transition(Mode::Charge)
            } else if high || ctx.systems_active {
                info!(
                    fraction = ctx.power.fraction_of_capacity(),
                    "battery sufficient, activating systems"
                );
                ctx.systems_active = true;
                Response::Transition(Mode::Active)
            } else {
                Response::Handled
            }
        }
        Signal::BatterySample => {
            if let Some(watts) = event.param {
                ctx.power.charge_from_generation(watts, ctx.tick_minutes);
            }
            debug!(stored_wh = ctx.power.stored_energy_wh(), "battery sample");
            Response::Handled
        }
        Signal::BatteryLow => {
            if ctx.systems_active {
                ctx.systems_active = false;
                Response::Transition(Mode::Charge)
            } else {
                Response::Handled
            }
        }
        Signal::BatteryHigh => {
            ctx.systems_active = true;
            Response::Transition(Mode::Active)
        }
        Signal::ChargeRequested => {
            ctx.systems_active = false;
            Response::Transition(Mode::Charge)
        }
        _ => Response::Unhandled,
    }
}

fn charge_entry(ctx: &mut ModeContext) {
    for subsystem in [
        Subsystem::Payload,
        Subsystem::Adcs,
        Subsystem::Telemetry,
        Subsystem::Radio,
    ] {
        ctx.switch(subsystem, false);
    }
}

// ---------------------------------------------------------------------------
// Active and its children
// ---------------------------------------------------------------------------

fn active(ctx: &mut ModeContext, event: &Event) -> Response<Mode> {
    match event.signal {
        Signal::BatteryHigh => Response::Handled,
        Signal::RadioActivate => {
            ctx.pending_transmit = true;
            Response::Transition(Mode::Active)
        }
        _ => Response::Unhandled,
    }
}

fn detumble(ctx: &mut ModeContext, event: &Event) -> Response<Mode> {
    match event.signal {
        // Leave the tick to Leo so the shed rule wins over the activity.
        Signal::Tick if ctx.must_shed_load() => Response::Unhandled,
        Signal::Tick => {
            ctx.power.apply_delta(-ctx.costs.detumble_tick_wh);
            Response::Transition(Mode::Telemetry)
        }
        Signal::DetumbleDone => Response::Transition(Mode::Telemetry),
        _ => Response::Unhandled,
    }
}

fn telemetry(ctx: &mut ModeContext, event: &Event) -> Response<Mode> {
    match event.signal {
        Signal::Tick if ctx.must_shed_load() => Response::Unhandled,
        Signal::Tick => {
            ctx.power.apply_delta(-ctx.costs.telemetry_tick_wh);
            ctx.pending_transmit = true;
            Response::Transition(Mode::Active)
        }
        Signal::TelemetryDone => {
            ctx.pending_transmit = true;
            Response::Transition(Mode::Active)
        }
        _ => Response::Unhandled,
    }
}

fn radio(event: &Event) -> Response<Mode> {
    match event.signal {
        Signal::RadioActivate => Response::Handled,
        _ => Response::Unhandled,
    }
}

fn transmit(ctx: &mut ModeContext, event: &Event) -> Response<Mode> {
    match event.signal {
        Signal::Tick if ctx.must_shed_load() => Response::Unhandled,
        Signal::Tick | Signal::TransmitDone => Response::Transition(Mode::Receive),
        _ => Response::Unhandled,
    }
}

fn receive(ctx: &mut ModeContext, event: &Event) -> Response<Mode> {
    match event.signal {
        Signal::Tick if ctx.must_shed_load() => Response::Unhandled,
        Signal::Tick | Signal::ReceiveDone => Response::Transition(Mode::Active),
        _ => Response::Unhandled,
    }
}
