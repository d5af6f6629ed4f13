//! Event signals and the bounded single-producer/single-consumer event queue.
//!
//! Producers (the tick interrupt, the simulation driver, ground tooling) post
//! [`Event`]s; the dispatch loop drains them in FIFO order. The queue is a
//! [`heapless::spsc::Queue`], so the producer half can live in interrupt or
//! thread context while the machine itself stays on the consumer side.

use core::fmt;
use heapless::spsc::{Consumer, Producer, Queue};
use serde::{Deserialize, Serialize};

/// Backing storage size. One slot is reserved by the ring buffer, so the
/// usable capacity is `EVENT_QUEUE_DEPTH - 1`.
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Flight tick rate of the periodic timer interrupt.
pub const TICKS_PER_SECOND: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// Periodic time tick.
    Tick,
    /// Battery telemetry sample; the parameter carries generated watts.
    BatterySample,
    BatteryLow,
    BatteryHigh,
    LeoReached,
    ChargeRequested,
    RadioActivate,
    TransmitDone,
    ReceiveDone,
    DetumbleDone,
    TelemetryDone,
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Signal::Tick => "TICK",
            Signal::BatterySample => "BATTERY_SAMPLE",
            Signal::BatteryLow => "BATTERY_LOW",
            Signal::BatteryHigh => "BATTERY_HIGH",
            Signal::LeoReached => "LEO_REACHED",
            Signal::ChargeRequested => "CHARGE_REQUESTED",
            Signal::RadioActivate => "RADIO_ACTIVATE",
            Signal::TransmitDone => "TRANSMIT_DONE",
            Signal::ReceiveDone => "RECEIVE_DONE",
            Signal::DetumbleDone => "DETUMBLE_DONE",
            Signal::TelemetryDone => "TELEMETRY_DONE",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A signal with an optional numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub signal: Signal,
    pub param: Option<f64>,
}

impl Event {
    pub const TICK: Event = Event::new(Signal::Tick);
    pub const LEO_REACHED: Event = Event::new(Signal::LeoReached);

    pub const fn new(signal: Signal) -> Self {
        Self { signal, param: None }
    }

    pub const fn with_param(signal: Signal, param: f64) -> Self {
        Self {
            signal,
            param: Some(param),
        }
    }

    /// Battery sample reporting `watts` of generated power.
    pub const fn battery_sample(watts: f64) -> Self {
        Self::with_param(Signal::BatterySample, watts)
    }
}

impl From<Signal> for Event {
    fn from(signal: Signal) -> Self {
        Self::new(signal)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.param {
            Some(param) => write!(f, "{}({})", self.signal, param),
            None => write!(f, "{}", self.signal),
        }
    }
}

pub type EventProducer<'q> = Producer<'q, Event, EVENT_QUEUE_DEPTH>;
pub type EventConsumer<'q> = Consumer<'q, Event, EVENT_QUEUE_DEPTH>;

/// Bounded FIFO of pending events.
pub struct EventQueue {
    queue: Queue<Event, EVENT_QUEUE_DEPTH>,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .finish()
    }
}

impl EventQueue {
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
        }
    }

    /// Append an event. A full queue hands the event back to the caller.
    pub fn post(&mut self, event: Event) -> Result<(), Event> {
        self.queue.enqueue(event)
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.queue.dequeue()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn clear(&mut self) {
        while self.queue.dequeue().is_some() {}
    }

    /// Split into a producer for the tick source and a consumer for the
    /// dispatch loop. Both halves borrow the queue, so they can be moved into
    /// scoped threads.
    pub fn split(&mut self) -> (EventProducer<'_>, EventConsumer<'_>) {
        self.queue.split()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
