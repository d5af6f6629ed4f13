//! Power-profile replay.
//!
//! A profile is a text file with one generated-power sample (watts) per line.
//! The simulator deploys the machine into LEO and then, for every sample,
//! credits the generated energy, dispatches one `Tick` and records where the
//! machine ended up. Replays are deterministic: the same profile and
//! configuration always produce the same trace bytes.

use crate::event::Event;
use crate::hsm::Outcome;
use crate::machine::{Machine, MachineError};
use crate::policy::Mode;
use arrayvec::ArrayString;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Longest excerpt of a rejected line kept in a warning.
pub const WARNING_EXCERPT_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Machine(#[from] MachineError),
    #[error("trace serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown trace format `{0}`")]
    UnknownFormat(String),
}

/// A profile line that could not be used as a sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileWarning {
    /// 1-based line number in the source.
    pub line: usize,
    pub content: ArrayString<WARNING_EXCERPT_LEN>,
    pub reason: &'static str,
}

impl fmt::Display for ProfileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({:?})", self.line, self.reason, self.content.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerProfile {
    pub samples: Vec<f64>,
    pub warnings: Vec<ProfileWarning>,
}

impl PowerProfile {
    /// Read at most `max_samples` samples. Blank lines are skipped; lines that
    /// are not finite, non-negative numbers are reported and skipped.
    pub fn parse<R: BufRead>(mut reader: R, max_samples: usize) -> io::Result<Self> {
        let mut profile = Self::default();
        let mut buf = Vec::new();
        let mut line_number = 0;

        loop {
            if profile.samples.len() >= max_samples {
                debug!(max_samples, "sample limit reached, ignoring rest of profile");
                break;
            }
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_number += 1;

            let (text, parsed) = match core::str::from_utf8(&buf) {
                Ok(text) => {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    (excerpt(trimmed), parse_sample(trimmed))
                }
                Err(_) => {
                    let lossy = String::from_utf8_lossy(&buf);
                    (excerpt(lossy.trim()), Err("not valid UTF-8"))
                }
            };

            match parsed {
                Ok(watts) => profile.samples.push(watts),
                Err(reason) => {
                    let warning = ProfileWarning {
                        line: line_number,
                        content: text,
                        reason,
                    };
                    warn!(line = warning.line, content = %warning.content, reason, "skipping profile line");
                    profile.warnings.push(warning);
                }
            }
        }

        info!(
            samples = profile.samples.len(),
            warnings = profile.warnings.len(),
            "power profile loaded"
        );
        Ok(profile)
    }

    pub fn from_path<P: AsRef<Path>>(path: P, max_samples: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::parse(BufReader::new(file), max_samples)
    }

    pub fn from_samples(samples: Vec<f64>) -> Self {
        Self {
            samples,
            warnings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn parse_sample(text: &str) -> Result<f64, &'static str> {
    let watts: f64 = text.parse().map_err(|_| "not a number")?;
    if !watts.is_finite() {
        return Err("not finite");
    }
    if watts < 0.0 {
        return Err("negative generation");
    }
    Ok(watts)
}

/// Copy as much of `text` as fits, cutting on a character boundary.
fn excerpt(text: &str) -> ArrayString<WARNING_EXCERPT_LEN> {
    let mut out = ArrayString::new();
    for ch in text.chars() {
        if out.try_push(ch).is_err() {
            break;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceFormat {
    /// `tick<TAB>mode<TAB>energy` per line.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for TraceFormat {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(TraceFormat::Text),
            "json" => Ok(TraceFormat::Json),
            other => Err(SimulationError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub tick: usize,
    pub mode: Mode,
    pub stored_energy_wh: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Zero for the deployment out of `Launch`.
    pub tick: usize,
    pub from: Mode,
    pub to: Mode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub trace: Vec<TraceRecord>,
    pub transitions: Vec<TransitionRecord>,
    pub warnings: Vec<ProfileWarning>,
    pub final_mode: Mode,
    pub final_energy_wh: f64,
    /// Ticks that ended with negative stored energy.
    pub depleted_ticks: usize,
}

impl SimulationReport {
    /// Ticks spent in (or below) `mode`.
    pub fn ticks_in(&self, mode: Mode) -> usize {
        self.trace.iter().filter(|record| record.mode == mode).count()
    }
}

pub struct Simulator {
    machine: Machine,
    interval_minutes: f64,
    sink: Option<Box<dyn Write>>,
    format: TraceFormat,
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("machine", &self.machine)
            .field("interval_minutes", &self.interval_minutes)
            .field("format", &self.format)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl Simulator {
    /// Replay with one sample per configured tick duration and no trace sink.
    pub fn new(machine: Machine) -> Self {
        let interval_minutes = machine.config().tick_minutes;
        Self {
            machine,
            interval_minutes,
            sink: None,
            format: TraceFormat::Text,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval_minutes: f64) -> Self {
        self.interval_minutes = interval_minutes;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, sink: Box<dyn Write>, format: TraceFormat) -> Self {
        self.sink = Some(sink);
        self.format = format;
        self
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn into_machine(self) -> Machine {
        self.machine
    }

    pub fn run(&mut self, profile: &PowerProfile) -> Result<SimulationReport, SimulationError> {
        let mut transitions = Vec::new();
        self.deploy(&mut transitions)?;

        let mut trace = Vec::with_capacity(profile.len());
        let mut depleted_ticks = 0;

        for (index, &watts) in profile.samples.iter().enumerate() {
            let tick = index + 1;

            self.machine
                .power_mut()
                .charge_from_generation(watts, self.interval_minutes);
            let outcome = self.machine.dispatch(Event::TICK)?;
            record_transition(&mut transitions, tick, &outcome);
            while let Some(outcome) = self.machine.step()? {
                record_transition(&mut transitions, tick, &outcome);
            }

            if self.machine.power().is_depleted() {
                depleted_ticks += 1;
            }

            let record = TraceRecord {
                tick,
                mode: self.machine.mode(),
                stored_energy_wh: self.machine.power().stored_energy_wh(),
            };
            self.write_record(&record)?;
            trace.push(record);
        }

        if let Some(sink) = self.sink.as_mut() {
            sink.flush()?;
        }

        let report = SimulationReport {
            trace,
            transitions,
            warnings: profile.warnings.clone(),
            final_mode: self.machine.mode(),
            final_energy_wh: self.machine.power().stored_energy_wh(),
            depleted_ticks,
        };
        info!(
            ticks = report.trace.len(),
            transitions = report.transitions.len(),
            final_mode = %report.final_mode,
            final_energy_wh = report.final_energy_wh,
            "replay finished"
        );
        Ok(report)
    }

    /// Leave `Launch`, either through a self-posted deploy or an explicit one.
    fn deploy(&mut self, transitions: &mut Vec<TransitionRecord>) -> Result<(), SimulationError> {
        while let Some(outcome) = self.machine.step()? {
            record_transition(transitions, 0, &outcome);
        }
        if self.machine.is_in(Mode::Launch) {
            let outcome = self.machine.dispatch(Event::LEO_REACHED)?;
            record_transition(transitions, 0, &outcome);
            while let Some(outcome) = self.machine.step()? {
                record_transition(transitions, 0, &outcome);
            }
        }
        Ok(())
    }

    fn write_record(&mut self, record: &TraceRecord) -> Result<(), SimulationError> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        match self.format {
            TraceFormat::Text => writeln!(
                sink,
                "{}\t{}\t{:.4}",
                record.tick, record.mode, record.stored_energy_wh
            )?,
            TraceFormat::Json => {
                serde_json::to_writer(&mut *sink, record)?;
                sink.write_all(b"\n")?;
            }
        }
        Ok(())
    }
}

fn record_transition(transitions: &mut Vec<TransitionRecord>, tick: usize, outcome: &Outcome<Mode>) {
    if let Some(transition) = outcome.transition() {
        transitions.push(TransitionRecord {
            tick,
            from: transition.source,
            to: transition.target,
        });
    }
}
