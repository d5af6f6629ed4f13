use clap::{App, Arg, ArgMatches};
use colored::*;
use cubesat::{
    Machine, MachineConfig, Mode, PolicyPreset, PowerProfile, SimulationReport, Simulator,
    TraceFormat,
};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use tracing::Level;

const DEFAULT_MAX_SAMPLES: &str = "100000";

fn main() {
    let matches = App::new("cubesat-sim")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  Replay a solar generation profile through the CubeSat mode manager")
        .arg(
            Arg::with_name("profile")
                .short("p")
                .long("profile")
                .value_name("FILE")
                .help("Power profile, one generated-power sample (W) per line")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("trace")
                .short("t")
                .long("trace")
                .value_name("FILE")
                .help("Write the per-tick trace to FILE ('-' for stdout)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Trace format")
                .takes_value(true)
                .possible_values(&["text", "json"])
                .default_value("text"),
        )
        .arg(
            Arg::with_name("max-samples")
                .short("n")
                .long("max-samples")
                .value_name("N")
                .help("Stop reading the profile after N samples")
                .takes_value(true)
                .default_value(DEFAULT_MAX_SAMPLES)
                .validator(|v| match v.parse::<usize>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Sample limit must be a non-negative integer".into()),
                }),
        )
        .arg(
            Arg::with_name("interval")
                .short("i")
                .long("interval")
                .value_name("MINUTES")
                .help("Simulated minutes per sample (defaults to the configured tick)")
                .takes_value(true)
                .validator(|v| match v.parse::<f64>() {
                    Ok(minutes) if minutes.is_finite() && minutes > 0.0 => Ok(()),
                    _ => Err("Interval must be a positive number of minutes".into()),
                }),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON machine configuration")
                .takes_value(true)
                .conflicts_with("preset"),
        )
        .arg(
            Arg::with_name("preset")
                .long("preset")
                .value_name("PRESET")
                .help("Named threshold preset")
                .takes_value(true)
                .possible_values(&PolicyPreset::NAMES),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log every entry, exit and ignored event"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(&matches) {
        eprintln!("{} {}", "❌".red(), e.to_string().bright_red());
        std::process::exit(1);
    }
}

fn run(matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(matches)?;

    // Both values were checked by the argument validators.
    let max_samples = matches
        .value_of("max-samples")
        .unwrap_or(DEFAULT_MAX_SAMPLES)
        .parse::<usize>()?;
    let format: TraceFormat = matches.value_of("format").unwrap_or("text").parse()?;

    let profile_path = matches.value_of("profile").ok_or("missing --profile")?;
    let profile = PowerProfile::from_path(profile_path, max_samples)?;

    let mut simulator = Simulator::new(Machine::new(config)?);
    if let Some(interval) = matches.value_of("interval") {
        simulator = simulator.with_interval(interval.parse()?);
    }
    if let Some(trace) = matches.value_of("trace") {
        let sink: Box<dyn Write> = if trace == "-" {
            Box::new(io::stdout())
        } else {
            Box::new(BufWriter::new(File::create(trace)?))
        };
        simulator = simulator.with_trace(sink, format);
    }

    let report = simulator.run(&profile)?;
    print_summary(profile_path, &report);
    Ok(())
}

fn load_config(matches: &ArgMatches) -> Result<MachineConfig, Box<dyn std::error::Error>> {
    if let Some(path) = matches.value_of("config") {
        let json = fs::read_to_string(path)?;
        return Ok(MachineConfig::from_json(&json)?);
    }
    let preset = match matches.value_of("preset") {
        Some(name) => name.parse()?,
        None => PolicyPreset::default(),
    };
    Ok(MachineConfig::from_preset(preset))
}

fn print_summary(profile_path: &str, report: &SimulationReport) {
    eprintln!();
    eprintln!("{}", "🛰️  Replay Summary".bright_blue().bold());
    eprintln!("{}", "==================".bright_blue());
    eprintln!("  {:<18} {}", "Profile:".bright_white(), profile_path);
    eprintln!("  {:<18} {}", "Ticks:".bright_white(), report.trace.len());
    eprintln!("  {:<18} {}", "Transitions:".bright_white(), report.transitions.len());

    for mode in [Mode::Charge, Mode::Detumble, Mode::Telemetry, Mode::Transmit, Mode::Receive] {
        let ticks = report.ticks_in(mode);
        if ticks > 0 {
            eprintln!("    {:<16} {} ticks", mode.to_string().cyan(), ticks);
        }
    }

    eprintln!(
        "  {:<18} {}",
        "Final mode:".bright_white(),
        report.final_mode.to_string().bright_cyan()
    );
    eprintln!(
        "  {:<18} {:.3} Wh",
        "Final energy:".bright_white(),
        report.final_energy_wh
    );

    if report.depleted_ticks > 0 {
        eprintln!(
            "{} battery below zero for {} ticks",
            "⚠️".yellow(),
            report.depleted_ticks.to_string().bright_red()
        );
    }
    if !report.warnings.is_empty() {
        eprintln!(
            "{} {} profile lines skipped",
            "⚠️".yellow(),
            report.warnings.len()
        );
        for warning in &report.warnings {
            eprintln!("    {}", warning.to_string().yellow());
        }
    }
    eprintln!("{} {}", "✅".green(), "Replay complete".bright_green());
}
