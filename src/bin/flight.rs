use clap::{App, Arg};
use colored::*;
use cubesat::event::TICKS_PER_SECOND;
use cubesat::{Event, EventQueue, LoggingActuator, Machine, MachineConfig, PolicyPreset};
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("cubesat-flight")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  Run the mode manager against a real-time tick source")
        .arg(
            Arg::with_name("seconds")
                .short("s")
                .long("seconds")
                .value_name("SECONDS")
                .help("Wall-clock duration of the run")
                .takes_value(true)
                .default_value("10")
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Duration must be a whole number of seconds".into()),
                }),
        )
        .arg(
            Arg::with_name("generation")
                .short("g")
                .long("generation")
                .value_name("WATTS")
                .help("Constant solar generation reported by each battery sample")
                .takes_value(true)
                .default_value("20.0")
                .validator(|v| match v.parse::<f64>() {
                    Ok(watts) if watts.is_finite() && watts >= 0.0 => Ok(()),
                    _ => Err("Generation must be a non-negative number of watts".into()),
                }),
        )
        .arg(
            Arg::with_name("sample-every")
                .long("sample-every")
                .value_name("TICKS")
                .help("Ticks between battery samples")
                .takes_value(true)
                .default_value("10")
                .validator(|v| match v.parse::<u32>() {
                    Ok(n) if n > 0 => Ok(()),
                    _ => Err("Sample period must be a positive number of ticks".into()),
                }),
        )
        .arg(
            Arg::with_name("preset")
                .long("preset")
                .value_name("PRESET")
                .help("Named threshold preset")
                .takes_value(true)
                .possible_values(&PolicyPreset::NAMES)
                .default_value("firmware"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log entry and exit actions"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let seconds: u64 = matches.value_of("seconds").unwrap_or("10").parse()?;
    let generation: f64 = matches.value_of("generation").unwrap_or("20.0").parse()?;
    let sample_every: u32 = matches.value_of("sample-every").unwrap_or("10").parse()?;
    let preset: PolicyPreset = matches.value_of("preset").unwrap_or("firmware").parse()?;

    println!("{}", "🛰️  CubeSat Flight Loop".bright_blue().bold());
    println!("========================");

    let config =
        MachineConfig::from_preset(preset).with_sample_period(sample_every, TICKS_PER_SECOND);
    let mut machine = Machine::with_actuator(config, Box::new(LoggingActuator))?;
    machine.process_events()?;

    // The queue outlives both halves: the producer moves into the tick task.
    let queue: &'static mut EventQueue = Box::leak(Box::new(EventQueue::new()));
    let (mut producer, mut consumer) = queue.split();
    let total_ticks = seconds * u64::from(TICKS_PER_SECOND);
    let tick_period = Duration::from_millis(1000 / u64::from(TICKS_PER_SECOND));

    // Timer "interrupt": a fixed-rate tick plus periodic battery samples.
    let tick_source = tokio::spawn(async move {
        let mut interval = time::interval(tick_period);
        for tick in 1..=total_ticks {
            interval.tick().await;
            if let Err(event) = producer.enqueue(Event::TICK) {
                warn!("⚠️  Event queue full, dropped {}", event);
            }
            if tick % u64::from(sample_every) == 0 {
                if let Err(event) = producer.enqueue(Event::battery_sample(generation)) {
                    warn!("⚠️  Event queue full, dropped {}", event);
                }
            }
        }
    });

    let mut dispatch = time::interval(tick_period);
    loop {
        tokio::select! {
            _ = dispatch.tick() => {
                let finished = tick_source.is_finished();
                match machine.drain(&mut consumer) {
                    Ok(0) if finished => break,
                    Ok(_) => {}
                    Err(e) => {
                        error!("❌ Mode manager fault: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    tick_source.abort();

    let status = machine.status();
    println!(
        "{} final mode {} at {:.1}% ({:.3} Wh)",
        "✅".green(),
        status.mode.to_string().bright_cyan(),
        status.power.fraction * 100.0,
        status.power.stored_energy_wh
    );
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
