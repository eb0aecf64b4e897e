//! MDAQ acquisition tool
//!
//! Resets the instrument, prints its status and acquires a number of bursts,
//! printing a line per burst. Without a port the simulated instrument is used.
//!
//! Usage:
//!   cargo run --example acquire -- --help
//!
//! Set RUST_LOG=mdaq_core=debug to see every exchange.

use anyhow::{Context, Result};
use clap::Parser;
use mdaq_core::prelude::*;
use std::error::Error;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

struct PrintSink;

impl BurstSink for PrintSink {
    fn accept(
        &mut self,
        _run: &Uuid,
        burst: &TimedBurst,
        total: &AccumulatedTotal,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        println!(
            "  burst at {:>7.2}s: {} cycles, {} counts ({} total)",
            burst.elapsed.as_secs_f64(),
            burst.cycles,
            burst.burst.total(),
            total.counts().iter().sum::<u64>()
        );
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(name = "acquire")]
#[command(about = "Acquire Mössbauer spectra from an MDAQ instrument")]
#[command(version)]
struct Args {
    /// List serial ports and exit
    #[arg(long)]
    list: bool,

    /// Serial port (default: simulated instrument)
    #[arg(long)]
    port: Option<String>,

    /// JSON session config (overrides --port and --model)
    #[arg(long)]
    config: Option<String>,

    /// Instrument model: 107 or 209
    #[arg(long, default_value = "209")]
    model: Model,

    /// Number of bursts
    #[arg(long, default_value = "5")]
    bursts: usize,

    /// Cycles per burst
    #[arg(long, default_value = "16")]
    cycles: u32,

    /// Fetch binary dumps of 1, 2 or 4 bytes per channel
    #[arg(long, value_name = "WIDTH", value_parser = parse_width)]
    binary: Option<ItemWidth>,
}

fn parse_width(s: &str) -> Result<ItemWidth, String> {
    let bytes: usize = s.parse().map_err(|e| format!("{}", e))?;
    ItemWidth::from_bytes(bytes).ok_or_else(|| format!("no {}-byte binary dump", bytes))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mdaq_core=info")),
        )
        .init();

    let args = Args::parse();
    if args.list {
        for name in mdaq_core::protocol::available_ports() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = match (&args.config, &args.port) {
        (Some(path), _) => SessionConfig::from_file(path)
            .with_context(|| format!("loading {}", path))?,
        (None, Some(port)) => SessionConfig::new(port.clone(), args.model),
        (None, None) => SessionConfig::new("simulated", args.model),
    };
    config.acquisition.cycles_per_burst = args.cycles;
    if let Some(width) = args.binary {
        config.acquisition.format = SpectrumFormat::Binary(width);
    }

    let mut session = if args.port.is_some() || args.config.is_some() {
        println!("Opening {} ({})", config.port_name, config.model);
        Session::open(&config)?
    } else {
        println!("Using simulated {}", config.model);
        let sim = SimulatedMdaq::new(config.model, 2024);
        sim.handle().set_cycles_per_query(4);
        Session::with_link(Box::new(sim), config.model)
    };

    session.reset().context("reset failed, is the instrument connected?")?;
    let status = session.get_status()?;
    println!("Status: {}", status.raw);
    for (parameter, value) in &status.fields {
        println!("  {:<22} {:#06X}", parameter.to_string(), value);
    }

    let caps = session.capabilities();
    let step = status.get(Parameter::Step).unwrap_or(1);
    if let Some(time_base) = status.get(Parameter::TimeBase) {
        println!(
            "Frequency: {:.3} Hz, {} cycles take {:.1} s",
            caps.frequency(step, time_base),
            args.cycles,
            caps.elapsed_time(args.cycles, step, time_base)
        );
    }

    let cancel = CancellationToken::new();
    let mut controller = AcquisitionController::new(&mut session, config.acquisition.clone());
    let summary = controller.run(args.bursts, Duration::from_secs(600), &mut PrintSink, &cancel)?;

    println!(
        "Run {}: {} bursts, {} counts",
        summary.id,
        summary.bursts,
        summary.total.counts().iter().sum::<u64>()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args() {
        Args::command().debug_assert();

        let args = Args::try_parse_from(["acquire", "--model", "107", "--binary", "2"]).unwrap();
        assert_eq!(args.model, Model::Mdaq107);
        assert_eq!(args.binary, Some(ItemWidth::Two));
        assert_eq!(args.cycles, 16);

        assert!(Args::try_parse_from(["acquire", "--binary", "3"]).is_err());
        assert!(Args::try_parse_from(["acquire", "--model", "208"]).is_err());
    }
}
