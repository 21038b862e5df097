//! ptplink Sim Pair Demo
//!
//! Runs a master and a slave on a simulated segment and prints how the
//! slave's offset converges.
//!
//! Usage: sim-pair [--config FILE] [--periods N] [--lead-ms MS] [--lossy] [--json]

use std::process::ExitCode;

use ptplink_runtime::{init_logging, LogFormat, PlatformConfig};
use ptplink_test::{ChaosConfig, PairConfig, SimPair};

struct Args {
    config: Option<String>,
    periods: usize,
    lead_ms: u64,
    lossy: bool,
    json: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        periods: 100,
        lead_ms: 400,
        lossy: false,
        json: false,
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = Some(it.next().ok_or("--config needs a path")?),
            "--periods" => {
                args.periods = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or("--periods needs a number")?
            }
            "--lead-ms" => {
                args.lead_ms = it
                    .next()
                    .and_then(|v| v.parse().ok())
                    .ok_or("--lead-ms needs a number")?
            }
            "--lossy" => args.lossy = true,
            "--json" => args.json = true,
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("usage: sim-pair [--config FILE] [--periods N] [--lead-ms MS] [--lossy] [--json]");
            return ExitCode::from(2);
        }
    };

    let platform = match &args.config {
        Some(path) => match PlatformConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => PlatformConfig::default(),
    };

    let format = if args.json {
        LogFormat::Json
    } else {
        platform.log_format
    };
    init_logging(format);

    let ticks_per_ms = platform.clock.frequency_hz / 1_000;
    let config = PairConfig {
        chaos: if args.lossy {
            ChaosConfig::lossy()
        } else {
            ChaosConfig::perfect()
        },
        seed: 0x5EED,
        master_lead_ticks: args.lead_ms * ticks_per_ms,
        platform,
        ..Default::default()
    };

    let mut pair = match SimPair::new(config) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(error = %e, "failed to start the pair");
            return ExitCode::FAILURE;
        }
    };

    println!("period  master_time            offset_ns");
    println!("{:>6}  {:<21}  {:>12}", 0, pair.master_time().to_string(), pair.offset_ns());
    for period in 1..=args.periods {
        pair.step();
        if period % 10 == 0 || period == args.periods {
            let master_time = pair.master_time();
            println!("{:>6}  {:<21}  {:>12}", period, master_time.to_string(), pair.offset_ns());
        }
    }

    let slave = pair.slave().engine().stats().clone();
    let segment = pair.segment().stats();
    println!();
    println!(
        "slave: {} syncs, {} steps, {} slews, {} rejected steps",
        slave.syncs_received, slave.steps, slave.slews, slave.rejected
    );
    println!(
        "segment: {} sent, {} delivered, {} lost, {} duplicated",
        segment.frames_sent, segment.frames_delivered, segment.frames_lost, segment.frames_duplicated
    );

    pair.shutdown();
    ExitCode::SUCCESS
}
