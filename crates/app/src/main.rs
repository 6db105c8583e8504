// Copyright 2025-2026 CEMAXECUTER LLC

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hrf_sdr::driver::Library;
use hrf_sdr::DeviceConfig;

#[derive(Parser, Debug)]
#[command(name = "hackrf-stream")]
#[command(about = "HackRF receive, sweep and replay tool")]
struct Cli {
    /// Device index
    #[arg(short = 'd', long, default_value = "0")]
    index: usize,

    /// Use the built-in simulator instead of libhackrf
    #[arg(long)]
    sim: bool,

    /// JSON file with device defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Center frequency in MHz (overrides the config)
    #[arg(short = 'c', long)]
    center_freq: Option<f64>,

    /// Sample rate in MHz (overrides the config)
    #[arg(short = 'r', long)]
    sample_rate: Option<f64>,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices and show the selected one's settings
    Info,
    /// Receive N samples and report their power
    Read {
        #[arg(short = 'n', long, default_value = "262144")]
        samples: usize,
    },
    /// Sweep one or more bands and print power per tuning step
    Sweep {
        /// Band as START:END in MHz, repeatable
        #[arg(short = 'b', long = "band", required = true)]
        bands: Vec<String>,

        /// Sweep frames to collect
        #[arg(long, default_value = "1")]
        frames: usize,

        #[arg(long, default_value = "16384")]
        bytes_per_step: u32,

        /// Step width in Hz
        #[arg(long, default_value = "1000000")]
        step_width: u32,

        /// Linear sweep instead of interleaved
        #[arg(long)]
        linear: bool,
    },
    /// Record N samples, then transmit them back
    Replay {
        #[arg(short = 'n', long, default_value = "1000000")]
        samples: usize,

        /// Transmit frequency in MHz (defaults to the receive frequency)
        #[arg(long)]
        tx_freq: Option<f64>,
    },
}

fn main() {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    let lib = match library(cli.sim) {
        Ok(lib) => lib,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Info => commands::info(lib.as_ref(), cli.index, config),
        Command::Read { samples } => commands::read(lib.as_ref(), cli.index, config, samples),
        Command::Sweep {
            bands,
            frames,
            bytes_per_step,
            step_width,
            linear,
        } => commands::parse_bands(&bands).and_then(|bands| {
            commands::sweep(
                lib.as_ref(),
                cli.index,
                config,
                &bands,
                frames,
                bytes_per_step,
                step_width,
                !linear,
            )
        }),
        Command::Replay { samples, tx_freq } => {
            let tx_freq = tx_freq.map(|mhz| (mhz * 1e6) as u64);
            commands::replay(lib.as_ref(), cli.index, config, samples, tx_freq)
        }
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<DeviceConfig, String> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
            DeviceConfig::from_json(&text).map_err(|e| format!("{}: {}", path.display(), e))?
        }
        None => DeviceConfig::default(),
    };
    if let Some(mhz) = cli.center_freq {
        config.center_freq = (mhz * 1e6) as u64;
    }
    if let Some(mhz) = cli.sample_rate {
        config.sample_rate = mhz * 1e6;
    }
    Ok(config)
}

#[cfg(feature = "hackrf")]
fn library(sim: bool) -> Result<Box<dyn Library>, String> {
    if sim {
        return Ok(Box::new(hrf_sdr::sim::SimLibrary::new()));
    }
    Ok(Box::new(hrf_sdr::ffi::LibHackrf::new()))
}

#[cfg(not(feature = "hackrf"))]
fn library(sim: bool) -> Result<Box<dyn Library>, String> {
    if sim {
        return Ok(Box::new(hrf_sdr::sim::SimLibrary::new()));
    }
    Err("built without libhackrf support; rebuild with --features hackrf or pass --sim".to_string())
}
