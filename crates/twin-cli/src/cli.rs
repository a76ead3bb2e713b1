use clap::{Parser, Subcommand};
use std::path::PathBuf;
use twin_algo::FaultType;

#[derive(Parser, Debug)]
#[command(name = "twin", author, version, about = "Substation network analysis", long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info", global = true)]
    pub log_level: tracing::Level,

    /// Engine configuration (TOML); missing fields keep their defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Network topology (JSON, YAML or TOML); the standard substation when omitted
    #[arg(long, global = true)]
    pub topology: Option<PathBuf>,

    /// Parameter overrides applied before the analysis
    #[arg(long, global = true)]
    pub updates: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Newton-Raphson load flow
    LoadFlow,
    /// Short-circuit analysis at one bus
    Fault {
        /// Faulted bus id
        #[arg(long)]
        bus: String,
        /// three-phase, line-to-ground or line-to-line
        #[arg(long = "type", default_value = "three-phase")]
        fault_type: FaultType,
        /// Fault impedance as R,X in p.u.
        #[arg(long, value_parser = parse_impedance)]
        impedance: Option<(f64, f64)>,
    },
    /// N-1 screening of every in-service line and transformer
    Contingency {
        /// Solve cases one after another instead of on the thread pool
        #[arg(long)]
        sequential: bool,
    },
    /// Swing-equation simulation of a fault cleared after `duration` seconds
    Stability {
        /// Faulted bus id
        #[arg(long)]
        bus: String,
        /// Fault duration (s)
        #[arg(long, default_value_t = 0.1)]
        duration: f64,
    },
    /// Write a snapshot of the network and results as JSON
    Export {
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Run a load flow before exporting
        #[arg(long)]
        solve: bool,
    },
    /// Check the topology and print its summary
    Validate,
}

/// Parse `R,X` into a fault impedance.
pub fn parse_impedance(s: &str) -> Result<(f64, f64), String> {
    let (r, x) = s
        .split_once(',')
        .ok_or_else(|| format!("expected R,X but got '{s}'"))?;
    let r: f64 = r
        .trim()
        .parse()
        .map_err(|e| format!("invalid resistance '{r}': {e}"))?;
    let x: f64 = x
        .trim()
        .parse()
        .map_err(|e| format!("invalid reactance '{x}': {e}"))?;
    if !(r.is_finite() && x.is_finite()) || r < 0.0 {
        return Err(format!("fault impedance must be finite with R >= 0, got {s}"));
    }
    Ok((r, x))
}
