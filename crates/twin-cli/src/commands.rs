//! Command execution. Every command prints one JSON document on stdout.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::info;
use twin_algo::{AnalysisRequest, EngineConfig, SimulationOrchestrator};
use twin_core::{islands, BusId, Network, NetworkStats, NetworkUpdate};

use crate::cli::{Cli, Commands};

#[derive(Serialize)]
struct ValidationSummary {
    valid: bool,
    slack_bus: BusId,
    stats: NetworkStats,
    islands: Vec<Vec<BusId>>,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn load_network(path: Option<&Path>) -> Result<Network> {
    match path {
        Some(path) => Network::from_path(path)
            .with_context(|| format!("failed to load topology from {}", path.display())),
        None => {
            info!("no topology given, using the standard substation");
            Network::standard_substation().context("failed to build the standard substation")
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("failed to serialize output")
}

/// Build the engine from the global flags, run the command and return its output.
pub fn execute(cli: &Cli) -> Result<String> {
    let mut config = load_config(cli.config.as_deref())?;
    match &cli.command {
        Commands::Fault {
            impedance: Some((r, x)),
            ..
        } => {
            config.fault.fault_resistance_pu = *r;
            config.fault.fault_reactance_pu = *x;
        }
        Commands::Contingency { sequential: true } => config.contingency.parallel = false,
        _ => {}
    }

    let network = load_network(cli.topology.as_deref())?;
    let mut engine = SimulationOrchestrator::new(network, config)?;
    if let Some(path) = cli.updates.as_deref() {
        let update = NetworkUpdate::from_path(path)
            .with_context(|| format!("failed to read updates from {}", path.display()))?;
        engine
            .apply_update(&update)
            .with_context(|| format!("failed to apply updates from {}", path.display()))?;
    }

    let request = match &cli.command {
        Commands::LoadFlow => AnalysisRequest::LoadFlow,
        Commands::Fault {
            bus, fault_type, ..
        } => AnalysisRequest::Fault {
            bus_id: BusId::new(bus.as_str()),
            fault_type: *fault_type,
        },
        Commands::Contingency { .. } => AnalysisRequest::Contingency,
        Commands::Stability { bus, duration } => AnalysisRequest::Stability {
            fault_bus: BusId::new(bus.as_str()),
            fault_duration_s: *duration,
        },
        Commands::Export { output, solve } => {
            if *solve {
                engine.run(AnalysisRequest::LoadFlow)?;
            }
            let json = to_json(&engine.snapshot())?;
            return match output {
                Some(path) => {
                    std::fs::write(path, &json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!(path = %path.display(), "snapshot written");
                    Ok(String::new())
                }
                None => Ok(json),
            };
        }
        Commands::Validate => {
            let network = engine.network();
            return to_json(&ValidationSummary {
                valid: true,
                slack_bus: network.slack_bus()?.id.clone(),
                stats: network.stats(),
                islands: islands(network),
            });
        }
    };

    let result = engine.run(request)?;
    to_json(result)
}
