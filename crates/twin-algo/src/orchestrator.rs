//! Single entry point for running analyses against one network.
//!
//! [`SimulationOrchestrator`] owns a [`Network`] and an [`EngineConfig`],
//! dispatches [`AnalysisRequest`]s to the analyzers and appends a
//! [`SimulationResult`] for every run, failed ones included. The history is never
//! trimmed by the orchestrator itself; use [`SimulationOrchestrator::take_history`]
//! to apply a retention policy.
//!
//! Every run and update takes `&mut self`. Hosts that share one network
//! between threads wrap it in a [`SharedOrchestrator`], which holds the lock
//! across a whole "update then analyse" sequence.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use twin_core::{
    BusId, ElementId, Network, NetworkStats, NetworkUpdate, TopologySpec, TwinError, TwinResult,
};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::contingency::{ContingencyAnalyzer, ContingencyReport};
use crate::fault::{FaultAnalyzer, FaultOutcome, FaultType};
use crate::load_flow::{LoadFlowSolution, LoadFlowSolver};
use crate::stability::{StabilityAnalyzer, StabilityReport, StabilityStatus};

/// Fault duration used when a stability request does not give one
pub const DEFAULT_FAULT_DURATION_S: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    LoadFlow,
    Fault,
    Contingency,
    Stability,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::LoadFlow => "load_flow",
            AnalysisKind::Fault => "fault",
            AnalysisKind::Contingency => "contingency",
            AnalysisKind::Stability => "stability",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "load_flow" | "power_flow" => Ok(AnalysisKind::LoadFlow),
            "fault" | "short_circuit" => Ok(AnalysisKind::Fault),
            "contingency" | "contingency_analysis" | "n1" | "n_1" => Ok(AnalysisKind::Contingency),
            "stability" | "transient_stability" => Ok(AnalysisKind::Stability),
            other => Err(TwinError::Usage(format!(
                "unsupported analysis kind '{other}'"
            ))),
        }
    }
}

/// One analysis to run, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisRequest {
    LoadFlow,
    Fault {
        bus_id: BusId,
        fault_type: FaultType,
    },
    Contingency,
    Stability {
        fault_bus: BusId,
        fault_duration_s: f64,
    },
}

fn param<'a>(params: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| params.get(*name))
}

fn string_param(params: &Value, names: &[&str]) -> TwinResult<Option<String>> {
    match param(params, names) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(TwinError::Usage(format!(
            "parameter '{}' must be a string, got {other}",
            names[0]
        ))),
    }
}

impl AnalysisRequest {
    /// Build a request from a kind name and a JSON object of parameters.
    ///
    /// Fault requests need `bus_id` and default to a three-phase fault.
    /// Stability requests need `fault_bus` and default to a 0.1 s fault.
    pub fn from_parts(kind: &str, params: &Value) -> TwinResult<Self> {
        let kind: AnalysisKind = kind.parse()?;
        if !(params.is_object() || params.is_null()) {
            return Err(TwinError::Usage(format!(
                "analysis parameters must be a JSON object, got {params}"
            )));
        }

        match kind {
            AnalysisKind::LoadFlow => Ok(AnalysisRequest::LoadFlow),
            AnalysisKind::Contingency => Ok(AnalysisRequest::Contingency),
            AnalysisKind::Fault => {
                let bus_id = string_param(params, &["bus_id", "bus"])?.ok_or_else(|| {
                    TwinError::Usage("fault analysis requires a 'bus_id' parameter".into())
                })?;
                let fault_type = match string_param(params, &["fault_type", "type"])? {
                    Some(name) => name.parse()?,
                    None => FaultType::ThreePhase,
                };
                Ok(AnalysisRequest::Fault {
                    bus_id: BusId::new(bus_id),
                    fault_type,
                })
            }
            AnalysisKind::Stability => {
                let fault_bus = string_param(params, &["fault_bus", "bus_id", "bus"])?
                    .ok_or_else(|| {
                        TwinError::Usage(
                            "stability analysis requires a 'fault_bus' parameter".into(),
                        )
                    })?;
                let fault_duration_s =
                    match param(params, &["fault_duration_s", "fault_duration", "duration"]) {
                        None | Some(Value::Null) => DEFAULT_FAULT_DURATION_S,
                        Some(value) => value.as_f64().ok_or_else(|| {
                            TwinError::Usage(format!(
                                "fault duration must be a number of seconds, got {value}"
                            ))
                        })?,
                    };
                Ok(AnalysisRequest::Stability {
                    fault_bus: BusId::new(fault_bus),
                    fault_duration_s,
                })
            }
        }
    }

    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisRequest::LoadFlow => AnalysisKind::LoadFlow,
            AnalysisRequest::Fault { .. } => AnalysisKind::Fault,
            AnalysisRequest::Contingency => AnalysisKind::Contingency,
            AnalysisRequest::Stability { .. } => AnalysisKind::Stability,
        }
    }
}

/// Analysis-specific part of a [`SimulationResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "analysis", content = "result", rename_all = "snake_case")]
pub enum AnalysisPayload {
    LoadFlow(LoadFlowSolution),
    Fault(FaultOutcome),
    Contingency(ContingencyReport),
    Stability(StabilityReport),
}

/// Bus state at the time a result was recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusState {
    pub id: BusId,
    pub voltage_pu: f64,
    pub voltage_kv: f64,
    pub angle_deg: f64,
    pub load_mw: f64,
    pub generation_mw: f64,
}

/// Sending-end flow of a line or transformer from the latest converged load flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementFlow {
    pub element: ElementId,
    pub p_mw: f64,
    pub q_mvar: f64,
    pub loading_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_ka: Option<f64>,
}

fn element_flows(solution: &LoadFlowSolution) -> Vec<ElementFlow> {
    let lines = solution.lines.iter().map(|l| ElementFlow {
        element: ElementId::Line(l.id.clone()),
        p_mw: l.p_from_mw,
        q_mvar: l.q_from_mvar,
        loading_percent: l.loading_percent,
        current_ka: Some(l.current_ka),
    });
    let transformers = solution.transformers.iter().map(|t| ElementFlow {
        element: ElementId::Transformer(t.id.clone()),
        p_mw: t.p_mw,
        q_mvar: t.q_from_mvar,
        loading_percent: t.loading_percent,
        current_ka: None,
    });
    lines.chain(transformers).collect()
}

fn bus_states(network: &Network) -> Vec<BusState> {
    network
        .buses()
        .map(|b| BusState {
            id: b.id.clone(),
            voltage_pu: b.voltage_pu.value(),
            voltage_kv: b.voltage_pu.value() * b.base_kv.value(),
            angle_deg: b.angle_deg.value(),
            load_mw: b.load_mw.value(),
            generation_mw: b.generation_mw.value(),
        })
        .collect()
}

/// Immutable record of one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: AnalysisKind,
    pub request: AnalysisRequest,
    /// Load flow converged, fault Z-bus inverted, every contingency case
    /// converged, or stability integration ran to completion
    pub converged: bool,
    /// Newton iterations (summed over cases for contingency screening) or
    /// integration steps for stability
    pub iterations: usize,
    /// False when the analysis returned an error instead of a result
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub bus_voltages: Vec<BusState>,
    pub element_flows: Vec<ElementFlow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<AnalysisPayload>,
}

/// Read-only export of the engine state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub generated_at: DateTime<Utc>,
    pub network: TopologySpec,
    pub stats: NetworkStats,
    pub bus_states: Vec<BusState>,
    pub element_flows: Vec<ElementFlow>,
    /// Most recent successful result per analysis kind
    pub latest: BTreeMap<AnalysisKind, SimulationResult>,
    pub history: Vec<SimulationResult>,
}

#[derive(Debug, Clone)]
pub struct SimulationOrchestrator {
    network: Network,
    config: EngineConfig,
    history: Vec<SimulationResult>,
    flows: Vec<ElementFlow>,
}

impl SimulationOrchestrator {
    pub fn new(network: Network, config: EngineConfig) -> TwinResult<Self> {
        network.validate()?;
        config.validate()?;
        Ok(Self {
            network,
            config,
            history: Vec::new(),
            flows: Vec::new(),
        })
    }

    /// Orchestrator over the built-in 400/220/33 kV substation with default settings.
    pub fn standard() -> TwinResult<Self> {
        Self::new(Network::standard_substation()?, EngineConfig::default())
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn history(&self) -> &[SimulationResult] {
        &self.history
    }

    /// Most recent successful result of `kind`.
    pub fn latest(&self, kind: AnalysisKind) -> Option<&SimulationResult> {
        self.history.iter().rev().find(|r| r.kind == kind && r.success)
    }

    /// Remove and return the whole run history.
    pub fn take_history(&mut self) -> Vec<SimulationResult> {
        std::mem::take(&mut self.history)
    }

    /// Apply a bulk parameter update atomically.
    ///
    /// Flows from earlier load flows no longer describe the network and are
    /// dropped; bus voltages keep their last solved values.
    pub fn apply_update(&mut self, update: &NetworkUpdate) -> TwinResult<()> {
        if update.is_empty() {
            return Ok(());
        }
        self.network.apply_update(update)?;
        self.flows.clear();
        info!(
            buses = update.buses.len(),
            lines = update.lines.len(),
            transformers = update.transformers.len(),
            "network parameters updated"
        );
        Ok(())
    }

    /// Run one analysis and append its result to the history.
    ///
    /// A request that fails is still recorded, with `success` cleared and the
    /// error message kept, before the error is returned.
    pub fn run(&mut self, request: AnalysisRequest) -> TwinResult<&SimulationResult> {
        let kind = request.kind();
        info!(%kind, "running analysis");

        let (result, outcome) = match self.dispatch(&request) {
            Ok((converged, iterations, payload)) => {
                let result = self.record(request, converged, iterations, None, Some(payload));
                info!(%kind, id = %result.id, converged, iterations, "analysis recorded");
                (result, Ok(()))
            }
            Err(err) => {
                let result = self.record(request, false, 0, Some(err.to_string()), None);
                warn!(%kind, id = %result.id, error = %err, "analysis failed");
                (result, Err(err))
            }
        };
        self.history.push(result);
        outcome?;
        let recorded = self.history.len() - 1;
        Ok(&self.history[recorded])
    }

    fn record(
        &self,
        request: AnalysisRequest,
        converged: bool,
        iterations: usize,
        error: Option<String>,
        payload: Option<AnalysisPayload>,
    ) -> SimulationResult {
        SimulationResult {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: request.kind(),
            request,
            converged,
            iterations,
            success: error.is_none(),
            error,
            bus_voltages: bus_states(&self.network),
            element_flows: self.flows.clone(),
            payload,
        }
    }

    fn dispatch(
        &mut self,
        request: &AnalysisRequest,
    ) -> TwinResult<(bool, usize, AnalysisPayload)> {
        let outcome = match request {
            AnalysisRequest::LoadFlow => {
                let solver = LoadFlowSolver::with_config(self.config.load_flow);
                let solution = solver.solve_in_place(&mut self.network)?;
                if solution.converged {
                    self.flows = element_flows(&solution);
                }
                (
                    solution.converged,
                    solution.iterations,
                    AnalysisPayload::LoadFlow(solution),
                )
            }
            AnalysisRequest::Fault { bus_id, fault_type } => {
                let outcome = FaultAnalyzer::with_config(self.config.fault).analyze(
                    &self.network,
                    bus_id,
                    *fault_type,
                )?;
                (outcome.is_solved(), 0, AnalysisPayload::Fault(outcome))
            }
            AnalysisRequest::Contingency => {
                let analyzer = ContingencyAnalyzer::new(
                    LoadFlowSolver::with_config(self.config.load_flow),
                    self.config.contingency,
                );
                let report = analyzer.run_n1(&self.network)?;
                let iterations = report.cases.iter().map(|c| c.iterations).sum();
                (
                    report.summary.non_converged == 0,
                    iterations,
                    AnalysisPayload::Contingency(report),
                )
            }
            AnalysisRequest::Stability {
                fault_bus,
                fault_duration_s,
            } => {
                let report = StabilityAnalyzer::with_config(self.config.stability).simulate(
                    &self.network,
                    fault_bus,
                    *fault_duration_s,
                )?;
                (
                    report.status != StabilityStatus::Aborted,
                    report.steps,
                    AnalysisPayload::Stability(report),
                )
            }
        };
        Ok(outcome)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let mut latest = BTreeMap::new();
        for result in self.history.iter().filter(|r| r.success) {
            latest.insert(result.kind, result.clone());
        }
        EngineSnapshot {
            generated_at: Utc::now(),
            network: self.network.to_spec(),
            stats: self.network.stats(),
            bus_states: bus_states(&self.network),
            element_flows: self.flows.clone(),
            latest,
            history: self.history.clone(),
        }
    }
}

/// Thread-safe handle to one orchestrator.
///
/// Every method takes the lock for its whole duration, so a mutation and
/// the analysis that follows it are never interleaved with another caller.
#[derive(Debug, Clone)]
pub struct SharedOrchestrator {
    inner: Arc<Mutex<SimulationOrchestrator>>,
}

impl SharedOrchestrator {
    pub fn new(orchestrator: SimulationOrchestrator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(orchestrator)),
        }
    }

    pub fn run(&self, request: AnalysisRequest) -> TwinResult<SimulationResult> {
        self.inner.lock().run(request).cloned()
    }

    pub fn apply_update(&self, update: &NetworkUpdate) -> TwinResult<()> {
        self.inner.lock().apply_update(update)
    }

    /// Apply `update` and run `request` under a single lock.
    pub fn update_and_run(
        &self,
        update: &NetworkUpdate,
        request: AnalysisRequest,
    ) -> TwinResult<SimulationResult> {
        let mut guard = self.inner.lock();
        guard.apply_update(update)?;
        guard.run(request).cloned()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.inner.lock().snapshot()
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock().history().len()
    }

    /// Run `f` with exclusive access to the orchestrator.
    pub fn with<R>(&self, f: impl FnOnce(&mut SimulationOrchestrator) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twin_core::{BusUpdate, LineId, Megawatts};

    #[test]
    fn test_kind_parsing() {
        assert_eq!("load-flow".parse::<AnalysisKind>().unwrap(), AnalysisKind::LoadFlow);
        assert_eq!("short_circuit".parse::<AnalysisKind>().unwrap(), AnalysisKind::Fault);
        assert_eq!(
            "Transient_Stability".parse::<AnalysisKind>().unwrap(),
            AnalysisKind::Stability
        );
        assert!("harmonic_analysis".parse::<AnalysisKind>().unwrap_err().is_usage());
    }

    #[test]
    fn test_from_parts() {
        let request =
            AnalysisRequest::from_parts("fault", &json!({"bus_id": "BUS_220_1"})).unwrap();
        assert_eq!(
            request,
            AnalysisRequest::Fault {
                bus_id: BusId::new("BUS_220_1"),
                fault_type: FaultType::ThreePhase,
            }
        );

        let request = AnalysisRequest::from_parts(
            "stability",
            &json!({"fault_bus": "BUS_400_1", "fault_duration": 0.2}),
        )
        .unwrap();
        assert_eq!(
            request,
            AnalysisRequest::Stability {
                fault_bus: BusId::new("BUS_400_1"),
                fault_duration_s: 0.2,
            }
        );

        assert_eq!(
            AnalysisRequest::from_parts("load_flow", &Value::Null).unwrap(),
            AnalysisRequest::LoadFlow
        );
    }

    #[test]
    fn test_from_parts_requests_run_for_every_alias() {
        let cases = [
            ("load_flow", json!({}), AnalysisKind::LoadFlow),
            ("power-flow", Value::Null, AnalysisKind::LoadFlow),
            ("fault", json!({"bus_id": "BUS_220_1"}), AnalysisKind::Fault),
            (
                "short_circuit",
                json!({"bus": "BUS_400_1", "type": "line_to_line"}),
                AnalysisKind::Fault,
            ),
            ("contingency", json!({}), AnalysisKind::Contingency),
            ("n-1", Value::Null, AnalysisKind::Contingency),
            ("contingency_analysis", json!({}), AnalysisKind::Contingency),
            ("stability", json!({"fault_bus": "BUS_400_1"}), AnalysisKind::Stability),
            (
                "transient_stability",
                json!({"bus_id": "BUS_400_1", "duration": 0.5}),
                AnalysisKind::Stability,
            ),
        ];

        let mut orchestrator = SimulationOrchestrator::standard().unwrap();
        for (name, params, kind) in &cases {
            let request = AnalysisRequest::from_parts(name, params).unwrap();
            let result = orchestrator.run(request.clone()).unwrap();
            assert_eq!(result.kind, *kind, "{name}");
            assert_eq!(result.request, request);
            assert!(result.success);
            let payload_kind = match result.payload.as_ref().unwrap() {
                AnalysisPayload::LoadFlow(_) => AnalysisKind::LoadFlow,
                AnalysisPayload::Fault(_) => AnalysisKind::Fault,
                AnalysisPayload::Contingency(_) => AnalysisKind::Contingency,
                AnalysisPayload::Stability(_) => AnalysisKind::Stability,
            };
            assert_eq!(payload_kind, *kind, "{name}");
        }
        assert_eq!(orchestrator.history().len(), cases.len());

        match orchestrator.history()[3].payload.as_ref().unwrap() {
            AnalysisPayload::Fault(outcome) => {
                assert_eq!(outcome.report().unwrap().fault_type, FaultType::LineToLine)
            }
            other => panic!("unexpected payload {other:?}"),
        }
        match orchestrator.latest(AnalysisKind::Stability).unwrap().payload.as_ref() {
            Some(AnalysisPayload::Stability(report)) => {
                assert_eq!(report.fault_duration_s, 0.5);
                assert_eq!(report.status, StabilityStatus::Unstable);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_from_parts_rejects_bad_params() {
        assert!(AnalysisRequest::from_parts("fault", &json!({}))
            .unwrap_err()
            .is_usage());
        assert!(AnalysisRequest::from_parts("fault", &json!({"bus_id": 3}))
            .unwrap_err()
            .is_usage());
        assert!(
            AnalysisRequest::from_parts("fault", &json!({"bus_id": "B", "fault_type": "arc"}))
                .unwrap_err()
                .is_usage()
        );
        assert!(AnalysisRequest::from_parts("load_flow", &json!([1, 2]))
            .unwrap_err()
            .is_usage());
    }

    #[test]
    fn test_request_serde_shape() {
        let request = AnalysisRequest::Fault {
            bus_id: BusId::new("BUS_220_1"),
            fault_type: FaultType::LineToGround,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"kind": "fault", "bus_id": "BUS_220_1", "fault_type": "line_to_ground"})
        );
    }

    #[test]
    fn test_load_flow_run_records_result() {
        let mut orchestrator = SimulationOrchestrator::standard().unwrap();
        let result = orchestrator.run(AnalysisRequest::LoadFlow).unwrap();
        assert!(result.converged);
        assert_eq!(result.kind, AnalysisKind::LoadFlow);
        assert_eq!(result.bus_voltages.len(), 6);
        assert_eq!(result.element_flows.len(), 6);
        assert!(result.success);
        assert!(matches!(result.payload, Some(AnalysisPayload::LoadFlow(_))));
        assert_eq!(orchestrator.history().len(), 1);
    }

    #[test]
    fn test_failed_run_is_recorded_with_its_error() {
        let mut orchestrator = SimulationOrchestrator::standard().unwrap();
        let err = orchestrator
            .run(AnalysisRequest::Fault {
                bus_id: BusId::new("MISSING"),
                fault_type: FaultType::ThreePhase,
            })
            .unwrap_err();
        assert!(err.is_usage());

        assert_eq!(orchestrator.history().len(), 1);
        let failed = &orchestrator.history()[0];
        assert!(!failed.success);
        assert!(!failed.converged);
        assert_eq!(failed.kind, AnalysisKind::Fault);
        assert!(failed.error.as_deref().unwrap().contains("MISSING"));
        assert!(failed.payload.is_none());
        assert!(orchestrator.latest(AnalysisKind::Fault).is_none());

        let json = serde_json::to_value(failed).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("payload").is_none());
        assert!(orchestrator.snapshot().latest.is_empty());
    }

    #[test]
    fn test_history_is_append_only() {
        let mut orchestrator = SimulationOrchestrator::standard().unwrap();
        let first = orchestrator.run(AnalysisRequest::LoadFlow).unwrap().clone();
        orchestrator
            .run(AnalysisRequest::Fault {
                bus_id: BusId::new("BUS_220_1"),
                fault_type: FaultType::ThreePhase,
            })
            .unwrap();
        orchestrator.run(AnalysisRequest::LoadFlow).unwrap();

        assert_eq!(orchestrator.history().len(), 3);
        assert_eq!(orchestrator.history()[0], first);
        assert_ne!(orchestrator.history()[0].id, orchestrator.history()[2].id);
        assert_eq!(
            orchestrator.latest(AnalysisKind::Fault).unwrap().kind,
            AnalysisKind::Fault
        );

        let taken = orchestrator.take_history();
        assert_eq!(taken.len(), 3);
        assert!(orchestrator.history().is_empty());
    }

    #[test]
    fn test_update_invalidates_flows() {
        let mut orchestrator = SimulationOrchestrator::standard().unwrap();
        orchestrator.run(AnalysisRequest::LoadFlow).unwrap();
        assert!(!orchestrator.snapshot().element_flows.is_empty());

        let mut update = NetworkUpdate::default();
        update.buses.insert(
            BusId::new("BUS_220_1"),
            BusUpdate {
                load_mw: Some(Megawatts(160.0)),
                ..Default::default()
            },
        );
        orchestrator.apply_update(&update).unwrap();
        assert!(!orchestrator.network().is_y_bus_cached());
        assert!(orchestrator.snapshot().element_flows.is_empty());

        let result = orchestrator.run(AnalysisRequest::LoadFlow).unwrap();
        assert!(result.converged);
        let bus = result
            .bus_voltages
            .iter()
            .find(|b| b.id.as_str() == "BUS_220_1")
            .unwrap();
        assert!((bus.load_mw - 160.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_update_leaves_network_untouched() {
        let mut orchestrator = SimulationOrchestrator::standard().unwrap();
        let before = orchestrator.network().to_spec();
        let mut update = NetworkUpdate::default();
        update.buses.insert(
            BusId::new("BUS_220_1"),
            BusUpdate {
                load_mw: Some(Megawatts(10.0)),
                ..Default::default()
            },
        );
        update
            .lines
            .insert(LineId::new("NO_SUCH_LINE"), Default::default());
        assert!(orchestrator.apply_update(&update).is_err());
        assert_eq!(orchestrator.network().to_spec(), before);
    }

    #[test]
    fn test_snapshot_contents() {
        let mut orchestrator = SimulationOrchestrator::standard().unwrap();
        orchestrator.run(AnalysisRequest::LoadFlow).unwrap();
        orchestrator.run(AnalysisRequest::LoadFlow).unwrap();
        let snapshot = orchestrator.snapshot();
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.latest.len(), 1);
        assert_eq!(
            snapshot.latest[&AnalysisKind::LoadFlow].id,
            snapshot.history[1].id
        );
        assert_eq!(snapshot.stats.num_buses, 6);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json["latest"]["load_flow"].is_object());
        assert_eq!(json["network"]["buses"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_shared_orchestrator_across_threads() {
        let shared = SharedOrchestrator::new(SimulationOrchestrator::standard().unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || shared.run(AnalysisRequest::LoadFlow).unwrap())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().converged);
        }
        assert_eq!(shared.history_len(), 4);
    }
}
