//! End-to-end runs over the built-in 400/220/33 kV substation.

use twin_algo::{
    AnalysisPayload, AnalysisRequest, ContingencyAnalyzer, ContingencyConfig, EngineConfig,
    FaultType, LoadFlowSolver, Severity, SharedOrchestrator, SimulationOrchestrator,
    StabilityStatus,
};
use twin_core::{
    BusId, BusUpdate, ElementId, LineId, Megawatts, Network, NetworkUpdate, TransformerId,
    TransformerUpdate,
};

#[test]
fn base_case_converges_within_limits() {
    let network = Network::standard_substation().unwrap();
    let solution = LoadFlowSolver::new().solve(&network).unwrap();
    assert!(solution.converged, "failure: {:?}", solution.failure);
    assert!(solution.iterations <= 10);
    assert_eq!(solution.buses.len(), 6);
    assert_eq!(solution.lines.len(), 3);
    assert_eq!(solution.transformers.len(), 3);
    for bus in &solution.buses {
        assert!(
            bus.voltage_pu > 0.9 && bus.voltage_pu < 1.1,
            "{} at {} p.u.",
            bus.id,
            bus.voltage_pu
        );
    }
}

#[test]
fn n1_screening_flags_radial_outages() {
    let network = Network::standard_substation().unwrap();
    let report = ContingencyAnalyzer::default().run_n1(&network).unwrap();

    assert_eq!(report.summary.total, 6);
    let s = &report.summary;
    assert_eq!(s.safe + s.marginal + s.critical + s.severe, 6);

    // Both of these leave part of the substation without supply
    for element in [
        ElementId::Line(LineId::new("LINE_220_2")),
        ElementId::Transformer(TransformerId::new("TR3")),
    ] {
        let case = report.case(&element).unwrap();
        assert!(!case.converged);
        assert_eq!(case.severity, Severity::Severe);
        assert!(case.failure.as_deref().unwrap().contains("singular"));
    }
    assert!(report.summary.non_converged >= 2);

    let ranked = report.ranked();
    assert_eq!(ranked[0].severity, Severity::Severe);
    assert_eq!(
        report.case(&ElementId::Line(LineId::new("LINE_220_2"))).unwrap().label,
        "Line_LINE_220_2"
    );
}

#[test]
fn parallel_and_sequential_screening_agree() {
    let network = Network::standard_substation().unwrap();
    let parallel = ContingencyAnalyzer::new(
        LoadFlowSolver::new(),
        ContingencyConfig {
            parallel: true,
            ..Default::default()
        },
    )
    .run_n1(&network)
    .unwrap();
    let sequential = ContingencyAnalyzer::new(
        LoadFlowSolver::new(),
        ContingencyConfig {
            parallel: false,
            ..Default::default()
        },
    )
    .run_n1(&network)
    .unwrap();
    assert_eq!(parallel, sequential);
}

#[test]
fn orchestrated_session() {
    let mut engine = SimulationOrchestrator::standard().unwrap();

    let result = engine.run(AnalysisRequest::LoadFlow).unwrap();
    assert!(result.converged);

    let mut update = NetworkUpdate::default();
    update.buses.insert(
        BusId::new("BUS_220_3"),
        BusUpdate {
            load_mw: Some(Megawatts(90.0)),
            ..Default::default()
        },
    );
    update.transformers.insert(
        TransformerId::new("TR3"),
        TransformerUpdate {
            tap_position: Some(0),
            ..Default::default()
        },
    );
    engine.apply_update(&update).unwrap();
    assert_eq!(engine.network().transformer(&TransformerId::new("TR3")).unwrap().tap_position, 0);

    let result = engine
        .run(AnalysisRequest::Fault {
            bus_id: BusId::new("BUS_400_1"),
            fault_type: FaultType::LineToGround,
        })
        .unwrap();
    assert!(result.converged);
    assert!(matches!(
        &result.payload,
        Some(AnalysisPayload::Fault(outcome)) if outcome.is_solved()
    ));

    let result = engine
        .run(AnalysisRequest::Stability {
            fault_bus: BusId::new("BUS_400_1"),
            fault_duration_s: 0.1,
        })
        .unwrap();
    match &result.payload {
        Some(AnalysisPayload::Stability(report)) => {
            assert_eq!(report.status, StabilityStatus::Stable)
        }
        other => panic!("unexpected payload {other:?}"),
    }

    let result = engine
        .run(AnalysisRequest::Stability {
            fault_bus: BusId::new("BUS_400_1"),
            fault_duration_s: 0.5,
        })
        .unwrap();
    match &result.payload {
        Some(AnalysisPayload::Stability(report)) => {
            assert_eq!(report.status, StabilityStatus::Unstable)
        }
        other => panic!("unexpected payload {other:?}"),
    }

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.history.len(), 4);
    assert_eq!(snapshot.latest.len(), 3);
    let json = serde_json::to_string(&snapshot).unwrap();
    assert!(json.contains("\"analysis\":\"stability\""));
}

#[test]
fn shared_handle_serialises_update_and_run() {
    let network = Network::standard_substation().unwrap();
    let orchestrator = SimulationOrchestrator::new(network, EngineConfig::default()).unwrap();
    let engine = SharedOrchestrator::new(orchestrator);
    let mut update = NetworkUpdate::default();
    update.buses.insert(
        BusId::new("BUS_220_1"),
        BusUpdate {
            load_mw: Some(Megawatts(155.0)),
            ..Default::default()
        },
    );
    let result = engine.update_and_run(&update, AnalysisRequest::LoadFlow).unwrap();
    assert!(result.converged);
    let load = result
        .bus_voltages
        .iter()
        .find(|b| b.id.as_str() == "BUS_220_1")
        .unwrap()
        .load_mw;
    assert!((load - 155.0).abs() < 1e-9);
    assert_eq!(engine.history_len(), 1);
}
