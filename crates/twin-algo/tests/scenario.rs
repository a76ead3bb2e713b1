//! Three-bus substation scenario: one 400 kV infeed, one 400/220 kV
//! transformer and a 40 km 220 kV line feeding two loads.

use twin_algo::{FaultAnalyzer, FaultType, LoadFlowSolver};
use twin_core::{
    Bus, BusId, BusType, Kilovolts, Line, LineId, LineUpdate, Megavars, MegavoltAmperes,
    Megawatts, Network, NetworkUpdate, PerUnit, Transformer, TransformerId,
};

fn scenario_network() -> Network {
    let mut network = Network::new();
    network
        .add_bus(
            Bus::new("BUS_400", "400 kV infeed", Kilovolts(400.0), BusType::Slack)
                .with_setpoint(PerUnit(1.05)),
        )
        .unwrap();
    for id in ["BUS_220_A", "BUS_220_B"] {
        network
            .add_bus(
                Bus::new(id, id, Kilovolts(220.0), BusType::PQ)
                    .with_load(Megawatts(100.0), Megavars(30.0))
                    .with_shunt(Megavars(20.0)),
            )
            .unwrap();
    }
    network
        .add_line(
            Line::new("LINE_AB", "BUS_220_A", "BUS_220_B", 40.0)
                .with_impedance_per_km(0.05, 0.4, 2.8e-6),
        )
        .unwrap();
    network
        .add_transformer(
            Transformer::new("TR_1", "BUS_400", "BUS_220_A", MegavoltAmperes(315.0))
                .with_impedance_percent(0.5, 12.0),
        )
        .unwrap();
    network
}

#[test]
fn scenario_load_flow_converges_within_limits() {
    let network = scenario_network();
    let solution = LoadFlowSolver::new().solve(&network).unwrap();

    assert!(solution.converged, "failure: {:?}", solution.failure);
    assert!(solution.max_mismatch < 1e-6);
    assert_eq!(solution.mismatch_history.len(), solution.iterations);

    for id in ["BUS_220_A", "BUS_220_B"] {
        let bus = solution.bus(&BusId::new(id)).unwrap();
        assert!(
            bus.voltage_pu > 0.9 && bus.voltage_pu < 1.1,
            "{id} voltage {} outside 0.9-1.1 p.u.",
            bus.voltage_pu
        );
        assert!(bus.angle_deg < 0.0, "{id} should lag the infeed");
    }

    // The remote bus sits further down the feeder
    let a = solution.bus(&BusId::new("BUS_220_A")).unwrap();
    let b = solution.bus(&BusId::new("BUS_220_B")).unwrap();
    assert!(b.voltage_pu < a.voltage_pu);
}

#[test]
fn scenario_flows_follow_the_feeder() {
    let network = scenario_network();
    let solution = LoadFlowSolver::new().solve(&network).unwrap();
    assert!(solution.converged);

    let line = solution.line(&LineId::new("LINE_AB")).unwrap();
    assert!(line.p_from_mw > 99.0 && line.p_from_mw < 102.0, "line P {}", line.p_from_mw);
    assert!(line.loss_mw > 0.0);
    assert!(line.current_ka > 0.0);

    let tx = solution.transformer(&TransformerId::new("TR_1")).unwrap();
    assert!(tx.p_from_mw > 200.0, "transformer P {}", tx.p_from_mw);
    assert!(tx.loading_percent > 60.0 && tx.loading_percent < 75.0);

    let slack = solution.bus(&BusId::new("BUS_400")).unwrap();
    assert!((slack.generation_mw - 200.0 - solution.losses_mw).abs() < 1e-3);
}

#[test]
fn scenario_three_phase_fault_at_220_kv() {
    let network = scenario_network();
    let outcome = FaultAnalyzer::new()
        .analyze(&network, &BusId::new("BUS_220_A"), FaultType::ThreePhase)
        .unwrap();

    let report = outcome.report().expect("fault Z-bus should be invertible");
    assert!(report.fault_current_ka > 0.0);
    assert!(report.peak_current_ka > report.fault_current_ka);
    assert!(report.breaking_current_ka >= report.fault_current_ka);

    let breaker = report.fault_bus_breaker().unwrap();
    assert!((breaker.voltage_kv - 220.0).abs() < 1e-9);
    assert!((breaker.rating_ka - 40.0).abs() < 1e-9);
    assert_eq!(report.retained_voltages.len(), 3);

    let faulted = report
        .retained_voltages
        .iter()
        .find(|v| v.bus_id.as_str() == "BUS_220_A")
        .unwrap();
    assert!(faulted.voltage_pu < 1e-9);
}

#[test]
fn scenario_fault_types_are_ordered() {
    let network = scenario_network();
    let analyzer = FaultAnalyzer::new();
    let bus = BusId::new("BUS_220_B");
    let current = |fault_type| {
        analyzer
            .analyze(&network, &bus, fault_type)
            .unwrap()
            .report()
            .unwrap()
            .fault_current_ka
    };

    let three_phase = current(FaultType::ThreePhase);
    let line_to_line = current(FaultType::LineToLine);
    let line_to_ground = current(FaultType::LineToGround);

    // |Z1 + Z2| = 2|Z1| and |Z1 + Z2 + Z0| = 5|Z1| for a bolted fault
    assert!((line_to_line / three_phase - 3f64.sqrt() / 2.0).abs() < 1e-9);
    assert!((line_to_ground / three_phase - 0.6).abs() < 1e-9);
}

#[test]
fn scenario_line_impedance_override_deepens_voltage_drop() {
    let mut network = scenario_network();
    let solver = LoadFlowSolver::new();
    let before = solver.solve(&network).unwrap();
    assert!(before.converged);

    let mut update = NetworkUpdate::default();
    update.lines.insert(
        LineId::new("LINE_AB"),
        LineUpdate {
            r_ohm_per_km: Some(0.1),
            x_ohm_per_km: Some(0.8),
            ..Default::default()
        },
    );
    network.apply_update(&update).unwrap();
    let after = solver.solve(&network).unwrap();
    assert!(after.converged);

    let v_before = before.bus(&BusId::new("BUS_220_B")).unwrap().voltage_pu;
    let v_after = after.bus(&BusId::new("BUS_220_B")).unwrap().voltage_pu;
    assert!(v_after < v_before - 1e-3, "{v_before} -> {v_after}");

    let loss_before = before.line(&LineId::new("LINE_AB")).unwrap().loss_mw;
    let loss_after = after.line(&LineId::new("LINE_AB")).unwrap().loss_mw;
    assert!(loss_after > 1.5 * loss_before, "{loss_before} -> {loss_after}");
}
