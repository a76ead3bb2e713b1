//! Short-circuit analysis with symmetrical components.
//!
//! The fault Y-bus is the network Y-bus plus a source admittance to ground at
//! every bus holding a voltage source (slack, PV, or any bus with a declared
//! short-circuit level). Inverting it gives the Z-bus whose diagonal is the
//! Thevenin impedance seen from each bus.
//!
//! Sequence networks are approximated from the positive sequence:
//! `Z2 = Z1`, `Z0 = 3·Z1`.
//!
//! | Fault | Current (p.u.) |
//! |-------|----------------|
//! | three phase | `V / (Z1 + Zf)` |
//! | line to ground | `3V / (Z1 + Z2 + Z0 + 3Zf)` |
//! | line to line | `√3·V / (Z1 + Z2 + Zf)` |
//!
//! Peak current is `√2·I·(1 + e^(−π·R/X))`. Breaking current is taken three
//! cycles after inception as the RMS of the symmetrical current plus the
//! decayed DC offset, `I·√(1 + 2·e^(−2t/τ))` with `τ = (X/R)/ω`.

use crate::dense::invert_complex;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, SQRT_2};
use std::str::FromStr;
use tracing::{info, warn};
use twin_core::{BusId, Network, TwinError, TwinResult};

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// X/R reported for a purely reactive Thevenin impedance
const MAX_X_R: f64 = 100.0;

/// Interrupting duty is evaluated this many cycles after fault inception.
const BREAKING_CYCLES: f64 = 3.0;

/// Standard breaker interrupting ratings (kV, kA)
pub const BREAKER_RATINGS: [(f64, f64); 3] = [(400.0, 50.0), (220.0, 40.0), (33.0, 25.0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    ThreePhase,
    LineToGround,
    LineToLine,
}

impl FaultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultType::ThreePhase => "three_phase",
            FaultType::LineToGround => "line_to_ground",
            FaultType::LineToLine => "line_to_line",
        }
    }
}

impl std::fmt::Display for FaultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultType {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "three_phase" | "3ph" | "3phase" => Ok(FaultType::ThreePhase),
            "line_to_ground" | "lg" | "slg" => Ok(FaultType::LineToGround),
            "line_to_line" | "ll" => Ok(FaultType::LineToLine),
            other => Err(TwinError::Usage(format!("unknown fault type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultConfig {
    pub fault_resistance_pu: f64,
    pub fault_reactance_pu: f64,
    pub prefault_voltage_pu: f64,
    /// Short-circuit level used for source buses that do not declare one
    pub source_short_circuit_mva: f64,
    pub source_x_r: f64,
    /// Breakers are adequate only above this margin
    pub breaker_margin_percent: f64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            fault_resistance_pu: 0.0,
            fault_reactance_pu: 0.0,
            prefault_voltage_pu: 1.0,
            source_short_circuit_mva: 10_000.0,
            source_x_r: 15.0,
            breaker_margin_percent: 20.0,
        }
    }
}

impl FaultConfig {
    pub fn fault_impedance(&self) -> Complex64 {
        Complex64::new(self.fault_resistance_pu, self.fault_reactance_pu)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerAssessment {
    pub voltage_kv: f64,
    pub rating_ka: f64,
    pub margin_percent: f64,
    pub adequate: bool,
    /// The breaker class installed at the faulted bus's voltage level
    pub applies_to_fault_bus: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetainedVoltage {
    pub bus_id: BusId,
    /// Positive-sequence magnitude during the fault
    pub voltage_pu: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultReport {
    pub bus_id: BusId,
    pub fault_type: FaultType,
    pub base_kv: f64,
    pub thevenin_impedance_pu: Complex64,
    pub fault_current_pu: f64,
    /// Symmetrical RMS fault current
    pub fault_current_ka: f64,
    pub x_r_ratio: f64,
    pub peak_current_ka: f64,
    pub breaking_current_ka: f64,
    pub breakers: Vec<BreakerAssessment>,
    pub retained_voltages: Vec<RetainedVoltage>,
}

impl FaultReport {
    /// Breaker entry for the faulted bus's voltage level, if one is tabulated.
    pub fn fault_bus_breaker(&self) -> Option<&BreakerAssessment> {
        self.breakers.iter().find(|b| b.applies_to_fault_bus)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FaultOutcome {
    Solved(FaultReport),
    /// The fault Y-bus could not be inverted
    Singular {
        bus_id: BusId,
        fault_type: FaultType,
        reason: String,
    },
}

impl FaultOutcome {
    pub fn report(&self) -> Option<&FaultReport> {
        match self {
            FaultOutcome::Solved(report) => Some(report),
            FaultOutcome::Singular { .. } => None,
        }
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, FaultOutcome::Solved(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FaultAnalyzer {
    config: FaultConfig,
}

impl FaultAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FaultConfig) -> Self {
        Self { config }
    }

    pub fn with_fault_impedance(mut self, z: Complex64) -> Self {
        self.config.fault_resistance_pu = z.re;
        self.config.fault_reactance_pu = z.im;
        self
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// Source impedance to ground for a bus, on the system base.
    fn source_impedance(&self, short_circuit_mva: f64, base_mva: f64) -> Complex64 {
        let magnitude = base_mva / short_circuit_mva;
        let x_r = self.config.source_x_r.max(1e-3);
        let r = magnitude / (1.0 + x_r * x_r).sqrt();
        Complex64::new(r, r * x_r)
    }

    /// Fault Y-bus restricted to buses with a path to some source, and the
    /// network positions of those buses.
    fn fault_y_bus(&self, network: &Network) -> (Vec<Complex64>, Vec<usize>) {
        let base_mva = network.base_mva();
        let sources: Vec<BusId> = network
            .buses()
            .filter(|b| b.is_source())
            .map(|b| b.id.clone())
            .collect();
        let dead = twin_core::unreachable_buses(network, &sources);
        let energized: Vec<usize> = network
            .buses()
            .enumerate()
            .filter(|(_, b)| !dead.contains(&b.id))
            .map(|(i, _)| i)
            .collect();

        let mut y_bus = network.y_bus().clone();
        for (i, bus) in network.buses().enumerate() {
            if bus.is_source() {
                let level = bus
                    .short_circuit_mva
                    .map(|s| s.value())
                    .unwrap_or(self.config.source_short_circuit_mva);
                y_bus.add_shunt(i, self.source_impedance(level, base_mva).inv());
            }
        }

        let m = energized.len();
        let mut reduced = Vec::with_capacity(m * m);
        for &i in &energized {
            for &j in &energized {
                reduced.push(y_bus.get(i, j));
            }
        }
        (reduced, energized)
    }

    pub fn analyze(
        &self,
        network: &Network,
        bus_id: &BusId,
        fault_type: FaultType,
    ) -> TwinResult<FaultOutcome> {
        let fault_bus = network
            .bus(bus_id)
            .ok_or_else(|| TwinError::Usage(format!("fault bus '{bus_id}' does not exist")))?;
        let position = network
            .bus_position(bus_id)
            .ok_or_else(|| TwinError::Usage(format!("fault bus '{bus_id}' does not exist")))?;

        let singular = |reason: String| -> TwinResult<FaultOutcome> {
            warn!(bus = %bus_id, %fault_type, "fault analysis failed: {reason}");
            Ok(FaultOutcome::Singular {
                bus_id: bus_id.clone(),
                fault_type,
                reason,
            })
        };

        let (y_fault, energized) = self.fault_y_bus(network);
        let Some(k) = energized.iter().position(|&i| i == position) else {
            return singular(format!(
                "singular Y-bus: bus '{bus_id}' has no path to a source"
            ));
        };
        let m = energized.len();
        let z_bus = match invert_complex(&y_fault, m) {
            Ok(z) => z,
            Err(err) => return singular(format!("singular Y-bus: {err}")),
        };

        let z1 = z_bus[k * m + k];
        let z_f = self.config.fault_impedance();
        let v = Complex64::new(self.config.prefault_voltage_pu, 0.0);

        // fault current and its positive-sequence component
        let (i_fault, i_positive) = match fault_type {
            FaultType::ThreePhase => {
                let i = v / (z1 + z_f);
                (i, i)
            }
            FaultType::LineToGround => {
                let z0 = z1 * 3.0;
                let i0 = v / (z1 + z1 + z0 + z_f * 3.0);
                (i0 * 3.0, i0)
            }
            FaultType::LineToLine => {
                let i1 = v / (z1 + z1 + z_f);
                (i1 * SQRT_3, i1)
            }
        };

        let base_mva = network.base_mva();
        let base_kv = fault_bus.base_kv;
        let fault_current_pu = i_fault.norm();
        let fault_current_ka = fault_current_pu * base_kv.base_current(base_mva).value();

        let x_r_ratio = if z1.re.abs() < 1e-12 {
            MAX_X_R
        } else {
            (z1.im / z1.re).abs().min(MAX_X_R)
        };
        let peak_current_ka = fault_current_ka * SQRT_2 * (1.0 + (-PI / x_r_ratio).exp());
        let frequency = network.frequency_hz();
        let tau = x_r_ratio / (2.0 * PI * frequency);
        let t_break = BREAKING_CYCLES / frequency;
        let breaking_current_ka =
            fault_current_ka * (1.0 + 2.0 * (-2.0 * t_break / tau).exp()).sqrt();

        let breakers = BREAKER_RATINGS
            .iter()
            .map(|&(voltage_kv, rating_ka)| {
                let margin_percent = (rating_ka - fault_current_ka) / rating_ka * 100.0;
                BreakerAssessment {
                    voltage_kv,
                    rating_ka,
                    margin_percent,
                    adequate: margin_percent > self.config.breaker_margin_percent,
                    applies_to_fault_bus: (voltage_kv - base_kv.value()).abs() < 1e-6,
                }
            })
            .collect();

        let buses: Vec<&twin_core::Bus> = network.buses().collect();
        let mut retained_voltages: Vec<RetainedVoltage> = buses
            .iter()
            .map(|b| RetainedVoltage {
                bus_id: b.id.clone(),
                voltage_pu: 0.0,
            })
            .collect();
        for (row, &i) in energized.iter().enumerate() {
            let v_k = v - z_bus[row * m + k] * i_positive;
            retained_voltages[i].voltage_pu = v_k.norm();
        }

        info!(
            bus = %bus_id,
            %fault_type,
            current_ka = fault_current_ka,
            x_r = x_r_ratio,
            "fault analysis complete"
        );

        Ok(FaultOutcome::Solved(FaultReport {
            bus_id: bus_id.clone(),
            fault_type,
            base_kv: base_kv.value(),
            thevenin_impedance_pu: z1,
            fault_current_pu,
            fault_current_ka,
            x_r_ratio,
            peak_current_ka,
            breaking_current_ka,
            breakers,
            retained_voltages,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twin_core::*;

    fn single_source() -> Network {
        let mut network = Network::new();
        network
            .add_bus(Bus::new("S", "Source", Kilovolts(220.0), BusType::Slack))
            .unwrap();
        network
            .add_bus(Bus::new("F", "Load", Kilovolts(220.0), BusType::PQ))
            .unwrap();
        network
            .add_line(Line::new("L", "S", "F", 40.0).with_impedance_per_km(0.05, 0.4, 0.0))
            .unwrap();
        network
    }

    fn solved(outcome: FaultOutcome) -> FaultReport {
        match outcome {
            FaultOutcome::Solved(report) => report,
            FaultOutcome::Singular { reason, .. } => panic!("unexpected singular: {reason}"),
        }
    }

    #[test]
    fn test_three_phase_matches_series_impedance() {
        let network = single_source();
        let report = solved(
            FaultAnalyzer::new()
                .analyze(&network, &BusId::new("F"), FaultType::ThreePhase)
                .unwrap(),
        );
        // Thevenin impedance is source plus line in series
        let analyzer = FaultAnalyzer::new();
        let z_source = analyzer.source_impedance(10_000.0, 100.0);
        let z_line = Complex64::new(2.0, 16.0) / 484.0;
        assert!((report.thevenin_impedance_pu - (z_source + z_line)).norm() < 1e-9);
        let expected_pu = 1.0 / (z_source + z_line).norm();
        assert!((report.fault_current_pu - expected_pu).abs() < 1e-6);
        let expected_ka = expected_pu * 100.0 / (SQRT_3 * 220.0);
        assert!((report.fault_current_ka - expected_ka).abs() < 1e-6);
    }

    #[test]
    fn test_fault_type_ratios() {
        let network = single_source();
        let analyzer = FaultAnalyzer::new();
        let bus = BusId::new("F");
        let three = solved(analyzer.analyze(&network, &bus, FaultType::ThreePhase).unwrap());
        let lg = solved(analyzer.analyze(&network, &bus, FaultType::LineToGround).unwrap());
        let ll = solved(analyzer.analyze(&network, &bus, FaultType::LineToLine).unwrap());
        // solid faults: LG = 3/5 of 3φ, LL = √3/2 of 3φ
        assert!((lg.fault_current_pu / three.fault_current_pu - 0.6).abs() < 1e-9);
        assert!((ll.fault_current_pu / three.fault_current_pu - SQRT_3 / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_peak_and_breaking_exceed_symmetrical() {
        let report = solved(
            FaultAnalyzer::new()
                .analyze(&single_source(), &BusId::new("F"), FaultType::ThreePhase)
                .unwrap(),
        );
        assert!(report.x_r_ratio > 1.0);
        assert!(report.peak_current_ka > SQRT_2 * report.fault_current_ka);
        assert!(report.peak_current_ka < 2.0 * SQRT_2 * report.fault_current_ka);
        assert!(report.breaking_current_ka >= report.fault_current_ka);
    }

    #[test]
    fn test_breaker_table() {
        let report = solved(
            FaultAnalyzer::new()
                .analyze(&single_source(), &BusId::new("F"), FaultType::ThreePhase)
                .unwrap(),
        );
        assert_eq!(report.breakers.len(), 3);
        let breaker = report.fault_bus_breaker().unwrap();
        assert_eq!(breaker.voltage_kv, 220.0);
        assert_eq!(breaker.rating_ka, 40.0);
        let expected_margin = (40.0 - report.fault_current_ka) / 40.0 * 100.0;
        assert!((breaker.margin_percent - expected_margin).abs() < 1e-9);
        assert_eq!(breaker.adequate, expected_margin > 20.0);
    }

    #[test]
    fn test_retained_voltage_collapses_at_solid_fault() {
        let report = solved(
            FaultAnalyzer::new()
                .analyze(&single_source(), &BusId::new("F"), FaultType::ThreePhase)
                .unwrap(),
        );
        let at_fault = &report.retained_voltages[1];
        assert_eq!(at_fault.bus_id, BusId::new("F"));
        assert!(at_fault.voltage_pu < 1e-9);
        assert!(report.retained_voltages[0].voltage_pu > 0.0);
    }

    #[test]
    fn test_fault_impedance_reduces_current() {
        let network = single_source();
        let bus = BusId::new("F");
        let mut last = f64::INFINITY;
        for x in [0.0, 0.01, 0.05, 0.2] {
            let report = solved(
                FaultAnalyzer::new()
                    .with_fault_impedance(Complex64::new(0.0, x))
                    .analyze(&network, &bus, FaultType::ThreePhase)
                    .unwrap(),
            );
            assert!(report.fault_current_ka < last);
            last = report.fault_current_ka;
        }
    }

    #[test]
    fn test_unknown_bus_is_usage_error() {
        let err = FaultAnalyzer::new()
            .analyze(&single_source(), &BusId::new("NOPE"), FaultType::ThreePhase)
            .unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_isolated_bus_is_singular() {
        let network = single_source()
            .with_outage(&ElementId::Line(LineId::new("L")))
            .unwrap();
        let outcome = FaultAnalyzer::new()
            .analyze(&network, &BusId::new("F"), FaultType::ThreePhase)
            .unwrap();
        match outcome {
            FaultOutcome::Singular { reason, .. } => assert!(reason.contains("singular")),
            FaultOutcome::Solved(_) => panic!("isolated bus cannot carry fault current"),
        }
    }

    #[test]
    fn test_fault_type_parsing() {
        assert_eq!("three_phase".parse::<FaultType>().unwrap(), FaultType::ThreePhase);
        assert_eq!("line-to-ground".parse::<FaultType>().unwrap(), FaultType::LineToGround);
        assert!("double".parse::<FaultType>().unwrap_err().is_usage());
    }

    #[test]
    fn test_peak_and_breaking_values() {
        let report = solved(
            FaultAnalyzer::new()
                .analyze(&single_source(), &BusId::new("F"), FaultType::ThreePhase)
                .unwrap(),
        );
        let z1 = report.thevenin_impedance_pu;
        let x_r = z1.im / z1.re;
        assert!((report.x_r_ratio - x_r).abs() < 1e-9);

        let i = report.fault_current_ka;
        let peak = i * SQRT_2 * (1.0 + (-PI / x_r).exp());
        assert!((report.peak_current_ka - peak).abs() < 1e-9 * peak);

        let tau = x_r / (2.0 * PI * 50.0);
        let breaking = i * (1.0 + 2.0 * (-2.0 * 0.06 / tau).exp()).sqrt();
        assert!((report.breaking_current_ka - breaking).abs() < 1e-9 * breaking);
    }

    #[test]
    fn test_retained_voltages_for_unbalanced_faults() {
        let network = single_source();
        let analyzer = FaultAnalyzer::new();
        let bus = BusId::new("F");
        let z_source = analyzer.source_impedance(10_000.0, 100.0);

        // Positive-sequence current is V/(n·Z1): n = 5 for LG, 2 for LL
        for (fault_type, n) in [(FaultType::LineToGround, 5.0), (FaultType::LineToLine, 2.0)] {
            let report = solved(analyzer.analyze(&network, &bus, fault_type).unwrap());
            let z1 = report.thevenin_impedance_pu;
            let at_fault = report.retained_voltages[1].voltage_pu;
            assert!((at_fault - (1.0 - 1.0 / n)).abs() < 1e-9, "{fault_type}: {at_fault}");

            let expected_source = (Complex64::new(1.0, 0.0) - z_source / (z1 * n)).norm();
            let at_source = report.retained_voltages[0].voltage_pu;
            assert!((at_source - expected_source).abs() < 1e-9, "{fault_type}: {at_source}");
            assert!(at_source > at_fault);
        }
    }
}
