//! Single-machine infinite-bus transient stability.
//!
//! The machine is described by the swing equation
//!
//! ```text
//! (2H / ω₀) · dω/dt = Pm − Pe − D·(ω − ω₀)
//!             dδ/dt = ω − ω₀
//! ```
//!
//! integrated with explicit Euler. The electrical output is zero while the
//! fault is on and `r · Pmax · sin δ` after clearing, where
//! `Pmax = Pm / sin δ₀` is the pre-fault transfer capability and `r` the
//! post-fault fraction of it. The swing is declared unstable as soon as
//! |δ| exceeds 180°.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, info, warn};
use twin_core::{BusId, Network, TwinError, TwinResult};
use web_time::{Duration, Instant};

/// Wall-clock deadline is checked this often
const DEADLINE_CHECK_STEPS: usize = 1_000;

/// Longest run a config may ask for, in integration steps
pub const MAX_INTEGRATION_STEPS: f64 = 10_000_000.0;

/// Upper bound on the preallocated trajectory buffer
const MAX_PREALLOCATED_SAMPLES: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    pub time_step_s: f64,
    pub horizon_s: f64,
    /// Inertia constant H (s)
    pub inertia_h: f64,
    pub damping: f64,
    pub mechanical_power_pu: f64,
    pub initial_angle_deg: f64,
    /// Post-fault transfer capability as a fraction of the pre-fault one
    pub post_fault_ratio: f64,
    /// Keep every n-th integration step in the trajectory
    pub sample_every: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wall_time_s: Option<f64>,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            time_step_s: 0.001,
            horizon_s: 10.0,
            inertia_h: 5.0,
            damping: 0.01,
            mechanical_power_pu: 1.0,
            initial_angle_deg: 30.0,
            post_fault_ratio: 0.95,
            sample_every: 10,
            max_wall_time_s: None,
        }
    }
}

impl StabilityConfig {
    pub fn validate(&self) -> TwinResult<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(TwinError::Config(format!("{name} must be positive, got {value}")))
            }
        };
        positive("time_step_s", self.time_step_s)?;
        positive("horizon_s", self.horizon_s)?;
        positive("inertia_h", self.inertia_h)?;
        positive("mechanical_power_pu", self.mechanical_power_pu)?;
        positive("post_fault_ratio", self.post_fault_ratio)?;
        if !(self.initial_angle_deg > 0.0 && self.initial_angle_deg < 90.0) {
            return Err(TwinError::Config(format!(
                "initial_angle_deg must lie in (0, 90), got {}",
                self.initial_angle_deg
            )));
        }
        if self.sample_every == 0 {
            return Err(TwinError::Config("sample_every must be at least 1".into()));
        }
        let steps = self.horizon_s / self.time_step_s;
        if !(steps <= MAX_INTEGRATION_STEPS) {
            return Err(TwinError::Config(format!(
                "horizon_s / time_step_s gives {steps:e} steps, limit {MAX_INTEGRATION_STEPS:e}"
            )));
        }
        self.wall_time_budget()?;
        Ok(())
    }

    /// The wall-clock budget as a `Duration`, if one is set
    pub fn wall_time_budget(&self) -> TwinResult<Option<Duration>> {
        self.max_wall_time_s
            .map(|limit| {
                Duration::try_from_secs_f64(limit).map_err(|err| {
                    TwinError::Config(format!("max_wall_time_s {limit} is not usable: {err}"))
                })
            })
            .transpose()
    }

    /// Pre-fault transfer capability Pm / sin δ₀
    pub fn pre_fault_pmax(&self) -> f64 {
        self.mechanical_power_pu / self.initial_angle_deg.to_radians().sin()
    }

    pub fn post_fault_pmax(&self) -> f64 {
        self.post_fault_ratio * self.pre_fault_pmax()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StabilityStatus {
    Stable,
    Unstable,
    /// The wall-clock deadline expired before the horizon was reached
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingSample {
    pub time_s: f64,
    pub angle_deg: f64,
    pub frequency_hz: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    pub fault_bus: BusId,
    pub fault_duration_s: f64,
    pub status: StabilityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instability_time_s: Option<f64>,
    pub max_angle_deg: f64,
    pub final_angle_deg: f64,
    /// Equal-area critical clearing time; `None` when no clearing time
    /// keeps the machine in step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical_clearing_time_s: Option<f64>,
    pub steps: usize,
    pub samples: Vec<SwingSample>,
}

impl StabilityReport {
    pub fn is_stable(&self) -> bool {
        self.status == StabilityStatus::Stable
    }
}

#[derive(Debug, Clone, Default)]
pub struct StabilityAnalyzer {
    config: StabilityConfig,
}

impl StabilityAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StabilityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    /// Equal-area critical clearing angle and time for a bolted fault
    /// (`Pe = 0` while the fault is on).
    pub fn critical_clearing_time(&self, frequency_hz: f64) -> Option<f64> {
        let cfg = &self.config;
        let pm = cfg.mechanical_power_pu;
        let p_post = cfg.post_fault_pmax();
        if p_post <= pm {
            return None;
        }
        let delta_0 = cfg.initial_angle_deg.to_radians();
        let delta_max = PI - (pm / p_post).asin();
        let cos_critical = pm * (delta_max - delta_0) / p_post + delta_max.cos();
        if !(-1.0..=1.0).contains(&cos_critical) {
            return None;
        }
        let delta_critical = cos_critical.acos();
        if delta_critical <= delta_0 {
            return None;
        }
        let omega_0 = 2.0 * PI * frequency_hz;
        Some((4.0 * cfg.inertia_h * (delta_critical - delta_0) / (omega_0 * pm)).sqrt())
    }

    pub fn simulate(
        &self,
        network: &Network,
        fault_bus: &BusId,
        fault_duration_s: f64,
    ) -> TwinResult<StabilityReport> {
        if network.bus(fault_bus).is_none() {
            return Err(TwinError::Usage(format!(
                "fault bus '{fault_bus}' does not exist"
            )));
        }
        if !(fault_duration_s.is_finite() && fault_duration_s >= 0.0) {
            return Err(TwinError::Usage(format!(
                "fault duration must be a non-negative number of seconds, got {fault_duration_s}"
            )));
        }
        self.config.validate()?;

        let cfg = &self.config;
        let frequency = network.frequency_hz();
        let omega_0 = 2.0 * PI * frequency;
        let p_post = cfg.post_fault_pmax();
        let pm = cfg.mechanical_power_pu;
        let dt = cfg.time_step_s;
        let total_steps = (cfg.horizon_s / dt).round() as usize;
        // A budget too far out to represent is the same as no budget
        let deadline = cfg
            .wall_time_budget()?
            .and_then(|budget| Instant::now().checked_add(budget));

        let mut delta = cfg.initial_angle_deg.to_radians();
        let mut omega = omega_0;
        let mut max_angle = delta;
        let mut status = StabilityStatus::Stable;
        let mut instability_time = None;
        let capacity = (total_steps / cfg.sample_every + 2).min(MAX_PREALLOCATED_SAMPLES);
        let mut samples = Vec::with_capacity(capacity);
        let sample = |t: f64, delta: f64, omega: f64| SwingSample {
            time_s: t,
            angle_deg: delta.to_degrees(),
            frequency_hz: omega / (2.0 * PI),
        };
        samples.push(sample(0.0, delta, omega));

        let mut steps = 0;
        for step in 0..total_steps {
            if let Some(deadline) = deadline {
                if step % DEADLINE_CHECK_STEPS == 0 && Instant::now() >= deadline {
                    warn!(step, "stability simulation exceeded its wall-clock budget");
                    status = StabilityStatus::Aborted;
                    break;
                }
            }

            let t = step as f64 * dt;
            let pe = if t < fault_duration_s {
                0.0
            } else {
                p_post * delta.sin()
            };
            let accel = pm - pe - cfg.damping * (omega - omega_0);
            let d_omega = omega_0 / (2.0 * cfg.inertia_h) * accel;
            let d_delta = omega - omega_0;
            omega += d_omega * dt;
            delta += d_delta * dt;
            steps = step + 1;

            max_angle = max_angle.max(delta.abs());
            let t_next = steps as f64 * dt;
            if steps % cfg.sample_every == 0 {
                samples.push(sample(t_next, delta, omega));
            }
            if delta.abs() > PI {
                status = StabilityStatus::Unstable;
                instability_time = Some(t_next);
                if steps % cfg.sample_every != 0 {
                    samples.push(sample(t_next, delta, omega));
                }
                break;
            }
        }
        debug!(steps, samples = samples.len(), "swing integration finished");

        let critical_clearing_time_s = self.critical_clearing_time(frequency);
        match status {
            StabilityStatus::Unstable => warn!(
                bus = %fault_bus,
                fault_duration_s,
                ?instability_time,
                "machine lost synchronism"
            ),
            _ => info!(
                bus = %fault_bus,
                fault_duration_s,
                ?status,
                max_angle_deg = max_angle.to_degrees(),
                "stability simulation complete"
            ),
        }

        Ok(StabilityReport {
            fault_bus: fault_bus.clone(),
            fault_duration_s,
            status,
            instability_time_s: instability_time,
            max_angle_deg: max_angle.to_degrees(),
            final_angle_deg: delta.to_degrees(),
            critical_clearing_time_s,
            steps,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> Network {
        Network::standard_substation().unwrap()
    }

    #[test]
    fn test_short_fault_is_stable() {
        let report = StabilityAnalyzer::new()
            .simulate(&network(), &BusId::new("BUS_220_1"), 0.1)
            .unwrap();
        assert_eq!(report.status, StabilityStatus::Stable);
        assert_eq!(report.steps, 10_000);
        assert!(report.max_angle_deg < 180.0);
        assert!(report.instability_time_s.is_none());
        assert_eq!(report.samples.len(), 1_001);
    }

    #[test]
    fn test_long_fault_is_unstable() {
        let report = StabilityAnalyzer::new()
            .simulate(&network(), &BusId::new("BUS_220_1"), 0.5)
            .unwrap();
        assert_eq!(report.status, StabilityStatus::Unstable);
        let t = report.instability_time_s.unwrap();
        assert!(t <= 0.5, "angle should pass 180° while the fault is still on, got {t}");
        assert!(report.samples.last().unwrap().angle_deg > 180.0);
    }

    #[test]
    fn test_critical_clearing_time_separates_outcomes() {
        let analyzer = StabilityAnalyzer::new();
        let cct = analyzer.critical_clearing_time(50.0).unwrap();
        assert!(cct > 0.1 && cct < 0.5, "cct {cct}");

        let bus = BusId::new("BUS_400_1");
        let before = analyzer.simulate(&network(), &bus, cct - 0.03).unwrap();
        let after = analyzer.simulate(&network(), &bus, cct + 0.03).unwrap();
        assert!(before.is_stable());
        assert_eq!(after.status, StabilityStatus::Unstable);
    }

    #[test]
    fn test_no_post_fault_equilibrium() {
        let analyzer = StabilityAnalyzer::with_config(StabilityConfig {
            initial_angle_deg: 80.0,
            post_fault_ratio: 0.5,
            ..Default::default()
        });
        assert!(analyzer.critical_clearing_time(50.0).is_none());
    }

    #[test]
    fn test_unknown_bus_and_bad_duration() {
        let analyzer = StabilityAnalyzer::new();
        let network = network();
        assert!(analyzer
            .simulate(&network, &BusId::new("NOPE"), 0.1)
            .unwrap_err()
            .is_usage());
        assert!(analyzer
            .simulate(&network, &BusId::new("BUS_400_1"), -1.0)
            .unwrap_err()
            .is_usage());
    }

    #[test]
    fn test_expired_deadline_aborts() {
        let report = StabilityAnalyzer::with_config(StabilityConfig {
            max_wall_time_s: Some(0.0),
            ..Default::default()
        })
        .simulate(&network(), &BusId::new("BUS_400_1"), 0.1)
        .unwrap();
        assert_eq!(report.status, StabilityStatus::Aborted);
        assert_eq!(report.steps, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let analyzer = StabilityAnalyzer::with_config(StabilityConfig {
            time_step_s: 0.0,
            ..Default::default()
        });
        let err = analyzer
            .simulate(&network(), &BusId::new("BUS_400_1"), 0.1)
            .unwrap_err();
        assert!(matches!(err, TwinError::Config(_)));
    }

    #[test]
    fn test_oversized_horizon_rejected() {
        let config = StabilityConfig {
            horizon_s: 1e15,
            time_step_s: 1e-6,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TwinError::Config(_))));
        let err = StabilityAnalyzer::with_config(config)
            .simulate(&network(), &BusId::new("BUS_400_1"), 0.1)
            .unwrap_err();
        assert!(matches!(err, TwinError::Config(_)));
    }

    #[test]
    fn test_large_step_count_accepted() {
        let config = StabilityConfig {
            horizon_s: 5.0,
            time_step_s: 1e-6,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unrepresentable_wall_time_rejected() {
        let config = StabilityConfig {
            max_wall_time_s: Some(1e30),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TwinError::Config(_))));
        let err = StabilityAnalyzer::with_config(config)
            .simulate(&network(), &BusId::new("BUS_400_1"), 0.1)
            .unwrap_err();
        assert!(matches!(err, TwinError::Config(_)));
    }

    #[test]
    fn test_generous_wall_time_runs_to_horizon() {
        let report = StabilityAnalyzer::with_config(StabilityConfig {
            max_wall_time_s: Some(3600.0),
            ..Default::default()
        })
        .simulate(&network(), &BusId::new("BUS_400_1"), 0.1)
        .unwrap();
        assert_eq!(report.status, StabilityStatus::Stable);
        assert_eq!(report.steps, 10_000);
    }
}
