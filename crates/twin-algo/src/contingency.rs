//! Exhaustive N-1 contingency screening.
//!
//! Every in-service line and transformer is taken out in turn on an
//! independent copy of the network (see [`Network::with_outage`]), the copy is
//! solved with a full AC load flow, and the post-contingency state is checked
//! against bus voltage limits and element ratings. The base network is only
//! ever borrowed immutably, so cases can run in parallel.
//!
//! Severity follows the number of violations:
//!
//! | Violations | Severity |
//! |------------|----------|
//! | 0 | `SAFE` |
//! | 1-2 | `MARGINAL` |
//! | 3-5 | `CRITICAL` |
//! | > 5, or no load flow solution | `SEVERE` |

use crate::load_flow::{LoadFlowSolution, LoadFlowSolver};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use twin_core::{BusId, ElementId, LineId, Network, TransformerId, TwinResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContingencyConfig {
    /// Element loading above this is a violation
    pub loading_limit_percent: f64,
    /// Solve cases on the rayon thread pool
    pub parallel: bool,
}

impl Default for ContingencyConfig {
    fn default() -> Self {
        Self {
            loading_limit_percent: 100.0,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Safe,
    Marginal,
    Critical,
    Severe,
}

impl Severity {
    pub fn from_violation_count(count: usize) -> Self {
        match count {
            0 => Severity::Safe,
            1..=2 => Severity::Marginal,
            3..=5 => Severity::Critical,
            _ => Severity::Severe,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::Safe => "SAFE",
            Severity::Marginal => "MARGINAL",
            Severity::Critical => "CRITICAL",
            Severity::Severe => "SEVERE",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    Undervoltage {
        bus_id: BusId,
        voltage_pu: f64,
        limit_pu: f64,
    },
    Overvoltage {
        bus_id: BusId,
        voltage_pu: f64,
        limit_pu: f64,
    },
    LineOverload {
        line_id: LineId,
        loading_percent: f64,
        limit_percent: f64,
    },
    TransformerOverload {
        transformer_id: TransformerId,
        loading_percent: f64,
        limit_percent: f64,
    },
}

/// Outcome of one outage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContingencyCase {
    pub element: ElementId,
    /// `Line_<id>` or `Transformer_<id>`
    pub label: String,
    pub converged: bool,
    pub iterations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub violations: Vec<Violation>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_voltage_pu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_loading_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContingencySummary {
    pub total: usize,
    pub safe: usize,
    pub marginal: usize,
    pub critical: usize,
    pub severe: usize,
    pub non_converged: usize,
}

impl ContingencySummary {
    fn from_cases(cases: &[ContingencyCase]) -> Self {
        let count = |severity| cases.iter().filter(|c| c.severity == severity).count();
        Self {
            total: cases.len(),
            safe: count(Severity::Safe),
            marginal: count(Severity::Marginal),
            critical: count(Severity::Critical),
            severe: count(Severity::Severe),
            non_converged: cases.iter().filter(|c| !c.converged).count(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContingencyReport {
    pub cases: Vec<ContingencyCase>,
    pub summary: ContingencySummary,
}

impl ContingencyReport {
    pub fn case(&self, element: &ElementId) -> Option<&ContingencyCase> {
        self.cases.iter().find(|c| &c.element == element)
    }

    /// Cases ordered from most to least severe, ties by violation count.
    pub fn ranked(&self) -> Vec<&ContingencyCase> {
        let mut ranked: Vec<&ContingencyCase> = self.cases.iter().collect();
        ranked.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.violations.len().cmp(&a.violations.len()))
        });
        ranked
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContingencyAnalyzer {
    solver: LoadFlowSolver,
    config: ContingencyConfig,
}

impl ContingencyAnalyzer {
    pub fn new(solver: LoadFlowSolver, config: ContingencyConfig) -> Self {
        Self { solver, config }
    }

    pub fn config(&self) -> &ContingencyConfig {
        &self.config
    }

    /// Screen every in-service element of `network`.
    pub fn run_n1(&self, network: &Network) -> TwinResult<ContingencyReport> {
        network.validate()?;
        let elements = network.in_service_elements();
        info!(cases = elements.len(), parallel = self.config.parallel, "running N-1 screening");

        let cases = if self.config.parallel {
            self.evaluate_all_parallel(network, &elements)?
        } else {
            elements
                .iter()
                .map(|element| self.evaluate(network, element))
                .collect::<TwinResult<Vec<_>>>()?
        };

        let summary = ContingencySummary::from_cases(&cases);
        info!(
            total = summary.total,
            safe = summary.safe,
            marginal = summary.marginal,
            critical = summary.critical,
            severe = summary.severe,
            "N-1 screening complete"
        );
        Ok(ContingencyReport { cases, summary })
    }

    #[cfg(feature = "rayon")]
    fn evaluate_all_parallel(
        &self,
        network: &Network,
        elements: &[ElementId],
    ) -> TwinResult<Vec<ContingencyCase>> {
        elements
            .par_iter()
            .map(|element| self.evaluate(network, element))
            .collect()
    }

    #[cfg(not(feature = "rayon"))]
    fn evaluate_all_parallel(
        &self,
        network: &Network,
        elements: &[ElementId],
    ) -> TwinResult<Vec<ContingencyCase>> {
        elements
            .iter()
            .map(|element| self.evaluate(network, element))
            .collect()
    }

    /// Solve a single outage on a copy of `network`.
    pub fn evaluate(&self, network: &Network, element: &ElementId) -> TwinResult<ContingencyCase> {
        let overlay = network.with_outage(element)?;
        let solution = self.solver.solve(&overlay)?;
        let label = element.to_string();

        if !solution.converged {
            warn!(
                case = %label,
                reason = ?solution.failure,
                "contingency has no load flow solution"
            );
            return Ok(ContingencyCase {
                element: element.clone(),
                label,
                converged: false,
                iterations: solution.iterations,
                failure: solution.failure,
                violations: Vec::new(),
                severity: Severity::Severe,
                min_voltage_pu: None,
                max_loading_percent: None,
            });
        }

        let violations = self.check_limits(&overlay, &solution);
        let severity = Severity::from_violation_count(violations.len());
        debug!(case = %label, violations = violations.len(), %severity, "contingency evaluated");

        let min_voltage_pu = solution
            .buses
            .iter()
            .map(|b| b.voltage_pu)
            .reduce(f64::min);
        let max_loading_percent = solution
            .lines
            .iter()
            .map(|l| l.loading_percent)
            .chain(solution.transformers.iter().map(|t| t.loading_percent))
            .reduce(f64::max);

        Ok(ContingencyCase {
            element: element.clone(),
            label,
            converged: true,
            iterations: solution.iterations,
            failure: None,
            violations,
            severity,
            min_voltage_pu,
            max_loading_percent,
        })
    }

    fn check_limits(&self, network: &Network, solution: &LoadFlowSolution) -> Vec<Violation> {
        let limit = self.config.loading_limit_percent;
        let mut violations = Vec::new();

        for result in &solution.buses {
            let Some(bus) = network.bus(&result.id) else {
                continue;
            };
            if result.voltage_pu < bus.v_min.value() {
                violations.push(Violation::Undervoltage {
                    bus_id: result.id.clone(),
                    voltage_pu: result.voltage_pu,
                    limit_pu: bus.v_min.value(),
                });
            } else if result.voltage_pu > bus.v_max.value() {
                violations.push(Violation::Overvoltage {
                    bus_id: result.id.clone(),
                    voltage_pu: result.voltage_pu,
                    limit_pu: bus.v_max.value(),
                });
            }
        }

        for flow in &solution.lines {
            if flow.loading_percent > limit {
                violations.push(Violation::LineOverload {
                    line_id: flow.id.clone(),
                    loading_percent: flow.loading_percent,
                    limit_percent: limit,
                });
            }
        }

        for flow in &solution.transformers {
            if flow.loading_percent > limit {
                violations.push(Violation::TransformerOverload {
                    transformer_id: flow.id.clone(),
                    loading_percent: flow.loading_percent,
                    limit_percent: limit,
                });
            }
        }

        violations
    }
}
