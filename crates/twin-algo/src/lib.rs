//! # twin-algo: analyses over a substation network
//!
//! Four analyses run against a [`twin_core::Network`]:
//!
//! | Analysis | Entry point | Result |
//! |----------|-------------|--------|
//! | Newton-Raphson load flow | [`LoadFlowSolver`] | [`LoadFlowSolution`] |
//! | Short circuit | [`FaultAnalyzer`] | [`FaultOutcome`] |
//! | N-1 contingency screening | [`ContingencyAnalyzer`] | [`ContingencyReport`] |
//! | SMIB transient stability | [`StabilityAnalyzer`] | [`StabilityReport`] |
//!
//! [`SimulationOrchestrator`] dispatches [`AnalysisRequest`]s to them, keeps
//! the run history and exports snapshots. Settings for all of them live in
//! [`EngineConfig`].
//!
//! Non-convergence and singular matrices are reported inside the results.
//! `Err` is reserved for structural problems with the network and requests
//! that do not apply to it.
//!
//! ## Example
//!
//! ```ignore
//! use twin_algo::{AnalysisRequest, SimulationOrchestrator};
//!
//! let mut engine = SimulationOrchestrator::standard()?;
//! let result = engine.run(AnalysisRequest::LoadFlow)?;
//! println!("converged in {} iterations", result.iterations);
//! ```

pub mod config;
pub mod contingency;
pub mod dense;
pub mod fault;
pub mod load_flow;
pub mod orchestrator;
pub mod stability;

pub use config::EngineConfig;
pub use contingency::{
    ContingencyAnalyzer, ContingencyCase, ContingencyConfig, ContingencyReport,
    ContingencySummary, Severity, Violation,
};
pub use fault::{
    BreakerAssessment, FaultAnalyzer, FaultConfig, FaultOutcome, FaultReport, FaultType,
    RetainedVoltage, BREAKER_RATINGS,
};
pub use load_flow::{
    BusResult, LineFlow, LoadFlowConfig, LoadFlowSolution, LoadFlowSolver, TransformerFlow,
};
pub use orchestrator::{
    AnalysisKind, AnalysisPayload, AnalysisRequest, BusState, ElementFlow, EngineSnapshot,
    SharedOrchestrator, SimulationOrchestrator, SimulationResult,
};
pub use stability::{
    StabilityAnalyzer, StabilityConfig, StabilityReport, StabilityStatus, SwingSample,
};
