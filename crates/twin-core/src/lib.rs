//! # twin-core: substation network model
//!
//! Data structures for a balanced, per-unit model of a transmission substation
//! and the nodal admittance matrix built from it.
//!
//! ## Design
//!
//! The network is an **undirected multigraph**:
//! - **Nodes**: [`Bus`]es, carrying their own load, generation and shunt
//!   injections plus the solved voltage state
//! - **Edges**: [`Element`]s, either a [`Line`] or a [`Transformer`]; parallel
//!   elements between the same pair of buses are allowed
//!
//! Elements are never removed from the graph. Taking one out of service flips
//! its `in_service` flag, which keeps node/edge indices stable for the whole
//! lifetime of the network and makes restoring the element trivial.
//!
//! ## Quick start
//!
//! ```rust
//! use twin_core::*;
//!
//! let mut network = Network::new();
//! network
//!     .add_bus(Bus::new("HV", "400kV", Kilovolts(400.0), BusType::Slack))
//!     .unwrap();
//! network
//!     .add_bus(
//!         Bus::new("MV", "220kV", Kilovolts(220.0), BusType::PQ)
//!             .with_load(Megawatts(100.0), Megavars(30.0)),
//!     )
//!     .unwrap();
//! network
//!     .add_transformer(Transformer::new("T1", "HV", "MV", MegavoltAmperes(315.0)))
//!     .unwrap();
//! network.validate().unwrap();
//!
//! let y_bus = network.y_bus();
//! assert_eq!(y_bus.dim(), 2);
//! ```
//!
//! ## Modules
//!
//! - [`units`] - typed quantities and per-unit bases
//! - [`ybus`] - admittance matrix assembly
//! - [`topology`] - serde topology description and the standard substation
//! - [`update`] - named parameter overrides applied between solves
//! - [`graph_utils`] - island detection over in-service elements

use num_complex::Complex64;
use once_cell::sync::OnceCell;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::{Graph, Undirected};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod error;
pub mod graph_utils;
pub mod topology;
pub mod units;
pub mod update;
pub mod ybus;

pub use error::{TwinError, TwinResult};
pub use graph_utils::{islands, unreachable_buses};
pub use topology::{load_topology, standard_substation_spec, TopologySpec};
pub use units::{Degrees, Kiloamperes, Kilovolts, Megavars, MegavoltAmperes, Megawatts, PerUnit};
pub use update::{BusUpdate, LineUpdate, NetworkUpdate, TransformerUpdate};
pub use ybus::YBus;

/// Default system power base (MVA)
pub const DEFAULT_BASE_MVA: f64 = 100.0;
/// Default system frequency (Hz)
pub const DEFAULT_FREQUENCY_HZ: f64 = 50.0;

// Newtype wrappers for element identifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(String);
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineId(String);
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformerId(String);

impl BusId {
    #[inline]
    pub fn new(value: impl Into<String>) -> Self {
        BusId(value.into())
    }
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl LineId {
    #[inline]
    pub fn new(value: impl Into<String>) -> Self {
        LineId(value.into())
    }
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TransformerId {
    #[inline]
    pub fn new(value: impl Into<String>) -> Self {
        TransformerId(value.into())
    }
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for LineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for TransformerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BusId {
    fn from(value: &str) -> Self {
        BusId::new(value)
    }
}

impl From<&str> for LineId {
    fn from(value: &str) -> Self {
        LineId::new(value)
    }
}

impl From<&str> for TransformerId {
    fn from(value: &str) -> Self {
        TransformerId::new(value)
    }
}

/// Load flow classification of a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BusType {
    /// Reference bus: |V| and θ fixed, P and Q balance the system
    Slack,
    /// Voltage-controlled bus: P and |V| fixed
    PV,
    /// Load bus: P and Q fixed
    #[default]
    PQ,
}

fn one_pu() -> PerUnit {
    PerUnit::ONE
}

fn default_v_min() -> PerUnit {
    PerUnit(0.95)
}

fn default_v_max() -> PerUnit {
    PerUnit(1.05)
}

fn in_service_default() -> bool {
    true
}

/// A busbar with its scheduled injections and solved voltage state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bus {
    pub id: BusId,
    #[serde(default)]
    pub name: String,
    /// Nominal voltage (kV), the voltage base of this bus
    pub base_kv: Kilovolts,
    #[serde(default)]
    pub bus_type: BusType,
    /// Solved voltage magnitude, overwritten by every converged load flow
    #[serde(default = "one_pu")]
    pub voltage_pu: PerUnit,
    /// Solved voltage angle, overwritten by every converged load flow
    #[serde(default)]
    pub angle_deg: Degrees,
    /// Scheduled magnitude held at Slack and PV buses
    #[serde(default = "one_pu")]
    pub voltage_setpoint_pu: PerUnit,
    #[serde(default)]
    pub load_mw: Megawatts,
    #[serde(default)]
    pub load_mvar: Megavars,
    #[serde(default)]
    pub generation_mw: Megawatts,
    #[serde(default)]
    pub generation_mvar: Megavars,
    /// Shunt compensation at nominal voltage (positive = capacitive)
    #[serde(default)]
    pub shunt_mvar: Megavars,
    #[serde(default = "default_v_min")]
    pub v_min: PerUnit,
    #[serde(default = "default_v_max")]
    pub v_max: PerUnit,
    /// Three-phase short-circuit level of the source behind this bus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_circuit_mva: Option<MegavoltAmperes>,
}

impl Bus {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        base_kv: Kilovolts,
        bus_type: BusType,
    ) -> Self {
        Self {
            id: BusId::new(id),
            name: name.into(),
            base_kv,
            bus_type,
            voltage_pu: PerUnit::ONE,
            angle_deg: Degrees(0.0),
            voltage_setpoint_pu: PerUnit::ONE,
            load_mw: Megawatts(0.0),
            load_mvar: Megavars(0.0),
            generation_mw: Megawatts(0.0),
            generation_mvar: Megavars(0.0),
            shunt_mvar: Megavars(0.0),
            v_min: default_v_min(),
            v_max: default_v_max(),
            short_circuit_mva: None,
        }
    }

    pub fn with_load(mut self, p: Megawatts, q: Megavars) -> Self {
        self.load_mw = p;
        self.load_mvar = q;
        self
    }

    pub fn with_generation(mut self, p: Megawatts, q: Megavars) -> Self {
        self.generation_mw = p;
        self.generation_mvar = q;
        self
    }

    pub fn with_setpoint(mut self, v: PerUnit) -> Self {
        self.voltage_setpoint_pu = v;
        self
    }

    pub fn with_shunt(mut self, q: Megavars) -> Self {
        self.shunt_mvar = q;
        self
    }

    /// Buses that hold a voltage source (grid infeed or generator).
    pub fn is_source(&self) -> bool {
        matches!(self.bus_type, BusType::Slack | BusType::PV) || self.short_circuit_mva.is_some()
    }

    /// Net scheduled injection (generation minus load) in MW / Mvar.
    pub fn net_injection(&self) -> (Megawatts, Megavars) {
        (
            self.generation_mw - self.load_mw,
            self.generation_mvar - self.load_mvar,
        )
    }
}

fn default_r_ohm_per_km() -> f64 {
    0.05
}

fn default_x_ohm_per_km() -> f64 {
    0.4
}

fn default_b_siemens_per_km() -> f64 {
    2.8e-6
}

fn default_line_rating() -> MegavoltAmperes {
    MegavoltAmperes(1000.0)
}

/// Overhead line or cable, modelled as a nominal π section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub id: LineId,
    #[serde(default)]
    pub name: String,
    pub from_bus: BusId,
    pub to_bus: BusId,
    pub length_km: f64,
    #[serde(default = "default_r_ohm_per_km")]
    pub r_ohm_per_km: f64,
    #[serde(default = "default_x_ohm_per_km")]
    pub x_ohm_per_km: f64,
    #[serde(default = "default_b_siemens_per_km")]
    pub b_siemens_per_km: f64,
    #[serde(default = "default_line_rating")]
    pub rating_mva: MegavoltAmperes,
    #[serde(default = "in_service_default")]
    pub in_service: bool,
}

impl Line {
    pub fn new(
        id: impl Into<String>,
        from_bus: impl Into<String>,
        to_bus: impl Into<String>,
        length_km: f64,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: LineId::new(id),
            from_bus: BusId::new(from_bus),
            to_bus: BusId::new(to_bus),
            length_km,
            r_ohm_per_km: default_r_ohm_per_km(),
            x_ohm_per_km: default_x_ohm_per_km(),
            b_siemens_per_km: default_b_siemens_per_km(),
            rating_mva: default_line_rating(),
            in_service: true,
        }
    }

    pub fn with_impedance_per_km(mut self, r_ohm: f64, x_ohm: f64, b_siemens: f64) -> Self {
        self.r_ohm_per_km = r_ohm;
        self.x_ohm_per_km = x_ohm;
        self.b_siemens_per_km = b_siemens;
        self
    }

    pub fn with_rating(mut self, rating: MegavoltAmperes) -> Self {
        self.rating_mva = rating;
        self
    }

    /// Series impedance r·len + j·x·len (Ω)
    pub fn series_impedance_ohm(&self) -> Complex64 {
        Complex64::new(
            self.r_ohm_per_km * self.length_km,
            self.x_ohm_per_km * self.length_km,
        )
    }

    /// Total shunt admittance j·b·len (S)
    pub fn shunt_admittance_siemens(&self) -> Complex64 {
        Complex64::new(0.0, self.b_siemens_per_km * self.length_km)
    }

    /// Series impedance on the system base for the given voltage level.
    pub fn series_impedance_pu(&self, base_kv: Kilovolts, base_mva: f64) -> Complex64 {
        self.series_impedance_ohm() / base_kv.base_impedance_ohm(base_mva)
    }

    /// Total shunt admittance on the system base for the given voltage level.
    pub fn shunt_admittance_pu(&self, base_kv: Kilovolts, base_mva: f64) -> Complex64 {
        self.shunt_admittance_siemens() * base_kv.base_impedance_ohm(base_mva)
    }
}

fn default_x_percent() -> f64 {
    12.0
}

fn default_r_percent() -> f64 {
    0.5
}

fn default_tap_min() -> i32 {
    -16
}

fn default_tap_max() -> i32 {
    16
}

fn default_tap_step() -> f64 {
    1.25
}

fn default_temperature() -> f64 {
    65.0
}

/// Two-winding transformer with an off-nominal tap on the `from_bus` side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transformer {
    pub id: TransformerId,
    #[serde(default)]
    pub name: String,
    /// Tapped winding
    pub from_bus: BusId,
    pub to_bus: BusId,
    pub rating_mva: MegavoltAmperes,
    #[serde(default = "default_x_percent")]
    pub x_percent: f64,
    #[serde(default = "default_r_percent")]
    pub r_percent: f64,
    #[serde(default)]
    pub tap_position: i32,
    #[serde(default = "default_tap_min")]
    pub tap_min: i32,
    #[serde(default = "default_tap_max")]
    pub tap_max: i32,
    #[serde(default = "default_tap_step")]
    pub tap_step_percent: f64,
    /// Top-oil temperature; informational only
    #[serde(default = "default_temperature")]
    pub temperature_c: f64,
    #[serde(default = "in_service_default")]
    pub in_service: bool,
}

impl Transformer {
    pub fn new(
        id: impl Into<String>,
        from_bus: impl Into<String>,
        to_bus: impl Into<String>,
        rating_mva: MegavoltAmperes,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: TransformerId::new(id),
            from_bus: BusId::new(from_bus),
            to_bus: BusId::new(to_bus),
            rating_mva,
            x_percent: default_x_percent(),
            r_percent: default_r_percent(),
            tap_position: 0,
            tap_min: default_tap_min(),
            tap_max: default_tap_max(),
            tap_step_percent: default_tap_step(),
            temperature_c: default_temperature(),
            in_service: true,
        }
    }

    pub fn with_impedance_percent(mut self, r_percent: f64, x_percent: f64) -> Self {
        self.r_percent = r_percent;
        self.x_percent = x_percent;
        self
    }

    pub fn with_tap(mut self, position: i32) -> Self {
        self.tap_position = position;
        self
    }

    /// Off-nominal ratio t = 1 + position·step/100
    pub fn tap_ratio(&self) -> f64 {
        1.0 + f64::from(self.tap_position) * self.tap_step_percent / 100.0
    }

    /// (r%, x%) / 100
    pub fn impedance_pu(&self) -> Complex64 {
        Complex64::new(self.r_percent / 100.0, self.x_percent / 100.0)
    }
}

/// Edge weight of the network graph
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Line(Line),
    Transformer(Transformer),
}

impl Element {
    pub fn id(&self) -> ElementId {
        match self {
            Element::Line(line) => ElementId::Line(line.id.clone()),
            Element::Transformer(tx) => ElementId::Transformer(tx.id.clone()),
        }
    }

    pub fn in_service(&self) -> bool {
        match self {
            Element::Line(line) => line.in_service,
            Element::Transformer(tx) => tx.in_service,
        }
    }

    fn set_in_service(&mut self, in_service: bool) {
        match self {
            Element::Line(line) => line.in_service = in_service,
            Element::Transformer(tx) => tx.in_service = in_service,
        }
    }
}

/// Identifies a switchable branch element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ElementId {
    Line(LineId),
    Transformer(TransformerId),
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementId::Line(id) => write!(f, "Line_{id}"),
            ElementId::Transformer(id) => write!(f, "Transformer_{id}"),
        }
    }
}

/// The substation network.
///
/// Bus order in the Y-bus is insertion order. The Y-bus is cached and every
/// mutating method drops the cache, so the next [`Network::y_bus`] call
/// rebuilds it from scratch.
#[derive(Debug, Clone)]
pub struct Network {
    graph: Graph<Bus, Element, Undirected>,
    bus_index: HashMap<BusId, NodeIndex>,
    line_index: HashMap<LineId, EdgeIndex>,
    transformer_index: HashMap<TransformerId, EdgeIndex>,
    base_mva: f64,
    frequency_hz: f64,
    y_bus: OnceCell<YBus>,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Self {
            graph: Graph::new_undirected(),
            bus_index: HashMap::new(),
            line_index: HashMap::new(),
            transformer_index: HashMap::new(),
            base_mva: DEFAULT_BASE_MVA,
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            y_bus: OnceCell::new(),
        }
    }

    /// Empty network on a custom power base and frequency.
    pub fn with_base(base_mva: f64, frequency_hz: f64) -> TwinResult<Self> {
        if !(base_mva.is_finite() && base_mva > 0.0) {
            return Err(TwinError::Structural(format!(
                "base MVA must be positive, got {base_mva}"
            )));
        }
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return Err(TwinError::Structural(format!(
                "system frequency must be positive, got {frequency_hz}"
            )));
        }
        Ok(Self {
            base_mva,
            frequency_hz,
            ..Self::new()
        })
    }

    pub fn base_mva(&self) -> f64 {
        self.base_mva
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    /// Read-only view of the underlying graph.
    pub fn graph(&self) -> &Graph<Bus, Element, Undirected> {
        &self.graph
    }

    pub fn add_bus(&mut self, bus: Bus) -> TwinResult<NodeIndex> {
        if self.bus_index.contains_key(&bus.id) {
            return Err(TwinError::Structural(format!("duplicate bus id '{}'", bus.id)));
        }
        check_bus(&bus)?;
        let id = bus.id.clone();
        let idx = self.graph.add_node(bus);
        self.bus_index.insert(id, idx);
        self.invalidate_y_bus();
        Ok(idx)
    }

    pub fn add_line(&mut self, line: Line) -> TwinResult<EdgeIndex> {
        if self.line_index.contains_key(&line.id) {
            return Err(TwinError::Structural(format!("duplicate line id '{}'", line.id)));
        }
        let (from, to) = self.endpoint_indices(line.id.as_str(), &line.from_bus, &line.to_bus)?;
        let from_kv = self.graph[from].base_kv;
        let to_kv = self.graph[to].base_kv;
        if (from_kv.value() - to_kv.value()).abs() > 1e-6 {
            return Err(TwinError::Structural(format!(
                "line '{}' joins different voltage levels ({} / {})",
                line.id, from_kv, to_kv
            )));
        }
        check_line(&line)?;
        let id = line.id.clone();
        let idx = self.graph.add_edge(from, to, Element::Line(line));
        self.line_index.insert(id, idx);
        self.invalidate_y_bus();
        Ok(idx)
    }

    pub fn add_transformer(&mut self, tx: Transformer) -> TwinResult<EdgeIndex> {
        if self.transformer_index.contains_key(&tx.id) {
            return Err(TwinError::Structural(format!(
                "duplicate transformer id '{}'",
                tx.id
            )));
        }
        let (from, to) = self.endpoint_indices(tx.id.as_str(), &tx.from_bus, &tx.to_bus)?;
        check_transformer(&tx)?;
        let id = tx.id.clone();
        let idx = self.graph.add_edge(from, to, Element::Transformer(tx));
        self.transformer_index.insert(id, idx);
        self.invalidate_y_bus();
        Ok(idx)
    }

    fn endpoint_indices(
        &self,
        element: &str,
        from_bus: &BusId,
        to_bus: &BusId,
    ) -> TwinResult<(NodeIndex, NodeIndex)> {
        let from = self.node_index(from_bus).ok_or_else(|| {
            TwinError::Structural(format!("element '{element}' references unknown bus '{from_bus}'"))
        })?;
        let to = self.node_index(to_bus).ok_or_else(|| {
            TwinError::Structural(format!("element '{element}' references unknown bus '{to_bus}'"))
        })?;
        if from == to {
            return Err(TwinError::Structural(format!(
                "element '{element}' connects bus '{from_bus}' to itself"
            )));
        }
        Ok((from, to))
    }

    /// Whole-network checks that cannot be made one element at a time.
    pub fn validate(&self) -> TwinResult<()> {
        if self.graph.node_count() == 0 {
            return Err(TwinError::Structural("network has no buses".into()));
        }
        let slack: Vec<&BusId> = self
            .buses()
            .filter(|b| b.bus_type == BusType::Slack)
            .map(|b| &b.id)
            .collect();
        match slack.len() {
            1 => Ok(()),
            0 => Err(TwinError::Structural("network has no slack bus".into())),
            n => Err(TwinError::Structural(format!(
                "network has {n} slack buses ({}); exactly one is required",
                slack
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    pub fn slack_bus(&self) -> TwinResult<&Bus> {
        self.validate()?;
        self.buses()
            .find(|b| b.bus_type == BusType::Slack)
            .ok_or_else(|| TwinError::Structural("network has no slack bus".into()))
    }

    pub fn node_index(&self, id: &BusId) -> Option<NodeIndex> {
        self.bus_index.get(id).copied()
    }

    /// Position of the bus in Y-bus ordering.
    pub fn bus_position(&self, id: &BusId) -> Option<usize> {
        self.node_index(id).map(|idx| idx.index())
    }

    pub fn bus(&self, id: &BusId) -> Option<&Bus> {
        self.node_index(id).map(|idx| &self.graph[idx])
    }

    pub(crate) fn bus_mut(&mut self, id: &BusId) -> TwinResult<&mut Bus> {
        let idx = self
            .node_index(id)
            .ok_or_else(|| TwinError::Structural(format!("unknown bus '{id}'")))?;
        Ok(&mut self.graph[idx])
    }

    pub fn line(&self, id: &LineId) -> Option<&Line> {
        self.line_index
            .get(id)
            .and_then(|&idx| match &self.graph[idx] {
                Element::Line(line) => Some(line),
                Element::Transformer(_) => None,
            })
    }

    pub(crate) fn line_mut(&mut self, id: &LineId) -> TwinResult<&mut Line> {
        let idx = *self
            .line_index
            .get(id)
            .ok_or_else(|| TwinError::Structural(format!("unknown line '{id}'")))?;
        match &mut self.graph[idx] {
            Element::Line(line) => Ok(line),
            Element::Transformer(_) => Err(TwinError::Structural(format!(
                "edge for line '{id}' is not a line"
            ))),
        }
    }

    pub fn transformer(&self, id: &TransformerId) -> Option<&Transformer> {
        self.transformer_index
            .get(id)
            .and_then(|&idx| match &self.graph[idx] {
                Element::Transformer(tx) => Some(tx),
                Element::Line(_) => None,
            })
    }

    pub(crate) fn transformer_mut(&mut self, id: &TransformerId) -> TwinResult<&mut Transformer> {
        let idx = *self
            .transformer_index
            .get(id)
            .ok_or_else(|| TwinError::Structural(format!("unknown transformer '{id}'")))?;
        match &mut self.graph[idx] {
            Element::Transformer(tx) => Ok(tx),
            Element::Line(_) => Err(TwinError::Structural(format!(
                "edge for transformer '{id}' is not a transformer"
            ))),
        }
    }

    /// Buses in Y-bus order.
    pub fn buses(&self) -> impl Iterator<Item = &Bus> + '_ {
        self.graph.node_weights()
    }

    pub fn bus_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> + '_ {
        self.graph.edge_weights()
    }

    pub fn lines(&self) -> impl Iterator<Item = &Line> + '_ {
        self.graph.edge_weights().filter_map(|e| match e {
            Element::Line(line) => Some(line),
            Element::Transformer(_) => None,
        })
    }

    pub fn transformers(&self) -> impl Iterator<Item = &Transformer> + '_ {
        self.graph.edge_weights().filter_map(|e| match e {
            Element::Transformer(tx) => Some(tx),
            Element::Line(_) => None,
        })
    }

    /// Every in-service line and transformer, lines first.
    pub fn in_service_elements(&self) -> Vec<ElementId> {
        let lines = self
            .lines()
            .filter(|l| l.in_service)
            .map(|l| ElementId::Line(l.id.clone()));
        let transformers = self
            .transformers()
            .filter(|t| t.in_service)
            .map(|t| ElementId::Transformer(t.id.clone()));
        lines.chain(transformers).collect()
    }

    fn element_mut(&mut self, id: &ElementId) -> TwinResult<&mut Element> {
        let idx = match id {
            ElementId::Line(line_id) => self.line_index.get(line_id).copied(),
            ElementId::Transformer(tx_id) => self.transformer_index.get(tx_id).copied(),
        }
        .ok_or_else(|| TwinError::Structural(format!("unknown element {id}")))?;
        Ok(&mut self.graph[idx])
    }

    pub fn set_in_service(&mut self, id: &ElementId, in_service: bool) -> TwinResult<()> {
        self.element_mut(id)?.set_in_service(in_service);
        self.invalidate_y_bus();
        Ok(())
    }

    pub fn disable_branch(&mut self, id: &ElementId) -> TwinResult<()> {
        self.set_in_service(id, false)
    }

    pub fn enable_branch(&mut self, id: &ElementId) -> TwinResult<()> {
        self.set_in_service(id, true)
    }

    /// Independent copy of the network with one element out of service.
    ///
    /// The receiver is left untouched, so callers screening outages never
    /// observe a partially modified network.
    pub fn with_outage(&self, id: &ElementId) -> TwinResult<Network> {
        let mut overlay = self.clone();
        overlay.disable_branch(id)?;
        Ok(overlay)
    }

    pub fn set_tap(&mut self, id: &TransformerId, position: i32) -> TwinResult<()> {
        let tx = self.transformer_mut(id)?;
        check_tap(tx, position)?;
        tx.tap_position = position;
        self.invalidate_y_bus();
        Ok(())
    }

    pub fn update_load(&mut self, id: &BusId, p: Megawatts, q: Megavars) -> TwinResult<()> {
        let bus = self.bus_mut(id)?;
        bus.load_mw = p;
        bus.load_mvar = q;
        self.invalidate_y_bus();
        Ok(())
    }

    pub fn update_generation(&mut self, id: &BusId, p: Megawatts, q: Megavars) -> TwinResult<()> {
        let bus = self.bus_mut(id)?;
        bus.generation_mw = p;
        bus.generation_mvar = q;
        self.invalidate_y_bus();
        Ok(())
    }

    /// Store a solved voltage on a bus. Admittances are unaffected, so the
    /// cached Y-bus is kept.
    pub fn set_bus_voltage(&mut self, id: &BusId, v: PerUnit, angle: Degrees) -> TwinResult<()> {
        let bus = self.bus_mut(id)?;
        bus.voltage_pu = v;
        bus.angle_deg = angle;
        Ok(())
    }

    /// Cached admittance matrix, rebuilt on first access after a mutation.
    pub fn y_bus(&self) -> &YBus {
        self.y_bus.get_or_init(|| YBus::from_network(self))
    }

    /// Fresh admittance matrix, bypassing the cache.
    pub fn build_y_bus(&self) -> YBus {
        YBus::from_network(self)
    }

    pub fn is_y_bus_cached(&self) -> bool {
        self.y_bus.get().is_some()
    }

    pub(crate) fn invalidate_y_bus(&mut self) {
        self.y_bus = OnceCell::new();
    }

    pub fn total_load_mw(&self) -> f64 {
        self.buses().map(|b| b.load_mw.value()).sum()
    }

    pub fn total_scheduled_generation_mw(&self) -> f64 {
        self.buses().map(|b| b.generation_mw.value()).sum()
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            num_buses: self.bus_count(),
            num_lines: self.lines().count(),
            num_transformers: self.transformers().count(),
            num_out_of_service: self.elements().filter(|e| !e.in_service()).count(),
            num_islands: islands(self).len(),
            total_load_mw: self.total_load_mw(),
            total_load_mvar: self.buses().map(|b| b.load_mvar.value()).sum(),
            total_generation_mw: self.total_scheduled_generation_mw(),
        }
    }
}

/// Per-bus checks shared by construction and parameter updates.
pub(crate) fn check_bus(bus: &Bus) -> TwinResult<()> {
    if !(bus.base_kv.is_finite() && bus.base_kv.value() > 0.0) {
        return Err(TwinError::Structural(format!(
            "bus '{}' must have a positive voltage base",
            bus.id
        )));
    }
    if !(bus.voltage_setpoint_pu.is_finite() && bus.voltage_setpoint_pu.value() > 0.0) {
        return Err(TwinError::Structural(format!(
            "bus '{}' voltage set-point must be positive",
            bus.id
        )));
    }
    if !(bus.v_min.is_finite() && bus.v_max.is_finite()) || bus.v_min > bus.v_max {
        return Err(TwinError::Structural(format!(
            "bus '{}' has v_min {} above v_max {}",
            bus.id,
            bus.v_min.value(),
            bus.v_max.value()
        )));
    }
    if let Some(level) = bus.short_circuit_mva {
        if !(level.is_finite() && level.value() > 0.0) {
            return Err(TwinError::Structural(format!(
                "bus '{}' must have a positive short-circuit level",
                bus.id
            )));
        }
    }
    Ok(())
}

pub(crate) fn check_line(line: &Line) -> TwinResult<()> {
    if !(line.length_km.is_finite() && line.length_km > 0.0) {
        return Err(TwinError::Structural(format!(
            "line '{}' must have a positive length",
            line.id
        )));
    }
    let z = line.series_impedance_ohm();
    if !(z.re.is_finite() && z.im.is_finite()) || z.norm() < 1e-12 {
        return Err(TwinError::Structural(format!(
            "line '{}' has zero series impedance",
            line.id
        )));
    }
    if !line.b_siemens_per_km.is_finite() {
        return Err(TwinError::Structural(format!(
            "line '{}' has a non-finite charging susceptance",
            line.id
        )));
    }
    if !(line.rating_mva.is_finite() && line.rating_mva.value() > 0.0) {
        return Err(TwinError::Structural(format!(
            "line '{}' must have a positive rating",
            line.id
        )));
    }
    Ok(())
}

pub(crate) fn check_transformer(tx: &Transformer) -> TwinResult<()> {
    if tx.tap_min > tx.tap_max {
        return Err(TwinError::Structural(format!(
            "transformer '{}' has tap_min {} above tap_max {}",
            tx.id, tx.tap_min, tx.tap_max
        )));
    }
    check_tap(tx, tx.tap_position)?;
    if !tx.tap_step_percent.is_finite() || tx.tap_ratio() <= 0.0 {
        return Err(TwinError::Structural(format!(
            "transformer '{}' tap step {}% gives a non-positive ratio",
            tx.id, tx.tap_step_percent
        )));
    }
    let z = tx.impedance_pu();
    if !(z.re.is_finite() && z.im.is_finite()) || z.norm() < 1e-12 {
        return Err(TwinError::Structural(format!(
            "transformer '{}' has zero impedance",
            tx.id
        )));
    }
    if !(tx.rating_mva.is_finite() && tx.rating_mva.value() > 0.0) {
        return Err(TwinError::Structural(format!(
            "transformer '{}' must have a positive rating",
            tx.id
        )));
    }
    Ok(())
}

fn check_tap(tx: &Transformer, position: i32) -> TwinResult<()> {
    if position < tx.tap_min || position > tx.tap_max {
        return Err(TwinError::Structural(format!(
            "tap position {position} of transformer '{}' outside [{}, {}]",
            tx.id, tx.tap_min, tx.tap_max
        )));
    }
    Ok(())
}

/// Size and loading summary of a network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub num_buses: usize,
    pub num_lines: usize,
    pub num_transformers: usize,
    pub num_out_of_service: usize,
    pub num_islands: usize,
    pub total_load_mw: f64,
    pub total_load_mvar: f64,
    pub total_generation_mw: f64,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} buses, {} lines, {} transformers ({} out of service), {} island(s), load {:.0} MW / {:.0} Mvar",
            self.num_buses,
            self.num_lines,
            self.num_transformers,
            self.num_out_of_service,
            self.num_islands,
            self.total_load_mw,
            self.total_load_mvar
        )
    }
}
