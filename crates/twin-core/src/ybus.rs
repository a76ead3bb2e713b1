//! Nodal admittance matrix.
//!
//! The matrix is dense and row-major. It is always assembled from scratch out
//! of the in-service elements; nothing patches an existing matrix, so two
//! builds of the same network compare equal entry for entry.

use crate::{BusId, Element, Network};
use num_complex::Complex64;
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct YBus {
    bus_ids: Vec<BusId>,
    index: HashMap<BusId, usize>,
    entries: Vec<Complex64>,
}

impl YBus {
    /// Assemble the admittance matrix of `network`.
    ///
    /// - lines: π model, `-y` off-diagonal, `y + y_sh/2` on both diagonals
    /// - transformers: `y/t²` on the tapped diagonal, `y` on the other,
    ///   `-y/t` on both off-diagonals
    /// - bus shunts: `j·Q/S_base` on the diagonal
    pub fn from_network(network: &Network) -> Self {
        let bus_ids: Vec<BusId> = network.buses().map(|b| b.id.clone()).collect();
        let index: HashMap<BusId, usize> = bus_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let mut y_bus = Self {
            entries: vec![Complex64::new(0.0, 0.0); bus_ids.len() * bus_ids.len()],
            bus_ids,
            index,
        };
        let base_mva = network.base_mva();

        let graph = network.graph();
        for edge in graph.edge_references() {
            if !edge.weight().in_service() {
                continue;
            }
            // node indices are never removed, so they double as matrix positions
            let (i, j) = (edge.source().index(), edge.target().index());
            match edge.weight() {
                Element::Line(line) => {
                    let base_kv = graph[edge.source()].base_kv;
                    let y = line.series_impedance_pu(base_kv, base_mva).inv();
                    let half_shunt = line.shunt_admittance_pu(base_kv, base_mva) / 2.0;
                    y_bus.add(i, i, y + half_shunt);
                    y_bus.add(j, j, y + half_shunt);
                    y_bus.add(i, j, -y);
                    y_bus.add(j, i, -y);
                }
                Element::Transformer(tx) => {
                    let y = tx.impedance_pu().inv();
                    let t = tx.tap_ratio();
                    y_bus.add(i, i, y / (t * t));
                    y_bus.add(j, j, y);
                    y_bus.add(i, j, -y / t);
                    y_bus.add(j, i, -y / t);
                }
            }
        }

        for (i, bus) in network.buses().enumerate() {
            if bus.shunt_mvar.value() != 0.0 {
                y_bus.add(i, i, Complex64::new(0.0, bus.shunt_mvar.value() / base_mva));
            }
        }

        y_bus
    }

    pub fn dim(&self) -> usize {
        self.bus_ids.len()
    }

    pub fn bus_ids(&self) -> &[BusId] {
        &self.bus_ids
    }

    pub fn index_of(&self, id: &BusId) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Complex64 {
        self.entries[i * self.dim() + j]
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[Complex64] {
        let n = self.dim();
        &self.entries[i * n..(i + 1) * n]
    }

    #[inline]
    fn add(&mut self, i: usize, j: usize, value: Complex64) {
        let n = self.dim();
        self.entries[i * n + j] += value;
    }

    /// Add an admittance to ground at bus `i`.
    pub fn add_shunt(&mut self, i: usize, value: Complex64) {
        self.add(i, i, value);
    }

    /// Y == Yᵀ within `tol`. Holds whenever every tap ratio is 1.
    pub fn is_symmetric(&self, tol: f64) -> bool {
        let n = self.dim();
        (0..n).all(|i| (i + 1..n).all(|j| (self.get(i, j) - self.get(j, i)).norm() <= tol))
    }
}
