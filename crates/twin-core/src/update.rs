//! Named parameter overrides applied to a network between analyses.
//!
//! An update lists buses, lines and transformers by id, each with the fields to
//! override. Fields left out keep their current value. Updates are applied to a
//! staging copy first and only committed when every entry succeeded, so a bad
//! id, an out-of-range tap or a zero impedance leaves the network exactly as
//! it was. Each touched element goes through the same checks as
//! `add_bus`/`add_line`/`add_transformer`.

use crate::{
    check_bus, check_line, check_transformer, BusId, LineId, Megavars, MegavoltAmperes,
    Megawatts, Network, PerUnit, TransformerId, TwinResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_mw: Option<Megawatts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_mvar: Option<Megavars>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_mw: Option<Megawatts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_mvar: Option<Megavars>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_setpoint_pu: Option<PerUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shunt_mvar: Option<Megavars>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_min: Option<PerUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_max: Option<PerUnit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_circuit_mva: Option<MegavoltAmperes>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_service: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_mva: Option<MegavoltAmperes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r_ohm_per_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_ohm_per_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b_siemens_per_km: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_position: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_min: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_max: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_step_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_service: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_mva: Option<MegavoltAmperes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
}

/// Bulk parameter update keyed by element id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkUpdate {
    #[serde(default)]
    pub buses: BTreeMap<BusId, BusUpdate>,
    #[serde(default)]
    pub lines: BTreeMap<LineId, LineUpdate>,
    #[serde(default)]
    pub transformers: BTreeMap<TransformerId, TransformerUpdate>,
}

impl NetworkUpdate {
    pub fn is_empty(&self) -> bool {
        self.buses.is_empty() && self.lines.is_empty() && self.transformers.is_empty()
    }

    /// Read an update file, picking the format from the extension.
    pub fn from_path(path: &Path) -> TwinResult<Self> {
        let data = std::fs::read_to_string(path)?;
        crate::topology::parse_by_extension(path, &data)
    }
}

impl Network {
    /// Apply `update` atomically. Unknown ids and values that would fail the
    /// construction checks are structural errors.
    pub fn apply_update(&mut self, update: &NetworkUpdate) -> TwinResult<()> {
        let mut staging = self.clone();

        for (id, changes) in &update.buses {
            let bus = staging.bus_mut(id)?;
            if let Some(p) = changes.load_mw {
                bus.load_mw = p;
            }
            if let Some(q) = changes.load_mvar {
                bus.load_mvar = q;
            }
            if let Some(p) = changes.generation_mw {
                bus.generation_mw = p;
            }
            if let Some(q) = changes.generation_mvar {
                bus.generation_mvar = q;
            }
            if let Some(v) = changes.voltage_setpoint_pu {
                bus.voltage_setpoint_pu = v;
            }
            if let Some(q) = changes.shunt_mvar {
                bus.shunt_mvar = q;
            }
            if let Some(v) = changes.v_min {
                bus.v_min = v;
            }
            if let Some(v) = changes.v_max {
                bus.v_max = v;
            }
            if let Some(level) = changes.short_circuit_mva {
                bus.short_circuit_mva = Some(level);
            }
            check_bus(bus)?;
        }

        for (id, changes) in &update.lines {
            let line = staging.line_mut(id)?;
            if let Some(rating) = changes.rating_mva {
                line.rating_mva = rating;
            }
            if let Some(length) = changes.length_km {
                line.length_km = length;
            }
            if let Some(r) = changes.r_ohm_per_km {
                line.r_ohm_per_km = r;
            }
            if let Some(x) = changes.x_ohm_per_km {
                line.x_ohm_per_km = x;
            }
            if let Some(b) = changes.b_siemens_per_km {
                line.b_siemens_per_km = b;
            }
            if let Some(in_service) = changes.in_service {
                line.in_service = in_service;
            }
            check_line(line)?;
        }

        for (id, changes) in &update.transformers {
            let tx = staging.transformer_mut(id)?;
            // Bounds first so a widened range and a new position can arrive together
            if let Some(min) = changes.tap_min {
                tx.tap_min = min;
            }
            if let Some(max) = changes.tap_max {
                tx.tap_max = max;
            }
            if let Some(step) = changes.tap_step_percent {
                tx.tap_step_percent = step;
            }
            if let Some(position) = changes.tap_position {
                tx.tap_position = position;
            }
            if let Some(r) = changes.r_percent {
                tx.r_percent = r;
            }
            if let Some(x) = changes.x_percent {
                tx.x_percent = x;
            }
            if let Some(rating) = changes.rating_mva {
                tx.rating_mva = rating;
            }
            if let Some(temperature) = changes.temperature_c {
                tx.temperature_c = temperature;
            }
            if let Some(in_service) = changes.in_service {
                tx.in_service = in_service;
            }
            check_transformer(tx)?;
        }

        staging.validate()?;
        staging.invalidate_y_bus();
        *self = staging;
        Ok(())
    }
}
