//! Serializable topology description and the built-in reference substation.

use crate::{
    Bus, BusType, Kilovolts, Line, Megavars, MegavoltAmperes, Megawatts, Network, PerUnit,
    Transformer, TwinError, TwinResult, DEFAULT_BASE_MVA, DEFAULT_FREQUENCY_HZ,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_base_mva() -> f64 {
    DEFAULT_BASE_MVA
}

fn default_frequency() -> f64 {
    DEFAULT_FREQUENCY_HZ
}

/// Plain-data form of a [`Network`], read from JSON, YAML or TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySpec {
    #[serde(default = "default_base_mva")]
    pub base_mva: f64,
    #[serde(default = "default_frequency")]
    pub frequency_hz: f64,
    pub buses: Vec<Bus>,
    #[serde(default)]
    pub lines: Vec<Line>,
    #[serde(default)]
    pub transformers: Vec<Transformer>,
}

pub(crate) fn parse_by_extension<T: DeserializeOwned>(path: &Path, data: &str) -> TwinResult<T> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            Ok(serde_yaml::from_str(data)?)
        }
        Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(serde_json::from_str(data)?),
        Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(toml::from_str(data)?),
        _ => serde_yaml::from_str(data)
            .or_else(|_| serde_json::from_str(data))
            .map_err(|err| {
                TwinError::Parse(format!("{}: {err}", path.display()))
            }),
    }
}

/// Read a topology file without building the network.
pub fn load_topology(path: &Path) -> TwinResult<TopologySpec> {
    let data = std::fs::read_to_string(path)?;
    parse_by_extension(path, &data)
}

impl Network {
    /// Build and validate a network from its plain-data description.
    pub fn from_spec(spec: &TopologySpec) -> TwinResult<Self> {
        let mut network = Network::with_base(spec.base_mva, spec.frequency_hz)?;
        for bus in &spec.buses {
            network.add_bus(bus.clone())?;
        }
        for line in &spec.lines {
            network.add_line(line.clone())?;
        }
        for tx in &spec.transformers {
            network.add_transformer(tx.clone())?;
        }
        network.validate()?;
        Ok(network)
    }

    pub fn from_path(path: &Path) -> TwinResult<Self> {
        Self::from_spec(&load_topology(path)?)
    }

    /// Current state of the network, including solved voltages.
    pub fn to_spec(&self) -> TopologySpec {
        TopologySpec {
            base_mva: self.base_mva(),
            frequency_hz: self.frequency_hz(),
            buses: self.buses().cloned().collect(),
            lines: self.lines().cloned().collect(),
            transformers: self.transformers().cloned().collect(),
        }
    }

    /// The 400/220/33 kV reference substation.
    pub fn standard_substation() -> TwinResult<Self> {
        Self::from_spec(&standard_substation_spec())
    }
}

/// Grid infeed at 400 kV, a 400 kV generator, three 220 kV load buses fed
/// through two 315 MVA transformers, and a 33 kV distribution bus.
pub fn standard_substation_spec() -> TopologySpec {
    let buses = vec![
        Bus::new("BUS_400_1", "400kV Bus 1", Kilovolts(400.0), BusType::Slack)
            .with_setpoint(PerUnit(1.02)),
        Bus::new("BUS_400_2", "400kV Bus 2", Kilovolts(400.0), BusType::PV)
            .with_setpoint(PerUnit(1.02))
            .with_generation(Megawatts(100.0), Megavars(0.0)),
        Bus::new("BUS_220_1", "220kV Bus 1", Kilovolts(220.0), BusType::PQ)
            .with_load(Megawatts(150.0), Megavars(50.0))
            .with_shunt(Megavars(60.0)),
        Bus::new("BUS_220_2", "220kV Bus 2", Kilovolts(220.0), BusType::PQ)
            .with_load(Megawatts(100.0), Megavars(30.0))
            .with_shunt(Megavars(40.0)),
        Bus::new("BUS_220_3", "220kV Bus 3", Kilovolts(220.0), BusType::PQ)
            .with_load(Megawatts(80.0), Megavars(25.0))
            .with_shunt(Megavars(30.0)),
        Bus::new("BUS_33_1", "33kV Bus 1", Kilovolts(33.0), BusType::PQ)
            .with_load(Megawatts(20.0), Megavars(8.0)),
    ];

    let lines = vec![
        Line::new("LINE_400_1", "BUS_400_1", "BUS_400_2", 50.0)
            .with_impedance_per_km(0.02, 0.3, 3.5e-6)
            .with_rating(MegavoltAmperes(1500.0)),
        Line::new("LINE_220_1", "BUS_220_1", "BUS_220_2", 30.0)
            .with_impedance_per_km(0.05, 0.4, 2.8e-6),
        Line::new("LINE_220_2", "BUS_220_2", "BUS_220_3", 40.0)
            .with_impedance_per_km(0.05, 0.4, 2.8e-6),
    ];

    let transformers = vec![
        Transformer::new("TR1", "BUS_400_1", "BUS_220_1", MegavoltAmperes(315.0))
            .with_impedance_percent(0.5, 12.0),
        Transformer::new("TR2", "BUS_400_2", "BUS_220_2", MegavoltAmperes(315.0))
            .with_impedance_percent(0.5, 12.0),
        Transformer::new("TR3", "BUS_220_3", "BUS_33_1", MegavoltAmperes(63.0))
            .with_impedance_percent(0.8, 10.0)
            .with_tap(-2),
    ];

    TopologySpec {
        base_mva: DEFAULT_BASE_MVA,
        frequency_hz: DEFAULT_FREQUENCY_HZ,
        buses,
        lines,
        transformers,
    }
}
