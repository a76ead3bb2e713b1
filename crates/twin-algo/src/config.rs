//! Engine configuration.
//!
//! [`EngineConfig`] groups the settings of every analysis. It is stored as
//! TOML and partial files are accepted: any section or field left out keeps
//! its default.
//!
//! ```toml
//! [load_flow]
//! tolerance = 1e-8
//!
//! [stability]
//! horizon_s = 5.0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use twin_core::{TwinError, TwinResult};

use crate::contingency::ContingencyConfig;
use crate::fault::FaultConfig;
use crate::load_flow::LoadFlowConfig;
use crate::stability::StabilityConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub load_flow: LoadFlowConfig,
    pub fault: FaultConfig,
    pub contingency: ContingencyConfig,
    pub stability: StabilityConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load_from(path: &Path) -> TwinResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to(&self, path: &Path) -> TwinResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TwinError::Config(format!("cannot serialize configuration: {e}")))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> TwinResult<()> {
        if !(self.load_flow.tolerance.is_finite() && self.load_flow.tolerance > 0.0) {
            return Err(TwinError::Config(format!(
                "load_flow.tolerance must be positive, got {}",
                self.load_flow.tolerance
            )));
        }
        if self.load_flow.max_iterations == 0 {
            return Err(TwinError::Config(
                "load_flow.max_iterations must be at least 1".into(),
            ));
        }
        if self.fault.source_short_circuit_mva <= 0.0 || self.fault.source_x_r <= 0.0 {
            return Err(TwinError::Config(
                "fault source strength and X/R must be positive".into(),
            ));
        }
        if self.contingency.loading_limit_percent <= 0.0 {
            return Err(TwinError::Config(
                "contingency.loading_limit_percent must be positive".into(),
            ));
        }
        self.stability.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.load_flow.max_iterations, 50);
        assert!((config.load_flow.tolerance - 1e-6).abs() < 1e-15);
        assert!((config.stability.time_step_s - 0.001).abs() < 1e-15);
        assert!(config.contingency.parallel);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_parsing() {
        let toml = r#"
[load_flow]
tolerance = 1e-8

[stability]
horizon_s = 5.0
"#;
        let config: EngineConfig = toml::from_str(toml).unwrap();
        assert!((config.load_flow.tolerance - 1e-8).abs() < 1e-20);
        assert_eq!(config.load_flow.max_iterations, 50);
        assert!((config.stability.horizon_s - 5.0).abs() < 1e-12);
        assert!((config.stability.inertia_h - 5.0).abs() < 1e-12);
        assert_eq!(config.fault, FaultConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.toml");

        let mut config = EngineConfig::default();
        config.load_flow.max_iterations = 20;
        config.fault.breaker_margin_percent = 25.0;
        config.save_to(&path).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[load_flow]\nmax_iterations = 0\n").unwrap();
        let err = EngineConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, TwinError::Config(_)));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[load_flow\n").unwrap();
        let err = EngineConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, TwinError::Parse(_)));
    }
}
