//! Crossover configuration

use serde::{Deserialize, Serialize};

use crate::{LpxError, LpxResult};

/// Default period of the background IR update poll (ms)
pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 10;

/// Default crossover prototype order
pub const DEFAULT_CROSSOVER_ORDER: usize = 4;

/// Settings for the linear-phase crossover that are not per-block parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossoverConfig {
    /// Poll period of the background IR designer
    pub update_interval_ms: u64,
    /// Spawn the background designer thread on prepare.
    /// When false the host drives `service_ir_update` itself.
    pub background_updates: bool,
    /// Crossover order (even, greater than 2)
    pub order: usize,
}

impl Default for CrossoverConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: DEFAULT_UPDATE_INTERVAL_MS,
            background_updates: true,
            order: DEFAULT_CROSSOVER_ORDER,
        }
    }
}

impl CrossoverConfig {
    /// Parse a config from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> LpxResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        log::debug!("Loaded crossover config: {:?}", config);
        Ok(config)
    }

    pub fn to_json(&self) -> LpxResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> LpxResult<()> {
        if self.update_interval_ms == 0 {
            return Err(LpxError::Config(
                "update_interval_ms must be non-zero".into(),
            ));
        }
        if self.order <= 2 || self.order % 2 != 0 {
            return Err(LpxError::Config(format!(
                "crossover order must be even and greater than 2, got {}",
                self.order
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CrossoverConfig::default();
        assert_eq!(config.update_interval_ms, 10);
        assert!(config.background_updates);
        assert_eq!(config.order, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CrossoverConfig::from_json(r#"{ "background_updates": false }"#).unwrap();
        assert!(!config.background_updates);
        assert_eq!(config.update_interval_ms, DEFAULT_UPDATE_INTERVAL_MS);
        assert_eq!(config.order, DEFAULT_CROSSOVER_ORDER);
    }

    #[test]
    fn test_json_round_trip() {
        let config = CrossoverConfig {
            update_interval_ms: 25,
            background_updates: false,
            order: 8,
        };
        let json = config.to_json().unwrap();
        assert_eq!(CrossoverConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(matches!(
            CrossoverConfig::from_json(r#"{ "update_interval_ms": 0 }"#),
            Err(LpxError::Config(_))
        ));
        assert!(CrossoverConfig::from_json(r#"{ "order": 3 }"#).is_err());
        assert!(CrossoverConfig::from_json("not json").is_err());
    }
}
