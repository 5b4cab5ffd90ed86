//! Simulation configuration and errors.

use serde::{Deserialize, Serialize};
use std::path::Path;
use trackvtx_core::{GraphError, ReadoutConfig, TunerConfig, VertexConfig, VertexError};

use crate::oracle::EventConfig;
use crate::vertexing::FinderConfig;

/// Errors raised by the simulation harness.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Failed to read config {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Invalid noise parameter: {0}")]
    Noise(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Vertex(#[from] VertexError),
}

/// Everything a scenario run can be tuned with.
///
/// Every section falls back to its defaults, so a config file only needs
/// the values it changes:
///
/// ```json
/// { "vertex": { "max_dist_to_track": 3.0 }, "event": { "node_noise_std": 0.2 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub vertex: VertexConfig,
    pub readout: ReadoutConfig,
    pub tuner: TunerConfig,
    pub finder: FinderConfig,
    pub event: EventConfig,

    /// Distance within which a found vertex matches a true one (default: 2.0)
    pub match_tolerance: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            vertex: VertexConfig::default(),
            readout: ReadoutConfig::default(),
            tuner: TunerConfig::default(),
            finder: FinderConfig::default(),
            event: EventConfig::default(),
            match_tolerance: 2.0,
        }
    }
}

impl SimConfig {
    pub fn from_json_str(json: &str) -> Result<Self, SimError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SimError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = SimConfig::from_json_str(r#"{ "vertex": { "max_dist_to_track": 3.0 }, "match_tolerance": 1.0 }"#)
            .unwrap();

        assert_eq!(config.vertex.max_dist_to_track, 3.0);
        assert_eq!(config.vertex.min_dist_to_node, 2.0);
        assert_eq!(config.match_tolerance, 1.0);
        assert_eq!(config.finder, FinderConfig::default());
    }

    #[test]
    fn test_bad_config_is_an_error() {
        assert!(matches!(
            SimConfig::from_json_str("{ not json"),
            Err(SimError::ConfigParse(_))
        ));
        assert!(matches!(
            SimConfig::from_json_file("/nonexistent/trackvtx.json"),
            Err(SimError::ConfigIo { .. })
        ));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = SimConfig::default();
        let json = serde_json::to_string(&config).unwrap();

        assert_eq!(SimConfig::from_json_str(&json).unwrap(), config);
    }
}
