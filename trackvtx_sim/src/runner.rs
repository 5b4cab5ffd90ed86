//! Scenario runner - builds synthetic events and runs the vertex search.

use tracing::{debug, error, info};
use trackvtx_core::{ChordResidualTuner, WirePlaneGeometry};

use crate::config::{SimConfig, SimError};
use crate::oracle::{EventOracle, TruthVertex};
use crate::scenarios::ScenarioId;
use crate::vertexing::{FinderStats, VertexFinder, VertexingResult};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether every true vertex was found and nothing else
    pub passed: bool,

    /// Number of true vertices in the event
    pub vertices_expected: usize,

    /// Number of committed vertices
    pub vertices_found: usize,

    /// Largest distance between a true vertex and its nearest found vertex
    pub max_position_error: Option<f64>,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Tracks handed to the vertex search
    pub tracks_in: usize,

    /// Tracks after the search, split pieces included
    pub tracks_out: usize,

    /// Vertex search counters
    pub finder: FinderStats,
}

/// Runs vertexing scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    config: SimConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner with default configuration.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: SimConfig::default(),
        }
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        match self.try_run(scenario) {
            Ok(result) => result,
            Err(e) => {
                error!("Scenario {} aborted: {}", scenario.name(), e);
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    vertices_expected: 0,
                    vertices_found: 0,
                    max_position_error: None,
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                }
            }
        }
    }

    fn try_run(&self, scenario: ScenarioId) -> Result<ScenarioResult, SimError> {
        // Event stream derived from the run seed
        let event_seed = self.seed.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        let mut oracle = EventOracle::new(event_seed, self.config.event.clone())?;
        scenario.populate(&mut oracle)?;
        let (mut graph, tracks, truth) = oracle.into_event();
        debug!(tracks = tracks.len(), vertices = truth.len(), "event built");

        let readout = WirePlaneGeometry::new(&self.config.readout);
        let mut tuner = ChordResidualTuner::new(self.config.tuner.clone());
        let finder = VertexFinder::new(self.config.finder.clone(), self.config.vertex.clone());

        let tracks_in = tracks.len();
        let result = finder.run(&mut graph, &readout, &mut tuner, tracks)?;

        Ok(self.evaluate(scenario, &truth, tracks_in, result))
    }

    fn evaluate(
        &self,
        scenario: ScenarioId,
        truth: &[TruthVertex],
        tracks_in: usize,
        result: VertexingResult,
    ) -> ScenarioResult {
        let max_position_error = position_errors(truth, &result).into_iter().reduce(f64::max);

        let vertices_expected = truth.len();
        let vertices_found = result.vertices.len();
        let failure_reason = if vertices_found != vertices_expected {
            Some(format!("found {} vertices, expected {}", vertices_found, vertices_expected))
        } else {
            match max_position_error {
                Some(e) if e > self.config.match_tolerance => Some(format!(
                    "vertex position error {:.2} exceeds {:.2}",
                    e, self.config.match_tolerance
                )),
                _ => None,
            }
        };

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            vertices_expected,
            vertices_found,
            max_position_error,
            failure_reason,
            metrics: ScenarioMetrics {
                tracks_in,
                tracks_out: result.tracks.len(),
                finder: result.stats,
            },
        }
    }
}

/// Distance from each true vertex to the nearest found one (infinite when
/// nothing was found).
fn position_errors(truth: &[TruthVertex], result: &VertexingResult) -> Vec<f64> {
    truth
        .iter()
        .map(|t| {
            result
                .vertices
                .iter()
                .map(|v| (v.center - t.position).norm())
                .fold(f64::INFINITY, f64::min)
        })
        .collect()
}
