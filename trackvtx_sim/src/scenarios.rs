//! Synthetic vertexing scenarios.

use nalgebra::Vector3;

use crate::config::SimError;
use crate::oracle::EventOracle;

/// Half-size of the cube vertex positions are drawn from.
const VERTEX_EXTENT: f64 = 50.0;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// VTX-001: three prongs leaving one vertex
    Star,

    /// VTX-002: two through-going tracks and a prong meeting at one point
    Crossing,

    /// VTX-003: a track bending at the vertex plus two prongs
    Kinked,

    /// VTX-004: a two-prong vertex and an unrelated track
    FarPair,

    /// VTX-005: two well separated three-prong vertices
    DoubleVertex,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Star,
            ScenarioId::Crossing,
            ScenarioId::Kinked,
            ScenarioId::FarPair,
            ScenarioId::DoubleVertex,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Star => "star",
            ScenarioId::Crossing => "crossing",
            ScenarioId::Kinked => "kinked",
            ScenarioId::FarPair => "far_pair",
            ScenarioId::DoubleVertex => "double_vertex",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Star => "3 prongs from one point, each starting just off the vertex",
            ScenarioId::Crossing => "2 through-going tracks crossing at a prong origin, splits expected",
            ScenarioId::Kinked => "track with a kink at the vertex plus 2 prongs",
            ScenarioId::FarPair => "2-prong vertex with an unrelated track 100 units away",
            ScenarioId::DoubleVertex => "two 3-prong vertices 40 units apart",
        }
    }

    /// Fills `oracle` with the scenario's event.
    pub fn populate(&self, oracle: &mut EventOracle) -> Result<(), SimError> {
        let vertex = oracle.random_position(Vector3::zeros(), VERTEX_EXTENT);

        match self {
            ScenarioId::Star => {
                oracle.spawn_star(vertex, 3)?;
            }
            ScenarioId::Crossing => {
                let dirs = oracle.random_directions(3);
                let tracks = vec![
                    oracle.add_through_track(vertex, dirs[0])?,
                    oracle.add_through_track(vertex, dirs[1])?,
                    oracle.add_prong(vertex, dirs[2])?,
                ];
                oracle.add_truth(vertex, tracks);
            }
            ScenarioId::Kinked => {
                let dirs = oracle.random_directions(4);
                let tracks = vec![
                    oracle.add_kinked_track(vertex, dirs[0], dirs[1])?,
                    oracle.add_prong(vertex, dirs[2])?,
                    oracle.add_prong(vertex, dirs[3])?,
                ];
                oracle.add_truth(vertex, tracks);
            }
            ScenarioId::FarPair => {
                oracle.spawn_star(vertex, 2)?;
                let away = oracle.random_directions(1)[0];
                let stray_dir = oracle.random_directions(1)[0];
                oracle.add_prong(vertex + away * 100.0, stray_dir)?;
            }
            ScenarioId::DoubleVertex => {
                let offset = oracle.random_directions(1)[0] * 40.0;
                oracle.spawn_star(vertex, 3)?;
                oracle.spawn_star(vertex + offset, 3)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "star" | "vtx-001" => Ok(ScenarioId::Star),
            "crossing" | "vtx-002" => Ok(ScenarioId::Crossing),
            "kinked" | "vtx-003" => Ok(ScenarioId::Kinked),
            "far_pair" | "farpair" | "vtx-004" => Ok(ScenarioId::FarPair),
            "double_vertex" | "doublevertex" | "vtx-005" => Ok(ScenarioId::DoubleVertex),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
