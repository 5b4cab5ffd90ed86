//! Ground truth oracle for synthetic events.
//!
//! The oracle builds a track graph around known vertex positions:
//! - Prongs leaving a vertex, starting a small gap away from it
//! - Through-going tracks crossing a vertex
//! - Kinked tracks bending at a vertex
//! - Unrelated tracks away from any vertex
//!
//! Node positions are smeared with Gaussian noise drawn from a seeded RNG,
//! so one seed always yields the same event.

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, UnitSphere};
use serde::{Deserialize, Serialize};
use trackvtx_core::{Partition, TrackCandidate, TrackGraph, TrackId};

use crate::config::SimError;

/// Shape of generated tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Standard deviation of node smearing (default: 0.1)
    pub node_noise_std: f64,

    /// Length of a prong, and of each half of a through-going track (default: 30.0)
    pub track_length: f64,

    /// Distance from the vertex to the first node of a prong (default: 0.5)
    pub prong_gap: f64,

    /// Nodes per prong or track half (default: 4)
    pub nodes_per_track: usize,

    /// Minimum angle between the lines of tracks at one vertex, in degrees (default: 20.0)
    pub min_opening_deg: f64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            node_noise_std: 0.1,
            track_length: 30.0,
            prong_gap: 0.5,
            nodes_per_track: 4,
            min_opening_deg: 20.0,
        }
    }
}

/// A true interaction point and the tracks produced there.
#[derive(Debug, Clone, PartialEq)]
pub struct TruthVertex {
    pub position: Vector3<f64>,
    pub tracks: Vec<TrackId>,
}

/// The oracle - owns the event under construction and its ground truth.
pub struct EventOracle {
    seed: u64,
    rng: ChaCha8Rng,
    noise: Normal<f64>,
    config: EventConfig,
    graph: TrackGraph,
    tracks: Vec<TrackCandidate>,
    truth: Vec<TruthVertex>,
}

impl EventOracle {
    pub fn new(seed: u64, config: EventConfig) -> Result<Self, SimError> {
        let std = config.node_noise_std;
        if !(std.is_finite() && std >= 0.0) {
            return Err(SimError::Noise(format!("node_noise_std must be finite and >= 0, got {}", std)));
        }
        let noise = Normal::new(0.0, std).map_err(|e| SimError::Noise(e.to_string()))?;
        Ok(Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            noise,
            config,
            graph: TrackGraph::new(),
            tracks: Vec::new(),
            truth: Vec::new(),
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn graph(&self) -> &TrackGraph {
        &self.graph
    }

    /// Tracks in creation order; each key is the creation index.
    pub fn tracks(&self) -> &[TrackCandidate] {
        &self.tracks
    }

    pub fn truth(&self) -> &[TruthVertex] {
        &self.truth
    }

    pub fn into_event(self) -> (TrackGraph, Vec<TrackCandidate>, Vec<TruthVertex>) {
        (self.graph, self.tracks, self.truth)
    }

    // ========================================================================
    // RANDOM GEOMETRY
    // ========================================================================

    /// Uniform point in the cube of half-size `extent` around `center`.
    pub fn random_position(&mut self, center: Vector3<f64>, extent: f64) -> Vector3<f64> {
        center
            + Vector3::new(
                self.rng.gen_range(-extent..=extent),
                self.rng.gen_range(-extent..=extent),
                self.rng.gen_range(-extent..=extent),
            )
    }

    /// `n` isotropic unit directions whose lines are pairwise separated by
    /// at least the configured opening angle.
    pub fn random_directions(&mut self, n: usize) -> Vec<Vector3<f64>> {
        let max_cos = self.config.min_opening_deg.to_radians().cos();
        let mut out: Vec<Vector3<f64>> = Vec::with_capacity(n);
        let mut attempts = 0;
        while out.len() < n {
            let [x, y, z]: [f64; 3] = UnitSphere.sample(&mut self.rng);
            let dir = Vector3::new(x, y, z);
            attempts += 1;
            // Bounded retries; past them any direction is taken
            if attempts > 1000 || out.iter().all(|d| d.dot(&dir).abs() < max_cos) {
                out.push(dir);
            }
        }
        out
    }

    fn smear(&mut self, p: Vector3<f64>) -> Vector3<f64> {
        let noise = self.noise;
        p + Vector3::new(
            noise.sample(&mut self.rng),
            noise.sample(&mut self.rng),
            noise.sample(&mut self.rng),
        )
    }

    // ========================================================================
    // TRACKS
    // ========================================================================

    fn push_track(&mut self, points: Vec<Vector3<f64>>) -> Result<TrackId, SimError> {
        let points: Vec<_> = points
            .into_iter()
            .map(|p| (self.smear(p), Partition::default()))
            .collect();
        let id = self.graph.add_track(&points)?;
        self.tracks.push(TrackCandidate::new(id, self.tracks.len() as i32));
        Ok(id)
    }

    /// Evenly spaced points from `from` to `to`, `n` of them (at least two).
    fn line_points(from: Vector3<f64>, to: Vector3<f64>, n: usize) -> Vec<Vector3<f64>> {
        let n = n.max(2);
        (0..n)
            .map(|i| from + (to - from) * (i as f64 / (n - 1) as f64))
            .collect()
    }

    /// Track leaving `vertex` along `dir`.
    pub fn add_prong(&mut self, vertex: Vector3<f64>, dir: Vector3<f64>) -> Result<TrackId, SimError> {
        let start = vertex + dir * self.config.prong_gap;
        let end = start + dir * self.config.track_length;
        self.push_track(Self::line_points(start, end, self.config.nodes_per_track))
    }

    /// Straight track passing through `vertex` along `dir`.
    pub fn add_through_track(&mut self, vertex: Vector3<f64>, dir: Vector3<f64>) -> Result<TrackId, SimError> {
        let half = dir * self.config.track_length;
        self.push_track(Self::line_points(vertex - half, vertex + half, self.config.nodes_per_track))
    }

    /// Track arriving at `vertex` along `dir_in` and leaving along `dir_out`,
    /// with a node at the vertex.
    pub fn add_kinked_track(
        &mut self,
        vertex: Vector3<f64>,
        dir_in: Vector3<f64>,
        dir_out: Vector3<f64>,
    ) -> Result<TrackId, SimError> {
        let n = self.config.nodes_per_track;
        let length = self.config.track_length;
        let mut points = Self::line_points(vertex - dir_in * length, vertex, n);
        points.extend(Self::line_points(vertex, vertex + dir_out * length, n).into_iter().skip(1));
        self.push_track(points)
    }

    /// Record a true vertex.
    pub fn add_truth(&mut self, position: Vector3<f64>, tracks: Vec<TrackId>) {
        self.truth.push(TruthVertex { position, tracks });
    }

    /// True vertex with `prongs` tracks leaving it in random directions.
    pub fn spawn_star(&mut self, position: Vector3<f64>, prongs: usize) -> Result<Vec<TrackId>, SimError> {
        let tracks = self
            .random_directions(prongs)
            .into_iter()
            .map(|dir| self.add_prong(position, dir))
            .collect::<Result<Vec<_>, _>>()?;
        self.add_truth(position, tracks.clone());
        Ok(tracks)
    }
}
