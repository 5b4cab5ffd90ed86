//! Event-level vertex search.
//!
//! Drives [`VertexCandidate`] over all tracks of an event:
//! 1. **Pairs**: every two tracks that admit a common point with a small
//!    fit residual form a candidate
//! 2. **Merge**: candidates contained in others are dropped, and the most
//!    compatible candidates are merged while the merge succeeds
//! 3. **Select**: candidates are picked greedily by the number of long
//!    tracks they hold, skipping any correlated with an earlier pick
//! 4. **Commit**: each pick is joined into the track graph

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use trackvtx_core::geometry::dist2;
use trackvtx_core::{
    CommittedVertex, JoinOutcome, ReadoutGeometry, TrackCandidate, TrackGraph, TreeTuner, VertexCandidate,
    VertexConfig, VertexError,
};

/// Configuration for [`VertexFinder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinderConfig {
    /// Pairs with a larger RMS fit residual are dropped (default: 1.0)
    pub max_pair_rms: f64,

    /// Candidates merge only below this compatibility score (default: 1.0)
    pub merge_test_threshold: f64,

    /// Selected vertices must be at least this far apart (default: 15.0)
    pub min_vertex_separation: f64,

    /// Tracks longer than twice this count toward a candidate's rank (default: 2.0)
    pub min_track_length: f64,

    /// Tracks shorter than this are ignored by the opening angle (default: 1.0)
    pub angle_min_length: f64,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            max_pair_rms: 1.0,
            merge_test_threshold: 1.0,
            min_vertex_separation: 15.0,
            min_track_length: 2.0,
            angle_min_length: 1.0,
        }
    }
}

/// Counters collected during one search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FinderStats {
    pub pairs: usize,
    pub merges: usize,
    pub selected: usize,
    pub committed: usize,
    pub discarded: usize,
}

/// Outcome of [`VertexFinder::run`].
#[derive(Debug, Clone)]
pub struct VertexingResult {
    pub vertices: Vec<CommittedVertex>,

    /// All tracks after the search, including pieces created by splits
    pub tracks: Vec<TrackCandidate>,

    pub stats: FinderStats,
}

pub struct VertexFinder {
    config: FinderConfig,
    vertex: VertexConfig,
}

impl VertexFinder {
    pub fn new(config: FinderConfig, vertex: VertexConfig) -> Self {
        Self { config, vertex }
    }

    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    /// Run all phases and commit the selected vertices.
    pub fn run(
        &self,
        graph: &mut TrackGraph,
        readout: &dyn ReadoutGeometry,
        tuner: &mut dyn TreeTuner,
        tracks: Vec<TrackCandidate>,
    ) -> Result<VertexingResult, VertexError> {
        let mut stats = FinderStats::default();

        let mut candidates = self.build_pairs(graph, readout, &tracks)?;
        stats.pairs = candidates.len();
        stats.merges = self.merge_candidates(graph, readout, &mut candidates)?;
        let selected = self.select(graph, candidates)?;
        stats.selected = selected.len();

        let mut src = tracks;
        let mut out = Vec::with_capacity(src.len());
        let mut vertices = Vec::new();
        for candidate in selected {
            match candidate.join_tracks(graph, tuner, &mut out, &mut src)? {
                JoinOutcome::Committed(vertex) => {
                    debug!(
                        x = vertex.center.x,
                        y = vertex.center.y,
                        z = vertex.center.z,
                        tracks = vertex.joined,
                        "vertex committed"
                    );
                    vertices.push(vertex);
                }
                JoinOutcome::Discarded(reason) => {
                    debug!("candidate discarded: {}", reason);
                    stats.discarded += 1;
                }
            }
        }
        out.append(&mut src);
        stats.committed = vertices.len();

        info!(
            pairs = stats.pairs,
            merges = stats.merges,
            selected = stats.selected,
            committed = stats.committed,
            "vertexing done"
        );
        Ok(VertexingResult {
            vertices,
            tracks: out,
            stats,
        })
    }

    /// Two-track candidates with a small fit residual.
    pub fn build_pairs(
        &self,
        graph: &TrackGraph,
        readout: &dyn ReadoutGeometry,
        tracks: &[TrackCandidate],
    ) -> Result<Vec<VertexCandidate>, VertexError> {
        let mut out = Vec::new();
        for (i, &a) in tracks.iter().enumerate() {
            for &b in &tracks[i + 1..] {
                let mut candidate = VertexCandidate::new(self.vertex.clone());
                if candidate.add(graph, readout, a)?
                    && candidate.add(graph, readout, b)?
                    && candidate.mse().sqrt() < self.config.max_pair_rms
                {
                    out.push(candidate);
                }
            }
        }
        debug!(candidates = out.len(), "pair candidates");
        Ok(out)
    }

    /// Drop covered candidates and merge compatible ones. Returns the number
    /// of merges.
    ///
    /// Each round merges the pair with the lowest [`VertexCandidate::test`]
    /// score; the loop ends at the first round without a successful merge.
    pub fn merge_candidates(
        &self,
        graph: &TrackGraph,
        readout: &dyn ReadoutGeometry,
        candidates: &mut Vec<VertexCandidate>,
    ) -> Result<usize, VertexError> {
        let mut merges = 0;
        loop {
            remove_covered(candidates);

            let mut best: Option<(usize, usize)> = None;
            let mut best_score = self.config.merge_test_threshold;
            for i in 0..candidates.len() {
                for j in i + 1..candidates.len() {
                    let score = candidates[i].test(&candidates[j]);
                    if score < best_score {
                        best_score = score;
                        best = Some((i, j));
                    }
                }
            }

            let Some((i, j)) = best else {
                break;
            };
            let other = candidates[j].clone();
            if !candidates[i].merge_with(graph, readout, &other)? {
                break;
            }
            candidates.remove(j);
            merges += 1;
        }
        Ok(merges)
    }

    /// Greedy pick of uncorrelated candidates.
    ///
    /// Candidates rank by the number of held tracks longer than twice the
    /// minimum track length; ties go to the wider opening angle. Candidates
    /// whose tracks have come to share a tree are skipped.
    pub fn select(
        &self,
        graph: &TrackGraph,
        mut pool: Vec<VertexCandidate>,
    ) -> Result<Vec<VertexCandidate>, VertexError> {
        let long = 2.0 * self.config.min_track_length;
        let mut selected: Vec<VertexCandidate> = Vec::new();

        loop {
            let mut best: Option<usize> = None;
            let mut best_size = 0usize;
            let mut best_angle = 0.0;
            for (k, candidate) in pool.iter().enumerate() {
                if candidate.has_loops(graph)? || self.correlated(graph, &selected, candidate)? {
                    continue;
                }
                let size = candidate.size_longer_than(graph, long)?;
                let angle = candidate.max_angle(graph, self.config.angle_min_length)?;
                if best.is_none() || size > best_size || (size == best_size && angle > best_angle) {
                    best = Some(k);
                    best_size = size;
                    best_angle = angle;
                }
            }

            match best {
                Some(k) => selected.push(pool.swap_remove(k)),
                None => break,
            }
        }
        Ok(selected)
    }

    /// Whether `candidate` shares a track or a tree with, or lies too close
    /// to, an already selected candidate.
    fn correlated(
        &self,
        graph: &TrackGraph,
        selected: &[VertexCandidate],
        candidate: &VertexCandidate,
    ) -> Result<bool, VertexError> {
        let min_d2 = self.config.min_vertex_separation * self.config.min_vertex_separation;
        for s in selected {
            if candidate.tracks().any(|c| s.has(c.track))
                || s.is_attached_candidate(graph, candidate)?
                || dist2(s.center(), candidate.center()) < min_d2
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Remove candidates whose tracks are all held by another candidate.
/// Of two candidates with the same tracks the first is kept.
fn remove_covered(candidates: &mut Vec<VertexCandidate>) {
    let mut k = 0;
    while k < candidates.len() {
        let covered = candidates.iter().enumerate().any(|(i, c)| {
            i != k && c.has_all(&candidates[k]) && (c.size() > candidates[k].size() || i < k)
        });
        if covered {
            candidates.remove(k);
        } else {
            k += 1;
        }
    }
}
