//! Whole-tree re-optimization after restructuring.
//!
//! Committing a vertex rewires tracks into a new tree; the tree's fit is then
//! re-optimized as a whole. The optimizer is pluggable through [`TreeTuner`].
//! Its score follows one convention: values above [`DIVERGED_SCORE_LIMIT`]
//! are acceptable (`-1.0` flags a high but finite residual), anything at or
//! below it means the optimization diverged.

use serde::{Deserialize, Serialize};

use crate::geometry;
use crate::track_graph::{GraphError, TrackGraph, TrackId};

/// Scores at or below this value mean the tree optimization diverged.
pub const DIVERGED_SCORE_LIMIT: f64 = -2.0;

/// Score reported for a finite but unacceptably high residual.
pub const HIGH_RESIDUAL_SCORE: f64 = -1.0;

/// Score reported for a non-finite (diverged) residual.
pub const DIVERGED_SCORE: f64 = -3.0;

/// Re-optimizes the tree rooted at a given track and returns its score.
pub trait TreeTuner {
    fn tune_full_tree(&mut self, graph: &mut TrackGraph, root: TrackId) -> f64;
}

impl<F> TreeTuner for F
where
    F: FnMut(&mut TrackGraph, TrackId) -> f64,
{
    fn tune_full_tree(&mut self, graph: &mut TrackGraph, root: TrackId) -> f64 {
        self(graph, root)
    }
}

/// Whether a tuning score commits the tree.
#[inline]
pub fn is_converged(score: f64) -> bool {
    score > DIVERGED_SCORE_LIMIT
}

// ============================================================================
// CHORD RESIDUAL TUNER
// ============================================================================

/// Configuration for [`ChordResidualTuner`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Residual above which the score is reported as high (default: 25.0)
    pub max_residual: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self { max_residual: 25.0 }
    }
}

/// Geometry-only tree score.
///
/// Without access to the hits behind each track the residual is taken as
/// the mean squared distance of every inner node from the chord joining its
/// neighbours, i.e. how far the tree departs from piecewise-straight
/// branches. Non-finite node positions are reported as divergence.
#[derive(Debug, Clone, Default)]
pub struct ChordResidualTuner {
    config: TunerConfig,
}

impl ChordResidualTuner {
    pub fn new(config: TunerConfig) -> Self {
        Self { config }
    }

    /// Mean squared chord deviation over the tree's inner nodes.
    pub fn residual(graph: &TrackGraph, root: TrackId) -> Result<f64, GraphError> {
        let (_, tracks) = graph.tree_branches(root)?;

        let mut sum = 0.0;
        let mut count = 0usize;
        for track in tracks {
            let nodes = graph.track_nodes(track)?;
            for i in 0..nodes.len() {
                let p = graph.point(nodes[i])?;
                if !p.iter().all(|c| c.is_finite()) {
                    return Ok(f64::INFINITY);
                }
                if i == 0 || i + 1 == nodes.len() {
                    continue;
                }
                let a = graph.point(nodes[i - 1])?;
                let b = graph.point(nodes[i + 1])?;
                sum += geometry::distance2_to_segment(&p, &a, &b);
                count += 1;
            }
        }

        Ok(if count > 0 { sum / count as f64 } else { 0.0 })
    }
}

impl TreeTuner for ChordResidualTuner {
    fn tune_full_tree(&mut self, graph: &mut TrackGraph, root: TrackId) -> f64 {
        match Self::residual(graph, root) {
            Ok(r) if r.is_finite() && r <= self.config.max_residual => r,
            Ok(r) if r.is_finite() => HIGH_RESIDUAL_SCORE,
            _ => DIVERGED_SCORE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readout::Partition;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn pts(points: &[[f64; 3]]) -> Vec<(Vector3<f64>, Partition)> {
        points
            .iter()
            .map(|p| (Vector3::new(p[0], p[1], p[2]), Partition::default()))
            .collect()
    }

    #[test]
    fn test_straight_tree_scores_zero() {
        let mut graph = TrackGraph::new();
        let t = graph.add_track(&pts(&[[0.0, 0.0, 0.0], [5.0, 0.0, 0.0], [10.0, 0.0, 0.0]])).unwrap();

        let score = ChordResidualTuner::default().tune_full_tree(&mut graph, t);
        assert_relative_eq!(score, 0.0);
        assert!(is_converged(score));
    }

    #[test]
    fn test_kinked_track_residual() {
        let mut graph = TrackGraph::new();
        let t = graph.add_track(&pts(&[[0.0, 0.0, 0.0], [5.0, 2.0, 0.0], [10.0, 0.0, 0.0]])).unwrap();

        assert_relative_eq!(ChordResidualTuner::residual(&graph, t).unwrap(), 4.0);

        let mut strict = ChordResidualTuner::new(TunerConfig { max_residual: 1.0 });
        let score = strict.tune_full_tree(&mut graph, t);
        assert_relative_eq!(score, HIGH_RESIDUAL_SCORE);
        assert!(is_converged(score));
    }

    #[test]
    fn test_non_finite_geometry_diverges() {
        let mut graph = TrackGraph::new();
        let t = graph.add_track(&pts(&[[0.0, 0.0, 0.0], [f64::NAN, 0.0, 0.0]])).unwrap();

        let score = ChordResidualTuner::default().tune_full_tree(&mut graph, t);
        assert!(!is_converged(score));
    }

    #[test]
    fn test_closure_tuner() {
        let mut graph = TrackGraph::new();
        let t = graph.add_track(&pts(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]])).unwrap();
        let mut calls = 0;
        let mut tuner = |_: &mut TrackGraph, _: TrackId| {
            calls += 1;
            0.5
        };

        assert_relative_eq!(tuner.tune_full_tree(&mut graph, t), 0.5);
        drop(tuner);
        assert_eq!(calls, 1);
    }
}
