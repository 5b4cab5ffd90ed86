//! Vertex candidates - fitting and committing common track origins
//!
//! A [`VertexCandidate`] collects tracks that plausibly share an interaction
//! point. Each assigned track contributes one segment; the candidate center
//! is the weighted least-squares intersection of those segments' lines.
//!
//! ## Lifecycle
//!
//! - **Build**: [`VertexCandidate::add`] admits tracks one by one, choosing
//!   the segment of each track that fits best, and rejects tracks that
//!   would spoil the fit or are already connected to the candidate.
//! - **Refine**: candidates close to each other can be combined with
//!   [`VertexCandidate::merge_with`]; [`VertexCandidate::test`] scores how
//!   compatible two candidates are.
//! - **Commit**: [`VertexCandidate::join_tracks`] consumes the candidate and
//!   rewires the track graph so all assigned tracks meet at one node. Any
//!   failure restores the graph and both track lists exactly.
//!
//! ## Anisotropic weighting
//!
//! Segment weights depend on the angle between the segment and one
//! privileged detector axis (y by default). Along a second axis (x, the
//! drift direction, by default) the center is a weighted mean of the line
//! projections; the other two coordinates use plain means.
//!
//! ```ignore
//! let mut candidate = VertexCandidate::new(VertexConfig::default());
//! candidate.add(&graph, &readout, TrackCandidate::new(t0, 0))?;
//! candidate.add(&graph, &readout, TrackCandidate::new(t1, 1))?;
//!
//! match candidate.join_tracks(&mut graph, &mut tuner, &mut out, &mut src)? {
//!     JoinOutcome::Committed(vertex) => info!("vertex at {:?}", vertex.center),
//!     JoinOutcome::Discarded(reason) => debug!("discarded: {}", reason),
//! }
//! ```

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use tracing::{debug, error, warn};

use crate::geometry::{self, dist2, segment_projection_fraction};
use crate::readout::{Partition, ReadoutGeometry, View};
use crate::track_graph::{GraphError, NodeId, SegmentId, TrackGraph, TrackId};
use crate::tree_tuning::{is_converged, TreeTuner};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Detector axis selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Configuration for vertex candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VertexConfig {
    /// Segments shorter than this are ignored by the fit (default: 0.5)
    pub min_segment_length: f64,

    /// Maximum distance of a track to the candidate center (default: 4.0)
    pub max_dist_to_track: f64,

    /// Center closer than this to a segment end snaps to the node (default: 2.0)
    pub min_dist_to_node: f64,

    /// Maximum center distance for merging two candidates (default: 10.0)
    pub merge_max_distance: f64,

    /// Maximum fit MSE after merging two candidates (default: 1.0)
    pub merge_max_mse: f64,

    /// Lower bound of the segment weight (default: 0.3)
    pub weight_floor: f64,

    /// MSE reported when the fit is degenerate (default: 1e6)
    pub degenerate_mse: f64,

    /// Axis whose angle to a segment sets the segment weight (default: Y)
    pub anisotropy_axis: Axis,

    /// Coordinate of the center computed as a weighted mean (default: X)
    pub weighted_axis: Axis,
}

impl Default for VertexConfig {
    fn default() -> Self {
        Self {
            min_segment_length: 0.5,
            max_dist_to_track: 4.0,
            min_dist_to_node: 2.0,
            merge_max_distance: 10.0,
            merge_max_mse: 1.0,
            weight_floor: 0.3,
            degenerate_mse: 1.0e6,
            anisotropy_axis: Axis::Y,
            weighted_axis: Axis::X,
        }
    }
}

/// Fit weight of the segment `p0 → p1`.
///
/// With `a` the angle between the segment and the plane orthogonal to
/// `axis`, normalized to `[0, 1]`, the weight is `1 − (a − 1)¹²`, bounded
/// below by `floor`. Zero-length segments get `floor`.
pub fn segment_weight(p0: &Vector3<f64>, p1: &Vector3<f64>, axis: Axis, floor: f64) -> f64 {
    let len = (p1 - p0).norm();
    if len <= 0.0 {
        return floor;
    }
    let i = axis.index();
    let ratio = ((p1[i] - p0[i]).abs() / len).min(1.0);
    let a = ratio.asin() / FRAC_PI_2;
    (1.0 - (a - 1.0).powi(12)).max(floor)
}

// ============================================================================
// TYPES
// ============================================================================

/// A track offered to vertex finding, tagged with an opaque caller key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackCandidate {
    pub track: TrackId,
    pub key: i32,
}

impl TrackCandidate {
    pub fn new(track: TrackId, key: i32) -> Self {
        Self { track, key }
    }
}

/// Errors raised while fitting or committing a vertex.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VertexError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Segment index {index} out of range for track {track:?}")]
    SegmentIndex { track: TrackId, index: usize },
}

/// Why a commit was abandoned. The graph is unchanged in every case.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JoinFailure {
    #[error("no common vertex node could be created")]
    NoAnchor,

    #[error("rewired structure contains loops")]
    Loops,

    #[error("only {joined} track end(s) joined at the vertex")]
    TooFewJoined { joined: usize },

    #[error("tree tuning diverged (score {score})")]
    Diverged { score: f64 },
}

/// A vertex written into the track graph.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedVertex {
    /// Node shared by all joined tracks
    pub anchor: NodeId,

    /// Final vertex position
    pub center: Vector3<f64>,

    /// Tracks the candidate held
    pub tracks: Vec<TrackCandidate>,

    /// Number of track ends joined at the anchor
    pub joined: usize,

    /// All tracks of the tree containing the vertex, root first
    pub tree: Vec<TrackId>,

    /// Tuning score of that tree
    pub tune_score: f64,
}

/// Result of [`VertexCandidate::join_tracks`].
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Committed(CommittedVertex),
    Discarded(JoinFailure),
}

impl JoinOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, JoinOutcome::Committed(_))
    }
}

/// Fit state restored when a tentative change is rejected.
#[derive(Debug, Clone)]
struct FitState {
    assigned: Vec<(TrackCandidate, usize)>,
    center: Vector3<f64>,
    error_weights: Vector3<f64>,
    mse: f64,
    mse_2d: f64,
}

/// Where the vertex center falls relative to one assigned segment.
struct SegmentProjection {
    index: usize,
    fraction: f64,
    length: f64,
    dist_start: f64,
    dist_end: f64,
    partition_start: Partition,
    partition_end: Partition,
}

// ============================================================================
// VERTEX CANDIDATE
// ============================================================================

/// A set of tracks with a fitted common point.
///
/// Invariants kept by every public operation:
/// - each track is held at most once, and no two held tracks share a tree
///   at the time they were admitted;
/// - each held segment index is valid for its track;
/// - a rejected change leaves the candidate exactly as it was.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexCandidate {
    assigned: Vec<(TrackCandidate, usize)>,
    center: Vector3<f64>,
    error_weights: Vector3<f64>,
    mse: f64,
    mse_2d: f64,
    config: VertexConfig,
}

impl Default for VertexCandidate {
    fn default() -> Self {
        Self::new(VertexConfig::default())
    }
}

impl VertexCandidate {
    pub fn new(config: VertexConfig) -> Self {
        Self {
            assigned: Vec::new(),
            center: Vector3::zeros(),
            error_weights: Vector3::zeros(),
            mse: 0.0,
            mse_2d: 0.0,
            config,
        }
    }

    pub fn with_min_segment_length(min_segment_length: f64) -> Self {
        Self::new(VertexConfig {
            min_segment_length,
            ..Default::default()
        })
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn center(&self) -> &Vector3<f64> {
        &self.center
    }

    pub fn error_weights(&self) -> &Vector3<f64> {
        &self.error_weights
    }

    /// 3D fit MSE recorded by the last accepted change.
    pub fn mse(&self) -> f64 {
        self.mse
    }

    /// Readout-plane MSE recorded by the last accepted change.
    pub fn mse_2d(&self) -> f64 {
        self.mse_2d
    }

    pub fn config(&self) -> &VertexConfig {
        &self.config
    }

    pub fn size(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }

    /// Held tracks with the index of their fitted segment.
    pub fn assigned(&self) -> &[(TrackCandidate, usize)] {
        &self.assigned
    }

    pub fn tracks(&self) -> impl Iterator<Item = &TrackCandidate> + '_ {
        self.assigned.iter().map(|(c, _)| c)
    }

    /// Number of held tracks longer than `min_length`.
    pub fn size_longer_than(&self, graph: &TrackGraph, min_length: f64) -> Result<usize, VertexError> {
        let mut n = 0;
        for (c, _) in &self.assigned {
            if graph.track_length(c.track)? > min_length {
                n += 1;
            }
        }
        Ok(n)
    }

    // ========================================================================
    // MEMBERSHIP
    // ========================================================================

    pub fn has(&self, track: TrackId) -> bool {
        self.assigned.iter().any(|(c, _)| c.track == track)
    }

    /// Whether every track of `other` is held here.
    pub fn has_all(&self, other: &VertexCandidate) -> bool {
        other.tracks().all(|c| self.has(c.track))
    }

    /// Whether `track` shares a tree with any held track.
    pub fn is_attached(&self, graph: &TrackGraph, track: TrackId) -> Result<bool, VertexError> {
        let root = graph.root(track)?;
        for (c, _) in &self.assigned {
            if graph.root(c.track)? == root {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether any track of `other` shares a tree with a held track.
    pub fn is_attached_candidate(&self, graph: &TrackGraph, other: &VertexCandidate) -> Result<bool, VertexError> {
        for c in other.tracks() {
            if self.is_attached(graph, c.track)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether two held tracks have come to share a tree.
    pub fn has_loops(&self, graph: &TrackGraph) -> Result<bool, VertexError> {
        let roots = self
            .assigned
            .iter()
            .map(|(c, _)| graph.root(c.track))
            .collect::<Result<Vec<_>, _>>()?;

        for (i, a) in roots.iter().enumerate() {
            if roots[i + 1..].contains(a) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ========================================================================
    // SCORING
    // ========================================================================

    /// Smallest angle, in degrees, between the longest held track's segment
    /// and the segments of the other held tracks longer than `min_length`.
    ///
    /// Returns 0 when no other track qualifies.
    pub fn max_angle(&self, graph: &TrackGraph, min_length: f64) -> Result<f64, VertexError> {
        let mut longest: Option<(usize, Vector3<f64>)> = None;
        let mut max_length = 0.0;
        for (i, (c, idx)) in self.assigned.iter().enumerate() {
            let length = graph.track_length(c.track)?;
            if length > max_length {
                max_length = length;
                longest = Some((i, self.segment_direction(graph, c.track, *idx)?));
            }
        }
        let Some((longest_index, longest_dir)) = longest else {
            return Ok(0.0);
        };

        let mut min_cos = 1.0f64;
        for (i, (c, idx)) in self.assigned.iter().enumerate() {
            if i == longest_index || graph.track_length(c.track)? <= min_length {
                continue;
            }
            let dir = self.segment_direction(graph, c.track, *idx)?;
            min_cos = min_cos.min(longest_dir.dot(&dir).abs());
        }

        Ok(min_cos.clamp(0.0, 1.0).acos().to_degrees())
    }

    /// Error-weighted distance between two candidate centers.
    pub fn test(&self, other: &VertexCandidate) -> f64 {
        let d = self.center - other.center;
        (0..3)
            .map(|i| self.error_weights[i] * other.error_weights[i] * d[i] * d[i])
            .sum::<f64>()
            .sqrt()
    }

    // ========================================================================
    // FITTING
    // ========================================================================

    /// Refit the center from the held segments.
    ///
    /// Updates center and error weights and returns the fit MSE. When fewer
    /// than two usable segments remain, or they are all parallel, the
    /// center is left as it was and the configured degenerate MSE is
    /// returned.
    pub fn compute(&mut self, graph: &TrackGraph) -> Result<f64, VertexError> {
        Ok(self.fit(graph)?.unwrap_or(self.config.degenerate_mse))
    }

    /// Mean over held tracks of the squared 2D distance between the
    /// projected center and the projected segment, averaged over the views
    /// present in the partition of the segment's start node.
    pub fn compute_mse_2d(&self, graph: &TrackGraph, readout: &dyn ReadoutGeometry) -> Result<f64, VertexError> {
        if self.assigned.is_empty() {
            return Ok(0.0);
        }

        let mut mse = 0.0;
        for (c, idx) in &self.assigned {
            let seg = segment_at(graph, c.track, *idx)?;
            let (p0, p1) = graph.segment_endpoints(seg)?;
            let start = graph.track_nodes(c.track)?[*idx];
            let partition = graph.partition(start)?;

            let mut sum = 0.0;
            let mut views = 0usize;
            for view in View::ALL {
                if !readout.has_plane(partition, view) {
                    continue;
                }
                let center = readout.project(&self.center, view, partition);
                let a = readout.project(&p0, view, partition);
                let b = readout.project(&p1, view, partition);
                sum += geometry::distance2_to_segment_2d(&center, &a, &b);
                views += 1;
            }
            if views > 0 {
                mse += sum / views as f64;
            }
        }

        Ok(mse / self.assigned.len() as f64)
    }

    /// Least-squares fit over the held segments; `None` if degenerate.
    fn fit(&mut self, graph: &TrackGraph) -> Result<Option<f64>, VertexError> {
        let mut lines = Vec::with_capacity(self.assigned.len());
        let mut weights = Vec::with_capacity(self.assigned.len());
        for (c, idx) in &self.assigned {
            let (p0, p1) = graph.segment_endpoints(segment_at(graph, c.track, *idx)?)?;
            let length = (p1 - p0).norm();
            if length <= 0.0 || length < self.config.min_segment_length {
                continue;
            }
            weights.push(segment_weight(&p0, &p1, self.config.anisotropy_axis, self.config.weight_floor));
            lines.push((p0, p1));
        }

        let Some(solution) = geometry::solve_least_squares_3d(&lines, &weights) else {
            warn!("Cannot compute crossing point of {} line(s)", lines.len());
            return Ok(None);
        };

        let weighted = self.config.weighted_axis.index();
        let mut center = Vector3::zeros();
        let mut err = Vector3::zeros();
        let mut weight_sum = 0.0;
        for ((p0, p1), &w) in lines.iter().zip(&weights) {
            let proj = geometry::project_onto_line(&solution.point, p0, p1);
            for i in 0..3 {
                if i == weighted {
                    center[i] += w * proj[i];
                    err[i] += w * w;
                } else {
                    center[i] += proj[i];
                    err[i] += 1.0;
                }
            }
            weight_sum += w;
        }

        let n = lines.len() as f64;
        for i in 0..3 {
            center[i] /= if i == weighted { weight_sum } else { n };
        }
        self.center = center;
        self.error_weights = (err / n).map(f64::sqrt);

        Ok(Some(solution.mse))
    }

    // ========================================================================
    // BUILDING
    // ========================================================================

    /// Try to admit a track.
    ///
    /// Returns `Ok(false)` with the candidate unchanged when the track is
    /// attached to a held track, has no segment of usable length, or no
    /// segment fits within the distance limit.
    pub fn add(
        &mut self,
        graph: &TrackGraph,
        readout: &dyn ReadoutGeometry,
        candidate: TrackCandidate,
    ) -> Result<bool, VertexError> {
        if self.is_attached(graph, candidate.track)? {
            return Ok(false);
        }

        let valid = self.valid_segments(graph, candidate.track)?;
        let saved = self.fit_state();
        self.assigned.push((candidate, valid.first().map_or(0, |&(i, _)| i)));

        let accepted = match self.assigned.len() {
            1 => !valid.is_empty(),
            2 => self.admit_pair(graph, readout, &valid)?,
            _ => self.admit_next(graph, readout, &valid)?,
        };

        if !accepted {
            self.restore(saved);
        }
        Ok(accepted)
    }

    /// Choose segments of both tracks of a pair.
    ///
    /// Candidate pairs are ranked by the 2D distance of the center to the
    /// segments. A closer pair replaces the current best unless its
    /// combined length is much shorter relative to the distance gained.
    fn admit_pair(
        &mut self,
        graph: &TrackGraph,
        readout: &dyn ReadoutGeometry,
        valid_new: &[(usize, f64)],
    ) -> Result<bool, VertexError> {
        let valid_first = self.valid_segments(graph, self.assigned[0].0.track)?;
        let max_dist = self.config.max_dist_to_track;

        let mut best: Option<(usize, usize)> = None;
        let mut d_best = max_dist;
        let mut length_best = 0.0;
        for &(m, length_m) in &valid_first {
            self.assigned[0].1 = m;
            for &(n, length_n) in valid_new {
                self.assigned[1].1 = n;
                if self.fit(graph)?.is_none() {
                    continue;
                }

                let d = self.compute_mse_2d(graph, readout)?.sqrt();
                if d < d_best {
                    let gain = (d_best - d) / d_best;
                    if length_m + length_n > 0.8 * gain * length_best {
                        best = Some((m, n));
                        d_best = d;
                        length_best = length_m + length_n;
                    }
                }
            }
        }

        let Some((m, n)) = best else {
            return Ok(false);
        };
        self.assigned[0].1 = m;
        self.assigned[1].1 = n;
        self.mse = self.compute(graph)?;
        self.mse_2d = self.compute_mse_2d(graph, readout)?;
        Ok(true)
    }

    /// Choose the segment of the newest track against an established fit.
    fn admit_next(
        &mut self,
        graph: &TrackGraph,
        readout: &dyn ReadoutGeometry,
        valid: &[(usize, f64)],
    ) -> Result<bool, VertexError> {
        let last = self.assigned.len() - 1;
        let track = self.assigned[last].0.track;
        let max_dist = self.config.max_dist_to_track;

        let mut min_mse = max_dist * max_dist;
        let mut d_best = max_dist;
        let mut best = None;
        for &(n, _) in valid {
            self.assigned[last].1 = n;
            let Some(mse) = self.fit(graph)? else {
                continue;
            };
            if mse < min_mse {
                let seg = segment_at(graph, track, n)?;
                let d = graph.segment_distance2_to(seg, &self.center)?.sqrt();
                if d < d_best {
                    min_mse = mse;
                    d_best = d;
                    best = Some(n);
                }
            }
        }

        let Some(n) = best else {
            return Ok(false);
        };
        self.assigned[last].1 = n;
        self.mse = self.compute(graph)?;
        self.mse_2d = self.compute_mse_2d(graph, readout)?;
        Ok(true)
    }

    /// Absorb the tracks of `other`.
    ///
    /// Fails, leaving this candidate unchanged, when the centers are too far
    /// apart, `other` brings no new track, one of its new tracks is attached
    /// to a held track, or the combined fit is poor. `other` is never
    /// modified.
    pub fn merge_with(
        &mut self,
        graph: &TrackGraph,
        readout: &dyn ReadoutGeometry,
        other: &VertexCandidate,
    ) -> Result<bool, VertexError> {
        let d = dist2(&self.center, &other.center).sqrt();
        if d > self.config.merge_max_distance {
            debug!(distance = d, "merge: candidates too far apart");
            return Ok(false);
        }

        let dw = self.test(other);
        let mut incoming = Vec::new();
        for &(c, idx) in &other.assigned {
            if self.has(c.track) {
                continue;
            }
            if self.is_attached(graph, c.track)? {
                debug!("merge: track already attached to the candidate");
                return Ok(false);
            }
            incoming.push((c, idx));
        }
        if incoming.is_empty() {
            return Ok(false);
        }

        debug!(
            distance = d,
            mse_self = self.mse.sqrt(),
            mse_other = other.mse.sqrt(),
            "merge attempt"
        );

        let saved = self.fit_state();
        self.assigned.extend(incoming);
        let mse = self.compute(graph)?;
        debug!(size = self.assigned.len(), mse = mse.sqrt(), score = dw, "merged fit");

        if mse < self.config.merge_max_mse {
            self.mse = mse;
            self.mse_2d = self.compute_mse_2d(graph, readout)?;
            Ok(true)
        } else {
            self.restore(saved);
            Ok(false)
        }
    }

    fn valid_segments(&self, graph: &TrackGraph, track: TrackId) -> Result<Vec<(usize, f64)>, VertexError> {
        let segments = graph
            .track(track)
            .ok_or(GraphError::UnknownTrack(track))?
            .segments();

        let mut out = Vec::new();
        for (i, &seg) in segments.iter().enumerate() {
            let length = graph.segment_length(seg)?;
            if length >= self.config.min_segment_length {
                out.push((i, length));
            }
        }
        Ok(out)
    }

    fn segment_direction(&self, graph: &TrackGraph, track: TrackId, index: usize) -> Result<Vector3<f64>, VertexError> {
        let (p0, p1) = graph.segment_endpoints(segment_at(graph, track, index)?)?;
        Ok((p1 - p0).try_normalize(f64::EPSILON).unwrap_or_else(Vector3::zeros))
    }

    fn fit_state(&self) -> FitState {
        FitState {
            assigned: self.assigned.clone(),
            center: self.center,
            error_weights: self.error_weights,
            mse: self.mse,
            mse_2d: self.mse_2d,
        }
    }

    fn restore(&mut self, state: FitState) {
        self.assigned = state.assigned;
        self.center = state.center;
        self.error_weights = state.error_weights;
        self.mse = state.mse;
        self.mse_2d = state.mse_2d;
    }

    // ========================================================================
    // COMMIT
    // ========================================================================

    /// Rewire the graph so all held tracks meet at one node, then re-tune
    /// the resulting tree.
    ///
    /// Held tracks move from `tracks_src` to `tracks_out`; track pieces
    /// created by splitting are appended to `tracks_out` with the key of the
    /// track they came from. If the commit is discarded, or an error is
    /// returned, `graph`, `tracks_out` and `tracks_src` are restored to their
    /// state before the call.
    ///
    /// The candidate is consumed:
    ///
    /// ```compile_fail
    /// use trackvtx_core::{ChordResidualTuner, TrackCandidate, TrackGraph, VertexCandidate};
    ///
    /// fn commit_twice(
    ///     candidate: VertexCandidate,
    ///     graph: &mut TrackGraph,
    ///     out: &mut Vec<TrackCandidate>,
    ///     src: &mut Vec<TrackCandidate>,
    /// ) {
    ///     let mut tuner = ChordResidualTuner::default();
    ///     let _ = candidate.join_tracks(graph, &mut tuner, out, src);
    ///     let _ = candidate.join_tracks(graph, &mut tuner, out, src);
    /// }
    /// ```
    pub fn join_tracks(
        self,
        graph: &mut TrackGraph,
        tuner: &mut dyn TreeTuner,
        tracks_out: &mut Vec<TrackCandidate>,
        tracks_src: &mut Vec<TrackCandidate>,
    ) -> Result<JoinOutcome, VertexError> {
        debug!(
            tracks = self.assigned.len(),
            x = self.center.x,
            y = self.center.y,
            z = self.center.z,
            "join tracks"
        );

        let graph_before = graph.clone();
        let out_before = tracks_out.clone();
        let src_before = tracks_src.clone();

        let result = self.rewire(graph, tuner, tracks_out, tracks_src);
        if !matches!(result, Ok(JoinOutcome::Committed(_))) {
            *graph = graph_before;
            *tracks_out = out_before;
            *tracks_src = src_before;
        }
        result
    }

    fn rewire(
        &self,
        graph: &mut TrackGraph,
        tuner: &mut dyn TreeTuner,
        tracks_out: &mut Vec<TrackCandidate>,
        tracks_src: &mut Vec<TrackCandidate>,
    ) -> Result<JoinOutcome, VertexError> {
        for (c, _) in &self.assigned {
            if let Some(pos) = tracks_src.iter().position(|t| t.track == c.track) {
                tracks_out.push(tracks_src.remove(pos));
            }
        }

        let tol = self.config.min_dist_to_node;
        let center = self.center;
        let mut anchor: Option<NodeId> = None;
        let mut has_inner_center = false;
        let mut joined = 0usize;

        for (cand, idx) in &self.assigned {
            let track = cand.track;
            let proj = project_center(graph, track, *idx, &center)?;
            let node_count = graph.track_nodes(track)?.len();
            let f = proj.fraction;
            let ds = proj.length;

            if proj.index == 0 && f * ds <= tol {
                match anchor {
                    None => {
                        debug!("new center at track front");
                        let front = graph.front(track)?;
                        graph.set_point(front, center)?;
                        anchor = Some(front);
                        joined += 1;
                    }
                    Some(vtx) => {
                        debug!("attach track front to center");
                        if graph.attach_to(track, vtx)? {
                            joined += 1;
                        }
                    }
                }
            } else if proj.index + 2 == node_count && (1.0 - f) * ds <= tol {
                match anchor {
                    None => {
                        let vtx = if graph.flip(track)? {
                            debug!("flip track to make new center");
                            graph.front(track)?
                        } else {
                            debug!("new center at track back");
                            graph.back(track)?
                        };
                        graph.set_point(vtx, center)?;
                        anchor = Some(vtx);
                        joined += 1;
                    }
                    Some(vtx) => {
                        let vtx_has_prev = graph.node(vtx).ok_or(GraphError::UnknownNode(vtx))?.prev().is_some();
                        let attached = if vtx_has_prev && graph.can_flip(track)? {
                            debug!("flip track to attach to inner center");
                            graph.flip(track)?;
                            graph.attach_to(track, vtx)?
                        } else {
                            debug!("attach track back to center");
                            graph.attach_back_to(track, vtx)?
                        };
                        if attached {
                            joined += 1;
                        }
                    }
                }
            } else {
                let can_flip_prev = match anchor {
                    Some(vtx) => parent_can_flip(graph, vtx)?,
                    None => true,
                };

                if has_inner_center || !can_flip_prev {
                    debug!("split track at center");
                    let at = place_center(graph, track, &proj, &center, tol)?;
                    if let Some(head) = graph.split(track, at)? {
                        tracks_out.push(TrackCandidate::new(head, cand.key));
                        match anchor {
                            None => {
                                anchor = Some(graph.front(track)?);
                                joined += 2;
                            }
                            Some(vtx) => {
                                if graph.attach_to(track, vtx)? {
                                    joined += 2;
                                }
                            }
                        }
                    }
                } else {
                    debug!("inner center");
                    has_inner_center = true;
                    let at = place_center(graph, track, &proj, &center, tol)?;
                    let inner = graph.track_nodes(track)?[at];
                    if let Some(vtx) = anchor {
                        rehome_branches(graph, vtx, inner)?;
                    }
                    anchor = Some(inner);
                    joined += 1;
                }
            }
        }

        let Some(vtx) = anchor else {
            error!("Cannot create common vertex");
            return Ok(JoinOutcome::Discarded(JoinFailure::NoAnchor));
        };

        let root = graph.node_root(vtx)?;
        let (no_loops, tree) = graph.tree_branches(root)?;
        if !no_loops {
            error!("Loops in the vertex tree");
            return Ok(JoinOutcome::Discarded(JoinFailure::Loops));
        }
        if joined < 2 {
            debug!(joined, "too few tracks joined at the vertex");
            return Ok(JoinOutcome::Discarded(JoinFailure::TooFewJoined { joined }));
        }

        let center = graph.point(vtx)?;
        let score = tuner.tune_full_tree(graph, root);
        if !is_converged(score) {
            warn!(score, "tree tuning diverged, vertex discarded");
            return Ok(JoinOutcome::Discarded(JoinFailure::Diverged { score }));
        }

        debug!(joined, branches = tree.len(), score, "vertex committed");
        Ok(JoinOutcome::Committed(CommittedVertex {
            anchor: vtx,
            center,
            tracks: self.assigned.iter().map(|(c, _)| *c).collect(),
            joined,
            tree,
            tune_score: score,
        }))
    }
}

// ============================================================================
// COMMIT HELPERS
// ============================================================================

fn segment_at(graph: &TrackGraph, track: TrackId, index: usize) -> Result<SegmentId, VertexError> {
    graph
        .track(track)
        .ok_or(GraphError::UnknownTrack(track))?
        .segments()
        .get(index)
        .copied()
        .ok_or(VertexError::SegmentIndex { track, index })
}

fn project_center(
    graph: &TrackGraph,
    track: TrackId,
    index: usize,
    center: &Vector3<f64>,
) -> Result<SegmentProjection, VertexError> {
    let nodes = graph.track_nodes(track)?;
    if index + 1 >= nodes.len() {
        return Err(VertexError::SegmentIndex { track, index });
    }
    let (n0, n1) = (nodes[index], nodes[index + 1]);
    let p0 = graph.point(n0)?;
    let p1 = graph.point(n1)?;

    Ok(SegmentProjection {
        index,
        fraction: segment_projection_fraction(center, &p0, &p1),
        length: (p1 - p0).norm(),
        dist_start: dist2(&p0, center).sqrt(),
        dist_end: dist2(&p1, center).sqrt(),
        partition_start: graph.partition(n0)?,
        partition_end: graph.partition(n1)?,
    })
}

/// Put the center on the segment: insert it as a new node when it falls
/// well inside, otherwise snap to the nearer end. Returns the node index.
fn place_center(
    graph: &mut TrackGraph,
    track: TrackId,
    proj: &SegmentProjection,
    center: &Vector3<f64>,
    tol: f64,
) -> Result<usize, VertexError> {
    let f = proj.fraction;
    if (0.0..=1.0).contains(&f) && f * proj.length > tol && (1.0 - f) * proj.length > tol {
        let partition = if f < 0.5 { proj.partition_start } else { proj.partition_end };
        graph.insert_node(track, *center, proj.index + 1, partition)?;
        Ok(proj.index + 1)
    } else if proj.dist_end < proj.dist_start {
        Ok(proj.index + 1)
    } else {
        Ok(proj.index)
    }
}

/// Whether the track entering `vtx` ends there and can be flipped away.
fn parent_can_flip(graph: &TrackGraph, vtx: NodeId) -> Result<bool, VertexError> {
    let node = graph.node(vtx).ok_or(GraphError::UnknownNode(vtx))?;
    let Some(prev) = node.prev() else {
        return Ok(true);
    };
    let parent = graph.segment(prev).ok_or(GraphError::UnknownSegment(prev))?.track();
    if graph.next_segment(parent, vtx)?.is_some() {
        return Ok(false);
    }
    Ok(graph.can_flip(parent)?)
}

/// Move every track leaving `old` so it leaves `inner` instead.
///
/// Branches are collected first, after the track entering `old` (if any)
/// has been flipped away, and only then re-attached.
fn rehome_branches(graph: &mut TrackGraph, old: NodeId, inner: NodeId) -> Result<(), VertexError> {
    let prev = graph.node(old).ok_or(GraphError::UnknownNode(old))?.prev();
    if let Some(seg) = prev {
        let parent = graph.segment(seg).ok_or(GraphError::UnknownSegment(seg))?.track();
        if !graph.flip(parent)? {
            warn!("cannot flip the track entering the previous center");
        }
    }

    let branches = graph.branches(old)?;
    for branch in branches {
        if !graph.attach_to(branch, inner)? {
            warn!("branch could not be moved to the inner center");
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
