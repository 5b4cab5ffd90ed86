//! trackvtx core - vertex finding on 3D polyline track graphs
//!
//! Reconstructed particle tracks are polylines. Tracks produced in one
//! interaction should meet at a common point (the vertex). This library:
//! 1. **Stores tracks as a graph**: tracks share nodes and form rooted trees
//!    that can be flipped, split and re-attached ([`track_graph`])
//! 2. **Fits vertex candidates**: weighted least-squares intersection of track
//!    segments with a readout-plane distance check ([`vertex`])
//! 3. **Commits vertices**: rewires the graph so all tracks of a candidate
//!    meet at one node, then re-tunes the resulting tree ([`tree_tuning`])

pub mod geometry;
pub mod readout;
pub mod track_graph;
pub mod tree_tuning;
pub mod vertex;

// Re-export key types for convenience
pub use readout::{Partition, ReadoutConfig, ReadoutGeometry, View, WirePlaneGeometry};
pub use track_graph::{GraphError, NodeId, SegmentId, TrackGraph, TrackId};
pub use tree_tuning::{ChordResidualTuner, TreeTuner, TunerConfig};
pub use vertex::{
    Axis, CommittedVertex, JoinFailure, JoinOutcome, TrackCandidate, VertexCandidate, VertexConfig, VertexError,
};
