//! The track graph - polyline tracks as a forest of rooted trees
//!
//! Tracks are chains of nodes joined by straight segments. Tracks connect to
//! each other by sharing nodes: a track whose front node is a node of another
//! track is a *branch* of that track. Every node has at most one incoming
//! segment, so following incoming segments from any track always ends at the
//! *root* track of its tree.
//!
//! All entities live in slot-map arenas and are addressed by stable keys, so
//! restructuring (flip, split, attach) is key rewiring rather than pointer
//! surgery.

use nalgebra::Vector3;
use slotmap::{new_key_type, SlotMap};
use std::collections::HashSet;
use tracing::debug;

use crate::geometry;
use crate::readout::Partition;

new_key_type! {
    /// Key of a [`Node`] in a [`TrackGraph`].
    pub struct NodeId;

    /// Key of a [`Segment`] in a [`TrackGraph`].
    pub struct SegmentId;

    /// Key of a [`Track`] in a [`TrackGraph`].
    pub struct TrackId;
}

// ============================================================================
// ENTITIES
// ============================================================================

/// A 3D point of one or more tracks.
#[derive(Debug, Clone)]
pub struct Node {
    point: Vector3<f64>,
    partition: Partition,

    /// Incoming segment; `None` for the front node of a root track
    prev: Option<SegmentId>,

    /// Outgoing segments, possibly owned by several tracks at a branch point
    next: Vec<SegmentId>,
}

impl Node {
    fn new(point: Vector3<f64>, partition: Partition) -> Self {
        Self {
            point,
            partition,
            prev: None,
            next: Vec::new(),
        }
    }

    pub fn point(&self) -> &Vector3<f64> {
        &self.point
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn prev(&self) -> Option<SegmentId> {
        self.prev
    }

    pub fn next(&self) -> &[SegmentId] {
        &self.next
    }

    fn is_detached(&self) -> bool {
        self.prev.is_none() && self.next.is_empty()
    }
}

/// A straight edge between two consecutive nodes of a track.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    start: NodeId,
    end: NodeId,
    track: TrackId,
}

impl Segment {
    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn end(&self) -> NodeId {
        self.end
    }

    /// Track owning this segment.
    pub fn track(&self) -> TrackId {
        self.track
    }
}

/// Ordered chain of nodes; `segments[i]` links `nodes[i]` to `nodes[i + 1]`.
#[derive(Debug, Clone, Default)]
pub struct Track {
    nodes: Vec<NodeId>,
    segments: Vec<SegmentId>,
}

impl Track {
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn segments(&self) -> &[SegmentId] {
        &self.segments
    }

    pub fn front(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    pub fn back(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors raised by malformed graph access. These indicate caller bugs or a
/// corrupted graph and are not expected in normal operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("Unknown track: {0:?}")]
    UnknownTrack(TrackId),

    #[error("Unknown node: {0:?}")]
    UnknownNode(NodeId),

    #[error("Unknown segment: {0:?}")]
    UnknownSegment(SegmentId),

    #[error("Broken track: cannot resolve root of {0:?}")]
    BrokenTrack(TrackId),

    #[error("A track needs at least two nodes, got {0}")]
    TooFewNodes(usize),

    #[error("Node index {index} out of range for track with {len} nodes")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Node {0:?} has no segments attached")]
    DetachedNode(NodeId),
}

// ============================================================================
// TRACK GRAPH
// ============================================================================

/// Arena holding all nodes, segments and tracks of an event.
#[derive(Debug, Clone, Default)]
pub struct TrackGraph {
    nodes: SlotMap<NodeId, Node>,
    segments: SlotMap<SegmentId, Segment>,
    tracks: SlotMap<TrackId, Track>,
}

impl TrackGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a free-standing root track through the given points.
    pub fn add_track(&mut self, points: &[(Vector3<f64>, Partition)]) -> Result<TrackId, GraphError> {
        if points.len() < 2 {
            return Err(GraphError::TooFewNodes(points.len()));
        }

        let track_id = self.tracks.insert(Track::default());
        let nodes: Vec<NodeId> = points
            .iter()
            .map(|(point, partition)| self.nodes.insert(Node::new(*point, *partition)))
            .collect();

        let mut segments = Vec::with_capacity(nodes.len() - 1);
        for pair in nodes.windows(2) {
            let seg = self.segments.insert(Segment {
                start: pair[0],
                end: pair[1],
                track: track_id,
            });
            self.node_mut(pair[0])?.next.push(seg);
            self.node_mut(pair[1])?.prev = Some(seg);
            segments.push(seg);
        }

        *self.track_mut(track_id)? = Track { nodes, segments };
        Ok(track_id)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id)
    }

    pub fn contains_track(&self, id: TrackId) -> bool {
        self.tracks.contains_key(id)
    }

    pub fn track_ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.keys()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn track_ref(&self, id: TrackId) -> Result<&Track, GraphError> {
        self.tracks.get(id).ok_or(GraphError::UnknownTrack(id))
    }

    fn track_mut(&mut self, id: TrackId) -> Result<&mut Track, GraphError> {
        self.tracks.get_mut(id).ok_or(GraphError::UnknownTrack(id))
    }

    fn node_ref(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(id).ok_or(GraphError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes.get_mut(id).ok_or(GraphError::UnknownNode(id))
    }

    fn segment_ref(&self, id: SegmentId) -> Result<&Segment, GraphError> {
        self.segments.get(id).ok_or(GraphError::UnknownSegment(id))
    }

    fn segment_mut(&mut self, id: SegmentId) -> Result<&mut Segment, GraphError> {
        self.segments.get_mut(id).ok_or(GraphError::UnknownSegment(id))
    }

    /// Nodes of a track, front to back.
    pub fn track_nodes(&self, track: TrackId) -> Result<&[NodeId], GraphError> {
        Ok(&self.track_ref(track)?.nodes)
    }

    pub fn front(&self, track: TrackId) -> Result<NodeId, GraphError> {
        let t = self.track_ref(track)?;
        t.front().ok_or(GraphError::TooFewNodes(t.nodes.len()))
    }

    pub fn back(&self, track: TrackId) -> Result<NodeId, GraphError> {
        let t = self.track_ref(track)?;
        t.back().ok_or(GraphError::TooFewNodes(t.nodes.len()))
    }

    pub fn point(&self, node: NodeId) -> Result<Vector3<f64>, GraphError> {
        Ok(self.node_ref(node)?.point)
    }

    pub fn partition(&self, node: NodeId) -> Result<Partition, GraphError> {
        Ok(self.node_ref(node)?.partition)
    }

    pub fn set_point(&mut self, node: NodeId, point: Vector3<f64>) -> Result<(), GraphError> {
        self.node_mut(node)?.point = point;
        Ok(())
    }

    /// Segment of `track` leaving `node`, if `node` is a non-back node of it.
    pub fn next_segment(&self, track: TrackId, node: NodeId) -> Result<Option<SegmentId>, GraphError> {
        let t = self.track_ref(track)?;
        Ok(t.nodes
            .iter()
            .position(|&n| n == node)
            .and_then(|i| t.segments.get(i).copied()))
    }

    pub fn segment_endpoints(&self, seg: SegmentId) -> Result<(Vector3<f64>, Vector3<f64>), GraphError> {
        let s = self.segment_ref(seg)?;
        Ok((self.node_ref(s.start)?.point, self.node_ref(s.end)?.point))
    }

    pub fn segment_length(&self, seg: SegmentId) -> Result<f64, GraphError> {
        let (p0, p1) = self.segment_endpoints(seg)?;
        Ok((p1 - p0).norm())
    }

    /// Squared distance from `point` to the segment (clamped to its endpoints).
    pub fn segment_distance2_to(&self, seg: SegmentId, point: &Vector3<f64>) -> Result<f64, GraphError> {
        let (p0, p1) = self.segment_endpoints(seg)?;
        Ok(geometry::distance2_to_segment(point, &p0, &p1))
    }

    /// Sum of segment lengths.
    pub fn track_length(&self, track: TrackId) -> Result<f64, GraphError> {
        self.track_ref(track)?
            .segments
            .iter()
            .map(|&s| self.segment_length(s))
            .sum()
    }

    // ========================================================================
    // TREE STRUCTURE
    // ========================================================================

    /// Root track of the tree containing `track`.
    ///
    /// Several root tracks may start at the same node; the one owning that
    /// node's first outgoing segment is reported for all of them.
    ///
    /// Fails with [`GraphError::BrokenTrack`] when the walk hits a missing
    /// entity or does not terminate.
    pub fn root(&self, track: TrackId) -> Result<TrackId, GraphError> {
        let broken = GraphError::BrokenTrack(track);
        let mut current = track;

        for _ in 0..=self.tracks.len() {
            let t = self.tracks.get(current).ok_or_else(|| broken.clone())?;
            let front = t.front().ok_or_else(|| broken.clone())?;
            let node = self.nodes.get(front).ok_or_else(|| broken.clone())?;
            match node.prev {
                None => {
                    let first = node.next.first().and_then(|&seg| self.segments.get(seg));
                    return Ok(first.map_or(current, |s| s.track));
                }
                Some(seg) => {
                    current = self.segments.get(seg).ok_or_else(|| broken.clone())?.track;
                }
            }
        }
        Err(broken)
    }

    /// Root track of the tree `node` belongs to.
    pub fn node_root(&self, node: NodeId) -> Result<TrackId, GraphError> {
        let n = self.node_ref(node)?;
        let seg = n
            .prev
            .or_else(|| n.next.first().copied())
            .ok_or(GraphError::DetachedNode(node))?;
        self.root(self.segment_ref(seg)?.track)
    }

    /// Whether two tracks belong to the same tree.
    pub fn is_attached_to(&self, a: TrackId, b: TrackId) -> Result<bool, GraphError> {
        Ok(self.root(a)? == self.root(b)?)
    }

    /// Tracks with a segment leaving `node`, in attachment order.
    pub fn branches(&self, node: NodeId) -> Result<Vec<TrackId>, GraphError> {
        let mut out = Vec::new();
        for &seg in &self.node_ref(node)?.next {
            let track = self.segment_ref(seg)?.track;
            if !out.contains(&track) {
                out.push(track);
            }
        }
        Ok(out)
    }

    /// All tracks of the tree hanging from `root`, root first.
    ///
    /// The flag is `false` when a track is reached twice, i.e. the structure
    /// below `root` is not a tree.
    pub fn tree_branches(&self, root: TrackId) -> Result<(bool, Vec<TrackId>), GraphError> {
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        let mut no_loops = true;

        // A branch shares its front node with its parent; that node's other
        // outgoing segments belong to the parent's side of the tree.
        let mut stack = vec![(root, false)];
        while let Some((track, skip_first)) = stack.pop() {
            if !visited.insert(track) {
                no_loops = false;
                continue;
            }
            out.push(track);

            let nodes = &self.track_ref(track)?.nodes;
            let first = usize::from(skip_first);
            for &node in nodes.iter().skip(first) {
                for &seg in self.node_ref(node)?.next.iter().rev() {
                    let child = self.segment_ref(seg)?.track;
                    if child != track {
                        stack.push((child, true));
                    }
                }
            }
        }
        Ok((no_loops, out))
    }

    // ========================================================================
    // RESTRUCTURING
    // ========================================================================

    /// Whether `track` can be reversed.
    ///
    /// A root track can always flip. A branch can flip if it starts at the
    /// back of its parent and the parent can flip in turn; a branch starting
    /// in the middle of its parent cannot.
    pub fn can_flip(&self, track: TrackId) -> Result<bool, GraphError> {
        let mut current = track;
        for _ in 0..=self.tracks.len() {
            let front = self.front(current)?;
            match self.node_ref(front)?.prev {
                None => return Ok(true),
                Some(seg) => {
                    let parent = self.segment_ref(seg)?.track;
                    if self.next_segment(parent, front)?.is_some() {
                        return Ok(false);
                    }
                    current = parent;
                }
            }
        }
        Err(GraphError::BrokenTrack(track))
    }

    /// Reverse `track` so its back node becomes the front.
    ///
    /// Ancestors are reversed first, which re-roots the tree at `track`.
    /// Returns `false` (graph untouched) when [`can_flip`](Self::can_flip)
    /// is false.
    pub fn flip(&mut self, track: TrackId) -> Result<bool, GraphError> {
        if !self.can_flip(track)? {
            return Ok(false);
        }

        let mut chain = vec![track];
        loop {
            let last = chain[chain.len() - 1];
            match self.node_ref(self.front(last)?)?.prev {
                None => break,
                Some(seg) => chain.push(self.segment_ref(seg)?.track),
            }
        }

        for &t in chain.iter().rev() {
            self.reverse_track(t)?;
        }
        Ok(true)
    }

    /// Reverse a track whose front node has no incoming segment.
    fn reverse_track(&mut self, track: TrackId) -> Result<(), GraphError> {
        let Track { nodes, segments } = self.track_ref(track)?.clone();

        for &seg in &segments {
            let Segment { start, end, .. } = *self.segment_ref(seg)?;
            self.node_mut(start)?.next.retain(|&s| s != seg);
            self.node_mut(end)?.prev = None;
        }

        let nodes: Vec<NodeId> = nodes.into_iter().rev().collect();
        let segments: Vec<SegmentId> = segments.into_iter().rev().collect();

        for (i, &seg) in segments.iter().enumerate() {
            let (start, end) = (nodes[i], nodes[i + 1]);
            let s = self.segment_mut(seg)?;
            s.start = start;
            s.end = end;
            self.node_mut(start)?.next.push(seg);
            self.node_mut(end)?.prev = Some(seg);
        }

        *self.track_mut(track)? = Track { nodes, segments };
        Ok(())
    }

    /// Insert a new node at position `index`, splitting segment `index - 1`.
    pub fn insert_node(
        &mut self,
        track: TrackId,
        point: Vector3<f64>,
        index: usize,
        partition: Partition,
    ) -> Result<NodeId, GraphError> {
        let len = self.track_ref(track)?.nodes.len();
        if index == 0 || index >= len {
            return Err(GraphError::IndexOutOfRange { index, len });
        }

        let split_seg = self.track_ref(track)?.segments[index - 1];
        let old_end = self.segment_ref(split_seg)?.end;

        let node = self.nodes.insert(Node::new(point, partition));
        let new_seg = self.segments.insert(Segment {
            start: node,
            end: old_end,
            track,
        });

        self.segment_mut(split_seg)?.end = node;
        {
            let n = self.node_mut(node)?;
            n.prev = Some(split_seg);
            n.next.push(new_seg);
        }
        self.node_mut(old_end)?.prev = Some(new_seg);

        let t = self.track_mut(track)?;
        t.nodes.insert(index, node);
        t.segments.insert(index, new_seg);
        Ok(node)
    }

    /// Split `track` at node `index`.
    ///
    /// Nodes `0..=index` move to a new track which is returned; `track` keeps
    /// nodes `index..` and stays attached to the new track through the shared
    /// node. Returns `None` when `index` is an endpoint.
    pub fn split(&mut self, track: TrackId, index: usize) -> Result<Option<TrackId>, GraphError> {
        let t = self.track_ref(track)?;
        if index == 0 || index + 1 >= t.nodes.len() {
            return Ok(None);
        }

        let head = Track {
            nodes: t.nodes[..=index].to_vec(),
            segments: t.segments[..index].to_vec(),
        };
        let moved = head.segments.clone();
        let head_id = self.tracks.insert(head);

        for seg in moved {
            self.segment_mut(seg)?.track = head_id;
        }

        let t = self.track_mut(track)?;
        t.nodes.drain(..index);
        t.segments.drain(..index);
        Ok(Some(head_id))
    }

    /// Make `vtx` the front node of `track`.
    ///
    /// The old front node is merged into `vtx`: every track starting there
    /// now starts at `vtx`. If the old front was the back of another track,
    /// that track is flipped away or re-ended at `vtx`. Fails (returns
    /// `false`, graph untouched) when `vtx` already belongs to the tree of
    /// `track`, is detached, or the structure around the old front cannot be
    /// rearranged.
    pub fn attach_to(&mut self, track: TrackId, vtx: NodeId) -> Result<bool, GraphError> {
        let old = self.front(track)?;
        if old == vtx {
            return Ok(true);
        }
        if !self.can_join_trees(track, vtx)? {
            return Ok(false);
        }

        if let Some(prev_seg) = self.node_ref(old)?.prev {
            let parent = self.segment_ref(prev_seg)?.track;
            if self.next_segment(parent, old)?.is_some() {
                debug!("attach_to: track starts inside its parent");
                return Ok(false);
            }
            if self.can_flip(parent)? {
                self.flip(parent)?;
            } else if self.release_prev(vtx)? {
                debug!("attach_to: reconnect parent back to vertex");
                self.reconnect_back(parent, old, vtx)?;
            } else {
                return Ok(false);
            }
        }

        self.merge_node_into(old, vtx)?;
        Ok(true)
    }

    /// Make `vtx` the back node of `track`, keeping its orientation.
    ///
    /// Branches leaving the old back node are moved to `vtx`. If `vtx` is the
    /// back node of another track, that track is flipped so `vtx` gains no
    /// second incoming segment.
    pub fn attach_back_to(&mut self, track: TrackId, vtx: NodeId) -> Result<bool, GraphError> {
        let old = self.back(track)?;
        if old == vtx {
            return Ok(true);
        }
        if !self.can_join_trees(track, vtx)? {
            return Ok(false);
        }
        if !self.release_prev(vtx)? {
            debug!("attach_back_to: vertex is an inner node");
            return Ok(false);
        }

        self.reconnect_back(track, old, vtx)?;
        self.merge_node_into(old, vtx)?;
        Ok(true)
    }

    /// `vtx` is linked into some tree and that tree is not the one of `track`.
    fn can_join_trees(&self, track: TrackId, vtx: NodeId) -> Result<bool, GraphError> {
        if self.node_ref(vtx)?.is_detached() {
            return Ok(false);
        }
        if self.root(track)? == self.node_root(vtx)? {
            debug!("refusing to attach within one tree");
            return Ok(false);
        }
        Ok(true)
    }

    /// Ensure `node` has no incoming segment, flipping its track if needed.
    fn release_prev(&mut self, node: NodeId) -> Result<bool, GraphError> {
        let Some(seg) = self.node_ref(node)?.prev else {
            return Ok(true);
        };
        let owner = self.segment_ref(seg)?.track;
        if self.next_segment(owner, node)?.is_some() {
            return Ok(false);
        }
        self.flip(owner)
    }

    /// Re-end `track` (whose back node is `old`) at `vtx`.
    fn reconnect_back(&mut self, track: TrackId, old: NodeId, vtx: NodeId) -> Result<(), GraphError> {
        let last = *self
            .track_ref(track)?
            .segments
            .last()
            .ok_or(GraphError::TooFewNodes(1))?;

        self.segment_mut(last)?.end = vtx;
        self.node_mut(vtx)?.prev = Some(last);
        self.node_mut(old)?.prev = None;
        if let Some(back) = self.track_mut(track)?.nodes.last_mut() {
            *back = vtx;
        }
        Ok(())
    }

    /// Move every outgoing segment of `old` to `vtx`, then drop `old` if it
    /// is no longer linked.
    fn merge_node_into(&mut self, old: NodeId, vtx: NodeId) -> Result<(), GraphError> {
        let outgoing = std::mem::take(&mut self.node_mut(old)?.next);
        for seg in outgoing {
            let owner = {
                let s = self.segment_mut(seg)?;
                s.start = vtx;
                s.track
            };
            for n in self.track_mut(owner)?.nodes.iter_mut() {
                if *n == old {
                    *n = vtx;
                }
            }
            self.node_mut(vtx)?.next.push(seg);
        }

        if self.node_ref(old)?.is_detached() {
            self.nodes.remove(old);
        }
        Ok(())
    }

    /// Delete a track with its segments and the nodes left unlinked.
    ///
    /// Branches hanging from the removed track become roots of their own
    /// trees.
    pub fn remove_track(&mut self, track: TrackId) -> Result<(), GraphError> {
        let t = self.tracks.remove(track).ok_or(GraphError::UnknownTrack(track))?;

        for seg in t.segments {
            if let Some(s) = self.segments.remove(seg) {
                if let Some(n) = self.nodes.get_mut(s.start) {
                    n.next.retain(|&x| x != seg);
                }
                if let Some(n) = self.nodes.get_mut(s.end) {
                    if n.prev == Some(seg) {
                        n.prev = None;
                    }
                }
            }
        }

        for node in t.nodes {
            if self.nodes.get(node).is_some_and(Node::is_detached) {
                self.nodes.remove(node);
            }
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p(x: f64, y: f64, z: f64) -> (Vector3<f64>, Partition) {
        (Vector3::new(x, y, z), Partition::default())
    }

    fn line_x(graph: &mut TrackGraph, n: usize) -> TrackId {
        let points: Vec<_> = (0..n).map(|i| p(i as f64 * 10.0, 0.0, 0.0)).collect();
        graph.add_track(&points).unwrap()
    }

    #[test]
    fn test_add_track_links_nodes() {
        let mut graph = TrackGraph::new();
        let t = line_x(&mut graph, 3);

        let track = graph.track(t).unwrap();
        assert_eq!(track.nodes().len(), 3);
        assert_eq!(track.segments().len(), 2);
        assert!(graph.node(track.nodes()[0]).unwrap().prev().is_none());
        assert_eq!(graph.node(track.nodes()[1]).unwrap().prev(), Some(track.segments()[0]));
        assert_relative_eq!(graph.track_length(t).unwrap(), 20.0);
        assert_eq!(graph.root(t).unwrap(), t);
    }

    #[test]
    fn test_add_track_needs_two_points() {
        let mut graph = TrackGraph::new();
        assert_eq!(graph.add_track(&[p(0.0, 0.0, 0.0)]), Err(GraphError::TooFewNodes(1)));
    }

    #[test]
    fn test_attach_to_merges_front_node() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 3);
        let b = graph.add_track(&[p(11.0, 1.0, 0.0), p(10.0, 20.0, 0.0)]).unwrap();
        let inner = graph.track_nodes(a).unwrap()[1];
        let nodes_before = graph.node_count();

        assert!(graph.attach_to(b, inner).unwrap());

        assert_eq!(graph.front(b).unwrap(), inner);
        assert_eq!(graph.node_count(), nodes_before - 1);
        assert_eq!(graph.root(b).unwrap(), a);
        assert_eq!(graph.branches(inner).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_attach_within_one_tree_is_refused() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 3);
        let b = graph.add_track(&[p(10.0, 0.0, 0.0), p(10.0, 20.0, 0.0)]).unwrap();
        let inner = graph.track_nodes(a).unwrap()[1];
        assert!(graph.attach_to(b, inner).unwrap());

        // Hooking a's front onto b's back would close a loop
        let b_back = graph.back(b).unwrap();
        assert!(!graph.attach_to(a, b_back).unwrap());
        assert!(!graph.attach_back_to(a, b_back).unwrap());
        assert_eq!(graph.root(b).unwrap(), a);
    }

    #[test]
    fn test_is_attached_through_branch_nodes() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 3);
        let b = graph.add_track(&[p(10.0, 0.0, 0.0), p(10.0, 10.0, 0.0), p(10.0, 20.0, 0.0)]).unwrap();
        let c = graph.add_track(&[p(10.0, 10.0, 0.0), p(20.0, 10.0, 0.0)]).unwrap();
        let d = line_x(&mut graph, 2);

        let a_inner = graph.track_nodes(a).unwrap()[1];
        let b_inner = graph.track_nodes(b).unwrap()[1];
        assert!(graph.attach_to(b, a_inner).unwrap());
        assert!(graph.attach_to(c, b_inner).unwrap());

        assert!(graph.is_attached_to(c, a).unwrap());
        assert!(graph.is_attached_to(a, c).unwrap());
        assert!(!graph.is_attached_to(c, d).unwrap());
        assert!(!graph.is_attached_to(d, c).unwrap());
    }

    #[test]
    fn test_flip_root_track() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 3);
        let nodes: Vec<_> = graph.track_nodes(a).unwrap().to_vec();

        assert!(graph.flip(a).unwrap());

        let flipped = graph.track_nodes(a).unwrap().to_vec();
        assert_eq!(flipped, nodes.iter().rev().copied().collect::<Vec<_>>());
        assert!(graph.node(flipped[0]).unwrap().prev().is_none());
        let (p0, p1) = graph.segment_endpoints(graph.track(a).unwrap().segments()[0]).unwrap();
        assert_relative_eq!(p0.x, 20.0);
        assert_relative_eq!(p1.x, 10.0);
    }

    #[test]
    fn test_flip_branch_at_parent_back_reroots_tree() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 3);
        let b = graph.add_track(&[p(20.0, 0.0, 0.0), p(20.0, 10.0, 0.0)]).unwrap();
        let a_back = graph.back(a).unwrap();
        assert!(graph.attach_to(b, a_back).unwrap());
        assert!(graph.can_flip(b).unwrap());

        assert!(graph.flip(b).unwrap());

        assert_eq!(graph.root(a).unwrap(), b);
        assert_eq!(graph.back(b).unwrap(), a_back);
        assert_eq!(graph.front(a).unwrap(), a_back);
        let (no_loops, tree) = graph.tree_branches(b).unwrap();
        assert!(no_loops);
        assert_eq!(tree, vec![b, a]);
    }

    #[test]
    fn test_branch_inside_parent_cannot_flip() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 3);
        let b = graph.add_track(&[p(10.0, 0.0, 0.0), p(10.0, 10.0, 0.0)]).unwrap();
        let a_inner = graph.track_nodes(a).unwrap()[1];
        assert!(graph.attach_to(b, a_inner).unwrap());

        assert!(!graph.can_flip(b).unwrap());
        assert!(!graph.flip(b).unwrap());
        assert_eq!(graph.front(b).unwrap(), a_inner);
    }

    #[test]
    fn test_insert_node_and_split() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 3);
        let mid = graph
            .insert_node(a, Vector3::new(5.0, 0.0, 0.0), 1, Partition::default())
            .unwrap();
        assert_eq!(graph.track_nodes(a).unwrap().len(), 4);
        assert_relative_eq!(graph.track_length(a).unwrap(), 20.0);

        let head = graph.split(a, 1).unwrap().expect("inner index splits");

        assert_eq!(graph.back(head).unwrap(), mid);
        assert_eq!(graph.front(a).unwrap(), mid);
        assert_eq!(graph.track_nodes(head).unwrap().len(), 2);
        assert_eq!(graph.track_nodes(a).unwrap().len(), 3);
        assert_eq!(graph.root(a).unwrap(), head);
        assert_relative_eq!(graph.track_length(head).unwrap(), 5.0);
        assert_relative_eq!(graph.track_length(a).unwrap(), 15.0);
    }

    #[test]
    fn test_split_at_endpoint_is_noop() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 3);
        assert_eq!(graph.split(a, 0).unwrap(), None);
        assert_eq!(graph.split(a, 2).unwrap(), None);
        assert!(graph.insert_node(a, Vector3::zeros(), 0, Partition::default()).is_err());
    }

    #[test]
    fn test_attach_back_to_moves_back_node() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 2);
        let b = graph.add_track(&[p(0.0, 10.0, 0.0), p(1.0, 1.0, 0.0)]).unwrap();
        let a_front = graph.front(a).unwrap();

        assert!(graph.attach_back_to(b, a_front).unwrap());

        assert_eq!(graph.back(b).unwrap(), a_front);
        assert_eq!(graph.root(a).unwrap(), b);
        assert_eq!(graph.front(a).unwrap(), a_front);
    }

    #[test]
    fn test_attach_back_to_flips_owner_of_vertex() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 2);
        let b = graph.add_track(&[p(10.0, 10.0, 0.0), p(10.0, 1.0, 0.0)]).unwrap();
        let a_back = graph.back(a).unwrap();

        assert!(graph.attach_back_to(b, a_back).unwrap());

        // a was flipped so the shared node has a single incoming segment
        assert_eq!(graph.front(a).unwrap(), a_back);
        assert_eq!(graph.back(b).unwrap(), a_back);
        assert_eq!(graph.root(a).unwrap(), b);
    }

    #[test]
    fn test_tree_branches_with_shared_front() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 2);
        let b = graph.add_track(&[p(0.0, 1.0, 0.0), p(0.0, 10.0, 0.0)]).unwrap();
        let c = graph.add_track(&[p(0.0, 0.0, 1.0), p(0.0, 0.0, 10.0)]).unwrap();
        let hub = graph.front(a).unwrap();
        assert!(graph.attach_to(b, hub).unwrap());
        assert!(graph.attach_to(c, hub).unwrap());

        let (no_loops, tree) = graph.tree_branches(a).unwrap();
        assert!(no_loops);
        assert_eq!(tree.len(), 3);
        assert_eq!(graph.branches(hub).unwrap(), vec![a, b, c]);

        // Tracks starting at the same root node share one root
        assert_eq!(graph.root(b).unwrap(), a);
        assert!(graph.is_attached_to(b, c).unwrap());
    }

    #[test]
    fn test_remove_track_frees_nodes_and_detaches_branches() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 3);
        let b = graph.add_track(&[p(10.0, 0.0, 0.0), p(10.0, 10.0, 0.0)]).unwrap();
        let inner = graph.track_nodes(a).unwrap()[1];
        assert!(graph.attach_to(b, inner).unwrap());

        graph.remove_track(a).unwrap();

        assert!(!graph.contains_track(a));
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.root(b).unwrap(), b);
        assert!(graph.node(inner).unwrap().prev().is_none());
    }

    #[test]
    fn test_root_of_unknown_track_is_broken() {
        let mut graph = TrackGraph::new();
        let a = line_x(&mut graph, 2);
        graph.remove_track(a).unwrap();

        assert_eq!(graph.root(a), Err(GraphError::BrokenTrack(a)));
    }
}
