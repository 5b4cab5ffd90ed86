//! End-to-end vertex commits on small hand-built events.

use approx::assert_relative_eq;
use nalgebra::Vector3;
use trackvtx_core::{
    ChordResidualTuner, JoinFailure, JoinOutcome, Partition, TrackCandidate, TrackGraph, TrackId, VertexCandidate,
    VertexConfig, WirePlaneGeometry,
};

fn track(graph: &mut TrackGraph, points: &[[f64; 3]]) -> TrackId {
    let points: Vec<_> = points
        .iter()
        .map(|p| (Vector3::new(p[0], p[1], p[2]), Partition::default()))
        .collect();
    graph.add_track(&points).unwrap()
}

/// Every track with its node positions, in key order.
fn layout(graph: &TrackGraph) -> Vec<(TrackId, Vec<Vector3<f64>>)> {
    let mut out: Vec<_> = graph
        .track_ids()
        .map(|t| {
            let points = graph
                .track_nodes(t)
                .unwrap()
                .iter()
                .map(|&n| graph.point(n).unwrap())
                .collect();
            (t, points)
        })
        .collect();
    out.sort_by_key(|(t, _)| *t);
    out
}

struct Event {
    graph: TrackGraph,
    src: Vec<TrackCandidate>,
    out: Vec<TrackCandidate>,
}

impl Event {
    fn new(tracks: &[&[[f64; 3]]]) -> Self {
        let mut graph = TrackGraph::new();
        let src = tracks
            .iter()
            .enumerate()
            .map(|(key, points)| TrackCandidate::new(track(&mut graph, points), key as i32))
            .collect();
        Self {
            graph,
            src,
            out: Vec::new(),
        }
    }

    fn candidate(&self, config: VertexConfig) -> VertexCandidate {
        let readout = WirePlaneGeometry::with_defaults();
        let mut candidate = VertexCandidate::new(config);
        for &c in &self.src {
            assert!(candidate.add(&self.graph, &readout, c).unwrap(), "track {} rejected", c.key);
        }
        candidate
    }
}

/// Prongs that start just off the vertex: their fronts are moved onto it, so
/// no track is split. Crossing midlines are covered by
/// `crossing_midlines_are_split_at_vertex`.
#[test]
fn star_tracks_meet_at_one_node() {
    let mut event = Event::new(&[
        &[[0.5, 0.0, 0.0], [10.5, 0.0, 0.0]],
        &[[0.0, 0.5, 0.0], [0.0, 10.5, 0.0]],
        &[[0.0, 0.0, 0.5], [0.0, 0.0, 10.5]],
    ]);
    let candidate = event.candidate(VertexConfig {
        min_segment_length: 0.0,
        ..Default::default()
    });
    let ids: Vec<TrackId> = event.src.iter().map(|c| c.track).collect();

    let mut tuner = ChordResidualTuner::default();
    let outcome = candidate
        .join_tracks(&mut event.graph, &mut tuner, &mut event.out, &mut event.src)
        .unwrap();

    let JoinOutcome::Committed(vertex) = outcome else {
        panic!("expected a committed vertex, got {outcome:?}");
    };
    assert_eq!(vertex.joined, 3);
    assert_eq!(vertex.tree.len(), 3);
    assert!(vertex.center.norm() < 1.0);

    for &t in &ids {
        assert_eq!(event.graph.front(t).unwrap(), vertex.anchor);
    }
    assert_eq!(event.graph.branches(vertex.anchor).unwrap(), ids);
    assert_eq!(event.graph.node_count(), 4);

    assert!(event.src.is_empty());
    assert_eq!(event.out.len(), 3);
}

#[test]
fn track_ending_at_vertex_is_flipped() {
    let mut event = Event::new(&[
        &[[10.0, 0.0, 0.0], [0.5, 0.0, 0.0]],
        &[[0.0, 1.0, 0.0], [0.0, 10.0, 0.0]],
        &[[0.0, 0.0, 1.0], [0.0, 0.0, 10.0]],
    ]);
    let candidate = event.candidate(VertexConfig::default());
    let first = event.src[0].track;

    let mut tuner = ChordResidualTuner::default();
    let outcome = candidate
        .join_tracks(&mut event.graph, &mut tuner, &mut event.out, &mut event.src)
        .unwrap();

    let JoinOutcome::Committed(vertex) = outcome else {
        panic!("expected a committed vertex, got {outcome:?}");
    };
    assert_eq!(event.graph.front(first).unwrap(), vertex.anchor);
    assert_relative_eq!(event.graph.point(event.graph.back(first).unwrap()).unwrap().x, 10.0);
    assert_relative_eq!(vertex.center, Vector3::zeros(), epsilon = 1e-9);
    assert_eq!(event.graph.branches(vertex.anchor).unwrap().len(), 3);
}

#[test]
fn through_going_tracks_are_split_at_inner_vertex() {
    let mut event = Event::new(&[
        &[[-10.0, 0.0, 0.0], [10.0, 0.0, 0.0]],
        &[[0.0, 1.0, 0.0], [0.0, 11.0, 0.0]],
        &[[0.0, 0.0, -10.0], [0.0, 0.0, 10.0]],
    ]);
    let candidate = event.candidate(VertexConfig::default());
    let (first, crossing) = (event.src[0].track, event.src[2].track);

    let mut tuner = ChordResidualTuner::default();
    let outcome = candidate
        .join_tracks(&mut event.graph, &mut tuner, &mut event.out, &mut event.src)
        .unwrap();

    let JoinOutcome::Committed(vertex) = outcome else {
        panic!("expected a committed vertex, got {outcome:?}");
    };
    assert_relative_eq!(vertex.center, Vector3::zeros(), epsilon = 1e-9);
    assert_eq!(vertex.joined, 4);
    assert_eq!(vertex.tree.len(), 4);

    // The first track keeps running through the vertex
    let first_nodes = event.graph.track_nodes(first).unwrap();
    assert_eq!(first_nodes.len(), 3);
    assert_eq!(first_nodes[1], vertex.anchor);

    // The crossing track was cut in two; both halves start at the vertex
    assert_eq!(event.graph.front(crossing).unwrap(), vertex.anchor);
    assert_eq!(event.out.len(), 4);
    let head = event.out[3];
    assert_eq!(head.key, 2);
    assert_eq!(event.graph.front(head.track).unwrap(), vertex.anchor);

    let anchor = event.graph.node(vertex.anchor).unwrap();
    assert!(anchor.prev().is_some());
    assert_eq!(anchor.next().len(), 4);
}

#[test]
fn single_track_commit_is_discarded_and_restored() {
    let mut event = Event::new(&[&[[0.5, 0.0, 0.0], [10.5, 0.0, 0.0]]]);
    let candidate = event.candidate(VertexConfig::default());
    let before = layout(&event.graph);
    let src_before = event.src.clone();

    let mut tuner = ChordResidualTuner::default();
    let outcome = candidate
        .join_tracks(&mut event.graph, &mut tuner, &mut event.out, &mut event.src)
        .unwrap();

    assert_eq!(outcome, JoinOutcome::Discarded(JoinFailure::TooFewJoined { joined: 1 }));
    assert_eq!(layout(&event.graph), before);
    assert_eq!(event.src, src_before);
    assert!(event.out.is_empty());
}

#[test]
fn diverged_tuning_restores_graph() {
    let mut event = Event::new(&[
        &[[-10.0, 0.0, 0.0], [10.0, 0.0, 0.0]],
        &[[0.0, 1.0, 0.0], [0.0, 11.0, 0.0]],
        &[[0.0, 0.0, -10.0], [0.0, 0.0, 10.0]],
    ]);
    let candidate = event.candidate(VertexConfig::default());
    let before = layout(&event.graph);
    let nodes_before = event.graph.node_count();
    let src_before = event.src.clone();

    let mut calls = 0;
    let mut tuner = |_: &mut TrackGraph, _: TrackId| {
        calls += 1;
        -3.0
    };
    let outcome = candidate
        .join_tracks(&mut event.graph, &mut tuner, &mut event.out, &mut event.src)
        .unwrap();

    assert_eq!(calls, 1);
    assert_eq!(outcome, JoinOutcome::Discarded(JoinFailure::Diverged { score: -3.0 }));
    assert_eq!(event.graph.track_count(), 3);
    assert_eq!(event.graph.node_count(), nodes_before);
    assert_eq!(layout(&event.graph), before);
    assert_eq!(event.src, src_before);
    assert!(event.out.is_empty());
}

#[test]
fn high_residual_still_commits() {
    let mut event = Event::new(&[
        &[[0.5, 0.0, 0.0], [10.5, 0.0, 0.0]],
        &[[0.0, 0.5, 0.0], [0.0, 10.5, 0.0]],
    ]);
    let candidate = event.candidate(VertexConfig::default());

    let mut tuner = |_: &mut TrackGraph, _: TrackId| -1.0;
    let outcome = candidate
        .join_tracks(&mut event.graph, &mut tuner, &mut event.out, &mut event.src)
        .unwrap();

    assert!(outcome.is_committed());
    assert_eq!(event.graph.track_count(), 2);
}

#[test]
fn crossing_midlines_are_split_at_vertex() {
    let mut event = Event::new(&[
        &[[-5.0, 0.0, 0.0], [5.0, 0.0, 0.0]],
        &[[0.0, -5.0, 0.0], [0.0, 5.0, 0.0]],
        &[[0.0, 0.0, -5.0], [0.0, 0.0, 5.0]],
    ]);
    let candidate = event.candidate(VertexConfig::default());

    let mut tuner = ChordResidualTuner::default();
    let outcome = candidate
        .join_tracks(&mut event.graph, &mut tuner, &mut event.out, &mut event.src)
        .unwrap();

    let JoinOutcome::Committed(vertex) = outcome else {
        panic!("expected a committed vertex, got {outcome:?}");
    };
    assert_relative_eq!(vertex.center, Vector3::zeros(), epsilon = 1e-9);
    assert_eq!(vertex.joined, 5);
    assert_eq!(vertex.tree.len(), 5);
    assert_eq!(event.graph.branches(vertex.anchor).unwrap().len(), 5);
    assert_eq!(event.out.len(), 5);
}

#[test]
fn inner_vertex_takes_over_earlier_anchor() {
    let mut event = Event::new(&[
        &[[0.5, 0.0, 0.0], [10.5, 0.0, 0.0]],
        &[[0.0, 0.5, 0.0], [0.0, 10.5, 0.0]],
        &[[0.0, 0.0, -10.0], [0.0, 0.0, 10.0]],
    ]);
    let candidate = event.candidate(VertexConfig::default());
    let (a, b, through) = (event.src[0].track, event.src[1].track, event.src[2].track);

    let mut tuner = ChordResidualTuner::default();
    let outcome = candidate
        .join_tracks(&mut event.graph, &mut tuner, &mut event.out, &mut event.src)
        .unwrap();

    let JoinOutcome::Committed(vertex) = outcome else {
        panic!("expected a committed vertex, got {outcome:?}");
    };
    assert_eq!(vertex.joined, 3);
    assert_eq!(vertex.tree.len(), 3);

    // The through-going track holds the vertex as an inner node
    let through_nodes = event.graph.track_nodes(through).unwrap();
    assert_eq!(through_nodes.len(), 3);
    assert_eq!(through_nodes[1], vertex.anchor);

    // Both prongs moved from their shared front to the inner node
    assert_eq!(event.graph.front(a).unwrap(), vertex.anchor);
    assert_eq!(event.graph.front(b).unwrap(), vertex.anchor);

    let anchor = event.graph.node(vertex.anchor).unwrap();
    assert!(anchor.prev().is_some());
    let branches = event.graph.branches(vertex.anchor).unwrap();
    assert_eq!(branches.len(), 3);
    assert!(branches.contains(&a) && branches.contains(&b) && branches.contains(&through));
}

#[test]
fn track_ending_at_inner_vertex_is_flipped_onto_it() {
    let mut event = Event::new(&[
        &[[-10.0, 0.0, 0.0], [10.0, 0.0, 0.0]],
        &[[0.0, 10.0, 0.0], [0.0, 0.5, 0.0]],
    ]);
    let candidate = event.candidate(VertexConfig::default());
    let ending = event.src[1].track;

    let mut tuner = ChordResidualTuner::default();
    let outcome = candidate
        .join_tracks(&mut event.graph, &mut tuner, &mut event.out, &mut event.src)
        .unwrap();

    let JoinOutcome::Committed(vertex) = outcome else {
        panic!("expected a committed vertex, got {outcome:?}");
    };
    assert_eq!(vertex.joined, 2);
    assert!(event.graph.node(vertex.anchor).unwrap().prev().is_some());

    // Reversed: it now leaves the vertex and ends at its old front
    assert_eq!(event.graph.front(ending).unwrap(), vertex.anchor);
    let back = event.graph.point(event.graph.back(ending).unwrap()).unwrap();
    assert_relative_eq!(back, Vector3::new(0.0, 10.0, 0.0), epsilon = 1e-9);
    assert_eq!(event.graph.branches(vertex.anchor).unwrap().len(), 2);
}

#[test]
fn track_ending_at_front_vertex_keeps_direction() {
    let mut event = Event::new(&[
        &[[0.5, 0.0, 0.0], [10.5, 0.0, 0.0]],
        &[[0.0, 10.0, 0.0], [0.0, 0.5, 0.0]],
    ]);
    let candidate = event.candidate(VertexConfig::default());
    let (prong, ending) = (event.src[0].track, event.src[1].track);

    let mut tuner = ChordResidualTuner::default();
    let outcome = candidate
        .join_tracks(&mut event.graph, &mut tuner, &mut event.out, &mut event.src)
        .unwrap();

    let JoinOutcome::Committed(vertex) = outcome else {
        panic!("expected a committed vertex, got {outcome:?}");
    };
    assert_eq!(vertex.joined, 2);
    assert_eq!(event.graph.front(prong).unwrap(), vertex.anchor);
    assert_eq!(event.graph.back(ending).unwrap(), vertex.anchor);

    let front = event.graph.point(event.graph.front(ending).unwrap()).unwrap();
    assert_relative_eq!(front, Vector3::new(0.0, 10.0, 0.0), epsilon = 1e-9);
}
