//! Integration tests for tokenflow-core.
//!
//! These tests exercise whole analysis pipelines:
//! document → graph → throughput / buffer / latency / schedule / binding.

use tokenflow_core::binding::{binding_aware_throughput, Binding, Tile};
use tokenflow_core::buffer::BufferAnalysis;
use tokenflow_core::graph::Graph;
use tokenflow_core::latency;
use tokenflow_core::rational::Fraction;
use tokenflow_core::repetition::repetition_vector;
use tokenflow_core::schedule::{build_schedule, replay_schedule};
use tokenflow_core::throughput::self_timed_throughput;

fn pair() -> Graph {
    let mut g = Graph::new("pair");
    let a = g.add_actor("a", vec![2]);
    let b = g.add_actor("b", vec![3]);
    g.connect(a, 1u64, b, 1u64, 0);
    g.connect(b, 1u64, a, 1u64, 1);
    g
}

#[test]
fn pair_end_to_end() {
    let g = pair();
    assert_eq!(repetition_vector(&g), vec![1, 1]);

    let thr = self_timed_throughput(&g).unwrap();
    assert_eq!(thr, Fraction::new(1, 5));

    let schedule = build_schedule(&g).unwrap();
    assert_eq!(schedule.period, 5);
    assert_eq!(replay_schedule(&g, &schedule).unwrap(), thr);

    let src = g.actor_by_name("a").unwrap();
    let dst = g.actor_by_name("b").unwrap();
    let lat = latency::minimal(&g, src, dst).unwrap();
    assert_eq!(lat.latency, 5);
}

#[test]
fn buffer_front_consistent_with_throughput() {
    let mut g = Graph::new("pipeline");
    let a = g.add_actor("a", vec![2]);
    let b = g.add_actor("b", vec![3]);
    g.connect(a, 1u64, b, 1u64, 0);
    g.connect(b, 1u64, a, 1u64, 3);

    let unbounded = self_timed_throughput(&g).unwrap();
    let mut analysis = BufferAnalysis::new(&g).unwrap();
    assert_eq!(analysis.max_throughput(), unbounded);

    let front = analysis.analyze(None).unwrap();
    assert!(!front.is_empty());
    assert_eq!(front.last().unwrap().throughput, unbounded.as_f64());
    for w in front.windows(2) {
        assert!(w[0].size < w[1].size);
        assert!(w[0].throughput < w[1].throughput);
    }
}

#[test]
fn serialising_actors_never_helps_throughput() {
    let g = pair();
    let auto = BufferAnalysis::new(&g).unwrap();
    let strict = BufferAnalysis::with_serialised_actors(&g).unwrap();
    assert!(strict.max_throughput() <= auto.max_throughput());
}

#[test]
fn binding_to_one_tile_matches_schedule_order() {
    let g = pair();
    let binding = Binding {
        tiles: vec![Tile {
            name: "t0".into(),
            wheel_size: 4,
            slice: 4,
            schedule: vec![0, 1],
        }],
        actor_tile: vec![Some(0), Some(0)],
    };
    let r = binding_aware_throughput(&g, &binding).unwrap();
    // Full wheel, one tile: self-timed behaviour survives the static order.
    assert_eq!(r.throughput(), Fraction::new(1, 5));
}

#[test]
fn document_pipeline() {
    use tokenflow_core::io;

    let json = r#"{
        "application": {
            "name": "pair",
            "actors": [
                {"name": "a", "profiles": [{"processor": "p", "exec_time": 2, "default": true}]},
                {"name": "b", "profiles": [{"processor": "p", "exec_time": 3, "default": true}]}
            ],
            "channels": [
                {"name": "fwd", "src": "a", "dst": "b", "src_rate": 1, "dst_rate": 1},
                {"name": "bwd", "src": "b", "dst": "a", "src_rate": 1, "dst_rate": 1,
                 "initial_tokens": 1}
            ]
        }
    }"#;
    let doc: io::Document = serde_json::from_str(json).unwrap();
    let g = io::graph_from_spec(&doc.application).unwrap();
    assert_eq!(self_timed_throughput(&g).unwrap(), Fraction::new(1, 5));

    let dot = tokenflow_core::report::dot(&g);
    assert!(dot.contains("fwd"));
}
