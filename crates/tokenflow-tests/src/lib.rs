//! Reference graph battery and result-invariant checks.
//!
//! The battery holds a set of small dataflow graphs with known analysis
//! results, plus checks for the invariants every analysis must keep:
//! consistency of the repetition vector, Pareto minimality and monotonicity
//! of the buffer front, soundness of static-periodic schedules, exactness
//! of the NoC reserve/release protocol, and the throughput scaling laws.
//!
//! The CLI `check` command runs the whole battery; individual checks are
//! plain functions so integration tests can pick what they need.

use tokenflow_core::binding::tdma_completion_time;
use tokenflow_core::buffer::BufferAnalysis;
use tokenflow_core::graph::Graph;
use tokenflow_core::noc::{
    InterconnectGraph, MessageSpec, NocProblem, NocScheduler, Strategy,
};
use tokenflow_core::rational::Fraction;
use tokenflow_core::repetition::repetition_vector;
use tokenflow_core::schedule::{build_schedule, replay_schedule};
use tokenflow_core::throughput::self_timed_throughput;

/// Outcome of one battery check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub details: String,
}

impl CheckResult {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        CheckResult {
            name,
            passed: true,
            details: details.into(),
        }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        CheckResult {
            name,
            passed: false,
            details: details.into(),
        }
    }
}

// ---------------------------------------------------------------------
// Reference graphs
// ---------------------------------------------------------------------

/// Two actors on a cycle with one circulating token; throughput 1/5.
pub fn two_actor_cycle() -> Graph {
    let mut g = Graph::new("two_actor_cycle");
    let a = g.add_actor("a", vec![2]);
    let b = g.add_actor("b", vec![3]);
    g.connect(a, 1u64, b, 1u64, 0);
    g.connect(b, 1u64, a, 1u64, 1);
    g
}

/// One actor serialised by a unit self-loop; throughput 1/4.
pub fn serialised_actor() -> Graph {
    let mut g = Graph::new("serialised_actor");
    let x = g.add_actor("x", vec![4]);
    g.add_self_loop(x, 1);
    g
}

/// Multirate triangle; repetition vector (2, 1, 2), throughput 1/4.
pub fn multirate_triangle() -> Graph {
    let mut g = Graph::new("multirate_triangle");
    let a = g.add_actor("a", vec![1]);
    let b = g.add_actor("b", vec![2]);
    let c = g.add_actor("c", vec![1]);
    g.connect(a, 1u64, b, 2u64, 0);
    g.connect(b, 2u64, c, 1u64, 0);
    g.connect(c, 1u64, a, 1u64, 2);
    g
}

/// Producer/consumer with three circulating tokens; the forward buffer
/// capacity trades storage for throughput.
pub fn pipelined_pair() -> Graph {
    let mut g = Graph::new("pipelined_pair");
    let a = g.add_actor("a", vec![2]);
    let b = g.add_actor("b", vec![3]);
    g.connect(a, 1u64, b, 1u64, 0);
    g.connect(b, 1u64, a, 1u64, 3);
    g
}

/// CSDF pair: the producer cycles through rates [1,2,1]; q = (3, 1).
pub fn csdf_pair() -> Graph {
    let mut g = Graph::new("csdf_pair");
    let a = g.add_actor("a", vec![1]);
    let b = g.add_actor("b", vec![2]);
    g.connect(a, vec![1, 2, 1], b, 4u64, 0);
    g.connect(b, 4u64, a, vec![1, 2, 1], 4);
    g
}

/// All reference graphs with their expected self-timed throughput (where
/// the value is pinned down).
pub fn reference_graphs() -> Vec<(Graph, Option<Fraction>)> {
    vec![
        (two_actor_cycle(), Some(Fraction::new(1, 5))),
        (serialised_actor(), Some(Fraction::new(1, 4))),
        (multirate_triangle(), Some(Fraction::new(1, 4))),
        (pipelined_pair(), Some(Fraction::new(3, 5))),
        (csdf_pair(), None),
    ]
}

// ---------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------

/// `q[a] > 0` and `q[src]·p = q[dst]·c` on every channel.
pub fn check_consistency(g: &Graph) -> CheckResult {
    let name = "consistency";
    let q = repetition_vector(g);
    if q.iter().any(|&x| x == 0) {
        return CheckResult::fail(name, format!("{}: zero repetition entry", g.name));
    }
    for c in g.channels() {
        let src = g.src_actor(c.id);
        let dst = g.dst_actor(c.id);
        let phases_src = g.phase_count(src) as u64;
        let phases_dst = g.phase_count(dst) as u64;
        let produced = q[src.0] / phases_src * g.src_rate(c.id).cycle_total();
        let consumed = q[dst.0] / phases_dst * g.dst_rate(c.id).cycle_total();
        if produced != consumed {
            return CheckResult::fail(
                name,
                format!("{}: channel '{}' unbalanced", g.name, c.name),
            );
        }
    }
    CheckResult::pass(name, format!("{}: q = {:?}", g.name, q))
}

/// The reference throughputs reproduce exactly.
pub fn check_reference_throughput() -> CheckResult {
    let name = "reference_throughput";
    for (g, expected) in reference_graphs() {
        let thr = match self_timed_throughput(&g) {
            Ok(t) => t,
            Err(e) => return CheckResult::fail(name, format!("{}: {}", g.name, e)),
        };
        if let Some(want) = expected {
            if thr != want {
                return CheckResult::fail(
                    name,
                    format!("{}: got {} expected {}", g.name, thr, want),
                );
            }
        }
    }
    CheckResult::pass(name, "all reference throughputs reproduced")
}

/// Doubling every execution time halves the throughput exactly.
pub fn check_time_scaling() -> CheckResult {
    let name = "time_scaling";
    let base = two_actor_cycle();
    let mut doubled = Graph::new("doubled");
    let a = doubled.add_actor("a", vec![4]);
    let b = doubled.add_actor("b", vec![6]);
    doubled.connect(a, 1u64, b, 1u64, 0);
    doubled.connect(b, 1u64, a, 1u64, 1);

    let t1 = self_timed_throughput(&base).unwrap_or(Fraction::new(0, 1));
    let t2 = self_timed_throughput(&doubled).unwrap_or(Fraction::new(0, 1));
    if t1 == Fraction::new(1, 5) && t2 == Fraction::new(1, 10) {
        CheckResult::pass(name, "doubling execution times halved throughput")
    } else {
        CheckResult::fail(name, format!("got {} and {}", t1, t2))
    }
}

/// A unit self-loop on every actor can only reduce throughput.
pub fn check_serialisation_law(g: &Graph) -> CheckResult {
    let name = "serialisation_law";
    let free = match self_timed_throughput(g) {
        Ok(t) => t,
        Err(e) => return CheckResult::fail(name, format!("{}: {}", g.name, e)),
    };
    let mut strict = g.clone();
    for a in strict.actor_ids().collect::<Vec<_>>() {
        strict.add_self_loop(a, 1);
    }
    let serial = match self_timed_throughput(&strict) {
        Ok(t) => t,
        Err(e) => return CheckResult::fail(name, format!("{}: {}", g.name, e)),
    };
    if serial <= free {
        CheckResult::pass(name, format!("{}: {} <= {}", g.name, serial, free))
    } else {
        CheckResult::fail(name, format!("{}: {} > {}", g.name, serial, free))
    }
}

/// The buffer front is strictly increasing in both coordinates and ends at
/// the unbounded maximum.
pub fn check_pareto_front(g: &Graph) -> CheckResult {
    let name = "pareto_front";
    let mut analysis = match BufferAnalysis::new(g) {
        Ok(a) => a,
        Err(e) => return CheckResult::fail(name, format!("{}: {}", g.name, e)),
    };
    let max = analysis.max_throughput();
    let front = match analysis.analyze(None) {
        Ok(f) => f,
        Err(e) => return CheckResult::fail(name, format!("{}: {}", g.name, e)),
    };
    if front.is_empty() {
        return CheckResult::fail(name, format!("{}: empty front", g.name));
    }
    for w in front.windows(2) {
        if w[0].size >= w[1].size || w[0].throughput >= w[1].throughput {
            return CheckResult::fail(name, format!("{}: front not strictly improving", g.name));
        }
    }
    let last = front.last().expect("front not empty");
    if (last.throughput - max.as_f64()).abs() > 1e-12 {
        return CheckResult::fail(
            name,
            format!("{}: front stops below the maximum", g.name),
        );
    }
    CheckResult::pass(name, format!("{}: {} points", g.name, front.len()))
}

/// Derived schedules start at 0, have the right slot counts, and replay at
/// the derived throughput.
pub fn check_schedule_soundness(g: &Graph) -> CheckResult {
    let name = "schedule_soundness";
    let q = repetition_vector(g);
    let schedule = match build_schedule(g) {
        Ok(s) => s,
        Err(e) => return CheckResult::fail(name, format!("{}: {}", g.name, e)),
    };
    let min = schedule
        .start_times
        .iter()
        .flatten()
        .min()
        .copied()
        .unwrap_or(0);
    if min != 0 {
        return CheckResult::fail(name, format!("{}: smallest start is {}", g.name, min));
    }
    for (i, times) in schedule.start_times.iter().enumerate() {
        if times.len() as u64 != q[i] * schedule.periodicity {
            return CheckResult::fail(name, format!("{}: wrong slot count", g.name));
        }
    }
    match replay_schedule(g, &schedule) {
        Ok(thr) => {
            if thr == Fraction::new(schedule.throughput_num, schedule.throughput_den) {
                CheckResult::pass(name, format!("{}: period {}", g.name, schedule.period))
            } else {
                CheckResult::fail(name, format!("{}: replay drifted to {}", g.name, thr))
            }
        }
        Err(e) => CheckResult::fail(name, format!("{}: {}", g.name, e)),
    }
}

/// The TDMA completion-time formula on its reference point.
pub fn check_tdma_formula() -> CheckResult {
    let name = "tdma_completion";
    // Wheel 10, slice 3, firing of 10 starting at the slice: 31 time units.
    let got = tdma_completion_time(10, 7, 10, 3);
    if got == 31 {
        CheckResult::pass(name, "completion time 31 at slice start")
    } else {
        CheckResult::fail(name, format!("expected 31, got {}", got))
    }
}

/// Scheduling then releasing a message leaves the interconnect unchanged.
pub fn check_noc_reserve_release() -> CheckResult {
    let name = "noc_reserve_release";
    let mut g = InterconnectGraph::new(8, 1, 1, 0, 0);
    let n0 = g.add_node("n0");
    let n1 = g.add_node("n1");
    let n2 = g.add_node("n2");
    g.connect(n0, n1);
    g.connect(n1, n2);

    let problem = NocProblem::new(
        "battery",
        vec![MessageSpec {
            stream_id: 0,
            src: n0,
            dst: n2,
            size: 4,
            start_time: 0,
            duration: 8,
        }],
    );
    let mut s = NocScheduler::new(g, vec![problem]);
    let before: Vec<_> = s
        .graph
        .links
        .iter()
        .map(|l| (l.preferred.clone(), l.slot_tables.clone()))
        .collect();

    if s.schedule(&Strategy::Greedy { max_detour: 0 }).is_err() {
        return CheckResult::fail(name, "single message failed to schedule");
    }
    let m = s.problems[0].messages[0].id;
    let slots = s.problems[0].messages[0]
        .entity
        .as_ref()
        .map(|e| e.nr_slots())
        .unwrap_or(0);
    if slots != 4 {
        return CheckResult::fail(name, format!("expected 4 slots, got {}", slots));
    }
    s.release_resources(m);

    for (link, (pref, tables)) in s.graph.links.iter().zip(before.iter()) {
        if &link.preferred != pref {
            return CheckResult::fail(name, "preference counters drifted");
        }
        for (a, b) in link.slot_tables.iter().zip(tables.iter()) {
            if a.slots != b.slots {
                return CheckResult::fail(name, "slot tables drifted");
            }
        }
    }
    CheckResult::pass(name, "release restored the interconnect exactly")
}

/// Run the whole battery.
pub fn run_battery() -> Vec<CheckResult> {
    let mut results = Vec::new();
    for (g, _) in reference_graphs() {
        results.push(check_consistency(&g));
    }
    results.push(check_reference_throughput());
    results.push(check_time_scaling());
    results.push(check_serialisation_law(&two_actor_cycle()));
    results.push(check_serialisation_law(&multirate_triangle()));
    results.push(check_pareto_front(&pipelined_pair()));
    results.push(check_schedule_soundness(&two_actor_cycle()));
    results.push(check_schedule_soundness(&multirate_triangle()));
    results.push(check_tdma_formula());
    results.push(check_noc_reserve_release());
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_all_pass() {
        for r in run_battery() {
            assert!(r.passed, "{}: {}", r.name, r.details);
        }
    }

    #[test]
    fn test_reference_graph_count() {
        assert_eq!(reference_graphs().len(), 5);
    }
}
