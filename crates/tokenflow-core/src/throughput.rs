//! Graph-level throughput analyses.
//!
//! Self-timed throughput assumes unbounded channels and maximal
//! auto-concurrency; the result is the number of graph iterations per time
//! unit over the recurrent cycle. Deadlock is reported as zero throughput,
//! not as an error.

use crate::error::Result;
use crate::graph::Graph;
use crate::rational::Fraction;
use crate::repetition::repetition_vector;
use crate::simulate::Simulator;

/// Maximum achievable throughput under self-timed execution with unbounded
/// buffers, in iterations per time unit.
pub fn self_timed_throughput(g: &Graph) -> Result<Fraction> {
    g.validate()?;
    let mut sim = Simulator::new(g)?;
    Ok(sim.run_self_timed().throughput())
}

/// True when one complete iteration (every actor fired as often as its
/// repetition-vector entry) can execute from the initial marking. The check
/// is untimed: only token availability matters.
pub fn is_deadlock_free(g: &Graph) -> Result<bool> {
    g.validate()?;
    let q = repetition_vector(g);
    if q.is_empty() || q[0] == 0 {
        return Ok(false);
    }

    let mut tokens: Vec<u64> = g.channels().map(|c| c.initial_tokens).collect();
    let mut remaining = q.clone();
    let mut phase: Vec<usize> = vec![0; g.nr_actors()];

    loop {
        let mut progress = false;
        for a in g.actor_ids() {
            while remaining[a.0] > 0 && can_fire(g, &tokens, a, phase[a.0]) {
                fire(g, &mut tokens, a, phase[a.0]);
                phase[a.0] = (phase[a.0] + 1) % g.phase_count(a);
                remaining[a.0] -= 1;
                progress = true;
            }
        }
        if remaining.iter().all(|&r| r == 0) {
            return Ok(true);
        }
        if !progress {
            return Ok(false);
        }
    }
}

fn can_fire(g: &Graph, tokens: &[u64], a: crate::graph::ActorId, phase: usize) -> bool {
    g.ports_of(a).all(|p| match p.kind {
        crate::graph::PortKind::In => tokens[p.channel.0] >= p.rate.at(phase),
        crate::graph::PortKind::Out => true,
    })
}

fn fire(g: &Graph, tokens: &mut [u64], a: crate::graph::ActorId, phase: usize) {
    for p in g.ports_of(a) {
        match p.kind {
            crate::graph::PortKind::In => tokens[p.channel.0] -= p.rate.at(phase),
            crate::graph::PortKind::Out => tokens[p.channel.0] += p.rate.at(phase),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn test_self_timed_throughput_two_actor_cycle() {
        let mut g = Graph::new("pair");
        let a = g.add_actor("a", vec![2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);
        assert_eq!(self_timed_throughput(&g).unwrap(), Fraction::new(1, 5));
    }

    #[test]
    fn test_deadlock_free_detection() {
        let mut g = Graph::new("pair");
        let a = g.add_actor("a", vec![2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);
        assert!(is_deadlock_free(&g).unwrap());
    }

    #[test]
    fn test_tokenless_cycle_deadlocks() {
        let mut g = Graph::new("dead");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![1]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 0);
        assert!(!is_deadlock_free(&g).unwrap());
        assert_eq!(self_timed_throughput(&g).unwrap(), Fraction::new(0, 1));
    }
}
