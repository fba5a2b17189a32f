//! Repetition vector and graph-level structural checks.
//!
//! The repetition vector is the smallest positive integer vector `q` such
//! that `q[src]·p = q[dst]·c` holds on every channel. For CSDF the balance is
//! taken over one full phase cycle of each actor and `q[a]` is a multiple of
//! the actor's phase count. An all-zero vector signals an inconsistent graph.

use crate::graph::{ActorId, Graph};
use crate::rational::{gcd, lcm, Fraction};

/// Firing counts per actor for one graph iteration.
pub type RepetitionVector = Vec<u64>;

/// Tokens moved by one full phase cycle of the port's actor.
fn cycle_total(g: &Graph, port: &crate::graph::Port) -> u64 {
    let phases = g.phase_count(port.actor);
    (0..phases).map(|ph| port.rate.at(ph)).sum()
}

/// Propagate firing fractions from `start` to every actor reachable over
/// channels, in either direction. Sets all fractions to the inconsistent
/// sentinel when two propagation paths disagree.
fn propagate_fractions(g: &Graph, fractions: &mut [Fraction], start: ActorId) {
    let mut stack = vec![start];

    while let Some(a) = stack.pop() {
        let fraction_a = fractions[a.0];
        if fraction_a == Fraction::INCONSISTENT {
            return;
        }

        for port_a in g.ports_of(a).map(|p| p.id).collect::<Vec<_>>() {
            let port_a = g.port(port_a);
            let ch = g.channel(port_a.channel);

            // Actor and port on the other side of the channel.
            let (b, port_b) = if g.port(ch.src_port).actor == a && ch.src_port == port_a.id {
                (g.port(ch.dst_port).actor, g.port(ch.dst_port))
            } else {
                (g.port(ch.src_port).actor, g.port(ch.src_port))
            };

            let total_a = cycle_total(g, port_a);
            let total_b = cycle_total(g, port_b);
            let fraction_b = fraction_a.scaled(total_a, total_b);
            let known_b = fractions[b.0];

            if known_b != Fraction::UNKNOWN && known_b != fraction_b {
                // Two paths disagree on the firing ratio: inconsistent.
                for f in fractions.iter_mut() {
                    *f = Fraction::INCONSISTENT;
                }
                return;
            }
            if known_b == Fraction::UNKNOWN {
                fractions[b.0] = fraction_b;
                stack.push(b);
            }
        }
    }
}

/// Compute the repetition vector. All-zero on an inconsistent graph.
pub fn repetition_vector(g: &Graph) -> RepetitionVector {
    let mut fractions = vec![Fraction::UNKNOWN; g.nr_actors()];

    for a in g.actor_ids() {
        if fractions[a.0] == Fraction::UNKNOWN {
            fractions[a.0] = Fraction::new(1, 1);
            propagate_fractions(g, &mut fractions, a);
        }
    }

    // Scale every fraction to an integer with the lcm of the denominators.
    let mut l: u64 = 1;
    for f in &fractions {
        l = lcm(l, f.denominator());
    }
    if l == 0 {
        return vec![0; g.nr_actors()];
    }

    let mut cycles: Vec<u64> = fractions
        .iter()
        .map(|f| f.numerator() * (l / f.denominator()))
        .collect();

    // Minimise with the gcd over all entries.
    let mut g_all = cycles[0];
    for &c in cycles.iter().skip(1) {
        g_all = gcd(g_all, c);
    }
    if g_all > 1 {
        for c in cycles.iter_mut() {
            *c /= g_all;
        }
    }

    // A firing count covers whole phase cycles.
    cycles
        .iter()
        .enumerate()
        .map(|(i, &c)| c * g.phase_count(ActorId(i)) as u64)
        .collect()
}

/// True when the repetition vector exists (rates balance on every channel).
pub fn is_consistent(g: &Graph) -> bool {
    let q = repetition_vector(g);
    !q.is_empty() && q[0] != 0
}

/// True when every actor can reach every other actor over channels.
pub fn is_strongly_connected(g: &Graph) -> bool {
    if g.nr_actors() == 0 {
        return false;
    }
    reaches_all(g, false) && reaches_all(g, true)
}

fn reaches_all(g: &Graph, reversed: bool) -> bool {
    let mut seen = vec![false; g.nr_actors()];
    let mut stack = vec![ActorId(0)];
    seen[0] = true;
    while let Some(a) = stack.pop() {
        for ch in g.channel_ids() {
            let (from, to) = if reversed {
                (g.dst_actor(ch), g.src_actor(ch))
            } else {
                (g.src_actor(ch), g.dst_actor(ch))
            };
            if from == a && !seen[to.0] {
                seen[to.0] = true;
                stack.push(to);
            }
        }
    }
    seen.iter().all(|&s| s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn test_two_actor_cycle_repetition() {
        let mut g = Graph::new("pair");
        let a = g.add_actor("a", vec![2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);
        assert_eq!(repetition_vector(&g), vec![1, 1]);
        assert!(is_consistent(&g));
        assert!(is_strongly_connected(&g));
    }

    #[test]
    fn test_triangle_repetition() {
        let mut g = Graph::new("triangle");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![2]);
        let c = g.add_actor("c", vec![1]);
        g.connect(a, 1u64, b, 2u64, 0);
        g.connect(b, 2u64, c, 1u64, 0);
        g.connect(c, 1u64, a, 1u64, 2);
        assert_eq!(repetition_vector(&g), vec![2, 1, 2]);
    }

    #[test]
    fn test_inconsistent_graph_yields_zero() {
        let mut g = Graph::new("bad");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![1]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(a, 2u64, b, 1u64, 0);
        let q = repetition_vector(&g);
        assert!(q.iter().all(|&x| x == 0));
        assert!(!is_consistent(&g));
    }

    #[test]
    fn test_csdf_repetition_counts_phases() {
        // a fires three phases producing [1,2,1]; b consumes 4 per firing.
        let mut g = Graph::new("csdf");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![2]);
        g.connect(a, vec![1, 2, 1], b, 4u64, 0);
        g.connect(b, 4u64, a, vec![1, 2, 1], 4);
        assert_eq!(repetition_vector(&g), vec![3, 1]);
    }

    #[test]
    fn test_not_strongly_connected() {
        let mut g = Graph::new("chain");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![1]);
        g.connect(a, 1u64, b, 1u64, 0);
        assert!(!is_strongly_connected(&g));
    }

    #[test]
    fn test_self_loop_keeps_repetition() {
        let mut g = Graph::new("loop");
        let x = g.add_actor("x", vec![4]);
        g.add_self_loop(x, 1);
        assert_eq!(repetition_vector(&g), vec![1]);
    }
}
