//! Abstract dependency graph over actors.
//!
//! While the simulator runs its periodic phase (or sits in a deadlock), the
//! tracker records which resource every firing had to wait for: tokens on an
//! input channel, space on an output channel, or a previous firing of the
//! same actor (which surfaces as a token dependency on a self-loop). Each
//! recorded edge carries the channels that caused it. A channel lies on a
//! *critical cycle* when its edge is part of a cycle of this graph; only
//! enlarging such channels can raise the throughput of the current storage
//! distribution.

use crate::graph::{ActorId, ChannelId, PortKind};
use crate::simulate::Simulator;

pub struct DependencyTracker {
    nr_actors: usize,
    /// `edges[a][b]`: channels that made actor `a` wait on actor `b`.
    edges: Vec<Vec<Vec<ChannelId>>>,
}

impl DependencyTracker {
    pub fn new(nr_actors: usize) -> Self {
        DependencyTracker {
            nr_actors,
            edges: vec![vec![Vec::new(); nr_actors]; nr_actors],
        }
    }

    fn add_edge(&mut self, from: ActorId, to: ActorId, cause: ChannelId) {
        let slot = &mut self.edges[from.0][to.0];
        if !slot.contains(&cause) {
            slot.push(cause);
        }
    }

    /// Record why the firing of `a` that is about to start could not start
    /// in the previous state. Called right before `start_firing`.
    pub fn track_start(&mut self, sim: &Simulator, a: ActorId) {
        let g = sim.graph();
        let phase = sim.state.start_phase[a.0] as usize;
        let space_mode = !sim.state.sp.is_empty();
        for p in g.ports_of(a) {
            let need = p.rate.at(phase);
            let ch = p.channel;
            match p.kind {
                PortKind::In => {
                    if sim.prev_tokens(ch) < need {
                        self.add_edge(a, g.src_actor(ch), ch);
                    }
                }
                PortKind::Out => {
                    if space_mode && sim.prev_space(ch) < need {
                        self.add_edge(a, g.dst_actor(ch), ch);
                    }
                }
            }
        }
    }

    /// Build the dependency graph from a deadlocked state: every channel
    /// whose destination lacks tokens or whose source lacks space.
    pub fn track_deadlock(&mut self, sim: &Simulator) {
        let g = sim.graph();
        let space_mode = !sim.state.sp.is_empty();
        for ch in g.channel_ids() {
            let src = g.src_actor(ch);
            let dst = g.dst_actor(ch);
            let dst_need = g.dst_rate(ch).at(sim.state.start_phase[dst.0] as usize);
            if sim.state.ch[ch.0] < dst_need {
                self.add_edge(dst, src, ch);
            }
            if space_mode {
                let src_need = g.src_rate(ch).at(sim.state.start_phase[src.0] as usize);
                if sim.state.sp[ch.0] < src_need {
                    self.add_edge(src, dst, ch);
                }
            }
        }
    }

    /// Find every cycle and set `dep` for the channels its edges carry.
    /// Consumes the edge set.
    pub fn mark_cycle_channels(mut self, dep: &mut [bool]) {
        let mut color = vec![false; self.nr_actors];
        let mut pi: Vec<usize> = (0..self.nr_actors).collect();
        for a in 0..self.nr_actors {
            pi[a] = a;
            self.visit(a, &mut color, &mut pi, dep);
        }
    }

    fn visit(&mut self, a: usize, color: &mut [bool], pi: &mut Vec<usize>, dep: &mut [bool]) {
        color[a] = true;

        for b in 0..self.nr_actors {
            if self.edges[a][b].is_empty() {
                continue;
            }
            if color[b] {
                // Cycle through b: mark the causes along the path back to b.
                let mut c = a;
                let mut d = b;
                loop {
                    for ch in &self.edges[c][d] {
                        dep[ch.0] = true;
                    }
                    d = c;
                    c = pi[d];
                    if d == b {
                        break;
                    }
                }
            } else {
                pi[b] = a;
                self.visit(b, color, pi, dep);
            }
        }

        // Every cycle through a has been found; drop its edges so the same
        // cycles are not rediscovered from another root.
        for i in 0..self.nr_actors {
            self.edges[i][a].clear();
            self.edges[a][i].clear();
        }
        color[a] = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ChannelId, Graph};
    use crate::simulate::Simulator;

    #[test]
    fn test_deadlock_marks_cycle_channels() {
        // Both channels empty: a waits on b, b waits on a.
        let mut g = Graph::new("dead");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![1]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 0);
        let sim = Simulator::new(&g).unwrap();

        let mut tracker = DependencyTracker::new(2);
        tracker.track_deadlock(&sim);
        let mut dep = vec![false; 2];
        tracker.mark_cycle_channels(&mut dep);
        assert_eq!(dep, vec![true, true]);
    }

    #[test]
    fn test_acyclic_dependencies_mark_nothing() {
        let mut tracker = DependencyTracker::new(3);
        tracker.add_edge(crate::graph::ActorId(0), crate::graph::ActorId(1), ChannelId(0));
        tracker.add_edge(crate::graph::ActorId(1), crate::graph::ActorId(2), ChannelId(1));
        let mut dep = vec![false; 2];
        tracker.mark_cycle_channels(&mut dep);
        assert_eq!(dep, vec![false, false]);
    }

    #[test]
    fn test_self_edge_marks_self_loop() {
        let mut tracker = DependencyTracker::new(1);
        tracker.add_edge(crate::graph::ActorId(0), crate::graph::ActorId(0), ChannelId(0));
        let mut dep = vec![false; 1];
        tracker.mark_cycle_channels(&mut dep);
        assert_eq!(dep, vec![true]);
    }
}
