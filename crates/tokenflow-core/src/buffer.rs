//! Throughput / storage-space trade-off exploration.
//!
//! A *storage distribution* assigns every channel a buffer capacity. The
//! explorer walks the space of distributions ordered by total size, starting
//! from a per-channel lower bound. Each distribution is simulated with the
//! space-aware transition system; the channels on a critical cycle of the
//! abstract dependency graph tell the explorer which enlargements can pay
//! off. Distributions of equal total size form a set; the sets that improve
//! on every smaller size are the Pareto front.
//!
//! The search runs either to a throughput bound (`analyze`) or one Pareto
//! point at a time (`find_next_set`), with all exploration state kept on the
//! [`BufferAnalysis`] value between calls.

use serde::Serialize;

use crate::dependencies::DependencyTracker;
use crate::error::Result;
use crate::graph::{ChannelId, Graph, TIME_INFINITY};
use crate::rational::{gcd, Fraction};
use crate::simulate::Simulator;

/// One explored storage distribution.
#[derive(Debug, Clone)]
pub struct StorageDistribution {
    pub sz: u64,
    pub sp: Vec<u64>,
    pub dep: Vec<bool>,
    pub throughput: Fraction,
}

/// All distributions of one total size, with their common best throughput.
#[derive(Debug, Clone)]
pub struct DistributionSet {
    pub sz: u64,
    pub throughput: Fraction,
    pub distributions: Vec<StorageDistribution>,
}

/// A Pareto point in report form: real channels only, sizes discounted for
/// injected self-loops.
#[derive(Debug, Clone, Serialize)]
pub struct ParetoPoint {
    pub size: u64,
    pub throughput: f64,
    pub distributions: Vec<Vec<u64>>,
}

pub struct BufferAnalysis {
    g: Graph,
    min_step: Vec<u64>,
    max_throughput: Fraction,
    /// Pareto sets found so far, in increasing size and throughput.
    front: Vec<DistributionSet>,
    /// Unexplored sets, ordered by size.
    pending: Vec<DistributionSet>,
    /// Channels that existed before self-loop injection.
    nr_real_channels: usize,
    /// Size discount applied to reported points (2 per injected self-loop).
    discount: u64,
}

impl BufferAnalysis {
    /// Explorer over the graph as given (maximal auto-concurrency).
    pub fn new(g: &Graph) -> Result<Self> {
        Self::build(g.clone(), false)
    }

    /// Explorer with one single-token self-loop injected per actor,
    /// serialising every actor. Reported sizes discount the injected loops.
    pub fn with_serialised_actors(g: &Graph) -> Result<Self> {
        Self::build(g.clone(), true)
    }

    fn build(mut g: Graph, inject: bool) -> Result<Self> {
        g.validate()?;
        let nr_real_channels = g.nr_channels();
        let mut discount = 0;
        if inject {
            for a in g.actor_ids().collect::<Vec<_>>() {
                g.add_self_loop(a, 1);
                discount += 2;
            }
        }

        // Unbounded-buffer maximum bounds the whole search.
        let max_throughput = {
            let mut sim = Simulator::new(&g)?;
            sim.run_self_timed().throughput()
        };

        let min_step: Vec<u64> = g.channel_ids().map(|c| channel_step(&g, c)).collect();
        let min_sz: Vec<u64> = g.channel_ids().map(|c| channel_lower_bound(&g, c)).collect();

        let lb = StorageDistribution {
            sz: min_sz.iter().sum(),
            sp: min_sz,
            dep: vec![false; g.nr_channels()],
            throughput: Fraction::new(0, 1),
        };
        let pending = vec![DistributionSet {
            sz: lb.sz,
            throughput: Fraction::new(0, 1),
            distributions: vec![lb],
        }];

        Ok(BufferAnalysis {
            g,
            min_step,
            max_throughput,
            front: Vec::new(),
            pending,
            nr_real_channels,
            discount,
        })
    }

    pub fn max_throughput(&self) -> Fraction {
        self.max_throughput
    }

    /// Explore until the bound is reached. `None` explores the full space up
    /// to the unbounded-buffer maximum; a zero bound stops at the first
    /// deadlock-free point.
    pub fn analyze(&mut self, bound: Option<Fraction>) -> Result<Vec<ParetoPoint>> {
        while let Some(idx) = self.next_pareto_set()? {
            let thr = self.front[idx].throughput;
            let done = match bound {
                Some(b) if b == Fraction::new(0, 1) => thr > Fraction::new(0, 1),
                Some(b) => thr >= b || thr == self.max_throughput,
                None => thr == self.max_throughput,
            };
            if done {
                break;
            }
        }
        Ok(self.pareto_front())
    }

    /// Step mode: explore until the next Pareto point appears and return it.
    /// `None` once the maximum throughput has been reached or the space is
    /// exhausted.
    pub fn find_next_set(&mut self) -> Result<Option<ParetoPoint>> {
        if let Some(last) = self.front.last() {
            if last.throughput == self.max_throughput {
                return Ok(None);
            }
        }
        Ok(self
            .next_pareto_set()?
            .map(|idx| self.report_set(&self.front[idx])))
    }

    /// The Pareto front discovered so far, in report form.
    pub fn pareto_front(&self) -> Vec<ParetoPoint> {
        self.front.iter().map(|s| self.report_set(s)).collect()
    }

    /// The Pareto sets with their exact throughput fractions.
    pub fn front_sets(&self) -> &[DistributionSet] {
        &self.front
    }

    // -----------------------------------------------------------------
    // Exploration
    // -----------------------------------------------------------------

    /// Explore pending sets in size order until one improves on the current
    /// front; push it onto the front and return its index there.
    fn next_pareto_set(&mut self) -> Result<Option<usize>> {
        while !self.pending.is_empty() {
            let mut set = self.pending.remove(0);

            // Simulate every distribution and spawn enlargements from its
            // dependency channels. New distributions always land in larger
            // sets, so iterating by index is safe.
            for i in 0..set.distributions.len() {
                let (thr, dep) = self.execute_distribution(&set.distributions[i].sp)?;
                set.distributions[i].throughput = thr;
                set.distributions[i].dep = dep;
                if thr > set.throughput {
                    set.throughput = thr;
                }
                let d = set.distributions[i].clone();
                self.spawn_enlargements(&d);
            }

            // Keep only distributions that attain the set's throughput.
            let best = set.throughput;
            set.distributions.retain(|d| d.throughput == best);

            let improves = match self.front.last() {
                None => true,
                Some(prev) => best > prev.throughput,
            };
            if improves {
                log::debug!(
                    "pareto point: size {} throughput {}",
                    set.sz,
                    set.throughput
                );
                self.front.push(set);
                return Ok(Some(self.front.len() - 1));
            }
            // Equal or worse than the previous point: the whole set is
            // non-minimal. Its enlargements are already queued.
        }
        Ok(None)
    }

    /// New distributions for every non-self-edge dependency channel.
    fn spawn_enlargements(&mut self, d: &StorageDistribution) {
        for c in self.g.channel_ids() {
            if !d.dep[c.0] || self.g.is_self_loop(c) {
                continue;
            }
            let step = self.min_step[c.0];
            let mut sp = d.sp.clone();
            sp[c.0] += step;
            self.queue_distribution(StorageDistribution {
                sz: d.sz + step,
                sp,
                dep: vec![false; self.g.nr_channels()],
                throughput: Fraction::new(0, 1),
            });
        }
    }

    /// Insert into the size-ordered pending list, deduplicating against the
    /// distributions already queued for the same size.
    fn queue_distribution(&mut self, d: StorageDistribution) {
        match self.pending.binary_search_by(|s| s.sz.cmp(&d.sz)) {
            Ok(idx) => {
                let set = &mut self.pending[idx];
                if set.distributions.iter().any(|x| x.sp == d.sp) {
                    return;
                }
                set.distributions.push(d);
            }
            Err(idx) => {
                self.pending.insert(
                    idx,
                    DistributionSet {
                        sz: d.sz,
                        throughput: Fraction::new(0, 1),
                        distributions: vec![d],
                    },
                );
            }
        }
    }

    /// Throughput and dependency channels of one storage distribution.
    fn execute_distribution(&self, sp: &[u64]) -> Result<(Fraction, Vec<bool>)> {
        let mut dep = vec![false; self.g.nr_channels()];

        // A channel that cannot hold its initial tokens blocks everything.
        let mut sim = Simulator::with_capacities(&self.g, sp.to_vec())?;
        if let Some(c) = sim.capacities_hold_initial_tokens() {
            dep[c.0] = true;
            return Ok((Fraction::new(0, 1), dep));
        }

        loop {
            sim.snapshot_prev();

            let mut recurrent = None;
            'ends: for a in self.g.actor_ids() {
                while sim.ready_to_end(a) {
                    if a == sim.output_actor {
                        if let Some(pos) = sim.output_fired() {
                            recurrent = Some(pos);
                            break 'ends;
                        }
                    }
                    sim.end_firing(a);
                }
            }
            if let Some(pos) = recurrent {
                let thr = sim.cycle_throughput(pos);
                self.analyze_periodic_phase(&mut sim, &mut dep);
                return Ok((thr, dep));
            }

            for a in self.g.actor_ids() {
                while sim.ready_to_start(a) {
                    sim.start_firing(a);
                }
            }

            if sim.clock_step(TIME_INFINITY) == TIME_INFINITY {
                let mut tracker = DependencyTracker::new(self.g.nr_actors());
                tracker.track_deadlock(&sim);
                tracker.mark_cycle_channels(&mut dep);
                return Ok((Fraction::new(0, 1), dep));
            }
        }
    }

    /// Replay one period from the recurrent state, tracking which resource
    /// each firing waited for, then mark the channels on dependency cycles.
    fn analyze_periodic_phase(&self, sim: &mut Simulator, dep: &mut [bool]) {
        let periodic_state = sim.state.clone();
        let mut tracker = DependencyTracker::new(self.g.nr_actors());

        sim.state.glb_clk = 0;
        // The recurrent state still holds an unfinished firing of the output
        // actor; its end closes the previous period.
        let mut rep_cnt: i64 = -1;

        for a in self.g.actor_ids() {
            while sim.ready_to_end(a) {
                if a == sim.output_actor {
                    rep_cnt += 1;
                    if rep_cnt == sim.output_rep_cnt as i64 {
                        sim.state.glb_clk = 0;
                        rep_cnt = 0;
                    }
                }
                sim.end_firing(a);
            }
        }

        loop {
            for a in self.g.actor_ids() {
                while sim.ready_to_start(a) {
                    tracker.track_start(sim, a);
                    sim.start_firing(a);
                }
            }

            sim.clock_step(TIME_INFINITY);
            sim.snapshot_prev();

            for a in self.g.actor_ids() {
                while sim.ready_to_end(a) {
                    if a == sim.output_actor {
                        rep_cnt += 1;
                        if rep_cnt == sim.output_rep_cnt as i64 {
                            if sim.state == periodic_state {
                                tracker.mark_cycle_channels(dep);
                                return;
                            }
                            sim.state.glb_clk = 0;
                            rep_cnt = 0;
                        }
                    }
                    sim.end_firing(a);
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------

    fn report_set(&self, set: &DistributionSet) -> ParetoPoint {
        // A deadlocking lower bound is reported as the canonical zero point.
        if set.throughput == Fraction::new(0, 1) {
            return ParetoPoint {
                size: 0,
                throughput: 0.0,
                distributions: vec![vec![0; self.nr_real_channels]],
            };
        }
        ParetoPoint {
            size: set.sz.saturating_sub(self.discount),
            throughput: set.throughput.as_f64(),
            distributions: set
                .distributions
                .iter()
                .map(|d| d.sp[..self.nr_real_channels].to_vec())
                .collect(),
        }
    }
}

/// Smallest useful capacity increment: the gcd over every phase rate on both
/// ends of the channel.
fn channel_step(g: &Graph, c: ChannelId) -> u64 {
    let mut step = 0;
    for &r in g.src_rate(c).seq().iter().chain(g.dst_rate(c).seq()) {
        step = gcd(step, r);
    }
    step.max(1)
}

/// Smallest capacity that can sustain any throughput at all.
fn channel_lower_bound(g: &Graph, c: ChannelId) -> u64 {
    let p = g.src_rate(c).max();
    let cons = g.dst_rate(c).max();
    let t0 = g.channel(c).initial_tokens;

    if g.is_self_loop(c) {
        return p + cons.max(t0);
    }

    let step = channel_step(g, c);
    let lb = p + cons - step + t0 % step;
    lb.max(t0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    /// a → b with three circulating tokens; buffer on the forward channel
    /// trades throughput for space.
    fn pipelined_pair() -> Graph {
        let mut g = Graph::new("pair3");
        let a = g.add_actor("a", vec![2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 3);
        g
    }

    fn bottleneck_triangle() -> Graph {
        let mut g = Graph::new("triangle");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![2]);
        let c = g.add_actor("c", vec![1]);
        g.connect(a, 1u64, b, 2u64, 0);
        g.connect(b, 2u64, c, 1u64, 0);
        g.connect(c, 1u64, a, 1u64, 2);
        g
    }

    #[test]
    fn test_channel_lower_bounds() {
        let g = bottleneck_triangle();
        assert_eq!(channel_lower_bound(&g, ChannelId(0)), 2);
        assert_eq!(channel_lower_bound(&g, ChannelId(1)), 2);
        assert_eq!(channel_lower_bound(&g, ChannelId(2)), 2);
        assert_eq!(channel_step(&g, ChannelId(0)), 1);
    }

    #[test]
    fn test_lower_bound_holds_initial_tokens() {
        let g = pipelined_pair();
        // The feedback channel must at least hold its three initial tokens.
        assert_eq!(channel_lower_bound(&g, ChannelId(1)), 3);
        assert_eq!(channel_lower_bound(&g, ChannelId(0)), 1);
    }

    #[test]
    fn test_minimum_deadlock_free_pair() {
        let mut g = Graph::new("pair");
        let a = g.add_actor("a", vec![2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);

        let mut analysis = BufferAnalysis::new(&g).unwrap();
        let front = analysis.analyze(Some(Fraction::new(0, 1))).unwrap();
        let first_live = front.iter().find(|p| p.throughput > 0.0).unwrap();
        // One slot per direction suffices.
        assert_eq!(first_live.size, 2);
        assert!(first_live.distributions.contains(&vec![1, 1]));
        assert_eq!(first_live.throughput, 0.2);
    }

    #[test]
    fn test_triangle_lower_bound_attains_maximum() {
        // The token pair on the feedback edge is the critical cycle; the
        // per-channel lower bounds already sustain it.
        let g = bottleneck_triangle();
        let mut analysis = BufferAnalysis::new(&g).unwrap();
        let max = analysis.max_throughput();
        let front = analysis.analyze(None).unwrap();
        assert_eq!(front.len(), 1);
        assert_eq!(front[0].size, 6);
        assert_eq!(front[0].throughput, 0.25);
        assert_eq!(front[0].throughput, max.as_f64());
    }

    #[test]
    fn test_pipelined_pair_front_shape() {
        let g = pipelined_pair();
        let mut analysis = BufferAnalysis::new(&g).unwrap();
        let max = analysis.max_throughput();
        let front = analysis.analyze(None).unwrap();

        // First point: smallest forward buffer serialises the pipeline.
        assert_eq!(front[0].size, 4);
        assert_eq!(front[0].throughput, 0.2);
        // Strictly improving in both coordinates, up to the maximum.
        for w in front.windows(2) {
            assert!(w[0].size < w[1].size);
            assert!(w[0].throughput < w[1].throughput);
        }
        assert_eq!(front.last().unwrap().throughput, max.as_f64());
        assert!(front.len() >= 2);
    }

    #[test]
    fn test_monotone_throughput_in_capacity() {
        let g = pipelined_pair();
        let analysis = BufferAnalysis::new(&g).unwrap();
        let (thr_small, _) = analysis.execute_distribution(&[1, 3]).unwrap();
        let (thr_large, _) = analysis.execute_distribution(&[2, 3]).unwrap();
        let (thr_huge, _) = analysis.execute_distribution(&[8, 8]).unwrap();
        assert!(thr_small <= thr_large);
        assert!(thr_large <= thr_huge);
    }

    #[test]
    fn test_dependency_marked_when_below_max() {
        let g = pipelined_pair();
        let analysis = BufferAnalysis::new(&g).unwrap();
        let (thr, dep) = analysis.execute_distribution(&[1, 3]).unwrap();
        assert!(thr < analysis.max_throughput());
        assert!(dep.iter().any(|&d| d));
    }

    #[test]
    fn test_step_mode_matches_batch() {
        let g = pipelined_pair();

        let mut batch = BufferAnalysis::new(&g).unwrap();
        let front = batch.analyze(None).unwrap();

        let mut stepped = BufferAnalysis::new(&g).unwrap();
        let mut points = Vec::new();
        while let Some(p) = stepped.find_next_set().unwrap() {
            points.push(p);
        }
        assert_eq!(front.len(), points.len());
        for (a, b) in front.iter().zip(points.iter()) {
            assert_eq!(a.size, b.size);
            assert_eq!(a.throughput, b.throughput);
        }
    }

    #[test]
    fn test_serialised_actors_discount() {
        let g = bottleneck_triangle();
        let mut analysis = BufferAnalysis::with_serialised_actors(&g).unwrap();
        let serialised_max = analysis.max_throughput();

        let auto = BufferAnalysis::new(&g).unwrap();
        assert!(serialised_max <= auto.max_throughput());

        let front = analysis.analyze(None).unwrap();
        // Reported distributions cover the three real channels only.
        for p in &front {
            for d in &p.distributions {
                assert_eq!(d.len(), 3);
            }
        }
    }
}
