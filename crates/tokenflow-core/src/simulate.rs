//! The timed-token transition system shared by every analysis.
//!
//! Execution is self-timed: an actor starts a firing the moment every input
//! channel holds enough tokens (and, when buffer capacities are modelled,
//! every output channel has enough free space). A macro step runs three
//! phases in a fixed order (end firings, start firings, clock step) and
//! actors are visited in identity order inside each phase, which makes every
//! run deterministic.
//!
//! Concurrency inside the model is a queue: `act_clk[a]` holds the remaining
//! execution times of the in-flight firings of actor `a`, front first. Time
//! advances by the smallest remaining time over all queues; a step of
//! `TIME_INFINITY` is a deadlock.
//!
//! Recurrence detection: whenever the designated *output actor* (the actor
//! with the smallest repetition-vector entry) completes its repetition count,
//! the state is looked up in a hash map of previously stored states. A hit
//! means the execution has entered its periodic phase and the throughput is
//! the number of iterations on the cycle divided by the time the cycle takes.

use std::collections::{HashMap, VecDeque};

use crate::error::{AnalysisError, Result};
use crate::graph::{ActorId, ChannelId, Graph, PortKind, Time, TIME_INFINITY};
use crate::rational::Fraction;
use crate::repetition::{repetition_vector, RepetitionVector};

/// Complete simulator state. Equality and hashing cover every field, so a
/// `HashMap` keyed on the state is exactly the recurrence store the
/// transition system needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SimState {
    /// Remaining execution times of in-flight firings, front = next to end.
    pub act_clk: Vec<VecDeque<Time>>,
    /// Tokens per channel.
    pub ch: Vec<u64>,
    /// Free space per channel; empty unless capacities are modelled.
    pub sp: Vec<u64>,
    /// Consumption phase per actor (always 0 for SDF).
    pub start_phase: Vec<u32>,
    /// Production phase per actor (always 0 for SDF).
    pub end_phase: Vec<u32>,
    /// Time since the last iteration boundary.
    pub glb_clk: u64,
}

impl SimState {
    fn new(nr_actors: usize, nr_channels: usize, with_space: bool) -> Self {
        SimState {
            act_clk: vec![VecDeque::new(); nr_actors],
            ch: vec![0; nr_channels],
            sp: if with_space {
                vec![0; nr_channels]
            } else {
                Vec::new()
            },
            start_phase: vec![0; nr_actors],
            end_phase: vec![0; nr_actors],
            glb_clk: 0,
        }
    }
}

/// Result of storing the current state at an iteration boundary.
pub enum StoreResult {
    /// First visit; the state is now remembered.
    Stored,
    /// The state was seen before at iteration index `pos`: recurrence.
    Seen(usize),
}

/// Outcome of one macro step of the self-timed run.
pub enum MacroOutcome {
    Progress,
    /// Entered the periodic phase; carries the cycle throughput in
    /// iterations of the graph per time unit.
    Recurrent(Fraction),
    Deadlock,
}

/// Outcome of a complete self-timed run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunOutcome {
    /// Throughput over the recurrent cycle, iterations per time unit.
    Recurrent(Fraction),
    Deadlock,
}

impl RunOutcome {
    /// Throughput as a fraction; deadlock is zero.
    pub fn throughput(&self) -> Fraction {
        match self {
            RunOutcome::Recurrent(thr) => *thr,
            RunOutcome::Deadlock => Fraction::new(0, 1),
        }
    }
}

/// The transition system over a borrowed graph.
pub struct Simulator<'g> {
    g: &'g Graph,
    q: RepetitionVector,
    pub output_actor: ActorId,
    pub output_rep_cnt: u64,
    /// Buffer capacities per channel; `Some` switches on space accounting.
    capacities: Option<Vec<u64>>,
    pub state: SimState,
    prev_tokens: Vec<u64>,
    prev_space: Vec<u64>,
    stored: HashMap<SimState, usize>,
    iter_clks: Vec<u64>,
    pub rep_cnt: u64,
}

impl<'g> Simulator<'g> {
    /// Simulator with unbounded channels. Fails on an inconsistent graph.
    pub fn new(g: &'g Graph) -> Result<Self> {
        Self::build(g, None, None)
    }

    /// Simulator with per-channel buffer capacities (space accounting on).
    pub fn with_capacities(g: &'g Graph, capacities: Vec<u64>) -> Result<Self> {
        Self::build(g, Some(capacities), None)
    }

    /// Simulator with an explicitly chosen output actor.
    pub fn with_output_actor(g: &'g Graph, output: ActorId) -> Result<Self> {
        Self::build(g, None, Some(output))
    }

    fn build(
        g: &'g Graph,
        capacities: Option<Vec<u64>>,
        output: Option<ActorId>,
    ) -> Result<Self> {
        let q = repetition_vector(g);
        if q.is_empty() || q[0] == 0 {
            return Err(AnalysisError::Validation(
                "graph is inconsistent (no repetition vector)".into(),
            ));
        }

        // Output actor: smallest repetition-vector entry unless overridden.
        let output_actor = output.unwrap_or_else(|| {
            g.actor_ids()
                .min_by_key(|a| q[a.0])
                .expect("graph has actors")
        });
        let output_rep_cnt = q[output_actor.0];

        let with_space = capacities.is_some();
        let nr_a = g.nr_actors();
        let nr_c = g.nr_channels();
        let mut sim = Simulator {
            g,
            q,
            output_actor,
            output_rep_cnt,
            capacities,
            state: SimState::new(nr_a, nr_c, with_space),
            prev_tokens: vec![0; nr_c],
            prev_space: vec![0; nr_c],
            stored: HashMap::new(),
            iter_clks: Vec::new(),
            rep_cnt: 0,
        };
        sim.reset();
        Ok(sim)
    }

    pub fn graph(&self) -> &'g Graph {
        self.g
    }

    pub fn repetition(&self) -> &RepetitionVector {
        &self.q
    }

    /// Back to the initial marking; forgets all stored states.
    pub fn reset(&mut self) {
        let with_space = self.capacities.is_some();
        self.state = SimState::new(self.g.nr_actors(), self.g.nr_channels(), with_space);
        for c in self.g.channels() {
            self.state.ch[c.id.0] = c.initial_tokens;
            if let Some(caps) = &self.capacities {
                self.state.sp[c.id.0] = caps[c.id.0].saturating_sub(c.initial_tokens);
            }
        }
        self.prev_tokens.fill(0);
        self.prev_space.fill(0);
        self.stored.clear();
        self.iter_clks.clear();
        self.rep_cnt = 0;
    }

    /// True when the capacities (if any) can hold every initial marking.
    pub fn capacities_hold_initial_tokens(&self) -> Option<ChannelId> {
        let caps = self.capacities.as_ref()?;
        self.g
            .channels()
            .find(|c| caps[c.id.0] < c.initial_tokens)
            .map(|c| c.id)
    }

    // -----------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------

    /// Enough tokens (and space) available for the next firing of `a`?
    pub fn ready_to_start(&self, a: ActorId) -> bool {
        let phase = self.state.start_phase[a.0] as usize;
        for p in self.g.ports_of(a) {
            let need = p.rate.at(phase);
            match p.kind {
                PortKind::In => {
                    if self.state.ch[p.channel.0] < need {
                        return false;
                    }
                }
                PortKind::Out => {
                    if self.capacities.is_some() && self.state.sp[p.channel.0] < need {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Consume inputs (and output space), queue the firing.
    pub fn start_firing(&mut self, a: ActorId) {
        let phase = self.state.start_phase[a.0] as usize;
        let with_space = self.capacities.is_some();
        for p in self.g.ports_of(a) {
            let n = p.rate.at(phase);
            match p.kind {
                PortKind::In => self.state.ch[p.channel.0] -= n,
                PortKind::Out => {
                    if with_space {
                        self.state.sp[p.channel.0] -= n;
                    }
                }
            }
        }
        let exec = self.g.actor(a).exec_time(phase);
        self.state.act_clk[a.0].push_back(exec);
        let phases = self.g.phase_count(a) as u32;
        self.state.start_phase[a.0] = (self.state.start_phase[a.0] + 1) % phases;
    }

    /// Front firing of `a` has no remaining execution time?
    pub fn ready_to_end(&self, a: ActorId) -> bool {
        matches!(self.state.act_clk[a.0].front(), Some(&0))
    }

    /// Produce outputs (and input space), drop the finished firing.
    pub fn end_firing(&mut self, a: ActorId) {
        let phase = self.state.end_phase[a.0] as usize;
        let with_space = self.capacities.is_some();
        for p in self.g.ports_of(a) {
            let n = p.rate.at(phase);
            match p.kind {
                PortKind::Out => self.state.ch[p.channel.0] += n,
                PortKind::In => {
                    if with_space {
                        self.state.sp[p.channel.0] += n;
                    }
                }
            }
        }
        self.state.act_clk[a.0].pop_front();
        let phases = self.g.phase_count(a) as u32;
        self.state.end_phase[a.0] = (self.state.end_phase[a.0] + 1) % phases;
    }

    /// Advance time to the next firing end, bounded by `max_step`. Returns
    /// the step taken: 0 when a firing can still end now, `TIME_INFINITY`
    /// when nothing is in flight and no bound applies (deadlock).
    pub fn clock_step(&mut self, max_step: Time) -> Time {
        let mut step = max_step;
        for clk in &self.state.act_clk {
            if let Some(&front) = clk.front() {
                step = step.min(front);
            }
        }
        if step == 0 {
            return 0;
        }
        if step == TIME_INFINITY {
            return TIME_INFINITY;
        }
        for clk in self.state.act_clk.iter_mut() {
            for t in clk.iter_mut() {
                *t -= step;
            }
        }
        self.state.glb_clk += step;
        step
    }

    // -----------------------------------------------------------------
    // Recurrence
    // -----------------------------------------------------------------

    /// Snapshot tokens and space; the dependency tracker inspects these to
    /// see which resource a firing had to wait for.
    pub fn snapshot_prev(&mut self) {
        self.prev_tokens.copy_from_slice(&self.state.ch);
        if !self.state.sp.is_empty() {
            self.prev_space.copy_from_slice(&self.state.sp);
        }
    }

    pub fn prev_tokens(&self, c: ChannelId) -> u64 {
        self.prev_tokens[c.0]
    }

    pub fn prev_space(&self, c: ChannelId) -> u64 {
        self.prev_space[c.0]
    }

    /// Store the current state at an iteration boundary.
    pub fn store_state(&mut self) -> StoreResult {
        if let Some(&pos) = self.stored.get(&self.state) {
            return StoreResult::Seen(pos);
        }
        let pos = self.iter_clks.len();
        self.stored.insert(self.state.clone(), pos);
        self.iter_clks.push(self.state.glb_clk);
        StoreResult::Stored
    }

    /// Forget all stored states (start a fresh recurrence search).
    pub fn clear_stored_states(&mut self) {
        self.stored.clear();
        self.iter_clks.clear();
    }

    /// Number of iteration-boundary states stored so far.
    pub fn iterations_stored(&self) -> usize {
        self.iter_clks.len()
    }

    /// Throughput of the recurrent cycle beginning at iteration `pos`:
    /// iterations per time unit, exact. With all-zero execution times the
    /// cycle takes no time and the result is the infinite fraction.
    pub fn cycle_throughput(&self, pos: usize) -> Fraction {
        let iters = (self.iter_clks.len() - pos) as u64;
        let time: u64 = self.iter_clks[pos..].iter().sum();
        Fraction::new(iters, time).lowest_term()
    }

    /// Handle the end of one output-actor firing: advance the iteration
    /// counter and, at a boundary, store the state. `Some(pos)` on
    /// recurrence; otherwise the boundary resets `glb_clk`.
    pub fn output_fired(&mut self) -> Option<usize> {
        self.rep_cnt += 1;
        if self.rep_cnt == self.output_rep_cnt {
            match self.store_state() {
                StoreResult::Seen(pos) => return Some(pos),
                StoreResult::Stored => {
                    self.state.glb_clk = 0;
                    self.rep_cnt = 0;
                }
            }
        }
        None
    }

    // -----------------------------------------------------------------
    // Complete runs
    // -----------------------------------------------------------------

    /// One macro step: end every ready firing (detecting recurrence at
    /// iteration boundaries), start every enabled firing, advance the clock.
    pub fn macro_step(&mut self) -> MacroOutcome {
        self.snapshot_prev();

        for a in self.g.actor_ids() {
            while self.ready_to_end(a) {
                if a == self.output_actor {
                    if let Some(pos) = self.output_fired() {
                        return MacroOutcome::Recurrent(self.cycle_throughput(pos));
                    }
                }
                self.end_firing(a);
            }
        }

        for a in self.g.actor_ids() {
            while self.ready_to_start(a) {
                self.start_firing(a);
            }
        }

        if self.clock_step(TIME_INFINITY) == TIME_INFINITY {
            return MacroOutcome::Deadlock;
        }
        MacroOutcome::Progress
    }

    /// Run self-timed from the initial marking until recurrence or deadlock.
    pub fn run_self_timed(&mut self) -> RunOutcome {
        self.reset();
        loop {
            match self.macro_step() {
                MacroOutcome::Progress => {}
                MacroOutcome::Recurrent(thr) => return RunOutcome::Recurrent(thr),
                MacroOutcome::Deadlock => return RunOutcome::Deadlock,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn two_actor_cycle() -> Graph {
        let mut g = Graph::new("pair");
        let a = g.add_actor("a", vec![2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);
        g
    }

    #[test]
    fn test_two_actor_cycle_throughput() {
        let g = two_actor_cycle();
        let mut sim = Simulator::new(&g).unwrap();
        let thr = sim.run_self_timed().throughput();
        assert_eq!(thr, Fraction::new(1, 5));
    }

    #[test]
    fn test_self_loop_serialises() {
        let mut g = Graph::new("loop");
        let x = g.add_actor("x", vec![4]);
        g.add_self_loop(x, 1);
        let mut sim = Simulator::new(&g).unwrap();
        assert_eq!(sim.run_self_timed().throughput(), Fraction::new(1, 4));
    }

    #[test]
    fn test_triangle_throughput() {
        // Two tokens circulate together (b needs both): the cycle takes 4.
        let mut g = Graph::new("triangle");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![2]);
        let c = g.add_actor("c", vec![1]);
        g.connect(a, 1u64, b, 2u64, 0);
        g.connect(b, 2u64, c, 1u64, 0);
        g.connect(c, 1u64, a, 1u64, 2);
        let mut sim = Simulator::new(&g).unwrap();
        assert_eq!(sim.run_self_timed().throughput(), Fraction::new(1, 4));
    }

    #[test]
    fn test_triangle_serialised_throughput() {
        // Unit self-loops disable auto-concurrency: every firing of the
        // iteration runs back to back on the critical cycle.
        let mut g = Graph::new("triangle");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![2]);
        let c = g.add_actor("c", vec![1]);
        g.connect(a, 1u64, b, 2u64, 0);
        g.connect(b, 2u64, c, 1u64, 0);
        g.connect(c, 1u64, a, 1u64, 2);
        for x in [a, b, c] {
            g.add_self_loop(x, 1);
        }
        let mut sim = Simulator::new(&g).unwrap();
        assert_eq!(sim.run_self_timed().throughput(), Fraction::new(1, 6));
    }

    #[test]
    fn test_doubling_exec_times_halves_throughput() {
        let mut g = Graph::new("pair");
        let a = g.add_actor("a", vec![4]);
        let b = g.add_actor("b", vec![6]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);
        let mut sim = Simulator::new(&g).unwrap();
        assert_eq!(sim.run_self_timed().throughput(), Fraction::new(1, 10));
    }

    #[test]
    fn test_deadlocked_graph() {
        let mut g = Graph::new("dead");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![1]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 0);
        let mut sim = Simulator::new(&g).unwrap();
        assert_eq!(sim.run_self_timed(), RunOutcome::Deadlock);
    }

    #[test]
    fn test_bounded_capacity_limits_throughput() {
        // a -> b with capacity 1 on the forward channel serialises the pair.
        let mut g = Graph::new("bounded");
        let a = g.add_actor("a", vec![2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);
        let mut sim = Simulator::with_capacities(&g, vec![1, 1]).unwrap();
        let thr = sim.run_self_timed().throughput();
        assert_eq!(thr, Fraction::new(1, 5));
    }

    #[test]
    fn test_csdf_phase_rates() {
        // a produces [1,2,1] over three phases, b consumes 4.
        let mut g = Graph::new("csdf");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![2]);
        g.connect(a, vec![1, 2, 1], b, 4u64, 0);
        g.connect(b, 4u64, a, vec![1, 2, 1], 4);
        let mut sim = Simulator::new(&g).unwrap();
        match sim.run_self_timed() {
            RunOutcome::Recurrent(thr) => assert!(thr.as_f64() > 0.0),
            RunOutcome::Deadlock => panic!("CSDF pair should not deadlock"),
        }
    }

    #[test]
    fn test_zero_exec_times_give_infinite_throughput() {
        let mut g = Graph::new("untimed");
        let a = g.add_actor("a", vec![0]);
        let b = g.add_actor("b", vec![0]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);
        let mut sim = Simulator::new(&g).unwrap();
        match sim.run_self_timed() {
            RunOutcome::Recurrent(thr) => assert!(thr.is_infinite()),
            RunOutcome::Deadlock => panic!("should recur"),
        }
    }
}
