//! Binding-aware throughput analysis.
//!
//! Actors are bound to *tiles*. Each tile arbitrates its processor with a
//! TDMA wheel (of every `wheel_size` time units, `slice` contiguous units
//! belong to the application) and imposes a static-order schedule: a bound
//! actor may only start a firing when it heads the order. Unbound actors
//! wait for tokens only.
//!
//! The transition system extends the plain simulator state with the wheel
//! position and schedule position of every tile, both of which take part in
//! recurrence detection.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::error::{AnalysisError, Result};
use crate::graph::{ActorId, Graph, PortKind, Time, TIME_INFINITY};
use crate::rational::Fraction;
use crate::repetition::repetition_vector;

/// A processor tile with TDMA arbitration and a static-order schedule.
#[derive(Debug, Clone, Serialize)]
pub struct Tile {
    pub name: String,
    pub wheel_size: Time,
    pub slice: Time,
    /// Static order of bound actors; firings advance this cyclically.
    pub schedule: Vec<usize>,
}

/// Actor-to-tile binding over a set of tiles.
#[derive(Debug, Clone, Serialize)]
pub struct Binding {
    pub tiles: Vec<Tile>,
    /// `actor_tile[a]` is the tile index the actor is bound to, if any.
    pub actor_tile: Vec<Option<usize>>,
}

impl Binding {
    pub fn validate(&self, g: &Graph) -> Result<()> {
        if self.actor_tile.len() != g.nr_actors() {
            return Err(AnalysisError::Validation(
                "binding does not cover every actor".into(),
            ));
        }
        for t in &self.tiles {
            if t.slice == 0 || t.slice > t.wheel_size {
                return Err(AnalysisError::Validation(format!(
                    "tile '{}' has slice {} outside wheel {}",
                    t.name, t.slice, t.wheel_size
                )));
            }
            for &a in &t.schedule {
                if a >= g.nr_actors() {
                    return Err(AnalysisError::Validation(format!(
                        "tile '{}' schedules unknown actor {}",
                        t.name, a
                    )));
                }
            }
        }
        for (a, tile) in self.actor_tile.iter().enumerate() {
            if let Some(t) = tile {
                if *t >= self.tiles.len() {
                    return Err(AnalysisError::Validation(format!(
                        "actor {} bound to unknown tile {}",
                        a, t
                    )));
                }
                if !self.tiles[*t].schedule.contains(&a) {
                    return Err(AnalysisError::Validation(format!(
                        "actor {} missing from static order of its tile",
                        a
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Result of a binding-aware run.
#[derive(Debug, Clone, Serialize)]
pub struct BindingAwareResult {
    pub throughput_num: u64,
    pub throughput_den: u64,
    /// Fraction of the period each tile's processor spends executing.
    pub tile_utilization: Vec<f64>,
}

impl BindingAwareResult {
    pub fn throughput(&self) -> Fraction {
        Fraction::new(self.throughput_num, self.throughput_den)
    }
}

/// Completion time of a firing of `exec` time units started when the wheel
/// of the tile stands at `pos`. The slice occupies the last `slice` units of
/// the wheel.
pub fn tdma_completion_time(exec: Time, pos: Time, wheel: Time, slice: Time) -> Time {
    if exec == 0 {
        return 0;
    }
    let gap = wheel - slice;
    if pos <= gap {
        // Wait for the slice, then pay one gap per extra rotation.
        let wait_to_slice = gap - pos;
        let rotations = (exec + slice - 1) / slice - 1;
        wait_to_slice + exec + rotations * gap
    } else {
        // Mid-slice: finish what fits, then one gap per further slice.
        let work_now = wheel - pos;
        if exec <= work_now {
            exec
        } else {
            let remaining = exec - work_now;
            let rotations = (remaining + slice - 1) / slice;
            exec + rotations * gap
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct BindingState {
    act_clk: Vec<VecDeque<Time>>,
    ch: Vec<u64>,
    glb_clk: Time,
    schedule_pos: Vec<usize>,
    tdma_pos: Vec<Time>,
}

/// Throughput of the graph under the given binding, plus per-tile
/// utilization over the periodic phase.
pub fn binding_aware_throughput(g: &Graph, binding: &Binding) -> Result<BindingAwareResult> {
    g.validate()?;
    binding.validate(g)?;
    if !g.is_sdf() {
        return Err(AnalysisError::NotSupported(
            "binding-aware analysis is defined for constant-rate (SDF) graphs".into(),
        ));
    }

    let q = repetition_vector(g);
    if q[0] == 0 {
        return Err(AnalysisError::Validation("graph is inconsistent".into()));
    }
    let output_actor = g.actor_ids().min_by_key(|a| q[a.0]).expect("actors exist");
    let output_rep = q[output_actor.0];

    let mut state = BindingState {
        act_clk: vec![VecDeque::new(); g.nr_actors()],
        ch: g.channels().map(|c| c.initial_tokens).collect(),
        glb_clk: 0,
        schedule_pos: vec![0; binding.tiles.len()],
        tdma_pos: vec![0; binding.tiles.len()],
    };

    let mut stored: HashMap<BindingState, usize> = HashMap::new();
    let mut iter_clks: Vec<Time> = Vec::new();
    let mut rep_cnt = 0u64;

    loop {
        // End firings.
        let mut recurrent = None;
        'ends: for a in g.actor_ids() {
            while matches!(state.act_clk[a.0].front(), Some(&0)) {
                if a == output_actor {
                    rep_cnt += 1;
                    if rep_cnt == output_rep {
                        if let Some(&pos) = stored.get(&state) {
                            recurrent = Some(pos);
                            break 'ends;
                        }
                        stored.insert(state.clone(), iter_clks.len());
                        iter_clks.push(state.glb_clk);
                        state.glb_clk = 0;
                        rep_cnt = 0;
                    }
                }
                end_firing(g, binding, &mut state, a);
            }
        }
        if let Some(pos) = recurrent {
            let iters = (iter_clks.len() - pos) as u64;
            let time: Time = iter_clks[pos..].iter().sum();
            let thr = Fraction::new(iters, time).lowest_term();
            let utilization = tile_utilization(g, binding, &q, iters, time);
            return Ok(BindingAwareResult {
                throughput_num: thr.numerator(),
                throughput_den: thr.denominator(),
                tile_utilization: utilization,
            });
        }

        // Start firings.
        for a in g.actor_ids() {
            while ready_to_fire(g, binding, &state, a) {
                start_firing(g, binding, &mut state, a);
            }
        }

        // Clock step.
        let mut step = TIME_INFINITY;
        for clk in &state.act_clk {
            if let Some(&front) = clk.front() {
                step = step.min(front);
            }
        }
        if step == TIME_INFINITY {
            return Ok(BindingAwareResult {
                throughput_num: 0,
                throughput_den: 1,
                tile_utilization: vec![0.0; binding.tiles.len()],
            });
        }
        if step > 0 {
            for clk in state.act_clk.iter_mut() {
                for t in clk.iter_mut() {
                    *t -= step;
                }
            }
            for (t, tile) in binding.tiles.iter().enumerate() {
                state.tdma_pos[t] = (state.tdma_pos[t] + step) % tile.wheel_size;
            }
            state.glb_clk += step;
        }
    }
}

fn ready_to_fire(g: &Graph, binding: &Binding, state: &BindingState, a: ActorId) -> bool {
    if let Some(t) = binding.actor_tile[a.0] {
        let tile = &binding.tiles[t];
        if tile.schedule[state.schedule_pos[t]] != a.0 {
            return false;
        }
    }
    g.ports_of(a).all(|p| match p.kind {
        PortKind::In => state.ch[p.channel.0] >= p.rate.at(0),
        PortKind::Out => true,
    })
}

fn start_firing(g: &Graph, binding: &Binding, state: &mut BindingState, a: ActorId) {
    for p in g.ports_of(a) {
        if p.kind == PortKind::In {
            state.ch[p.channel.0] -= p.rate.at(0);
        }
    }
    let exec = g.actor(a).exec_time(0);
    let completion = match binding.actor_tile[a.0] {
        None => exec,
        Some(t) => {
            let tile = &binding.tiles[t];
            tdma_completion_time(exec, state.tdma_pos[t], tile.wheel_size, tile.slice)
        }
    };
    state.act_clk[a.0].push_back(completion);
}

fn end_firing(g: &Graph, binding: &Binding, state: &mut BindingState, a: ActorId) {
    for p in g.ports_of(a) {
        if p.kind == PortKind::Out {
            state.ch[p.channel.0] += p.rate.at(0);
        }
    }
    state.act_clk[a.0].pop_front();
    if let Some(t) = binding.actor_tile[a.0] {
        let len = binding.tiles[t].schedule.len();
        state.schedule_pos[t] = (state.schedule_pos[t] + 1) % len;
    }
}

/// Processor activity per tile: execution time of bound actors over one
/// period, normalised by the period length.
fn tile_utilization(
    g: &Graph,
    binding: &Binding,
    q: &[u64],
    iters_in_period: u64,
    period_length: Time,
) -> Vec<f64> {
    let mut util = vec![0.0; binding.tiles.len()];
    for a in g.actor_ids() {
        if let Some(t) = binding.actor_tile[a.0] {
            util[t] +=
                (g.actor(a).exec_time(0) * q[a.0] * iters_in_period) as f64;
        }
    }
    for u in util.iter_mut() {
        *u /= period_length as f64;
    }
    util
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn test_tdma_completion_at_slice_start() {
        // Wheel 10, slice 3, wheel at the start of the slice.
        assert_eq!(tdma_completion_time(10, 7, 10, 3), 31);
    }

    #[test]
    fn test_tdma_completion_waits_for_slice() {
        // From wheel position 0 the firing first waits 7 for the slice.
        assert_eq!(tdma_completion_time(10, 0, 10, 3), 38);
    }

    #[test]
    fn test_tdma_completion_fits_in_slice() {
        assert_eq!(tdma_completion_time(2, 7, 10, 3), 2);
        assert_eq!(tdma_completion_time(3, 7, 10, 3), 3);
    }

    #[test]
    fn test_tdma_full_wheel_is_transparent() {
        // slice == wheel: the processor always belongs to the application.
        assert_eq!(tdma_completion_time(9, 0, 5, 5), 9);
    }

    #[test]
    fn test_unbound_graph_matches_self_timed() {
        let mut g = Graph::new("pair");
        let a = g.add_actor("a", vec![2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);

        let binding = Binding {
            tiles: Vec::new(),
            actor_tile: vec![None, None],
        };
        let r = binding_aware_throughput(&g, &binding).unwrap();
        assert_eq!(r.throughput(), Fraction::new(1, 5));
    }

    #[test]
    fn test_single_tile_serialises_and_slows() {
        let mut g = Graph::new("pair");
        let a = g.add_actor("a", vec![2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);

        // Both actors share one tile owning the full wheel.
        let binding = Binding {
            tiles: vec![Tile {
                name: "t0".into(),
                wheel_size: 5,
                slice: 5,
                schedule: vec![0, 1],
            }],
            actor_tile: vec![Some(0), Some(0)],
        };
        let r = binding_aware_throughput(&g, &binding).unwrap();
        assert_eq!(r.throughput(), Fraction::new(1, 5));
        assert!((r.tile_utilization[0] - 1.0).abs() < 1e-9);

        // Halving the slice at wheel size 2 doubles the effective time.
        let binding = Binding {
            tiles: vec![Tile {
                name: "t0".into(),
                wheel_size: 2,
                slice: 1,
                schedule: vec![0, 1],
            }],
            actor_tile: vec![Some(0), Some(0)],
        };
        let r2 = binding_aware_throughput(&g, &binding).unwrap();
        assert!(r2.throughput() < r.throughput());
    }

    #[test]
    fn test_binding_validation() {
        let mut g = Graph::new("one");
        g.add_actor("a", vec![1]);
        g.add_self_loop(ActorId(0), 1);

        let bad = Binding {
            tiles: vec![Tile {
                name: "t0".into(),
                wheel_size: 4,
                slice: 0,
                schedule: vec![0],
            }],
            actor_tile: vec![Some(0)],
        };
        assert!(bad.validate(&g).is_err());
    }
}
