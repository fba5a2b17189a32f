//! The mapping flow: a state machine taking an application graph onto a
//! tiled platform.
//!
//! The flow walks from storage-distribution selection through tile binding,
//! static-order scheduling, and TDMA slice allocation to NoC communication
//! scheduling. Every resource step that fails re-enters
//! `SelectStorageDist`: a larger storage distribution relaxes the
//! bottleneck, until the Pareto front is exhausted and the flow fails.

use serde::Serialize;

use crate::binding::{binding_aware_throughput, Binding, Tile};
use crate::buffer::BufferAnalysis;
use crate::error::{AnalysisError, Result};
use crate::graph::{Graph, Time};
use crate::noc::{InterconnectGraph, MessageSpec, NocProblem, NocScheduler, NodeId, Strategy};
use crate::rational::Fraction;
use crate::repetition::repetition_vector;
use crate::simulate::Simulator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowState {
    Start,
    ModelNonLocalMemory,
    ComputeStorageDist,
    SelectStorageDist,
    EstimateStorageDist,
    EstimateLatencyConstraint,
    EstimateBandwidthConstraint,
    BindGraphToTiles,
    StaticOrderScheduleTiles,
    AllocateTdmaSlices,
    OptimizeStorageAllocations,
    ExtractCommunicationConstraints,
    ScheduleCommunication,
    UpdateBandwidthAllocations,
    Completed,
    Failed,
}

/// Platform description consumed by the flow.
#[derive(Debug, Clone)]
pub struct FlowPlatform {
    pub tiles: Vec<FlowTile>,
    pub network: Option<InterconnectGraph>,
    /// NoC node of each tile, when a network is present.
    pub tile_nodes: Vec<Option<NodeId>>,
}

#[derive(Debug, Clone)]
pub struct FlowTile {
    pub name: String,
    pub wheel_size: Time,
    pub memory: Option<u64>,
}

/// Mapping produced by a completed flow.
#[derive(Debug, Clone, Serialize)]
pub struct MappingResult {
    pub storage: Vec<u64>,
    pub binding: Binding,
    pub throughput_num: u64,
    pub throughput_den: u64,
    pub tile_utilization: Vec<f64>,
    /// Fraction of each NoC link's slots in use, when communication was
    /// scheduled.
    pub link_usage: Vec<f64>,
}

pub struct MappingFlow {
    g: Graph,
    platform: FlowPlatform,
    bound: Fraction,
    state: FlowState,
    explorer: BufferAnalysis,
    selected: Option<usize>,
    binding: Option<Binding>,
    binding_throughput: Option<Fraction>,
    tile_utilization: Vec<f64>,
    period_estimate: Time,
    messages: Vec<MessageSpec>,
    noc: Option<NocScheduler>,
    link_usage: Vec<f64>,
}

impl MappingFlow {
    pub fn new(g: Graph, platform: FlowPlatform, bound: Fraction) -> Result<Self> {
        let explorer = BufferAnalysis::new(&g)?;
        Ok(MappingFlow {
            g,
            platform,
            bound,
            state: FlowState::Start,
            explorer,
            selected: None,
            binding: None,
            binding_throughput: None,
            tile_utilization: Vec::new(),
            period_estimate: 0,
            messages: Vec::new(),
            noc: None,
            link_usage: Vec::new(),
        })
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Run the flow to completion (or failure).
    pub fn run(&mut self) -> Result<FlowState> {
        while self.state != FlowState::Completed && self.state != FlowState::Failed {
            self.step()?;
        }
        Ok(self.state)
    }

    /// Mapping of a completed flow.
    pub fn result(&self) -> Option<MappingResult> {
        if self.state != FlowState::Completed {
            return None;
        }
        let binding = self.binding.clone()?;
        let thr = self.binding_throughput?;
        let storage = self
            .selected
            .map(|i| {
                self.explorer.front_sets()[i].distributions[0]
                    .sp
                    .clone()
            })
            .unwrap_or_default();
        Some(MappingResult {
            storage,
            binding,
            throughput_num: thr.numerator(),
            throughput_den: thr.denominator(),
            tile_utilization: self.tile_utilization.clone(),
            link_usage: self.link_usage.clone(),
        })
    }

    pub fn noc_scheduler(&self) -> Option<&NocScheduler> {
        self.noc.as_ref()
    }

    /// Execute one state transition.
    pub fn step(&mut self) -> Result<FlowState> {
        log::info!("mapping flow: {:?}", self.state);
        let next = match self.state {
            FlowState::Start => self.check_inputs()?,
            FlowState::ModelNonLocalMemory => FlowState::ComputeStorageDist,
            FlowState::ComputeStorageDist => self.compute_storage_distributions()?,
            FlowState::SelectStorageDist => self.select_storage_distribution(),
            FlowState::EstimateStorageDist => self.estimate_storage(),
            FlowState::EstimateLatencyConstraint => self.estimate_latency(),
            FlowState::EstimateBandwidthConstraint => FlowState::BindGraphToTiles,
            FlowState::BindGraphToTiles => self.bind_graph_to_tiles(),
            FlowState::StaticOrderScheduleTiles => self.static_order_schedule()?,
            FlowState::AllocateTdmaSlices => self.allocate_tdma_slices()?,
            FlowState::OptimizeStorageAllocations => {
                if self.platform.network.is_some() {
                    FlowState::ExtractCommunicationConstraints
                } else {
                    FlowState::Completed
                }
            }
            FlowState::ExtractCommunicationConstraints => self.extract_communication(),
            FlowState::ScheduleCommunication => self.schedule_communication(),
            FlowState::UpdateBandwidthAllocations => self.update_bandwidth(),
            FlowState::Completed | FlowState::Failed => self.state,
        };
        self.state = next;
        Ok(self.state)
    }

    // -----------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------

    fn check_inputs(&self) -> Result<FlowState> {
        self.g.validate()?;
        if self.platform.tiles.is_empty() {
            return Err(AnalysisError::Validation(
                "platform has no tiles to bind to".into(),
            ));
        }
        if self.platform.tile_nodes.len() != self.platform.tiles.len() {
            return Err(AnalysisError::Validation(
                "platform tile/node tables differ in length".into(),
            ));
        }
        Ok(FlowState::ModelNonLocalMemory)
    }

    fn compute_storage_distributions(&mut self) -> Result<FlowState> {
        self.explorer.analyze(Some(self.bound))?;
        Ok(FlowState::SelectStorageDist)
    }

    /// Pick the next (larger) distribution meeting the throughput bound.
    fn select_storage_distribution(&mut self) -> FlowState {
        let from = self.selected.map_or(0, |i| i + 1);
        let front = self.explorer.front_sets();
        for i in from..front.len() {
            if front[i].throughput >= self.bound {
                self.selected = Some(i);
                log::debug!(
                    "selected storage distribution of size {} (throughput {})",
                    front[i].sz,
                    front[i].throughput
                );
                return FlowState::EstimateStorageDist;
            }
        }
        log::warn!("storage distributions exhausted");
        FlowState::Failed
    }

    /// Storage plus actor state must fit the combined tile memories.
    fn estimate_storage(&mut self) -> FlowState {
        let Some(idx) = self.selected else {
            return FlowState::Failed;
        };
        let d = &self.explorer.front_sets()[idx].distributions[0];
        let mut needed: u64 = self
            .g
            .channels()
            .zip(d.sp.iter())
            .map(|(c, &sp)| sp * c.token_size.unwrap_or(1))
            .sum();
        for a in self.g.actors() {
            needed += a.profiles[a.default_profile].state_size.unwrap_or(0);
        }

        let capacities: Vec<Option<u64>> =
            self.platform.tiles.iter().map(|t| t.memory).collect();
        if capacities.iter().all(|m| m.is_none()) {
            return FlowState::EstimateLatencyConstraint;
        }
        let available: u64 = capacities.iter().map(|m| m.unwrap_or(0)).sum();
        if needed > available {
            log::debug!("distribution needs {} bytes, platform has {}", needed, available);
            return FlowState::SelectStorageDist;
        }
        FlowState::EstimateLatencyConstraint
    }

    fn estimate_latency(&mut self) -> FlowState {
        let Some(idx) = self.selected else {
            return FlowState::Failed;
        };
        // One period of the target throughput bounds every later timing
        // estimate (message durations, slice search).
        let thr = self.explorer.front_sets()[idx].throughput;
        self.period_estimate = if thr.numerator() == 0 {
            0
        } else {
            thr.denominator().div_ceil(thr.numerator())
        };
        FlowState::EstimateBandwidthConstraint
    }

    /// Greedy load balancing over the tiles, respecting tile memory.
    fn bind_graph_to_tiles(&mut self) -> FlowState {
        let q = repetition_vector(&self.g);
        let mut order: Vec<usize> = (0..self.g.nr_actors()).collect();
        let load = |a: usize| {
            self.g.actor(crate::graph::ActorId(a)).exec_time(0) * q[a]
        };
        order.sort_by_key(|&a| std::cmp::Reverse(load(a)));

        let nr_tiles = self.platform.tiles.len();
        let mut tile_load = vec![0u64; nr_tiles];
        let mut tile_mem_used = vec![0u64; nr_tiles];
        let mut actor_tile = vec![None; self.g.nr_actors()];

        for a in order {
            let state = self
                .g
                .actor(crate::graph::ActorId(a))
                .profiles
                .first()
                .and_then(|p| p.state_size)
                .unwrap_or(0);
            let mut best: Option<usize> = None;
            for t in 0..nr_tiles {
                if let Some(mem) = self.platform.tiles[t].memory {
                    if tile_mem_used[t] + state > mem {
                        continue;
                    }
                }
                if best.map_or(true, |b| tile_load[t] < tile_load[b]) {
                    best = Some(t);
                }
            }
            let Some(t) = best else {
                log::debug!("no tile can hold actor {}", a);
                return FlowState::SelectStorageDist;
            };
            actor_tile[a] = Some(t);
            tile_load[t] += load(a);
            tile_mem_used[t] += state;
        }

        let tiles = self
            .platform
            .tiles
            .iter()
            .map(|t| Tile {
                name: t.name.clone(),
                wheel_size: t.wheel_size,
                slice: t.wheel_size,
                schedule: Vec::new(),
            })
            .collect();
        self.binding = Some(Binding { tiles, actor_tile });
        FlowState::StaticOrderScheduleTiles
    }

    /// Static orders from the start order of one self-timed iteration.
    fn static_order_schedule(&mut self) -> Result<FlowState> {
        let q = repetition_vector(&self.g);
        let mut sim = Simulator::new(&self.g)?;
        let mut demand = q.clone();
        let mut order: Vec<usize> = Vec::new();

        loop {
            for a in self.g.actor_ids() {
                while sim.ready_to_end(a) {
                    sim.end_firing(a);
                }
            }
            for a in self.g.actor_ids() {
                while demand[a.0] > 0 && sim.ready_to_start(a) {
                    sim.start_firing(a);
                    demand[a.0] -= 1;
                    order.push(a.0);
                }
            }
            if demand.iter().all(|&d| d == 0) {
                break;
            }
            if sim.clock_step(crate::graph::TIME_INFINITY) == crate::graph::TIME_INFINITY {
                log::warn!("graph deadlocks; no static order exists");
                return Ok(FlowState::Failed);
            }
        }

        let Some(binding) = self.binding.as_mut() else {
            return Ok(FlowState::Failed);
        };
        for tile in binding.tiles.iter_mut() {
            tile.schedule.clear();
        }
        for a in order {
            if let Some(t) = binding.actor_tile[a] {
                binding.tiles[t].schedule.push(a);
            }
        }
        Ok(FlowState::AllocateTdmaSlices)
    }

    /// Smallest per-tile slices that still meet the throughput bound.
    fn allocate_tdma_slices(&mut self) -> Result<FlowState> {
        let Some(binding) = self.binding.clone() else {
            return Ok(FlowState::Failed);
        };

        // Even full wheels may miss the bound: then the distribution choice
        // (or binding derived from it) was too tight.
        let full = binding_aware_throughput(&self.g, &binding)?;
        if full.throughput() < self.bound {
            log::debug!(
                "binding reaches {} below bound {}",
                full.throughput(),
                self.bound
            );
            return Ok(FlowState::SelectStorageDist);
        }

        let mut binding = binding;
        for t in 0..binding.tiles.len() {
            if binding.tiles[t].schedule.is_empty() {
                continue;
            }
            let wheel = binding.tiles[t].wheel_size;
            let mut lo = 1;
            let mut hi = wheel;
            while lo < hi {
                let mid = (lo + hi) / 2;
                binding.tiles[t].slice = mid;
                let r = binding_aware_throughput(&self.g, &binding)?;
                if r.throughput() >= self.bound {
                    hi = mid;
                } else {
                    lo = mid + 1;
                }
            }
            binding.tiles[t].slice = lo;
        }

        let result = binding_aware_throughput(&self.g, &binding)?;
        self.tile_utilization = result.tile_utilization.clone();
        self.binding_throughput = Some(result.throughput());
        self.binding = Some(binding);
        Ok(FlowState::OptimizeStorageAllocations)
    }

    /// Messages for every channel whose endpoints sit on different tiles.
    fn extract_communication(&mut self) -> FlowState {
        let Some(binding) = self.binding.as_ref() else {
            return FlowState::Failed;
        };
        let q = repetition_vector(&self.g);
        self.messages.clear();

        for c in self.g.channels() {
            let src = self.g.src_actor(c.id);
            let dst = self.g.dst_actor(c.id);
            let (Some(ts), Some(td)) = (binding.actor_tile[src.0], binding.actor_tile[dst.0])
            else {
                continue;
            };
            if ts == td {
                continue;
            }
            let (Some(src_node), Some(dst_node)) =
                (self.platform.tile_nodes[ts], self.platform.tile_nodes[td])
            else {
                continue;
            };
            let tokens = q[src.0] * self.g.src_rate(c.id).at(0);
            self.messages.push(MessageSpec {
                stream_id: c.id.0 as u64,
                src: src_node,
                dst: dst_node,
                size: tokens * c.token_size.unwrap_or(1),
                start_time: 0,
                duration: self.period_estimate.max(1),
            });
        }

        if self.messages.is_empty() {
            FlowState::Completed
        } else {
            FlowState::ScheduleCommunication
        }
    }

    fn schedule_communication(&mut self) -> FlowState {
        let Some(network) = self.platform.network.clone() else {
            return FlowState::Failed;
        };
        let problem = NocProblem::new("mapping", self.messages.clone());
        let mut scheduler = NocScheduler::new(network, vec![problem]);
        match scheduler.schedule(&Strategy::Greedy { max_detour: 2 }) {
            Ok(()) => {
                self.noc = Some(scheduler);
                FlowState::UpdateBandwidthAllocations
            }
            Err(AnalysisError::Infeasible(msg)) => {
                log::debug!("communication scheduling failed: {}", msg);
                FlowState::SelectStorageDist
            }
            Err(_) => FlowState::Failed,
        }
    }

    /// Per-link slot occupancy after communication scheduling.
    fn update_bandwidth(&mut self) -> FlowState {
        let Some(scheduler) = self.noc.as_ref() else {
            return FlowState::Failed;
        };
        let t = scheduler.graph.slot_table_size as f64;
        self.link_usage = scheduler
            .graph
            .links
            .iter()
            .map(|l| {
                let used: usize = l
                    .slot_tables
                    .iter()
                    .map(|st| st.slots.iter().filter(|s| s.is_some()).count())
                    .sum();
                used as f64 / (t * l.slot_tables.len() as f64)
            })
            .collect();
        FlowState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn pair() -> Graph {
        let mut g = Graph::new("pair");
        let a = g.add_actor("a", vec![2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);
        g
    }

    fn two_tile_platform(with_network: bool) -> FlowPlatform {
        let (network, tile_nodes) = if with_network {
            let mut net = InterconnectGraph::new(8, 1, 1, 0, 0);
            let n0 = net.add_node("n0");
            let n1 = net.add_node("n1");
            net.connect(n0, n1);
            net.connect(n1, n0);
            (Some(net), vec![Some(n0), Some(n1)])
        } else {
            (None, vec![None, None])
        };
        FlowPlatform {
            tiles: vec![
                FlowTile {
                    name: "t0".into(),
                    wheel_size: 10,
                    memory: None,
                },
                FlowTile {
                    name: "t1".into(),
                    wheel_size: 10,
                    memory: None,
                },
            ],
            network,
            tile_nodes,
        }
    }

    #[test]
    fn test_flow_completes_without_network() {
        let g = pair();
        let mut flow =
            MappingFlow::new(g, two_tile_platform(false), Fraction::new(1, 20)).unwrap();
        let end = flow.run().unwrap();
        assert_eq!(end, FlowState::Completed);
        let result = flow.result().unwrap();
        assert!(result.throughput_num > 0);
        assert_eq!(result.binding.actor_tile.len(), 2);
    }

    #[test]
    fn test_flow_schedules_communication() {
        let g = pair();
        let mut flow =
            MappingFlow::new(g, two_tile_platform(true), Fraction::new(1, 20)).unwrap();
        let end = flow.run().unwrap();
        assert_eq!(end, FlowState::Completed);
        let result = flow.result().unwrap();
        // Actors land on different tiles, so both channels cross the NoC.
        if result.binding.actor_tile[0] != result.binding.actor_tile[1] {
            assert!(flow.noc_scheduler().is_some());
            assert!(result.link_usage.iter().any(|&u| u > 0.0));
        }
    }

    #[test]
    fn test_flow_fails_on_unreachable_bound() {
        let g = pair();
        // The pair can never exceed 1/5 iterations per time unit.
        let mut flow = MappingFlow::new(g, two_tile_platform(false), Fraction::new(1, 2)).unwrap();
        let end = flow.run().unwrap();
        assert_eq!(end, FlowState::Failed);
    }

    #[test]
    fn test_flow_step_mode_walks_states() {
        let g = pair();
        let mut flow =
            MappingFlow::new(g, two_tile_platform(false), Fraction::new(1, 20)).unwrap();
        assert_eq!(flow.state(), FlowState::Start);
        flow.step().unwrap();
        assert_eq!(flow.state(), FlowState::ModelNonLocalMemory);
        flow.step().unwrap();
        assert_eq!(flow.state(), FlowState::ComputeStorageDist);
        let end = flow.run().unwrap();
        assert_eq!(end, FlowState::Completed);
    }
}
