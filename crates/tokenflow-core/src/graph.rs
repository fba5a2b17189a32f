//! Timed dataflow graph model.
//!
//! A graph is an arena: actors, ports, and channels live in flat vectors and
//! refer to each other through integer ids only. This keeps the inevitable
//! cycles (channel → port → actor → port → channel) representable without
//! reference counting and makes cloning a graph for analysis-local edits a
//! plain memberwise copy.
//!
//! Both dialects share one model: a rate is a non-empty sequence indexed by
//! the firing phase. SDF ports carry a single-element sequence, CSDF ports a
//! longer one. Execution times are sequences in the same way.

use crate::error::{AnalysisError, Result};

/// Time unit used by every analysis.
pub type Time = u64;

/// Sentinel for "no progress possible".
pub const TIME_INFINITY: Time = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub usize);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a{}", self.0)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Port direction relative to its actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    In,
    Out,
}

/// A per-phase rate sequence. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rate(Vec<u64>);

impl Rate {
    pub fn new(seq: Vec<u64>) -> Self {
        debug_assert!(!seq.is_empty());
        Rate(seq)
    }

    /// Rate at the given firing phase. Length-1 sequences broadcast.
    pub fn at(&self, phase: usize) -> u64 {
        self.0[phase % self.0.len()]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every phase carries the same rate.
    pub fn is_constant(&self) -> bool {
        self.0.iter().all(|&r| r == self.0[0])
    }

    /// Tokens moved by one full phase cycle.
    pub fn cycle_total(&self) -> u64 {
        self.0.iter().sum()
    }

    /// Largest single-phase rate.
    pub fn max(&self) -> u64 {
        *self.0.iter().max().unwrap()
    }

    pub fn seq(&self) -> &[u64] {
        &self.0
    }
}

impl From<u64> for Rate {
    fn from(r: u64) -> Self {
        Rate(vec![r])
    }
}

impl From<Vec<u64>> for Rate {
    fn from(seq: Vec<u64>) -> Self {
        Rate::new(seq)
    }
}

impl From<&[u64]> for Rate {
    fn from(seq: &[u64]) -> Self {
        Rate::new(seq.to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct Port {
    pub id: PortId,
    pub kind: PortKind,
    pub rate: Rate,
    pub actor: ActorId,
    pub channel: ChannelId,
}

/// A processor profile: where the actor could run and how long a firing
/// takes there. The weight is carried for future stochastic analyses and is
/// ignored by everything in this crate.
#[derive(Debug, Clone)]
pub struct Profile {
    pub processor: String,
    pub exec_time: Vec<Time>,
    pub state_size: Option<u64>,
    pub weight: Option<f64>,
}

impl Profile {
    pub fn new(processor: &str, exec_time: Vec<Time>) -> Self {
        Profile {
            processor: processor.to_string(),
            exec_time,
            state_size: None,
            weight: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub ports: Vec<PortId>,
    pub profiles: Vec<Profile>,
    pub default_profile: usize,
}

impl Actor {
    /// Execution time of the default profile at the given firing phase.
    pub fn exec_time(&self, phase: usize) -> Time {
        let seq = &self.profiles[self.default_profile].exec_time;
        seq[phase % seq.len()]
    }

    pub fn default_processor(&self) -> &str {
        &self.profiles[self.default_profile].processor
    }
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub src_port: PortId,
    pub dst_port: PortId,
    pub initial_tokens: u64,
    pub token_size: Option<u64>,
    /// `None` means unbounded.
    pub capacity: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Graph {
    pub name: String,
    actors: Vec<Actor>,
    ports: Vec<Port>,
    channels: Vec<Channel>,
}

impl Graph {
    pub fn new(name: &str) -> Self {
        Graph {
            name: name.to_string(),
            actors: Vec::new(),
            ports: Vec::new(),
            channels: Vec::new(),
        }
    }

    // -----------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------

    /// Add an actor with a single default profile.
    pub fn add_actor(&mut self, name: &str, exec_time: impl Into<Vec<Time>>) -> ActorId {
        self.add_actor_with_profiles(name, vec![Profile::new("default", exec_time.into())], 0)
    }

    pub fn add_actor_with_profiles(
        &mut self,
        name: &str,
        profiles: Vec<Profile>,
        default_profile: usize,
    ) -> ActorId {
        let id = ActorId(self.actors.len());
        self.actors.push(Actor {
            id,
            name: name.to_string(),
            ports: Vec::new(),
            profiles,
            default_profile,
        });
        id
    }

    /// Connect `src` to `dst` with a new channel carrying `initial_tokens`.
    /// Creates the two ports.
    pub fn connect(
        &mut self,
        src: ActorId,
        src_rate: impl Into<Rate>,
        dst: ActorId,
        dst_rate: impl Into<Rate>,
        initial_tokens: u64,
    ) -> ChannelId {
        let ch_id = ChannelId(self.channels.len());
        let src_port = PortId(self.ports.len());
        self.ports.push(Port {
            id: src_port,
            kind: PortKind::Out,
            rate: src_rate.into(),
            actor: src,
            channel: ch_id,
        });
        self.actors[src.0].ports.push(src_port);

        let dst_port = PortId(self.ports.len());
        self.ports.push(Port {
            id: dst_port,
            kind: PortKind::In,
            rate: dst_rate.into(),
            actor: dst,
            channel: ch_id,
        });
        self.actors[dst.0].ports.push(dst_port);

        let name = format!("ch{}", ch_id.0);
        self.channels.push(Channel {
            id: ch_id,
            name,
            src_port,
            dst_port,
            initial_tokens,
            token_size: None,
            capacity: None,
        });
        ch_id
    }

    /// Add a self-loop with unit rates, serialising the actor's firings when
    /// `tokens == 1`.
    pub fn add_self_loop(&mut self, actor: ActorId, tokens: u64) -> ChannelId {
        self.connect(actor, 1u64, actor, 1u64, tokens)
    }

    // -----------------------------------------------------------------
    // Access
    // -----------------------------------------------------------------

    pub fn nr_actors(&self) -> usize {
        self.actors.len()
    }

    pub fn nr_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn actor(&self, id: ActorId) -> &Actor {
        &self.actors[id.0]
    }

    pub fn actor_mut(&mut self, id: ActorId) -> &mut Actor {
        &mut self.actors[id.0]
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.iter()
    }

    pub fn actor_ids(&self) -> impl Iterator<Item = ActorId> {
        (0..self.actors.len()).map(ActorId)
    }

    pub fn port(&self, id: PortId) -> &Port {
        &self.ports[id.0]
    }

    pub fn channel(&self, id: ChannelId) -> &Channel {
        &self.channels[id.0]
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> &mut Channel {
        &mut self.channels[id.0]
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> {
        (0..self.channels.len()).map(ChannelId)
    }

    pub fn src_actor(&self, ch: ChannelId) -> ActorId {
        self.port(self.channel(ch).src_port).actor
    }

    pub fn dst_actor(&self, ch: ChannelId) -> ActorId {
        self.port(self.channel(ch).dst_port).actor
    }

    pub fn src_rate(&self, ch: ChannelId) -> &Rate {
        &self.port(self.channel(ch).src_port).rate
    }

    pub fn dst_rate(&self, ch: ChannelId) -> &Rate {
        &self.port(self.channel(ch).dst_port).rate
    }

    pub fn is_self_loop(&self, ch: ChannelId) -> bool {
        self.src_actor(ch) == self.dst_actor(ch)
    }

    /// Ports of an actor, in declaration order.
    pub fn ports_of(&self, actor: ActorId) -> impl Iterator<Item = &Port> {
        self.actors[actor.0].ports.iter().map(move |p| self.port(*p))
    }

    pub fn actor_by_name(&self, name: &str) -> Option<ActorId> {
        self.actors.iter().find(|a| a.name == name).map(|a| a.id)
    }

    /// Number of firing phases of an actor: the longest sequence among its
    /// execution times and port rates.
    pub fn phase_count(&self, actor: ActorId) -> usize {
        let a = &self.actors[actor.0];
        let mut n = a.profiles[a.default_profile].exec_time.len();
        for p in self.ports_of(actor) {
            n = n.max(p.rate.len());
        }
        n
    }

    /// True when every rate and execution-time sequence has length one.
    pub fn is_sdf(&self) -> bool {
        self.actor_ids().all(|a| self.phase_count(a) == 1)
    }

    // -----------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------

    /// Structural validation: the checks that must hold before any analysis
    /// touches the graph. Rate-balance consistency is a separate concern
    /// (see the repetition vector).
    pub fn validate(&self) -> Result<()> {
        if self.actors.is_empty() {
            return Err(AnalysisError::Validation("graph has no actors".into()));
        }
        for a in &self.actors {
            if a.profiles.is_empty() {
                return Err(AnalysisError::Validation(format!(
                    "actor '{}' has no processor profile",
                    a.name
                )));
            }
            if a.default_profile >= a.profiles.len() {
                return Err(AnalysisError::Validation(format!(
                    "actor '{}' has no default profile",
                    a.name
                )));
            }
            for p in &a.profiles {
                if p.exec_time.is_empty() {
                    return Err(AnalysisError::Validation(format!(
                        "actor '{}' profile '{}' has an empty execution-time sequence",
                        a.name, p.processor
                    )));
                }
            }
            let phases = self.phase_count(a.id);
            for port in self.ports_of(a.id) {
                if port.rate.is_empty() {
                    return Err(AnalysisError::Validation(format!(
                        "actor '{}' has a port with an empty rate sequence",
                        a.name
                    )));
                }
                if port.rate.seq().iter().any(|&r| r == 0) {
                    return Err(AnalysisError::Validation(format!(
                        "actor '{}' has a port with a zero rate",
                        a.name
                    )));
                }
                if port.rate.len() != 1 && port.rate.len() != phases {
                    return Err(AnalysisError::Validation(format!(
                        "actor '{}': rate sequence length {} does not match the \
                         actor's {} phases",
                        a.name,
                        port.rate.len(),
                        phases
                    )));
                }
            }
        }
        for c in &self.channels {
            let src = self.port(c.src_port);
            let dst = self.port(c.dst_port);
            if src.kind != PortKind::Out || dst.kind != PortKind::In {
                return Err(AnalysisError::Validation(format!(
                    "channel '{}' has misdirected ports",
                    c.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_actor_graph() -> (Graph, ActorId, ActorId) {
        let mut g = Graph::new("pair");
        let a = g.add_actor("a", vec![2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);
        (g, a, b)
    }

    #[test]
    fn test_connect_creates_ports_and_channel() {
        let (g, a, b) = two_actor_graph();
        assert_eq!(g.nr_actors(), 2);
        assert_eq!(g.nr_channels(), 2);
        assert_eq!(g.src_actor(ChannelId(0)), a);
        assert_eq!(g.dst_actor(ChannelId(0)), b);
        assert_eq!(g.channel(ChannelId(1)).initial_tokens, 1);
    }

    #[test]
    fn test_self_loop_detection() {
        let mut g = Graph::new("loop");
        let x = g.add_actor("x", vec![4]);
        let ch = g.add_self_loop(x, 1);
        assert!(g.is_self_loop(ch));
    }

    #[test]
    fn test_phase_count_and_dialect() {
        let mut g = Graph::new("csdf");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![2]);
        g.connect(a, vec![1, 2, 1], b, 4u64, 0);
        assert_eq!(g.phase_count(a), 3);
        assert_eq!(g.phase_count(b), 1);
        assert!(!g.is_sdf());
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let mut g = Graph::new("bad");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![1]);
        g.connect(a, 0u64, b, 1u64, 0);
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_mismatched_sequence() {
        let mut g = Graph::new("bad");
        let a = g.add_actor("a", vec![1, 2, 3]);
        let b = g.add_actor("b", vec![1]);
        g.connect(a, vec![1, 2], b, 1u64, 0);
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_consistent_graph() {
        let (g, _, _) = two_actor_graph();
        assert!(g.validate().is_ok());
    }
}
