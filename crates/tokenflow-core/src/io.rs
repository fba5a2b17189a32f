//! Graph and platform documents.
//!
//! The on-disk format is a JSON tree with one application graph and
//! optional platform, mapping, and network sections. Rates accept either a
//! single integer (SDF) or a sequence (CSDF); buffer capacities are either
//! an integer or absent for unbounded channels.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::binding::{Binding, Tile};
use crate::error::{AnalysisError, Result};
use crate::graph::{Graph, Profile, Rate};
use crate::noc::{InterconnectGraph, MessageSpec, NocProblem};

/// A rate written either as one integer or as a phase sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RateSpec {
    Constant(u64),
    Sequence(Vec<u64>),
}

impl RateSpec {
    fn to_rate(&self) -> Result<Rate> {
        match self {
            RateSpec::Constant(r) => Ok(Rate::from(*r)),
            RateSpec::Sequence(seq) => {
                if seq.is_empty() {
                    return Err(AnalysisError::Validation("empty rate sequence".into()));
                }
                Ok(Rate::from(seq.clone()))
            }
        }
    }

    fn from_rate(rate: &Rate) -> Self {
        if rate.len() == 1 {
            RateSpec::Constant(rate.at(0))
        } else {
            RateSpec::Sequence(rate.seq().to_vec())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSpec {
    pub processor: String,
    pub exec_time: RateSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorSpec {
    pub name: String,
    pub profiles: Vec<ProfileSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub src: String,
    pub dst: String,
    pub src_rate: RateSpec,
    pub dst_rate: RateSpec,
    #[serde(default)]
    pub initial_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_size: Option<u64>,
    /// Absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSpec {
    pub name: String,
    pub actors: Vec<ActorSpec>,
    pub channels: Vec<ChannelSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileSpec {
    pub name: String,
    pub wheel_size: u64,
    pub slice: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_bandwidth: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_bandwidth: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub slot_table_size: u64,
    #[serde(default = "one")]
    pub nr_slot_tables: u64,
    pub flit_size: u64,
    pub header_size: u64,
    #[serde(default)]
    pub reconfiguration_time: u64,
    pub nodes: Vec<String>,
    /// Directed links as (from, to) node-name pairs.
    pub links: Vec<(String, String)>,
}

fn one() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub tiles: Vec<TileSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,
}

/// Actor-to-tile assignment plus per-tile static orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingSpec {
    /// (actor name, tile name) pairs; unlisted actors stay unbound.
    pub bindings: Vec<(String, String)>,
    /// (tile name, ordered actor names) pairs.
    pub static_orders: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageIoSpec {
    pub stream_id: u64,
    pub src: String,
    pub dst: String,
    pub size: u64,
    pub start_time: u64,
    pub duration: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NocProblemSpec {
    pub name: String,
    pub messages: Vec<MessageIoSpec>,
}

/// Root document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub application: ApplicationSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<MappingSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub noc_problems: Vec<NocProblemSpec>,
}

pub fn load_document(path: &Path) -> Result<Document> {
    let text = fs::read_to_string(path)?;
    let doc: Document = serde_json::from_str(&text)?;
    Ok(doc)
}

pub fn save_document(path: &Path, doc: &Document) -> Result<()> {
    let text = serde_json::to_string_pretty(doc)?;
    fs::write(path, text)?;
    Ok(())
}

/// Build the in-memory graph from an application section.
pub fn graph_from_spec(spec: &ApplicationSpec) -> Result<Graph> {
    let mut g = Graph::new(&spec.name);
    for actor in &spec.actors {
        if actor.profiles.is_empty() {
            return Err(AnalysisError::Validation(format!(
                "actor '{}' has no processor profile",
                actor.name
            )));
        }
        let mut default = None;
        let profiles: Vec<Profile> = actor
            .profiles
            .iter()
            .enumerate()
            .map(|(i, p)| -> Result<Profile> {
                if p.default {
                    default = Some(i);
                }
                let exec = p.exec_time.to_rate().map_err(|_| {
                    AnalysisError::Validation(format!(
                        "actor '{}' profile '{}' has an empty execution-time sequence",
                        actor.name, p.processor
                    ))
                })?;
                Ok(Profile {
                    processor: p.processor.clone(),
                    exec_time: exec.seq().to_vec(),
                    state_size: p.state_size,
                    weight: p.weight,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        g.add_actor_with_profiles(&actor.name, profiles, default.unwrap_or(0));
    }

    for ch in &spec.channels {
        let src = g.actor_by_name(&ch.src).ok_or_else(|| {
            AnalysisError::Validation(format!("channel '{}': unknown actor '{}'", ch.name, ch.src))
        })?;
        let dst = g.actor_by_name(&ch.dst).ok_or_else(|| {
            AnalysisError::Validation(format!("channel '{}': unknown actor '{}'", ch.name, ch.dst))
        })?;
        let id = g.connect(src, ch.src_rate.to_rate()?, dst, ch.dst_rate.to_rate()?, ch.initial_tokens);
        let channel = g.channel_mut(id);
        channel.name = ch.name.clone();
        channel.token_size = ch.token_size;
        channel.capacity = ch.capacity;
    }

    g.validate()?;
    Ok(g)
}

/// Serialise a graph back into an application section.
pub fn spec_from_graph(g: &Graph) -> ApplicationSpec {
    ApplicationSpec {
        name: g.name.clone(),
        actors: g
            .actors()
            .map(|a| ActorSpec {
                name: a.name.clone(),
                profiles: a
                    .profiles
                    .iter()
                    .enumerate()
                    .map(|(i, p)| ProfileSpec {
                        processor: p.processor.clone(),
                        exec_time: if p.exec_time.len() == 1 {
                            RateSpec::Constant(p.exec_time[0])
                        } else {
                            RateSpec::Sequence(p.exec_time.clone())
                        },
                        state_size: p.state_size,
                        weight: p.weight,
                        default: i == a.default_profile,
                    })
                    .collect(),
            })
            .collect(),
        channels: g
            .channels()
            .map(|c| ChannelSpec {
                name: c.name.clone(),
                src: g.actor(g.src_actor(c.id)).name.clone(),
                dst: g.actor(g.dst_actor(c.id)).name.clone(),
                src_rate: RateSpec::from_rate(g.src_rate(c.id)),
                dst_rate: RateSpec::from_rate(g.dst_rate(c.id)),
                initial_tokens: c.initial_tokens,
                token_size: c.token_size,
                capacity: c.capacity,
            })
            .collect(),
    }
}

/// Build the interconnect graph from a network section.
pub fn interconnect_from_spec(net: &NetworkSpec) -> Result<InterconnectGraph> {
    if net.slot_table_size == 0 || net.flit_size == 0 {
        return Err(AnalysisError::Validation(
            "network needs a positive slot-table size and flit size".into(),
        ));
    }
    let mut g = InterconnectGraph::new(
        net.slot_table_size,
        net.nr_slot_tables,
        net.flit_size,
        net.header_size,
        net.reconfiguration_time,
    );
    for n in &net.nodes {
        g.add_node(n);
    }
    for (from, to) in &net.links {
        let src = g
            .node_by_name(from)
            .ok_or_else(|| AnalysisError::Validation(format!("unknown network node '{}'", from)))?;
        let dst = g
            .node_by_name(to)
            .ok_or_else(|| AnalysisError::Validation(format!("unknown network node '{}'", to)))?;
        g.connect(src, dst);
    }
    Ok(g)
}

/// Build NoC problems against the given interconnect.
pub fn noc_problems_from_spec(
    net: &InterconnectGraph,
    specs: &[NocProblemSpec],
) -> Result<Vec<NocProblem>> {
    specs
        .iter()
        .map(|p| {
            let messages = p
                .messages
                .iter()
                .map(|m| {
                    let src = net.node_by_name(&m.src).ok_or_else(|| {
                        AnalysisError::Validation(format!("unknown network node '{}'", m.src))
                    })?;
                    let dst = net.node_by_name(&m.dst).ok_or_else(|| {
                        AnalysisError::Validation(format!("unknown network node '{}'", m.dst))
                    })?;
                    Ok(MessageSpec {
                        stream_id: m.stream_id,
                        src,
                        dst,
                        size: m.size,
                        start_time: m.start_time,
                        duration: m.duration,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(NocProblem::new(&p.name, messages))
        })
        .collect()
}

/// Build the binding from platform + mapping sections.
pub fn binding_from_spec(
    g: &Graph,
    platform: &PlatformSpec,
    mapping: &MappingSpec,
) -> Result<Binding> {
    let mut tiles: Vec<Tile> = platform
        .tiles
        .iter()
        .map(|t| Tile {
            name: t.name.clone(),
            wheel_size: t.wheel_size,
            slice: t.slice,
            schedule: Vec::new(),
        })
        .collect();

    let tile_index = |name: &str| -> Result<usize> {
        platform
            .tiles
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| AnalysisError::Validation(format!("unknown tile '{}'", name)))
    };

    let mut actor_tile = vec![None; g.nr_actors()];
    for (actor, tile) in &mapping.bindings {
        let a = g
            .actor_by_name(actor)
            .ok_or_else(|| AnalysisError::Validation(format!("unknown actor '{}'", actor)))?;
        actor_tile[a.0] = Some(tile_index(tile)?);
    }

    for (tile, actors) in &mapping.static_orders {
        let t = tile_index(tile)?;
        for name in actors {
            let a = g
                .actor_by_name(name)
                .ok_or_else(|| AnalysisError::Validation(format!("unknown actor '{}'", name)))?;
            tiles[t].schedule.push(a.0);
        }
    }

    let binding = Binding { tiles, actor_tile };
    binding.validate(g)?;
    Ok(binding)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_doc() -> Document {
        Document {
            application: ApplicationSpec {
                name: "pair".into(),
                actors: vec![
                    ActorSpec {
                        name: "a".into(),
                        profiles: vec![ProfileSpec {
                            processor: "arm".into(),
                            exec_time: RateSpec::Constant(2),
                            state_size: Some(16),
                            weight: None,
                            default: true,
                        }],
                    },
                    ActorSpec {
                        name: "b".into(),
                        profiles: vec![ProfileSpec {
                            processor: "arm".into(),
                            exec_time: RateSpec::Constant(3),
                            state_size: None,
                            weight: Some(1.0),
                            default: true,
                        }],
                    },
                ],
                channels: vec![
                    ChannelSpec {
                        name: "fwd".into(),
                        src: "a".into(),
                        dst: "b".into(),
                        src_rate: RateSpec::Constant(1),
                        dst_rate: RateSpec::Constant(1),
                        initial_tokens: 0,
                        token_size: Some(4),
                        capacity: None,
                    },
                    ChannelSpec {
                        name: "bwd".into(),
                        src: "b".into(),
                        dst: "a".into(),
                        src_rate: RateSpec::Constant(1),
                        dst_rate: RateSpec::Constant(1),
                        initial_tokens: 1,
                        token_size: None,
                        capacity: Some(2),
                    },
                ],
            },
            platform: None,
            mapping: None,
            noc_problems: Vec::new(),
        }
    }

    #[test]
    fn test_graph_round_trip() {
        let doc = pair_doc();
        let g = graph_from_spec(&doc.application).unwrap();
        assert_eq!(g.nr_actors(), 2);
        assert_eq!(g.nr_channels(), 2);
        assert_eq!(g.channel(crate::graph::ChannelId(1)).capacity, Some(2));

        let back = spec_from_graph(&g);
        assert_eq!(back.actors.len(), 2);
        assert_eq!(back.channels[0].name, "fwd");
    }

    #[test]
    fn test_document_file_round_trip() {
        let doc = pair_doc();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair.json");
        save_document(&path, &doc).unwrap();
        let loaded = load_document(&path).unwrap();
        assert_eq!(loaded.application.name, "pair");
        assert_eq!(loaded.application.channels.len(), 2);
        let g = graph_from_spec(&loaded.application).unwrap();
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_csdf_rates_parse() {
        let json = r#"{
            "application": {
                "name": "csdf",
                "actors": [
                    {"name": "a", "profiles": [{"processor": "p", "exec_time": 1, "default": true}]},
                    {"name": "b", "profiles": [{"processor": "p", "exec_time": 2, "default": true}]}
                ],
                "channels": [
                    {"name": "c0", "src": "a", "dst": "b",
                     "src_rate": [1, 2, 1], "dst_rate": 4, "initial_tokens": 0},
                    {"name": "c1", "src": "b", "dst": "a",
                     "src_rate": 4, "dst_rate": [1, 2, 1], "initial_tokens": 4}
                ]
            }
        }"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        let g = graph_from_spec(&doc.application).unwrap();
        assert!(!g.is_sdf());
        assert_eq!(crate::repetition::repetition_vector(&g), vec![3, 1]);
    }

    #[test]
    fn test_unknown_actor_rejected() {
        let mut doc = pair_doc();
        doc.application.channels[0].src = "ghost".into();
        assert!(graph_from_spec(&doc.application).is_err());
    }

    #[test]
    fn test_empty_exec_sequence_rejected_with_context() {
        let mut doc = pair_doc();
        doc.application.actors[0].profiles[0].exec_time = RateSpec::Sequence(Vec::new());
        let err = graph_from_spec(&doc.application).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'a'"));
        assert!(msg.contains("execution-time sequence"));
    }
}
