//! NoC scheduling problem: messages, streams, routes, scheduling entities.

use crate::graph::Time;
use crate::noc::interconnect::{InterconnectGraph, LinkId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub usize);

/// Input description of one message.
#[derive(Debug, Clone)]
pub struct MessageSpec {
    pub stream_id: u64,
    pub src: NodeId,
    pub dst: NodeId,
    pub size: u64,
    pub start_time: Time,
    pub duration: Time,
}

/// A message to be scheduled. Messages of one stream form a chain in
/// admission order; their realisations must not overtake each other.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub stream_id: u64,
    pub src: NodeId,
    pub dst: NodeId,
    pub size: u64,
    pub start_time: Time,
    pub duration: Time,
    pub cost: f64,
    pub prev_in_stream: Option<MessageId>,
    pub next_in_stream: Option<MessageId>,
    pub entity: Option<SchedulingEntity>,
}

/// An ordered link sequence from source to destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub links: Vec<LinkId>,
    pub cost: f64,
}

impl Route {
    pub fn new(links: Vec<LinkId>) -> Self {
        Route { links, cost: 0.0 }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains_node(&self, g: &InterconnectGraph, node: NodeId) -> bool {
        self.links.iter().any(|&l| {
            let link = g.link(l);
            link.src == node || link.dst == node
        })
    }

    pub fn same_links(&self, other: &Route) -> bool {
        self.links == other.links
    }
}

/// A message's realisation on the NoC. The slot bitmap is expressed for the
/// first link of the route; link `k` uses the bitmap rotated by `k`.
#[derive(Debug, Clone)]
pub struct SchedulingEntity {
    pub start_time: Time,
    pub duration: Time,
    pub route: Route,
    pub slots: Vec<bool>,
}

impl SchedulingEntity {
    pub fn nr_slots(&self) -> u64 {
        self.slots.iter().filter(|&&s| s).count() as u64
    }

    /// Slot bitmap as seen by link `k` of the route.
    pub fn slots_on_link(&self, k: usize) -> Vec<bool> {
        let t = self.slots.len();
        let mut shifted = vec![false; t];
        for (i, &s) in self.slots.iter().enumerate() {
            shifted[(i + k) % t] = s;
        }
        shifted
    }
}

/// A contiguous run of free slots usable as one packet.
#[derive(Debug, Clone, Copy)]
pub struct Packet {
    pub nr_slots: u64,
    pub start: usize,
    pub end: usize,
    /// Wraps around the slot-table boundary.
    pub loops: bool,
}

/// One scheduling problem: a message set over the shared interconnect.
#[derive(Debug, Clone)]
pub struct NocProblem {
    pub name: String,
    pub messages: Vec<Message>,
    pub solved: bool,
}

impl NocProblem {
    pub fn new(name: &str, specs: Vec<MessageSpec>) -> Self {
        let mut messages: Vec<Message> = specs
            .into_iter()
            .enumerate()
            .map(|(i, s)| Message {
                id: MessageId(i),
                stream_id: s.stream_id,
                src: s.src,
                dst: s.dst,
                size: s.size,
                start_time: s.start_time,
                duration: s.duration,
                cost: 0.0,
                prev_in_stream: None,
                next_in_stream: None,
                entity: None,
            })
            .collect();

        // Chain messages of the same stream in admission order.
        let order: Vec<usize> = {
            let mut idx: Vec<usize> = (0..messages.len()).collect();
            idx.sort_by_key(|&i| (messages[i].stream_id, messages[i].start_time, i));
            idx
        };
        for pair in order.windows(2) {
            let (p, n) = (pair[0], pair[1]);
            if messages[p].stream_id == messages[n].stream_id {
                messages[p].next_in_stream = Some(MessageId(n));
                messages[n].prev_in_stream = Some(MessageId(p));
            }
        }

        NocProblem {
            name: name.to_string(),
            messages,
            solved: false,
        }
    }

    pub fn message(&self, id: MessageId) -> &Message {
        &self.messages[id.0]
    }

    pub fn message_mut(&mut self, id: MessageId) -> &mut Message {
        &mut self.messages[id.0]
    }

    pub fn nr_scheduled(&self) -> usize {
        self.messages.iter().filter(|m| m.entity.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_chaining() {
        let n0 = NodeId(0);
        let n1 = NodeId(1);
        let p = NocProblem::new(
            "p",
            vec![
                MessageSpec {
                    stream_id: 7,
                    src: n0,
                    dst: n1,
                    size: 4,
                    start_time: 0,
                    duration: 8,
                },
                MessageSpec {
                    stream_id: 7,
                    src: n0,
                    dst: n1,
                    size: 4,
                    start_time: 10,
                    duration: 8,
                },
                MessageSpec {
                    stream_id: 3,
                    src: n0,
                    dst: n1,
                    size: 2,
                    start_time: 0,
                    duration: 4,
                },
            ],
        );
        assert_eq!(p.messages[0].next_in_stream, Some(MessageId(1)));
        assert_eq!(p.messages[1].prev_in_stream, Some(MessageId(0)));
        assert_eq!(p.messages[2].prev_in_stream, None);
        assert_eq!(p.messages[2].next_in_stream, None);
    }

    #[test]
    fn test_entity_slot_rotation() {
        let e = SchedulingEntity {
            start_time: 0,
            duration: 8,
            route: Route::new(vec![LinkId(0), LinkId(1)]),
            slots: vec![true, false, false, true],
        };
        assert_eq!(e.slots_on_link(0), vec![true, false, false, true]);
        assert_eq!(e.slots_on_link(1), vec![true, true, false, false]);
        assert_eq!(e.nr_slots(), 2);
    }
}
