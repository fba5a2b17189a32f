//! Interconnect graph: nodes, directed links, slot tables, preference
//! counters.
//!
//! Every link carries a sequence of slot tables that together cover the
//! slot-table period `P = N·T`. Each table owns `T` slot entries; an entry
//! holds the message occupying that slot during the table's time window.
//! Per-slot *preference* counters remember how often a slot is used by the
//! problem being scheduled; `u32::MAX` freezes a slot owned by another,
//! already-solved problem.

use crate::graph::Time;
use crate::noc::problem::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub usize);

#[derive(Debug, Clone)]
pub struct NocNode {
    pub id: NodeId,
    pub name: String,
    pub outgoing: Vec<LinkId>,
    pub incoming: Vec<LinkId>,
}

/// One slot table, valid during `[start_time, end_time]` of the slot-table
/// period.
#[derive(Debug, Clone)]
pub struct SlotTable {
    pub start_time: Time,
    pub end_time: Time,
    pub slots: Vec<Option<MessageId>>,
}

impl SlotTable {
    pub fn nr_free(&self) -> u64 {
        self.slots.iter().filter(|s| s.is_none()).count() as u64
    }

    pub fn is_free(&self, slot: usize) -> bool {
        self.slots[slot].is_none()
    }
}

#[derive(Debug, Clone)]
pub struct Link {
    pub id: LinkId,
    pub name: String,
    pub src: NodeId,
    pub dst: NodeId,
    pub slot_tables: Vec<SlotTable>,
    /// Preference counter per slot index; `u32::MAX` marks frozen slots.
    pub preferred: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct InterconnectGraph {
    pub nodes: Vec<NocNode>,
    pub links: Vec<Link>,
    /// Slots per table (T).
    pub slot_table_size: u64,
    /// Slot-table period (P = N·T).
    pub slot_table_period: Time,
    pub flit_size: u64,
    pub header_size: u64,
    /// NI reconfiguration latency before a message's first slot.
    pub reconfiguration_time: Time,
}

impl InterconnectGraph {
    /// Graph with `nr_tables` slot tables of `slot_table_size` slots per
    /// link.
    pub fn new(
        slot_table_size: u64,
        nr_tables: u64,
        flit_size: u64,
        header_size: u64,
        reconfiguration_time: Time,
    ) -> Self {
        InterconnectGraph {
            nodes: Vec::new(),
            links: Vec::new(),
            slot_table_size,
            slot_table_period: slot_table_size * nr_tables.max(1),
            flit_size,
            header_size,
            reconfiguration_time,
        }
    }

    pub fn add_node(&mut self, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NocNode {
            id,
            name: name.to_string(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        });
        id
    }

    /// Directed link with a fresh slot-table sequence covering the period.
    pub fn connect(&mut self, src: NodeId, dst: NodeId) -> LinkId {
        let id = LinkId(self.links.len());
        let t = self.slot_table_size;
        let n = (self.slot_table_period / t).max(1);
        let slot_tables = (0..n)
            .map(|i| SlotTable {
                start_time: i * t,
                end_time: (i + 1) * t - 1,
                slots: vec![None; t as usize],
            })
            .collect();
        self.links.push(Link {
            id,
            name: format!("l{}", id.0),
            src,
            dst,
            slot_tables,
            preferred: vec![0; t as usize],
        });
        self.nodes[src.0].outgoing.push(id);
        self.nodes[dst.0].incoming.push(id);
        id
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.id)
    }

    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id.0]
    }

    pub fn link_mut(&mut self, id: LinkId) -> &mut Link {
        &mut self.links[id.0]
    }

    /// Does the table's validity window intersect the (possibly wrapping)
    /// entity window `[start, end]`?
    pub fn table_in_window(&self, table: &SlotTable, start: Time, end: Time, wraps: bool) -> bool {
        if wraps {
            table.end_time >= start || table.start_time <= end
        } else {
            table.end_time >= start && table.start_time <= end
        }
    }

    /// Entity time window on a link, reduced modulo the period. Returns
    /// (start, end, wraps).
    pub fn entity_window(&self, start_time: Time, duration: Time) -> (Time, Time, bool) {
        let p = self.slot_table_period;
        let start = start_time % p;
        let end = (start_time + duration.saturating_sub(1)) % p;
        let wraps = start >= end && duration != 1;
        (start, end, wraps)
    }

    /// Slots free on the link for the whole entity window (true = free).
    pub fn free_slots_on_link(&self, link: LinkId, start_time: Time, duration: Time) -> Vec<bool> {
        let t = self.slot_table_size as usize;
        let (start, end, wraps) = self.entity_window(start_time, duration);
        let mut free = vec![true; t];
        for table in &self.links[link.0].slot_tables {
            if self.table_in_window(table, start, end, wraps) {
                for i in 0..t {
                    free[i] = free[i] && table.is_free(i);
                }
            }
        }
        free
    }

    /// Reserve the given slots for `msg` on every table the entity window
    /// touches, and raise the preference counters.
    pub fn reserve_slots(
        &mut self,
        link: LinkId,
        msg: MessageId,
        slots: &[bool],
        start_time: Time,
        duration: Time,
    ) {
        let (start, end, wraps) = self.entity_window(start_time, duration);
        let tables: Vec<usize> = self.touched_tables(link, start, end, wraps);
        for ti in tables {
            let table = &mut self.links[link.0].slot_tables[ti];
            for (i, &used) in slots.iter().enumerate() {
                if used {
                    debug_assert!(table.slots[i].is_none());
                    table.slots[i] = Some(msg);
                }
            }
        }
        for (i, &used) in slots.iter().enumerate() {
            let pref = &mut self.links[link.0].preferred[i];
            if used && *pref != u32::MAX {
                *pref += 1;
            }
        }
    }

    /// Exact inverse of [`reserve_slots`].
    pub fn release_slots(
        &mut self,
        link: LinkId,
        msg: MessageId,
        slots: &[bool],
        start_time: Time,
        duration: Time,
    ) {
        let (start, end, wraps) = self.entity_window(start_time, duration);
        let tables: Vec<usize> = self.touched_tables(link, start, end, wraps);
        for ti in tables {
            let table = &mut self.links[link.0].slot_tables[ti];
            for (i, &used) in slots.iter().enumerate() {
                if used {
                    debug_assert_eq!(table.slots[i], Some(msg));
                    table.slots[i] = None;
                }
            }
        }
        for (i, &used) in slots.iter().enumerate() {
            let pref = &mut self.links[link.0].preferred[i];
            if used && *pref != u32::MAX {
                *pref -= 1;
            }
        }
    }

    fn touched_tables(&self, link: LinkId, start: Time, end: Time, wraps: bool) -> Vec<usize> {
        self.links[link.0]
            .slot_tables
            .iter()
            .enumerate()
            .filter(|(_, table)| self.table_in_window(table, start, end, wraps))
            .map(|(i, _)| i)
            .collect()
    }

    /// Build an `rows × cols` mesh with bidirectional links between
    /// neighbours. Nodes are named `n<row>_<col>`.
    pub fn mesh(
        rows: usize,
        cols: usize,
        slot_table_size: u64,
        nr_tables: u64,
        flit_size: u64,
        header_size: u64,
        reconfiguration_time: Time,
    ) -> Self {
        let mut g = InterconnectGraph::new(
            slot_table_size,
            nr_tables,
            flit_size,
            header_size,
            reconfiguration_time,
        );
        let ids: Vec<Vec<NodeId>> = (0..rows)
            .map(|r| {
                (0..cols)
                    .map(|c| g.add_node(&format!("n{}_{}", r, c)))
                    .collect()
            })
            .collect();
        for r in 0..rows {
            for c in 0..cols {
                if c + 1 < cols {
                    g.connect(ids[r][c], ids[r][c + 1]);
                    g.connect(ids[r][c + 1], ids[r][c]);
                }
                if r + 1 < rows {
                    g.connect(ids[r][c], ids[r + 1][c]);
                    g.connect(ids[r + 1][c], ids[r][c]);
                }
            }
        }
        g
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_shape() {
        let g = InterconnectGraph::mesh(2, 2, 8, 1, 1, 0, 0);
        assert_eq!(g.nodes.len(), 4);
        // 4 undirected neighbour pairs, two directed links each.
        assert_eq!(g.links.len(), 8);
        assert_eq!(g.slot_table_period, 8);
    }

    #[test]
    fn test_reserve_release_roundtrip() {
        let mut g = InterconnectGraph::mesh(1, 2, 4, 1, 1, 0, 0);
        let link = LinkId(0);
        let before = g.links[link.0].clone();

        let slots = vec![true, true, false, false];
        g.reserve_slots(link, MessageId(0), &slots, 0, 4);
        assert!(!g.link(link).slot_tables[0].is_free(0));
        assert_eq!(g.link(link).preferred[0], 1);

        g.release_slots(link, MessageId(0), &slots, 0, 4);
        let after = &g.links[link.0];
        assert_eq!(before.preferred, after.preferred);
        for (tb, ta) in before.slot_tables.iter().zip(after.slot_tables.iter()) {
            assert_eq!(tb.slots, ta.slots);
        }
    }

    #[test]
    fn test_free_slots_respect_window() {
        let mut g = InterconnectGraph::mesh(1, 2, 4, 2, 1, 0, 0);
        let link = LinkId(0);
        // Occupy slot 1 in the second table only (window [4,7]).
        g.links[link.0].slot_tables[1].slots[1] = Some(MessageId(9));

        let early = g.free_slots_on_link(link, 0, 4);
        assert!(early[1]);
        let late = g.free_slots_on_link(link, 4, 4);
        assert!(!late[1]);
    }
}
