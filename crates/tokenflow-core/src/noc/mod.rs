//! Network-on-chip communication scheduling.
//!
//! Messages between tiles are realised as *scheduling entities*: a route
//! through the interconnect plus a slot reservation on every link of the
//! route, shifted by one slot per hop. The interconnect arbitrates each link
//! with TDMA slot tables; a slot-table sequence covers one slot-table period
//! and models reconfiguration over time.

pub mod interconnect;
pub mod problem;
pub mod scheduler;
pub mod strategies;

pub use interconnect::{InterconnectGraph, Link, LinkId, NocNode, NodeId, SlotTable};
pub use problem::{Message, MessageId, MessageSpec, NocProblem, Route, SchedulingEntity};
pub use scheduler::{NocScheduler, ScheduledMessage};
pub use strategies::Strategy;
