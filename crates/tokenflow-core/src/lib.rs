//! # tokenflow-core
//!
//! Analysis and resource-allocation library for timed dataflow graphs.
//!
//! A graph is a set of actors (computations with a duration) connected by
//! FIFO channels with static token rates: SDF when every rate is one
//! constant, CSDF when rates cycle through a phase sequence. On top of one
//! shared timed transition system the crate answers:
//!
//! - maximum throughput under self-timed execution,
//! - the Pareto trade-off between total buffer storage and throughput,
//! - source-to-destination latency under several admission policies,
//! - throughput under tile binding with TDMA arbitration and static orders,
//! - static-periodic schedules realising the maximal throughput,
//! - slot-accurate NoC communication schedules with rip-up retry.
//!
//! ## Quick start
//!
//! ```
//! use tokenflow_core::graph::Graph;
//! use tokenflow_core::throughput::self_timed_throughput;
//!
//! let mut g = Graph::new("pair");
//! let a = g.add_actor("a", vec![2]);
//! let b = g.add_actor("b", vec![3]);
//! g.connect(a, 1u64, b, 1u64, 0);
//! g.connect(b, 1u64, a, 1u64, 1);
//!
//! let thr = self_timed_throughput(&g).unwrap();
//! assert_eq!((thr.numerator(), thr.denominator()), (1, 5));
//! ```

pub mod binding;
pub mod buffer;
pub mod csdf;
pub mod dependencies;
pub mod error;
pub mod flow;
pub mod graph;
pub mod io;
pub mod latency;
pub mod noc;
pub mod rational;
pub mod report;
pub mod repetition;
pub mod schedule;
pub mod simulate;
pub mod throughput;

pub use error::{AnalysisError, Result};
pub use graph::{ActorId, ChannelId, Graph, Rate, Time, TIME_INFINITY};
pub use rational::Fraction;
pub use repetition::{is_consistent, is_strongly_connected, repetition_vector};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
