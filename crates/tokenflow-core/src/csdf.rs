//! Dialect handling: CSDF inspection and CSDF→SDF conversion.
//!
//! A CSDF graph converts to SDF only when every rate and execution-time
//! sequence is constant over its phases; the SDF value is that constant.
//! Anything else is refused rather than approximated.

use crate::error::{AnalysisError, Result};
use crate::graph::{Graph, Rate};

/// True when the graph carries at least one genuine phase sequence.
pub fn is_csdf(g: &Graph) -> bool {
    !g.is_sdf()
}

/// Convert to a constant-rate graph. Fails with `NotSupported` when any
/// port or execution time varies over its phases.
pub fn to_sdf(g: &Graph) -> Result<Graph> {
    g.validate()?;

    for a in g.actors() {
        for p in &a.profiles {
            if p.exec_time.iter().any(|&t| t != p.exec_time[0]) {
                return Err(AnalysisError::NotSupported(format!(
                    "actor '{}' has phase-dependent execution times",
                    a.name
                )));
            }
        }
        for port in g.ports_of(a.id) {
            if !port.rate.is_constant() {
                return Err(AnalysisError::NotSupported(format!(
                    "actor '{}' has a phase-dependent rate",
                    a.name
                )));
            }
        }
    }

    let mut out = Graph::new(&g.name);
    for a in g.actors() {
        let profiles = a
            .profiles
            .iter()
            .map(|p| crate::graph::Profile {
                processor: p.processor.clone(),
                exec_time: vec![p.exec_time[0]],
                state_size: p.state_size,
                weight: p.weight,
            })
            .collect();
        out.add_actor_with_profiles(&a.name, profiles, a.default_profile);
    }
    for c in g.channels() {
        let src = g.src_actor(c.id);
        let dst = g.dst_actor(c.id);
        let id = out.connect(
            src,
            Rate::from(g.src_rate(c.id).at(0)),
            dst,
            Rate::from(g.dst_rate(c.id).at(0)),
            c.initial_tokens,
        );
        let nc = out.channel_mut(id);
        nc.name = c.name.clone();
        nc.token_size = c.token_size;
        nc.capacity = c.capacity;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn test_constant_sequences_convert() {
        let mut g = Graph::new("fake_csdf");
        let a = g.add_actor("a", vec![2, 2, 2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, vec![1, 1, 1], b, 1u64, 0);
        g.connect(b, 1u64, a, vec![1, 1, 1], 1);
        assert!(is_csdf(&g));

        let sdf = to_sdf(&g).unwrap();
        assert!(sdf.is_sdf());
        assert_eq!(sdf.nr_channels(), 2);
        assert_eq!(
            crate::throughput::self_timed_throughput(&sdf).unwrap(),
            crate::rational::Fraction::new(1, 5)
        );
    }

    #[test]
    fn test_varying_rate_rejected() {
        let mut g = Graph::new("true_csdf");
        let a = g.add_actor("a", vec![1]);
        let b = g.add_actor("b", vec![2]);
        g.connect(a, vec![1, 2, 1], b, 4u64, 0);
        g.connect(b, 4u64, a, vec![1, 2, 1], 4);
        assert!(matches!(
            to_sdf(&g),
            Err(AnalysisError::NotSupported(_))
        ));
    }

    #[test]
    fn test_varying_exec_time_rejected() {
        let mut g = Graph::new("varying_exec");
        let a = g.add_actor("a", vec![1, 2]);
        let b = g.add_actor("b", vec![1]);
        g.connect(a, vec![1, 1], b, 1u64, 0);
        g.connect(b, 1u64, a, vec![1, 1], 1);
        assert!(to_sdf(&g).is_err());
    }
}
