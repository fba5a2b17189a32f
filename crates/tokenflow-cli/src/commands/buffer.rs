use std::path::Path;

use serde_json::json;
use tokenflow_core::buffer::BufferAnalysis;
use tokenflow_core::error::Result;
use tokenflow_core::rational::Fraction;

pub fn run(graph: &Path, bound: &str, serialise: bool, output: Option<&Path>) -> Result<()> {
    let (_, g) = super::load_graph(graph)?;

    let mut analysis = if serialise {
        BufferAnalysis::with_serialised_actors(&g)?
    } else {
        BufferAnalysis::new(&g)?
    };

    let bound = match bound {
        "max" => None,
        "min" => Some(Fraction::new(0, 1)),
        text => Some(super::parse_fraction(text)?),
    };
    let front = analysis.analyze(bound)?;

    println!("graph: {}", g.name);
    println!(
        "maximum throughput (unbounded buffers): {}",
        analysis.max_throughput()
    );
    println!("pareto front ({} points):", front.len());
    println!("{:>10}  {:>12}  distributions", "size", "throughput");
    for p in &front {
        println!(
            "{:>10}  {:>12.6}  {}",
            p.size,
            p.throughput,
            p.distributions
                .iter()
                .map(|d| format!("{:?}", d))
                .collect::<Vec<_>>()
                .join(" ")
        );
    }

    if let Some(path) = output {
        super::write_report(
            path,
            "buffer",
            json!({
                "graph": g.name,
                "serialised": serialise,
                "pareto_front": front,
            }),
        )?;
    }
    Ok(())
}
