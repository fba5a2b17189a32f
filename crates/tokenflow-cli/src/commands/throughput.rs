use std::path::Path;

use serde_json::json;
use tokenflow_core::error::Result;
use tokenflow_core::repetition::repetition_vector;
use tokenflow_core::throughput::{is_deadlock_free, self_timed_throughput};

pub fn run(graph: &Path, output: Option<&Path>) -> Result<()> {
    let (_, g) = super::load_graph(graph)?;

    let q = repetition_vector(&g);
    let thr = self_timed_throughput(&g)?;
    let deadlock_free = is_deadlock_free(&g)?;

    println!("graph: {}", g.name);
    println!(
        "repetition vector: [{}]",
        q.iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("deadlock free: {}", deadlock_free);
    println!(
        "throughput: {} iterations per time unit ({:.6})",
        thr,
        thr.as_f64()
    );

    if let Some(path) = output {
        super::write_report(
            path,
            "throughput",
            json!({
                "graph": g.name,
                "repetition_vector": q,
                "deadlock_free": deadlock_free,
                "throughput": { "num": thr.numerator(), "den": thr.denominator() },
            }),
        )?;
    }
    Ok(())
}
