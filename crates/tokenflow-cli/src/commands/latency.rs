use std::path::Path;

use serde_json::json;
use tokenflow_core::error::{AnalysisError, Result};
use tokenflow_core::latency;

#[allow(clippy::too_many_arguments)]
pub fn run(
    graph: &Path,
    src: &str,
    dst: &str,
    mode: &str,
    attempts: u32,
    seed: u64,
    output: Option<&Path>,
) -> Result<()> {
    let (_, g) = super::load_graph(graph)?;

    let src_id = g
        .actor_by_name(src)
        .ok_or_else(|| AnalysisError::Validation(format!("unknown actor '{}'", src)))?;
    let dst_id = g
        .actor_by_name(dst)
        .ok_or_else(|| AnalysisError::Validation(format!("unknown actor '{}'", dst)))?;

    let (latency, throughput) = match mode {
        "minimal" => {
            let r = latency::minimal(&g, src_id, dst_id)?;
            (r.latency, Some(r.throughput))
        }
        "single-proc" => (latency::minimal_single_proc(&g, src_id, dst_id)?, None),
        "self-timed" => {
            let r = latency::self_timed(&g, src_id, dst_id)?;
            (r.latency, Some(r.throughput))
        }
        "max-throughput" => {
            let r = latency::minimal_at_max_throughput(&g, src_id, dst_id)?;
            (r.latency, Some(r.throughput))
        }
        "random-order" => (
            latency::random_static_order_single_proc(&g, src_id, dst_id, attempts, seed)?,
            None,
        ),
        other => {
            return Err(AnalysisError::Validation(format!(
                "unknown latency mode '{}'",
                other
            )))
        }
    };

    println!("graph: {}", g.name);
    println!("latency {} -> {} ({}): {}", src, dst, mode, latency);
    if let Some(thr) = throughput {
        println!("throughput: {} ({:.6})", thr, thr.as_f64());
    }

    if let Some(path) = output {
        super::write_report(
            path,
            "latency",
            json!({
                "graph": g.name,
                "src": src,
                "dst": dst,
                "mode": mode,
                "latency": latency,
                "throughput": throughput.map(|t| json!({
                    "num": t.numerator(), "den": t.denominator()
                })),
            }),
        )?;
    }
    Ok(())
}
