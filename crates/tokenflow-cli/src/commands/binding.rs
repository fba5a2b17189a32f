use std::path::Path;

use serde_json::json;
use tokenflow_core::binding::binding_aware_throughput;
use tokenflow_core::error::{AnalysisError, Result};
use tokenflow_core::io;

pub fn run(graph: &Path, output: Option<&Path>) -> Result<()> {
    let (doc, g) = super::load_graph(graph)?;

    let platform = doc.platform.as_ref().ok_or_else(|| {
        AnalysisError::Validation("document carries no platform section".into())
    })?;
    let mapping = doc.mapping.as_ref().ok_or_else(|| {
        AnalysisError::Validation("document carries no mapping section".into())
    })?;

    let binding = io::binding_from_spec(&g, platform, mapping)?;
    let result = binding_aware_throughput(&g, &binding)?;

    println!("graph: {}", g.name);
    println!("binding-aware throughput: {}", result.throughput());
    for (t, tile) in binding.tiles.iter().enumerate() {
        let actors: Vec<&str> = tile
            .schedule
            .iter()
            .map(|&a| g.actor(tokenflow_core::ActorId(a)).name.as_str())
            .collect();
        println!(
            "tile {}: wheel {} slice {} order [{}] utilization {:.3}",
            tile.name,
            tile.wheel_size,
            tile.slice,
            actors.join(", "),
            result.tile_utilization.get(t).copied().unwrap_or(0.0),
        );
    }

    if let Some(path) = output {
        super::write_report(
            path,
            "binding",
            json!({
                "graph": g.name,
                "binding": binding,
                "result": result,
            }),
        )?;
    }
    Ok(())
}
