use std::io::{BufRead, Write};
use std::path::Path;

use serde_json::json;
use tokenflow_core::error::{AnalysisError, Result};
use tokenflow_core::flow::{FlowPlatform, FlowState, FlowTile, MappingFlow};
use tokenflow_core::io;

pub fn run(graph: &Path, bound: &str, step_mode: bool, output: Option<&Path>) -> Result<()> {
    let (doc, g) = super::load_graph(graph)?;
    let bound = super::parse_fraction(bound)?;

    let platform_spec = doc.platform.as_ref().ok_or_else(|| {
        AnalysisError::Validation("document carries no platform section".into())
    })?;

    let network = platform_spec
        .network
        .as_ref()
        .map(io::interconnect_from_spec)
        .transpose()?;

    // Tiles map onto network nodes by name when a network is present.
    let tile_nodes = platform_spec
        .tiles
        .iter()
        .map(|t| {
            network
                .as_ref()
                .and_then(|n| n.node_by_name(&t.name))
        })
        .collect();
    let platform = FlowPlatform {
        tiles: platform_spec
            .tiles
            .iter()
            .map(|t| FlowTile {
                name: t.name.clone(),
                wheel_size: t.wheel_size,
                memory: t.memory,
            })
            .collect(),
        network,
        tile_nodes,
    };

    let mut flow = MappingFlow::new(g, platform, bound)?;

    if step_mode {
        let stdin = std::io::stdin();
        while flow.state() != FlowState::Completed && flow.state() != FlowState::Failed {
            println!("state: {:?}", flow.state());
            print!("press enter to continue... ");
            std::io::stdout().flush()?;
            let mut line = String::new();
            stdin.lock().read_line(&mut line)?;
            flow.step()?;
        }
    }
    let end = flow.run()?;
    println!("mapping flow finished in state {:?}", end);

    if end == FlowState::Failed {
        return Err(AnalysisError::Infeasible(
            "mapping flow could not satisfy the constraint".into(),
        ));
    }

    if let Some(result) = flow.result() {
        println!(
            "throughput: {}/{}",
            result.throughput_num, result.throughput_den
        );
        for (t, tile) in result.binding.tiles.iter().enumerate() {
            println!(
                "tile {}: slice {}/{} utilization {:.3}",
                tile.name,
                tile.slice,
                tile.wheel_size,
                result.tile_utilization.get(t).copied().unwrap_or(0.0)
            );
        }
        if let Some(path) = output {
            super::write_report(path, "flow", json!(result))?;
        }
    }
    Ok(())
}
