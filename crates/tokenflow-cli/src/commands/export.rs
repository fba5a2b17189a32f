use std::path::Path;

use tokenflow_core::error::{AnalysisError, Result};
use tokenflow_core::throughput::self_timed_throughput;
use tokenflow_core::{csdf, io, report};

pub fn run(graph: &Path, format: &str, output: Option<&Path>) -> Result<()> {
    let (doc, g) = super::load_graph(graph)?;

    let text = match format {
        "dot" => report::dot(&g),
        "html" => {
            let thr = self_timed_throughput(&g).ok();
            report::html_report(&g, thr)
        }
        "json" => serde_json::to_string_pretty(&io::spec_from_graph(&g))?,
        "sdf" => {
            let sdf = csdf::to_sdf(&g)?;
            let mut out = doc.clone();
            out.application = io::spec_from_graph(&sdf);
            serde_json::to_string_pretty(&out)?
        }
        other => {
            return Err(AnalysisError::Validation(format!(
                "unknown export format '{}'",
                other
            )))
        }
    };

    match output {
        Some(path) => {
            std::fs::write(path, text)?;
            println!("wrote {}", path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}
