use std::path::Path;

use serde_json::json;
use tokenflow_core::error::{AnalysisError, Result};
use tokenflow_core::io;
use tokenflow_core::noc::{NocScheduler, Strategy};

#[allow(clippy::too_many_arguments)]
pub fn run(
    graph: &Path,
    strategy: &str,
    max_detour: usize,
    max_ripups: u32,
    max_tries: u32,
    seed: u64,
    output: Option<&Path>,
) -> Result<()> {
    let doc = io::load_document(graph)?;

    let network = doc
        .platform
        .as_ref()
        .and_then(|p| p.network.as_ref())
        .ok_or_else(|| AnalysisError::Validation("document carries no network section".into()))?;
    if doc.noc_problems.is_empty() {
        return Err(AnalysisError::Validation(
            "document carries no NoC scheduling problems".into(),
        ));
    }

    let interconnect = io::interconnect_from_spec(network)?;
    let problems = io::noc_problems_from_spec(&interconnect, &doc.noc_problems)?;
    let mut scheduler = NocScheduler::new(interconnect, problems);

    let strategy = match strategy {
        "greedy" => Strategy::Greedy { max_detour },
        "ripup" => Strategy::Ripup {
            max_detour,
            max_ripups,
        },
        "classic" => Strategy::Classic {
            max_detour,
            max_ripups,
        },
        "knowledge" => Strategy::Knowledge {
            max_detour,
            max_ripups,
        },
        "random" => Strategy::Random {
            max_detour,
            max_ripups,
            max_tries,
            seed,
        },
        other => {
            return Err(AnalysisError::Validation(format!(
                "unknown strategy '{}'",
                other
            )))
        }
    };

    scheduler.schedule(&strategy)?;
    let report = scheduler.report();

    println!("strategy: {}", strategy);
    println!("scheduled {} messages", report.len());
    println!(
        "{:>8} {:>8} {:>10} {:>10}  route / slots",
        "problem", "message", "start", "duration"
    );
    for m in &report {
        println!(
            "{:>8} {:>8} {:>10} {:>10}  {:?} / {:?}",
            m.problem, m.message, m.start_time, m.duration, m.route, m.slots
        );
    }

    if let Some(path) = output {
        super::write_report(
            path,
            "noc",
            json!({
                "strategy": strategy.to_string(),
                "messages": report,
            }),
        )?;
    }
    Ok(())
}
