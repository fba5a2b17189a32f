pub mod binding;
pub mod buffer;
pub mod check;
pub mod export;
pub mod flow;
pub mod latency;
pub mod noc;
pub mod schedule;
pub mod throughput;

use std::path::Path;

use serde_json::json;
use tokenflow_core::error::{AnalysisError, Result};
use tokenflow_core::graph::Graph;
use tokenflow_core::io::{self, Document};
use tokenflow_core::rational::Fraction;

/// Load a document and build its application graph.
pub fn load_graph(path: &Path) -> Result<(Document, Graph)> {
    let doc = io::load_document(path)?;
    let g = io::graph_from_spec(&doc.application)?;
    Ok((doc, g))
}

/// Parse "num/den" (also plain integers as "n/1").
pub fn parse_fraction(text: &str) -> Result<Fraction> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u64>()
            .map_err(|_| AnalysisError::Validation(format!("bad fraction '{}'", text)))
    };
    match text.split_once('/') {
        Some((num, den)) => Ok(Fraction::new(parse(num)?, parse(den)?)),
        None => Ok(Fraction::new(parse(text)?, 1)),
    }
}

/// Write a JSON report stamped with a fresh run id.
pub fn write_report(path: &Path, kind: &str, payload: serde_json::Value) -> Result<()> {
    let report = json!({
        "run_id": uuid::Uuid::new_v4().to_string(),
        "tool": "tokenflow",
        "version": tokenflow_core::VERSION,
        "kind": kind,
        "result": payload,
    });
    std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
    println!("report written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fraction() {
        let f = parse_fraction("1/5").unwrap();
        assert_eq!((f.numerator(), f.denominator()), (1, 5));
        let g = parse_fraction("3").unwrap();
        assert_eq!((g.numerator(), g.denominator()), (3, 1));
        assert!(parse_fraction("x/y").is_err());
    }
}
