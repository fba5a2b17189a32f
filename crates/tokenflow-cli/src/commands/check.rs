use tokenflow_core::error::{AnalysisError, Result};

pub fn run() -> Result<()> {
    let results = tokenflow_tests::run_battery();
    let mut failed = 0;

    println!("{:<24} {:<6} details", "check", "result");
    for r in &results {
        let status = if r.passed { "pass" } else { "FAIL" };
        println!("{:<24} {:<6} {}", r.name, status, r.details);
        if !r.passed {
            failed += 1;
        }
    }
    println!("{} checks, {} failed", results.len(), failed);

    if failed > 0 {
        return Err(AnalysisError::Infeasible(format!(
            "{} battery checks failed",
            failed
        )));
    }
    Ok(())
}
