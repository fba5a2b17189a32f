use std::path::Path;

use serde_json::json;
use tokenflow_core::error::Result;
use tokenflow_core::schedule::build_schedule;

pub fn run(graph: &Path, output: Option<&Path>) -> Result<()> {
    let (_, g) = super::load_graph(graph)?;
    let schedule = build_schedule(&g)?;

    println!("graph: {}", g.name);
    println!("period: {}", schedule.period);
    println!("periodicity: {}", schedule.periodicity);
    println!(
        "throughput: {}/{}",
        schedule.throughput_num, schedule.throughput_den
    );
    for (i, times) in schedule.start_times.iter().enumerate() {
        let actor = g.actor(tokenflow_core::ActorId(i));
        for (k, t) in times.iter().enumerate() {
            println!("({}, {}): {}", actor.name, k, t);
        }
    }

    if let Some(path) = output {
        super::write_report(path, "schedule", json!(schedule))?;
    }
    Ok(())
}
