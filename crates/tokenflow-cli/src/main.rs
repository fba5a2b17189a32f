//! CLI for tokenflow: timed dataflow graph analysis and resource
//! allocation.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokenflow_core::AnalysisError;

#[derive(Parser)]
#[command(name = "tokenflow")]
#[command(about = "Analyse timed dataflow graphs: throughput, buffers, latency, schedules, NoC")]
#[command(version = tokenflow_core::VERSION)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Maximum self-timed throughput of the graph
    Throughput {
        graph: PathBuf,

        /// Write a machine-readable report as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Storage/throughput Pareto front and minimal deadlock-free buffers
    Buffer {
        graph: PathBuf,

        /// Throughput bound as "num/den"; "min" stops at the first
        /// deadlock-free point, "max" explores the complete front
        #[arg(long, default_value = "max")]
        bound: String,

        /// Serialise every actor with an injected unit self-loop
        #[arg(long)]
        serialise: bool,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Latency from a source actor to a destination actor
    Latency {
        graph: PathBuf,

        /// Source actor name
        #[arg(long)]
        src: String,

        /// Destination actor name
        #[arg(long)]
        dst: String,

        /// Derivation: minimal, single-proc, self-timed, max-throughput,
        /// random-order
        #[arg(long, default_value = "minimal",
              value_parser = ["minimal", "single-proc", "self-timed",
                              "max-throughput", "random-order"])]
        mode: String,

        /// Attempts for the random-order mode
        #[arg(long, default_value_t = 10)]
        attempts: u32,

        /// RNG seed for the random-order mode
        #[arg(long, default_value_t = 0)]
        seed: u64,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Static-periodic schedule realising the maximal throughput
    Schedule {
        graph: PathBuf,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Binding-aware throughput on the document's platform and mapping
    Binding {
        graph: PathBuf,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Schedule the document's NoC communication problems
    Noc {
        graph: PathBuf,

        /// Strategy: greedy, ripup, classic, knowledge, random
        #[arg(long, default_value = "greedy",
              value_parser = ["greedy", "ripup", "classic", "knowledge", "random"])]
        strategy: String,

        #[arg(long, default_value_t = 2)]
        max_detour: usize,

        #[arg(long, default_value_t = 8)]
        max_ripups: u32,

        #[arg(long, default_value_t = 10)]
        max_tries: u32,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run the mapping flow onto the document's platform
    Flow {
        graph: PathBuf,

        /// Throughput constraint as "num/den"
        #[arg(long)]
        bound: String,

        /// Advance one flow state per keypress
        #[arg(long)]
        step: bool,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run the reference battery of result-invariant checks
    Check {},

    /// Emit the graph as DOT, HTML, JSON, or converted to constant rates
    Export {
        graph: PathBuf,

        /// Format: dot, html, json, sdf
        #[arg(long, default_value = "dot", value_parser = ["dot", "html", "json", "sdf"])]
        format: String,

        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Throughput { graph, output } => commands::throughput::run(&graph, output.as_deref()),
        Commands::Buffer {
            graph,
            bound,
            serialise,
            output,
        } => commands::buffer::run(&graph, &bound, serialise, output.as_deref()),
        Commands::Latency {
            graph,
            src,
            dst,
            mode,
            attempts,
            seed,
            output,
        } => commands::latency::run(&graph, &src, &dst, &mode, attempts, seed, output.as_deref()),
        Commands::Schedule { graph, output } => commands::schedule::run(&graph, output.as_deref()),
        Commands::Binding { graph, output } => commands::binding::run(&graph, output.as_deref()),
        Commands::Noc {
            graph,
            strategy,
            max_detour,
            max_ripups,
            max_tries,
            seed,
            output,
        } => commands::noc::run(
            &graph,
            &strategy,
            max_detour,
            max_ripups,
            max_tries,
            seed,
            output.as_deref(),
        ),
        Commands::Flow {
            graph,
            bound,
            step,
            output,
        } => commands::flow::run(&graph, &bound, step, output.as_deref()),
        Commands::Check {} => commands::check::run(),
        Commands::Export {
            graph,
            format,
            output,
        } => commands::export::run(&graph, &format, output.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            match e {
                AnalysisError::Infeasible(_) => ExitCode::from(2),
                _ => ExitCode::from(1),
            }
        }
    }
}
