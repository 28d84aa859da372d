use anyhow::Context;
use env_logger::Builder;
use log::{LevelFilter, info};
use std::io::{self, BufWriter};

use wifi_link_simulator::analyzer::analyze_trace_file;
use wifi_link_simulator::common::scenario::{Scenario, ScenarioMode, load_scenario};
use wifi_link_simulator::simulation::{LinkSimulation, TraceLog};

const USAGE: &str = "usage: wifi-link-simulator [scenario-file] [trace-file...]";

/// Simulate `scenario` and stream its trace to stdout.
fn simulate(scenario: &Scenario) -> anyhow::Result<()> {
    let trace = TraceLog::streaming(BufWriter::new(io::stdout()));
    let mut simulation = LinkSimulation::new(scenario, trace).context("Failed to set up the simulation")?;
    simulation.run();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Logging setup. Trace lines go to stdout, log output to stderr.
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("wifi_link_simulator"), LevelFilter::Debug)
        .init();

    info!("Starting up");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", USAGE);
        return Ok(());
    }

    match args.as_slice() {
        [] => {
            info!("No scenario given, running the reference experiment");
            simulate(&Scenario::default())
        }
        [scenario_path] => {
            info!("Using provided scenario path: {}", scenario_path);
            let scenario = load_scenario(scenario_path, ScenarioMode::Simulation)?;
            simulate(&scenario)
        }
        [scenario_path, trace_paths @ ..] => {
            for trace_path in trace_paths {
                analyze_trace_file(scenario_path, trace_path)?;
            }
            Ok(())
        }
    }
}
