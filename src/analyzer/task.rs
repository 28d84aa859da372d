//! Analyze a recorded trace against a scenario's geometry.

use anyhow::Context;

use crate::common::scenario::{ScenarioMode, load_scenario};

use super::profile::{DistanceProfile, ProfileSummary};
use super::trace_loader::TraceLoader;

/// Load the scenario (geometry only) and the trace, and build the distance profile.
///
/// # Parameters
///
/// * `scenario_path` - Scenario the trace was produced with
/// * `trace_path` - File holding the trace lines
pub fn analyze_trace_file(scenario_path: &str, trace_path: &str) -> anyhow::Result<(DistanceProfile, ProfileSummary)> {
    log::info!("Scenario: {}, Trace: {}", scenario_path, trace_path);
    let scenario = load_scenario(scenario_path, ScenarioMode::Analyzer)?;

    let mut loader = TraceLoader::open(trace_path).with_context(|| format!("Failed to open trace file: {}", trace_path))?;
    let loaded = loader.load_records();
    if loaded.skipped_lines > 0 {
        log::debug!("{} of {} lines in {} are not trace records", loaded.skipped_lines, loader.lines_read(), trace_path);
    }

    let profile = DistanceProfile::from_records(&scenario, &loaded.records);
    let summary = profile.summary();
    log::info!("{}: {}", trace_path, summary);
    Ok((profile, summary))
}
