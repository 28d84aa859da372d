//! Configuration shared by the simulation and the analyzer.

pub mod scenario;

pub use scenario::{Scenario, ScenarioLoadError, ScenarioMode, load_scenario, validate_scenario};
