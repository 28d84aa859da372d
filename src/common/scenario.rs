//! Scenario loading, parsing, and validation logic.
//!
//! A scenario describes one access point, one moving station and the traffic
//! between them. Every field has a default, so an empty file (or no file at
//! all) yields the reference experiment: a station starting 5 m from the
//! access point and moving away at 2 m/s while a 300 Mb/s flow runs from
//! 0.5 s to 35 s.
//!
//! Files ending in `.toml` are parsed as TOML, everything else as JSON.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::simulation::geometry::Vector3;
use crate::simulation::error::SimError;
use crate::simulation::signal_calculations::{PropagationDelay, PropagationModel, RateStep, RateTable, calculate_noise_floor};
use crate::simulation::time::{SimDuration, SimTime};

/// Scenario loading mode determines which fields are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioMode {
    /// Running a simulation needs every parameter to be valid.
    Simulation,
    /// Analyzing an existing trace only needs the geometry.
    Analyzer,
}

/// Error type for scenario loading failures.
#[derive(Debug)]
pub enum ScenarioLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ScenarioLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            ScenarioLoadError::ParseError(msg) => write!(f, "Failed to parse scenario: {}", msg),
            ScenarioLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ScenarioLoadError {}

/// On-disk encoding of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioFormat {
    Json,
    Toml,
}

impl ScenarioFormat {
    /// `.toml` (any case) selects TOML, anything else JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ScenarioFormat::Toml,
            _ => ScenarioFormat::Json,
        }
    }
}

/// Initial kinematic state of one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Position in meters at t = 0.
    pub position: Vector3,
    /// Constant velocity in m/s.
    pub velocity: Vector3,
}

/// Half-open activity interval `[start_secs, stop_secs)`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct WindowConfig {
    pub start_secs: f64,
    pub stop_secs: f64,
}

impl WindowConfig {
    pub fn start(&self) -> SimTime {
        SimTime::from_secs_f64(self.start_secs)
    }

    pub fn stop(&self) -> SimTime {
        SimTime::from_secs_f64(self.stop_secs)
    }
}

/// Constant bit-rate flow from the access point to the station.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    pub data_rate_bps: u64,
    pub packet_size_bytes: u32,
    pub source_window: WindowConfig,
    pub sink_window: WindowConfig,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        let window = WindowConfig {
            start_secs: 0.5,
            stop_secs: 35.0,
        };
        Self {
            data_rate_bps: 300_000_000,
            packet_size_bytes: 1420,
            source_window: window,
            sink_window: window,
        }
    }
}

/// Transmitter and receiver parameters shared by both ends of the link.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Transmit power in dBm (40 mW by default).
    pub tx_power_dbm: f64,
    /// Channel bandwidth in Hz, used to derive the thermal noise floor.
    pub channel_width_hz: f64,
    /// Receiver noise figure in dB.
    pub noise_figure_db: f64,
    /// Overrides the derived noise floor when set.
    pub noise_floor_dbm: Option<f64>,
    /// Frames received below this power are lost. Off when unset.
    pub rx_sensitivity_dbm: Option<f64>,
    /// SNR thresholds for the link rate. Off when unset: the link carries
    /// whatever the source offers.
    pub rate_table: Option<Vec<RateStep>>,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            tx_power_dbm: 16.0206,
            channel_width_hz: 20e6,
            noise_figure_db: 7.0,
            noise_floor_dbm: None,
            rx_sensitivity_dbm: None,
            rate_table: None,
        }
    }
}

impl RadioConfig {
    /// Explicit noise floor, or thermal noise over the channel plus the noise figure.
    pub fn noise_floor_dbm(&self) -> f64 {
        self.noise_floor_dbm
            .unwrap_or_else(|| calculate_noise_floor(self.channel_width_hz, self.noise_figure_db))
    }

    /// Validated rate table, if one is configured.
    pub fn rate_table(&self) -> Result<Option<RateTable>, SimError> {
        self.rate_table.as_ref().map(|steps| RateTable::new(steps.clone())).transpose()
    }
}

/// Root structure representing the entire scenario.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Global stop time in seconds.
    pub duration_secs: f64,
    /// Throughput sampling period in seconds.
    pub throughput_interval_secs: f64,
    pub access_point: NodeConfig,
    pub station: NodeConfig,
    pub propagation: PropagationModel,
    pub propagation_delay: PropagationDelay,
    pub radio: RadioConfig,
    pub traffic: TrafficConfig,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            duration_secs: 35.0,
            throughput_interval_secs: 1.0,
            access_point: NodeConfig::default(),
            station: NodeConfig {
                position: Vector3::new(5.0, 0.0, 0.0),
                velocity: Vector3::new(2.0, 0.0, 0.0),
            },
            propagation: PropagationModel::FriisFreeSpace {
                frequency_hz: 2.412e9,
                system_loss: 1.0,
            },
            propagation_delay: PropagationDelay::Instantaneous,
            radio: RadioConfig::default(),
            traffic: TrafficConfig::default(),
        }
    }
}

impl Scenario {
    pub fn stop_time(&self) -> SimTime {
        SimTime::from_secs_f64(self.duration_secs)
    }

    pub fn throughput_interval(&self) -> SimDuration {
        SimDuration::from_secs_f64(self.throughput_interval_secs)
    }

    /// Station-to-access-point distance at `t` seconds under constant velocities.
    pub fn distance_at(&self, t: f64) -> f64 {
        let ap = self.access_point.position + self.access_point.velocity * t;
        let sta = self.station.position + self.station.velocity * t;
        (sta - ap).length()
    }
}

/// Parse a scenario from text without validating it.
pub fn parse_scenario(data: &str, format: ScenarioFormat) -> Result<Scenario, ScenarioLoadError> {
    let parsed: anyhow::Result<Scenario> = match format {
        ScenarioFormat::Json => serde_json::from_str(data).context("Invalid JSON format"),
        ScenarioFormat::Toml => toml::from_str(data).context("Invalid TOML format"),
    };
    parsed.map_err(|e| ScenarioLoadError::ParseError(format!("{:#}", e)))
}

/// Load, parse and validate a scenario file.
///
/// # Parameters
///
/// * `path` - Path to a `.toml` or JSON scenario file
/// * `mode` - Scenario mode determining validation rules
pub fn load_scenario(path: &str, mode: ScenarioMode) -> Result<Scenario, ScenarioLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path))
        .map_err(|e| ScenarioLoadError::FileReadError(format!("{:#}", e)))?;

    let scenario = parse_scenario(&data, ScenarioFormat::from_path(Path::new(path)))?;
    validate_scenario(&scenario, mode).map_err(ScenarioLoadError::ValidationError)?;

    log::debug!("Loaded scenario from {}", path);
    Ok(scenario)
}

fn check_window(name: &str, window: &WindowConfig) -> Result<(), String> {
    if !window.start_secs.is_finite() || !window.stop_secs.is_finite() {
        return Err(format!("{} must have finite bounds", name));
    }
    if window.start_secs < 0.0 {
        return Err(format!("{} starts at negative time {}s", name, window.start_secs));
    }
    if window.start_secs > window.stop_secs {
        return Err(format!(
            "{} start {}s is after its stop {}s",
            name, window.start_secs, window.stop_secs
        ));
    }
    Ok(())
}

/// Validate scenario configuration based on the mode.
///
/// Returns `Err(String)` with a description of the first problem found.
pub fn validate_scenario(scenario: &Scenario, mode: ScenarioMode) -> Result<(), String> {
    const MAX_DURATION_SECS: f64 = 1.0e6;

    for (name, node) in [("access_point", &scenario.access_point), ("station", &scenario.station)] {
        if !node.position.is_finite() {
            return Err(format!("{} position {:?} is not finite", name, node.position));
        }
        if !node.velocity.is_finite() {
            return Err(format!("{} velocity {:?} is not finite", name, node.velocity));
        }
    }

    if mode == ScenarioMode::Analyzer {
        return Ok(());
    }

    if !(scenario.duration_secs > 0.0 && scenario.duration_secs <= MAX_DURATION_SECS) {
        return Err(format!(
            "duration_secs {} must be within (0, {}]",
            scenario.duration_secs, MAX_DURATION_SECS
        ));
    }
    if !(scenario.throughput_interval_secs.is_finite() && scenario.throughput_interval_secs > 0.0) {
        return Err(format!(
            "throughput_interval_secs {} must be positive",
            scenario.throughput_interval_secs
        ));
    }
    if scenario.throughput_interval().as_nanos() <= 0 {
        return Err(format!(
            "throughput_interval_secs {} is below the 1 ns time resolution",
            scenario.throughput_interval_secs
        ));
    }

    scenario.propagation.validate().map_err(|e| e.to_string())?;
    scenario.propagation_delay.validate().map_err(|e| e.to_string())?;

    let radio = &scenario.radio;
    if !radio.tx_power_dbm.is_finite() {
        return Err(format!("tx_power_dbm {} must be finite", radio.tx_power_dbm));
    }
    match radio.noise_floor_dbm {
        Some(floor) if !floor.is_finite() => return Err(format!("noise_floor_dbm {} must be finite", floor)),
        Some(_) => {}
        None => {
            if !(radio.channel_width_hz.is_finite() && radio.channel_width_hz > 0.0) {
                return Err(format!("channel_width_hz {} must be positive", radio.channel_width_hz));
            }
            if !radio.noise_figure_db.is_finite() {
                return Err(format!("noise_figure_db {} must be finite", radio.noise_figure_db));
            }
        }
    }
    if let Some(sensitivity) = radio.rx_sensitivity_dbm {
        if !sensitivity.is_finite() {
            return Err(format!("rx_sensitivity_dbm {} must be finite", sensitivity));
        }
    }
    radio.rate_table().map_err(|e| e.to_string())?;

    let traffic = &scenario.traffic;
    if traffic.data_rate_bps == 0 {
        return Err("Invalid data_rate_bps, must be positive".to_string());
    }
    if traffic.packet_size_bytes == 0 {
        return Err("Invalid packet_size_bytes, must be positive".to_string());
    }
    check_window("source_window", &traffic.source_window)?;
    check_window("sink_window", &traffic.sink_window)?;

    Ok(())
}
