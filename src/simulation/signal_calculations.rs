//! Radio propagation and link-budget calculations.
//!
//! Contains helpers for:
//! - Path loss for the Friis free-space, two-ray ground and log-distance models
//! - Received signal power for a given transmit power and path loss
//! - Thermal noise floor for a channel bandwidth and receiver noise figure
//! - Effective communication distance given a simple link budget
//! - SNR to data-rate tables for rate adaptation
//!
//! Units:
//! - Power: dBm, mW (conversion provided)
//! - Distance and antenna heights: meters
//! - Frequency: Hz

use serde::Deserialize;

use super::error::SimError;
use super::time::SimDuration;

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Boltzmann constant (J/K).
pub const BOLTZMANN: f64 = 1.380_649e-23;

/// Reference temperature for thermal noise (K).
const NOISE_TEMPERATURE_K: f64 = 290.0;

/// Distances below this are clamped before applying any path loss formula.
///
/// Colocated or nearly colocated entities would otherwise yield `-inf`/NaN
/// from the `log10` terms.
pub const MIN_PATH_LOSS_DISTANCE: f64 = 1.0;

/// Upper bound used when searching for the effective distance (100 000 km).
const MAX_EFFECTIVE_DISTANCE: f64 = 1.0e8;

fn default_system_loss() -> f64 {
    1.0
}

/// Deterministic large-scale propagation model. Exactly one is active per simulation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PropagationModel {
    /// Free-space loss `20·log10(4π·d·f/c)` plus the system loss.
    #[serde(rename = "friis", alias = "friis_free_space")]
    FriisFreeSpace {
        frequency_hz: f64,
        /// Dimensionless system loss factor (≥ 1).
        #[serde(default = "default_system_loss")]
        system_loss: f64,
    },
    /// Plane-earth reflection model. Uses Friis below the crossover distance
    /// `dc = 4π·ht·hr/λ` and `40·log10(d) − 20·log10(ht·hr)` beyond it.
    TwoRayGround {
        frequency_hz: f64,
        tx_height: f64,
        rx_height: f64,
        #[serde(default = "default_system_loss")]
        system_loss: f64,
    },
    /// `PL(d) = PL(d0) + 10·n·log10(d/d0)`, and exactly `PL(d0)` for `d ≤ d0`.
    LogDistance {
        exponent: f64,
        reference_distance: f64,
        reference_loss_db: f64,
    },
}

impl PropagationModel {
    /// Friis model with unit system loss.
    ///
    /// # Errors
    /// - `SimError::Configuration` - frequency is not a positive finite number
    pub fn friis(frequency_hz: f64) -> Result<Self, SimError> {
        let model = PropagationModel::FriisFreeSpace {
            frequency_hz,
            system_loss: default_system_loss(),
        };
        model.validate()?;
        Ok(model)
    }

    /// # Errors
    /// - `SimError::Configuration` - non-positive frequency or antenna height
    pub fn two_ray_ground(frequency_hz: f64, tx_height: f64, rx_height: f64) -> Result<Self, SimError> {
        let model = PropagationModel::TwoRayGround {
            frequency_hz,
            tx_height,
            rx_height,
            system_loss: default_system_loss(),
        };
        model.validate()?;
        Ok(model)
    }

    /// # Errors
    /// - `SimError::Configuration` - non-positive exponent or reference distance
    pub fn log_distance(exponent: f64, reference_distance: f64, reference_loss_db: f64) -> Result<Self, SimError> {
        let model = PropagationModel::LogDistance {
            exponent,
            reference_distance,
            reference_loss_db,
        };
        model.validate()?;
        Ok(model)
    }

    /// Check the parameters. Deserialized models must be validated before use.
    pub fn validate(&self) -> Result<(), SimError> {
        fn positive(name: &str, value: f64) -> Result<(), SimError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(SimError::configuration(format!("{} must be positive and finite, got {}", name, value)))
            }
        }
        fn system_loss_valid(value: f64) -> Result<(), SimError> {
            if value.is_finite() && value >= 1.0 {
                Ok(())
            } else {
                Err(SimError::configuration(format!("system_loss must be >= 1, got {}", value)))
            }
        }

        match *self {
            PropagationModel::FriisFreeSpace { frequency_hz, system_loss } => {
                positive("frequency_hz", frequency_hz)?;
                system_loss_valid(system_loss)
            }
            PropagationModel::TwoRayGround {
                frequency_hz,
                tx_height,
                rx_height,
                system_loss,
            } => {
                positive("frequency_hz", frequency_hz)?;
                positive("tx_height", tx_height)?;
                positive("rx_height", rx_height)?;
                system_loss_valid(system_loss)
            }
            PropagationModel::LogDistance {
                exponent,
                reference_distance,
                reference_loss_db,
            } => {
                positive("exponent", exponent)?;
                positive("reference_distance", reference_distance)?;
                if !reference_loss_db.is_finite() {
                    return Err(SimError::configuration(format!("reference_loss_db must be finite, got {}", reference_loss_db)));
                }
                Ok(())
            }
        }
    }

    /// Short model name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            PropagationModel::FriisFreeSpace { .. } => "friis",
            PropagationModel::TwoRayGround { .. } => "two-ray-ground",
            PropagationModel::LogDistance { .. } => "log-distance",
        }
    }

    /// Path loss in dB at `distance` meters.
    ///
    /// Distances below [`MIN_PATH_LOSS_DISTANCE`] (including zero, negative
    /// and NaN) are clamped to it, so the result is finite for valid parameters.
    pub fn path_loss_db(&self, distance: f64) -> f64 {
        let d = clamp_distance(distance);
        match *self {
            PropagationModel::FriisFreeSpace { frequency_hz, system_loss } => friis_loss_db(d, frequency_hz, system_loss),
            PropagationModel::TwoRayGround {
                frequency_hz,
                tx_height,
                rx_height,
                system_loss,
            } => {
                let wavelength = SPEED_OF_LIGHT / frequency_hz;
                let crossover = 4.0 * std::f64::consts::PI * tx_height * rx_height / wavelength;
                if d <= crossover {
                    friis_loss_db(d, frequency_hz, system_loss)
                } else {
                    40.0 * d.log10() - 20.0 * (tx_height * rx_height).log10() + 10.0 * system_loss.log10()
                }
            }
            PropagationModel::LogDistance {
                exponent,
                reference_distance,
                reference_loss_db,
            } => {
                if d <= reference_distance {
                    reference_loss_db
                } else {
                    reference_loss_db + 10.0 * exponent * (d / reference_distance).log10()
                }
            }
        }
    }
}

/// Time a frame spends on the air between transmitter and receiver.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PropagationDelay {
    /// Frames arrive in the same tick they are emitted.
    #[default]
    Instantaneous,
    /// `distance / speed_mps`, typically the speed of light.
    ConstantSpeed { speed_mps: f64 },
}

impl PropagationDelay {
    pub fn speed_of_light() -> Self {
        PropagationDelay::ConstantSpeed { speed_mps: SPEED_OF_LIGHT }
    }

    pub fn validate(&self) -> Result<(), SimError> {
        match *self {
            PropagationDelay::Instantaneous => Ok(()),
            PropagationDelay::ConstantSpeed { speed_mps } if speed_mps.is_finite() && speed_mps > 0.0 => Ok(()),
            PropagationDelay::ConstantSpeed { speed_mps } => {
                Err(SimError::configuration(format!("propagation speed must be positive and finite, got {}", speed_mps)))
            }
        }
    }

    /// Delay for a frame travelling `distance` meters. `None` when instantaneous.
    pub fn delay_for(&self, distance: f64) -> Option<SimDuration> {
        match *self {
            PropagationDelay::Instantaneous => None,
            PropagationDelay::ConstantSpeed { speed_mps } => Some(SimDuration::from_secs_f64(distance.max(0.0) / speed_mps)),
        }
    }
}

/// One row of an SNR to data-rate table.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RateStep {
    /// Lowest SNR (dB) at which `rate_bps` is sustained.
    pub min_snr_db: f64,
    pub rate_bps: u64,
}

/// Highest sustainable PHY rate for a given SNR.
///
/// Picks the fastest step whose threshold the SNR reaches, the way an ideal
/// rate manager would. Below the lowest threshold the link carries nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    /// Sorted by ascending `min_snr_db`.
    steps: Vec<RateStep>,
}

impl RateTable {
    /// # Errors
    /// - `SimError::Configuration` - empty table, non-finite threshold or zero rate
    pub fn new(mut steps: Vec<RateStep>) -> Result<Self, SimError> {
        if steps.is_empty() {
            return Err(SimError::configuration("rate table needs at least one step"));
        }
        for step in &steps {
            if !step.min_snr_db.is_finite() {
                return Err(SimError::configuration(format!("rate step min_snr_db {} must be finite", step.min_snr_db)));
            }
            if step.rate_bps == 0 {
                return Err(SimError::configuration(format!("rate step at {} dB has a zero rate", step.min_snr_db)));
            }
        }
        steps.sort_by(|a, b| a.min_snr_db.total_cmp(&b.min_snr_db));
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[RateStep] {
        &self.steps
    }

    /// Rate in b/s sustained at `snr_db`, `0` below the lowest step.
    pub fn rate_for(&self, snr_db: f64) -> u64 {
        self.steps
            .iter()
            .filter(|s| snr_db >= s.min_snr_db)
            .map(|s| s.rate_bps)
            .max()
            .unwrap_or(0)
    }
}

/// Apply the minimum-distance policy.
pub fn clamp_distance(distance: f64) -> f64 {
    if distance >= MIN_PATH_LOSS_DISTANCE { distance } else { MIN_PATH_LOSS_DISTANCE }
}

fn friis_loss_db(distance: f64, frequency_hz: f64, system_loss: f64) -> f64 {
    20.0 * (4.0 * std::f64::consts::PI * distance * frequency_hz / SPEED_OF_LIGHT).log10() + 10.0 * system_loss.log10()
}

/// Received signal power (dBm) for a transmit power and a path loss.
///
/// Formula: `P_rx(dBm) = P_tx(dBm) - PL(dB)`
pub fn calculate_received_power(tx_power_dbm: f64, path_loss_db: f64) -> f64 {
    tx_power_dbm - path_loss_db
}

/// Thermal noise floor (dBm) of a receiver.
///
/// # Formula
///
/// ```text
/// N(dBm) = 10 × log₁₀(k × T × B × 1000) + NF
/// ```
///
/// With T = 290 K. A 20 MHz channel with a 7 dB noise figure sits at about -94 dBm.
pub fn calculate_noise_floor(bandwidth_hz: f64, noise_figure_db: f64) -> f64 {
    mw_to_dbm(BOLTZMANN * NOISE_TEMPERATURE_K * bandwidth_hz * 1000.0) + noise_figure_db
}

/// Convert power from milliwatts to dBm.
///
/// For `mw <= 0` this returns `-inf` or NaN, callers pass strictly positive powers.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

/// Estimate the distance at which the received power drops to `receiving_limit_dbm`.
///
/// Every supported model is non-decreasing in distance, so a bisection over
/// `[MIN_PATH_LOSS_DISTANCE, 1e8]` m converges. Returns `0.0` when the link
/// budget is already exhausted at the minimum distance, and the upper bound
/// when it never is within the search range.
pub fn calculate_effective_distance(tx_power_dbm: f64, receiving_limit_dbm: f64, model: &PropagationModel) -> f64 {
    let budget = tx_power_dbm - receiving_limit_dbm;
    if model.path_loss_db(MIN_PATH_LOSS_DISTANCE) > budget {
        return 0.0;
    }
    if model.path_loss_db(MAX_EFFECTIVE_DISTANCE) <= budget {
        return MAX_EFFECTIVE_DISTANCE;
    }
    let (mut low, mut high) = (MIN_PATH_LOSS_DISTANCE, MAX_EFFECTIVE_DISTANCE);
    for _ in 0..200 {
        let mid = 0.5 * (low + high);
        if model.path_loss_db(mid) <= budget {
            low = mid;
        } else {
            high = mid;
        }
        if high - low < 1e-6 {
            break;
        }
    }
    low
}
