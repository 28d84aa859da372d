//! Error type shared by the simulation core.

/// Errors surfaced by the simulation core.
///
/// Setup-time problems (`Configuration`, `InvalidSchedule` while wiring) are
/// fatal and reported before any virtual time elapses. Anomalies met while the
/// event loop runs are absorbed where they occur and only logged.
#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    /// A delay was negative, a target time lay in the past, or the fire time overflowed.
    InvalidSchedule { reason: String },
    /// The device cannot produce signal samples (not wireless capable).
    UnsupportedCapability { device: String },
    /// Invalid model or traffic parameters detected at setup.
    Configuration(String),
}

impl SimError {
    pub(crate) fn invalid_schedule(reason: impl Into<String>) -> Self {
        SimError::InvalidSchedule { reason: reason.into() }
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        SimError::Configuration(reason.into())
    }
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::InvalidSchedule { reason } => write!(f, "Invalid schedule: {}", reason),
            SimError::UnsupportedCapability { device } => write!(f, "Device '{}' is not wireless capable", device),
            SimError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for SimError {}
