//! Throughput and SNR as a function of link distance.
//!
//! Each sample time is mapped to the station's distance from the access point
//! using the scenario's constant-velocity geometry. For the reference scenario
//! that is `5 + 2·t` meters.

use std::fmt;

use crate::common::scenario::Scenario;
use crate::simulation::trace::TraceRecord;

/// One sample placed on the distance axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistancePoint {
    pub time_secs: f64,
    pub distance_m: f64,
    pub value: f64,
}

/// Aggregate figures over a profile. Fields are `None` when there were no samples of that kind.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProfileSummary {
    pub throughput_samples: usize,
    pub snr_samples: usize,
    pub peak_throughput_mbps: Option<f64>,
    pub mean_throughput_mbps: Option<f64>,
    pub min_snr_db: Option<f64>,
    pub max_snr_db: Option<f64>,
    pub mean_snr_db: Option<f64>,
    /// Distance of the last throughput sample above zero.
    pub last_connected_distance_m: Option<f64>,
}

fn fmt_opt(f: &mut fmt::Formatter<'_>, value: Option<f64>, unit: &str) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{:.2} {}", v, unit),
        None => write!(f, "n/a"),
    }
}

impl fmt::Display for ProfileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} throughput samples (peak ", self.throughput_samples)?;
        fmt_opt(f, self.peak_throughput_mbps, "Mbps")?;
        write!(f, ", mean ")?;
        fmt_opt(f, self.mean_throughput_mbps, "Mbps")?;
        write!(f, "), {} SNR samples (min ", self.snr_samples)?;
        fmt_opt(f, self.min_snr_db, "dB")?;
        write!(f, ", max ")?;
        fmt_opt(f, self.max_snr_db, "dB")?;
        write!(f, ", mean ")?;
        fmt_opt(f, self.mean_snr_db, "dB")?;
        write!(f, "), last connected at ")?;
        fmt_opt(f, self.last_connected_distance_m, "m")
    }
}

/// Throughput-vs-distance and SNR-vs-distance series for one trace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistanceProfile {
    throughput: Vec<DistancePoint>,
    snr: Vec<DistancePoint>,
}

impl DistanceProfile {
    pub fn from_records<'a>(scenario: &Scenario, records: impl IntoIterator<Item = &'a TraceRecord>) -> Self {
        let mut profile = Self::default();
        for record in records {
            let time_secs = record.time().as_secs_f64();
            let distance_m = scenario.distance_at(time_secs);
            match record {
                TraceRecord::Throughput(s) => profile.throughput.push(DistancePoint {
                    time_secs,
                    distance_m,
                    value: s.mbps,
                }),
                TraceRecord::Snr(s) => profile.snr.push(DistancePoint {
                    time_secs,
                    distance_m,
                    value: s.snr_db,
                }),
            }
        }
        profile
    }

    pub fn throughput(&self) -> &[DistancePoint] {
        &self.throughput
    }

    pub fn snr(&self) -> &[DistancePoint] {
        &self.snr
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            throughput_samples: self.throughput.len(),
            snr_samples: self.snr.len(),
            peak_throughput_mbps: values(&self.throughput).reduce(f64::max),
            mean_throughput_mbps: mean(&self.throughput),
            min_snr_db: values(&self.snr).reduce(f64::min),
            max_snr_db: values(&self.snr).reduce(f64::max),
            mean_snr_db: mean(&self.snr),
            last_connected_distance_m: self.throughput.iter().rev().find(|p| p.value > 0.0).map(|p| p.distance_m),
        }
    }
}

fn values(points: &[DistancePoint]) -> impl Iterator<Item = f64> + '_ {
    points.iter().map(|p| p.value)
}

fn mean(points: &[DistancePoint]) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    Some(values(points).sum::<f64>() / points.len() as f64)
}
