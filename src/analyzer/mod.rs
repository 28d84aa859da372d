//! Analyzer module for recorded traces.
//!
//! Reads the lines a simulation wrote, recovers the throughput and SNR
//! samples, and places them on the distance axis of the scenario they came
//! from.

pub mod profile;
pub mod task;
pub mod trace_loader;
pub mod trace_parser;

pub use profile::{DistancePoint, DistanceProfile, ProfileSummary};
pub use task::analyze_trace_file;
pub use trace_loader::{LoadedTrace, TraceLoader};
pub use trace_parser::parse_trace_line;
