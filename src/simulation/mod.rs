//! Discrete-event simulation of a single wireless link.
//!
//! This module provides everything needed to run the link between one access
//! point and one moving station:
//! - Virtual time and a time-ordered event scheduler
//! - Constant-velocity mobility
//! - Path loss, received power and noise floor calculations
//! - A physical layer that turns geometry into signal samples
//! - Constant bit-rate traffic between a source and a sink
//! - Throughput and SNR monitors writing to a trace
//!
//! ## Module Organization
//!
//! - `time`: `SimTime`, `SimDuration` and trace number formatting
//! - `scheduler`: Event queue with deterministic tie-breaking
//! - `geometry`: 3D vectors and distances
//! - `mobility`: Entity arena with lazy position extrapolation
//! - `signal_calculations`: Propagation models and link budget helpers
//! - `phy`: Link physical layer and the device capability abstraction
//! - `traffic`: Source, sink and the frame flow between them
//! - `monitors`: Periodic and event-driven observers
//! - `trace`: Observable output
//! - `network`: `LinkSimulation`, which wires all of the above from a scenario
//! - `error`: `SimError`
//!
//! ## Public API
//!
//! The main entry point is `LinkSimulation::new` followed by `run`. The
//! building blocks are public so other topologies can be assembled by hand.

pub mod error;
pub mod geometry;
pub mod mobility;
pub mod monitors;
pub mod network;
pub mod phy;
pub mod scheduler;
pub mod signal_calculations;
pub mod time;
pub mod trace;
pub mod traffic;

pub use error::SimError;
pub use network::LinkSimulation;
pub use scheduler::{EventHandle, EventScheduler, RunSummary};
pub use time::{SimDuration, SimTime};
pub use trace::{TraceLog, TraceRecord};
