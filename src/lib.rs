//! Discrete-event simulator for one Wi-Fi link between a fixed access point
//! and a moving station, with tools to analyze the traces it writes.

pub mod analyzer;
pub mod common;
pub mod simulation;
