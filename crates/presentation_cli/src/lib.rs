//! narrator CLI
//!
//! Argument parsing, configuration loading, job discovery and report output
//! for the `narrator` binary. Synthesis itself lives in `speech_synthesis`.

pub mod cli;
pub mod jobs;
pub mod report;
pub mod settings;
