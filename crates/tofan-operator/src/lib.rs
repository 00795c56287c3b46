//! Tofan operator: CLI, CRD installation and controller wiring

#![deny(missing_docs)]

/// Command-line flags and their environment twins
pub mod cli;
/// Controller futures for each Tofan CRD
pub mod controller_runner;
/// Startup utilities (CRD printing and installation)
pub mod startup;
