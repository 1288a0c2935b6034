//! certwatch-daemon library interface.
//!
//! Exposes the daemon modules for integration tests.

pub mod cli;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
