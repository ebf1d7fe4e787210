//! Configuration loading and runtime wiring shared by the `tether` binary.

pub mod bootstrap;
pub mod config;
pub mod http;
