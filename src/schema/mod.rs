//! Schema module - Configuration for the fluid simulation.

mod config;

pub use config::{ConfigError, FluidConfig};
