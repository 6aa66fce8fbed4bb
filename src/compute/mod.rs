//! Compute module - Numerical core of the stable fluids solver.

mod dispatch;
mod solver;

pub mod gpu;

pub use dispatch::*;
pub use solver::*;
