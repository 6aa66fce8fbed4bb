//! Stable fluids - real-time incompressible 2D flow simulation.
//!
//! This crate implements the stable fluids method (semi-Lagrangian
//! advection plus pressure projection via fixed-count Jacobi relaxation)
//! as a five-stage GPU compute pipeline over double-buffered storage
//! textures, with a CPU reference solver sharing the same stage math.
//!
//! # Architecture
//!
//! - `schema`: configuration types and validation
//! - `compute`: the numerical core - dispatch sizing, the CPU solver,
//!   and the wgpu backend under `compute::gpu`
//!
//! # Example
//!
//! ```rust
//! use stable_fluids::{
//!     compute::{CpuSolver, StepInput},
//!     schema::FluidConfig,
//! };
//!
//! let config = FluidConfig {
//!     width: 64,
//!     height: 64,
//!     ..Default::default()
//! };
//!
//! let mut solver = CpuSolver::new(config);
//! solver.run(
//!     10,
//!     StepInput {
//!         time: 0.0,
//!         pointer_uv: [0.5, 0.5],
//!     },
//! );
//!
//! let rgba = solver.render_rgba8();
//! assert_eq!(rgba.len(), 64 * 64 * 4);
//! ```
//!
//! The GPU pipeline is the production path: construct
//! [`compute::gpu::GpuSolver`] (async, e.g. via `pollster::block_on`),
//! call `step` once per frame, and present its render texture.

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::gpu::{GpuError, GpuSolver};
pub use compute::{CpuSolver, FieldState, StepInput};
pub use schema::FluidConfig;
