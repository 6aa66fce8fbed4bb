//! GPU backend for the stable fluids solver.
//!
//! Built on WebGPU (wgpu): double-buffered storage textures, a kernel
//! binding layer with cached entry points and ceiling-division dispatch
//! sizing, and the five-stage compute pipeline.

mod buffer;
mod context;
mod program;
mod solver;
mod texture;

pub use buffer::{GpuBuffer, GpuDoubleBuffer};
pub use context::GpuContext;
pub use program::{BindSlot, KernelBinding, ShaderProgram};
pub use solver::GpuSolver;
pub use texture::{GpuDoubleTexture, GpuTexture, TextureDesc};

/// Error type for GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    #[error("Buffer mapping failed: {0}")]
    BufferMap(#[from] wgpu::BufferAsyncError),

    #[error("Cannot allocate {kind}: requested {requested} exceeds device limit {limit}")]
    Allocation {
        kind: &'static str,
        requested: u64,
        limit: u64,
    },

    #[error("{what} used before initialization")]
    Uninitialized { what: &'static str },

    #[error("Entry point '{entry}' not found in program '{program}'")]
    KernelLookup { program: String, entry: String },

    #[error("Transfer of {len} elements at offset {offset} exceeds resource capacity {capacity}")]
    Range {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("Device rejected dispatch: {0}")]
    Dispatch(String),
}
