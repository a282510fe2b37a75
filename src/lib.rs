//! Host-side dispatch layer for GPU triangle-mesh voxelization.
//!
//! The crate owns the accelerator session (adapter selection, device and
//! pipeline construction, grow-only device buffers, a pool of dispatch lanes)
//! and feeds batches of meshes through an externally supplied `voxelize`
//! compute kernel, reading one consolidated voxel grid back per request.
//! The triangle/voxel intersection math lives entirely in the kernel; see
//! [`gpu::pipeline`] for the binding contract the kernel must honor.

pub mod core;
pub mod diag;
pub mod error;
pub mod gpu;

pub use crate::core::{GridGeometry, MeshData, MeshLayout, MeshSpan};
pub use crate::diag::{DiagnosticSink, LogSink, NullSink, Severity};
pub use crate::error::Error;
pub use crate::gpu::{VoxelizerConfig, VoxelizerPlugin};
