//! GPU session: adapter selection, pipeline construction, buffer and lane
//! ownership.
//!
//! A [`VoxelizerPlugin`] is built once per session by a fallible multi-step
//! constructor and owns every accelerator handle until dropped. Construction
//! short-circuits on the first failure; everything acquired up to that point
//! is released by drop, so a half-built session never escapes.

use std::path::PathBuf;
use std::sync::Arc;

mod buffers;
mod dispatch;
mod pipeline;
mod pool;
mod select;

use buffers::GrowBuffer;
use pool::LanePool;

use crate::diag::{diag, DiagnosticSink, Severity};
use crate::error::Error;

/// Queue-pool lanes per session; enough independent streams to overlap many
/// small per-mesh launches.
pub const DEFAULT_QUEUE_POOL_SIZE: usize = 50;

/// Configuration for [`VoxelizerPlugin::new`].
#[derive(Debug, Clone)]
pub struct VoxelizerConfig {
    /// Path the WGSL kernel source is read from, once, at construction.
    pub kernel_path: PathBuf,
    /// Substring the selected adapter's name must contain. Empty matches
    /// every adapter.
    pub adapter_filter: String,
    /// Accept a non-GPU adapter when no GPU-class adapter matches.
    pub allow_device_fallback: bool,
    /// Number of dispatch lanes (0 is clamped to 1).
    pub queue_pool_size: usize,
    /// Kernel workgroup size (0 = derive from device limits).
    pub workgroup_size: u32,
}

impl VoxelizerConfig {
    pub fn new(kernel_path: impl Into<PathBuf>) -> Self {
        Self {
            kernel_path: kernel_path.into(),
            ..Self::default()
        }
    }
}

impl Default for VoxelizerConfig {
    fn default() -> Self {
        Self {
            kernel_path: PathBuf::from("voxelize.wgsl"),
            adapter_filter: String::new(),
            allow_device_fallback: true,
            queue_pool_size: DEFAULT_QUEUE_POOL_SIZE,
            workgroup_size: 0,
        }
    }
}

fn resolve_workgroup_size(requested: u32, max_invocations: u32) -> u32 {
    let size = if requested == 0 { 64 } else { requested };
    size.clamp(1, max_invocations.max(1))
}

/// One voxelization session: the selected adapter, the device and its
/// primary queue, the compiled kernel pipeline, the lane pool and the three
/// grow-only device buffers.
pub struct VoxelizerPlugin {
    // Field order is drop order: buffers and pipeline release before the
    // device, the device before the adapter and instance.
    pub(crate) grid_buffer: GrowBuffer,
    pub(crate) vertex_buffer: GrowBuffer,
    pub(crate) triangle_buffer: GrowBuffer,
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) bind_group_layout: wgpu::BindGroupLayout,
    pub(crate) pool: LanePool,
    pub(crate) queue: wgpu::Queue,
    pub(crate) device: wgpu::Device,
    pub(crate) adapter: wgpu::Adapter,
    pub(crate) instance: wgpu::Instance,
    pub(crate) workgroup_size: u32,
    pub(crate) max_workgroups_per_dimension: u32,
    pub(crate) max_storage_binding_size: u64,
    pub(crate) sink: Arc<dyn DiagnosticSink>,
}

impl std::fmt::Debug for VoxelizerPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoxelizerPlugin")
            .field("workgroup_size", &self.workgroup_size)
            .field(
                "max_workgroups_per_dimension",
                &self.max_workgroups_per_dimension,
            )
            .field("max_storage_binding_size", &self.max_storage_binding_size)
            .finish_non_exhaustive()
    }
}

impl VoxelizerPlugin {
    /// Builds a session: select adapter -> request device -> compile the
    /// kernel read from `config.kernel_path` -> size the lane pool.
    pub async fn new(
        config: VoxelizerConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, Error> {
        let instance = wgpu::Instance::default();
        let adapter = select::select_adapter(
            &instance,
            &config.adapter_filter,
            config.allow_device_fallback,
            sink.as_ref(),
        )?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await
            .map_err(|err| {
                diag!(
                    sink,
                    Severity::Error,
                    "device creation on \"{adapter_name}\" failed: {err}"
                );
                Error::ContextCreationFailed {
                    reason: err.to_string(),
                }
            })?;

        let limits = device.limits();
        let workgroup_size = resolve_workgroup_size(
            config.workgroup_size,
            limits.max_compute_invocations_per_workgroup,
        );

        let kernel = pipeline::build_kernel(
            &device,
            &config.kernel_path,
            workgroup_size,
            sink.as_ref(),
        )
        .await?;

        diag!(
            sink,
            Severity::Trace,
            "session ready on \"{}\" (workgroup size {}, {} lanes)",
            adapter_name,
            workgroup_size,
            config.queue_pool_size.max(1)
        );

        Ok(Self {
            grid_buffer: GrowBuffer::new(
                "mesh_voxelizer.voxel_grid",
                wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            ),
            vertex_buffer: GrowBuffer::new(
                "mesh_voxelizer.vertices",
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            ),
            triangle_buffer: GrowBuffer::new(
                "mesh_voxelizer.triangles",
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            ),
            pipeline: kernel.pipeline,
            bind_group_layout: kernel.bind_group_layout,
            pool: LanePool::new(config.queue_pool_size),
            queue,
            device,
            adapter,
            instance,
            workgroup_size,
            max_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
            max_storage_binding_size: limits.max_storage_buffer_binding_size as u64,
            sink,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    pub fn queue_pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Current capacities of the grid, vertex and triangle buffers in bytes.
    /// Capacities only grow across the session's lifetime.
    pub fn buffer_capacities(&self) -> [u64; 3] {
        [
            self.grid_buffer.capacity(),
            self.vertex_buffer.capacity(),
            self.triangle_buffer.capacity(),
        ]
    }

    pub(crate) fn ensure_workgroups_fit(&self, workgroups: u32) -> Result<(), Error> {
        if workgroups > self.max_workgroups_per_dimension {
            return Err(Error::EnqueueFailed {
                stage: "kernel dispatch",
                reason: format!(
                    "{} workgroups exceed device max {}",
                    workgroups, self.max_workgroups_per_dimension
                ),
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_storage_fits(
        &self,
        bytes: u64,
        label: &'static str,
    ) -> Result<(), Error> {
        if bytes > self.max_storage_binding_size {
            return Err(Error::AllocationFailed {
                label,
                bytes,
                reason: format!(
                    "exceeds max storage binding size {}",
                    self.max_storage_binding_size
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroup_size_defaults_and_clamps() {
        assert_eq!(resolve_workgroup_size(0, 256), 64);
        assert_eq!(resolve_workgroup_size(0, 32), 32);
        assert_eq!(resolve_workgroup_size(128, 256), 128);
        assert_eq!(resolve_workgroup_size(512, 256), 256);
        assert_eq!(resolve_workgroup_size(16, 256), 16);
    }

    #[test]
    fn default_config_uses_full_pool() {
        let config = VoxelizerConfig::default();
        assert_eq!(config.queue_pool_size, DEFAULT_QUEUE_POOL_SIZE);
        assert!(config.allow_device_fallback);
        assert!(config.adapter_filter.is_empty());
    }
}
