//! Kernel loading and pipeline construction.
//!
//! The voxelization kernel is supplied externally as WGSL source read off
//! disk at session construction. The dispatcher guarantees this binding
//! contract, which the kernel must mirror exactly:
//!
//! ```wgsl
//! @group(0) @binding(0) var<storage, read_write> voxel_grid: array<atomic<u32>>;
//! @group(0) @binding(1) var<storage, read> vertices: array<f32>;
//! @group(0) @binding(2) var<storage, read> triangles: array<u32>;
//! @group(0) @binding(3) var<uniform> grid: GridParams;
//! @group(0) @binding(4) var<uniform> mesh: MeshParams;
//!
//! override WORKGROUP_SIZE: u32 = 64u;
//!
//! @compute @workgroup_size(WORKGROUP_SIZE)
//! fn voxelize(@builtin(global_invocation_id) id: vec3<u32>) { ... }
//! ```
//!
//! Work-item indices are padded up to a multiple of `WORKGROUP_SIZE`; the
//! kernel must return without side effects for `id.x >= mesh.num_triangles`.

use std::path::Path;

use bytemuck::{Pod, Zeroable};

use crate::diag::{diag, DiagnosticSink, Severity};
use crate::error::Error;

pub(crate) const KERNEL_ENTRY_POINT: &str = "voxelize";

/// Grid-wide kernel arguments, bound once per request. Field order and
/// padding match the WGSL `GridParams` uniform.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct GridParams {
    pub corner: [f32; 3],
    pub inv_element_size: f32,
    pub cells: [u32; 3],
    pub row_stride: u32,
    pub slice_stride: u32,
    pub _pad0: [u32; 3],
}

/// Per-mesh kernel arguments, bound per dispatch.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct MeshParams {
    pub num_triangles: u32,
    pub vertex_base: u32,
    pub triangle_base: u32,
    pub _pad0: u32,
}

pub(crate) struct KernelPipeline {
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Reads the kernel source from `source_path` and builds the compute
/// pipeline with `WORKGROUP_SIZE` pinned to `workgroup_size`.
///
/// Shader and pipeline validation runs under an error scope; a failure
/// surfaces as [`Error::ProgramBuildFailed`] carrying the full diagnostic
/// text verbatim.
pub(crate) async fn build_kernel(
    device: &wgpu::Device,
    source_path: &Path,
    workgroup_size: u32,
    sink: &dyn DiagnosticSink,
) -> Result<KernelPipeline, Error> {
    let source = std::fs::read_to_string(source_path).map_err(|source| {
        diag!(
            sink,
            Severity::Error,
            "couldn't read kernel source \"{}\"",
            source_path.display()
        );
        Error::KernelSource {
            path: source_path.display().to_string(),
            source,
        }
    })?;

    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("mesh_voxelizer.kernel"),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("mesh_voxelizer.bind_group_layout"),
        entries: &[
            storage_entry(0, false),
            storage_entry(1, true),
            storage_entry(2, true),
            uniform_entry(3),
            uniform_entry(4),
        ],
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("mesh_voxelizer.pipeline_layout"),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let mut constants = std::collections::HashMap::new();
    constants.insert("WORKGROUP_SIZE".to_string(), workgroup_size as f64);
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("mesh_voxelizer.pipeline"),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point: KERNEL_ENTRY_POINT,
        compilation_options: wgpu::PipelineCompilationOptions {
            constants: &constants,
            ..Default::default()
        },
        cache: None,
    });

    device.poll(wgpu::Maintain::Poll);
    if let Some(err) = device.pop_error_scope().await {
        let log = err.to_string();
        diag!(
            sink,
            Severity::Error,
            "failed to build kernel \"{}\":\n{}",
            source_path.display(),
            log
        );
        return Err(Error::ProgramBuildFailed { log });
    }

    Ok(KernelPipeline {
        pipeline,
        bind_group_layout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Uniform layouts are part of the kernel ABI; lock them down.
    #[test]
    fn params_match_wgsl_uniform_layout() {
        assert_eq!(std::mem::size_of::<GridParams>(), 48);
        assert_eq!(std::mem::size_of::<MeshParams>(), 16);
        assert_eq!(std::mem::offset_of!(GridParams, inv_element_size), 12);
        assert_eq!(std::mem::offset_of!(GridParams, cells), 16);
        assert_eq!(std::mem::offset_of!(GridParams, row_stride), 28);
        assert_eq!(std::mem::offset_of!(GridParams, slice_stride), 32);
    }
}
