//! Per-request voxelization pipeline.
//!
//! One request grows the device buffers as needed, uploads every mesh,
//! zero-fills the grid, fans the per-mesh kernel launches out over the lane
//! pool and reads the consolidated grid back. The host blocks exactly three
//! times: after the upload barrier and zero fill, at the pool-wide drain,
//! and on the final readback.

use std::time::Instant;

use wgpu::util::DeviceExt;

use crate::core::{workgroup_count, GridGeometry, MeshData, MeshLayout};
use crate::diag::{diag, Severity};
use crate::error::Error;

use super::buffers::{align_copy_size, map_buffer_bytes, upload_meshes, TRIANGLE_STRIDE, VERTEX_STRIDE};
use super::pipeline::{GridParams, MeshParams};
use super::VoxelizerPlugin;

struct Launch {
    params: MeshParams,
    workgroups: u32,
}

impl VoxelizerPlugin {
    /// Voxelizes a batch of meshes into one dense grid of
    /// `x*y*z` bytes (row stride `x`, slice stride `x*y`).
    ///
    /// The grid is zero-filled at the start of every request; a request with
    /// no triangles returns all zeros. On failure the session and any buffer
    /// committed by an earlier request stay usable; only this request's work
    /// is abandoned.
    pub async fn voxelize(
        &mut self,
        grid: &GridGeometry,
        meshes: &[MeshData<'_>],
    ) -> Result<Vec<u8>, Error> {
        grid.validate()?;
        let layout = MeshLayout::new(meshes)?;
        let num_voxels = grid.num_voxels();
        let vertex_bytes = layout.total_vertices * VERTEX_STRIDE;
        let triangle_bytes = layout.total_triangles * TRIANGLE_STRIDE;
        self.ensure_storage_fits(num_voxels, "mesh_voxelizer.voxel_grid")?;
        self.ensure_storage_fits(vertex_bytes, "mesh_voxelizer.vertices")?;
        self.ensure_storage_fits(triangle_bytes, "mesh_voxelizer.triangles")?;

        let setup_start = Instant::now();

        self.grid_buffer
            .ensure_capacity(&self.device, num_voxels, self.sink.as_ref())
            .await?;
        self.vertex_buffer
            .ensure_capacity(&self.device, vertex_bytes, self.sink.as_ref())
            .await?;
        self.triangle_buffer
            .ensure_capacity(&self.device, triangle_bytes, self.sink.as_ref())
            .await?;

        if triangle_bytes > 0 {
            upload_meshes(
                &self.queue,
                self.vertex_buffer.get()?,
                self.triangle_buffer.get()?,
                meshes,
                &layout,
            );
            // Uploads must land before any kernel reads the mesh buffers.
            self.queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
            self.block_until_idle("mesh upload barrier")?;
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mesh_voxelizer.zero_fill"),
            });
        encoder.clear_buffer(self.grid_buffer.get()?, 0, None);
        self.queue.submit([encoder.finish()]);
        self.block_until_idle("zero fill")?;

        let setup_ms = setup_start.elapsed().as_secs_f32() * 1000.0;
        let dispatch_start = Instant::now();

        let launches = self.plan_launches(meshes, &layout)?;
        if !launches.is_empty() {
            self.dispatch_launches(grid, &launches).await?;
        }

        let dispatch_ms = dispatch_start.elapsed().as_secs_f32() * 1000.0;
        let readback_start = Instant::now();

        let grid_out = self.read_back_grid(num_voxels).await?;

        let readback_ms = readback_start.elapsed().as_secs_f32() * 1000.0;
        diag!(
            self.sink,
            Severity::Trace,
            "voxelized {} meshes ({} triangles) into {} voxels: setup {:.3} ms, dispatch {:.3} ms, readback {:.3} ms",
            meshes.len(),
            layout.total_triangles,
            num_voxels,
            setup_ms,
            dispatch_ms,
            readback_ms
        );
        Ok(grid_out)
    }

    /// Per-mesh workgroup counts and kernel arguments, checked against
    /// device limits before anything is recorded.
    fn plan_launches(
        &self,
        meshes: &[MeshData<'_>],
        layout: &MeshLayout,
    ) -> Result<Vec<Launch>, Error> {
        let mut launches = Vec::with_capacity(meshes.len());
        for (index, (mesh, span)) in meshes.iter().zip(&layout.spans).enumerate() {
            let num_triangles = mesh.triangle_count();
            if num_triangles == 0 {
                continue;
            }
            let workgroups = workgroup_count(num_triangles, self.workgroup_size);
            self.ensure_workgroups_fit(workgroups).inspect_err(|err| {
                diag!(
                    self.sink,
                    Severity::Error,
                    "kernel dispatch failed on mesh {}/{}: {err}",
                    index + 1,
                    meshes.len()
                );
            })?;
            launches.push(Launch {
                params: MeshParams {
                    num_triangles,
                    vertex_base: span.vertex_base,
                    triangle_base: span.triangle_base,
                    _pad0: 0,
                },
                workgroups,
            });
        }
        Ok(launches)
    }

    /// Binds the grid-wide arguments once, then records one compute pass per
    /// launch round-robin over the lane pool and drains the whole pool.
    ///
    /// Dispatch is fire-and-forget across lanes: no per-mesh wait is
    /// interposed, ordering is only established by the final drain.
    async fn dispatch_launches(
        &self,
        grid: &GridGeometry,
        launches: &[Launch],
    ) -> Result<(), Error> {
        let grid_params = GridParams {
            corner: grid.corner.to_array(),
            inv_element_size: grid.inv_element_size,
            cells: grid.cells,
            row_stride: grid.row_stride(),
            slice_stride: grid.slice_stride(),
            _pad0: [0; 3],
        };
        let grid_params_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("mesh_voxelizer.grid_params"),
                contents: bytemuck::bytes_of(&grid_params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut lanes = self.pool.begin(&self.device);
        for (dispatch, launch) in launches.iter().enumerate() {
            let mesh_params_buf = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("mesh_voxelizer.mesh_params"),
                    contents: bytemuck::bytes_of(&launch.params),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("mesh_voxelizer.bind_group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: self.grid_buffer.get()?.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: self.vertex_buffer.get()?.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.triangle_buffer.get()?.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: grid_params_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: mesh_params_buf.as_entire_binding(),
                    },
                ],
            });

            let encoder = lanes.lane(dispatch);
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("mesh_voxelizer.pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(launch.workgroups, 1, 1);
        }
        self.device.poll(wgpu::Maintain::Poll);
        if let Some(err) = self.device.pop_error_scope().await {
            diag!(
                self.sink,
                Severity::Error,
                "kernel argument binding failed: {err}"
            );
            return Err(Error::KernelArgBindingFailed {
                reason: err.to_string(),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let drain_result = lanes.drain(&self.queue);
        let scope_err = self.device.pop_error_scope().await;
        drain_result?;
        if let Some(err) = scope_err {
            diag!(
                self.sink,
                Severity::Error,
                "kernel dispatch failed: {err}"
            );
            return Err(Error::EnqueueFailed {
                stage: "kernel dispatch",
                reason: err.to_string(),
            });
        }
        Ok(())
    }

    /// One blocking read of the first `num_voxels` bytes of the grid buffer.
    async fn read_back_grid(&self, num_voxels: u64) -> Result<Vec<u8>, Error> {
        let copy_bytes = align_copy_size(num_voxels);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mesh_voxelizer.read_grid"),
            size: copy_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mesh_voxelizer.readback"),
            });
        encoder.copy_buffer_to_buffer(self.grid_buffer.get()?, 0, &staging, 0, copy_bytes);
        self.queue.submit([encoder.finish()]);
        self.block_until_idle("grid readback")?;

        let mut bytes = map_buffer_bytes(&staging, &self.device).await?;
        bytes.truncate(num_voxels as usize);
        Ok(bytes)
    }

    fn block_until_idle(&self, stage: &'static str) -> Result<(), Error> {
        let result = self.device.poll(wgpu::Maintain::Wait);
        if !result.is_queue_empty() {
            diag!(
                self.sink,
                Severity::Error,
                "device did not go idle during {stage}"
            );
            return Err(Error::SyncFailed {
                stage,
                reason: "device queue did not drain".to_owned(),
            });
        }
        Ok(())
    }
}
