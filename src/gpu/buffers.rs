//! Grow-only device buffers, mesh upload and readback mapping.

use crate::core::{MeshData, MeshLayout};
use crate::diag::{diag, DiagnosticSink, Severity};
use crate::error::Error;

/// Bytes per vertex (xyz `f32` triple) in the shared vertex buffer.
pub(crate) const VERTEX_STRIDE: u64 = 12;
/// Bytes per triangle (three `u32` indices) in the shared triangle buffer.
pub(crate) const TRIANGLE_STRIDE: u64 = 12;

pub(crate) fn needs_growth(capacity: u64, required: u64) -> bool {
    required > capacity
}

/// Rounds a byte size up to wgpu's copy/clear alignment.
pub(crate) const fn align_copy_size(bytes: u64) -> u64 {
    bytes.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

/// A device buffer whose capacity only ever grows.
///
/// Growth is exact-fit: a request larger than the current capacity allocates
/// one new buffer sized to the request (padded only to copy alignment) and
/// swaps it in; the old handle is dropped only after the new allocation is
/// confirmed good, so a failed grow leaves the previous buffer intact.
/// Contents are never carried across a grow; callers overwrite or clear up
/// to the extent they read.
pub(crate) struct GrowBuffer {
    label: &'static str,
    usage: wgpu::BufferUsages,
    buffer: Option<wgpu::Buffer>,
    capacity: u64,
}

impl GrowBuffer {
    pub fn new(label: &'static str, usage: wgpu::BufferUsages) -> Self {
        Self {
            label,
            usage,
            buffer: None,
            capacity: 0,
        }
    }

    /// Capacity in bytes, as last requested (pre-alignment).
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn get(&self) -> Result<&wgpu::Buffer, Error> {
        self.buffer.as_ref().ok_or(Error::AllocationFailed {
            label: self.label,
            bytes: 0,
            reason: "buffer was never allocated".to_owned(),
        })
    }

    /// Makes the buffer at least `required` bytes large. No-op when the
    /// current capacity already covers the request; stale contents are the
    /// caller's problem. Returns whether a new allocation happened.
    pub async fn ensure_capacity(
        &mut self,
        device: &wgpu::Device,
        required: u64,
        sink: &dyn DiagnosticSink,
    ) -> Result<bool, Error> {
        if !needs_growth(self.capacity, required) {
            return Ok(false);
        }

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let new_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(self.label),
            size: align_copy_size(required),
            usage: self.usage,
            mapped_at_creation: false,
        });
        device.poll(wgpu::Maintain::Poll);
        if let Some(err) = device.pop_error_scope().await {
            // The failed handle is dropped here; the old buffer stays bound.
            diag!(
                sink,
                Severity::Error,
                "allocation of {} bytes for {} failed: {}",
                required,
                self.label,
                err
            );
            return Err(Error::AllocationFailed {
                label: self.label,
                bytes: required,
                reason: err.to_string(),
            });
        }

        diag!(
            sink,
            Severity::Trace,
            "{} grown {} -> {} bytes",
            self.label,
            self.capacity,
            required
        );
        self.buffer = Some(new_buffer);
        self.capacity = required;
        Ok(true)
    }
}

/// Queues one non-blocking write per mesh sub-array at that mesh's
/// prefix-sum base offset. The caller must barrier the queue before any
/// kernel reads the buffers.
pub(crate) fn upload_meshes(
    queue: &wgpu::Queue,
    vertex_buffer: &wgpu::Buffer,
    triangle_buffer: &wgpu::Buffer,
    meshes: &[MeshData<'_>],
    layout: &MeshLayout,
) {
    for (mesh, span) in meshes.iter().zip(&layout.spans) {
        if !mesh.vertices.is_empty() {
            queue.write_buffer(
                vertex_buffer,
                span.vertex_base as u64 * VERTEX_STRIDE,
                bytemuck::cast_slice(mesh.vertices),
            );
        }
        if !mesh.triangles.is_empty() {
            queue.write_buffer(
                triangle_buffer,
                span.triangle_base as u64 * TRIANGLE_STRIDE,
                bytemuck::cast_slice(mesh.triangles),
            );
        }
    }
}

/// Blocking read of a MAP_READ staging buffer back to host memory.
pub(crate) async fn map_buffer_bytes(
    buffer: &wgpu::Buffer,
    device: &wgpu::Device,
) -> Result<Vec<u8>, Error> {
    let slice = buffer.slice(..);
    let (sender, receiver) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    let result = receiver.await.map_err(|_| Error::SyncFailed {
        stage: "readback map",
        reason: "map callback dropped".to_owned(),
    })?;
    result.map_err(|err| Error::SyncFailed {
        stage: "readback map",
        reason: err.to_string(),
    })?;
    let data = slice.get_mapped_range();
    let bytes = data.to_vec();
    drop(data);
    buffer.unmap();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Host-side model of the grow policy, driven the way a request
    // sequence drives a real buffer.
    struct CapacityModel {
        capacity: u64,
        allocations: u32,
    }

    impl CapacityModel {
        fn new() -> Self {
            Self {
                capacity: 0,
                allocations: 0,
            }
        }

        fn request(&mut self, required: u64) {
            if needs_growth(self.capacity, required) {
                self.allocations += 1;
                self.capacity = required;
            }
        }
    }

    #[test]
    fn capacity_never_decreases() {
        let mut model = CapacityModel::new();
        let mut previous = 0;
        for required in [100u64, 50, 200, 200, 1, 199, 201] {
            model.request(required);
            assert_eq!(model.capacity, previous.max(required));
            assert!(model.capacity >= previous);
            previous = model.capacity;
        }
    }

    #[test]
    fn identical_requests_allocate_once() {
        let mut model = CapacityModel::new();
        model.request(4096);
        model.request(4096);
        assert_eq!(model.allocations, 1);
        assert_eq!(model.capacity, 4096);
    }

    #[test]
    fn reallocation_happens_iff_required_exceeds_capacity() {
        let mut model = CapacityModel::new();
        model.request(64);
        assert_eq!(model.allocations, 1);
        model.request(32);
        assert_eq!(model.allocations, 1);
        model.request(64);
        assert_eq!(model.allocations, 1);
        model.request(65);
        assert_eq!(model.allocations, 2);
    }

    #[test]
    fn random_request_sequences_keep_capacity_monotone() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let mut model = CapacityModel::new();
            let mut previous = 0u64;
            for _ in 0..50 {
                let required = rng.gen_range(0..10_000);
                model.request(required);
                assert_eq!(model.capacity, previous.max(required));
                previous = model.capacity;
            }
        }
    }

    #[test]
    fn copy_alignment_rounds_up_to_four() {
        assert_eq!(align_copy_size(0), 0);
        assert_eq!(align_copy_size(1), 4);
        assert_eq!(align_copy_size(27), 28);
        assert_eq!(align_copy_size(28), 28);
    }
}
