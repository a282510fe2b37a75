//! Fixed-size pool of dispatch lanes.
//!
//! The accelerator work for one request is spread round-robin over `P`
//! independent command streams so many small per-mesh launches can overlap
//! on the device. Each lane records into its own command encoder; `drain`
//! submits every used lane in one batch and blocks until the device is
//! idle. The round-robin assignment is an internal policy of the pool.

use crate::error::Error;

/// Lanes available to one session. The count is fixed at construction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LanePool {
    size: usize,
}

pub(crate) fn lane_index(dispatch: usize, pool_size: usize) -> usize {
    dispatch % pool_size
}

impl LanePool {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Starts a fresh set of lanes for one request.
    pub fn begin<'a>(&self, device: &'a wgpu::Device) -> LaneSet<'a> {
        let mut lanes = Vec::new();
        lanes.resize_with(self.size, || None);
        LaneSet { device, lanes }
    }
}

/// Per-request lane state: encoders are created lazily on first use so a
/// small batch doesn't pay for the whole pool.
pub(crate) struct LaneSet<'a> {
    device: &'a wgpu::Device,
    lanes: Vec<Option<wgpu::CommandEncoder>>,
}

impl LaneSet<'_> {
    /// The encoder for dispatch number `dispatch`, assigned round-robin.
    pub fn lane(&mut self, dispatch: usize) -> &mut wgpu::CommandEncoder {
        let index = lane_index(dispatch, self.lanes.len());
        let device = self.device;
        self.lanes[index].get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mesh_voxelizer.lane"),
            })
        })
    }

    /// Submits every used lane and blocks until all submitted work has
    /// finished: the pool-wide barrier between dispatch and readback.
    pub fn drain(self, queue: &wgpu::Queue) -> Result<(), Error> {
        let LaneSet { device, lanes } = self;
        let buffers: Vec<wgpu::CommandBuffer> = lanes
            .into_iter()
            .flatten()
            .map(wgpu::CommandEncoder::finish)
            .collect();
        if !buffers.is_empty() {
            queue.submit(buffers);
        }
        let result = device.poll(wgpu::Maintain::Wait);
        if !result.is_queue_empty() {
            return Err(Error::SyncFailed {
                stage: "lane pool drain",
                reason: "device queue did not drain".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_is_round_robin() {
        for dispatch in 0..200 {
            assert_eq!(lane_index(dispatch, 50), dispatch % 50);
        }
        assert_eq!(lane_index(0, 50), 0);
        assert_eq!(lane_index(50, 50), 0);
        assert_eq!(lane_index(51, 50), 1);
    }

    #[test]
    fn pool_size_is_at_least_one() {
        assert_eq!(LanePool::new(0).size(), 1);
        assert_eq!(LanePool::new(50).size(), 50);
    }
}
