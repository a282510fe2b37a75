use glam::Vec3;

use crate::error::Error;

/// Geometry of the output voxel grid for one request.
///
/// The grid is a flat array of `x*y*z` single-byte cells, ordered row-major:
/// cell `(x, y, z)` lives at `x + y * row_stride + z * slice_stride`.
#[derive(Debug, Clone)]
pub struct GridGeometry {
    /// Reciprocal of the voxel edge length in world units.
    pub inv_element_size: f32,
    /// World-space position of the grid's minimum corner.
    pub corner: Vec3,
    /// Cell counts along x, y, z.
    pub cells: [u32; 3],
}

impl GridGeometry {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.inv_element_size.is_finite() || self.inv_element_size <= 0.0 {
            return Err(Error::invalid_input(
                "inv_element_size must be finite and > 0",
            ));
        }
        if !self.corner.is_finite() {
            return Err(Error::invalid_input("grid corner must be finite"));
        }
        if self.cells.iter().any(|&c| c == 0) {
            return Err(Error::invalid_input("grid cell counts must be >= 1"));
        }
        Ok(())
    }

    pub fn num_voxels(&self) -> u64 {
        self.cells[0] as u64 * self.cells[1] as u64 * self.cells[2] as u64
    }

    pub fn row_stride(&self) -> u32 {
        self.cells[0]
    }

    pub fn slice_stride(&self) -> u32 {
        self.cells[0] * self.cells[1]
    }
}

/// One mesh supplied to a voxelization request.
///
/// Vertices are xyz triples, triangles are triples of vertex indices local to
/// this mesh. The kernel rebases indices with the per-mesh buffer offsets.
#[derive(Debug, Clone, Copy)]
pub struct MeshData<'a> {
    pub vertices: &'a [f32],
    pub triangles: &'a [u32],
}

impl MeshData<'_> {
    pub fn vertex_count(&self) -> u32 {
        (self.vertices.len() / 3) as u32
    }

    pub fn triangle_count(&self) -> u32 {
        (self.triangles.len() / 3) as u32
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.vertices.len() % 3 != 0 {
            return Err(Error::invalid_input(
                "vertex array length must be a multiple of 3",
            ));
        }
        if self.triangles.len() % 3 != 0 {
            return Err(Error::invalid_input(
                "triangle index array length must be a multiple of 3",
            ));
        }
        if self.vertices.iter().any(|v| !v.is_finite()) {
            return Err(Error::invalid_input("mesh contains non-finite vertex"));
        }
        let num_vertices = self.vertex_count();
        if self.triangles.iter().any(|&i| i >= num_vertices) {
            return Err(Error::invalid_input("triangle index out of range"));
        }
        Ok(())
    }
}

/// Base offsets of one mesh inside the shared device buffers, in elements
/// (vertices / triangles, not bytes or floats).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshSpan {
    pub vertex_base: u32,
    pub triangle_base: u32,
}

/// Prefix-sum layout of a mesh batch over the shared vertex/triangle buffers.
///
/// Computed fresh every request and never persisted: mesh `k`'s bases are the
/// sums of the counts of meshes `0..k`.
#[derive(Debug, Clone, Default)]
pub struct MeshLayout {
    pub spans: Vec<MeshSpan>,
    pub total_vertices: u64,
    pub total_triangles: u64,
}

impl MeshLayout {
    pub fn new(meshes: &[MeshData<'_>]) -> Result<Self, Error> {
        let mut spans = Vec::with_capacity(meshes.len());
        let mut total_vertices = 0u64;
        let mut total_triangles = 0u64;
        for mesh in meshes {
            mesh.validate()?;
            let vertex_base = u32::try_from(total_vertices)
                .map_err(|_| Error::invalid_input("vertex total exceeds u32 range"))?;
            let triangle_base = u32::try_from(total_triangles)
                .map_err(|_| Error::invalid_input("triangle total exceeds u32 range"))?;
            spans.push(MeshSpan {
                vertex_base,
                triangle_base,
            });
            total_vertices += mesh.vertex_count() as u64;
            total_triangles += mesh.triangle_count() as u64;
        }
        Ok(Self {
            spans,
            total_vertices,
            total_triangles,
        })
    }
}

/// Smallest multiple of `local` that is `>= count`.
///
/// The padded tail work-items index past the triangle count and must be
/// no-ops in the kernel.
pub(crate) fn padded_global_size(count: u32, local: u32) -> u32 {
    count.div_ceil(local) * local
}

pub(crate) fn workgroup_count(count: u32, local: u32) -> u32 {
    padded_global_size(count, local) / local
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_mesh() -> (Vec<f32>, Vec<u32>) {
        let vertices = vec![
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0,
        ];
        let triangles = vec![0, 1, 2, 0, 2, 3];
        (vertices, triangles)
    }

    #[test]
    fn prefix_offsets_accumulate_in_call_order() {
        let (v, t) = cube_mesh();
        let meshes = [
            MeshData {
                vertices: &v,
                triangles: &t,
            },
            MeshData {
                vertices: &v,
                triangles: &t[..3],
            },
            MeshData {
                vertices: &v[..9],
                triangles: &t[..3],
            },
        ];
        let layout = MeshLayout::new(&meshes).unwrap();
        assert_eq!(
            layout.spans,
            vec![
                MeshSpan {
                    vertex_base: 0,
                    triangle_base: 0
                },
                MeshSpan {
                    vertex_base: 4,
                    triangle_base: 2
                },
                MeshSpan {
                    vertex_base: 8,
                    triangle_base: 3
                },
            ]
        );
        assert_eq!(layout.total_vertices, 11);
        assert_eq!(layout.total_triangles, 4);
    }

    #[test]
    fn empty_batch_has_zero_totals() {
        let layout = MeshLayout::new(&[]).unwrap();
        assert!(layout.spans.is_empty());
        assert_eq!(layout.total_vertices, 0);
        assert_eq!(layout.total_triangles, 0);
    }

    #[test]
    fn rejects_out_of_range_triangle_index() {
        let vertices = [0.0f32; 9];
        let triangles = [0u32, 1, 3];
        let mesh = MeshData {
            vertices: &vertices,
            triangles: &triangles,
        };
        assert!(mesh.validate().is_err());
    }

    #[test]
    fn work_size_rounds_up_to_local_multiple() {
        assert_eq!(padded_global_size(1, 64), 64);
        assert_eq!(padded_global_size(64, 64), 64);
        assert_eq!(padded_global_size(65, 64), 128);
        assert_eq!(padded_global_size(0, 64), 0);
        for t in [1u32, 7, 63, 64, 65, 1000] {
            let g = padded_global_size(t, 64);
            assert!(g >= t);
            assert_eq!(g % 64, 0);
        }
        assert_eq!(workgroup_count(65, 64), 2);
    }

    #[test]
    fn grid_strides_follow_row_major_layout() {
        let grid = GridGeometry {
            inv_element_size: 2.0,
            corner: Vec3::ZERO,
            cells: [3, 4, 5],
        };
        grid.validate().unwrap();
        assert_eq!(grid.num_voxels(), 60);
        assert_eq!(grid.row_stride(), 3);
        assert_eq!(grid.slice_stride(), 12);
    }

    #[test]
    fn degenerate_grid_is_rejected() {
        let grid = GridGeometry {
            inv_element_size: 1.0,
            corner: Vec3::ZERO,
            cells: [3, 0, 3],
        };
        assert!(grid.validate().is_err());
    }
}
