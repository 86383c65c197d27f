//! CPU-side geometry for the content plane.
//!
//! The renderer uploads these into device-local vertex/index buffers once at
//! scene setup.

use vulkano::buffer::BufferContents;
use vulkano::pipeline::graphics::vertex_input::Vertex;

/// - `pos`: model-space position
/// - `uv`: 0..1 texture coordinate, v = 0 at the top edge
#[derive(BufferContents, Vertex, Debug, Clone, Copy, Default, PartialEq)]
#[repr(C)]
pub struct CpuVertex {
    #[format(R32G32B32_SFLOAT)]
    pub pos: [f32; 3],
    #[format(R32G32_SFLOAT)]
    pub uv: [f32; 2],
}

/// Indexed triangle list.
#[derive(Debug, Clone)]
pub struct CpuMesh {
    pub vertices: Vec<CpuVertex>,
    pub indices_u32: Vec<u32>,
}

impl CpuMesh {
    pub fn new(vertices: Vec<CpuVertex>, indices_u32: Vec<u32>) -> Self {
        Self {
            vertices,
            indices_u32,
        }
    }

    pub fn index_count(&self) -> u32 {
        self.indices_u32.len() as u32
    }
}

pub struct MeshFactory;

impl MeshFactory {
    /// Unit square in the XY plane, centered at the origin, facing +Z.
    ///
    /// Two counter-clockwise triangles seen from +Z. Scale and place it with
    /// the content plane's model matrix.
    pub fn content_plane() -> CpuMesh {
        let vertices = vec![
            CpuVertex {
                pos: [-0.5, -0.5, 0.0],
                uv: [0.0, 1.0],
            },
            CpuVertex {
                pos: [0.5, -0.5, 0.0],
                uv: [1.0, 1.0],
            },
            CpuVertex {
                pos: [0.5, 0.5, 0.0],
                uv: [1.0, 0.0],
            },
            CpuVertex {
                pos: [-0.5, 0.5, 0.0],
                uv: [0.0, 0.0],
            },
        ];

        CpuMesh::new(vertices, vec![0, 1, 2, 0, 2, 3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_plane_is_two_triangles() {
        let mesh = MeshFactory::content_plane();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.index_count(), 6);
        assert!(mesh.indices_u32.iter().all(|&i| i < mesh.vertices.len() as u32));
    }

    #[test]
    fn content_plane_faces_positive_z() {
        let mesh = MeshFactory::content_plane();
        for tri in mesh.indices_u32.chunks(3) {
            let a = mesh.vertices[tri[0] as usize].pos;
            let b = mesh.vertices[tri[1] as usize].pos;
            let c = mesh.vertices[tri[2] as usize].pos;
            let ab = [b[0] - a[0], b[1] - a[1]];
            let ac = [c[0] - a[0], c[1] - a[1]];
            let normal_z = ab[0] * ac[1] - ab[1] * ac[0];
            assert!(normal_z > 0.0);
        }
    }

    #[test]
    fn content_plane_is_unit_sized_and_centered() {
        let mesh = MeshFactory::content_plane();
        let (min_x, max_x) = mesh
            .vertices
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.pos[0]), hi.max(v.pos[0])));
        assert_eq!((min_x, max_x), (-0.5, 0.5));
        assert!(mesh.vertices.iter().all(|v| v.pos[2] == 0.0));

        // Top edge samples the first texel row.
        let top_left = mesh.vertices.iter().find(|v| v.pos == [-0.5, 0.5, 0.0]).unwrap();
        assert_eq!(top_left.uv, [0.0, 0.0]);
    }
}
