use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use bytemuck::{Pod, Zeroable};

use crate::{
    buffer::{BufferAllocation, BufferSpec, GraphicsBuffer},
    command::CommandRecorder,
    context::GpuContext,
};

/// Meshlet-remapped vertex as stored on the GPU.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, PartialEq, Debug, Default)]
pub struct VertexData {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

/// Offsets are relative to the owning mesh's vertex and primitive ranges.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, PartialEq, Eq, Debug, Default)]
pub struct Meshlet {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub triangle_offset: u32,
    pub triangle_count: u32,
}

/// Per-mesh descriptor read by the mesh shader.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable, PartialEq, Eq, Debug, Default)]
pub struct MeshData {
    pub meshlet_count: u32,
    pub meshlet_offset: u32,
    pub prim_offset: u32,
    pub vert_offset: u32,
}

/// Output of meshlet generation.
#[derive(Clone, Default, Debug)]
pub struct MeshletData {
    /// Source vertex index for every meshlet-local vertex slot.
    pub vertex_map: Vec<u32>,
    /// One triangle per entry: three meshlet-local indices packed in the low 24 bits.
    pub primitives: Vec<u32>,
    pub meshlets: Vec<Meshlet>,
}

pub trait MeshletBuilder: Send + Sync {
    fn build(&self, indices: &[u32], vertex_count: usize) -> MeshletData;
}

/// Greedy builder that fills meshlets in index order.
#[derive(Copy, Clone, Debug)]
pub struct SequentialMeshlets {
    pub max_vertices: usize,
    pub max_triangles: usize,
}

impl Default for SequentialMeshlets {
    fn default() -> Self {
        Self {
            max_vertices: 64,
            max_triangles: 124,
        }
    }
}

impl MeshletBuilder for SequentialMeshlets {
    fn build(&self, indices: &[u32], _vertex_count: usize) -> MeshletData {
        let max_vertices = self.max_vertices.clamp(3, 256);
        let max_triangles = self.max_triangles.max(1);

        let mut data = MeshletData::default();
        let mut current = Meshlet::default();
        let mut local: HashMap<u32, u32> = HashMap::new();

        for triangle in indices.chunks_exact(3) {
            let new_vertices = triangle
                .iter()
                .enumerate()
                .filter(|&(i, &v)| !local.contains_key(&v) && !triangle[..i].contains(&v))
                .count();
            if local.len() + new_vertices > max_vertices
                || current.triangle_count as usize >= max_triangles
            {
                data.meshlets.push(current);
                current = Meshlet {
                    vertex_offset: data.vertex_map.len() as u32,
                    triangle_offset: data.primitives.len() as u32,
                    ..Default::default()
                };
                local.clear();
            }

            let mut packed = 0u32;
            for (corner, vertex) in triangle.iter().enumerate() {
                let next = local.len() as u32;
                let slot = *local.entry(*vertex).or_insert_with(|| {
                    data.vertex_map.push(*vertex);
                    next
                });
                packed |= slot << (corner * 8);
            }
            data.primitives.push(packed);
            current.vertex_count = local.len() as u32;
            current.triangle_count += 1;
        }

        if current.triangle_count > 0 {
            data.meshlets.push(current);
        }
        data
    }
}

/// The shared buffers every mesh sub-allocates from.
#[derive(Clone, Debug)]
pub struct MeshBuffers {
    pub vertices: GraphicsBuffer<VertexData>,
    pub primitives: GraphicsBuffer<u32>,
    pub meshlets: GraphicsBuffer<Meshlet>,
    pub meshes: GraphicsBuffer<MeshData>,
}

impl MeshBuffers {
    pub fn new(context: &Arc<GpuContext>, initial_capacity: u64) -> anyhow::Result<Self> {
        Ok(Self {
            vertices: context
                .create_buffer(BufferSpec::new(initial_capacity).debug_name("mesh vertices"))
                .context("failed to create vertex buffer")?,
            primitives: context
                .create_buffer(BufferSpec::new(initial_capacity).debug_name("mesh primitives"))
                .context("failed to create primitive buffer")?,
            meshlets: context
                .create_buffer(BufferSpec::new(initial_capacity).debug_name("meshlets"))
                .context("failed to create meshlet buffer")?,
            meshes: context
                .create_buffer(BufferSpec::new(initial_capacity).debug_name("mesh descriptors"))
                .context("failed to create mesh descriptor buffer")?,
        })
    }

    /// Compacts all four buffers on `recorder`. Descriptors of live meshes must
    /// be refreshed afterwards.
    pub fn compact(&self, recorder: &CommandRecorder) {
        self.vertices.compact_with(recorder);
        self.primitives.compact_with(recorder);
        self.meshlets.compact_with(recorder);
        self.meshes.compact_with(recorder);
    }
}

/// Geometry uploaded as meshlets into [`MeshBuffers`].
///
/// Vertices (and normals) must be set before indices; the descriptor is
/// allocated once vertices, primitives and meshlets all exist.
pub struct Mesh {
    buffers: MeshBuffers,
    builder: Arc<dyn MeshletBuilder>,

    indices: Option<Vec<u32>>,
    vertices: Option<Vec<[f32; 3]>>,
    normals: Option<Vec<[f32; 3]>>,
    vertex_map: Option<Vec<u32>>,

    vert: Option<BufferAllocation<VertexData>>,
    prim: Option<BufferAllocation<u32>>,
    meshlet: Option<BufferAllocation<Meshlet>>,
    descriptor: Option<BufferAllocation<MeshData>>,
}

impl Mesh {
    pub fn new(buffers: MeshBuffers, builder: Arc<dyn MeshletBuilder>) -> Self {
        Self {
            buffers,
            builder,
            indices: None,
            vertices: None,
            normals: None,
            vertex_map: None,
            vert: None,
            prim: None,
            meshlet: None,
            descriptor: None,
        }
    }

    pub fn indices(&self) -> Option<&[u32]> {
        self.indices.as_deref()
    }

    pub fn vertices(&self) -> Option<&[[f32; 3]]> {
        self.vertices.as_deref()
    }

    pub fn normals(&self) -> Option<&[[f32; 3]]> {
        self.normals.as_deref()
    }

    pub fn meshlet_count(&self) -> u64 {
        self.meshlet.as_ref().map_or(0, |m| m.count())
    }

    pub fn is_uploaded(&self) -> bool {
        self.descriptor.is_some()
    }

    /// Allocation holding this mesh's [`MeshData`], once uploaded.
    pub fn descriptor(&self) -> Option<&BufferAllocation<MeshData>> {
        self.descriptor.as_ref()
    }

    pub fn set_vertices(&mut self, recorder: &CommandRecorder, vertices: Vec<[f32; 3]>) -> anyhow::Result<()> {
        assert!(
            self.normals.as_ref().is_none_or(|n| n.len() == vertices.len()),
            "vertex/normal count must match"
        );
        self.vertices = Some(vertices);
        self.upload_vertices(recorder)?;
        self.try_upload_descriptor(recorder)
    }

    pub fn set_normals(&mut self, recorder: &CommandRecorder, normals: Vec<[f32; 3]>) -> anyhow::Result<()> {
        assert!(
            self.vertices.as_ref().is_none_or(|v| v.len() == normals.len()),
            "vertex/normal count must match"
        );
        self.normals = Some(normals);
        self.upload_vertices(recorder)?;
        self.try_upload_descriptor(recorder)
    }

    /// Builds meshlets from `indices` and uploads primitives and meshlets.
    pub fn set_indices(&mut self, recorder: &CommandRecorder, indices: Vec<u32>) -> anyhow::Result<()> {
        assert!(
            self.indices.is_none(),
            "mesh indices can't be set twice between clears"
        );
        let vertex_count = self
            .vertices
            .as_ref()
            .map(Vec::len)
            .unwrap_or_else(|| panic!("mesh vertices must be set before indices"));
        assert!(
            indices.iter().all(|&i| (i as usize) < vertex_count),
            "mesh indices are out of bounds"
        );

        let data = self.builder.build(&indices, vertex_count);
        log::trace!(
            "mesh: {} triangles in {} meshlets",
            indices.len() / 3,
            data.meshlets.len()
        );
        self.indices = Some(indices);
        self.vertex_map = Some(data.vertex_map);
        self.upload_vertices(recorder)?;

        let prim = self
            .buffers
            .primitives
            .allocate_with(recorder, data.primitives.len() as u64)?;
        recorder.upload_allocation(&prim, &data.primitives)?;
        self.prim = Some(prim);

        let meshlet = self
            .buffers
            .meshlets
            .allocate_with(recorder, data.meshlets.len() as u64)?;
        recorder.upload_allocation(&meshlet, &data.meshlets)?;
        self.meshlet = Some(meshlet);

        self.try_upload_descriptor(recorder)
    }

    /// Drops all geometry and frees every range this mesh holds.
    pub fn clear(&mut self) {
        self.indices = None;
        self.vertices = None;
        self.normals = None;
        self.vertex_map = None;
        self.vert = None;
        self.prim = None;
        self.meshlet = None;
        self.descriptor = None;
    }

    /// Current descriptor contents, from the live allocation offsets.
    pub fn mesh_data(&self) -> Option<MeshData> {
        let (vert, prim, meshlet) = (self.vert.as_ref()?, self.prim.as_ref()?, self.meshlet.as_ref()?);
        Some(MeshData {
            meshlet_count: meshlet.count() as u32,
            meshlet_offset: meshlet.start() as u32,
            prim_offset: prim.start() as u32,
            vert_offset: vert.start() as u32,
        })
    }

    /// Rewrites the descriptor; needed after the mesh buffers were compacted.
    pub fn refresh_descriptor(&self, recorder: &CommandRecorder) -> anyhow::Result<()> {
        match (&self.descriptor, self.mesh_data()) {
            (Some(descriptor), Some(data)) => recorder.upload_allocation(descriptor, &[data]),
            _ => Ok(()),
        }
    }

    fn upload_vertices(&mut self, recorder: &CommandRecorder) -> anyhow::Result<()> {
        let (Some(map), Some(vertices), Some(normals)) = (&self.vertex_map, &self.vertices, &self.normals) else {
            return Ok(());
        };
        let remapped: Vec<VertexData> = map
            .iter()
            .map(|&i| VertexData {
                position: vertices[i as usize],
                normal: normals[i as usize],
            })
            .collect();

        let vert = self
            .buffers
            .vertices
            .allocate_with(recorder, remapped.len() as u64)?;
        recorder.upload_allocation(&vert, &remapped)?;
        self.vert = Some(vert);

        if self.descriptor.is_some() {
            self.refresh_descriptor(recorder)?;
        }
        Ok(())
    }

    fn try_upload_descriptor(&mut self, recorder: &CommandRecorder) -> anyhow::Result<()> {
        if self.descriptor.is_some() {
            return Ok(());
        }
        let Some(data) = self.mesh_data() else {
            return Ok(());
        };
        let descriptor = self.buffers.meshes.allocate_with(recorder, 1)?;
        recorder.upload_allocation(&descriptor, &[data])?;
        self.descriptor = Some(descriptor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unpack(packed: u32) -> [u32; 3] {
        [packed & 0xff, (packed >> 8) & 0xff, (packed >> 16) & 0xff]
    }

    #[test]
    fn single_quad_is_one_meshlet() {
        let data = SequentialMeshlets::default().build(&[0, 1, 2, 2, 1, 3], 4);

        assert_eq!(data.meshlets.len(), 1);
        assert_eq!(data.meshlets[0].vertex_count, 4);
        assert_eq!(data.meshlets[0].triangle_count, 2);
        assert_eq!(data.vertex_map, vec![0, 1, 2, 3]);
        assert_eq!(unpack(data.primitives[1]), [2, 1, 3]);
    }

    #[test]
    fn splits_on_vertex_limit() {
        let builder = SequentialMeshlets {
            max_vertices: 4,
            max_triangles: 16,
        };
        // Two disjoint triangles need six vertices.
        let data = builder.build(&[0, 1, 2, 3, 4, 5], 6);

        assert_eq!(data.meshlets.len(), 2);
        assert_eq!(data.meshlets[1].vertex_offset, 3);
        assert_eq!(data.meshlets[1].triangle_offset, 1);
        assert_eq!(unpack(data.primitives[1]), [0, 1, 2]);
    }

    #[test]
    fn remaps_every_corner() {
        let indices = [0, 1, 2, 0, 2, 3, 0, 3, 4, 4, 3, 5];
        let data = SequentialMeshlets {
            max_vertices: 4,
            max_triangles: 2,
        }
        .build(&indices, 6);

        for meshlet in &data.meshlets {
            let prims = &data.primitives[meshlet.triangle_offset as usize..][..meshlet.triangle_count as usize];
            let verts = &data.vertex_map[meshlet.vertex_offset as usize..][..meshlet.vertex_count as usize];
            for (t, packed) in prims.iter().enumerate() {
                let global = (meshlet.triangle_offset as usize + t) * 3;
                let corners = unpack(*packed).map(|local| verts[local as usize]);
                assert_eq!(corners, [indices[global], indices[global + 1], indices[global + 2]]);
            }
        }
    }

    #[test]
    fn empty_indices_build_nothing() {
        let data = SequentialMeshlets::default().build(&[], 0);
        assert!(data.meshlets.is_empty() && data.primitives.is_empty());
    }
}
