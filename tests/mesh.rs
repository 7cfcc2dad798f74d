//! Meshlet upload into shared mesh buffers.

mod common;

use std::sync::Arc;

use arbor_gpu::{
    GpuContext, HeadlessDevice,
    mesh::{Mesh, MeshBuffers, MeshData, MeshletBuilder, SequentialMeshlets, VertexData},
};
use common::headless;

fn quad(offset: f32) -> (Vec<[f32; 3]>, Vec<[f32; 3]>, Vec<u32>) {
    let vertices = vec![
        [offset, 0.0, 0.0],
        [offset + 1.0, 0.0, 0.0],
        [offset, 0.0, 1.0],
        [offset + 1.0, 0.0, 1.0],
    ];
    let normals = vec![[0.0, 1.0, 0.0]; 4];
    (vertices, normals, vec![0, 1, 2, 2, 1, 3])
}

fn setup() -> (Arc<HeadlessDevice>, Arc<GpuContext>, MeshBuffers, Arc<dyn MeshletBuilder>) {
    let (device, context) = headless();
    let buffers = MeshBuffers::new(&context, 8).unwrap();
    (device, context, buffers, Arc::new(SequentialMeshlets::default()))
}

fn upload(context: &GpuContext, buffers: &MeshBuffers, builder: &Arc<dyn MeshletBuilder>, offset: f32) -> Mesh {
    let recorder = context.default_recorder();
    let (vertices, normals, indices) = quad(offset);
    let mut mesh = Mesh::new(buffers.clone(), builder.clone());
    mesh.set_vertices(recorder, vertices).unwrap();
    mesh.set_normals(recorder, normals).unwrap();
    mesh.set_indices(recorder, indices).unwrap();
    mesh
}

fn stored_descriptor(device: &HeadlessDevice, buffers: &MeshBuffers, mesh: &Mesh) -> MeshData {
    let descriptor = mesh.descriptor().unwrap();
    device.read_elements(&buffers.meshes, descriptor.start(), 1)[0]
}

#[test]
fn test_mesh_upload_writes_every_part() {
    let (device, context, buffers, builder) = setup();
    let mesh = upload(&context, &buffers, &builder, 0.0);
    context.end_frame().unwrap();

    assert!(mesh.is_uploaded());
    assert_eq!(mesh.meshlet_count(), 1);
    let data = mesh.mesh_data().unwrap();
    assert_eq!(stored_descriptor(&device, &buffers, &mesh), data);

    let (vertices, _, _) = quad(0.0);
    let stored: Vec<VertexData> = device.read_elements(&buffers.vertices, data.vert_offset as u64, 4);
    let positions: Vec<[f32; 3]> = stored.iter().map(|v| v.position).collect();
    assert_eq!(positions, vertices);
    assert!(stored.iter().all(|v| v.normal == [0.0, 1.0, 0.0]));

    let prims = device.read_elements(&buffers.primitives, data.prim_offset as u64, 2);
    assert_eq!(prims, vec![0x02_01_00, 0x03_01_02]);
}

#[test]
fn test_descriptor_waits_for_every_part() {
    let (_device, context, buffers, builder) = setup();
    let recorder = context.default_recorder();
    let (vertices, normals, indices) = quad(0.0);

    let mut mesh = Mesh::new(buffers.clone(), builder);
    mesh.set_vertices(recorder, vertices).unwrap();
    mesh.set_indices(recorder, indices).unwrap();
    assert!(!mesh.is_uploaded());
    assert_eq!(buffers.vertices.allocation_count(), 0);

    mesh.set_normals(recorder, normals).unwrap();
    assert!(mesh.is_uploaded());
    context.end_frame().unwrap();
}

#[test]
fn test_compaction_then_refresh_keeps_descriptors_valid() {
    let (device, context, buffers, builder) = setup();
    let recorder = context.default_recorder();

    let mut first = upload(&context, &buffers, &builder, 0.0);
    let second = upload(&context, &buffers, &builder, 5.0);
    context.end_frame().unwrap();
    let before = second.mesh_data().unwrap();

    first.clear();
    buffers.compact(recorder);
    second.refresh_descriptor(recorder).unwrap();
    context.end_frame().unwrap();

    let after = second.mesh_data().unwrap();
    assert_eq!(after.vert_offset, 0);
    assert_eq!(after.prim_offset, 0);
    assert_eq!(after.meshlet_offset, 0);
    assert_ne!(before, after);
    assert_eq!(second.descriptor().unwrap().start(), 0);
    assert_eq!(stored_descriptor(&device, &buffers, &second), after);

    let stored: Vec<VertexData> = device.read_elements(&buffers.vertices, 0, 4);
    assert_eq!(stored[0].position, [5.0, 0.0, 0.0]);
}

#[test]
fn test_resetting_vertices_refreshes_the_descriptor() {
    let (device, context, buffers, builder) = setup();
    let recorder = context.default_recorder();

    let mut mesh = upload(&context, &buffers, &builder, 0.0);
    let (vertices, _, _) = quad(2.0);
    mesh.set_vertices(recorder, vertices).unwrap();
    context.end_frame().unwrap();

    let data = mesh.mesh_data().unwrap();
    assert_eq!(stored_descriptor(&device, &buffers, &mesh), data);
    let stored: Vec<VertexData> = device.read_elements(&buffers.vertices, data.vert_offset as u64, 1);
    assert_eq!(stored[0].position, [2.0, 0.0, 0.0]);
    assert_eq!(buffers.vertices.allocation_count(), 1);
}

#[test]
fn test_clear_frees_every_range() {
    let (_device, context, buffers, builder) = setup();
    let mut mesh = upload(&context, &buffers, &builder, 0.0);

    mesh.clear();
    assert!(!mesh.is_uploaded());
    assert_eq!(buffers.vertices.allocation_count(), 0);
    assert_eq!(buffers.primitives.allocation_count(), 0);
    assert_eq!(buffers.meshlets.allocation_count(), 0);
    assert_eq!(buffers.meshes.allocation_count(), 0);

    // A cleared mesh accepts new geometry.
    let recorder = context.default_recorder();
    let (vertices, normals, indices) = quad(1.0);
    mesh.set_vertices(recorder, vertices).unwrap();
    mesh.set_normals(recorder, normals).unwrap();
    mesh.set_indices(recorder, indices).unwrap();
    assert!(mesh.is_uploaded());
    context.end_frame().unwrap();
}

#[test]
#[should_panic(expected = "can't be set twice")]
fn test_indices_set_twice_panics() {
    let (_device, context, buffers, builder) = setup();
    let mut mesh = upload(&context, &buffers, &builder, 0.0);
    mesh.set_indices(context.default_recorder(), vec![0, 1, 2]).unwrap();
}

#[test]
#[should_panic(expected = "must be set before indices")]
fn test_indices_before_vertices_panics() {
    let (_device, context, buffers, builder) = setup();
    let mut mesh = Mesh::new(buffers, builder);
    mesh.set_indices(context.default_recorder(), vec![0, 1, 2]).unwrap();
}

#[test]
#[should_panic(expected = "out of bounds")]
fn test_out_of_range_index_panics() {
    let (_device, context, buffers, builder) = setup();
    let recorder = context.default_recorder();
    let (vertices, _, _) = quad(0.0);
    let mut mesh = Mesh::new(buffers, builder);
    mesh.set_vertices(recorder, vertices).unwrap();
    mesh.set_indices(recorder, vec![0, 1, 4]).unwrap();
}

#[test]
#[should_panic(expected = "vertex/normal count must match")]
fn test_normal_count_mismatch_panics() {
    let (_device, context, buffers, builder) = setup();
    let recorder = context.default_recorder();
    let (vertices, _, _) = quad(0.0);
    let mut mesh = Mesh::new(buffers, builder);
    mesh.set_vertices(recorder, vertices).unwrap();
    mesh.set_normals(recorder, vec![[0.0, 1.0, 0.0]; 3]).unwrap();
}
