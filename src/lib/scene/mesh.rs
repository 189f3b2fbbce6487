use crate::backend;
use crate::device::{Device, DeviceBuffer, Placement};
use crate::geom;

use super::accel::Acceleration;

#[derive(Debug)]
pub struct Mesh<D: Device> {
    pub vertices: DeviceBuffer<[f32; 4], D>,
    pub triangles: DeviceBuffer<geom::CoreTri, D>,
    pub alpha_flags: Vec<u32>,
    pub accel: Acceleration,
}

impl<D: Device> Mesh<D> {
    pub fn new(
        device: &D,
        vertices: &[[f32; 4]],
        triangles: &[geom::CoreTri],
        alpha_flags: &[u32],
    ) -> anyhow::Result<Self> {
        Ok(Self {
            vertices: DeviceBuffer::from_slice(device, "meshVertices", Placement::Device, vertices)?,
            triangles: DeviceBuffer::from_slice(device, "meshTriangles", Placement::Device, triangles)?,
            alpha_flags: alpha_flags.to_vec(),
            accel: Acceleration::default(),
        })
    }

    // Same-sized data is written in place so the triangle address
    // published in instance descriptors stays valid
    pub fn update(
        &mut self,
        device: &D,
        vertices: &[[f32; 4]],
        triangles: &[geom::CoreTri],
        alpha_flags: &[u32],
    ) -> anyhow::Result<()> {
        if self.vertices.len() == vertices.len() {
            self.vertices.upload(vertices)?;
        } else {
            self.vertices = DeviceBuffer::from_slice(device, "meshVertices", Placement::Device, vertices)?;
        }

        if self.triangles.len() == triangles.len() {
            self.triangles.upload(triangles)?;
        } else {
            self.triangles = DeviceBuffer::from_slice(device, "meshTriangles", Placement::Device, triangles)?;
        }

        self.alpha_flags.clear();
        self.alpha_flags.extend_from_slice(alpha_flags);

        self.accel.mark_dirty();

        Ok(())
    }

    pub fn geometry_input(&self) -> backend::GeometryInput<'_> {
        backend::GeometryInput {
            vertices: self.vertices.dev_ptr(),
            vertex_count: self.vertices.len() as u32,
            triangles: self.triangles.dev_ptr(),
            triangle_count: self.triangles.len() as u32,
            alpha_flags: &self.alpha_flags,
        }
    }
}
