// Light records as the kernels read them.
// Every record is padded to 16-byte rows

#[repr(C)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[derive(Clone, Copy, Default)]
#[derive(Debug, PartialEq)]
pub struct AreaLight {
    pub vertex0: [f32; 3],
    pub tri_idx: u32,
    pub vertex1: [f32; 3],
    pub inst_idx: u32,
    pub vertex2: [f32; 3],
    pub area: f32,
    pub centre: [f32; 3],
    pub energy: f32,
    pub normal: [f32; 3],
    _p0: u32,
    pub radiance: [f32; 3],
    _p1: u32,
}

impl AreaLight {
    pub fn new(
        vertices: [[f32; 3]; 3],
        radiance: [f32; 3],
        inst_idx: u32,
        tri_idx: u32,
    ) -> Self {
        use super::V3Ops as _;

        let [a, b, c] = vertices;
        let n = b.sub(a).cross(c.sub(a));
        let area = n.mag() * 0.5;

        Self {
            vertex0: a,
            tri_idx,
            vertex1: b,
            inst_idx,
            vertex2: c,
            area,
            centre: a.add(b).add(c).scale(1. / 3.),
            energy: (radiance[0] + radiance[1] + radiance[2]) * area,
            normal: n.normalize(),
            _p0: 0,
            radiance,
            _p1: 0,
        }
    }
}

#[repr(C)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[derive(Clone, Copy, Default)]
#[derive(Debug, PartialEq)]
pub struct PointLight {
    pub position: [f32; 3],
    pub energy: f32,
    pub radiance: [f32; 3],
    _p0: u32,
}

impl PointLight {
    pub fn new(position: [f32; 3], radiance: [f32; 3]) -> Self {
        Self {
            position,
            energy: radiance[0] + radiance[1] + radiance[2],
            radiance,
            _p0: 0,
        }
    }
}

#[repr(C)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[derive(Clone, Copy, Default)]
#[derive(Debug, PartialEq)]
pub struct SpotLight {
    pub position: [f32; 3],
    pub cos_inner: f32,
    pub radiance: [f32; 3],
    pub cos_outer: f32,
    pub direction: [f32; 3],
    pub energy: f32,
}

impl SpotLight {
    pub fn new(
        position: [f32; 3],
        direction: [f32; 3],
        radiance: [f32; 3],
        [inner, outer]: [f32; 2],
    ) -> Self {
        use super::V3Ops as _;

        Self {
            position,
            cos_inner: inner.cos(),
            radiance,
            cos_outer: outer.cos(),
            direction: direction.normalize(),
            energy: radiance[0] + radiance[1] + radiance[2],
        }
    }
}

#[repr(C)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[derive(Clone, Copy, Default)]
#[derive(Debug, PartialEq)]
pub struct DirectionalLight {
    pub direction: [f32; 3],
    pub energy: f32,
    pub radiance: [f32; 3],
    _p0: u32,
}

impl DirectionalLight {
    pub fn new(direction: [f32; 3], radiance: [f32; 3]) -> Self {
        use super::V3Ops as _;

        Self {
            direction: direction.normalize(),
            energy: radiance[0] + radiance[1] + radiance[2],
            radiance,
            _p0: 0,
        }
    }
}

// One SetLights call worth of lights
#[derive(Clone, Copy, Default, Debug)]
pub struct LightSet<'a> {
    pub area: &'a [AreaLight],
    pub point: &'a [PointLight],
    pub spot: &'a [SpotLight],
    pub directional: &'a [DirectionalLight],
}

impl<'a> LightSet<'a> {
    // Order matches the `light_counts` symbol
    pub fn counts(&self) -> [u32; 4] {
        [
            self.area.len() as u32,
            self.point.len() as u32,
            self.spot.len() as u32,
            self.directional.len() as u32,
        ]
    }
}
