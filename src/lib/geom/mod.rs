pub mod light;
pub mod v3;

pub use v3::V3Ops;

use crate::device::DevicePtr;

// Triangle record as the kernels read it.
// Positions are duplicated here so shading never touches the vertex array
#[repr(C)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[derive(Clone, Copy, Default)]
#[derive(Debug, PartialEq)]
pub struct CoreTri {
    pub vertex0: [f32; 3],
    pub material: u32,
    pub vertex1: [f32; 3],
    pub light_index: i32,
    pub vertex2: [f32; 3],
    pub area: f32,
    pub normal: [f32; 3],
    pub lod: f32,
    pub uv: [f32; 6],
    _p0: [u32; 2],
}

impl CoreTri {
    pub fn new(vertices: [[f32; 3]; 3], material: u32) -> Self {
        let [a, b, c] = vertices;

        let n = b.sub(a).cross(c.sub(a));

        Self {
            vertex0: a,
            material,
            vertex1: b,
            light_index: -1,
            vertex2: c,
            area: n.mag() * 0.5,
            normal: n.normalize(),
            lod: 0.,
            uv: [0., 0., 1., 0., 0., 1.],
            _p0: [0; 2],
        }
    }

    pub fn vertices(&self) -> [[f32; 3]; 3] {
        [self.vertex0, self.vertex1, self.vertex2]
    }
}

// The three texel classes each get their own packed atlas
#[derive(Clone, Copy)]
#[derive(Debug, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum TexelStorage {
    Argb32,
    Argb128,
    Nrm32,
}

impl TexelStorage {
    pub const ALL: [Self; 3] = [Self::Argb32, Self::Argb128, Self::Nrm32];
}

#[derive(Clone, Copy, Debug)]
pub enum Texels<'a> {
    Argb32(&'a [u32]),
    Argb128(&'a [[f32; 4]]),
    Nrm32(&'a [u32]),
}

// What the host renderer hands over per texture.
// The texel data is borrowed; the mirror never keeps it
#[derive(Clone, Copy, Debug)]
pub struct TextureDesc<'a> {
    pub width: u32,
    pub height: u32,
    pub texels: Texels<'a>,
}

impl<'a> TextureDesc<'a> {
    pub fn storage(&self) -> TexelStorage {
        match self.texels {
            Texels::Argb32(_) => TexelStorage::Argb32,
            Texels::Argb128(_) => TexelStorage::Argb128,
            Texels::Nrm32(_) => TexelStorage::Nrm32,
        }
    }

    pub fn pixel_count(&self) -> u32 {
        let len = match self.texels {
            Texels::Argb32(t) | Texels::Nrm32(t) => t.len(),
            Texels::Argb128(t) => t.len(),
        };

        len as u32
    }
}

// Descriptor as retained after upload: where the texture landed in its atlas
#[derive(Clone, Copy)]
#[derive(Debug, PartialEq, Eq)]
#[derive(serde::Serialize)]
pub struct TexEntry {
    pub storage: TexelStorage,
    pub width: u32,
    pub height: u32,
    pub first_pixel: u32,
    pub pixel_count: u32,
}

#[repr(C)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[derive(Clone, Copy, Default)]
#[derive(Debug, PartialEq)]
pub struct Material {
    pub diffuse: [f32; 3],
    pub flags: u32,
    pub emission: [f32; 3],
    pub roughness: f32,
    pub specular: [f32; 3],
    pub metallic: f32,
    pub texaddr0: u32,
    pub texaddr1: u32,
    pub texaddr2: u32,
    pub nmapaddr0: u32,
    pub nmapaddr1: u32,
    pub nmapaddr2: u32,
    pub smapaddr: u32,
    pub rmapaddr: u32,
    pub cmapaddr: u32,
    pub amapaddr: u32,
    _p0: [u32; 2],
}

impl Material {
    pub fn new(diffuse: [f32; 3]) -> Self {
        Self { diffuse, roughness: 1., ..Default::default() }
    }

    // Maps a MaterialEx texture slot onto the atlas offset it patches.
    // Slot 8 (second roughness map) has no counterpart
    pub fn texture_addr_mut(&mut self, slot: usize) -> Option<&mut u32> {
        let addr = match slot {
            0 => &mut self.texaddr0,
            1 => &mut self.texaddr1,
            2 => &mut self.texaddr2,
            3 => &mut self.nmapaddr0,
            4 => &mut self.nmapaddr1,
            5 => &mut self.nmapaddr2,
            6 => &mut self.smapaddr,
            7 => &mut self.rmapaddr,
            9 => &mut self.cmapaddr,
            10 => &mut self.amapaddr,
            _ => return None,
        };

        Some(addr)
    }
}

// Host-only companion of Material: texture indices per slot, -1 for none
#[derive(Clone, Copy)]
#[derive(Debug, PartialEq, Eq)]
pub struct MaterialEx {
    pub texture: [i32; MaterialEx::SLOTS],
}

impl MaterialEx {
    pub const SLOTS: usize = 11;
    pub const NONE: i32 = -1;
}

impl Default for MaterialEx {
    fn default() -> Self {
        Self { texture: [Self::NONE; Self::SLOTS] }
    }
}

// Per-instance record indexed by instance id on the device
#[repr(C)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[derive(Clone, Copy)]
#[derive(Debug, PartialEq)]
pub struct InstanceDesc {
    pub triangles: DevicePtr,
    pub inv_transform: [[f32; 4]; 4],
}

// The cross-pass channel between kernels and host.
// Layout is shared with the kernels and must not change
#[repr(C)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[derive(Clone, Copy, Default)]
#[derive(Debug, PartialEq)]
pub struct Counters {
    pub active_paths: u32,
    pub shadow_rays: u32,
    pub extension_rays: u32,
    pub total_extension_rays: u32,
    pub probed_instid: u32,
    pub probed_triid: u32,
    pub probed_dist: f32,
    _p0: u32,
}

impl Counters {
    // Written to the probe fields when the probe pixel hits nothing
    pub const NO_HIT: u32 = u32::MAX;
}
