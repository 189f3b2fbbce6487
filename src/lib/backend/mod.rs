use crate::device::{Device, DevicePtr};
use crate::device::target::BoundSurface;
use crate::shaders;

// Selects what a traversal launch does
#[repr(u32)]
#[derive(Clone, Copy, Default)]
#[derive(Debug, PartialEq, Eq)]
pub enum Phase {
    // Spawn camera rays and find their first hit
    #[default]
    Generate = 0,
    // Trace the bounced paths written by the previous shade
    Extend = 1,
    // Trace the queued shadow connections
    Connect = 2,
}

// Everything a traversal launch reads besides the interop buffers
#[derive(Clone, Copy, Default)]
#[derive(Debug, PartialEq)]
pub struct LaunchParams {
    pub scrsize: [u32; 3],
    pub pos_lens_size: [f32; 4],
    pub right: [f32; 3],
    pub up: [f32; 3],
    pub p1: [f32; 3],
    pub pass: u32,
    pub phase: Phase,
    pub geometry_epsilon: f32,
}

// Device addresses and scalars the shading kernels read.
// Published as a whole so every kernel observes the same snapshot
#[derive(Clone, Default)]
#[derive(Debug, PartialEq)]
pub struct KernelSymbols {
    pub instance_descriptors: DevicePtr,
    pub materials: DevicePtr,
    pub area_lights: DevicePtr,
    pub point_lights: DevicePtr,
    pub spot_lights: DevicePtr,
    pub directional_lights: DevicePtr,
    // area, point, spot, directional
    pub light_counts: [u32; 4],
    pub argb32_pixels: DevicePtr,
    pub argb128_pixels: DevicePtr,
    pub nrm32_pixels: DevicePtr,
    pub sky_pixels: DevicePtr,
    pub sky_size: [u32; 2],
    pub counters: DevicePtr,
    pub geometry_epsilon: f32,
    pub clamp_value: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct GeometryInput<'a> {
    pub vertices: DevicePtr,
    pub vertex_count: u32,
    pub triangles: DevicePtr,
    pub triangle_count: u32,
    pub alpha_flags: &'a [u32],
}

// One child of the top-level structure, in instance-index order
#[derive(Clone, Copy)]
#[derive(Debug, PartialEq)]
pub struct TopLevelChild {
    pub instance: u32,
    pub mesh: u32,
    pub transform: [[f32; 4]; 4],
    pub inv_transform: [[f32; 4]; 4],
}

// Probe pixel index when the probe lies off the image
pub const NO_PROBE: i32 = -1;

#[derive(Clone, Copy)]
#[derive(Debug, PartialEq)]
pub struct ShadeArgs {
    pub path_count: u32,
    pub accumulator: DevicePtr,
    pub stride: u32,
    pub path_states: DevicePtr,
    pub hits: DevicePtr,
    pub connections: DevicePtr,
    pub r0: u32,
    pub blue_noise: DevicePtr,
    pub pass: u32,
    pub probe_pixel: i32,
    pub path_length: u32,
    pub width: u32,
    pub height: u32,
    pub spread_angle: f32,
    pub p1: [f32; 3],
    pub p2: [f32; 3],
    pub p3: [f32; 3],
    pub pos: [f32; 3],
}

#[derive(Clone, Copy)]
#[derive(Debug, PartialEq)]
pub struct FinalizeArgs {
    pub accumulator: DevicePtr,
    pub width: u32,
    pub height: u32,
    pub spp: u32,
    pub brightness: f32,
    pub contrast: f32,
}

// The ray-tracing backend and the shading kernels, as one capability.
// Every call is ordered on the device's default stream
pub trait Backend {
    type Device: Device;

    fn device(&self) -> &Self::Device;

    fn load_kernels(&mut self, ir: &shaders::KernelIr) -> anyhow::Result<()>;

    // Bottom-level structure for one mesh
    fn build_geometry(&mut self, mesh: usize, input: &GeometryInput<'_>) -> anyhow::Result<()>;

    // Top-level structure over all instances
    fn build_top_level(&mut self, children: &[TopLevelChild]) -> anyhow::Result<()>;

    fn launch(&mut self, params: &LaunchParams, count: u32) -> anyhow::Result<()>;

    fn publish(&mut self, symbols: &KernelSymbols) -> anyhow::Result<()>;

    fn init_counters_for_extend(&mut self, path_count: u32) -> anyhow::Result<()>;

    fn init_counters_subsequent(&mut self) -> anyhow::Result<()>;

    fn shade(&mut self, args: &ShadeArgs) -> anyhow::Result<()>;

    fn finalize(
        &mut self,
        args: &FinalizeArgs,
        surface: &BoundSurface<'_, Self::Device>,
    ) -> anyhow::Result<()>;

    fn shutdown(&mut self) {}
}
