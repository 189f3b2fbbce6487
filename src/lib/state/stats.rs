use crate::device::DeviceInfo;

// What the driver reports back to the host renderer after each frame.
// Times are in seconds
#[derive(Clone, Default)]
#[derive(Debug, PartialEq)]
#[derive(serde::Serialize)]
pub struct CoreStats {
    pub device_name: String,
    pub compute_units: u32,
    pub cc_major: u32,
    pub cc_minor: u32,
    pub vram_mb: u64,

    pub argb32_texel_count: u32,
    pub argb128_texel_count: u32,
    pub nrm32_texel_count: u32,

    pub primary_ray_count: u32,
    pub bounce1_ray_count: u32,
    pub deep_ray_count: u32,
    pub total_extension_rays: u32,
    pub total_shadow_rays: u32,
    pub total_rays: u32,

    pub trace_time0: f32,
    pub trace_time1: f32,
    pub trace_time_x: f32,
    pub shade_time: f32,
    pub shadow_trace_time: f32,
    pub render_time: f32,

    pub samples_taken: u32,

    pub probed_instid: u32,
    pub probed_triid: u32,
    pub probed_dist: f32,
}

impl CoreStats {
    pub fn set_device(&mut self, info: &DeviceInfo) {
        let DeviceInfo { name, compute_units, capability, vram_mb } = info;

        self.device_name = name.clone();
        self.compute_units = *compute_units;
        (self.cc_major, self.cc_minor) = *capability;
        self.vram_mb = *vram_mb;
    }

    pub fn set_texel_counts(&mut self, [argb32, argb128, nrm32]: [u32; 3]) {
        self.argb32_texel_count = argb32;
        self.argb128_texel_count = argb128;
        self.nrm32_texel_count = nrm32;
    }
}
