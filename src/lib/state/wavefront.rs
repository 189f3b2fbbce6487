use crate::device::{Device, DeviceBuffer, Format, Interop};

const CONNECTIONS: Interop = Interop::new("connectData", Format::Float4);
const ACCUMULATOR: Interop = Interop::new("accumulator", Format::Float4);
const HITS: Interop = Interop::new("hitData", Format::Float4);
const PATH_STATES: Interop = Interop::new("pathStates", Format::Float4);

// The per-pixel buffers the wavefront passes stream through.
// Sized for `max_pixels` with some slack so small resizes reuse them
#[derive(Debug)]
pub struct WavefrontState<D: Device> {
    max_pixels: usize,
    spp: u32,
    // Up to three shadow connections per pixel-sample per bounce
    pub connections: DeviceBuffer<[f32; 4], D>,
    // Direct and indirect radiance per pixel
    pub accumulator: DeviceBuffer<[f32; 4], D>,
    pub hits: DeviceBuffer<[f32; 4], D>,
    pub path_states: DeviceBuffer<[f32; 4], D>,
}

impl<D: Device> WavefrontState<D> {
    // Roughly 6% slack
    pub fn capacity_for(pixels: usize) -> usize {
        pixels + (pixels >> 4)
    }

    pub fn new(device: &D, pixels: usize, spp: u32, max_path_length: u32) -> anyhow::Result<Self> {
        let max_pixels = Self::capacity_for(pixels);
        let samples = max_pixels * spp as usize;

        let state = Self {
            max_pixels,
            spp,
            connections: DeviceBuffer::interop(
                device,
                samples * 3 * max_path_length as usize,
                CONNECTIONS,
                None,
            )?,
            accumulator: DeviceBuffer::interop(device, max_pixels * 2, ACCUMULATOR, None)?,
            hits: DeviceBuffer::interop(device, samples, HITS, None)?,
            path_states: DeviceBuffer::interop(device, samples * 3, PATH_STATES, None)?,
        };

        log::info!("buffers resized for {} pixels @ {} samples", max_pixels, spp);

        Ok(state)
    }

    pub fn needs_realloc(&self, pixels: usize, spp: u32) -> bool {
        pixels > self.max_pixels || spp != self.spp
    }

    pub fn max_pixels(&self) -> usize { self.max_pixels }

    pub fn spp(&self) -> u32 { self.spp }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::host::HostDevice;

    #[test]
    fn buffers_are_sized_per_pixel_sample() {
        let device = HostDevice::new();

        let state = WavefrontState::new(&device, 160, 2, 3).unwrap();

        assert_eq!(state.max_pixels(), 170);
        assert_eq!(state.accumulator.len(), 340);
        assert_eq!(state.hits.len(), 340);
        assert_eq!(state.path_states.len(), 1020);
        assert_eq!(state.connections.len(), 3060);

        assert_eq!(device.interop("hitData"), Some(state.hits.dev_ptr()));
    }

    #[test]
    fn slack_absorbs_small_growth() {
        let device = HostDevice::new();

        let state = WavefrontState::new(&device, 100 * 100, 1, 3).unwrap();

        assert!(!state.needs_realloc(100 * 100, 1));
        assert!(!state.needs_realloc(10_625, 1));
        assert!(state.needs_realloc(10_626, 1));
        assert!(state.needs_realloc(50, 2));
    }
}
