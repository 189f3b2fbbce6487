use crate::device::{Device, DeviceBuffer, DevicePtr, Placement};
use crate::geom::{TexEntry, TexelStorage, TextureDesc, Texels};

// Device buffers are never handed out empty
pub const MIN_ATLAS_TEXELS: usize = 16;

// One packed atlas per texel class, plus where every texture landed
#[derive(Debug)]
pub struct Atlases<D: Device> {
    argb32: DeviceBuffer<u32, D>,
    argb128: DeviceBuffer<[f32; 4], D>,
    nrm32: DeviceBuffer<u32, D>,
    entries: Vec<TexEntry>,
    layout: u64,
}

impl<D: Device> Atlases<D> {
    pub fn new(device: &D) -> anyhow::Result<Self> {
        Ok(Self {
            argb32: DeviceBuffer::new(device, "argb32Pixels", MIN_ATLAS_TEXELS, Placement::Device)?,
            argb128: DeviceBuffer::new(device, "argb128Pixels", MIN_ATLAS_TEXELS, Placement::Device)?,
            nrm32: DeviceBuffer::new(device, "nrm32Pixels", MIN_ATLAS_TEXELS, Placement::Device)?,
            entries: Vec::new(),
            layout: 0,
        })
    }

    // Replaces every texture. Classes are synced one after another so only
    // a single temporary host atlas exists at a time
    pub fn set(&mut self, device: &D, descs: &[TextureDesc<'_>]) -> anyhow::Result<()> {
        let mut next = [0u32; 3];

        self.entries = descs.iter().map(|desc| {
            let storage = desc.storage();
            let class = TexelStorage::ALL.iter().position(|&s| s == storage).unwrap_or(0);

            let first_pixel = next[class];
            next[class] += desc.pixel_count();

            TexEntry {
                storage,
                width: desc.width,
                height: desc.height,
                first_pixel,
                pixel_count: desc.pixel_count(),
            }
        }).collect();

        for storage in TexelStorage::ALL {
            match storage {
                TexelStorage::Argb32 => {
                    let texels = gather(descs, |t| match t {
                        Texels::Argb32(t) => Some(t),
                        _ => None,
                    });

                    self.argb32 = DeviceBuffer::from_slice(device, "argb32Pixels", Placement::Device, &texels)?;
                },
                TexelStorage::Argb128 => {
                    let texels = gather(descs, |t| match t {
                        Texels::Argb128(t) => Some(t),
                        _ => None,
                    });

                    self.argb128 = DeviceBuffer::from_slice(device, "argb128Pixels", Placement::Device, &texels)?;
                },
                TexelStorage::Nrm32 => {
                    let texels = gather(descs, |t| match t {
                        Texels::Nrm32(t) => Some(t),
                        _ => None,
                    });

                    self.nrm32 = DeviceBuffer::from_slice(device, "nrm32Pixels", Placement::Device, &texels)?;
                },
            }
        }

        self.layout += 1;

        log::debug!(
            "texture atlases hold {:?} texels for {} textures",
            self.texel_counts(), self.entries.len()
        );

        Ok(())
    }

    pub fn entries(&self) -> &[TexEntry] { &self.entries }

    // Bumped on every upload; material offsets are only valid for one layout
    pub fn layout(&self) -> u64 { self.layout }

    // argb32, argb128, nrm32
    pub fn texel_counts(&self) -> [u32; 3] {
        [self.argb32.len() as u32, self.argb128.len() as u32, self.nrm32.len() as u32]
    }

    pub fn pointers(&self) -> [DevicePtr; 3] {
        [self.argb32.dev_ptr(), self.argb128.dev_ptr(), self.nrm32.dev_ptr()]
    }
}

fn gather<'a, T, F>(descs: &[TextureDesc<'a>], pick: F) -> Vec<T>
    where T: bytemuck::Pod, F: Fn(Texels<'a>) -> Option<&'a [T]> {

    let mut texels = descs
        .iter()
        .filter_map(|desc| pick(desc.texels))
        .flatten()
        .copied()
        .collect::<Vec<T>>();

    if texels.len() < MIN_ATLAS_TEXELS {
        texels.resize(MIN_ATLAS_TEXELS, T::zeroed());
    }

    texels
}
