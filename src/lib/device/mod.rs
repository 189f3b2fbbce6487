pub mod gpu;
pub mod host;
pub mod target;

use std::{fmt, mem};

use crate::error::CoreError;

// Raw device address as kernels see it. Zero is never handed out
#[repr(transparent)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[derive(Clone, Copy, Default)]
#[derive(Debug, PartialEq, Eq, Hash)]
#[derive(serde::Serialize)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub const NULL: Self = Self(0);

    pub fn is_null(self) -> bool { self == Self::NULL }
}

// Element format declared alongside an interop symbol
#[derive(Clone, Copy)]
#[derive(Debug, PartialEq, Eq)]
pub enum Format {
    UnsignedInt,
    Float3,
    Float4,
}

impl Format {
    pub const fn size(self) -> usize {
        match self {
            Format::UnsignedInt => 4,
            Format::Float3 => 12,
            Format::Float4 => 16,
        }
    }
}

// Marks a buffer as visible to the ray-tracing backend under `symbol`
#[derive(Clone, Copy)]
#[derive(Debug, PartialEq, Eq)]
pub struct Interop {
    pub symbol: &'static str,
    pub format: Format,
}

impl Interop {
    pub const fn new(symbol: &'static str, format: Format) -> Self {
        Self { symbol, format }
    }
}

#[derive(Clone, Copy)]
#[derive(Debug, PartialEq, Eq)]
pub enum Placement {
    Host,
    Device,
    Both,
}

impl Placement {
    pub fn on_host(self) -> bool { !matches!(self, Placement::Device) }

    pub fn on_device(self) -> bool { !matches!(self, Placement::Host) }
}

#[derive(Clone, Default)]
#[derive(Debug, PartialEq)]
#[derive(serde::Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub compute_units: u32,
    pub capability: (u32, u32),
    pub vram_mb: u64,
}

// Memory and stream capability of the GPU the driver runs on.
// All work is ordered on a single default stream
pub trait Device: Clone + fmt::Debug {
    type Mem: fmt::Debug;
    type Texture: Clone + fmt::Debug;
    type Surface: fmt::Debug;
    type Event: fmt::Debug;

    fn info(&self) -> DeviceInfo;

    fn allocate(&self, label: &str, bytes: usize) -> anyhow::Result<Self::Mem>;
    fn release(&self, mem: Self::Mem) { drop(mem); }
    fn address(&self, mem: &Self::Mem) -> DevicePtr;

    fn upload(&self, mem: &Self::Mem, offset: usize, bytes: &[u8]) -> anyhow::Result<()>;
    fn download(&self, mem: &Self::Mem, bytes: &mut [u8]) -> anyhow::Result<()>;
    fn clear(&self, mem: &Self::Mem) -> anyhow::Result<()>;

    fn register_interop(&self, interop: Interop, mem: &Self::Mem) -> anyhow::Result<()>;

    // Only removes the entry while it still refers to `mem`
    fn deregister_interop(&self, symbol: &str, mem: &Self::Mem);

    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32);
    fn link_surface(
        &self,
        texture: &Self::Texture,
        symbol: &'static str,
    ) -> anyhow::Result<Self::Surface>;
    fn bind_surface(&self, surface: &Self::Surface) -> anyhow::Result<()>;
    fn unbind_surface(&self, surface: &Self::Surface);

    // Flushes graphics work that writes the display surface
    fn graphics_barrier(&self) -> anyhow::Result<()>;

    fn record_event(&self) -> anyhow::Result<Self::Event>;

    // Seconds between two recorded events; both must have completed
    fn elapsed(&self, start: &Self::Event, end: &Self::Event) -> anyhow::Result<f32>;

    fn synchronize(&self) -> anyhow::Result<()>;
}

// A typed buffer with an optional host mirror and an optional device side.
// Dropping it releases both sides and withdraws its interop symbol
pub struct DeviceBuffer<T: bytemuck::Pod, D: Device> {
    device: D,
    label: &'static str,
    len: usize,
    host: Option<Vec<T>>,
    mem: Option<D::Mem>,
    interop: Option<Interop>,
}

impl<T: bytemuck::Pod, D: Device> fmt::Debug for DeviceBuffer<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("label", &self.label)
            .field("len", &self.len)
            .field("host", &self.host.is_some())
            .field("mem", &self.mem)
            .field("interop", &self.interop)
            .finish()
    }
}

impl<T: bytemuck::Pod, D: Device> DeviceBuffer<T, D> {
    pub fn new(
        device: &D,
        label: &'static str,
        len: usize,
        placement: Placement,
    ) -> anyhow::Result<Self> {
        let host = placement.on_host().then(|| {
            vec![T::zeroed(); len]
        });

        let mem = if placement.on_device() {
            Some(device.allocate(label, len * mem::size_of::<T>())?)
        } else {
            None
        };

        Ok(Self {
            device: device.clone(),
            label,
            len,
            host,
            mem,
            interop: None,
        })
    }

    // The contents reach the device before this returns
    pub fn from_slice(
        device: &D,
        label: &'static str,
        placement: Placement,
        data: &[T],
    ) -> anyhow::Result<Self> {
        let mut buffer = Self::new(device, label, 0, Placement::Host)?;

        buffer.len = data.len();
        buffer.host = placement.on_host().then(|| data.to_vec());

        if placement.on_device() {
            let mem = device.allocate(label, mem::size_of_val(data))?;

            device.upload(&mem, 0, bytemuck::cast_slice(data))?;

            buffer.mem = Some(mem);
        }

        Ok(buffer)
    }

    // Device-resident buffer that the ray-tracing backend finds by symbol
    pub fn interop(
        device: &D,
        len: usize,
        interop: Interop,
        data: Option<&[T]>,
    ) -> anyhow::Result<Self> {
        let mut buffer = match data {
            Some(data) => Self::from_slice(device, interop.symbol, Placement::Device, data)?,
            None => Self::new(device, interop.symbol, len, Placement::Device)?,
        };

        if let Some(mem) = &buffer.mem {
            device.register_interop(interop, mem)?;
        }

        buffer.interop = Some(interop);

        Ok(buffer)
    }

    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub fn label(&self) -> &'static str { self.label }

    pub fn interop_symbol(&self) -> Option<&'static str> {
        self.interop.map(|Interop { symbol, .. }| symbol)
    }

    pub fn mem(&self) -> Option<&D::Mem> { self.mem.as_ref() }

    pub fn dev_ptr(&self) -> DevicePtr {
        self.mem
            .as_ref()
            .map(|mem| self.device.address(mem))
            .unwrap_or(DevicePtr::NULL)
    }

    pub fn host(&self) -> anyhow::Result<&[T]> {
        self.host.as_deref().ok_or_else(|| self.missing("host"))
    }

    pub fn host_mut(&mut self) -> anyhow::Result<&mut [T]> {
        let label = self.label;

        self.host.as_deref_mut().ok_or({
            CoreError::Placement { label, side: "host" }.into()
        })
    }

    pub fn copy_to_device(&self) -> anyhow::Result<()> {
        let host = self.host()?;
        let mem = self.device_mem()?;

        self.device.upload(mem, 0, bytemuck::cast_slice(host))
    }

    // Overwrites the leading elements of the device side, keeping its address
    pub fn upload(&self, data: &[T]) -> anyhow::Result<()> {
        if data.len() > self.len {
            anyhow::bail!("{} elements do not fit `{}` ({})", data.len(), self.label, self.len);
        }

        self.device.upload(self.device_mem()?, 0, bytemuck::cast_slice(data))
    }

    pub fn copy_to_host(&mut self) -> anyhow::Result<()> {
        let mem = self.device_mem()?;

        let mut bytes = vec![0u8; self.len * mem::size_of::<T>()];
        self.device.download(mem, &mut bytes)?;

        let host = self.host_mut()?;
        bytemuck::cast_slice_mut::<T, u8>(host).copy_from_slice(&bytes);

        Ok(())
    }

    // Zero-fill on the device side only
    pub fn clear(&self) -> anyhow::Result<()> {
        self.device.clear(self.device_mem()?)
    }

    fn device_mem(&self) -> anyhow::Result<&D::Mem> {
        self.mem.as_ref().ok_or_else(|| self.missing("device"))
    }

    fn missing(&self, side: &'static str) -> anyhow::Error {
        CoreError::Placement { label: self.label, side }.into()
    }
}

impl<T: bytemuck::Pod, D: Device> Drop for DeviceBuffer<T, D> {
    fn drop(&mut self) {
        if let Some(mem) = self.mem.take() {
            if let Some(Interop { symbol, .. }) = self.interop {
                self.device.deregister_interop(symbol, &mem);
            }

            self.device.release(mem);
        }

        self.host = None;
    }
}
