use std::{cell, collections, mem, rc, time};

use super::{Device, DeviceInfo, DevicePtr, Format, Interop};
use crate::error::CoreError;

type Bytes = rc::Rc<cell::RefCell<Vec<u8>>>;

#[derive(Debug)]
pub struct HostMem {
    id: u64,
    bytes: Bytes,
}

#[derive(Debug, Default)]
pub struct HostImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

// Stands in for a graphics-API texture
#[derive(Clone, Debug)]
pub struct HostTexture(pub rc::Rc<cell::RefCell<HostImage>>);

impl HostTexture {
    pub fn new(width: u32, height: u32) -> Self {
        let image = HostImage {
            width,
            height,
            pixels: vec![0; (width * height) as usize],
        };

        Self(rc::Rc::new(cell::RefCell::new(image)))
    }

    pub fn pixels(&self) -> Vec<u32> {
        self.0.borrow().pixels.clone()
    }
}

#[derive(Debug)]
pub struct HostSurface {
    pub symbol: &'static str,
    pub texture: HostTexture,
    bound: cell::Cell<bool>,
}

impl HostSurface {
    pub fn is_bound(&self) -> bool { self.bound.get() }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: cell::Cell<u64>,
    allocations: cell::RefCell<collections::HashMap<u64, rc::Weak<cell::RefCell<Vec<u8>>>>>,
    allocated: cell::Cell<usize>,
    interop: cell::RefCell<collections::HashMap<&'static str, (Format, u64)>>,
    barriers: cell::Cell<usize>,
    syncs: cell::Cell<usize>,
}

// A device whose memory lives on the host. Work completes as soon as it
// is submitted, so events and synchronization are trivially ordered
#[derive(Clone, Debug, Default)]
pub struct HostDevice(rc::Rc<Inner>);

impl HostDevice {
    pub fn new() -> Self { Self::default() }

    fn bytes(&self, ptr: DevicePtr) -> Option<Bytes> {
        self.0.allocations
            .borrow()
            .get(&ptr.0)
            .and_then(rc::Weak::upgrade)
    }

    pub fn read<T: bytemuck::Pod>(&self, ptr: DevicePtr) -> Option<Vec<T>> {
        let bytes = self.bytes(ptr)?;
        let bytes = bytes.borrow();

        let len = bytes.len() / mem::size_of::<T>();
        let mut out = vec![T::zeroed(); len];

        bytemuck::cast_slice_mut::<T, u8>(&mut out)
            .copy_from_slice(&bytes[..len * mem::size_of::<T>()]);

        Some(out)
    }

    // Writes `data` starting at element `offset`
    pub fn write<T: bytemuck::Pod>(
        &self,
        ptr: DevicePtr,
        offset: usize,
        data: &[T],
    ) -> anyhow::Result<()> {
        let bytes = self.bytes(ptr).ok_or_else(|| {
            CoreError::Interop(format!("no allocation at {:?}", ptr))
        })?;

        let start = offset * mem::size_of::<T>();
        let src: &[u8] = bytemuck::cast_slice(data);

        let mut bytes = bytes.borrow_mut();
        if start + src.len() > bytes.len() {
            anyhow::bail!("write of {} bytes at {} overruns {:?}", src.len(), start, ptr);
        }

        bytes[start..(start + src.len())].copy_from_slice(src);

        Ok(())
    }

    pub fn interop(&self, symbol: &str) -> Option<DevicePtr> {
        self.0.interop
            .borrow()
            .get(symbol)
            .map(|&(_, id)| DevicePtr(id))
    }

    pub fn interop_format(&self, symbol: &str) -> Option<Format> {
        self.0.interop.borrow().get(symbol).map(|&(format, _)| format)
    }

    // Total number of allocations made over the device's lifetime
    pub fn allocations(&self) -> usize { self.0.allocated.get() }

    pub fn live_allocations(&self) -> usize {
        self.0.allocations
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn barriers(&self) -> usize { self.0.barriers.get() }

    pub fn synchronizations(&self) -> usize { self.0.syncs.get() }
}

impl Device for HostDevice {
    type Mem = HostMem;
    type Texture = HostTexture;
    type Surface = HostSurface;
    type Event = time::Instant;

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: String::from("host"),
            compute_units: 1,
            capability: (7, 5),
            vram_mb: 0,
        }
    }

    fn allocate(&self, label: &str, bytes: usize) -> anyhow::Result<Self::Mem> {
        let id = self.0.next_id.get() + 1;
        self.0.next_id.set(id);

        let bytes = rc::Rc::new(cell::RefCell::new(vec![0u8; bytes]));

        self.0.allocations
            .borrow_mut()
            .insert(id, rc::Rc::downgrade(&bytes));

        self.0.allocated.set(self.0.allocated.get() + 1);

        log::trace!("allocated `{}` ({} bytes) as {}", label, bytes.borrow().len(), id);

        Ok(HostMem { id, bytes })
    }

    fn release(&self, mem: Self::Mem) {
        self.0.allocations.borrow_mut().remove(&mem.id);
    }

    fn address(&self, mem: &Self::Mem) -> DevicePtr {
        DevicePtr(mem.id)
    }

    fn upload(&self, mem: &Self::Mem, offset: usize, bytes: &[u8]) -> anyhow::Result<()> {
        let mut dst = mem.bytes.borrow_mut();

        if offset + bytes.len() > dst.len() {
            anyhow::bail!("upload of {} bytes at {} overruns allocation {}", bytes.len(), offset, mem.id);
        }

        dst[offset..(offset + bytes.len())].copy_from_slice(bytes);

        Ok(())
    }

    fn download(&self, mem: &Self::Mem, bytes: &mut [u8]) -> anyhow::Result<()> {
        let src = mem.bytes.borrow();

        if bytes.len() > src.len() {
            return Err(CoreError::Readback(format!(
                "{} bytes requested from allocation {} of {}",
                bytes.len(), mem.id, src.len()
            )).into());
        }

        bytes.copy_from_slice(&src[..bytes.len()]);

        Ok(())
    }

    fn clear(&self, mem: &Self::Mem) -> anyhow::Result<()> {
        mem.bytes.borrow_mut().fill(0);

        Ok(())
    }

    fn register_interop(&self, interop: Interop, mem: &Self::Mem) -> anyhow::Result<()> {
        let Interop { symbol, format } = interop;

        self.0.interop.borrow_mut().insert(symbol, (format, mem.id));

        Ok(())
    }

    fn deregister_interop(&self, symbol: &str, mem: &Self::Mem) {
        let mut interop = self.0.interop.borrow_mut();

        if matches!(interop.get(symbol), Some(&(_, id)) if id == mem.id) {
            interop.remove(symbol);
        }
    }

    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32) {
        let image = texture.0.borrow();

        (image.width, image.height)
    }

    fn link_surface(
        &self,
        texture: &Self::Texture,
        symbol: &'static str,
    ) -> anyhow::Result<Self::Surface> {
        Ok(HostSurface {
            symbol,
            texture: texture.clone(),
            bound: cell::Cell::new(false),
        })
    }

    fn bind_surface(&self, surface: &Self::Surface) -> anyhow::Result<()> {
        if surface.bound.replace(true) {
            return Err(CoreError::Interop({
                format!("surface `{}` is already bound", surface.symbol)
            }).into());
        }

        Ok(())
    }

    fn unbind_surface(&self, surface: &Self::Surface) {
        surface.bound.set(false);
    }

    fn graphics_barrier(&self) -> anyhow::Result<()> {
        self.0.barriers.set(self.0.barriers.get() + 1);

        Ok(())
    }

    fn record_event(&self) -> anyhow::Result<Self::Event> {
        Ok(time::Instant::now())
    }

    fn elapsed(&self, start: &Self::Event, end: &Self::Event) -> anyhow::Result<f32> {
        Ok(end.saturating_duration_since(*start).as_secs_f32())
    }

    fn synchronize(&self) -> anyhow::Result<()> {
        self.0.syncs.set(self.0.syncs.get() + 1);

        Ok(())
    }
}
