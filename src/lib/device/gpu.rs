use std::{collections, mem, sync};
use std::sync::atomic;

use super::{Device, DeviceInfo, DevicePtr, Format, Interop};
use crate::error::CoreError;

#[derive(Debug)]
pub struct WgpuMem {
    id: u64,
    buffer: sync::Arc<wgpu::Buffer>,
}

#[derive(Debug)]
pub struct WgpuSurface {
    pub symbol: &'static str,
    pub view: wgpu::TextureView,
    bound: atomic::AtomicBool,
}

// Slot in the device's timestamp query set. `None` when the adapter
// cannot write timestamps
#[derive(Clone, Copy, Debug)]
pub struct WgpuEvent(Option<u32>);

// Every event writes a timestamp into its own slot and resolves it at
// once. Slots are reused round-robin
#[derive(Debug)]
struct Timestamps {
    set: wgpu::QuerySet,
    resolved: wgpu::Buffer,
    // Nanoseconds per tick
    period: f32,
    next: atomic::AtomicU32,
}

impl Timestamps {
    const SLOTS: u32 = 256;

    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: Self::SLOTS,
        });

        let resolved = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamps"),
            size: Self::SLOTS as u64 * wgpu::QUERY_RESOLVE_BUFFER_ALIGNMENT,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        Self {
            set,
            resolved,
            period: queue.get_timestamp_period(),
            next: atomic::AtomicU32::new(0),
        }
    }

    fn slot(&self) -> u32 {
        self.next.fetch_add(1, atomic::Ordering::Relaxed) % Self::SLOTS
    }

    // Resolve targets must sit on the query resolve alignment
    fn offset(slot: u32) -> u64 {
        slot as u64 * wgpu::QUERY_RESOLVE_BUFFER_ALIGNMENT
    }
}

// Seconds between two raw timestamps. A wrapped or reordered pair reads as 0
fn ticks_to_seconds(start: u64, end: u64, period: f32) -> f32 {
    end.checked_sub(start)
        .map(|ticks| ticks as f64 * period as f64 * 1e-9)
        .unwrap_or(0.) as f32
}

#[derive(Debug)]
struct Inner {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: DeviceInfo,
    timestamps: Option<Timestamps>,
    next_id: atomic::AtomicU64,
    allocations: sync::Mutex<collections::HashMap<u64, sync::Weak<wgpu::Buffer>>>,
    interop: sync::Mutex<collections::HashMap<&'static str, (Format, u64)>>,
}

#[derive(Clone, Debug)]
pub struct WgpuDevice(sync::Arc<Inner>);

impl WgpuDevice {
    // Storage buffers are never zero-sized and always copy-aligned
    const MIN_BUFFER_SIZE: u64 = 16;

    pub async fn new() -> anyhow::Result<Self> {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "wasm32")] {
                let backends = wgpu::Backends::BROWSER_WEBGPU;
            } else {
                let backends = wgpu::Backends::all();
            }
        }

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends, ..Default::default()
        });

        let adapter = Self::fastest_adapter(&instance, backends).await?;

        // Kernels bind far more storage buffers than the defaults allow
        let limits = adapter.limits();

        // Stage timings need timestamps; without them they report 0
        let required_features = adapter.features() & wgpu::Features::TIMESTAMP_QUERY;

        let device_desc = wgpu::DeviceDescriptor {
            label: Some("rt"),
            required_features,
            required_limits: limits.clone(),
        };

        let (device, queue) = adapter
            .request_device(&device_desc, None)
            .await?;

        let info = Self::describe(adapter.get_info().name, &limits);

        Ok(Self::from_parts(device, queue, info))
    }

    // Wraps a device that the display side already owns
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue, info: DeviceInfo) -> Self {
        log::info!(
            "running on GPU: {} (capability {}.{}); wgpu reports neither compute units nor VRAM",
            info.name, info.capability.0, info.capability.1,
        );

        let timestamps = if device.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            Some(Timestamps::new(&device, &queue))
        } else {
            log::warn!("timestamp queries unsupported, stage timings will read 0");

            None
        };

        Self(sync::Arc::new(Inner {
            device,
            queue,
            info,
            timestamps,
            next_id: atomic::AtomicU64::new(1),
            allocations: sync::Mutex::new(collections::HashMap::new()),
            interop: sync::Mutex::new(collections::HashMap::new()),
        }))
    }

    async fn fastest_adapter(
        instance: &wgpu::Instance,
        backends: wgpu::Backends,
    ) -> anyhow::Result<wgpu::Adapter> {
        fn rank(adapter: &wgpu::Adapter) -> (u32, u32) {
            let kind = match adapter.get_info().device_type {
                wgpu::DeviceType::DiscreteGpu => 4,
                wgpu::DeviceType::IntegratedGpu => 3,
                wgpu::DeviceType::VirtualGpu => 2,
                wgpu::DeviceType::Cpu => 1,
                wgpu::DeviceType::Other => 0,
            };

            (kind, adapter.limits().max_compute_invocations_per_workgroup)
        }

        cfg_if::cfg_if! {
            if #[cfg(target_arch = "wasm32")] {
                let _ = (backends, rank);

                let fastest: Option<wgpu::Adapter> = None;
            } else {
                let fastest = instance
                    .enumerate_adapters(backends)
                    .into_iter()
                    .max_by_key(rank);
            }
        }

        let adapter = match fastest {
            Some(adapter) => Some(adapter),
            None => instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            }).await,
        };

        adapter.ok_or_else(|| anyhow::anyhow!("no GPU adapter available"))
    }

    // wgpu hides the hardware generation, so the compute limits stand in.
    // Unit count and VRAM are not exposed and stay 0
    fn describe(name: String, limits: &wgpu::Limits) -> DeviceInfo {
        let invocations = limits.max_compute_invocations_per_workgroup;
        let shared = limits.max_compute_workgroup_storage_size;

        let capability = if invocations >= 1024 && shared >= 49152 {
            (7, 5)
        } else if invocations >= 1024 {
            (6, 1)
        } else {
            (5, 2)
        };

        DeviceInfo {
            name,
            compute_units: 0,
            capability,
            vram_mb: 0,
        }
    }

    pub fn device(&self) -> &wgpu::Device { &self.0.device }

    pub fn queue(&self) -> &wgpu::Queue { &self.0.queue }

    pub fn resolve(&self, ptr: DevicePtr) -> Option<sync::Arc<wgpu::Buffer>> {
        self.0.allocations
            .lock()
            .ok()?
            .get(&ptr.0)
            .and_then(sync::Weak::upgrade)
    }

    pub fn interop(&self, symbol: &str) -> Option<(Format, sync::Arc<wgpu::Buffer>)> {
        let (format, id) = *self.0.interop.lock().ok()?.get(symbol)?;

        Some((format, self.resolve(DevicePtr(id))?))
    }

    fn submit<F>(&self, encode: F) where F: FnOnce(&mut wgpu::CommandEncoder) {
        let mut encoder = self.0.device.create_command_encoder(&{
            wgpu::CommandEncoderDescriptor::default()
        });

        encode(&mut encoder);

        self.0.queue.submit(Some(encoder.finish()));
    }

    fn wait(&self) {
        let _ = self.0.device.poll(wgpu::Maintain::Wait);
    }

    // Copies `bytes.len()` bytes from `offset` into a mapped staging buffer
    // and blocks until they arrive
    fn read_back(&self, src: &wgpu::Buffer, offset: u64, bytes: &mut [u8]) -> anyhow::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let size = (bytes.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);

        let staging = self.0.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        self.submit(|encoder| {
            encoder.copy_buffer_to_buffer(src, offset, &staging, 0, size);
        });

        let (sender, receiver) = sync::mpsc::channel();

        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        self.wait();

        receiver
            .recv()
            .map_err(|e| CoreError::Readback(e.to_string()))?
            .map_err(|e| CoreError::Readback(e.to_string()))?;

        {
            let view = staging.slice(..).get_mapped_range();

            bytes.copy_from_slice(&view[..bytes.len()]);
        }

        staging.unmap();
        staging.destroy();

        Ok(())
    }

    fn timestamp(&self, timestamps: &Timestamps, slot: u32) -> anyhow::Result<u64> {
        let mut raw = [0u8; mem::size_of::<u64>()];

        self.read_back(&timestamps.resolved, Timestamps::offset(slot), &mut raw)?;

        Ok(u64::from_ne_bytes(raw))
    }
}

impl Device for WgpuDevice {
    type Mem = WgpuMem;
    type Texture = sync::Arc<wgpu::Texture>;
    type Surface = WgpuSurface;
    type Event = WgpuEvent;

    fn info(&self) -> DeviceInfo {
        self.0.info.clone()
    }

    fn allocate(&self, label: &str, bytes: usize) -> anyhow::Result<Self::Mem> {
        let size = (bytes as u64)
            .max(Self::MIN_BUFFER_SIZE)
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);

        if size > self.0.device.limits().max_buffer_size {
            anyhow::bail!("`{}` needs {} bytes, more than the device allows", label, size);
        }

        let buffer = sync::Arc::new(self.0.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                 | wgpu::BufferUsages::COPY_SRC
                 | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));

        let id = self.0.next_id.fetch_add(1, atomic::Ordering::Relaxed);

        self.0.allocations
            .lock()
            .map_err(|_| anyhow::anyhow!("allocation registry poisoned"))?
            .insert(id, sync::Arc::downgrade(&buffer));

        Ok(WgpuMem { id, buffer })
    }

    fn release(&self, mem: Self::Mem) {
        if let Ok(mut allocations) = self.0.allocations.lock() {
            allocations.remove(&mem.id);
        }

        mem.buffer.destroy();
    }

    fn address(&self, mem: &Self::Mem) -> DevicePtr {
        DevicePtr(mem.id)
    }

    fn upload(&self, mem: &Self::Mem, offset: usize, bytes: &[u8]) -> anyhow::Result<()> {
        if (offset + bytes.len()) as u64 > mem.buffer.size() {
            anyhow::bail!("upload of {} bytes at {} overruns {:?}", bytes.len(), offset, mem.id);
        }

        if bytes.is_empty() {
            return Ok(());
        }

        // Queue writes must be a whole number of copy units
        let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;

        if bytes.len() % align == 0 {
            self.0.queue.write_buffer(&mem.buffer, offset as u64, bytes);
        } else {
            let mut padded = bytes.to_vec();
            padded.resize(bytes.len().next_multiple_of(align), 0);

            self.0.queue.write_buffer(&mem.buffer, offset as u64, &padded);
        }

        Ok(())
    }

    fn download(&self, mem: &Self::Mem, bytes: &mut [u8]) -> anyhow::Result<()> {
        self.read_back(&mem.buffer, 0, bytes)
    }

    fn clear(&self, mem: &Self::Mem) -> anyhow::Result<()> {
        self.submit(|encoder| encoder.clear_buffer(&mem.buffer, 0, None));

        Ok(())
    }

    fn register_interop(&self, interop: Interop, mem: &Self::Mem) -> anyhow::Result<()> {
        let Interop { symbol, format } = interop;

        if mem.buffer.size() % format.size() as u64 != 0 && format != Format::Float3 {
            return Err(CoreError::Interop({
                format!("`{}` is not a whole number of {:?} elements", symbol, format)
            }).into());
        }

        self.0.interop
            .lock()
            .map_err(|_| CoreError::Interop(String::from("interop registry poisoned")))?
            .insert(symbol, (format, mem.id));

        log::debug!("registered `{}` as {:?}", symbol, format);

        Ok(())
    }

    fn deregister_interop(&self, symbol: &str, mem: &Self::Mem) {
        if let Ok(mut interop) = self.0.interop.lock() {
            if matches!(interop.get(symbol), Some(&(_, id)) if id == mem.id) {
                interop.remove(symbol);
            }
        }
    }

    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32) {
        (texture.width(), texture.height())
    }

    fn link_surface(
        &self,
        texture: &Self::Texture,
        symbol: &'static str,
    ) -> anyhow::Result<Self::Surface> {
        if !texture.usage().contains(wgpu::TextureUsages::STORAGE_BINDING) {
            return Err(CoreError::Interop({
                format!("texture linked as `{}` is not a storage texture", symbol)
            }).into());
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(symbol),
            ..Default::default()
        });

        Ok(WgpuSurface {
            symbol,
            view,
            bound: atomic::AtomicBool::new(false),
        })
    }

    fn bind_surface(&self, surface: &Self::Surface) -> anyhow::Result<()> {
        if surface.bound.swap(true, atomic::Ordering::AcqRel) {
            return Err(CoreError::Interop({
                format!("surface `{}` is already bound", surface.symbol)
            }).into());
        }

        Ok(())
    }

    fn unbind_surface(&self, surface: &Self::Surface) {
        surface.bound.store(false, atomic::Ordering::Release);
    }

    fn graphics_barrier(&self) -> anyhow::Result<()> {
        self.wait();

        Ok(())
    }

    fn record_event(&self) -> anyhow::Result<Self::Event> {
        let Some(timestamps) = &self.0.timestamps else {
            return Ok(WgpuEvent(None));
        };

        let slot = timestamps.slot();

        // An empty pass stamps the queue position between launches
        self.submit(|encoder| {
            encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("event"),
                timestamp_writes: Some(wgpu::ComputePassTimestampWrites {
                    query_set: &timestamps.set,
                    beginning_of_pass_write_index: Some(slot),
                    end_of_pass_write_index: None,
                }),
            });

            encoder.resolve_query_set(
                &timestamps.set,
                slot..(slot + 1),
                &timestamps.resolved,
                Timestamps::offset(slot),
            );
        });

        Ok(WgpuEvent(Some(slot)))
    }

    fn elapsed(&self, start: &Self::Event, end: &Self::Event) -> anyhow::Result<f32> {
        let (Some(timestamps), WgpuEvent(Some(start)), WgpuEvent(Some(end))) =
            (&self.0.timestamps, start, end) else {
            return Ok(0.);
        };

        let start = self.timestamp(timestamps, *start)?;
        let end = self.timestamp(timestamps, *end)?;

        Ok(ticks_to_seconds(start, end, timestamps.period))
    }

    fn synchronize(&self) -> anyhow::Result<()> {
        self.wait();

        Ok(())
    }
}
