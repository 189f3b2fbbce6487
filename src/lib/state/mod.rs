pub mod stats;
pub mod timestamps;
pub mod wavefront;

use crate::{backend, geom, noise, scene, shaders};
use crate::device::{Device, DeviceBuffer, DevicePtr, Format, Interop, Placement};
use crate::device::target::RenderTarget;
use crate::error::CoreError;
use crate::settings::Settings;

pub use stats::CoreStats;

use timestamps::{FrameTimer, Stage};
use wavefront::WavefrontState;

const RENDER_TARGET: &str = "renderTarget";

const BLUE_NOISE: Interop = Interop::new("blueNoise", Format::UnsignedInt);

#[derive(Clone, Copy, Default)]
#[derive(Debug, PartialEq, Eq)]
#[derive(serde::Deserialize, serde::Serialize)]
pub enum Convergence {
    // Discard the accumulator and restart the noise sequence
    #[default]
    Restart,
    // Keep adding samples to the accumulator
    Converge,
}

// xorshift32 over the camera seed
#[derive(Clone, Copy)]
#[derive(Debug, PartialEq, Eq)]
pub struct CameraRng(u32);

impl CameraRng {
    pub const SEED: u32 = 0x12345678;

    pub fn next(&mut self) -> u32 {
        let Self(state) = self;

        *state ^= *state << 13;
        *state ^= *state >> 17;
        *state ^= *state << 5;
        *state
    }
}

impl Default for CameraRng {
    fn default() -> Self { Self(Self::SEED) }
}

// The host-side driver. Owns the scene mirror, the wavefront buffers and
// the counters, and drives the backend through one frame per `render`
#[derive(Debug)]
pub struct RenderCore<B: backend::Backend> {
    backend: B,
    config: crate::Config,
    scene: scene::SceneMirror<B::Device>,
    target: RenderTarget<B::Device>,
    wavefront: Option<WavefrontState<B::Device>>,
    counters: DeviceBuffer<geom::Counters, B::Device>,
    blue_noise: DeviceBuffer<u32, B::Device>,
    settings: Settings,
    published: Option<backend::KernelSymbols>,
    timer: FrameTimer<B::Device>,
    rng: CameraRng,
    samples_taken: u32,
    probe: (u32, u32),
    stats: CoreStats,
}

impl<B: backend::Backend> RenderCore<B> {
    pub fn init(backend: B, config: crate::Config) -> anyhow::Result<Self> {
        Self::init_with_compiler(backend, config, &shaders::Preprocessor)
    }

    pub fn init_with_compiler<C>(
        mut backend: B,
        config: crate::Config,
        compiler: &C,
    ) -> anyhow::Result<Self> where C: shaders::KernelCompiler + ?Sized {
        config.validate()?;

        let device = backend.device().clone();

        let info = device.info();
        let arch = shaders::Architecture::from_capability(info.capability);

        log::info!(
            "{} ({} units, capability {}.{}, {} MiB); kernels for {:?}",
            info.name, info.compute_units, info.capability.0, info.capability.1,
            info.vram_mb, arch
        );

        let ir = shaders::load_or_compile(&config.kernels, arch, compiler)?;
        backend.load_kernels(&ir)?;

        let scene = scene::SceneMirror::new(&device)?;

        let counters = DeviceBuffer::new(&device, "counters", 1, Placement::Both)?;

        let noise = noise::BlueNoise::from_config(config.blue_noise.as_deref())?;
        let blue_noise = DeviceBuffer::interop(
            &device,
            noise::BlueNoise::LEN,
            BLUE_NOISE,
            Some(noise.as_slice()),
        )?;

        let settings = Settings {
            geometry_epsilon: config.geometry_epsilon,
            clamp_value: config.clamp_value,
        };

        let mut stats = CoreStats::default();
        stats.set_device(&info);
        stats.set_texel_counts(scene.texel_counts());

        let mut core = Self {
            backend,
            config,
            scene,
            target: RenderTarget::default(),
            wavefront: None,
            counters,
            blue_noise,
            settings,
            published: None,
            timer: FrameTimer::default(),
            rng: CameraRng::default(),
            samples_taken: 0,
            probe: (0, 0),
            stats,
        };

        core.publish_symbols()?;

        Ok(core)
    }

    // Adopts the display texture and sizes the wavefront buffers for it.
    // Always restarts accumulation
    pub fn set_target(
        &mut self,
        texture: <B::Device as Device>::Texture,
        spp: u32,
    ) -> anyhow::Result<()> {
        let device = self.backend.device().clone();

        let (width, height) = device.texture_size(&texture);

        self.target.set_texture(texture, width, height);
        self.target.link_to_surface(&device, RENDER_TARGET)?;

        let pixels = (width * height) as usize;
        let reallocate = self.wavefront
            .as_ref()
            .map(|state| state.needs_realloc(pixels, spp))
            .unwrap_or(true);

        if reallocate {
            // Release the old set before allocating its successor
            self.wavefront = None;
            self.wavefront = Some(WavefrontState::new(
                &device,
                pixels,
                spp,
                self.config.max_path_length,
            )?);
        }

        if let Some(state) = &self.wavefront {
            state.accumulator.clear()?;
        }

        self.samples_taken = 0;

        Ok(())
    }

    pub fn set_geometry(
        &mut self,
        mesh_idx: usize,
        vertices: &[[f32; 4]],
        triangles: &[geom::CoreTri],
        alpha_flags: &[u32],
    ) -> anyhow::Result<()> {
        self.scene.set_geometry(mesh_idx, vertices, triangles, alpha_flags)
    }

    pub fn set_instance(
        &mut self,
        inst_idx: usize,
        mesh_idx: usize,
        transform: [[f32; 4]; 4],
    ) -> anyhow::Result<()> {
        self.scene.set_instance(inst_idx, mesh_idx, transform)
    }

    pub fn update_top_level(&mut self) {
        self.scene.update_top_level();
    }

    pub fn set_textures(&mut self, descs: &[geom::TextureDesc<'_>]) -> anyhow::Result<()> {
        self.scene.set_textures(descs)?;
        self.stats.set_texel_counts(self.scene.texel_counts());

        self.publish_symbols()
    }

    pub fn set_materials(
        &mut self,
        materials: &[geom::Material],
        extras: &[geom::MaterialEx],
    ) -> anyhow::Result<()> {
        self.scene.set_materials(materials, extras)?;

        self.publish_symbols()
    }

    pub fn set_lights(&mut self, lights: &geom::light::LightSet<'_>) -> anyhow::Result<()> {
        self.scene.set_lights(lights)?;

        self.publish_symbols()
    }

    pub fn set_sky_data(&mut self, pixels: &[[f32; 3]], width: u32, height: u32) -> anyhow::Result<()> {
        self.scene.set_sky_data(pixels, width, height)?;

        self.publish_symbols()
    }

    // Unknown names are ignored
    pub fn setting(&mut self, name: &str, value: f32) -> anyhow::Result<()> {
        if self.settings.apply(name, value) {
            self.publish_symbols()?;
        }

        Ok(())
    }

    pub fn set_probe_pos(&mut self, x: u32, y: u32) {
        self.probe = (x, y);
    }

    pub fn render(
        &mut self,
        view: &scene::camera::ViewPyramid,
        convergence: Convergence,
        brightness: f32,
        contrast: f32,
    ) -> anyhow::Result<()> {
        let device = self.backend.device().clone();

        let Some(wavefront) = &self.wavefront else {
            return Err(CoreError::NoTarget.into());
        };

        device.graphics_barrier()?;

        self.timer.begin();

        if let Convergence::Restart = convergence {
            wavefront.accumulator.clear()?;

            self.samples_taken = 0;
            self.rng = CameraRng::default();
        }

        if self.scene.materials_stale() {
            log::warn!("materials were published against an older texture layout");
        }

        if self.scene.sync_instance_descriptors(self.config.republish_instances)? {
            log::trace!("published {} instance descriptors", self.scene.instance_count());
        }

        let symbols = self.symbols();
        publish_if_changed(&mut self.backend, &mut self.published, symbols)?;

        self.scene.prepare_traversal(&mut self.backend)?;

        let (width, height) = self.target.size();
        let spp = wavefront.spp();

        let mut params = backend::LaunchParams {
            scrsize: [width, height, spp],
            pos_lens_size: view.pos_lens_size(),
            right: view.right(),
            up: view.up(),
            p1: view.p1,
            pass: self.samples_taken,
            phase: backend::Phase::Generate,
            geometry_epsilon: self.settings.geometry_epsilon,
        };

        let stride = width * height * spp;
        let probe_pixel = probe_index(self.probe, width, height);

        self.stats.deep_ray_count = 0;
        self.stats.bounce1_ray_count = 0;

        let mut path_count = stride;
        let mut counters = geom::Counters::default();

        for path_length in 1..=self.config.max_path_length {
            if path_length == 1 {
                params.phase = backend::Phase::Generate;

                self.stats.primary_ray_count = path_count;
                self.backend.init_counters_for_extend(path_count)?;
            } else {
                // Nothing survived the previous bounce
                if path_count == 0 {
                    break;
                }

                params.phase = backend::Phase::Extend;

                if path_length == 2 {
                    self.stats.bounce1_ray_count = path_count;
                } else {
                    self.stats.deep_ray_count += path_count;
                }

                self.counters.copy_to_host()?;
                self.backend.init_counters_subsequent()?;
            }

            self.timer.time(&device, Stage::Trace(path_length), || {
                self.backend.launch(&params, path_count)
            })?;

            let args = backend::ShadeArgs {
                path_count,
                accumulator: wavefront.accumulator.dev_ptr(),
                stride,
                path_states: wavefront.path_states.dev_ptr(),
                hits: wavefront.hits.dev_ptr(),
                connections: wavefront.connections.dev_ptr(),
                r0: self.rng.next(),
                blue_noise: self.blue_noise.dev_ptr(),
                pass: self.samples_taken,
                probe_pixel,
                path_length,
                width,
                height,
                spread_angle: view.spread_angle,
                p1: view.p1,
                p2: view.p2,
                p3: view.p3,
                pos: view.pos,
            };

            self.timer.time(&device, Stage::Shade(path_length), || {
                self.backend.shade(&args)
            })?;

            // The only legal point to observe the wavefront size
            self.counters.copy_to_host()?;
            counters = self.counters.host()?[0];

            if counters.extension_rays > path_count {
                log::warn!(
                    "{} survivors reported for a launch of {}, clamping",
                    counters.extension_rays, path_count
                );
            }

            path_count = counters.extension_rays.min(path_count);
        }

        params.phase = backend::Phase::Connect;

        self.timer.time(&device, Stage::Shadow, || {
            self.backend.launch(&params, counters.shadow_rays)
        })?;

        self.stats.total_shadow_rays = counters.shadow_rays;
        self.stats.total_extension_rays = counters.total_extension_rays;

        {
            let bound = self.target.bind_surface(&device)?;

            self.samples_taken += spp;

            let args = backend::FinalizeArgs {
                accumulator: wavefront.accumulator.dev_ptr(),
                width,
                height,
                spp: self.samples_taken,
                brightness,
                contrast,
            };

            self.backend.finalize(&args, &bound)?;

            bound.unbind_surface();
        }

        device.synchronize()?;

        self.timer.resolve(&device, &mut self.stats)?;

        let stats = &mut self.stats;

        stats.total_rays = stats.total_extension_rays + stats.total_shadow_rays;
        stats.samples_taken = self.samples_taken;
        stats.probed_instid = counters.probed_instid;
        stats.probed_triid = counters.probed_triid;
        stats.probed_dist = counters.probed_dist;

        log::debug!(
            "frame {}: {} rays ({} extension, {} shadow) in {:.3}ms",
            stats.samples_taken, stats.total_rays, stats.total_extension_rays,
            stats.total_shadow_rays, stats.render_time * 1000.
        );

        Ok(())
    }

    // Releases the backend first, then every owned buffer
    pub fn shutdown(mut self) {
        self.backend.shutdown();

        log::info!("shut down after {} samples", self.samples_taken);
    }

    pub fn stats(&self) -> &CoreStats { &self.stats }

    pub fn scene(&self) -> &scene::SceneMirror<B::Device> { &self.scene }

    pub fn settings(&self) -> &Settings { &self.settings }

    pub fn samples_taken(&self) -> u32 { self.samples_taken }

    pub fn backend(&self) -> &B { &self.backend }

    pub fn backend_mut(&mut self) -> &mut B { &mut self.backend }

    pub fn wavefront(&self) -> Option<&WavefrontState<B::Device>> { self.wavefront.as_ref() }

    pub fn accumulator(&self) -> DevicePtr {
        self.wavefront
            .as_ref()
            .map(|state| state.accumulator.dev_ptr())
            .unwrap_or(DevicePtr::NULL)
    }

    pub fn target(&self) -> &RenderTarget<B::Device> { &self.target }

    fn symbols(&self) -> backend::KernelSymbols {
        let mut symbols = backend::KernelSymbols {
            counters: self.counters.dev_ptr(),
            geometry_epsilon: self.settings.geometry_epsilon,
            clamp_value: self.settings.clamp_value,
            ..Default::default()
        };

        self.scene.fill_symbols(&mut symbols);

        symbols
    }

    fn publish_symbols(&mut self) -> anyhow::Result<()> {
        let symbols = self.symbols();

        publish_if_changed(&mut self.backend, &mut self.published, symbols)
    }
}

// Hands the backend a fresh snapshot, unless nothing changed
fn publish_if_changed<B: backend::Backend>(
    backend: &mut B,
    published: &mut Option<backend::KernelSymbols>,
    symbols: backend::KernelSymbols,
) -> anyhow::Result<()> {
    if published.as_ref() != Some(&symbols) {
        backend.publish(&symbols)?;

        *published = Some(symbols);
    }

    Ok(())
}

// Linear pixel index of the probe, or `backend::NO_PROBE` off the image
fn probe_index((x, y): (u32, u32), width: u32, height: u32) -> i32 {
    if x >= width || y >= height {
        return backend::NO_PROBE;
    }

    (y as u64 * width as u64 + x as u64)
        .try_into()
        .unwrap_or(backend::NO_PROBE)
}
