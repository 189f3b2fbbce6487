#![allow(dead_code)]

use std::{fs, path};

use rt::backend::{self, Phase};
use rt::bvh::BvhData;
use rt::device::host::{HostDevice, HostTexture};
use rt::device::target::BoundSurface;
use rt::device::DevicePtr;
use rt::geom::{self, V3Ops as _};
use rt::scene::camera::ViewPyramid;
use rt::shaders;

pub const IDENTITY: [[f32; 4]; 4] = [
    [1., 0., 0., 0.],
    [0., 1., 0., 0.],
    [0., 0., 1., 0.],
    [0., 0., 0., 1.],
];

// Radiance a primary or bounced hit adds to its pixel
pub const HIT_RADIANCE: f32 = 0.5;

const KERNELS: &str = "\
#include \"common.wgsl\"

@compute @workgroup_size(WORKGROUP_SIZE)
fn generate() {}
fn shade() {}
fn finalize() {}
fn init_counters_extend() {}
fn init_counters_subsequent() {}
";

#[derive(Clone, Copy, Debug)]
struct Ray {
    origin: [f32; 3],
    dir: [f32; 3],
    pixel: u32,
    sample: u32,
}

#[derive(Clone, Copy, Debug)]
struct Hit {
    inst: u32,
    tri: u32,
    t: f32,
    normal: [f32; 3],
}

#[derive(Debug)]
struct SoftMesh {
    tris: Vec<geom::CoreTri>,
    bvh: BvhData,
}

// Walks the wavefront on the host: camera rays, a single diffuse-less
// bounce rule and a constant radiance per hit
#[derive(Debug)]
pub struct SoftBackend {
    device: HostDevice,
    pub kernels: Option<shaders::KernelIr>,
    pub symbols: Option<backend::KernelSymbols>,
    pub publications: usize,
    meshes: Vec<Option<SoftMesh>>,
    children: Vec<backend::TopLevelChild>,
    pub geometry_builds: usize,
    pub top_level_builds: usize,
    pub launches: Vec<(Phase, u32)>,
    pub shades: Vec<backend::ShadeArgs>,
    pub finalized: Vec<backend::FinalizeArgs>,
    rays: Vec<Ray>,
    hits: Vec<Option<Hit>>,
    epsilon: f32,
    pub shut_down: bool,
}

impl SoftBackend {
    pub fn new(device: &HostDevice) -> Self {
        Self {
            device: device.clone(),
            kernels: None,
            symbols: None,
            publications: 0,
            meshes: Vec::new(),
            children: Vec::new(),
            geometry_builds: 0,
            top_level_builds: 0,
            launches: Vec::new(),
            shades: Vec::new(),
            finalized: Vec::new(),
            rays: Vec::new(),
            hits: Vec::new(),
            epsilon: 1e-4,
            shut_down: false,
        }
    }

    fn counters_ptr(&self) -> anyhow::Result<DevicePtr> {
        self.symbols
            .as_ref()
            .map(|symbols| symbols.counters)
            .filter(|ptr| !ptr.is_null())
            .ok_or_else(|| anyhow::anyhow!("counters were never published"))
    }

    fn counters(&self) -> anyhow::Result<geom::Counters> {
        let ptr = self.counters_ptr()?;

        self.device
            .read::<geom::Counters>(ptr)
            .and_then(|counters| counters.first().copied())
            .ok_or_else(|| anyhow::anyhow!("counters buffer is gone"))
    }

    fn store_counters(&self, counters: geom::Counters) -> anyhow::Result<()> {
        self.device.write(self.counters_ptr()?, 0, &[counters])
    }

    fn trace(&self, ray: &Ray) -> Option<Hit> {
        let mut closest: Option<Hit> = None;

        for child in &self.children {
            let Some(Some(mesh)) = self.meshes.get(child.mesh as usize) else { continue; };

            let inv = glam::Mat4::from_cols_array_2d(&child.inv_transform);
            let origin = inv.transform_point3(glam::Vec3::from(ray.origin)).to_array();
            let dir = inv.transform_vector3(glam::Vec3::from(ray.dir)).to_array();

            let reach = closest.map(|hit| hit.t).unwrap_or(f32::MAX);

            if let Some(hit) = mesh.bvh.intersect(&mesh.tris, origin, dir, self.epsilon, reach) {
                closest = Some(Hit {
                    inst: child.instance,
                    tri: hit.tri,
                    t: hit.t,
                    normal: mesh.tris[hit.tri as usize].normal,
                });
            }
        }

        closest
    }
}

impl backend::Backend for SoftBackend {
    type Device = HostDevice;

    fn device(&self) -> &HostDevice { &self.device }

    fn load_kernels(&mut self, ir: &shaders::KernelIr) -> anyhow::Result<()> {
        self.kernels = Some(ir.clone());

        Ok(())
    }

    fn build_geometry(
        &mut self,
        mesh: usize,
        input: &backend::GeometryInput<'_>,
    ) -> anyhow::Result<()> {
        let mut tris = self.device
            .read::<geom::CoreTri>(input.triangles)
            .ok_or_else(|| anyhow::anyhow!("mesh {} has no triangles on the device", mesh))?;

        tris.truncate(input.triangle_count as usize);

        let bvh = BvhData::new(self.epsilon, &tris);

        if self.meshes.len() <= mesh {
            self.meshes.resize_with(mesh + 1, || None);
        }

        self.meshes[mesh] = Some(SoftMesh { tris, bvh });
        self.geometry_builds += 1;

        Ok(())
    }

    fn build_top_level(&mut self, children: &[backend::TopLevelChild]) -> anyhow::Result<()> {
        self.children = children.to_vec();
        self.top_level_builds += 1;

        Ok(())
    }

    fn launch(&mut self, params: &backend::LaunchParams, count: u32) -> anyhow::Result<()> {
        self.launches.push((params.phase, count));
        self.epsilon = params.geometry_epsilon;

        match params.phase {
            Phase::Generate => {
                let [width, height, _] = params.scrsize;
                let pixels = width * height;

                let [x, y, z, _] = params.pos_lens_size;
                let pos = [x, y, z];

                self.rays = (0..count)
                    .map(|idx| {
                        let pixel = idx % pixels;

                        let u = ((pixel % width) as f32 + 0.5) / width as f32;
                        let v = ((pixel / width) as f32 + 0.5) / height as f32;

                        let target = params.p1
                            .add(params.right.scale(u))
                            .add(params.up.scale(v));

                        Ray {
                            origin: pos,
                            dir: target.sub(pos).normalize(),
                            pixel,
                            sample: idx / pixels,
                        }
                    })
                    .collect();
            },
            Phase::Extend => {
                if count as usize > self.rays.len() {
                    anyhow::bail!("extend launch of {} over {} queued rays", count, self.rays.len());
                }

                self.rays.truncate(count as usize);
            },
            Phase::Connect => return Ok(()),
        }

        self.hits = self.rays.iter().map(|ray| self.trace(ray)).collect();

        Ok(())
    }

    fn publish(&mut self, symbols: &backend::KernelSymbols) -> anyhow::Result<()> {
        self.symbols = Some(symbols.clone());
        self.publications += 1;

        Ok(())
    }

    fn init_counters_for_extend(&mut self, path_count: u32) -> anyhow::Result<()> {
        let mut counters = geom::Counters::default();

        counters.active_paths = path_count;
        counters.total_extension_rays = path_count;
        counters.probed_instid = geom::Counters::NO_HIT;
        counters.probed_triid = geom::Counters::NO_HIT;

        self.store_counters(counters)
    }

    fn init_counters_subsequent(&mut self) -> anyhow::Result<()> {
        let mut counters = self.counters()?;

        counters.total_extension_rays += counters.extension_rays;
        counters.active_paths = counters.extension_rays;
        counters.extension_rays = 0;

        self.store_counters(counters)
    }

    fn shade(&mut self, args: &backend::ShadeArgs) -> anyhow::Result<()> {
        self.shades.push(*args);

        let mut counters = self.counters()?;

        let mut accumulator = self.device
            .read::<[f32; 4]>(args.accumulator)
            .ok_or_else(|| anyhow::anyhow!("accumulator is gone"))?;

        let mut survivors = Vec::new();

        for (ray, hit) in self.rays.iter().zip(&self.hits).take(args.path_count as usize) {
            let probed = args.path_length == 1
                && ray.sample == 0
                && ray.pixel as i32 == args.probe_pixel;

            let Some(hit) = hit else { continue; };

            if probed {
                counters.probed_instid = hit.inst;
                counters.probed_triid = hit.tri;
                counters.probed_dist = hit.t;
            }

            accumulator[ray.pixel as usize][0] += HIT_RADIANCE;
            accumulator[ray.pixel as usize][3] += 1.;

            if args.path_length < 3 {
                let point = ray.origin.add(ray.dir.scale(hit.t));

                // Mirror bounce off the geometric normal
                let dir = ray.dir.sub(hit.normal.scale(2. * ray.dir.dot(hit.normal)));

                survivors.push(Ray { origin: point, dir, ..*ray });

                counters.extension_rays += 1;
                counters.shadow_rays += 1;
            }
        }

        self.rays = survivors;

        self.device.write(args.accumulator, 0, &accumulator)?;
        self.store_counters(counters)
    }

    fn finalize(
        &mut self,
        args: &backend::FinalizeArgs,
        surface: &BoundSurface<'_, HostDevice>,
    ) -> anyhow::Result<()> {
        self.finalized.push(*args);

        if !surface.surface().is_bound() {
            anyhow::bail!("finalize ran against an unbound surface");
        }

        let accumulator = self.device
            .read::<[f32; 4]>(args.accumulator)
            .ok_or_else(|| anyhow::anyhow!("accumulator is gone"))?;

        let mut image = surface.surface().texture.0.borrow_mut();

        for (pixel, out) in image.pixels.iter_mut().enumerate() {
            let radiance = accumulator[pixel][0] / args.spp.max(1) as f32;
            let value = ((radiance * args.brightness).powf(args.contrast).clamp(0., 1.) * 255.) as u32;

            *out = 0xff00_0000 | (value << 16) | (value << 8) | value;
        }

        Ok(())
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
        self.children.clear();
        self.meshes.clear();
    }
}

// Writes a minimal kernel unit into `dir` and points the config at it
pub fn config(dir: &path::Path) -> rt::Config {
    fs::write(dir.join("kernels.wgsl"), KERNELS).unwrap();
    fs::write(dir.join("common.wgsl"), "const PI: f32 = 3.14159;\n").unwrap();

    rt::Config {
        kernels: shaders::KernelSource {
            dir: dir.to_path_buf(),
            dependencies: vec![path::PathBuf::from("common.wgsl")],
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn core(dir: &path::Path) -> (HostDevice, rt::RenderCore<SoftBackend>) {
    core_with(dir, |_| ())
}

pub fn core_with<F>(dir: &path::Path, edit: F) -> (HostDevice, rt::RenderCore<SoftBackend>)
    where F: FnOnce(&mut rt::Config) {

    let device = HostDevice::new();

    let mut config = config(dir);
    edit(&mut config);

    let core = rt::RenderCore::init(SoftBackend::new(&device), config).unwrap();

    (device, core)
}

pub fn view(width: u32, height: u32) -> ViewPyramid {
    ViewPyramid::look_at([0., 0., 0.], [0., 0., -1.], std::f32::consts::FRAC_PI_2, (width, height))
}

// One triangle at z = -5, far wider than any test frustum
pub fn covering_triangle() -> geom::CoreTri {
    geom::CoreTri::new([[-100., -100., -5.], [100., -100., -5.], [0., 100., -5.]], 0)
}

pub fn add_covering_instance(core: &mut rt::RenderCore<SoftBackend>) {
    let tri = covering_triangle();
    let vertices = tri.vertices().map(|[x, y, z]| [x, y, z, 1.]);

    core.set_geometry(0, &vertices, &[tri], &[0]).unwrap();
    core.set_instance(0, 0, IDENTITY).unwrap();
    core.update_top_level();
}

pub fn accumulator(device: &HostDevice, core: &rt::RenderCore<SoftBackend>) -> Vec<[f32; 4]> {
    device.read::<[f32; 4]>(core.accumulator()).unwrap()
}

pub fn target(width: u32, height: u32) -> HostTexture {
    HostTexture::new(width, height)
}
