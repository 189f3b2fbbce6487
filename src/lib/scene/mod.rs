pub mod accel;
pub mod camera;
pub mod mesh;
pub mod textures;

use crate::backend;
use crate::device::{Device, DeviceBuffer, DevicePtr, Placement};
use crate::error::CoreError;
use crate::geom;
use crate::geom::light;

#[derive(Clone, Copy)]
#[derive(Debug, PartialEq)]
pub struct Instance {
    pub mesh: usize,
    pub transform: [[f32; 4]; 4],
    pub inv_transform: [[f32; 4]; 4],
    // Mesh structure version this instance's geometry group was built against
    observed: Option<u64>,
}

impl Instance {
    // Transforms are column-major, as glam lays them out
    fn new(mesh: usize, transform: [[f32; 4]; 4]) -> Self {
        let inv_transform = glam::Mat4::from_cols_array_2d(&transform)
            .inverse()
            .to_cols_array_2d();

        Self { mesh, transform, inv_transform, observed: None }
    }
}

#[derive(Debug)]
struct LightBuffers<D: Device> {
    area: DeviceBuffer<light::AreaLight, D>,
    point: DeviceBuffer<light::PointLight, D>,
    spot: DeviceBuffer<light::SpotLight, D>,
    directional: DeviceBuffer<light::DirectionalLight, D>,
}

#[derive(Debug)]
struct Sky<D: Device> {
    pixels: DeviceBuffer<[f32; 3], D>,
    width: u32,
    height: u32,
}

// Device-side mirror of the host renderer's scene.
// Everything is index-addressed; new meshes and instances arrive in order
#[derive(Debug)]
pub struct SceneMirror<D: Device> {
    device: D,
    meshes: Vec<mesh::Mesh<D>>,
    instances: Vec<Instance>,
    // Instance indices attached to the top-level structure
    children: Vec<usize>,
    top_level: accel::Acceleration,
    instances_dirty: bool,
    descriptors: Option<DeviceBuffer<geom::InstanceDesc, D>>,
    atlases: textures::Atlases<D>,
    materials: Option<DeviceBuffer<geom::Material, D>>,
    material_layout: u64,
    lights: Option<LightBuffers<D>>,
    light_counts: [u32; 4],
    sky: Option<Sky<D>>,
}

impl<D: Device> SceneMirror<D> {
    pub fn new(device: &D) -> anyhow::Result<Self> {
        Ok(Self {
            device: device.clone(),
            meshes: Vec::new(),
            instances: Vec::new(),
            children: Vec::new(),
            top_level: accel::Acceleration::default(),
            instances_dirty: true,
            descriptors: None,
            atlases: textures::Atlases::new(device)?,
            materials: None,
            material_layout: 0,
            lights: None,
            light_counts: [0; 4],
            sky: None,
        })
    }

    pub fn set_geometry(
        &mut self,
        mesh_idx: usize,
        vertices: &[[f32; 4]],
        triangles: &[geom::CoreTri],
        alpha_flags: &[u32],
    ) -> anyhow::Result<()> {
        let Self { device, meshes, .. } = self;

        match mesh_idx.cmp(&meshes.len()) {
            std::cmp::Ordering::Less => {
                meshes[mesh_idx].update(device, vertices, triangles, alpha_flags)?;
            },
            std::cmp::Ordering::Equal => {
                meshes.push(mesh::Mesh::new(device, vertices, triangles, alpha_flags)?);
            },
            std::cmp::Ordering::Greater => {
                return Err(CoreError::OutOfOrder {
                    kind: "mesh",
                    index: mesh_idx,
                    count: meshes.len(),
                }.into());
            },
        }

        // Triangle addresses may have moved
        self.instances_dirty = true;

        Ok(())
    }

    pub fn set_instance(
        &mut self,
        inst_idx: usize,
        mesh_idx: usize,
        transform: [[f32; 4]; 4],
    ) -> anyhow::Result<()> {
        if mesh_idx >= self.meshes.len() {
            return Err(CoreError::UnknownMesh { instance: inst_idx, mesh: mesh_idx }.into());
        }

        let instance = Instance::new(mesh_idx, transform);

        let Self { instances, .. } = self;

        match inst_idx.cmp(&instances.len()) {
            std::cmp::Ordering::Less => {
                let existing = &mut instances[inst_idx];
                let observed = if existing.mesh == mesh_idx { existing.observed } else { None };

                *existing = Instance { observed, ..instance };
            },
            std::cmp::Ordering::Equal => instances.push(instance),
            std::cmp::Ordering::Greater => {
                return Err(CoreError::OutOfOrder {
                    kind: "instance",
                    index: inst_idx,
                    count: instances.len(),
                }.into());
            },
        }

        self.top_level.mark_dirty();
        self.instances_dirty = true;

        Ok(())
    }

    // Re-attaches every instance to the top level in index order
    pub fn update_top_level(&mut self) {
        let count = self.instances.len();

        let attached = self.children.len() == count && self.children
            .iter()
            .enumerate()
            .all(|(idx, &child)| idx == child);

        if !attached {
            self.children.clear();
            self.children.extend(0..count);

            self.top_level.mark_dirty();
        }
    }

    pub fn set_textures(&mut self, descs: &[geom::TextureDesc<'_>]) -> anyhow::Result<()> {
        let Self { device, atlases, .. } = self;

        atlases.set(device, descs)
    }

    pub fn set_materials(
        &mut self,
        materials: &[geom::Material],
        extras: &[geom::MaterialEx],
    ) -> anyhow::Result<()> {
        if materials.len() != extras.len() {
            anyhow::bail!("{} materials but {} material extras", materials.len(), extras.len());
        }

        let entries = self.atlases.entries();

        let mut patched = materials.to_vec();
        for (material, (mat, ex)) in patched.iter_mut().zip(extras).enumerate() {
            for (slot, &texture) in ex.texture.iter().enumerate() {
                if texture == geom::MaterialEx::NONE {
                    continue;
                }

                let entry = usize::try_from(texture)
                    .ok()
                    .and_then(|texture| entries.get(texture))
                    .ok_or(CoreError::UnknownTexture { material, slot, texture })?;

                if let Some(addr) = mat.texture_addr_mut(slot) {
                    *addr = entry.first_pixel;
                }
            }
        }

        // Kept on the host too, for alpha-mapped triangles
        self.materials = Some(DeviceBuffer::from_slice(
            &self.device,
            "materials",
            Placement::Both,
            &patched,
        )?);

        self.material_layout = self.atlases.layout();

        Ok(())
    }

    pub fn set_lights(&mut self, lights: &light::LightSet<'_>) -> anyhow::Result<()> {
        let device = &self.device;

        let buffers = LightBuffers {
            area: DeviceBuffer::from_slice(device, "areaLights", Placement::Device, lights.area)?,
            point: DeviceBuffer::from_slice(device, "pointLights", Placement::Device, lights.point)?,
            spot: DeviceBuffer::from_slice(device, "spotLights", Placement::Device, lights.spot)?,
            directional: DeviceBuffer::from_slice(
                device,
                "directionalLights",
                Placement::Device,
                lights.directional,
            )?,
        };

        // Swapped in together so no frame sees a partial set
        self.lights = Some(buffers);
        self.light_counts = lights.counts();

        Ok(())
    }

    pub fn set_sky_data(&mut self, pixels: &[[f32; 3]], width: u32, height: u32) -> anyhow::Result<()> {
        if pixels.len() != (width * height) as usize {
            anyhow::bail!("sky of {}x{} needs {} pixels, got {}", width, height, width * height, pixels.len());
        }

        self.sky = Some(Sky {
            pixels: DeviceBuffer::from_slice(&self.device, "skyPixels", Placement::Device, pixels)?,
            width,
            height,
        });

        Ok(())
    }

    // Republishes the per-instance descriptors when instances changed or
    // when `force` is set. Returns whether the device array was rewritten
    pub fn sync_instance_descriptors(&mut self, force: bool) -> anyhow::Result<bool> {
        if !(self.instances_dirty || force) || self.instances.is_empty() {
            return Ok(false);
        }

        let descs = self.instances
            .iter()
            .map(|Instance { mesh, inv_transform, .. }| geom::InstanceDesc {
                triangles: self.meshes[*mesh].triangles.dev_ptr(),
                inv_transform: *inv_transform,
            })
            .collect::<Vec<_>>();

        let fits = self.descriptors
            .as_ref()
            .is_some_and(|buffer| buffer.len() >= descs.len());

        if !fits {
            let capacity = descs.len() * 2;

            log::debug!("instance descriptors grow to {}", capacity);

            self.descriptors = Some(DeviceBuffer::new(
                &self.device,
                "instanceDescriptors",
                capacity,
                Placement::Device,
            )?);
        }

        if let Some(buffer) = &self.descriptors {
            buffer.upload(&descs)?;
        }

        self.instances_dirty = false;

        Ok(true)
    }

    // Rebuilds whatever structures went stale, bottom-up: meshes first,
    // then the top level if any instance observes a newer mesh build
    pub fn prepare_traversal<B>(&mut self, backend: &mut B) -> anyhow::Result<()>
        where B: backend::Backend<Device = D> {

        let Self { meshes, instances, children, top_level, .. } = self;

        for (idx, mesh) in meshes.iter_mut().enumerate() {
            if mesh.accel.is_dirty() {
                backend.build_geometry(idx, &mesh.geometry_input())?;

                mesh.accel.mark_built();
            }
        }

        for instance in instances.iter_mut() {
            let version = meshes[instance.mesh].accel.version();

            if instance.observed != Some(version) {
                instance.observed = Some(version);

                top_level.mark_dirty();
            }
        }

        if top_level.is_dirty() {
            let attached = children
                .iter()
                .filter_map(|&child| instances.get(child).map(|inst| (child, inst)))
                .map(|(child, inst)| backend::TopLevelChild {
                    instance: child as u32,
                    mesh: inst.mesh as u32,
                    transform: inst.transform,
                    inv_transform: inst.inv_transform,
                })
                .collect::<Vec<_>>();

            log::trace!("rebuilding top level over {} instances", attached.len());

            backend.build_top_level(&attached)?;

            top_level.mark_built();
        }

        Ok(())
    }

    // Fills the scene's share of the kernel symbol snapshot
    pub fn fill_symbols(&self, symbols: &mut backend::KernelSymbols) {
        fn ptr<T: bytemuck::Pod, D: Device>(buffer: Option<&DeviceBuffer<T, D>>) -> DevicePtr {
            buffer.map(DeviceBuffer::dev_ptr).unwrap_or(DevicePtr::NULL)
        }

        let [argb32, argb128, nrm32] = self.atlases.pointers();

        symbols.instance_descriptors = ptr(self.descriptors.as_ref());
        symbols.materials = ptr(self.materials.as_ref());

        symbols.area_lights = ptr(self.lights.as_ref().map(|l| &l.area));
        symbols.point_lights = ptr(self.lights.as_ref().map(|l| &l.point));
        symbols.spot_lights = ptr(self.lights.as_ref().map(|l| &l.spot));
        symbols.directional_lights = ptr(self.lights.as_ref().map(|l| &l.directional));
        symbols.light_counts = self.light_counts;

        symbols.argb32_pixels = argb32;
        symbols.argb128_pixels = argb128;
        symbols.nrm32_pixels = nrm32;

        symbols.sky_pixels = ptr(self.sky.as_ref().map(|s| &s.pixels));
        symbols.sky_size = self.sky
            .as_ref()
            .map(|Sky { width, height, .. }| [*width, *height])
            .unwrap_or_default();
    }

    // True when materials were published against an older texture layout
    pub fn materials_stale(&self) -> bool {
        self.materials.is_some() && self.material_layout != self.atlases.layout()
    }

    pub fn mesh_count(&self) -> usize { self.meshes.len() }

    pub fn instance_count(&self) -> usize { self.instances.len() }

    pub fn instances(&self) -> &[Instance] { &self.instances }

    pub fn top_level_dirty(&self) -> bool { self.top_level.is_dirty() }

    pub fn descriptor_capacity(&self) -> usize {
        self.descriptors.as_ref().map(DeviceBuffer::len).unwrap_or(0)
    }

    pub fn texture_entries(&self) -> &[geom::TexEntry] { self.atlases.entries() }

    pub fn texel_counts(&self) -> [u32; 3] { self.atlases.texel_counts() }

    pub fn materials(&self) -> anyhow::Result<&[geom::Material]> {
        match &self.materials {
            Some(buffer) => buffer.host(),
            None => Ok(&[]),
        }
    }
}
