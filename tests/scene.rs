mod common;

use rt::device::DevicePtr;
use rt::geom::{self, light, V3Ops as _};
use rt::Convergence;

#[test]
fn materials_follow_texture_layout() {
    let dir = tempfile::tempdir().unwrap();
    let (device, mut core) = common::core(dir.path());

    let big = vec![0u32; 2000];
    let tail = vec![0u32; 345];
    let seventh = vec![0xffu32; 16];
    let normals = vec![0u32; 64];

    // Textures 0 to 6 pad the argb32 atlas out to 12,345 texels
    let mut descs = (0..6)
        .map(|_| geom::TextureDesc { width: 40, height: 50, texels: geom::Texels::Argb32(&big) })
        .collect::<Vec<_>>();

    descs.push(geom::TextureDesc { width: 345, height: 1, texels: geom::Texels::Argb32(&tail) });
    descs.push(geom::TextureDesc { width: 4, height: 4, texels: geom::Texels::Argb32(&seventh) });
    descs.push(geom::TextureDesc { width: 8, height: 8, texels: geom::Texels::Nrm32(&normals) });

    core.set_textures(&descs).unwrap();
    assert_eq!(core.scene().texture_entries()[7].first_pixel, 12_345);

    let mut ex = geom::MaterialEx::default();
    ex.texture[0] = 7;
    ex.texture[3] = 8;

    core.set_materials(&[geom::Material::new([0.8; 3])], &[ex]).unwrap();

    let material = core.scene().materials().unwrap()[0];
    assert_eq!(material.texaddr0, 12_345);
    assert_eq!(material.nmapaddr0, 0);
    assert_eq!(material.texaddr1, 0);

    let symbols = core.backend().symbols.clone().unwrap();
    let published = device.read::<geom::Material>(symbols.materials).unwrap();
    assert_eq!(published[0].texaddr0, 12_345);

    assert_eq!(core.stats().argb32_texel_count, 12_345 + 16);
    assert_eq!(core.stats().nrm32_texel_count, 64);
}

#[test]
fn atlases_are_never_empty() {
    let dir = tempfile::tempdir().unwrap();
    let (device, mut core) = common::core(dir.path());

    let atlas_lens = |core: &rt::RenderCore<common::SoftBackend>| {
        let symbols = core.backend().symbols.clone().unwrap();

        [
            device.read::<u32>(symbols.argb32_pixels).unwrap().len(),
            device.read::<[f32; 4]>(symbols.argb128_pixels).unwrap().len(),
            device.read::<u32>(symbols.nrm32_pixels).unwrap().len(),
        ]
    };

    assert!(atlas_lens(&core).iter().all(|&len| len >= 16));

    let texels = [7u32; 4];
    core.set_textures(&[geom::TextureDesc { width: 2, height: 2, texels: geom::Texels::Argb32(&texels) }]).unwrap();

    assert!(atlas_lens(&core).iter().all(|&len| len >= 16));

    let symbols = core.backend().symbols.clone().unwrap();
    assert_eq!(&device.read::<u32>(symbols.argb32_pixels).unwrap()[..4], &texels);
}

#[test]
fn instance_changes_rebuild_top_level() {
    let dir = tempfile::tempdir().unwrap();
    let (_device, mut core) = common::core(dir.path());

    common::add_covering_instance(&mut core);
    assert!(core.scene().top_level_dirty());

    core.set_target(common::target(2, 2), 1).unwrap();

    let view = common::view(2, 2);
    core.render(&view, Convergence::Restart, 1., 1.).unwrap();

    assert!(!core.scene().top_level_dirty());
    assert_eq!(core.backend().top_level_builds, 1);
    assert_eq!(core.backend().geometry_builds, 1);

    // Static frames reuse both levels
    core.render(&view, Convergence::Converge, 1., 1.).unwrap();
    assert_eq!(core.backend().top_level_builds, 1);

    let mut pushed = common::IDENTITY;
    pushed[3] = [0., 0., -3., 1.];

    core.set_instance(0, 0, pushed).unwrap();
    assert!(core.scene().top_level_dirty());

    core.set_probe_pos(0, 0);
    core.render(&view, Convergence::Restart, 1., 1.).unwrap();

    assert!(!core.scene().top_level_dirty());
    assert_eq!(core.backend().top_level_builds, 2);
    assert_eq!(core.backend().geometry_builds, 1);

    // The instance now sits at z = -8
    let expected = view.screen_point(0.25, 0.25).mag() * 8.;
    assert!((core.stats().probed_dist - expected).abs() < 1e-3);
}

#[test]
fn geometry_update_rebuilds_mesh_and_top_level() {
    let dir = tempfile::tempdir().unwrap();
    let (device, mut core) = common::core(dir.path());

    common::add_covering_instance(&mut core);
    core.set_target(common::target(2, 2), 1).unwrap();
    core.set_probe_pos(1, 1);

    let view = common::view(2, 2);

    core.render(&view, Convergence::Restart, 1., 1.).unwrap();

    let first = (core.stats().clone(), common::accumulator(&device, &core));

    let tri = common::covering_triangle();
    let vertices = tri.vertices().map(|[x, y, z]| [x, y, z, 1.]);
    core.set_geometry(0, &vertices, &[tri], &[0]).unwrap();

    core.render(&view, Convergence::Restart, 1., 1.).unwrap();

    assert_eq!(core.backend().geometry_builds, 2);
    assert_eq!(core.backend().top_level_builds, 2);

    let (stats, acc) = first;
    assert_eq!(core.stats().probed_triid, stats.probed_triid);
    assert_eq!(core.stats().probed_dist, stats.probed_dist);
    assert_eq!(common::accumulator(&device, &core), acc);
}

#[test]
fn descriptor_capacity_only_grows() {
    let dir = tempfile::tempdir().unwrap();
    let (device, mut core) = common::core(dir.path());

    common::add_covering_instance(&mut core);
    core.set_target(common::target(1, 1), 1).unwrap();

    let view = common::view(1, 1);
    let mut capacities = Vec::new();

    for count in [1, 3, 4, 7] {
        for inst in core.scene().instance_count()..count {
            core.set_instance(inst, 0, common::IDENTITY).unwrap();
        }

        core.update_top_level();
        core.render(&view, Convergence::Restart, 1., 1.).unwrap();

        capacities.push(core.scene().descriptor_capacity());
    }

    assert_eq!(capacities, vec![2, 6, 6, 14]);

    let symbols = core.backend().symbols.clone().unwrap();
    let descs = device.read::<geom::InstanceDesc>(symbols.instance_descriptors).unwrap();

    assert_eq!(descs.len(), 14);
    assert!(descs[..7].iter().all(|desc| !desc.triangles.is_null()));
    assert_eq!(descs[6].inv_transform, common::IDENTITY);
}

// Overwrites the published descriptors, renders an unchanged scene and
// reports whether the descriptors were written again
fn descriptors_rewritten(republish: bool) -> bool {
    let dir = tempfile::tempdir().unwrap();
    let (device, mut core) = common::core_with(dir.path(), |config| {
        config.republish_instances = republish;
    });

    common::add_covering_instance(&mut core);
    core.set_target(common::target(2, 2), 1).unwrap();

    let view = common::view(2, 2);
    core.render(&view, Convergence::Restart, 1., 1.).unwrap();

    let symbols = core.backend().symbols.clone().unwrap();
    let stale = geom::InstanceDesc { triangles: DevicePtr::NULL, inv_transform: [[0.; 4]; 4] };

    device.write(symbols.instance_descriptors, 0, &[stale]).unwrap();

    let publications = core.backend().publications;
    core.render(&view, Convergence::Converge, 1., 1.).unwrap();

    // Rewriting in place leaves the published addresses alone
    assert_eq!(core.backend().publications, publications);

    let descs = device.read::<geom::InstanceDesc>(symbols.instance_descriptors).unwrap();
    let rewritten = descs[0] != stale;

    if rewritten {
        assert_eq!(descs[0].inv_transform, common::IDENTITY);
        assert!(!descs[0].triangles.is_null());
    }

    rewritten
}

#[test]
fn unchanged_instances_republish_by_default() {
    assert!(rt::Config::default().republish_instances);
    assert!(descriptors_rewritten(true));
}

#[test]
fn unchanged_instances_skip_upload_when_disabled() {
    assert!(!descriptors_rewritten(false));
}

#[test]
fn lights_and_sky_are_published() {
    let dir = tempfile::tempdir().unwrap();
    let (device, mut core) = common::core(dir.path());

    let point = [light::PointLight::new([0., 4., 0.], [10.; 3])];
    let directional = [
        light::DirectionalLight::new([0., -1., 0.], [1.; 3]),
        light::DirectionalLight::new([1., -1., 0.], [0.5; 3]),
    ];

    core.set_lights(&light::LightSet {
        point: &point,
        directional: &directional,
        ..Default::default()
    }).unwrap();

    let sky = vec![[0.2f32, 0.3, 0.9]; 8];
    core.set_sky_data(&sky, 4, 2).unwrap();

    let symbols = core.backend().symbols.clone().unwrap();
    assert_eq!(symbols.light_counts, [0, 1, 0, 2]);
    assert_eq!(symbols.sky_size, [4, 2]);
    assert_eq!(device.read::<[f32; 3]>(symbols.sky_pixels).unwrap(), sky);

    let published = device.read::<light::PointLight>(symbols.point_lights).unwrap();
    assert_eq!(published[0].position, [0., 4., 0.]);

    assert!(core.set_sky_data(&sky, 3, 3).is_err());
}

#[test]
fn out_of_order_creation_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_device, mut core) = common::core(dir.path());

    let tri = common::covering_triangle();

    assert!(core.set_geometry(1, &[], &[tri], &[]).is_err());
    assert_eq!(core.scene().mesh_count(), 0);

    core.set_geometry(0, &[], &[tri], &[]).unwrap();

    assert!(core.set_instance(1, 0, common::IDENTITY).is_err());
    assert!(core.set_instance(0, 1, common::IDENTITY).is_err());
    assert_eq!(core.scene().instance_count(), 0);
}

#[test]
fn settings_republish_only_on_change() {
    let dir = tempfile::tempdir().unwrap();
    let (_device, mut core) = common::core(dir.path());

    let published = core.backend().publications;

    core.setting("clampValue", 4.).unwrap();
    core.setting("clampValue", 4.).unwrap();
    assert_eq!(core.backend().publications, published + 1);
    assert_eq!(core.settings().clamp_value, 4.);

    core.setting("gamma", 2.2).unwrap();
    assert_eq!(core.backend().publications, published + 1);

    core.setting("epsilon", 1e-3).unwrap();

    let symbols = core.backend().symbols.clone().unwrap();
    assert_eq!(symbols.clamp_value, 4.);
    assert_eq!(symbols.geometry_epsilon, 1e-3);
}

#[test]
fn clamp_value_defaults_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let (_device, core) = common::core(dir.path());

    let symbols = core.backend().symbols.clone().unwrap();

    assert_eq!(symbols.clamp_value, 10.);
    assert!(!symbols.counters.is_null());
}
