use rt::device::{Device, DeviceBuffer, Format, Interop};
use rt::device::gpu::WgpuDevice;
use rt::{noise, shaders};
use rt::state::wavefront::WavefrontState;

// Brings up the fastest GPU, sizes a wavefront for a 640x480 target and
// checks that uploads and readbacks survive the trip
fn main() -> anyhow::Result<()> {
    rt::init_logging(log::LevelFilter::Info)?;

    let device = pollster::block_on(WgpuDevice::new())?;

    let info = device.info();
    let arch = shaders::Architecture::from_capability(info.capability);

    let wavefront = WavefrontState::new(&device, 640 * 480, 1, 3)?;
    wavefront.accumulator.clear()?;

    let noise = noise::BlueNoise::generated();
    let blue_noise = DeviceBuffer::<u32, _>::interop(
        &device,
        noise::BlueNoise::LEN,
        Interop::new("blueNoise", Format::UnsignedInt),
        Some(noise.as_slice()),
    )?;

    let mut readback = DeviceBuffer::<u32, _>::new(
        &device,
        "readback",
        noise::BlueNoise::LEN,
        rt::device::Placement::Both,
    )?;

    readback.host_mut()?.copy_from_slice(noise.as_slice());
    readback.copy_to_device()?;
    readback.host_mut()?.fill(0);
    readback.copy_to_host()?;

    if readback.host()? != noise.as_slice() {
        anyhow::bail!("blue-noise tables did not survive the round trip");
    }

    log::info!("round trip of {} entries verified", readback.len());

    blue_noise.clear()?;

    let report = serde_json::json!({
        "device": info,
        "architecture": arch,
        "workgroup_size": arch.workgroup_size(),
        "wavefront": {
            "max_pixels": wavefront.max_pixels(),
            "path_states": wavefront.path_states.len(),
            "connections": wavefront.connections.len(),
        },
    });

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
