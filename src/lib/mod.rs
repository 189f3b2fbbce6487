pub mod backend;
pub mod bvh;
pub mod device;
pub mod error;
pub mod geom;
pub mod noise;
pub mod scene;
pub mod settings;
pub mod shaders;
pub mod state;

use std::{fs, path};

pub use error::CoreError;
pub use state::{Convergence, CoreStats, RenderCore};

// Driver configuration, read once at init.
// Every field has a default so partial JSON documents are fine
#[derive(Clone, Debug)]
#[derive(serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub kernels: shaders::KernelSource,
    // Directory holding `sobol.bin`, `scrambling.bin` and `ranking.bin`
    pub blue_noise: Option<path::PathBuf>,
    // Sizes the bounce loop, the connection buffer and the shade timers
    pub max_path_length: u32,
    pub clamp_value: f32,
    pub geometry_epsilon: f32,
    // Rewrite instance descriptors every frame, not only after changes
    pub republish_instances: bool,
}

impl Default for Config {
    fn default() -> Self {
        let settings::Settings { geometry_epsilon, clamp_value } = Default::default();

        Self {
            kernels: shaders::KernelSource::default(),
            blue_noise: None,
            max_path_length: 3,
            clamp_value,
            geometry_epsilon,
            republish_instances: true,
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(text)?;

        config.validate()?;

        Ok(config)
    }

    // Fields are public, so the driver re-checks whatever it is handed
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_path_length == 0 {
            anyhow::bail!("max_path_length must be at least 1");
        }

        Ok(())
    }

    pub fn load(path: &path::Path) -> anyhow::Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

// Installs the stderr logger the binaries share
#[cfg(not(target_arch = "wasm32"))]
pub fn init_logging(level: log::LevelFilter) -> anyhow::Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .init()?;

    Ok(())
}
