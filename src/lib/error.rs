use std::path;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("render called before a target was set")]
    NoTarget,
    #[error("buffer `{label}` has no {side} side")]
    Placement { label: &'static str, side: &'static str },
    #[error("{kind} {index} created out of order (expected index <= {count})")]
    OutOfOrder { kind: &'static str, index: usize, count: usize },
    #[error("instance {instance} refers to unknown mesh {mesh}")]
    UnknownMesh { instance: usize, mesh: usize },
    #[error("material {material} slot {slot} refers to unknown texture {texture}")]
    UnknownTexture { material: usize, slot: usize, texture: i32 },
    #[error("kernel cache {0:?} is corrupt")]
    CorruptKernelCache(path::PathBuf),
    #[error("kernel source has no entry point `{0}`")]
    MissingEntryPoint(&'static str),
    #[error("interop failure: {0}")]
    Interop(String),
    #[error("device readback failed: {0}")]
    Readback(String),
    #[error("blue-noise table `{table}` holds {len} entries, expected {expected}")]
    BlueNoiseSize { table: &'static str, len: usize, expected: usize },
}
