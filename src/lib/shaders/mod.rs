use std::{collections, fs, io, path};

use crate::error::CoreError;

// Every kernel the driver invokes must be present in the compiled unit
pub const ENTRY_POINTS: [&str; 5] = [
    "generate",
    "shade",
    "finalize",
    "init_counters_extend",
    "init_counters_subsequent",
];

// Kernel IR is cached per hardware generation
#[derive(Clone, Copy)]
#[derive(Debug, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum Architecture {
    Maxwell,
    Pascal,
    Turing,
}

impl Architecture {
    pub const ALL: [Self; 3] = [Self::Maxwell, Self::Pascal, Self::Turing];

    pub fn from_capability((major, _minor): (u32, u32)) -> Self {
        match major {
            0..=5 => Self::Maxwell,
            6 => Self::Pascal,
            _ => Self::Turing,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Maxwell => "maxwell",
            Self::Pascal => "pascal",
            Self::Turing => "turing",
        }
    }

    pub fn workgroup_size(self) -> u32 {
        match self {
            Self::Maxwell => 64,
            Self::Pascal => 128,
            Self::Turing => 256,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KernelIr {
    pub arch: Architecture,
    pub text: String,
}

// Where the single compilation unit lives and what it depends on.
// Paths are relative to `dir`
#[derive(Clone, Debug)]
#[derive(serde::Deserialize)]
#[serde(default)]
pub struct KernelSource {
    pub dir: path::PathBuf,
    pub main: path::PathBuf,
    pub dependencies: Vec<path::PathBuf>,
    pub stem: String,
}

impl Default for KernelSource {
    fn default() -> Self {
        Self {
            dir: path::PathBuf::from("kernels"),
            main: path::PathBuf::from("kernels.wgsl"),
            dependencies: Vec::new(),
            stem: String::from("kernels"),
        }
    }
}

impl KernelSource {
    pub fn cache_path(&self, arch: Architecture) -> path::PathBuf {
        self.dir.join(format!(".{}.{}.ir", self.stem, arch.name()))
    }

    pub fn inputs(&self) -> Vec<path::PathBuf> {
        std::iter::once(&self.main)
            .chain(self.dependencies.iter())
            .map(|input| self.dir.join(input))
            .collect()
    }
}

pub trait KernelCompiler {
    fn compile(&self, source: &KernelSource, arch: Architecture) -> anyhow::Result<String>;
}

// True when the cached artifact is missing or older than any input
pub fn needs_recompile(target: &path::Path, inputs: &[path::PathBuf]) -> bool {
    fn modified(path: &path::Path) -> Option<std::time::SystemTime> {
        fs::metadata(path).and_then(|meta| meta.modified()).ok()
    }

    let Some(built) = modified(target) else { return true; };

    inputs.iter().any(|input| match modified(input) {
        Some(changed) => changed > built,
        None => true,
    })
}

pub fn load_or_compile<C: KernelCompiler + ?Sized>(
    source: &KernelSource,
    arch: Architecture,
    compiler: &C,
) -> anyhow::Result<KernelIr> {
    let cache = source.cache_path(arch);

    if !needs_recompile(&cache, &source.inputs()) {
        match read_cache(&cache) {
            Ok(text) => return Ok(KernelIr { arch, text }),
            Err(e) => log::warn!("{}; recompiling", e),
        }
    }

    let text = compiler.compile(source, arch)?;

    write_cache(&cache, &text)?;

    log::info!("recompiled {:?} for {}", source.main, arch.name());

    Ok(KernelIr { arch, text })
}

// Layout: u32 little-endian byte length, then UTF-8 text
fn read_cache(cache: &path::Path) -> Result<String, CoreError> {
    let corrupt = || CoreError::CorruptKernelCache(cache.to_path_buf());

    let bytes = fs::read(cache).map_err(|_| corrupt())?;

    if bytes.len() < 4 {
        return Err(corrupt());
    }

    let (len, text) = bytes.split_at(4);
    let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;

    if len != text.len() {
        return Err(corrupt());
    }

    String::from_utf8(text.to_vec()).map_err(|_| corrupt())
}

fn write_cache(cache: &path::Path, text: &str) -> anyhow::Result<()> {
    let mut bytes = Vec::with_capacity(text.len() + 4);

    bytes.extend_from_slice(&(text.len() as u32).to_le_bytes());
    bytes.extend_from_slice(text.as_bytes());

    fs::write(cache, bytes)?;

    Ok(())
}

// Flattens `#include "file"` directives, specializes the workgroup size
// and checks that all entry points survived
#[derive(Clone, Copy, Debug, Default)]
pub struct Preprocessor;

impl Preprocessor {
    const WORKGROUP_SIZE: &'static str = "WORKGROUP_SIZE";

    fn flatten(
        dir: &path::Path,
        file: &path::Path,
        seen: &mut collections::HashSet<path::PathBuf>,
        out: &mut String,
    ) -> anyhow::Result<()> {
        let path = dir.join(file);

        // Each file lands in the unit once
        if !seen.insert(path.clone()) {
            return Ok(());
        }

        let text = fs::read_to_string(&path).map_err(|e| {
            io::Error::new(e.kind(), format!("{}: {}", path.display(), e))
        })?;

        for line in text.lines() {
            let include = line
                .trim()
                .strip_prefix("#include")
                .map(|rest| rest.trim().trim_matches('"'));

            match include {
                Some(include) if !include.is_empty() => {
                    Self::flatten(dir, path::Path::new(include), seen, out)?;
                },
                _ => {
                    out.push_str(line);
                    out.push('\n');
                },
            }
        }

        Ok(())
    }
}

impl KernelCompiler for Preprocessor {
    fn compile(&self, source: &KernelSource, arch: Architecture) -> anyhow::Result<String> {
        let mut unit = String::new();

        Self::flatten(&source.dir, &source.main, &mut collections::HashSet::new(), &mut unit)?;

        let unit = unit.replace(
            Self::WORKGROUP_SIZE,
            &arch.workgroup_size().to_string(),
        );

        for entry in ENTRY_POINTS {
            if !unit.contains(&format!("fn {}(", entry)) {
                return Err(CoreError::MissingEntryPoint(entry).into());
            }
        }

        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN: &str = "\
        #include \"common.wgsl\"
        @compute @workgroup_size(WORKGROUP_SIZE)
        fn generate() {}
        fn shade() {}
        fn finalize() {}
        fn init_counters_extend() {}
        fn init_counters_subsequent() {}
    ";

    fn source(dir: &path::Path) -> KernelSource {
        fs::write(dir.join("kernels.wgsl"), MAIN).unwrap();
        fs::write(dir.join("common.wgsl"), "#include \"kernels.wgsl\"\nconst PI = 3.14;").unwrap();

        KernelSource {
            dir: dir.to_path_buf(),
            dependencies: vec![path::PathBuf::from("common.wgsl")],
            ..Default::default()
        }
    }

    #[test]
    fn capability_maps_to_architecture() {
        assert_eq!(Architecture::from_capability((5, 2)), Architecture::Maxwell);
        assert_eq!(Architecture::from_capability((6, 1)), Architecture::Pascal);
        assert_eq!(Architecture::from_capability((7, 5)), Architecture::Turing);
        assert_eq!(Architecture::from_capability((8, 6)), Architecture::Turing);
    }

    #[test]
    fn preprocessor_flattens_and_specializes() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(dir.path());

        let unit = Preprocessor.compile(&source, Architecture::Pascal).unwrap();

        assert!(unit.contains("const PI = 3.14;"));
        assert!(unit.contains("@workgroup_size(128)"));
        assert!(!unit.contains("#include"));
        assert_eq!(unit.matches("fn generate(").count(), 1);
    }

    #[test]
    fn missing_entry_point_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(dir.path());

        fs::write(dir.path().join("kernels.wgsl"), "fn generate() {}").unwrap();

        let err = Preprocessor.compile(&source, Architecture::Turing).unwrap_err();
        assert!(matches!(err.downcast_ref(), Some(CoreError::MissingEntryPoint("shade"))));
    }

    #[test]
    fn cache_is_reused_until_an_input_changes() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(dir.path());

        let first = load_or_compile(&source, Architecture::Turing, &Preprocessor).unwrap();
        let cache = source.cache_path(Architecture::Turing);
        assert!(cache.ends_with(".kernels.turing.ir"));

        // A hand-edited cache proves the second load never recompiled
        write_cache(&cache, "cached").unwrap();
        let second = load_or_compile(&source, Architecture::Turing, &Preprocessor).unwrap();
        assert_eq!(second.text, "cached");

        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(dir.path().join("common.wgsl"))
            .unwrap()
            .set_modified(later)
            .unwrap();

        let third = load_or_compile(&source, Architecture::Turing, &Preprocessor).unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn corrupt_cache_recompiles() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(dir.path());

        let cache = source.cache_path(Architecture::Maxwell);
        load_or_compile(&source, Architecture::Maxwell, &Preprocessor).unwrap();

        fs::write(&cache, [200, 0, 0, 0, b'x']).unwrap();
        assert!(read_cache(&cache).is_err());

        let ir = load_or_compile(&source, Architecture::Maxwell, &Preprocessor).unwrap();
        assert!(ir.text.contains("@workgroup_size(64)"));
        assert_eq!(read_cache(&cache).unwrap(), ir.text);
    }
}
