//! Ray tracing shader stages for the segtrace query engine.
//!
//! Stages are loaded as precompiled SPIR-V from a directory at startup. With the
//! `embedded` feature, the GLSL sources under `shaders/` are compiled at build time
//! using shaderc and can be used without any files on disk.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use segtrace_core::EntryPoints;
use thiserror::Error;

/// SPIR-V magic number, in the module's own word order.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader loading errors.
#[derive(Error, Debug)]
pub enum ShaderError {
    /// A stage file could not be read.
    #[error("Failed to read shader {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The bytecode length is not a whole number of words.
    #[error("Shader {name} is {len} bytes, not a multiple of 4")]
    Misaligned { name: String, len: usize },

    /// The bytecode does not start with the SPIR-V magic number.
    #[error("Shader {name} is not SPIR-V (magic {found:#010x})")]
    BadMagic { name: String, found: u32 },

    /// The entry point name cannot be passed to Vulkan.
    #[error("Invalid entry point {entry:?} for shader {name}")]
    InvalidEntryPoint { name: String, entry: String },
}

/// The five ray tracing stages of the intersection pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    RayGeneration,
    Miss,
    Intersection,
    AnyHit,
    ClosestHit,
}

impl StageKind {
    /// All stages, in pipeline stage order.
    pub const ALL: [Self; 5] = [
        Self::RayGeneration,
        Self::Miss,
        Self::Intersection,
        Self::AnyHit,
        Self::ClosestHit,
    ];

    /// File name of the precompiled stage inside a shader directory.
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::RayGeneration => "raygen.spv",
            Self::Miss => "miss.spv",
            Self::Intersection => "isect.spv",
            Self::AnyHit => "ahit.spv",
            Self::ClosestHit => "chit.spv",
        }
    }

    fn entry_point(self, entry_points: &EntryPoints) -> &str {
        match self {
            Self::RayGeneration => &entry_points.raygen,
            Self::Miss => &entry_points.miss,
            Self::Intersection => &entry_points.intersection,
            Self::AnyHit => &entry_points.any_hit,
            Self::ClosestHit => &entry_points.closest_hit,
        }
    }
}

/// Convert bytes to SPIR-V words, validating size and magic number.
///
/// Modules written in the opposite byte order are swapped to host order.
pub fn bytes_to_spirv(name: &str, bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    if bytes.len() % 4 != 0 {
        return Err(ShaderError::Misaligned {
            name: name.to_string(),
            len: bytes.len(),
        });
    }

    let mut words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    match words.first().copied() {
        Some(SPIRV_MAGIC) => Ok(words),
        Some(word) if word.swap_bytes() == SPIRV_MAGIC => {
            words.iter_mut().for_each(|w| *w = w.swap_bytes());
            Ok(words)
        }
        found => Err(ShaderError::BadMagic {
            name: name.to_string(),
            found: found.unwrap_or(0),
        }),
    }
}

/// One stage's bytecode and entry point.
#[derive(Debug, Clone)]
pub struct ShaderStage {
    pub code: Vec<u32>,
    pub entry: CString,
}

impl ShaderStage {
    /// Validate raw bytecode and pair it with its entry point.
    pub fn from_bytes(name: &str, bytes: &[u8], entry: &str) -> Result<Self, ShaderError> {
        let code = bytes_to_spirv(name, bytes)?;
        let entry = CString::new(entry).map_err(|_| ShaderError::InvalidEntryPoint {
            name: name.to_string(),
            entry: entry.to_string(),
        })?;
        Ok(Self { code, entry })
    }
}

/// All stages the intersection pipeline is built from.
#[derive(Debug, Clone)]
pub struct ShaderSet {
    pub raygen: ShaderStage,
    pub miss: ShaderStage,
    pub intersection: ShaderStage,
    pub any_hit: ShaderStage,
    pub closest_hit: ShaderStage,
}

impl ShaderSet {
    /// Load `raygen.spv`, `miss.spv`, `isect.spv`, `ahit.spv`, and `chit.spv` from `dir`.
    pub fn load_dir(dir: impl AsRef<Path>, entry_points: &EntryPoints) -> Result<Self, ShaderError> {
        let dir = dir.as_ref();
        let load = |kind: StageKind| -> Result<ShaderStage, ShaderError> {
            let path = dir.join(kind.file_name());
            let bytes = std::fs::read(&path).map_err(|source| ShaderError::Io {
                path: path.clone(),
                source,
            })?;
            tracing::debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
            ShaderStage::from_bytes(kind.file_name(), &bytes, kind.entry_point(entry_points))
        };

        Ok(Self {
            raygen: load(StageKind::RayGeneration)?,
            miss: load(StageKind::Miss)?,
            intersection: load(StageKind::Intersection)?,
            any_hit: load(StageKind::AnyHit)?,
            closest_hit: load(StageKind::ClosestHit)?,
        })
    }

    /// The stages compiled from the bundled GLSL sources.
    #[cfg(feature = "embedded")]
    pub fn embedded() -> Result<Self, ShaderError> {
        let entry_points = EntryPoints::default();
        let stage = |kind: StageKind, bytes: &[u8]| {
            ShaderStage::from_bytes(kind.file_name(), bytes, kind.entry_point(&entry_points))
        };

        Ok(Self {
            raygen: stage(StageKind::RayGeneration, spirv_bytes::RAYGEN)?,
            miss: stage(StageKind::Miss, spirv_bytes::MISS)?,
            intersection: stage(StageKind::Intersection, spirv_bytes::INTERSECTION)?,
            any_hit: stage(StageKind::AnyHit, spirv_bytes::ANY_HIT)?,
            closest_hit: stage(StageKind::ClosestHit, spirv_bytes::CLOSEST_HIT)?,
        })
    }

    /// Get a stage by kind.
    pub fn stage(&self, kind: StageKind) -> &ShaderStage {
        match kind {
            StageKind::RayGeneration => &self.raygen,
            StageKind::Miss => &self.miss,
            StageKind::Intersection => &self.intersection,
            StageKind::AnyHit => &self.any_hit,
            StageKind::ClosestHit => &self.closest_hit,
        }
    }
}

/// Embedded SPIR-V shader bytecode (raw bytes, may not be aligned).
#[cfg(feature = "embedded")]
mod spirv_bytes {
    pub static RAYGEN: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/raygen.spv"));
    pub static MISS: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/miss.spv"));
    pub static INTERSECTION: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/isect.spv"));
    pub static ANY_HIT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/ahit.spv"));
    pub static CLOSEST_HIT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/chit.spv"));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// Header-only module: magic, version 1.6, generator, bound, schema.
    fn minimal_module() -> Vec<u8> {
        module_bytes(&[SPIRV_MAGIC, 0x0001_0600, 0, 1, 0])
    }

    fn write_stages(dir: &Path, bytes: &[u8]) {
        for kind in StageKind::ALL {
            std::fs::write(dir.join(kind.file_name()), bytes).unwrap();
        }
    }

    #[test]
    fn converts_words() {
        let words = bytes_to_spirv("test", &minimal_module()).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0600, 0, 1, 0]);
    }

    #[test]
    fn swaps_foreign_byte_order() {
        let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0600]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        let words = bytes_to_spirv("test", &bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0600]);
    }

    #[test]
    fn rejects_misaligned() {
        let mut bytes = minimal_module();
        bytes.pop();
        assert!(matches!(
            bytes_to_spirv("raygen.spv", &bytes),
            Err(ShaderError::Misaligned { len: 19, .. })
        ));
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = module_bytes(&[0xDEAD_BEEF, 0]);
        assert!(matches!(
            bytes_to_spirv("raygen.spv", &bytes),
            Err(ShaderError::BadMagic { found: 0xDEAD_BEEF, .. })
        ));
        assert!(matches!(
            bytes_to_spirv("raygen.spv", &[]),
            Err(ShaderError::BadMagic { found: 0, .. })
        ));
    }

    #[test]
    fn loads_directory_with_entry_points() {
        let dir = tempfile::tempdir().unwrap();
        write_stages(dir.path(), &minimal_module());

        let entry_points = EntryPoints {
            raygen: "raygenMain".to_string(),
            any_hit: "anyhitMain".to_string(),
            ..EntryPoints::default()
        };
        let set = ShaderSet::load_dir(dir.path(), &entry_points).unwrap();

        assert_eq!(set.raygen.entry.to_str().unwrap(), "raygenMain");
        assert_eq!(set.any_hit.entry.to_str().unwrap(), "anyhitMain");
        assert_eq!(set.stage(StageKind::Miss).entry.to_str().unwrap(), "main");
        assert_eq!(set.closest_hit.code[0], SPIRV_MAGIC);
    }

    #[test]
    fn missing_stage_names_path() {
        let dir = tempfile::tempdir().unwrap();
        write_stages(dir.path(), &minimal_module());
        std::fs::remove_file(dir.path().join("ahit.spv")).unwrap();

        match ShaderSet::load_dir(dir.path(), &EntryPoints::default()) {
            Err(ShaderError::Io { path, .. }) => assert_eq!(path, dir.path().join("ahit.spv")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn corrupt_stage_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        write_stages(dir.path(), &minimal_module());
        std::fs::write(dir.path().join("isect.spv"), [1u8, 2, 3]).unwrap();

        assert!(matches!(
            ShaderSet::load_dir(dir.path(), &EntryPoints::default()),
            Err(ShaderError::Misaligned { .. })
        ));
    }

    #[test]
    fn rejects_nul_in_entry_point() {
        assert!(matches!(
            ShaderStage::from_bytes("raygen.spv", &minimal_module(), "ma\0in"),
            Err(ShaderError::InvalidEntryPoint { .. })
        ));
    }

    #[test]
    fn intersection_verdicts_use_precise_arithmetic() {
        let source = include_str!("../shaders/lsi.rint");
        for declaration in [
            "precise float c = a.x * b.y - a.y * b.x;",
            "precise float d = a.x * b.x + a.y * b.y;",
            "precise vec2 r = p2 - p1;",
            "precise vec2 qp = q1 - p1;",
            "precise float denom = cross2(r, s);",
            "precise float t = cross2(qp, s);",
            "precise float u = cross2(qp, r);",
            "precise float t1 = t0 + dot2(s, r);",
        ] {
            assert!(source.contains(declaration), "missing `{declaration}`");
        }
        assert!(source.contains("unitRatio(t, denom) && unitRatio(u, denom)"));
        assert!(!source.contains(" dot(r, r)"));
    }

    #[cfg(feature = "embedded")]
    #[test]
    fn embedded_stages_load() {
        let set = ShaderSet::embedded().unwrap();
        for kind in StageKind::ALL {
            let stage = set.stage(kind);
            assert_eq!(stage.code[0], SPIRV_MAGIC, "Invalid SPIR-V magic number");
            assert!(stage.code.len() > 5, "Shader too small");
        }
    }
}
