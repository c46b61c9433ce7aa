//! segtrace: batch segment intersection on ray tracing hardware.
//!
//! Runs one query between a query set and a base set of 2D segments and prints every
//! intersecting pair.
//!
//! ## Usage
//!
//! ```bash
//! # Demo scene, shader stages from ./shaders
//! cargo run -p segtrace-cli
//!
//! # Own scene and shader directory, checked against the CPU reference
//! cargo run -p segtrace-cli -- --scene scene.json --shader-dir build/spv --verify
//!
//! # Bundled shader stages
//! cargo run -p segtrace-cli --features embedded -- --capacity 2
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod report;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use segtrace_core::reference::brute_force;
use segtrace_core::{EngineConfig, Scene};
use segtrace_gpu::GpuContextBuilder;
use segtrace_rt::SegmentIntersector;
use segtrace_shaders::ShaderSet;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "segtrace")]
#[command(about = "Find intersecting segment pairs with hardware ray tracing", long_about = None)]
struct Cli {
    /// JSON scene with `query` and `base` segment sets (default: built-in demo)
    #[arg(short, long)]
    scene: Option<PathBuf>,

    /// TOML engine configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Results buffer capacity, in records
    #[arg(long)]
    capacity: Option<u32>,

    /// AABB half-thickness around each base segment
    #[arg(long)]
    epsilon: Option<f32>,

    /// Directory with raygen.spv, miss.spv, isect.spv, ahit.spv, chit.spv
    #[arg(long)]
    shader_dir: Option<PathBuf>,

    /// Enable Vulkan validation layers
    #[arg(long)]
    validation: bool,

    /// Compare the returned pairs with the CPU reference
    #[arg(long)]
    verify: bool,
}

impl Cli {
    /// File configuration with command-line overrides applied.
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };

        if let Some(capacity) = self.capacity {
            config = config.with_result_capacity(capacity);
        }
        if let Some(epsilon) = self.epsilon {
            config = config.with_aabb_epsilon(epsilon);
        }
        if let Some(dir) = &self.shader_dir {
            config = config.with_shader_dir(dir);
        }
        if self.validation {
            config = config.with_validation(true);
        }

        config.validate()?;
        Ok(config)
    }

    fn scene(&self) -> Result<Scene> {
        match &self.scene {
            Some(path) => Scene::load(path)
                .with_context(|| format!("Failed to load scene {}", path.display())),
            None => Ok(Scene::demo()),
        }
    }
}

/// Where the shader stages are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShaderSource {
    /// SPIR-V files in the configured directory.
    Directory,
    /// Stages compiled into the binary.
    Embedded,
}

impl ShaderSource {
    /// An explicit `--shader-dir` always wins; the bundled stages are only used when
    /// the binary carries them and the configured directory does not exist.
    fn select(explicit_dir: bool, config: &EngineConfig) -> Self {
        if cfg!(feature = "embedded") && !explicit_dir && !config.shaders.dir.is_dir() {
            Self::Embedded
        } else {
            Self::Directory
        }
    }

    fn load(self, config: &EngineConfig) -> Result<ShaderSet> {
        match self {
            Self::Embedded => embedded_shaders(),
            Self::Directory => ShaderSet::load_dir(&config.shaders.dir, &config.shaders.entry_points)
                .with_context(|| {
                    format!(
                        "Failed to load shader stages from {}",
                        config.shaders.dir.display()
                    )
                }),
        }
    }
}

#[cfg(feature = "embedded")]
fn embedded_shaders() -> Result<ShaderSet> {
    tracing::info!("Using embedded shader stages");
    Ok(ShaderSet::embedded()?)
}

#[cfg(not(feature = "embedded"))]
fn embedded_shaders() -> Result<ShaderSet> {
    bail!("Built without embedded shader stages")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.engine_config()?;
    let scene = cli.scene()?;
    let shaders = ShaderSource::select(cli.shader_dir.is_some(), &config).load(&config)?;

    let context = GpuContextBuilder::new()
        .app_name(config.app_name.clone())
        .validation(config.validation)
        .build()
        .context("Failed to create GPU context")?;
    let mut engine = SegmentIntersector::new(Arc::new(context), &shaders, config)?;

    let outcome = engine.query(&scene.query, &scene.base)?;

    println!("HitCount = {}", outcome.reported_count);
    for (i, hit) in outcome.hits.iter().enumerate() {
        println!("{}", report::format_hit(i, hit));
    }

    if cli.verify {
        let reference = brute_force(&scene.query, &scene.base)?;
        if let Err(mismatch) = report::verify(&outcome, &reference) {
            bail!("Verification failed: {mismatch}");
        }
        if outcome.overflowed() {
            tracing::warn!(
                "Verified {} of {} hits (capacity {})",
                outcome.hits.len(),
                outcome.reported_count,
                outcome.capacity
            );
        } else {
            tracing::info!("Verified {} hits against the CPU reference", reference.len());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let cli = Cli::parse_from([
            "segtrace",
            "--capacity",
            "2",
            "--epsilon",
            "0.5",
            "--shader-dir",
            "build/spv",
        ]);
        let config = cli.engine_config().unwrap();
        assert_eq!(config.result_capacity, 2);
        assert_eq!(config.aabb_epsilon, 0.5);
        assert_eq!(config.shaders.dir, PathBuf::from("build/spv"));
    }

    #[test]
    fn explicit_shader_dir_is_always_read() {
        let config = EngineConfig::default().with_shader_dir("/nonexistent/segtrace/spv");
        assert_eq!(ShaderSource::select(true, &config), ShaderSource::Directory);
    }

    #[test]
    fn existing_shader_dir_is_read() {
        let config = EngineConfig::default().with_shader_dir(std::env::temp_dir());
        assert_eq!(ShaderSource::select(false, &config), ShaderSource::Directory);
    }

    #[test]
    fn missing_default_dir_falls_back_only_when_embedded() {
        let config = EngineConfig::default().with_shader_dir("/nonexistent/segtrace/spv");
        let expected = if cfg!(feature = "embedded") {
            ShaderSource::Embedded
        } else {
            ShaderSource::Directory
        };
        assert_eq!(ShaderSource::select(false, &config), expected);
    }
}
