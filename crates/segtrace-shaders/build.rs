//! Build script compiling the bundled GLSL ray tracing stages to SPIR-V.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=shaders/");

    #[cfg(feature = "embedded")]
    embedded::compile_all()?;

    Ok(())
}

#[cfg(feature = "embedded")]
mod embedded {
    use shaderc::{CompileOptions, Compiler, ShaderKind};
    use std::env;
    use std::fs;
    use std::path::{Path, PathBuf};

    type BuildResult<T> = Result<T, Box<dyn std::error::Error>>;

    const STAGES: [(&str, &str, ShaderKind); 5] = [
        ("lsi.rgen", "raygen.spv", ShaderKind::RayGeneration),
        ("lsi.rmiss", "miss.spv", ShaderKind::Miss),
        ("lsi.rint", "isect.spv", ShaderKind::Intersection),
        ("lsi.rahit", "ahit.spv", ShaderKind::AnyHit),
        ("lsi.rchit", "chit.spv", ShaderKind::ClosestHit),
    ];

    pub fn compile_all() -> BuildResult<()> {
        let out_dir = PathBuf::from(env::var("OUT_DIR")?);
        let shader_dir = Path::new("shaders");

        let compiler = Compiler::new().ok_or("Failed to create shader compiler")?;

        for (source, output, kind) in STAGES {
            compile_shader(
                &compiler,
                &shader_dir.join(source),
                &out_dir.join(output),
                kind,
            )?;
        }
        Ok(())
    }

    fn compile_shader(
        compiler: &Compiler,
        input: &Path,
        output: &Path,
        kind: ShaderKind,
    ) -> BuildResult<()> {
        let source = fs::read_to_string(input)
            .map_err(|e| format!("Failed to read shader {}: {e}", input.display()))?;

        let file_name = input.file_name().and_then(|n| n.to_str()).unwrap_or("shader");

        let mut options = CompileOptions::new().ok_or("Failed to create compile options")?;
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_3 as u32,
        );
        options.set_target_spirv(shaderc::SpirvVersion::V1_6);
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);

        let result = compiler
            .compile_into_spirv(&source, kind, file_name, "main", Some(&options))
            .map_err(|e| format!("Failed to compile shader {}: {e}", input.display()))?;

        if result.get_num_warnings() > 0 {
            println!(
                "cargo:warning=Shader warnings in {}: {}",
                input.display(),
                result.get_warning_messages()
            );
        }

        fs::write(output, result.as_binary_u8())
            .map_err(|e| format!("Failed to write shader {}: {e}", output.display()))?;
        Ok(())
    }
}
