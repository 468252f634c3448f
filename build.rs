use std::env;
use std::path::{Path, PathBuf};

/// Maps `shaders/helloTriangle.vert` to `helloTriangleVert.spv`.
fn spirv_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let suffix = match path.extension()?.to_str()? {
        "vert" => "Vert",
        "frag" => "Frag",
        "comp" => "Comp",
        _ => return None,
    };
    Some(format!("{stem}{suffix}.spv"))
}

fn shader_sources() -> anyhow::Result<Vec<PathBuf>> {
    let mut sources = Vec::new();
    for pattern in ["shaders/*.vert", "shaders/*.frag", "shaders/*.comp"] {
        for entry in glob::glob(pattern)? {
            sources.push(entry?);
        }
    }
    Ok(sources)
}

#[cfg(feature = "compile_shaders")]
fn compile(sources: &[PathBuf], out_dir: &Path) -> anyhow::Result<()> {
    let compiler =
        shaderc::Compiler::new().ok_or_else(|| anyhow::anyhow!("shaderc unavailable"))?;

    for path in sources {
        let Some(output_name) = spirv_name(path) else {
            continue;
        };
        let kind = match path.extension().and_then(|e| e.to_str()) {
            Some("vert") => shaderc::ShaderKind::Vertex,
            Some("frag") => shaderc::ShaderKind::Fragment,
            _ => shaderc::ShaderKind::Compute,
        };
        let file_name = path.display().to_string();
        let source = std::fs::read_to_string(path)?;

        let binary = compiler
            .compile_into_spirv(&source, kind, &file_name, "main", None)
            .map_err(|e| anyhow::anyhow!("Failed to compile shader {file_name}: {e}"))?;
        std::fs::write(out_dir.join(output_name), binary.as_binary_u8())?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    println!("cargo:rerun-if-changed=shaders");
    println!("cargo:rerun-if-env-changed=ASH_EDITOR_SHADER_ROOT");

    let sources = shader_sources()?;
    for path in &sources {
        if spirv_name(path).is_some() {
            println!("cargo:rerun-if-changed={}", path.display());
        }
    }

    #[cfg(feature = "compile_shaders")]
    let shader_root = {
        let out = PathBuf::from(env::var("OUT_DIR")?).join("shaders");
        std::fs::create_dir_all(&out)?;
        compile(&sources, &out)?;
        out
    };

    // Without shaderc the SPIR-V is expected pre-built next to the sources.
    #[cfg(not(feature = "compile_shaders"))]
    let shader_root = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?)
        .join("shaders")
        .join("spv");

    println!("cargo:rustc-env=SHADER_ROOT={}", shader_root.display());
    Ok(())
}
