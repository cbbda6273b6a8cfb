// build.rs
// Compiles the GLSL shaders under shaders/ to SPIR-V in target/shaders/

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_EXTENSIONS: [&str; 3] = ["vert", "frag", "comp"];

fn main() {
    println!("cargo:rerun-if-changed=shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var_os("SKIP_SHADERS").is_some() {
        println!("cargo:warning=Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Some(glslc) = find_glslc() else {
        println!("cargo:warning=glslc not found, shader compilation skipped (set VULKAN_SDK)");
        return;
    };

    let shader_dir = PathBuf::from("shaders");
    let target_dir = PathBuf::from("../../target/shaders");
    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        println!("cargo:warning=Failed to create {}: {e}", target_dir.display());
        return;
    }

    let entries = match std::fs::read_dir(&shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            println!("cargo:warning=No shader directory found at {}", shader_dir.display());
            return;
        }
    };

    let mut compiled = 0;
    for path in entries.filter_map(Result::ok).map(|e| e.path()) {
        let is_shader = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SHADER_EXTENSIONS.contains(&ext));
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_shader {
            continue;
        }

        // pbr.vert -> pbr.vert.spv
        let out_file = target_dir.join(format!("{file_name}.spv"));
        if is_up_to_date(&path, &out_file) {
            continue;
        }

        let status = Command::new(&glslc).arg(&path).arg("-o").arg(&out_file).status();
        match status {
            Ok(s) if s.success() => compiled += 1,
            Ok(s) => panic!("glslc failed for {} with exit code {:?}", path.display(), s.code()),
            Err(e) => panic!("Failed to run glslc for {}: {e}", path.display()),
        }
    }

    if compiled > 0 {
        eprintln!("info: Compiled {compiled} shader(s) into {}", target_dir.display());
    }
}

fn find_glslc() -> Option<PathBuf> {
    let sdk = env::var_os("VULKAN_SDK")?;
    let binary = if cfg!(target_os = "windows") { "Bin/glslc.exe" } else { "bin/glslc" };
    let glslc = Path::new(&sdk).join(binary);
    glslc.exists().then_some(glslc)
}

fn is_up_to_date(source: &Path, output: &Path) -> bool {
    let modified = |path: &Path| std::fs::metadata(path).and_then(|m| m.modified()).ok();
    matches!((modified(source), modified(output)), (Some(src), Some(out)) if out >= src)
}
