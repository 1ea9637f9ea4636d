// SPDX-License-Identifier: CEPL-1.0
// With `embed-shaders`, compiles shaders/cube.{vert,frag} to SPIR-V in OUT_DIR.

#[cfg(feature = "embed-shaders")]
fn main() {
    use std::{env, fs, path::PathBuf};

    let out = PathBuf::from(env::var("OUT_DIR").unwrap());
    let src_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap()).join("shaders");

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    // the instance targets 1.1; shaders need nothing newer than 1.0
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (name, kind) in [
        ("cube.vert", shaderc::ShaderKind::Vertex),
        ("cube.frag", shaderc::ShaderKind::Fragment),
    ] {
        let path = src_dir.join(name);
        let src = fs::read_to_string(&path).unwrap();
        let spv = comp
            .compile_into_spirv(&src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
        println!("cargo:rerun-if-changed={}", path.display());
    }
    println!("cargo:rerun-if-changed=build.rs");
}

#[cfg(not(feature = "embed-shaders"))]
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
}
