//! The GLSL sources must go through the same frontend the build script uses.
//! A qualifier or construct the frontend does not implement would otherwise
//! only surface as a missing .spv at renderer startup.

use naga::{
    back::spv,
    front::glsl::{Frontend, Options},
    valid::{Capabilities, ValidationFlags, Validator},
    ShaderStage,
};

fn compile(source: &str, stage: ShaderStage) -> Vec<u32> {
    let mut frontend = Frontend::default();
    let module = frontend
        .parse(&Options::from(stage), source)
        .unwrap_or_else(|errors| panic!("parse failed: {errors:?}"));

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    let info = validator
        .validate(&module)
        .unwrap_or_else(|err| panic!("validation failed: {err:?}"));

    spv::write_vec(&module, &info, &spv::Options::default(), None)
        .expect("SPIR-V generation failed")
}

#[test]
fn quad_vertex_shader_compiles() {
    let spv = compile(include_str!("../shaders/quad.vert"), ShaderStage::Vertex);
    assert!(!spv.is_empty());
}

#[test]
fn quad_fragment_shader_compiles() {
    let spv = compile(include_str!("../shaders/quad.frag"), ShaderStage::Fragment);
    assert!(!spv.is_empty());
}
