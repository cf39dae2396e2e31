use std::borrow::Cow;

use anyhow::Result;
use shaderprep::{CompileBackend, ShaderModel};
use wgpu::naga::ShaderStage;

/// Feeds preprocessed GLSL through `wgpu`'s naga frontend. Compile errors
/// are caught with a validation error scope so a bad preset shader reports
/// a message instead of raising the device error handler.
pub struct NagaBackend<'a> {
    device: &'a wgpu::Device,
}

impl<'a> NagaBackend<'a> {
    pub fn new(device: &'a wgpu::Device) -> Self {
        Self { device }
    }
}

impl CompileBackend for NagaBackend<'_> {
    type Shader = wgpu::ShaderModule;

    fn compile(
        &mut self,
        label: &str,
        source: &str,
        _model: ShaderModel,
    ) -> Result<wgpu::ShaderModule, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(source),
                stage: ShaderStage::Fragment,
                defines: &[],
            },
        });
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(module),
            Some(err) => Err(err.to_string()),
        }
    }
}

/// Compiles the static warp-mesh vertex shader.
pub fn compile_warp_vertex_shader(device: &wgpu::Device) -> Result<wgpu::ShaderModule> {
    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("warp mesh vertex"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(WARP_VERTEX_GLSL),
            stage: ShaderStage::Vertex,
            defines: &[],
        },
    }))
}

/// Compiles the static composite-grid vertex shader.
pub fn compile_comp_vertex_shader(device: &wgpu::Device) -> Result<wgpu::ShaderModule> {
    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("composite grid vertex"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(COMP_VERTEX_GLSL),
            stage: ShaderStage::Vertex,
            defines: &[],
        },
    }))
}

/// Varying layout must match the fragment header the preprocessor emits.
const WARP_VERTEX_GLSL: &str = r"#version 450
layout(location = 0) in vec2 a_pos;
layout(location = 1) in vec2 a_uv;
layout(location = 2) in vec2 a_uv_orig;
layout(location = 3) in vec2 a_rad_ang;

layout(location = 0) out vec4 _milk_uv;
layout(location = 1) out vec4 _milk_rad_ang;
layout(location = 2) out vec4 _milk_diffuse;

void main() {
    _milk_uv = vec4(a_uv, a_uv_orig);
    _milk_rad_ang = vec4(a_rad_ang, 0.0, 0.0);
    _milk_diffuse = vec4(1.0);
    gl_Position = vec4(a_pos, 0.0, 1.0);
}
";

const COMP_VERTEX_GLSL: &str = r"#version 450
layout(location = 0) in vec2 a_pos;
layout(location = 1) in vec2 a_uv;
layout(location = 2) in vec2 a_rad_ang;

layout(location = 0) out vec4 _milk_uv;
layout(location = 1) out vec4 _milk_rad_ang;
layout(location = 2) out vec4 _milk_diffuse;

void main() {
    _milk_uv = vec4(a_uv, a_uv);
    _milk_rad_ang = vec4(a_rad_ang, 0.0, 0.0);
    _milk_diffuse = vec4(1.0);
    gl_Position = vec4(a_pos, 0.0, 1.0);
}
";
