//! Blur chain downsample passes.
//!
//! Each frame the front canvas is folded down through the three blur
//! targets: the front feeds `$$blur1`, `$$blur1` feeds `$$blur2`, and so
//! on. A pass draws one fullscreen triangle whose fragment averages four
//! bilinear taps around the destination texel; at half resolution per level
//! that covers a 4x4 source footprint, which is what the `sampler_blurN`
//! contract needs.

use std::borrow::Cow;

use anyhow::Result;
use wgpu::naga::ShaderStage;

use crate::canvas::{Canvas, CANVAS_FORMAT};
use crate::GpuTexture;

/// Levels the chain produces, matching the `$$blur1..3` canvas targets.
pub const BLUR_LEVELS: usize = 3;

pub struct BlurChain {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl BlurChain {
    pub fn new(device: &wgpu::Device) -> Result<Self> {
        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blur fullscreen vertex"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(BLUR_VERTEX_GLSL),
                stage: ShaderStage::Vertex,
                defines: &[],
            },
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blur downsample fragment"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(BLUR_FRAGMENT_GLSL),
                stage: ShaderStage::Fragment,
                defines: &[],
            },
        });

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blur source layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blur pipeline"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blur pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex,
                entry_point: Some("main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: CANVAS_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Ok(Self {
            pipeline,
            layout,
            sampler,
        })
    }

    /// Records the downsample passes for this frame. Runs after the warp
    /// pass has been composited into the front canvas, so the blur targets
    /// the composite stage samples hold this frame's image.
    pub fn record(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        cache: &texbind::TextureCache<GpuTexture>,
        canvas: &Canvas,
    ) {
        let Some(mut source) = cache.resolve(canvas.front_name()) else {
            return;
        };
        for level in 0..BLUR_LEVELS {
            let Some(target) = cache.resolve(Canvas::blur_name(level)) else {
                return;
            };
            let bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("blur source"),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&source.resource.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });
            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("blur pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &target.resource.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &bind, &[]);
                pass.draw(0..3, 0..1);
            }
            source = target;
        }
    }
}

const BLUR_VERTEX_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

void main() {
    vec2 pos = vec2(float((gl_VertexIndex << 1) & 2), float(gl_VertexIndex & 2));
    // Clip y points up while texture v points down.
    v_uv = vec2(pos.x, 1.0 - pos.y);
    gl_Position = vec4(pos * 2.0 - 1.0, 0.0, 1.0);
}
";

const BLUR_FRAGMENT_GLSL: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 o_color;
layout(set = 0, binding = 0) uniform texture2D u_src;
layout(set = 0, binding = 1) uniform sampler u_smp;

void main() {
    vec2 texel = 1.0 / vec2(textureSize(sampler2D(u_src, u_smp), 0));
    vec3 acc = texture(sampler2D(u_src, u_smp), v_uv + texel * vec2(-1.0, -1.0)).rgb
             + texture(sampler2D(u_src, u_smp), v_uv + texel * vec2( 1.0, -1.0)).rgb
             + texture(sampler2D(u_src, u_smp), v_uv + texel * vec2(-1.0,  1.0)).rgb
             + texture(sampler2D(u_src, u_smp), v_uv + texel * vec2( 1.0,  1.0)).rgb;
    o_color = vec4(acc * 0.25, 1.0);
}
";
