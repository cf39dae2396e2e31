use anyhow::Result;
use wgpu::util::DeviceExt;

use shaderprep::{ParamTable, SamplerFilter, SamplerWrap};
use texbind::ShaderParams;

use crate::backend::{compile_comp_vertex_shader, compile_warp_vertex_shader};
use crate::canvas::CANVAS_FORMAT;
use crate::GpuTexture;

/// Bind group layouts and vertex modules shared by every preset pipeline.
pub struct PipelineLayouts {
    pub uniform_layout: wgpu::BindGroupLayout,
    /// Variant with the `texsize` constants block at binding 1.
    pub uniform_texsize_layout: wgpu::BindGroupLayout,
    pub warp_vertex: wgpu::ShaderModule,
    pub comp_vertex: wgpu::ShaderModule,
}

impl PipelineLayouts {
    pub fn new(device: &wgpu::Device) -> Result<Self> {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("stage uniform layout"),
            entries: &[uniform_entry(0)],
        });
        let uniform_texsize_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("stage uniform layout with texsizes"),
                entries: &[uniform_entry(0), uniform_entry(1)],
            });
        Ok(Self {
            uniform_layout,
            uniform_texsize_layout,
            warp_vertex: compile_warp_vertex_shader(device)?,
            comp_vertex: compile_comp_vertex_shader(device)?,
        })
    }

    pub fn uniform_layout_for(&self, table: &ParamTable) -> &wgpu::BindGroupLayout {
        if table.texsizes.is_empty() {
            &self.uniform_layout
        } else {
            &self.uniform_texsize_layout
        }
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Texture/sampler pairs in table order, matching the declarations the
/// preprocessor emitted for the same table.
pub fn texture_layout(device: &wgpu::Device, table: &ParamTable) -> wgpu::BindGroupLayout {
    let mut entries = Vec::with_capacity(table.samplers.len() * 2);
    for i in 0..table.samplers.len() as u32 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: i * 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: i * 2 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("preset texture layout"),
        entries: &entries,
    })
}

/// Resolved bindings become views; anything missing (failed load, evicted)
/// falls back to the placeholder so the draw stays valid.
pub fn texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    table: &ParamTable,
    params: &ShaderParams<GpuTexture>,
    placeholder: &GpuTexture,
) -> wgpu::BindGroup {
    let samplers: Vec<wgpu::Sampler> = table
        .samplers
        .iter()
        .map(|s| create_sampler(device, s.filter, s.wrap))
        .collect();
    let mut entries = Vec::with_capacity(table.samplers.len() * 2);
    for (i, sampler) in table.samplers.iter().enumerate() {
        let view = params
            .texture(&sampler.decl_name)
            .map(|b| &b.resource.view)
            .unwrap_or(&placeholder.view);
        entries.push(wgpu::BindGroupEntry {
            binding: (i as u32) * 2,
            resource: wgpu::BindingResource::TextureView(view),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: (i as u32) * 2 + 1,
            resource: wgpu::BindingResource::Sampler(&samplers[i]),
        });
    }
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("preset texture bind group"),
        layout,
        entries: &entries,
    })
}

fn create_sampler(
    device: &wgpu::Device,
    filter: SamplerFilter,
    wrap: SamplerWrap,
) -> wgpu::Sampler {
    let address = match wrap {
        SamplerWrap::Wrap => wgpu::AddressMode::Repeat,
        SamplerWrap::Clamp => wgpu::AddressMode::ClampToEdge,
    };
    let filter_mode = match filter {
        SamplerFilter::Bilinear => wgpu::FilterMode::Linear,
        SamplerFilter::Point => wgpu::FilterMode::Nearest,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter_mode,
        min_filter: filter_mode,
        mipmap_filter: filter_mode,
        ..Default::default()
    })
}

/// A 1x1 white texture standing in for unresolved bindings.
pub fn create_placeholder(device: &wgpu::Device, queue: &wgpu::Queue) -> GpuTexture {
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("placeholder texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        &[255u8, 255, 255, 255],
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshTopology {
    Warp,
    Composite,
}

/// Builds a render pipeline for one preset shader stage.
pub fn create_stage_pipeline(
    device: &wgpu::Device,
    layouts: &PipelineLayouts,
    fragment: &wgpu::ShaderModule,
    table: &ParamTable,
    texture_layout: &wgpu::BindGroupLayout,
    topology: MeshTopology,
) -> wgpu::RenderPipeline {
    let (vertex_module, buffers, label): (_, Vec<wgpu::VertexBufferLayout>, _) = match topology {
        MeshTopology::Warp => (
            &layouts.warp_vertex,
            vec![wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<meshwarp::WarpVertex>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &WARP_ATTRIBUTES,
            }],
            "warp pipeline",
        ),
        MeshTopology::Composite => (
            &layouts.comp_vertex,
            vec![wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<meshwarp::CompVertex>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &COMP_ATTRIBUTES,
            }],
            "composite pipeline",
        ),
    };

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layouts.uniform_layout_for(table), texture_layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: vertex_module,
            entry_point: Some("main"),
            buffers: &buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        fragment: Some(wgpu::FragmentState {
            module: fragment,
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
    })
}

const WARP_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Float32x2,
    1 => Float32x2,
    2 => Float32x2,
    3 => Float32x2,
];

const COMP_ATTRIBUTES: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
    0 => Float32x2,
    1 => Float32x2,
    2 => Float32x2,
];
