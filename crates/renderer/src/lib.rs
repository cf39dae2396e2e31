//! GPU backend: headless device setup, the double-buffered canvas, preset
//! shader pipelines, and texture upload. Policy lives in the device-agnostic
//! crates; this one owns everything that touches `wgpu`.

use anyhow::Result;
use wgpu::util::DeviceExt;

mod backend;
mod blur;
mod canvas;
mod context;
mod loader;
mod pipeline;
mod uniforms;

pub use backend::{compile_comp_vertex_shader, compile_warp_vertex_shader, NagaBackend};
pub use blur::{BlurChain, BLUR_LEVELS};
pub use canvas::{Canvas, CANVAS_FORMAT};
pub use context::GpuContext;
pub use loader::{install_noise_textures, ImageLoader};
pub use pipeline::{
    create_placeholder, create_stage_pipeline, texture_bind_group, texture_layout, MeshTopology,
    PipelineLayouts,
};
pub use uniforms::StageUniforms;

/// A texture plus its default view; the resource type behind the cache.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

/// Vertex and index buffers for one mesh, with per-frame vertex updates.
pub struct MeshBuffers {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    index_count: u32,
}

impl MeshBuffers {
    pub fn for_warp(
        device: &wgpu::Device,
        verts: &[meshwarp::WarpVertex],
        indices: &[u32],
    ) -> Self {
        Self::build(device, "warp mesh", bytemuck::cast_slice(verts), indices)
    }

    pub fn for_composite(device: &wgpu::Device, grid: &meshwarp::CompositeGrid) -> Self {
        Self::build(
            device,
            "composite grid",
            bytemuck::cast_slice(grid.verts()),
            grid.indices(),
        )
    }

    fn build(device: &wgpu::Device, label: &str, vertex_bytes: &[u8], indices: &[u32]) -> Self {
        let vertex = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: vertex_bytes,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        });
        let index = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex,
            index,
            index_count: indices.len() as u32,
        }
    }

    /// Warp vertices move every frame; the index buffer never changes.
    pub fn update_vertices(&self, queue: &wgpu::Queue, verts: &[meshwarp::WarpVertex]) {
        queue.write_buffer(&self.vertex, 0, bytemuck::cast_slice(verts));
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

pub fn create_uniform_buffer(device: &wgpu::Device, uniforms: &StageUniforms) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("stage uniforms"),
        contents: bytemuck::bytes_of(uniforms),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

pub fn write_uniforms(queue: &wgpu::Queue, buffer: &wgpu::Buffer, uniforms: &StageUniforms) {
    queue.write_buffer(buffer, 0, bytemuck::bytes_of(uniforms));
}

/// Records one stage draw into `target`.
pub fn draw_stage(
    encoder: &mut wgpu::CommandEncoder,
    target: &wgpu::TextureView,
    pipeline: &wgpu::RenderPipeline,
    uniform_bind_group: &wgpu::BindGroup,
    texture_bind_group: &wgpu::BindGroup,
    mesh: &MeshBuffers,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("stage pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, uniform_bind_group, &[]);
    pass.set_bind_group(1, texture_bind_group, &[]);
    pass.set_vertex_buffer(0, mesh.vertex.slice(..));
    pass.set_index_buffer(mesh.index.slice(..), wgpu::IndexFormat::Uint32);
    pass.draw_indexed(0..mesh.index_count, 0, 0..1);
}

/// Uniform bind group, with the `texsize` constants buffer when the shader
/// declares any.
pub fn uniform_bind_group(
    device: &wgpu::Device,
    layouts: &PipelineLayouts,
    table: &shaderprep::ParamTable,
    uniform_buffer: &wgpu::Buffer,
    texsize_buffer: Option<&wgpu::Buffer>,
) -> Result<wgpu::BindGroup> {
    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: uniform_buffer.as_entire_binding(),
    }];
    if !table.texsizes.is_empty() {
        let buffer = texsize_buffer
            .ok_or_else(|| anyhow::anyhow!("shader declares texsize constants but no buffer"))?;
        entries.push(wgpu::BindGroupEntry {
            binding: 1,
            resource: buffer.as_entire_binding(),
        });
    }
    Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("stage uniform bind group"),
        layout: layouts.uniform_layout_for(table),
        entries: &entries,
    }))
}

/// Packs `texsize_*` float4s in table order for the constants buffer.
pub fn pack_texsizes(
    table: &shaderprep::ParamTable,
    params: &texbind::ShaderParams<GpuTexture>,
) -> Vec<[f32; 4]> {
    table
        .texsizes
        .iter()
        .map(|name| {
            params
                .float4(&format!("texsize_{name}"))
                .unwrap_or([1.0, 1.0, 1.0, 1.0])
        })
        .collect()
}
