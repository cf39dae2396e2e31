use texbind::TextureCache;

use crate::context::GpuContext;
use crate::GpuTexture;

pub const CANVAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const CANVAS_NAMES: [&str; 2] = ["$$canvas0", "$$canvas1"];
const BLUR_NAMES: [&str; 3] = ["$$blur1", "$$blur2", "$$blur3"];

/// The double-buffered virtual screen plus the blur chain.
///
/// The textures live in the shared cache as permanent entries, so shader
/// bindings resolve them through the same path as file textures; this type
/// only tracks which buffer is the front one.
pub struct Canvas {
    width: u32,
    height: u32,
    front: usize,
}

impl Canvas {
    pub fn new(
        ctx: &GpuContext,
        cache: &mut TextureCache<GpuTexture>,
        width: u32,
        height: u32,
    ) -> Self {
        let width = width.clamp(1, ctx.max_texture_dimension);
        let height = height.clamp(1, ctx.max_texture_dimension);
        for name in CANVAS_NAMES {
            let tex = create_target(&ctx.device, name, width, height);
            cache.insert_permanent(name, tex, width, height);
        }
        for (i, name) in BLUR_NAMES.iter().enumerate() {
            let scale = 2u32.pow(i as u32 + 1);
            let (bw, bh) = ((width / scale).max(1), (height / scale).max(1));
            let tex = create_target(&ctx.device, name, bw, bh);
            cache.insert_permanent(name, tex, bw, bh);
        }
        Self {
            width,
            height,
            front: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Name of the texture holding last frame's output; warp reads this.
    pub fn front_name(&self) -> &'static str {
        CANVAS_NAMES[self.front]
    }

    /// Name of the texture the current frame renders into.
    pub fn back_name(&self) -> &'static str {
        CANVAS_NAMES[1 - self.front]
    }

    pub fn blur_name(level: usize) -> &'static str {
        BLUR_NAMES[level]
    }

    /// Swaps front and back after the warp pass has been composited.
    pub fn flip(&mut self) {
        self.front = 1 - self.front;
    }

    /// Bindings for `sampler_main` and the blur chain.
    pub fn stage_textures(
        &self,
        cache: &TextureCache<GpuTexture>,
    ) -> shaderprep::StageTextures<GpuTexture> {
        shaderprep::StageTextures {
            main: cache.resolve(self.front_name()),
            blur: [
                cache.resolve(BLUR_NAMES[0]),
                cache.resolve(BLUR_NAMES[1]),
                cache.resolve(BLUR_NAMES[2]),
            ],
        }
    }

    pub fn resize(
        &mut self,
        ctx: &GpuContext,
        cache: &mut TextureCache<GpuTexture>,
        width: u32,
        height: u32,
    ) {
        if width == self.width && height == self.height {
            return;
        }
        *self = Self::new(ctx, cache, width, height);
    }
}

fn create_target(device: &wgpu::Device, label: &str, width: u32, height: u32) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: CANVAS_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view }
}
