use std::path::Path;

use wgpu::util::{DeviceExt, TextureDataOrder};

use texbind::{LoadedTexture, TexError, TextureLoader};

use crate::GpuTexture;

/// Decodes texture files with `image` and uploads them. Formats the decoder
/// does not know (dds, dib) surface as decode errors and degrade upstream.
pub struct ImageLoader<'a> {
    device: &'a wgpu::Device,
    queue: &'a wgpu::Queue,
}

impl<'a> ImageLoader<'a> {
    pub fn new(device: &'a wgpu::Device, queue: &'a wgpu::Queue) -> Self {
        Self { device, queue }
    }
}

impl TextureLoader for ImageLoader<'_> {
    type Texture = GpuTexture;

    fn load(&mut self, path: &Path) -> Result<LoadedTexture<GpuTexture>, TexError> {
        let image = image::open(path).map_err(|err| TexError::Decode {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();

        let texture = self.device.create_texture_with_data(
            self.queue,
            &wgpu::TextureDescriptor {
                label: path.file_name().and_then(|n| n.to_str()),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            &rgba,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(LoadedTexture {
            resource: GpuTexture { texture, view },
            width,
            height,
            size_bytes: u64::from(width) * u64::from(height) * 4,
        })
    }
}

/// Uploads the procedural noise textures as permanent cache entries, named
/// the way preset shaders reference them.
pub fn install_noise_textures(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    cache: &mut texbind::TextureCache<GpuTexture>,
    rng: &mut impl rand::Rng,
) {
    const NOISE: [(&str, u32); 4] = [
        ("noise_lq_lite", 32),
        ("noise_lq", 256),
        ("noise_mq", 256),
        ("noise_hq", 256),
    ];
    for (name, size) in NOISE {
        let mut data = vec![0u8; (size * size * 4) as usize];
        rng.fill(data.as_mut_slice());
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some(name),
                size: wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            &data,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        cache.insert_permanent(name, GpuTexture { texture, view }, size, size);
    }
}
