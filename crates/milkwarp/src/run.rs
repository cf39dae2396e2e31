//! Headless run loop: wires the orchestrator to the GPU renderer and paces
//! frames. Presentation (window or wallpaper surface) is a host concern;
//! this loop renders into an offscreen target.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context as _, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use meshwarp::Aspect;
use renderer::{
    BlurChain, Canvas, GpuContext, GpuTexture, ImageLoader, MeshBuffers, MeshTopology,
    NagaBackend, PipelineLayouts, StageUniforms, CANVAS_FORMAT,
};
use shaderprep::{resolve_bindings, CompiledShader, RandFrameCache};
use texbind::{ShaderParams, SharedParams, TextureCache, TEXTURE_EXTENSIONS};

use crate::audio::WAVEFORM_SAMPLES;
use crate::cli::RunArgs;
use crate::messages::MessageKind;
use crate::orchestrator::Orchestrator;
use crate::paths::AppPaths;
use crate::settings::Settings;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            "warn,milkwarp=info,renderer=info,catalog=info,shaderprep=info,texbind=info,naga=error,wgpu=error",
        )
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// GPU-side state for one compiled preset stage.
struct StagePipeline {
    pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    params: SharedParams<GpuTexture>,
    texsize_buffer: Option<wgpu::Buffer>,
}

fn build_stage(
    device: &wgpu::Device,
    layouts: &PipelineLayouts,
    compiled: &CompiledShader<wgpu::ShaderModule>,
    topology: MeshTopology,
) -> StagePipeline {
    let texture_layout = renderer::texture_layout(device, &compiled.params);
    let pipeline = renderer::create_stage_pipeline(
        device,
        layouts,
        &compiled.shader,
        &compiled.params,
        &texture_layout,
        topology,
    );
    let texsize_buffer = (!compiled.params.texsizes.is_empty()).then(|| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texsize constants"),
            size: (compiled.params.texsizes.len() * 16) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    });
    StagePipeline {
        pipeline,
        texture_layout,
        params: ShaderParams::shared(),
        texsize_buffer,
    }
}

/// Logical names eligible for `randNN` sampler slots: every image file in
/// the texture directory plus the built-in noise set.
fn texture_pool(dir: &Path) -> Vec<String> {
    let mut pool: Vec<String> = ["noise_lq_lite", "noise_lq", "noise_mq", "noise_hq"]
        .map(String::from)
        .to_vec();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return pool;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let has_texture_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| TEXTURE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if has_texture_ext {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                pool.push(stem.to_string());
            }
        }
    }
    pool
}

/// A deterministic three-tone signal standing in for live capture, so the
/// bands move while running without an audio host.
fn synth_waveform(time: f64) -> Vec<f32> {
    use std::f64::consts::TAU;
    (0..WAVEFORM_SAMPLES)
        .map(|i| {
            let t = time + i as f64 / 44100.0;
            (0.6 * (TAU * 55.0 * t).sin()
                + 0.3 * (TAU * 220.0 * t).sin()
                + 0.1 * (TAU * 3520.0 * t).sin()) as f32
        })
        .collect()
}

fn fill_uniforms(orch: &Orchestrator<wgpu::ShaderModule>, aspect: Aspect, rng: &mut StdRng) -> StageUniforms {
    use rand::Rng;
    let fv = orch.frame_values();
    let levels = orch.levels;
    let mut u = StageUniforms {
        rand_preset: orch.rand_preset(),
        rand_frame: std::array::from_fn(|_| rng.gen()),
        c0: [
            orch.time() as f32,
            orch.fps() as f32,
            orch.frame() as f32,
            orch.progress() as f32,
        ],
        c1: [levels.bass, levels.mid, levels.treb, levels.vol],
        c2: [
            levels.bass_att,
            levels.mid_att,
            levels.treb_att,
            levels.vol_att,
        ],
        c3: [
            fv.blur1_min as f32,
            fv.blur1_max as f32,
            fv.blur2_min as f32,
            fv.blur2_max as f32,
        ],
        c4: [aspect.x, aspect.y, 1.0 / aspect.x, 1.0 / aspect.y],
        ..StageUniforms::default()
    };
    u.set_roam(orch.time());
    u
}

pub fn run(args: RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let mut settings = Settings::load(&paths.settings_file());
    if let Some(canvas) = args.canvas {
        settings.tex_size = canvas.max(16);
    }
    if let Some(grid) = args.grid {
        settings.grid_x = grid;
    }
    if args.sequential {
        settings.sequential_order = true;
    }
    let preset_dir = args
        .preset_dir
        .unwrap_or_else(|| paths.preset_dir().to_path_buf());
    tracing::info!(presets = %preset_dir.display(), textures = %paths.texture_dir().display(), "starting");

    let ctx = GpuContext::new()?;
    let mut cache: TextureCache<GpuTexture> =
        TextureCache::new(paths.texture_dir().to_path_buf(), preset_dir.clone());
    let mut rng = StdRng::from_entropy();
    renderer::install_noise_textures(&ctx.device, &ctx.queue, &mut cache, &mut rng);

    let width = settings.tex_size;
    let height = (settings.tex_size * 3 / 4).max(1);
    let mut canvas = Canvas::new(&ctx, &mut cache, width, height);
    let aspect = Aspect::from_size(canvas.width(), canvas.height());
    let layouts = PipelineLayouts::new(&ctx.device)?;
    let blur_chain = BlurChain::new(&ctx.device)?;
    let placeholder = renderer::create_placeholder(&ctx.device, &ctx.queue);
    let output = create_output(&ctx.device, canvas.width(), canvas.height());

    let max_bytes = settings.max_bytes;
    let max_images = settings.max_images;
    let exit_after = args.exit_after;
    let mut orch: Orchestrator<wgpu::ShaderModule> =
        Orchestrator::new(settings, preset_dir, aspect);
    orch.catalog.update(true, false);
    orch.messages
        .post(MessageKind::ScanningPresets, "scanning presets...", 0.0);
    if args.lock {
        orch.set_locked(true);
    }

    let mut backend = NagaBackend::new(&ctx.device);
    match &args.preset {
        Some(path) => orch.load_file(&mut backend, path, true)?,
        None => orch.request_next(&mut backend, true)?,
    }
    if orch.take_browse_request() {
        return Err(anyhow!(
            "no presets found in {}",
            orch.catalog.dir().display()
        ));
    }

    let mut warp_stage: Option<StagePipeline> = None;
    let mut comp_stage: Option<StagePipeline> = None;
    let mut warp_buffers: Option<MeshBuffers> = None;
    let comp_buffers = MeshBuffers::for_composite(&ctx.device, &orch.composite);
    let uniform_buffer = renderer::create_uniform_buffer(&ctx.device, &StageUniforms::default());
    let mut rand_cache = RandFrameCache::new();
    let rand_pool = texture_pool(paths.texture_dir());

    let frame_budget = Duration::from_micros(16_667);
    let mut last = Instant::now();
    let mut frames = 0u64;
    loop {
        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f64().max(1e-4);
        last = now;

        let waveform = synth_waveform(orch.time());
        orch.tick(&mut backend, &waveform, dt)
            .context("shader compilation failed irrecoverably")?;
        if orch.take_browse_request() {
            return Err(anyhow!(
                "no presets found in {}",
                orch.catalog.dir().display()
            ));
        }

        if orch.take_shaders_changed() {
            if let Some(shaders) = orch.shaders() {
                cache.begin_generation();
                let warp = build_stage(&ctx.device, &layouts, &shaders.warp, MeshTopology::Warp);
                let comp =
                    build_stage(&ctx.device, &layouts, &shaders.comp, MeshTopology::Composite);
                cache.register_params(&warp.params);
                cache.register_params(&comp.params);
                warp_stage = Some(warp);
                comp_stage = Some(comp);
            }
        }
        let (Some(warp), Some(comp)) = (&warp_stage, &comp_stage) else {
            // No preset yet (initial pick abandoned or directory still
            // scanning); retry once the loader is free.
            if orch.shaders().is_none() {
                orch.request_next(&mut backend, true)?;
            }
            std::thread::sleep(frame_budget);
            continue;
        };
        let shaders = orch
            .shaders()
            .ok_or_else(|| anyhow!("pipelines exist without shaders"))?;

        let mut image_loader = ImageLoader::new(&ctx.device, &ctx.queue);
        rand_cache.begin_frame();
        let uniforms = fill_uniforms(&orch, aspect, &mut rng);
        renderer::write_uniforms(&ctx.queue, &uniform_buffer, &uniforms);

        let mesh = warp_buffers.get_or_insert_with(|| {
            MeshBuffers::for_warp(&ctx.device, orch.warp_vertices(), &orch.mesh.list_indices())
        });
        mesh.update_vertices(&ctx.queue, orch.warp_vertices());

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame"),
            });

        // Warp pass: read the front canvas, render into the back.
        let stage_tex = canvas.stage_textures(&cache);
        resolve_bindings(
            &shaders.warp.params,
            &warp.params,
            &mut cache,
            &mut image_loader,
            &stage_tex,
            &mut rand_cache,
            &rand_pool,
            &mut rng,
        );
        write_texsizes(&ctx.queue, warp, &shaders.warp.params);
        let back = cache
            .resolve(canvas.back_name())
            .ok_or_else(|| anyhow!("canvas texture missing from cache"))?;
        draw(
            &ctx,
            &mut encoder,
            &layouts,
            warp,
            &shaders.warp.params,
            &back.resource.view,
            mesh,
            &uniform_buffer,
            &placeholder,
        )?;
        canvas.flip();

        // Fold the fresh front down through the blur targets so the
        // composite stage's sampler_blurN bindings see this frame.
        blur_chain.record(&ctx.device, &mut encoder, &cache, &canvas);

        // Composite pass: read the fresh front, render the final image.
        let stage_tex = canvas.stage_textures(&cache);
        resolve_bindings(
            &shaders.comp.params,
            &comp.params,
            &mut cache,
            &mut image_loader,
            &stage_tex,
            &mut rand_cache,
            &rand_pool,
            &mut rng,
        );
        write_texsizes(&ctx.queue, comp, &shaders.comp.params);
        draw(
            &ctx,
            &mut encoder,
            &layouts,
            comp,
            &shaders.comp.params,
            &output.view,
            &comp_buffers,
            &uniform_buffer,
            &placeholder,
        )?;

        ctx.queue.submit(Some(encoder.finish()));
        cache.enforce_budget(max_bytes);
        cache.enforce_image_limit(max_images);

        frames += 1;
        if frames % 600 == 0 {
            tracing::info!(
                fps = format!("{:.1}", orch.fps()),
                preset = %orch.ring.current().name,
                resident = cache.len(),
                "running"
            );
        }
        if exit_after.is_some_and(|limit| frames >= limit) {
            tracing::info!(frames, "frame limit reached");
            return Ok(());
        }
        let elapsed = now.elapsed();
        if elapsed < frame_budget {
            std::thread::sleep(frame_budget - elapsed);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn draw(
    ctx: &GpuContext,
    encoder: &mut wgpu::CommandEncoder,
    layouts: &PipelineLayouts,
    stage: &StagePipeline,
    table: &shaderprep::ParamTable,
    target: &wgpu::TextureView,
    mesh: &MeshBuffers,
    uniform_buffer: &wgpu::Buffer,
    placeholder: &GpuTexture,
) -> Result<()> {
    let uniform_group = renderer::uniform_bind_group(
        &ctx.device,
        layouts,
        table,
        uniform_buffer,
        stage.texsize_buffer.as_ref(),
    )?;
    let texture_group = renderer::texture_bind_group(
        &ctx.device,
        &stage.texture_layout,
        table,
        &stage.params.borrow(),
        placeholder,
    );
    renderer::draw_stage(encoder, target, &stage.pipeline, &uniform_group, &texture_group, mesh);
    Ok(())
}

fn write_texsizes(queue: &wgpu::Queue, stage: &StagePipeline, table: &shaderprep::ParamTable) {
    let Some(buffer) = &stage.texsize_buffer else {
        return;
    };
    let packed = renderer::pack_texsizes(table, &stage.params.borrow());
    queue.write_buffer(buffer, 0, bytemuck::cast_slice(&packed));
}

fn create_output(device: &wgpu::Device, width: u32, height: u32) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("composite output"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: CANVAS_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view }
}

pub fn print_paths() -> Result<()> {
    let paths = AppPaths::discover()?;
    println!("config:   {}", paths.config_dir().display());
    println!("presets:  {}", paths.preset_dir().display());
    println!("textures: {}", paths.texture_dir().display());
    println!("settings: {}", paths.settings_file().display());
    Ok(())
}
