//! Per-frame driver: time keeping, audio levels, expression evaluation, warp
//! mesh updates, preset navigation, and the pending-load tick.
//!
//! The orchestrator owns everything device-agnostic about a running session.
//! GPU work (pipelines, draws, texture binds) happens in the run loop, which
//! reads the frame state computed here and consumes compiled shaders as the
//! loader hands them over.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use catalog::PresetCatalog;
use exprvm::{Context, Program, Var};
use meshwarp::{Aspect, CompositeGrid, VertInfo, WarpMesh, WarpVertex};
use presetfile::{PresetRing, PresetState};
use shaderprep::{CompileBackend, CompileError, ShaderModel};

use crate::audio::{AudioAnalyzer, AudioLevels};
use crate::history::PresetHistory;
use crate::loader::{LoadStart, PresetLoader, StageShaders, TickOutcome};
use crate::messages::{MessageKind, MessageQueue};
use crate::settings::Settings;

/// Expression-visible knob names and the preset keys backing them.
const KNOB_VARS: &[(&str, &str)] = &[
    ("zoom", "zoom"),
    ("zoomexp", "fZoomExponent"),
    ("rot", "rot"),
    ("warp", "warp"),
    ("cx", "cx"),
    ("cy", "cy"),
    ("dx", "dx"),
    ("dy", "dy"),
    ("sx", "sx"),
    ("sy", "sy"),
    ("decay", "fDecay"),
    ("gamma", "fGammaAdj"),
    ("echo_zoom", "fVideoEchoZoom"),
    ("echo_alpha", "fVideoEchoAlpha"),
    ("wave_a", "fWaveAlpha"),
    ("wave_scale", "fWaveScale"),
    ("wave_smoothing", "fWaveSmoothing"),
    ("wave_mystery", "fWaveParam"),
    ("modwavealphastart", "fModWaveAlphaStart"),
    ("modwavealphaend", "fModWaveAlphaEnd"),
    ("warpanimspeed", "fWarpAnimSpeed"),
    ("warpscale", "fWarpScale"),
    ("wave_x", "wave_x"),
    ("wave_y", "wave_y"),
    ("wave_r", "wave_r"),
    ("wave_g", "wave_g"),
    ("wave_b", "wave_b"),
    ("ob_size", "ob_size"),
    ("ob_r", "ob_r"),
    ("ob_g", "ob_g"),
    ("ob_b", "ob_b"),
    ("ob_a", "ob_a"),
    ("ib_size", "ib_size"),
    ("ib_r", "ib_r"),
    ("ib_g", "ib_g"),
    ("ib_b", "ib_b"),
    ("ib_a", "ib_a"),
    ("mv_x", "nMotionVectorsX"),
    ("mv_y", "nMotionVectorsY"),
    ("mv_dx", "mv_dx"),
    ("mv_dy", "mv_dy"),
    ("mv_l", "mv_l"),
    ("mv_r", "mv_r"),
    ("mv_g", "mv_g"),
    ("mv_b", "mv_b"),
    ("mv_a", "mv_a"),
    ("b1n", "b1n"),
    ("b1x", "b1x"),
    ("b2n", "b2n"),
    ("b2x", "b2x"),
    ("b3n", "b3n"),
    ("b3x", "b3x"),
    ("b1ed", "b1ed"),
];

/// Per-vertex knobs the per-vertex code may override; order matters, it is
/// shared by the seed and read-back loops.
const PER_VERTEX_KNOBS: [&str; 10] =
    ["zoom", "zoomexp", "rot", "warp", "cx", "cy", "dx", "dy", "sx", "sy"];

/// Frame-effective values after per-frame code ran, consumed by the mesh
/// update and the uniform fill.
#[derive(Clone, Copy, Debug)]
pub struct FrameValues {
    pub zoom: f64,
    pub zoom_exp: f64,
    pub rot: f64,
    pub warp: f64,
    pub cx: f64,
    pub cy: f64,
    pub dx: f64,
    pub dy: f64,
    pub sx: f64,
    pub sy: f64,
    pub decay: f64,
    pub gamma: f64,
    pub echo_zoom: f64,
    pub echo_alpha: f64,
    pub warp_anim_speed: f64,
    pub warp_scale: f64,
    pub blur1_min: f64,
    pub blur1_max: f64,
    pub blur2_min: f64,
    pub blur2_max: f64,
    pub blur3_min: f64,
    pub blur3_max: f64,
    pub blur1_edge_darken: f64,
}

impl Default for FrameValues {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            zoom_exp: 1.0,
            rot: 0.0,
            warp: 1.0,
            cx: 0.5,
            cy: 0.5,
            dx: 0.0,
            dy: 0.0,
            sx: 1.0,
            sy: 1.0,
            decay: 0.98,
            gamma: 2.0,
            echo_zoom: 2.0,
            echo_alpha: 0.0,
            warp_anim_speed: 1.0,
            warp_scale: 1.0,
            blur1_min: 0.0,
            blur1_max: 1.0,
            blur2_min: 0.0,
            blur2_max: 1.0,
            blur3_min: 0.0,
            blur3_max: 1.0,
            blur1_edge_darken: 0.25,
        }
    }
}

/// Compiled expression programs for one preset slot, with the variable
/// handles the driver reads and writes every frame.
struct ExprState {
    ctx: Context,
    per_frame: Program,
    per_vertex: Program,
    knobs: Vec<(Var, &'static str)>,
    per_vertex_knobs: [Var; 10],
    v_time: Var,
    v_fps: Var,
    v_frame: Var,
    v_progress: Var,
    v_audio: [Var; 8],
    v_x: Var,
    v_y: Var,
    v_rad: Var,
    v_ang: Var,
}

impl ExprState {
    /// Compiles a preset's code sections and runs the init section once.
    /// Compile failures surface as returned diagnostics; the affected
    /// section falls back to an empty program.
    fn build(state: &PresetState, seed: u64, now: f64) -> (ExprState, Vec<String>) {
        let mut ctx = Context::with_seed(seed);
        let mut errors = Vec::new();

        let knobs: Vec<(Var, &'static str)> = KNOB_VARS
            .iter()
            .map(|(expr_name, key)| (ctx.register(expr_name), *key))
            .collect();
        let per_vertex_knobs =
            PER_VERTEX_KNOBS.map(|name| ctx.lookup(name).unwrap_or_else(|| ctx.register(name)));
        let v_time = ctx.register("time");
        let v_fps = ctx.register("fps");
        let v_frame = ctx.register("frame");
        let v_progress = ctx.register("progress");
        let v_audio = [
            "bass", "mid", "treb", "vol", "bass_att", "mid_att", "treb_att", "vol_att",
        ]
        .map(|name| ctx.register(name));
        let v_x = ctx.register("x");
        let v_y = ctx.register("y");
        let v_rad = ctx.register("rad");
        let v_ang = ctx.register("ang");
        for i in 1..=32 {
            ctx.register(&format!("q{i}"));
        }

        let mut compile = |label: &str, source: &str| match Program::compile(&mut ctx, source) {
            Ok(program) => program,
            Err(err) => {
                errors.push(format!("{}: {label} code: {err}", state.name));
                Program::empty()
            }
        };
        let init = compile("init", &state.per_frame_init_code);
        let per_frame = compile("per-frame", &state.per_frame_code);
        let per_vertex = compile("per-vertex", &state.per_pixel_code);

        let mut exprs = ExprState {
            ctx,
            per_frame,
            per_vertex,
            knobs,
            per_vertex_knobs,
            v_time,
            v_fps,
            v_frame,
            v_progress,
            v_audio,
            v_x,
            v_y,
            v_rad,
            v_ang,
        };
        exprs.seed_knobs(state, now);
        exprs.ctx.set(exprs.v_time, now);
        init.execute(&mut exprs.ctx);
        (exprs, errors)
    }

    fn empty() -> ExprState {
        let (exprs, _) = ExprState::build(&PresetState::default(), 0, 0.0);
        exprs
    }

    fn seed_knobs(&mut self, state: &PresetState, now: f64) {
        for (var, key) in &self.knobs {
            if let Some(param) = state.params.get(key) {
                self.ctx.set(*var, param.value_at(now));
            }
        }
    }

    fn knob(&self, name: &str) -> f64 {
        self.ctx
            .lookup(name)
            .map(|var| self.ctx.get(var))
            .unwrap_or_default()
    }

    /// Seeds frame variables, runs the per-frame program, and reads back the
    /// effective values.
    fn eval_frame(
        &mut self,
        state: &PresetState,
        clock: &FrameClock,
        levels: AudioLevels,
    ) -> FrameValues {
        self.seed_knobs(state, clock.time);
        self.ctx.set(self.v_time, clock.time);
        self.ctx.set(self.v_fps, clock.fps);
        self.ctx.set(self.v_frame, clock.frame as f64);
        self.ctx.set(self.v_progress, clock.progress);
        let audio = [
            levels.bass,
            levels.mid,
            levels.treb,
            levels.vol,
            levels.bass_att,
            levels.mid_att,
            levels.treb_att,
            levels.vol_att,
        ];
        for (var, value) in self.v_audio.iter().zip(audio) {
            self.ctx.set(*var, value as f64);
        }
        self.per_frame.execute(&mut self.ctx);

        FrameValues {
            zoom: self.knob("zoom"),
            zoom_exp: self.knob("zoomexp"),
            rot: self.knob("rot"),
            warp: self.knob("warp"),
            cx: self.knob("cx"),
            cy: self.knob("cy"),
            dx: self.knob("dx"),
            dy: self.knob("dy"),
            sx: self.knob("sx"),
            sy: self.knob("sy"),
            decay: self.knob("decay"),
            gamma: self.knob("gamma"),
            echo_zoom: self.knob("echo_zoom"),
            echo_alpha: self.knob("echo_alpha"),
            warp_anim_speed: self.knob("warpanimspeed"),
            warp_scale: self.knob("warpscale"),
            blur1_min: self.knob("b1n"),
            blur1_max: self.knob("b1x"),
            blur2_min: self.knob("b2n"),
            blur2_max: self.knob("b2x"),
            blur3_min: self.knob("b3n"),
            blur3_max: self.knob("b3x"),
            blur1_edge_darken: self.knob("b1ed"),
        }
    }

    /// Computes the warp-sampled uv for one vertex, letting the per-vertex
    /// program override the frame's knob values first.
    fn eval_vertex(&mut self, fv: &FrameValues, vert: &VertInfo, time: f64) -> [f32; 2] {
        let mut knobs = [
            fv.zoom, fv.zoom_exp, fv.rot, fv.warp, fv.cx, fv.cy, fv.dx, fv.dy, fv.sx, fv.sy,
        ];
        if !self.per_vertex.is_empty() {
            for (var, value) in self.per_vertex_knobs.iter().zip(knobs) {
                self.ctx.set(*var, value);
            }
            self.ctx.set(self.v_x, f64::from(vert.x) * 0.5 + 0.5);
            self.ctx.set(self.v_y, f64::from(vert.y) * 0.5 + 0.5);
            self.ctx.set(self.v_rad, f64::from(vert.rad));
            self.ctx.set(self.v_ang, f64::from(vert.ang));
            self.per_vertex.execute(&mut self.ctx);
            for (slot, var) in knobs.iter_mut().zip(self.per_vertex_knobs) {
                *slot = self.ctx.get(var);
            }
        }
        warp_uv(&knobs, fv, vert, time)
    }
}

/// The classic feedback-warp field: zoom scaled by a radius-dependent
/// exponent, stretch about the center, four drifting sine terms, rotation,
/// then translation.
fn warp_uv(knobs: &[f64; 10], fv: &FrameValues, vert: &VertInfo, time: f64) -> [f32; 2] {
    let [zoom, zoom_exp, rot, warp, cx, cy, dx, dy, sx, sy] = *knobs;
    let x = f64::from(vert.x);
    let y = f64::from(vert.y);
    let rad = f64::from(vert.rad);

    let zoom2 = zoom.abs().max(1e-6).powf(zoom_exp.powf(rad * 2.0 - 1.0));
    let mut u = x * 0.5 / zoom2 + 0.5;
    let mut v = y * 0.5 / zoom2 + 0.5;

    u = (u - cx) / if sx.abs() < 1e-6 { 1e-6 } else { sx } + cx;
    v = (v - cy) / if sy.abs() < 1e-6 { 1e-6 } else { sy } + cy;

    let warp_time = time * fv.warp_anim_speed;
    let scale = 1.0 / fv.warp_scale.abs().max(1e-6);
    let f0 = 11.68 + 4.0 * (warp_time * 1.413 + 10.0).cos();
    let f1 = 8.77 + 3.0 * (warp_time * 1.113 + 7.0).cos();
    let f2 = 10.54 + 3.0 * (warp_time * 1.233 + 3.0).cos();
    let f3 = 11.49 + 4.0 * (warp_time * 0.933 + 5.0).cos();
    let amp = warp * 0.0035;
    u += amp * (warp_time * 0.333 + scale * (x * f0 - y * f3)).sin();
    v += amp * (warp_time * 0.375 - scale * (x * f2 + y * f1)).cos();
    u += amp * (warp_time * 0.753 - scale * (x * f1 - y * f2)).cos();
    v += amp * (warp_time * 0.825 + scale * (x * f0 + y * f3)).sin();

    let (u2, v2) = (u - cx, v - cy);
    let (sin_rot, cos_rot) = rot.sin_cos();
    u = u2 * cos_rot - v2 * sin_rot + cx;
    v = u2 * sin_rot + v2 * cos_rot + cy;

    [(u - dx) as f32, (v - dy) as f32]
}

#[derive(Clone, Copy, Debug, Default)]
struct FrameClock {
    time: f64,
    fps: f64,
    frame: u64,
    progress: f64,
}

pub struct Orchestrator<S> {
    pub ring: PresetRing,
    pub mesh: WarpMesh,
    pub composite: CompositeGrid,
    pub catalog: PresetCatalog,
    pub messages: MessageQueue,
    pub settings: Settings,
    pub levels: AudioLevels,

    loader: PresetLoader<S>,
    history: PresetHistory,
    audio: AudioAnalyzer,
    rng: StdRng,

    time: f64,
    frame: u64,
    fps: f64,
    preset_start: f64,
    next_switch: f64,
    locked: bool,
    browse_requested: bool,

    blend_start: f64,
    blend_duration: f64,
    pending_blend: f64,
    pending_history: Option<PathBuf>,
    current_index: Option<usize>,

    current_exprs: ExprState,
    old_exprs: Option<ExprState>,
    frame_values: FrameValues,
    old_frame_values: FrameValues,
    rand_preset: [f32; 4],

    shaders: Option<StageShaders<S>>,
    shaders_changed: bool,
    warp_verts: Vec<WarpVertex>,
}

impl<S> Orchestrator<S> {
    pub fn new(settings: Settings, preset_dir: PathBuf, aspect: Aspect) -> Self {
        Self::with_seed(settings, preset_dir, aspect, rand::random())
    }

    pub fn with_seed(settings: Settings, preset_dir: PathBuf, aspect: Aspect, seed: u64) -> Self {
        let catalog = PresetCatalog::new(preset_dir, settings.max_ps_version);
        let mesh = WarpMesh::new(settings.grid_x, aspect);
        let composite = CompositeGrid::new(aspect);
        let mut rng = StdRng::seed_from_u64(seed);
        let rand_preset = std::array::from_fn(|_| rng.gen());
        Self {
            ring: PresetRing::new(),
            mesh,
            composite,
            catalog,
            messages: MessageQueue::new(),
            settings,
            levels: AudioLevels::default(),
            loader: PresetLoader::new(),
            history: PresetHistory::new(),
            audio: AudioAnalyzer::new(),
            rng,
            time: 0.0,
            frame: 0,
            fps: 60.0,
            preset_start: 0.0,
            next_switch: f64::INFINITY,
            locked: false,
            browse_requested: false,
            blend_start: 0.0,
            blend_duration: 0.0,
            pending_blend: 0.0,
            pending_history: None,
            current_index: None,
            current_exprs: ExprState::empty(),
            old_exprs: None,
            frame_values: FrameValues::default(),
            old_frame_values: FrameValues::default(),
            rand_preset,
            shaders: None,
            shaders_changed: false,
            warp_verts: Vec::new(),
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn rand_preset(&self) -> [f32; 4] {
        self.rand_preset
    }

    pub fn frame_values(&self) -> &FrameValues {
        &self.frame_values
    }

    pub fn warp_vertices(&self) -> &[WarpVertex] {
        &self.warp_verts
    }

    pub fn shaders(&self) -> Option<&StageShaders<S>> {
        self.shaders.as_ref()
    }

    /// True once after each preset apply; the renderer rebuilds pipelines
    /// when it sees it.
    pub fn take_shaders_changed(&mut self) -> bool {
        std::mem::take(&mut self.shaders_changed)
    }

    /// Set when navigation found the preset directory empty; the host
    /// should prompt for a directory instead of failing silently.
    pub fn take_browse_request(&mut self) -> bool {
        std::mem::take(&mut self.browse_requested)
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Suppresses automatic preset advance; manual navigation still works.
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
        let text = if locked { "preset locked" } else { "preset unlocked" };
        self.messages.post(MessageKind::Notify, text, self.time);
    }

    /// How far through its display interval the current preset is, 0..1.
    pub fn progress(&self) -> f64 {
        self.clock().progress
    }

    /// Loads an explicit preset file, recording it in history.
    pub fn load_file<B: CompileBackend<Shader = S>>(
        &mut self,
        backend: &mut B,
        path: &Path,
        hard: bool,
    ) -> Result<(), CompileError> {
        let blend = if hard {
            0.0
        } else {
            self.settings.blend_time_user
        };
        self.start_load(backend, path, blend, true)
    }

    pub fn blend_progress(&self) -> f64 {
        if self.old_exprs.is_none() || self.blend_duration <= 0.0 {
            return 1.0;
        }
        ((self.time - self.blend_start) / self.blend_duration).clamp(0.0, 1.0)
    }

    pub fn is_blending(&self) -> bool {
        self.old_exprs.is_some()
    }

    fn max_model(&self) -> ShaderModel {
        ShaderModel::from_ps_version(self.settings.max_ps_version)
    }

    fn clock(&self) -> FrameClock {
        let span = self.settings.time_between_presets.max(1e-3);
        FrameClock {
            time: self.time,
            fps: self.fps,
            frame: self.frame,
            progress: ((self.time - self.preset_start) / span).clamp(0.0, 1.0),
        }
    }

    /// Advances one frame: clock, audio, pending load, blend bookkeeping,
    /// auto preset switching, and expression-driven mesh update.
    pub fn tick<B: CompileBackend<Shader = S>>(
        &mut self,
        backend: &mut B,
        waveform: &[f32],
        dt: f64,
    ) -> Result<(), CompileError> {
        let dt = dt.clamp(1e-4, 1.0);
        self.time += dt;
        self.frame += 1;
        let instant = 1.0 / dt;
        self.fps = if self.frame < 4 {
            instant
        } else {
            self.fps * 0.93 + instant * 0.07
        };
        self.levels = self.audio.update(waveform, self.fps);
        self.messages.expire(self.time);
        if self.catalog.is_complete() {
            self.messages.clear_kind(MessageKind::ScanningPresets);
        }

        let max_model = self.max_model();
        let outcome = self.loader.tick(
            &mut self.ring,
            &mut self.mesh,
            backend,
            &mut self.rng,
            self.time,
            max_model,
        )?;
        if let TickOutcome::Applied(shaders) = outcome {
            self.install(shaders);
        }
        self.drain_warnings();

        if self.old_exprs.is_some() && self.time >= self.blend_start + self.blend_duration {
            self.old_exprs = None;
            self.ring.current_mut().params.finish_if_done(self.time);
        }

        if !self.locked && self.loader.is_idle() && self.time >= self.next_switch {
            let blend = self.settings.blend_time_auto;
            self.pick_fresh(backend, blend)?;
        }

        self.eval_frame();
        self.update_mesh();
        Ok(())
    }

    /// Loads the next preset: forward history first, then a fresh pick.
    /// `hard` switches instantly; otherwise the user blend time applies.
    pub fn request_next<B: CompileBackend<Shader = S>>(
        &mut self,
        backend: &mut B,
        hard: bool,
    ) -> Result<(), CompileError> {
        let blend = if hard {
            0.0
        } else {
            self.settings.blend_time_user
        };
        if let Some(path) = self.history.forward() {
            return self.start_load(backend, &path, blend, false);
        }
        self.pick_fresh(backend, blend)
    }

    /// Steps back through history. No-op at the back fence.
    pub fn request_prev<B: CompileBackend<Shader = S>>(
        &mut self,
        backend: &mut B,
    ) -> Result<(), CompileError> {
        let Some(path) = self.history.back() else {
            self.messages
                .post(MessageKind::Notify, "no earlier preset", self.time);
            return Ok(());
        };
        let blend = self.settings.blend_time_user;
        self.start_load(backend, &path, blend, false)
    }

    fn pick_fresh<B: CompileBackend<Shader = S>>(
        &mut self,
        backend: &mut B,
        blend: f64,
    ) -> Result<(), CompileError> {
        if self.catalog.is_empty() {
            self.catalog.update(false, false);
        }
        let Some(index) = self.select_index() else {
            self.browse_requested = true;
            self.messages.post(
                MessageKind::Misc,
                format!("no presets found in {}", self.catalog.dir().display()),
                self.time,
            );
            return Ok(());
        };
        let Some(info) = self.catalog.get(index) else {
            return Ok(());
        };
        self.current_index = Some(index);
        // Catalog names keep their extension on disk.
        let path = self.catalog.dir().join(&info.name);
        self.start_load(backend, &path, blend, true)
    }

    /// Picks a catalog index: sequential when configured, otherwise
    /// rating-weighted (or uniform with rating weighting disabled), retrying
    /// to avoid presets still in the history ring.
    fn select_index(&mut self) -> Option<usize> {
        if self.settings.sequential_order {
            let last = self
                .current_index
                .unwrap_or_else(|| self.catalog.len().saturating_sub(1));
            return self.catalog.next_sequential(last);
        }
        let mut choice = None;
        for _ in 0..200 {
            let candidate = if self.settings.enable_rating {
                self.catalog.select_weighted_random(&mut self.rng)?
            } else {
                self.catalog.select_uniform_random(&mut self.rng)?
            };
            choice = Some(candidate);
            let Some(info) = self.catalog.get(candidate) else {
                break;
            };
            let path = self.catalog.dir().join(&info.name);
            if !self.history.contains(&path) {
                break;
            }
        }
        choice
    }

    fn start_load<B: CompileBackend<Shader = S>>(
        &mut self,
        backend: &mut B,
        path: &Path,
        blend: f64,
        push_history: bool,
    ) -> Result<(), CompileError> {
        self.pending_blend = blend;
        self.pending_history = push_history.then(|| path.to_path_buf());
        let max_model = self.max_model();
        let start = self.loader.load_preset(
            &mut self.ring,
            &mut self.mesh,
            backend,
            &mut self.rng,
            path,
            blend,
            self.time,
            max_model,
        )?;
        match start {
            LoadStart::Applied(shaders) => self.install(shaders),
            LoadStart::InFlight => {}
            LoadStart::Abandoned => {
                self.pending_history = None;
            }
        }
        self.drain_warnings();
        Ok(())
    }

    /// Takes ownership of a freshly applied preset: new expression state,
    /// new shaders, new switch schedule.
    fn install(&mut self, shaders: StageShaders<S>) {
        let (exprs, errors) =
            ExprState::build(self.ring.current(), self.rng.gen(), self.time);
        for err in errors {
            self.messages.post(MessageKind::Preset, err, self.time);
        }
        self.old_exprs = Some(std::mem::replace(&mut self.current_exprs, exprs));
        self.old_frame_values = self.frame_values;
        self.blend_start = self.time;
        self.blend_duration = self.pending_blend;
        if self.blend_duration <= 0.0 {
            self.old_exprs = None;
        }
        self.rand_preset = std::array::from_fn(|_| self.rng.gen());
        self.preset_start = self.time;
        self.schedule_next_switch();
        self.shaders = Some(shaders);
        self.shaders_changed = true;
        if let Some(path) = self.pending_history.take() {
            self.history.push(&path);
        }
        tracing::info!(preset = %self.ring.current().name, "preset applied");
    }

    fn schedule_next_switch(&mut self) {
        let spread = self.settings.time_between_presets_rand.max(0.0);
        self.next_switch =
            self.time + self.settings.time_between_presets + self.rng.gen::<f64>() * spread;
    }

    fn drain_warnings(&mut self) {
        for warning in self.loader.take_warnings() {
            self.messages.post(MessageKind::Preset, warning, self.time);
        }
    }

    fn eval_frame(&mut self) {
        let clock = self.clock();
        self.frame_values =
            self.current_exprs
                .eval_frame(self.ring.current(), &clock, self.levels);
        if let Some(old) = self.old_exprs.as_mut() {
            self.old_frame_values = old.eval_frame(self.ring.old(), &clock, self.levels);
        }
    }

    /// Rebuilds the warp vertex stream, lerping per vertex between the old
    /// and new presets' fields while a blend is running.
    fn update_mesh(&mut self) {
        let t = self.blend_progress() as f32;
        let time = self.time;
        let Self {
            mesh,
            current_exprs,
            old_exprs,
            frame_values,
            old_frame_values,
            warp_verts,
            ..
        } = self;
        warp_verts.clear();
        warp_verts.reserve(mesh.vertex_count());
        for (i, vert) in mesh.verts().iter().enumerate() {
            let uv_new = current_exprs.eval_vertex(frame_values, vert, time);
            let uv = match old_exprs.as_mut() {
                Some(old) => {
                    let uv_old = old.eval_vertex(old_frame_values, vert, time);
                    let mix = mesh.mix_at(i, t);
                    [
                        uv_old[0] + (uv_new[0] - uv_old[0]) * mix,
                        uv_old[1] + (uv_new[1] - uv_old[1]) * mix,
                    ]
                }
                None => uv_new,
            };
            warp_verts.push(WarpVertex {
                pos: [vert.x, vert.y],
                uv,
                uv_orig: [vert.x * 0.5 + 0.5, vert.y * 0.5 + 0.5],
                rad_ang: [vert.rad, vert.ang],
            });
        }
    }
}
