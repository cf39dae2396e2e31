//! Preset load state machine.
//!
//! A soft-cut load spreads its work across frames so the crossfade starts
//! without a hitch: the file is parsed into the pending slot immediately,
//! then each `tick` advances a counter by one, compiling the warp shader at
//! state 2 and the composite shader at state 5, and applying the swap when
//! the counter reaches 8. A hard cut (`blend_duration == 0`) does all of
//! that synchronously inside `load_preset`.

use std::path::Path;

use presetfile::{PresetError, PresetRing};
use rand::Rng;
use shaderprep::{
    compile_fallback, compile_stage, CompileBackend, CompileError, CompiledShader, ShaderModel,
    StageKind,
};

const STATE_IDLE: u8 = 0;
const STATE_COMPILE_WARP: u8 = 2;
const STATE_COMPILE_COMP: u8 = 5;
const STATE_APPLY: u8 = 8;

/// Both programmable stages of one preset, compiled.
pub struct StageShaders<S> {
    pub warp: CompiledShader<S>,
    pub comp: CompiledShader<S>,
}

/// Result of starting a load.
pub enum LoadStart<S> {
    /// Hard cut: the swap already happened.
    Applied(StageShaders<S>),
    /// Soft cut: the pending slot is filled, ticks will finish the job.
    InFlight,
    /// The file vanished or would not parse; nothing changed.
    Abandoned,
}

/// Result of one tick.
pub enum TickOutcome<S> {
    Idle,
    Working(u8),
    Applied(StageShaders<S>),
}

pub struct PresetLoader<S> {
    state: u8,
    blend_duration: f64,
    pending_warp: Option<CompiledShader<S>>,
    pending_comp: Option<CompiledShader<S>>,
    warnings: Vec<String>,
}

impl<S> Default for PresetLoader<S> {
    fn default() -> Self {
        Self {
            state: STATE_IDLE,
            blend_duration: 0.0,
            pending_warp: None,
            pending_comp: None,
            warnings: Vec::new(),
        }
    }
}

impl<S> PresetLoader<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.state == STATE_IDLE
    }

    pub fn loading_state(&self) -> u8 {
        self.state
    }

    /// Compile diagnostics accumulated since the last call, for display.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Starts loading `path`. With `blend_duration == 0` the whole
    /// import/compile/swap happens before this returns; otherwise the
    /// preset is parsed into the pending slot and compile work is deferred
    /// to `tick`. A load already in flight is discarded in favor of this one.
    pub fn load_preset<B: CompileBackend<Shader = S>>(
        &mut self,
        ring: &mut PresetRing,
        mesh: &mut meshwarp::WarpMesh,
        backend: &mut B,
        rng: &mut impl Rng,
        path: &Path,
        blend_duration: f64,
        now: f64,
        max_model: ShaderModel,
    ) -> Result<LoadStart<S>, CompileError> {
        match ring.pending_mut().import(path) {
            Ok(()) => {}
            Err(PresetError::Io { path, source }) => {
                // A file that disappeared between catalog scan and load is
                // not worth an on-screen error.
                tracing::debug!(path = %path.display(), error = %source, "preset unreadable; load abandoned");
                return Ok(LoadStart::Abandoned);
            }
            Err(err) => {
                self.warnings.push(err.to_string());
                return Ok(LoadStart::Abandoned);
            }
        }
        self.state = STATE_IDLE;
        self.pending_warp = None;
        self.pending_comp = None;
        self.blend_duration = blend_duration.max(0.0);

        if blend_duration <= 0.0 {
            self.pending_warp = Some(self.compile_slot(ring, backend, StageKind::Warp, max_model)?);
            self.pending_comp =
                Some(self.compile_slot(ring, backend, StageKind::Composite, max_model)?);
            let shaders = self.apply(ring, mesh, rng, now);
            return Ok(LoadStart::Applied(shaders));
        }

        self.state = 1;
        Ok(LoadStart::InFlight)
    }

    /// Advances an in-flight load by one state. At most one shader is
    /// compiled per call.
    pub fn tick<B: CompileBackend<Shader = S>>(
        &mut self,
        ring: &mut PresetRing,
        mesh: &mut meshwarp::WarpMesh,
        backend: &mut B,
        rng: &mut impl Rng,
        now: f64,
        max_model: ShaderModel,
    ) -> Result<TickOutcome<S>, CompileError> {
        if self.state == STATE_IDLE {
            return Ok(TickOutcome::Idle);
        }
        self.state += 1;
        match self.state {
            STATE_COMPILE_WARP => {
                self.pending_warp =
                    Some(self.compile_slot(ring, backend, StageKind::Warp, max_model)?);
            }
            STATE_COMPILE_COMP => {
                self.pending_comp =
                    Some(self.compile_slot(ring, backend, StageKind::Composite, max_model)?);
            }
            STATE_APPLY => {
                let shaders = self.apply(ring, mesh, rng, now);
                return Ok(TickOutcome::Applied(shaders));
            }
            _ => {}
        }
        Ok(TickOutcome::Working(self.state))
    }

    /// Compiles one stage of the pending preset, degrading to the built-in
    /// fallback shader when the preset's own source will not compile. Only a
    /// fallback failure is an error.
    fn compile_slot<B: CompileBackend<Shader = S>>(
        &mut self,
        ring: &PresetRing,
        backend: &mut B,
        stage: StageKind,
        max_model: ShaderModel,
    ) -> Result<CompiledShader<S>, CompileError> {
        let pending = ring.pending();
        let (body, version) = match stage {
            StageKind::Warp => (&pending.warp_shader, pending.ps_version_warp),
            StageKind::Composite => (&pending.comp_shader, pending.ps_version_comp),
        };
        if body.trim().is_empty() {
            return compile_fallback(backend, stage);
        }
        let model = ShaderModel::from_ps_version(version).min(max_model);
        match compile_stage(backend, stage, body, model) {
            Ok(shader) => Ok(shader),
            Err(err) => {
                self.warnings
                    .push(format!("{}: {err}", pending.name));
                compile_fallback(backend, stage)
            }
        }
    }

    /// Promotes the pending preset: rotates the ring, rolls a fresh blend
    /// pattern into the mesh, and captures blend endpoints from the outgoing
    /// preset.
    fn apply(
        &mut self,
        ring: &mut PresetRing,
        mesh: &mut meshwarp::WarpMesh,
        rng: &mut impl Rng,
        now: f64,
    ) -> StageShaders<S> {
        ring.rotate();
        mesh.randomize_blend_pattern(rng);
        let duration = self.blend_duration;
        let (current, old) = ring.current_and_old_mut();
        current.start_blend_from(old, now, duration);
        self.state = STATE_IDLE;
        StageShaders {
            // Both slots are always filled before apply is reachable.
            warp: self.pending_warp.take().expect("warp shader compiled"),
            comp: self.pending_comp.take().expect("comp shader compiled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::io::Write;

    /// Counts compiles and optionally fails preset bodies, never fallbacks.
    struct StubBackend {
        compiles: Vec<String>,
        fail_preset_bodies: bool,
    }

    impl StubBackend {
        fn new() -> Self {
            Self {
                compiles: Vec::new(),
                fail_preset_bodies: false,
            }
        }
    }

    impl CompileBackend for StubBackend {
        type Shader = String;

        fn compile(
            &mut self,
            label: &str,
            source: &str,
            _model: ShaderModel,
        ) -> Result<String, String> {
            self.compiles.push(label.to_string());
            if self.fail_preset_bodies && source.contains("custom_body_marker") {
                return Err("synthetic failure".into());
            }
            Ok(label.to_string())
        }
    }

    fn write_preset(dir: &std::path::Path, name: &str, extra: &str) -> std::path::PathBuf {
        let path = dir.join(format!("{name}.milk"));
        let mut f = std::fs::File::create(&path).expect("create");
        writeln!(f, "MILKDROP_PRESET_VERSION=201").unwrap();
        writeln!(f, "[preset00]").unwrap();
        writeln!(f, "fRating=4.0").unwrap();
        writeln!(f, "zoom=1.2").unwrap();
        write!(f, "{extra}").unwrap();
        path
    }

    fn harness() -> (PresetRing, meshwarp::WarpMesh, SmallRng) {
        (
            PresetRing::new(),
            meshwarp::WarpMesh::new(8, meshwarp::Aspect::square()),
            SmallRng::seed_from_u64(7),
        )
    }

    #[test]
    fn hard_cut_swaps_within_the_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_preset(dir.path(), "instant", "");
        let (mut ring, mut mesh, mut rng) = harness();
        let mut backend = StubBackend::new();
        let mut loader = PresetLoader::new();

        let start = loader
            .load_preset(
                &mut ring, &mut mesh, &mut backend, &mut rng, &path, 0.0, 1.0,
                ShaderModel::Ps4,
            )
            .expect("load");
        assert!(matches!(start, LoadStart::Applied(_)));
        assert_eq!(ring.current().name, "instant");
        assert!(loader.is_idle());
    }

    #[test]
    fn soft_cut_defers_swap_until_state_eight() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_preset(dir.path(), "deferred", "");
        let (mut ring, mut mesh, mut rng) = harness();
        ring.current_mut().name = "previous".into();
        let mut backend = StubBackend::new();
        let mut loader = PresetLoader::new();

        let start = loader
            .load_preset(
                &mut ring, &mut mesh, &mut backend, &mut rng, &path, 2.0, 1.0,
                ShaderModel::Ps4,
            )
            .expect("load");
        assert!(matches!(start, LoadStart::InFlight));
        assert_eq!(loader.loading_state(), 1);

        let mut states = Vec::new();
        let mut applied_at = None;
        for _ in 0..10 {
            assert!(applied_at.is_none() || loader.is_idle());
            match loader
                .tick(&mut ring, &mut mesh, &mut backend, &mut rng, 1.0, ShaderModel::Ps4)
                .expect("tick")
            {
                TickOutcome::Idle => break,
                TickOutcome::Working(s) => {
                    assert_eq!(ring.current().name, "previous");
                    states.push(s);
                }
                TickOutcome::Applied(_) => {
                    applied_at = Some(states.len());
                }
            }
        }
        assert_eq!(states, vec![2, 3, 4, 5, 6, 7]);
        assert_eq!(applied_at, Some(6));
        assert_eq!(ring.current().name, "deferred");
        assert_eq!(ring.old().name, "previous");
    }

    #[test]
    fn one_compile_unit_per_tick() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_preset(
            dir.path(),
            "shaded",
            "warp_1=`shader_body { ret = vec3(0.5); }\ncomp_1=`shader_body { ret = vec3(0.5); }\n",
        );
        let (mut ring, mut mesh, mut rng) = harness();
        let mut backend = StubBackend::new();
        let mut loader = PresetLoader::new();
        loader
            .load_preset(
                &mut ring, &mut mesh, &mut backend, &mut rng, &path, 2.0, 0.0,
                ShaderModel::Ps4,
            )
            .expect("load");
        let mut compiles_per_tick = Vec::new();
        for _ in 0..7 {
            let before = backend.compiles.len();
            loader
                .tick(&mut ring, &mut mesh, &mut backend, &mut rng, 0.0, ShaderModel::Ps4)
                .expect("tick");
            compiles_per_tick.push(backend.compiles.len() - before);
        }
        assert_eq!(compiles_per_tick, vec![1, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn missing_file_is_silently_abandoned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut ring, mut mesh, mut rng) = harness();
        ring.current_mut().name = "stays".into();
        let mut backend = StubBackend::new();
        let mut loader = PresetLoader::new();
        let start = loader
            .load_preset(
                &mut ring,
                &mut mesh,
                &mut backend,
                &mut rng,
                &dir.path().join("gone.milk"),
                0.0,
                0.0,
                ShaderModel::Ps4,
            )
            .expect("load");
        assert!(matches!(start, LoadStart::Abandoned));
        assert_eq!(ring.current().name, "stays");
        assert!(loader.take_warnings().is_empty());
    }

    #[test]
    fn broken_shader_degrades_to_fallback_with_warning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_preset(
            dir.path(),
            "broken",
            "warp_1=`shader_body { custom_body_marker }\n",
        );
        let (mut ring, mut mesh, mut rng) = harness();
        let mut backend = StubBackend::new();
        backend.fail_preset_bodies = true;
        let mut loader = PresetLoader::new();
        let start = loader
            .load_preset(
                &mut ring, &mut mesh, &mut backend, &mut rng, &path, 0.0, 0.0,
                ShaderModel::Ps4,
            )
            .expect("load");
        assert!(matches!(start, LoadStart::Applied(_)));
        let warnings = loader.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("broken"));
    }

    #[test]
    fn blend_endpoints_are_captured_on_apply() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_preset(dir.path(), "target", "zoom=3.0\n");
        let (mut ring, mut mesh, mut rng) = harness();
        ring.current_mut().params.zoom.set(1.0);
        let mut backend = StubBackend::new();
        let mut loader = PresetLoader::new();
        loader
            .load_preset(
                &mut ring, &mut mesh, &mut backend, &mut rng, &path, 4.0, 0.0,
                ShaderModel::Ps4,
            )
            .expect("load");
        for _ in 0..7 {
            loader
                .tick(&mut ring, &mut mesh, &mut backend, &mut rng, 10.0, ShaderModel::Ps4)
                .expect("tick");
        }
        let zoom = &ring.current().params.zoom;
        assert_eq!(zoom.value_at(10.0), 1.0);
        assert_eq!(zoom.value_at(12.0), 2.0);
        assert_eq!(zoom.value_at(14.0), 3.0);
    }
}
