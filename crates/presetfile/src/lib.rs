//! Preset state: every parameter, code section, and shader body a `.milk`
//! file carries, plus the machinery for crossfading between two presets.
//!
//! The plugin owns exactly three preset slots for its whole lifetime:
//! current, old (valid during a blend), and new-pending (valid while a load
//! is in flight), held in a fixed array and rotated by index. See
//! [`PresetRing`].

use std::path::{Path, PathBuf};

mod blend;
mod custom;
mod milk;
mod params;

pub use blend::Blendable;
pub use custom::{CustomShape, CustomWave, MAX_CUSTOM_SHAPES, MAX_CUSTOM_WAVES};
pub use milk::NoSection;
pub use params::PresetParams;

/// Current file-format version written by export.
pub const PRESET_FILE_VERSION: u32 = 201;

#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("failed to read preset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write preset {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("'{path}' has no [preset00] section")]
    MissingSection { path: PathBuf },
}

/// Which code section an external edit touched. The loader uses this to
/// recompile only what changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeSection {
    PerFrameInit,
    PerFrame,
    PerVertex,
    WarpShader,
    CompShader,
    WaveInit(usize),
    WaveFrame(usize),
    WavePoint(usize),
    ShapeInit(usize),
    ShapeFrame(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PresetState {
    /// Display name and identity for duplicate suppression; the file stem.
    pub name: String,
    pub rating: f64,
    pub preset_version: u32,
    pub ps_version: u32,
    pub ps_version_warp: u32,
    pub ps_version_comp: u32,

    pub params: PresetParams,

    pub wave_mode: u32,
    pub echo_orient: u32,
    pub additive_waves: bool,
    pub wave_dots: bool,
    pub wave_thick: bool,
    pub mod_wave_alpha_by_volume: bool,
    pub maximize_wave_color: bool,
    pub tex_wrap: bool,
    pub darken_center: bool,
    pub red_blue_stereo: bool,
    pub brighten: bool,
    pub darken: bool,
    pub solarize: bool,
    pub invert: bool,

    pub per_frame_init_code: String,
    pub per_frame_code: String,
    pub per_pixel_code: String,
    pub warp_shader: String,
    pub comp_shader: String,

    pub waves: [CustomWave; MAX_CUSTOM_WAVES],
    pub shapes: [CustomShape; MAX_CUSTOM_SHAPES],

    dirty: Vec<CodeSection>,
}

impl Default for PresetState {
    fn default() -> Self {
        Self {
            name: String::new(),
            rating: 3.0,
            preset_version: PRESET_FILE_VERSION,
            ps_version: 2,
            ps_version_warp: 2,
            ps_version_comp: 2,
            params: PresetParams::default(),
            wave_mode: 0,
            echo_orient: 0,
            additive_waves: false,
            wave_dots: false,
            wave_thick: false,
            mod_wave_alpha_by_volume: false,
            maximize_wave_color: true,
            tex_wrap: true,
            darken_center: false,
            red_blue_stereo: false,
            brighten: false,
            darken: false,
            solarize: false,
            invert: false,
            per_frame_init_code: String::new(),
            per_frame_code: String::new(),
            per_pixel_code: String::new(),
            warp_shader: String::new(),
            comp_shader: String::new(),
            waves: Default::default(),
            shapes: Default::default(),
            dirty: Vec::new(),
        }
    }
}

impl PresetState {
    /// Parses a `.milk` file into this state, replacing everything. The
    /// preset name becomes the file stem.
    pub fn import(&mut self, path: &Path) -> Result<(), PresetError> {
        let text = std::fs::read_to_string(path).map_err(|source| PresetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.import_text(&name, &text)
            .map_err(|_| PresetError::MissingSection {
                path: path.to_path_buf(),
            })
    }

    /// Parses preset text. Errors only when the `[preset00]` section is
    /// absent; unknown keys and malformed values are ignored.
    pub fn import_text(&mut self, name: &str, text: &str) -> Result<(), milk::NoSection> {
        milk::import(self, name, text)
    }

    pub fn export(&self, path: &Path) -> Result<(), PresetError> {
        std::fs::write(path, self.export_text()).map_err(|source| PresetError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn export_text(&self) -> String {
        milk::export(self)
    }

    /// Highest pixel-shader tier any of this preset's stages needs.
    pub fn required_ps_version(&self) -> u32 {
        self.ps_version
            .max(self.ps_version_warp)
            .max(self.ps_version_comp)
    }

    pub fn uses_shaders(&self) -> bool {
        !self.warp_shader.trim().is_empty() || !self.comp_shader.trim().is_empty()
    }

    /// Captures blend start points for every blendable knob from `old`,
    /// beginning a crossfade over `[now, now + duration]`.
    pub fn start_blend_from(&mut self, old: &PresetState, now: f64, duration: f64) {
        self.params.start_blend_from(&old.params, now, duration);
    }

    /// Reports an external edit to a code section. Consumed by the loader,
    /// which recompiles the affected program or shader.
    pub fn notify_code_changed(&mut self, section: CodeSection) {
        if !self.dirty.contains(&section) {
            self.dirty.push(section);
        }
    }

    pub fn take_dirty(&mut self) -> Vec<CodeSection> {
        std::mem::take(&mut self.dirty)
    }
}

/// Role indices into the three fixed preset slots.
#[derive(Debug)]
pub struct PresetRing {
    slots: [PresetState; 3],
    current: usize,
    old: usize,
    pending: usize,
}

impl PresetRing {
    pub fn new() -> Self {
        Self {
            slots: [
                PresetState::default(),
                PresetState::default(),
                PresetState::default(),
            ],
            current: 0,
            old: 1,
            pending: 2,
        }
    }

    pub fn current(&self) -> &PresetState {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut PresetState {
        &mut self.slots[self.current]
    }

    pub fn old(&self) -> &PresetState {
        &self.slots[self.old]
    }

    pub fn pending(&self) -> &PresetState {
        &self.slots[self.pending]
    }

    pub fn pending_mut(&mut self) -> &mut PresetState {
        &mut self.slots[self.pending]
    }

    /// Both current and old, for blend-endpoint capture. Role indices are
    /// always distinct.
    pub fn current_and_old_mut(&mut self) -> (&mut PresetState, &PresetState) {
        if self.current < self.old {
            let (lo, hi) = self.slots.split_at_mut(self.old);
            (&mut lo[self.current], &hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(self.current);
            (&mut hi[0], &lo[self.old])
        }
    }

    /// Promotes the pending slot: old takes the current preset, current
    /// takes pending, and the slot that held old is recycled as pending.
    pub fn rotate(&mut self) {
        let freed = self.old;
        self.old = self.current;
        self.current = self.pending;
        self.pending = freed;
    }
}

impl Default for PresetRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_rotation_cycles_roles() {
        let mut ring = PresetRing::new();
        ring.current_mut().name = "a".into();
        ring.pending_mut().name = "b".into();
        ring.rotate();
        assert_eq!(ring.current().name, "b");
        assert_eq!(ring.old().name, "a");
        ring.pending_mut().name = "c".into();
        ring.rotate();
        assert_eq!(ring.current().name, "c");
        assert_eq!(ring.old().name, "b");
        // Slots are reused, never grown.
        let roles = [ring.current, ring.old, ring.pending];
        let mut sorted = roles;
        sorted.sort_unstable();
        assert_eq!(sorted, [0, 1, 2]);
    }

    #[test]
    fn dirty_sections_dedupe_and_drain() {
        let mut state = PresetState::default();
        state.notify_code_changed(CodeSection::PerFrame);
        state.notify_code_changed(CodeSection::WarpShader);
        state.notify_code_changed(CodeSection::PerFrame);
        let dirty = state.take_dirty();
        assert_eq!(dirty, vec![CodeSection::PerFrame, CodeSection::WarpShader]);
        assert!(state.take_dirty().is_empty());
    }

    #[test]
    fn required_ps_version_takes_max() {
        let mut state = PresetState::default();
        state.ps_version = 2;
        state.ps_version_warp = 3;
        state.ps_version_comp = 2;
        assert_eq!(state.required_ps_version(), 3);
    }

    #[test]
    fn blend_capture_runs_through_state() {
        let mut old = PresetState::default();
        old.params.zoom.set(2.0);
        let mut new = PresetState::default();
        new.params.zoom.set(6.0);
        new.start_blend_from(&old, 10.0, 4.0);
        assert_eq!(new.params.zoom.value_at(10.0), 2.0);
        assert_eq!(new.params.zoom.value_at(12.0), 4.0);
        assert_eq!(new.params.zoom.value_at(14.0), 6.0);
    }
}
