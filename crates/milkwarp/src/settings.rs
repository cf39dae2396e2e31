//! Persistent run settings, stored as a flat `key=value` file.
//!
//! The file carries a version pair; a file written by an older release is
//! discarded wholesale and replaced with defaults rather than migrated
//! field-by-field.

use std::path::Path;

use anyhow::{Context, Result};

/// Bumped whenever a default changes incompatibly.
pub const SETTINGS_VERSION: (u32, u32) = (2, 25);

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Weight random preset selection by stored ratings.
    pub enable_rating: bool,
    /// Walk the catalog in order instead of choosing randomly.
    pub sequential_order: bool,
    /// Internal canvas width; height follows the output aspect.
    pub tex_size: u32,
    /// Warp mesh width in cells; height is derived as 3/4 of this.
    pub grid_x: usize,
    /// Crossfade length for user-initiated switches, seconds.
    pub blend_time_user: f64,
    /// Crossfade length for automatic switches, seconds.
    pub blend_time_auto: f64,
    /// Base interval between automatic switches, seconds.
    pub time_between_presets: f64,
    /// Random spread added to the base interval.
    pub time_between_presets_rand: f64,
    /// Highest pixel-shader tier presets may require.
    pub max_ps_version: u32,
    /// Texture cache limits.
    pub max_images: usize,
    pub max_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_rating: true,
            sequential_order: false,
            tex_size: 1024,
            grid_x: 48,
            blend_time_user: 1.7,
            blend_time_auto: 2.7,
            time_between_presets: 16.0,
            time_between_presets_rand: 10.0,
            max_ps_version: 4,
            max_images: 32,
            max_bytes: 96 * 1024 * 1024,
        }
    }
}

impl Settings {
    /// Loads settings from `path`. A missing file, an unreadable file, or a
    /// stale version stamp all yield defaults.
    pub fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read settings; using defaults");
                Settings::default()
            }
        }
    }

    fn parse(text: &str) -> Settings {
        let mut version = (0u32, 0u32);
        let mut settings = Settings::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('[') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "nVersion" => version.0 = parse_or(value, 0),
                "nSubversion" => version.1 = parse_or(value, 0),
                "bEnableRating" => settings.enable_rating = parse_bool(value),
                "bSequentialPresetOrder" => settings.sequential_order = parse_bool(value),
                "nTexSizeX" => settings.tex_size = parse_or(value, settings.tex_size),
                "nGridX" => settings.grid_x = parse_or(value, settings.grid_x),
                "fBlendTimeUser" => settings.blend_time_user = parse_or(value, settings.blend_time_user),
                "fBlendTimeAuto" => settings.blend_time_auto = parse_or(value, settings.blend_time_auto),
                "fTimeBetweenPresets" => {
                    settings.time_between_presets = parse_or(value, settings.time_between_presets)
                }
                "fTimeBetweenPresetsRand" => {
                    settings.time_between_presets_rand =
                        parse_or(value, settings.time_between_presets_rand)
                }
                "nMaxPSVersion" => settings.max_ps_version = parse_or(value, settings.max_ps_version),
                "nMaxImages" => settings.max_images = parse_or(value, settings.max_images),
                "nMaxBytes" => settings.max_bytes = parse_or(value, settings.max_bytes),
                // Unknown keys are ignored so newer files load on older builds.
                _ => {}
            }
        }
        if version < SETTINGS_VERSION {
            tracing::info!(
                found = ?version,
                expected = ?SETTINGS_VERSION,
                "settings file predates this release; resetting to defaults"
            );
            return Settings::default();
        }
        settings
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str("[settings]\n");
        out.push_str(&format!("nVersion={}\n", SETTINGS_VERSION.0));
        out.push_str(&format!("nSubversion={}\n", SETTINGS_VERSION.1));
        out.push_str(&format!("bEnableRating={}\n", self.enable_rating as u8));
        out.push_str(&format!(
            "bSequentialPresetOrder={}\n",
            self.sequential_order as u8
        ));
        out.push_str(&format!("nTexSizeX={}\n", self.tex_size));
        out.push_str(&format!("nGridX={}\n", self.grid_x));
        out.push_str(&format!("fBlendTimeUser={}\n", self.blend_time_user));
        out.push_str(&format!("fBlendTimeAuto={}\n", self.blend_time_auto));
        out.push_str(&format!("fTimeBetweenPresets={}\n", self.time_between_presets));
        out.push_str(&format!(
            "fTimeBetweenPresetsRand={}\n",
            self.time_between_presets_rand
        ));
        out.push_str(&format!("nMaxPSVersion={}\n", self.max_ps_version));
        out.push_str(&format!("nMaxImages={}\n", self.max_images));
        out.push_str(&format!("nMaxBytes={}\n", self.max_bytes));
        std::fs::write(path, out)
            .with_context(|| format!("failed to write settings to {}", path.display()))
    }
}

fn parse_bool(value: &str) -> bool {
    !matches!(value, "0" | "false" | "")
}

fn parse_or<T: std::str::FromStr>(value: &str, default: T) -> T {
    value.parse().unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings::load(&dir.path().join("nope.ini"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn save_load_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.ini");
        let mut settings = Settings::default();
        settings.grid_x = 64;
        settings.blend_time_auto = 5.5;
        settings.sequential_order = true;
        settings.save(&path).expect("save");
        assert_eq!(Settings::load(&path), settings);
    }

    #[test]
    fn stale_version_resets_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.ini");
        std::fs::write(&path, "nVersion=1\nnSubversion=0\nnGridX=96\n").expect("write");
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.ini");
        std::fs::write(
            &path,
            format!(
                "nVersion={}\nnSubversion={}\nnFutureKnob=7\nnGridX=96\n",
                SETTINGS_VERSION.0, SETTINGS_VERSION.1
            ),
        )
        .expect("write");
        let settings = Settings::load(&path);
        assert_eq!(settings.grid_x, 96);
    }
}
