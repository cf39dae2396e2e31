//! Resolves the preset, texture, and config directories, with environment
//! overrides for scripted and test runs.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "MILKWARP_CONFIG_DIR";
pub const ENV_PRESET_DIR: &str = "MILKWARP_PRESET_DIR";
pub const ENV_TEXTURE_DIR: &str = "MILKWARP_TEXTURE_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "milkwarp";
const APPLICATION: &str = "milkwarp";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
    preset_dir: PathBuf,
    texture_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;

        let config_dir = resolve_directory(ENV_CONFIG_DIR, project_dirs.config_dir(), "config")?;
        let preset_dir = resolve_directory(
            ENV_PRESET_DIR,
            &project_dirs.data_dir().join("presets"),
            "preset",
        )?;
        let texture_dir = resolve_directory(
            ENV_TEXTURE_DIR,
            &project_dirs.data_dir().join("textures"),
            "texture",
        )?;

        Ok(Self {
            config_dir,
            preset_dir,
            texture_dir,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn preset_dir(&self) -> &Path {
        &self.preset_dir
    }

    pub fn texture_dir(&self) -> &Path {
        &self.texture_dir
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("milkwarp.ini")
    }
}

fn resolve_directory(env_key: &str, default: &Path, label: &str) -> Result<PathBuf> {
    let dir = match env::var_os(env_key) {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => default.to_path_buf(),
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {label} directory {}", dir.display()))?;
    Ok(dir)
}
