use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "milkwarp",
    author,
    version,
    about = "MilkDrop-style music visualizer engine",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Preset file to start with; a random pick from the preset directory
    /// otherwise.
    #[arg(value_name = "PRESET")]
    pub preset: Option<PathBuf>,

    /// Preset directory; can also be supplied via `MILKWARP_PRESET_DIR`.
    #[arg(long, value_name = "DIR")]
    pub preset_dir: Option<PathBuf>,

    /// Internal canvas size override (e.g. `1024`).
    #[arg(long, value_name = "PIXELS")]
    pub canvas: Option<u32>,

    /// Warp mesh width override in cells.
    #[arg(long, value_name = "CELLS")]
    pub grid: Option<usize>,

    /// Start with the preset locked (no automatic switching).
    #[arg(long)]
    pub lock: bool,

    /// Walk presets in catalog order instead of randomly.
    #[arg(long)]
    pub sequential: bool,

    /// Stop after this many frames (headless benchmarking).
    #[arg(long, value_name = "FRAMES")]
    pub exit_after: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the resolved config, preset, and texture directories.
    Paths,
}

pub fn parse() -> Cli {
    Cli::parse()
}
