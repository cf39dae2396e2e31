use anyhow::Result;

mod audio;
mod cli;
mod history;
mod loader;
mod messages;
mod orchestrator;
mod paths;
mod run;
mod settings;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();
    match cli.command {
        Some(cli::Command::Paths) => run::print_paths(),
        None => run::run(cli.run),
    }
}
