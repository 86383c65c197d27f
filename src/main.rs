mod engine;
mod utils;

use clap::Parser;
use tracing::info;

use engine::cli::Cli;
use engine::{Engine, EngineError, Windowing};

fn main() -> Result<(), EngineError> {
    utils::logger::init();

    let cli = Cli::parse();
    let windowed = !cli.no_window;
    let config = cli.into_config()?;

    info!("stereo-plane v{} starting", env!("CARGO_PKG_VERSION"));

    if windowed {
        Windowing::run_app(Engine::create(config)?)
    } else {
        engine::host::run_headless(config)
    }
}
