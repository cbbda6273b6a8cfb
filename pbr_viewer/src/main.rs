//! PBR viewer
//!
//! Opens a window and renders an OBJ model (or a procedural cube) on a ground plane with an
//! orbiting camera.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use nalgebra::Point3;
use pbr_engine::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "pbr_viewer", version, about = "Vulkan physically-based model viewer")]
struct CliArgs {
    /// Worker threads for asset loading; 0 picks the number of available cores
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Engine configuration file (.toml or .ron)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// OBJ model to display instead of the configured one
    #[arg(short, long)]
    model: Option<PathBuf>,
}

/// Orbit radius and height of the camera around the origin
const ORBIT_RADIUS: f32 = 4.5;
const ORBIT_HEIGHT: f32 = 2.0;
/// Radians per second
const ORBIT_SPEED: f32 = 0.4;

fn resolve_threads(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

fn load_config(args: &CliArgs) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(model) = &args.model {
        config = config.with_model(model);
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn run(args: &CliArgs) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let logging = LoggingContext::init(&config.logging).context("Failed to initialize logging")?;

    log::info!(
        "Using {} worker thread(s); the render loop runs on the main thread",
        resolve_threads(args.threads)
    );

    let mut engine = Engine::new(config, &logging).context("Failed to initialize the renderer")?;
    engine.load_default_scene().context("Failed to load the scene")?;

    let mut angle = 0.0_f32;
    engine
        .run(|scene, dt| {
            angle = (angle + ORBIT_SPEED * dt) % std::f32::consts::TAU;
            scene.camera.position = Point3::new(
                ORBIT_RADIUS * angle.sin(),
                ORBIT_HEIGHT,
                ORBIT_RADIUS * angle.cos(),
            );
        })
        .context("Renderer failed")?;

    log::info!("Viewer finished after {} frames", engine.frame_number());
    Ok(())
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = CliArgs::parse_from(["pbr_viewer", "-t", "4", "-m", "teapot.obj"]);
        assert_eq!(args.threads, 4);
        assert_eq!(args.model, Some(PathBuf::from("teapot.obj")));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_threads_auto_resolves() {
        assert_eq!(resolve_threads(3), 3);
        assert!(resolve_threads(0) >= 1);
    }

    #[test]
    fn test_model_override() {
        let args = CliArgs::parse_from(["pbr_viewer", "--model", "cube.obj"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.assets.model_path, Some(PathBuf::from("cube.obj")));
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let args = CliArgs::parse_from(["pbr_viewer", "-c", "no/such/config.toml"]);
        let err = load_config(&args).unwrap_err();
        assert!(format!("{err:#}").contains("no/such/config.toml"));
    }
}
