use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use assets::{fetcher_for, ShaderLoader, ShaderSources, TextureProvisioner, TextureSet};
use renderer::headless::HeadlessGl;
use renderer::{
    create_compatible_context, ContextAttributes, GlslDialect, PipelineState, Simulation,
    SimulationSetup, LOADED_MESSAGE,
};
use scheduler::{FrameDriver, FrameOutcome, FrameRate, FrameTick, ManualScheduler};
use simconfig::{SimulationConfig, SimulationParameters};
use tracing_subscriber::EnvFilter;

use crate::cli::RunArgs;
use crate::paths::AppPaths;
use crate::window;

/// Clock step used by headless runs when the frame rate is uncapped.
const UNCAPPED_STEP: Duration = Duration::from_micros(16_667);

pub fn run(args: RunArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    tracing::info!(
        assets = %config.assets.base,
        width = config.render.width,
        height = config.render.height,
        fps = config.render.fps,
        headless = args.headless,
        "starting black hole simulation"
    );

    let (sources, textures) = load_assets(&config)?;
    if args.headless {
        let report = run_headless(&config, &sources, &textures, args.frames)?;
        tracing::info!(
            frames = report.frames,
            draws = report.draws,
            state = ?report.state,
            synthesized_textures = report.synthesized_textures,
            leaked_objects = report.leaked_objects,
            "headless run finished"
        );
        Ok(())
    } else {
        window::run_window(config, sources, textures)
    }
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Loads the config file, then layers command-line overrides on top.
pub fn resolve_config(args: &RunArgs) -> Result<SimulationConfig> {
    let mut config = match &args.config {
        Some(path) => SimulationConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let path = AppPaths::discover()?.config_file();
            tracing::debug!(path = %path.display(), "resolved default config path");
            SimulationConfig::load_or_default(&path)
                .with_context(|| format!("failed to load config {}", path.display()))?
        }
    };

    if let Some(base) = &args.assets {
        config.assets.base = base.clone();
    }
    if let Some(size) = args.size {
        config.render.width = size.width;
        config.render.height = size.height;
    }
    if let Some(fps) = args.fps {
        config.render.fps = fps;
    }
    for (name, value) in &args.overrides {
        config
            .parameters
            .set(name, *value)
            .with_context(|| format!("invalid override {name}={value}"))?;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Formats the parameter record as TOML, or JSON when `json` is set.
pub fn render_params(parameters: &SimulationParameters, json: bool) -> Result<String> {
    if json {
        serde_json::to_string_pretty(parameters).context("failed to encode parameters as JSON")
    } else {
        toml::to_string_pretty(parameters).context("failed to encode parameters as TOML")
    }
}

fn load_assets(config: &SimulationConfig) -> Result<(ShaderSources, TextureSet)> {
    let fetcher = fetcher_for(&config.assets.base)
        .with_context(|| format!("unusable asset location '{}'", config.assets.base))?;
    tracing::debug!(source = %fetcher.describe(), "fetching shaders and textures");

    let sources = ShaderLoader::new(fetcher.as_ref(), &config.assets).load_all();
    let textures = TextureProvisioner::new(fetcher, config.assets.clone()).load();
    if textures.is_synthesized() {
        tracing::info!("texture assets unavailable; using procedural galaxy and colour map");
    }
    Ok((sources, textures))
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessReport {
    pub frames: u64,
    pub draws: usize,
    pub state: PipelineState,
    pub synthesized_textures: bool,
    /// GL objects still alive after teardown.
    pub leaked_objects: usize,
}

/// Drives `frames` frames against the recording backend with a manual clock.
pub fn run_headless(
    config: &SimulationConfig,
    sources: &ShaderSources,
    textures: &TextureSet,
    frames: u64,
) -> Result<HeadlessReport> {
    let gl = create_compatible_context(&ContextAttributes::default(), |_| {
        Ok::<_, Infallible>(HeadlessGl::new())
    })?;
    let simulation = Simulation::initialize(
        gl,
        SimulationSetup {
            width: config.render.width,
            height: config.render.height,
            dialect: GlslDialect::Es300,
            sources,
            textures,
            parameters: config.parameters,
        },
    )
    .context("failed to initialise the black hole scene")?;
    tracing::info!(state = ?simulation.state(), "{}", LOADED_MESSAGE);

    let state = simulation.state();
    let synthesized_textures = simulation.textures_synthesized();
    let simulation = Rc::new(RefCell::new(simulation));
    let mut driver = FrameDriver::new();
    let mut display = ManualScheduler::new();

    let frame_simulation = Rc::clone(&simulation);
    let rate = FrameRate::from_fps(config.render.fps);
    driver.set_loop(
        &mut display,
        Box::new(move |tick: &FrameTick| {
            frame_simulation.borrow_mut().render_frame(tick)?;
            Ok(())
        }),
        rate,
    );

    let step = match rate {
        FrameRate::Capped(fps) => Duration::from_secs_f64(1.0 / f64::from(fps)),
        FrameRate::Uncapped => UNCAPPED_STEP,
    };
    let mut now = Duration::ZERO;
    while driver.current_frame_number() < frames && display.take_pending().is_some() {
        match driver.on_display_frame(&mut display, now) {
            FrameOutcome::Halted(err) => return Err(err.context("frame loop halted")),
            outcome => {
                tracing::trace!(?outcome, frame = driver.current_frame_number(), "display frame")
            }
        }
        now += step;
    }
    driver.cancel_loop(&mut display);

    let simulation = Rc::try_unwrap(simulation)
        .map_err(|_| anyhow!("simulation still referenced after the loop was cancelled"))?
        .into_inner();
    let draws = simulation.gl().inner().draws().len();
    let gl = simulation.teardown();

    Ok(HeadlessReport {
        frames: driver.current_frame_number(),
        draws,
        state,
        synthesized_textures,
        leaked_objects: gl.inner().live_objects(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::SurfaceSize;
    use std::fs;
    use tempfile::TempDir;

    fn config_file(dir: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("blackhole.toml");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn cli_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let path = config_file(
            &dir,
            r#"
version = 1

[parameters]
gamma = 2.0

[render]
width = 800
height = 600
fps = 30.0
"#,
        );
        let args = RunArgs {
            config: Some(path),
            assets: Some("https://example.com/blackhole".to_string()),
            size: Some(SurfaceSize {
                width: 640,
                height: 360,
            }),
            overrides: vec![("bloomStrength".to_string(), 0.4)],
            ..RunArgs::default()
        };

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.parameters.gamma, 2.0);
        assert_eq!(config.parameters.bloom_strength, 0.4);
        assert_eq!((config.render.width, config.render.height), (640, 360));
        assert_eq!(config.render.fps, 30.0);
        assert_eq!(config.assets.base, "https://example.com/blackhole");
    }

    #[test]
    fn unknown_override_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = config_file(&dir, "version = 1\n");
        let args = RunArgs {
            config: Some(path),
            overrides: vec![("warpFactor".to_string(), 9.0)],
            ..RunArgs::default()
        };
        let err = resolve_config(&args).unwrap_err();
        assert!(format!("{err:#}").contains("warpFactor"));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let args = RunArgs {
            config: Some(dir.path().join("absent.toml")),
            ..RunArgs::default()
        };
        assert!(resolve_config(&args).is_err());
    }

    #[test]
    fn params_render_with_uniform_names() {
        let params = SimulationParameters::default();
        let toml = render_params(&params, false).unwrap();
        assert!(toml.contains("gravatationalLensing = 1.0"));
        let json: serde_json::Value =
            serde_json::from_str(&render_params(&params, true).unwrap()).unwrap();
        assert_eq!(json["adiskNoiseLOD"], serde_json::json!(7.0));
    }

    #[test]
    fn headless_run_renders_requested_frames() {
        let config = SimulationConfig::default();
        let report = run_headless(
            &config,
            &ShaderSources::fallback(),
            &TextureSet::synthesized(3),
            4,
        )
        .unwrap();
        assert_eq!(report.frames, 4);
        assert_eq!(report.state, PipelineState::FullPipeline);
        assert_eq!(report.draws, 4 * 5);
        assert!(report.synthesized_textures);
        assert_eq!(report.leaked_objects, 0);
    }

    #[test]
    fn headless_run_fails_when_scene_cannot_build() {
        let sources = ShaderSources {
            scene: "void main() {".to_string(),
            ..ShaderSources::fallback()
        };
        let err = run_headless(
            &SimulationConfig::default(),
            &sources,
            &TextureSet::synthesized(3),
            1,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("failed to initialise"));
    }
}
