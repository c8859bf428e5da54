use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use assets::{
    procedural::SKYBOX_SIZE, AssetFetcher, DirectoryFetcher, FetchError, ShaderLoader,
    ShaderSources, TextureProvisioner, TextureSet,
};
use renderer::headless::{GlEvent, HeadlessGl, UniformValue};
use renderer::{
    CompatContext, ContextAttributes, GlslDialect, PipelineState, Simulation, SimulationSetup,
};
use scheduler::{FrameDriver, FrameOutcome, FrameRate, FrameTick, ManualScheduler};
use simconfig::{AssetSettings, SimulationParameters};

const VERTEX: &str = r#"#version 300 es
precision highp float;
in vec3 position;
out vec2 uv;
void main() {
    uv = (position.xy + 1.0) * 0.5;
    gl_Position = vec4(position, 1.0);
}
"#;

const SCENE: &str = r#"#version 300 es
precision highp float;
in vec2 uv;
out vec4 fragColor;
uniform samplerCube galaxy;
uniform sampler2D colorMap;
uniform vec2 resolution;
uniform float time;
uniform float mouseX;
uniform float mouseY;
uniform float gravatationalLensing;
uniform float adiskSpeed;
void main() {
    vec2 mouse = vec2(mouseX, mouseY) / resolution;
    vec3 sky = texture(galaxy, vec3(uv - mouse, 1.0)).rgb * gravatationalLensing;
    vec3 disk = texture(colorMap, vec2(fract(time * adiskSpeed), 0.5)).rgb;
    fragColor = vec4(sky + disk, 1.0);
}
"#;

const BRIGHTNESS: &str = r#"#version 300 es
precision highp float;
in vec2 uv;
out vec4 fragColor;
uniform sampler2D texture0;
uniform vec2 resolution;
void main() {
    vec3 color = texture(texture0, gl_FragCoord.xy / resolution).rgb;
    float luma = dot(color, vec3(0.2126, 0.7152, 0.0722));
    fragColor = vec4(color * step(0.8, luma), 1.0);
}
"#;

const BLOOM: &str = r#"#version 300 es
precision highp float;
in vec2 uv;
out vec4 fragColor;
uniform sampler2D texture0;
uniform sampler2D texture1;
uniform float bloomStrength;
uniform float tone;
void main() {
    vec3 base = texture(texture0, uv).rgb;
    vec3 glow = texture(texture1, uv).rgb;
    fragColor = vec4((base + glow * bloomStrength) * tone, 1.0);
}
"#;

const TONEMAP: &str = r#"#version 300 es
precision highp float;
in vec2 uv;
out vec4 fragColor;
uniform sampler2D texture0;
uniform float tonemappingEnabled;
uniform float gamma;
void main() {
    vec3 color = texture(texture0, uv).rgb;
    vec3 mapped = mix(color, color / (color + vec3(1.0)), tonemappingEnabled);
    fragColor = vec4(pow(mapped, vec3(1.0 / gamma)), 1.0);
}
"#;

const PASSTHROUGH: &str = r#"#version 300 es
precision highp float;
in vec2 uv;
out vec4 fragColor;
uniform sampler2D texture0;
uniform vec2 resolution;
uniform float time;
void main() {
    vec2 st = gl_FragCoord.xy / resolution;
    fragColor = vec4(texture(texture0, st).rgb, 1.0 + 0.0 * time);
}
"#;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 180;

fn sources() -> ShaderSources {
    ShaderSources {
        vertex: VERTEX.to_string(),
        scene: SCENE.to_string(),
        brightness: BRIGHTNESS.to_string(),
        bloom_composite: BLOOM.to_string(),
        tonemapping: TONEMAP.to_string(),
        passthrough: PASSTHROUGH.to_string(),
    }
}

fn simulation(sources: &ShaderSources) -> Result<Simulation<CompatContext<HeadlessGl>>> {
    let textures = TextureSet::synthesized(11);
    let gl = CompatContext::new(HeadlessGl::new(), ContextAttributes::default().normalize());
    let sim = Simulation::initialize(
        gl,
        SimulationSetup {
            width: WIDTH,
            height: HEIGHT,
            dialect: GlslDialect::Es300,
            sources,
            textures: &textures,
            parameters: SimulationParameters::default(),
        },
    )?;
    Ok(sim)
}

fn tick(frame_number: u64, delta_ms: u64) -> FrameTick {
    FrameTick {
        frame_number,
        timestamp: Duration::from_millis(frame_number * 100),
        delta: Duration::from_millis(delta_ms),
    }
}

#[test]
fn full_pipeline_runs_every_pass_in_order() -> Result<()> {
    let mut sim = simulation(&sources())?;
    assert_eq!(sim.state(), PipelineState::FullPipeline);
    sim.set_pointer(0.25, 0.5);
    sim.gl().inner().clear_events();

    sim.render_frame(&tick(1, 500))?;

    let gl = sim.gl().inner();
    let targets = sim.pipeline().targets().expect("full pipeline has targets");
    let draws = gl.draws();
    assert_eq!(draws.len(), 5);

    let framebuffers: Vec<_> = draws.iter().map(|d| d.framebuffer).collect();
    assert_eq!(
        framebuffers,
        vec![
            Some(targets.scene.framebuffer()),
            Some(targets.brightness.framebuffer()),
            Some(targets.bloom.framebuffer()),
            Some(targets.output.framebuffer()),
            None,
        ]
    );

    let clears: Vec<_> = gl
        .events()
        .into_iter()
        .filter_map(|event| match event {
            GlEvent::Clear {
                framebuffer, color, ..
            } => Some((framebuffer, color)),
            _ => None,
        })
        .collect();
    assert_eq!(clears.len(), 5);
    assert!(clears.iter().all(|(_, color)| *color == [0.0, 0.0, 0.0, 1.0]));
    assert_eq!(
        clears.iter().map(|(fb, _)| *fb).collect::<Vec<_>>(),
        framebuffers
    );

    let scene = &draws[0];
    let time = 0.25f32;
    assert_eq!(scene.uniform("galaxy"), Some(UniformValue::Int(0)));
    assert_eq!(scene.uniform("colorMap"), Some(UniformValue::Int(1)));
    assert_eq!(
        scene.uniform("resolution"),
        Some(UniformValue::Vec2([WIDTH as f32, HEIGHT as f32]))
    );
    assert_eq!(scene.uniform("time"), Some(UniformValue::Float(time)));
    assert_eq!(scene.uniform("mouseX"), Some(UniformValue::Float(80.0)));
    assert_eq!(scene.uniform("mouseY"), Some(UniformValue::Float(90.0)));
    assert_eq!(scene.uniform("gravatationalLensing"), Some(UniformValue::Float(1.0)));
    assert_eq!(scene.uniform("adiskSpeed"), Some(UniformValue::Float(0.3)));
    assert!(scene.texture(0, glow::TEXTURE_CUBE_MAP).is_some());

    let brightness = &draws[1];
    assert_eq!(
        brightness.texture(0, glow::TEXTURE_2D),
        Some(targets.scene.texture())
    );
    assert_eq!(brightness.uniform("texture0"), Some(UniformValue::Int(0)));

    let bloom = &draws[2];
    assert_eq!(bloom.texture(0, glow::TEXTURE_2D), Some(targets.scene.texture()));
    assert_eq!(
        bloom.texture(1, glow::TEXTURE_2D),
        Some(targets.brightness.texture())
    );
    assert_eq!(bloom.uniform("texture1"), Some(UniformValue::Int(1)));
    assert_eq!(bloom.uniform("bloomStrength"), Some(UniformValue::Float(0.15)));
    assert_eq!(bloom.uniform("tone"), Some(UniformValue::Float(1.0)));

    let tonemap = &draws[3];
    assert_eq!(tonemap.texture(0, glow::TEXTURE_2D), Some(targets.bloom.texture()));
    assert_eq!(tonemap.uniform("tonemappingEnabled"), Some(UniformValue::Float(1.0)));
    assert_eq!(tonemap.uniform("gamma"), Some(UniformValue::Float(1.0)));

    let passthrough = &draws[4];
    assert_eq!(
        passthrough.texture(0, glow::TEXTURE_2D),
        Some(targets.output.texture())
    );
    assert_eq!(passthrough.uniform("time"), Some(UniformValue::Float(time)));
    assert_eq!(
        passthrough.uniform("resolution"),
        Some(UniformValue::Vec2([WIDTH as f32, HEIGHT as f32]))
    );
    Ok(())
}

#[test]
fn broken_bloom_shader_renders_directly_to_surface() -> Result<()> {
    let broken = ShaderSources {
        bloom_composite: BLOOM.replace("void main() {", "void main() {{"),
        ..sources()
    };
    let mut degraded = simulation(&broken)?;
    assert_eq!(degraded.state(), PipelineState::DegradedDirect);
    assert!(degraded.pipeline().targets().is_none());

    let gl = degraded.gl().inner();
    assert_eq!(gl.live_framebuffers(), 0);
    assert_eq!(gl.live_programs(), 1);
    gl.clear_events();

    for frame in 1..=5 {
        degraded.render_frame(&tick(frame, 16))?;
    }
    let gl = degraded.gl().inner();
    let draws = gl.draws();
    assert_eq!(draws.len(), 5);
    assert!(draws.iter().all(|d| d.framebuffer.is_none()));
    assert!(draws.iter().all(|d| d.program == draws[0].program));
    assert_eq!(gl.live_programs(), 1);
    assert_eq!(gl.live_shaders(), 0);

    let mut full = simulation(&sources())?;
    full.gl().inner().clear_events();
    full.render_frame(&tick(1, 16))?;
    let full_scene = full.gl().inner().draws()[0].uniforms.clone();
    degraded.gl().inner().clear_events();
    degraded.render_frame(&tick(6, 0))?;
    let mut degraded_scene = degraded.gl().inner().draws()[0].uniforms.clone();
    // The degraded run has accumulated more time; everything else matches.
    degraded_scene.insert("time".to_string(), UniformValue::Float(0.016));
    assert_eq!(degraded_scene, full_scene);
    Ok(())
}

struct Offline;

impl AssetFetcher for Offline {
    fn describe(&self) -> String {
        "offline".to_string()
    }

    fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Status {
            url: path.to_string(),
            status: 503,
        })
    }
}

#[test]
fn unreachable_assets_upload_procedural_textures() -> Result<()> {
    let set = TextureProvisioner::new(Arc::new(Offline), AssetSettings::default())
        .with_seed(4)
        .load();
    assert!(set.is_synthesized());
    assert_eq!(&set.gradient().pixels[..4], &[255, 128, 64, 255]);
    assert_eq!(&set.gradient().pixels[255 * 4..], &[127, 0, 0, 255]);

    let gl = HeadlessGl::new();
    let sim = Simulation::initialize(
        gl,
        SimulationSetup {
            width: 64,
            height: 64,
            dialect: GlslDialect::Es300,
            sources: &ShaderSources::fallback(),
            textures: &set,
            parameters: SimulationParameters::default(),
        },
    )?;
    assert!(sim.textures_synthesized());

    let uploads = sim.gl().uploads();
    let faces: Vec<_> = uploads
        .iter()
        .filter(|u| u.target != glow::TEXTURE_2D)
        .collect();
    assert_eq!(faces.len(), 6);
    assert!(faces
        .iter()
        .all(|u| (u.width, u.height) == (SKYBOX_SIZE as i32, SKYBOX_SIZE as i32)));
    assert!(uploads
        .iter()
        .any(|u| u.target == glow::TEXTURE_2D && (u.width, u.height) == (256, 1)));
    Ok(())
}

#[test]
fn pause_and_resume_continue_the_animation() -> Result<()> {
    let sim = Rc::new(RefCell::new(simulation(&sources())?));
    let mut driver = FrameDriver::new();
    let mut display = ManualScheduler::new();

    let frame_sim = Rc::clone(&sim);
    driver.set_loop(
        &mut display,
        Box::new(move |tick: &FrameTick| {
            frame_sim.borrow_mut().render_frame(tick)?;
            Ok(())
        }),
        FrameRate::Uncapped,
    );

    let fire = |driver: &mut FrameDriver, display: &mut ManualScheduler, ms: u64| {
        display.take_pending();
        driver.on_display_frame(display, Duration::from_millis(ms))
    };

    for ms in [0, 100, 200] {
        assert!(matches!(
            fire(&mut driver, &mut display, ms),
            FrameOutcome::Rendered
        ));
    }
    assert_eq!(sim.borrow().elapsed(), Duration::from_millis(200));

    driver.pause_loop(&mut display);
    assert!(!display.has_pending());
    let paused_at = sim.borrow().elapsed();

    driver.resume_loop(&mut display)?;
    assert!(matches!(
        fire(&mut driver, &mut display, 60_000),
        FrameOutcome::Rendered
    ));
    assert_eq!(sim.borrow().elapsed(), paused_at);
    assert!(matches!(
        fire(&mut driver, &mut display, 60_100),
        FrameOutcome::Rendered
    ));
    assert_eq!(sim.borrow().elapsed(), Duration::from_millis(300));
    assert_eq!(driver.current_frame_number(), 5);

    let gl_objects = sim.borrow().gl().inner().live_objects();
    assert_eq!(gl_objects, 2 + 5 + 4 + 4 + 2);
    Ok(())
}

#[test]
fn failing_frame_halts_the_loop() -> Result<()> {
    let sim = Rc::new(RefCell::new(simulation(&ShaderSources::fallback())?));
    let mut driver = FrameDriver::new();
    let mut display = ManualScheduler::new();

    let frame_sim = Rc::clone(&sim);
    driver.set_loop(
        &mut display,
        Box::new(move |tick: &FrameTick| {
            if tick.frame_number == 10 {
                anyhow::bail!("simulation body panicked on frame {}", tick.frame_number);
            }
            frame_sim.borrow_mut().render_frame(tick)?;
            Ok(())
        }),
        FrameRate::Uncapped,
    );

    let mut now = 0;
    while display.take_pending().is_some() {
        now += 16;
        driver.on_display_frame(&mut display, Duration::from_millis(now));
    }
    assert!(!driver.is_running());
    assert_eq!(display.requested(), 10);
    assert_eq!(driver.current_frame_number(), 10);
    Ok(())
}

#[test]
fn bundled_shaders_build_the_full_pipeline() -> Result<()> {
    let root = concat!(env!("CARGO_MANIFEST_DIR"), "/../../blackhole");
    let fetcher = DirectoryFetcher::new(root);
    let settings = AssetSettings::default();
    let bundled = ShaderLoader::new(&fetcher, &settings).load_all();
    assert_ne!(bundled.scene, ShaderSources::fallback().scene);

    let mut sim = simulation(&bundled)?;
    assert_eq!(sim.state(), PipelineState::FullPipeline);
    sim.gl().inner().clear_events();
    sim.render_frame(&tick(1, 16))?;

    let draws = sim.gl().inner().draws();
    assert_eq!(draws.len(), 5);
    let scene = &draws[0];
    for name in SimulationParameters::NAMES {
        if matches!(*name, "bloomStrength" | "tonemappingEnabled" | "gamma") {
            continue;
        }
        assert!(scene.uniform(name).is_some(), "scene shader ignores {name}");
    }
    assert_eq!(draws[2].uniform("tone"), Some(UniformValue::Float(1.0)));
    Ok(())
}
