//! Desktop window host.
//!
//! winit owns the event loop and glutin the GL context. Each fired redraw
//! request is one display frame for the [`FrameDriver`], so the driver never
//! renders more often than the compositor presents. Outstanding requests are
//! only turned into redraws once [`FrameDriver::next_due`] has passed; until
//! then the loop sleeps with `ControlFlow::WaitUntil`.

use std::cell::RefCell;
use std::num::NonZeroU32;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use assets::{ShaderSources, TextureSet};
use glutin::config::{Config, ConfigTemplateBuilder, GlConfig};
use glutin::context::{
    ContextApi, ContextAttributesBuilder, GlProfile, NotCurrentGlContext, PossiblyCurrentContext,
    Version,
};
use glutin::display::{Display, DisplayApiPreference, GlDisplay};
use glutin::surface::{GlSurface, Surface, SurfaceAttributesBuilder, SwapInterval, WindowSurface};
use glutin_winit::GlWindow;
use renderer::{
    create_compatible_context, normalize_pointer, CompatContext, ContextAttributes, GlowContext,
    GlslDialect, NormalizedAttributes, Simulation, SimulationSetup, LOADED_MESSAGE,
};
use scheduler::{
    DisplayScheduler, FrameDriver, FrameOutcome, FrameRate, FrameTick, LoopState, RequestId,
};
use simconfig::{RenderSettings, SimulationConfig};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use winit::window::{Window, WindowId};

type WindowSimulation = Simulation<CompatContext<GlowContext>>;

pub fn run_window(
    config: SimulationConfig,
    sources: ShaderSources,
    textures: TextureSet,
) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = BlackholeApp {
        config,
        sources,
        textures,
        session: None,
        failure: None,
        started: Instant::now(),
    };
    event_loop
        .run_app(&mut app)
        .map_err(|err| anyhow!("event loop terminated abnormally: {err}"))?;

    match app.failure.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct BlackholeApp {
    config: SimulationConfig,
    sources: ShaderSources,
    textures: TextureSet,
    session: Option<Session>,
    failure: Option<anyhow::Error>,
    started: Instant,
}

impl ApplicationHandler for BlackholeApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.session.is_some() {
            return;
        }
        match Session::open(event_loop, &self.config, &self.sources, &self.textures) {
            Ok(session) => self.session = Some(session),
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "failed to start the visualization");
                self.failure = Some(err);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match code {
                KeyCode::Escape => event_loop.exit(),
                KeyCode::Space => session.toggle_pause(),
                _ => {}
            },
            WindowEvent::CursorMoved { position, .. } => {
                let size = session.window.inner_size();
                if let Some([x, y]) = normalize_pointer(
                    (position.x, position.y),
                    (0.0, 0.0),
                    (f64::from(size.width), f64::from(size.height)),
                ) {
                    session.simulation.borrow_mut().set_pointer(x, y);
                }
            }
            WindowEvent::Resized(size) => session.resize(size),
            WindowEvent::RedrawRequested => session.redraw(self.started),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(session) = self.session.as_mut() {
            event_loop.set_control_flow(session.schedule(self.started));
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }
}

/// Window, surface, context and the simulation rendering into them.
struct Session {
    window: Rc<Window>,
    surface: Surface<WindowSurface>,
    context: PossiblyCurrentContext,
    simulation: Rc<RefCell<WindowSimulation>>,
    driver: FrameDriver,
    display: RedrawScheduler,
}

impl Session {
    fn open(
        event_loop: &ActiveEventLoop,
        config: &SimulationConfig,
        sources: &ShaderSources,
        textures: &TextureSet,
    ) -> Result<Self> {
        let mut opened = None;
        let gl = create_compatible_context(&ContextAttributes::default(), |attributes| {
            let (surface, gl) = OpenedSurface::create(event_loop, &config.render, attributes)?;
            opened = Some(surface);
            Ok::<_, anyhow::Error>(gl)
        })?;
        let opened = opened.ok_or_else(|| anyhow!("context factory returned without a surface"))?;

        let size = opened.window.inner_size();
        let simulation = Simulation::initialize(
            gl,
            SimulationSetup {
                width: size.width,
                height: size.height,
                dialect: opened.dialect,
                sources,
                textures,
                parameters: config.parameters,
            },
        )
        .context("failed to initialise the black hole scene")?;
        tracing::info!(state = ?simulation.state(), dialect = ?opened.dialect, "{}", LOADED_MESSAGE);

        let simulation = Rc::new(RefCell::new(simulation));
        let mut display = RedrawScheduler::default();
        let mut driver = FrameDriver::new();
        let frame_simulation = Rc::clone(&simulation);
        driver.set_loop(
            &mut display,
            Box::new(move |tick: &FrameTick| {
                frame_simulation.borrow_mut().render_frame(tick)?;
                Ok(())
            }),
            FrameRate::from_fps(config.render.fps),
        );

        Ok(Self {
            window: opened.window,
            surface: opened.surface,
            context: opened.context,
            simulation,
            driver,
            display,
        })
    }

    /// Fires the outstanding redraw once it is due, otherwise sleeps until it is.
    fn schedule(&mut self, started: Instant) -> ControlFlow {
        match redraw_wake(self.driver.next_due(), started.elapsed()) {
            RedrawWake::Idle => ControlFlow::Wait,
            RedrawWake::Now => {
                self.window.request_redraw();
                ControlFlow::Wait
            }
            RedrawWake::At(due) => ControlFlow::WaitUntil(started + due),
        }
    }

    fn redraw(&mut self, started: Instant) {
        if self.display.slot.take().is_none() {
            return;
        }
        match self.driver.on_display_frame(&mut self.display, started.elapsed()) {
            FrameOutcome::Rendered => {
                if let Err(err) = self.surface.swap_buffers(&self.context) {
                    tracing::warn!(error = %err, "failed to present frame");
                }
            }
            FrameOutcome::Halted(_) => {
                tracing::warn!("frame loop halted; the last frame stays on screen");
            }
            FrameOutcome::Throttled | FrameOutcome::Inactive => {}
        }
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            return;
        }
        self.window.resize_surface(&self.surface, &self.context);
        self.simulation.borrow_mut().resize(size.width, size.height);
    }

    fn toggle_pause(&mut self) {
        match self.driver.state() {
            LoopState::Running => self.driver.pause_loop(&mut self.display),
            LoopState::Paused => {
                if let Err(err) = self.driver.resume_loop(&mut self.display) {
                    tracing::warn!(error = %err, "failed to resume frame loop");
                }
            }
            state => tracing::debug!(?state, "frame loop not pausable"),
        }
    }

    fn close(mut self) {
        self.driver.cancel_loop(&mut self.display);
        match Rc::try_unwrap(self.simulation) {
            Ok(simulation) => {
                simulation.into_inner().teardown();
                tracing::debug!("released GPU resources");
            }
            Err(_) => tracing::warn!("simulation still shared at exit; skipping GPU teardown"),
        }
        drop(self.surface);
        drop(self.context);
    }
}

struct OpenedSurface {
    window: Rc<Window>,
    surface: Surface<WindowSurface>,
    context: PossiblyCurrentContext,
    dialect: GlslDialect,
}

impl OpenedSurface {
    fn create(
        event_loop: &ActiveEventLoop,
        render: &RenderSettings,
        attributes: &NormalizedAttributes,
    ) -> Result<(Self, GlowContext)> {
        let window_attributes = Window::default_attributes()
            .with_title(render.title.clone())
            .with_inner_size(PhysicalSize::new(render.width, render.height));

        let window = Rc::new(
            event_loop
                .create_window(window_attributes)
                .context("failed to create window")?,
        );
        let raw_window_handle = window.window_handle()?.as_raw();
        let raw_display_handle = event_loop.display_handle()?.as_raw();
        // SAFETY: both handles belong to live winit objects that outlive the display.
        let gl_display =
            unsafe { Display::new(raw_display_handle, display_preference(raw_window_handle)) }
                .context("failed to open the GL display")?;

        let template = config_template(attributes)
            .compatible_with_native_window(raw_window_handle)
            .build();
        // SAFETY: the template only refers to the window created above.
        let configs =
            unsafe { gl_display.find_configs(template) }.context("failed to query GL configs")?;
        let gl_config = pick_config(configs, attributes.antialias)
            .ok_or_else(|| anyhow!("no matching GL config"))?;

        let mut created = None;
        for (api, dialect) in context_attempts() {
            let desktop = matches!(api, ContextApi::OpenGl(_));
            let mut builder = ContextAttributesBuilder::new().with_context_api(api);
            if desktop {
                builder = builder.with_profile(GlProfile::Core);
            }
            let context_attributes = builder.build(Some(raw_window_handle));
            // SAFETY: the window handle is valid for the lifetime of `window`.
            match unsafe { gl_display.create_context(&gl_config, &context_attributes) } {
                Ok(context) => {
                    created = Some((context, dialect));
                    break;
                }
                Err(err) => tracing::warn!(?dialect, error = %err, "GL context request refused"),
            }
        }
        let (not_current, dialect) =
            created.ok_or_else(|| anyhow!("no GLES 3.0 or desktop GL 3.3 context available"))?;

        let size = window.inner_size();
        let width = NonZeroU32::new(size.width).ok_or_else(|| anyhow!("window has zero width"))?;
        let height = NonZeroU32::new(size.height).ok_or_else(|| anyhow!("window has zero height"))?;
        let surface_attributes =
            SurfaceAttributesBuilder::<WindowSurface>::new().build(raw_window_handle, width, height);
        // SAFETY: same window handle as above.
        let surface = unsafe { gl_display.create_window_surface(&gl_config, &surface_attributes) }
            .context("failed to create window surface")?;
        let context = not_current
            .make_current(&surface)
            .context("failed to make GL context current")?;
        if let Err(err) = surface.set_swap_interval(&context, SwapInterval::Wait(NonZeroU32::MIN)) {
            tracing::debug!(error = %err, "vsync unavailable");
        }

        // SAFETY: the context was made current on this thread above and stays
        // current for the life of the session.
        let gl = unsafe {
            GlowContext::new(glow::Context::from_loader_function_cstr(|symbol| {
                gl_display.get_proc_address(symbol)
            }))
        };
        tracing::info!(
            width = size.width,
            height = size.height,
            ?dialect,
            samples = gl_config.num_samples(),
            "GL window created"
        );

        Ok((
            Self {
                window,
                surface,
                context,
                dialect,
            },
            gl,
        ))
    }
}

/// Context APIs tried in order, with the shader dialect each one accepts.
fn context_attempts() -> [(ContextApi, GlslDialect); 2] {
    [
        (ContextApi::Gles(Some(Version::new(3, 0))), GlslDialect::Es300),
        (ContextApi::OpenGl(Some(Version::new(3, 3))), GlslDialect::Desktop330),
    ]
}

#[cfg(target_os = "windows")]
fn display_preference(window: RawWindowHandle) -> DisplayApiPreference {
    DisplayApiPreference::WglThenEgl(Some(window))
}

#[cfg(target_os = "macos")]
fn display_preference(_window: RawWindowHandle) -> DisplayApiPreference {
    DisplayApiPreference::Cgl
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn display_preference(_window: RawWindowHandle) -> DisplayApiPreference {
    DisplayApiPreference::Egl
}

fn config_template(attributes: &NormalizedAttributes) -> ConfigTemplateBuilder {
    let mut template = ConfigTemplateBuilder::new()
        .with_alpha_size(if attributes.alpha { 8 } else { 0 })
        .with_depth_size(if attributes.depth { 24 } else { 0 });
    if attributes.stencil {
        template = template.with_stencil_size(8);
    }
    template
}

/// Most samples when antialiasing is wanted, fewest otherwise. `None` when
/// the display offers nothing matching the template.
fn pick_config(configs: Box<dyn Iterator<Item = Config> + '_>, antialias: bool) -> Option<Config> {
    configs.reduce(|best, candidate| {
        let more = candidate.num_samples() > best.num_samples();
        if more == antialias {
            candidate
        } else {
            best
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RedrawWake {
    /// No frame is outstanding.
    Idle,
    Now,
    /// Sleep until this offset from the session start.
    At(Duration),
}

fn redraw_wake(due: Option<Duration>, now: Duration) -> RedrawWake {
    match due {
        None => RedrawWake::Idle,
        Some(due) if due <= now => RedrawWake::Now,
        Some(due) => RedrawWake::At(due),
    }
}

/// Outstanding redraw request, if any.
#[derive(Debug, Default)]
struct FrameSlot {
    next_id: u64,
    pending: Option<RequestId>,
}

impl FrameSlot {
    fn issue(&mut self) -> RequestId {
        self.next_id += 1;
        let id = RequestId(self.next_id);
        self.pending = Some(id);
        id
    }

    fn cancel(&mut self, id: RequestId) {
        if self.pending == Some(id) {
            self.pending = None;
        }
    }

    fn take(&mut self) -> Option<RequestId> {
        self.pending.take()
    }
}

/// Display scheduler backed by winit redraw requests. Requests are recorded
/// here and fired from `about_to_wait` once the driver says they are due.
#[derive(Debug, Default)]
struct RedrawScheduler {
    slot: FrameSlot,
}

impl DisplayScheduler for RedrawScheduler {
    fn request_frame(&mut self) -> RequestId {
        self.slot.issue()
    }

    fn cancel_frame(&mut self, id: RequestId) {
        self.slot.cancel(id);
    }
}
