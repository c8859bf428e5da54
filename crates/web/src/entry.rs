use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use renderer::{
    normalize_pointer, CompatContext, ContextAttributes, GlowContext, GlslDialect, Simulation,
    SimulationSetup, LOADED_MESSAGE,
};
use scheduler::{FrameDriver, FrameRate, FrameTick};
use simconfig::{AssetSettings, RenderSettings, SimulationParameters};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{HtmlCanvasElement, PointerEvent, Window};

use crate::canvas::create_canvas_context;
use crate::console;
use crate::fetch::WebAssetSource;
use crate::frame::AnimationFrameScheduler;
use crate::urls::frame_timestamp;

type WebSimulation = Simulation<CompatContext<GlowContext>>;

struct FrameLoop {
    driver: FrameDriver,
    display: AnimationFrameScheduler,
}

/// A running visualization bound to one canvas. Dropping it (`free()` from
/// JavaScript) stops the loop and detaches the pointer listener.
#[wasm_bindgen]
pub struct BlackHole {
    simulation: Rc<RefCell<WebSimulation>>,
    frame_loop: Rc<RefCell<FrameLoop>>,
    canvas: HtmlCanvasElement,
    _on_frame: Closure<dyn FnMut(f64)>,
    on_pointer: Closure<dyn FnMut(PointerEvent)>,
}

#[wasm_bindgen(start)]
pub fn boot() {
    console_error_panic_hook::set_once();
    console::initialise_tracing();
}

/// Loads assets, builds the pipeline on `canvas_id` and starts rendering.
#[wasm_bindgen]
pub async fn start(canvas_id: String, asset_base: String) -> Result<BlackHole, JsValue> {
    launch(&canvas_id, &asset_base).await.map_err(|err| {
        let message = format!("{err:#}");
        tracing::error!(error = %message, "black hole failed to start");
        JsValue::from_str(&message)
    })
}

async fn launch(canvas_id: &str, asset_base: &str) -> Result<BlackHole> {
    let window = web_sys::window().ok_or_else(|| anyhow!("no global window"))?;
    let document = window
        .document()
        .ok_or_else(|| anyhow!("window has no document"))?;
    let canvas = document
        .get_element_by_id(canvas_id)
        .ok_or_else(|| anyhow!("no element with id '{canvas_id}'"))?
        .dyn_into::<HtmlCanvasElement>()
        .map_err(|_| anyhow!("element '{canvas_id}' is not a canvas"))?;

    let settings = AssetSettings {
        base: asset_base.to_string(),
        ..AssetSettings::default()
    };
    let source = WebAssetSource::new(window.clone(), settings);
    let sources = source.load_shaders().await;
    let textures = source.load_textures(js_sys::Date::now() as u64).await;

    let gl = create_canvas_context(&canvas, &ContextAttributes::default())?;
    let simulation = Simulation::initialize(
        gl,
        SimulationSetup {
            width: canvas.width(),
            height: canvas.height(),
            dialect: GlslDialect::Es300,
            sources: &sources,
            textures: &textures,
            parameters: SimulationParameters::default(),
        },
    )
    .context("failed to initialise the black hole scene")?;
    tracing::info!(state = ?simulation.state(), "{}", LOADED_MESSAGE);
    notify_parent(&window);

    let simulation = Rc::new(RefCell::new(simulation));
    let frame_loop = Rc::new(RefCell::new(FrameLoop {
        driver: FrameDriver::new(),
        display: AnimationFrameScheduler::new(window),
    }));

    let on_frame = {
        let frame_loop = Rc::clone(&frame_loop);
        Closure::<dyn FnMut(f64)>::new(move |timestamp: f64| {
            let mut frame_loop = frame_loop.borrow_mut();
            let FrameLoop { driver, display } = &mut *frame_loop;
            driver.on_display_frame(display, frame_timestamp(timestamp));
        })
    };

    let on_pointer = {
        let simulation = Rc::clone(&simulation);
        let canvas = canvas.clone();
        Closure::<dyn FnMut(PointerEvent)>::new(move |event: PointerEvent| {
            let rect = canvas.get_bounding_client_rect();
            if let Some([x, y]) = normalize_pointer(
                (f64::from(event.client_x()), f64::from(event.client_y())),
                (rect.left(), rect.top()),
                (rect.width(), rect.height()),
            ) {
                simulation.borrow_mut().set_pointer(x, y);
            }
        })
    };
    canvas
        .add_event_listener_with_callback("pointermove", on_pointer.as_ref().unchecked_ref())
        .map_err(|err| anyhow!("failed to listen for pointer input: {err:?}"))?;

    {
        let mut frame_loop = frame_loop.borrow_mut();
        let FrameLoop { driver, display } = &mut *frame_loop;
        display.bind(&on_frame);
        let frame_simulation = Rc::clone(&simulation);
        driver.set_loop(
            display,
            Box::new(move |tick: &FrameTick| {
                frame_simulation.borrow_mut().render_frame(tick)?;
                Ok(())
            }),
            FrameRate::from_fps(RenderSettings::default().fps),
        );
    }

    Ok(BlackHole {
        simulation,
        frame_loop,
        canvas,
        _on_frame: on_frame,
        on_pointer,
    })
}

/// Tells an embedding page that the visualization is up. A top-level page
/// is its own parent and gets no message.
fn notify_parent(window: &Window) {
    let Ok(Some(parent)) = window.parent() else {
        return;
    };
    if js_sys::Object::is(&parent, window) {
        return;
    }
    if let Err(err) = parent.post_message(&JsValue::from_str(LOADED_MESSAGE), "*") {
        tracing::warn!(error = ?err, "failed to notify embedding page");
    }
}

#[wasm_bindgen]
impl BlackHole {
    /// Updates one simulation parameter by its uniform name.
    #[wasm_bindgen(js_name = setParameter)]
    pub fn set_parameter(&self, name: &str, value: f32) -> Result<(), JsValue> {
        self.simulation
            .borrow_mut()
            .set_parameter(name, value)
            .map_err(|err| JsValue::from_str(&err.to_string()))
    }

    pub fn parameter(&self, name: &str) -> Option<f32> {
        self.simulation.borrow().parameters().get(name)
    }

    pub fn pause(&self) {
        let mut frame_loop = self.frame_loop.borrow_mut();
        let FrameLoop { driver, display } = &mut *frame_loop;
        driver.pause_loop(display);
    }

    pub fn resume(&self) -> Result<(), JsValue> {
        let mut frame_loop = self.frame_loop.borrow_mut();
        let FrameLoop { driver, display } = &mut *frame_loop;
        driver
            .resume_loop(display)
            .map_err(|err| JsValue::from_str(&err.to_string()))
    }

    pub fn cancel(&self) {
        let mut frame_loop = self.frame_loop.borrow_mut();
        let FrameLoop { driver, display } = &mut *frame_loop;
        driver.cancel_loop(display);
    }

    /// Resizes the drawing buffer and rebuilds the render targets.
    pub fn resize(&self, width: u32, height: u32) {
        self.canvas.set_width(width);
        self.canvas.set_height(height);
        self.simulation.borrow_mut().resize(width, height);
    }

    #[wasm_bindgen(getter)]
    pub fn state(&self) -> String {
        format!("{:?}", self.simulation.borrow().state())
    }
}

impl Drop for BlackHole {
    fn drop(&mut self) {
        self.cancel();
        let _ = self
            .canvas
            .remove_event_listener_with_callback("pointermove", self.on_pointer.as_ref().unchecked_ref());
    }
}
