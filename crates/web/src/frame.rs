use js_sys::Function;
use scheduler::{DisplayScheduler, RequestId};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use web_sys::Window;

/// Display scheduler backed by `requestAnimationFrame`.
///
/// [`AnimationFrameScheduler::bind`] must be called with the page's frame
/// closure before the first request; until then requests are dropped.
pub struct AnimationFrameScheduler {
    window: Window,
    callback: Option<Function>,
}

impl AnimationFrameScheduler {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            callback: None,
        }
    }

    pub fn bind(&mut self, callback: &Closure<dyn FnMut(f64)>) {
        self.callback = Some(callback.as_ref().unchecked_ref::<Function>().clone());
    }
}

impl DisplayScheduler for AnimationFrameScheduler {
    fn request_frame(&mut self) -> RequestId {
        let Some(callback) = self.callback.as_ref() else {
            tracing::warn!("frame requested before a frame callback was bound");
            return RequestId(0);
        };
        match self.window.request_animation_frame(callback) {
            Ok(handle) => RequestId(u64::try_from(handle).unwrap_or_default()),
            Err(err) => {
                tracing::warn!(error = ?err, "requestAnimationFrame failed");
                RequestId(0)
            }
        }
    }

    fn cancel_frame(&mut self, id: RequestId) {
        let Ok(handle) = i32::try_from(id.0) else {
            return;
        };
        if handle == 0 {
            return;
        }
        if let Err(err) = self.window.cancel_animation_frame(handle) {
            tracing::debug!(error = ?err, handle, "cancelAnimationFrame failed");
        }
    }
}
