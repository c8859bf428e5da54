use anyhow::{anyhow, Result};
use renderer::{
    create_compatible_context, CompatContext, ContextAttributes, GlowContext, PowerPreference,
};
use wasm_bindgen::JsCast;
use web_sys::{
    HtmlCanvasElement, WebGl2RenderingContext, WebGlContextAttributes, WebGlPowerPreference,
};

/// Requests a WebGL2 context from `canvas` and wraps it in the compatibility shim.
pub fn create_canvas_context(
    canvas: &HtmlCanvasElement,
    requested: &ContextAttributes,
) -> Result<CompatContext<GlowContext>> {
    create_compatible_context(requested, |attributes| {
        let options = WebGlContextAttributes::new();
        options.set_antialias(attributes.antialias);
        options.set_depth(attributes.depth);
        options.set_stencil(attributes.stencil);
        options.set_alpha(attributes.alpha);
        options.set_premultiplied_alpha(attributes.premultiplied_alpha);
        options.set_preserve_drawing_buffer(attributes.preserve_drawing_buffer);
        options.set_power_preference(power_preference(attributes.power_preference));

        let context = canvas
            .get_context_with_context_options("webgl2", &options)
            .map_err(|err| anyhow!("webgl2 context request failed: {err:?}"))?
            .ok_or_else(|| anyhow!("WebGL2 is not available for this canvas"))?
            .dyn_into::<WebGl2RenderingContext>()
            .map_err(|_| anyhow!("canvas returned a context that is not WebGL2"))?;
        tracing::debug!(
            power_preference = attributes.power_preference.as_str(),
            antialias = attributes.antialias,
            "WebGL2 context created"
        );

        // SAFETY: a WebGL context has no notion of "current"; every call
        // targets the context it was issued on.
        Ok(unsafe { GlowContext::new(glow::Context::from_webgl2_context(context)) })
    })
}

fn power_preference(preference: PowerPreference) -> WebGlPowerPreference {
    match preference {
        PowerPreference::Default => WebGlPowerPreference::Default,
        PowerPreference::HighPerformance => WebGlPowerPreference::HighPerformance,
        PowerPreference::LowPower => WebGlPowerPreference::LowPower,
    }
}
