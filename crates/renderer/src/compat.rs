//! Context compatibility layer.
//!
//! [`create_compatible_context`] is the single entry point hosts use to get a
//! rendering context: it normalizes creation attributes, hands them to the
//! host's factory, and wraps whatever comes back in a [`CompatContext`] that
//! absorbs format, mipmap, and extension incompatibilities instead of failing.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::gl::{error_name, ExtensionSupport, Gl, GlError};

/// Extensions that get an inert stand-in when the host lacks them.
pub const STUBBED_EXTENSIONS: [&str; 3] = [
    "OES_texture_float",
    "OES_texture_half_float",
    "WEBGL_depth_texture",
];

/// Internal formats that hosts support inconsistently, with their
/// broadly supported replacement.
const FORMAT_REMAP: [(i32, i32); 17] = [
    (glow::SRGB as i32, glow::RGB8 as i32),
    (glow::SRGB8 as i32, glow::RGB8 as i32),
    (glow::SRGB_ALPHA as i32, glow::RGBA8 as i32),
    (glow::SRGB8_ALPHA8 as i32, glow::RGBA8 as i32),
    (glow::DEPTH_COMPONENT24 as i32, glow::DEPTH_COMPONENT16 as i32),
    (glow::DEPTH_COMPONENT32F as i32, glow::DEPTH_COMPONENT16 as i32),
    (glow::DEPTH24_STENCIL8 as i32, glow::DEPTH_STENCIL as i32),
    (glow::DEPTH32F_STENCIL8 as i32, glow::DEPTH_STENCIL as i32),
    (glow::R32F as i32, glow::LUMINANCE as i32),
    (glow::R16F as i32, glow::LUMINANCE as i32),
    (glow::RG32F as i32, glow::LUMINANCE_ALPHA as i32),
    (glow::RG16F as i32, glow::LUMINANCE_ALPHA as i32),
    (glow::RGB32F as i32, glow::RGB as i32),
    (glow::RGB16F as i32, glow::RGB as i32),
    (glow::RGBA32F as i32, glow::RGBA as i32),
    (glow::RGBA16F as i32, glow::RGBA as i32),
    (glow::RGB as i32, glow::RGBA as i32),
];

/// Looks up the replacement for an internal format, if it needs one.
pub fn remap_internal_format(internal_format: i32) -> Option<i32> {
    FORMAT_REMAP
        .iter()
        .find(|(from, _)| *from == internal_format)
        .map(|(_, to)| *to)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    Default,
    #[default]
    HighPerformance,
    LowPower,
}

impl PowerPreference {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerPreference::Default => "default",
            PowerPreference::HighPerformance => "high-performance",
            PowerPreference::LowPower => "low-power",
        }
    }
}

/// Requested creation attributes; `None` means "not specified by the caller".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextAttributes {
    pub antialias: Option<bool>,
    pub depth: Option<bool>,
    pub stencil: Option<bool>,
    pub alpha: Option<bool>,
    pub premultiplied_alpha: Option<bool>,
    pub preserve_drawing_buffer: Option<bool>,
    pub power_preference: Option<PowerPreference>,
}

/// Attributes after defaults have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedAttributes {
    pub antialias: bool,
    pub depth: bool,
    pub stencil: bool,
    pub alpha: bool,
    pub premultiplied_alpha: bool,
    pub preserve_drawing_buffer: bool,
    pub power_preference: PowerPreference,
}

impl ContextAttributes {
    /// Everything is enabled unless explicitly disabled, except
    /// `preserve_drawing_buffer`, which stays off unless requested.
    pub fn normalize(&self) -> NormalizedAttributes {
        NormalizedAttributes {
            antialias: self.antialias != Some(false),
            depth: self.depth != Some(false),
            stencil: self.stencil != Some(false),
            alpha: self.alpha != Some(false),
            premultiplied_alpha: self.premultiplied_alpha != Some(false),
            preserve_drawing_buffer: self.preserve_drawing_buffer == Some(true),
            power_preference: self.power_preference.unwrap_or_default(),
        }
    }
}

/// Normalizes `attributes`, asks the host for a raw context, and wraps it.
pub fn create_compatible_context<G, E, F>(
    attributes: &ContextAttributes,
    create: F,
) -> Result<CompatContext<G>, E>
where
    G: Gl,
    F: FnOnce(&NormalizedAttributes) -> Result<G, E>,
{
    let normalized = attributes.normalize();
    debug!(?normalized, "creating rendering context");
    let inner = create(&normalized)?;
    Ok(CompatContext::new(inner, normalized))
}

/// [`Gl`] decorator that degrades instead of failing.
///
/// Texture bindings are tracked here rather than queried from the driver so
/// that the mipmap guard works the same on every backend.
pub struct CompatContext<G: Gl> {
    inner: G,
    attributes: NormalizedAttributes,
    last_error: Cell<u32>,
    reported_errors: Cell<u64>,
    active_unit: Cell<u32>,
    bound: RefCell<HashMap<(u32, u32), G::Texture>>,
}

impl<G: Gl> CompatContext<G> {
    pub fn new(inner: G, attributes: NormalizedAttributes) -> Self {
        Self {
            inner,
            attributes,
            last_error: Cell::new(glow::NO_ERROR),
            reported_errors: Cell::new(0),
            active_unit: Cell::new(glow::TEXTURE0),
            bound: RefCell::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub fn into_inner(self) -> G {
        self.inner
    }

    pub fn attributes(&self) -> &NormalizedAttributes {
        &self.attributes
    }

    /// Number of GL error diagnostics logged so far.
    pub fn reported_errors(&self) -> u64 {
        self.reported_errors.get()
    }

    fn has_bound_texture(&self, target: u32) -> bool {
        let key = (self.active_unit.get(), binding_target(target));
        self.bound.borrow().contains_key(&key)
    }
}

fn binding_target(target: u32) -> u32 {
    if (glow::TEXTURE_CUBE_MAP_POSITIVE_X..=glow::TEXTURE_CUBE_MAP_NEGATIVE_Z).contains(&target) {
        glow::TEXTURE_CUBE_MAP
    } else {
        target
    }
}

/// Widens tightly packed RGB bytes to RGBA with opaque alpha.
fn expand_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(pixels.len() / 3 * 4);
    for rgb in pixels.chunks_exact(3) {
        rgba.extend_from_slice(rgb);
        rgba.push(255);
    }
    rgba
}

fn pixel_count(width: i32, height: i32) -> usize {
    width.max(0) as usize * height.max(0) as usize
}

impl<G: Gl> Gl for CompatContext<G> {
    type Shader = G::Shader;
    type Program = G::Program;
    type Texture = G::Texture;
    type Framebuffer = G::Framebuffer;
    type Buffer = G::Buffer;
    type VertexArray = G::VertexArray;
    type UniformLocation = G::UniformLocation;

    fn create_shader(&self, kind: u32) -> Result<Self::Shader, GlError> {
        self.inner.create_shader(kind)
    }

    fn shader_source(&self, shader: Self::Shader, source: &str) {
        self.inner.shader_source(shader, source)
    }

    fn compile_shader(&self, shader: Self::Shader) {
        self.inner.compile_shader(shader)
    }

    fn shader_compile_status(&self, shader: Self::Shader) -> bool {
        self.inner.shader_compile_status(shader)
    }

    fn shader_info_log(&self, shader: Self::Shader) -> String {
        self.inner.shader_info_log(shader)
    }

    fn delete_shader(&self, shader: Self::Shader) {
        self.inner.delete_shader(shader)
    }

    fn create_program(&self) -> Result<Self::Program, GlError> {
        self.inner.create_program()
    }

    fn attach_shader(&self, program: Self::Program, shader: Self::Shader) {
        self.inner.attach_shader(program, shader)
    }

    fn detach_shader(&self, program: Self::Program, shader: Self::Shader) {
        self.inner.detach_shader(program, shader)
    }

    fn bind_attrib_location(&self, program: Self::Program, index: u32, name: &str) {
        self.inner.bind_attrib_location(program, index, name)
    }

    fn link_program(&self, program: Self::Program) {
        self.inner.link_program(program)
    }

    fn program_link_status(&self, program: Self::Program) -> bool {
        self.inner.program_link_status(program)
    }

    fn program_info_log(&self, program: Self::Program) -> String {
        self.inner.program_info_log(program)
    }

    fn use_program(&self, program: Option<Self::Program>) {
        self.inner.use_program(program)
    }

    fn delete_program(&self, program: Self::Program) {
        self.inner.delete_program(program)
    }

    fn uniform_location(
        &self,
        program: Self::Program,
        name: &str,
    ) -> Option<Self::UniformLocation> {
        self.inner.uniform_location(program, name)
    }

    fn uniform_1_f32(&self, location: &Self::UniformLocation, x: f32) {
        self.inner.uniform_1_f32(location, x)
    }

    fn uniform_2_f32(&self, location: &Self::UniformLocation, x: f32, y: f32) {
        self.inner.uniform_2_f32(location, x, y)
    }

    fn uniform_1_i32(&self, location: &Self::UniformLocation, x: i32) {
        self.inner.uniform_1_i32(location, x)
    }

    fn create_texture(&self) -> Result<Self::Texture, GlError> {
        self.inner.create_texture()
    }

    fn active_texture(&self, unit: u32) {
        self.active_unit.set(unit);
        self.inner.active_texture(unit)
    }

    fn bind_texture(&self, target: u32, texture: Option<Self::Texture>) {
        let key = (self.active_unit.get(), target);
        match texture {
            Some(texture) => {
                self.bound.borrow_mut().insert(key, texture);
            }
            None => {
                self.bound.borrow_mut().remove(&key);
            }
        }
        self.inner.bind_texture(target, texture)
    }

    /// Remaps known-problematic formats, then retries once as plain RGBA
    /// bytes. Never returns an error: a failed upload leaves the texture
    /// without storage and rendering carries on.
    fn tex_image_2d(
        &self,
        target: u32,
        level: i32,
        internal_format: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    ) -> Result<(), GlError> {
        let mut internal = internal_format;
        let mut external = format;
        let mut expanded = None;

        if let Some(replacement) = remap_internal_format(internal_format) {
            info!(
                from = internal_format,
                to = replacement,
                "remapped texture internal format"
            );
            internal = replacement;
        }
        if internal == glow::RGB as i32 || internal_format == glow::RGB16F as i32 {
            internal = glow::RGBA as i32;
        }
        if external == glow::RGB {
            external = glow::RGBA;
            expanded = match pixels {
                Some(data)
                    if ty == glow::UNSIGNED_BYTE
                        && data.len() == pixel_count(width, height) * 3 =>
                {
                    Some(expand_rgb(data))
                }
                Some(_) => {
                    warn!("RGB pixel data has an unexpected layout; uploading without data");
                    Some(Vec::new())
                }
                None => None,
            };
        }
        let pixels = match &expanded {
            Some(data) if data.is_empty() => None,
            Some(data) => Some(data.as_slice()),
            None => pixels,
        };

        let Err(error) = self
            .inner
            .tex_image_2d(target, level, internal, width, height, external, ty, pixels)
        else {
            return Ok(());
        };
        warn!(
            error = %error,
            internal_format = internal,
            "texture upload failed; retrying as RGBA bytes"
        );

        let rgba = pixels.filter(|data| data.len() == pixel_count(width, height) * 4);
        if let Err(error) = self.inner.tex_image_2d(
            target,
            level,
            glow::RGBA as i32,
            width,
            height,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            rgba,
        ) {
            warn!(error = %error, "RGBA fallback upload failed; texture left empty");
        }
        Ok(())
    }

    fn tex_parameter_i32(&self, target: u32, parameter: u32, value: i32) {
        self.inner.tex_parameter_i32(target, parameter, value)
    }

    fn generate_mipmap(&self, target: u32) -> Result<(), GlError> {
        if !self.has_bound_texture(target) {
            warn!(target, "generateMipmap with no texture bound; skipping");
            return Ok(());
        }
        if let Err(error) = self.inner.generate_mipmap(target) {
            warn!(error = %error, "generateMipmap failed; continuing without mipmaps");
        }
        Ok(())
    }

    fn delete_texture(&self, texture: Self::Texture) {
        self.bound.borrow_mut().retain(|_, bound| *bound != texture);
        self.inner.delete_texture(texture)
    }

    fn create_framebuffer(&self) -> Result<Self::Framebuffer, GlError> {
        self.inner.create_framebuffer()
    }

    fn bind_framebuffer(&self, target: u32, framebuffer: Option<Self::Framebuffer>) {
        self.inner.bind_framebuffer(target, framebuffer)
    }

    fn framebuffer_texture_2d(
        &self,
        target: u32,
        attachment: u32,
        texture_target: u32,
        texture: Option<Self::Texture>,
        level: i32,
    ) {
        self.inner
            .framebuffer_texture_2d(target, attachment, texture_target, texture, level)
    }

    fn check_framebuffer_status(&self, target: u32) -> u32 {
        self.inner.check_framebuffer_status(target)
    }

    fn delete_framebuffer(&self, framebuffer: Self::Framebuffer) {
        self.inner.delete_framebuffer(framebuffer)
    }

    fn create_buffer(&self) -> Result<Self::Buffer, GlError> {
        self.inner.create_buffer()
    }

    fn bind_buffer(&self, target: u32, buffer: Option<Self::Buffer>) {
        self.inner.bind_buffer(target, buffer)
    }

    fn buffer_data_u8_slice(&self, target: u32, data: &[u8], usage: u32) {
        self.inner.buffer_data_u8_slice(target, data, usage)
    }

    fn delete_buffer(&self, buffer: Self::Buffer) {
        self.inner.delete_buffer(buffer)
    }

    fn create_vertex_array(&self) -> Result<Self::VertexArray, GlError> {
        self.inner.create_vertex_array()
    }

    fn bind_vertex_array(&self, vertex_array: Option<Self::VertexArray>) {
        self.inner.bind_vertex_array(vertex_array)
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        self.inner.enable_vertex_attrib_array(index)
    }

    fn vertex_attrib_pointer_f32(&self, index: u32, size: i32, stride: i32, offset: i32) {
        self.inner.vertex_attrib_pointer_f32(index, size, stride, offset)
    }

    fn delete_vertex_array(&self, vertex_array: Self::VertexArray) {
        self.inner.delete_vertex_array(vertex_array)
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        self.inner.viewport(x, y, width, height)
    }

    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        self.inner.clear_color(r, g, b, a)
    }

    fn clear(&self, mask: u32) {
        self.inner.clear(mask)
    }

    fn draw_arrays(&self, mode: u32, first: i32, count: i32) {
        self.inner.draw_arrays(mode, first, count)
    }

    /// Logs a code only when it differs from the last logged one; a clean
    /// `NO_ERROR` read in between does not reset that. The returned value is
    /// always the driver's.
    fn get_error(&self) -> u32 {
        let code = self.inner.get_error();
        if code != glow::NO_ERROR && code != self.last_error.get() {
            warn!(error = %error_name(code), "GL error");
            self.last_error.set(code);
            self.reported_errors.set(self.reported_errors.get() + 1);
        }
        code
    }

    fn has_extension(&self, name: &str) -> bool {
        self.inner.has_extension(name)
    }

    fn extension(&self, name: &str) -> Option<ExtensionSupport> {
        if self.inner.has_extension(name) {
            return Some(ExtensionSupport::Native);
        }
        if STUBBED_EXTENSIONS.contains(&name) {
            debug!(extension = name, "providing stub for missing extension");
            return Some(ExtensionSupport::Stub);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::headless::HeadlessGl;

    fn compat() -> CompatContext<HeadlessGl> {
        CompatContext::new(HeadlessGl::new(), ContextAttributes::default().normalize())
    }

    #[test]
    fn attributes_default_to_enabled() {
        let normalized = ContextAttributes::default().normalize();
        assert!(normalized.antialias && normalized.depth && normalized.stencil);
        assert!(normalized.alpha && normalized.premultiplied_alpha);
        assert!(!normalized.preserve_drawing_buffer);
        assert_eq!(normalized.power_preference, PowerPreference::HighPerformance);
    }

    #[test]
    fn explicit_attributes_win() {
        let normalized = ContextAttributes {
            antialias: Some(false),
            preserve_drawing_buffer: Some(true),
            power_preference: Some(PowerPreference::LowPower),
            ..ContextAttributes::default()
        }
        .normalize();
        assert!(!normalized.antialias);
        assert!(normalized.depth);
        assert!(normalized.preserve_drawing_buffer);
        assert_eq!(normalized.power_preference.as_str(), "low-power");
    }

    #[test]
    fn factory_receives_normalized_attributes() {
        let mut seen = None;
        let context = create_compatible_context(&ContextAttributes::default(), |attrs| {
            seen = Some(*attrs);
            Ok::<_, String>(HeadlessGl::new())
        })
        .unwrap();
        assert_eq!(seen, Some(*context.attributes()));

        let failed = create_compatible_context::<HeadlessGl, _, _>(
            &ContextAttributes::default(),
            |_| Err("no context".to_string()),
        );
        assert!(failed.is_err());
    }

    #[test]
    fn remap_table_covers_float_and_srgb_formats() {
        assert_eq!(remap_internal_format(glow::SRGB8_ALPHA8 as i32), Some(glow::RGBA8 as i32));
        assert_eq!(remap_internal_format(glow::R16F as i32), Some(glow::LUMINANCE as i32));
        assert_eq!(
            remap_internal_format(glow::DEPTH24_STENCIL8 as i32),
            Some(glow::DEPTH_STENCIL as i32)
        );
        assert_eq!(remap_internal_format(glow::RGBA8 as i32), None);
    }

    #[test]
    fn rgb_uploads_are_promoted_to_rgba() {
        let gl = compat();
        let texture = gl.create_texture().unwrap();
        gl.bind_texture(glow::TEXTURE_2D, Some(texture));
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::RGB as i32,
            2,
            1,
            glow::RGB,
            glow::UNSIGNED_BYTE,
            Some(&[1, 2, 3, 4, 5, 6]),
        )
        .unwrap();

        let upload = &gl.inner().uploads()[0];
        assert_eq!(upload.internal_format, glow::RGBA as i32);
        assert_eq!(upload.format, glow::RGBA);
        assert!(upload.has_pixels);
    }

    #[test]
    fn rejected_upload_retries_as_rgba_then_gives_up_quietly() {
        let gl = compat();
        gl.inner().reject_internal_format(glow::RGBA8 as i32);
        let texture = gl.create_texture().unwrap();
        gl.bind_texture(glow::TEXTURE_2D, Some(texture));

        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::SRGB8_ALPHA8 as i32,
            1,
            1,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            Some(&[0, 0, 0, 255]),
        )
        .unwrap();
        let uploads = gl.inner().uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].internal_format, glow::RGBA as i32);

        gl.inner().reject_internal_format(glow::RGBA as i32);
        assert!(gl
            .tex_image_2d(glow::TEXTURE_2D, 0, glow::RGBA8 as i32, 1, 1, glow::RGBA, glow::UNSIGNED_BYTE, None)
            .is_ok());
        assert_eq!(gl.inner().uploads().len(), 1);
    }

    #[test]
    fn mipmap_without_binding_is_a_no_op() {
        let gl = compat();
        assert!(gl.generate_mipmap(glow::TEXTURE_2D).is_ok());

        let texture = gl.create_texture().unwrap();
        gl.bind_texture(glow::TEXTURE_2D, Some(texture));
        gl.generate_mipmap(glow::TEXTURE_2D).unwrap();
        assert!(gl.inner().is_mipmapped(texture));

        gl.delete_texture(texture);
        assert!(gl.generate_mipmap(glow::TEXTURE_2D).is_ok());
    }

    #[test]
    fn get_error_passes_codes_through() {
        let gl = compat();
        gl.inner().push_error(glow::INVALID_ENUM);
        gl.inner().push_error(glow::INVALID_ENUM);
        gl.inner().push_error(glow::INVALID_VALUE);
        assert_eq!(gl.get_error(), glow::INVALID_ENUM);
        assert_eq!(gl.get_error(), glow::INVALID_ENUM);
        assert_eq!(gl.get_error(), glow::INVALID_VALUE);
        assert_eq!(gl.get_error(), glow::NO_ERROR);
    }

    #[test]
    fn repeated_error_codes_are_logged_once() {
        let gl = compat();
        gl.inner().push_error(glow::INVALID_ENUM);
        gl.inner().push_error(glow::INVALID_ENUM);
        gl.get_error();
        gl.get_error();
        assert_eq!(gl.reported_errors(), 1);

        // A clean read in between does not re-arm the same code.
        assert_eq!(gl.get_error(), glow::NO_ERROR);
        gl.inner().push_error(glow::INVALID_ENUM);
        gl.get_error();
        assert_eq!(gl.reported_errors(), 1);

        gl.inner().push_error(glow::INVALID_VALUE);
        gl.inner().push_error(glow::INVALID_ENUM);
        gl.get_error();
        gl.get_error();
        assert_eq!(gl.reported_errors(), 3);
    }

    #[test]
    fn missing_allow_listed_extensions_are_stubbed() {
        let gl = compat();
        gl.inner().hide_extension("OES_texture_float");
        assert_eq!(gl.extension("OES_texture_float"), Some(ExtensionSupport::Stub));
        assert_eq!(
            gl.extension("OES_texture_half_float"),
            Some(ExtensionSupport::Native)
        );
        assert_eq!(gl.extension("WEBGL_lose_context"), None);
        assert!(!gl.has_extension("OES_texture_float"));
    }
}
