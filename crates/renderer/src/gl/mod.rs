//! Narrow OpenGL ES 3.0 / WebGL2 surface used by the pipeline.
//!
//! - `glow_backend` forwards to a live `glow::Context` (desktop GL, GLES, or
//!   WebGL2 in the browser).
//! - `headless` is an in-memory context that records every call so the
//!   pipeline can be exercised without a GPU.
//!
//! Enum arguments are the raw GL constants re-exported by `glow`, which keeps
//! the trait usable from every backend without a translation table.

mod glow_backend;
pub mod headless;

use std::fmt;

pub use glow_backend::GlowContext;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GlError {
    #[error("failed to create {object}: {message}")]
    Create {
        object: &'static str,
        message: String,
    },
    #[error("{call} failed with {}", error_name(*.code))]
    Call { call: &'static str, code: u32 },
}

/// How an extension query was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionSupport {
    Native,
    /// The host lacks the extension; an inert placeholder stands in for it.
    Stub,
}

pub trait Gl {
    type Shader: Copy + fmt::Debug;
    type Program: Copy + fmt::Debug;
    type Texture: Copy + PartialEq + fmt::Debug;
    type Framebuffer: Copy + PartialEq + fmt::Debug;
    type Buffer: Copy + fmt::Debug;
    type VertexArray: Copy + fmt::Debug;
    type UniformLocation: Clone + fmt::Debug;

    fn create_shader(&self, kind: u32) -> Result<Self::Shader, GlError>;
    fn shader_source(&self, shader: Self::Shader, source: &str);
    fn compile_shader(&self, shader: Self::Shader);
    fn shader_compile_status(&self, shader: Self::Shader) -> bool;
    fn shader_info_log(&self, shader: Self::Shader) -> String;
    fn delete_shader(&self, shader: Self::Shader);

    fn create_program(&self) -> Result<Self::Program, GlError>;
    fn attach_shader(&self, program: Self::Program, shader: Self::Shader);
    fn detach_shader(&self, program: Self::Program, shader: Self::Shader);
    fn bind_attrib_location(&self, program: Self::Program, index: u32, name: &str);
    fn link_program(&self, program: Self::Program);
    fn program_link_status(&self, program: Self::Program) -> bool;
    fn program_info_log(&self, program: Self::Program) -> String;
    fn use_program(&self, program: Option<Self::Program>);
    fn delete_program(&self, program: Self::Program);

    fn uniform_location(&self, program: Self::Program, name: &str)
        -> Option<Self::UniformLocation>;
    fn uniform_1_f32(&self, location: &Self::UniformLocation, x: f32);
    fn uniform_2_f32(&self, location: &Self::UniformLocation, x: f32, y: f32);
    fn uniform_1_i32(&self, location: &Self::UniformLocation, x: i32);

    fn create_texture(&self) -> Result<Self::Texture, GlError>;
    fn active_texture(&self, unit: u32);
    fn bind_texture(&self, target: u32, texture: Option<Self::Texture>);
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<(), GlError>;
    fn tex_parameter_i32(&self, target: u32, parameter: u32, value: i32);
    fn generate_mipmap(&self, target: u32) -> Result<(), GlError>;
    fn delete_texture(&self, texture: Self::Texture);

    fn create_framebuffer(&self) -> Result<Self::Framebuffer, GlError>;
    fn bind_framebuffer(&self, target: u32, framebuffer: Option<Self::Framebuffer>);
    fn framebuffer_texture_2d(
        &self,
        target: u32,
        attachment: u32,
        texture_target: u32,
        texture: Option<Self::Texture>,
        level: i32,
    );
    fn check_framebuffer_status(&self, target: u32) -> u32;
    fn delete_framebuffer(&self, framebuffer: Self::Framebuffer);

    fn create_buffer(&self) -> Result<Self::Buffer, GlError>;
    fn bind_buffer(&self, target: u32, buffer: Option<Self::Buffer>);
    fn buffer_data_u8_slice(&self, target: u32, data: &[u8], usage: u32);
    fn delete_buffer(&self, buffer: Self::Buffer);

    fn create_vertex_array(&self) -> Result<Self::VertexArray, GlError>;
    fn bind_vertex_array(&self, vertex_array: Option<Self::VertexArray>);
    fn enable_vertex_attrib_array(&self, index: u32);
    fn vertex_attrib_pointer_f32(&self, index: u32, size: i32, stride: i32, offset: i32);
    fn delete_vertex_array(&self, vertex_array: Self::VertexArray);

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32);
    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32);
    fn clear(&self, mask: u32);
    fn draw_arrays(&self, mode: u32, first: i32, count: i32);

    /// Pops the oldest pending error flag, `glow::NO_ERROR` when none is set.
    fn get_error(&self) -> u32;
    fn has_extension(&self, name: &str) -> bool;

    fn extension(&self, name: &str) -> Option<ExtensionSupport> {
        self.has_extension(name).then_some(ExtensionSupport::Native)
    }
}

/// `CONTEXT_LOST_WEBGL` from the WebGL specification.
pub const CONTEXT_LOST_WEBGL: u32 = 0x9242;

/// Symbolic name for a GL error flag, as used in diagnostics.
pub fn error_name(code: u32) -> String {
    match code {
        glow::NO_ERROR => "NO_ERROR".to_string(),
        glow::INVALID_ENUM => "INVALID_ENUM".to_string(),
        glow::INVALID_VALUE => "INVALID_VALUE".to_string(),
        glow::INVALID_OPERATION => "INVALID_OPERATION".to_string(),
        glow::OUT_OF_MEMORY => "OUT_OF_MEMORY".to_string(),
        CONTEXT_LOST_WEBGL => "CONTEXT_LOST_WEBGL".to_string(),
        other => format!("{other:#06x}"),
    }
}
