use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::gl::{Gl, GlError};

/// Attribute slot the fullscreen quad feeds; bound before linking so every
/// program agrees on it.
pub const POSITION_ATTRIBUTE: u32 = 0;

/// GLSL flavour the active context accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlslDialect {
    /// OpenGL ES 3.0 / WebGL2; sources are used as written.
    Es300,
    /// Desktop OpenGL 3.3 core profile.
    Desktop330,
}

impl GlslDialect {
    /// Rewrites the `#version` directive for this dialect, adding one when
    /// the source has none.
    pub fn prepare<'a>(self, source: &'a str) -> Cow<'a, str> {
        match self {
            GlslDialect::Es300 => Cow::Borrowed(source),
            GlslDialect::Desktop330 => {
                let body = source
                    .trim_start()
                    .strip_prefix("#version")
                    .map(|rest| rest.split_once('\n').map_or("", |(_, tail)| tail))
                    .unwrap_or(source);
                Cow::Owned(format!("#version 330 core\n{body}"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    fn gl_kind(self) -> u32 {
        match self {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Gl(#[from] GlError),
    #[error("{stage} shader failed to compile: {log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("program failed to link: {log}")]
    Link { log: String },
}

/// A linked program and the exact sources it was built from.
///
/// Holding one means linking succeeded; there is no "empty" program.
/// Uniform locations are looked up once per name and cached, including
/// misses.
pub struct ShaderProgram<G: Gl> {
    handle: G::Program,
    vertex_source: String,
    fragment_source: String,
    locations: RefCell<HashMap<&'static str, Option<G::UniformLocation>>>,
}

impl<G: Gl> fmt::Debug for ShaderProgram<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("handle", &self.handle)
            .field("cached_locations", &self.locations.borrow().len())
            .finish()
    }
}

impl<G: Gl> ShaderProgram<G> {
    pub fn handle(&self) -> G::Program {
        self.handle
    }

    pub fn vertex_source(&self) -> &str {
        &self.vertex_source
    }

    pub fn fragment_source(&self) -> &str {
        &self.fragment_source
    }

    /// Location of `name`, or `None` when the program has no such active
    /// uniform.
    pub fn uniform(&self, gl: &G, name: &'static str) -> Option<G::UniformLocation> {
        self.locations
            .borrow_mut()
            .entry(name)
            .or_insert_with(|| gl.uniform_location(self.handle, name))
            .clone()
    }

    pub fn release(self, gl: &G) {
        gl.delete_program(self.handle);
    }
}

/// Compiles and links a program. Every intermediate shader object is
/// deleted before returning, and nothing from a failed attempt survives.
pub fn build_program<G: Gl>(
    gl: &G,
    dialect: GlslDialect,
    vertex_source: &str,
    fragment_source: &str,
) -> Result<ShaderProgram<G>, BuildError> {
    let vertex_source = dialect.prepare(vertex_source).into_owned();
    let fragment_source = dialect.prepare(fragment_source).into_owned();

    let vertex = compile_shader(gl, ShaderStage::Vertex, &vertex_source)?;
    let fragment = match compile_shader(gl, ShaderStage::Fragment, &fragment_source) {
        Ok(shader) => shader,
        Err(err) => {
            gl.delete_shader(vertex);
            return Err(err);
        }
    };

    let program = match gl.create_program() {
        Ok(program) => program,
        Err(err) => {
            gl.delete_shader(vertex);
            gl.delete_shader(fragment);
            return Err(err.into());
        }
    };

    gl.attach_shader(program, vertex);
    gl.attach_shader(program, fragment);
    gl.bind_attrib_location(program, POSITION_ATTRIBUTE, "position");
    gl.link_program(program);
    let linked = gl.program_link_status(program);

    gl.detach_shader(program, vertex);
    gl.detach_shader(program, fragment);
    gl.delete_shader(vertex);
    gl.delete_shader(fragment);

    if !linked {
        let log = gl.program_info_log(program);
        gl.delete_program(program);
        warn!(log = %log.trim(), "program link failed");
        return Err(BuildError::Link { log });
    }

    debug!(program = ?program, "program linked");
    Ok(ShaderProgram {
        handle: program,
        vertex_source,
        fragment_source,
        locations: RefCell::new(HashMap::new()),
    })
}

fn compile_shader<G: Gl>(
    gl: &G,
    stage: ShaderStage,
    source: &str,
) -> Result<G::Shader, BuildError> {
    let shader = gl.create_shader(stage.gl_kind())?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader);
    if gl.shader_compile_status(shader) {
        return Ok(shader);
    }
    let log = gl.shader_info_log(shader);
    gl.delete_shader(shader);
    warn!(%stage, log = %log.trim(), "shader compile failed");
    Err(BuildError::Compile { stage, log })
}
