//! Lookup-and-skip uniform binding.
//!
//! Every uniform write in the pipeline goes through [`UniformScope`], which
//! resolves the name against the program's cached locations and silently
//! skips names the program does not use.

use simconfig::SimulationParameters;
use tracing::trace;

use crate::gl::Gl;
use crate::program::ShaderProgram;

/// A program made current, ready to receive uniform values.
pub struct UniformScope<'a, G: Gl> {
    gl: &'a G,
    program: &'a ShaderProgram<G>,
}

impl<'a, G: Gl> UniformScope<'a, G> {
    /// Makes `program` current.
    pub fn activate(gl: &'a G, program: &'a ShaderProgram<G>) -> Self {
        gl.use_program(Some(program.handle()));
        Self { gl, program }
    }

    fn location(&self, name: &'static str) -> Option<G::UniformLocation> {
        let location = self.program.uniform(self.gl, name);
        if location.is_none() {
            trace!(uniform = name, "uniform not active; skipped");
        }
        location
    }

    /// Returns whether the program had the uniform.
    pub fn set_f32(&self, name: &'static str, value: f32) -> bool {
        self.location(name)
            .map(|location| self.gl.uniform_1_f32(&location, value))
            .is_some()
    }

    pub fn set_vec2(&self, name: &'static str, x: f32, y: f32) -> bool {
        self.location(name)
            .map(|location| self.gl.uniform_2_f32(&location, x, y))
            .is_some()
    }

    pub fn set_i32(&self, name: &'static str, value: i32) -> bool {
        self.location(name)
            .map(|location| self.gl.uniform_1_i32(&location, value))
            .is_some()
    }

    /// Binds `texture` to texture unit `unit` and points sampler `name` at it.
    /// The texture is bound even when the sampler is unused.
    pub fn set_texture(
        &self,
        name: &'static str,
        unit: u32,
        target: u32,
        texture: G::Texture,
    ) -> bool {
        self.gl.active_texture(glow::TEXTURE0 + unit);
        self.gl.bind_texture(target, Some(texture));
        self.set_i32(name, unit as i32)
    }

    /// Writes every parameter the program declares; returns how many were set.
    pub fn set_parameters(&self, parameters: &SimulationParameters) -> usize {
        parameters
            .iter()
            .filter(|&(name, value)| self.set_f32(name, value))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::headless::{HeadlessGl, UniformValue};
    use crate::program::{build_program, GlslDialect};
    use assets::FALLBACK_VERTEX;

    const FRAGMENT: &str = r#"#version 300 es
precision highp float;
in vec2 uv;
out vec4 fragColor;
uniform float gamma;
uniform float bloomStrength;
uniform sampler2D texture0;
void main() {
    vec3 color = texture(texture0, uv).rgb * bloomStrength;
    fragColor = vec4(pow(color, vec3(1.0 / gamma)), 1.0);
}
"#;

    #[test]
    fn binds_only_declared_parameters() {
        let gl = HeadlessGl::new();
        let program = build_program(&gl, GlslDialect::Es300, FALLBACK_VERTEX, FRAGMENT).unwrap();
        let parameters = SimulationParameters {
            gamma: 2.2,
            ..SimulationParameters::default()
        };

        let scope = UniformScope::activate(&gl, &program);
        assert_eq!(scope.set_parameters(&parameters), 2);
        gl.draw_arrays(glow::TRIANGLES, 0, 6);

        let draw = &gl.draws()[0];
        assert_eq!(draw.uniform("gamma"), Some(UniformValue::Float(2.2)));
        assert_eq!(draw.uniform("bloomStrength"), Some(UniformValue::Float(0.15)));
        assert_eq!(draw.uniforms.len(), 2);
        assert_eq!(gl.get_error(), glow::NO_ERROR);
    }

    #[test]
    fn missing_uniform_leaves_others_untouched() {
        let gl = HeadlessGl::new();
        let program = build_program(&gl, GlslDialect::Es300, FALLBACK_VERTEX, FRAGMENT).unwrap();
        let scope = UniformScope::activate(&gl, &program);

        assert!(scope.set_f32("gamma", 1.8));
        assert!(!scope.set_f32("adiskSpeed", 9.0));
        assert!(!scope.set_vec2("resolution", 1.0, 1.0));
        gl.draw_arrays(glow::TRIANGLES, 0, 6);

        let draw = &gl.draws()[0];
        assert_eq!(draw.uniform("gamma"), Some(UniformValue::Float(1.8)));
        assert_eq!(draw.uniforms.len(), 1);
        assert_eq!(gl.get_error(), glow::NO_ERROR);
    }

    #[test]
    fn texture_binding_sets_sampler_unit() {
        let gl = HeadlessGl::new();
        let program = build_program(&gl, GlslDialect::Es300, FALLBACK_VERTEX, FRAGMENT).unwrap();
        let texture = gl.create_texture().unwrap();
        let scope = UniformScope::activate(&gl, &program);

        assert!(scope.set_texture("texture0", 1, glow::TEXTURE_2D, texture));
        gl.draw_arrays(glow::TRIANGLES, 0, 6);

        let draw = &gl.draws()[0];
        assert_eq!(draw.uniform("texture0"), Some(UniformValue::Int(1)));
        assert_eq!(draw.texture(1, glow::TEXTURE_2D), Some(texture));
    }
}
