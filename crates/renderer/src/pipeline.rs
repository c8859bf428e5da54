use std::fmt;
use std::mem;

use assets::{
    ShaderSources, BLOOM_COMPOSITE_SHADER, BRIGHTNESS_SHADER, PASSTHROUGH_SHADER, SCENE_SHADER,
    TONEMAPPING_SHADER,
};
use simconfig::SimulationParameters;
use tracing::{debug, info, trace, warn};

use crate::gl::{Gl, GlError};
use crate::program::{build_program, BuildError, GlslDialect, ShaderProgram, POSITION_ATTRIBUTE};
use crate::targets::{RenderTarget, TargetPool};
use crate::textures::GpuTextures;
use crate::uniforms::UniformScope;

/// Two triangles covering clip space, three floats per vertex.
pub const QUAD_VERTICES: [f32; 18] = [
    -1.0, -1.0, 0.0, //
    1.0, -1.0, 0.0, //
    -1.0, 1.0, 0.0, //
    -1.0, 1.0, 0.0, //
    1.0, -1.0, 0.0, //
    1.0, 1.0, 0.0, //
];
pub const QUAD_VERTEX_COUNT: i32 = 6;

/// Passes in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Scene,
    Brightness,
    BloomComposite,
    ToneMap,
    Passthrough,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::Scene,
        PipelineStage::Brightness,
        PipelineStage::BloomComposite,
        PipelineStage::ToneMap,
        PipelineStage::Passthrough,
    ];

    pub fn shader_file(self) -> &'static str {
        match self {
            PipelineStage::Scene => SCENE_SHADER,
            PipelineStage::Brightness => BRIGHTNESS_SHADER,
            PipelineStage::BloomComposite => BLOOM_COMPOSITE_SHADER,
            PipelineStage::ToneMap => TONEMAPPING_SHADER,
            PipelineStage::Passthrough => PASSTHROUGH_SHADER,
        }
    }

    fn fragment_source(self, sources: &ShaderSources) -> &str {
        match self {
            PipelineStage::Scene => &sources.scene,
            PipelineStage::Brightness => &sources.brightness,
            PipelineStage::BloomComposite => &sources.bloom_composite,
            PipelineStage::ToneMap => &sources.tonemapping,
            PipelineStage::Passthrough => &sources.passthrough,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Building,
    /// Scene plus brightness, bloom, tone mapping, and the final blit.
    FullPipeline,
    /// The scene program draws straight to the surface; settled for good.
    DegradedDirect,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("scene program failed to build")]
    SceneProgram(#[source] BuildError),
    #[error(transparent)]
    Gl(#[from] GlError),
    #[error("pipeline has already been built once")]
    AlreadyBuilt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("pipeline is {0:?}; nothing to render")]
    NotReady(PipelineState),
}

/// Per-frame values that feed the uniforms.
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    pub parameters: &'a SimulationParameters,
    /// Seconds of simulated time.
    pub time: f32,
    /// Pointer position normalized to [0, 1] with the origin bottom-left.
    pub pointer: [f32; 2],
}

struct Quad<G: Gl> {
    vertex_array: G::VertexArray,
    buffer: G::Buffer,
}

impl<G: Gl> Quad<G> {
    fn create(gl: &G) -> Result<Self, GlError> {
        let vertex_array = gl.create_vertex_array()?;
        let buffer = match gl.create_buffer() {
            Ok(buffer) => buffer,
            Err(err) => {
                gl.delete_vertex_array(vertex_array);
                return Err(err);
            }
        };
        gl.bind_vertex_array(Some(vertex_array));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
        gl.buffer_data_u8_slice(
            glow::ARRAY_BUFFER,
            bytemuck::cast_slice(&QUAD_VERTICES),
            glow::STATIC_DRAW,
        );
        gl.enable_vertex_attrib_array(POSITION_ATTRIBUTE);
        gl.vertex_attrib_pointer_f32(POSITION_ATTRIBUTE, 3, 3 * mem::size_of::<f32>() as i32, 0);
        gl.bind_vertex_array(None);
        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        Ok(Self {
            vertex_array,
            buffer,
        })
    }

    fn draw(&self, gl: &G) {
        gl.bind_vertex_array(Some(self.vertex_array));
        gl.draw_arrays(glow::TRIANGLES, 0, QUAD_VERTEX_COUNT);
    }

    fn release(self, gl: &G) {
        gl.delete_vertex_array(self.vertex_array);
        gl.delete_buffer(self.buffer);
    }
}

struct PostPrograms<G: Gl> {
    brightness: ShaderProgram<G>,
    bloom: ShaderProgram<G>,
    tonemap: ShaderProgram<G>,
    passthrough: ShaderProgram<G>,
}

impl<G: Gl> PostPrograms<G> {
    fn release(self, gl: &G) {
        self.brightness.release(gl);
        self.bloom.release(gl);
        self.tonemap.release(gl);
        self.passthrough.release(gl);
    }
}

struct FullPath<G: Gl> {
    programs: PostPrograms<G>,
    targets: TargetPool<G>,
}

impl<G: Gl> FullPath<G> {
    fn release(self, gl: &G) {
        self.programs.release(gl);
        self.targets.release(gl);
    }
}

struct Resources<G: Gl> {
    quad: Quad<G>,
    textures: GpuTextures<G>,
    scene: ShaderProgram<G>,
    /// Present exactly when the pipeline is in `FullPipeline`.
    full: Option<FullPath<G>>,
}

/// Scene pass followed by brightness extraction, bloom compositing, tone
/// mapping, and a blit to the surface, or the scene pass alone when any
/// post stage is unavailable.
pub struct PostProcessPipeline<G: Gl> {
    state: PipelineState,
    attempted: bool,
    width: u32,
    height: u32,
    resources: Option<Resources<G>>,
}

impl<G: Gl> fmt::Debug for PostProcessPipeline<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostProcessPipeline")
            .field("state", &self.state)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl<G: Gl> PostProcessPipeline<G> {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: PipelineState::Uninitialized,
            attempted: false,
            width,
            height,
            resources: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether `stage` has a linked program this session.
    pub fn has_stage(&self, stage: PipelineStage) -> bool {
        match (&self.resources, stage) {
            (None, _) => false,
            (Some(_), PipelineStage::Scene) => true,
            (Some(resources), _) => resources.full.is_some(),
        }
    }

    pub fn targets(&self) -> Option<&TargetPool<G>> {
        self.resources
            .as_ref()
            .and_then(|resources| resources.full.as_ref())
            .map(|full| &full.targets)
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
    }

    /// Builds every program and, when all post stages link, the render
    /// targets. Takes ownership of `textures`, releasing them on failure.
    ///
    /// Only the scene program is essential. Runs at most once per pipeline.
    pub fn build(
        &mut self,
        gl: &G,
        dialect: GlslDialect,
        sources: &ShaderSources,
        textures: GpuTextures<G>,
    ) -> Result<PipelineState, InitError> {
        if self.attempted {
            textures.release(gl);
            return Err(InitError::AlreadyBuilt);
        }
        self.attempted = true;
        self.transition(PipelineState::Building);

        let scene = match build_program(gl, dialect, &sources.vertex, &sources.scene) {
            Ok(program) => program,
            Err(err) => {
                textures.release(gl);
                self.transition(PipelineState::Uninitialized);
                return Err(InitError::SceneProgram(err));
            }
        };
        let quad = match Quad::create(gl) {
            Ok(quad) => quad,
            Err(err) => {
                scene.release(gl);
                textures.release(gl);
                self.transition(PipelineState::Uninitialized);
                return Err(err.into());
            }
        };

        let full = self.build_full_path(gl, dialect, sources);
        let state = if full.is_some() {
            PipelineState::FullPipeline
        } else {
            PipelineState::DegradedDirect
        };
        self.resources = Some(Resources {
            quad,
            textures,
            scene,
            full,
        });
        self.transition(state);
        info!(?state, width = self.width, height = self.height, "pipeline ready");
        Ok(state)
    }

    fn build_full_path(
        &self,
        gl: &G,
        dialect: GlslDialect,
        sources: &ShaderSources,
    ) -> Option<FullPath<G>> {
        let build = |stage: PipelineStage| {
            build_program(gl, dialect, &sources.vertex, stage.fragment_source(sources))
                .map_err(|err| {
                    warn!(?stage, file = stage.shader_file(), error = %err, "stage unavailable");
                })
                .ok()
        };
        let programs = match (
            build(PipelineStage::Brightness),
            build(PipelineStage::BloomComposite),
            build(PipelineStage::ToneMap),
            build(PipelineStage::Passthrough),
        ) {
            (Some(brightness), Some(bloom), Some(tonemap), Some(passthrough)) => PostPrograms {
                brightness,
                bloom,
                tonemap,
                passthrough,
            },
            (brightness, bloom, tonemap, passthrough) => {
                for program in [brightness, bloom, tonemap, passthrough].into_iter().flatten() {
                    program.release(gl);
                }
                warn!("post-processing disabled; rendering the scene directly");
                return None;
            }
        };

        let targets = match self.create_targets(gl) {
            Some(targets) => targets,
            None => {
                programs.release(gl);
                return None;
            }
        };
        Some(FullPath { programs, targets })
    }

    fn create_targets(&self, gl: &G) -> Option<TargetPool<G>> {
        match TargetPool::create(gl, self.width, self.height) {
            Ok(pool) if pool.is_complete() => Some(pool),
            Ok(pool) => {
                warn!("render targets incomplete; rendering the scene directly");
                pool.release(gl);
                None
            }
            Err(err) => {
                warn!(error = %err, "render targets unavailable; rendering the scene directly");
                None
            }
        }
    }

    /// Recreates the render targets at the new size. Programs are kept.
    ///
    /// If the new targets cannot be made complete the pipeline degrades.
    pub fn resize(&mut self, gl: &G, width: u32, height: u32) {
        if (width, height) == (self.width, self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        let Some(full) = self.resources.as_mut().and_then(|r| r.full.take()) else {
            return;
        };
        full.targets.release(gl);
        match self.create_targets(gl) {
            Some(targets) => {
                if let Some(resources) = self.resources.as_mut() {
                    resources.full = Some(FullPath {
                        programs: full.programs,
                        targets,
                    });
                }
                debug!(width, height, "render targets resized");
            }
            None => {
                full.programs.release(gl);
                self.transition(PipelineState::DegradedDirect);
            }
        }
    }

    /// Renders one frame into the default framebuffer.
    pub fn render(&self, gl: &G, inputs: &FrameInputs<'_>) -> Result<(), RenderError> {
        let Some(resources) = &self.resources else {
            return Err(RenderError::NotReady(self.state));
        };
        match &resources.full {
            Some(full) => self.render_full(gl, resources, full, inputs),
            None => {
                self.begin_pass(gl, None);
                self.bind_scene(gl, resources, inputs);
                resources.quad.draw(gl);
                trace!("direct scene pass");
            }
        }
        Ok(())
    }

    fn render_full(
        &self,
        gl: &G,
        resources: &Resources<G>,
        full: &FullPath<G>,
        inputs: &FrameInputs<'_>,
    ) {
        let (width, height) = (self.width as f32, self.height as f32);
        let targets = &full.targets;
        let programs = &full.programs;
        let quad = &resources.quad;

        self.begin_pass(gl, Some(&targets.scene));
        self.bind_scene(gl, resources, inputs);
        quad.draw(gl);
        trace!(stage = ?PipelineStage::Scene, "pass");

        self.begin_pass(gl, Some(&targets.brightness));
        let scope = UniformScope::activate(gl, &programs.brightness);
        scope.set_texture("texture0", 0, glow::TEXTURE_2D, targets.scene.texture());
        scope.set_vec2("resolution", width, height);
        quad.draw(gl);
        trace!(stage = ?PipelineStage::Brightness, "pass");

        self.begin_pass(gl, Some(&targets.bloom));
        let scope = UniformScope::activate(gl, &programs.bloom);
        scope.set_texture("texture0", 0, glow::TEXTURE_2D, targets.scene.texture());
        scope.set_texture("texture1", 1, glow::TEXTURE_2D, targets.brightness.texture());
        scope.set_f32("bloomStrength", inputs.parameters.bloom_strength);
        scope.set_f32("tone", 1.0);
        quad.draw(gl);
        trace!(stage = ?PipelineStage::BloomComposite, "pass");

        self.begin_pass(gl, Some(&targets.output));
        let scope = UniformScope::activate(gl, &programs.tonemap);
        scope.set_texture("texture0", 0, glow::TEXTURE_2D, targets.bloom.texture());
        scope.set_f32("tonemappingEnabled", inputs.parameters.tonemapping_enabled);
        scope.set_f32("gamma", inputs.parameters.gamma);
        quad.draw(gl);
        trace!(stage = ?PipelineStage::ToneMap, "pass");

        self.begin_pass(gl, None);
        let scope = UniformScope::activate(gl, &programs.passthrough);
        scope.set_texture("texture0", 0, glow::TEXTURE_2D, targets.output.texture());
        scope.set_vec2("resolution", width, height);
        scope.set_f32("time", inputs.time);
        quad.draw(gl);
        trace!(stage = ?PipelineStage::Passthrough, "pass");
    }

    /// Binds `target` (or the surface) and clears it to opaque black.
    fn begin_pass(&self, gl: &G, target: Option<&RenderTarget<G>>) {
        match target {
            Some(target) => target.bind(gl),
            None => {
                gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                gl.viewport(0, 0, self.width as i32, self.height as i32);
            }
        }
        gl.clear_color(0.0, 0.0, 0.0, 1.0);
        gl.clear(glow::COLOR_BUFFER_BIT);
    }

    fn bind_scene(&self, gl: &G, resources: &Resources<G>, inputs: &FrameInputs<'_>) {
        let (width, height) = (self.width as f32, self.height as f32);
        let scope = UniformScope::activate(gl, &resources.scene);
        scope.set_texture(
            "galaxy",
            0,
            glow::TEXTURE_CUBE_MAP,
            resources.textures.galaxy,
        );
        scope.set_texture("colorMap", 1, glow::TEXTURE_2D, resources.textures.color_map);
        scope.set_vec2("resolution", width, height);
        scope.set_f32("time", inputs.time);
        scope.set_f32("mouseX", inputs.pointer[0] * width);
        scope.set_f32("mouseY", inputs.pointer[1] * height);
        scope.set_parameters(inputs.parameters);
    }

    /// Deletes every GPU object the pipeline owns. The pipeline cannot be
    /// built again afterwards.
    pub fn release(&mut self, gl: &G) {
        if let Some(resources) = self.resources.take() {
            if let Some(full) = resources.full {
                full.release(gl);
            }
            resources.scene.release(gl);
            resources.quad.release(gl);
            resources.textures.release(gl);
        }
        self.transition(PipelineState::Uninitialized);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::headless::HeadlessGl;
    use crate::textures::upload_textures;
    use assets::TextureSet;

    fn textures(gl: &HeadlessGl) -> GpuTextures<HeadlessGl> {
        upload_textures(gl, &TextureSet::synthesized(1)).unwrap()
    }

    fn build(gl: &HeadlessGl, sources: &ShaderSources) -> PostProcessPipeline<HeadlessGl> {
        let mut pipeline = PostProcessPipeline::new(32, 16);
        let textures = textures(gl);
        pipeline
            .build(gl, GlslDialect::Es300, sources, textures)
            .unwrap();
        pipeline
    }

    fn inputs(parameters: &SimulationParameters) -> FrameInputs<'_> {
        FrameInputs {
            parameters,
            time: 1.5,
            pointer: [0.5, 0.25],
        }
    }

    #[test]
    fn quad_is_two_triangles_over_clip_space() {
        let corners: Vec<&[f32]> = QUAD_VERTICES.chunks_exact(3).collect();
        assert_eq!(corners.len(), QUAD_VERTEX_COUNT as usize);
        assert!(corners.iter().all(|v| v[0].abs() == 1.0 && v[1].abs() == 1.0 && v[2] == 0.0));
    }

    #[test]
    fn fallback_sources_reach_full_pipeline() {
        let gl = HeadlessGl::new();
        let pipeline = build(&gl, &ShaderSources::fallback());
        assert_eq!(pipeline.state(), PipelineState::FullPipeline);
        assert!(PipelineStage::ALL.iter().all(|s| pipeline.has_stage(*s)));
        assert_eq!(gl.live_programs(), 5);
        assert_eq!(gl.live_framebuffers(), 4);
    }

    #[test]
    fn full_frame_visits_targets_in_order() {
        let gl = HeadlessGl::new();
        let pipeline = build(&gl, &ShaderSources::fallback());
        let parameters = SimulationParameters::default();
        gl.clear_events();

        pipeline.render(&gl, &inputs(&parameters)).unwrap();

        let targets = pipeline.targets().unwrap();
        let expected = vec![
            Some(targets.scene.framebuffer()),
            Some(targets.brightness.framebuffer()),
            Some(targets.bloom.framebuffer()),
            Some(targets.output.framebuffer()),
            None,
        ];
        let draws = gl.draws();
        let order: Vec<_> = draws.iter().map(|d| d.framebuffer).collect();
        assert_eq!(order, expected);
        assert!(draws.iter().all(|d| d.count == 6 && d.mode == glow::TRIANGLES));
        assert!(draws.iter().all(|d| d.viewport == [0, 0, 32, 16]));
        assert_eq!(gl.get_error(), glow::NO_ERROR);
    }

    #[test]
    fn malformed_bloom_shader_degrades() {
        let gl = HeadlessGl::new();
        let sources = ShaderSources {
            bloom_composite: "void main() {".to_string(),
            ..ShaderSources::fallback()
        };
        let pipeline = build(&gl, &sources);
        assert_eq!(pipeline.state(), PipelineState::DegradedDirect);
        assert!(!pipeline.has_stage(PipelineStage::Brightness));
        assert!(pipeline.targets().is_none());
        assert_eq!(gl.live_programs(), 1);
        assert_eq!(gl.live_framebuffers(), 0);
        assert_eq!(gl.live_shaders(), 0);
    }

    #[test]
    fn failed_passthrough_also_degrades() {
        let gl = HeadlessGl::new();
        let sources = ShaderSources {
            passthrough: String::new(),
            ..ShaderSources::fallback()
        };
        assert_eq!(build(&gl, &sources).state(), PipelineState::DegradedDirect);
    }

    #[test]
    fn incomplete_targets_degrade() {
        let gl = HeadlessGl::new();
        gl.break_framebuffers();
        let pipeline = build(&gl, &ShaderSources::fallback());
        assert_eq!(pipeline.state(), PipelineState::DegradedDirect);
        assert_eq!(gl.live_framebuffers(), 0);
        assert_eq!(gl.live_programs(), 1);
    }

    #[test]
    fn scene_failure_is_fatal_and_leaves_nothing() {
        let gl = HeadlessGl::new();
        let sources = ShaderSources {
            scene: "not glsl".to_string(),
            ..ShaderSources::fallback()
        };
        let mut pipeline = PostProcessPipeline::new(8, 8);
        let result = pipeline.build(&gl, GlslDialect::Es300, &sources, textures(&gl));
        assert!(matches!(result, Err(InitError::SceneProgram(_))));
        assert_eq!(pipeline.state(), PipelineState::Uninitialized);
        assert_eq!(gl.live_objects(), 0);
        assert_eq!(
            pipeline.render(&gl, &inputs(&SimulationParameters::default())),
            Err(RenderError::NotReady(PipelineState::Uninitialized))
        );
    }

    #[test]
    fn build_runs_only_once() {
        let gl = HeadlessGl::new();
        let mut pipeline = build(&gl, &ShaderSources::fallback());
        let second = pipeline.build(
            &gl,
            GlslDialect::Es300,
            &ShaderSources::fallback(),
            textures(&gl),
        );
        assert!(matches!(second, Err(InitError::AlreadyBuilt)));
        assert_eq!(gl.live_textures(), 2 + 4);
    }

    #[test]
    fn resize_recreates_targets() {
        let gl = HeadlessGl::new();
        let mut pipeline = build(&gl, &ShaderSources::fallback());
        pipeline.resize(&gl, 64, 48);
        assert_eq!(pipeline.size(), (64, 48));
        assert_eq!(pipeline.state(), PipelineState::FullPipeline);
        assert_eq!(pipeline.targets().unwrap().scene.width(), 64);
        assert_eq!(gl.live_framebuffers(), 4);
    }

    #[test]
    fn release_frees_every_object() {
        let gl = HeadlessGl::new();
        let mut pipeline = build(&gl, &ShaderSources::fallback());
        pipeline.release(&gl);
        assert_eq!(gl.live_objects(), 0);
        assert_eq!(pipeline.state(), PipelineState::Uninitialized);
    }
}
