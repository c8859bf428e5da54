use std::time::Duration;

use assets::{ShaderSources, TextureSet};
use scheduler::FrameTick;
use simconfig::{ParameterError, SimulationParameters};
use tracing::{debug, trace};

use crate::gl::Gl;
use crate::pipeline::{FrameInputs, InitError, PipelineState, PostProcessPipeline, RenderError};
use crate::program::GlslDialect;
use crate::textures::upload_textures;

/// Token announced to the embedding host once initialization succeeds.
pub const LOADED_MESSAGE: &str = "blackhole-loaded";

/// Longest step simulated time advances by in one frame, so a stalled host
/// does not make the animation jump.
pub const MAX_FRAME_DELTA: Duration = Duration::from_millis(250);

/// Everything [`Simulation::initialize`] needs besides the context.
#[derive(Debug, Clone, Copy)]
pub struct SimulationSetup<'a> {
    pub width: u32,
    pub height: u32,
    pub dialect: GlslDialect,
    pub sources: &'a ShaderSources,
    pub textures: &'a TextureSet,
    pub parameters: SimulationParameters,
}

/// One black-hole visualization bound to a rendering context.
///
/// Owns the context, the GPU resources, and the live parameter record.
/// External controls mutate parameters through `&mut self`, so there is
/// only ever one writer.
pub struct Simulation<G: Gl> {
    gl: G,
    pipeline: PostProcessPipeline<G>,
    parameters: SimulationParameters,
    pointer: [f32; 2],
    elapsed: Duration,
    synthesized_textures: bool,
}

impl<G: Gl> Simulation<G> {
    /// Uploads textures and builds the pipeline. Fails only when the scene
    /// program itself cannot be built or the context refuses to allocate.
    pub fn initialize(gl: G, setup: SimulationSetup<'_>) -> Result<Self, InitError> {
        let textures = upload_textures(&gl, setup.textures)?;
        let mut pipeline = PostProcessPipeline::new(setup.width, setup.height);
        pipeline.build(&gl, setup.dialect, setup.sources, textures)?;
        Ok(Self {
            gl,
            pipeline,
            parameters: setup.parameters,
            pointer: [0.5, 0.5],
            elapsed: Duration::ZERO,
            synthesized_textures: setup.textures.is_synthesized(),
        })
    }

    pub fn gl(&self) -> &G {
        &self.gl
    }

    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    pub fn pipeline(&self) -> &PostProcessPipeline<G> {
        &self.pipeline
    }

    pub fn textures_synthesized(&self) -> bool {
        self.synthesized_textures
    }

    pub fn parameters(&self) -> &SimulationParameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut SimulationParameters {
        &mut self.parameters
    }

    pub fn set_parameter(&mut self, name: &str, value: f32) -> Result<(), ParameterError> {
        self.parameters.set(name, value)?;
        debug!(parameter = name, value, "parameter updated");
        Ok(())
    }

    /// Sets the pointer from coordinates already normalized to [0, 1].
    pub fn set_pointer(&mut self, x: f32, y: f32) {
        self.pointer = [x.clamp(0.0, 1.0), y.clamp(0.0, 1.0)];
    }

    pub fn pointer(&self) -> [f32; 2] {
        self.pointer
    }

    /// Simulated time fed to the shaders.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Advances simulated time by the tick's delta and renders one frame.
    pub fn render_frame(&mut self, tick: &FrameTick) -> Result<(), RenderError> {
        self.elapsed += tick.delta.min(MAX_FRAME_DELTA);
        let inputs = FrameInputs {
            parameters: &self.parameters,
            time: self.elapsed.as_secs_f32(),
            pointer: self.pointer,
        };
        self.pipeline.render(&self.gl, &inputs)?;
        let error = self.gl.get_error();
        if error != glow::NO_ERROR {
            trace!(frame = tick.frame_number, error, "frame raised a GL error");
        }
        Ok(())
    }

    /// Rebuilds the render targets for a new surface size.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.pipeline.resize(&self.gl, width, height);
    }

    /// Releases every GPU object and hands the context back.
    pub fn teardown(mut self) -> G {
        self.pipeline.release(&self.gl);
        self.gl
    }
}

/// Maps a pointer position in surface pixels to [0, 1]² with the origin at
/// the bottom-left. `None` for an empty surface.
pub fn normalize_pointer(
    position: (f64, f64),
    origin: (f64, f64),
    size: (f64, f64),
) -> Option<[f32; 2]> {
    let (width, height) = size;
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    let x = (position.0 - origin.0) / width;
    let y = 1.0 - (position.1 - origin.1) / height;
    Some([x.clamp(0.0, 1.0) as f32, y.clamp(0.0, 1.0) as f32])
}
