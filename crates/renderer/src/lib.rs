//! Renderer crate for the black-hole visualization.
//!
//! The crate turns shader text and textures into frames through a
//! post-processing pipeline. The overall flow is:
//!
//! ```text
//!   host (native window / browser canvas)
//!          │ create_compatible_context()
//!          ▼
//!   CompatContext<G: Gl> ──▶ Simulation::initialize ──▶ PostProcessPipeline::build
//!          ▲                                                   │
//!          │                                                   ▼
//!   FrameDriver tick ──▶ Simulation::render_frame ──▶ scene → brightness → bloom
//!                                                     → tone map → passthrough
//! ```
//!
//! All GL access goes through the [`Gl`] trait so the same pipeline runs on
//! a live `glow` context or on the recording [`headless::HeadlessGl`] used
//! by tests and the headless CLI mode. When any post-processing stage fails
//! to build the pipeline settles into a direct single-pass mode; only a
//! failing scene program is fatal.

pub mod compat;
pub mod gl;
pub mod pipeline;
pub mod program;
pub mod simulation;
pub mod targets;
pub mod textures;
pub mod uniforms;

pub use compat::{
    create_compatible_context, CompatContext, ContextAttributes, NormalizedAttributes,
    PowerPreference,
};
pub use gl::headless;
pub use gl::{error_name, ExtensionSupport, Gl, GlError, GlowContext};
pub use pipeline::{
    FrameInputs, InitError, PipelineStage, PipelineState, PostProcessPipeline, RenderError,
};
pub use program::{build_program, BuildError, GlslDialect, ShaderProgram};
pub use simulation::{
    normalize_pointer, Simulation, SimulationSetup, LOADED_MESSAGE, MAX_FRAME_DELTA,
};
pub use targets::{RenderTarget, TargetPool};
pub use textures::{upload_textures, GpuTextures};
pub use uniforms::UniformScope;
