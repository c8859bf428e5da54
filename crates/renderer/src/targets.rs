use tracing::{debug, warn};

use crate::gl::{Gl, GlError};

/// Offscreen colour buffer: an RGBA8 texture attached to its own framebuffer.
#[derive(Debug)]
pub struct RenderTarget<G: Gl> {
    framebuffer: G::Framebuffer,
    texture: G::Texture,
    width: u32,
    height: u32,
    complete: bool,
}

impl<G: Gl> RenderTarget<G> {
    /// Allocates the texture and framebuffer. An incomplete framebuffer is
    /// logged and reported through [`RenderTarget::is_complete`], not as an
    /// error.
    pub fn create(gl: &G, width: u32, height: u32) -> Result<Self, GlError> {
        let texture = gl.create_texture()?;
        gl.bind_texture(glow::TEXTURE_2D, Some(texture));
        let storage = gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::RGBA8 as i32,
            width as i32,
            height as i32,
            glow::RGBA,
            glow::UNSIGNED_BYTE,
            None,
        );
        if let Err(err) = storage {
            gl.bind_texture(glow::TEXTURE_2D, None);
            gl.delete_texture(texture);
            return Err(err);
        }
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);

        let framebuffer = match gl.create_framebuffer() {
            Ok(framebuffer) => framebuffer,
            Err(err) => {
                gl.bind_texture(glow::TEXTURE_2D, None);
                gl.delete_texture(texture);
                return Err(err);
            }
        };
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
        gl.framebuffer_texture_2d(
            glow::FRAMEBUFFER,
            glow::COLOR_ATTACHMENT0,
            glow::TEXTURE_2D,
            Some(texture),
            0,
        );
        let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
        let complete = status == glow::FRAMEBUFFER_COMPLETE;
        if !complete {
            warn!(status = format_args!("{status:#06x}"), width, height, "render target incomplete");
        }

        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        gl.bind_texture(glow::TEXTURE_2D, None);

        Ok(Self {
            framebuffer,
            texture,
            width,
            height,
            complete,
        })
    }

    pub fn framebuffer(&self) -> G::Framebuffer {
        self.framebuffer
    }

    pub fn texture(&self) -> G::Texture {
        self.texture
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Directs drawing into this target across its full extent.
    pub fn bind(&self, gl: &G) {
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(self.framebuffer));
        gl.viewport(0, 0, self.width as i32, self.height as i32);
    }

    pub fn release(self, gl: &G) {
        gl.delete_framebuffer(self.framebuffer);
        gl.delete_texture(self.texture);
    }
}

/// The four per-stage targets of the full pipeline.
#[derive(Debug)]
pub struct TargetPool<G: Gl> {
    pub scene: RenderTarget<G>,
    pub brightness: RenderTarget<G>,
    pub bloom: RenderTarget<G>,
    pub output: RenderTarget<G>,
}

impl<G: Gl> TargetPool<G> {
    /// Creates all four targets at `width`×`height`, releasing any already
    /// created if a later one fails.
    pub fn create(gl: &G, width: u32, height: u32) -> Result<Self, GlError> {
        let mut created = Vec::with_capacity(4);
        for _ in 0..4 {
            match RenderTarget::create(gl, width, height) {
                Ok(target) => created.push(target),
                Err(err) => {
                    for target in created {
                        target.release(gl);
                    }
                    return Err(err);
                }
            }
        }
        let [scene, brightness, bloom, output] =
            <[RenderTarget<G>; 4]>::try_from(created).map_err(|partial| {
                let count = partial.len();
                for target in partial {
                    target.release(gl);
                }
                GlError::Create {
                    object: "render target pool",
                    message: format!("expected 4 targets, created {count}"),
                }
            })?;
        debug!(width, height, "render targets created");
        Ok(Self {
            scene,
            brightness,
            bloom,
            output,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.iter().all(RenderTarget::is_complete)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderTarget<G>> {
        [&self.scene, &self.brightness, &self.bloom, &self.output].into_iter()
    }

    pub fn release(self, gl: &G) {
        self.scene.release(gl);
        self.brightness.release(gl);
        self.bloom.release(gl);
        self.output.release(gl);
    }
}
