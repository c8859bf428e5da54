use assets::{CubeFace, RgbaImage, TextureSet};
use tracing::debug;

use crate::gl::{Gl, GlError};

/// Galaxy cubemap and colour map resident on the GPU.
///
/// Whether the images came from assets or were synthesized is irrelevant
/// here; both satisfy the same format contract.
#[derive(Debug)]
pub struct GpuTextures<G: Gl> {
    pub galaxy: G::Texture,
    pub color_map: G::Texture,
}

impl<G: Gl> GpuTextures<G> {
    pub fn release(self, gl: &G) {
        gl.delete_texture(self.galaxy);
        gl.delete_texture(self.color_map);
    }
}

/// Uploads `set` as an RGBA cubemap plus an RGBA 2D colour map, both linear
/// and clamped to edge.
pub fn upload_textures<G: Gl>(gl: &G, set: &TextureSet) -> Result<GpuTextures<G>, GlError> {
    let galaxy = gl.create_texture()?;
    gl.bind_texture(glow::TEXTURE_CUBE_MAP, Some(galaxy));
    let cubemap = set.cubemap();
    for face in CubeFace::ALL {
        let Some(image) = cubemap.face(face) else {
            continue;
        };
        if let Err(err) = upload_image(gl, face_target(face), image) {
            gl.bind_texture(glow::TEXTURE_CUBE_MAP, None);
            gl.delete_texture(galaxy);
            return Err(err);
        }
    }
    configure_sampling(gl, glow::TEXTURE_CUBE_MAP);
    gl.tex_parameter_i32(
        glow::TEXTURE_CUBE_MAP,
        glow::TEXTURE_WRAP_R,
        glow::CLAMP_TO_EDGE as i32,
    );
    gl.bind_texture(glow::TEXTURE_CUBE_MAP, None);

    let color_map = match gl.create_texture() {
        Ok(texture) => texture,
        Err(err) => {
            gl.delete_texture(galaxy);
            return Err(err);
        }
    };
    gl.bind_texture(glow::TEXTURE_2D, Some(color_map));
    if let Err(err) = upload_image(gl, glow::TEXTURE_2D, set.gradient()) {
        gl.bind_texture(glow::TEXTURE_2D, None);
        gl.delete_texture(galaxy);
        gl.delete_texture(color_map);
        return Err(err);
    }
    configure_sampling(gl, glow::TEXTURE_2D);
    gl.bind_texture(glow::TEXTURE_2D, None);

    debug!(
        synthesized = set.is_synthesized(),
        face_size = cubemap.size,
        "textures uploaded"
    );
    Ok(GpuTextures { galaxy, color_map })
}

fn face_target(face: CubeFace) -> u32 {
    glow::TEXTURE_CUBE_MAP_POSITIVE_X + face.index() as u32
}

fn upload_image<G: Gl>(gl: &G, target: u32, image: &RgbaImage) -> Result<(), GlError> {
    gl.tex_image_2d(
        target,
        0,
        glow::RGBA as i32,
        image.width as i32,
        image.height as i32,
        glow::RGBA,
        glow::UNSIGNED_BYTE,
        Some(&image.pixels),
    )
}

fn configure_sampling<G: Gl>(gl: &G, target: u32) {
    gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
    gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
    gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
    gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gl::headless::HeadlessGl;
    use assets::procedural::SKYBOX_SIZE;

    #[test]
    fn uploads_six_faces_and_gradient() {
        let gl = HeadlessGl::new();
        let set = TextureSet::synthesized(3);
        let textures = upload_textures(&gl, &set).unwrap();

        let uploads = gl.uploads();
        assert_eq!(uploads.len(), 7);
        let targets: Vec<u32> = uploads[..6].iter().map(|u| u.target).collect();
        assert_eq!(
            targets,
            (glow::TEXTURE_CUBE_MAP_POSITIVE_X..=glow::TEXTURE_CUBE_MAP_NEGATIVE_Z)
                .collect::<Vec<_>>()
        );
        assert!(uploads[..6].iter().all(|u| u.texture == textures.galaxy));
        assert_eq!(
            gl.texture_size(textures.galaxy, glow::TEXTURE_CUBE_MAP_NEGATIVE_Z),
            Some((SKYBOX_SIZE as i32, SKYBOX_SIZE as i32))
        );
        assert_eq!(
            gl.texture_size(textures.color_map, glow::TEXTURE_2D),
            Some((256, 1))
        );
        assert_eq!(
            gl.texture_parameter(textures.galaxy, glow::TEXTURE_WRAP_R),
            Some(glow::CLAMP_TO_EDGE as i32)
        );
        assert_eq!(
            gl.texture_parameter(textures.color_map, glow::TEXTURE_MAG_FILTER),
            Some(glow::LINEAR as i32)
        );

        textures.release(&gl);
        assert_eq!(gl.live_textures(), 0);
    }

    #[test]
    fn failed_upload_releases_partial_textures() {
        let gl = HeadlessGl::new();
        gl.reject_internal_format(glow::RGBA as i32);
        assert!(upload_textures(&gl, &TextureSet::synthesized(3)).is_err());
        assert_eq!(gl.live_textures(), 0);
    }
}
