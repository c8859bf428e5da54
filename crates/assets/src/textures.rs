use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use simconfig::AssetSettings;
use tracing::{info, warn};

use crate::fetch::{AssetFetcher, FetchError};
use crate::procedural::{emission_gradient, galaxy_cubemap, SKYBOX_SIZE};

/// Cubemap faces in upload order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            CubeFace::PositiveX => "right.png",
            CubeFace::NegativeX => "left.png",
            CubeFace::PositiveY => "top.png",
            CubeFace::NegativeY => "bottom.png",
            CubeFace::PositiveZ => "front.png",
            CubeFace::NegativeZ => "back.png",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Tightly packed 8-bit RGBA pixels, row-major from the top-left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CubemapImage {
    /// Edge length shared by every face.
    pub size: u32,
    /// Faces in [`CubeFace::ALL`] order.
    pub faces: Vec<RgbaImage>,
}

impl CubemapImage {
    pub fn face(&self, face: CubeFace) -> Option<&RgbaImage> {
        self.faces.get(face.index())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("cubemap face {path} is {width}x{height}; faces must be square and equal")]
    FaceShape {
        path: String,
        width: u32,
        height: u32,
    },
}

/// The galaxy cubemap and disk gradient, either decoded from the asset
/// store or synthesized after any load failed. Both variants satisfy the
/// same format contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureSet {
    Loaded {
        cubemap: CubemapImage,
        gradient: RgbaImage,
    },
    Synthesized {
        cubemap: CubemapImage,
        gradient: RgbaImage,
    },
}

impl TextureSet {
    pub fn synthesized(seed: u64) -> Self {
        TextureSet::Synthesized {
            cubemap: galaxy_cubemap(SKYBOX_SIZE, seed),
            gradient: emission_gradient(),
        }
    }

    pub fn cubemap(&self) -> &CubemapImage {
        match self {
            TextureSet::Loaded { cubemap, .. } | TextureSet::Synthesized { cubemap, .. } => cubemap,
        }
    }

    pub fn gradient(&self) -> &RgbaImage {
        match self {
            TextureSet::Loaded { gradient, .. } | TextureSet::Synthesized { gradient, .. } => {
                gradient
            }
        }
    }

    pub fn is_synthesized(&self) -> bool {
        matches!(self, TextureSet::Synthesized { .. })
    }

    /// Combines the seven load results (six faces in [`CubeFace::ALL`] order,
    /// then the gradient). Any failure discards every loaded image.
    pub fn assemble(
        faces: Vec<Result<RgbaImage, TextureError>>,
        gradient: Result<RgbaImage, TextureError>,
        seed: u64,
    ) -> Self {
        match try_assemble(faces, gradient) {
            Ok(set) => {
                info!("loaded skybox and colour map from assets");
                set
            }
            Err(error) => {
                warn!(error = %error, "asset textures unavailable; synthesizing procedural textures");
                TextureSet::synthesized(seed)
            }
        }
    }
}

fn try_assemble(
    faces: Vec<Result<RgbaImage, TextureError>>,
    gradient: Result<RgbaImage, TextureError>,
) -> Result<TextureSet, TextureError> {
    let faces = faces.into_iter().collect::<Result<Vec<_>, _>>()?;
    let gradient = gradient?;
    let size = faces.first().map(|face| face.width).unwrap_or_default();
    for (face, image) in CubeFace::ALL.iter().zip(&faces) {
        if image.width != size || image.height != size || size == 0 {
            return Err(TextureError::FaceShape {
                path: face.file_name().to_string(),
                width: image.width,
                height: image.height,
            });
        }
    }
    Ok(TextureSet::Loaded {
        cubemap: CubemapImage { size, faces },
        gradient,
    })
}

/// Decodes PNG/JPEG bytes into RGBA8.
pub fn decode_rgba(path: &str, bytes: &[u8]) -> Result<RgbaImage, TextureError> {
    let decoded = image::load_from_memory(bytes).map_err(|source| TextureError::Decode {
        path: path.to_string(),
        source,
    })?;
    let rgba = decoded.to_rgba8();
    Ok(RgbaImage {
        width: rgba.width(),
        height: rgba.height(),
        pixels: rgba.into_raw(),
    })
}

/// Relative paths of the six skybox faces followed by the colour map.
pub fn texture_paths(settings: &AssetSettings) -> Vec<String> {
    CubeFace::ALL
        .iter()
        .map(|face| settings.skybox_path(face.file_name()))
        .chain(std::iter::once(settings.color_map.clone()))
        .collect()
}

/// Loads the skybox faces and colour map concurrently, falling back to
/// procedural textures when any of them fails.
pub struct TextureProvisioner {
    fetcher: Arc<dyn AssetFetcher>,
    settings: AssetSettings,
    seed: u64,
}

impl TextureProvisioner {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, settings: AssetSettings) -> Self {
        Self {
            fetcher,
            settings,
            seed: 0x5eed_b1ac_4801e,
        }
    }

    /// Seed for the procedural starfield.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn load(&self) -> TextureSet {
        let paths = texture_paths(&self.settings);
        let (sender, receiver) = unbounded();

        // Every request settles before the all-or-nothing decision is made.
        thread::scope(|scope| {
            for (index, path) in paths.iter().enumerate() {
                let sender = sender.clone();
                let fetcher = Arc::clone(&self.fetcher);
                scope.spawn(move || {
                    let result = fetcher
                        .fetch_bytes(path)
                        .map_err(TextureError::from)
                        .and_then(|bytes| decode_rgba(path, &bytes));
                    let _ = sender.send((index, result));
                });
            }
        });
        drop(sender);

        let mut slots: Vec<Option<Result<RgbaImage, TextureError>>> =
            (0..paths.len()).map(|_| None).collect();
        for (index, result) in receiver.iter() {
            slots[index] = Some(result);
        }

        let mut results = slots.into_iter().zip(&paths).map(|(slot, path)| {
            slot.unwrap_or_else(|| Err(FetchError::Host(format!("{path} was never loaded")).into()))
        });
        let faces: Vec<_> = results.by_ref().take(CubeFace::ALL.len()).collect();
        let gradient = results.next().unwrap_or_else(|| {
            Err(FetchError::Host("colour map was never loaded".to_string()).into())
        });
        TextureSet::assemble(faces, gradient, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(size: u32) -> RgbaImage {
        RgbaImage {
            width: size,
            height: size,
            pixels: vec![9; (size * size * 4) as usize],
        }
    }

    fn missing(path: &str) -> Result<RgbaImage, TextureError> {
        Err(FetchError::Status {
            url: path.to_string(),
            status: 404,
        }
        .into())
    }

    #[test]
    fn face_order_matches_cube_targets() {
        let names: Vec<_> = CubeFace::ALL.iter().map(|f| f.file_name()).collect();
        assert_eq!(
            names,
            ["right.png", "left.png", "top.png", "bottom.png", "front.png", "back.png"]
        );
    }

    #[test]
    fn paths_follow_settings() {
        let paths = texture_paths(&AssetSettings::default());
        assert_eq!(paths.len(), 7);
        assert_eq!(paths[0], "assets/skybox_nebula_dark/right.png");
        assert_eq!(paths[6], "assets/color_map.png");
    }

    #[test]
    fn all_loads_succeeding_keeps_real_assets() {
        let faces = (0..6).map(|_| Ok(solid(4))).collect();
        let set = TextureSet::assemble(faces, Ok(solid(2)), 1);
        assert!(!set.is_synthesized());
        assert_eq!(set.cubemap().size, 4);
        assert_eq!(set.gradient().pixels[0], 9);
    }

    #[test]
    fn single_failure_synthesizes_everything() {
        let mut faces: Vec<_> = (0..6).map(|_| Ok(solid(4))).collect();
        faces[3] = missing("bottom.png");
        let set = TextureSet::assemble(faces, Ok(solid(2)), 1);
        assert!(set.is_synthesized());
        assert_eq!(set.cubemap().size, SKYBOX_SIZE);
        assert_eq!(&set.gradient().pixels[0..4], &[255, 128, 64, 255]);
    }

    #[test]
    fn mismatched_faces_synthesize() {
        let mut faces: Vec<_> = (0..6).map(|_| Ok(solid(4))).collect();
        faces[5] = Ok(solid(8));
        let set = TextureSet::assemble(faces, Ok(solid(2)), 1);
        assert!(set.is_synthesized());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_rgba("right.png", b"not a png"),
            Err(TextureError::Decode { .. })
        ));
    }
}
