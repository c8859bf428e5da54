//! Shader text and texture provisioning for the black-hole renderer.
//!
//! Nothing in this crate surfaces a load failure to its caller: shader
//! fetches fall back to built-in sources and texture fetches fall back to
//! procedurally synthesized images.

mod fetch;
pub mod procedural;
mod shaders;
mod textures;

#[cfg(not(target_arch = "wasm32"))]
pub use fetch::HttpFetcher;
pub use fetch::{cache_busted, cache_token, fetcher_for, AssetFetcher, DirectoryFetcher, FetchError};
pub use shaders::{
    accept_source, FallbackKind, ShaderLoader, ShaderSources, BLOOM_COMPOSITE_SHADER,
    BRIGHTNESS_SHADER, FALLBACK_GENERIC, FALLBACK_SCENE, FALLBACK_VERTEX, PASSTHROUGH_SHADER,
    SCENE_SHADER, TONEMAPPING_SHADER, VERTEX_SHADER,
};
pub use textures::{
    decode_rgba, texture_paths, CubeFace, CubemapImage, RgbaImage, TextureError,
    TextureProvisioner, TextureSet,
};
