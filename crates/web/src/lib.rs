//! Browser host for the black-hole visualization.
//!
//! ```text
//!   start(canvasId, assetBase)
//!        │ fetch shaders + textures (concurrent, all settle)
//!        ▼
//!   canvas ──create_canvas_context()──▶ CompatContext<GlowContext>
//!        │                                   │
//!        │                                   ▼
//!   pointermove ──▶ Simulation ◀── FrameDriver ◀── requestAnimationFrame
//!                        │
//!                        └──▶ parent.postMessage("blackhole-loaded")
//! ```
//!
//! Everything touching `web_sys` only builds for `wasm32`; the URL and clock
//! helpers are plain Rust so they are covered by native tests.

mod urls;

#[cfg(target_arch = "wasm32")]
mod canvas;
#[cfg(target_arch = "wasm32")]
mod console;
#[cfg(target_arch = "wasm32")]
mod entry;
#[cfg(target_arch = "wasm32")]
mod fetch;
#[cfg(target_arch = "wasm32")]
mod frame;

pub use urls::{asset_url, frame_timestamp};

#[cfg(target_arch = "wasm32")]
pub use canvas::create_canvas_context;
#[cfg(target_arch = "wasm32")]
pub use entry::{start, BlackHole};
