//! Synthesized stand-ins for the galaxy skybox and the disk colour ramp.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::textures::{CubemapImage, RgbaImage};

pub const SKYBOX_SIZE: u32 = 256;
pub const GRADIENT_WIDTH: u32 = 256;

/// Builds six `size`×`size` faces of sparse stars over a spiral galaxy glow.
pub fn galaxy_cubemap(size: u32, seed: u64) -> CubemapImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let faces = (0..6).map(|_| galaxy_face(size, &mut rng)).collect();
    CubemapImage { size, faces }
}

fn galaxy_face(size: u32, rng: &mut StdRng) -> RgbaImage {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    let extent = size as f64;
    for y in 0..size {
        for x in 0..size {
            let nx = (x as f64 / extent - 0.5) * 2.0;
            let ny = (y as f64 / extent - 0.5) * 2.0;
            let dist = (nx * nx + ny * ny).sqrt();
            let angle = ny.atan2(nx);

            let spiral = (angle * 2.0 + dist * 8.0).sin() * 0.5 + 0.5;
            let plane = (-ny.abs() * 3.0).exp() * 0.7;
            let star = if rng.gen::<f64>() > 0.998 - plane * 0.001 {
                255.0
            } else {
                0.0
            };

            let core = (-dist * 2.0).exp() * 40.0;
            let arm = spiral * plane * 20.0;

            pixels.push(channel(star, core * 1.2 + arm * 0.8));
            pixels.push(channel(star, core + arm * 0.9));
            pixels.push(channel(star, core * 0.6 + arm * 1.2));
            pixels.push(255);
        }
    }
    RgbaImage {
        width: size,
        height: size,
        pixels,
    }
}

/// Hot-to-cool emission ramp: orange at index 0 fading to dark red.
pub fn emission_gradient() -> RgbaImage {
    let mut pixels = Vec::with_capacity((GRADIENT_WIDTH * 4) as usize);
    for i in 0..GRADIENT_WIDTH {
        let t = i as f64 / (GRADIENT_WIDTH - 1) as f64;
        pixels.push(truncate(255.0 * (1.0 - t * 0.5)));
        pixels.push(truncate(128.0 * (1.0 - t)));
        pixels.push(truncate(64.0 * (1.0 - t)));
        pixels.push(255);
    }
    RgbaImage {
        width: GRADIENT_WIDTH,
        height: 1,
        pixels,
    }
}

fn channel(star: f64, glow: f64) -> u8 {
    truncate(star.max(glow))
}

fn truncate(value: f64) -> u8 {
    value.clamp(0.0, 255.0) as u8
}
