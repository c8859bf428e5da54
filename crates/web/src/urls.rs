use std::time::Duration;

/// Joins a relative asset path onto the asset base.
pub fn asset_url(base: &str, path: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if base.is_empty() {
        path.to_string()
    } else {
        format!("{base}/{path}")
    }
}

/// Converts a `requestAnimationFrame` timestamp in milliseconds.
/// Negative and non-finite stamps map to zero.
pub fn frame_timestamp(millis: f64) -> Duration {
    if millis.is_finite() && millis > 0.0 {
        Duration::from_secs_f64(millis / 1000.0)
    } else {
        Duration::ZERO
    }
}
