//! Thresholded centre-of-gravity centroiding for subaperture spots

use ndarray::ArrayView2;

/// Spot position relative to the window centre, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotCentroid {
    pub x: f64,
    pub y: f64,
    /// Flux remaining after threshold subtraction
    pub flux: f64,
}

/// Centre of gravity of `window` after subtracting `threshold × max` from every pixel.
///
/// Pixels below the threshold contribute nothing. Returns `None` when no flux
/// survives, which callers treat as "no signal" for the subaperture.
///
/// # Arguments
/// * `window` - One subaperture's detector pixels
/// * `threshold` - Fraction of the window peak removed before weighting, in `[0, 1)`
pub fn thresholded_centroid(window: ArrayView2<f64>, threshold: f64) -> Option<SpotCentroid> {
    let (rows, cols) = window.dim();
    let peak = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !peak.is_finite() || peak <= 0.0 {
        return None;
    }
    let cut = threshold * peak;

    let mut flux = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    for ((r, c), &value) in window.indexed_iter() {
        let w = value - cut;
        if w > 0.0 {
            flux += w;
            sum_x += w * c as f64;
            sum_y += w * r as f64;
        }
    }
    if flux <= 0.0 {
        return None;
    }

    Some(SpotCentroid {
        x: sum_x / flux - (cols as f64 - 1.0) / 2.0,
        y: sum_y / flux - (rows as f64 - 1.0) / 2.0,
        flux,
    })
}
