//! Telescope pupil geometry

use ndarray::Array2;

use crate::config::{MaskShape, TelescopeConfig};

/// Sampled telescope aperture
#[derive(Debug, Clone)]
pub struct Pupil {
    /// Side length in pixels
    pub size: usize,
    /// Metres per pixel
    pub pixel_scale: f64,
    /// 1.0 inside the aperture, 0.0 outside
    pub mask: Array2<f64>,
}

impl Pupil {
    pub fn from_config(telescope: &TelescopeConfig, size: usize) -> Self {
        match telescope.mask {
            MaskShape::Circle => Self::annulus(size, telescope.tel_diam, telescope.obs_diam),
        }
    }

    /// Annular aperture of outer diameter `diameter` with a central obstruction.
    pub fn annulus(size: usize, diameter: f64, obstruction: f64) -> Self {
        let pixel_scale = diameter / size as f64;
        let mask = annulus_mask(size, pixel_scale, diameter, obstruction);
        Self {
            size,
            pixel_scale,
            mask,
        }
    }

    /// Position of pixel `(row, col)` in metres from the pupil centre, as `(x, y)`
    pub fn coords(&self, row: usize, col: usize) -> (f64, f64) {
        centred_coords(self.size, self.pixel_scale, row, col)
    }

    /// Number of illuminated pixels
    pub fn area_pixels(&self) -> f64 {
        self.mask.sum()
    }
}

/// Centre of pixel `(row, col)` on an `n`-pixel grid, in metres, as `(x, y)`
pub fn centred_coords(n: usize, spacing: f64, row: usize, col: usize) -> (f64, f64) {
    let half = (n as f64 - 1.0) / 2.0;
    ((col as f64 - half) * spacing, (row as f64 - half) * spacing)
}

/// Annular mask sampled on an `n × n` grid of spacing `spacing` metres.
pub fn annulus_mask(n: usize, spacing: f64, diameter: f64, obstruction: f64) -> Array2<f64> {
    let (outer, inner) = (diameter / 2.0, obstruction / 2.0);
    Array2::from_shape_fn((n, n), |(r, c)| {
        let (x, y) = centred_coords(n, spacing, r, c);
        let radius = (x * x + y * y).sqrt();
        if radius <= outer && radius >= inner {
            1.0
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_area_close_to_analytic() {
        let pupil = Pupil::annulus(128, 4.2, 1.2);
        let area_m2 = pupil.area_pixels() * pupil.pixel_scale.powi(2);
        let expected = PI / 4.0 * (4.2f64.powi(2) - 1.2f64.powi(2));
        assert_relative_eq!(area_m2, expected, max_relative = 0.02);
    }

    #[test]
    fn test_centre_is_obstructed() {
        let pupil = Pupil::annulus(32, 4.0, 1.0);
        assert_eq!(pupil.mask[[16, 16]], 0.0);
        assert_eq!(pupil.mask[[16, 2]], 1.0);
        assert_eq!(pupil.mask[[0, 0]], 0.0);
    }

    #[test]
    fn test_coords_are_symmetric() {
        let pupil = Pupil::annulus(4, 4.0, 0.0);
        assert_eq!(pupil.coords(0, 0), (-1.5, -1.5));
        assert_eq!(pupil.coords(3, 3), (1.5, 1.5));
    }
}
