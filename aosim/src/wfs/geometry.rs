//! Subaperture layout over the pupil

use ndarray::{s, Array2};

use crate::pupil::Pupil;

/// Square lenslet grid and the subapertures illuminated enough to be used
#[derive(Debug, Clone)]
pub struct SubapGrid {
    /// Subapertures across the pupil
    pub nx: usize,
    /// Pupil pixels across one subaperture
    pub pixels: usize,
    /// Grid positions `(row, col)` of the used subapertures, row-major
    pub active: Vec<(usize, usize)>,
    /// Illuminated fraction of each used subaperture
    pub fill: Vec<f64>,
}

impl SubapGrid {
    /// Select subapertures whose illuminated fraction is at least `threshold`.
    ///
    /// `pupil.size` must be a multiple of `nx`.
    pub fn new(pupil: &Pupil, nx: usize, threshold: f64) -> Self {
        let pixels = pupil.size / nx;
        let mut active = Vec::new();
        let mut fill = Vec::new();
        for row in 0..nx {
            for col in 0..nx {
                let block = pupil.mask.slice(s![
                    row * pixels..(row + 1) * pixels,
                    col * pixels..(col + 1) * pixels
                ]);
                let fraction = block.sum() / (pixels * pixels) as f64;
                if fraction > 0.0 && fraction >= threshold {
                    active.push((row, col));
                    fill.push(fraction);
                }
            }
        }
        Self {
            nx,
            pixels,
            active,
            fill,
        }
    }

    pub fn n_active(&self) -> usize {
        self.active.len()
    }

    /// Pupil pixels of subaperture `(row, col)`
    pub fn block<'a, T>(&self, data: &'a Array2<T>, row: usize, col: usize) -> ndarray::ArrayView2<'a, T> {
        let p = self.pixels;
        data.slice(s![row * p..(row + 1) * p, col * p..(col + 1) * p])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_square_pupil_uses_every_subap() {
        let mut pupil = Pupil::annulus(16, 4.0, 0.0);
        pupil.mask.fill(1.0);
        let grid = SubapGrid::new(&pupil, 4, 0.5);
        assert_eq!(grid.n_active(), 16);
        assert!(grid.fill.iter().all(|&f| f == 1.0));
    }

    #[test]
    fn test_corner_subaps_dropped_by_threshold() {
        let pupil = Pupil::annulus(80, 4.2, 1.2);
        let grid = SubapGrid::new(&pupil, 8, 0.5);
        assert!(!grid.active.contains(&(0, 0)));
        assert!(grid.active.contains(&(0, 3)));
        assert!(grid.n_active() < 64);
        // Looser threshold keeps more
        assert!(SubapGrid::new(&pupil, 8, 0.1).n_active() > grid.n_active());
    }
}
