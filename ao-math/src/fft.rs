//! 2-D FFT helpers on `ndarray` grids
//!
//! Thin wrappers around `rustfft` that transform square or rectangular
//! complex arrays along both axes, plus the shift, binning and convolution
//! utilities needed to turn pupil-plane fields into focal-plane images.
//!
//! Transforms are unnormalized in both directions, matching `rustfft`.
//! Callers that need a unitary inverse divide by the element count.

use ndarray::{Array2, Axis};
use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

/// Direction of a 2-D transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    Inverse,
}

/// Transform `data` in place along both axes.
pub fn fft2_inplace(data: &mut Array2<Complex64>, direction: FftDirection) {
    let (rows, cols) = data.dim();
    if rows == 0 || cols == 0 {
        return;
    }

    let mut planner = FftPlanner::<f64>::new();
    let row_fft = match direction {
        FftDirection::Forward => planner.plan_fft_forward(cols),
        FftDirection::Inverse => planner.plan_fft_inverse(cols),
    };
    let col_fft = match direction {
        FftDirection::Forward => planner.plan_fft_forward(rows),
        FftDirection::Inverse => planner.plan_fft_inverse(rows),
    };

    let mut buffer = vec![Complex64::new(0.0, 0.0); cols];
    for mut row in data.axis_iter_mut(Axis(0)) {
        for (dst, src) in buffer.iter_mut().zip(row.iter()) {
            *dst = *src;
        }
        row_fft.process(&mut buffer);
        for (dst, src) in row.iter_mut().zip(buffer.iter()) {
            *dst = *src;
        }
    }

    let mut buffer = vec![Complex64::new(0.0, 0.0); rows];
    for mut col in data.axis_iter_mut(Axis(1)) {
        for (dst, src) in buffer.iter_mut().zip(col.iter()) {
            *dst = *src;
        }
        col_fft.process(&mut buffer);
        for (dst, src) in col.iter_mut().zip(buffer.iter()) {
            *dst = *src;
        }
    }
}

/// Forward 2-D FFT returning a new array
pub fn fft2(data: &Array2<Complex64>) -> Array2<Complex64> {
    let mut out = data.clone();
    fft2_inplace(&mut out, FftDirection::Forward);
    out
}

/// Unnormalized inverse 2-D FFT returning a new array
pub fn ifft2(data: &Array2<Complex64>) -> Array2<Complex64> {
    let mut out = data.clone();
    fft2_inplace(&mut out, FftDirection::Inverse);
    out
}

fn roll<T: Clone>(data: &Array2<T>, shift_rows: usize, shift_cols: usize) -> Array2<T> {
    let (rows, cols) = data.dim();
    Array2::from_shape_fn((rows, cols), |(r, c)| {
        data[[(r + rows - shift_rows % rows.max(1)) % rows, (c + cols - shift_cols % cols.max(1)) % cols]]
            .clone()
    })
}

/// Move the zero-frequency element to the array centre (`n / 2`).
pub fn fftshift<T: Clone>(data: &Array2<T>) -> Array2<T> {
    let (rows, cols) = data.dim();
    roll(data, rows / 2, cols / 2)
}

/// Inverse of [`fftshift`]: move the centre element back to index zero.
pub fn ifftshift<T: Clone>(data: &Array2<T>) -> Array2<T> {
    let (rows, cols) = data.dim();
    roll(data, rows - rows / 2, cols - cols / 2)
}

/// Sum non-overlapping `factor × factor` blocks.
///
/// Trailing rows or columns that do not fill a complete block are dropped.
///
/// # Arguments
/// * `image` - Input image
/// * `factor` - Binning factor (1 returns a copy)
pub fn bin_image(image: &Array2<f64>, factor: usize) -> Array2<f64> {
    if factor <= 1 {
        return image.clone();
    }
    let (rows, cols) = image.dim();
    let (out_rows, out_cols) = (rows / factor, cols / factor);
    let mut out = Array2::<f64>::zeros((out_rows, out_cols));
    for ((r, c), value) in image.indexed_iter() {
        let (br, bc) = (r / factor, c / factor);
        if br < out_rows && bc < out_cols {
            out[[br, bc]] += *value;
        }
    }
    out
}

/// Circular convolution of `image` with a centred `kernel` using FFTs.
///
/// The kernel's origin is its centre element (`n / 2`), so a kernel with a
/// single unit value at the centre returns `image` unchanged.
///
/// # Panics
/// If `image` and `kernel` have different shapes.
pub fn convolve_fft(image: &Array2<f64>, kernel: &Array2<f64>) -> Array2<f64> {
    assert_eq!(
        image.dim(),
        kernel.dim(),
        "Image and kernel must have same dimensions"
    );
    let n = (image.len()) as f64;

    let mut image_ft = image.mapv(|v| Complex64::new(v, 0.0));
    fft2_inplace(&mut image_ft, FftDirection::Forward);

    let mut kernel_ft = ifftshift(kernel).mapv(|v| Complex64::new(v, 0.0));
    fft2_inplace(&mut kernel_ft, FftDirection::Forward);

    image_ft.zip_mut_with(&kernel_ft, |a, b| *a *= *b);
    fft2_inplace(&mut image_ft, FftDirection::Inverse);

    image_ft.mapv(|v| v.re / n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_forward_inverse_recovers_input() {
        let data = Array2::from_shape_fn((6, 4), |(r, c)| Complex64::new(r as f64, c as f64 * 0.5));
        let back = ifft2(&fft2(&data));
        let n = data.len() as f64;
        for (a, b) in data.iter().zip(back.iter()) {
            assert_relative_eq!(a.re, b.re / n, epsilon = 1e-10);
            assert_relative_eq!(a.im, b.im / n, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_constant_field_concentrates_at_dc() {
        let data = Array2::from_elem((8, 8), Complex64::new(1.0, 0.0));
        let spectrum = fftshift(&fft2(&data));
        assert_relative_eq!(spectrum[[4, 4]].re, 64.0, epsilon = 1e-10);
        assert_relative_eq!(spectrum[[0, 0]].norm(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_shift_roundtrip_odd_size() {
        let data = Array2::from_shape_fn((5, 5), |(r, c)| (r * 5 + c) as f64);
        let shifted = fftshift(&data);
        assert_eq!(shifted[[2, 2]], 0.0);
        assert_eq!(ifftshift(&shifted), data);
    }

    #[test]
    fn test_bin_image_sums_blocks() {
        let image = Array2::from_elem((6, 6), 1.0);
        let binned = bin_image(&image, 3);
        assert_eq!(binned.dim(), (2, 2));
        assert!(binned.iter().all(|&v| (v - 9.0).abs() < 1e-12));
    }

    #[test]
    fn test_convolve_with_delta_is_identity() {
        let image = Array2::from_shape_fn((8, 8), |(r, c)| ((r * 3 + c) % 5) as f64);
        let mut kernel = Array2::zeros((8, 8));
        kernel[[4, 4]] = 1.0;

        let out = convolve_fft(&image, &kernel);
        for (a, b) in image.iter().zip(out.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_convolve_shifts_with_offset_delta() {
        let mut image = Array2::zeros((8, 8));
        image[[2, 2]] = 1.0;
        let mut kernel = Array2::zeros((8, 8));
        kernel[[4, 5]] = 1.0;

        let out = convolve_fft(&image, &kernel);
        assert_relative_eq!(out[[2, 3]], 1.0, epsilon = 1e-10);
    }
}
