//! Von Karman phase screen generation by the FFT method.
//!
//! A screen is built in the frequency domain: each spatial-frequency bin gets
//! a complex Gaussian amplitude scaled by the square root of the phase PSD
//!
//! ```text
//! Φ(f) = 0.023 r0^(-5/3) (f² + 1/L0²)^(-11/6)
//! ```
//!
//! and the real part of the inverse transform is the phase in radians at
//! 500 nm. Screens are periodic, so frozen-flow translation can wrap around
//! them indefinitely.

use ndarray::Array2;
use rand::Rng;
use rand_distr::StandardNormal;
use rustfft::num_complex::Complex64;

use ao_math::fft::{fft2_inplace, FftDirection};

/// Wavelength at which r0 is specified, in nm
pub const R0_WAVELENGTH_NM: f64 = 500.0;

/// Signed spatial frequency of FFT bin `k` on an `n`-point grid with spacing `dx`
fn bin_frequency(k: usize, n: usize, dx: f64) -> f64 {
    let signed = if k < n.div_ceil(2) {
        k as f64
    } else {
        k as f64 - n as f64
    };
    signed / (n as f64 * dx)
}

/// Von Karman phase power spectral density in rad² m²
pub fn von_karman_psd(f: f64, r0: f64, outer_scale: f64) -> f64 {
    let f0 = 1.0 / outer_scale;
    0.023 * r0.powf(-5.0 / 3.0) * (f * f + f0 * f0).powf(-11.0 / 6.0)
}

/// Draw one `size × size` screen in radians at 500 nm.
///
/// # Arguments
/// * `size` - Screen side length in pixels
/// * `pixel_scale` - Metres per pixel
/// * `r0` - Fried parameter of this layer in metres
/// * `outer_scale` - Von Karman outer scale in metres
/// * `rng` - Random source
pub fn phase_screen<R: Rng + ?Sized>(
    size: usize,
    pixel_scale: f64,
    r0: f64,
    outer_scale: f64,
    rng: &mut R,
) -> Array2<f64> {
    let df = 1.0 / (size as f64 * pixel_scale);

    let mut spectrum = Array2::from_shape_fn((size, size), |(r, c)| {
        let fy = bin_frequency(r, size, pixel_scale);
        let fx = bin_frequency(c, size, pixel_scale);
        let psd = von_karman_psd((fx * fx + fy * fy).sqrt(), r0, outer_scale);
        let re: f64 = rng.sample(StandardNormal);
        let im: f64 = rng.sample(StandardNormal);
        Complex64::new(re, im) * psd.sqrt() * df
    });
    // No piston
    spectrum[[0, 0]] = Complex64::new(0.0, 0.0);

    fft2_inplace(&mut spectrum, FftDirection::Inverse);
    spectrum.mapv(|v| v.re)
}

/// Convert a phase map in radians at 500 nm to optical path in nm.
pub fn radians_to_nm(screen: &mut Array2<f64>) {
    let scale = R0_WAVELENGTH_NM / (2.0 * std::f64::consts::PI);
    screen.mapv_inplace(|v| v * scale);
}
