//! ao-math - Numerical kernels for adaptive-optics simulation
//!
//! This crate provides the numerical building blocks used by the `aosim`
//! simulation driver:
//!
//! - **FFT** - 2-D transforms, shifts, binning and FFT convolution on `ndarray` grids
//! - **Interpolation** - bilinear resampling and periodic sampling of phase screens
//! - **Pseudo-inverse** - truncated-SVD pseudo-inverse with relative conditioning
//! - **Propagation** - angular-spectrum (Fresnel) propagation of complex fields
//! - **Statistics** - masked means and RMS helpers
//!
//! # Example
//!
//! ```text
//! use ao_math::pinv::truncated_pseudo_inverse;
//! use nalgebra::DMatrix;
//!
//! let imat = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 1e-6]);
//! let result = truncated_pseudo_inverse(&imat, 0.03).unwrap();
//! assert_eq!(result.discarded, 1);
//! ```

pub mod fft;
pub mod interp;
pub mod pinv;
pub mod propagation;
pub mod stats;

pub use fft::{bin_image, convolve_fft, fft2, fftshift, ifft2, ifftshift, FftDirection};
pub use interp::{sample_periodic, zoom};
pub use pinv::{truncated_pseudo_inverse, PseudoInverse, PseudoInverseError};
pub use propagation::{angular_spectrum, PropagationError};
pub use stats::{masked_mean, rms};

pub use rustfft::num_complex::Complex64;
