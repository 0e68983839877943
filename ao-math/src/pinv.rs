//! Truncated-SVD pseudo-inverse
//!
//! Control matrices are formed from interaction matrices by inverting only
//! the well-sensed modes: singular values smaller than a fraction of the
//! largest one are discarded rather than inverted, which keeps poorly sensed
//! modes from amplifying measurement noise.

use nalgebra::DMatrix;
use thiserror::Error;

/// Errors that can occur while computing a pseudo-inverse
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PseudoInverseError {
    #[error("conditioning must lie in [0, 1), got {0}")]
    InvalidConditioning(f64),

    #[error("matrix contains non-finite values")]
    NonFinite,

    #[error("SVD decomposition failed to produce U or V^T matrices")]
    SvdFailed,
}

/// Pseudo-inverse together with the bookkeeping of the truncation
#[derive(Debug, Clone)]
pub struct PseudoInverse {
    /// The pseudo-inverse, shape `(cols, rows)` of the input
    pub matrix: DMatrix<f64>,
    /// All singular values, in decreasing order
    pub singular_values: Vec<f64>,
    /// Number of singular values excluded from the inversion
    pub discarded: usize,
}

impl PseudoInverse {
    /// Largest singular value, zero for an empty or all-zero matrix
    pub fn max_singular_value(&self) -> f64 {
        self.singular_values.first().copied().unwrap_or(0.0)
    }
}

/// Compute the pseudo-inverse of `matrix`, discarding singular values below
/// `conditioning × σ_max`.
///
/// A zero matrix yields a zero pseudo-inverse with every mode discarded.
///
/// # Arguments
/// * `matrix` - Matrix to invert (any shape)
/// * `conditioning` - Relative threshold in `[0, 1)`
///
/// # Returns
/// * `Ok(PseudoInverse)` - Inverse plus truncation statistics
/// * `Err(PseudoInverseError)` - On invalid conditioning or non-finite input
pub fn truncated_pseudo_inverse(
    matrix: &DMatrix<f64>,
    conditioning: f64,
) -> Result<PseudoInverse, PseudoInverseError> {
    if !(0.0..1.0).contains(&conditioning) {
        return Err(PseudoInverseError::InvalidConditioning(conditioning));
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(PseudoInverseError::NonFinite);
    }

    let (rows, cols) = matrix.shape();
    if rows == 0 || cols == 0 {
        return Ok(PseudoInverse {
            matrix: DMatrix::zeros(cols, rows),
            singular_values: Vec::new(),
            discarded: 0,
        });
    }

    let svd = matrix.clone().svd(true, true);
    let u = svd.u.ok_or(PseudoInverseError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(PseudoInverseError::SvdFailed)?;

    let mut singular_values: Vec<f64> = svd.singular_values.iter().copied().collect();
    let sigma_max = singular_values.iter().copied().fold(0.0_f64, f64::max);
    let threshold = conditioning * sigma_max;

    let mut inverse = DMatrix::<f64>::zeros(cols, rows);
    let mut discarded = 0;
    for (k, &sigma) in svd.singular_values.iter().enumerate() {
        if sigma <= 0.0 || sigma < threshold {
            discarded += 1;
            continue;
        }
        // V[:, k] * U[:, k]^T / sigma
        let v_col = v_t.row(k).transpose();
        let u_col = u.column(k);
        inverse += (v_col * u_col.transpose()) / sigma;
    }

    singular_values.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    Ok(PseudoInverse {
        matrix: inverse,
        singular_values,
        discarded,
    })
}
