//! Mapping of configured layer strengths to turbulence weights.
//!
//! Each layer receives the fraction `w_i` of the total `r0^(-5/3)` budget,
//! i.e. its own Fried parameter is `r0 × w_i^(-3/5)`.

use std::fmt;

/// Policy turning raw `scrnStrengths` into per-layer weights
pub trait StrengthNormalization: fmt::Debug + Send + Sync {
    /// Weights for each layer, same length as `raw`
    fn weights(&self, raw: &[f64]) -> Vec<f64>;
}

/// Scale the strengths so they sum to one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumToOne;

impl StrengthNormalization for SumToOne {
    fn weights(&self, raw: &[f64]) -> Vec<f64> {
        let total: f64 = raw.iter().sum();
        if total <= 0.0 {
            return vec![0.0; raw.len()];
        }
        raw.iter().map(|w| w / total).collect()
    }
}

/// Use the strengths unchanged, for profiles already expressed as fractions.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsGiven;

impl StrengthNormalization for AsGiven {
    fn weights(&self, raw: &[f64]) -> Vec<f64> {
        raw.to_vec()
    }
}

/// Fried parameter of a layer carrying weight `weight`, `None` for an empty layer
pub fn layer_r0(r0: f64, weight: f64) -> Option<f64> {
    (weight > 0.0).then(|| r0 * weight.powf(-3.0 / 5.0))
}
