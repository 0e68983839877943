//! Statistical helpers for phase maps and slope vectors

use ndarray::Array2;

/// Mean of `data` over the elements where `mask > 0.5`.
///
/// Returns 0.0 when the mask selects nothing.
pub fn masked_mean(data: &Array2<f64>, mask: &Array2<f64>) -> f64 {
    assert_eq!(
        data.dim(),
        mask.dim(),
        "Data and mask must have same dimensions"
    );
    let mut sum = 0.0;
    let mut count = 0usize;
    for (value, m) in data.iter().zip(mask.iter()) {
        if *m > 0.5 {
            sum += *value;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Root-mean-square of a slice, 0.0 for an empty slice
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_masked_mean_ignores_outside() {
        let data = Array2::from_shape_fn((2, 2), |(r, c)| (r * 2 + c) as f64);
        let mut mask = Array2::zeros((2, 2));
        mask[[0, 1]] = 1.0;
        mask[[1, 1]] = 1.0;
        assert_relative_eq!(masked_mean(&data, &mask), 2.0);
    }

    #[test]
    fn test_empty_mask_gives_zero() {
        let data = Array2::from_elem((2, 2), 5.0);
        assert_eq!(masked_mean(&data, &Array2::zeros((2, 2))), 0.0);
    }

    #[test]
    fn test_rms() {
        assert_relative_eq!(rms(&[3.0, -4.0]), (12.5_f64).sqrt());
        assert_eq!(rms(&[]), 0.0);
    }
}
