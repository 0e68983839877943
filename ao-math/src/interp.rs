//! Bilinear resampling of 2D grids.
//!
//! Two flavours are provided: [`zoom`] resamples a whole array onto a new
//! grid with corner-aligned coordinates, and [`sample_periodic`] reads a
//! single fractional coordinate from a grid that wraps at its edges (as
//! FFT-generated phase screens do).

use ndarray::Array2;

/// Resample `data` onto a `(rows, cols)` grid using bilinear interpolation.
///
/// The corners of the output coincide with the corners of the input, so
/// zooming a linear ramp produces a linear ramp with the same end values.
///
/// # Arguments
/// * `data` - Input grid (at least 1x1)
/// * `shape` - Output shape `(rows, cols)`
///
/// # Returns
/// New array of the requested shape
pub fn zoom(data: &Array2<f64>, shape: (usize, usize)) -> Array2<f64> {
    let (in_rows, in_cols) = data.dim();
    let (out_rows, out_cols) = shape;
    if in_rows == 0 || in_cols == 0 {
        return Array2::zeros(shape);
    }

    let row_step = if out_rows > 1 {
        (in_rows - 1) as f64 / (out_rows - 1) as f64
    } else {
        0.0
    };
    let col_step = if out_cols > 1 {
        (in_cols - 1) as f64 / (out_cols - 1) as f64
    } else {
        0.0
    };

    Array2::from_shape_fn(shape, |(r, c)| {
        let y = r as f64 * row_step;
        let x = c as f64 * col_step;

        let y0 = (y.floor() as usize).min(in_rows - 1);
        let x0 = (x.floor() as usize).min(in_cols - 1);
        let y1 = (y0 + 1).min(in_rows - 1);
        let x1 = (x0 + 1).min(in_cols - 1);
        let fy = y - y0 as f64;
        let fx = x - x0 as f64;

        let top = data[[y0, x0]] * (1.0 - fx) + data[[y0, x1]] * fx;
        let bottom = data[[y1, x0]] * (1.0 - fx) + data[[y1, x1]] * fx;
        top * (1.0 - fy) + bottom * fy
    })
}

/// Sample a periodic grid at fractional `(row, col)` using bilinear interpolation.
///
/// Coordinates outside the grid wrap around, so any finite coordinate is valid.
pub fn sample_periodic(data: &Array2<f64>, row: f64, col: f64) -> f64 {
    let (rows, cols) = data.dim();
    if rows == 0 || cols == 0 {
        return 0.0;
    }

    let r = row.rem_euclid(rows as f64);
    let c = col.rem_euclid(cols as f64);
    let r0 = (r.floor() as usize) % rows;
    let c0 = (c.floor() as usize) % cols;
    let r1 = (r0 + 1) % rows;
    let c1 = (c0 + 1) % cols;
    let fr = r - r.floor();
    let fc = c - c.floor();

    let top = data[[r0, c0]] * (1.0 - fc) + data[[r0, c1]] * fc;
    let bottom = data[[r1, c0]] * (1.0 - fc) + data[[r1, c1]] * fc;
    top * (1.0 - fr) + bottom * fr
}
