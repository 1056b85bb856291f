//! Total Sum Scaling (relative abundance).

use nalgebra::DMatrix;

/// Divide every sample by its total and multiply by `scale`.
///
/// `scale = 1.0` gives proportions; lefser uses `1e6`. Samples with a zero
/// total stay at zero.
pub fn norm_tss(data: &DMatrix<f64>, scale: f64) -> DMatrix<f64> {
    let mut out = data.clone();
    for mut col in out.column_iter_mut() {
        let total: f64 = col.sum();
        if total > 0.0 {
            col.scale_mut(scale / total);
        }
    }
    out
}

/// Row means and standard deviations of a features × samples matrix,
/// restricted to the given columns.
pub fn group_mean_sd(data: &DMatrix<f64>, columns: &[usize]) -> Vec<(f64, f64)> {
    (0..data.nrows())
        .map(|i| {
            let values: Vec<f64> = columns.iter().map(|&j| data[(i, j)]).collect();
            let mean = crate::stats::mean(&values);
            let sd = crate::stats::sd(&values);
            (mean, if sd.is_finite() { sd } else { 0.0 })
        })
        .collect()
}
