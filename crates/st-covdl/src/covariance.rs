use crate::error::{CovDlError, CovResult};
use ndarray::{Array3, ArrayView2, ArrayView3, Axis};

/// Empirical per-time covariance of a batch of observations.
///
/// For observations of shape `(N, T, D)` returns the `(T, D, D)` tensor with
/// `C[t] = (1/N) Σ_n X[n, t, :] ⊗ X[n, t, :]`. Each slice is symmetric
/// positive-semidefinite by construction.
pub fn sample_covariance(x: &ArrayView3<f64>) -> Array3<f64> {
    let (n, t, d) = x.dim();
    let mut cov = Array3::<f64>::zeros((t, d, d));
    for sample in x.outer_iter() {
        for (ti, row) in sample.outer_iter().enumerate() {
            let mut slice = cov.index_axis_mut(Axis(0), ti);
            for i in 0..d {
                let xi = row[i];
                for j in 0..d {
                    slice[[i, j]] += xi * row[j];
                }
            }
        }
    }
    cov /= n as f64;
    cov
}

/// Reconstructs the covariance series implied by a (dictionary, coefficients)
/// pair: `Ĉ[t] = Dictᵀ · diag(Alphas[t, :]) · Dict`.
pub fn reconstruct(dictionary: &ArrayView2<f64>, alphas: &ArrayView2<f64>) -> Array3<f64> {
    let d = dictionary.ncols();
    let t = alphas.nrows();
    let mut est = Array3::<f64>::zeros((t, d, d));
    for (ti, weights) in alphas.outer_iter().enumerate() {
        let mut slice = est.index_axis_mut(Axis(0), ti);
        for (ki, basis) in dictionary.outer_iter().enumerate() {
            let weight = weights[ki];
            if weight == 0.0 {
                continue;
            }
            for i in 0..d {
                let wi = weight * basis[i];
                for j in 0..d {
                    slice[[i, j]] += wi * basis[j];
                }
            }
        }
    }
    est
}

/// Mean squared Frobenius reconstruction error,
/// `Σ_t ‖Ĉ[t] − C[t]‖_F² / (2T)`. This is both the optimization objective
/// and the convergence signal.
pub fn residual(
    dictionary: &ArrayView2<f64>,
    alphas: &ArrayView2<f64>,
    sample_cov: &ArrayView3<f64>,
) -> f64 {
    let est = reconstruct(dictionary, alphas);
    let t = sample_cov.dim().0;
    let mut acc = 0.0;
    for (a, b) in est.iter().zip(sample_cov.iter()) {
        let diff = a - b;
        acc += diff * diff;
    }
    acc / (2.0 * t as f64)
}

/// Rejects (dictionary, coefficients) pairs whose shapes disagree with the
/// observation tensor before any numeric work happens.
pub(crate) fn check_dimensions(
    x: &ArrayView3<f64>,
    dictionary: &ArrayView2<f64>,
    alphas: &ArrayView2<f64>,
) -> CovResult<()> {
    let observations = x.shape().to_vec();
    if dictionary.ncols() != x.dim().2 {
        return Err(CovDlError::DimensionMismatch {
            what: "dictionary",
            found: dictionary.shape().to_vec(),
            observations,
        });
    }
    if alphas.nrows() != x.dim().1 {
        return Err(CovDlError::DimensionMismatch {
            what: "alphas",
            found: alphas.shape().to_vec(),
            observations,
        });
    }
    Ok(())
}
