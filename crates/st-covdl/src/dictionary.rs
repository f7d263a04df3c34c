use crate::config::{DictPenalty, ModelConfig};
use crate::covariance::{check_dimensions, reconstruct};
use crate::error::{CovDlError, CovResult};
use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use std::cmp::Ordering;

/// One dictionary update: a gradient descent step, optional hard row
/// sparsification, and unconditional row renormalization.
///
/// The residual gradient with respect to the dictionary is
/// `(2/T) Σ_t diag(Alphas[t, :]) · Dict · (Ĉ[t] − C[t])`. In sparse mode each
/// row keeps only its `k_sparse` largest-magnitude entries. Every row is then
/// rescaled to unit Euclidean norm; a row that collapsed to exactly zero is a
/// `DegenerateRow` error rather than a division by zero.
pub fn update_dictionary(
    x: &ArrayView3<f64>,
    dictionary: &ArrayView2<f64>,
    alphas: &ArrayView2<f64>,
    sample_cov: &ArrayView3<f64>,
    config: &ModelConfig,
) -> CovResult<Array2<f64>> {
    check_dimensions(x, dictionary, alphas)?;

    let est = reconstruct(dictionary, alphas);
    let (k, d) = dictionary.dim();
    let t = alphas.nrows();

    let mut grad = Array2::<f64>::zeros((k, d));
    for ti in 0..t {
        let est_t = est.index_axis(Axis(0), ti);
        let cov_t = sample_cov.index_axis(Axis(0), ti);
        for ki in 0..k {
            let weight = alphas[[ti, ki]];
            if weight == 0.0 {
                continue;
            }
            let basis = dictionary.row(ki);
            for j in 0..d {
                let mut acc = 0.0;
                for i in 0..d {
                    acc += basis[i] * (est_t[[i, j]] - cov_t[[i, j]]);
                }
                grad[[ki, j]] += weight * acc;
            }
        }
    }

    let mut updated = dictionary.to_owned();
    updated.scaled_add(-2.0 * config.ld_rate / t as f64, &grad);

    if config.dict_penalty == DictPenalty::Sparse && config.k_sparse < d {
        sparsify_rows(&mut updated, config.k_sparse);
    }

    for (ki, mut row) in updated.outer_iter_mut().enumerate() {
        let norm = row.dot(&row).sqrt();
        if norm == 0.0 {
            return Err(CovDlError::DegenerateRow { row: ki });
        }
        row.mapv_inplace(|v| v / norm);
    }
    Ok(updated)
}

/// Zeros everything but the `keep` largest-magnitude entries of each row.
fn sparsify_rows(dictionary: &mut Array2<f64>, keep: usize) {
    let d = dictionary.ncols();
    let drop = d - keep;
    let mut order: Vec<usize> = (0..d).collect();
    for mut row in dictionary.outer_iter_mut() {
        order.sort_by(|&a, &b| {
            row[a]
                .abs()
                .partial_cmp(&row[b].abs())
                .unwrap_or(Ordering::Equal)
        });
        for &j in &order[..drop] {
            row[j] = 0.0;
        }
    }
}
