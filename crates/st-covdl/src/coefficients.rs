use crate::config::{CoeffPenalty, ModelConfig};
use crate::covariance::{check_dimensions, reconstruct};
use crate::error::{CovDlError, CovResult};
use crate::projection::KernelProjector;
use ndarray::{Array2, ArrayView2, ArrayView3, Axis};

/// Retry bound for the clip-then-project feasibility repair. Clipping can
/// leave a column outside the quadratic region and projecting can leave
/// entries outside the box, so the two are alternated a fixed number of
/// rounds with an explicit feasibility predicate.
const REPAIR_ROUNDS: usize = 8;

/// One coefficient update: a natural-gradient-style descent step followed by
/// constraint enforcement according to the configured penalty.
///
/// The gradient of the residual with respect to `Alphas[t, k]` is
/// `d_k · (Ĉ[t] − C[t]) · d_kᵀ`; the step scales it by the coefficient itself
/// and averages over the horizon. Returns the new coefficient matrix, leaving
/// every input untouched.
pub fn update_alphas(
    x: &ArrayView3<f64>,
    dictionary: &ArrayView2<f64>,
    alphas: &ArrayView2<f64>,
    sample_cov: &ArrayView3<f64>,
    config: &ModelConfig,
    projector: Option<&KernelProjector>,
) -> CovResult<Array2<f64>> {
    check_dimensions(x, dictionary, alphas)?;

    let est = reconstruct(dictionary, alphas);
    let t = alphas.nrows();
    let d = dictionary.ncols();

    let mut updated = alphas.to_owned();
    let scale = config.la_rate / t as f64;
    for ti in 0..t {
        let est_t = est.index_axis(Axis(0), ti);
        let cov_t = sample_cov.index_axis(Axis(0), ti);
        for (ki, basis) in dictionary.outer_iter().enumerate() {
            let mut grad = 0.0;
            for i in 0..d {
                let mut row_acc = 0.0;
                for j in 0..d {
                    row_acc += (est_t[[i, j]] - cov_t[[i, j]]) * basis[j];
                }
                grad += basis[i] * row_acc;
            }
            updated[[ti, ki]] -= scale * updated[[ti, ki]] * grad;
        }
    }

    match config.coeff_penalty {
        CoeffPenalty::None => {
            clip(&mut updated, config.amp);
        }
        CoeffPenalty::TemporalKernel => {
            let projector = projector.ok_or_else(|| {
                CovDlError::InvalidConfig(
                    "temporal-kernel penalty requires a kernel projector".to_string(),
                )
            })?;
            clip(&mut updated, config.amp);
            project_columns(&mut updated, projector)?;
            for _ in 0..REPAIR_ROUNDS {
                if within_box(&updated, config.amp) && columns_feasible(&updated, projector) {
                    break;
                }
                clip(&mut updated, config.amp);
                project_columns(&mut updated, projector)?;
            }
            // The box invariant holds unconditionally, even when the repair
            // budget runs out.
            clip(&mut updated, config.amp);
        }
    }
    Ok(updated)
}

fn clip(alphas: &mut Array2<f64>, amp: f64) {
    alphas.mapv_inplace(|v| v.clamp(0.0, amp));
}

fn within_box(alphas: &Array2<f64>, amp: f64) -> bool {
    alphas.iter().all(|&v| (0.0..=amp).contains(&v))
}

fn columns_feasible(alphas: &Array2<f64>, projector: &KernelProjector) -> bool {
    let slack = 1e-9 * projector.gamma().abs().max(1.0);
    (0..alphas.ncols()).all(|ki| {
        projector.quad_energy(&alphas.column(ki)) <= projector.gamma() + slack
    })
}

fn project_columns(alphas: &mut Array2<f64>, projector: &KernelProjector) -> CovResult<()> {
    for ki in 0..alphas.ncols() {
        let projected = projector.project(&alphas.column(ki))?;
        alphas.column_mut(ki).assign(&projected);
    }
    Ok(())
}
