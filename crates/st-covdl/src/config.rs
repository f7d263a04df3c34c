use crate::error::{CovDlError, CovResult};
use ndarray::Array2;

/// How the optimizer seeds its first (dictionary, coefficients) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "report-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InitMethod {
    /// Eigendecomposition of the aggregate covariance.
    Spectral,
    /// Seeded Gaussian draw with unit-norm dictionary rows.
    Random,
}

/// Constraint applied after every coefficient gradient step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "report-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoeffPenalty {
    /// Box clip plus per-column projection onto the temporal-kernel region.
    TemporalKernel,
    /// Box clip only.
    None,
}

/// Structural constraint applied after every dictionary gradient step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "report-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DictPenalty {
    /// Hard-threshold each row to its `k_sparse` largest-magnitude entries.
    Sparse,
    /// Renormalization only.
    None,
}

/// Configuration for a covariance dictionary-learning model.
///
/// `K` basis vectors over `D` features are fitted against `T` per-time
/// covariance matrices. Built with `new` plus the `with_*` overrides;
/// validation runs when the model is constructed.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Number of dictionary rows `K`.
    pub rank: usize,
    /// Time horizon `T`.
    pub time_points: usize,
    /// Feature dimension `D`.
    pub features: usize,
    /// Fixed symmetric temporal kernel, required in smoothness mode.
    pub kernel: Option<Array2<f64>>,
    /// Iteration budget for a single fit call.
    pub max_iter: usize,
    pub init_method: InitMethod,
    pub coeff_penalty: CoeffPenalty,
    pub dict_penalty: DictPenalty,
    /// Nonzero budget per dictionary row in sparse mode.
    pub k_sparse: usize,
    /// Quadratic-energy threshold `gamma` for the smoothness projection.
    pub smoothness: f64,
    /// Upper bound on every coefficient entry.
    pub amp: f64,
    /// Coefficient learning rate.
    pub la_rate: f64,
    /// Dictionary learning rate.
    pub ld_rate: f64,
    /// Convergence tolerance for the stopping rule.
    pub tol: f64,
    /// Seed for random initialization.
    pub seed: u64,
    /// Emit per-iteration diagnostics through `tracing`.
    pub verbose: bool,
}

impl ModelConfig {
    /// Creates a configuration with neither penalty active and spectral
    /// initialization.
    pub fn new(rank: usize, time_points: usize, features: usize) -> Self {
        Self {
            rank,
            time_points,
            features,
            kernel: None,
            max_iter: 1000,
            init_method: InitMethod::Spectral,
            coeff_penalty: CoeffPenalty::None,
            dict_penalty: DictPenalty::None,
            k_sparse: features,
            smoothness: 0.5,
            amp: 3.0,
            la_rate: 1e-3,
            ld_rate: 1e-3,
            tol: 1e-4,
            seed: 1,
            verbose: false,
        }
    }

    /// Enables the temporal-smoothness penalty with the given kernel and
    /// energy threshold.
    pub fn with_temporal_kernel(mut self, kernel: Array2<f64>, smoothness: f64) -> Self {
        self.kernel = Some(kernel);
        self.smoothness = smoothness;
        self.coeff_penalty = CoeffPenalty::TemporalKernel;
        self
    }

    /// Enables hard row sparsification with the given nonzero budget.
    pub fn with_sparsity(mut self, k_sparse: usize) -> Self {
        self.k_sparse = k_sparse;
        self.dict_penalty = DictPenalty::Sparse;
        self
    }

    /// Overrides the initialization method.
    pub fn with_init(mut self, init_method: InitMethod) -> Self {
        self.init_method = init_method;
        self
    }

    /// Overrides the iteration budget.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Overrides the coefficient amplitude cap.
    pub fn with_amp(mut self, amp: f64) -> Self {
        self.amp = amp;
        self
    }

    /// Overrides both learning rates.
    pub fn with_learning_rates(mut self, la_rate: f64, ld_rate: f64) -> Self {
        self.la_rate = la_rate;
        self.ld_rate = ld_rate;
        self
    }

    /// Overrides the convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Overrides the random-initialization seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Enables per-iteration diagnostics.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Checks internal consistency. Called by the model constructor.
    pub fn validate(&self) -> CovResult<()> {
        if self.rank == 0 || self.time_points == 0 || self.features == 0 {
            return Err(CovDlError::InvalidConfig(format!(
                "rank, time_points, and features must all be nonzero (got {}, {}, {})",
                self.rank, self.time_points, self.features
            )));
        }
        if self.rank > self.features {
            return Err(CovDlError::InvalidConfig(format!(
                "rank {} exceeds feature dimension {}; overcomplete spectral seeding is unsupported",
                self.rank, self.features
            )));
        }
        if self.k_sparse == 0 || self.k_sparse > self.features {
            return Err(CovDlError::InvalidConfig(format!(
                "k_sparse must lie in 1..={} (got {})",
                self.features, self.k_sparse
            )));
        }
        if !(self.amp > 0.0) {
            return Err(CovDlError::InvalidConfig(format!(
                "amp must be positive (got {})",
                self.amp
            )));
        }
        if self.tol < 0.0 {
            return Err(CovDlError::InvalidConfig(format!(
                "tol must be non-negative (got {})",
                self.tol
            )));
        }
        if let Some(kernel) = &self.kernel {
            let t = self.time_points;
            if kernel.nrows() != t || kernel.ncols() != t {
                return Err(CovDlError::InvalidConfig(format!(
                    "kernel shape ({}, {}) does not match the time horizon {}",
                    kernel.nrows(),
                    kernel.ncols(),
                    t
                )));
            }
            for i in 0..t {
                for j in (i + 1)..t {
                    if (kernel[[i, j]] - kernel[[j, i]]).abs() > 1e-9 {
                        return Err(CovDlError::InvalidConfig(
                            "kernel must be symmetric".to_string(),
                        ));
                    }
                }
            }
        } else if self.coeff_penalty == CoeffPenalty::TemporalKernel {
            return Err(CovDlError::InvalidConfig(
                "temporal-kernel penalty requires a kernel matrix".to_string(),
            ));
        }
        Ok(())
    }
}
