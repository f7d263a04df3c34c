use crate::coefficients::update_alphas;
use crate::config::{CoeffPenalty, InitMethod, ModelConfig};
use crate::covariance::{residual, sample_covariance};
use crate::dictionary::update_dictionary;
use crate::error::{CovDlError, CovResult};
use crate::evaluate::{AlignmentMetric, ProgressSink};
use crate::projection::KernelProjector;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::cmp::Ordering;
use tracing::{debug, info};

/// One iterate of the optimizer: the current (dictionary, coefficients) pair.
///
/// The fit loop threads this value through each iteration instead of mutating
/// shared fields, so snapshots for best-state tracking and warm starts are
/// plain clones.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "report-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitState {
    /// Shape `(K, D)`, unit-norm rows.
    pub dictionary: Array2<f64>,
    /// Shape `(T, K)`, entries in `[0, amp]`.
    pub alphas: Array2<f64>,
}

/// Why the fit loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "report-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FitStatus {
    /// The stopping rule fired.
    Converged,
    /// The iteration budget ran out first. Not an error; the model keeps its
    /// state so the caller can resume.
    Exhausted,
}

/// Outcome of a fit call.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "report-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitReport {
    /// The final iterate.
    pub state: FitState,
    /// The iterate selected by the stopping rule.
    pub best: FitState,
    /// Residual per iterate, length `iterations + 1` (the first entry scores
    /// the initialized state).
    pub residuals: Vec<f64>,
    /// Alignment score per iterate when ground truth was supplied.
    pub alignment: Option<Vec<f64>>,
    /// Completed iterations.
    pub iterations: usize,
    pub status: FitStatus,
}

/// Ground-truth factorization plus the metric that scores candidates
/// against it.
pub struct GroundTruth<'a> {
    /// True coefficients, transposed: shape `(K, T)`.
    pub alphas: ArrayView2<'a, f64>,
    /// True dictionary, shape `(K, D)`.
    pub dictionary: ArrayView2<'a, f64>,
    pub metric: &'a dyn AlignmentMetric,
}

/// Per-call knobs for [`SnsCovModel::fit_with`].
#[derive(Default)]
pub struct FitOptions<'a> {
    /// Overrides the configured convergence tolerance.
    pub tol: Option<f64>,
    /// Switches the stopping rule to alignment-score tracking.
    pub ground_truth: Option<GroundTruth<'a>>,
    /// Notified once per completed iteration.
    pub progress: Option<&'a mut dyn ProgressSink>,
}

/// Alternating-minimization optimizer for smooth/sparse covariance
/// dictionary learning.
///
/// A fit call builds the sample covariance series once, seeds a
/// (dictionary, coefficients) pair, and alternates coefficient and dictionary
/// updates until the stopping rule fires or the iteration budget runs out.
/// The model keeps its last state so a later call warm-starts from it.
#[derive(Debug)]
pub struct SnsCovModel {
    config: ModelConfig,
    projector: Option<KernelProjector>,
    state: Option<FitState>,
}

impl SnsCovModel {
    pub fn new(config: ModelConfig) -> CovResult<Self> {
        config.validate()?;
        let projector = match (&config.coeff_penalty, &config.kernel) {
            (CoeffPenalty::TemporalKernel, Some(kernel)) => {
                Some(KernelProjector::new(kernel, config.smoothness))
            }
            _ => None,
        };
        if config.verbose {
            info!(
                rank = config.rank,
                time_points = config.time_points,
                features = config.features,
                coeff_penalty = ?config.coeff_penalty,
                dict_penalty = ?config.dict_penalty,
                "initialized covariance dictionary learning"
            );
        }
        Ok(Self {
            config,
            projector,
            state: None,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// The state left behind by the last fit call, if any.
    pub fn state(&self) -> Option<&FitState> {
        self.state.as_ref()
    }

    /// Drops the stored state so the next fit call initializes from scratch.
    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Fits the model to observations of shape `(N, T, D)` using the
    /// configured stopping tolerance. The observations are never mutated.
    pub fn fit(&mut self, x: ArrayView3<'_, f64>) -> CovResult<FitReport> {
        self.fit_with(x, FitOptions::default())
    }

    /// Fits with per-call options: tolerance override, ground-truth
    /// evaluation, and progress reporting.
    pub fn fit_with(
        &mut self,
        x: ArrayView3<'_, f64>,
        mut options: FitOptions<'_>,
    ) -> CovResult<FitReport> {
        self.check_observations(&x)?;
        let sample_cov = sample_covariance(&x);
        let tol = options.tol.unwrap_or(self.config.tol);

        // The stored state is only replaced once the fit call succeeds, so a
        // failed iteration leaves the last good state untouched.
        let mut state = match &self.state {
            Some(state) => state.clone(),
            None => self.initialize(&sample_cov)?,
        };

        let mut residuals = Vec::with_capacity(self.config.max_iter + 1);
        residuals.push(residual(
            &state.dictionary.view(),
            &state.alphas.view(),
            &sample_cov.view(),
        ));
        let mut alignment = options
            .ground_truth
            .as_ref()
            .map(|truth| vec![score_against(truth, &state)]);

        let mut best = state.clone();
        let mut best_score = alignment.as_ref().map(|history| history[0]);
        let mut status = FitStatus::Exhausted;
        let mut iterations = 0;

        for step in 0..self.config.max_iter {
            let alphas = update_alphas(
                &x,
                &state.dictionary.view(),
                &state.alphas.view(),
                &sample_cov.view(),
                &self.config,
                self.projector.as_ref(),
            )?;
            let dictionary = update_dictionary(
                &x,
                &state.dictionary.view(),
                &alphas.view(),
                &sample_cov.view(),
                &self.config,
            )?;
            state = FitState { dictionary, alphas };
            iterations = step + 1;

            let cost = residual(
                &state.dictionary.view(),
                &state.alphas.view(),
                &sample_cov.view(),
            );
            residuals.push(cost);
            if self.config.verbose {
                debug!(iteration = iterations, residual = cost, "fit step");
            }

            let stop = match (&options.ground_truth, alignment.as_mut()) {
                (Some(truth), Some(history)) => {
                    let current = score_against(truth, &state);
                    history.push(current);
                    if best_score.map_or(true, |b| current < b) {
                        best_score = Some(current);
                        best = state.clone();
                    }
                    current - history[iterations - 1] > tol
                }
                _ => {
                    let delta = (residuals[iterations] - residuals[iterations - 1]).abs();
                    let stop = delta < tol;
                    // The first computed iterate always becomes the snapshot;
                    // after that the stopping iterate is excluded from it.
                    if iterations == 1 || !stop {
                        best = state.clone();
                    }
                    stop
                }
            };

            if let Some(sink) = options.progress.as_mut() {
                sink.on_iteration(iterations);
            }
            if stop {
                status = FitStatus::Converged;
                break;
            }
        }

        self.state = Some(state.clone());
        Ok(FitReport {
            state,
            best,
            residuals,
            alignment,
            iterations,
            status,
        })
    }

    fn check_observations(&self, x: &ArrayView3<f64>) -> CovResult<()> {
        let (n, t, d) = x.dim();
        if n == 0 || t != self.config.time_points || d != self.config.features {
            return Err(CovDlError::DimensionMismatch {
                what: "observations",
                found: vec![n, t, d],
                observations: vec![1, self.config.time_points, self.config.features],
            });
        }
        Ok(())
    }

    fn initialize(&self, sample_cov: &Array3<f64>) -> CovResult<FitState> {
        match self.config.init_method {
            InitMethod::Spectral => Ok(self.spectral_init(sample_cov)),
            InitMethod::Random => Ok(self.random_init()),
        }
    }

    /// Seeds the dictionary with the top-K eigenvectors of the aggregate
    /// covariance `Σ_t C[t]` and the coefficients with the per-time diagonal
    /// of the covariance rotated into that eigenbasis.
    fn spectral_init(&self, sample_cov: &Array3<f64>) -> FitState {
        let d = self.config.features;
        let t = self.config.time_points;
        let k = self.config.rank;

        let mut aggregate = DMatrix::<f64>::zeros(d, d);
        for ti in 0..t {
            let slice = sample_cov.index_axis(Axis(0), ti);
            for i in 0..d {
                for j in 0..d {
                    aggregate[(i, j)] += slice[[i, j]];
                }
            }
        }
        let eig = SymmetricEigen::new(aggregate);
        let mut order: Vec<usize> = (0..d).collect();
        order.sort_by(|&a, &b| {
            eig.eigenvalues[b]
                .partial_cmp(&eig.eigenvalues[a])
                .unwrap_or(Ordering::Equal)
        });

        let mut dictionary = Array2::<f64>::zeros((k, d));
        for (row, &idx) in order.iter().take(k).enumerate() {
            for j in 0..d {
                dictionary[[row, j]] = eig.eigenvectors[(j, idx)];
            }
        }

        let mut alphas = Array2::<f64>::zeros((t, k));
        for ti in 0..t {
            let slice = sample_cov.index_axis(Axis(0), ti);
            for ki in 0..k {
                let basis = dictionary.row(ki);
                let mut energy = 0.0;
                for i in 0..d {
                    let mut acc = 0.0;
                    for j in 0..d {
                        acc += slice[[i, j]] * basis[j];
                    }
                    energy += basis[i] * acc;
                }
                alphas[[ti, ki]] = energy;
            }
        }
        FitState { dictionary, alphas }
    }

    /// Deterministic Gaussian seeding: unit-norm dictionary rows and
    /// non-negative coefficients.
    fn random_init(&self) -> FitState {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let d = self.config.features;
        let k = self.config.rank;
        let t = self.config.time_points;

        let mut dictionary = Array2::<f64>::zeros((k, d));
        for mut row in dictionary.outer_iter_mut() {
            for value in row.iter_mut() {
                *value = rng.sample(StandardNormal);
            }
            let norm = row.dot(&row).sqrt();
            if norm > 0.0 {
                row.mapv_inplace(|v| v / norm);
            }
        }

        let mut alphas = Array2::<f64>::zeros((t, k));
        for value in alphas.iter_mut() {
            let draw: f64 = rng.sample(StandardNormal);
            *value = draw.abs();
        }
        FitState { dictionary, alphas }
    }
}

fn score_against(truth: &GroundTruth<'_>, state: &FitState) -> f64 {
    truth.metric.score(
        &truth.alphas,
        &truth.dictionary,
        &state.alphas.view(),
        &state.dictionary.view(),
    )
}
