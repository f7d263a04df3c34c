use approx::assert_relative_eq;
use ndarray::{arr1, arr2, Array2, Array3};
use st_covdl::{
    AlignmentMetric, FitOptions, FitStatus, GroundTruth, InitMethod, KernelProjector, ModelConfig,
    PermutationAlignment, ProgressSink, SnsCovModel,
};

fn rank_one_series(amplitudes: &[f64], direction: &[f64], samples: usize) -> Array3<f64> {
    let t = amplitudes.len();
    let d = direction.len();
    let mut x = Array3::<f64>::zeros((samples, t, d));
    for ni in 0..samples {
        for (ti, a) in amplitudes.iter().enumerate() {
            for (di, v) in direction.iter().enumerate() {
                x[[ni, ti, di]] = a.sqrt() * v;
            }
        }
    }
    x
}

fn wavy_series(n: usize, t: usize, d: usize) -> Array3<f64> {
    let mut x = Array3::<f64>::zeros((n, t, d));
    for ni in 0..n {
        for ti in 0..t {
            for di in 0..d {
                let phase = 0.7 * ni as f64 + 0.3 * ti as f64 + 1.1 * di as f64;
                x[[ni, ti, di]] = phase.sin() + 0.25 * phase.cos();
            }
        }
    }
    x
}

#[derive(Default)]
struct CountingSink {
    calls: Vec<usize>,
}

impl ProgressSink for CountingSink {
    fn on_iteration(&mut self, iteration: usize) {
        self.calls.push(iteration);
    }
}

#[test]
fn rank_one_spectral_recovery() {
    let amplitudes = [1.0, 2.0, 0.5, 1.5, 1.2];
    let direction = [0.5, 0.5, 0.5, 0.5];
    let x = rank_one_series(&amplitudes, &direction, 3);

    let config = ModelConfig::new(1, amplitudes.len(), direction.len());
    let mut model = SnsCovModel::new(config).unwrap();
    let report = model.fit(x.view()).unwrap();

    assert_eq!(report.status, FitStatus::Converged);
    let recovered = report.best.dictionary.row(0);
    let truth = arr1(&direction);
    assert_relative_eq!(recovered.dot(&truth).abs(), 1.0, max_relative = 1e-8);
    for (ti, a) in amplitudes.iter().enumerate() {
        assert_relative_eq!(report.best.alphas[[ti, 0]], *a, max_relative = 1e-8);
    }
}

#[test]
fn residual_deltas_stay_above_tol_until_the_stop() {
    let x = wavy_series(4, 6, 3);
    let config = ModelConfig::new(2, 6, 3)
        .with_max_iter(200)
        .with_learning_rates(5e-2, 5e-2)
        .with_tol(1e-7);
    let mut model = SnsCovModel::new(config).unwrap();
    let report = model.fit(x.view()).unwrap();

    assert_eq!(report.residuals.len(), report.iterations + 1);
    // Every delta before the stopping one must have been at or above the
    // tolerance, otherwise the loop should already have stopped.
    for i in 1..report.iterations {
        let delta = (report.residuals[i] - report.residuals[i - 1]).abs();
        assert!(delta >= 1e-7, "premature small delta at iterate {i}");
    }
    if report.status == FitStatus::Converged {
        let last = report.iterations;
        let delta = (report.residuals[last] - report.residuals[last - 1]).abs();
        assert!(delta < 1e-7);
    }
}

#[test]
fn evaluation_mode_tracks_the_best_iterate_and_reports_progress() {
    let amplitudes = [1.0, 1.4, 0.8, 1.1];
    let direction = [1.0, 0.0, 0.0];
    let x = rank_one_series(&amplitudes, &direction, 2);

    let truth_dictionary = arr2(&[[1.0, 0.0, 0.0]]);
    let truth_alphas = arr2(&[[1.0], [1.4], [0.8], [1.1]]);
    let metric = PermutationAlignment;
    let mut sink = CountingSink::default();

    let config = ModelConfig::new(1, 4, 3).with_max_iter(5);
    let mut model = SnsCovModel::new(config).unwrap();
    let report = model
        .fit_with(
            x.view(),
            FitOptions {
                tol: None,
                ground_truth: Some(GroundTruth {
                    alphas: truth_alphas.t(),
                    dictionary: truth_dictionary.view(),
                    metric: &metric,
                }),
                progress: Some(&mut sink),
            },
        )
        .unwrap();

    let history = report.alignment.expect("evaluation mode records scores");
    assert_eq!(history.len(), report.iterations + 1);
    assert_eq!(sink.calls.len(), report.iterations);
    assert_eq!(sink.calls.first().copied(), Some(1));

    let best_score = metric.score(
        &truth_alphas.t(),
        &truth_dictionary.view(),
        &report.best.alphas.view(),
        &report.best.dictionary.view(),
    );
    let minimum = history.iter().cloned().fold(f64::INFINITY, f64::min);
    assert_relative_eq!(best_score, minimum, max_relative = 1e-9);
}

#[test]
fn smoothness_mode_keeps_the_final_state_feasible() {
    let t = 6;
    let x = wavy_series(3, t, 3);
    let mut kernel = Array2::<f64>::zeros((t, t));
    for i in 0..t - 1 {
        kernel[[i, i]] += 1.0;
        kernel[[i + 1, i + 1]] += 1.0;
        kernel[[i, i + 1]] -= 1.0;
        kernel[[i + 1, i]] -= 1.0;
    }
    let gamma = 0.4;
    let config = ModelConfig::new(2, t, 3)
        .with_temporal_kernel(kernel.clone(), gamma)
        .with_sparsity(2)
        .with_max_iter(10)
        .with_tol(0.0);
    let amp = config.amp;
    let mut model = SnsCovModel::new(config).unwrap();
    let report = model.fit(x.view()).unwrap();

    assert!(report.iterations >= 1);
    assert!(report.state.alphas.iter().all(|&v| (0.0..=amp).contains(&v)));
    let projector = KernelProjector::new(&kernel, gamma);
    for ki in 0..2 {
        let energy = projector.quad_energy(&report.state.alphas.column(ki));
        assert!(energy <= gamma + 1e-6, "column {ki} energy {energy}");
    }
    for row in report.state.dictionary.outer_iter() {
        assert_relative_eq!(row.dot(&row).sqrt(), 1.0, max_relative = 1e-9);
        let nonzero = row.iter().filter(|v| **v != 0.0).count();
        assert!(nonzero <= 2);
    }
}

#[test]
fn deterministic_random_fits_agree_across_models() {
    let x = wavy_series(3, 5, 4);
    let config = ModelConfig::new(2, 5, 4)
        .with_init(InitMethod::Random)
        .with_seed(42)
        .with_max_iter(3)
        .with_tol(0.0);
    let mut first = SnsCovModel::new(config.clone()).unwrap();
    let mut second = SnsCovModel::new(config).unwrap();
    let a = first.fit(x.view()).unwrap();
    let b = second.fit(x.view()).unwrap();
    assert_eq!(a.residuals, b.residuals);
    assert_eq!(a.state.dictionary, b.state.dictionary);
    assert_eq!(a.state.alphas, b.state.alphas);
}
