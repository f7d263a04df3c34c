use ndarray::ArrayView2;

/// Scores a learned factorization against ground truth. Lower is better.
///
/// The true coefficient matrix arrives transposed, shape `(K, T)`, while the
/// candidate keeps the fit layout `(T, K)`. Implementations are expected to
/// resolve the label and sign ambiguity of the factorization internally; the
/// optimizer treats the metric as an opaque oracle and only compares
/// consecutive scores.
pub trait AlignmentMetric {
    fn score(
        &self,
        true_alphas_t: &ArrayView2<f64>,
        true_dictionary: &ArrayView2<f64>,
        alphas: &ArrayView2<f64>,
        dictionary: &ArrayView2<f64>,
    ) -> f64;
}

/// Observer notified once per completed fit iteration. Has no influence on
/// control flow.
pub trait ProgressSink {
    fn on_iteration(&mut self, iteration: usize);
}

/// Reference alignment metric: greedy one-to-one row matching under absolute
/// cosine similarity, scoring dictionary-row distance (up to sign) plus the
/// coefficient mismatch of the matched columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermutationAlignment;

impl AlignmentMetric for PermutationAlignment {
    fn score(
        &self,
        true_alphas_t: &ArrayView2<f64>,
        true_dictionary: &ArrayView2<f64>,
        alphas: &ArrayView2<f64>,
        dictionary: &ArrayView2<f64>,
    ) -> f64 {
        let k = true_dictionary.nrows();
        let t = alphas.nrows();
        let mut taken = vec![false; dictionary.nrows()];
        let mut total = 0.0;
        for ki in 0..k {
            let truth = true_dictionary.row(ki);
            let truth_norm = truth.dot(&truth).sqrt();
            let mut best: Option<(usize, f64)> = None;
            for kj in 0..dictionary.nrows() {
                if taken[kj] {
                    continue;
                }
                let candidate = dictionary.row(kj);
                let norm = candidate.dot(&candidate).sqrt();
                let denom = (truth_norm * norm).max(f64::MIN_POSITIVE);
                let cosine = (truth.dot(&candidate) / denom).abs();
                if best.map_or(true, |(_, c)| cosine > c) {
                    best = Some((kj, cosine));
                }
            }
            let Some((matched, _)) = best else { continue };
            taken[matched] = true;

            let candidate = dictionary.row(matched);
            let sign = if truth.dot(&candidate) < 0.0 { -1.0 } else { 1.0 };
            let mut dict_err = 0.0;
            for (a, b) in truth.iter().zip(candidate.iter()) {
                let diff = a - sign * b;
                dict_err += diff * diff;
            }
            let mut alpha_err = 0.0;
            for ti in 0..t {
                let diff = true_alphas_t[[ki, ti]] - alphas[[ti, matched]];
                alpha_err += diff * diff;
            }
            total += dict_err + alpha_err / t as f64;
        }
        total / k as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr2;

    #[test]
    fn exact_recovery_scores_zero() {
        let dictionary = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        let alphas = arr2(&[[2.0, 0.5], [1.0, 1.5]]);
        let score = PermutationAlignment.score(
            &alphas.t(),
            &dictionary.view(),
            &alphas.view(),
            &dictionary.view(),
        );
        assert_relative_eq!(score, 0.0);
    }

    #[test]
    fn recovery_up_to_permutation_and_sign_scores_zero() {
        let truth_dict = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        let truth_alphas = arr2(&[[2.0, 0.5], [1.0, 1.5]]);
        let swapped_dict = arr2(&[[0.0, -1.0], [1.0, 0.0]]);
        let swapped_alphas = arr2(&[[0.5, 2.0], [1.5, 1.0]]);
        let score = PermutationAlignment.score(
            &truth_alphas.t(),
            &truth_dict.view(),
            &swapped_alphas.view(),
            &swapped_dict.view(),
        );
        assert_relative_eq!(score, 0.0);
    }

    #[test]
    fn mismatched_coefficients_raise_the_score() {
        let dictionary = arr2(&[[1.0, 0.0]]);
        let truth_alphas = arr2(&[[2.0], [1.0]]);
        let wrong_alphas = arr2(&[[0.0], [0.0]]);
        let score = PermutationAlignment.score(
            &truth_alphas.t(),
            &dictionary.view(),
            &wrong_alphas.view(),
            &dictionary.view(),
        );
        assert!(score > 0.0);
    }
}
