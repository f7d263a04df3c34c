use crate::error::{CovDlError, CovResult};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView1};

const NEWTON_STEPS: usize = 32;

/// Projects vectors onto the quadratic region `xᵀKx ≤ gamma` defined by a
/// fixed symmetric temporal kernel.
///
/// The kernel never changes within a fit run, so its eigendecomposition is
/// taken once at construction and reused for every column projection. The
/// projection solves the secular equation of the equality-constrained
/// quadratic program in the kernel eigenbasis: a polynomial root gives the
/// Lagrange multiplier, which is then polished with guarded Newton steps so
/// infeasible inputs land on the constraint boundary.
#[derive(Debug, Clone)]
pub struct KernelProjector {
    kernel: DMatrix<f64>,
    eigenvalues: DVector<f64>,
    eigenvectors: DMatrix<f64>,
    gamma: f64,
}

impl KernelProjector {
    pub fn new(kernel: &Array2<f64>, gamma: f64) -> Self {
        let t = kernel.nrows();
        let dense = DMatrix::from_fn(t, t, |i, j| kernel[[i, j]]);
        let eig = SymmetricEigen::new(dense.clone());
        Self {
            kernel: dense,
            eigenvalues: eig.eigenvalues,
            eigenvectors: eig.eigenvectors,
            gamma,
        }
    }

    /// Quadratic energy `xᵀKx` under the kernel.
    pub fn quad_energy(&self, x: &ArrayView1<f64>) -> f64 {
        let v = DVector::from_iterator(x.len(), x.iter().copied());
        v.dot(&(&self.kernel * &v))
    }

    /// Whether `x` already lies inside the constraint region.
    pub fn is_feasible(&self, x: &ArrayView1<f64>) -> bool {
        self.quad_energy(x) <= self.gamma
    }

    /// Configured energy threshold.
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Returns `x` unchanged when feasible, otherwise the nearest point on
    /// the boundary of the quadratic region.
    pub fn project(&self, x: &ArrayView1<f64>) -> CovResult<Array1<f64>> {
        let energy = self.quad_energy(x);
        if energy <= self.gamma {
            return Ok(x.to_owned());
        }

        let t = x.len();
        let xv = DVector::from_iterator(t, x.iter().copied());
        let u = self.eigenvectors.tr_mul(&xv);

        let mut s1 = 0.0;
        let mut s2 = 0.0;
        for i in 0..t {
            let w = self.eigenvalues[i];
            let uu = u[i] * u[i];
            s1 += uu * w;
            s2 += uu * w * w;
        }

        // Secular polynomial in the multiplier: (s1 - gamma) - 2*s2*l = 0.
        let c0 = s1 - self.gamma;
        let c1 = -2.0 * s2;
        if c1 == 0.0 || !c0.is_finite() || !c1.is_finite() {
            return Err(CovDlError::ProjectionInfeasible {
                energy,
                gamma: self.gamma,
            });
        }
        let multiplier = (-c0 / c1).abs();
        let multiplier = self.polish_multiplier(&u, multiplier);

        let scaled = DVector::from_fn(t, |i, _| u[i] / (1.0 + multiplier * self.eigenvalues[i]));
        let back = &self.eigenvectors * scaled;
        let projected = Array1::from_iter(back.iter().copied());
        if projected.iter().any(|v| !v.is_finite()) {
            return Err(CovDlError::ProjectionInfeasible {
                energy,
                gamma: self.gamma,
            });
        }
        Ok(projected)
    }

    /// Newton refinement of the multiplier on the exact secular function
    /// `φ(l) = Σ u_i² λ_i / (1 + l·λ_i)² − gamma`. The polynomial root only
    /// approximates the boundary for mildly infeasible inputs; each Newton
    /// step is kept only while it stays finite and non-negative, so repeated
    /// or ill-conditioned eigenvalues degrade to the polynomial solution
    /// instead of blowing up.
    fn polish_multiplier(&self, u: &DVector<f64>, initial: f64) -> f64 {
        let t = u.len();
        let mut l = initial;
        for _ in 0..NEWTON_STEPS {
            let mut value = -self.gamma;
            let mut slope = 0.0;
            for i in 0..t {
                let w = self.eigenvalues[i];
                let denom = 1.0 + l * w;
                if denom.abs() < f64::EPSILON {
                    return initial;
                }
                let uu = u[i] * u[i];
                value += uu * w / (denom * denom);
                slope -= 2.0 * uu * w * w / (denom * denom * denom);
            }
            if value.abs() <= 1e-12 * self.gamma.abs().max(1.0) {
                break;
            }
            if slope == 0.0 || !slope.is_finite() {
                return initial;
            }
            let next = l - value / slope;
            if !next.is_finite() || next < 0.0 {
                return initial;
            }
            l = next;
        }
        l
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, Array2};

    fn laplacian_kernel(t: usize) -> Array2<f64> {
        // Second-difference smoothness kernel, PSD.
        let mut k = Array2::<f64>::zeros((t, t));
        for i in 0..t.saturating_sub(1) {
            k[[i, i]] += 1.0;
            k[[i + 1, i + 1]] += 1.0;
            k[[i, i + 1]] -= 1.0;
            k[[i + 1, i]] -= 1.0;
        }
        k
    }

    #[test]
    fn feasible_vectors_pass_through_unchanged() {
        let projector = KernelProjector::new(&laplacian_kernel(4), 10.0);
        let x = arr1(&[1.0, 1.2, 1.1, 0.9]);
        let projected = projector.project(&x.view()).unwrap();
        assert_eq!(projected, x);
    }

    #[test]
    fn infeasible_vectors_land_on_the_boundary() {
        let gamma = 0.5;
        let projector = KernelProjector::new(&laplacian_kernel(6), gamma);
        let x = arr1(&[0.0, 3.0, -2.0, 4.0, -1.0, 2.5]);
        assert!(projector.quad_energy(&x.view()) > gamma);
        let projected = projector.project(&x.view()).unwrap();
        assert_relative_eq!(
            projector.quad_energy(&projected.view()),
            gamma,
            max_relative = 1e-6
        );
    }

    #[test]
    fn identity_kernel_projection_shrinks_towards_the_sphere() {
        let gamma = 1.0;
        let projector = KernelProjector::new(&Array2::<f64>::eye(3), gamma);
        let x = arr1(&[2.0, 0.0, 0.0]);
        let projected = projector.project(&x.view()).unwrap();
        assert_relative_eq!(projected[0], 1.0, max_relative = 1e-8);
        assert!(projected[1].abs() < 1e-9);
    }

    #[test]
    fn degenerate_secular_equation_is_reported() {
        // Zero kernel with a negative threshold: nothing is feasible and the
        // polynomial has no root.
        let projector = KernelProjector::new(&Array2::<f64>::zeros((3, 3)), -1.0);
        let x = arr1(&[1.0, 0.0, 0.0]);
        let err = projector.project(&x.view()).unwrap_err();
        assert!(matches!(err, CovDlError::ProjectionInfeasible { .. }));
    }
}
