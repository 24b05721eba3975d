//! Dense factorization and solve routines used by the Gaussian-family
//! distributions and the regression function.
//!
//! Everything here operates on plain `ndarray` storage; covariance matrices
//! are small (d x d for observation dimensionality d), so simple loop-based
//! factorizations are sufficient.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Compute the lower Cholesky factor of a symmetric positive definite matrix.
/// Returns `None` if the matrix is not positive definite.
pub fn cholesky_lower(a: &ArrayView2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());
    let mut l = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            if i == j {
                for k in 0..j {
                    sum += l[[j, k]] * l[[j, k]];
                }
                let diag = a[[j, j]] - sum;
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[[j, j]] = diag.sqrt();
            } else {
                for k in 0..j {
                    sum += l[[i, k]] * l[[j, k]];
                }
                if l[[j, j]].abs() < 1e-300 {
                    return None;
                }
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    Some(l)
}

/// Solve `L w = b` by forward substitution, `L` lower triangular.
pub fn solve_lower(l: &ArrayView2<f64>, b: &ArrayView1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut w = Array1::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for k in 0..i {
            sum += l[[i, k]] * w[k];
        }
        w[i] = (b[i] - sum) / l[[i, i]];
    }
    w
}

/// Solve `L^T w = b` by backward substitution, `L` lower triangular.
pub fn solve_lower_transpose(l: &ArrayView2<f64>, b: &ArrayView1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut w = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for k in (i + 1)..n {
            sum += l[[k, i]] * w[k];
        }
        w[i] = (b[i] - sum) / l[[i, i]];
    }
    w
}

/// Solve `A x = b` for symmetric positive definite `A` via Cholesky.
/// Returns `None` if `A` is not positive definite.
pub fn solve_spd(a: &ArrayView2<f64>, b: &ArrayView1<f64>) -> Option<Array1<f64>> {
    let l = cholesky_lower(a)?;
    let w = solve_lower(&l.view(), b);
    Some(solve_lower_transpose(&l.view(), &w.view()))
}
