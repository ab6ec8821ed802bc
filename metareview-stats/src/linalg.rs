//! Dense linear algebra for the small weighted least-squares problems behind
//! meta-regression, dose-response and regression-based bias tests.
//!
//! Matrices are row-major `Vec<f64>`. Singular systems yield `None`; the
//! pivot threshold is relative to the largest entry so that badly scaled
//! covariates (years around 2000, say) are not mistaken for collinear ones.

const RELATIVE_PIVOT_TOL: f64 = 1e-12;

fn pivot_tolerance(a: &[f64]) -> f64 {
    let scale = a.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    RELATIVE_PIVOT_TOL * scale.max(f64::MIN_POSITIVE)
}

/// Solve `A x = b` by Gaussian elimination with partial pivoting.
///
/// `a` is row-major n×n. Returns `None` when `A` is (numerically) singular.
pub fn solve_linear_system(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n);
    let tol = pivot_tolerance(a);
    let cols = n + 1;
    let mut aug = vec![0.0; n * cols];
    for i in 0..n {
        aug[i * cols..i * cols + n].copy_from_slice(&a[i * n..(i + 1) * n]);
        aug[i * cols + n] = b[i];
    }

    for col in 0..n {
        let (max_row, max_val) = (col..n)
            .map(|row| (row, aug[row * cols + col].abs()))
            .fold((col, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if max_val < tol {
            tracing::debug!(col, pivot = max_val, "singular matrix in linear solve");
            return None;
        }
        if max_row != col {
            for j in 0..cols {
                aug.swap(col * cols + j, max_row * cols + j);
            }
        }
        let pivot = aug[col * cols + col];
        for row in (col + 1)..n {
            let factor = aug[row * cols + col] / pivot;
            for j in col..cols {
                aug[row * cols + j] -= factor * aug[col * cols + j];
            }
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = aug[i * cols + n];
        for j in (i + 1)..n {
            sum -= aug[i * cols + j] * x[j];
        }
        x[i] = sum / aug[i * cols + i];
    }
    Some(x)
}

/// Invert a row-major n×n matrix by Gauss–Jordan elimination.
///
/// Returns `None` when the matrix is (numerically) singular.
pub fn invert_matrix(a: &[f64], n: usize) -> Option<Vec<f64>> {
    debug_assert_eq!(a.len(), n * n);
    let tol = pivot_tolerance(a);
    let cols = 2 * n;
    let mut aug = vec![0.0; n * cols];
    for i in 0..n {
        aug[i * cols..i * cols + n].copy_from_slice(&a[i * n..(i + 1) * n]);
        aug[i * cols + n + i] = 1.0;
    }

    for col in 0..n {
        let (max_row, max_val) = (col..n)
            .map(|row| (row, aug[row * cols + col].abs()))
            .fold((col, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if max_val < tol {
            tracing::debug!(col, pivot = max_val, "singular matrix in inversion");
            return None;
        }
        if max_row != col {
            for j in 0..cols {
                aug.swap(col * cols + j, max_row * cols + j);
            }
        }
        let pivot = aug[col * cols + col];
        for j in 0..cols {
            aug[col * cols + j] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row * cols + col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..cols {
                aug[row * cols + j] -= factor * aug[col * cols + j];
            }
        }
    }

    let mut inv = vec![0.0; n * n];
    for i in 0..n {
        inv[i * n..(i + 1) * n].copy_from_slice(&aug[i * cols + n..(i + 1) * cols]);
    }
    Some(inv)
}

/// Weighted least-squares fit of `y` on the columns of `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct WlsFit {
    /// Coefficients, one per column of the design matrix.
    pub coefficients: Vec<f64>,
    /// `(XᵀWX)⁻¹`, row-major p×p.
    pub xtwx_inv: Vec<f64>,
    /// `Σ wᵢ (yᵢ − ŷᵢ)²`.
    pub weighted_rss: f64,
    pub fitted: Vec<f64>,
}

impl WlsFit {
    /// Number of coefficients.
    pub fn p(&self) -> usize {
        self.coefficients.len()
    }

    /// Diagonal element `j` of `(XᵀWX)⁻¹`.
    pub fn inv_diag(&self, j: usize) -> f64 {
        self.xtwx_inv[j * self.p() + j]
    }
}

/// Weighted least squares with design `x` (row-major, `y.len()` rows by `p`
/// columns) and observation weights `w`.
///
/// Returns `None` when `XᵀWX` is singular.
pub fn weighted_least_squares(x: &[f64], y: &[f64], w: &[f64], p: usize) -> Option<WlsFit> {
    let n = y.len();
    debug_assert_eq!(x.len(), n * p);
    debug_assert_eq!(w.len(), n);

    let mut xtwx = vec![0.0; p * p];
    let mut xtwy = vec![0.0; p];
    for i in 0..n {
        let row = &x[i * p..(i + 1) * p];
        for a in 0..p {
            xtwy[a] += w[i] * row[a] * y[i];
            for b in 0..p {
                xtwx[a * p + b] += w[i] * row[a] * row[b];
            }
        }
    }

    let coefficients = solve_linear_system(&xtwx, &xtwy, p)?;
    let xtwx_inv = invert_matrix(&xtwx, p)?;

    let fitted: Vec<f64> = (0..n)
        .map(|i| {
            x[i * p..(i + 1) * p]
                .iter()
                .zip(&coefficients)
                .map(|(xv, c)| xv * c)
                .sum()
        })
        .collect();
    let weighted_rss = (0..n).map(|i| w[i] * (y[i] - fitted[i]).powi(2)).sum();

    Some(WlsFit {
        coefficients,
        xtwx_inv,
        weighted_rss,
        fitted,
    })
}

/// Quadratic form `vᵀ M v` for row-major p×p `m`.
pub fn quadratic_form(m: &[f64], v: &[f64]) -> f64 {
    let p = v.len();
    let mut acc = 0.0;
    for a in 0..p {
        for b in 0..p {
            acc += v[a] * m[a * p + b] * v[b];
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solve_2x2() {
        // 2x + y = 5, x + 3y = 10
        let x = solve_linear_system(&[2.0, 1.0, 1.0, 3.0], &[5.0, 10.0], 2).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn solve_needs_pivoting() {
        let x = solve_linear_system(&[0.0, 1.0, 1.0, 0.0], &[2.0, 3.0], 2).unwrap();
        assert_eq!(x, vec![3.0, 2.0]);
    }

    #[test]
    fn singular_is_none() {
        assert!(solve_linear_system(&[1.0, 2.0, 2.0, 4.0], &[1.0, 2.0], 2).is_none());
        assert!(invert_matrix(&[1.0, 2.0, 2.0, 4.0], 2).is_none());
    }

    #[test]
    fn inverse_times_matrix_is_identity() {
        let a = [4.0, 7.0, 2.0, 6.0];
        let inv = invert_matrix(&a, 2).unwrap();
        let expect = [0.6, -0.7, -0.2, 0.4];
        for (got, want) in inv.iter().zip(expect) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn badly_scaled_columns_still_invert() {
        // Intercept plus a calendar year: large but not collinear.
        let years = [1988.0, 1991.0, 1996.0, 2001.0];
        let x: Vec<f64> = years.iter().flat_map(|&t| [1.0, t]).collect();
        let y = [0.1, 0.2, 0.35, 0.5];
        let fit = weighted_least_squares(&x, &y, &[1.0; 4], 2).unwrap();
        assert!(fit.coefficients[1] > 0.0);
    }

    #[test]
    fn wls_recovers_exact_line() {
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        let x: Vec<f64> = xs.iter().flat_map(|&t| [1.0, t]).collect();
        let y: Vec<f64> = xs.iter().map(|t| 1.5 - 0.5 * t).collect();
        let w = [1.0, 2.0, 3.0, 2.0, 1.0];
        let fit = weighted_least_squares(&x, &y, &w, 2).unwrap();
        assert!((fit.coefficients[0] - 1.5).abs() < 1e-10);
        assert!((fit.coefficients[1] + 0.5).abs() < 1e-10);
        assert!(fit.weighted_rss < 1e-20);
    }

    #[test]
    fn quadratic_form_identity() {
        assert_eq!(quadratic_form(&[1.0, 0.0, 0.0, 1.0], &[3.0, 4.0]), 25.0);
    }
}
