//! Non-negative least squares on normal equations.
//!
//! Solves `min ||A x - y||` subject to `x >= 0` given only `AᵀA` and `Aᵀy`,
//! with the active set method of Lawson and Hanson.
use base::FitError;
use nalgebra::{DMatrix, DVector};

/// Failure of [`nnls`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SolveError {
    /// The system restricted to the passive set is not positive definite.
    #[error("normal matrix is singular on the passive set")]
    Singular,
    /// The right-hand side does not match the matrix.
    #[error("{rows}x{cols} matrix with a right-hand side of {len} entries")]
    Dimension { rows: usize, cols: usize, len: usize },
    /// The active set kept changing.
    #[error("active set iteration did not converge")]
    NotConverged,
}

impl From<SolveError> for FitError {
    fn from(err: SolveError) -> Self {
        FitError::new(
            base::error::FitErrorKind::Numerical,
            "Non-negative least squares failed",
            Some(Box::new(err)),
        )
    }
}

/// Solves the non-negative least squares problem given by the normal
/// equations `ata x = atb`.
pub fn nnls(ata: &DMatrix<f64>, atb: &DVector<f64>) -> Result<DVector<f64>, SolveError> {
    let n = atb.len();
    if ata.nrows() != n || ata.ncols() != n {
        return Err(SolveError::Dimension {
            rows: ata.nrows(),
            cols: ata.ncols(),
            len: n,
        });
    }
    let mut x = DVector::<f64>::zeros(n);
    if n == 0 {
        return Ok(x);
    }

    let scale = ata.diagonal().amax().max(atb.amax());
    if scale == 0.0 {
        return Ok(x);
    }
    let tol = 10.0 * f64::EPSILON * n as f64 * scale;
    let max_iterations = 3 * n;

    let mut passive = vec![false; n];
    // Variables whose last admission was immediately undone.
    let mut blocked = vec![false; n];
    let mut iterations = 0;

    loop {
        let gradient = atb - ata * &x;
        let candidate = (0..n)
            .filter(|&j| !passive[j] && !blocked[j] && gradient[j] > tol)
            .max_by(|&a, &b| gradient[a].total_cmp(&gradient[b]));
        let Some(j) = candidate else {
            break;
        };
        iterations += 1;
        if iterations > max_iterations {
            return Err(SolveError::NotConverged);
        }
        passive[j] = true;

        // Each step below drops at least one variable, so this terminates.
        let mut admitted = true;
        loop {
            let z = solve_passive(ata, atb, &passive)?;
            if admitted && z[j] <= 0.0 {
                // Round-off: the admitted variable cannot move.
                passive[j] = false;
                blocked[j] = true;
                break;
            }
            admitted = false;
            if (0..n).all(|i| !passive[i] || z[i] > 0.0) {
                x = z;
                blocked.iter_mut().for_each(|b| *b = false);
                break;
            }
            // Step towards z until the first passive variable hits zero.
            let mut alpha = f64::INFINITY;
            let mut leaving = j;
            for i in (0..n).filter(|&i| passive[i] && z[i] <= 0.0) {
                let denom = x[i] - z[i];
                let a = if denom > 0.0 { x[i] / denom } else { 0.0 };
                if a < alpha {
                    alpha = a;
                    leaving = i;
                }
            }
            x += (&z - &x) * alpha;
            x[leaving] = 0.0;
            for i in 0..n {
                if passive[i] && x[i] <= 0.0 {
                    passive[i] = false;
                    x[i] = 0.0;
                }
            }
        }
    }
    Ok(x)
}

/// Unconstrained solution on the passive set, zero elsewhere.
fn solve_passive(ata: &DMatrix<f64>, atb: &DVector<f64>, passive: &[bool]) -> Result<DVector<f64>, SolveError> {
    let indices: Vec<usize> = (0..passive.len()).filter(|&i| passive[i]).collect();
    let k = indices.len();
    let sub = DMatrix::from_fn(k, k, |r, c| ata[(indices[r], indices[c])]);
    let rhs = DVector::from_fn(k, |r, _| atb[indices[r]]);
    let chol = sub.cholesky().ok_or(SolveError::Singular)?;
    let solved = chol.solve(&rhs);
    let mut z = DVector::zeros(passive.len());
    for (r, &i) in indices.iter().enumerate() {
        z[i] = solved[r];
    }
    Ok(z)
}
