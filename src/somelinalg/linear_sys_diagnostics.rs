use log::warn;
use nalgebra::{DMatrix, DVector};

/// The condition number of a matrix is the ratio of its largest singular value to the smallest one.
/// Returns infinity for a singular matrix.
pub fn condition_number(A: &DMatrix<f64>) -> f64 {
    let singular_values = A.singular_values();
    let max_sigma = singular_values.max();
    let min_sigma = singular_values.min();
    if min_sigma == 0.0 {
        f64::INFINITY
    } else {
        max_sigma / min_sigma
    }
}

/// A system of linear equations is poorly conditioned if the solution is sensitive to small
/// changes in the input data, i.e. the condition number exceeds `threshold`
pub fn poorly_conditioned(A: &DMatrix<f64>, threshold: f64) -> bool {
    let condition_number = condition_number(A);
    let poorly_conditioned = !(condition_number <= threshold);
    if poorly_conditioned {
        warn!(
            "The system of linear equations is poorly conditioned. Condition number = {:.2e}",
            condition_number
        );
    }
    poorly_conditioned
}

pub fn is_finite_solution(x: &DVector<f64>) -> bool {
    x.iter().all(|v| v.is_finite())
}

/// LU solution of `A x = b`; None if the factorization breaks down or the solution is not finite
pub fn lu_solve_checked(A: DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let x = A.lu().solve(b)?;
    if is_finite_solution(&x) {
        Some(x)
    } else {
        warn!("LU solution contains NaN or infinite entries");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// famous example of ill-conditioned matrix
    fn hilbert_matrix(n: usize) -> DMatrix<f64> {
        DMatrix::from_fn(n, n, |i, j| 1.0 / (i as f64 + j as f64 + 1.0))
    }

    #[test]
    fn test_poorly_conditioned() {
        let A = DMatrix::from_vec(2, 2, vec![1.0, 1.0, 1.00001, 1.0]);
        assert!(poorly_conditioned(&A, 1e5));
        assert!(!poorly_conditioned(&DMatrix::identity(3, 3), 1e5));
    }

    #[test]
    fn test_poorly_conditioned_hilbert() {
        let A = hilbert_matrix(6);
        assert!(poorly_conditioned(&A, 1e5));
    }

    #[test]
    fn test_lu_solve_checked() {
        let A = DMatrix::from_vec(2, 2, vec![4.0, 1.0, 1.0, 3.0]);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let x = lu_solve_checked(A.clone(), &b).unwrap();
        assert_relative_eq!(&A * &x, b, epsilon = 1e-12);
        let singular = DMatrix::from_vec(2, 2, vec![1.0, 2.0, 2.0, 4.0]);
        assert!(lu_solve_checked(singular, &b).is_none());
    }

    #[test]
    fn test_is_finite_solution() {
        assert!(is_finite_solution(&DVector::from_vec(vec![1.0, -2.0])));
        assert!(!is_finite_solution(&DVector::from_vec(vec![1.0, f64::NAN])));
    }
}
