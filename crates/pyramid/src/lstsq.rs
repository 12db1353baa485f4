//! Least squares for the startup calibration fit.

use nalgebra::DMatrix;
use thiserror::Error;

/// Singular values below `max_singular_value * RELATIVE_TOLERANCE` count as zero.
pub const RELATIVE_TOLERANCE: f64 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LeastSquaresError {
    #[error("system has {rows} rows but {rhs_rows} right-hand side rows")]
    ShapeMismatch { rows: usize, rhs_rows: usize },
    #[error("system is rank deficient (rank {rank}, need at least {required})")]
    RankDeficient { rank: usize, required: usize },
    #[error("svd solve failed: {0}")]
    Solve(&'static str),
}

/// Minimum-norm least squares solution `x` of `a * x ≈ b` via SVD.
///
/// Fails when the numerical rank of `a` is below `min_rank`. The
/// correspondence systems used for calibration are rank 3 (affine maps of
/// a plane), so an ill-posed set of calibration points shows up here.
pub fn least_squares(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    min_rank: usize,
) -> Result<DMatrix<f64>, LeastSquaresError> {
    if a.nrows() != b.nrows() {
        return Err(LeastSquaresError::ShapeMismatch {
            rows: a.nrows(),
            rhs_rows: b.nrows(),
        });
    }

    let svd = a.clone().svd(true, true);
    let tolerance = svd.singular_values.max() * RELATIVE_TOLERANCE;

    let rank = svd.rank(tolerance);
    if rank < min_rank {
        return Err(LeastSquaresError::RankDeficient {
            rank,
            required: min_rank,
        });
    }

    svd.solve(b, tolerance).map_err(LeastSquaresError::Solve)
}
