//! Generic Kalman correction kernel shared by every measurement model.

use nalgebra::{SMatrix, SVector};

use crate::state::{xe, Covariance, ErrorVector, Scalar};

/// Mahalanobis-squared innovation gate thresholds, indexed by measurement
/// dimension. Chi-squared tail values for the dimensions this filter uses.
pub const BETA_TABLE: [Scalar; 7] = [
    0.0,
    8.820_505_182_14,
    12.094_592_431,
    13.236_961_207_8,
    16.087_564_229_6,
    17.879_770_065_8,
    20.0,
];

/// Result of a generic correction: the error-state update, the covariance
/// increment and the innovation-gate statistic.
pub struct Correction {
    pub dxe: ErrorVector,
    pub dp: Covariance,
    pub beta: Scalar,
}

/// Standard-form Kalman correction.
///
/// `S = H P H^T + R`, `K = P H^T S^-1`, `dxe = K r`, `dP = -K H P` and
/// `beta = r^T S^-1 r`. Symmetrization of `P + dP` is left to the caller.
/// Returns `None` when the innovation covariance is not invertible.
pub fn kalman_correct<const M: usize>(
    p: &Covariance,
    h: &SMatrix<Scalar, M, { xe::N }>,
    r_cov: &SMatrix<Scalar, M, M>,
    residual: &SVector<Scalar, M>,
) -> Option<Correction> {
    let s = h * p * h.transpose() + r_cov;
    let s_inv = s.try_inverse()?;

    let k = p * h.transpose() * s_inv;
    let dxe = k * residual;
    let dp = -(k * h * p);
    let beta = (residual.transpose() * s_inv * residual)[(0, 0)];

    Some(Correction { dxe, dp, beta })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn diagonal_p(value: Scalar) -> Covariance {
        Covariance::identity() * value
    }

    #[test]
    fn test_zero_residual_zero_update() {
        let p = diagonal_p(4.0);
        let mut h = SMatrix::<Scalar, 1, { xe::N }>::zeros();
        h[(0, xe::POS_D)] = -1.0;
        let r_cov = SMatrix::<Scalar, 1, 1>::new(2.0);
        let residual = SVector::<Scalar, 1>::zeros();

        let c = kalman_correct(&p, &h, &r_cov, &residual).unwrap();
        assert_relative_eq!(c.dxe.norm(), 0.0);
        assert_relative_eq!(c.beta, 0.0);
        // Covariance still contracts along the observed axis.
        assert!(c.dp[(xe::POS_D, xe::POS_D)] < 0.0);
    }

    #[test]
    fn test_scalar_gain_matches_closed_form() {
        let p = diagonal_p(4.0);
        let mut h = SMatrix::<Scalar, 1, { xe::N }>::zeros();
        h[(0, xe::BARO_BIAS)] = 1.0;
        let r_cov = SMatrix::<Scalar, 1, 1>::new(1.0);
        let residual = SVector::<Scalar, 1>::new(10.0);

        let c = kalman_correct(&p, &h, &r_cov, &residual).unwrap();
        // K = P / (P + R) = 0.8
        assert_relative_eq!(c.dxe[xe::BARO_BIAS], 8.0, epsilon = 1e-12);
        assert_relative_eq!(c.dp[(xe::BARO_BIAS, xe::BARO_BIAS)], -3.2, epsilon = 1e-12);
        assert_relative_eq!(c.beta, 100.0 / 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unobserved_slots_untouched() {
        let p = diagonal_p(1.0);
        let mut h = SMatrix::<Scalar, 1, { xe::N }>::zeros();
        h[(0, xe::POS_N)] = 1.0;
        let r_cov = SMatrix::<Scalar, 1, 1>::new(1.0);
        let residual = SVector::<Scalar, 1>::new(3.0);

        let c = kalman_correct(&p, &h, &r_cov, &residual).unwrap();
        // No cross covariance, so only the observed slot moves.
        for i in 0..xe::N {
            if i != xe::POS_N {
                assert_relative_eq!(c.dxe[i], 0.0);
            }
        }
    }

    #[test]
    fn test_singular_innovation_rejected() {
        let p = Covariance::zeros();
        let h = SMatrix::<Scalar, 1, { xe::N }>::zeros();
        let r_cov = SMatrix::<Scalar, 1, 1>::zeros();
        let residual = SVector::<Scalar, 1>::new(1.0);

        assert!(kalman_correct(&p, &h, &r_cov, &residual).is_none());
    }
}
