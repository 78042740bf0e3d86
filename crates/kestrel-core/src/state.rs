//! State-vector and error-state index spaces.
//!
//! The nominal state carries the attitude as a unit quaternion; the error
//! state replaces that 4-slot by a 3-vector rotation error, so the error
//! space is one dimension smaller than the nominal space. Everything else
//! lines up slot for slot.

use nalgebra::{SMatrix, SVector};

pub type Scalar = f64;

/// Nominal state indices.
pub mod x {
    /// Quaternion body -> NED, scalar part.
    pub const Q_NB_0: usize = 0;
    pub const Q_NB_1: usize = 1;
    pub const Q_NB_2: usize = 2;
    pub const Q_NB_3: usize = 3;
    /// Velocity in NED (m/s).
    pub const VEL_N: usize = 4;
    pub const VEL_E: usize = 5;
    pub const VEL_D: usize = 6;
    /// Gyroscope bias in the body frame (rad/s).
    pub const GYRO_BIAS_BX: usize = 7;
    pub const GYRO_BIAS_BY: usize = 8;
    pub const GYRO_BIAS_BZ: usize = 9;
    /// Dimensionless accelerometer scale factor.
    pub const ACCEL_SCALE: usize = 10;
    /// Position relative to the origin in NED (m).
    pub const POS_N: usize = 11;
    pub const POS_E: usize = 12;
    pub const POS_D: usize = 13;
    /// Terrain altitude offset relative to the origin (m).
    pub const TERRAIN_ALT: usize = 14;
    /// Additive barometer bias (m).
    pub const BARO_BIAS: usize = 15;

    pub const N: usize = 16;
}

/// Error-state indices. The quaternion is replaced by a rotation-vector
/// error in the navigation frame; all other slots mirror the nominal state.
pub mod xe {
    pub const ROT_N: usize = 0;
    pub const ROT_E: usize = 1;
    pub const ROT_D: usize = 2;
    pub const VEL_N: usize = 3;
    pub const VEL_E: usize = 4;
    pub const VEL_D: usize = 5;
    pub const GYRO_BIAS_N: usize = 6;
    pub const GYRO_BIAS_E: usize = 7;
    pub const GYRO_BIAS_D: usize = 8;
    pub const ACCEL_SCALE: usize = 9;
    pub const POS_N: usize = 10;
    pub const POS_E: usize = 11;
    pub const POS_D: usize = 12;
    pub const TERRAIN_ALT: usize = 13;
    pub const BARO_BIAS: usize = 14;

    pub const N: usize = 15;
}

/// Input indices, from the latest IMU sample.
pub mod u {
    /// Body angular rate (rad/s).
    pub const OMEGA_NB_BX: usize = 0;
    pub const OMEGA_NB_BY: usize = 1;
    pub const OMEGA_NB_BZ: usize = 2;
    /// Body specific force (m/s^2).
    pub const ACCEL_BX: usize = 3;
    pub const ACCEL_BY: usize = 4;
    pub const ACCEL_BZ: usize = 5;

    pub const N: usize = 6;
}

pub type StateVector = SVector<Scalar, { x::N }>;
pub type ErrorVector = SVector<Scalar, { xe::N }>;
pub type InputVector = SVector<Scalar, { u::N }>;
pub type Covariance = SMatrix<Scalar, { xe::N }, { xe::N }>;

/// Covariance diagonal floor.
pub const P_MIN: Scalar = 1e-6;

/// Covariance magnitude ceiling.
pub const P_MAX: Scalar = 1e9;

/// Saturation limits applied to the nominal state by Bound-X.
///
/// Quaternion components are bounded at 2 so that saturation does not change
/// the direction of the attitude; prediction renormalizes. Gyro-bias slots
/// carry equal bounds, which Bound-X treats as inactive (the bias is only
/// scrubbed when non-finite).
pub const X_LOWER: [Scalar; x::N] = [
    -2.0, -2.0, -2.0, -2.0, // q_nb
    -100.0, -100.0, -100.0, // vel
    0.0, 0.0, 0.0, // gyro bias
    0.8, // accel scale
    -1e9, -1e9, -1e9, // pos
    -1e6, // terrain alt
    -1e6, // baro bias
];

pub const X_UPPER: [Scalar; x::N] = [
    2.0, 2.0, 2.0, 2.0, // q_nb
    100.0, 100.0, 100.0, // vel
    0.0, 0.0, 0.0, // gyro bias
    1.5, // accel scale
    1e9, 1e9, 1e9, // pos
    1e6, // terrain alt
    1e6, // baro bias
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_space_is_one_smaller() {
        assert_eq!(xe::N, x::N - 1);
    }

    #[test]
    fn test_index_spaces_line_up() {
        // The quaternion occupies one extra slot, so every index after the
        // attitude block is shifted by one between the two spaces.
        assert_eq!(x::VEL_N - 1, xe::VEL_N);
        assert_eq!(x::GYRO_BIAS_BX - 1, xe::GYRO_BIAS_N);
        assert_eq!(x::ACCEL_SCALE - 1, xe::ACCEL_SCALE);
        assert_eq!(x::POS_N - 1, xe::POS_N);
        assert_eq!(x::TERRAIN_ALT - 1, xe::TERRAIN_ALT);
        assert_eq!(x::BARO_BIAS - 1, xe::BARO_BIAS);
    }

    #[test]
    fn test_bounds_cover_state() {
        assert_eq!(X_LOWER.len(), x::N);
        assert_eq!(X_UPPER.len(), x::N);
        for i in 0..x::N {
            assert!(X_LOWER[i] <= X_UPPER[i]);
        }
    }
}
