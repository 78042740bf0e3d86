//! Invariant extended Kalman filter for strapdown inertial navigation.
//!
//! The filter keeps a nominal state with a unit-quaternion attitude and a
//! 15-dimensional error state in which the attitude error is the vector part
//! of a small quaternion expressed in the navigation frame. Corrections are
//! injected by left quaternion multiplication, `q <- dq * q`, which is what
//! makes this an invariant rather than a classical multiplicative EKF. The
//! small-quaternion convention puts a factor of 2 on every rotation block of
//! the Jacobians; it has to match the injection and is carried end to end.
//!
//! One IMU message drives prediction followed by the accelerometer,
//! magnetometer and barometer corrections, then an output projection. GNSS
//! samples arrive asynchronously and drive a position/velocity correction.
//! All storage is fixed-size; the filter never allocates after construction.

use log::{debug, info, warn};
use nalgebra::{Matrix3, Quaternion, SMatrix, SVector, UnitQuaternion, Vector3};

use crate::kalman::{kalman_correct, BETA_TABLE};
use crate::msgs::{
    Attitude, ControlState, EstimatorStatus, GlobalPosition, GnssSample, LocalPosition,
    NavOutputs, SensorCombined,
};
use crate::origin::Origin;
use crate::state::{
    u, x, xe, Covariance, ErrorVector, InputVector, Scalar, StateVector, P_MAX, P_MIN, X_LOWER,
    X_UPPER,
};

/// Quaternion norm drift beyond which prediction renormalizes in place.
const QUAT_NORM_TOL: Scalar = 1e-3;

/// Specific-force norm deviation (m/s^2) beyond which the accelerometer
/// stops being treated as a gravity reference.
const ACCEL_DISTURBANCE_GATE: Scalar = 1.0;

/// Minimum satellites and fix type for a usable GNSS sample.
const GNSS_MIN_SATELLITES: u8 = 6;
const GNSS_MIN_FIX_TYPE: u8 = 3;

/// Outcome of a single sensor correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorrectStatus {
    /// Update applied, innovation inside the gate.
    Applied,
    /// Innovation gate exceeded; fault logged, update still applied.
    Gated(Scalar),
    /// Sample timestamp not newer than the previous one.
    Stale,
    /// GNSS quality below the satellite/fix threshold.
    NoFix,
    /// Accelerometer norm too far from gravity.
    Accelerating,
    /// Innovation covariance not invertible; update skipped.
    Singular,
}

/// Everything one IMU tick produces: the projected outputs plus the
/// per-sensor correction outcomes.
#[derive(Debug, Clone, Copy)]
pub struct ImuOutcome {
    pub outputs: NavOutputs,
    pub accel: CorrectStatus,
    pub mag: CorrectStatus,
    pub baro: CorrectStatus,
}

pub struct Iekf {
    /// Nominal state.
    x: StateVector,
    /// Error-state covariance.
    p: Covariance,
    /// Latest IMU input.
    u: InputVector,
    /// Gravity in NED (m/s^2).
    g_n: Vector3<Scalar>,
    /// Magnetic field reference in NED (gauss); only its direction is used.
    b_n: Vector3<Scalar>,
    origin: Origin,
    /// Drop corrections whose innovation breaches the gate instead of
    /// applying them. Off by default: a breach is logged and the update
    /// still applied.
    reject_on_fault: bool,
    timestamp_accel: u64,
    timestamp_mag: u64,
    timestamp_baro: u64,
    timestamp_gps: u64,
}

impl Default for Iekf {
    fn default() -> Self {
        Self::new()
    }
}

impl Iekf {
    pub fn new() -> Self {
        let mut xv = StateVector::zeros();
        xv[x::Q_NB_0] = 1.0;
        xv[x::ACCEL_SCALE] = 1.0;

        let mut p = Covariance::zeros();
        p[(xe::ROT_N, xe::ROT_N)] = 10.0;
        p[(xe::ROT_E, xe::ROT_E)] = 10.0;
        p[(xe::ROT_D, xe::ROT_D)] = 100.0;
        p[(xe::VEL_N, xe::VEL_N)] = 1e9;
        p[(xe::VEL_E, xe::VEL_E)] = 1e9;
        p[(xe::VEL_D, xe::VEL_D)] = 1e9;
        p[(xe::GYRO_BIAS_N, xe::GYRO_BIAS_N)] = 1e-3;
        p[(xe::GYRO_BIAS_E, xe::GYRO_BIAS_E)] = 1e-3;
        p[(xe::GYRO_BIAS_D, xe::GYRO_BIAS_D)] = 1e-3;
        p[(xe::ACCEL_SCALE, xe::ACCEL_SCALE)] = 1e-1;
        p[(xe::POS_N, xe::POS_N)] = 1e9;
        p[(xe::POS_E, xe::POS_E)] = 1e9;
        p[(xe::POS_D, xe::POS_D)] = 1e9;
        p[(xe::TERRAIN_ALT, xe::TERRAIN_ALT)] = 1e9;
        p[(xe::BARO_BIAS, xe::BARO_BIAS)] = 1e9;

        Self {
            x: xv,
            p,
            u: InputVector::zeros(),
            g_n: Vector3::new(0.0, 0.0, -9.8),
            b_n: Vector3::new(0.21523, 0.00771, -0.42741),
            origin: Origin::new(),
            reject_on_fault: false,
            timestamp_accel: 0,
            timestamp_mag: 0,
            timestamp_baro: 0,
            timestamp_gps: 0,
        }
    }

    pub fn state(&self) -> &StateVector {
        &self.x
    }

    pub fn covariance(&self) -> &Covariance {
        &self.p
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Reject gated updates instead of applying them.
    pub fn set_reject_on_fault(&mut self, reject: bool) {
        self.reject_on_fault = reject;
    }

    fn q_nb(&self) -> Quaternion<Scalar> {
        Quaternion::new(
            self.x[x::Q_NB_0],
            self.x[x::Q_NB_1],
            self.x[x::Q_NB_2],
            self.x[x::Q_NB_3],
        )
    }

    /// Continuous-time state derivative.
    pub fn dynamics(&self, xv: &StateVector, uv: &InputVector) -> StateVector {
        let q_nb = Quaternion::new(
            xv[x::Q_NB_0],
            xv[x::Q_NB_1],
            xv[x::Q_NB_2],
            xv[x::Q_NB_3],
        );
        let a_b = Vector3::new(uv[u::ACCEL_BX], uv[u::ACCEL_BY], uv[u::ACCEL_BZ]);
        let as_n = rotate_to_nav(&q_nb, &(a_b / xv[x::ACCEL_SCALE])) - self.g_n;
        let gyro_bias_b = Vector3::new(
            xv[x::GYRO_BIAS_BX],
            xv[x::GYRO_BIAS_BY],
            xv[x::GYRO_BIAS_BZ],
        );
        let omega_nb_b = Vector3::new(
            uv[u::OMEGA_NB_BX],
            uv[u::OMEGA_NB_BY],
            uv[u::OMEGA_NB_BZ],
        );
        let dq_nb = q_nb * Quaternion::from_imag(omega_nb_b - gyro_bias_b) * 0.5;

        let mut dx = StateVector::zeros();
        dx[x::Q_NB_0] = dq_nb.w;
        dx[x::Q_NB_1] = dq_nb.i;
        dx[x::Q_NB_2] = dq_nb.j;
        dx[x::Q_NB_3] = dq_nb.k;
        dx[x::VEL_N] = as_n.x;
        dx[x::VEL_E] = as_n.y;
        dx[x::VEL_D] = as_n.z;
        dx[x::POS_N] = xv[x::VEL_N];
        dx[x::POS_E] = xv[x::VEL_E];
        dx[x::POS_D] = xv[x::VEL_D];
        // Biases, scale, terrain and baro bias are random constants.
        dx
    }

    /// Forward-Euler propagation of state and covariance over `dt` seconds.
    pub fn predict(&mut self, dt: Scalar) {
        let mut q_nb = self.q_nb();
        if (q_nb.norm() - 1.0).abs() > QUAT_NORM_TOL {
            debug!("normalizing quaternion, norm was {:.4}", q_nb.norm());
            q_nb = q_nb.normalize();
            self.x[x::Q_NB_0] = q_nb.w;
            self.x[x::Q_NB_1] = q_nb.i;
            self.x[x::Q_NB_2] = q_nb.j;
            self.x[x::Q_NB_3] = q_nb.k;
        }

        let a_b = Vector3::new(self.u[u::ACCEL_BX], self.u[u::ACCEL_BY], self.u[u::ACCEL_BZ]);
        let j_a_n = rotate_to_nav(&q_nb, &(a_b / self.x[x::ACCEL_SCALE]));

        let omega_nb_b = Vector3::new(
            self.u[u::OMEGA_NB_BX],
            self.u[u::OMEGA_NB_BY],
            self.u[u::OMEGA_NB_BZ],
        );
        let gyro_bias_b = Vector3::new(
            self.x[x::GYRO_BIAS_BX],
            self.x[x::GYRO_BIAS_BY],
            self.x[x::GYRO_BIAS_BZ],
        );
        let j_omega_n = rotate_to_nav(&q_nb, &(omega_nb_b - gyro_bias_b));

        // Error-state Jacobian. The rotation error is the vector part of a
        // small quaternion, hence the factors of 2 and the -1/2 bias block.
        let mut a = Covariance::zeros();
        a[(xe::ROT_N, xe::GYRO_BIAS_N)] = -0.5;
        a[(xe::ROT_E, xe::GYRO_BIAS_E)] = -0.5;
        a[(xe::ROT_D, xe::GYRO_BIAS_D)] = -0.5;
        a.fixed_view_mut::<3, 3>(xe::VEL_N, xe::ROT_N)
            .copy_from(&(-skew(&j_a_n) * 2.0));
        for i in 0..3 {
            a[(xe::VEL_N + i, xe::ACCEL_SCALE)] = -j_a_n[i];
        }
        a.fixed_view_mut::<3, 3>(xe::GYRO_BIAS_N, xe::ROT_N)
            .copy_from(&skew(&j_omega_n));
        a[(xe::POS_N, xe::VEL_N)] = 1.0;
        a[(xe::POS_E, xe::VEL_E)] = 1.0;
        a[(xe::POS_D, xe::VEL_D)] = 1.0;

        let dx = self.dynamics(&self.x, &self.u) * dt;
        self.x += dx;
        self.bound_x();

        let dp = (a * self.p + self.p * a.transpose() + process_noise()) * dt;
        self.set_p(self.p + dp);
    }

    /// One IMU tick: prediction, then the accel, mag and baro corrections,
    /// then the output projection.
    pub fn handle_imu(&mut self, msg: &SensorCombined) -> ImuOutcome {
        self.u[u::OMEGA_NB_BX] = msg.gyro_rad[0];
        self.u[u::OMEGA_NB_BY] = msg.gyro_rad[1];
        self.u[u::OMEGA_NB_BZ] = msg.gyro_rad[2];
        self.u[u::ACCEL_BX] = msg.accelerometer_m_s2[0];
        self.u[u::ACCEL_BY] = msg.accelerometer_m_s2[1];
        self.u[u::ACCEL_BZ] = msg.accelerometer_m_s2[2];

        if msg.gyro_integral_dt > 0.0 {
            self.predict(msg.gyro_integral_dt);
        }

        let accel = self.correct_accel(msg);
        let mag = self.correct_mag(msg);
        let baro = self.correct_baro(msg);

        ImuOutcome {
            outputs: self.outputs(msg.timestamp),
            accel,
            mag,
            baro,
        }
    }

    /// Accelerometer-as-gravity correction. Informs roll and pitch only.
    pub fn correct_accel(&mut self, msg: &SensorCombined) -> CorrectStatus {
        let t_new = offset_timestamp(msg.timestamp, msg.accelerometer_timestamp_relative);
        let dt = match sample_dt(&mut self.timestamp_accel, t_new) {
            Some(dt) => dt,
            None => return CorrectStatus::Stale,
        };

        let y_b = Vector3::new(
            msg.accelerometer_m_s2[0],
            msg.accelerometer_m_s2[1],
            msg.accelerometer_m_s2[2],
        );
        let scaled = y_b / self.x[x::ACCEL_SCALE];

        // The vehicle is accelerating; gravity direction is unobservable.
        if (scaled.norm() - self.g_n.norm()).abs() > ACCEL_DISTURBANCE_GATE {
            return CorrectStatus::Accelerating;
        }

        let q_nb = self.q_nb();
        let residual = rotate_to_nav(&q_nb, &scaled) - self.g_n;

        let r_cov = Matrix3::from_diagonal_element(1.0 / dt);

        let mut h = SMatrix::<Scalar, 3, { xe::N }>::zeros();
        h.fixed_view_mut::<3, 3>(0, xe::ROT_N)
            .copy_from(&(skew(&self.g_n.normalize()) * 2.0));

        let c = match kalman_correct(&self.p, &h, &r_cov, &residual) {
            Some(c) => c,
            None => {
                warn!("accel innovation covariance singular");
                return CorrectStatus::Singular;
            }
        };

        let status = if c.beta > BETA_TABLE[3] {
            warn!("accel fault, beta = {:.1}", c.beta);
            CorrectStatus::Gated(c.beta)
        } else {
            CorrectStatus::Applied
        };
        if self.reject_on_fault {
            if let CorrectStatus::Gated(_) = status {
                return status;
            }
        }

        // Gravity carries no yaw information.
        let mut dxe = c.dxe;
        dxe[xe::ROT_D] = 0.0;

        self.apply_error_correction(&dxe);
        self.set_p(self.p + c.dp);
        status
    }

    /// Magnetometer direction correction. Informs yaw only.
    pub fn correct_mag(&mut self, msg: &SensorCombined) -> CorrectStatus {
        let t_new = offset_timestamp(msg.timestamp, msg.magnetometer_timestamp_relative);
        let dt = match sample_dt(&mut self.timestamp_mag, t_new) {
            Some(dt) => dt,
            None => return CorrectStatus::Stale,
        };

        let y_b = Vector3::new(
            msg.magnetometer_ga[0],
            msg.magnetometer_ga[1],
            msg.magnetometer_ga[2],
        )
        .normalize();
        let b_unit = self.b_n.normalize();

        let q_nb = self.q_nb();
        let residual = rotate_to_nav(&q_nb, &y_b) - b_unit;

        // The third axis is deliberately noisy so the magnetometer cannot
        // pull roll and pitch.
        let r_cov = Matrix3::from_diagonal(&Vector3::new(1.0 / dt, 1.0 / dt, 100.0 / dt));

        let mut h = SMatrix::<Scalar, 3, { xe::N }>::zeros();
        h.fixed_view_mut::<3, 3>(0, xe::ROT_N)
            .copy_from(&(skew(&b_unit) * 2.0));

        let c = match kalman_correct(&self.p, &h, &r_cov, &residual) {
            Some(c) => c,
            None => {
                warn!("mag innovation covariance singular");
                return CorrectStatus::Singular;
            }
        };

        let status = if c.beta > BETA_TABLE[3] {
            warn!("mag fault, beta = {:.1}", c.beta);
            CorrectStatus::Gated(c.beta)
        } else {
            CorrectStatus::Applied
        };
        if self.reject_on_fault {
            if let CorrectStatus::Gated(_) = status {
                return status;
            }
        }

        let mut dxe = c.dxe;
        dxe[xe::ROT_N] = 0.0;
        dxe[xe::ROT_E] = 0.0;

        self.apply_error_correction(&dxe);
        self.set_p(self.p + c.dp);
        status
    }

    /// Barometric altitude correction against down position and baro bias.
    pub fn correct_baro(&mut self, msg: &SensorCombined) -> CorrectStatus {
        let t_new = offset_timestamp(msg.timestamp, msg.baro_timestamp_relative);
        let dt = match sample_dt(&mut self.timestamp_baro, t_new) {
            Some(dt) => dt,
            None => return CorrectStatus::Stale,
        };

        let y = msg.baro_alt_meter;
        let yh = -self.x[x::POS_D] + self.x[x::BARO_BIAS] - self.origin.alt();
        let residual = SVector::<Scalar, 1>::new(y - yh);

        let r_cov = SMatrix::<Scalar, 1, 1>::new(10.0 / dt);

        let mut h = SMatrix::<Scalar, 1, { xe::N }>::zeros();
        h[(0, xe::POS_D)] = -1.0;
        h[(0, xe::BARO_BIAS)] = 1.0;

        let c = match kalman_correct(&self.p, &h, &r_cov, &residual) {
            Some(c) => c,
            None => {
                warn!("baro innovation covariance singular");
                return CorrectStatus::Singular;
            }
        };

        let status = if c.beta > BETA_TABLE[1] {
            warn!("baro fault, beta = {:.1}", c.beta);
            CorrectStatus::Gated(c.beta)
        } else {
            CorrectStatus::Applied
        };
        if self.reject_on_fault {
            if let CorrectStatus::Gated(_) = status {
                return status;
            }
        }

        self.apply_error_correction(&c.dxe);
        self.set_p(self.p + c.dp);
        status
    }

    /// GNSS position/velocity correction. The first accepted fix latches
    /// the origin. Attitude is never corrected from GNSS in this variant.
    pub fn handle_gnss(&mut self, msg: &GnssSample) -> CorrectStatus {
        if msg.satellites_used < GNSS_MIN_SATELLITES || msg.fix_type < GNSS_MIN_FIX_TYPE {
            return CorrectStatus::NoFix;
        }
        if sample_dt(&mut self.timestamp_gps, msg.timestamp).is_none() {
            return CorrectStatus::Stale;
        }

        let lat_deg = f64::from(msg.lat) * 1e-7;
        let lon_deg = f64::from(msg.lon) * 1e-7;
        let alt_m = f64::from(msg.alt) * 1e-3;

        if !self.origin.xy_initialized() {
            info!("gnss map ref init {:.6} {:.6}", lat_deg, lon_deg);
            self.origin.xy_initialize(lat_deg, lon_deg, msg.timestamp);
        }
        if !self.origin.alt_initialized() {
            info!("gnss alt init {:.2}", alt_m);
            self.origin.alt_initialize(alt_m, msg.timestamp);
        }

        let (pos_n, pos_e, pos_d) = self.origin.global_to_local(lat_deg, lon_deg, alt_m);

        let mut residual = SVector::<Scalar, 6>::zeros();
        residual[0] = pos_n - self.x[x::POS_N];
        residual[1] = pos_e - self.x[x::POS_E];
        residual[2] = pos_d - self.x[x::POS_D];
        residual[3] = msg.vel_n_m_s - self.x[x::VEL_N];
        residual[4] = msg.vel_e_m_s - self.x[x::VEL_E];
        residual[5] = msg.vel_d_m_s - self.x[x::VEL_D];

        let r_cov = SMatrix::<Scalar, 6, 6>::identity();

        let mut h = SMatrix::<Scalar, 6, { xe::N }>::zeros();
        for i in 0..3 {
            h[(i, xe::POS_N + i)] = 1.0;
            h[(3 + i, xe::VEL_N + i)] = 1.0;
        }

        let c = match kalman_correct(&self.p, &h, &r_cov, &residual) {
            Some(c) => c,
            None => {
                warn!("gnss innovation covariance singular");
                return CorrectStatus::Singular;
            }
        };

        let status = if c.beta > BETA_TABLE[6] {
            warn!("gnss fault, beta = {:.1}", c.beta);
            CorrectStatus::Gated(c.beta)
        } else {
            CorrectStatus::Applied
        };
        if self.reject_on_fault {
            if let CorrectStatus::Gated(_) = status {
                return status;
            }
        }

        let mut dxe = c.dxe;
        dxe[xe::ROT_N] = 0.0;
        dxe[xe::ROT_E] = 0.0;
        dxe[xe::ROT_D] = 0.0;

        self.apply_error_correction(&dxe);
        self.set_p(self.p + c.dp);
        status
    }

    /// Inject an error-state correction into the nominal state.
    ///
    /// The attitude update is the left quaternion multiplication
    /// `q <- (1 + dq) * q` with `dq` the small quaternion `(0, d_theta)`.
    /// The gyro-bias correction arrives in the navigation frame and is
    /// rotated into the body frame; the accel-scale correction is
    /// multiplicative. Everything else adds slot for slot.
    pub fn apply_error_correction(&mut self, dxe: &ErrorVector) {
        let q_nb = self.q_nb();
        let d_q_nb = Quaternion::from_imag(Vector3::new(
            dxe[xe::ROT_N],
            dxe[xe::ROT_E],
            dxe[xe::ROT_D],
        )) * q_nb;
        let d_gyro_bias_b = rotate_to_body(
            &q_nb,
            &Vector3::new(
                dxe[xe::GYRO_BIAS_N],
                dxe[xe::GYRO_BIAS_E],
                dxe[xe::GYRO_BIAS_D],
            ),
        );

        let mut dx = StateVector::zeros();
        dx[x::Q_NB_0] = d_q_nb.w;
        dx[x::Q_NB_1] = d_q_nb.i;
        dx[x::Q_NB_2] = d_q_nb.j;
        dx[x::Q_NB_3] = d_q_nb.k;
        dx[x::VEL_N] = dxe[xe::VEL_N];
        dx[x::VEL_E] = dxe[xe::VEL_E];
        dx[x::VEL_D] = dxe[xe::VEL_D];
        dx[x::GYRO_BIAS_BX] = d_gyro_bias_b.x;
        dx[x::GYRO_BIAS_BY] = d_gyro_bias_b.y;
        dx[x::GYRO_BIAS_BZ] = d_gyro_bias_b.z;
        dx[x::ACCEL_SCALE] = self.x[x::ACCEL_SCALE] * dxe[xe::ACCEL_SCALE];
        dx[x::POS_N] = dxe[xe::POS_N];
        dx[x::POS_E] = dxe[xe::POS_E];
        dx[x::POS_D] = dxe[xe::POS_D];
        dx[x::TERRAIN_ALT] = dxe[xe::TERRAIN_ALT];
        dx[x::BARO_BIAS] = dxe[xe::BARO_BIAS];

        self.x += dx;
        self.bound_x();
    }

    /// Scrub non-finite state elements and saturate each slot to its bounds.
    /// Slots whose lower and upper bounds coincide are only scrubbed.
    fn bound_x(&mut self) {
        for i in 0..x::N {
            if !self.x[i].is_finite() {
                warn!("x({}) non-finite, setting to 0", i);
                self.x[i] = 0.0;
            }
            if X_LOWER[i] < X_UPPER[i] {
                if self.x[i] < X_LOWER[i] {
                    self.x[i] = X_LOWER[i];
                } else if self.x[i] > X_UPPER[i] {
                    self.x[i] = X_UPPER[i];
                }
            }
        }
    }

    /// Install a new covariance: scrub non-finite entries, clamp magnitudes,
    /// floor the diagonal and mirror the upper triangle into the lower.
    fn set_p(&mut self, p_new: Covariance) {
        self.p = p_new;
        for i in 0..xe::N {
            for j in 0..=i {
                if !self.p[(i, j)].is_finite() {
                    warn!("P({}, {}) non-finite, setting to 0", i, j);
                    self.p[(i, j)] = 0.0;
                } else if self.p[(i, j)] > P_MAX {
                    self.p[(i, j)] = P_MAX;
                } else if self.p[(i, j)] < -P_MAX {
                    self.p[(i, j)] = -P_MAX;
                }
            }
            if self.p[(i, i)] < P_MIN {
                debug!("P({}, {}) below floor, clamping", i, i);
                self.p[(i, i)] = P_MIN;
            }
            for j in 0..i {
                self.p[(j, i)] = self.p[(i, j)];
            }
        }
    }

    /// Project the current `(x, P, u)` into the output messages.
    fn outputs(&self, timestamp: u64) -> NavOutputs {
        let eph = (self.p[(xe::POS_N, xe::POS_N)] + self.p[(xe::POS_E, xe::POS_E)]).sqrt();
        let epv = self.p[(xe::POS_D, xe::POS_D)];

        let q_nb = self.q_nb();
        let (_, _, yaw) = UnitQuaternion::from_quaternion(q_nb).euler_angles();

        let a_b = Vector3::new(self.u[u::ACCEL_BX], self.u[u::ACCEL_BY], self.u[u::ACCEL_BZ]);
        let a_spec_b = a_b / self.x[x::ACCEL_SCALE] - rotate_to_body(&q_nb, &self.g_n);

        let roll_rate = self.u[u::OMEGA_NB_BX] - self.x[x::GYRO_BIAS_BX];
        let pitch_rate = self.u[u::OMEGA_NB_BY] - self.x[x::GYRO_BIAS_BY];
        let yaw_rate = self.u[u::OMEGA_NB_BZ] - self.x[x::GYRO_BIAS_BZ];

        let q = [
            self.x[x::Q_NB_0],
            self.x[x::Q_NB_1],
            self.x[x::Q_NB_2],
            self.x[x::Q_NB_3],
        ];

        let (lat, lon, alt) =
            self.origin
                .local_to_global(self.x[x::POS_N], self.x[x::POS_E], self.x[x::POS_D]);

        let mut states = [0.0; x::N];
        for i in 0..x::N {
            states[i] = self.x[i];
        }
        let mut covariances = [0.0; xe::N];
        for i in 0..xe::N {
            covariances[i] = self.p[(i, i)];
        }

        NavOutputs {
            attitude: Attitude {
                timestamp,
                q,
                rollspeed: roll_rate,
                pitchspeed: pitch_rate,
                yawspeed: yaw_rate,
            },
            local_position: LocalPosition {
                timestamp,
                x: self.x[x::POS_N],
                y: self.x[x::POS_E],
                z: self.x[x::POS_D],
                vx: self.x[x::VEL_N],
                vy: self.x[x::VEL_E],
                vz: self.x[x::VEL_D],
                yaw,
                xy_global: self.origin.xy_initialized(),
                z_global: self.origin.alt_initialized(),
                ref_timestamp: self.origin.xy_timestamp(),
                ref_lat: self.origin.lat_deg(),
                ref_lon: self.origin.lon_deg(),
                ref_alt: self.origin.alt(),
                dist_bottom: -self.x[x::POS_D] - self.x[x::TERRAIN_ALT],
                dist_bottom_rate: -self.x[x::VEL_D],
                eph,
                epv,
            },
            global_position: GlobalPosition {
                timestamp,
                lat,
                lon,
                alt,
                vel_n: self.x[x::VEL_N],
                vel_e: self.x[x::VEL_E],
                vel_d: self.x[x::VEL_D],
                yaw,
                eph,
                epv,
                terrain_alt: self.x[x::TERRAIN_ALT] + self.origin.alt(),
            },
            control_state: ControlState {
                timestamp,
                x_acc: a_spec_b.x,
                y_acc: a_spec_b.y,
                z_acc: a_spec_b.z,
                x_vel: self.x[x::VEL_N],
                y_vel: self.x[x::VEL_E],
                z_vel: self.x[x::VEL_D],
                x_pos: self.x[x::POS_N],
                y_pos: self.x[x::POS_E],
                z_pos: self.x[x::POS_D],
                q,
                roll_rate,
                pitch_rate,
                yaw_rate,
                vel_variance: [
                    self.p[(xe::VEL_N, xe::VEL_N)],
                    self.p[(xe::VEL_E, xe::VEL_E)],
                    self.p[(xe::VEL_D, xe::VEL_D)],
                ],
                pos_variance: [
                    self.p[(xe::POS_N, xe::POS_N)],
                    self.p[(xe::POS_E, xe::POS_E)],
                    self.p[(xe::POS_D, xe::POS_D)],
                ],
            },
            estimator_status: EstimatorStatus {
                timestamp,
                n_states: x::N as u32,
                states,
                covariances,
                pos_horiz_accuracy: eph,
                pos_vert_accuracy: epv,
            },
        }
    }
}

/// Diagonal process noise for the error state.
fn process_noise() -> Covariance {
    let mut q = Covariance::zeros();
    q[(xe::ROT_N, xe::ROT_N)] = 1e-1;
    q[(xe::ROT_E, xe::ROT_E)] = 1e-1;
    q[(xe::ROT_D, xe::ROT_D)] = 1e-1;
    q[(xe::VEL_N, xe::VEL_N)] = 1e-1;
    q[(xe::VEL_E, xe::VEL_E)] = 1e-1;
    q[(xe::VEL_D, xe::VEL_D)] = 1e-1;
    q[(xe::GYRO_BIAS_N, xe::GYRO_BIAS_N)] = 1e-4;
    q[(xe::GYRO_BIAS_E, xe::GYRO_BIAS_E)] = 1e-4;
    q[(xe::GYRO_BIAS_D, xe::GYRO_BIAS_D)] = 1e-4;
    q[(xe::ACCEL_SCALE, xe::ACCEL_SCALE)] = 1e-2;
    q[(xe::POS_N, xe::POS_N)] = 1e-1;
    q[(xe::POS_E, xe::POS_E)] = 1e-1;
    q[(xe::POS_D, xe::POS_D)] = 1e-1;
    q[(xe::TERRAIN_ALT, xe::TERRAIN_ALT)] = 1e-1;
    q[(xe::BARO_BIAS, xe::BARO_BIAS)] = 1e-1;
    q
}

fn skew(v: &Vector3<Scalar>) -> Matrix3<Scalar> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Rotate a body-frame vector into the navigation frame by `q_nb`.
///
/// The full `q v q^-1` product keeps a slightly non-unit quaternion from
/// scaling the result.
fn rotate_to_nav(q: &Quaternion<Scalar>, v: &Vector3<Scalar>) -> Vector3<Scalar> {
    let inv = q.conjugate() * (1.0 / q.norm_squared());
    (*q * Quaternion::from_imag(*v) * inv).imag()
}

/// Rotate a navigation-frame vector into the body frame by `q_nb`.
fn rotate_to_body(q: &Quaternion<Scalar>, v: &Vector3<Scalar>) -> Vector3<Scalar> {
    let inv = q.conjugate() * (1.0 / q.norm_squared());
    (inv * Quaternion::from_imag(*v) * *q).imag()
}

/// Staleness guard shared by every sensor: returns the elapsed interval in
/// seconds and stores the new timestamp, or `None` for a repeated or
/// out-of-order sample.
fn sample_dt(last: &mut u64, new: u64) -> Option<Scalar> {
    if new == *last {
        return None;
    }
    let dt = (new as i64 - *last as i64) as Scalar / 1.0e6;
    if dt < 0.0 {
        return None;
    }
    *last = new;
    Some(dt)
}

fn offset_timestamp(base: u64, relative: i64) -> u64 {
    (base as i64).wrapping_add(relative) as u64
}
