//! Kinematic truth profiles for filter scenarios.
//!
//! A profile holds a constant body rate and specific force; the attitude is
//! integrated exactly with axis-angle steps so the synthesized magnetometer
//! stays consistent with the motion.

use nalgebra::{Unit, UnitQuaternion, Vector3};

#[derive(Debug, Clone, Copy)]
pub struct MotionProfile {
    pub duration_s: f64,
    pub imu_rate_hz: f64,
    /// Constant body angular rate (rad/s).
    pub omega_b: Vector3<f64>,
    /// Constant body specific force (m/s^2).
    pub accel_b: Vector3<f64>,
}

impl MotionProfile {
    /// Vehicle at rest on the ground, accelerometer reading 1 g.
    pub fn static_on_ground(duration_s: f64, imu_rate_hz: f64) -> Self {
        Self {
            duration_s,
            imu_rate_hz,
            omega_b: Vector3::zeros(),
            accel_b: Vector3::new(0.0, 0.0, 9.8),
        }
    }

    /// Constant yaw rate from rest.
    pub fn yaw_rotation(yaw_rate: f64, duration_s: f64, imu_rate_hz: f64) -> Self {
        Self {
            duration_s,
            imu_rate_hz,
            omega_b: Vector3::new(0.0, 0.0, yaw_rate),
            accel_b: Vector3::new(0.0, 0.0, 9.8),
        }
    }

    /// Persistent forward acceleration.
    pub fn accelerating(forward_m_s2: f64, duration_s: f64, imu_rate_hz: f64) -> Self {
        Self {
            duration_s,
            imu_rate_hz,
            omega_b: Vector3::zeros(),
            accel_b: Vector3::new(forward_m_s2, 0.0, 9.8),
        }
    }
}

pub struct TruthData {
    /// Sample times (s); the first sample sits one period after start so
    /// sensor timestamps never collide with the filter's zero epoch.
    pub time: Vec<f64>,
    /// True attitude body -> NED at each sample.
    pub att: Vec<UnitQuaternion<f64>>,
    pub omega_b: Vector3<f64>,
    pub accel_b: Vector3<f64>,
}

pub fn simulate_motion(profile: &MotionProfile) -> TruthData {
    let dt = 1.0 / profile.imu_rate_hz;
    let n = (profile.duration_s * profile.imu_rate_hz).round() as usize;

    let mut time = Vec::with_capacity(n);
    let mut att = Vec::with_capacity(n);

    let mut q = UnitQuaternion::identity();
    let angle = profile.omega_b.norm() * dt;

    for i in 0..n {
        time.push((i + 1) as f64 * dt);
        if angle > 1e-12 {
            let step =
                UnitQuaternion::from_axis_angle(&Unit::new_normalize(profile.omega_b), angle);
            q *= step;
        }
        att.push(q);
    }

    TruthData {
        time,
        att,
        omega_b: profile.omega_b,
        accel_b: profile.accel_b,
    }
}
