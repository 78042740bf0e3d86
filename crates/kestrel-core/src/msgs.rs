//! Sensor input and navigation output message shapes.
//!
//! Field names and units follow the platform convention of the autopilot
//! messages these map onto. The transport that carries them is outside the
//! filter core; the structs only describe the payloads.

use serde::{Deserialize, Serialize};

use crate::state::{x, xe};

/// Combined inertial sample: gyro, accel, magnetometer and barometer share
/// one message, each with its own timestamp offset from `timestamp`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SensorCombined {
    /// Sample timestamp (us).
    pub timestamp: u64,
    /// Body angular rate (rad/s).
    pub gyro_rad: [f64; 3],
    /// Gyro integration interval (s).
    pub gyro_integral_dt: f64,
    /// Body specific force (m/s^2).
    pub accelerometer_m_s2: [f64; 3],
    /// Accel timestamp offset from `timestamp` (us).
    pub accelerometer_timestamp_relative: i64,
    /// Magnetic field in the body frame (gauss).
    pub magnetometer_ga: [f64; 3],
    /// Mag timestamp offset from `timestamp` (us).
    pub magnetometer_timestamp_relative: i64,
    /// Barometric altitude (m).
    pub baro_alt_meter: f64,
    /// Baro timestamp offset from `timestamp` (us).
    pub baro_timestamp_relative: i64,
}

/// GNSS position/velocity sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GnssSample {
    /// Sample timestamp (us).
    pub timestamp: u64,
    /// Latitude (deg * 1e7).
    pub lat: i32,
    /// Longitude (deg * 1e7).
    pub lon: i32,
    /// Altitude (mm).
    pub alt: i32,
    pub vel_n_m_s: f64,
    pub vel_e_m_s: f64,
    pub vel_d_m_s: f64,
    pub satellites_used: u8,
    pub fix_type: u8,
}

/// Attitude estimate with bias-corrected body rates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Attitude {
    pub timestamp: u64,
    /// Quaternion body -> NED, scalar first.
    pub q: [f64; 4],
    pub rollspeed: f64,
    pub pitchspeed: f64,
    pub yawspeed: f64,
}

/// Local NED position/velocity relative to the origin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocalPosition {
    pub timestamp: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub yaw: f64,
    pub xy_global: bool,
    pub z_global: bool,
    pub ref_timestamp: u64,
    pub ref_lat: f64,
    pub ref_lon: f64,
    pub ref_alt: f64,
    /// Terrain-relative altitude (m).
    pub dist_bottom: f64,
    pub dist_bottom_rate: f64,
    pub eph: f64,
    pub epv: f64,
}

/// Geodetic position via the origin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GlobalPosition {
    pub timestamp: u64,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub vel_n: f64,
    pub vel_e: f64,
    pub vel_d: f64,
    pub yaw: f64,
    pub eph: f64,
    pub epv: f64,
    pub terrain_alt: f64,
}

/// Controller-facing state: specific acceleration, velocity, position,
/// attitude and the matching variances.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlState {
    pub timestamp: u64,
    pub x_acc: f64,
    pub y_acc: f64,
    pub z_acc: f64,
    pub x_vel: f64,
    pub y_vel: f64,
    pub z_vel: f64,
    pub x_pos: f64,
    pub y_pos: f64,
    pub z_pos: f64,
    pub q: [f64; 4],
    pub roll_rate: f64,
    pub pitch_rate: f64,
    pub yaw_rate: f64,
    pub vel_variance: [f64; 3],
    pub pos_variance: [f64; 3],
}

/// Full estimator state dump for monitoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EstimatorStatus {
    pub timestamp: u64,
    pub n_states: u32,
    pub states: [f64; x::N],
    /// Error-state covariance diagonal.
    pub covariances: [f64; xe::N],
    pub pos_horiz_accuracy: f64,
    pub pos_vert_accuracy: f64,
}

/// Everything the filter derives on one IMU tick, ready for publication.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NavOutputs {
    pub attitude: Attitude,
    pub local_position: LocalPosition,
    pub global_position: GlobalPosition,
    pub control_state: ControlState,
    pub estimator_status: EstimatorStatus,
}
