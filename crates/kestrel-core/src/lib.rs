//! # Kestrel Core
//!
//! Invariant extended Kalman filter for strapdown inertial navigation of a
//! small aerial vehicle. Fuses a strapdown IMU (gyro, accel, magnetometer),
//! a barometric altimeter and a GNSS receiver into attitude, velocity,
//! position, sensor biases and an accelerometer scale factor, together with
//! the associated covariance.
//!
//! ## Coordinate Systems
//!
//! - **Navigation frame (NED)**: North-East-Down local tangent plane rooted
//!   at the first accepted GNSS fix.
//! - **Body frame**: fixed to the vehicle; the state quaternion `q_nb`
//!   rotates body vectors into NED.
//!
//! ## Design Notes
//!
//! - Attitude error is the vector part of a small quaternion, injected by
//!   left multiplication (the invariant update).
//! - Forward Euler integrates both state and covariance; the high-rate IMU
//!   makes higher-order integration unnecessary.
//! - All matrices have compile-time dimensions; nothing allocates at steady
//!   state, so the core suits allocator-free targets.
//! - The core is single-threaded by contract: the message transport must
//!   serialize sensor callbacks onto one thread.
//!
//! # Features
//! - `std` (default): standard library support, used by the test suite
//! - without it the crate builds `no_std` for bare-metal targets

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate std;

pub mod iekf;
pub mod kalman;
pub mod msgs;
pub mod origin;
pub mod state;

pub use iekf::{CorrectStatus, Iekf, ImuOutcome};
pub use msgs::{
    Attitude, ControlState, EstimatorStatus, GlobalPosition, GnssSample, LocalPosition,
    NavOutputs, SensorCombined,
};
pub use origin::Origin;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
