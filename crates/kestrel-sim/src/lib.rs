//! Kestrel Simulation Library
//!
//! Sensor synthesis and replay tooling for the navigation filter: kinematic
//! truth profiles, noisy IMU/GNSS message streams and a runner that drives
//! the filter and records the estimate trace.

pub mod runner;
pub mod sensor;
pub mod truth;

// Re-export main types
pub use runner::{merge_events, run, Event, Trace};
pub use sensor::{generate_gnss_stream, generate_imu_stream, GnssParams, SensorParams};
pub use truth::{simulate_motion, MotionProfile, TruthData};
