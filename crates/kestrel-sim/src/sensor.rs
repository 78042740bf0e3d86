//! Noisy sensor synthesis from a truth profile.
//!
//! Produces the message streams the filter consumes. Noise is Gaussian with
//! per-sensor sigmas scaled by one knob; a `noise_scale` of zero gives a
//! deterministic stream for scenario tests.

use kestrel_core::msgs::{GnssSample, SensorCombined};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::truth::TruthData;

const EARTH_RADIUS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy)]
pub struct SensorParams {
    pub noise_scale: f64,
    pub accel_noise_std: f64, // m/s^2
    pub gyro_noise_std: f64,  // rad/s
    pub mag_noise_std: f64,   // gauss
    pub baro_noise_std: f64,  // m
    /// Magnetic field in NED (gauss).
    pub mag_field_ga: Vector3<f64>,
    /// Constant offset added to the true barometric altitude (m).
    pub baro_offset_m: f64,
    pub seed: u64,
}

impl Default for SensorParams {
    fn default() -> Self {
        Self {
            noise_scale: 1.0,
            accel_noise_std: 0.01,
            gyro_noise_std: 0.001,
            mag_noise_std: 0.001,
            baro_noise_std: 0.1,
            mag_field_ga: Vector3::new(0.21523, 0.00771, -0.42741),
            baro_offset_m: 0.0,
            seed: 42,
        }
    }
}

pub fn generate_imu_stream(truth: &TruthData, cfg: &SensorParams) -> Vec<SensorCombined> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let d_accel = Normal::new(0.0, cfg.noise_scale * cfg.accel_noise_std).unwrap();
    let d_gyro = Normal::new(0.0, cfg.noise_scale * cfg.gyro_noise_std).unwrap();
    let d_mag = Normal::new(0.0, cfg.noise_scale * cfg.mag_noise_std).unwrap();
    let d_baro = Normal::new(0.0, cfg.noise_scale * cfg.baro_noise_std).unwrap();

    // Sample times start one period in, so the first is also the spacing.
    let dt = truth.time.first().copied().unwrap_or(0.005);

    let mut out = Vec::with_capacity(truth.time.len());
    for (i, &t) in truth.time.iter().enumerate() {
        let mag_b = truth.att[i].inverse_transform_vector(&cfg.mag_field_ga);

        out.push(SensorCombined {
            timestamp: (t * 1e6).round() as u64,
            gyro_rad: [
                truth.omega_b.x + d_gyro.sample(&mut rng),
                truth.omega_b.y + d_gyro.sample(&mut rng),
                truth.omega_b.z + d_gyro.sample(&mut rng),
            ],
            gyro_integral_dt: dt,
            accelerometer_m_s2: [
                truth.accel_b.x + d_accel.sample(&mut rng),
                truth.accel_b.y + d_accel.sample(&mut rng),
                truth.accel_b.z + d_accel.sample(&mut rng),
            ],
            accelerometer_timestamp_relative: 0,
            magnetometer_ga: [
                mag_b.x + d_mag.sample(&mut rng),
                mag_b.y + d_mag.sample(&mut rng),
                mag_b.z + d_mag.sample(&mut rng),
            ],
            magnetometer_timestamp_relative: 0,
            baro_alt_meter: cfg.baro_offset_m + d_baro.sample(&mut rng),
            baro_timestamp_relative: 0,
        });
    }
    out
}

#[derive(Debug, Clone, Copy)]
pub struct GnssParams {
    pub rate_hz: f64,
    /// Reported fix, constant over the stream.
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_m: f64,
    pub vel_ned: Vector3<f64>,
    pub pos_noise_std: f64, // m
    pub vel_noise_std: f64, // m/s
    pub satellites_used: u8,
    pub fix_type: u8,
    pub seed: u64,
}

impl Default for GnssParams {
    fn default() -> Self {
        Self {
            rate_hz: 5.0,
            lat_deg: 35.0,
            lon_deg: -106.0,
            alt_m: 0.0,
            vel_ned: Vector3::zeros(),
            pos_noise_std: 0.0,
            vel_noise_std: 0.0,
            satellites_used: 8,
            fix_type: 3,
            seed: 42,
        }
    }
}

impl GnssParams {
    /// The same fix displaced the given distance to the north.
    pub fn north_of(&self, meters: f64) -> Self {
        Self {
            lat_deg: self.lat_deg + (meters / EARTH_RADIUS).to_degrees(),
            ..*self
        }
    }
}

pub fn generate_gnss_stream(duration_s: f64, cfg: &GnssParams) -> Vec<GnssSample> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let d_pos = Normal::new(0.0, cfg.pos_noise_std).unwrap();
    let d_vel = Normal::new(0.0, cfg.vel_noise_std).unwrap();

    let dt = 1.0 / cfg.rate_hz;
    let n = (duration_s * cfg.rate_hz).round() as usize;

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let t = (i + 1) as f64 * dt;
        let lat = cfg.lat_deg + (d_pos.sample(&mut rng) / EARTH_RADIUS).to_degrees();
        let lon = cfg.lon_deg
            + (d_pos.sample(&mut rng) / (EARTH_RADIUS * cfg.lat_deg.to_radians().cos()))
                .to_degrees();
        let alt = cfg.alt_m + d_pos.sample(&mut rng);

        out.push(GnssSample {
            timestamp: (t * 1e6).round() as u64,
            lat: (lat * 1e7).round() as i32,
            lon: (lon * 1e7).round() as i32,
            alt: (alt * 1e3).round() as i32,
            vel_n_m_s: cfg.vel_ned.x + d_vel.sample(&mut rng),
            vel_e_m_s: cfg.vel_ned.y + d_vel.sample(&mut rng),
            vel_d_m_s: cfg.vel_ned.z + d_vel.sample(&mut rng),
            satellites_used: cfg.satellites_used,
            fix_type: cfg.fix_type,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::truth::{simulate_motion, MotionProfile};
    use approx::assert_relative_eq;

    fn quiet() -> SensorParams {
        SensorParams {
            noise_scale: 0.0,
            ..SensorParams::default()
        }
    }

    #[test]
    fn test_quiet_stream_is_exact() {
        let truth = simulate_motion(&MotionProfile::static_on_ground(1.0, 200.0));
        let imu = generate_imu_stream(&truth, &quiet());

        assert_eq!(imu.len(), 200);
        assert_eq!(imu[0].timestamp, 5_000);
        assert_relative_eq!(imu[0].gyro_integral_dt, 0.005);
        assert_relative_eq!(imu[0].accelerometer_m_s2[2], 9.8);
        // Identity attitude leaves the field in body coordinates.
        assert_relative_eq!(imu[0].magnetometer_ga[0], 0.21523, epsilon = 1e-12);
        assert_relative_eq!(imu[0].baro_alt_meter, 0.0);
    }

    #[test]
    fn test_mag_follows_attitude() {
        let truth = simulate_motion(&MotionProfile::yaw_rotation(
            std::f64::consts::FRAC_PI_2,
            1.0,
            100.0,
        ));
        let imu = generate_imu_stream(&truth, &quiet());

        let last = imu.last().unwrap();
        let expected = truth
            .att
            .last()
            .unwrap()
            .inverse_transform_vector(&quiet().mag_field_ga);
        assert_relative_eq!(last.magnetometer_ga[0], expected.x, epsilon = 1e-12);
        assert_relative_eq!(last.magnetometer_ga[1], expected.y, epsilon = 1e-12);
    }

    #[test]
    fn test_gnss_stream_encoding() {
        let cfg = GnssParams::default();
        let gnss = generate_gnss_stream(2.0, &cfg);

        assert_eq!(gnss.len(), 10);
        assert_eq!(gnss[0].timestamp, 200_000);
        assert_eq!(gnss[0].lat, 350_000_000);
        assert_eq!(gnss[0].lon, -1_060_000_000);
        assert_eq!(gnss[0].alt, 0);
        assert_eq!(gnss[0].satellites_used, 8);
    }

    #[test]
    fn test_north_offset_moves_latitude_only() {
        let cfg = GnssParams::default();
        let stepped = cfg.north_of(100.0);
        assert!(stepped.lat_deg > cfg.lat_deg);
        assert_relative_eq!(stepped.lon_deg, cfg.lon_deg);
        // 100 m is roughly 9e-4 degrees of latitude.
        assert_relative_eq!(
            (stepped.lat_deg - cfg.lat_deg).to_radians() * EARTH_RADIUS,
            100.0,
            epsilon = 1e-6
        );
    }
}
