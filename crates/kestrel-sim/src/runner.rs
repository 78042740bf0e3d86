//! Replay harness: feeds merged sensor streams through the filter and
//! records the estimate trace, one row per IMU tick.

use kestrel_core::msgs::{GnssSample, SensorCombined};
use kestrel_core::{CorrectStatus, Iekf};
use nalgebra::{Quaternion, UnitQuaternion};

#[derive(Debug, Clone, Copy)]
pub enum Event {
    Imu(SensorCombined),
    Gnss(GnssSample),
}

impl Event {
    pub fn timestamp(&self) -> u64 {
        match self {
            Event::Imu(m) => m.timestamp,
            Event::Gnss(m) => m.timestamp,
        }
    }
}

/// Interleave IMU and GNSS streams by timestamp. On a tie the IMU sample
/// goes first, matching the delivery order of the real transport.
pub fn merge_events(imu: Vec<SensorCombined>, gnss: Vec<GnssSample>) -> Vec<Event> {
    let mut events: Vec<Event> = imu
        .into_iter()
        .map(Event::Imu)
        .chain(gnss.into_iter().map(Event::Gnss))
        .collect();
    events.sort_by_key(|e| {
        let tie = match e {
            Event::Imu(_) => 0u8,
            Event::Gnss(_) => 1u8,
        };
        (e.timestamp(), tie)
    });
    events
}

#[derive(Debug, Default)]
pub struct Trace {
    pub time: Vec<f64>,
    /// Roll, pitch, yaw (rad).
    pub euler: Vec<[f64; 3]>,
    pub vel: Vec<[f64; 3]>,
    pub pos: Vec<[f64; 3]>,
    pub eph: Vec<f64>,
    pub epv: Vec<f64>,
    pub accel_status: Vec<CorrectStatus>,
    pub mag_status: Vec<CorrectStatus>,
    pub baro_status: Vec<CorrectStatus>,
    pub gnss_status: Vec<(u64, CorrectStatus)>,
}

pub fn run(filter: &mut Iekf, events: &[Event]) -> Trace {
    let mut trace = Trace::default();

    for event in events {
        match event {
            Event::Imu(msg) => {
                let outcome = filter.handle_imu(msg);
                let out = outcome.outputs;

                let q = out.attitude.q;
                let (roll, pitch, yaw) =
                    UnitQuaternion::from_quaternion(Quaternion::new(q[0], q[1], q[2], q[3]))
                        .euler_angles();

                trace.time.push(msg.timestamp as f64 / 1e6);
                trace.euler.push([roll, pitch, yaw]);
                trace.vel.push([
                    out.local_position.vx,
                    out.local_position.vy,
                    out.local_position.vz,
                ]);
                trace.pos.push([
                    out.local_position.x,
                    out.local_position.y,
                    out.local_position.z,
                ]);
                trace.eph.push(out.local_position.eph);
                trace.epv.push(out.local_position.epv);
                trace.accel_status.push(outcome.accel);
                trace.mag_status.push(outcome.mag);
                trace.baro_status.push(outcome.baro);
            }
            Event::Gnss(msg) => {
                let status = filter.handle_gnss(msg);
                trace.gnss_status.push((msg.timestamp, status));
            }
        }
    }

    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{generate_gnss_stream, generate_imu_stream, GnssParams, SensorParams};
    use crate::truth::{simulate_motion, MotionProfile};
    use approx::assert_relative_eq;
    use kestrel_core::state::{x, xe};
    use std::f64::consts::{FRAC_PI_2, PI};

    fn quiet_sensors() -> SensorParams {
        SensorParams {
            noise_scale: 0.0,
            ..SensorParams::default()
        }
    }

    fn deg(rad: f64) -> f64 {
        rad.to_degrees()
    }

    /// Smallest signed distance between two angles.
    fn angle_diff(a: f64, b: f64) -> f64 {
        let d = a - b;
        d.sin().atan2(d.cos())
    }

    fn shift_imu(msgs: &[SensorCombined], offset_us: u64) -> Vec<SensorCombined> {
        msgs.iter()
            .map(|m| SensorCombined {
                timestamp: m.timestamp + offset_us,
                ..*m
            })
            .collect()
    }

    fn shift_gnss(msgs: &[GnssSample], offset_us: u64) -> Vec<GnssSample> {
        msgs.iter()
            .map(|m| GnssSample {
                timestamp: m.timestamp + offset_us,
                ..*m
            })
            .collect()
    }

    #[test]
    fn test_merge_orders_by_timestamp_imu_first() {
        let truth = simulate_motion(&MotionProfile::static_on_ground(1.0, 10.0));
        let imu = generate_imu_stream(&truth, &quiet_sensors());
        let gnss = generate_gnss_stream(1.0, &GnssParams::default());
        let events = merge_events(imu, gnss);

        let mut last = 0;
        for e in &events {
            assert!(e.timestamp() >= last);
            last = e.timestamp();
        }
        // 5 Hz GNSS against 10 Hz IMU lands on shared timestamps; the IMU
        // sample must be delivered first.
        let tied: Vec<_> = events
            .windows(2)
            .filter(|w| w[0].timestamp() == w[1].timestamp())
            .collect();
        assert!(!tied.is_empty());
        for w in tied {
            assert!(matches!(w[0], Event::Imu(_)));
            assert!(matches!(w[1], Event::Gnss(_)));
        }
    }

    // -----------------------------------------------------------------------
    // Scenario: static on ground, 30 s at 200 Hz.
    // -----------------------------------------------------------------------
    #[test]
    fn test_static_on_ground_holds_attitude() {
        let truth = simulate_motion(&MotionProfile::static_on_ground(30.0, 200.0));
        let imu = generate_imu_stream(&truth, &quiet_sensors());
        let mut filter = Iekf::new();
        let trace = run(&mut filter, &merge_events(imu, Vec::new()));

        let last = trace.euler.last().unwrap();
        assert!(deg(last[0]).abs() < 0.5, "roll {} deg", deg(last[0]));
        assert!(deg(last[1]).abs() < 0.5, "pitch {} deg", deg(last[1]));
        assert!(deg(last[2]).abs() < 0.5, "yaw {} deg", deg(last[2]));

        // Nothing pulls the horizontal channels.
        let v = trace.vel.last().unwrap();
        assert!(v[0].abs() < 0.01);
        assert!(v[1].abs() < 0.01);
        let p = trace.pos.last().unwrap();
        assert!(p[0].abs() < 1.0);
        assert!(p[1].abs() < 1.0);
    }

    // -----------------------------------------------------------------------
    // Scenario: pure yaw rotation, pi/2 rad/s for 2 s.
    // -----------------------------------------------------------------------
    #[test]
    fn test_pure_yaw_rotation() {
        let truth = simulate_motion(&MotionProfile::yaw_rotation(FRAC_PI_2, 2.0, 200.0));
        let imu = generate_imu_stream(&truth, &quiet_sensors());
        let mut filter = Iekf::new();
        let trace = run(&mut filter, &merge_events(imu, Vec::new()));

        let last = trace.euler.last().unwrap();
        assert!(
            deg(angle_diff(last[2], PI)).abs() < 2.0,
            "yaw {} deg",
            deg(last[2])
        );
        assert!(deg(last[0]).abs() < 0.5);
        assert!(deg(last[1]).abs() < 0.5);
    }

    // -----------------------------------------------------------------------
    // Scenario: GNSS position step after convergence at the origin.
    // -----------------------------------------------------------------------
    #[test]
    fn test_gnss_position_step() {
        let mut filter = Iekf::new();
        let origin_fix = GnssParams::default();

        // Converge at the origin for 10 s.
        let truth = simulate_motion(&MotionProfile::static_on_ground(10.0, 200.0));
        let imu = generate_imu_stream(&truth, &quiet_sensors());
        let gnss = generate_gnss_stream(10.0, &origin_fix);
        run(&mut filter, &merge_events(imu.clone(), gnss));

        let p_before = filter.covariance()[(xe::POS_N, xe::POS_N)];
        let q_before = [
            filter.state()[x::Q_NB_0],
            filter.state()[x::Q_NB_1],
            filter.state()[x::Q_NB_2],
            filter.state()[x::Q_NB_3],
        ];

        // Same motion, fix stepped 100 m north.
        let stepped = generate_gnss_stream(10.0, &origin_fix.north_of(100.0));
        let trace = run(
            &mut filter,
            &merge_events(shift_imu(&imu, 10_000_000), shift_gnss(&stepped, 10_000_000)),
        );

        // The first stepped sample breaches the gate and is still applied.
        assert!(
            matches!(trace.gnss_status[0].1, CorrectStatus::Gated(_)),
            "expected gate breach, got {:?}",
            trace.gnss_status[0].1
        );

        assert!(
            filter.state()[x::POS_N] > 80.0,
            "pos_n {}",
            filter.state()[x::POS_N]
        );
        // Attitude is masked out of the GNSS update.
        assert_relative_eq!(filter.state()[x::Q_NB_0], q_before[0], epsilon = 1e-6);
        assert_relative_eq!(filter.state()[x::Q_NB_1], q_before[1], epsilon = 1e-6);
        assert_relative_eq!(filter.state()[x::Q_NB_2], q_before[2], epsilon = 1e-6);
        assert_relative_eq!(filter.state()[x::Q_NB_3], q_before[3], epsilon = 1e-6);
        // Horizontal position variance keeps contracting.
        assert!(filter.covariance()[(xe::POS_N, xe::POS_N)] <= p_before + 1e-6);
    }

    // -----------------------------------------------------------------------
    // Scenario: baro offset identified as baro bias while GNSS holds
    // altitude at the origin.
    // -----------------------------------------------------------------------
    #[test]
    fn test_baro_bias_identification() {
        // Specific force consistent with gravity keeps the vertical channel
        // quiescent so the baro offset is the only altitude disturbance.
        let profile = MotionProfile {
            duration_s: 30.0,
            imu_rate_hz: 200.0,
            omega_b: nalgebra::Vector3::zeros(),
            accel_b: nalgebra::Vector3::new(0.0, 0.0, -9.8),
        };
        let truth = simulate_motion(&profile);
        let sensors = SensorParams {
            baro_offset_m: 50.0,
            ..quiet_sensors()
        };
        let imu = generate_imu_stream(&truth, &sensors);
        let gnss = generate_gnss_stream(30.0, &GnssParams::default());

        let mut filter = Iekf::new();
        run(&mut filter, &merge_events(imu, gnss));

        assert_relative_eq!(filter.state()[x::BARO_BIAS], 50.0, epsilon = 5.0);
        assert!(
            filter.state()[x::POS_D].abs() < 2.0,
            "pos_d {}",
            filter.state()[x::POS_D]
        );
    }

    // -----------------------------------------------------------------------
    // Scenario: magnetometer impulse.
    // -----------------------------------------------------------------------
    #[test]
    fn test_mag_impulse_is_absorbed() {
        let truth = simulate_motion(&MotionProfile::static_on_ground(10.0, 200.0));
        let mut imu = generate_imu_stream(&truth, &quiet_sensors());

        // Ten times the field strength for one sample. The measurement
        // model only uses the direction, so the estimate must not move.
        let mid = imu.len() / 2;
        for c in imu[mid].magnetometer_ga.iter_mut() {
            *c *= 10.0;
        }
        // A flipped horizontal direction a second later; the update is
        // applied and the good stream pulls yaw back.
        let late = mid + 200;
        imu[late].magnetometer_ga[0] = -imu[late].magnetometer_ga[0];
        imu[late].magnetometer_ga[1] = -imu[late].magnetometer_ga[1];

        let mut filter = Iekf::new();
        let trace = run(&mut filter, &merge_events(imu, Vec::new()));

        assert_eq!(trace.mag_status[mid], CorrectStatus::Applied);
        assert_eq!(trace.mag_status[late], CorrectStatus::Applied);

        for e in &trace.euler {
            assert!(e.iter().all(|v| v.is_finite()));
        }
        let last = trace.euler.last().unwrap();
        assert!(deg(last[2]).abs() < 2.0, "yaw {} deg", deg(last[2]));
    }

    // -----------------------------------------------------------------------
    // Scenario: accelerating flight.
    // -----------------------------------------------------------------------
    #[test]
    fn test_accelerating_flight_skips_accel() {
        let truth = simulate_motion(&MotionProfile::accelerating(5.0, 10.0, 200.0));
        let imu = generate_imu_stream(&truth, &quiet_sensors());
        let mut filter = Iekf::new();
        let trace = run(&mut filter, &merge_events(imu, Vec::new()));

        // The norm deviation exceeds 1 m/s^2 on every tick.
        assert!(trace
            .accel_status
            .iter()
            .all(|s| *s == CorrectStatus::Accelerating));
        // Mag and baro keep correcting.
        assert!(trace.mag_status.iter().all(|s| *s == CorrectStatus::Applied));
        assert!(trace
            .baro_status
            .iter()
            .all(|s| *s == CorrectStatus::Applied));
    }
}
