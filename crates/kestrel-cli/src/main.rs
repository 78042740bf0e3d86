//! Kestrel - strapdown navigation filter scenario runner

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use kestrel_core::state::x;
use kestrel_core::{CorrectStatus, Iekf};
use kestrel_sim::{
    generate_gnss_stream, generate_imu_stream, merge_events, run, simulate_motion, GnssParams,
    MotionProfile, SensorParams, Trace,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "kestrel")]
#[command(about = "Strapdown navigation filter scenario runner")]
#[command(version)]
struct Args {
    /// Scenario to replay
    #[arg(short, long, value_enum, default_value = "static-ground")]
    scenario: Scenario,

    /// Output directory
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    // ── Timing ────────────────────────────────────────────────
    #[arg(long, default_value_t = 30.0)]
    duration: f64,

    #[arg(long, default_value_t = 200.0)]
    imu_rate: f64,

    #[arg(long, default_value_t = 5.0)]
    gnss_rate: f64,

    /// Run without GNSS fixes
    #[arg(long)]
    no_gnss: bool,

    // ── Sensor options ────────────────────────────────────────
    #[arg(long, default_value_t = 1.0)]
    noise_scale: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Constant offset on the barometric altitude (m)
    #[arg(long, default_value_t = 0.0)]
    baro_offset: f64,

    // ── Scenario parameters ───────────────────────────────────
    /// Yaw rate for the yaw-rotation scenario (rad/s)
    #[arg(long, default_value_t = std::f64::consts::FRAC_PI_2)]
    yaw_rate: f64,

    /// Forward specific force for the accelerating scenario (m/s^2)
    #[arg(long, default_value_t = 5.0)]
    forward_accel: f64,

    // ── GNSS fix location ─────────────────────────────────────
    #[arg(long, default_value_t = 35.0)]
    home_lat: f64,

    #[arg(long, default_value_t = -106.0)]
    home_lon: f64,

    #[arg(long, default_value_t = 0.0)]
    home_alt: f64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scenario {
    /// At rest on the ground
    StaticGround,
    /// Constant yaw rate from rest
    YawRotation,
    /// Persistent forward acceleration
    Accelerating,
    /// Static with a barometer offset to identify
    BaroBias,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    println!("Kestrel Navigation Filter");
    println!("=========================\n");

    let profile = build_profile(&args);
    let truth = simulate_motion(&profile);
    let sensors = build_sensor_params(&args);
    let imu = generate_imu_stream(&truth, &sensors);
    let gnss = if args.no_gnss {
        Vec::new()
    } else {
        generate_gnss_stream(args.duration, &build_gnss_params(&args))
    };

    tracing::info!(imu = imu.len(), gnss = gnss.len(), "replaying scenario");

    let mut filter = Iekf::new();
    let trace = run(&mut filter, &merge_events(imu, gnss));

    print_stats(&trace);
    write_trace(&args, &trace)?;
    write_summary(&args, &filter, &trace)?;

    Ok(())
}

fn build_profile(args: &Args) -> MotionProfile {
    match args.scenario {
        Scenario::StaticGround | Scenario::BaroBias => {
            MotionProfile::static_on_ground(args.duration, args.imu_rate)
        }
        Scenario::YawRotation => {
            MotionProfile::yaw_rotation(args.yaw_rate, args.duration, args.imu_rate)
        }
        Scenario::Accelerating => {
            MotionProfile::accelerating(args.forward_accel, args.duration, args.imu_rate)
        }
    }
}

fn build_sensor_params(args: &Args) -> SensorParams {
    let baro_offset_m = match args.scenario {
        Scenario::BaroBias if args.baro_offset == 0.0 => 50.0,
        _ => args.baro_offset,
    };
    SensorParams {
        noise_scale: args.noise_scale,
        baro_offset_m,
        seed: args.seed,
        ..SensorParams::default()
    }
}

fn build_gnss_params(args: &Args) -> GnssParams {
    GnssParams {
        rate_hz: args.gnss_rate,
        lat_deg: args.home_lat,
        lon_deg: args.home_lon,
        alt_m: args.home_alt,
        seed: args.seed,
        ..GnssParams::default()
    }
}

fn print_stats(trace: &Trace) {
    let euler = trace.euler.last().copied().unwrap_or_default();
    let pos = trace.pos.last().copied().unwrap_or_default();

    println!("\nRun Stats:");
    println!("  Ticks:     {}", trace.time.len());
    println!(
        "  Duration:  {:.2} s",
        trace.time.last().copied().unwrap_or(0.0)
    );
    println!(
        "  Attitude:  roll {:.2}  pitch {:.2}  yaw {:.2} (deg)",
        euler[0].to_degrees(),
        euler[1].to_degrees(),
        euler[2].to_degrees()
    );
    println!(
        "  Position:  N {:.2}  E {:.2}  D {:.2} (m)",
        pos[0], pos[1], pos[2]
    );
    println!(
        "  eph/epv:   {:.2} / {:.2}",
        trace.eph.last().copied().unwrap_or(0.0),
        trace.epv.last().copied().unwrap_or(0.0)
    );
    println!(
        "  Faults:    accel {}  mag {}  baro {}  gnss {}",
        count_faults(&trace.accel_status),
        count_faults(&trace.mag_status),
        count_faults(&trace.baro_status),
        trace
            .gnss_status
            .iter()
            .filter(|(_, s)| matches!(s, CorrectStatus::Gated(_)))
            .count()
    );
    println!("-----------------------------");
}

fn count_faults(statuses: &[CorrectStatus]) -> usize {
    statuses
        .iter()
        .filter(|s| matches!(s, CorrectStatus::Gated(_)))
        .count()
}

fn write_trace(args: &Args, trace: &Trace) -> Result<()> {
    std::fs::create_dir_all(&args.output_dir)?;
    let path = args.output_dir.join("trace.csv");
    let mut wtr = csv::Writer::from_path(&path)?;

    wtr.write_record([
        "time", "roll", "pitch", "yaw", "vel_n", "vel_e", "vel_d", "pos_n", "pos_e", "pos_d",
        "eph", "epv",
    ])?;

    for i in 0..trace.time.len() {
        wtr.write_record(&[
            format!("{:.4}", trace.time[i]),
            format!("{:.6}", trace.euler[i][0]),
            format!("{:.6}", trace.euler[i][1]),
            format!("{:.6}", trace.euler[i][2]),
            format!("{:.4}", trace.vel[i][0]),
            format!("{:.4}", trace.vel[i][1]),
            format!("{:.4}", trace.vel[i][2]),
            format!("{:.4}", trace.pos[i][0]),
            format!("{:.4}", trace.pos[i][1]),
            format!("{:.4}", trace.pos[i][2]),
            format!("{:.4}", trace.eph[i]),
            format!("{:.4}", trace.epv[i]),
        ])?;
    }

    wtr.flush()?;
    println!("Trace written to {:?}", path);
    Ok(())
}

fn write_summary(args: &Args, filter: &Iekf, trace: &Trace) -> Result<()> {
    let euler = trace.euler.last().copied().unwrap_or_default();
    let summary = serde_json::json!({
        "scenario": format!("{:?}", args.scenario),
        "duration_s": args.duration,
        "imu_rate_hz": args.imu_rate,
        "noise_scale": args.noise_scale,
        "seed": args.seed,
        "final": {
            "roll_deg": euler[0].to_degrees(),
            "pitch_deg": euler[1].to_degrees(),
            "yaw_deg": euler[2].to_degrees(),
            "vel_ned": trace.vel.last(),
            "pos_ned": trace.pos.last(),
            "eph": trace.eph.last(),
            "epv": trace.epv.last(),
            "accel_scale": filter.state()[x::ACCEL_SCALE],
            "baro_bias_m": filter.state()[x::BARO_BIAS],
            "gyro_bias_rad_s": [
                filter.state()[x::GYRO_BIAS_BX],
                filter.state()[x::GYRO_BIAS_BY],
                filter.state()[x::GYRO_BIAS_BZ],
            ],
        },
        "faults": {
            "accel": count_faults(&trace.accel_status),
            "mag": count_faults(&trace.mag_status),
            "baro": count_faults(&trace.baro_status),
            "gnss": trace
                .gnss_status
                .iter()
                .filter(|(_, s)| matches!(s, CorrectStatus::Gated(_)))
                .count(),
        },
    });

    let path = args.output_dir.join("summary.json");
    std::fs::write(&path, serde_json::to_string_pretty(&summary)?)?;
    println!("Summary written to {:?}", path);
    Ok(())
}
