//! Offline replay and synthetic flight data.
//!
//! This module provides:
//! - [SensorRecord]: one row of logged sensor data, read from and written to CSV
//! - [EstimateRecord]: one row of estimator output
//! - [run_replay]: drive a [PositionEstimator] through a sequence of records
//! - [synthesize_flight]: generate a seeded, noisy hover/climb/hover profile with an optional
//!   barometer spike, for exercising the fault gate end to end

use std::io;
use std::path::Path;

use log::info;
use nalgebra::Vector3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EstimatorParams;
use crate::estimator::PositionEstimator;
use crate::events::EventLog;
use crate::messages::{GnssFix, SensorFrame};
use crate::{X_VX, X_VY, X_VZ, X_X, X_Y, X_Z};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid synthetic flight setting: {0}")]
    InvalidConfig(String),
}

/// One row of logged sensor data. Empty CSV fields mean the sensor delivered nothing.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct SensorRecord {
    /// Sample time (µs)
    pub timestamp_us: u64,
    /// NED acceleration with gravity removed (m/s²)
    pub accel_n: Option<f64>,
    pub accel_e: Option<f64>,
    pub accel_d: Option<f64>,
    /// Barometric altitude (m)
    pub baro_alt_m: Option<f64>,
    /// GNSS position in the local tangent plane (m)
    pub gnss_north_m: Option<f64>,
    pub gnss_east_m: Option<f64>,
    pub gnss_alt_m: Option<f64>,
    /// GNSS reported horizontal/vertical error (m)
    pub gnss_eph_m: Option<f64>,
    pub gnss_epv_m: Option<f64>,
    /// Rangefinder distance (m)
    pub range_m: Option<f64>,
}

impl SensorRecord {
    /// Build the estimator input for this record.
    ///
    /// Acceleration is used only when all three axes are present, a GNSS fix only when north, east
    /// and altitude are present. Missing eph/epv default to zero, leaving the configured noise floor
    /// in charge.
    pub fn to_frame(&self) -> SensorFrame {
        let accel_ned = match (self.accel_n, self.accel_e, self.accel_d) {
            (Some(n), Some(e), Some(d)) => Some(Vector3::new(n, e, d)),
            _ => None,
        };
        let gnss = match (self.gnss_north_m, self.gnss_east_m, self.gnss_alt_m) {
            (Some(north_m), Some(east_m), Some(altitude_m)) => Some(GnssFix {
                north_m,
                east_m,
                altitude_m,
                eph_m: self.gnss_eph_m.unwrap_or(0.0),
                epv_m: self.gnss_epv_m.unwrap_or(0.0),
            }),
            _ => None,
        };
        SensorFrame {
            timestamp_us: self.timestamp_us,
            accel_ned,
            baro_alt_m: self.baro_alt_m,
            gnss,
            range_m: self.range_m,
        }
    }

    /// Reads a CSV file and returns a vector of `SensorRecord` structs.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, SimError> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// Writes records to a CSV file with a header row.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> Result<(), SimError> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// One row of estimator output.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
pub struct EstimateRecord {
    pub timestamp_us: u64,
    pub north_m: f64,
    pub east_m: f64,
    pub down_m: f64,
    pub vel_n_mps: f64,
    pub vel_e_mps: f64,
    pub vel_d_mps: f64,
    /// Altitude above mean sea level, once an altitude origin exists
    pub altitude_m: Option<f64>,
    pub height_above_ground_m: f64,
    /// Down position variance (m²)
    pub var_down_m2: f64,
    /// Barometer normalized innovation squared of the latest correction
    pub baro_beta: f64,
    pub baro_faulted: bool,
    pub gnss_faulted: bool,
}

impl EstimateRecord {
    pub fn from_estimator(timestamp_us: u64, est: &PositionEstimator) -> Self {
        let x = est.state();
        EstimateRecord {
            timestamp_us,
            north_m: x[X_X],
            east_m: x[X_Y],
            down_m: x[X_Z],
            vel_n_mps: x[X_VX],
            vel_e_mps: x[X_VY],
            vel_d_mps: x[X_VZ],
            altitude_m: est.altitude(),
            height_above_ground_m: est.height_above_ground(),
            var_down_m2: est.covariance()[(X_Z, X_Z)],
            baro_beta: est.baro().context().beta,
            baro_faulted: est.baro().is_faulted(),
            gnss_faulted: est.gnss().is_faulted(),
        }
    }

    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> Result<(), SimError> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Output of a replay run.
#[derive(Debug, Clone, Default)]
pub struct ReplayResult {
    pub estimates: Vec<EstimateRecord>,
    pub events: EventLog,
}

/// Run the estimator over `records` in order, collecting one estimate per record and every
/// notification raised along the way.
pub fn run_replay(records: &[SensorRecord], params: &EstimatorParams) -> ReplayResult {
    let mut estimator = PositionEstimator::new(params.clone());
    let mut events = EventLog::new();
    let mut estimates = Vec::with_capacity(records.len());
    for record in records {
        estimator.update(&record.to_frame(), &mut events);
        estimates.push(EstimateRecord::from_estimator(record.timestamp_us, &estimator));
    }
    info!(
        "replayed {} records, {} notifications ({} errors)",
        records.len(),
        events.len(),
        events.error_count()
    );
    ReplayResult { estimates, events }
}

/// A one-sample barometer outlier.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct BaroSpike {
    /// Time of the spike (s from start)
    pub at_s: f64,
    /// Offset added to the true altitude (m)
    pub magnitude_m: f64,
}

/// Shape and noise of a synthetic flight.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SynthConfig {
    pub duration_s: f64,
    pub rate_hz: f64,
    /// Ground altitude above mean sea level (m)
    pub ground_altitude_m: f64,
    pub climb_start_s: f64,
    pub climb_end_s: f64,
    pub climb_rate_mps: f64,
    /// GNSS fix every `gnss_every` frames
    pub gnss_every: usize,
    pub baro_noise_m: f64,
    pub gnss_xy_noise_m: f64,
    pub gnss_z_noise_m: f64,
    pub accel_noise_mps2: f64,
    pub range_noise_m: f64,
    /// Rangefinder reading when the vehicle sits on the ground (m)
    pub range_clearance_m: f64,
    /// Longest distance the rangefinder reports (m)
    pub range_max_m: f64,
    pub baro_spike: Option<BaroSpike>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            duration_s: 60.0,
            rate_hz: 50.0,
            ground_altitude_m: 100.0,
            climb_start_s: 20.0,
            climb_end_s: 40.0,
            climb_rate_mps: 1.0,
            gnss_every: 10,
            baro_noise_m: 0.5,
            gnss_xy_noise_m: 0.5,
            gnss_z_noise_m: 1.0,
            accel_noise_mps2: 0.05,
            range_noise_m: 0.02,
            range_clearance_m: 0.2,
            range_max_m: 40.0,
            baro_spike: None,
        }
    }
}

impl SynthConfig {
    /// True height above ground at `t` seconds.
    pub fn height_at(&self, t: f64) -> f64 {
        let climbing = (t.min(self.climb_end_s) - self.climb_start_s).max(0.0);
        climbing * self.climb_rate_mps
    }

    /// True upward velocity at `t` seconds.
    pub fn climb_rate_at(&self, t: f64) -> f64 {
        if t >= self.climb_start_s && t < self.climb_end_s {
            self.climb_rate_mps
        } else {
            0.0
        }
    }
}

fn normal(name: &str, std_dev: f64) -> Result<Normal<f64>, SimError> {
    Normal::new(0.0, std_dev).map_err(|e| SimError::InvalidConfig(format!("{}: {}", name, e)))
}

/// Generate a seeded synthetic flight.
///
/// The same `cfg` and `seed` always produce the same records.
pub fn synthesize_flight(cfg: &SynthConfig, seed: u64) -> Result<Vec<SensorRecord>, SimError> {
    if !(cfg.rate_hz.is_finite() && cfg.rate_hz > 0.0)
        || !(cfg.duration_s.is_finite() && cfg.duration_s >= 0.0)
    {
        return Err(SimError::InvalidConfig(format!(
            "rate {} Hz, duration {} s",
            cfg.rate_hz, cfg.duration_s
        )));
    }
    if let Some(spike) = cfg.baro_spike
        && !(0.0..=cfg.duration_s).contains(&spike.at_s)
    {
        return Err(SimError::InvalidConfig(format!(
            "baro spike at {} s is outside the {} s flight",
            spike.at_s, cfg.duration_s
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let baro_noise = normal("baro_noise_m", cfg.baro_noise_m)?;
    let gnss_xy_noise = normal("gnss_xy_noise_m", cfg.gnss_xy_noise_m)?;
    let gnss_z_noise = normal("gnss_z_noise_m", cfg.gnss_z_noise_m)?;
    let accel_noise = normal("accel_noise_mps2", cfg.accel_noise_mps2)?;
    let range_noise = normal("range_noise_m", cfg.range_noise_m)?;

    let dt = 1.0 / cfg.rate_hz;
    let frames = (cfg.duration_s * cfg.rate_hz).round() as usize;
    let spike_frame = cfg
        .baro_spike
        .map(|spike| ((spike.at_s * cfg.rate_hz).round() as usize, spike.magnitude_m));
    let gnss_every = cfg.gnss_every.max(1);

    let mut records = Vec::with_capacity(frames);
    for k in 0..frames {
        let t = k as f64 * dt;
        let height = cfg.height_at(t);
        let altitude = cfg.ground_altitude_m + height;
        // down acceleration is the negated change in climb rate
        let accel_d = -(cfg.climb_rate_at(t + dt) - cfg.climb_rate_at(t)) / dt;

        let mut baro = altitude + baro_noise.sample(&mut rng);
        if let Some((frame, magnitude)) = spike_frame {
            if frame == k {
                baro += magnitude;
            }
        }

        let mut record = SensorRecord {
            timestamp_us: (t * 1e6).round() as u64,
            accel_n: Some(accel_noise.sample(&mut rng)),
            accel_e: Some(accel_noise.sample(&mut rng)),
            accel_d: Some(accel_d + accel_noise.sample(&mut rng)),
            baro_alt_m: Some(baro),
            ..Default::default()
        };

        if k % gnss_every == 0 {
            record.gnss_north_m = Some(gnss_xy_noise.sample(&mut rng));
            record.gnss_east_m = Some(gnss_xy_noise.sample(&mut rng));
            record.gnss_alt_m = Some(altitude + gnss_z_noise.sample(&mut rng));
            record.gnss_eph_m = Some(cfg.gnss_xy_noise_m);
            record.gnss_epv_m = Some(cfg.gnss_z_noise_m);
        }

        let range = height + cfg.range_clearance_m;
        if range <= cfg.range_max_m {
            record.range_m = Some(range + range_noise.sample(&mut rng));
        }

        records.push(record);
    }
    Ok(records)
}
