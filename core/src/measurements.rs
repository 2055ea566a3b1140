//! Measurement models for the correction step.
//!
//! A measurement model knows three things about one sensor: how to pull its sample out of a
//! [SensorFrame], how noisy that sample is, and which linear combination of the state it observes
//! (the observation matrix `H`). Everything else about a correction (warm-up, gating, the update
//! itself) is shared and lives in [crate::correction].
//!
//! Three models are provided:
//! * [BaroMeasurement]: barometric altitude, 1-D, `y = −z`
//! * [GnssPositionMeasurement]: local GNSS position, 3-D, `y = (x, y, −z)`
//! * [RangeMeasurement]: downward rangefinder, 1-D, `y = tz − z`

use std::fmt::{self, Display};

use thiserror::Error;

use crate::events::EventId;
use crate::linalg::{Matrix, Vector};
use crate::messages::SensorFrame;
use crate::{N_X, X_TZ, X_X, X_Y, X_Z};

/// The sensors that feed the estimator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Baro,
    Gnss,
    Range,
}

/// Notification identifiers used by one sensor's correction unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorEvents {
    pub initialized: EventId,
    pub fault: EventId,
    pub recovered: EventId,
    pub timeout: EventId,
}

impl SensorKind {
    /// Human readable name used in notifications.
    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Baro => "Baro",
            SensorKind::Gnss => "GNSS",
            SensorKind::Range => "Range",
        }
    }

    pub fn events(self) -> SensorEvents {
        match self {
            SensorKind::Baro => SensorEvents {
                initialized: EventId::BaroInitialized,
                fault: EventId::BaroFault,
                recovered: EventId::BaroRecovered,
                timeout: EventId::BaroTimeout,
            },
            SensorKind::Gnss => SensorEvents {
                initialized: EventId::GnssInitialized,
                fault: EventId::GnssFault,
                recovered: EventId::GnssRecovered,
                timeout: EventId::GnssTimeout,
            },
            SensorKind::Range => SensorEvents {
                initialized: EventId::RangeInitialized,
                fault: EventId::RangeFault,
                recovered: EventId::RangeRecovered,
                timeout: EventId::RangeTimeout,
            },
        }
    }

    /// Label of the performance span wrapping this sensor's correction cycle.
    pub fn perf_label(self) -> &'static str {
        match self {
            SensorKind::Baro => "baro_correct",
            SensorKind::Gnss => "gnss_correct",
            SensorKind::Range => "range_correct",
        }
    }
}

impl Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A sample was delivered but cannot be used.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MeasurementError {
    #[error("{sensor} reading is not finite")]
    NonFinite { sensor: SensorKind },
    #[error("{sensor} reading {value} outside [{min}, {max}]")]
    OutOfRange {
        sensor: SensorKind,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// A usable sample together with its noise covariance.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading<const D: usize> {
    /// Raw measurement, before the origin offset is removed
    pub value: Vector<D>,
    /// Measurement noise covariance `R`
    pub noise: Matrix<D, D>,
}

/// A `D`-dimensional linear measurement of the state.
pub trait MeasurementModel<const D: usize> {
    fn kind(&self) -> SensorKind;

    /// Extract this sensor's sample from a frame.
    ///
    /// Returns `None` when the frame carries no new sample for this sensor, `Some(Err(_))` when the
    /// sample is present but unusable.
    fn read(&self, frame: &SensorFrame) -> Option<Result<Reading<D>, MeasurementError>>;

    /// Observation matrix `H` mapping the state to measurement space.
    fn observation_matrix(&self) -> Matrix<D, N_X>;
}

/// Barometric altitude.
///
/// Altitude is positive up while the state's `z` is positive down, so `H` has a single `−1` in the
/// `z` column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BaroMeasurement {
    pub stddev_m: f64,
}

impl BaroMeasurement {
    pub fn new(stddev_m: f64) -> Self {
        BaroMeasurement { stddev_m }
    }
}

impl MeasurementModel<1> for BaroMeasurement {
    fn kind(&self) -> SensorKind {
        SensorKind::Baro
    }

    fn read(&self, frame: &SensorFrame) -> Option<Result<Reading<1>, MeasurementError>> {
        let altitude = frame.baro_alt_m?;
        if !altitude.is_finite() {
            return Some(Err(MeasurementError::NonFinite {
                sensor: SensorKind::Baro,
            }));
        }
        Some(Ok(Reading {
            value: Vector::<1>::new(altitude),
            noise: Matrix::<1, 1>::new(self.stddev_m * self.stddev_m),
        }))
    }

    fn observation_matrix(&self) -> Matrix<1, N_X> {
        let mut h = Matrix::<1, N_X>::zeros();
        h[(0, X_Z)] = -1.0;
        h
    }
}

/// GNSS position in the local tangent plane: north, east and altitude.
///
/// The noise of each axis is the larger of the configured floor and the error the receiver reports
/// for that fix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GnssPositionMeasurement {
    pub xy_stddev_m: f64,
    pub z_stddev_m: f64,
}

impl GnssPositionMeasurement {
    pub fn new(xy_stddev_m: f64, z_stddev_m: f64) -> Self {
        GnssPositionMeasurement {
            xy_stddev_m,
            z_stddev_m,
        }
    }
}

impl MeasurementModel<3> for GnssPositionMeasurement {
    fn kind(&self) -> SensorKind {
        SensorKind::Gnss
    }

    fn read(&self, frame: &SensorFrame) -> Option<Result<Reading<3>, MeasurementError>> {
        let fix = frame.gnss?;
        let fields = [fix.north_m, fix.east_m, fix.altitude_m, fix.eph_m, fix.epv_m];
        if fields.iter().any(|v| !v.is_finite()) {
            return Some(Err(MeasurementError::NonFinite {
                sensor: SensorKind::Gnss,
            }));
        }
        let var_xy = self.xy_stddev_m.max(fix.eph_m).powi(2);
        let var_z = self.z_stddev_m.max(fix.epv_m).powi(2);
        Some(Ok(Reading {
            value: Vector::<3>::new(fix.north_m, fix.east_m, fix.altitude_m),
            noise: Matrix::<3, 3>::from_diagonal(&Vector::<3>::new(var_xy, var_xy, var_z)),
        }))
    }

    fn observation_matrix(&self) -> Matrix<3, N_X> {
        let mut h = Matrix::<3, N_X>::zeros();
        h[(0, X_X)] = 1.0;
        h[(1, X_Y)] = 1.0;
        h[(2, X_Z)] = -1.0;
        h
    }
}

/// Downward rangefinder: height above the terrain, `tz − z`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangeMeasurement {
    pub stddev_m: f64,
    pub min_m: f64,
    pub max_m: f64,
}

impl RangeMeasurement {
    pub fn new(stddev_m: f64, min_m: f64, max_m: f64) -> Self {
        RangeMeasurement {
            stddev_m,
            min_m,
            max_m,
        }
    }
}

impl MeasurementModel<1> for RangeMeasurement {
    fn kind(&self) -> SensorKind {
        SensorKind::Range
    }

    fn read(&self, frame: &SensorFrame) -> Option<Result<Reading<1>, MeasurementError>> {
        let distance = frame.range_m?;
        if !distance.is_finite() {
            return Some(Err(MeasurementError::NonFinite {
                sensor: SensorKind::Range,
            }));
        }
        if distance < self.min_m || distance > self.max_m {
            return Some(Err(MeasurementError::OutOfRange {
                sensor: SensorKind::Range,
                value: distance,
                min: self.min_m,
                max: self.max_m,
            }));
        }
        Some(Ok(Reading {
            value: Vector::<1>::new(distance),
            noise: Matrix::<1, 1>::new(self.stddev_m * self.stddev_m),
        }))
    }

    fn observation_matrix(&self) -> Matrix<1, N_X> {
        let mut h = Matrix::<1, N_X>::zeros();
        h[(0, X_Z)] = -1.0;
        h[(0, X_TZ)] = 1.0;
        h
    }
}
