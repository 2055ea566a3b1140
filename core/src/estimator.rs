//! State/covariance store and the scheduling loop.
//!
//! [PositionEstimator] owns the state vector, its covariance and one correction unit per sensor. A
//! single call to [PositionEstimator::update] processes one [SensorFrame] in a fixed order:
//!
//! 1. prediction, when the frame carries an acceleration sample and time has advanced;
//! 2. barometer, then GNSS, then rangefinder: warm-up if not yet initialized, correction otherwise;
//! 3. every sensor's staleness check.
//!
//! ## Prediction model
//!
//! Position integrates velocity and velocity integrates the bias-corrected acceleration:
//!
//! $$
//! \dot{p} = v, \qquad \dot{v} = a - b, \qquad \dot{b} = 0, \qquad \dot{t} = 0
//! $$
//!
//! which gives the continuous-time system `ẋ = A x + B u`. The state and covariance are propagated
//! with a first-order step:
//!
//! $$
//! \begin{aligned}
//! x &\leftarrow x + (A x + B u)\,dt \\\\
//! P &\leftarrow P + (A P + P A^T + B R_u B^T + Q)\,dt
//! \end{aligned}
//! $$

use log::{debug, info};
use nalgebra::Vector3;

use crate::config::EstimatorParams;
use crate::correction::{CorrectionOutcome, CorrectorSettings, SensorCorrector};
use crate::events::EventSink;
use crate::linalg::{Matrix, symmetrize};
use crate::measurements::{
    BaroMeasurement, GnssPositionMeasurement, RangeMeasurement, SensorKind,
};
use crate::messages::SensorFrame;
use crate::{
    N_X, StateCovariance, StateVector, X_BX, X_BY, X_BZ, X_TZ, X_VX, X_VY, X_VZ, X_X, X_Y, X_Z,
};

/// What happened during one call to [PositionEstimator::update].
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateReport {
    pub predicted: bool,
    pub baro: CorrectionOutcome,
    pub gnss: CorrectionOutcome,
    pub range: CorrectionOutcome,
    /// Sensors declared stale during this cycle
    pub timed_out: Vec<SensorKind>,
}

/// Local position estimator.
#[derive(Clone, Debug)]
pub struct PositionEstimator {
    params: EstimatorParams,
    x: StateVector,
    p: StateCovariance,
    baro: SensorCorrector<BaroMeasurement, 1>,
    gnss: SensorCorrector<GnssPositionMeasurement, 3>,
    range: SensorCorrector<RangeMeasurement, 1>,
    alt_origin: Option<f64>,
    last_timestamp_us: Option<u64>,
    /// Continuous-time dynamics
    a: StateCovariance,
    /// Acceleration input matrix
    b: Matrix<N_X, 3>,
    /// Accelerometer noise covariance
    r_accel: Matrix<3, 3>,
    /// Process noise
    q: StateCovariance,
}

impl PositionEstimator {
    pub fn new(params: EstimatorParams) -> Self {
        let baro = SensorCorrector::new(
            BaroMeasurement::new(params.baro_stddev_m),
            CorrectorSettings::for_sensor(SensorKind::Baro, &params),
        );
        let gnss = SensorCorrector::new(
            GnssPositionMeasurement::new(params.gnss_xy_stddev_m, params.gnss_z_stddev_m),
            CorrectorSettings::for_sensor(SensorKind::Gnss, &params),
        );
        let range = SensorCorrector::new(
            RangeMeasurement::new(params.range_stddev_m, params.range_min_m, params.range_max_m),
            CorrectorSettings::for_sensor(SensorKind::Range, &params),
        );
        PositionEstimator {
            x: StateVector::zeros(),
            p: initial_covariance(&params),
            a: dynamics_matrix(),
            b: input_matrix(),
            r_accel: accel_noise(&params),
            q: process_noise(&params),
            baro,
            gnss,
            range,
            alt_origin: None,
            last_timestamp_us: None,
            params,
        }
    }

    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }

    pub fn state(&self) -> &StateVector {
        &self.x
    }

    pub fn covariance(&self) -> &StateCovariance {
        &self.p
    }

    pub fn baro(&self) -> &SensorCorrector<BaroMeasurement, 1> {
        &self.baro
    }

    pub fn gnss(&self) -> &SensorCorrector<GnssPositionMeasurement, 3> {
        &self.gnss
    }

    pub fn range(&self) -> &SensorCorrector<RangeMeasurement, 1> {
        &self.range
    }

    /// Altitude (m above mean sea level) of the local frame origin, set by the first sensor to
    /// finish its warm-up.
    pub fn alt_origin(&self) -> Option<f64> {
        self.alt_origin
    }

    /// Estimated altitude above mean sea level.
    pub fn altitude(&self) -> Option<f64> {
        self.alt_origin.map(|origin| origin - self.x[X_Z])
    }

    /// Estimated height above the terrain.
    pub fn height_above_ground(&self) -> f64 {
        self.x[X_TZ] - self.x[X_Z]
    }

    /// Propagate the state and covariance forward by `dt` seconds.
    ///
    /// Non-positive or non-finite `dt` leaves the estimate unchanged.
    pub fn predict(&mut self, accel_ned: &Vector3<f64>, dt: f64) {
        if !(dt > 0.0 && dt.is_finite()) {
            return;
        }
        let dx = (self.a * self.x + self.b * accel_ned) * dt;
        let dp = (self.a * self.p
            + self.p * self.a.transpose()
            + self.b * self.r_accel * self.b.transpose()
            + self.q)
            * dt;
        self.x += dx;
        self.p = symmetrize(&(self.p + dp));
    }

    /// Run one estimator cycle on `frame`.
    pub fn update(&mut self, frame: &SensorFrame, events: &mut dyn EventSink) -> UpdateReport {
        let now = frame.timestamp_us;
        let dt = match self.last_timestamp_us {
            Some(last) if now > last => (now - last) as f64 * 1e-6,
            _ => 0.0,
        };
        self.last_timestamp_us = Some(now);

        let mut predicted = false;
        if let Some(accel) = frame.accel_ned {
            if dt > 0.0 {
                self.predict(&accel, dt);
                predicted = true;
            }
        }

        let baro = self.baro.update(frame, &mut self.x, &mut self.p, events);
        if baro == CorrectionOutcome::Initialized {
            if let Some(altitude) = self.baro.origin().map(|o| o[0]) {
                self.set_alt_origin(SensorKind::Baro, altitude);
            }
        }

        let gnss = self.gnss.update(frame, &mut self.x, &mut self.p, events);
        if gnss == CorrectionOutcome::Initialized {
            if let Some(altitude) = self.gnss.origin().map(|o| o[2]) {
                self.set_alt_origin(SensorKind::Gnss, altitude);
            }
        }

        let range = self.range.update(frame, &mut self.x, &mut self.p, events);

        let mut timed_out = Vec::new();
        if self.baro.check_timeout(now, events) {
            timed_out.push(SensorKind::Baro);
        }
        if self.gnss.check_timeout(now, events) {
            timed_out.push(SensorKind::Gnss);
        }
        if self.range.check_timeout(now, events) {
            timed_out.push(SensorKind::Range);
        }

        UpdateReport {
            predicted,
            baro,
            gnss,
            range,
            timed_out,
        }
    }

    fn set_alt_origin(&mut self, source: SensorKind, altitude: f64) {
        if self.alt_origin.is_none() {
            info!("altitude origin {:.2} m set from {}", altitude, source);
            self.alt_origin = Some(altitude);
        } else {
            debug!("{} initialized, altitude origin already set", source);
        }
    }
}

fn initial_covariance(params: &EstimatorParams) -> StateCovariance {
    let mut p = StateCovariance::zeros();
    for i in [X_X, X_Y, X_Z] {
        p[(i, i)] = params.init_position_variance;
    }
    for i in [X_VX, X_VY, X_VZ] {
        p[(i, i)] = params.init_velocity_variance;
    }
    for i in [X_BX, X_BY, X_BZ] {
        p[(i, i)] = params.init_bias_variance;
    }
    p[(X_TZ, X_TZ)] = params.init_terrain_variance;
    p
}

fn dynamics_matrix() -> StateCovariance {
    let mut a = StateCovariance::zeros();
    // position derivative is velocity
    a[(X_X, X_VX)] = 1.0;
    a[(X_Y, X_VY)] = 1.0;
    a[(X_Z, X_VZ)] = 1.0;
    // velocity derivative is bias-corrected acceleration
    a[(X_VX, X_BX)] = -1.0;
    a[(X_VY, X_BY)] = -1.0;
    a[(X_VZ, X_BZ)] = -1.0;
    a
}

fn input_matrix() -> Matrix<N_X, 3> {
    let mut b = Matrix::<N_X, 3>::zeros();
    b[(X_VX, 0)] = 1.0;
    b[(X_VY, 1)] = 1.0;
    b[(X_VZ, 2)] = 1.0;
    b
}

fn accel_noise(params: &EstimatorParams) -> Matrix<3, 3> {
    let xy = params.accel_xy_stddev.powi(2);
    let z = params.accel_z_stddev.powi(2);
    Matrix::<3, 3>::from_diagonal(&Vector3::new(xy, xy, z))
}

fn process_noise(params: &EstimatorParams) -> StateCovariance {
    let mut q = StateCovariance::zeros();
    for i in [X_X, X_Y, X_Z] {
        q[(i, i)] = params.pn_position_density.powi(2);
    }
    for i in [X_VX, X_VY, X_VZ] {
        q[(i, i)] = params.pn_velocity_density.powi(2);
    }
    for i in [X_BX, X_BY, X_BZ] {
        q[(i, i)] = params.pn_bias_density.powi(2);
    }
    q[(X_TZ, X_TZ)] = params.pn_terrain_density.powi(2);
    q
}
