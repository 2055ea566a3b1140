//! The per-sensor correction unit.
//!
//! [SensorCorrector] owns everything that is private to one sensor: the warm-up statistics, the
//! origin offset captured at the end of warm-up, the latched fault flag, the staleness timer and the
//! [MeasurementContext] of the most recent cycle. The state vector and covariance are shared by all
//! sensors and are borrowed for the duration of a single cycle.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──sample──▶ Accumulating ──count > init_count──▶ Initialized
//!        ▲                                                           │
//!        └──────────────────────── timeout ──────────────────────────┘
//! ```
//!
//! Once initialized, every cycle runs the standard linear Kalman correction
//!
//! $$
//! \begin{aligned}
//! S &= H P H^T + R \\\\
//! r &= y - H x \\\\
//! \beta &= r^T S^{-1} r \\\\
//! K &= P H^T S^{-1} \\\\
//! x &\leftarrow x + K r
//! \end{aligned}
//! $$
//!
//! and gates the normalized innovation squared $\beta$ against the chi-square threshold for the
//! measurement's degrees of freedom. The gate drives a latched fault flag that is reported once per
//! edge.

use log::{debug, warn};

use crate::config::{CovarianceForm, EstimatorParams, FaultPolicy};
use crate::events::{EventSink, PerfSpan};
use crate::linalg::{
    Matrix, Vector, invert_innovation, joseph_update, quadratic_form, subtractive_update,
};
use crate::measurements::{MeasurementModel, SensorKind};
use crate::messages::SensorFrame;
use crate::stats::RunningStats;
use crate::{N_X, StateCovariance, StateVector};

/// 99.5 % chi-square thresholds indexed by degrees of freedom.
pub const BETA_TABLE: [f64; 11] = [
    0.0,
    8.82050518214,
    12.094592431,
    13.9876612368,
    16.0875642296,
    17.8797700658,
    19.6465647819,
    21.3802576894,
    23.0806434845,
    24.6673803845,
    26.1487953661,
];

/// Fault threshold for a measurement with `dof` degrees of freedom.
///
/// Dimensions beyond the table use its last entry.
pub fn beta_threshold(dof: usize) -> f64 {
    BETA_TABLE
        .get(dof)
        .copied()
        .unwrap_or(BETA_TABLE[BETA_TABLE.len() - 1])
}

/// Where a sensor is in its warm-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorPhase {
    /// No valid sample since start-up or the last reset
    Uninitialized,
    /// Collecting warm-up samples
    Accumulating,
    /// Origin captured; corrections run every cycle
    Initialized,
}

/// Intermediate quantities of the most recent correction cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementContext<const D: usize> {
    /// Measurement with the origin offset removed
    pub y: Vector<D>,
    pub h: Matrix<D, N_X>,
    pub r: Matrix<D, D>,
    /// Innovation `y − H x`
    pub residual: Vector<D>,
    pub s: Matrix<D, D>,
    pub s_inv: Matrix<D, D>,
    /// Normalized innovation squared
    pub beta: f64,
    pub gain: Matrix<N_X, D>,
    pub dx: StateVector,
}

impl<const D: usize> Default for MeasurementContext<D> {
    fn default() -> Self {
        MeasurementContext {
            y: Vector::<D>::zeros(),
            h: Matrix::<D, N_X>::zeros(),
            r: Matrix::<D, D>::zeros(),
            residual: Vector::<D>::zeros(),
            s: Matrix::<D, D>::zeros(),
            s_inv: Matrix::<D, D>::zeros(),
            beta: 0.0,
            gain: Matrix::<N_X, D>::zeros(),
            dx: StateVector::zeros(),
        }
    }
}

/// Result of running one sensor for one cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CorrectionOutcome {
    /// The frame carried no sample for this sensor
    Skipped,
    /// The sample was unusable; warm-up statistics were reset
    ReadFailed,
    /// Warm-up sample accepted
    Initializing { count: usize },
    /// Warm-up finished on this sample
    Initialized,
    /// The innovation covariance could not be inverted; nothing was changed
    Degenerate,
    /// State and covariance were updated
    Applied { faulted: bool },
    /// Faulted sample withheld from the state under [FaultPolicy::Reject]
    Rejected,
    /// A correction was requested before warm-up finished
    NotInitialized,
}

/// Per-sensor tuning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CorrectorSettings {
    /// Warm-up samples that must be exceeded before the origin is captured
    pub init_count: usize,
    /// Staleness timeout (µs)
    pub timeout_us: u64,
    pub fault_policy: FaultPolicy,
    pub covariance_form: CovarianceForm,
}

impl CorrectorSettings {
    /// Settings for `kind` taken from the estimator parameters.
    pub fn for_sensor(kind: SensorKind, params: &EstimatorParams) -> Self {
        let (init_count, timeout_us) = match kind {
            SensorKind::Baro => (params.baro_init_count, params.baro_timeout_us),
            SensorKind::Gnss => (params.gnss_init_count, params.gnss_timeout_us),
            SensorKind::Range => (params.range_init_count, params.range_timeout_us),
        };
        CorrectorSettings {
            init_count,
            timeout_us,
            fault_policy: params.fault_policy,
            covariance_form: params.covariance_form,
        }
    }
}

/// Correction unit for one sensor with a `D`-dimensional measurement.
#[derive(Clone, Debug)]
pub struct SensorCorrector<M, const D: usize> {
    model: M,
    settings: CorrectorSettings,
    stats: RunningStats<D>,
    origin: Option<Vector<D>>,
    context: MeasurementContext<D>,
    faulted: bool,
    timed_out: bool,
    valid: bool,
    last_valid_us: u64,
}

impl<M: MeasurementModel<D>, const D: usize> SensorCorrector<M, D> {
    pub fn new(model: M, settings: CorrectorSettings) -> Self {
        SensorCorrector {
            model,
            settings,
            stats: RunningStats::new(),
            origin: None,
            context: MeasurementContext::default(),
            faulted: false,
            // stale until the first warm-up completes
            timed_out: true,
            valid: false,
            last_valid_us: 0,
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.model.kind()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn settings(&self) -> &CorrectorSettings {
        &self.settings
    }

    pub fn phase(&self) -> SensorPhase {
        if self.origin.is_some() {
            SensorPhase::Initialized
        } else if self.stats.count() > 0 {
            SensorPhase::Accumulating
        } else {
            SensorPhase::Uninitialized
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.origin.is_some()
    }

    /// Origin offset captured at the end of warm-up.
    pub fn origin(&self) -> Option<&Vector<D>> {
        self.origin.as_ref()
    }

    pub fn stats(&self) -> &RunningStats<D> {
        &self.stats
    }

    /// Quantities computed by the most recent correction cycle.
    pub fn context(&self) -> &MeasurementContext<D> {
        &self.context
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// Whether the rest of the system may treat this sensor as initialized.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn last_valid_us(&self) -> u64 {
        self.last_valid_us
    }

    /// Run this sensor for one cycle: warm-up until initialized, correction afterwards.
    pub fn update(
        &mut self,
        frame: &SensorFrame,
        x: &mut StateVector,
        p: &mut StateCovariance,
        events: &mut dyn EventSink,
    ) -> CorrectionOutcome {
        if self.is_initialized() {
            self.correct(frame, x, p, events)
        } else {
            self.initialize(frame, events)
        }
    }

    /// Fold one warm-up sample into the running statistics.
    ///
    /// When the sample count exceeds `init_count` the mean becomes the origin offset, the timeout
    /// flag is cleared and an information notification reports the mean and spread.
    pub fn initialize(
        &mut self,
        frame: &SensorFrame,
        events: &mut dyn EventSink,
    ) -> CorrectionOutcome {
        let reading = match self.model.read(frame) {
            None => return CorrectionOutcome::Skipped,
            Some(Err(e)) => {
                warn!("{} warm-up read failed: {}", self.kind(), e);
                self.stats.reset();
                return CorrectionOutcome::ReadFailed;
            }
            Some(Ok(reading)) => reading,
        };
        self.last_valid_us = frame.timestamp_us;
        self.stats.update(&reading.value);

        let count = self.stats.count();
        if count <= self.settings.init_count {
            return CorrectionOutcome::Initializing { count };
        }

        let mean = self.stats.mean();
        let std_dev = self.stats.std_dev();
        self.origin = Some(mean);
        self.timed_out = false;
        self.valid = true;
        events.info(
            self.kind().events().initialized,
            format!(
                "{} initialized. Mean {} m Std dev {} cm",
                self.kind(),
                format_components(&mean, 1.0, 2),
                format_components(&std_dev, 100.0, 0),
            ),
        );
        CorrectionOutcome::Initialized
    }

    /// Correct the shared state with this cycle's sample.
    ///
    /// Nothing is mutated when the sample is missing, unreadable, or yields a non-invertible
    /// innovation covariance.
    pub fn correct(
        &mut self,
        frame: &SensorFrame,
        x: &mut StateVector,
        p: &mut StateCovariance,
        events: &mut dyn EventSink,
    ) -> CorrectionOutcome {
        let _span = PerfSpan::enter(self.kind().perf_label());

        let reading = match self.model.read(frame) {
            None => return CorrectionOutcome::Skipped,
            Some(Err(e)) => {
                warn!("{} read failed: {}", self.kind(), e);
                self.stats.reset();
                return CorrectionOutcome::ReadFailed;
            }
            Some(Ok(reading)) => reading,
        };
        let Some(origin) = self.origin else {
            return CorrectionOutcome::NotInitialized;
        };
        self.last_valid_us = frame.timestamp_us;

        let y = reading.value - origin;
        let h = self.model.observation_matrix();
        let r = reading.noise;

        // Innovation covariance: S = H * P * H^T + R
        let s = h * *p * h.transpose() + r;
        let Some(s_inv) = invert_innovation(&s) else {
            warn!("{} innovation covariance is singular, skipping", self.kind());
            self.context = MeasurementContext {
                y,
                h,
                r,
                s,
                ..Default::default()
            };
            return CorrectionOutcome::Degenerate;
        };

        // Innovation: r = y - H * x
        let residual = y - h * *x;
        let beta = quadratic_form(&residual, &s_inv);
        self.gate(&residual, beta, events);

        // Kalman gain: K = P * H^T * S^-1
        let gain = *p * h.transpose() * s_inv;
        let dx = gain * residual;
        debug!(
            "{} correction: beta {:.3}, |dx| {:.4}",
            self.kind(),
            beta,
            dx.norm()
        );
        self.context = MeasurementContext {
            y,
            h,
            r,
            residual,
            s,
            s_inv,
            beta,
            gain,
            dx,
        };

        if self.faulted && self.settings.fault_policy == FaultPolicy::Reject {
            return CorrectionOutcome::Rejected;
        }

        *x += dx;
        *p = match self.settings.covariance_form {
            CovarianceForm::Joseph => joseph_update(p, &gain, &h, &r),
            CovarianceForm::Subtractive => subtractive_update(p, &gain, &h),
        };
        CorrectionOutcome::Applied {
            faulted: self.faulted,
        }
    }

    /// Latch or clear the fault flag, notifying once per edge.
    ///
    /// This is the only place the flag changes; warm-up and timeouts leave it latched.
    fn gate(&mut self, residual: &Vector<D>, beta: f64, events: &mut dyn EventSink) {
        let ids = self.kind().events();
        if beta > beta_threshold(D) {
            if !self.faulted {
                self.faulted = true;
                events.error(
                    ids.fault,
                    format!(
                        "{} fault, r {} m, beta {:.2}",
                        self.kind(),
                        format_components(residual, 1.0, 2),
                        beta
                    ),
                );
            }
        } else if self.faulted {
            self.faulted = false;
            self.valid = true;
            events.info(ids.recovered, format!("{} OK", self.kind()));
        }
    }

    /// Check for staleness.
    ///
    /// When more than `timeout_us` has passed since the last valid sample, the sensor is marked
    /// timed out, its warm-up statistics and origin are discarded and one error notification is
    /// emitted. Returns `true` only on the cycle where the timeout is declared.
    pub fn check_timeout(&mut self, now_us: u64, events: &mut dyn EventSink) -> bool {
        let elapsed = now_us.abs_diff(self.last_valid_us);
        if elapsed <= self.settings.timeout_us || self.timed_out {
            return false;
        }
        self.timed_out = true;
        self.valid = false;
        self.stats.reset();
        self.origin = None;
        events.error(
            self.kind().events().timeout,
            format!("{} timeout: {} us", self.kind(), elapsed),
        );
        true
    }
}

fn format_components<const D: usize>(v: &Vector<D>, scale: f64, precision: usize) -> String {
    v.iter()
        .map(|c| format!("{:.*}", precision, c * scale))
        .collect::<Vec<_>>()
        .join(", ")
}
