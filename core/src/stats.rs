//! Running statistics for sensor warm-up.
//!
//! A sensor is only trusted after it has produced a run of valid samples. [RunningStats] accumulates
//! those samples so the estimator can capture their mean as the sensor's origin offset and report the
//! spread in the initialization notification.

use crate::linalg::Vector;

/// Count, mean and (population) variance of a stream of `D`-dimensional samples.
#[derive(Clone, Debug, PartialEq)]
pub struct RunningStats<const D: usize> {
    count: usize,
    mean: Vector<D>,
    /// Sum of squared deviations from the running mean
    m2: Vector<D>,
}

impl<const D: usize> Default for RunningStats<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> RunningStats<D> {
    pub fn new() -> Self {
        RunningStats {
            count: 0,
            mean: Vector::<D>::zeros(),
            m2: Vector::<D>::zeros(),
        }
    }

    /// Fold one sample into the accumulator (Welford's update).
    pub fn update(&mut self, sample: &Vector<D>) {
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta.component_mul(&(sample - self.mean));
    }

    /// Discard every accumulated sample.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean of the accumulated samples, zero when empty.
    pub fn mean(&self) -> Vector<D> {
        self.mean
    }

    /// Population variance per component, zero when empty.
    pub fn variance(&self) -> Vector<D> {
        if self.count == 0 {
            return Vector::<D>::zeros();
        }
        self.m2 / self.count as f64
    }

    pub fn std_dev(&self) -> Vector<D> {
        self.variance().map(f64::sqrt)
    }
}
