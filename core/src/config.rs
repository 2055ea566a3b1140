//! Estimator parameters.
//!
//! [EstimatorParams] gathers every tunable of the filter: sensor noise, process noise, warm-up
//! counts, staleness timeouts and the two policy switches for the correction step. Parameters can be
//! written to and read from JSON, YAML or TOML, with the format chosen from the file extension.
//!
//! ## Example
//!
//! ```
//! use flightcore::config::{EstimatorParams, FaultPolicy};
//!
//! let params = EstimatorParams {
//!     baro_stddev_m: 1.0,
//!     fault_policy: FaultPolicy::Reject,
//!     ..Default::default()
//! };
//! assert_eq!(params.baro_init_count, 100);
//! ```

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use thiserror::Error;

/// What the correction step does with a measurement that fails the fault gate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// The fault flag is reported but the correction is applied anyway.
    #[default]
    Advisory,
    /// While the fault flag is set the state and covariance are left untouched.
    Reject,
}

/// Covariance update form used after each correction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceForm {
    /// P ← (I − KH) P (I − KH)ᵀ + K R Kᵀ, symmetrized
    #[default]
    Joseph,
    /// P ← P − K H P
    Subtractive,
}

/// Errors raised while loading or saving parameter files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("unsupported file extension: {0:?}")]
    UnsupportedExtension(Option<String>),
}

/// Tunable parameters of the position estimator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorParams {
    /// Barometric altitude noise (m, 1σ)
    pub baro_stddev_m: f64,
    /// GNSS horizontal noise floor (m, 1σ)
    pub gnss_xy_stddev_m: f64,
    /// GNSS vertical noise floor (m, 1σ)
    pub gnss_z_stddev_m: f64,
    /// Rangefinder noise (m, 1σ)
    pub range_stddev_m: f64,
    /// Shortest valid rangefinder reading (m)
    pub range_min_m: f64,
    /// Longest valid rangefinder reading (m)
    pub range_max_m: f64,

    /// Horizontal accelerometer noise (m/s², 1σ)
    pub accel_xy_stddev: f64,
    /// Vertical accelerometer noise (m/s², 1σ)
    pub accel_z_stddev: f64,
    /// Position process noise density
    pub pn_position_density: f64,
    /// Velocity process noise density
    pub pn_velocity_density: f64,
    /// Accelerometer bias process noise density
    pub pn_bias_density: f64,
    /// Terrain process noise density
    pub pn_terrain_density: f64,

    /// Initial position variance (m²)
    pub init_position_variance: f64,
    /// Initial velocity variance (m²/s²)
    pub init_velocity_variance: f64,
    /// Initial accelerometer bias variance
    pub init_bias_variance: f64,
    /// Initial terrain variance (m²)
    pub init_terrain_variance: f64,

    /// Valid barometer samples that must be exceeded before the baro origin is captured
    pub baro_init_count: usize,
    /// Valid GNSS samples that must be exceeded before the GNSS origin is captured
    pub gnss_init_count: usize,
    /// Valid rangefinder samples that must be exceeded before the rangefinder origin is captured
    pub range_init_count: usize,

    /// Barometer staleness timeout (µs)
    pub baro_timeout_us: u64,
    /// GNSS staleness timeout (µs)
    pub gnss_timeout_us: u64,
    /// Rangefinder staleness timeout (µs)
    pub range_timeout_us: u64,

    pub fault_policy: FaultPolicy,
    pub covariance_form: CovarianceForm,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        EstimatorParams {
            baro_stddev_m: 3.0,
            gnss_xy_stddev_m: 1.0,
            gnss_z_stddev_m: 3.0,
            range_stddev_m: 0.05,
            range_min_m: 0.02,
            range_max_m: 40.0,
            accel_xy_stddev: 0.012,
            accel_z_stddev: 0.02,
            pn_position_density: 0.1,
            pn_velocity_density: 0.1,
            pn_bias_density: 1e-3,
            pn_terrain_density: 1e-3,
            init_position_variance: 1.0,
            init_velocity_variance: 1.0,
            init_bias_variance: 1e-3,
            init_terrain_variance: 1.0,
            baro_init_count: 100,
            gnss_init_count: 10,
            range_init_count: 10,
            baro_timeout_us: 100_000,
            gnss_timeout_us: 1_000_000,
            range_timeout_us: 150_000,
            fault_policy: FaultPolicy::Advisory,
            covariance_form: CovarianceForm::Joseph,
        }
    }
}

impl EstimatorParams {
    /// Write the parameters to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Read the parameters from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Write the parameters as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }

    /// Read the parameters from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    /// Write the parameters as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }

    /// Read the parameters from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        Ok(toml::from_str(&s)?)
    }

    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            other => Err(ConfigError::UnsupportedExtension(other.map(str::to_string))),
        }
    }

    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            other => Err(ConfigError::UnsupportedExtension(other.map(str::to_string))),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn custom_params() -> EstimatorParams {
        EstimatorParams {
            baro_stddev_m: 1.5,
            baro_init_count: 42,
            gnss_timeout_us: 2_000_000,
            fault_policy: FaultPolicy::Reject,
            covariance_form: CovarianceForm::Subtractive,
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_reference_tuning() {
        let p = EstimatorParams::default();
        assert_eq!(p.baro_init_count, 100);
        assert_eq!(p.baro_timeout_us, 100_000);
        assert_eq!(p.fault_policy, FaultPolicy::Advisory);
        assert_eq!(p.covariance_form, CovarianceForm::Joseph);
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.json");
        let params = custom_params();
        params.to_file(&path).unwrap();
        let loaded = EstimatorParams::from_file(&path).unwrap();
        assert_eq!(params, loaded);
    }

    #[test]
    fn yaml_and_toml_file_round_trip() {
        let dir = tempdir().unwrap();
        let params = custom_params();
        for name in ["params.yaml", "params.toml"] {
            let path = dir.path().join(name);
            params.to_file(&path).unwrap();
            let loaded = EstimatorParams::from_file(&path).unwrap();
            assert_eq!(params, loaded, "format {}", name);
        }
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: EstimatorParams =
            toml::from_str("baro_stddev_m = 0.5\nfault_policy = \"reject\"\n").unwrap();
        assert_eq!(parsed.baro_stddev_m, 0.5);
        assert_eq!(parsed.fault_policy, FaultPolicy::Reject);
        assert_eq!(parsed.baro_init_count, 100);
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let err = EstimatorParams::default().to_file("params.ini").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedExtension(Some(ref e)) if e == "ini"));
        assert!(EstimatorParams::from_file("params").is_err());
    }
}
