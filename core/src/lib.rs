//! Flight state estimation core and vehicle mode management
//!
//! This crate provides the two pieces of a flight-control stack that carry real algorithmic weight:
//! an Extended Kalman Filter that fuses asynchronous sensor streams into a single local position
//! estimate, and the vehicle mode state machine that decides which flight mode is active and what
//! happens on every mode change. Everything around those two pieces (the message bus, the sensor
//! drivers, the telemetry downlink) is treated as an external collaborator and shows up here only
//! as a trait or a plain data type.
//!
//! This crate is primarily built off of the following dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): fixed-size matrix and vector types. Every matrix in
//!   the filter carries its shape in its type, so a product of non-conformant shapes does not compile.
//! - [`serde`](https://crates.io/crates/serde): parameter files (JSON, YAML, TOML) and CSV replay records.
//! - [`log`](https://crates.io/crates/log): diagnostics. The crate never installs a logger itself.
//! - [`thiserror`](https://crates.io/crates/thiserror): error types.
//!
//! ## Crate overview
//!
//! - [linalg]: fixed-dimension matrix helpers (inversion, quadratic forms, covariance update forms).
//! - [stats]: running mean/variance accumulators used for sensor warm-up.
//! - [measurements]: measurement models mapping raw sensor samples into the state space.
//! - [correction]: the per-sensor correction unit (warm-up, innovation, fault gate, Kalman update) and
//!   its staleness monitor.
//! - [estimator]: the state/covariance store and the fixed-order scheduling loop that drives prediction
//!   and every sensor's correction.
//! - [modes]: the vehicle mode state machine.
//! - [events]: classified notifications with stable numeric identifiers.
//! - [messages]: inbound sensor frames, outbound vehicle commands and the shared status record.
//! - [config]: estimator parameters and their file formats.
//! - [sim]: CSV replay and synthetic flight generation for offline testing.
//!
//! ## State definition
//!
//! The estimator works in a local North-East-Down frame anchored at the point where the sensors
//! finished their warm-up. The ten-element state vector is:
//!
//! $$
//! x = [p_n, p_e, p_d, v_n, v_e, v_d, b_n, b_e, b_d, t_d]
//! $$
//!
//! Where:
//! - $p_n$, $p_e$, $p_d$ are the local position (m). Altitude is $-p_d$.
//! - $v_n$, $v_e$, $v_d$ are the NED velocity (m/s).
//! - $b_n$, $b_e$, $b_d$ are the accelerometer bias expressed in the NED frame (m/s²).
//! - $t_d$ is the terrain position along the down axis (m); height above ground is $t_d - p_d$.
//!
//! The index constants below ([X_X] … [X_TZ]) name these slots; measurement models build their
//! observation matrices from them.

pub mod config;
pub mod correction;
pub mod estimator;
pub mod events;
pub mod linalg;
pub mod measurements;
pub mod messages;
pub mod modes;
pub mod sim;
pub mod stats;

use nalgebra::{SMatrix, SVector};

/// Number of elements in the estimator state vector.
pub const N_X: usize = 10;

/// North position index.
pub const X_X: usize = 0;
/// East position index.
pub const X_Y: usize = 1;
/// Down position index.
pub const X_Z: usize = 2;
/// North velocity index.
pub const X_VX: usize = 3;
/// East velocity index.
pub const X_VY: usize = 4;
/// Down velocity index.
pub const X_VZ: usize = 5;
/// North accelerometer bias index.
pub const X_BX: usize = 6;
/// East accelerometer bias index.
pub const X_BY: usize = 7;
/// Down accelerometer bias index.
pub const X_BZ: usize = 8;
/// Terrain (down axis) index.
pub const X_TZ: usize = 9;

/// The estimator state vector.
pub type StateVector = SVector<f64, N_X>;
/// The estimator state covariance.
pub type StateCovariance = SMatrix<f64, N_X, N_X>;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
