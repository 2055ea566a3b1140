//! Data exchanged with the messaging collaborator.
//!
//! The estimator consumes one [SensorFrame] per cycle: whatever samples the drivers delivered since
//! the previous cycle, each optional. The mode state machine writes the shared [VehicleStatus] record
//! and hands outbound [VehicleCommand]s to a [CommandSink]. Framing, message identifiers and queuing
//! belong to the bus and do not appear here.

use nalgebra::Vector3;

/// Vehicle command identifier for a navigation takeoff.
pub const VEHICLE_CMD_NAV_TAKEOFF: u16 = 22;

/// A GNSS position fix already projected into the local tangent plane.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GnssFix {
    /// North offset from the projection reference (m)
    pub north_m: f64,
    /// East offset from the projection reference (m)
    pub east_m: f64,
    /// Altitude above mean sea level (m)
    pub altitude_m: f64,
    /// Reported horizontal position error (m)
    pub eph_m: f64,
    /// Reported vertical position error (m)
    pub epv_m: f64,
}

/// The samples available to one estimator cycle.
///
/// A `None` field means the corresponding driver delivered nothing new; that sensor simply does not
/// run this cycle. A field that is present but unusable (non-finite, out of range) is a read failure
/// and is handled by the sensor's correction unit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SensorFrame {
    /// Sample time (microseconds, monotonic)
    pub timestamp_us: u64,
    /// Acceleration in the NED frame with gravity removed (m/s²)
    pub accel_ned: Option<Vector3<f64>>,
    /// Barometric altitude (m)
    pub baro_alt_m: Option<f64>,
    /// GNSS fix
    pub gnss: Option<GnssFix>,
    /// Downward rangefinder distance (m)
    pub range_m: Option<f64>,
}

impl SensorFrame {
    pub fn new(timestamp_us: u64) -> Self {
        SensorFrame {
            timestamp_us,
            ..Default::default()
        }
    }

    pub fn with_accel(mut self, accel_ned: Vector3<f64>) -> Self {
        self.accel_ned = Some(accel_ned);
        self
    }

    pub fn with_baro(mut self, altitude_m: f64) -> Self {
        self.baro_alt_m = Some(altitude_m);
        self
    }

    pub fn with_gnss(mut self, fix: GnssFix) -> Self {
        self.gnss = Some(fix);
        self
    }

    pub fn with_range(mut self, distance_m: f64) -> Self {
        self.range_m = Some(distance_m);
        self
    }
}

/// Outbound vehicle command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VehicleCommand {
    pub timestamp_us: u64,
    pub command: u16,
    /// Command parameters 1-7; `NaN` leaves a parameter at the receiver's default.
    pub params: [f64; 7],
    pub target_system: u8,
    pub target_component: u8,
    pub source_system: u8,
    pub source_component: u8,
    pub confirmation: u8,
}

impl VehicleCommand {
    /// A navigation takeoff with every parameter left to the navigator's defaults.
    pub fn nav_takeoff(timestamp_us: u64) -> Self {
        VehicleCommand {
            timestamp_us,
            command: VEHICLE_CMD_NAV_TAKEOFF,
            params: [f64::NAN; 7],
            target_system: 0,
            target_component: 0,
            source_system: 0,
            source_component: 0,
            confirmation: 0,
        }
    }
}

/// Shared vehicle status record, written by the mode state machine and read by telemetry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VehicleStatus {
    pub timestamp_us: u64,
    /// Main state code of the active mode
    pub main_state: u8,
    /// Navigation state code of the active mode
    pub nav_state: u8,
    pub armed: bool,
}

/// Outbound command dispatch, implemented by the messaging collaborator.
pub trait CommandSink {
    fn dispatch(&mut self, command: VehicleCommand);
}

impl CommandSink for Vec<VehicleCommand> {
    fn dispatch(&mut self, command: VehicleCommand) {
        self.push(command);
    }
}
