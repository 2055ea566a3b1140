//! Vehicle mode state machine.
//!
//! Exactly one [MainMode] is active at a time. A mode change is requested from outside (a ground
//! command, a failsafe, the pilot's mode switch) through [ModeStateMachine::request]; the machine
//! checks the guard conditions the target mode needs, then runs that mode's entry action exactly
//! once. Entry actions are the only place side effects happen:
//!
//! * the main-state and navigation-state codes are written to the shared [VehicleStatus];
//! * AutoTakeoff dispatches a navigation takeoff [VehicleCommand];
//! * an information notification names the new mode.
//!
//! Requesting the mode that is already active is a no-op. [ModeStateMachine::tick] is the periodic
//! action and never produces commands.

use log::{debug, warn};
use thiserror::Error;

use crate::events::{EventId, EventSink};
use crate::messages::{CommandSink, VehicleCommand, VehicleStatus};

pub const NUM_MODES: usize = 14;

/// Top-level vehicle flight mode. The discriminant is the main-state code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MainMode {
    Manual = 0,
    AltitudeControl = 1,
    PositionControl = 2,
    AutoMission = 3,
    AutoLoiter = 4,
    AutoReturnToLaunch = 5,
    Acrobatic = 6,
    Offboard = 7,
    Stabilize = 8,
    Rattitude = 9,
    AutoTakeoff = 10,
    AutoLand = 11,
    AutoFollowTarget = 12,
    AutoPrecland = 13,
}

/// Who is flying the vehicle in a given mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSource {
    /// Direct stick control
    Pilot,
    /// Stick inputs interpreted as altitude or position setpoints
    Assisted,
    /// Onboard navigator
    Autonomous,
    /// Companion computer or ground station setpoints
    External,
}

/// Guard conditions a mode needs before it can be entered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModeRequirements {
    pub local_position: bool,
    pub armed: bool,
}

impl MainMode {
    pub const ALL: [MainMode; NUM_MODES] = [
        MainMode::Manual,
        MainMode::AltitudeControl,
        MainMode::PositionControl,
        MainMode::AutoMission,
        MainMode::AutoLoiter,
        MainMode::AutoReturnToLaunch,
        MainMode::Acrobatic,
        MainMode::Offboard,
        MainMode::Stabilize,
        MainMode::Rattitude,
        MainMode::AutoTakeoff,
        MainMode::AutoLand,
        MainMode::AutoFollowTarget,
        MainMode::AutoPrecland,
    ];

    pub fn main_state_code(self) -> u8 {
        self as u8
    }

    /// Navigation state reported alongside the main state.
    pub fn nav_state_code(self) -> u8 {
        match self {
            MainMode::Manual => 0,
            MainMode::AltitudeControl => 1,
            MainMode::PositionControl => 2,
            MainMode::AutoMission => 3,
            MainMode::AutoLoiter => 4,
            MainMode::AutoReturnToLaunch => 5,
            MainMode::Acrobatic => 10,
            MainMode::Offboard => 14,
            MainMode::Stabilize => 15,
            MainMode::Rattitude => 16,
            MainMode::AutoTakeoff => 17,
            MainMode::AutoLand => 18,
            MainMode::AutoFollowTarget => 19,
            MainMode::AutoPrecland => 20,
        }
    }

    /// Resolve a raw main-state code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            MainMode::Manual => "Manual",
            MainMode::AltitudeControl => "AltitudeControl",
            MainMode::PositionControl => "PositionControl",
            MainMode::AutoMission => "AutoMission",
            MainMode::AutoLoiter => "AutoLoiter",
            MainMode::AutoReturnToLaunch => "AutoReturnToLaunch",
            MainMode::Acrobatic => "Acrobatic",
            MainMode::Offboard => "Offboard",
            MainMode::Stabilize => "Stabilize",
            MainMode::Rattitude => "Rattitude",
            MainMode::AutoTakeoff => "AutoTakeoff",
            MainMode::AutoLand => "AutoLand",
            MainMode::AutoFollowTarget => "AutoFollowTarget",
            MainMode::AutoPrecland => "AutoPrecland",
        }
    }

    /// Notification emitted by this mode's entry action.
    pub fn entry_event(self) -> EventId {
        match self {
            MainMode::Manual => EventId::EnteredManual,
            MainMode::AltitudeControl => EventId::EnteredAltitudeControl,
            MainMode::PositionControl => EventId::EnteredPositionControl,
            MainMode::AutoMission => EventId::EnteredAutoMission,
            MainMode::AutoLoiter => EventId::EnteredAutoLoiter,
            MainMode::AutoReturnToLaunch => EventId::EnteredAutoReturnToLaunch,
            MainMode::Acrobatic => EventId::EnteredAcrobatic,
            MainMode::Offboard => EventId::EnteredOffboard,
            MainMode::Stabilize => EventId::EnteredStabilize,
            MainMode::Rattitude => EventId::EnteredRattitude,
            MainMode::AutoTakeoff => EventId::EnteredAutoTakeoff,
            MainMode::AutoLand => EventId::EnteredAutoLand,
            MainMode::AutoFollowTarget => EventId::EnteredAutoFollowTarget,
            MainMode::AutoPrecland => EventId::EnteredAutoPrecland,
        }
    }

    pub fn requirements(self) -> ModeRequirements {
        match self {
            MainMode::Manual
            | MainMode::AltitudeControl
            | MainMode::Acrobatic
            | MainMode::Stabilize
            | MainMode::Rattitude => ModeRequirements::default(),
            MainMode::PositionControl
            | MainMode::AutoMission
            | MainMode::AutoLoiter
            | MainMode::AutoReturnToLaunch
            | MainMode::Offboard
            | MainMode::AutoLand
            | MainMode::AutoFollowTarget
            | MainMode::AutoPrecland => ModeRequirements {
                local_position: true,
                armed: false,
            },
            MainMode::AutoTakeoff => ModeRequirements {
                local_position: true,
                armed: true,
            },
        }
    }

    pub fn control_source(self) -> ControlSource {
        match self {
            MainMode::Manual | MainMode::Acrobatic | MainMode::Stabilize | MainMode::Rattitude => {
                ControlSource::Pilot
            }
            MainMode::AltitudeControl | MainMode::PositionControl => ControlSource::Assisted,
            MainMode::AutoMission
            | MainMode::AutoLoiter
            | MainMode::AutoReturnToLaunch
            | MainMode::AutoTakeoff
            | MainMode::AutoLand
            | MainMode::AutoFollowTarget
            | MainMode::AutoPrecland => ControlSource::Autonomous,
            MainMode::Offboard => ControlSource::External,
        }
    }
}

/// Side-effect-free queries the owning application answers for the state machine.
pub trait GuardConditions {
    fn local_position_valid(&self) -> bool;
    fn vehicle_armed(&self) -> bool;
}

/// Guard conditions captured as plain values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GuardSnapshot {
    pub local_position_valid: bool,
    pub vehicle_armed: bool,
}

impl GuardConditions for GuardSnapshot {
    fn local_position_valid(&self) -> bool {
        self.local_position_valid
    }

    fn vehicle_armed(&self) -> bool {
        self.vehicle_armed
    }
}

/// Everything an entry or periodic action may touch, passed in by the scheduler.
pub struct ModeContext<'a> {
    pub status: &'a mut VehicleStatus,
    pub commands: &'a mut dyn CommandSink,
    pub events: &'a mut dyn EventSink,
    /// Time of the current cycle (µs)
    pub timestamp_us: u64,
}

/// Result of a successful request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The requested mode was already active
    Unchanged,
    Entered { from: MainMode, to: MainMode },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot enter {mode:?}: {reason}")]
    GuardRejected {
        mode: MainMode,
        reason: &'static str,
    },
    #[error("unknown main state code {0}")]
    UnknownMode(u8),
}

/// Periodic report from [ModeStateMachine::tick].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModeTick {
    pub mode: MainMode,
    pub source: ControlSource,
    pub time_in_mode_us: u64,
}

/// The vehicle mode state machine.
#[derive(Clone, Debug)]
pub struct ModeStateMachine {
    mode: MainMode,

    /// Time when the current mode was entered.
    mode_start_us: u64,

    /// Most recent entry time of each mode.
    transition_times: [Option<u64>; NUM_MODES],

    transition_count: usize,
}

impl Default for ModeStateMachine {
    fn default() -> Self {
        Self::new(MainMode::Manual, 0)
    }
}

impl ModeStateMachine {
    /// Start in `initial` without running its entry action.
    pub fn new(initial: MainMode, timestamp_us: u64) -> Self {
        let mut transition_times = [None; NUM_MODES];
        transition_times[initial as usize] = Some(timestamp_us);
        ModeStateMachine {
            mode: initial,
            mode_start_us: timestamp_us,
            transition_times,
            transition_count: 0,
        }
    }

    pub fn current(&self) -> MainMode {
        self.mode
    }

    /// Time at which the active mode was entered.
    pub fn last_transition_us(&self) -> u64 {
        self.mode_start_us
    }

    /// Most recent entry time of `mode`, if it has ever been active.
    pub fn transition_time(&self, mode: MainMode) -> Option<u64> {
        self.transition_times[mode as usize]
    }

    pub fn transition_count(&self) -> usize {
        self.transition_count
    }

    /// Request a change to `mode`.
    ///
    /// Re-requesting the active mode returns [Transition::Unchanged] without side effects. A mode
    /// whose guard conditions do not hold is refused and the machine stays where it is.
    pub fn request(
        &mut self,
        mode: MainMode,
        guards: &dyn GuardConditions,
        ctx: &mut ModeContext<'_>,
    ) -> Result<Transition, TransitionError> {
        if mode == self.mode {
            return Ok(Transition::Unchanged);
        }

        let needs = mode.requirements();
        let refusal = if needs.local_position && !guards.local_position_valid() {
            Some("local position not valid")
        } else if needs.armed && !guards.vehicle_armed() {
            Some("vehicle not armed")
        } else {
            None
        };
        if let Some(reason) = refusal {
            warn!(
                "mode change {} -> {} rejected: {}",
                self.mode.label(),
                mode.label(),
                reason
            );
            return Err(TransitionError::GuardRejected { mode, reason });
        }

        let from = self.mode;
        self.mode = mode;
        self.mode_start_us = ctx.timestamp_us;
        self.transition_times[mode as usize] = Some(ctx.timestamp_us);
        self.transition_count += 1;
        Self::enter(mode, ctx);
        Ok(Transition::Entered { from, to: mode })
    }

    /// Request a change by raw main-state code.
    ///
    /// An unknown code is reported as an error notification and leaves the machine unchanged.
    pub fn request_by_id(
        &mut self,
        code: u8,
        guards: &dyn GuardConditions,
        ctx: &mut ModeContext<'_>,
    ) -> Result<Transition, TransitionError> {
        match MainMode::from_code(code) {
            Some(mode) => self.request(mode, guards, ctx),
            None => {
                ctx.events.error(
                    EventId::UnknownMode,
                    format!(
                        "Mode state machine is in unknown state ({}), current {}",
                        code,
                        self.mode.label()
                    ),
                );
                Err(TransitionError::UnknownMode(code))
            }
        }
    }

    /// Entry action for `mode`.
    fn enter(mode: MainMode, ctx: &mut ModeContext<'_>) {
        match mode {
            MainMode::AutoTakeoff => {
                ctx.commands
                    .dispatch(VehicleCommand::nav_takeoff(ctx.timestamp_us));
            }
            MainMode::Manual
            | MainMode::AltitudeControl
            | MainMode::PositionControl
            | MainMode::AutoMission
            | MainMode::AutoLoiter
            | MainMode::AutoReturnToLaunch
            | MainMode::Acrobatic
            | MainMode::Offboard
            | MainMode::Stabilize
            | MainMode::Rattitude
            | MainMode::AutoLand
            | MainMode::AutoFollowTarget
            | MainMode::AutoPrecland => {}
        }
        ctx.status.main_state = mode.main_state_code();
        ctx.status.nav_state = mode.nav_state_code();
        ctx.status.timestamp_us = ctx.timestamp_us;
        ctx.events
            .info(mode.entry_event(), format!("Main::{}", mode.label()));
    }

    /// Periodic action for the active mode.
    ///
    /// Refreshes the status timestamp and reports how long the mode has been active.
    pub fn tick(&self, now_us: u64, ctx: &mut ModeContext<'_>) -> ModeTick {
        let time_in_mode_us = now_us.saturating_sub(self.mode_start_us);
        let source = self.mode.control_source();
        ctx.status.timestamp_us = now_us;
        debug!(
            "{} ({:?}) for {} us",
            self.mode.label(),
            source,
            time_in_mode_us
        );
        ModeTick {
            mode: self.mode,
            source,
            time_in_mode_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventLog, Severity};
    use crate::messages::VEHICLE_CMD_NAV_TAKEOFF;

    struct Harness {
        status: VehicleStatus,
        commands: Vec<VehicleCommand>,
        events: EventLog,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                status: VehicleStatus::default(),
                commands: Vec::new(),
                events: EventLog::new(),
            }
        }

        fn ctx(&mut self, timestamp_us: u64) -> ModeContext<'_> {
            ModeContext {
                status: &mut self.status,
                commands: &mut self.commands,
                events: &mut self.events,
                timestamp_us,
            }
        }
    }

    const READY: GuardSnapshot = GuardSnapshot {
        local_position_valid: true,
        vehicle_armed: true,
    };

    #[test]
    fn codes_round_trip() {
        for mode in MainMode::ALL {
            assert_eq!(MainMode::from_code(mode.main_state_code()), Some(mode));
        }
        assert_eq!(MainMode::from_code(14), None);
        assert_eq!(MainMode::AutoTakeoff.main_state_code(), 10);
        assert_eq!(MainMode::AutoTakeoff.nav_state_code(), 17);
        assert_eq!(MainMode::Offboard.nav_state_code(), 14);
    }

    #[test]
    fn takeoff_entry_dispatches_once() {
        let mut h = Harness::new();
        let mut sm = ModeStateMachine::default();

        let result = sm.request(MainMode::AutoTakeoff, &READY, &mut h.ctx(1_000));
        assert_eq!(
            result,
            Ok(Transition::Entered {
                from: MainMode::Manual,
                to: MainMode::AutoTakeoff
            })
        );
        assert_eq!(h.commands.len(), 1);
        assert_eq!(h.commands[0].command, VEHICLE_CMD_NAV_TAKEOFF);
        assert_eq!(h.commands[0].timestamp_us, 1_000);
        assert_eq!(h.status.main_state, 10);
        assert_eq!(h.status.nav_state, 17);
        assert_eq!(h.events.count(EventId::EnteredAutoTakeoff), 1);

        for t in 1..10u64 {
            sm.tick(1_000 + t * 10_000, &mut h.ctx(1_000 + t * 10_000));
        }
        assert_eq!(
            sm.request(MainMode::AutoTakeoff, &READY, &mut h.ctx(200_000)),
            Ok(Transition::Unchanged)
        );
        assert_eq!(h.commands.len(), 1);
        assert_eq!(h.events.count(EventId::EnteredAutoTakeoff), 1);
    }

    #[test]
    fn other_entries_write_status_without_commands() {
        let mut h = Harness::new();
        let mut sm = ModeStateMachine::default();
        for mode in [
            MainMode::Stabilize,
            MainMode::PositionControl,
            MainMode::AutoLand,
            MainMode::Manual,
        ] {
            sm.request(mode, &READY, &mut h.ctx(5)).unwrap();
            assert_eq!(h.status.main_state, mode.main_state_code());
            assert_eq!(h.status.nav_state, mode.nav_state_code());
        }
        assert!(h.commands.is_empty());
        assert_eq!(h.events.len(), 4);
        assert_eq!(sm.transition_count(), 4);
    }

    #[test]
    fn same_mode_request_has_no_side_effects() {
        let mut h = Harness::new();
        let mut sm = ModeStateMachine::default();
        let result = sm.request(MainMode::Manual, &GuardSnapshot::default(), &mut h.ctx(9));
        assert_eq!(result, Ok(Transition::Unchanged));
        assert!(h.events.is_empty());
        assert_eq!(h.status, VehicleStatus::default());
        assert_eq!(sm.transition_count(), 0);
    }

    #[test]
    fn guards_block_transitions() {
        let mut h = Harness::new();
        let mut sm = ModeStateMachine::default();

        let no_position = GuardSnapshot {
            local_position_valid: false,
            vehicle_armed: true,
        };
        let err = sm
            .request(MainMode::PositionControl, &no_position, &mut h.ctx(1))
            .unwrap_err();
        assert!(matches!(err, TransitionError::GuardRejected { mode: MainMode::PositionControl, .. }));

        let disarmed = GuardSnapshot {
            local_position_valid: true,
            vehicle_armed: false,
        };
        assert!(sm.request(MainMode::AutoTakeoff, &disarmed, &mut h.ctx(2)).is_err());
        assert!(sm.request(MainMode::AutoLoiter, &disarmed, &mut h.ctx(3)).is_ok());

        assert_eq!(sm.current(), MainMode::AutoLoiter);
        assert!(h.commands.is_empty());
        assert_eq!(h.events.len(), 1);
    }

    #[test]
    fn unknown_code_is_reported_not_fatal() {
        let mut h = Harness::new();
        let mut sm = ModeStateMachine::default();
        let err = sm.request_by_id(99, &READY, &mut h.ctx(0)).unwrap_err();
        assert_eq!(err, TransitionError::UnknownMode(99));
        assert_eq!(h.events.count(EventId::UnknownMode), 1);
        assert_eq!(h.events.last().unwrap().severity, Severity::Error);
        assert_eq!(sm.current(), MainMode::Manual);

        let ok = sm.request_by_id(8, &READY, &mut h.ctx(1)).unwrap();
        assert_eq!(
            ok,
            Transition::Entered {
                from: MainMode::Manual,
                to: MainMode::Stabilize
            }
        );
    }

    #[test]
    fn tick_reports_time_in_mode() {
        let mut h = Harness::new();
        let mut sm = ModeStateMachine::default();
        sm.request(MainMode::Offboard, &READY, &mut h.ctx(2_000_000)).unwrap();
        let tick = sm.tick(2_500_000, &mut h.ctx(2_500_000));
        assert_eq!(tick.mode, MainMode::Offboard);
        assert_eq!(tick.source, ControlSource::External);
        assert_eq!(tick.time_in_mode_us, 500_000);
        assert_eq!(h.status.timestamp_us, 2_500_000);
        assert_eq!(sm.last_transition_us(), 2_000_000);
        assert_eq!(sm.transition_time(MainMode::Offboard), Some(2_000_000));
        assert_eq!(sm.transition_time(MainMode::AutoLand), None);
    }
}
