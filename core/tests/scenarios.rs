//! End-to-end scenarios for the estimator and the mode state machine.
//!
//! Each test drives the public API the way a flight scheduler would: one [SensorFrame] per estimator
//! cycle, one request or tick per mode cycle, with an [EventLog] standing in for telemetry. Frames in
//! the barometer scenarios carry no acceleration, so no prediction runs and every change to the state
//! comes from the correction step.
use flightcore::config::{EstimatorParams, FaultPolicy};
use flightcore::correction::{CorrectionOutcome, SensorPhase};
use flightcore::estimator::PositionEstimator;
use flightcore::events::{EventId, EventLog};
use flightcore::linalg::is_symmetric;
use flightcore::messages::{SensorFrame, VEHICLE_CMD_NAV_TAKEOFF, VehicleCommand, VehicleStatus};
use flightcore::modes::{GuardSnapshot, MainMode, ModeContext, ModeStateMachine, Transition};
use flightcore::X_Z;

use assert_approx_eq::assert_approx_eq;

const FRAME_US: u64 = 10_000;

fn baro_frame(k: u64, altitude: f64) -> SensorFrame {
    SensorFrame::new(k * FRAME_US).with_baro(altitude)
}

/// Feed `count` identical baro samples starting at frame `start`; returns the next frame index.
fn feed_baro(
    est: &mut PositionEstimator,
    events: &mut EventLog,
    start: u64,
    count: u64,
    altitude: f64,
) -> u64 {
    for k in start..start + count {
        est.update(&baro_frame(k, altitude), events);
    }
    start + count
}

#[test]
fn warm_up_origin_is_mean_of_identical_samples() {
    let mut est = PositionEstimator::new(EstimatorParams::default());
    let mut events = EventLog::new();

    let next = feed_baro(&mut est, &mut events, 0, 100, 123.4);
    assert_eq!(est.baro().phase(), SensorPhase::Accumulating);
    assert_eq!(est.baro().stats().count(), 100);
    assert_eq!(events.count(EventId::BaroInitialized), 0);

    let report = est.update(&baro_frame(next, 123.4), &mut events);
    assert_eq!(report.baro, CorrectionOutcome::Initialized);
    assert_eq!(events.count(EventId::BaroInitialized), 1);
    assert_approx_eq!(est.baro().origin().unwrap()[0], 123.4, 1e-9);
    assert_approx_eq!(est.alt_origin().unwrap(), 123.4, 1e-9);
    assert!(!est.baro().is_timed_out());
}

#[test]
fn warm_up_boundary_follows_configured_count() {
    let params = EstimatorParams {
        baro_init_count: 20,
        ..Default::default()
    };
    let mut est = PositionEstimator::new(params);
    let mut events = EventLog::new();

    for k in 0..20 {
        let report = est.update(&baro_frame(k, 50.0), &mut events);
        assert_eq!(
            report.baro,
            CorrectionOutcome::Initializing {
                count: k as usize + 1
            }
        );
    }
    let report = est.update(&baro_frame(20, 50.0), &mut events);
    assert_eq!(report.baro, CorrectionOutcome::Initialized);

    let report = est.update(&baro_frame(21, 50.0), &mut events);
    assert_eq!(report.baro, CorrectionOutcome::Applied { faulted: false });
}

#[test]
fn baro_spike_faults_once_and_recovers_once() {
    let params = EstimatorParams {
        baro_stddev_m: 1.0,
        ..Default::default()
    };
    let mut est = PositionEstimator::new(params);
    let mut events = EventLog::new();

    // warm-up, then let the altitude variance settle
    let next = feed_baro(&mut est, &mut events, 0, 101, 200.0);
    let next = feed_baro(&mut est, &mut events, next, 200, 200.0);
    assert!(est.covariance()[(X_Z, X_Z)] < 0.01);
    assert_eq!(events.error_count(), 0);

    let report = est.update(&baro_frame(next, 250.0), &mut events);
    assert_eq!(report.baro, CorrectionOutcome::Applied { faulted: true });
    assert!(est.baro().is_faulted());
    assert_eq!(events.count(EventId::BaroFault), 1);

    let report = est.update(&baro_frame(next + 1, 200.0), &mut events);
    assert_eq!(report.baro, CorrectionOutcome::Applied { faulted: false });
    assert_eq!(events.count(EventId::BaroRecovered), 1);
    assert!(est.baro().is_valid());

    // a long run of good samples neither re-faults nor re-announces recovery
    feed_baro(&mut est, &mut events, next + 2, 100, 200.0);
    assert_eq!(events.count(EventId::BaroFault), 1);
    assert_eq!(events.count(EventId::BaroRecovered), 1);
    assert_approx_eq!(est.altitude().unwrap(), 200.0, 0.5);
}

#[test]
fn reject_policy_holds_state_during_spike() {
    let params = EstimatorParams {
        baro_stddev_m: 1.0,
        fault_policy: FaultPolicy::Reject,
        ..Default::default()
    };
    let mut est = PositionEstimator::new(params);
    let mut events = EventLog::new();

    let next = feed_baro(&mut est, &mut events, 0, 301, 200.0);
    let before = *est.state();

    let report = est.update(&baro_frame(next, 250.0), &mut events);
    assert_eq!(report.baro, CorrectionOutcome::Rejected);
    assert_eq!(est.state(), &before);

    let report = est.update(&baro_frame(next + 1, 200.0), &mut events);
    assert_eq!(report.baro, CorrectionOutcome::Applied { faulted: false });
    assert_eq!(events.count(EventId::BaroFault), 1);
    assert_eq!(events.count(EventId::BaroRecovered), 1);
}

#[test]
fn innovation_covariance_stays_positive_and_symmetric() {
    let mut est = PositionEstimator::new(EstimatorParams::default());
    let mut events = EventLog::new();
    let next = feed_baro(&mut est, &mut events, 0, 101, 10.0);
    for k in next..next + 50 {
        let altitude = 10.0 + if k % 2 == 0 { 0.4 } else { -0.4 };
        est.update(&baro_frame(k, altitude), &mut events);
        assert!(est.baro().context().s[(0, 0)] > 0.0);
        assert!(is_symmetric(&est.baro().context().s, 0.0));
        assert!(is_symmetric(est.covariance(), 1e-12));
    }
}

#[test]
fn stale_baro_emits_one_timeout_and_clears_stats() {
    let mut est = PositionEstimator::new(EstimatorParams::default());
    let mut events = EventLog::new();
    let next = feed_baro(&mut est, &mut events, 0, 101, 75.0);
    assert!(est.baro().is_initialized());

    // 0.5 s of frames without a barometer sample
    for k in next..next + 50 {
        est.update(&SensorFrame::new(k * FRAME_US), &mut events);
    }
    assert_eq!(events.count(EventId::BaroTimeout), 1);
    assert_eq!(est.baro().stats().count(), 0);
    assert_eq!(est.baro().phase(), SensorPhase::Uninitialized);
    assert!(est.baro().is_timed_out());

    // samples resume: warm-up starts over from zero
    let report = est.update(&baro_frame(next + 50, 75.0), &mut events);
    assert_eq!(report.baro, CorrectionOutcome::Initializing { count: 1 });
    assert_eq!(events.count(EventId::BaroTimeout), 1);
}

#[test]
fn takeoff_transition_dispatches_single_command() {
    let mut status = VehicleStatus::default();
    let mut commands: Vec<VehicleCommand> = Vec::new();
    let mut events = EventLog::new();
    let guards = GuardSnapshot {
        local_position_valid: true,
        vehicle_armed: true,
    };
    let mut sm = ModeStateMachine::default();
    assert_eq!(sm.current(), MainMode::Manual);

    let result = {
        let mut ctx = ModeContext {
            status: &mut status,
            commands: &mut commands,
            events: &mut events,
            timestamp_us: 5_000_000,
        };
        sm.request(MainMode::AutoTakeoff, &guards, &mut ctx)
    };
    assert_eq!(
        result,
        Ok(Transition::Entered {
            from: MainMode::Manual,
            to: MainMode::AutoTakeoff
        })
    );
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].command, VEHICLE_CMD_NAV_TAKEOFF);
    assert!(commands[0].params.iter().all(|p| p.is_nan()));
    assert_eq!(status.main_state, MainMode::AutoTakeoff.main_state_code());
    assert_eq!(status.nav_state, MainMode::AutoTakeoff.nav_state_code());

    for i in 1..=100u64 {
        let now = 5_000_000 + i * 20_000;
        let mut ctx = ModeContext {
            status: &mut status,
            commands: &mut commands,
            events: &mut events,
            timestamp_us: now,
        };
        let tick = sm.tick(now, &mut ctx);
        assert_eq!(tick.mode, MainMode::AutoTakeoff);
        assert_eq!(tick.time_in_mode_us, i * 20_000);
    }
    assert_eq!(commands.len(), 1);
    assert_eq!(events.count(EventId::EnteredAutoTakeoff), 1);
}
