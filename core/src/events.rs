//! Classified notifications for the telemetry collaborator.
//!
//! The estimator and the mode state machine report discrete occurrences (a sensor finished its
//! warm-up, a measurement failed the fault gate, the vehicle entered a new mode) as a
//! [Notification]: a stable numeric [EventId], a [Severity] and a formatted message. Delivery is the
//! job of whatever implements [EventSink]; this crate ships [EventLog], which records notifications
//! and mirrors them to the `log` facade.
//!
//! Notifications are edge-triggered. Each fault, recovery or timeout transition produces at most one
//! notification; steady states produce none.

use std::fmt::{self, Display};
use std::time::Instant;

/// Stable identifiers for every notification this crate can emit.
///
/// The numeric values are part of the telemetry contract and must not be reused or renumbered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventId {
    BaroInitialized = 20,
    BaroFault = 21,
    BaroRecovered = 22,
    BaroTimeout = 23,
    GnssInitialized = 24,
    GnssFault = 25,
    GnssRecovered = 26,
    GnssTimeout = 27,
    RangeInitialized = 28,
    RangeFault = 29,
    RangeRecovered = 30,
    RangeTimeout = 31,

    EnteredManual = 40,
    EnteredAltitudeControl = 41,
    EnteredPositionControl = 42,
    EnteredAutoMission = 43,
    EnteredAutoLoiter = 44,
    EnteredAutoReturnToLaunch = 45,
    EnteredAcrobatic = 46,
    EnteredOffboard = 47,
    EnteredStabilize = 48,
    EnteredRattitude = 49,
    EnteredAutoTakeoff = 50,
    EnteredAutoLand = 51,
    EnteredAutoFollowTarget = 52,
    EnteredAutoPrecland = 53,
    UnknownMode = 60,
}

impl EventId {
    /// The numeric identifier sent on the wire.
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Event class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Information,
    Error,
}

/// A single classified notification.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub id: EventId,
    pub severity: Severity,
    pub message: String,
}

impl Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = match self.severity {
            Severity::Information => "INFO",
            Severity::Error => "ERROR",
        };
        write!(f, "[{} {}] {}", class, self.id.code(), self.message)
    }
}

/// Receiver of notifications, implemented by the telemetry collaborator.
pub trait EventSink {
    fn send(&mut self, notification: Notification);

    /// Send an information-class notification.
    fn info(&mut self, id: EventId, message: String) {
        self.send(Notification {
            id,
            severity: Severity::Information,
            message,
        });
    }

    /// Send an error-class notification.
    fn error(&mut self, id: EventId, message: String) {
        self.send(Notification {
            id,
            severity: Severity::Error,
            message,
        });
    }
}

/// Recording event sink.
///
/// Keeps every notification in arrival order and mirrors it to the `log` facade (`info!` or
/// `error!` by severity), so a host that installs a logger sees the same stream telemetry would.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    notifications: Vec<Notification>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Number of recorded notifications with the given identifier.
    pub fn count(&self, id: EventId) -> usize {
        self.notifications.iter().filter(|n| n.id == id).count()
    }

    /// Number of recorded error-class notifications.
    pub fn error_count(&self) -> usize {
        self.notifications
            .iter()
            .filter(|n| n.severity == Severity::Error)
            .count()
    }

    pub fn last(&self) -> Option<&Notification> {
        self.notifications.last()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn clear(&mut self) {
        self.notifications.clear();
    }
}

impl EventSink for EventLog {
    fn send(&mut self, notification: Notification) {
        match notification.severity {
            Severity::Information => log::info!("{}", notification),
            Severity::Error => log::error!("{}", notification),
        }
        self.notifications.push(notification);
    }
}

/// Scoped performance span.
///
/// Marks entry on construction and exit, with the elapsed time, when dropped, so the exit is
/// recorded on every return path of the enclosing scope.
#[derive(Debug)]
pub struct PerfSpan {
    name: &'static str,
    start: Instant,
}

impl PerfSpan {
    pub fn enter(name: &'static str) -> Self {
        log::trace!("perf enter {}", name);
        PerfSpan {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for PerfSpan {
    fn drop(&mut self) {
        log::trace!(
            "perf exit {} ({} us)",
            self.name,
            self.start.elapsed().as_micros()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_are_stable() {
        assert_eq!(EventId::BaroInitialized.code(), 20);
        assert_eq!(EventId::BaroFault.code(), 21);
        assert_eq!(EventId::BaroTimeout.code(), 23);
        assert_eq!(EventId::EnteredManual.code(), 40);
        assert_eq!(EventId::EnteredAutoTakeoff.code(), 50);
        assert_eq!(EventId::UnknownMode.code(), 60);
    }

    #[test]
    fn event_log_records_and_counts() {
        let mut log = EventLog::new();
        assert!(log.is_empty());
        log.info(EventId::BaroInitialized, "Baro initialized".to_string());
        log.error(EventId::BaroFault, "Baro fault".to_string());
        log.error(EventId::BaroFault, "Baro fault".to_string());

        assert_eq!(log.len(), 3);
        assert_eq!(log.count(EventId::BaroFault), 2);
        assert_eq!(log.count(EventId::BaroTimeout), 0);
        assert_eq!(log.error_count(), 2);
        assert_eq!(log.last().unwrap().severity, Severity::Error);

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn notification_display_includes_code() {
        let n = Notification {
            id: EventId::UnknownMode,
            severity: Severity::Error,
            message: "unknown state (99)".to_string(),
        };
        assert_eq!(format!("{}", n), "[ERROR 60] unknown state (99)");
    }

    #[test]
    fn perf_span_drops_cleanly() {
        let span = PerfSpan::enter("test");
        drop(span);
    }
}
