use std::time::Duration;

use crate::RelayState;
use crate::config::RelayConfig;
use crate::position::{CalendarFields, Coordinate, PositionRecord};
use crate::service::RelayService;

/// Broadcast form of [`sample_record`].
pub const SAMPLE_LINE: &str = "1700000000000,2023,11,14,12,0,0,35.689500,139.691700";

/// Build a fully-wired `RelayState` with the default one-second tick.
pub fn test_relay_state() -> RelayState {
    test_relay_state_with_tick(Duration::from_secs(1))
}

pub fn test_relay_state_with_tick(tick: Duration) -> RelayState {
    RelayService::new(RelayConfig::loopback(tick)).state().clone()
}

/// A complete record, already rounded.
pub fn sample_record() -> PositionRecord {
    PositionRecord {
        timestamp: Some(1_700_000_000_000),
        calendar: CalendarFields {
            year: Some(2023),
            month: Some(11),
            day: Some(14),
            hour: Some(12),
            minute: Some(0),
            second: Some(0),
        },
        latitude: Some(Coordinate::from_micros(35_689_500)),
        longitude: Some(Coordinate::from_micros(139_691_700)),
    }
}
