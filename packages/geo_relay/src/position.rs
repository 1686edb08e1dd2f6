//! Position record and the single-slot store shared by ingest and broadcast.
//!
//! Coordinates are fixed-point micro-degrees. Rounding happens once, when the
//! producer's decimal text is parsed; formatting only prints the stored digits.

use std::fmt;
use std::str::FromStr;

use tokio::sync::RwLock;

use crate::error::RelayError;

/// Fractional digits kept for latitude/longitude.
pub const COORDINATE_SCALE: u32 = 6;

const MICROS_PER_DEGREE: u64 = 10u64.pow(COORDINATE_SCALE);

/// Exponents beyond this are either zero or overflow regardless of digits.
const MAX_EXPONENT: i64 = 10_000;

/// A latitude or longitude in micro-degrees (six fractional digits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coordinate(i64);

impl Coordinate {
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn micros(self) -> i64 {
        self.0
    }

    pub fn degrees(self) -> f64 {
        self.0 as f64 / MICROS_PER_DEGREE as f64
    }

    /// Parse decimal text (`35.6894999`, `-1.5e-3`, `+139`) and round it to six
    /// fractional digits, half away from zero.
    pub fn parse_rounded(text: &str) -> Result<Self, RelayError> {
        parse_decimal_micros(text.trim()).map(Self)
    }

    /// Parse a JSON value as submitted by a producer. Numbers and numeric
    /// strings are accepted; anything else is malformed.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, RelayError> {
        match value {
            serde_json::Value::Number(n) => Self::parse_rounded(&n.to_string()),
            serde_json::Value::String(s) => Self::parse_rounded(s),
            other => Err(RelayError::MalformedInput(format!(
                "expected a number, got {other}"
            ))),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:06}",
            magnitude / MICROS_PER_DEGREE,
            magnitude % MICROS_PER_DEGREE
        )
    }
}

impl FromStr for Coordinate {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_rounded(s)
    }
}

fn malformed(text: &str) -> RelayError {
    RelayError::MalformedInput(format!("{text:?} is not a decimal number"))
}

/// Decimal text to micro-units without passing through binary floating point.
fn parse_decimal_micros(text: &str) -> Result<i64, RelayError> {
    let (negative, unsigned) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => {
            let exp_text = &unsigned[pos + 1..];
            let digits = exp_text.strip_prefix(['+', '-']).unwrap_or(exp_text);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed(text));
            }
            // Saturate rather than fail on absurd exponents; MAX_EXPONENT clamps below.
            let magnitude = digits.parse::<i64>().unwrap_or(i64::MAX);
            let exp = if exp_text.starts_with('-') {
                -magnitude
            } else {
                magnitude
            };
            (&unsigned[..pos], exp.clamp(-MAX_EXPONENT, MAX_EXPONENT))
        }
        None => (unsigned, 0),
    };

    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(malformed(text));
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(malformed(text));
    }

    let all_digits: String = int_part.chars().chain(frac_part.chars()).collect();
    let digits = all_digits.trim_start_matches('0');

    // value = digits * 10^shift micro-units
    let shift = exponent - frac_part.len() as i64 + i64::from(COORDINATE_SCALE);

    let magnitude: u128 = if digits.is_empty() {
        0
    } else if shift >= 0 {
        if digits.len() as i64 + shift > 38 {
            return Err(overflow(text));
        }
        let base: u128 = digits.parse().map_err(|_| overflow(text))?;
        base.checked_mul(10u128.pow(shift as u32))
            .ok_or_else(|| overflow(text))?
    } else {
        let dropped = (-shift) as usize;
        let (kept, round_digit) = if dropped > digits.len() {
            ("", b'0')
        } else {
            let split = digits.len() - dropped;
            (&digits[..split], digits.as_bytes()[split])
        };
        let base: u128 = if kept.is_empty() {
            0
        } else {
            kept.parse().map_err(|_| overflow(text))?
        };
        if round_digit >= b'5' { base + 1 } else { base }
    };

    let magnitude = i64::try_from(magnitude).map_err(|_| overflow(text))?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn overflow(text: &str) -> RelayError {
    RelayError::MalformedInput(format!("{text:?} is out of range"))
}

/// Producer wall-clock fields, passed through exactly as submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalendarFields {
    pub year: Option<i64>,
    /// 1-12
    pub month: Option<i64>,
    pub day: Option<i64>,
    pub hour: Option<i64>,
    pub minute: Option<i64>,
    pub second: Option<i64>,
}

/// The latest position submitted by the producer.
///
/// Every field starts unset. A record is broadcastable only once all of them
/// are present; see [`PositionRecord::is_valid`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionRecord {
    /// Milliseconds since epoch, as captured by the producer.
    pub timestamp: Option<i64>,
    pub calendar: CalendarFields,
    pub latitude: Option<Coordinate>,
    pub longitude: Option<Coordinate>,
}

impl PositionRecord {
    pub fn is_valid(&self) -> bool {
        self.broadcast_line().is_some()
    }

    pub fn broadcast_line(&self) -> Option<BroadcastLine> {
        let c = &self.calendar;
        Some(BroadcastLine {
            timestamp: self.timestamp?,
            year: c.year?,
            month: c.month?,
            day: c.day?,
            hour: c.hour?,
            minute: c.minute?,
            second: c.second?,
            latitude: self.latitude?,
            longitude: self.longitude?,
        })
    }
}

/// One consumer message: nine comma-separated fields in fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastLine {
    pub timestamp: i64,
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub hour: i64,
    pub minute: i64,
    pub second: i64,
    pub latitude: Coordinate,
    pub longitude: Coordinate,
}

impl BroadcastLine {
    pub const FIELD_COUNT: usize = 9;
}

impl fmt::Display for BroadcastLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{},{},{}",
            self.timestamp,
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.latitude,
            self.longitude
        )
    }
}

impl FromStr for BroadcastLine {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(',').collect();
        if fields.len() != Self::FIELD_COUNT {
            return Err(RelayError::MalformedInput(format!(
                "expected {} fields, got {}",
                Self::FIELD_COUNT,
                fields.len()
            )));
        }
        let int = |i: usize| -> Result<i64, RelayError> {
            fields[i].parse().map_err(|_| {
                RelayError::MalformedInput(format!("field {i} ({:?}) is not an integer", fields[i]))
            })
        };
        Ok(Self {
            timestamp: int(0)?,
            year: int(1)?,
            month: int(2)?,
            day: int(3)?,
            hour: int(4)?,
            minute: int(5)?,
            second: int(6)?,
            latitude: fields[7].parse()?,
            longitude: fields[8].parse()?,
        })
    }
}

/// Copy of the stored record taken under the read lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSnapshot {
    pub record: PositionRecord,
    pub valid: bool,
}

/// Holds the one live [`PositionRecord`]. Writes replace it wholesale; reads
/// return a copy, so a reader never sees fields from two different writes.
#[derive(Debug, Default)]
pub struct PositionStore {
    current: RwLock<PositionRecord>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, record: PositionRecord) {
        *self.current.write().await = record;
    }

    pub async fn get(&self) -> PositionSnapshot {
        let record = *self.current.read().await;
        PositionSnapshot {
            valid: record.is_valid(),
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn coord(text: &str) -> Coordinate {
        Coordinate::parse_rounded(text).unwrap()
    }

    fn full_record(seed: i64) -> PositionRecord {
        PositionRecord {
            timestamp: Some(seed),
            calendar: CalendarFields {
                year: Some(seed),
                month: Some(seed),
                day: Some(seed),
                hour: Some(seed),
                minute: Some(seed),
                second: Some(seed),
            },
            latitude: Some(Coordinate::from_micros(seed)),
            longitude: Some(Coordinate::from_micros(-seed)),
        }
    }

    // ── rounding ────────────────────────────────────────────────────────

    #[test]
    fn rounds_to_six_places() {
        assert_eq!(coord("35.6894999").to_string(), "35.689500");
        assert_eq!(coord("139.6917001").to_string(), "139.691700");
        assert_eq!(coord("35").to_string(), "35.000000");
        assert_eq!(coord(".5").to_string(), "0.500000");
        assert_eq!(coord("7.").to_string(), "7.000000");
    }

    #[test]
    fn ties_round_away_from_zero() {
        assert_eq!(coord("0.0000005").micros(), 1);
        assert_eq!(coord("-0.0000005").micros(), -1);
        assert_eq!(coord("1.2345675").micros(), 1_234_568);
        assert_eq!(coord("-1.2345675").micros(), -1_234_568);
        assert_eq!(coord("1.23456749999").micros(), 1_234_567);
    }

    #[test]
    fn accepts_exponents_and_signs() {
        assert_eq!(coord("1e-7").micros(), 0);
        assert_eq!(coord("5e-7").micros(), 1);
        assert_eq!(coord("1.5E2").to_string(), "150.000000");
        assert_eq!(coord("+12.25").to_string(), "12.250000");
        assert_eq!(coord("  -3.1  ").to_string(), "-3.100000");
        assert_eq!(coord("0e999999999999999999999").micros(), 0);
    }

    #[test]
    fn small_negative_displays_sign() {
        assert_eq!(coord("-0.000001").to_string(), "-0.000001");
        assert_eq!(coord("-0.0000001").to_string(), "0.000000");
    }

    #[test]
    fn rejects_non_numbers() {
        for bad in ["abc", "", "-", ".", "1.2.3", "NaN", "inf", "1e", "1e+", "12abc", "0x10"] {
            assert!(
                matches!(Coordinate::parse_rounded(bad), Err(RelayError::MalformedInput(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_overflow() {
        assert!(Coordinate::parse_rounded("1e300").is_err());
        assert!(Coordinate::parse_rounded("99999999999999999999").is_err());
    }

    #[test]
    fn rounding_is_idempotent() {
        for text in ["35.6894999", "-122.4194155", "0.0000005", "179.9999996"] {
            let once = coord(text);
            let twice = coord(&once.to_string());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn from_json_accepts_numbers_and_strings() {
        let n = serde_json::json!(35.6894999);
        let s = serde_json::json!("35.6894999");
        assert_eq!(Coordinate::from_json(&n).unwrap(), coord("35.6895"));
        assert_eq!(Coordinate::from_json(&s).unwrap(), coord("35.6895"));
        assert_eq!(Coordinate::from_json(&serde_json::json!(139)).unwrap(), coord("139"));
    }

    #[test]
    fn from_json_rejects_other_types() {
        for v in [
            serde_json::json!(null),
            serde_json::json!(true),
            serde_json::json!([1.0]),
            serde_json::json!({"lat": 1.0}),
            serde_json::json!("abc"),
        ] {
            assert!(Coordinate::from_json(&v).is_err(), "{v} should be rejected");
        }
    }

    // ── record / line ───────────────────────────────────────────────────

    #[test]
    fn empty_record_is_invalid() {
        assert!(!PositionRecord::default().is_valid());
    }

    #[test]
    fn partial_record_is_invalid() {
        let mut record = full_record(5);
        record.calendar.minute = None;
        assert!(!record.is_valid());
        assert!(record.broadcast_line().is_none());
    }

    #[test]
    fn broadcast_line_field_order() {
        let record = PositionRecord {
            timestamp: Some(1_700_000_000_000),
            calendar: CalendarFields {
                year: Some(2023),
                month: Some(11),
                day: Some(14),
                hour: Some(12),
                minute: Some(0),
                second: Some(0),
            },
            latitude: Some(coord("35.6894999")),
            longitude: Some(coord("139.6917001")),
        };
        assert_eq!(
            record.broadcast_line().unwrap().to_string(),
            "1700000000000,2023,11,14,12,0,0,35.689500,139.691700"
        );
    }

    #[test]
    fn broadcast_line_parses_back() {
        let line: BroadcastLine = "1700000000000,2023,11,14,12,0,0,35.689500,-139.691700"
            .parse()
            .unwrap();
        assert_eq!(line.timestamp, 1_700_000_000_000);
        assert_eq!(line.month, 11);
        assert_eq!(line.latitude.micros(), 35_689_500);
        assert_eq!(line.longitude.micros(), -139_691_700);
    }

    #[test]
    fn broadcast_line_rejects_wrong_field_count() {
        assert!("1,2,3".parse::<BroadcastLine>().is_err());
        assert!("1,2,3,4,5,6,7,8,9,10".parse::<BroadcastLine>().is_err());
        assert!("x,2023,11,14,12,0,0,1.0,2.0".parse::<BroadcastLine>().is_err());
    }

    // ── store ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn store_starts_empty() {
        let store = PositionStore::new();
        let snap = store.get().await;
        assert!(!snap.valid);
        assert_eq!(snap.record, PositionRecord::default());
    }

    #[tokio::test]
    async fn set_replaces_whole_record() {
        let store = PositionStore::new();
        store.set(full_record(1)).await;
        assert!(store.get().await.valid);

        let partial = PositionRecord {
            latitude: Some(Coordinate::from_micros(9)),
            longitude: Some(Coordinate::from_micros(9)),
            ..Default::default()
        };
        store.set(partial).await;
        let snap = store.get().await;
        assert_eq!(snap.record, partial);
        assert!(!snap.valid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reads_never_mix_writes() {
        let store = Arc::new(PositionStore::new());
        store.set(full_record(0)).await;

        let writers: Vec<_> = (1..=8)
            .map(|w| {
                let store = store.clone();
                tokio::spawn(async move {
                    for i in 0..200 {
                        store.set(full_record(w * 1000 + i)).await;
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        let snap = store.get().await;
                        let seed = snap.record.timestamp.unwrap();
                        assert_eq!(snap.record, full_record(seed));
                    }
                })
            })
            .collect();

        for task in writers.into_iter().chain(readers) {
            task.await.unwrap();
        }
    }
}
