//! Producer submissions: validation, rounding, and the write into the store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::metrics::RelayMetrics;
use crate::position::{CalendarFields, Coordinate, PositionRecord, PositionStore};

/// JSON body of `POST /updateData`.
///
/// Calendar fields and the timestamp may be absent; they are stored as unset.
/// Latitude/longitude are kept as raw JSON so both numbers and numeric
/// strings can be rounded from their decimal text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestPayload {
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub year: Option<i64>,
    #[serde(default)]
    pub month: Option<i64>,
    #[serde(default)]
    pub day: Option<i64>,
    #[serde(default)]
    pub hour: Option<i64>,
    #[serde(default)]
    pub minute: Option<i64>,
    #[serde(default)]
    pub second: Option<i64>,
    #[serde(default)]
    pub latitude: Option<serde_json::Value>,
    #[serde(default)]
    pub longitude: Option<serde_json::Value>,
}

impl IngestPayload {
    /// Build the record to store. Fails without side effects if either
    /// coordinate is missing or not a number.
    pub fn into_record(self) -> Result<PositionRecord, RelayError> {
        let latitude = parse_coordinate("latitude", self.latitude.as_ref())?;
        let longitude = parse_coordinate("longitude", self.longitude.as_ref())?;
        Ok(PositionRecord {
            timestamp: self.timestamp,
            calendar: CalendarFields {
                year: self.year,
                month: self.month,
                day: self.day,
                hour: self.hour,
                minute: self.minute,
                second: self.second,
            },
            latitude: Some(latitude),
            longitude: Some(longitude),
        })
    }
}

fn parse_coordinate(
    field: &str,
    value: Option<&serde_json::Value>,
) -> Result<Coordinate, RelayError> {
    let value = value.ok_or_else(|| RelayError::MalformedInput(format!("{field} is required")))?;
    Coordinate::from_json(value).map_err(|e| match e {
        RelayError::MalformedInput(reason) => {
            RelayError::MalformedInput(format!("{field}: {reason}"))
        }
        other => other,
    })
}

/// Writes validated producer submissions into the shared [`PositionStore`].
pub struct IngestEndpoint {
    store: Arc<PositionStore>,
    metrics: Arc<RelayMetrics>,
}

impl IngestEndpoint {
    pub fn new(store: Arc<PositionStore>, metrics: Arc<RelayMetrics>) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &Arc<PositionStore> {
        &self.store
    }

    /// Validate, round, and store one submission (whole-or-nothing).
    pub async fn submit(&self, payload: IngestPayload) -> Result<PositionRecord, RelayError> {
        let record = match payload.into_record() {
            Ok(record) => record,
            Err(e) => {
                self.reject(&e);
                return Err(e);
            }
        };
        self.store.set(record).await;
        self.metrics.ingest_accepted();
        debug!(
            timestamp = ?record.timestamp,
            complete = record.is_valid(),
            "position updated"
        );
        Ok(record)
    }

    /// Record a submission that never reached [`IngestEndpoint::submit`]
    /// (unparseable body).
    pub fn reject(&self, error: &RelayError) {
        self.metrics.ingest_rejected();
        warn!("Rejected position update: {}", error);
    }
}
