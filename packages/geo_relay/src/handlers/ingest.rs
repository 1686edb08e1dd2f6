use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};

use crate::RelayState;
use crate::error::RelayError;
use crate::ingest::IngestPayload;

/// `POST /updateData`: store the producer's latest position.
pub async fn update_data(
    State(state): State<RelayState>,
    payload: Result<Json<IngestPayload>, JsonRejection>,
) -> Result<StatusCode, RelayError> {
    let Json(payload) = payload.map_err(|rejection| {
        let err = RelayError::MalformedInput(rejection.body_text());
        state.ingest.reject(&err);
        err
    })?;
    state.ingest.submit(payload).await?;
    Ok(StatusCode::OK)
}
