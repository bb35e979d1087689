//! Maps `CoreError` onto HTTP status codes at the Device Sync API edge
//! (§7 "Propagation policy"), the way `crates/api-server/src/rest.rs`
//! maps `BidProcessor` failures onto `ErrorResponse`.

use crate::wire::ErrorBody;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dooh_core::error::CoreError;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            CoreError::InvalidParameter(_) => (StatusCode::BAD_REQUEST, "invalid_parameter"),
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CoreError::SlotOccupied(_) => (StatusCode::CONFLICT, "slot_occupied"),
            CoreError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            CoreError::TransientStorage(_) => (StatusCode::SERVICE_UNAVAILABLE, "transient_storage"),
            CoreError::PolicyRejected(_) => (StatusCode::UNPROCESSABLE_ENTITY, "policy_rejected"),
            CoreError::NoFittingSlot(_) => (StatusCode::UNPROCESSABLE_ENTITY, "no_fitting_slot"),
            CoreError::Fatal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "fatal"),
            CoreError::Serialization(_) => (StatusCode::BAD_REQUEST, "serialization"),
            CoreError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io"),
            CoreError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        (
            status,
            Json(ErrorBody {
                error: kind.to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
