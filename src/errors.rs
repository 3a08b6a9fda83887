use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Product 550e8400-e29b-41d4-a716-446655440000 not found",
    "timestamp": "2025-01-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Unprocessable Entity")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Unified error type for the settlement pipeline and its HTTP surface.
///
/// Business-rule violations carry their message verbatim to the caller;
/// infrastructure failures are logged and reduced to a generic message so no
/// internal detail leaks through the API.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid payment signature")]
    InvalidSignature,

    #[error("Out of stock: {}", .0.join(", "))]
    OutOfStock(Vec<String>),

    #[error("Payment is not captured yet")]
    PaymentNotCaptured,

    #[error("Payment has already been settled into an order")]
    AlreadySettled,

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Conditional update conflict on {0}")]
    ConditionalUpdateConflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::EmptyCart | Self::ValidationError(_) | Self::InvalidOperation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::OutOfStock(_) | Self::PaymentNotCaptured => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AlreadySettled | Self::ConditionalUpdateConflict(_) => StatusCode::CONFLICT,
            Self::GatewayUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message suitable for HTTP responses. Infrastructure errors collapse to
    /// a generic message; business-rule errors surface verbatim.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EventError(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::GatewayUnavailable(_) => "Payment gateway unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::EventError(_) | Self::InternalError(_)
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if self.is_internal() {
            tracing::error!(error = %self, "request failed with internal error");
        } else {
            tracing::debug!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_surface_verbatim() {
        let err = ServiceError::OutOfStock(vec!["widget".into(), "gadget".into()]);
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.response_message(), "Out of stock: widget, gadget");
    }

    #[test]
    fn infrastructure_errors_are_generic() {
        let err = ServiceError::InternalError("connection pool exhausted".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.response_message(), "Internal server error");
    }

    #[test]
    fn signature_mismatch_is_unauthorized() {
        assert_eq!(
            ServiceError::InvalidSignature.status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn already_settled_is_conflict() {
        assert_eq!(
            ServiceError::AlreadySettled.status_code(),
            StatusCode::CONFLICT
        );
    }
}
