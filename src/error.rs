use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Request-scoped failures. Nothing here is fatal to the process; every
/// variant maps to a status code and a JSON body for the caller.
#[derive(Error, Debug)]
pub enum Error {
    // validation: caller-fixable, surfaced verbatim
    #[error("invalid slot range: {0}")]
    InvalidRange(String),
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("invalid attendance status '{0}'")]
    InvalidStatus(String),
    #[error("invalid external link: {0}")]
    InvalidLink(String),
    #[error("week start {given} is not a week boundary (expected {expected})")]
    InvalidWeekStart {
        given: chrono::NaiveDate,
        expected: chrono::NaiveDate,
    },

    // conflict: a race was lost; caller should re-query fresh state
    #[error("a slot already exists at that day and hour")]
    SlotConflict,
    #[error("slot is already booked")]
    SlotAlreadyBooked,
    #[error("slot was booked by a concurrent request")]
    AlreadyBooked,
    #[error("student already has a booking overlapping that time")]
    StudentDoubleBooked,
    #[error("booking is already attached to a session")]
    CannotRelinkBooking,

    // state/policy violation
    #[error("the booking window for that week is not open")]
    WindowClosed,
    #[error("illegal session transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },
    #[error("session has no valid external meeting link")]
    MissingExternalLink,
    #[error("booking is linked to a session and cannot be cancelled")]
    CannotCancelLinkedBooking,

    // not found
    #[error("slot not found")]
    SlotNotFound,
    #[error("booking not found")]
    BookingNotFound,
    #[error("session not found")]
    SessionNotFound,
    #[error("schedule policy is not configured")]
    NotConfigured,

    // authorization: never leaks whether the resource exists
    #[error("forbidden")]
    Forbidden,

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::InvalidRange(_)
            | Error::InvalidPolicy(_)
            | Error::InvalidStatus(_)
            | Error::InvalidLink(_)
            | Error::InvalidWeekStart { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            Error::SlotConflict
            | Error::SlotAlreadyBooked
            | Error::AlreadyBooked
            | Error::StudentDoubleBooked
            | Error::CannotRelinkBooking
            | Error::WindowClosed
            | Error::IllegalTransition { .. }
            | Error::MissingExternalLink
            | Error::CannotCancelLinkedBooking => StatusCode::CONFLICT,

            Error::SlotNotFound
            | Error::BookingNotFound
            | Error::SessionNotFound
            | Error::NotConfigured => StatusCode::NOT_FOUND,

            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Error::InvalidRange(_) => "invalid_range",
            Error::InvalidPolicy(_) => "invalid_policy",
            Error::InvalidStatus(_) => "invalid_status",
            Error::InvalidLink(_) => "invalid_link",
            Error::InvalidWeekStart { .. } => "invalid_week_start",
            Error::SlotConflict => "slot_conflict",
            Error::SlotAlreadyBooked => "slot_already_booked",
            Error::AlreadyBooked => "already_booked",
            Error::StudentDoubleBooked => "student_double_booked",
            Error::CannotRelinkBooking => "cannot_relink_booking",
            Error::WindowClosed => "window_closed",
            Error::IllegalTransition { .. } => "illegal_transition",
            Error::MissingExternalLink => "missing_external_link",
            Error::CannotCancelLinkedBooking => "cannot_cancel_linked_booking",
            Error::SlotNotFound => "slot_not_found",
            Error::BookingNotFound => "booking_not_found",
            Error::SessionNotFound => "session_not_found",
            Error::NotConfigured => "not_configured",
            Error::Forbidden => "forbidden",
            Error::Database(_) => "internal",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // never expose driver details to the caller
            Error::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(serde_json::json!({
            "error": self.code(),
            "message": message,
        }));
        (status, body).into_response()
    }
}

/// Unique-constraint collisions surface as driver errors; the catalog and
/// matcher translate them into their own conflict variants.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::SlotAlreadyBooked.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(Error::SlotNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            Error::InvalidPolicy("week_reset_day out of range".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_forbidden_body_carries_no_resource_detail() {
        assert_eq!(Error::Forbidden.to_string(), "forbidden");
    }
}
