//! Error taxonomy shared by every component (spec §7).
//!
//! Each component gets its own `thiserror` enum so call sites can match on
//! precise variants; [`ApiError`] is the flattened shape that ultimately
//! reaches an HTTP caller, carrying one of the taxonomy's error codes.

use serde::Serialize;

/// Stable error codes surfaced to API callers.
///
/// These are the kinds from spec §7, not Rust types: validation rejections
/// carry a constraint-specific code, everything else carries one of the
/// fixed codes below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Routing,
    Capacity,
    Timeout,
    Shutdown,
    Internal,
}

/// A well-formed error payload attached to an `ApiResponse`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub kind: ErrorKind,
}

impl ApiError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            kind,
        }
    }

    pub fn processing_timeout(stage: Option<&str>) -> Self {
        let message = match stage {
            Some(stage) => format!("order processing exceeded the time limit while in stage {stage}"),
            None => "order processing exceeded the time limit".to_string(),
        };
        Self::new(ErrorKind::Timeout, "PROCESSING_TIMEOUT", message)
    }

    pub fn service_shutdown() -> Self {
        Self::new(
            ErrorKind::Shutdown,
            "SERVICE_SHUTDOWN",
            "the exchange is shutting down",
        )
    }

    pub fn overload(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capacity, "SERVICE_OVERLOADED", detail.into())
    }
}

/// Matching engine / order book errors (C1, C2).
#[derive(Debug, Clone, thiserror::Error)]
pub enum MatchingError {
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("duplicate order id: {0}")]
    DuplicateOrderId(String),

    #[error("instrument mismatch: order targets {order}, book is {book}")]
    InstrumentMismatch { order: String, book: String },

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("internal matching error: {0}")]
    Internal(String),
}

/// Venue-level errors (C4), a superset of matching errors plus routing rules.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VenueError {
    #[error(transparent)]
    Matching(#[from] MatchingError),

    #[error("duplicate instrument listing: {0}")]
    DuplicateInstrument(String),

    #[error("order submission is not allowed in the current phase")]
    SubmissionNotAllowed,

    #[error("order cancellation is not allowed in the current phase")]
    CancellationNotAllowed,

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("trader does not own order {order_id}")]
    NotOwner { order_id: String },
}

/// Validator errors (C5).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("constraint violated: {code}: {message}")]
    ConstraintViolated { code: String, message: String },

    #[error("rate limit exceeded")]
    RateLimited,
}

/// Coordinator errors (C6).
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinatorError {
    #[error("coordinator is shutting down")]
    ShuttingDown,

    #[error("service overloaded: {pending}/{capacity} pending requests")]
    Overloaded { pending: usize, capacity: usize },

    #[error("unknown request id: {0}")]
    UnknownRequest(String),
}

impl MatchingError {
    pub fn code(&self) -> &'static str {
        match self {
            MatchingError::UnknownInstrument(_) => "UNKNOWN_INSTRUMENT",
            MatchingError::DuplicateOrderId(_) => "DUPLICATE_ORDER_ID",
            MatchingError::InstrumentMismatch { .. } => "INSTRUMENT_MISMATCH",
            MatchingError::InvalidOrder(_) => "INVALID_ORDER",
            MatchingError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl VenueError {
    pub fn code(&self) -> &'static str {
        match self {
            VenueError::Matching(e) => e.code(),
            VenueError::DuplicateInstrument(_) => "DUPLICATE_INSTRUMENT",
            VenueError::SubmissionNotAllowed => "SUBMISSION_NOT_ALLOWED",
            VenueError::CancellationNotAllowed => "CANCELLATION_NOT_ALLOWED",
            VenueError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            VenueError::NotOwner { .. } => "NOT_OWNER",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VenueError::Matching(MatchingError::Internal(_)) => ErrorKind::Internal,
            _ => ErrorKind::Routing,
        }
    }
}
