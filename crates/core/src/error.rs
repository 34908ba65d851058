//! Status taxonomy and error translation for the interceptor pipeline.
//!
//! Application errors carry a [`StatusCode`] and reach callers verbatim.
//! Anything else collapses into a generic `INTERNAL` wire error: internal
//! details are logged but never exposed to clients.

use std::borrow::Cow;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tonic::Status;
use tracing::error;

use crate::metadata::{Metadata, keys};

/// Fixed user-facing message for failures that are not application errors.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

/// RPC status codes. Discriminants match the gRPC wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl StatusCode {
    pub const ALL: [Self; 17] = [
        Self::Ok,
        Self::Cancelled,
        Self::Unknown,
        Self::InvalidArgument,
        Self::DeadlineExceeded,
        Self::NotFound,
        Self::AlreadyExists,
        Self::PermissionDenied,
        Self::ResourceExhausted,
        Self::FailedPrecondition,
        Self::Aborted,
        Self::OutOfRange,
        Self::Unimplemented,
        Self::Internal,
        Self::Unavailable,
        Self::DataLoss,
        Self::Unauthenticated,
    ];

    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Resolve a raw wire value. Returns `None` outside `0..=16`.
    #[must_use]
    pub const fn from_i32(code: i32) -> Option<Self> {
        if code < 0 || code as usize >= Self::ALL.len() {
            return None;
        }
        Some(Self::ALL[code as usize])
    }

    /// Canonical upper-case name, also used as the wire error `name`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// HTTP status used when the code is presented to HTTP-facing callers.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Cancelled => 499,
            Self::Unknown | Self::Internal | Self::DataLoss => 500,
            Self::InvalidArgument | Self::FailedPrecondition | Self::OutOfRange => 400,
            Self::DeadlineExceeded => 504,
            Self::NotFound => 404,
            Self::AlreadyExists | Self::Aborted => 409,
            Self::PermissionDenied => 403,
            Self::ResourceExhausted => 429,
            Self::Unimplemented => 501,
            Self::Unavailable => 503,
            Self::Unauthenticated => 401,
        }
    }

    /// Lower-case presentation label paired with [`Self::http_status`].
    #[must_use]
    pub const fn http_label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid_argument",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::ResourceExhausted => "resource_exhausted",
            Self::FailedPrecondition => "failed_precondition",
            Self::Aborted => "aborted",
            Self::OutOfRange => "out_of_range",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data_loss",
            Self::Unauthenticated => "unauthenticated",
        }
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<StatusCode> for tonic::Code {
    fn from(code: StatusCode) -> Self {
        Self::from_i32(code.as_i32())
    }
}

impl From<tonic::Code> for StatusCode {
    fn from(code: tonic::Code) -> Self {
        Self::from_i32(code as i32).unwrap_or(Self::Unknown)
    }
}

/// Presentation mapping for a raw wire code.
///
/// Total over `i32`: anything outside the taxonomy maps to `(500, "unknown")`.
#[must_use]
pub fn presentation_status(raw: i32) -> (u16, &'static str) {
    StatusCode::from_i32(raw).map_or((500, "unknown"), |code| {
        (code.http_status(), code.http_label())
    })
}

/// Application error: an intentional failure with a status from the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct AppError {
    code: StatusCode,
    message: String,
    details: Option<String>,
}

impl AppError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[inline]
    #[must_use]
    pub const fn code(&self) -> StatusCode {
        self.code
    }

    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    #[must_use]
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unauthenticated, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PermissionDenied, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(StatusCode::ResourceExhausted, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }

    /// Create a not found error for an entity.
    pub fn not_found(entity: &str, id: impl Display) -> Self {
        Self::new(StatusCode::NotFound, format!("{entity} not found"))
            .with_details(format!("{entity} with id {id} does not exist"))
    }

    /// Create a conflict error for duplicate data.
    #[must_use]
    pub fn conflict(entity: &str, field: &str, value: impl Display) -> Self {
        Self::new(StatusCode::AlreadyExists, format!("{entity} already exists"))
            .with_details(format!("{entity} with {field} {value} already exists"))
    }

    /// The generic internal failure every non-application error collapses into.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(StatusCode::Internal, INTERNAL_ERROR_MESSAGE)
    }

    /// Translate into the transport shape, mirroring the message into the
    /// `message` metadata entry for clients that only read metadata.
    #[must_use]
    pub fn to_wire_error(&self) -> WireError {
        let mut metadata = Metadata::new();
        if let Err(e) = metadata.insert(keys::MESSAGE, &metadata_message(&self.message)) {
            error!(code = %self.code, error = %e, "Error message mirror dropped");
        }
        WireError {
            name: self.code.as_str().to_string(),
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone().unwrap_or_default(),
            metadata,
        }
    }
}

/// Header-safe form of an error message: verbatim when it is printable
/// ASCII, percent-encoded otherwise.
fn metadata_message(message: &str) -> Cow<'_, str> {
    if message.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        Cow::Borrowed(message)
    } else {
        urlencoding::encode(message)
    }
}

/// Terminal, transport-serializable error. Created once per failed call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name} ({}): {message}", .code.as_i32())]
pub struct WireError {
    pub name: String,
    pub code: StatusCode,
    pub message: String,
    pub details: String,
    pub metadata: Metadata,
}

impl WireError {
    /// Generic `INTERNAL` error with the fixed user-facing message.
    #[must_use]
    pub fn internal() -> Self {
        AppError::internal().to_wire_error()
    }

    /// Message recovered the way metadata-reading clients do: the `message`
    /// entry when present (percent-decoded if it was encoded), the structured
    /// message otherwise.
    #[must_use]
    pub fn client_message(&self) -> Cow<'_, str> {
        match self.metadata.get(keys::MESSAGE) {
            Some(mirror) if mirror == self.message => Cow::Borrowed(mirror),
            Some(mirror) => urlencoding::decode(mirror).unwrap_or(Cow::Borrowed(mirror)),
            None => Cow::Borrowed(&self.message),
        }
    }
}

impl From<AppError> for WireError {
    fn from(error: AppError) -> Self {
        error.to_wire_error()
    }
}

impl From<WireError> for Status {
    fn from(error: WireError) -> Self {
        Self::with_details_and_metadata(
            error.code.into(),
            error.message,
            error.details.into_bytes().into(),
            error.metadata.into(),
        )
    }
}

impl From<AppError> for Status {
    fn from(error: AppError) -> Self {
        error.to_wire_error().into()
    }
}

impl From<Status> for WireError {
    fn from(status: Status) -> Self {
        let code = StatusCode::from(status.code());
        Self {
            name: code.as_str().to_string(),
            code,
            message: status.message().to_string(),
            details: String::from_utf8_lossy(status.details()).into_owned(),
            metadata: Metadata::from(status.metadata()),
        }
    }
}

/// Every way a call can fail inside the pipeline.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Intentional failure, forwarded to the caller as-is.
    #[error(transparent)]
    App(#[from] AppError),

    /// `next()` re-entered at or below the current dispatch cursor.
    #[error("next() called multiple times (index {index}, cursor {cursor})")]
    OrderingViolation { index: usize, cursor: isize },

    /// An interceptor or handler panicked.
    #[error("handler panicked: {0}")]
    Panic(String),

    /// Any other failure, e.g. a downstream I/O error.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl RpcError {
    #[inline]
    #[must_use]
    pub const fn is_application(&self) -> bool {
        matches!(self, Self::App(_))
    }

    /// Status the caller will observe for this failure.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::App(err) => err.code(),
            _ => StatusCode::Internal,
        }
    }

    /// Collapse into an application error, logging anything that is not one.
    #[must_use]
    pub fn into_app_error(self, method: &str) -> AppError {
        match self {
            Self::App(err) => err,
            other => {
                error!(method, error = %other, detail = ?other, "Unhandled RPC failure");
                AppError::internal()
            }
        }
    }

    /// Translate into the wire shape delivered to the caller.
    #[must_use]
    pub fn into_wire_error(self, method: &str) -> WireError {
        self.into_app_error(method).to_wire_error()
    }
}

/// Result of a handler or interceptor.
pub type RpcResult<T = serde_json::Value> = Result<T, RpcError>;

/// Extension trait for Option types.
pub trait OptionStatusExt<T> {
    /// Convert `None` to a `NOT_FOUND` application error.
    ///
    /// # Errors
    /// Returns [`AppError::not_found`] if the option is `None`.
    fn ok_or_not_found(self, entity: &str, id: impl Display) -> Result<T, AppError>;
}

impl<T> OptionStatusExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str, id: impl Display) -> Result<T, AppError> {
        self.ok_or_else(|| AppError::not_found(entity, id))
    }
}
