//! Core library with the call model, status taxonomy and token verification
//! shared by the RPC pipeline and its services.
//!
//! - Error types with wire and `tonic::Status` conversion
//! - Case-insensitive call metadata
//! - Call / per-call context
//! - Service token verification (with `jwt` feature)

pub mod call;
#[cfg(feature = "jwt")]
pub mod call_ext;
pub mod error;
#[cfg(feature = "jwt")]
pub mod jwt;
pub mod metadata;

pub use call::{Call, CallContext};
#[cfg(feature = "jwt")]
pub use call_ext::CallAuthExt;
pub use error::{
    AppError, INTERNAL_ERROR_MESSAGE, OptionStatusExt, RpcError, RpcResult, StatusCode, WireError,
    presentation_status,
};
#[cfg(feature = "jwt")]
pub use jwt::{AuthInfo, JwtError, JwtSubject, JwtValidator, TokenVerifier, UserRole};
pub use metadata::{Metadata, MetadataError, keys};
