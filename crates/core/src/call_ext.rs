//! Extension traits for [`Call`].
//!
//! Provides ergonomic methods for reading the identity injected by the auth
//! interceptor from inside business handlers.

use uuid::Uuid;

use crate::call::Call;
use crate::error::AppError;
use crate::jwt::AuthInfo;

/// Extension trait for extracting authentication from calls.
///
/// ```ignore
/// use pipeline_core::CallAuthExt;
///
/// async fn delete_user(&self, call: Call, req: DeleteUser) -> RpcResult<Deleted> {
///     let auth = call.auth_for(req.id)?; // owner or admin
///     // ...
/// }
/// ```
pub trait CallAuthExt {
    /// Identity injected by the auth interceptor.
    ///
    /// # Errors
    /// Returns `UNAUTHENTICATED` if the call carries no verified identity.
    fn auth(&self) -> Result<AuthInfo, AppError>;

    /// # Errors
    /// - `UNAUTHENTICATED` if not authenticated
    /// - `PERMISSION_DENIED` if not an admin
    fn auth_admin(&self) -> Result<AuthInfo, AppError>;

    /// Access is granted if the caller matches `target_user_id` or is an admin.
    ///
    /// # Errors
    /// - `UNAUTHENTICATED` if not authenticated
    /// - `PERMISSION_DENIED` if access denied
    fn auth_for(&self, target_user_id: Uuid) -> Result<AuthInfo, AppError>;

    /// Identity if present, for handlers that serve both public and
    /// authenticated callers.
    fn try_auth(&self) -> Option<AuthInfo>;
}

impl CallAuthExt for Call {
    fn auth(&self) -> Result<AuthInfo, AppError> {
        self.try_auth()
            .ok_or_else(|| AppError::unauthenticated("Authentication required"))
    }

    fn auth_admin(&self) -> Result<AuthInfo, AppError> {
        let auth = self.auth()?;
        if !auth.is_admin() {
            return Err(AppError::permission_denied("Admin access required"));
        }
        Ok(auth)
    }

    fn auth_for(&self, target_user_id: Uuid) -> Result<AuthInfo, AppError> {
        let auth = self.auth()?;
        if !auth.can_access(target_user_id) {
            tracing::warn!(user_id = %auth.user_id, target = %target_user_id, "Permission denied");
            return Err(AppError::permission_denied(
                "Cannot access another user's resources",
            ));
        }
        Ok(auth)
    }

    fn try_auth(&self) -> Option<AuthInfo> {
        self.extensions().get::<AuthInfo>().cloned()
    }
}
