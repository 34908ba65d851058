//! Thin handlers that extract the caller's identity and delegate to domain methods.

use std::sync::Arc;

use pipeline_core::{Call, CallAuthExt, RpcResult, UserRole};
use tracing::instrument;

use super::{
    CreateUserRequest, DeleteUserRequest, DeleteUserResponse, GetUserRequest, ListUsersRequest,
    ListUsersResponse, MeRequest, MeResponse, UpdateUserRequest, User, UsersService,
};

impl UsersService {
    #[instrument(skip_all, fields(email = %req.email))]
    pub(super) async fn handle_create_user(
        self: Arc<Self>,
        call: Call,
        req: CreateUserRequest,
    ) -> RpcResult<User> {
        if req.role == Some(UserRole::Administrator) {
            call.auth_admin()?;
        }
        Ok(self.create_user(req)?)
    }

    #[instrument(skip_all, fields(id = %req.id))]
    pub(super) async fn handle_get_user(
        self: Arc<Self>,
        call: Call,
        req: GetUserRequest,
    ) -> RpcResult<User> {
        call.auth_for(req.id)?;
        Ok(self.get_user(req.id)?)
    }

    #[instrument(skip_all)]
    pub(super) async fn handle_list_users(
        self: Arc<Self>,
        call: Call,
        req: ListUsersRequest,
    ) -> RpcResult<ListUsersResponse> {
        let auth = call.auth()?;
        let users = if auth.is_admin() {
            self.list_users(&req.ids)
        } else {
            // Non-admins only ever see themselves.
            self.list_users(&[auth.user_id])
        };
        Ok(ListUsersResponse { users })
    }

    #[instrument(skip_all, fields(id = %req.id))]
    pub(super) async fn handle_update_user(
        self: Arc<Self>,
        call: Call,
        req: UpdateUserRequest,
    ) -> RpcResult<User> {
        call.auth_for(req.id)?;
        Ok(self.update_user(req)?)
    }

    #[instrument(skip_all, fields(id = %req.id))]
    pub(super) async fn handle_delete_user(
        self: Arc<Self>,
        call: Call,
        req: DeleteUserRequest,
    ) -> RpcResult<DeleteUserResponse> {
        call.auth_for(req.id)?;
        self.delete_user(req.id)?;
        Ok(DeleteUserResponse { deleted: req.id })
    }

    #[instrument(skip_all)]
    pub(super) async fn handle_me(
        self: Arc<Self>,
        call: Call,
        _req: MeRequest,
    ) -> RpcResult<MeResponse> {
        let auth = call.auth()?;
        Ok(MeResponse {
            user: self.get_user(auth.user_id).ok(),
            user_id: auth.user_id,
            email: auth.email,
            role: auth.role,
        })
    }
}
