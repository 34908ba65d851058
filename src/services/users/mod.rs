//! In-memory user directory served through the pipeline.
//!
//! Organized by domain:
//! - `mod.rs`: Core types, method identifiers, `UsersService`
//! - `handlers.rs`: Thin handlers: extract identity, delegate
//! - `management.rs`: User CRUD over the directory

mod handlers;
mod management;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pipeline_core::{JwtSubject, UserRole};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::{MethodTable, RpcService};

// ============================================================================
// Methods
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsersMethod {
    CreateUser,
    GetUser,
    ListUsers,
    UpdateUser,
    DeleteUser,
    Me,
}

impl UsersMethod {
    pub const ALL: [Self; 6] = [
        Self::CreateUser,
        Self::GetUser,
        Self::ListUsers,
        Self::UpdateUser,
        Self::DeleteUser,
        Self::Me,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateUser => "CreateUser",
            Self::GetUser => "GetUser",
            Self::ListUsers => "ListUsers",
            Self::UpdateUser => "UpdateUser",
            Self::DeleteUser => "DeleteUser",
            Self::Me => "Me",
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl JwtSubject for User {
    fn user_id(&self) -> Uuid {
        self.id
    }

    fn email(&self) -> Option<&str> {
        Some(&self.email)
    }

    fn role(&self) -> Option<UserRole> {
        Some(self.role)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<UserRole>,
}

#[derive(Debug, Deserialize)]
pub struct GetUserRequest {
    pub id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListUsersRequest {
    /// Restrict to these ids. Empty means every visible user.
    #[serde(default)]
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ListUsersResponse {
    pub users: Vec<User>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteUserRequest {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct DeleteUserResponse {
    pub deleted: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct MeRequest {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Option<UserRole>,
    /// Directory record, when the caller has one.
    pub user: Option<User>,
}

// ============================================================================
// UsersService
// ============================================================================

/// User directory held in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct UsersService {
    users: RwLock<HashMap<Uuid, User>>,
}

impl UsersService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl RpcService for UsersService {
    fn method_table(self: Arc<Self>) -> MethodTable {
        MethodTable::new()
            .method(UsersMethod::CreateUser.as_str(), &self, Self::handle_create_user)
            .method(UsersMethod::GetUser.as_str(), &self, Self::handle_get_user)
            .method(UsersMethod::ListUsers.as_str(), &self, Self::handle_list_users)
            .method(UsersMethod::UpdateUser.as_str(), &self, Self::handle_update_user)
            .method(UsersMethod::DeleteUser.as_str(), &self, Self::handle_delete_user)
            .method(UsersMethod::Me.as_str(), &self, Self::handle_me)
    }
}
