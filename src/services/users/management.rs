//! User management: CRUD over the in-memory directory.

use chrono::Utc;
use pipeline_core::{AppError, OptionStatusExt, UserRole};
use tracing::info;
use uuid::Uuid;

use super::{CreateUserRequest, UpdateUserRequest, User, UsersService};

/// Maximum email length.
const MAX_EMAIL_LENGTH: usize = 255;
/// Maximum name length.
const MAX_NAME_LENGTH: usize = 255;

/// Normalizes email to lowercase and trimmed.
fn canonical_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed || email.len() > MAX_EMAIL_LENGTH {
        return Err(AppError::invalid_argument("Invalid email address"));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), AppError> {
    if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
        return Err(AppError::invalid_argument(format!(
            "Name must be 1-{MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(())
}

impl UsersService {
    /// Creates a new user.
    pub(super) fn create_user(&self, req: CreateUserRequest) -> Result<User, AppError> {
        let email = canonical_email(&req.email);
        let name = req.name.trim().to_owned();
        validate_email(&email)?;
        validate_name(&name)?;

        let mut users = self.users.write();
        if users.values().any(|u| u.email == email) {
            return Err(AppError::conflict("User", "email", &email));
        }

        let user = User {
            id: Uuid::new_v4(),
            name,
            email,
            role: req.role.unwrap_or(UserRole::User),
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        info!(user_id = %user.id, role = %user.role, "User created");
        Ok(user)
    }

    pub(super) fn get_user(&self, id: Uuid) -> Result<User, AppError> {
        self.users.read().get(&id).cloned().ok_or_not_found("User", id)
    }

    /// Users with the given ids (all users when `ids` is empty), oldest first.
    pub(super) fn list_users(&self, ids: &[Uuid]) -> Vec<User> {
        let users = self.users.read();
        let mut listed: Vec<User> = if ids.is_empty() {
            users.values().cloned().collect()
        } else {
            ids.iter().filter_map(|id| users.get(id).cloned()).collect()
        };
        listed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        listed
    }

    pub(super) fn update_user(&self, req: UpdateUserRequest) -> Result<User, AppError> {
        let name = req.name.map(|n| n.trim().to_owned());
        let email = req.email.as_deref().map(canonical_email);
        if let Some(name) = &name {
            validate_name(name)?;
        }
        if let Some(email) = &email {
            validate_email(email)?;
        }

        let mut users = self.users.write();
        if let Some(email) = &email
            && users.values().any(|u| u.id != req.id && &u.email == email)
        {
            return Err(AppError::conflict("User", "email", email));
        }

        let user = users.get_mut(&req.id).ok_or_not_found("User", req.id)?;
        if let Some(name) = name {
            user.name = name;
        }
        if let Some(email) = email {
            user.email = email;
        }
        info!(user_id = %user.id, "User updated");
        Ok(user.clone())
    }

    pub(super) fn delete_user(&self, id: Uuid) -> Result<User, AppError> {
        let removed = self.users.write().remove(&id).ok_or_not_found("User", id)?;
        info!(user_id = %id, "User deleted");
        Ok(removed)
    }
}
