// accounts.rs
// User management with the admin-preserving checks. Every operation first
// writes the admin fence so that concurrent role changes serialize on it
// instead of each seeing a stale admin count.

use std::future::Future;

use anyhow::Result;
use mongodb::bson::oid::ObjectId;
use tracing::info;

use crate::{
    access::Principal,
    error::InventoryError,
    models::{Role, User},
};

pub trait AccountStore {
    fn user(&mut self, id: &ObjectId) -> impl Future<Output = Result<Option<User>>> + Send;
    fn user_by_email(&mut self, email: &str) -> impl Future<Output = Result<Option<User>>> + Send;
    /// Admins by role (or legacy flag), ignoring `id` when given.
    fn count_admins_excluding(
        &mut self,
        id: Option<&ObjectId>,
    ) -> impl Future<Output = Result<u64>> + Send;
    fn insert_user(&mut self, user: &User) -> impl Future<Output = Result<ObjectId>> + Send;
    fn save_user(&mut self, user: &User) -> impl Future<Output = Result<()>> + Send;
    fn delete_user(&mut self, id: &ObjectId) -> impl Future<Output = Result<()>> + Send;
    fn fence_admins(&mut self) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub email: String,
    pub role: Role,
    /// Already hashed.
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct UserChanges {
    pub first_name: String,
    pub email: String,
    pub role: Role,
    /// Replacement hash, when the password changes.
    pub password_hash: Option<String>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn create_user<S: AccountStore>(
    store: &mut S,
    new_user: NewUser,
) -> Result<ObjectId, InventoryError> {
    let email = normalize_email(&new_user.email);
    if store.user_by_email(&email).await?.is_some() {
        return Err(InventoryError::conflict("Email already exists."));
    }
    let id = store
        .insert_user(&User {
            id: None,
            email,
            first_name: new_user.first_name,
            password: new_user.password_hash,
            role: new_user.role,
        })
        .await?;
    info!(user_id = %id, role = new_user.role.as_str(), "user created");
    Ok(id)
}

pub async fn update_user<S: AccountStore>(
    store: &mut S,
    actor: &Principal,
    target_id: &ObjectId,
    changes: UserChanges,
) -> Result<User, InventoryError> {
    store.fence_admins().await?;
    let mut target = store
        .user(target_id)
        .await?
        .ok_or(InventoryError::NotFound("user"))?;

    let email = normalize_email(&changes.email);
    if let Some(existing) = store.user_by_email(&email).await? {
        if existing.id.as_ref() != Some(target_id) {
            return Err(InventoryError::conflict("Email already exists for another user."));
        }
    }

    if target.role.is_admin() && !changes.role.is_admin() {
        if &actor.id == target_id {
            return Err(InventoryError::conflict(
                "You cannot remove your own admin role. Ask another admin to change your role.",
            ));
        }
        if store.count_admins_excluding(Some(target_id)).await? == 0 {
            return Err(InventoryError::conflict(
                "Cannot demote this user, there must be at least one admin account.",
            ));
        }
    }

    target.first_name = changes.first_name;
    target.email = email;
    target.role = changes.role;
    if let Some(hash) = changes.password_hash {
        target.password = hash;
    }
    store.save_user(&target).await?;
    info!(user_id = %target_id, actor = %actor.id, role = target.role.as_str(), "user updated");
    Ok(target)
}

pub async fn delete_user<S: AccountStore>(
    store: &mut S,
    actor: &Principal,
    target_id: &ObjectId,
) -> Result<(), InventoryError> {
    store.fence_admins().await?;
    if &actor.id == target_id {
        return Err(InventoryError::conflict("You cannot delete your own account."));
    }
    let target = store
        .user(target_id)
        .await?
        .ok_or(InventoryError::NotFound("user"))?;
    if target.role.is_admin() && store.count_admins_excluding(Some(target_id)).await? == 0 {
        return Err(InventoryError::conflict("You cannot delete the last admin user."));
    }
    store.delete_user(target_id).await?;
    info!(user_id = %target_id, actor = %actor.id, "user deleted");
    Ok(())
}
