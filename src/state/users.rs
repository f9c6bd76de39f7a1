use anyhow::{Context, Result};
use data_encoding::BASE32_NOPAD;
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{DateTime, Document, doc, oid::ObjectId, to_bson},
    options::ReturnDocument,
};
use rand::RngCore;
use std::time::{Duration, SystemTime};

use crate::{
    accounts::AccountStore,
    models::{Flash, Session, User},
};

use super::{AppState, MongoTx, Page, Pagination, SESSION_TTL_SECONDS, search_filter};

fn admin_filter() -> Document {
    doc! {
        "$or": [
            { "role": "admin" },
            { "role": { "$exists": false }, "is_admin_flag": true },
        ]
    }
}

pub async fn find_user(state: &AppState, email: &str) -> Result<Option<User>> {
    Ok(state
        .users
        .find_one(doc! { "email": email })
        .await?
        .map(User::from))
}

pub async fn get_user_by_id(state: &AppState, id: &ObjectId) -> Result<Option<User>> {
    Ok(state
        .users
        .find_one(doc! { "_id": *id })
        .await?
        .map(User::from))
}

pub async fn list_users(state: &AppState, search: &str, pagination: Pagination) -> Result<Page<User>> {
    let filter = search_filter(&["email", "first_name"], search);
    let total = state.users.count_documents(filter.clone()).await?;
    let mut cursor = state
        .users
        .find(filter)
        .sort(doc! { "_id": 1 })
        .skip(pagination.skip())
        .limit(pagination.per_page as i64)
        .await?;
    let mut users = Vec::new();
    while let Some(record) = cursor.try_next().await? {
        users.push(User::from(record));
    }
    Ok(Page {
        items: users,
        page: pagination.page,
        per_page: pagination.per_page,
        total,
    })
}

pub async fn count_users(state: &AppState) -> Result<u64> {
    Ok(state.users.count_documents(doc! {}).await?)
}

/// Password resets touch a single document, no transaction needed.
pub async fn set_password(state: &AppState, id: &ObjectId, hash: &str) -> Result<()> {
    state
        .users
        .update_one(doc! { "_id": *id }, doc! { "$set": { "password": hash } })
        .await
        .context("update password")?;
    Ok(())
}

pub async fn create_session(state: &AppState, email: &str) -> Result<String> {
    let _ = state
        .sessions
        .delete_many(doc! { "user_email": email.to_string() })
        .await;

    let mut token_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut token_bytes);
    let token = BASE32_NOPAD.encode(&token_bytes);

    let expires_at =
        DateTime::from_system_time(SystemTime::now() + Duration::from_secs(SESSION_TTL_SECONDS));

    state
        .sessions
        .insert_one(Session {
            id: None,
            token: token.clone(),
            user_email: email.to_string(),
            expires_at,
            flashes: Vec::new(),
        })
        .await?;

    Ok(token)
}

pub async fn find_user_by_session(state: &AppState, token: &str) -> Result<Option<User>> {
    if let Some(session) = state.sessions.find_one(doc! { "token": token }).await? {
        let expires_at = session.expires_at.to_system_time();
        if expires_at <= SystemTime::now() {
            let _ = state.sessions.delete_one(doc! { "token": token }).await;
            return Ok(None);
        }
        find_user(state, &session.user_email).await
    } else {
        Ok(None)
    }
}

pub async fn delete_session(state: &AppState, token: &str) -> Result<()> {
    let _ = state.sessions.delete_one(doc! { "token": token }).await?;
    Ok(())
}

pub async fn push_flashes(state: &AppState, token: &str, flashes: &[Flash]) -> Result<()> {
    if flashes.is_empty() {
        return Ok(());
    }
    let flashes = to_bson(flashes).context("encode flashes")?;
    state
        .sessions
        .update_one(
            doc! { "token": token },
            doc! { "$push": { "flashes": { "$each": flashes } } },
        )
        .await?;
    Ok(())
}

/// Returns pending flashes and clears them.
pub async fn take_flashes(state: &AppState, token: &str) -> Result<Vec<Flash>> {
    let previous = state
        .sessions
        .find_one_and_update(
            doc! { "token": token, "flashes.0": { "$exists": true } },
            doc! { "$set": { "flashes": [] } },
        )
        .return_document(ReturnDocument::Before)
        .await?;
    Ok(previous.map(|s| s.flashes).unwrap_or_default())
}

impl AccountStore for MongoTx<'_> {
    async fn user(&mut self, id: &ObjectId) -> Result<Option<User>> {
        Ok(self
            .state
            .users
            .find_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await?
            .map(User::from))
    }

    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>> {
        Ok(self
            .state
            .users
            .find_one(doc! { "email": email })
            .session(&mut self.session)
            .await?
            .map(User::from))
    }

    async fn count_admins_excluding(&mut self, id: Option<&ObjectId>) -> Result<u64> {
        let mut filter = admin_filter();
        if let Some(id) = id {
            filter.insert("_id", doc! { "$ne": *id });
        }
        Ok(self
            .state
            .users
            .count_documents(filter)
            .session(&mut self.session)
            .await?)
    }

    async fn insert_user(&mut self, user: &User) -> Result<ObjectId> {
        let res = self
            .state
            .user_writer()
            .insert_one(user)
            .session(&mut self.session)
            .await?;
        res.inserted_id
            .as_object_id()
            .context("user insert missing _id")
    }

    async fn save_user(&mut self, user: &User) -> Result<()> {
        let id = user.id.context("saving user without _id")?;
        let previous_email = self
            .state
            .users
            .find_one(doc! { "_id": id })
            .session(&mut self.session)
            .await?
            .map(|u| u.email);
        // Sessions are keyed by email; keep them attached after a rename.
        if let Some(previous) = previous_email.filter(|e| e != &user.email) {
            self.state
                .sessions
                .update_many(
                    doc! { "user_email": previous },
                    doc! { "$set": { "user_email": user.email.as_str() } },
                )
                .session(&mut self.session)
                .await?;
        }
        self.state
            .user_writer()
            .replace_one(doc! { "_id": id }, user)
            .session(&mut self.session)
            .await?;
        Ok(())
    }

    async fn delete_user(&mut self, id: &ObjectId) -> Result<()> {
        let user_email = self
            .state
            .users
            .find_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await?
            .map(|u| u.email);
        self.state
            .users
            .delete_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await?;
        if let Some(email) = user_email {
            self.state
                .sessions
                .delete_many(doc! { "user_email": email })
                .session(&mut self.session)
                .await?;
        }
        Ok(())
    }

    async fn fence_admins(&mut self) -> Result<()> {
        self.state
            .fences
            .update_one(doc! { "_id": "admins" }, doc! { "$inc": { "version": 1_i64 } })
            .upsert(true)
            .session(&mut self.session)
            .await?;
        Ok(())
    }
}
