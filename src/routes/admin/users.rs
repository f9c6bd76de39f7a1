use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Form, Path, Query, State},
    http::StatusCode,
    response::{Html, Response},
};
use serde::Deserialize;

use crate::{
    access::ADMIN_ONLY,
    accounts::{self, NewUser, UserChanges, normalize_email},
    error::InventoryError,
    models::{Flash, Role},
    password::hash_password,
    routes::helpers::*,
    session::SessionUser,
    state::{AppState, list_users},
};

const USERS: &str = "/admin/users";
const MIN_PASSWORD: usize = 6;

#[derive(Template)]
#[template(path = "admin/users.html")]
struct UsersTemplate {
    chrome: Chrome,
    users: Vec<UserRow>,
    search: String,
    pager: Pager,
}

struct UserRow {
    id: String,
    name: String,
    email: String,
    role: &'static str,
    is_admin: bool,
    is_self: bool,
}

#[derive(Deserialize)]
pub struct UserForm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    confirm_password: String,
}

#[derive(Debug)]
struct CheckedUser {
    name: String,
    email: String,
    role: Role,
}

impl UserForm {
    /// Shared field rules; the password rules differ between create and edit.
    fn check(&self, errors: &mut Vec<String>) -> Option<CheckedUser> {
        let name = self.name.trim().to_string();
        let email = normalize_email(&self.email);
        if name.is_empty() {
            errors.push("Name is required.".to_string());
        }
        if email.is_empty() {
            errors.push("Email is required.".to_string());
        }
        let role_raw = if self.role.trim().is_empty() {
            "user"
        } else {
            self.role.trim()
        };
        let role = Role::parse(role_raw);
        if role.is_none() {
            errors.push("Invalid role selected.".to_string());
        }
        Some(CheckedUser {
            name,
            email,
            role: role?,
        })
    }

    fn for_create(&self) -> Result<(CheckedUser, &str), Vec<String>> {
        let mut errors = Vec::new();
        let checked = self.check(&mut errors);
        if self.password.is_empty() {
            errors.push("Password is required.".to_string());
        } else if self.password.chars().count() < MIN_PASSWORD {
            errors.push(format!("Password must be at least {MIN_PASSWORD} characters."));
        }
        if self.password != self.confirm_password {
            errors.push("Password and confirm password do not match.".to_string());
        }
        match checked {
            Some(checked) if errors.is_empty() => Ok((checked, self.password.as_str())),
            _ => Err(errors),
        }
    }

    /// A blank password leaves the current one in place.
    fn for_update(&self) -> Result<(CheckedUser, Option<&str>), Vec<String>> {
        let mut errors = Vec::new();
        let checked = self.check(&mut errors);
        let password = (!self.password.is_empty()).then_some(self.password.as_str());
        if password.is_some() {
            if self.password.chars().count() < MIN_PASSWORD {
                errors.push(format!(
                    "New password must be at least {MIN_PASSWORD} characters."
                ));
            }
            if self.password != self.confirm_password {
                errors.push("New password and confirmation do not match.".to_string());
            }
        }
        match checked {
            Some(checked) if errors.is_empty() => Ok((checked, password)),
            _ => Err(errors),
        }
    }
}

pub async fn users_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Html<String>, StatusCode> {
    let actor = guard(&session_user, ADMIN_ONLY)?.id;

    let search = query.search();
    let page = list_users(&state, &search, query.pagination())
        .await
        .map_err(internal)?;
    let pager = pager(USERS, &page, &search);
    let users = page
        .items
        .into_iter()
        .filter_map(|u| {
            let id = u.id?;
            Some(UserRow {
                id: id.to_hex(),
                name: u.first_name,
                email: u.email,
                role: u.role.as_str(),
                is_admin: u.role.is_admin(),
                is_self: id == actor,
            })
        })
        .collect();

    render(UsersTemplate {
        chrome: chrome(&state, &session_user).await,
        users,
        search,
        pager,
    })
}

pub async fn users_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Form(form): Form<UserForm>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;

    let (checked, password) = match form.for_create() {
        Ok(valid) => valid,
        Err(errors) => {
            return Ok(flash_redirect(&state, &session_user, error_flashes(errors), USERS).await);
        }
    };
    let password_hash = hash_password(password).map_err(internal)?;

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = accounts::create_user(
            &mut tx,
            NewUser {
                first_name: checked.name,
                email: checked.email,
                role: checked.role,
                password_hash,
            },
        )
        .await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, USERS, |_| {
        vec![Flash::success("User registered successfully.")]
    })
    .await)
}

pub async fn users_update(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Form(form): Form<UserForm>,
) -> Result<Response, StatusCode> {
    let actor = guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;

    let (checked, password) = match form.for_update() {
        Ok(valid) => valid,
        Err(errors) => {
            return Ok(flash_redirect(&state, &session_user, error_flashes(errors), USERS).await);
        }
    };
    let password_hash = password.map(hash_password).transpose().map_err(internal)?;

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = accounts::update_user(
            &mut tx,
            actor,
            &id,
            UserChanges {
                first_name: checked.name,
                email: checked.email,
                role: checked.role,
                password_hash,
            },
        )
        .await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, USERS, |_| {
        vec![Flash::success("User updated successfully.")]
    })
    .await)
}

pub async fn users_delete(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StatusCode> {
    let actor = guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = accounts::delete_user(&mut tx, actor, &id).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, USERS, |_| {
        vec![Flash::success("User deleted.")]
    })
    .await)
}
