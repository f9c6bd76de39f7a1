// routes/auth.rs
// Login, logout, sign-up and the password reset flow. These pages have no
// session yet, so their messages are rendered directly instead of flashed.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Form, Path, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::{
    accounts::{self, NewUser, normalize_email},
    captcha::verify_recaptcha,
    error::InventoryError,
    mailer::password_reset_message,
    models::{Flash, Role, User},
    password::{hash_password, verify_password},
    session::{SESSION_COOKIE_NAME, clear_session_cookie, extract_cookies, set_session_cookie},
    state::{AppState, create_session, delete_session, find_user, push_flashes, set_password},
    validation::check_new_password,
};

use super::helpers::{Chrome, render};

const SIGN_UP_MIN_PASSWORD: usize = 7;

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    chrome: Chrome,
    email: String,
    recaptcha_site_key: Option<String>,
}

#[derive(Template)]
#[template(path = "sign_up.html")]
struct SignUpTemplate {
    chrome: Chrome,
    email: String,
    first_name: String,
}

#[derive(Template)]
#[template(path = "forgot_password.html")]
struct ForgotPasswordTemplate {
    chrome: Chrome,
}

#[derive(Template)]
#[template(path = "reset_password.html")]
struct ResetPasswordTemplate {
    chrome: Chrome,
    token: String,
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default, rename = "g-recaptcha-response")]
    recaptcha: Option<String>,
}

#[derive(Deserialize)]
pub struct SignUpForm {
    #[serde(default)]
    email: String,
    #[serde(default, rename = "firstName")]
    first_name: String,
    #[serde(default)]
    password1: String,
    #[serde(default)]
    password2: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordForm {
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordForm {
    #[serde(default)]
    password: String,
    #[serde(default)]
    confirm_password: String,
}

fn login_page(state: &AppState, email: String, flashes: Vec<Flash>) -> Result<Html<String>, StatusCode> {
    render(LoginTemplate {
        chrome: Chrome::anonymous(flashes),
        email,
        recaptcha_site_key: state
            .config
            .recaptcha_site_key
            .clone()
            .filter(|_| state.config.is_production()),
    })
}

fn forgot_page(flashes: Vec<Flash>) -> Result<Html<String>, StatusCode> {
    render(ForgotPasswordTemplate {
        chrome: Chrome::anonymous(flashes),
    })
}

/// Starts a session for `email` and lands on the dashboard with `message`.
async fn sign_in(state: &AppState, email: &str, message: &str) -> Result<Response, StatusCode> {
    let token = create_session(state, email).await.map_err(|err| {
        error!(error = ?err, "creating session failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    if let Err(err) = push_flashes(state, &token, &[Flash::success(message)]).await {
        warn!(error = %err, "storing welcome flash failed");
    }
    let mut response = Redirect::to("/").into_response();
    set_session_cookie(&mut response, &token);
    Ok(response)
}

pub async fn login_page_get(State(state): State<Arc<AppState>>) -> Result<Html<String>, StatusCode> {
    login_page(&state, String::new(), Vec::new())
}

pub async fn login_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LoginForm>,
) -> Result<Response, StatusCode> {
    if !verify_recaptcha(&state.http, &state.config, form.recaptcha.as_deref()).await {
        let flashes = vec![Flash::error("reCAPTCHA verification failed. Please try again.")];
        return Ok(login_page(&state, form.email, flashes)?.into_response());
    }

    let email = normalize_email(&form.email);
    let user = find_user(&state, &email).await.map_err(|err| {
        error!(error = ?err, "user lookup failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    match user {
        Some(user) if verify_password(&form.password, &user.password) => {
            info!(user = %user.email, "login");
            sign_in(&state, &user.email, "Logged in successfully!").await
        }
        _ => {
            warn!(email = %email, "failed login");
            let flashes = vec![Flash::error("Invalid email or password.")];
            Ok(login_page(&state, form.email, flashes)?.into_response())
        }
    }
}

pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    for token in extract_cookies(&headers, SESSION_COOKIE_NAME) {
        if let Err(err) = delete_session(&state, &token).await {
            warn!(error = %err, "deleting session failed");
        }
    }
    let mut response = Redirect::to("/login").into_response();
    clear_session_cookie(&mut response);
    response
}

pub async fn sign_up_page() -> Result<Html<String>, StatusCode> {
    render(SignUpTemplate {
        chrome: Chrome::anonymous(Vec::new()),
        email: String::new(),
        first_name: String::new(),
    })
}

fn sign_up_error(form: &SignUpForm) -> Option<String> {
    let email = form.email.trim();
    let first_name = form.first_name.trim();
    if email.chars().count() < 4 {
        return Some("Email must be greater than 3 characters.".into());
    }
    if first_name.chars().count() < 2 {
        return Some("First name must be greater than 1 character.".into());
    }
    if form.password1 != form.password2 {
        return Some("Passwords do not match.".into());
    }
    check_new_password(&form.password1, &form.password2, SIGN_UP_MIN_PASSWORD)
        .into_iter()
        .next()
}

pub async fn sign_up_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SignUpForm>,
) -> Result<Response, StatusCode> {
    let again = |message: String| {
        render(SignUpTemplate {
            chrome: Chrome::anonymous(vec![Flash::error(message)]),
            email: form.email.clone(),
            first_name: form.first_name.clone(),
        })
        .map(IntoResponse::into_response)
    };

    if let Some(message) = sign_up_error(&form) {
        return again(message);
    }
    let password_hash = hash_password(&form.password1).map_err(|err| {
        error!(error = ?err, "hashing password failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let email = normalize_email(&form.email);
    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = accounts::create_user(
            &mut tx,
            NewUser {
                first_name: form.first_name.trim().to_string(),
                email: email.clone(),
                role: Role::User,
                password_hash,
            },
        )
        .await;
        tx.settle(result).await
    }
    .await;

    match outcome {
        Ok(_) => sign_in(&state, &email, "Account created successfully!").await,
        Err(InventoryError::Storage(err)) => {
            error!(error = ?err, "sign-up failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Err(other) => again(other.messages().join(" ")),
    }
}

pub async fn forgot_password_page() -> Result<Html<String>, StatusCode> {
    forgot_page(Vec::new())
}

/// Answers the same way whether or not the email is known.
pub async fn forgot_password_submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<ForgotPasswordForm>,
) -> Result<Html<String>, StatusCode> {
    let email = normalize_email(&form.email);
    match find_user(&state, &email).await {
        Ok(Some(user)) => match state.reset_tokens.issue(&user.email, Utc::now().timestamp()) {
            Ok(token) => {
                let reset_url = format!(
                    "{}/reset-password/{token}",
                    state.config.public_base_url.trim_end_matches('/')
                );
                state.mailer.dispatch(password_reset_message(
                    &state.config.mail_from,
                    &user.email,
                    &reset_url,
                ));
                info!(user = %user.email, "password reset requested");
            }
            Err(err) => error!(error = ?err, "issuing reset token failed"),
        },
        Ok(None) => {}
        Err(err) => error!(error = ?err, "user lookup failed"),
    }

    let flashes = vec![Flash::success(
        "If the email exists, a password reset link has been sent.",
    )];
    login_page(&state, String::new(), flashes)
}

/// Resolves the token to an existing account or renders why it cannot be used.
async fn reset_target(state: &AppState, token: &str) -> Result<Result<User, Html<String>>, StatusCode> {
    let Some(email) = state.reset_tokens.verify(token, Utc::now().timestamp()) else {
        return Ok(Err(forgot_page(vec![Flash::error("Invalid or expired reset link.")])?));
    };
    let user = find_user(state, &email).await.map_err(|err| {
        error!(error = ?err, "user lookup failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    match user {
        Some(user) => Ok(Ok(user)),
        None => Ok(Err(forgot_page(vec![Flash::error("User not found.")])?)),
    }
}

pub async fn reset_password_page(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Html<String>, StatusCode> {
    if let Err(page) = reset_target(&state, &token).await? {
        return Ok(page);
    }
    render(ResetPasswordTemplate {
        chrome: Chrome::anonymous(Vec::new()),
        token,
    })
}

pub async fn reset_password_submit(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Form(form): Form<ResetPasswordForm>,
) -> Result<Html<String>, StatusCode> {
    let user = match reset_target(&state, &token).await? {
        Ok(user) => user,
        Err(page) => return Ok(page),
    };

    if form.password.is_empty() || form.password != form.confirm_password {
        return render(ResetPasswordTemplate {
            chrome: Chrome::anonymous(vec![Flash::error("Passwords do not match.")]),
            token,
        });
    }

    let id = user.id.ok_or(StatusCode::NOT_FOUND)?;
    let hash = hash_password(&form.password).map_err(|err| {
        error!(error = ?err, "hashing password failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    set_password(&state, &id, &hash).await.map_err(|err| {
        error!(error = ?err, "updating password failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    info!(user = %user.email, "password reset");

    login_page(
        &state,
        user.email,
        vec![Flash::success("Password updated successfully.")],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(email: &str, first_name: &str, p1: &str, p2: &str) -> SignUpForm {
        SignUpForm {
            email: email.into(),
            first_name: first_name.into(),
            password1: p1.into(),
            password2: p2.into(),
        }
    }

    #[test]
    fn sign_up_reports_the_first_problem() {
        assert_eq!(
            sign_up_error(&form("a@b", "Jo", "secret12", "secret12")).as_deref(),
            Some("Email must be greater than 3 characters.")
        );
        assert_eq!(
            sign_up_error(&form("jo@example.com", "J", "secret12", "secret12")).as_deref(),
            Some("First name must be greater than 1 character.")
        );
        assert_eq!(
            sign_up_error(&form("jo@example.com", "Jo", "secret12", "secret13")).as_deref(),
            Some("Passwords do not match.")
        );
        assert_eq!(
            sign_up_error(&form("jo@example.com", "Jo", "short", "short")).as_deref(),
            Some("Password must be at least 7 characters.")
        );
        assert!(sign_up_error(&form("jo@example.com", "Jo", "secret12", "secret12")).is_none());
    }
}
