// session.rs
// Session middleware to protect routes and extractor to access session data.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::COOKIE, header::SET_COOKIE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use futures::future::BoxFuture;
use tracing::error;

use crate::{
    access::Principal,
    state::{AppState, SESSION_TTL_SECONDS, find_user_by_session},
};

pub const SESSION_COOKIE_NAME: &str = "session";

#[derive(Clone)]
pub struct SessionData {
    pub principal: Principal,
    pub token: String,
}

pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let tokens = extract_cookies(request.headers(), SESSION_COOKIE_NAME);
    if tokens.is_empty() {
        return Err(login_redirect());
    }

    // Stale cookies may linger next to the current one.
    for token in tokens {
        match find_user_by_session(&state, &token).await {
            Ok(Some(user)) => {
                let Some(principal) = Principal::from_user(&user) else {
                    continue;
                };
                request
                    .extensions_mut()
                    .insert(SessionData { principal, token });
                return Ok(next.run(request).await);
            }
            Ok(None) => continue,
            Err(err) => {
                error!(error = %err, "session lookup failed");
                return Err((StatusCode::INTERNAL_SERVER_ERROR, "session lookup failed").into_response());
            }
        }
    }

    Err(login_redirect())
}

pub struct SessionUser(pub SessionData);

impl SessionUser {
    pub fn principal(&self) -> &Principal {
        &self.0.principal
    }

    pub fn token(&self) -> &str {
        &self.0.token
    }

    pub fn is_admin(&self) -> bool {
        self.0.principal.is_admin()
    }
}

#[allow(refining_impl_trait)]
impl<S> FromRequestParts<S> for SessionUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> BoxFuture<'static, Result<Self, Self::Rejection>> {
        let data = parts
            .extensions
            .get::<SessionData>()
            .cloned()
            .ok_or_else(login_redirect);

        Box::pin(async move { data.map(SessionUser) })
    }
}

fn login_redirect() -> Response {
    Redirect::to("/login").into_response()
}

pub fn set_session_cookie(response: &mut Response, token: &str) {
    if let Ok(value) = HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_TTL_SECONDS}"
    )) {
        response.headers_mut().append(SET_COOKIE, value);
    }
}

pub fn clear_session_cookie(response: &mut Response) {
    if let Ok(value) = HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
    )) {
        response.headers_mut().append(SET_COOKIE, value);
    }
}

pub fn extract_cookies(headers: &HeaderMap, name: &str) -> Vec<String> {
    headers
        .get_all(COOKIE)
        .into_iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let mut split = pair.trim().splitn(2, '=');
            let key = split.next()?.trim();
            let value = split.next()?.trim();
            if key == name {
                Some(value.to_owned())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_every_cookie_with_the_session_name() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; session=AAA"));
        headers.append(COOKIE, HeaderValue::from_static("session=BBB"));
        assert_eq!(
            extract_cookies(&headers, SESSION_COOKIE_NAME),
            vec!["AAA".to_string(), "BBB".to_string()]
        );
        assert!(extract_cookies(&headers, "missing").is_empty());
    }
}
