// routes/home.rs
// GET / -> dashboard with collection counts, open to every signed-in member.

use std::sync::Arc;

use askama::Template;
use axum::{extract::State, http::StatusCode, response::Html};

use crate::{
    access::MEMBERS,
    session::SessionUser,
    state::{AppState, DashboardStats, dashboard_stats},
};

use super::helpers::{Chrome, chrome, guard, internal, render};

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    chrome: Chrome,
    stats: DashboardStats,
}

pub async fn home(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
) -> Result<Html<String>, StatusCode> {
    guard(&session_user, MEMBERS)?;
    let stats = dashboard_stats(&state).await.map_err(internal)?;
    render(DashboardTemplate {
        chrome: chrome(&state, &session_user).await,
        stats,
    })
}
