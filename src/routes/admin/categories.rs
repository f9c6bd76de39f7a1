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
    error::InventoryError,
    models::Flash,
    routes::helpers::*,
    session::SessionUser,
    state::{AppState, list_categories},
};

const CATEGORIES: &str = "/admin/categories";

#[derive(Template)]
#[template(path = "admin/categories.html")]
struct CategoriesTemplate {
    chrome: Chrome,
    categories: Vec<CategoryRow>,
    search: String,
    pager: Pager,
}

struct CategoryRow {
    id: String,
    name: String,
}

#[derive(Deserialize)]
pub struct CategoryForm {
    #[serde(default)]
    name: String,
}

pub async fn categories_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Html<String>, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;

    let search = query.search();
    let page = list_categories(&state, &search, query.pagination())
        .await
        .map_err(internal)?;
    let pager = pager(CATEGORIES, &page, &search);
    let categories = page
        .items
        .into_iter()
        .filter_map(|c| {
            c.id.map(|id| CategoryRow {
                id: id.to_hex(),
                name: c.name,
            })
        })
        .collect();

    render(CategoriesTemplate {
        chrome: chrome(&state, &session_user).await,
        categories,
        search,
        pager,
    })
}

pub async fn categories_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Form(form): Form<CategoryForm>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;

    let name = form.name.trim().to_string();
    if name.is_empty() {
        let flashes = vec![Flash::error("Category name is required.")];
        return Ok(flash_redirect(&state, &session_user, flashes, CATEGORIES).await);
    }

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = tx.create_category(&name).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, CATEGORIES, |_| {
        vec![Flash::success("Category added successfully.")]
    })
    .await)
}

pub async fn categories_update(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Form(form): Form<CategoryForm>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;

    let name = form.name.trim().to_string();
    if name.is_empty() {
        let flashes = vec![Flash::error("Category name is required.")];
        return Ok(flash_redirect(&state, &session_user, flashes, CATEGORIES).await);
    }

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = tx.rename_category(&id, &name).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, CATEGORIES, |_| {
        vec![Flash::success("Category updated successfully.")]
    })
    .await)
}

/// Deleting a category removes its products and their ledger rows.
pub async fn categories_delete(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = tx.delete_category(&id).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, CATEGORIES, |_| {
        vec![Flash::success("Category deleted.")]
    })
    .await)
}
