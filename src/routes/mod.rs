// routes/mod.rs
// Route handlers and the router that wires them.
//
// Public:
// - GET/POST /login, /sign-up, /forgot-password, /reset-password/{token}
// - GET/POST /logout
// - GET      /uploads/{file}
// Behind the session layer:
// - GET      /                       -> dashboard
// - /admin/{categories,products,customers,suppliers,purchases,outgoing,users}

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};

use crate::{session, state::AppState};

pub mod admin;
pub mod auth;
pub mod helpers;
pub mod home;
pub mod uploads;

pub use admin::*;
pub use auth::*;
pub use home::home;
pub use uploads::serve_upload;

/// Spreadsheets and product images are uploaded through multipart forms.
const UPLOAD_LIMIT_BYTES: usize = 16 * 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/", get(home))
        .route(
            "/admin/categories",
            get(categories_index).post(categories_create),
        )
        .route("/admin/categories/{id}/edit", post(categories_update))
        .route("/admin/categories/{id}/delete", post(categories_delete))
        .route("/admin/products", get(products_index))
        .route(
            "/admin/products/new",
            get(products_new).post(products_create),
        )
        .route("/admin/products/{id}/edit", post(products_update))
        .route("/admin/products/{id}/delete", post(products_delete))
        .route("/admin/products/import", post(products_import))
        .route("/admin/customers", get(customers_index))
        .route("/admin/customers/new", post(customers_create))
        .route("/admin/customers/{id}/edit", post(customers_update))
        .route("/admin/customers/{id}/delete", post(customers_delete))
        .route("/admin/customers/export/excel", get(customers_export_excel))
        .route("/admin/customers/export/pdf", get(customers_export_pdf))
        .route("/admin/customers/import", post(customers_import))
        .route("/admin/suppliers", get(suppliers_index))
        .route("/admin/suppliers/new", post(suppliers_create))
        .route("/admin/suppliers/{id}/edit", post(suppliers_update))
        .route("/admin/suppliers/{id}/delete", post(suppliers_delete))
        .route("/admin/suppliers/export/excel", get(suppliers_export_excel))
        .route("/admin/suppliers/export/pdf", get(suppliers_export_pdf))
        .route("/admin/suppliers/import", post(suppliers_import))
        .route("/admin/purchases", get(purchases_index))
        .route("/admin/purchases/new", post(purchases_create))
        .route("/admin/purchases/{id}/edit", post(purchases_update))
        .route("/admin/purchases/{id}/delete", post(purchases_delete))
        .route("/admin/purchases/export/excel", get(purchases_export_excel))
        .route("/admin/purchases/export/pdf", get(purchases_export_pdf))
        .route("/admin/purchases/{id}/invoice/pdf", get(purchases_invoice))
        .route("/admin/outgoing", get(outgoing_index))
        .route("/admin/outgoing/new", post(outgoing_create))
        .route("/admin/outgoing/{id}/edit", post(outgoing_update))
        .route("/admin/outgoing/{id}/delete", post(outgoing_delete))
        .route("/admin/outgoing/export/excel", get(outgoing_export_excel))
        .route("/admin/outgoing/export/pdf", get(outgoing_export_pdf))
        .route("/admin/outgoing/{id}/invoice", get(outgoing_invoice))
        .route("/admin/users", get(users_index))
        .route("/admin/users/new", post(users_create))
        .route("/admin/users/{id}/edit", post(users_update))
        .route("/admin/users/{id}/delete", post(users_delete))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_session,
        ));

    Router::new()
        .route("/login", get(login_page_get).post(login_submit))
        .route("/logout", get(logout).post(logout))
        .route("/sign-up", get(sign_up_page).post(sign_up_submit))
        .route(
            "/forgot-password",
            get(forgot_password_page).post(forgot_password_submit),
        )
        .route(
            "/reset-password/{token}",
            get(reset_password_page).post(reset_password_submit),
        )
        .route("/uploads/{file}", get(serve_upload))
        .merge(protected)
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES))
        .with_state(state)
}
