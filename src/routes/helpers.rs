// routes/helpers.rs
// Shared pieces of the HTML handlers: rendering, the role guard, flash
// redirects, list queries and file responses.

use askama::Template;
use axum::{
    extract::Multipart,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use mongodb::bson::oid::ObjectId;
use std::collections::HashMap;
use tracing::{error, warn};

use crate::{
    access::{Principal, authorize},
    error::InventoryError,
    import::{ImportError, ImportTally},
    ledger::Receipt,
    models::{Flash, Role},
    session::SessionUser,
    state::{AppState, Page, Pagination, push_flashes, take_flashes},
    validation::parse_object_id,
};

pub(crate) fn render<T: Template>(tpl: T) -> Result<Html<String>, StatusCode> {
    tpl.render().map(Html).map_err(|err| {
        error!(error = %err, "template render failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub(crate) fn render_response<T: Template>(tpl: T) -> Response {
    render(tpl)
        .map(IntoResponse::into_response)
        .unwrap_or_else(|status| status.into_response())
}

/// Role check run first thing by every protected handler.
pub(crate) fn guard<'a>(
    session_user: &'a SessionUser,
    allowed: &[Role],
) -> Result<&'a Principal, StatusCode> {
    authorize(Some(session_user.principal()), allowed).map_err(|_| {
        warn!(
            user = %session_user.principal().email,
            role = session_user.principal().role.as_str(),
            "access denied"
        );
        StatusCode::FORBIDDEN
    })
}

#[derive(Debug, Clone)]
pub(crate) struct FlashView {
    pub kind: &'static str,
    pub message: String,
}

impl From<Flash> for FlashView {
    fn from(flash: Flash) -> Self {
        FlashView {
            kind: flash.kind.as_str(),
            message: flash.message,
        }
    }
}

/// Layout data shared by every page.
pub(crate) struct Chrome {
    pub signed_in: bool,
    pub user_name: String,
    pub is_admin: bool,
    pub flashes: Vec<FlashView>,
}

impl Chrome {
    pub fn anonymous(flashes: Vec<Flash>) -> Self {
        Chrome {
            signed_in: false,
            user_name: String::new(),
            is_admin: false,
            flashes: flashes.into_iter().map(FlashView::from).collect(),
        }
    }
}

pub(crate) async fn chrome(state: &AppState, session_user: &SessionUser) -> Chrome {
    let flashes = take_flashes(state, session_user.token())
        .await
        .unwrap_or_else(|err| {
            error!(error = %err, "loading flashes failed");
            Vec::new()
        });
    let principal = session_user.principal();
    Chrome {
        signed_in: true,
        user_name: principal.name.clone(),
        is_admin: principal.is_admin(),
        flashes: flashes.into_iter().map(FlashView::from).collect(),
    }
}

pub(crate) async fn flash_redirect(
    state: &AppState,
    session_user: &SessionUser,
    flashes: Vec<Flash>,
    to: &str,
) -> Response {
    if let Err(err) = push_flashes(state, session_user.token(), &flashes).await {
        error!(error = %err, "storing flashes failed");
    }
    Redirect::to(to).into_response()
}

pub(crate) fn error_flashes(messages: Vec<String>) -> Vec<Flash> {
    messages.into_iter().map(Flash::error).collect()
}

/// Maps a failed operation onto the response the user sees.
pub(crate) async fn report(
    state: &AppState,
    session_user: &SessionUser,
    err: InventoryError,
    to: &str,
) -> Response {
    match err {
        InventoryError::Forbidden => StatusCode::FORBIDDEN.into_response(),
        InventoryError::NotFound(_) => StatusCode::NOT_FOUND.into_response(),
        InventoryError::Storage(ref inner) => {
            error!(error = ?inner, "storage failure, transaction aborted");
            flash_redirect(state, session_user, error_flashes(err.messages()), to).await
        }
        other => flash_redirect(state, session_user, error_flashes(other.messages()), to).await,
    }
}

/// Flashes `on_ok` or the error, then redirects to `to`.
pub(crate) async fn finish<T>(
    state: &AppState,
    session_user: &SessionUser,
    outcome: Result<T, InventoryError>,
    to: &str,
    on_ok: impl FnOnce(T) -> Vec<Flash>,
) -> Response {
    match outcome {
        Ok(value) => flash_redirect(state, session_user, on_ok(value), to).await,
        Err(err) => report(state, session_user, err, to).await,
    }
}

/// Malformed ids can never match a document.
pub(crate) fn path_id(raw: &str) -> Result<ObjectId, StatusCode> {
    parse_object_id(raw).ok_or(StatusCode::NOT_FOUND)
}

pub(crate) fn internal(err: anyhow::Error) -> StatusCode {
    error!(error = ?err, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Success flash plus a warning for every product left below zero.
pub(crate) fn receipt_flashes(receipt: &Receipt, success: &str) -> Vec<Flash> {
    let mut flashes = vec![Flash::success(success)];
    for negative in &receipt.negative {
        flashes.push(Flash::warning(format!(
            "Stock for this product is now negative ({}).",
            negative.balance
        )));
    }
    flashes
}

/// Flashes for a finished import; `summary` words the success message.
pub(crate) fn import_flashes(
    outcome: Result<ImportTally, ImportError>,
    summary: impl FnOnce(ImportTally) -> String,
) -> Vec<Flash> {
    match outcome {
        Ok(tally) => vec![Flash::success(summary(tally))],
        Err(ImportError::Storage(err)) => {
            error!(error = ?err, "import failed, transaction aborted");
            vec![Flash::error("Error while importing, nothing was saved.")]
        }
        Err(other) => vec![Flash::error(other.to_string())],
    }
}

pub(crate) const NO_FILE_MESSAGE: &str = "Please choose an Excel file to upload.";

/// Query string of list pages. `search` is accepted as an alias of `q`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    page: Option<String>,
    per_page: Option<String>,
    q: Option<String>,
    search: Option<String>,
    category_id: Option<String>,
}

impl ListQuery {
    pub(crate) fn pagination(&self) -> Pagination {
        let num = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<u64>().ok());
        Pagination::new(num(&self.page), num(&self.per_page))
    }

    pub(crate) fn search(&self) -> String {
        self.q
            .as_deref()
            .or(self.search.as_deref())
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    pub(crate) fn category(&self) -> Option<ObjectId> {
        self.category_id.as_deref().and_then(parse_object_id)
    }
}

/// Pagination links for `partials/pagination.html`.
pub(crate) struct Pager {
    pub page: u64,
    pub pages: u64,
    pub total: u64,
    pub prev_url: Option<String>,
    pub next_url: Option<String>,
}

fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

pub(crate) fn pager<T>(base: &str, page: &Page<T>, search: &str) -> Pager {
    let link = |target: u64| {
        let mut url = format!("{base}?page={target}&per_page={}", page.per_page);
        if !search.is_empty() {
            url.push_str("&q=");
            url.push_str(&encode_query(search));
        }
        url
    };
    Pager {
        page: page.page,
        pages: page.pages(),
        total: page.total,
        prev_url: page.has_prev().then(|| link(page.page - 1)),
        next_url: page.has_next().then(|| link(page.page + 1)),
    }
}

/// `<option>` of a select.
#[derive(Clone)]
pub(crate) struct SelectOption {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

pub(crate) fn select_options<'a>(
    items: impl IntoIterator<Item = (Option<ObjectId>, &'a str)>,
    selected: Option<&ObjectId>,
) -> Vec<SelectOption> {
    items
        .into_iter()
        .filter_map(|(id, label)| {
            let id = id?;
            Some(SelectOption {
                value: id.to_hex(),
                label: label.to_string(),
                selected: Some(&id) == selected,
            })
        })
        .collect()
}

/// Text fields and the uploaded file of a multipart form.
#[derive(Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub file: Option<UploadedFile>,
}

pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl MultipartForm {
    pub fn text(&self, name: &str) -> String {
        self.fields
            .get(name)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }
}

pub(crate) async fn read_multipart(mut multipart: Multipart) -> Result<MultipartForm, StatusCode> {
    let mut form = MultipartForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let bytes = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                if !filename.is_empty() && !bytes.is_empty() {
                    form.file = Some(UploadedFile {
                        filename,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            None => {
                let value = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                form.fields.insert(name, value);
            }
        }
    }
    Ok(form)
}

pub(crate) fn attachment(content_type: &'static str, filename: &str, bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

pub(crate) fn pdf_attachment(filename: &str, bytes: Vec<u8>) -> Response {
    attachment("application/pdf", filename, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_accepts_search_alias_and_bad_numbers() {
        let query = ListQuery {
            page: Some("x".into()),
            per_page: Some("25".into()),
            q: None,
            search: Some(" widget ".into()),
            category_id: None,
        };
        let p = query.pagination();
        assert_eq!((p.page, p.per_page), (1, 25));
        assert_eq!(query.search(), "widget");
    }

    #[test]
    fn pager_keeps_search_in_links() {
        let page = Page::<()> {
            items: Vec::new(),
            page: 2,
            per_page: 10,
            total: 30,
        };
        let p = pager("/admin/products", &page, "red & blue");
        assert_eq!(
            p.prev_url.as_deref(),
            Some("/admin/products?page=1&per_page=10&q=red+%26+blue")
        );
        assert!(p.next_url.is_some());
        assert_eq!(p.pages, 3);
    }
}
