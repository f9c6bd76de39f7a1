use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Form, Path, Query, State},
    http::StatusCode,
    response::{Html, Response},
};
use chrono::{Local, NaiveDate};
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;

use crate::{
    access::ADMIN_ONLY,
    documents::{PurchaseInvoice, compile_typst, table_document},
    error::InventoryError,
    ledger::LedgerEntry,
    models::ContactBook,
    routes::helpers::*,
    session::SessionUser,
    spreadsheet::{Cell, XLSX_CONTENT_TYPE, write_xlsx},
    state::{AppState, all_contacts, all_products, all_purchases, get_purchase_view, list_purchases},
    validation::{DATE_FORMAT, parse_date, parse_entry_quantity, parse_object_id},
};

const PURCHASES: &str = "/admin/purchases";
const EXPORT_HEADERS: [&str; 5] = ["ID", "Product", "Supplier", "Quantity", "Date"];

#[derive(Template)]
#[template(path = "admin/purchases.html")]
struct PurchasesTemplate {
    chrome: Chrome,
    purchases: Vec<PurchaseRow>,
    products: Vec<SelectOption>,
    suppliers: Vec<SelectOption>,
    today: String,
    search: String,
    pager: Pager,
}

struct PurchaseRow {
    id: String,
    product: String,
    supplier: String,
    quantity: i64,
    date: String,
    products: Vec<SelectOption>,
    suppliers: Vec<SelectOption>,
}

#[derive(Deserialize)]
pub struct PurchaseForm {
    #[serde(default)]
    product_id: String,
    #[serde(default)]
    supplier_id: String,
    #[serde(default)]
    quantity: String,
    #[serde(default)]
    date: String,
}

impl PurchaseForm {
    /// Format problems only; references are checked by the reconciler.
    fn entry(&self, default_date: NaiveDate) -> Result<LedgerEntry, Vec<String>> {
        let mut errors = Vec::new();
        let quantity = parse_entry_quantity(&self.quantity)
            .map_err(|e| errors.push(e))
            .unwrap_or_default();
        let date = parse_date(&self.date, default_date)
            .map_err(|e| errors.push(e))
            .unwrap_or(default_date);
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(LedgerEntry {
            product_id: parse_object_id(&self.product_id),
            party_id: parse_object_id(&self.supplier_id),
            quantity,
            date,
        })
    }
}

pub async fn purchases_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Html<String>, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;

    let search = query.search();
    let page = list_purchases(&state, &search, query.pagination())
        .await
        .map_err(internal)?;
    let products = all_products(&state).await.map_err(internal)?;
    let suppliers = all_contacts(&state, ContactBook::Suppliers)
        .await
        .map_err(internal)?;
    let product_options = |selected: Option<&ObjectId>| {
        select_options(products.iter().map(|p| (p.id, p.name.as_str())), selected)
    };
    let supplier_options = |selected: Option<&ObjectId>| {
        select_options(suppliers.iter().map(|s| (s.id, s.name.as_str())), selected)
    };

    let pager = pager(PURCHASES, &page, &search);
    let purchases = page
        .items
        .into_iter()
        .filter_map(|view| {
            let p = view.purchase;
            Some(PurchaseRow {
                id: p.id?.to_hex(),
                product: view.product,
                supplier: view.supplier,
                quantity: p.quantity,
                date: p.date.format(DATE_FORMAT).to_string(),
                products: product_options(Some(&p.product_id)),
                suppliers: supplier_options(Some(&p.supplier_id)),
            })
        })
        .collect();

    render(PurchasesTemplate {
        chrome: chrome(&state, &session_user).await,
        purchases,
        products: product_options(None),
        suppliers: supplier_options(None),
        today: Local::now().date_naive().format(DATE_FORMAT).to_string(),
        search,
        pager,
    })
}

pub async fn purchases_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Form(form): Form<PurchaseForm>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;

    let entry = match form.entry(Local::now().date_naive()) {
        Ok(entry) => entry,
        Err(errors) => {
            return Ok(flash_redirect(&state, &session_user, error_flashes(errors), PURCHASES).await);
        }
    };

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = state.reconciler.record_purchase(&mut tx, entry).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, PURCHASES, |receipt| {
        receipt_flashes(&receipt, "Purchase record created.")
    })
    .await)
}

/// A blank date keeps the one already recorded.
pub async fn purchases_update(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Form(form): Form<PurchaseForm>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;
    let existing = get_purchase_view(&state, &id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let entry = match form.entry(existing.purchase.date) {
        Ok(entry) => entry,
        Err(errors) => {
            return Ok(flash_redirect(&state, &session_user, error_flashes(errors), PURCHASES).await);
        }
    };

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = state.reconciler.edit_purchase(&mut tx, &id, entry).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, PURCHASES, |receipt| {
        receipt_flashes(&receipt, "Purchase updated.")
    })
    .await)
}

pub async fn purchases_delete(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = state.reconciler.delete_purchase(&mut tx, &id).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, PURCHASES, |receipt| {
        receipt_flashes(&receipt, "Purchase deleted.")
    })
    .await)
}

async fn export_rows(state: &AppState, search: &str) -> Result<Vec<[String; 5]>, StatusCode> {
    Ok(all_purchases(state, search)
        .await
        .map_err(internal)?
        .into_iter()
        .map(|view| {
            [
                view.purchase.id.map(|id| id.to_hex()).unwrap_or_default(),
                view.product,
                view.supplier,
                view.purchase.quantity.to_string(),
                view.purchase.date.format(DATE_FORMAT).to_string(),
            ]
        })
        .collect())
}

pub async fn purchases_export_excel(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let rows: Vec<Vec<Cell>> = export_rows(&state, &query.search())
        .await?
        .into_iter()
        .map(|[id, product, supplier, quantity, date]| {
            vec![
                Cell::text(id),
                Cell::text(product),
                Cell::text(supplier),
                Cell::number(quantity),
                Cell::text(date),
            ]
        })
        .collect();
    let bytes =
        write_xlsx("Purchases", &EXPORT_HEADERS, &rows).map_err(|err| internal(err.into()))?;
    Ok(attachment(XLSX_CONTENT_TYPE, "purchases.xlsx", bytes))
}

pub async fn purchases_export_pdf(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let rows: Vec<Vec<String>> = export_rows(&state, &query.search())
        .await?
        .into_iter()
        .map(Vec::from)
        .collect();
    let source = table_document("Purchase Products List", &EXPORT_HEADERS, &rows);
    let pdf = compile_typst(&state.config.typst_bin, &source)
        .await
        .map_err(internal)?;
    Ok(pdf_attachment("purchases.pdf", pdf))
}

pub async fn purchases_invoice(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;
    let view = get_purchase_view(&state, &id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let invoice = PurchaseInvoice {
        number: id.to_hex(),
        date: view.purchase.date.format(DATE_FORMAT).to_string(),
        product: view.product,
        supplier: view.supplier,
        quantity: view.purchase.quantity,
    };
    let pdf = compile_typst(&state.config.typst_bin, &invoice.to_typst())
        .await
        .map_err(internal)?;
    Ok(pdf_attachment(&format!("purchase_invoice_{}.pdf", id.to_hex()), pdf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(quantity: &str, date: &str) -> PurchaseForm {
        PurchaseForm {
            product_id: String::new(),
            supplier_id: "not-an-id".into(),
            quantity: quantity.into(),
            date: date.into(),
        }
    }

    #[test]
    fn blank_date_falls_back_to_default() {
        let default = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let entry = form("3", "").entry(default).unwrap();
        assert_eq!(entry.date, default);
        assert_eq!(entry.quantity, 3);
        assert!(entry.product_id.is_none());
        assert!(entry.party_id.is_none());
    }

    #[test]
    fn format_errors_are_collected() {
        let default = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let errors = form("0", "01/05/2024").entry(default).unwrap_err();
        assert_eq!(
            errors,
            vec![
                "Quantity must be greater than zero.".to_string(),
                "Invalid date format.".to_string(),
            ]
        );
    }
}
