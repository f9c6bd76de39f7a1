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
    access::{ADMIN_ONLY, MEMBERS},
    documents::{InvoiceParty, OutgoingInvoice, compile_typst, table_document},
    error::InventoryError,
    ledger::LedgerEntry,
    models::ContactBook,
    routes::helpers::*,
    session::SessionUser,
    spreadsheet::{Cell, XLSX_CONTENT_TYPE, write_xlsx},
    state::{AppState, all_contacts, all_outgoings, all_products, get_outgoing_view, list_outgoings},
    validation::{DATE_FORMAT, parse_date, parse_entry_quantity, parse_object_id},
};

const OUTGOING: &str = "/admin/outgoing";
const EXPORT_HEADERS: [&str; 5] = ["ID", "Product", "Customer", "Quantity", "Date"];

#[derive(Template)]
#[template(path = "admin/outgoing.html")]
struct OutgoingTemplate {
    chrome: Chrome,
    outgoings: Vec<OutgoingRow>,
    products: Vec<SelectOption>,
    customers: Vec<SelectOption>,
    today: String,
    search: String,
    pager: Pager,
}

struct OutgoingRow {
    id: String,
    product: String,
    customer: String,
    quantity: i64,
    date: String,
    products: Vec<SelectOption>,
    customers: Vec<SelectOption>,
}

#[derive(Deserialize)]
pub struct OutgoingForm {
    #[serde(default)]
    product_id: String,
    #[serde(default)]
    customer_id: String,
    #[serde(default)]
    quantity: String,
    #[serde(default)]
    date: String,
}

impl OutgoingForm {
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
            party_id: parse_object_id(&self.customer_id),
            quantity,
            date,
        })
    }
}

/// Members may browse; the forms are only rendered for admins.
pub async fn outgoing_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Html<String>, StatusCode> {
    guard(&session_user, MEMBERS)?;

    let search = query.search();
    let page = list_outgoings(&state, &search, query.pagination())
        .await
        .map_err(internal)?;

    let (products, customers) = if session_user.is_admin() {
        (
            all_products(&state).await.map_err(internal)?,
            all_contacts(&state, ContactBook::Customers)
                .await
                .map_err(internal)?,
        )
    } else {
        (Vec::new(), Vec::new())
    };
    let product_options = |selected: Option<&ObjectId>| {
        select_options(products.iter().map(|p| (p.id, p.name.as_str())), selected)
    };
    let customer_options = |selected: Option<&ObjectId>| {
        select_options(customers.iter().map(|c| (c.id, c.name.as_str())), selected)
    };

    let pager = pager(OUTGOING, &page, &search);
    let outgoings = page
        .items
        .into_iter()
        .filter_map(|view| {
            let customer = view.customer_name();
            let o = view.outgoing;
            Some(OutgoingRow {
                id: o.id?.to_hex(),
                product: view.product,
                customer,
                quantity: o.quantity,
                date: o.date.format(DATE_FORMAT).to_string(),
                products: product_options(Some(&o.product_id)),
                customers: customer_options(Some(&o.customer_id)),
            })
        })
        .collect();

    render(OutgoingTemplate {
        chrome: chrome(&state, &session_user).await,
        outgoings,
        products: product_options(None),
        customers: customer_options(None),
        today: Local::now().date_naive().format(DATE_FORMAT).to_string(),
        search,
        pager,
    })
}

pub async fn outgoing_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Form(form): Form<OutgoingForm>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;

    let entry = match form.entry(Local::now().date_naive()) {
        Ok(entry) => entry,
        Err(errors) => {
            return Ok(flash_redirect(&state, &session_user, error_flashes(errors), OUTGOING).await);
        }
    };

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = state.reconciler.record_outgoing(&mut tx, entry).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, OUTGOING, |receipt| {
        receipt_flashes(&receipt, "Outgoing product record created.")
    })
    .await)
}

/// A blank date keeps the one already recorded.
pub async fn outgoing_update(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Form(form): Form<OutgoingForm>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;
    let existing = get_outgoing_view(&state, &id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let entry = match form.entry(existing.outgoing.date) {
        Ok(entry) => entry,
        Err(errors) => {
            return Ok(flash_redirect(&state, &session_user, error_flashes(errors), OUTGOING).await);
        }
    };

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = state.reconciler.edit_outgoing(&mut tx, &id, entry).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, OUTGOING, |receipt| {
        receipt_flashes(&receipt, "Outgoing product updated.")
    })
    .await)
}

pub async fn outgoing_delete(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = state.reconciler.delete_outgoing(&mut tx, &id).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, OUTGOING, |receipt| {
        receipt_flashes(&receipt, "Outgoing product deleted.")
    })
    .await)
}

async fn export_rows(state: &AppState, search: &str) -> Result<Vec<[String; 5]>, StatusCode> {
    Ok(all_outgoings(state, search)
        .await
        .map_err(internal)?
        .into_iter()
        .map(|view| {
            let customer = view.customer_name();
            [
                view.outgoing.id.map(|id| id.to_hex()).unwrap_or_default(),
                view.product,
                customer,
                view.outgoing.quantity.to_string(),
                view.outgoing.date.format(DATE_FORMAT).to_string(),
            ]
        })
        .collect())
}

pub async fn outgoing_export_excel(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let rows: Vec<Vec<Cell>> = export_rows(&state, &query.search())
        .await?
        .into_iter()
        .map(|[id, product, customer, quantity, date]| {
            vec![
                Cell::text(id),
                Cell::text(product),
                Cell::text(customer),
                Cell::number(quantity),
                Cell::text(date),
            ]
        })
        .collect();
    let bytes =
        write_xlsx("Outgoing", &EXPORT_HEADERS, &rows).map_err(|err| internal(err.into()))?;
    Ok(attachment(XLSX_CONTENT_TYPE, "outgoing_products.xlsx", bytes))
}

pub async fn outgoing_export_pdf(
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
    let source = table_document("Outgoing Products List", &EXPORT_HEADERS, &rows);
    let pdf = compile_typst(&state.config.typst_bin, &source)
        .await
        .map_err(internal)?;
    Ok(pdf_attachment("outgoing_products.pdf", pdf))
}

pub async fn outgoing_invoice(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;
    let view = get_outgoing_view(&state, &id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let customer = view
        .customer
        .map(|c| InvoiceParty {
            name: c.name,
            address: c.address,
            email: c.email,
            contact: c.contact,
        })
        .unwrap_or_default();
    let invoice = OutgoingInvoice {
        number: id.to_hex(),
        date: view.outgoing.date.format(DATE_FORMAT).to_string(),
        customer,
        product: view.product,
        quantity: view.outgoing.quantity,
        unit_price: view.unit_price,
    };
    let source = invoice.to_typst().map_err(internal)?;
    let pdf = compile_typst(&state.config.typst_bin, &source)
        .await
        .map_err(internal)?;
    Ok(pdf_attachment(&format!("invoice_{}.pdf", id.to_hex()), pdf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customer_and_product_ids_are_parsed() {
        let product = ObjectId::new();
        let customer = ObjectId::new();
        let form = OutgoingForm {
            product_id: product.to_hex(),
            customer_id: customer.to_hex(),
            quantity: "2".into(),
            date: "2024-02-29".into(),
        };
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let entry = form.entry(today).unwrap();
        assert_eq!(entry.product_id, Some(product));
        assert_eq!(entry.party_id, Some(customer));
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }
}
