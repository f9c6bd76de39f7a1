// Customers and suppliers share one set of handlers; the public functions at
// the bottom bind them to a `ContactBook`.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Form, Multipart, Path, Query, State},
    http::StatusCode,
    response::{Html, Response},
};
use mongodb::bson::DateTime;
use serde::Deserialize;

use crate::{
    access::{ADMIN_ONLY, MEMBERS},
    documents::{compile_typst, table_document},
    error::InventoryError,
    import::{ImportError, import_contacts},
    models::{Contact, ContactBook, Flash, Role},
    routes::helpers::*,
    session::SessionUser,
    spreadsheet::{Cell, XLSX_CONTENT_TYPE, read_rows, write_xlsx},
    state::{AppState, all_contacts, list_contacts},
    validation::required,
};

const EXPORT_HEADERS: [&str; 5] = ["ID", "Name", "Address", "Email", "Contact"];

fn base_url(book: ContactBook) -> &'static str {
    match book {
        ContactBook::Customers => "/admin/customers",
        ContactBook::Suppliers => "/admin/suppliers",
    }
}

/// Role set allowed to browse the list; changes are always admin-only.
fn list_roles(book: ContactBook) -> &'static [Role] {
    match book {
        ContactBook::Customers => MEMBERS,
        ContactBook::Suppliers => ADMIN_ONLY,
    }
}

#[derive(Template)]
#[template(path = "admin/contacts.html")]
struct ContactsTemplate {
    chrome: Chrome,
    title: &'static str,
    singular: &'static str,
    base: &'static str,
    contacts: Vec<ContactRow>,
    search: String,
    pager: Pager,
}

struct ContactRow {
    id: String,
    name: String,
    address: String,
    email: String,
    contact: String,
}

#[derive(Deserialize)]
pub struct ContactForm {
    #[serde(default)]
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    contact: String,
}

impl ContactForm {
    fn validate(self) -> Result<Contact, Vec<String>> {
        let contact = Contact {
            id: None,
            name: self.name.trim().to_string(),
            address: self.address.trim().to_string(),
            email: self.email.trim().to_string(),
            contact: self.contact.trim().to_string(),
            created_at: None,
        };
        let errors: Vec<String> = [
            required(&contact.name, "Name is required."),
            required(&contact.address, "Address is required."),
            required(&contact.email, "Email is required."),
            required(&contact.contact, "Contact is required."),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();
        if errors.is_empty() {
            Ok(contact)
        } else {
            Err(errors)
        }
    }
}

async fn index(
    book: ContactBook,
    session_user: SessionUser,
    state: Arc<AppState>,
    query: ListQuery,
) -> Result<Html<String>, StatusCode> {
    guard(&session_user, list_roles(book))?;

    let search = query.search();
    let page = list_contacts(&state, book, &search, query.pagination())
        .await
        .map_err(internal)?;
    let pager = pager(base_url(book), &page, &search);
    let contacts = page
        .items
        .into_iter()
        .filter_map(|c| {
            Some(ContactRow {
                id: c.id?.to_hex(),
                name: c.name,
                address: c.address,
                email: c.email,
                contact: c.contact,
            })
        })
        .collect();

    render(ContactsTemplate {
        chrome: chrome(&state, &session_user).await,
        title: match book {
            ContactBook::Customers => "Customers",
            ContactBook::Suppliers => "Suppliers",
        },
        singular: book.singular(),
        base: base_url(book),
        contacts,
        search,
        pager,
    })
}

async fn create(
    book: ContactBook,
    session_user: SessionUser,
    state: Arc<AppState>,
    form: ContactForm,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let to = base_url(book);

    let mut contact = match form.validate() {
        Ok(contact) => contact,
        Err(errors) => {
            return Ok(flash_redirect(&state, &session_user, error_flashes(errors), to).await);
        }
    };
    contact.created_at = Some(DateTime::now());

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = tx.create_contact(book, &contact).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, to, |_| {
        vec![Flash::success(format!("{} added successfully.", book.singular()))]
    })
    .await)
}

async fn update(
    book: ContactBook,
    session_user: SessionUser,
    state: Arc<AppState>,
    id: String,
    form: ContactForm,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;
    let to = base_url(book);

    let contact = match form.validate() {
        Ok(contact) => contact,
        Err(errors) => {
            return Ok(flash_redirect(&state, &session_user, error_flashes(errors), to).await);
        }
    };

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = tx.update_contact_details(book, &id, &contact).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, to, |_| {
        vec![Flash::success(format!("{} updated successfully.", book.singular()))]
    })
    .await)
}

async fn delete(
    book: ContactBook,
    session_user: SessionUser,
    state: Arc<AppState>,
    id: String,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = tx.delete_contact(book, &id).await;
        tx.settle(result).await
    }
    .await;

    Ok(finish(&state, &session_user, outcome, base_url(book), |_| {
        vec![Flash::success(format!("{} deleted.", book.singular()))]
    })
    .await)
}

fn export_rows(contacts: Vec<Contact>) -> Vec<[String; 5]> {
    contacts
        .into_iter()
        .map(|c| {
            [
                c.id.map(|id| id.to_hex()).unwrap_or_default(),
                c.name,
                c.address,
                c.email,
                c.contact,
            ]
        })
        .collect()
}

async fn export_excel(
    book: ContactBook,
    session_user: SessionUser,
    state: Arc<AppState>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let contacts = all_contacts(&state, book).await.map_err(internal)?;
    let rows: Vec<Vec<Cell>> = export_rows(contacts)
        .into_iter()
        .map(|row| row.into_iter().map(Cell::text).collect())
        .collect();
    let sheet = match book {
        ContactBook::Customers => "Customers",
        ContactBook::Suppliers => "Suppliers",
    };
    let bytes = write_xlsx(sheet, &EXPORT_HEADERS, &rows).map_err(|err| internal(err.into()))?;
    Ok(attachment(
        XLSX_CONTENT_TYPE,
        &format!("{}.xlsx", book.collection()),
        bytes,
    ))
}

async fn export_pdf(
    book: ContactBook,
    session_user: SessionUser,
    state: Arc<AppState>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let contacts = all_contacts(&state, book).await.map_err(internal)?;
    let rows: Vec<Vec<String>> = export_rows(contacts).into_iter().map(Vec::from).collect();
    let source = table_document(
        &format!("{} List", book.singular()),
        &EXPORT_HEADERS,
        &rows,
    );
    let pdf = compile_typst(&state.config.typst_bin, &source)
        .await
        .map_err(internal)?;
    Ok(pdf_attachment(&format!("{}.pdf", book.collection()), pdf))
}

async fn import(
    book: ContactBook,
    session_user: SessionUser,
    state: Arc<AppState>,
    multipart: Multipart,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let to = base_url(book);
    let form = read_multipart(multipart).await?;
    let Some(file) = form.file else {
        let flashes = vec![Flash::error(NO_FILE_MESSAGE)];
        return Ok(flash_redirect(&state, &session_user, flashes, to).await);
    };

    let outcome: Result<_, ImportError> = async {
        let rows = read_rows(&file.filename, &file.bytes)?;
        let mut tx = state.begin().await?;
        match import_contacts(&mut tx, book, &rows).await {
            Ok(tally) => {
                tx.commit().await?;
                Ok(tally)
            }
            Err(err) => {
                tx.abort().await;
                Err(err)
            }
        }
    }
    .await;

    let flashes = import_flashes(outcome, |t| {
        format!(
            "Import complete. Created: {}, Updated: {}, Skipped: {}.",
            t.created, t.updated, t.skipped
        )
    });
    Ok(flash_redirect(&state, &session_user, flashes, to).await)
}

macro_rules! contact_handlers {
    ($book:expr, $index:ident, $create:ident, $update:ident, $delete:ident, $excel:ident, $pdf:ident, $import:ident) => {
        pub async fn $index(
            session_user: SessionUser,
            State(state): State<Arc<AppState>>,
            Query(query): Query<ListQuery>,
        ) -> Result<Html<String>, StatusCode> {
            index($book, session_user, state, query).await
        }

        pub async fn $create(
            session_user: SessionUser,
            State(state): State<Arc<AppState>>,
            Form(form): Form<ContactForm>,
        ) -> Result<Response, StatusCode> {
            create($book, session_user, state, form).await
        }

        pub async fn $update(
            session_user: SessionUser,
            State(state): State<Arc<AppState>>,
            Path(id): Path<String>,
            Form(form): Form<ContactForm>,
        ) -> Result<Response, StatusCode> {
            update($book, session_user, state, id, form).await
        }

        pub async fn $delete(
            session_user: SessionUser,
            State(state): State<Arc<AppState>>,
            Path(id): Path<String>,
        ) -> Result<Response, StatusCode> {
            delete($book, session_user, state, id).await
        }

        pub async fn $excel(
            session_user: SessionUser,
            State(state): State<Arc<AppState>>,
        ) -> Result<Response, StatusCode> {
            export_excel($book, session_user, state).await
        }

        pub async fn $pdf(
            session_user: SessionUser,
            State(state): State<Arc<AppState>>,
        ) -> Result<Response, StatusCode> {
            export_pdf($book, session_user, state).await
        }

        pub async fn $import(
            session_user: SessionUser,
            State(state): State<Arc<AppState>>,
            multipart: Multipart,
        ) -> Result<Response, StatusCode> {
            import($book, session_user, state, multipart).await
        }
    };
}

contact_handlers!(
    ContactBook::Customers,
    customers_index,
    customers_create,
    customers_update,
    customers_delete,
    customers_export_excel,
    customers_export_pdf,
    customers_import
);

contact_handlers!(
    ContactBook::Suppliers,
    suppliers_index,
    suppliers_create,
    suppliers_update,
    suppliers_delete,
    suppliers_export_excel,
    suppliers_export_pdf,
    suppliers_import
);
