// import.rs
// Bulk import of products, customers and suppliers from spreadsheet rows.
// The caller runs the whole file inside one transaction, so any storage
// failure discards every row.

use std::future::Future;

use anyhow::Result;
use mongodb::bson::{DateTime, oid::ObjectId};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    models::{Contact, ContactBook, Product},
    spreadsheet::SpreadsheetError,
    validation::{parse_import_quantity, parse_price},
};

pub trait CatalogStore {
    fn category_by_name(&mut self, name: &str) -> impl Future<Output = Result<Option<ObjectId>>> + Send;
    fn product_by_name(
        &mut self,
        name: &str,
        category: &ObjectId,
    ) -> impl Future<Output = Result<Option<Product>>> + Send;
    fn insert_product(&mut self, product: &Product) -> impl Future<Output = Result<ObjectId>> + Send;
    /// Updates price and, when given, the image. Quantity is left alone.
    fn update_listing(
        &mut self,
        id: &ObjectId,
        price: Decimal,
        image_filename: Option<String>,
    ) -> impl Future<Output = Result<()>> + Send;
    fn contact_by_email(
        &mut self,
        book: ContactBook,
        email: &str,
    ) -> impl Future<Output = Result<Option<Contact>>> + Send;
    fn insert_contact(
        &mut self,
        book: ContactBook,
        contact: &Contact,
    ) -> impl Future<Output = Result<ObjectId>> + Send;
    fn update_contact(
        &mut self,
        book: ContactBook,
        contact: &Contact,
    ) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportTally {
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{0}")]
    Unreadable(String),
    #[error("{0}")]
    Unsupported(String),
    #[error("The uploaded file is empty or has no data rows.")]
    Empty,
    #[error("Header row must contain columns: {0}.")]
    MissingColumns(&'static str),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<SpreadsheetError> for ImportError {
    fn from(err: SpreadsheetError) -> Self {
        match err {
            SpreadsheetError::Unreadable(msg) => ImportError::Unreadable(msg),
            other => ImportError::Unsupported(other.to_string()),
        }
    }
}

const PRODUCT_COLUMNS: &str = "Name, Price, Quantity, Category (and optional Image)";
const CONTACT_COLUMNS: &str = "Name, Address, Email, Contact";

/// Finds each wanted column in the header row, ignoring case and padding.
pub fn locate_columns<const N: usize>(header: &[String], wanted: [&str; N]) -> [Option<usize>; N] {
    wanted.map(|name| {
        header
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    })
}

fn cell(row: &[String], idx: Option<usize>) -> &str {
    idx.and_then(|i| row.get(i)).map(|v| v.trim()).unwrap_or_default()
}

fn split_header(rows: &[Vec<String>]) -> Result<(&[String], &[Vec<String>]), ImportError> {
    match rows {
        [header, data @ ..] if !data.is_empty() => Ok((header, data)),
        _ => Err(ImportError::Empty),
    }
}

pub async fn import_products<S: CatalogStore>(
    store: &mut S,
    rows: &[Vec<String>],
) -> Result<ImportTally, ImportError> {
    let (header, data) = split_header(rows)?;
    let [name_idx, price_idx, qty_idx, category_idx, image_idx] =
        locate_columns(header, ["name", "price", "quantity", "category", "image"]);
    if name_idx.is_none() || price_idx.is_none() || qty_idx.is_none() || category_idx.is_none() {
        return Err(ImportError::MissingColumns(PRODUCT_COLUMNS));
    }

    let mut tally = ImportTally::default();
    for (line, row) in data.iter().enumerate() {
        let name = cell(row, name_idx);
        let price_raw = cell(row, price_idx);
        let qty_raw = cell(row, qty_idx);
        let category_name = cell(row, category_idx);
        let image = cell(row, image_idx);

        if [name, price_raw, qty_raw, category_name, image].iter().all(|v| v.is_empty()) {
            continue;
        }

        let parsed = (|| {
            if name.is_empty() || category_name.is_empty() {
                return None;
            }
            Some((parse_price(price_raw).ok()?, parse_import_quantity(qty_raw)?))
        })();
        let Some((price, quantity)) = parsed else {
            debug!(row = line + 2, "product row skipped");
            tally.skipped += 1;
            continue;
        };
        let Some(category_id) = store.category_by_name(category_name).await? else {
            debug!(row = line + 2, category = category_name, "unknown category");
            tally.skipped += 1;
            continue;
        };

        let image_filename = (!image.is_empty()).then(|| image.to_string());
        match store.product_by_name(name, &category_id).await? {
            Some(existing) => {
                let id = existing
                    .id
                    .ok_or_else(|| anyhow::anyhow!("stored product without id"))?;
                store.update_listing(&id, price, image_filename).await?;
                tally.updated += 1;
            }
            None => {
                store
                    .insert_product(&Product {
                        id: None,
                        name: name.to_string(),
                        price,
                        quantity,
                        category_id,
                        image_filename,
                        created_at: Some(DateTime::now()),
                    })
                    .await?;
                tally.created += 1;
            }
        }
    }

    info!(
        created = tally.created,
        updated = tally.updated,
        skipped = tally.skipped,
        "products imported"
    );
    Ok(tally)
}

pub async fn import_contacts<S: CatalogStore>(
    store: &mut S,
    book: ContactBook,
    rows: &[Vec<String>],
) -> Result<ImportTally, ImportError> {
    let (header, data) = split_header(rows)?;
    let [name_idx, address_idx, email_idx, contact_idx] =
        locate_columns(header, ["name", "address", "email", "contact"]);
    if name_idx.is_none() || address_idx.is_none() || email_idx.is_none() || contact_idx.is_none() {
        return Err(ImportError::MissingColumns(CONTACT_COLUMNS));
    }

    let mut tally = ImportTally::default();
    for row in data {
        let name = cell(row, name_idx);
        let address = cell(row, address_idx);
        let email = cell(row, email_idx);
        let contact = cell(row, contact_idx);

        if [name, address, email, contact].iter().all(|v| v.is_empty()) {
            continue;
        }
        if name.is_empty() || email.is_empty() {
            tally.skipped += 1;
            continue;
        }

        match store.contact_by_email(book, email).await? {
            Some(mut existing) => {
                existing.name = name.to_string();
                existing.address = address.to_string();
                existing.contact = contact.to_string();
                store.update_contact(book, &existing).await?;
                tally.updated += 1;
            }
            None => {
                store
                    .insert_contact(
                        book,
                        &Contact {
                            id: None,
                            name: name.to_string(),
                            address: address.to_string(),
                            email: email.to_string(),
                            contact: contact.to_string(),
                            created_at: Some(DateTime::now()),
                        },
                    )
                    .await?;
                tally.created += 1;
            }
        }
    }

    info!(
        book = book.collection(),
        created = tally.created,
        updated = tally.updated,
        skipped = tally.skipped,
        "contacts imported"
    );
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn rows(lines: &[&[&str]]) -> Vec<Vec<String>> {
        lines
            .iter()
            .map(|l| l.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[tokio::test]
    async fn reimporting_a_product_updates_it() {
        let mut store = MemoryStore::default();
        store.add_category("Tools");
        let sheet = rows(&[
            &["Name", "Price", "Quantity", "Category"],
            &["Widget", "9.99", "5", "Tools"],
        ]);

        let first = import_products(&mut store, &sheet).await.unwrap();
        assert_eq!(first, ImportTally { created: 1, updated: 0, skipped: 0 });

        let second = import_products(&mut store, &sheet).await.unwrap();
        assert_eq!(second, ImportTally { created: 0, updated: 1, skipped: 0 });
        assert_eq!(store.products().len(), 1);
    }

    #[tokio::test]
    async fn import_update_keeps_quantity() {
        let mut store = MemoryStore::default();
        let tools = store.add_category("Tools");
        let widget = store.add_product("Widget", tools, 3);

        let sheet = rows(&[
            &["name", "PRICE", " Quantity ", "Category", "Image"],
            &["Widget", "4.50", "40", "Tools", "widget.png"],
        ]);
        import_products(&mut store, &sheet).await.unwrap();

        assert_eq!(store.quantity(&widget), 3);
        let product = store.products()[0].clone();
        assert_eq!(product.price, Decimal::new(450, 2));
        assert_eq!(product.image_filename.as_deref(), Some("widget.png"));
    }

    #[tokio::test]
    async fn bad_product_rows_are_skipped_and_blank_rows_ignored() {
        let mut store = MemoryStore::default();
        store.add_category("Tools");
        let sheet = rows(&[
            &["Name", "Price", "Quantity", "Category"],
            &["", "", "", ""],
            &["", "1", "1", "Tools"],
            &["Saw", "-2", "1", "Tools"],
            &["Drill", "20", "x", "Tools"],
            &["Hammer", "12", "10.0", "Garden"],
            &["Nail", "0.10", "100.0", "Tools"],
        ]);
        let tally = import_products(&mut store, &sheet).await.unwrap();
        assert_eq!(tally, ImportTally { created: 1, updated: 0, skipped: 4 });
        assert_eq!(store.products()[0].quantity, 100);
    }

    #[tokio::test]
    async fn missing_columns_and_empty_files_fail_whole_file() {
        let mut store = MemoryStore::default();
        let err = import_products(&mut store, &rows(&[&["Name", "Price", "Category"], &["a", "1", "b"]]))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::MissingColumns(_)));

        let err = import_products(&mut store, &rows(&[&["Name", "Price", "Quantity", "Category"]]))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Empty));
        assert!(store.products().is_empty());
    }

    #[tokio::test]
    async fn contacts_match_on_email() {
        let mut store = MemoryStore::default();
        let sheet = rows(&[
            &["Name", "Address", "Email", "Contact"],
            &["Ann", "1 Main St", "ann@example.com", "555-1"],
            &["Bob", "2 Side St", "", "555-2"],
        ]);
        let tally = import_contacts(&mut store, ContactBook::Suppliers, &sheet)
            .await
            .unwrap();
        assert_eq!(tally, ImportTally { created: 1, updated: 0, skipped: 1 });

        let sheet = rows(&[
            &["Name", "Address", "Email", "Contact"],
            &["Ann Lee", "9 New Rd", "ann@example.com", "555-9"],
        ]);
        let tally = import_contacts(&mut store, ContactBook::Suppliers, &sheet)
            .await
            .unwrap();
        assert_eq!(tally.updated, 1);

        let suppliers = store.contacts(ContactBook::Suppliers);
        assert_eq!(suppliers.len(), 1);
        assert_eq!(suppliers[0].name, "Ann Lee");
        assert_eq!(suppliers[0].address, "9 New Rd");
        assert!(store.contacts(ContactBook::Customers).is_empty());
    }
}
