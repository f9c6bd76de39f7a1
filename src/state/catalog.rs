use std::collections::HashMap;

use anyhow::{Context, Result};
use futures::stream::TryStreamExt;
use mongodb::{
    Collection,
    bson::{Document, doc, oid::ObjectId},
};
use rust_decimal::Decimal;
use tracing::info;

use crate::{
    error::InventoryError,
    import::CatalogStore,
    models::{Category, Contact, ContactBook, Product},
};

use super::{AppState, MongoTx, Page, Pagination, search_filter};

/// Product row with its category name resolved.
#[derive(Debug, Clone)]
pub struct ProductView {
    pub product: Product,
    pub category: String,
}

/// Editable product fields. Quantity is deliberately absent.
#[derive(Debug, Clone)]
pub struct ProductChanges {
    pub name: String,
    pub price: Decimal,
    pub category_id: ObjectId,
    /// Replaces the image when set.
    pub image_filename: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DashboardStats {
    pub users: u64,
    pub categories: u64,
    pub products: u64,
    pub customers: u64,
    pub suppliers: u64,
    pub purchases: u64,
    pub outgoings: u64,
    pub out_of_stock: u64,
}

async fn collect<T>(collection: &Collection<T>, filter: Document, sort: Document) -> Result<Vec<T>>
where
    T: serde::de::DeserializeOwned + Send + Sync,
{
    let mut cursor = collection.find(filter).sort(sort).await?;
    let mut items = Vec::new();
    while let Some(item) = cursor.try_next().await? {
        items.push(item);
    }
    Ok(items)
}

async fn paged<T>(
    collection: &Collection<T>,
    filter: Document,
    sort: Document,
    pagination: Pagination,
) -> Result<Page<T>>
where
    T: serde::de::DeserializeOwned + Send + Sync,
{
    let total = collection.count_documents(filter.clone()).await?;
    let mut cursor = collection
        .find(filter)
        .sort(sort)
        .skip(pagination.skip())
        .limit(pagination.per_page as i64)
        .await?;
    let mut items = Vec::new();
    while let Some(item) = cursor.try_next().await? {
        items.push(item);
    }
    Ok(Page {
        items,
        page: pagination.page,
        per_page: pagination.per_page,
        total,
    })
}

pub async fn list_categories(
    state: &AppState,
    search: &str,
    pagination: Pagination,
) -> Result<Page<Category>> {
    paged(
        &state.categories,
        search_filter(&["name"], search),
        doc! { "_id": 1 },
        pagination,
    )
    .await
}

pub async fn all_categories(state: &AppState) -> Result<Vec<Category>> {
    collect(&state.categories, doc! {}, doc! { "name": 1 }).await
}

pub async fn get_category_by_id(state: &AppState, id: &ObjectId) -> Result<Option<Category>> {
    Ok(state.categories.find_one(doc! { "_id": *id }).await?)
}

pub async fn list_products(
    state: &AppState,
    search: &str,
    category: Option<&ObjectId>,
    pagination: Pagination,
) -> Result<Page<ProductView>> {
    let mut filter = search_filter(&["name"], search);
    if let Some(category) = category {
        filter.insert("category_id", *category);
    }
    let page = paged(&state.products, filter, doc! { "_id": 1 }, pagination).await?;
    let names = category_names(state).await?;
    Ok(Page {
        items: page
            .items
            .into_iter()
            .map(|product| ProductView {
                category: names.get(&product.category_id).cloned().unwrap_or_default(),
                product,
            })
            .collect(),
        page: page.page,
        per_page: page.per_page,
        total: page.total,
    })
}

pub async fn all_products(state: &AppState) -> Result<Vec<Product>> {
    collect(&state.products, doc! {}, doc! { "name": 1 }).await
}

pub async fn get_product_by_id(state: &AppState, id: &ObjectId) -> Result<Option<Product>> {
    Ok(state.products.find_one(doc! { "_id": *id }).await?)
}

async fn category_names(state: &AppState) -> Result<HashMap<ObjectId, String>> {
    Ok(all_categories(state)
        .await?
        .into_iter()
        .filter_map(|c| c.id.map(|id| (id, c.name)))
        .collect())
}

pub async fn list_contacts(
    state: &AppState,
    book: ContactBook,
    search: &str,
    pagination: Pagination,
) -> Result<Page<Contact>> {
    paged(
        state.contacts(book),
        search_filter(&["name", "email", "contact"], search),
        doc! { "_id": 1 },
        pagination,
    )
    .await
}

pub async fn all_contacts(state: &AppState, book: ContactBook) -> Result<Vec<Contact>> {
    collect(state.contacts(book), doc! {}, doc! { "name": 1 }).await
}

pub async fn get_contact_by_id(
    state: &AppState,
    book: ContactBook,
    id: &ObjectId,
) -> Result<Option<Contact>> {
    Ok(state.contacts(book).find_one(doc! { "_id": *id }).await?)
}

pub async fn dashboard_stats(state: &AppState) -> Result<DashboardStats> {
    Ok(DashboardStats {
        users: state.users.count_documents(doc! {}).await?,
        categories: state.categories.count_documents(doc! {}).await?,
        products: state.products.count_documents(doc! {}).await?,
        customers: state.customers.count_documents(doc! {}).await?,
        suppliers: state.suppliers.count_documents(doc! {}).await?,
        purchases: state.purchases.count_documents(doc! {}).await?,
        outgoings: state.outgoings.count_documents(doc! {}).await?,
        out_of_stock: state
            .products
            .count_documents(doc! { "quantity": { "$lte": 0_i64 } })
            .await?,
    })
}

impl MongoTx<'_> {
    async fn category_named(&mut self, name: &str) -> Result<Option<Category>> {
        Ok(self
            .state
            .categories
            .find_one(doc! { "name": name })
            .session(&mut self.session)
            .await?)
    }

    pub async fn create_category(&mut self, name: &str) -> Result<ObjectId, InventoryError> {
        if self.category_named(name).await?.is_some() {
            return Err(InventoryError::conflict("Category name already exists."));
        }
        let res = self
            .state
            .categories
            .insert_one(Category {
                id: None,
                name: name.to_string(),
            })
            .session(&mut self.session)
            .await?;
        let id = res
            .inserted_id
            .as_object_id()
            .context("category insert missing _id")?;
        info!(category_id = %id, name, "category created");
        Ok(id)
    }

    pub async fn rename_category(&mut self, id: &ObjectId, name: &str) -> Result<(), InventoryError> {
        if let Some(other) = self.category_named(name).await? {
            if other.id.as_ref() != Some(id) {
                return Err(InventoryError::conflict("Category name already exists."));
            }
        }
        let res = self
            .state
            .categories
            .update_one(doc! { "_id": *id }, doc! { "$set": { "name": name } })
            .session(&mut self.session)
            .await?;
        if res.matched_count == 0 {
            return Err(InventoryError::NotFound("category"));
        }
        Ok(())
    }

    /// Removes the category, its products and their ledger rows.
    pub async fn delete_category(&mut self, id: &ObjectId) -> Result<(), InventoryError> {
        let res = self
            .state
            .categories
            .delete_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await?;
        if res.deleted_count == 0 {
            return Err(InventoryError::NotFound("category"));
        }

        let mut product_ids = Vec::new();
        let mut cursor = self
            .state
            .products
            .find(doc! { "category_id": *id })
            .session(&mut self.session)
            .await?;
        while let Some(product) = cursor.next(&mut self.session).await.transpose()? {
            if let Some(pid) = product.id {
                product_ids.push(pid);
            }
        }
        drop(cursor);

        self.delete_ledger_rows(doc! { "product_id": { "$in": product_ids } })
            .await?;
        let removed = self
            .state
            .products
            .delete_many(doc! { "category_id": *id })
            .session(&mut self.session)
            .await?;
        info!(category_id = %id, products = removed.deleted_count, "category deleted");
        Ok(())
    }

    async fn delete_ledger_rows(&mut self, filter: Document) -> Result<()> {
        self.state
            .purchases
            .delete_many(filter.clone())
            .session(&mut self.session)
            .await?;
        self.state
            .outgoings
            .delete_many(filter)
            .session(&mut self.session)
            .await?;
        Ok(())
    }

    async fn category_exists(&mut self, id: &ObjectId) -> Result<bool> {
        Ok(self
            .state
            .categories
            .count_documents(doc! { "_id": *id })
            .session(&mut self.session)
            .await?
            > 0)
    }

    /// Inserts a product with its opening quantity.
    pub async fn create_product(&mut self, product: &Product) -> Result<ObjectId, InventoryError> {
        if !self.category_exists(&product.category_id).await? {
            return Err(InventoryError::Reference(vec![
                "Selected category does not exist.".to_string(),
            ]));
        }
        let id = CatalogStore::insert_product(self, product).await?;
        info!(product_id = %id, quantity = product.quantity, "product created");
        Ok(id)
    }

    pub async fn update_product(
        &mut self,
        id: &ObjectId,
        changes: ProductChanges,
    ) -> Result<(), InventoryError> {
        if !self.category_exists(&changes.category_id).await? {
            return Err(InventoryError::Reference(vec![
                "Selected category does not exist.".to_string(),
            ]));
        }
        let mut set = doc! {
            "name": changes.name,
            "price": changes.price.to_string(),
            "category_id": changes.category_id,
        };
        if let Some(image) = changes.image_filename {
            set.insert("image_filename", image);
        }
        let res = self
            .state
            .products
            .update_one(doc! { "_id": *id }, doc! { "$set": set })
            .session(&mut self.session)
            .await?;
        if res.matched_count == 0 {
            return Err(InventoryError::NotFound("product"));
        }
        info!(product_id = %id, "product updated");
        Ok(())
    }

    /// Removes the product and its ledger rows; returns the image to clean up.
    pub async fn delete_product(&mut self, id: &ObjectId) -> Result<Option<String>, InventoryError> {
        let product = self
            .state
            .products
            .find_one_and_delete(doc! { "_id": *id })
            .session(&mut self.session)
            .await?
            .ok_or(InventoryError::NotFound("product"))?;
        self.delete_ledger_rows(doc! { "product_id": *id }).await?;
        info!(product_id = %id, "product deleted");
        Ok(product.image_filename)
    }

    pub async fn create_contact(
        &mut self,
        book: ContactBook,
        contact: &Contact,
    ) -> Result<ObjectId, InventoryError> {
        let id = CatalogStore::insert_contact(self, book, contact).await?;
        info!(book = book.collection(), contact_id = %id, "contact created");
        Ok(id)
    }

    pub async fn update_contact_details(
        &mut self,
        book: ContactBook,
        id: &ObjectId,
        contact: &Contact,
    ) -> Result<(), InventoryError> {
        let res = self
            .state
            .contacts(book)
            .update_one(
                doc! { "_id": *id },
                doc! { "$set": {
                    "name": contact.name.as_str(),
                    "address": contact.address.as_str(),
                    "email": contact.email.as_str(),
                    "contact": contact.contact.as_str(),
                } },
            )
            .session(&mut self.session)
            .await?;
        if res.matched_count == 0 {
            return Err(InventoryError::NotFound(match book {
                ContactBook::Customers => "customer",
                ContactBook::Suppliers => "supplier",
            }));
        }
        Ok(())
    }

    /// Removes the contact and the ledger rows that reference it.
    pub async fn delete_contact(&mut self, book: ContactBook, id: &ObjectId) -> Result<(), InventoryError> {
        let res = self
            .state
            .contacts(book)
            .delete_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await?;
        if res.deleted_count == 0 {
            return Err(InventoryError::NotFound(match book {
                ContactBook::Customers => "customer",
                ContactBook::Suppliers => "supplier",
            }));
        }
        let removed = match book {
            ContactBook::Customers => {
                self.state
                    .outgoings
                    .delete_many(doc! { "customer_id": *id })
                    .session(&mut self.session)
                    .await?
            }
            ContactBook::Suppliers => {
                self.state
                    .purchases
                    .delete_many(doc! { "supplier_id": *id })
                    .session(&mut self.session)
                    .await?
            }
        };
        info!(book = book.collection(), contact_id = %id, entries = removed.deleted_count, "contact deleted");
        Ok(())
    }
}

impl CatalogStore for MongoTx<'_> {
    async fn category_by_name(&mut self, name: &str) -> Result<Option<ObjectId>> {
        Ok(self.category_named(name).await?.and_then(|c| c.id))
    }

    async fn product_by_name(&mut self, name: &str, category: &ObjectId) -> Result<Option<Product>> {
        Ok(self
            .state
            .products
            .find_one(doc! { "name": name, "category_id": *category })
            .session(&mut self.session)
            .await?)
    }

    async fn insert_product(&mut self, product: &Product) -> Result<ObjectId> {
        let res = self
            .state
            .products
            .insert_one(product)
            .session(&mut self.session)
            .await?;
        res.inserted_id
            .as_object_id()
            .context("product insert missing _id")
    }

    async fn update_listing(
        &mut self,
        id: &ObjectId,
        price: Decimal,
        image_filename: Option<String>,
    ) -> Result<()> {
        let mut set = doc! { "price": price.to_string() };
        if let Some(image) = image_filename {
            set.insert("image_filename", image);
        }
        self.state
            .products
            .update_one(doc! { "_id": *id }, doc! { "$set": set })
            .session(&mut self.session)
            .await?;
        Ok(())
    }

    async fn contact_by_email(&mut self, book: ContactBook, email: &str) -> Result<Option<Contact>> {
        Ok(self
            .state
            .contacts(book)
            .find_one(doc! { "email": email })
            .session(&mut self.session)
            .await?)
    }

    async fn insert_contact(&mut self, book: ContactBook, contact: &Contact) -> Result<ObjectId> {
        let res = self
            .state
            .contacts(book)
            .insert_one(contact)
            .session(&mut self.session)
            .await?;
        res.inserted_id
            .as_object_id()
            .context("contact insert missing _id")
    }

    async fn update_contact(&mut self, book: ContactBook, contact: &Contact) -> Result<()> {
        let id = contact.id.context("updating contact without _id")?;
        self.state
            .contacts(book)
            .replace_one(doc! { "_id": id }, contact)
            .session(&mut self.session)
            .await?;
        Ok(())
    }
}
