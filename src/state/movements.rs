use std::collections::HashMap;

use anyhow::{Context, Result};
use futures::stream::TryStreamExt;
use mongodb::{
    Collection,
    bson::{Document, doc, oid::ObjectId},
    options::ReturnDocument,
};
use rust_decimal::Decimal;

use crate::{
    ledger::LedgerStore,
    models::{Contact, Outgoing, Product, Purchase},
};

use super::{AppState, MongoTx, Page, Pagination, search_filter};

#[derive(Debug, Clone)]
pub struct PurchaseView {
    pub purchase: Purchase,
    pub product: String,
    pub supplier: String,
}

#[derive(Debug, Clone)]
pub struct OutgoingView {
    pub outgoing: Outgoing,
    pub product: String,
    pub unit_price: Decimal,
    pub customer: Option<Contact>,
}

impl OutgoingView {
    pub fn customer_name(&self) -> String {
        self.customer.as_ref().map(|c| c.name.clone()).unwrap_or_default()
    }
}

async fn matching_ids<T>(collection: &Collection<T>, search: &str) -> Result<Vec<ObjectId>>
where
    T: Send + Sync,
{
    let mut cursor = collection
        .clone_with_type::<Document>()
        .find(search_filter(&["name"], search))
        .projection(doc! { "_id": 1 })
        .await?;
    let mut ids = Vec::new();
    while let Some(row) = cursor.try_next().await? {
        if let Ok(id) = row.get_object_id("_id") {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Rows whose product or counterparty name contains `search`.
async fn ledger_filter<T: Send + Sync>(
    state: &AppState,
    party_field: &str,
    parties: &Collection<T>,
    search: &str,
) -> Result<Document> {
    if search.trim().is_empty() {
        return Ok(doc! {});
    }
    let products = matching_ids(&state.products, search).await?;
    let parties = matching_ids(parties, search).await?;
    let mut party_clause = Document::new();
    party_clause.insert(party_field, doc! { "$in": parties });
    Ok(doc! { "$or": [ { "product_id": { "$in": products } }, party_clause ] })
}

async fn products_by_id(state: &AppState, ids: Vec<ObjectId>) -> Result<HashMap<ObjectId, Product>> {
    let mut cursor = state.products.find(doc! { "_id": { "$in": ids } }).await?;
    let mut map = HashMap::new();
    while let Some(product) = cursor.try_next().await? {
        if let Some(id) = product.id {
            map.insert(id, product);
        }
    }
    Ok(map)
}

async fn contacts_by_id(
    collection: &Collection<Contact>,
    ids: Vec<ObjectId>,
) -> Result<HashMap<ObjectId, Contact>> {
    let mut cursor = collection.find(doc! { "_id": { "$in": ids } }).await?;
    let mut map = HashMap::new();
    while let Some(contact) = cursor.try_next().await? {
        if let Some(id) = contact.id {
            map.insert(id, contact);
        }
    }
    Ok(map)
}

async fn purchase_views(state: &AppState, rows: Vec<Purchase>) -> Result<Vec<PurchaseView>> {
    let products = products_by_id(state, rows.iter().map(|p| p.product_id).collect()).await?;
    let suppliers = contacts_by_id(&state.suppliers, rows.iter().map(|p| p.supplier_id).collect()).await?;
    Ok(rows
        .into_iter()
        .map(|purchase| PurchaseView {
            product: products
                .get(&purchase.product_id)
                .map(|p| p.name.clone())
                .unwrap_or_default(),
            supplier: suppliers
                .get(&purchase.supplier_id)
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            purchase,
        })
        .collect())
}

async fn outgoing_views(state: &AppState, rows: Vec<Outgoing>) -> Result<Vec<OutgoingView>> {
    let products = products_by_id(state, rows.iter().map(|o| o.product_id).collect()).await?;
    let customers = contacts_by_id(&state.customers, rows.iter().map(|o| o.customer_id).collect()).await?;
    Ok(rows
        .into_iter()
        .map(|outgoing| {
            let product = products.get(&outgoing.product_id);
            OutgoingView {
                product: product.map(|p| p.name.clone()).unwrap_or_default(),
                unit_price: product.map(|p| p.price).unwrap_or(Decimal::ZERO),
                customer: customers.get(&outgoing.customer_id).cloned(),
                outgoing,
            }
        })
        .collect())
}

async fn fetch<T>(
    collection: &Collection<T>,
    filter: Document,
    sort: Document,
    window: Option<Pagination>,
) -> Result<Vec<T>>
where
    T: serde::de::DeserializeOwned + Send + Sync,
{
    let mut find = collection.find(filter).sort(sort);
    if let Some(p) = window {
        find = find.skip(p.skip()).limit(p.per_page as i64);
    }
    let mut cursor = find.await?;
    let mut rows = Vec::new();
    while let Some(row) = cursor.try_next().await? {
        rows.push(row);
    }
    Ok(rows)
}

pub async fn list_purchases(
    state: &AppState,
    search: &str,
    pagination: Pagination,
) -> Result<Page<PurchaseView>> {
    let filter = ledger_filter(state, "supplier_id", &state.suppliers, search).await?;
    let total = state.purchases.count_documents(filter.clone()).await?;
    let rows = fetch(&state.purchases, filter, doc! { "_id": -1 }, Some(pagination)).await?;
    Ok(Page {
        items: purchase_views(state, rows).await?,
        page: pagination.page,
        per_page: pagination.per_page,
        total,
    })
}

/// Every purchase matching `search`, oldest first.
pub async fn all_purchases(state: &AppState, search: &str) -> Result<Vec<PurchaseView>> {
    let filter = ledger_filter(state, "supplier_id", &state.suppliers, search).await?;
    let rows = fetch(&state.purchases, filter, doc! { "_id": 1 }, None).await?;
    purchase_views(state, rows).await
}

pub async fn get_purchase_view(state: &AppState, id: &ObjectId) -> Result<Option<PurchaseView>> {
    let Some(row) = state.purchases.find_one(doc! { "_id": *id }).await? else {
        return Ok(None);
    };
    Ok(purchase_views(state, vec![row]).await?.into_iter().next())
}

pub async fn list_outgoings(
    state: &AppState,
    search: &str,
    pagination: Pagination,
) -> Result<Page<OutgoingView>> {
    let filter = ledger_filter(state, "customer_id", &state.customers, search).await?;
    let total = state.outgoings.count_documents(filter.clone()).await?;
    let rows = fetch(
        &state.outgoings,
        filter,
        doc! { "date": -1, "_id": -1 },
        Some(pagination),
    )
    .await?;
    Ok(Page {
        items: outgoing_views(state, rows).await?,
        page: pagination.page,
        per_page: pagination.per_page,
        total,
    })
}

/// Every outgoing matching `search`, newest first.
pub async fn all_outgoings(state: &AppState, search: &str) -> Result<Vec<OutgoingView>> {
    let filter = ledger_filter(state, "customer_id", &state.customers, search).await?;
    let rows = fetch(&state.outgoings, filter, doc! { "date": -1, "_id": -1 }, None).await?;
    outgoing_views(state, rows).await
}

pub async fn get_outgoing_view(state: &AppState, id: &ObjectId) -> Result<Option<OutgoingView>> {
    let Some(row) = state.outgoings.find_one(doc! { "_id": *id }).await? else {
        return Ok(None);
    };
    Ok(outgoing_views(state, vec![row]).await?.into_iter().next())
}

impl LedgerStore for MongoTx<'_> {
    async fn product(&mut self, id: &ObjectId) -> Result<Option<Product>> {
        Ok(self
            .state
            .products
            .find_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await?)
    }

    async fn supplier_exists(&mut self, id: &ObjectId) -> Result<bool> {
        Ok(self
            .state
            .suppliers
            .count_documents(doc! { "_id": *id })
            .session(&mut self.session)
            .await?
            > 0)
    }

    async fn customer_exists(&mut self, id: &ObjectId) -> Result<bool> {
        Ok(self
            .state
            .customers
            .count_documents(doc! { "_id": *id })
            .session(&mut self.session)
            .await?
            > 0)
    }

    async fn purchase(&mut self, id: &ObjectId) -> Result<Option<Purchase>> {
        Ok(self
            .state
            .purchases
            .find_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await?)
    }

    async fn insert_purchase(&mut self, purchase: &Purchase) -> Result<ObjectId> {
        let res = self
            .state
            .purchases
            .insert_one(purchase)
            .session(&mut self.session)
            .await?;
        res.inserted_id
            .as_object_id()
            .context("purchase insert missing _id")
    }

    async fn replace_purchase(&mut self, purchase: &Purchase) -> Result<()> {
        let id = purchase.id.context("replacing purchase without _id")?;
        self.state
            .purchases
            .replace_one(doc! { "_id": id }, purchase)
            .session(&mut self.session)
            .await?;
        Ok(())
    }

    async fn remove_purchase(&mut self, id: &ObjectId) -> Result<()> {
        self.state
            .purchases
            .delete_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await?;
        Ok(())
    }

    async fn outgoing(&mut self, id: &ObjectId) -> Result<Option<Outgoing>> {
        Ok(self
            .state
            .outgoings
            .find_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await?)
    }

    async fn insert_outgoing(&mut self, outgoing: &Outgoing) -> Result<ObjectId> {
        let res = self
            .state
            .outgoings
            .insert_one(outgoing)
            .session(&mut self.session)
            .await?;
        res.inserted_id
            .as_object_id()
            .context("outgoing insert missing _id")
    }

    async fn replace_outgoing(&mut self, outgoing: &Outgoing) -> Result<()> {
        let id = outgoing.id.context("replacing outgoing without _id")?;
        self.state
            .outgoings
            .replace_one(doc! { "_id": id }, outgoing)
            .session(&mut self.session)
            .await?;
        Ok(())
    }

    async fn remove_outgoing(&mut self, id: &ObjectId) -> Result<()> {
        self.state
            .outgoings
            .delete_one(doc! { "_id": *id })
            .session(&mut self.session)
            .await?;
        Ok(())
    }

    async fn adjust_quantity(&mut self, product: &ObjectId, delta: i64) -> Result<Option<i64>> {
        Ok(self
            .state
            .products
            .find_one_and_update(
                doc! { "_id": *product },
                doc! { "$inc": { "quantity": delta } },
            )
            .return_document(ReturnDocument::After)
            .session(&mut self.session)
            .await?
            .map(|p| p.quantity))
    }
}
