// ledger.rs
// Stock ledger reconciliation: every purchase/outgoing mutation keeps
// `Product.quantity` equal to Σ purchases − Σ outgoings by applying signed
// deltas inside the caller's transaction.

use std::future::Future;

use anyhow::Result;
use chrono::NaiveDate;
use mongodb::bson::oid::ObjectId;
use tracing::{info, warn};

use crate::{
    error::InventoryError,
    models::{Outgoing, Product, Purchase},
};

/// Storage operations the reconciler needs. Implementations run every call
/// inside the same transaction.
pub trait LedgerStore {
    fn product(&mut self, id: &ObjectId) -> impl Future<Output = Result<Option<Product>>> + Send;
    fn supplier_exists(&mut self, id: &ObjectId) -> impl Future<Output = Result<bool>> + Send;
    fn customer_exists(&mut self, id: &ObjectId) -> impl Future<Output = Result<bool>> + Send;

    fn purchase(&mut self, id: &ObjectId) -> impl Future<Output = Result<Option<Purchase>>> + Send;
    fn insert_purchase(&mut self, purchase: &Purchase) -> impl Future<Output = Result<ObjectId>> + Send;
    fn replace_purchase(&mut self, purchase: &Purchase) -> impl Future<Output = Result<()>> + Send;
    fn remove_purchase(&mut self, id: &ObjectId) -> impl Future<Output = Result<()>> + Send;

    fn outgoing(&mut self, id: &ObjectId) -> impl Future<Output = Result<Option<Outgoing>>> + Send;
    fn insert_outgoing(&mut self, outgoing: &Outgoing) -> impl Future<Output = Result<ObjectId>> + Send;
    fn replace_outgoing(&mut self, outgoing: &Outgoing) -> impl Future<Output = Result<()>> + Send;
    fn remove_outgoing(&mut self, id: &ObjectId) -> impl Future<Output = Result<()>> + Send;

    /// Adds `delta` to the product's quantity and returns the new balance,
    /// or `None` when the product no longer exists.
    fn adjust_quantity(
        &mut self,
        product: &ObjectId,
        delta: i64,
    ) -> impl Future<Output = Result<Option<i64>>> + Send;
}

/// What to do when an outgoing would push a product below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegativeStockPolicy {
    /// Record the entry and report the negative balance.
    #[default]
    Allow,
    /// Refuse the outgoing before anything is written.
    Reject,
}

impl NegativeStockPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "allow" | "warn" => Some(NegativeStockPolicy::Allow),
            "reject" | "block" => Some(NegativeStockPolicy::Reject),
            _ => None,
        }
    }
}

/// Validated input of a purchase or outgoing form. `party_id` is the supplier
/// for purchases and the customer for outgoings.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub product_id: Option<ObjectId>,
    pub party_id: Option<ObjectId>,
    pub quantity: i64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegativeBalance {
    pub product_id: ObjectId,
    pub balance: i64,
}

/// Result of a ledger mutation.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub entry_id: ObjectId,
    pub negative: Vec<NegativeBalance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
}

impl Direction {
    fn signed(self, quantity: i64) -> i64 {
        match self {
            Direction::In => quantity,
            Direction::Out => -quantity,
        }
    }

    fn party_label(self) -> &'static str {
        match self {
            Direction::In => "Supplier is required.",
            Direction::Out => "Customer is required.",
        }
    }
}

/// A (product, quantity) pair as currently recorded on a ledger row.
#[derive(Debug, Clone, Copy)]
struct Booking {
    product: ObjectId,
    quantity: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    policy: NegativeStockPolicy,
}

impl Reconciler {
    pub fn new(policy: NegativeStockPolicy) -> Self {
        Reconciler { policy }
    }

    pub fn policy(&self) -> NegativeStockPolicy {
        self.policy
    }

    pub async fn record_purchase<S: LedgerStore>(
        &self,
        store: &mut S,
        entry: LedgerEntry,
    ) -> Result<Receipt, InventoryError> {
        let (product, supplier_id) = self.check_entry(store, &entry, Direction::In).await?;
        let product_id = product.id.ok_or(InventoryError::NotFound("product"))?;

        let entry_id = store
            .insert_purchase(&Purchase {
                id: None,
                product_id,
                supplier_id,
                quantity: entry.quantity,
                date: entry.date,
                created_at: Some(mongodb::bson::DateTime::now()),
            })
            .await?;
        let negative = apply(store, &[(product_id, entry.quantity)]).await?;
        info!(%entry_id, %product_id, quantity = entry.quantity, "purchase recorded");
        Ok(Receipt { entry_id, negative })
    }

    pub async fn edit_purchase<S: LedgerStore>(
        &self,
        store: &mut S,
        id: &ObjectId,
        entry: LedgerEntry,
    ) -> Result<Receipt, InventoryError> {
        let existing = store
            .purchase(id)
            .await?
            .ok_or(InventoryError::NotFound("purchase"))?;
        let (product, supplier_id) = self.check_entry(store, &entry, Direction::In).await?;
        let product_id = product.id.ok_or(InventoryError::NotFound("product"))?;

        let deltas = rebook(
            Direction::In,
            Booking {
                product: existing.product_id,
                quantity: existing.quantity,
            },
            Booking {
                product: product_id,
                quantity: entry.quantity,
            },
        );
        let negative = apply(store, &deltas).await?;
        store
            .replace_purchase(&Purchase {
                id: Some(*id),
                product_id,
                supplier_id,
                quantity: entry.quantity,
                date: entry.date,
                created_at: existing.created_at,
            })
            .await?;
        info!(entry_id = %id, %product_id, quantity = entry.quantity, "purchase updated");
        Ok(Receipt {
            entry_id: *id,
            negative,
        })
    }

    pub async fn delete_purchase<S: LedgerStore>(
        &self,
        store: &mut S,
        id: &ObjectId,
    ) -> Result<Receipt, InventoryError> {
        let existing = store
            .purchase(id)
            .await?
            .ok_or(InventoryError::NotFound("purchase"))?;
        let negative = apply(
            store,
            &[(existing.product_id, Direction::In.signed(-existing.quantity))],
        )
        .await?;
        store.remove_purchase(id).await?;
        info!(entry_id = %id, product_id = %existing.product_id, "purchase deleted");
        Ok(Receipt {
            entry_id: *id,
            negative,
        })
    }

    pub async fn record_outgoing<S: LedgerStore>(
        &self,
        store: &mut S,
        entry: LedgerEntry,
    ) -> Result<Receipt, InventoryError> {
        let (product, customer_id) = self.check_entry(store, &entry, Direction::Out).await?;
        let product_id = product.id.ok_or(InventoryError::NotFound("product"))?;
        self.check_stock(&product, entry.quantity)?;

        let entry_id = store
            .insert_outgoing(&Outgoing {
                id: None,
                product_id,
                customer_id,
                quantity: entry.quantity,
                date: entry.date,
                created_at: Some(mongodb::bson::DateTime::now()),
            })
            .await?;
        let negative = apply(store, &[(product_id, Direction::Out.signed(entry.quantity))]).await?;
        info!(%entry_id, %product_id, quantity = entry.quantity, "outgoing recorded");
        Ok(Receipt { entry_id, negative })
    }

    pub async fn edit_outgoing<S: LedgerStore>(
        &self,
        store: &mut S,
        id: &ObjectId,
        entry: LedgerEntry,
    ) -> Result<Receipt, InventoryError> {
        let existing = store
            .outgoing(id)
            .await?
            .ok_or(InventoryError::NotFound("outgoing"))?;
        let (product, customer_id) = self.check_entry(store, &entry, Direction::Out).await?;
        let product_id = product.id.ok_or(InventoryError::NotFound("product"))?;

        // Stock already taken by this entry from the same product is available again.
        let released = if existing.product_id == product_id {
            existing.quantity
        } else {
            0
        };
        self.check_stock(&product, entry.quantity - released)?;

        let deltas = rebook(
            Direction::Out,
            Booking {
                product: existing.product_id,
                quantity: existing.quantity,
            },
            Booking {
                product: product_id,
                quantity: entry.quantity,
            },
        );
        let negative = apply(store, &deltas).await?;
        store
            .replace_outgoing(&Outgoing {
                id: Some(*id),
                product_id,
                customer_id,
                quantity: entry.quantity,
                date: entry.date,
                created_at: existing.created_at,
            })
            .await?;
        info!(entry_id = %id, %product_id, quantity = entry.quantity, "outgoing updated");
        Ok(Receipt {
            entry_id: *id,
            negative,
        })
    }

    pub async fn delete_outgoing<S: LedgerStore>(
        &self,
        store: &mut S,
        id: &ObjectId,
    ) -> Result<Receipt, InventoryError> {
        let existing = store
            .outgoing(id)
            .await?
            .ok_or(InventoryError::NotFound("outgoing"))?;
        let negative = apply(
            store,
            &[(existing.product_id, Direction::Out.signed(-existing.quantity))],
        )
        .await?;
        store.remove_outgoing(id).await?;
        info!(entry_id = %id, product_id = %existing.product_id, "outgoing deleted");
        Ok(Receipt {
            entry_id: *id,
            negative,
        })
    }

    /// Validates quantity and references; collects every problem at once.
    async fn check_entry<S: LedgerStore>(
        &self,
        store: &mut S,
        entry: &LedgerEntry,
        direction: Direction,
    ) -> Result<(Product, ObjectId), InventoryError> {
        let mut missing = Vec::new();

        let product = match &entry.product_id {
            Some(id) => store.product(id).await?,
            None => None,
        };
        if product.is_none() {
            missing.push("Product is required.".to_string());
        }

        let party = match &entry.party_id {
            Some(id) => {
                let exists = match direction {
                    Direction::In => store.supplier_exists(id).await?,
                    Direction::Out => store.customer_exists(id).await?,
                };
                exists.then_some(*id)
            }
            None => None,
        };
        if party.is_none() {
            missing.push(direction.party_label().to_string());
        }

        if entry.quantity <= 0 {
            let mut errors = missing;
            errors.push("Quantity must be greater than zero.".to_string());
            return Err(InventoryError::Validation(errors));
        }

        match (product, party) {
            (Some(product), Some(party)) => Ok((product, party)),
            _ => Err(InventoryError::Reference(missing)),
        }
    }

    fn check_stock(&self, product: &Product, taking: i64) -> Result<(), InventoryError> {
        if self.policy == NegativeStockPolicy::Reject && taking > 0 && product.quantity < taking {
            return Err(InventoryError::InsufficientStock {
                product: product.name.clone(),
                available: product.quantity,
                requested: taking,
            });
        }
        Ok(())
    }
}

/// Deltas that move a row from its old booking to its new one. When the
/// product changes, the old product gets the full reversal and the new one
/// the full new quantity; applying only the difference to the new product
/// would leave the old product's balance wrong.
fn rebook(direction: Direction, old: Booking, new: Booking) -> Vec<(ObjectId, i64)> {
    if old.product == new.product {
        let delta = direction.signed(new.quantity - old.quantity);
        if delta == 0 {
            Vec::new()
        } else {
            vec![(new.product, delta)]
        }
    } else {
        vec![
            (old.product, direction.signed(-old.quantity)),
            (new.product, direction.signed(new.quantity)),
        ]
    }
}

async fn apply<S: LedgerStore>(
    store: &mut S,
    deltas: &[(ObjectId, i64)],
) -> Result<Vec<NegativeBalance>, InventoryError> {
    let mut negative = Vec::new();
    for (product_id, delta) in deltas {
        match store.adjust_quantity(product_id, *delta).await? {
            Some(balance) if balance < 0 => {
                warn!(%product_id, balance, "product stock is negative");
                negative.push(NegativeBalance {
                    product_id: *product_id,
                    balance,
                });
            }
            Some(_) => {}
            None => warn!(%product_id, delta, "stock adjustment skipped, product is gone"),
        }
    }
    Ok(negative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn entry(product: ObjectId, party: ObjectId, quantity: i64) -> LedgerEntry {
        LedgerEntry {
            product_id: Some(product),
            party_id: Some(party),
            quantity,
            date: day(1),
        }
    }

    #[tokio::test]
    async fn purchase_and_outgoing_round_trip_scenario() {
        let mut store = MemoryStore::default();
        let category = store.add_category("Tools");
        let product = store.add_product("Widget", category, 0);
        let supplier = store.add_supplier("Acme");
        let customer = store.add_customer("Bob");
        let ledger = Reconciler::default();

        let purchase = ledger
            .record_purchase(&mut store, entry(product, supplier, 10))
            .await
            .unwrap();
        assert_eq!(store.quantity(&product), 10);

        let outgoing = ledger
            .record_outgoing(&mut store, entry(product, customer, 4))
            .await
            .unwrap();
        assert_eq!(store.quantity(&product), 6);

        ledger
            .edit_outgoing(&mut store, &outgoing.entry_id, entry(product, customer, 2))
            .await
            .unwrap();
        assert_eq!(store.quantity(&product), 8);

        let receipt = ledger
            .delete_purchase(&mut store, &purchase.entry_id)
            .await
            .unwrap();
        assert_eq!(store.quantity(&product), -2);
        assert_eq!(
            receipt.negative,
            vec![NegativeBalance {
                product_id: product,
                balance: -2
            }]
        );
    }

    #[tokio::test]
    async fn editing_quantity_applies_only_the_difference() {
        let mut store = MemoryStore::default();
        let category = store.add_category("Tools");
        let product = store.add_product("Widget", category, 0);
        let supplier = store.add_supplier("Acme");
        let ledger = Reconciler::default();

        let receipt = ledger
            .record_purchase(&mut store, entry(product, supplier, 7))
            .await
            .unwrap();
        ledger
            .edit_purchase(&mut store, &receipt.entry_id, entry(product, supplier, 3))
            .await
            .unwrap();
        assert_eq!(store.quantity(&product), 3);
    }

    #[tokio::test]
    async fn moving_purchase_between_products_reverses_old_booking() {
        let mut store = MemoryStore::default();
        let category = store.add_category("Tools");
        let a = store.add_product("Hammer", category, 0);
        let b = store.add_product("Saw", category, 5);
        let supplier = store.add_supplier("Acme");
        let ledger = Reconciler::default();

        let receipt = ledger
            .record_purchase(&mut store, entry(a, supplier, 4))
            .await
            .unwrap();
        let total_before = store.quantity(&a) + store.quantity(&b);

        ledger
            .edit_purchase(&mut store, &receipt.entry_id, entry(b, supplier, 4))
            .await
            .unwrap();
        assert_eq!(store.quantity(&a), 0);
        assert_eq!(store.quantity(&b), 9);
        assert_eq!(store.quantity(&a) + store.quantity(&b), total_before);
    }

    #[tokio::test]
    async fn moving_outgoing_with_new_quantity_rebooks_both_products() {
        let mut store = MemoryStore::default();
        let category = store.add_category("Tools");
        let a = store.add_product("Hammer", category, 10);
        let b = store.add_product("Saw", category, 10);
        let customer = store.add_customer("Bob");
        let ledger = Reconciler::default();

        let receipt = ledger
            .record_outgoing(&mut store, entry(a, customer, 3))
            .await
            .unwrap();
        ledger
            .edit_outgoing(&mut store, &receipt.entry_id, entry(b, customer, 6))
            .await
            .unwrap();
        assert_eq!(store.quantity(&a), 10);
        assert_eq!(store.quantity(&b), 4);
    }

    #[tokio::test]
    async fn deleting_outgoing_returns_its_quantity() {
        let mut store = MemoryStore::default();
        let category = store.add_category("Tools");
        let product = store.add_product("Widget", category, 20);
        let customer = store.add_customer("Bob");
        let ledger = Reconciler::default();

        let receipt = ledger
            .record_outgoing(&mut store, entry(product, customer, 5))
            .await
            .unwrap();
        assert_eq!(store.quantity(&product), 15);
        ledger
            .delete_outgoing(&mut store, &receipt.entry_id)
            .await
            .unwrap();
        assert_eq!(store.quantity(&product), 20);
        assert_eq!(store.outgoing_count(), 0);
    }

    #[tokio::test]
    async fn balance_matches_ledger_after_mixed_sequence() {
        let mut store = MemoryStore::default();
        let category = store.add_category("Tools");
        let product = store.add_product("Widget", category, 0);
        let other = store.add_product("Gadget", category, 0);
        let supplier = store.add_supplier("Acme");
        let customer = store.add_customer("Bob");
        let ledger = Reconciler::default();

        let p1 = ledger.record_purchase(&mut store, entry(product, supplier, 12)).await.unwrap();
        let p2 = ledger.record_purchase(&mut store, entry(product, supplier, 3)).await.unwrap();
        let o1 = ledger.record_outgoing(&mut store, entry(product, customer, 5)).await.unwrap();
        ledger.record_outgoing(&mut store, entry(product, customer, 1)).await.unwrap();
        ledger.edit_purchase(&mut store, &p2.entry_id, entry(other, supplier, 8)).await.unwrap();
        ledger.edit_outgoing(&mut store, &o1.entry_id, entry(product, customer, 9)).await.unwrap();
        ledger.delete_purchase(&mut store, &p1.entry_id).await.unwrap();
        ledger.record_purchase(&mut store, entry(product, supplier, 30)).await.unwrap();

        assert_eq!(store.quantity(&product), store.ledger_balance(&product));
        assert_eq!(store.quantity(&other), store.ledger_balance(&other));
        assert_eq!(store.quantity(&product), 30 - 9 - 1);
        assert_eq!(store.quantity(&other), 8);
    }

    #[tokio::test]
    async fn missing_references_are_reported_together() {
        let mut store = MemoryStore::default();
        let ledger = Reconciler::default();

        let err = ledger
            .record_purchase(&mut store, entry(ObjectId::new(), ObjectId::new(), 1))
            .await
            .unwrap_err();
        match err {
            InventoryError::Reference(msgs) => assert_eq!(
                msgs,
                vec!["Product is required.", "Supplier is required."]
            ),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_positive_quantity_is_rejected_without_writes() {
        let mut store = MemoryStore::default();
        let category = store.add_category("Tools");
        let product = store.add_product("Widget", category, 2);
        let supplier = store.add_supplier("Acme");
        let ledger = Reconciler::default();

        let err = ledger
            .record_purchase(&mut store, entry(product, supplier, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)));
        assert_eq!(store.quantity(&product), 2);
        assert_eq!(store.purchase_count(), 0);
    }

    #[tokio::test]
    async fn editing_unknown_entry_is_not_found() {
        let mut store = MemoryStore::default();
        let category = store.add_category("Tools");
        let product = store.add_product("Widget", category, 0);
        let supplier = store.add_supplier("Acme");
        let ledger = Reconciler::default();

        let err = ledger
            .edit_purchase(&mut store, &ObjectId::new(), entry(product, supplier, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::NotFound("purchase")));
    }

    #[tokio::test]
    async fn reject_policy_blocks_overdrawn_outgoing() {
        let mut store = MemoryStore::default();
        let category = store.add_category("Tools");
        let product = store.add_product("Widget", category, 3);
        let customer = store.add_customer("Bob");
        let ledger = Reconciler::new(NegativeStockPolicy::Reject);

        let err = ledger
            .record_outgoing(&mut store, entry(product, customer, 4))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock {
                available: 3,
                requested: 4,
                ..
            }
        ));
        assert_eq!(store.quantity(&product), 3);

        let receipt = ledger
            .record_outgoing(&mut store, entry(product, customer, 3))
            .await
            .unwrap();
        // Raising the same entry counts the stock it already holds.
        ledger
            .edit_outgoing(&mut store, &receipt.entry_id, entry(product, customer, 3))
            .await
            .unwrap();
        assert_eq!(store.quantity(&product), 0);
    }

    #[tokio::test]
    async fn allow_policy_reports_negative_balance() {
        let mut store = MemoryStore::default();
        let category = store.add_category("Tools");
        let product = store.add_product("Widget", category, 1);
        let customer = store.add_customer("Bob");
        let ledger = Reconciler::default();

        let receipt = ledger
            .record_outgoing(&mut store, entry(product, customer, 4))
            .await
            .unwrap();
        assert_eq!(store.quantity(&product), -3);
        assert_eq!(receipt.negative.len(), 1);
    }

    #[test]
    fn policy_parses_aliases() {
        assert_eq!(NegativeStockPolicy::parse("Block"), Some(NegativeStockPolicy::Reject));
        assert_eq!(NegativeStockPolicy::parse("allow"), Some(NegativeStockPolicy::Allow));
        assert_eq!(NegativeStockPolicy::parse("maybe"), None);
    }
}
