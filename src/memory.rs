// memory.rs
// In-memory stand-in for the MongoDB transaction handle. Backs the unit tests
// of the ledger, the access guard and the importers.

use std::collections::HashMap;

use anyhow::Result;
use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;

use crate::{
    accounts::AccountStore,
    import::CatalogStore,
    ledger::LedgerStore,
    models::{Category, Contact, ContactBook, Outgoing, Product, Purchase, Role, User},
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    categories: HashMap<ObjectId, Category>,
    products: HashMap<ObjectId, Product>,
    customers: HashMap<ObjectId, Contact>,
    suppliers: HashMap<ObjectId, Contact>,
    purchases: HashMap<ObjectId, Purchase>,
    outgoings: HashMap<ObjectId, Outgoing>,
    users: HashMap<ObjectId, User>,
    fence_writes: u64,
}

impl MemoryStore {
    pub fn add_category(&mut self, name: &str) -> ObjectId {
        let id = ObjectId::new();
        self.categories.insert(
            id,
            Category {
                id: Some(id),
                name: name.to_string(),
            },
        );
        id
    }

    pub fn add_product(&mut self, name: &str, category_id: ObjectId, quantity: i64) -> ObjectId {
        let id = ObjectId::new();
        self.products.insert(
            id,
            Product {
                id: Some(id),
                name: name.to_string(),
                price: Decimal::ZERO,
                quantity,
                category_id,
                image_filename: None,
                created_at: None,
            },
        );
        id
    }

    pub fn add_supplier(&mut self, name: &str) -> ObjectId {
        let id = ObjectId::new();
        self.suppliers.insert(id, named_contact(id, name));
        id
    }

    pub fn add_customer(&mut self, name: &str) -> ObjectId {
        let id = ObjectId::new();
        self.customers.insert(id, named_contact(id, name));
        id
    }

    pub fn add_user(&mut self, email: &str, role: Role) -> ObjectId {
        let id = ObjectId::new();
        self.users.insert(
            id,
            User {
                id: Some(id),
                email: email.to_string(),
                first_name: email.split('@').next().unwrap_or_default().to_string(),
                password: String::new(),
                role,
            },
        );
        id
    }

    pub fn quantity(&self, product: &ObjectId) -> i64 {
        self.products.get(product).map(|p| p.quantity).unwrap_or(0)
    }

    /// Σ purchases − Σ outgoings currently on record for the product.
    pub fn ledger_balance(&self, product: &ObjectId) -> i64 {
        let bought: i64 = self
            .purchases
            .values()
            .filter(|p| &p.product_id == product)
            .map(|p| p.quantity)
            .sum();
        let shipped: i64 = self
            .outgoings
            .values()
            .filter(|o| &o.product_id == product)
            .map(|o| o.quantity)
            .sum();
        bought - shipped
    }

    pub fn purchase_count(&self) -> usize {
        self.purchases.len()
    }

    pub fn outgoing_count(&self) -> usize {
        self.outgoings.len()
    }

    pub fn products(&self) -> Vec<&Product> {
        self.products.values().collect()
    }

    pub fn contacts(&self, book: ContactBook) -> Vec<&Contact> {
        self.book(book).values().collect()
    }

    pub fn find_user(&self, id: &ObjectId) -> Option<&User> {
        self.users.get(id)
    }

    pub fn admin_count(&self) -> usize {
        self.users.values().filter(|u| u.role.is_admin()).count()
    }

    pub fn fence_writes(&self) -> u64 {
        self.fence_writes
    }

    fn book(&self, book: ContactBook) -> &HashMap<ObjectId, Contact> {
        match book {
            ContactBook::Customers => &self.customers,
            ContactBook::Suppliers => &self.suppliers,
        }
    }

    fn book_mut(&mut self, book: ContactBook) -> &mut HashMap<ObjectId, Contact> {
        match book {
            ContactBook::Customers => &mut self.customers,
            ContactBook::Suppliers => &mut self.suppliers,
        }
    }
}

fn named_contact(id: ObjectId, name: &str) -> Contact {
    Contact {
        id: Some(id),
        name: name.to_string(),
        ..Contact::default()
    }
}

impl LedgerStore for MemoryStore {
    async fn product(&mut self, id: &ObjectId) -> Result<Option<Product>> {
        Ok(self.products.get(id).cloned())
    }

    async fn supplier_exists(&mut self, id: &ObjectId) -> Result<bool> {
        Ok(self.suppliers.contains_key(id))
    }

    async fn customer_exists(&mut self, id: &ObjectId) -> Result<bool> {
        Ok(self.customers.contains_key(id))
    }

    async fn purchase(&mut self, id: &ObjectId) -> Result<Option<Purchase>> {
        Ok(self.purchases.get(id).cloned())
    }

    async fn insert_purchase(&mut self, purchase: &Purchase) -> Result<ObjectId> {
        let id = purchase.id.unwrap_or_else(ObjectId::new);
        let mut row = purchase.clone();
        row.id = Some(id);
        self.purchases.insert(id, row);
        Ok(id)
    }

    async fn replace_purchase(&mut self, purchase: &Purchase) -> Result<()> {
        if let Some(id) = purchase.id {
            self.purchases.insert(id, purchase.clone());
        }
        Ok(())
    }

    async fn remove_purchase(&mut self, id: &ObjectId) -> Result<()> {
        self.purchases.remove(id);
        Ok(())
    }

    async fn outgoing(&mut self, id: &ObjectId) -> Result<Option<Outgoing>> {
        Ok(self.outgoings.get(id).cloned())
    }

    async fn insert_outgoing(&mut self, outgoing: &Outgoing) -> Result<ObjectId> {
        let id = outgoing.id.unwrap_or_else(ObjectId::new);
        let mut row = outgoing.clone();
        row.id = Some(id);
        self.outgoings.insert(id, row);
        Ok(id)
    }

    async fn replace_outgoing(&mut self, outgoing: &Outgoing) -> Result<()> {
        if let Some(id) = outgoing.id {
            self.outgoings.insert(id, outgoing.clone());
        }
        Ok(())
    }

    async fn remove_outgoing(&mut self, id: &ObjectId) -> Result<()> {
        self.outgoings.remove(id);
        Ok(())
    }

    async fn adjust_quantity(&mut self, product: &ObjectId, delta: i64) -> Result<Option<i64>> {
        Ok(self.products.get_mut(product).map(|p| {
            p.quantity += delta;
            p.quantity
        }))
    }
}

impl AccountStore for MemoryStore {
    async fn user(&mut self, id: &ObjectId) -> Result<Option<User>> {
        Ok(self.users.get(id).cloned())
    }

    async fn user_by_email(&mut self, email: &str) -> Result<Option<User>> {
        Ok(self.users.values().find(|u| u.email == email).cloned())
    }

    async fn count_admins_excluding(&mut self, id: Option<&ObjectId>) -> Result<u64> {
        Ok(self
            .users
            .values()
            .filter(|u| u.role.is_admin() && u.id.as_ref() != id)
            .count() as u64)
    }

    async fn insert_user(&mut self, user: &User) -> Result<ObjectId> {
        let id = user.id.unwrap_or_else(ObjectId::new);
        let mut row = user.clone();
        row.id = Some(id);
        self.users.insert(id, row);
        Ok(id)
    }

    async fn save_user(&mut self, user: &User) -> Result<()> {
        if let Some(id) = user.id {
            self.users.insert(id, user.clone());
        }
        Ok(())
    }

    async fn delete_user(&mut self, id: &ObjectId) -> Result<()> {
        self.users.remove(id);
        Ok(())
    }

    async fn fence_admins(&mut self) -> Result<()> {
        self.fence_writes += 1;
        Ok(())
    }
}

impl CatalogStore for MemoryStore {
    async fn category_by_name(&mut self, name: &str) -> Result<Option<ObjectId>> {
        Ok(self
            .categories
            .values()
            .find(|c| c.name == name)
            .and_then(|c| c.id))
    }

    async fn product_by_name(&mut self, name: &str, category: &ObjectId) -> Result<Option<Product>> {
        Ok(self
            .products
            .values()
            .find(|p| p.name == name && &p.category_id == category)
            .cloned())
    }

    async fn insert_product(&mut self, product: &Product) -> Result<ObjectId> {
        let id = ObjectId::new();
        let mut row = product.clone();
        row.id = Some(id);
        self.products.insert(id, row);
        Ok(id)
    }

    async fn update_listing(
        &mut self,
        id: &ObjectId,
        price: Decimal,
        image_filename: Option<String>,
    ) -> Result<()> {
        if let Some(product) = self.products.get_mut(id) {
            product.price = price;
            if image_filename.is_some() {
                product.image_filename = image_filename;
            }
        }
        Ok(())
    }

    async fn contact_by_email(&mut self, book: ContactBook, email: &str) -> Result<Option<Contact>> {
        Ok(self.book(book).values().find(|c| c.email == email).cloned())
    }

    async fn insert_contact(&mut self, book: ContactBook, contact: &Contact) -> Result<ObjectId> {
        let id = ObjectId::new();
        let mut row = contact.clone();
        row.id = Some(id);
        self.book_mut(book).insert(id, row);
        Ok(id)
    }

    async fn update_contact(&mut self, book: ContactBook, contact: &Contact) -> Result<()> {
        if let Some(id) = contact.id {
            self.book_mut(book).insert(id, contact.clone());
        }
        Ok(())
    }
}
