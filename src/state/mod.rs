// state module: AppState, initialization, transactions and re-exports of submodules.

use anyhow::{Context, Result};
use mongodb::{
    Client, ClientSession, Collection, Database,
    bson::{Document, doc},
};
use tracing::{error, info};

use crate::{
    config::AppConfig,
    error::InventoryError,
    ledger::Reconciler,
    mailer::Mailer,
    models::{Category, Contact, ContactBook, Outgoing, Product, Purchase, Session, User, UserRecord},
    password::ResetTokens,
};

mod catalog;
mod movements;
mod seed;
mod users;

pub use catalog::*;
pub use movements::*;
pub use users::*;

pub const SESSION_TTL_SECONDS: u64 = 60 * 60 * 24; // 1 day
pub const DEFAULT_PER_PAGE: u64 = 10;
const MAX_PER_PAGE: u64 = 100;
const MAX_PAGE: u64 = 1_000_000;

#[derive(Clone)]
pub struct AppState {
    pub client: Client,
    pub db: Database,
    pub config: AppConfig,
    pub categories: Collection<Category>,
    pub products: Collection<Product>,
    pub customers: Collection<Contact>,
    pub suppliers: Collection<Contact>,
    pub purchases: Collection<Purchase>,
    pub outgoings: Collection<Outgoing>,
    pub users: Collection<UserRecord>,
    pub sessions: Collection<Session>,
    pub fences: Collection<Document>,
    pub reconciler: Reconciler,
    pub reset_tokens: ResetTokens,
    pub mailer: Mailer,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn contacts(&self, book: ContactBook) -> &Collection<Contact> {
        match book {
            ContactBook::Customers => &self.customers,
            ContactBook::Suppliers => &self.suppliers,
        }
    }

    /// Typed view of `users` for writes; reads go through `UserRecord`.
    pub fn user_writer(&self) -> Collection<User> {
        self.users.clone_with_type::<User>()
    }

    /// Opens a session with a running multi-document transaction.
    pub async fn begin(&self) -> Result<MongoTx<'_>> {
        let mut session = self
            .client
            .start_session()
            .await
            .context("start mongodb session")?;
        session
            .start_transaction()
            .await
            .context("start transaction")?;
        Ok(MongoTx {
            state: self,
            session,
        })
    }
}

/// One request's unit of work. Every storage trait the domain modules use is
/// implemented on it, so all reads and writes of an operation share the
/// same transaction.
pub struct MongoTx<'a> {
    pub(crate) state: &'a AppState,
    pub(crate) session: ClientSession,
}

impl MongoTx<'_> {
    pub async fn commit(mut self) -> Result<()> {
        self.session
            .commit_transaction()
            .await
            .context("commit transaction")
    }

    pub async fn abort(mut self) {
        if let Err(err) = self.session.abort_transaction().await {
            error!(error = %err, "abort transaction failed");
        }
    }

    /// Commits when the operation succeeded, aborts otherwise.
    pub async fn settle<T>(self, result: Result<T, InventoryError>) -> Result<T, InventoryError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                self.abort().await;
                Err(err)
            }
        }
    }
}

/// `page`/`per_page` as requested, clamped to sane values.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u64,
    pub per_page: u64,
}

impl Pagination {
    pub fn new(page: Option<u64>, per_page: Option<u64>) -> Self {
        Pagination {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE),
            per_page: per_page
                .unwrap_or(DEFAULT_PER_PAGE)
                .clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::new(None, None)
    }
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn pages(&self) -> u64 {
        self.total.div_ceil(self.per_page).max(1)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }
}

/// Case-insensitive "contains" filter on the given fields.
pub(crate) fn search_filter(fields: &[&str], search: &str) -> Document {
    let search = search.trim();
    if search.is_empty() {
        return doc! {};
    }
    let pattern = regex::escape(search);
    let clauses: Vec<Document> = fields
        .iter()
        .map(|field| {
            let mut clause = Document::new();
            clause.insert(*field, doc! { "$regex": pattern.as_str(), "$options": "i" });
            clause
        })
        .collect();
    doc! { "$or": clauses }
}

pub async fn init_state(config: AppConfig) -> Result<AppState> {
    let client = Client::with_uri_str(&config.mongodb_uri)
        .await
        .context("connect to mongodb")?;
    let db = client.database(&config.mongodb_db);

    seed::ensure_collections(&db).await?;
    seed::ensure_indexes(&db).await?;
    seed::migrate_legacy_roles(&db).await?;
    if let (Some(email), Some(password)) = (&config.seed_admin_email, &config.seed_admin_password) {
        seed::seed_admin(&db, email, password).await?;
    }

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("create upload dir {}", config.upload_dir.display()))?;

    let mailer = Mailer::from_config(&config)?;
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .context("build http client")?;
    info!(db = %config.mongodb_db, policy = ?config.negative_stock, "state initialized");

    Ok(AppState {
        categories: db.collection::<Category>("categories"),
        products: db.collection::<Product>("products"),
        customers: db.collection::<Contact>(ContactBook::Customers.collection()),
        suppliers: db.collection::<Contact>(ContactBook::Suppliers.collection()),
        purchases: db.collection::<Purchase>("purchases"),
        outgoings: db.collection::<Outgoing>("outgoings"),
        users: db.collection::<UserRecord>("users"),
        sessions: db.collection::<Session>("sessions"),
        fences: db.collection::<Document>("fences"),
        reconciler: Reconciler::new(config.negative_stock),
        reset_tokens: ResetTokens::new(&config.secret_key, &config.password_salt),
        mailer,
        http,
        client,
        db,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps_input() {
        let p = Pagination::new(Some(0), Some(0));
        assert_eq!((p.page, p.per_page), (1, 1));
        let p = Pagination::new(Some(3), None);
        assert_eq!(p.skip(), 20);
        assert_eq!(Pagination::new(None, Some(10_000)).per_page, MAX_PER_PAGE);
    }

    #[test]
    fn huge_page_numbers_are_clamped() {
        let p = Pagination::new(Some(u64::MAX), Some(u64::MAX));
        assert_eq!(p.page, MAX_PAGE);
        assert_eq!(p.skip(), (MAX_PAGE - 1) * MAX_PER_PAGE);
    }

    #[test]
    fn page_navigation() {
        let page = Page::<()> {
            items: Vec::new(),
            page: 2,
            per_page: 10,
            total: 25,
        };
        assert_eq!(page.pages(), 3);
        assert!(page.has_prev());
        assert!(page.has_next());
    }

    #[test]
    fn search_escapes_regex() {
        let filter = search_filter(&["name"], "a.b");
        let clauses = filter.get_array("$or").unwrap();
        let first = clauses[0].as_document().unwrap();
        assert_eq!(
            first.get_document("name").unwrap().get_str("$regex").unwrap(),
            "a\\.b"
        );
        assert!(search_filter(&["name"], "  ").is_empty());
    }
}
