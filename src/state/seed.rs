use anyhow::{Context, Result};
use mongodb::{
    Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use tracing::info;

use crate::{
    accounts::normalize_email,
    models::{Role, User},
    password::hash_password,
};

const COLLECTIONS: &[&str] = &[
    "categories",
    "products",
    "customers",
    "suppliers",
    "purchases",
    "outgoings",
    "users",
    "sessions",
    "fences",
];

/// Transactions cannot create collections on older servers, so every
/// collection is created up front.
pub(super) async fn ensure_collections(db: &Database) -> Result<()> {
    let existing = db.list_collection_names().await?;
    for name in COLLECTIONS {
        if !existing.iter().any(|n| n == name) {
            db.create_collection(*name)
                .await
                .with_context(|| format!("create collection {name}"))?;
        }
    }
    Ok(())
}

fn unique(keys: Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn plain(keys: Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

pub(super) async fn ensure_indexes(db: &Database) -> Result<()> {
    db.collection::<Document>("categories")
        .create_index(unique(doc! { "name": 1 }))
        .await?;
    db.collection::<Document>("users")
        .create_index(unique(doc! { "email": 1 }))
        .await?;
    db.collection::<Document>("sessions")
        .create_index(unique(doc! { "token": 1 }))
        .await?;
    db.collection::<Document>("products")
        .create_index(plain(doc! { "category_id": 1, "name": 1 }))
        .await?;
    db.collection::<Document>("purchases")
        .create_index(plain(doc! { "product_id": 1 }))
        .await?;
    db.collection::<Document>("outgoings")
        .create_index(plain(doc! { "product_id": 1 }))
        .await?;
    db.collection::<Document>("customers")
        .create_index(plain(doc! { "email": 1 }))
        .await?;
    db.collection::<Document>("suppliers")
        .create_index(plain(doc! { "email": 1 }))
        .await?;
    Ok(())
}

/// Rewrites users that only carry the boolean admin flag to an explicit role.
pub(super) async fn migrate_legacy_roles(db: &Database) -> Result<()> {
    let users = db.collection::<Document>("users");
    let admins = users
        .update_many(
            doc! { "role": { "$exists": false }, "is_admin_flag": true },
            doc! { "$set": { "role": Role::Admin.as_str() }, "$unset": { "is_admin_flag": "" } },
        )
        .await?;
    let members = users
        .update_many(
            doc! { "role": { "$exists": false } },
            doc! { "$set": { "role": Role::User.as_str() }, "$unset": { "is_admin_flag": "" } },
        )
        .await?;
    let total = admins.modified_count + members.modified_count;
    if total > 0 {
        info!(admins = admins.modified_count, members = members.modified_count, "legacy user roles migrated");
    }
    Ok(())
}

/// Creates the bootstrap admin when no admin exists yet.
pub(super) async fn seed_admin(db: &Database, email: &str, password: &str) -> Result<()> {
    let raw = db.collection::<Document>("users");
    if raw.count_documents(doc! { "role": "admin" }).await? > 0 {
        return Ok(());
    }
    let email = normalize_email(email);
    if raw.count_documents(doc! { "email": email.as_str() }).await? > 0 {
        raw.update_one(
            doc! { "email": email.as_str() },
            doc! { "$set": { "role": Role::Admin.as_str() } },
        )
        .await?;
        info!(%email, "existing user promoted to admin");
        return Ok(());
    }
    db.collection::<User>("users")
        .insert_one(User {
            id: None,
            email: email.clone(),
            first_name: "Admin".to_string(),
            password: hash_password(password)?,
            role: Role::Admin,
        })
        .await
        .context("insert seed admin")?;
    info!(%email, "seed admin created");
    Ok(())
}
