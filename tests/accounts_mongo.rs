#[path = "common/mod.rs"]
mod common;

use mongodb::bson::{Document, doc, oid::ObjectId};

use stockroom::{
    access::Principal,
    accounts::{self, AccountStore, NewUser, UserChanges},
    error::InventoryError,
    models::Role,
    state::{AppState, create_session, find_user_by_session, get_user_by_id, init_state},
};

async fn add_user(state: &AppState, email: &str, role: Role) -> Principal {
    let mut tx = state.begin().await.unwrap();
    let result = accounts::create_user(
        &mut tx,
        NewUser {
            first_name: email.split('@').next().unwrap_or_default().to_string(),
            email: email.to_string(),
            role,
            password_hash: "x".into(),
        },
    )
    .await;
    let id = tx.settle(result).await.unwrap();
    let user = get_user_by_id(state, &id).await.unwrap().unwrap();
    Principal::from_user(&user).unwrap()
}

async fn delete(state: &AppState, actor: &Principal, id: &ObjectId) -> Result<(), InventoryError> {
    let mut tx = state.begin().await.unwrap();
    let result = accounts::delete_user(&mut tx, actor, id).await;
    tx.settle(result).await
}

fn changes(principal: &Principal, role: Role) -> UserChanges {
    UserChanges {
        first_name: principal.name.clone(),
        email: principal.email.clone(),
        role,
        password_hash: None,
    }
}

#[tokio::test]
async fn the_last_admin_is_protected() {
    let ctx = common::setup_state().await;
    let Some(ctx_ref) = ctx.as_ref() else {
        return;
    };
    let state = &ctx_ref.state;

    let ana = add_user(state, "ana@example.com", Role::Admin).await;
    let bea = add_user(state, "bea@example.com", Role::Admin).await;
    let carl = add_user(state, "carl@example.com", Role::User).await;

    let err = delete(state, &ana, &ana.id).await.unwrap_err();
    assert_eq!(err.to_string(), "You cannot delete your own account.");

    delete(state, &ana, &bea.id).await.unwrap();
    assert!(get_user_by_id(state, &bea.id).await.unwrap().is_none());

    // Ana is now the only admin; promoting Carl lets Ana step down later.
    let mut tx = state.begin().await.unwrap();
    let result = accounts::update_user(&mut tx, &ana, &ana.id, changes(&ana, Role::User)).await;
    let err = tx.settle(result).await.unwrap_err();
    assert!(matches!(err, InventoryError::Conflict(_)));

    let mut tx = state.begin().await.unwrap();
    let result = accounts::update_user(&mut tx, &ana, &carl.id, changes(&carl, Role::Admin)).await;
    tx.settle(result).await.unwrap();

    let carl = Principal {
        role: Role::Admin,
        ..carl
    };
    let mut tx = state.begin().await.unwrap();
    let result = accounts::update_user(&mut tx, &carl, &ana.id, changes(&ana, Role::User)).await;
    let demoted = tx.settle(result).await.unwrap();
    assert_eq!(demoted.role, Role::User);

    let mut tx = state.begin().await.unwrap();
    let result = accounts::update_user(&mut tx, &carl, &carl.id, changes(&carl, Role::User)).await;
    assert!(tx.settle(result).await.is_err());

    common::teardown(ctx).await;
}

#[tokio::test]
async fn duplicate_emails_are_rejected() {
    let ctx = common::setup_state().await;
    let Some(ctx_ref) = ctx.as_ref() else {
        return;
    };
    let state = &ctx_ref.state;

    let ana = add_user(state, "ana@example.com", Role::Admin).await;
    let bea = add_user(state, "bea@example.com", Role::User).await;

    let mut tx = state.begin().await.unwrap();
    let result = accounts::create_user(
        &mut tx,
        NewUser {
            first_name: "Other".into(),
            email: " ANA@example.com".into(),
            role: Role::User,
            password_hash: "x".into(),
        },
    )
    .await;
    let err = tx.settle(result).await.unwrap_err();
    assert_eq!(err.to_string(), "Email already exists.");

    let mut tx = state.begin().await.unwrap();
    let mut taken = changes(&bea, Role::User);
    taken.email = ana.email.clone();
    let result = accounts::update_user(&mut tx, &ana, &bea.id, taken).await;
    let err = tx.settle(result).await.unwrap_err();
    assert_eq!(err.to_string(), "Email already exists for another user.");

    common::teardown(ctx).await;
}

#[tokio::test]
async fn sessions_follow_an_email_change() {
    let ctx = common::setup_state().await;
    let Some(ctx_ref) = ctx.as_ref() else {
        return;
    };
    let state = &ctx_ref.state;

    let ana = add_user(state, "ana@example.com", Role::Admin).await;
    let bea = add_user(state, "bea@example.com", Role::User).await;
    let token = create_session(state, &bea.email).await.unwrap();

    let mut tx = state.begin().await.unwrap();
    let mut renamed = changes(&bea, Role::User);
    renamed.email = "beatriz@example.com".into();
    let result = accounts::update_user(&mut tx, &ana, &bea.id, renamed).await;
    tx.settle(result).await.unwrap();

    let user = find_user_by_session(state, &token).await.unwrap().unwrap();
    assert_eq!(user.id, Some(bea.id));
    assert_eq!(user.email, "beatriz@example.com");

    delete(state, &ana, &bea.id).await.unwrap();
    assert!(find_user_by_session(state, &token).await.unwrap().is_none());

    common::teardown(ctx).await;
}

#[tokio::test]
async fn legacy_admin_flag_counts_and_is_migrated() {
    let ctx = common::setup_state().await;
    let Some(ctx_ref) = ctx.as_ref() else {
        return;
    };
    let state = &ctx_ref.state;
    let raw_users = state.db.collection::<Document>("users");

    let legacy_admin = raw_users
        .insert_one(doc! {
            "email": "old.admin@example.com",
            "first_name": "Old",
            "password": "x",
            "is_admin_flag": true,
        })
        .await
        .unwrap()
        .inserted_id
        .as_object_id()
        .unwrap();
    let legacy_member = raw_users
        .insert_one(doc! {
            "email": "old.member@example.com",
            "first_name": "Member",
            "password": "x",
            "is_admin_flag": false,
        })
        .await
        .unwrap()
        .inserted_id
        .as_object_id()
        .unwrap();
    let ana = add_user(state, "ana@example.com", Role::Admin).await;

    let mut tx = state.begin().await.unwrap();
    assert_eq!(tx.count_admins_excluding(Some(&ana.id)).await.unwrap(), 1);
    assert_eq!(tx.count_admins_excluding(None).await.unwrap(), 2);
    tx.abort().await;

    let old = get_user_by_id(state, &legacy_admin).await.unwrap().unwrap();
    assert_eq!(old.role, Role::Admin);
    let old = Principal::from_user(&old).unwrap();

    // The flagged admin keeps Ana from being the last one.
    delete(state, &old, &ana.id).await.unwrap();

    // Startup migration rewrites the legacy documents.
    init_state(state.config.clone()).await.unwrap();
    let migrated = raw_users
        .find_one(doc! { "_id": legacy_admin })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(migrated.get_str("role").unwrap(), "admin");
    assert!(!migrated.contains_key("is_admin_flag"));
    let migrated = raw_users
        .find_one(doc! { "_id": legacy_member })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(migrated.get_str("role").unwrap(), "user");

    common::teardown(ctx).await;
}
