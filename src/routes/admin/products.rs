use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{Html, Response},
};
use mongodb::bson::{DateTime, oid::ObjectId};

use crate::{
    access::ADMIN_ONLY,
    error::InventoryError,
    import::{ImportError, import_products},
    models::{Category, Flash, Product},
    routes::{
        helpers::*,
        uploads::{INVALID_IMAGE_MESSAGE, ImageUpload, remove_upload, save_image},
    },
    session::SessionUser,
    spreadsheet::read_rows,
    state::{AppState, ProductChanges, all_categories, get_product_by_id, list_products},
    validation::{parse_object_id, parse_price, parse_quantity},
};

const PRODUCTS: &str = "/admin/products";
const NEW_PRODUCT: &str = "/admin/products/new";

#[derive(Template)]
#[template(path = "admin/products.html")]
struct ProductsTemplate {
    chrome: Chrome,
    products: Vec<ProductRow>,
    category_filter: Vec<SelectOption>,
    search: String,
    pager: Pager,
}

struct ProductRow {
    id: String,
    name: String,
    price: String,
    quantity: i64,
    category: String,
    category_options: Vec<SelectOption>,
    image_url: Option<String>,
}

#[derive(Template)]
#[template(path = "admin/product_form.html")]
struct ProductFormTemplate {
    chrome: Chrome,
    name: String,
    price: String,
    quantity: String,
    categories: Vec<SelectOption>,
}

fn category_options(categories: &[Category], selected: Option<&ObjectId>) -> Vec<SelectOption> {
    select_options(categories.iter().map(|c| (c.id, c.name.as_str())), selected)
}

pub async fn products_index(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Html<String>, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;

    let search = query.search();
    let category = query.category();
    let page = list_products(&state, &search, category.as_ref(), query.pagination())
        .await
        .map_err(internal)?;
    let categories = all_categories(&state).await.map_err(internal)?;

    let mut pager = pager(PRODUCTS, &page, &search);
    if let Some(category) = category {
        let extra = format!("&category_id={}", category.to_hex());
        pager.prev_url = pager.prev_url.map(|u| u + &extra);
        pager.next_url = pager.next_url.map(|u| u + &extra);
    }

    let products = page
        .items
        .into_iter()
        .filter_map(|view| {
            let id = view.product.id?;
            Some(ProductRow {
                id: id.to_hex(),
                name: view.product.name,
                price: format!("{:.2}", view.product.price),
                quantity: view.product.quantity,
                category: view.category,
                category_options: category_options(&categories, Some(&view.product.category_id)),
                image_url: view.product.image_filename.map(|f| format!("/uploads/{f}")),
            })
        })
        .collect();

    render(ProductsTemplate {
        chrome: chrome(&state, &session_user).await,
        products,
        category_filter: category_options(&categories, category.as_ref()),
        search,
        pager,
    })
}

pub async fn products_new(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
) -> Result<Html<String>, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let categories = all_categories(&state).await.map_err(internal)?;

    render(ProductFormTemplate {
        chrome: chrome(&state, &session_user).await,
        name: String::new(),
        price: String::new(),
        quantity: String::new(),
        categories: category_options(&categories, None),
    })
}

/// Opening stock is taken from the form; afterwards only the ledger moves it.
pub async fn products_create(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let form = read_multipart(multipart).await?;

    let name = form.text("name");
    let price_raw = form.text("price");
    let quantity_raw = form.text("quantity");
    let category_raw = form.text("category_id");

    let mut errors = Vec::new();
    if name.is_empty() {
        errors.push("Product name is required.".to_string());
    }
    let price = parse_price(&price_raw).map_err(|e| errors.push(e)).ok();
    let quantity = parse_quantity(&quantity_raw).map_err(|e| errors.push(e)).ok();
    let category_id = parse_object_id(&category_raw);
    if category_id.is_none() {
        errors.push(if category_raw.is_empty() {
            "Category is required.".to_string()
        } else {
            "Selected category does not exist.".to_string()
        });
    }

    let (Some(price), Some(quantity), Some(category_id), true) =
        (price, quantity, category_id, errors.is_empty())
    else {
        // Re-render with what the user typed.
        let categories = all_categories(&state).await.map_err(internal)?;
        let mut chrome = chrome(&state, &session_user).await;
        chrome
            .flashes
            .extend(error_flashes(errors).into_iter().map(FlashView::from));
        return Ok(render_response(ProductFormTemplate {
            chrome,
            name,
            price: price_raw,
            quantity: quantity_raw,
            categories: category_options(&categories, category_id.as_ref()),
        }));
    };

    let image_filename = match &form.file {
        Some(file) => match save_image(&state, file).await.map_err(internal)? {
            ImageUpload::Saved(name) => Some(name),
            ImageUpload::Rejected => {
                let flashes = vec![Flash::error(INVALID_IMAGE_MESSAGE)];
                return Ok(flash_redirect(&state, &session_user, flashes, NEW_PRODUCT).await);
            }
        },
        None => None,
    };

    let product = Product {
        id: None,
        name,
        price,
        quantity,
        category_id,
        image_filename: image_filename.clone(),
        created_at: Some(DateTime::now()),
    };
    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = tx.create_product(&product).await;
        tx.settle(result).await
    }
    .await;

    match outcome {
        Ok(_) => Ok(flash_redirect(
            &state,
            &session_user,
            vec![Flash::success("Product created successfully.")],
            PRODUCTS,
        )
        .await),
        Err(err) => {
            if let Some(image) = image_filename {
                remove_upload(&state, &image).await;
            }
            Ok(report(&state, &session_user, err, NEW_PRODUCT).await)
        }
    }
}

/// Quantity is ledger-owned and not part of the edit form.
pub async fn products_update(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;
    let existing = get_product_by_id(&state, &id)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let form = read_multipart(multipart).await?;

    let name = form.text("name");
    let mut errors = Vec::new();
    if name.is_empty() {
        errors.push("Product name is required.".to_string());
    }
    let price = parse_price(&form.text("price")).map_err(|e| errors.push(e)).ok();
    let category_id = parse_object_id(&form.text("category_id"));
    if category_id.is_none() {
        errors.push("Selected category does not exist.".to_string());
    }
    let (Some(price), Some(category_id), true) = (price, category_id, errors.is_empty()) else {
        return Ok(flash_redirect(&state, &session_user, error_flashes(errors), PRODUCTS).await);
    };

    let image_filename = match &form.file {
        Some(file) => match save_image(&state, file).await.map_err(internal)? {
            ImageUpload::Saved(name) => Some(name),
            ImageUpload::Rejected => {
                let flashes = vec![Flash::error(INVALID_IMAGE_MESSAGE)];
                return Ok(flash_redirect(&state, &session_user, flashes, PRODUCTS).await);
            }
        },
        None => None,
    };

    let changes = ProductChanges {
        name,
        price,
        category_id,
        image_filename: image_filename.clone(),
    };
    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = tx.update_product(&id, changes).await;
        tx.settle(result).await
    }
    .await;

    // Keep exactly one image on disk: the one the document points to.
    let stale = match (&outcome, image_filename) {
        (Ok(()), Some(_)) => existing.image_filename,
        (Err(_), fresh) => fresh,
        (Ok(()), None) => None,
    };
    if let Some(stale) = stale {
        remove_upload(&state, &stale).await;
    }

    Ok(finish(&state, &session_user, outcome, PRODUCTS, |_| {
        vec![Flash::success("Product updated successfully.")]
    })
    .await)
}

pub async fn products_delete(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let id = path_id(&id)?;

    let outcome: Result<_, InventoryError> = async {
        let mut tx = state.begin().await?;
        let result = tx.delete_product(&id).await;
        tx.settle(result).await
    }
    .await;
    if let Ok(Some(image)) = &outcome {
        remove_upload(&state, image).await;
    }

    Ok(finish(&state, &session_user, outcome, PRODUCTS, |_| {
        vec![Flash::success("Product deleted.")]
    })
    .await)
}

pub async fn products_import(
    session_user: SessionUser,
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, StatusCode> {
    guard(&session_user, ADMIN_ONLY)?;
    let form = read_multipart(multipart).await?;
    let Some(file) = form.file else {
        let flashes = vec![Flash::error(NO_FILE_MESSAGE)];
        return Ok(flash_redirect(&state, &session_user, flashes, PRODUCTS).await);
    };

    let outcome: Result<_, ImportError> = async {
        let rows = read_rows(&file.filename, &file.bytes)?;
        let mut tx = state.begin().await?;
        match import_products(&mut tx, &rows).await {
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
            "Product import complete. Created: {}, Updated: {}, Skipped: {}.",
            t.created, t.updated, t.skipped
        )
    });
    Ok(flash_redirect(&state, &session_user, flashes, PRODUCTS).await)
}
