// routes/uploads.rs
// Product images: stored under UPLOAD_DIR with a random name, served from /uploads/{file}.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::warn;
use uuid::Uuid;

use crate::{spreadsheet::extension, state::AppState};

use super::helpers::UploadedFile;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];
pub const INVALID_IMAGE_MESSAGE: &str = "Invalid image type. Allowed: png, jpg, jpeg, gif";

fn content_type(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// Generated names are `<hex>.<ext>`; anything else never reaches the disk.
fn is_stored_name(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && stem.chars().all(|c| c.is_ascii_alphanumeric())
                && IMAGE_EXTENSIONS.contains(&ext)
        }
        None => false,
    }
}

pub enum ImageUpload {
    Saved(String),
    Rejected,
}

pub async fn save_image(state: &AppState, file: &UploadedFile) -> anyhow::Result<ImageUpload> {
    let ext = extension(&file.filename);
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Ok(ImageUpload::Rejected);
    }
    let name = format!("{}.{ext}", Uuid::new_v4().simple());
    let path = state.config.upload_dir.join(&name);
    tokio::fs::write(&path, &file.bytes)
        .await
        .with_context(|| format!("write upload {}", path.display()))?;
    Ok(ImageUpload::Saved(name))
}

pub async fn remove_upload(state: &AppState, name: &str) {
    if !is_stored_name(name) {
        return;
    }
    let path = state.config.upload_dir.join(name);
    if let Err(err) = tokio::fs::remove_file(&path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %err, file = %path.display(), "removing upload failed");
        }
    }
}

pub async fn serve_upload(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, StatusCode> {
    if !is_stored_name(&name) {
        return Err(StatusCode::NOT_FOUND);
    }
    let mime = content_type(&extension(&name)).ok_or(StatusCode::NOT_FOUND)?;
    let bytes = tokio::fs::read(state.config.upload_dir.join(&name))
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_generated_names_are_served() {
        assert!(is_stored_name("0f3a9c.png"));
        assert!(!is_stored_name("../secret.png"));
        assert!(!is_stored_name("notes.txt"));
        assert!(!is_stored_name(".png"));
    }
}
