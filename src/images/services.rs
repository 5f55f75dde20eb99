use anyhow::Context;
use bytes::Bytes;
use image::ImageFormat;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::ApiError,
    recipes::{
        repo::{RecipeRepo, Retrievable},
        repo_types::Recipe,
    },
    state::AppState,
};

const KEY_PREFIX: &str = "uploads/recipe";
const PRESIGN_TTL_SECS: u64 = 30 * 60;

pub struct ImageUpload {
    pub filename: Option<String>,
    pub body: Bytes,
}

/// Detects the format and fully decodes the payload; anything that does not decode is rejected.
async fn sniff(body: Bytes) -> Result<ImageFormat, ApiError> {
    let not_an_image =
        || ApiError::BadRequest("Upload a valid image. The file you uploaded was either not an image or a corrupted image.".into());

    let format = image::guess_format(&body).map_err(|_| not_an_image())?;
    let decoded = tokio::task::spawn_blocking(move || image::load_from_memory_with_format(&body, format))
        .await
        .context("join image decoder")?;
    decoded.map_err(|_| not_an_image())?;
    Ok(format)
}

/// `uploads/recipe/<uuid>.<ext>`, keeping the client's extension when it is sane.
pub fn image_key(filename: Option<&str>, format: ImageFormat) -> String {
    let original = filename
        .and_then(|f| f.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    let ext = original
        .map(str::to_string)
        .or_else(|| format.extensions_str().first().map(|e| e.to_string()))
        .unwrap_or_else(|| "bin".into());
    format!("{}/{}.{}", KEY_PREFIX, Uuid::new_v4(), ext)
}

/// Stores the image and points the owner's recipe at it, replacing any earlier image.
pub async fn attach_recipe_image(
    st: &AppState,
    owner: Uuid,
    recipe_id: i64,
    upload: ImageUpload,
) -> Result<Recipe, ApiError> {
    if st.recipes.get(owner, recipe_id).await?.is_none() {
        return Err(ApiError::not_found("recipe"));
    }

    let format = sniff(upload.body.clone()).await?;
    let key = image_key(upload.filename.as_deref(), format);
    st.storage
        .put_object(&key, upload.body, format.to_mime_type())
        .await
        .with_context(|| format!("put_object {}", key))?;

    let Some((recipe, previous)) = st.recipes.set_image(owner, recipe_id, key.clone()).await? else {
        // Recipe vanished between the ownership check and the update.
        discard_image(st, &key).await;
        return Err(ApiError::not_found("recipe"));
    };
    if let Some(previous) = previous {
        discard_image(st, &previous).await;
    }

    info!(recipe_id, %key, "recipe image stored");
    Ok(recipe)
}

/// Best effort: a failed delete only leaves an orphaned object behind.
pub async fn discard_image(st: &AppState, key: &str) {
    if let Err(e) = st.storage.delete_object(key).await {
        warn!(error = %e, %key, "failed to delete image object");
    }
}

pub async fn presign_image(st: &AppState, key: &str) -> anyhow::Result<String> {
    st.storage
        .presign_get(key, PRESIGN_TTL_SECS)
        .await
        .with_context(|| format!("presign url for {}", key))
}
