use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::extractors::AuthUser,
    error::{method_not_allowed, ApiError},
    extract::ValidJson,
    images::services::{attach_recipe_image, discard_image, presign_image, ImageUpload},
    recipes::{
        dto::{
            NamedPatchRequest, NamedRequest, NamedView, RecipeDetailView, RecipePatchRequest,
            RecipeRequest, RecipeView,
        },
        repo::{NamedRepo, Listable, Creatable, Retrievable, Updatable, Deletable},
        repo_types::{Ingredient, Named, RecipeChanges, Tag},
    },
    state::AppState,
};

const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// A named resource together with the repository that stores it.
pub trait NamedResource: Named {
    fn repo(state: &AppState) -> &dyn NamedRepo<Self>;
}

impl NamedResource for Tag {
    fn repo(state: &AppState) -> &dyn NamedRepo<Self> {
        state.tags.as_ref()
    }
}

impl NamedResource for Ingredient {
    fn repo(state: &AppState) -> &dyn NamedRepo<Self> {
        state.ingredients.as_ref()
    }
}

// --- routers ---

fn named_routes<T: NamedResource>(base: &str) -> Router<AppState> {
    Router::new()
        .route(
            base,
            get(list_named::<T>)
                .post(create_named::<T>)
                .fallback(method_not_allowed),
        )
        .route(
            &format!("{base}/:id"),
            get(get_named::<T>)
                .patch(patch_named::<T>)
                .put(put_named::<T>)
                .delete(delete_named::<T>)
                .fallback(method_not_allowed),
        )
}

pub fn tag_routes() -> Router<AppState> {
    named_routes::<Tag>("/recipe/tags")
}

pub fn ingredient_routes() -> Router<AppState> {
    named_routes::<Ingredient>("/recipe/ingredients")
}

pub fn recipe_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/recipe/recipes",
            get(list_recipes).post(create_recipe).fallback(method_not_allowed),
        )
        .route(
            "/recipe/recipes/:id",
            get(get_recipe)
                .patch(patch_recipe)
                .put(put_recipe)
                .delete(delete_recipe)
                .fallback(method_not_allowed),
        )
        .route(
            "/recipe/recipes/:id/upload-image",
            post(upload_image)
                .fallback(method_not_allowed)
                .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES)),
        )
        .route(
            "/recipe/recipes/:id/image",
            get(get_image).fallback(method_not_allowed),
        )
}

// --- tags & ingredients ---

#[instrument(skip_all, fields(resource = T::RESOURCE, user_id = %user.id))]
pub async fn list_named<T: NamedResource>(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<NamedView>>, ApiError> {
    let rows = T::repo(&state).list(user.id).await?;
    Ok(Json(rows.iter().map(NamedView::of).collect()))
}

#[instrument(skip_all, fields(resource = T::RESOURCE, user_id = %user.id))]
pub async fn create_named<T: NamedResource>(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<NamedRequest>,
) -> Result<(StatusCode, Json<NamedView>), ApiError> {
    let row = T::repo(&state)
        .create(user.id, payload.name.trim().to_string())
        .await?;
    info!(id = row.id(), "created");
    Ok((StatusCode::CREATED, Json(NamedView::of(&row))))
}

#[instrument(skip_all, fields(resource = T::RESOURCE, user_id = %user.id, id = id))]
pub async fn get_named<T: NamedResource>(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<NamedView>, ApiError> {
    let row = T::repo(&state)
        .get(user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found(T::RESOURCE))?;
    Ok(Json(NamedView::of(&row)))
}

#[instrument(skip_all, fields(resource = T::RESOURCE, user_id = %user.id, id = id))]
pub async fn put_named<T: NamedResource>(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ValidJson(payload): ValidJson<NamedRequest>,
) -> Result<Json<NamedView>, ApiError> {
    let row = T::repo(&state)
        .update(user.id, id, payload.name.trim().to_string())
        .await?
        .ok_or_else(|| ApiError::not_found(T::RESOURCE))?;
    Ok(Json(NamedView::of(&row)))
}

#[instrument(skip_all, fields(resource = T::RESOURCE, user_id = %user.id, id = id))]
pub async fn patch_named<T: NamedResource>(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ValidJson(payload): ValidJson<NamedPatchRequest>,
) -> Result<Json<NamedView>, ApiError> {
    let repo = T::repo(&state);
    let row = match payload.name {
        Some(name) => repo.update(user.id, id, name.trim().to_string()).await?,
        None => repo.get(user.id, id).await?,
    };
    let row = row.ok_or_else(|| ApiError::not_found(T::RESOURCE))?;
    Ok(Json(NamedView::of(&row)))
}

#[instrument(skip_all, fields(resource = T::RESOURCE, user_id = %user.id, id = id))]
pub async fn delete_named<T: NamedResource>(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    T::repo(&state)
        .delete(user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found(T::RESOURCE))?;
    info!("deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- recipes ---

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn list_recipes(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<RecipeView>>, ApiError> {
    let recipes = state.recipes.list(user.id).await?;
    Ok(Json(recipes.iter().map(RecipeView::from).collect()))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn create_recipe(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<RecipeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let recipe = state.recipes.create(user.id, payload.into_new()).await?;
    info!(recipe_id = recipe.id, "recipe created");
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/api/recipe/recipes/{}", recipe.id))],
        Json(RecipeView::from(&recipe)),
    ))
}

#[instrument(skip_all, fields(user_id = %user.id, id = id))]
pub async fn get_recipe(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetailView>, ApiError> {
    let recipe = state
        .recipes
        .get(user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("recipe"))?;
    Ok(Json(RecipeDetailView::from(&recipe)))
}

#[instrument(skip_all, fields(user_id = %user.id, id = id))]
pub async fn put_recipe(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ValidJson(payload): ValidJson<RecipeRequest>,
) -> Result<Json<RecipeView>, ApiError> {
    update_recipe(&state, user.id, id, payload.into_replacement()).await
}

#[instrument(skip_all, fields(user_id = %user.id, id = id))]
pub async fn patch_recipe(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    ValidJson(payload): ValidJson<RecipePatchRequest>,
) -> Result<Json<RecipeView>, ApiError> {
    update_recipe(&state, user.id, id, RecipeChanges::from(payload)).await
}

async fn update_recipe(
    state: &AppState,
    owner: uuid::Uuid,
    id: i64,
    changes: RecipeChanges,
) -> Result<Json<RecipeView>, ApiError> {
    let recipe = state
        .recipes
        .update(owner, id, changes)
        .await?
        .ok_or_else(|| ApiError::not_found("recipe"))?;
    Ok(Json(RecipeView::from(&recipe)))
}

#[instrument(skip_all, fields(user_id = %user.id, id = id))]
pub async fn delete_recipe(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let recipe = state
        .recipes
        .delete(user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("recipe"))?;
    if let Some(key) = &recipe.image {
        discard_image(&state, key).await;
    }
    info!("recipe deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST multipart with a single `image` file field.
#[instrument(skip_all, fields(user_id = %user.id, id = id))]
pub async fn upload_image(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    mut mp: Multipart,
) -> Result<Json<RecipeView>, ApiError> {
    let mut upload = None;
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let body = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        upload = Some(ImageUpload { filename, body });
    }
    let upload = upload.ok_or_else(|| ApiError::BadRequest("No file was submitted.".into()))?;

    let recipe = attach_recipe_image(&state, user.id, id, upload).await?;
    Ok(Json(RecipeView::from(&recipe)))
}

/// Temporary redirect to a presigned URL for the recipe's image.
#[instrument(skip_all, fields(user_id = %user.id, id = id))]
pub async fn get_image(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let recipe = state
        .recipes
        .get(user.id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("recipe"))?;
    let key = recipe.image.ok_or_else(|| ApiError::not_found("image"))?;
    let url = presign_image(&state, &key).await?;
    Ok(Redirect::temporary(&url).into_response())
}
