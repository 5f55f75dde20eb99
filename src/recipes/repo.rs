//! Owner-scoped repositories.
//!
//! Every operation takes the authenticated user's id and filters on it inside the query,
//! so a record owned by someone else behaves exactly like a missing one.

use std::{collections::HashMap, marker::PhantomData};

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{RepoError, RepoResult};
use crate::recipes::repo_types::{
    unique_ids, Ingredient, Named, NewRecipe, Recipe, RecipeChanges, RecipeRow, Tag,
};

#[async_trait]
pub trait Listable<T>: Send + Sync {
    async fn list(&self, owner: Uuid) -> RepoResult<Vec<T>>;
}

#[async_trait]
pub trait Creatable<N: Send + 'static, T>: Send + Sync {
    async fn create(&self, owner: Uuid, new: N) -> RepoResult<T>;
}

#[async_trait]
pub trait Retrievable<T>: Send + Sync {
    async fn get(&self, owner: Uuid, id: i64) -> RepoResult<Option<T>>;
}

#[async_trait]
pub trait Updatable<C: Send + 'static, T>: Send + Sync {
    async fn update(&self, owner: Uuid, id: i64, changes: C) -> RepoResult<Option<T>>;
}

#[async_trait]
pub trait Deletable<T>: Send + Sync {
    /// Returns the deleted record.
    async fn delete(&self, owner: Uuid, id: i64) -> RepoResult<Option<T>>;
}

/// Tags and ingredients: full CRUD where an update is a rename.
pub trait NamedRepo<T>:
    Listable<T> + Creatable<String, T> + Retrievable<T> + Updatable<String, T> + Deletable<T>
{
}

impl<T, R> NamedRepo<T> for R where
    R: Listable<T> + Creatable<String, T> + Retrievable<T> + Updatable<String, T> + Deletable<T> + ?Sized
{
}

#[async_trait]
pub trait RecipeRepo:
    Listable<Recipe>
    + Creatable<NewRecipe, Recipe>
    + Retrievable<Recipe>
    + Updatable<RecipeChanges, Recipe>
    + Deletable<Recipe>
{
    /// Points the recipe at a new image key and returns it with the key it replaced.
    async fn set_image(
        &self,
        owner: Uuid,
        id: i64,
        key: String,
    ) -> RepoResult<Option<(Recipe, Option<String>)>>;
}

// ---- Postgres ----

pub struct PgNamedRepo<T> {
    db: PgPool,
    _kind: PhantomData<fn() -> T>,
}

impl<T> PgNamedRepo<T> {
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Named> Listable<T> for PgNamedRepo<T> {
    async fn list(&self, owner: Uuid) -> RepoResult<Vec<T>> {
        let sql = format!(
            "SELECT id, user_id, name FROM {} WHERE user_id = $1 ORDER BY name DESC, id DESC",
            T::TABLE
        );
        let rows = sqlx::query_as::<_, T>(&sql)
            .bind(owner)
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }
}

#[async_trait]
impl<T: Named> Creatable<String, T> for PgNamedRepo<T> {
    async fn create(&self, owner: Uuid, name: String) -> RepoResult<T> {
        let sql = format!(
            "INSERT INTO {} (user_id, name) VALUES ($1, $2) RETURNING id, user_id, name",
            T::TABLE
        );
        let row = sqlx::query_as::<_, T>(&sql)
            .bind(owner)
            .bind(name)
            .fetch_one(&self.db)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl<T: Named> Retrievable<T> for PgNamedRepo<T> {
    async fn get(&self, owner: Uuid, id: i64) -> RepoResult<Option<T>> {
        let sql = format!(
            "SELECT id, user_id, name FROM {} WHERE id = $1 AND user_id = $2",
            T::TABLE
        );
        let row = sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .bind(owner)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl<T: Named> Updatable<String, T> for PgNamedRepo<T> {
    async fn update(&self, owner: Uuid, id: i64, name: String) -> RepoResult<Option<T>> {
        let sql = format!(
            "UPDATE {} SET name = $3 WHERE id = $1 AND user_id = $2 RETURNING id, user_id, name",
            T::TABLE
        );
        let row = sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .bind(owner)
            .bind(name)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl<T: Named> Deletable<T> for PgNamedRepo<T> {
    async fn delete(&self, owner: Uuid, id: i64) -> RepoResult<Option<T>> {
        let sql = format!(
            "DELETE FROM {} WHERE id = $1 AND user_id = $2 RETURNING id, user_id, name",
            T::TABLE
        );
        let row = sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .bind(owner)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }
}

const RECIPE_COLUMNS: &str = "id, user_id, title, time_minutes, price, link, image, created_at";

#[derive(Clone)]
pub struct PgRecipeRepo {
    db: PgPool,
}

impl PgRecipeRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn hydrate(&self, rows: Vec<RecipeRow>) -> RepoResult<Vec<Recipe>> {
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut tags = load_linked::<Tag>(&self.db, &ids).await?;
        let mut ingredients = load_linked::<Ingredient>(&self.db, &ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let id = row.id;
                Recipe::from_row(
                    row,
                    tags.remove(&id).unwrap_or_default(),
                    ingredients.remove(&id).unwrap_or_default(),
                )
            })
            .collect())
    }

    async fn hydrate_one(&self, row: RecipeRow) -> RepoResult<Recipe> {
        let mut all = self.hydrate(vec![row]).await?;
        all.pop()
            .ok_or_else(|| RepoError::Database(sqlx::Error::RowNotFound))
    }
}

/// Related records per recipe id, each list ordered by id.
async fn load_linked<T: Named>(db: &PgPool, recipe_ids: &[i64]) -> RepoResult<HashMap<i64, Vec<T>>> {
    let mut out: HashMap<i64, Vec<T>> = HashMap::new();
    if recipe_ids.is_empty() {
        return Ok(out);
    }
    let sql = format!(
        r#"
        SELECT l.recipe_id, r.id, r.user_id, r.name
          FROM {link} l
          JOIN {table} r ON r.id = l.{column}
         WHERE l.recipe_id = ANY($1)
         ORDER BY r.id
        "#,
        link = T::LINK_TABLE,
        table = T::TABLE,
        column = T::LINK_COLUMN,
    );
    let rows = sqlx::query_as::<_, (i64, i64, Uuid, String)>(&sql)
        .bind(recipe_ids)
        .fetch_all(db)
        .await?;
    for (recipe_id, id, user_id, name) in rows {
        out.entry(recipe_id)
            .or_default()
            .push(T::from_parts(id, user_id, name));
    }
    Ok(out)
}

/// Replaces the recipe's links to `T`; every id must be owned by `owner`.
async fn replace_links<T: Named>(
    conn: &mut PgConnection,
    owner: Uuid,
    recipe_id: i64,
    ids: &[i64],
) -> RepoResult<()> {
    let ids = unique_ids(ids);
    let owned: Vec<i64> = sqlx::query_scalar(&format!(
        "SELECT id FROM {} WHERE user_id = $1 AND id = ANY($2)",
        T::TABLE
    ))
    .bind(owner)
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let missing: Vec<i64> = ids.iter().copied().filter(|id| !owned.contains(id)).collect();
    if !missing.is_empty() {
        return Err(RepoError::InvalidReference {
            field: T::FIELD,
            ids: missing,
        });
    }

    sqlx::query(&format!("DELETE FROM {} WHERE recipe_id = $1", T::LINK_TABLE))
        .bind(recipe_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(&format!(
        "INSERT INTO {} (recipe_id, {}) SELECT $1, UNNEST($2::BIGINT[])",
        T::LINK_TABLE,
        T::LINK_COLUMN
    ))
    .bind(recipe_id)
    .bind(&ids)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl Listable<Recipe> for PgRecipeRepo {
    async fn list(&self, owner: Uuid) -> RepoResult<Vec<Recipe>> {
        let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE user_id = $1 ORDER BY id DESC");
        let rows = sqlx::query_as::<_, RecipeRow>(&sql)
            .bind(owner)
            .fetch_all(&self.db)
            .await?;
        self.hydrate(rows).await
    }
}

#[async_trait]
impl Creatable<NewRecipe, Recipe> for PgRecipeRepo {
    async fn create(&self, owner: Uuid, new: NewRecipe) -> RepoResult<Recipe> {
        let mut tx = self.db.begin().await?;
        let sql = format!(
            r#"
            INSERT INTO recipes (user_id, title, time_minutes, price, link)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {RECIPE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, RecipeRow>(&sql)
            .bind(owner)
            .bind(&new.title)
            .bind(new.time_minutes)
            .bind(new.price)
            .bind(&new.link)
            .fetch_one(&mut *tx)
            .await?;
        replace_links::<Tag>(&mut tx, owner, row.id, &new.tags).await?;
        replace_links::<Ingredient>(&mut tx, owner, row.id, &new.ingredients).await?;
        tx.commit().await?;

        self.hydrate_one(row).await
    }
}

#[async_trait]
impl Retrievable<Recipe> for PgRecipeRepo {
    async fn get(&self, owner: Uuid, id: i64) -> RepoResult<Option<Recipe>> {
        let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = $1 AND user_id = $2");
        let row = sqlx::query_as::<_, RecipeRow>(&sql)
            .bind(id)
            .bind(owner)
            .fetch_optional(&self.db)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate_one(row).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Updatable<RecipeChanges, Recipe> for PgRecipeRepo {
    async fn update(&self, owner: Uuid, id: i64, changes: RecipeChanges) -> RepoResult<Option<Recipe>> {
        let mut tx = self.db.begin().await?;
        let (link_given, link) = match changes.link {
            Some(link) => (true, link),
            None => (false, None),
        };
        let sql = format!(
            r#"
            UPDATE recipes
               SET title = COALESCE($3, title),
                   time_minutes = COALESCE($4, time_minutes),
                   price = COALESCE($5, price),
                   link = CASE WHEN $6 THEN $7 ELSE link END
             WHERE id = $1 AND user_id = $2
            RETURNING {RECIPE_COLUMNS}
            "#
        );
        let Some(row) = sqlx::query_as::<_, RecipeRow>(&sql)
            .bind(id)
            .bind(owner)
            .bind(changes.title)
            .bind(changes.time_minutes)
            .bind(changes.price)
            .bind(link_given)
            .bind(link)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        if let Some(tags) = &changes.tags {
            replace_links::<Tag>(&mut tx, owner, id, tags).await?;
        }
        if let Some(ingredients) = &changes.ingredients {
            replace_links::<Ingredient>(&mut tx, owner, id, ingredients).await?;
        }
        tx.commit().await?;

        Ok(Some(self.hydrate_one(row).await?))
    }
}

#[async_trait]
impl Deletable<Recipe> for PgRecipeRepo {
    async fn delete(&self, owner: Uuid, id: i64) -> RepoResult<Option<Recipe>> {
        let Some(recipe) = self.get(owner, id).await? else {
            return Ok(None);
        };
        let done = sqlx::query("DELETE FROM recipes WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.db)
            .await?;
        Ok((done.rows_affected() > 0).then_some(recipe))
    }
}

#[async_trait]
impl RecipeRepo for PgRecipeRepo {
    async fn set_image(
        &self,
        owner: Uuid,
        id: i64,
        key: String,
    ) -> RepoResult<Option<(Recipe, Option<String>)>> {
        let mut tx = self.db.begin().await?;
        let previous: Option<(Option<String>,)> =
            sqlx::query_as("SELECT image FROM recipes WHERE id = $1 AND user_id = $2 FOR UPDATE")
                .bind(id)
                .bind(owner)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((previous,)) = previous else {
            return Ok(None);
        };

        let sql = format!("UPDATE recipes SET image = $3 WHERE id = $1 AND user_id = $2 RETURNING {RECIPE_COLUMNS}");
        let row = sqlx::query_as::<_, RecipeRow>(&sql)
            .bind(id)
            .bind(owner)
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some((self.hydrate_one(row).await?, previous)))
    }
}
