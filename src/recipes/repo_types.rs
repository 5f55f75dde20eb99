use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

/// Owned, name-only resource attached to recipes (tags and ingredients).
pub trait Named: Clone + Send + Sync + Unpin + 'static + for<'r> FromRow<'r, PgRow> {
    /// Table holding the records.
    const TABLE: &'static str;
    /// Join table linking records to recipes.
    const LINK_TABLE: &'static str;
    /// Column in `LINK_TABLE` referencing `TABLE`.
    const LINK_COLUMN: &'static str;
    /// Recipe payload field that references this resource.
    const FIELD: &'static str;
    /// Human readable resource name for error messages.
    const RESOURCE: &'static str;

    fn from_parts(id: i64, user_id: Uuid, name: String) -> Self;
    fn id(&self) -> i64;
    fn user_id(&self) -> Uuid;
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Tag {
    pub id: i64,
    pub user_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Ingredient {
    pub id: i64,
    pub user_id: Uuid,
    pub name: String,
}

macro_rules! impl_named {
    ($ty:ty, table = $table:literal, link = $link:literal, column = $column:literal, field = $field:literal, resource = $resource:literal) => {
        impl Named for $ty {
            const TABLE: &'static str = $table;
            const LINK_TABLE: &'static str = $link;
            const LINK_COLUMN: &'static str = $column;
            const FIELD: &'static str = $field;
            const RESOURCE: &'static str = $resource;

            fn from_parts(id: i64, user_id: Uuid, name: String) -> Self {
                Self { id, user_id, name }
            }
            fn id(&self) -> i64 {
                self.id
            }
            fn user_id(&self) -> Uuid {
                self.user_id
            }
            fn name(&self) -> &str {
                &self.name
            }
        }
    };
}

impl_named!(Tag, table = "tags", link = "recipe_tags", column = "tag_id", field = "tags", resource = "tag");
impl_named!(
    Ingredient,
    table = "ingredients",
    link = "recipe_ingredients",
    column = "ingredient_id",
    field = "ingredients",
    resource = "ingredient"
);

/// `recipes` row without its relations.
#[derive(Debug, Clone, FromRow)]
pub struct RecipeRow {
    pub id: i64,
    pub user_id: Uuid,
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: Option<String>,
    pub image: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Recipe with its tag and ingredient sets loaded, each ordered by id.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub id: i64,
    pub user_id: Uuid,
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: Option<String>,
    pub image: Option<String>,
    pub created_at: OffsetDateTime,
    pub tags: Vec<Tag>,
    pub ingredients: Vec<Ingredient>,
}

impl Recipe {
    pub fn from_row(row: RecipeRow, tags: Vec<Tag>, ingredients: Vec<Ingredient>) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            time_minutes: row.time_minutes,
            price: row.price,
            link: row.link,
            image: row.image,
            created_at: row.created_at,
            tags,
            ingredients,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub title: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: Option<String>,
    pub tags: Vec<i64>,
    pub ingredients: Vec<i64>,
}

/// Field-level changes; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct RecipeChanges {
    pub title: Option<String>,
    pub time_minutes: Option<i32>,
    pub price: Option<Decimal>,
    pub link: Option<Option<String>>,
    pub tags: Option<Vec<i64>>,
    pub ingredients: Option<Vec<i64>>,
}

/// Sorted, duplicate-free copy of a reference list.
pub fn unique_ids(ids: &[i64]) -> Vec<i64> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}
