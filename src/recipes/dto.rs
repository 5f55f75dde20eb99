use std::borrow::Cow;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::recipes::repo_types::{Named, NewRecipe, Recipe, RecipeChanges};

fn max_price() -> Decimal {
    Decimal::new(99_999, 2)
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message(Cow::Borrowed("This field may not be blank.")));
    }
    Ok(())
}

fn valid_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.normalize().scale() > 2 {
        return Err(ValidationError::new("decimal_places")
            .with_message(Cow::Borrowed("Ensure that there are no more than 2 decimal places.")));
    }
    if price.is_sign_negative() || *price > max_price() {
        return Err(ValidationError::new("range")
            .with_message(Cow::Borrowed("Ensure this value is between 0.00 and 999.99.")));
    }
    Ok(())
}

fn money(price: Decimal) -> Decimal {
    let mut price = price.normalize();
    price.rescale(2);
    price
}

fn clean_link(link: Option<String>) -> Option<String> {
    link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty())
}

/// Body for tag/ingredient create and full update.
#[derive(Debug, Deserialize, Validate)]
pub struct NamedRequest {
    #[validate(
        length(min = 1, max = 255, message = "Ensure this field has between 1 and 255 characters."),
        custom(function = "not_blank")
    )]
    pub name: String,
}

/// Body for tag/ingredient partial update.
#[derive(Debug, Deserialize, Validate)]
pub struct NamedPatchRequest {
    #[validate(
        length(min = 1, max = 255, message = "Ensure this field has between 1 and 255 characters."),
        custom(function = "not_blank")
    )]
    pub name: Option<String>,
}

/// Body for recipe create and full update (PUT). Omitted relation lists mean "none".
#[derive(Debug, Deserialize, Validate)]
pub struct RecipeRequest {
    #[validate(
        length(min = 1, max = 255, message = "Ensure this field has between 1 and 255 characters."),
        custom(function = "not_blank")
    )]
    pub title: String,
    #[validate(range(min = 0, message = "Ensure this value is greater than or equal to 0."))]
    pub time_minutes: i32,
    #[validate(custom(function = "valid_price"))]
    pub price: Decimal,
    #[validate(length(max = 255, message = "Ensure this field has no more than 255 characters."))]
    pub link: Option<String>,
    #[serde(default)]
    pub tags: Vec<i64>,
    #[serde(default)]
    pub ingredients: Vec<i64>,
}

impl RecipeRequest {
    pub fn into_new(self) -> NewRecipe {
        NewRecipe {
            title: self.title.trim().to_string(),
            time_minutes: self.time_minutes,
            price: money(self.price),
            link: clean_link(self.link),
            tags: self.tags,
            ingredients: self.ingredients,
        }
    }

    /// Every field is replaced, including clearing the link and relation sets.
    pub fn into_replacement(self) -> RecipeChanges {
        let new = self.into_new();
        RecipeChanges {
            title: Some(new.title),
            time_minutes: Some(new.time_minutes),
            price: Some(new.price),
            link: Some(new.link),
            tags: Some(new.tags),
            ingredients: Some(new.ingredients),
        }
    }
}

/// Body for recipe PATCH. An empty `link` clears it.
#[derive(Debug, Deserialize, Validate)]
pub struct RecipePatchRequest {
    #[validate(
        length(min = 1, max = 255, message = "Ensure this field has between 1 and 255 characters."),
        custom(function = "not_blank")
    )]
    pub title: Option<String>,
    #[validate(range(min = 0, message = "Ensure this value is greater than or equal to 0."))]
    pub time_minutes: Option<i32>,
    #[validate(custom(function = "valid_price"))]
    pub price: Option<Decimal>,
    #[validate(length(max = 255, message = "Ensure this field has no more than 255 characters."))]
    pub link: Option<String>,
    pub tags: Option<Vec<i64>>,
    pub ingredients: Option<Vec<i64>>,
}

impl From<RecipePatchRequest> for RecipeChanges {
    fn from(p: RecipePatchRequest) -> Self {
        RecipeChanges {
            title: p.title.map(|t| t.trim().to_string()),
            time_minutes: p.time_minutes,
            price: p.price.map(money),
            link: p.link.map(|l| clean_link(Some(l))),
            tags: p.tags,
            ingredients: p.ingredients,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NamedView {
    pub id: i64,
    pub name: String,
}

impl NamedView {
    pub fn of<T: Named>(row: &T) -> Self {
        Self {
            id: row.id(),
            name: row.name().to_string(),
        }
    }
}

/// List/write representation: relations as bare ids.
#[derive(Debug, Serialize)]
pub struct RecipeView {
    pub id: i64,
    pub title: String,
    pub ingredients: Vec<i64>,
    pub tags: Vec<i64>,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: Option<String>,
    pub image: Option<String>,
}

impl From<&Recipe> for RecipeView {
    fn from(r: &Recipe) -> Self {
        Self {
            id: r.id,
            title: r.title.clone(),
            ingredients: r.ingredients.iter().map(|i| i.id).collect(),
            tags: r.tags.iter().map(|t| t.id).collect(),
            time_minutes: r.time_minutes,
            price: r.price,
            link: r.link.clone(),
            image: r.image.clone(),
        }
    }
}

/// Detail representation: relations expanded to `{id, name}`.
#[derive(Debug, Serialize)]
pub struct RecipeDetailView {
    pub id: i64,
    pub title: String,
    pub ingredients: Vec<NamedView>,
    pub tags: Vec<NamedView>,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: Option<String>,
    pub image: Option<String>,
}

impl From<&Recipe> for RecipeDetailView {
    fn from(r: &Recipe) -> Self {
        Self {
            id: r.id,
            title: r.title.clone(),
            ingredients: r.ingredients.iter().map(NamedView::of).collect(),
            tags: r.tags.iter().map(NamedView::of).collect(),
            time_minutes: r.time_minutes,
            price: r.price,
            link: r.link.clone(),
            image: r.image.clone(),
        }
    }
}
