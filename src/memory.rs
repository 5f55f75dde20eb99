//! In-memory repositories with the same ownership semantics as the Postgres ones.

use std::{
    marker::PhantomData,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{
        repo::UserRepo,
        repo_types::{NewUser, User, UserChanges},
    },
    error::{RepoError, RepoResult},
    recipes::{
        repo::{Creatable, Deletable, Listable, RecipeRepo, Retrievable, Updatable},
        repo_types::{unique_ids, Ingredient, Named, NewRecipe, Recipe, RecipeChanges, RecipeRow, Tag},
    },
};

#[derive(Default)]
pub struct Tables {
    users: Vec<User>,
    tags: Vec<Tag>,
    ingredients: Vec<Ingredient>,
    recipes: Vec<RecipeRow>,
    recipe_tags: Vec<(i64, i64)>,
    recipe_ingredients: Vec<(i64, i64)>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn recipe(&self, row: &RecipeRow) -> Recipe {
        Recipe::from_row(row.clone(), linked::<Tag>(self, row.id), linked::<Ingredient>(self, row.id))
    }
}

/// Table access for the in-memory backend.
pub trait MemTable: Named {
    fn rows(t: &Tables) -> &Vec<Self>;
    fn rows_mut(t: &mut Tables) -> &mut Vec<Self>;
    fn links(t: &Tables) -> &Vec<(i64, i64)>;
    fn links_mut(t: &mut Tables) -> &mut Vec<(i64, i64)>;
}

impl MemTable for Tag {
    fn rows(t: &Tables) -> &Vec<Self> {
        &t.tags
    }
    fn rows_mut(t: &mut Tables) -> &mut Vec<Self> {
        &mut t.tags
    }
    fn links(t: &Tables) -> &Vec<(i64, i64)> {
        &t.recipe_tags
    }
    fn links_mut(t: &mut Tables) -> &mut Vec<(i64, i64)> {
        &mut t.recipe_tags
    }
}

impl MemTable for Ingredient {
    fn rows(t: &Tables) -> &Vec<Self> {
        &t.ingredients
    }
    fn rows_mut(t: &mut Tables) -> &mut Vec<Self> {
        &mut t.ingredients
    }
    fn links(t: &Tables) -> &Vec<(i64, i64)> {
        &t.recipe_ingredients
    }
    fn links_mut(t: &mut Tables) -> &mut Vec<(i64, i64)> {
        &mut t.recipe_ingredients
    }
}

fn linked<T: MemTable>(t: &Tables, recipe_id: i64) -> Vec<T> {
    let mut out: Vec<T> = T::links(t)
        .iter()
        .filter(|(r, _)| *r == recipe_id)
        .filter_map(|(_, id)| T::rows(t).iter().find(|row| row.id() == *id).cloned())
        .collect();
    out.sort_by_key(|row| row.id());
    out
}

fn check_owned<T: MemTable>(t: &Tables, owner: Uuid, ids: &[i64]) -> RepoResult<Vec<i64>> {
    let ids = unique_ids(ids);
    let missing: Vec<i64> = ids
        .iter()
        .copied()
        .filter(|id| !T::rows(t).iter().any(|row| row.id() == *id && row.user_id() == owner))
        .collect();
    if missing.is_empty() {
        Ok(ids)
    } else {
        Err(RepoError::InvalidReference { field: T::FIELD, ids: missing })
    }
}

fn set_links<T: MemTable>(t: &mut Tables, recipe_id: i64, ids: Vec<i64>) {
    let links = T::links_mut(t);
    links.retain(|(r, _)| *r != recipe_id);
    links.extend(ids.into_iter().map(|id| (recipe_id, id)));
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn named<T>(&self) -> MemoryNamedRepo<T> {
        MemoryNamedRepo {
            store: self.clone(),
            _kind: PhantomData,
        }
    }

    pub fn recipes(&self) -> MemoryRecipeRepo {
        MemoryRecipeRepo { store: self.clone() }
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn row_count<T: MemTable>(&self) -> usize {
        T::rows(&self.lock()).len()
    }

    pub fn recipe_count(&self) -> usize {
        self.lock().recipes.len()
    }

    /// Removes a user and everything they own.
    pub fn delete_user(&self, id: Uuid) {
        let mut t = self.lock();
        t.users.retain(|u| u.id != id);
        let doomed: Vec<i64> = t.recipes.iter().filter(|r| r.user_id == id).map(|r| r.id).collect();
        t.recipes.retain(|r| r.user_id != id);
        let tag_ids: Vec<i64> = t.tags.iter().filter(|r| r.user_id == id).map(|r| r.id).collect();
        let ingredient_ids: Vec<i64> = t.ingredients.iter().filter(|r| r.user_id == id).map(|r| r.id).collect();
        t.tags.retain(|r| r.user_id != id);
        t.ingredients.retain(|r| r.user_id != id);
        t.recipe_tags
            .retain(|(r, tag)| !doomed.contains(r) && !tag_ids.contains(tag));
        t.recipe_ingredients
            .retain(|(r, ing)| !doomed.contains(r) && !ingredient_ids.contains(ing));
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn insert(&self, new: NewUser) -> RepoResult<User> {
        let mut t = self.lock();
        if t.users.iter().any(|u| u.email == new.email) {
            return Err(RepoError::Duplicate("email"));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            is_active: true,
            is_staff: new.is_staff,
            is_superuser: new.is_superuser,
            created_at: OffsetDateTime::now_utc(),
        };
        t.users.push(user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        Ok(self.lock().users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.lock().users.iter().find(|u| u.id == id).cloned())
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> RepoResult<Option<User>> {
        let mut t = self.lock();
        let Some(user) = t.users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        Ok(Some(user.clone()))
    }
}

pub struct MemoryNamedRepo<T> {
    store: MemoryStore,
    _kind: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T: MemTable> Listable<T> for MemoryNamedRepo<T> {
    async fn list(&self, owner: Uuid) -> RepoResult<Vec<T>> {
        let t = self.store.lock();
        let mut rows: Vec<T> = T::rows(&t).iter().filter(|r| r.user_id() == owner).cloned().collect();
        rows.sort_by(|a, b| b.name().cmp(a.name()).then(b.id().cmp(&a.id())));
        Ok(rows)
    }
}

#[async_trait]
impl<T: MemTable> Creatable<String, T> for MemoryNamedRepo<T> {
    async fn create(&self, owner: Uuid, name: String) -> RepoResult<T> {
        let mut t = self.store.lock();
        let row = T::from_parts(t.next_id(), owner, name);
        T::rows_mut(&mut t).push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl<T: MemTable> Retrievable<T> for MemoryNamedRepo<T> {
    async fn get(&self, owner: Uuid, id: i64) -> RepoResult<Option<T>> {
        let t = self.store.lock();
        Ok(T::rows(&t).iter().find(|r| r.id() == id && r.user_id() == owner).cloned())
    }
}

#[async_trait]
impl<T: MemTable> Updatable<String, T> for MemoryNamedRepo<T> {
    async fn update(&self, owner: Uuid, id: i64, name: String) -> RepoResult<Option<T>> {
        let mut t = self.store.lock();
        let rows = T::rows_mut(&mut t);
        let Some(slot) = rows.iter_mut().find(|r| r.id() == id && r.user_id() == owner) else {
            return Ok(None);
        };
        *slot = T::from_parts(id, owner, name);
        Ok(Some(slot.clone()))
    }
}

#[async_trait]
impl<T: MemTable> Deletable<T> for MemoryNamedRepo<T> {
    async fn delete(&self, owner: Uuid, id: i64) -> RepoResult<Option<T>> {
        let mut t = self.store.lock();
        let rows = T::rows_mut(&mut t);
        let Some(pos) = rows.iter().position(|r| r.id() == id && r.user_id() == owner) else {
            return Ok(None);
        };
        let removed = rows.remove(pos);
        T::links_mut(&mut t).retain(|(_, linked)| *linked != id);
        Ok(Some(removed))
    }
}

pub struct MemoryRecipeRepo {
    store: MemoryStore,
}

#[async_trait]
impl Listable<Recipe> for MemoryRecipeRepo {
    async fn list(&self, owner: Uuid) -> RepoResult<Vec<Recipe>> {
        let t = self.store.lock();
        let mut rows: Vec<&RecipeRow> = t.recipes.iter().filter(|r| r.user_id == owner).collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows.into_iter().map(|row| t.recipe(row)).collect())
    }
}

#[async_trait]
impl Creatable<NewRecipe, Recipe> for MemoryRecipeRepo {
    async fn create(&self, owner: Uuid, new: NewRecipe) -> RepoResult<Recipe> {
        let mut t = self.store.lock();
        let tags = check_owned::<Tag>(&t, owner, &new.tags)?;
        let ingredients = check_owned::<Ingredient>(&t, owner, &new.ingredients)?;
        let row = RecipeRow {
            id: t.next_id(),
            user_id: owner,
            title: new.title,
            time_minutes: new.time_minutes,
            price: new.price,
            link: new.link,
            image: None,
            created_at: OffsetDateTime::now_utc(),
        };
        set_links::<Tag>(&mut t, row.id, tags);
        set_links::<Ingredient>(&mut t, row.id, ingredients);
        t.recipes.push(row.clone());
        Ok(t.recipe(&row))
    }
}

#[async_trait]
impl Retrievable<Recipe> for MemoryRecipeRepo {
    async fn get(&self, owner: Uuid, id: i64) -> RepoResult<Option<Recipe>> {
        let t = self.store.lock();
        Ok(t.recipes
            .iter()
            .find(|r| r.id == id && r.user_id == owner)
            .map(|row| t.recipe(row)))
    }
}

#[async_trait]
impl Updatable<RecipeChanges, Recipe> for MemoryRecipeRepo {
    async fn update(&self, owner: Uuid, id: i64, changes: RecipeChanges) -> RepoResult<Option<Recipe>> {
        let mut t = self.store.lock();
        if !t.recipes.iter().any(|r| r.id == id && r.user_id == owner) {
            return Ok(None);
        }
        // Validate references before touching anything so a failure changes nothing.
        let tags = changes.tags.as_deref().map(|ids| check_owned::<Tag>(&t, owner, ids)).transpose()?;
        let ingredients = changes
            .ingredients
            .as_deref()
            .map(|ids| check_owned::<Ingredient>(&t, owner, ids))
            .transpose()?;

        let Some(row) = t.recipes.iter_mut().find(|r| r.id == id && r.user_id == owner) else {
            return Ok(None);
        };
        if let Some(title) = changes.title {
            row.title = title;
        }
        if let Some(minutes) = changes.time_minutes {
            row.time_minutes = minutes;
        }
        if let Some(price) = changes.price {
            row.price = price;
        }
        if let Some(link) = changes.link {
            row.link = link;
        }
        let row = row.clone();
        if let Some(tags) = tags {
            set_links::<Tag>(&mut t, id, tags);
        }
        if let Some(ingredients) = ingredients {
            set_links::<Ingredient>(&mut t, id, ingredients);
        }
        Ok(Some(t.recipe(&row)))
    }
}

#[async_trait]
impl Deletable<Recipe> for MemoryRecipeRepo {
    async fn delete(&self, owner: Uuid, id: i64) -> RepoResult<Option<Recipe>> {
        let mut t = self.store.lock();
        let Some(pos) = t.recipes.iter().position(|r| r.id == id && r.user_id == owner) else {
            return Ok(None);
        };
        let row = t.recipes[pos].clone();
        let recipe = t.recipe(&row);
        t.recipes.remove(pos);
        t.recipe_tags.retain(|(r, _)| *r != id);
        t.recipe_ingredients.retain(|(r, _)| *r != id);
        Ok(Some(recipe))
    }
}

#[async_trait]
impl RecipeRepo for MemoryRecipeRepo {
    async fn set_image(
        &self,
        owner: Uuid,
        id: i64,
        key: String,
    ) -> RepoResult<Option<(Recipe, Option<String>)>> {
        let mut t = self.store.lock();
        let Some(row) = t.recipes.iter_mut().find(|r| r.id == id && r.user_id == owner) else {
            return Ok(None);
        };
        let previous = row.image.replace(key);
        let row = row.clone();
        Ok(Some((t.recipe(&row), previous)))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn new_recipe(title: &str, tags: Vec<i64>, ingredients: Vec<i64>) -> NewRecipe {
        NewRecipe {
            title: title.into(),
            time_minutes: 10,
            price: Decimal::new(500, 2),
            link: None,
            tags,
            ingredients,
        }
    }

    #[tokio::test]
    async fn named_rows_are_scoped_and_ordered() {
        let store = MemoryStore::default();
        let tags = store.named::<Tag>();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        tags.create(alice, "Vegan".into()).await.unwrap();
        tags.create(alice, "Dessert".into()).await.unwrap();
        let bobs = tags.create(bob, "Fruity".into()).await.unwrap();

        let names: Vec<String> = tags.list(alice).await.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["Vegan", "Dessert"]);
        assert!(tags.get(alice, bobs.id).await.unwrap().is_none());
        assert!(tags.update(alice, bobs.id, "Mine".into()).await.unwrap().is_none());
        assert!(tags.delete(alice, bobs.id).await.unwrap().is_none());
        assert_eq!(tags.get(bob, bobs.id).await.unwrap().unwrap().name, "Fruity");
    }

    #[tokio::test]
    async fn recipe_rejects_foreign_references_without_writing() {
        let store = MemoryStore::default();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let foreign = store.named::<Tag>().create(bob, "Bob's".into()).await.unwrap();

        let err = store
            .recipes()
            .create(alice, new_recipe("Soup", vec![foreign.id], vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidReference { field: "tags", .. }));
        assert_eq!(store.recipe_count(), 0);
    }

    #[tokio::test]
    async fn deleting_a_tag_unlinks_it() {
        let store = MemoryStore::default();
        let owner = Uuid::new_v4();
        let tag = store.named::<Tag>().create(owner, "Quick".into()).await.unwrap();
        let recipe = store.recipes().create(owner, new_recipe("Toast", vec![tag.id], vec![])).await.unwrap();
        assert_eq!(recipe.tags.len(), 1);

        store.named::<Tag>().delete(owner, tag.id).await.unwrap();
        let recipe = store.recipes().get(owner, recipe.id).await.unwrap().unwrap();
        assert!(recipe.tags.is_empty());
    }

    #[tokio::test]
    async fn deleting_a_user_cascades() {
        let store = MemoryStore::default();
        let user = store
            .insert(NewUser {
                email: "cook@example.com".into(),
                name: String::new(),
                password_hash: "x".into(),
                is_staff: false,
                is_superuser: false,
            })
            .await
            .unwrap();
        let tag = store.named::<Tag>().create(user.id, "Quick".into()).await.unwrap();
        store.named::<Ingredient>().create(user.id, "Salt".into()).await.unwrap();
        store.recipes().create(user.id, new_recipe("Toast", vec![tag.id], vec![])).await.unwrap();

        store.delete_user(user.id);
        assert_eq!(store.user_count(), 0);
        assert_eq!(store.row_count::<Tag>(), 0);
        assert_eq!(store.row_count::<Ingredient>(), 0);
        assert_eq!(store.recipe_count(), 0);
    }

    #[tokio::test]
    async fn set_image_returns_previous_key() {
        let store = MemoryStore::default();
        let owner = Uuid::new_v4();
        let recipe = store.recipes().create(owner, new_recipe("Toast", vec![], vec![])).await.unwrap();

        let (_, previous) = store.recipes().set_image(owner, recipe.id, "a.png".into()).await.unwrap().unwrap();
        assert_eq!(previous, None);
        let (updated, previous) = store.recipes().set_image(owner, recipe.id, "b.png".into()).await.unwrap().unwrap();
        assert_eq!(previous.as_deref(), Some("a.png"));
        assert_eq!(updated.image.as_deref(), Some("b.png"));
        assert!(store.recipes().set_image(Uuid::new_v4(), recipe.id, "c.png".into()).await.unwrap().is_none());
    }
}
