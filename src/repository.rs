use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::schemas::Entity;

/// CRUD over one collection of `T`.
///
/// `list_by` matches documents whose `field` equals `value`, or, when the
/// field is an array, contains it. This mirrors document-store equality
/// queries so both implementations answer the same way.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn insert(&self, entity: &T) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<T>>;

    async fn list_by(&self, field: &str, value: &str) -> Result<Vec<T>>;

    /// Replaces the stored document with the same id.
    async fn replace(&self, entity: &T) -> Result<()>;

    /// Replaces the stored document only while its `field` still equals
    /// `expected`. Returns `false`, writing nothing, once it does not.
    async fn replace_if(&self, entity: &T, field: &str, expected: &str) -> Result<bool>;

    /// Adds `value` to the array `field` of document `id` unless it is
    /// already there. Returns whether it was added.
    async fn add_to_set(&self, id: &str, field: &str, value: &str) -> Result<bool>;

    /// Inserts or replaces.
    async fn upsert(&self, entity: &T) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn fetch(&self, id: &str) -> Result<T> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::not_found(T::COLLECTION, id))
    }
}

pub type SharedRepository<T> = Arc<dyn Repository<T>>;

/// Keeps documents as JSON values keyed by id.
pub struct InMemoryRepository<T> {
    documents: RwLock<BTreeMap<String, Value>>,
    _entity: std::marker::PhantomData<fn() -> T>,
}

impl<T> Default for InMemoryRepository<T> {
    fn default() -> Self {
        InMemoryRepository {
            documents: RwLock::new(BTreeMap::new()),
            _entity: std::marker::PhantomData,
        }
    }
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

fn field_matches(document: &Value, field: &str, value: &str) -> bool {
    match document.get(field) {
        Some(Value::String(s)) => s == value,
        Some(Value::Array(items)) => items.iter().any(|item| item.as_str() == Some(value)),
        _ => false,
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn insert(&self, entity: &T) -> Result<()> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(entity.id()) {
            return Err(Error::Conflict {
                collection: T::COLLECTION,
                id: entity.id().to_string(),
            });
        }
        documents.insert(entity.id().to_string(), serde_json::to_value(entity)?);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        let documents = self.documents.read().await;
        documents
            .get(id)
            .map(|document| serde_json::from_value(document.clone()))
            .transpose()
            .map_err(Error::from)
    }

    async fn list_by(&self, field: &str, value: &str) -> Result<Vec<T>> {
        let documents = self.documents.read().await;
        documents
            .values()
            .filter(|document| field_matches(document, field, value))
            .map(|document| serde_json::from_value(document.clone()).map_err(Error::from))
            .collect()
    }

    async fn replace(&self, entity: &T) -> Result<()> {
        let mut documents = self.documents.write().await;
        match documents.get_mut(entity.id()) {
            Some(document) => {
                *document = serde_json::to_value(entity)?;
                Ok(())
            }
            None => Err(Error::not_found(T::COLLECTION, entity.id())),
        }
    }

    async fn replace_if(&self, entity: &T, field: &str, expected: &str) -> Result<bool> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(entity.id())
            .ok_or_else(|| Error::not_found(T::COLLECTION, entity.id()))?;
        if document.get(field).and_then(Value::as_str) != Some(expected) {
            return Ok(false);
        }
        *document = serde_json::to_value(entity)?;
        Ok(true)
    }

    async fn add_to_set(&self, id: &str, field: &str, value: &str) -> Result<bool> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(id)
            .ok_or_else(|| Error::not_found(T::COLLECTION, id))?;
        match document.get_mut(field) {
            Some(Value::Array(items)) => {
                if items.iter().any(|item| item.as_str() == Some(value)) {
                    return Ok(false);
                }
                items.push(Value::String(value.to_string()));
                Ok(true)
            }
            _ => Err(Error::Store(format!(
                "{}.{} is not an array",
                T::COLLECTION,
                field
            ))),
        }
    }

    async fn upsert(&self, entity: &T) -> Result<()> {
        let document = serde_json::to_value(entity)?;
        self.documents
            .write()
            .await
            .insert(entity.id().to_string(), document);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.documents.write().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(Error::not_found(T::COLLECTION, id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{Group, User};

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            email: None,
            photo_url: None,
        }
    }

    #[tokio::test]
    async fn insert_then_get() {
        let repo = InMemoryRepository::<User>::new();
        repo.insert(&user("alice")).await.unwrap();
        assert_eq!(repo.get("alice").await.unwrap(), Some(user("alice")));
        assert_eq!(repo.get("bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let repo = InMemoryRepository::<User>::new();
        repo.insert(&user("alice")).await.unwrap();
        let err = repo.insert(&user("alice")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { collection: "users", .. }));
    }

    #[tokio::test]
    async fn fetch_reports_missing_documents() {
        let repo = InMemoryRepository::<User>::new();
        let err = repo.fetch("ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { collection: "users", .. }));
    }

    #[tokio::test]
    async fn list_by_matches_array_membership() {
        let repo = InMemoryRepository::<Group>::new();
        let flat = Group::new("Flat".into(), "alice".into(), vec!["bob".into()]).unwrap();
        let trip = Group::new("Trip".into(), "carol".into(), vec!["bob".into()]).unwrap();
        repo.insert(&flat).await.unwrap();
        repo.insert(&trip).await.unwrap();

        assert_eq!(repo.list_by("members", "bob").await.unwrap().len(), 2);
        assert_eq!(repo.list_by("members", "alice").await.unwrap(), vec![flat]);
        assert_eq!(repo.list_by("owner", "carol").await.unwrap(), vec![trip]);
        assert!(repo.list_by("members", "dave").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_requires_existing_document() {
        let repo = InMemoryRepository::<User>::new();
        assert!(repo.replace(&user("alice")).await.is_err());
        repo.upsert(&user("alice")).await.unwrap();

        let mut renamed = user("alice");
        renamed.display_name = "Alice L.".to_string();
        repo.replace(&renamed).await.unwrap();
        assert_eq!(repo.fetch("alice").await.unwrap().display_name, "Alice L.");
    }

    #[tokio::test]
    async fn replace_if_checks_the_stored_field() {
        let repo = InMemoryRepository::<User>::new();
        repo.insert(&user("alice")).await.unwrap();

        let mut renamed = user("alice");
        renamed.display_name = "Alice L.".to_string();
        assert!(!repo.replace_if(&renamed, "display_name", "Al").await.unwrap());
        assert_eq!(repo.fetch("alice").await.unwrap().display_name, "ALICE");

        assert!(repo.replace_if(&renamed, "display_name", "ALICE").await.unwrap());
        assert_eq!(repo.fetch("alice").await.unwrap().display_name, "Alice L.");
        assert!(repo.replace_if(&user("bob"), "display_name", "BOB").await.is_err());
    }

    #[tokio::test]
    async fn add_to_set_keeps_members_unique() {
        let repo = InMemoryRepository::<Group>::new();
        let flat = Group::new("Flat".into(), "alice".into(), Vec::new()).unwrap();
        repo.insert(&flat).await.unwrap();

        assert!(repo.add_to_set(&flat.id, "members", "bob").await.unwrap());
        assert!(!repo.add_to_set(&flat.id, "members", "bob").await.unwrap());
        assert!(!repo.add_to_set(&flat.id, "members", "alice").await.unwrap());
        let stored = repo.fetch(&flat.id).await.unwrap();
        assert_eq!(stored.members.len(), 2);
        assert!(stored.is_member("bob"));

        assert!(repo.add_to_set(&flat.id, "name", "x").await.is_err());
        assert!(repo.add_to_set("ghost", "members", "bob").await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_the_document() {
        let repo = InMemoryRepository::<User>::new();
        repo.insert(&user("alice")).await.unwrap();
        repo.delete("alice").await.unwrap();
        assert!(repo.is_empty().await);
        assert!(repo.delete("alice").await.is_err());
    }
}
