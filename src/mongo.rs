use async_trait::async_trait;
use bson::{doc, Document};
use futures::TryStreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{IndexOptions, ReplaceOptions},
    Collection, Database, IndexModel,
};

use crate::error::{Error, Result};
use crate::repository::Repository;
use crate::schemas::Entity;

const DUPLICATE_KEY: i32 = 11000;

/// A [`Repository`] backed by one MongoDB collection, looked up by the `id`
/// field rather than `_id`.
pub struct MongoRepository<T: Entity> {
    collection: Collection<T>,
}

impl<T: Entity> MongoRepository<T> {
    pub fn new(database: &Database) -> Self {
        MongoRepository {
            collection: database.collection::<T>(T::COLLECTION),
        }
    }

    /// Makes `id` unique so duplicate inserts surface as conflicts.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection.create_index(index, None).await?;
        Ok(())
    }

    fn conflict_or_store(&self, err: mongodb::error::Error, id: &str) -> Error {
        let duplicate = matches!(
            *err.kind,
            ErrorKind::Write(WriteFailure::WriteError(ref write)) if write.code == DUPLICATE_KEY
        );
        if duplicate {
            Error::Conflict {
                collection: T::COLLECTION,
                id: id.to_string(),
            }
        } else {
            Error::from(err)
        }
    }
}

fn by_id(id: &str) -> Document {
    doc! { "id": id }
}

#[async_trait]
impl<T: Entity> Repository<T> for MongoRepository<T> {
    async fn insert(&self, entity: &T) -> Result<()> {
        self.collection
            .insert_one(entity, None)
            .await
            .map_err(|err| self.conflict_or_store(err, entity.id()))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.collection.find_one(by_id(id), None).await?)
    }

    async fn list_by(&self, field: &str, value: &str) -> Result<Vec<T>> {
        let mut filter = Document::new();
        filter.insert(field, value);
        let cursor = self.collection.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn replace(&self, entity: &T) -> Result<()> {
        let result = self
            .collection
            .replace_one(by_id(entity.id()), entity, None)
            .await?;
        if result.matched_count == 0 {
            return Err(Error::not_found(T::COLLECTION, entity.id()));
        }
        Ok(())
    }

    async fn replace_if(&self, entity: &T, field: &str, expected: &str) -> Result<bool> {
        let mut filter = by_id(entity.id());
        filter.insert(field, expected);
        let result = self.collection.replace_one(filter, entity, None).await?;
        Ok(result.matched_count == 1)
    }

    async fn add_to_set(&self, id: &str, field: &str, value: &str) -> Result<bool> {
        let mut member = Document::new();
        member.insert(field, value);
        let result = self
            .collection
            .update_one(by_id(id), doc! { "$addToSet": member }, None)
            .await?;
        if result.matched_count == 0 {
            return Err(Error::not_found(T::COLLECTION, id));
        }
        Ok(result.modified_count == 1)
    }

    async fn upsert(&self, entity: &T) -> Result<()> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.collection
            .replace_one(by_id(entity.id()), entity, options)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = self.collection.delete_one(by_id(id), None).await?;
        if result.deleted_count == 0 {
            return Err(Error::not_found(T::COLLECTION, id));
        }
        Ok(())
    }
}
