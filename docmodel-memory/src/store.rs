//! In-memory storage implementation for document stores.
//!
//! This module provides a simple in-memory backend that keeps documents in
//! insertion-ordered maps behind an async-aware read-write lock.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use futures::{StreamExt, stream};
use indexmap::IndexMap;
use mea::rwlock::RwLock;
use tracing::trace;

use docmodel_core::{
    backend::{DocumentStream, FindOptions, StoreBackend, StoreBackendBuilder, WriteAck},
    criteria::{Expr, SortDirection},
    error::{DocumentStoreError, DocumentStoreResult},
    value::{as_f64, assign, id_key, is_truthy, lookup, remove_path},
};

use crate::evaluator::{Comparable, DocumentEvaluator};

type CollectionMap = IndexMap<String, Document>;
type StoreMap = HashMap<String, CollectionMap>;

/// Thread-safe in-memory document storage backend.
///
/// Documents are kept per collection in insertion order, keyed by their `_id`.
/// Criteria are evaluated by scanning every document of the collection.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::{FindOptions, StoreBackend};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// store.insert("users", vec![doc! { "name": "Alice", "age": 30 }]).await?;
///
/// let found = store.find("users", doc! { "age": { "$gt": 18 } }, FindOptions::default()).await?;
/// assert_eq!(found.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection_name -> (id key -> document)
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder
    }

    /// Names of every collection that has received a write.
    pub async fn collections(&self) -> Vec<String> {
        let mut names = self.store.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    async fn select(&self, collection: &str, criteria: &Document, options: &FindOptions) -> DocumentStoreResult<Vec<Document>> {
        let expr = Expr::parse(criteria)?;
        let store = self.store.read().await;
        let Some(collection_map) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut matched = DocumentEvaluator::filter_documents(collection_map.values(), &expr)?;

        if let Some(sort) = &options.sort {
            let keys = sort.keys();
            matched.sort_by(|a, b| {
                for (field, direction) in &keys {
                    let left = lookup(a, field).map_or(Comparable::Null, Comparable::from);
                    let right = lookup(b, field).map_or(Comparable::Null, Comparable::from);

                    let ordering = match direction {
                        SortDirection::Asc => left.sort_cmp(&right),
                        SortDirection::Desc => right.sort_cmp(&left),
                    };
                    if ordering.is_ne() {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let skip = options.skip.unwrap_or(0) as usize;
        let take = options.effective_limit().map_or(usize::MAX, |limit| limit as usize);

        Ok(matched
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|doc| project(doc, options.projection.as_ref()))
            .collect())
    }

    /// Keys of the documents matching `criteria`, in insertion order.
    fn matching_keys(collection_map: &CollectionMap, criteria: &Document, first_only: bool) -> DocumentStoreResult<Vec<String>> {
        let expr = Expr::parse(criteria)?;
        let mut keys = Vec::new();

        for (key, doc) in collection_map {
            if DocumentEvaluator::new(doc).evaluate(&expr)? {
                keys.push(key.clone());
                if first_only {
                    break;
                }
            }
        }

        Ok(keys)
    }
}

fn project(doc: &Document, projection: Option<&Document>) -> Document {
    let Some(projection) = projection.filter(|p| !p.is_empty()) else {
        return doc.clone();
    };

    let mut out = Document::new();
    if let Some(id) = doc.get("_id") {
        out.insert("_id", id.clone());
    }
    for (field, included) in projection {
        if is_truthy(included)
            && let Some(value) = lookup(doc, field)
        {
            assign(&mut out, field, value.clone());
        }
    }
    out
}

fn ensure_id(doc: &mut Document) -> String {
    if !doc.get("_id").is_some_and(is_truthy) {
        doc.insert("_id", ObjectId::new());
    }
    doc.get("_id").map(id_key).unwrap_or_default()
}

fn apply_update(doc: &mut Document, update: &Document) -> DocumentStoreResult<()> {
    if !update.keys().any(|k| k.starts_with('$')) {
        let id = doc.get("_id").cloned();
        *doc = update.clone();
        if let Some(id) = id {
            doc.insert("_id", id);
        }
        return Ok(());
    }

    let id = doc.get("_id").cloned();

    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(DocumentStoreError::InvalidQuery(format!(
                "{operator} expects a document"
            )));
        };

        match operator.as_str() {
            "$set" => {
                for (path, value) in fields {
                    assign(doc, path, value.clone());
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    remove_path(doc, path);
                }
            }
            "$inc" => {
                for (path, by) in fields {
                    let current = lookup(doc, path).cloned().unwrap_or(Bson::Int32(0));
                    assign(doc, path, increment(&current, by, path)?);
                }
            }
            _ => {
                return Err(DocumentStoreError::InvalidQuery(format!(
                    "unsupported update operator {operator}"
                )));
            }
        }
    }

    if doc.get("_id") != id.as_ref() {
        return Err(DocumentStoreError::InvalidQuery(
            "the _id field is immutable".to_string(),
        ));
    }

    Ok(())
}

fn increment(current: &Bson, by: &Bson, path: &str) -> DocumentStoreResult<Bson> {
    Ok(match (current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => Bson::Int32(a.wrapping_add(*b)),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.wrapping_add(i64::from(*b))),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).wrapping_add(*b)),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.wrapping_add(*b)),
        _ => match (as_f64(current), as_f64(by)) {
            (Some(a), Some(b)) => Bson::Double(a + b),
            _ => {
                return Err(DocumentStoreError::InvalidQuery(format!(
                    "cannot increment non-numeric field {path}"
                )));
            }
        },
    })
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find(&self, collection: &str, criteria: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        let found = self.select(collection, &criteria, &options).await?;
        trace!(collection, found = found.len(), "find");
        Ok(found)
    }

    async fn find_stream(&self, collection: &str, criteria: Document, options: FindOptions) -> DocumentStoreResult<DocumentStream> {
        let found = self.select(collection, &criteria, &options).await?;
        trace!(collection, found = found.len(), "find_stream");
        Ok(stream::iter(found.into_iter().map(Ok)).boxed())
    }

    async fn find_one(&self, collection: &str, criteria: Document, options: FindOptions) -> DocumentStoreResult<Option<Document>> {
        let options = FindOptions {
            limit: Some(1),
            ..options
        };
        let found = self.select(collection, &criteria, &options).await?;
        trace!(collection, found = found.len(), "find_one");
        Ok(found.into_iter().next())
    }

    async fn count(&self, collection: &str, criteria: Document, limit: Option<u64>) -> DocumentStoreResult<u64> {
        let options = FindOptions {
            limit,
            ..FindOptions::default()
        };
        let count = self.select(collection, &criteria, &options).await?.len() as u64;
        trace!(collection, count, "count");
        Ok(count)
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
        let mut store = self.store.write().await;
        let collection_map = store.entry(collection.to_string()).or_default();

        let mut staged = IndexMap::with_capacity(documents.len());
        for mut doc in documents {
            let key = ensure_id(&mut doc);

            if collection_map.contains_key(&key) || staged.contains_key(&key) {
                return Err(DocumentStoreError::DocumentAlreadyExists(key, collection.to_string()));
            }

            staged.insert(key, doc);
        }

        let inserted = staged.values().cloned().collect::<Vec<_>>();
        collection_map.extend(staged);

        trace!(collection, inserted = inserted.len(), "insert");
        Ok(inserted)
    }

    async fn update(&self, collection: &str, criteria: Document, update: Document, multi: bool) -> DocumentStoreResult<WriteAck> {
        let mut store = self.store.write().await;
        let Some(collection_map) = store.get_mut(collection) else {
            return Ok(WriteAck::default());
        };

        let keys = Self::matching_keys(collection_map, &criteria, !multi)?;

        let mut updated = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(doc) = collection_map.get(key) {
                let mut doc = doc.clone();
                apply_update(&mut doc, &update)?;
                updated.push((key, doc));
            }
        }

        for (key, doc) in updated {
            collection_map.insert(key.clone(), doc);
        }

        trace!(collection, affected = keys.len(), multi, "update");
        Ok(WriteAck {
            affected: keys.len() as u64,
        })
    }

    async fn save(&self, collection: &str, mut document: Document) -> DocumentStoreResult<Document> {
        let key = ensure_id(&mut document);

        self.store
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(key, document.clone());

        trace!(collection, "save");
        Ok(document)
    }

    async fn remove(&self, collection: &str, criteria: Document, single: bool) -> DocumentStoreResult<WriteAck> {
        let mut store = self.store.write().await;
        let Some(collection_map) = store.get_mut(collection) else {
            return Ok(WriteAck::default());
        };

        let keys = Self::matching_keys(collection_map, &criteria, single)?;
        for key in &keys {
            collection_map.shift_remove(key);
        }

        trace!(collection, affected = keys.len(), single, "remove");
        Ok(WriteAck {
            affected: keys.len() as u64,
        })
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docmodel_core::criteria::Sort;
    use futures::TryStreamExt;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::builder().build().await.expect("builds");
        store
            .insert(
                "people",
                vec![
                    doc! { "_id": 1, "name": "ada", "age": 36, "tags": ["math"] },
                    doc! { "_id": 2, "name": "alan", "age": 41 },
                    doc! { "_id": 3, "name": "grace", "age": 36, "tags": ["navy", "cobol"] },
                ],
            )
            .await
            .expect("inserts");
        store
    }

    #[tokio::test]
    async fn insert_generates_ids_and_rejects_duplicates() {
        let store = InMemoryStore::new();

        let inserted = store
            .insert("people", vec![doc! { "name": "ada" }])
            .await
            .expect("inserts");
        let id = inserted[0].get("_id").cloned().expect("has id");
        assert!(matches!(id, Bson::ObjectId(_)));

        let duplicate = store.insert("people", vec![doc! { "_id": id, "name": "again" }]).await;
        assert!(matches!(duplicate, Err(DocumentStoreError::DocumentAlreadyExists(_, _))));
        assert_eq!(store.count("people", doc! {}, None).await.expect("counts"), 1);
    }

    #[tokio::test]
    async fn find_sorts_skips_and_limits() {
        let store = seeded().await;

        let options = FindOptions {
            sort: Some(Sort::Fields(vec![
                ("age".into(), SortDirection::Desc),
                ("name".into(), SortDirection::Asc),
            ])),
            skip: Some(1),
            limit: Some(1),
            ..FindOptions::default()
        };
        let found = store.find("people", doc! {}, options).await.expect("finds");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("name").expect("name"), "ada");
    }

    #[tokio::test]
    async fn zero_limit_means_unbounded() {
        let store = seeded().await;

        let options = FindOptions {
            limit: Some(0),
            ..FindOptions::default()
        };
        assert_eq!(store.find("people", doc! {}, options).await.expect("finds").len(), 3);
    }

    #[tokio::test]
    async fn projection_keeps_the_id() {
        let store = seeded().await;

        let options = FindOptions {
            projection: Some(doc! { "name": true }),
            ..FindOptions::default()
        };
        let found = store
            .find_one("people", doc! { "_id": 2 }, options)
            .await
            .expect("finds")
            .expect("exists");

        assert_eq!(found, doc! { "_id": 2, "name": "alan" });
    }

    #[tokio::test]
    async fn update_applies_operators() {
        let store = seeded().await;

        let ack = store
            .update("people", doc! { "age": 36 }, doc! { "$inc": { "age": 1 }, "$unset": { "tags": "" } }, true)
            .await
            .expect("updates");
        assert_eq!(ack.affected, 2);

        let ada = store
            .find_one("people", doc! { "_id": 1 }, FindOptions::default())
            .await
            .expect("finds")
            .expect("exists");
        assert_eq!(ada, doc! { "_id": 1, "name": "ada", "age": 37 });

        let ack = store
            .update("people", doc! {}, doc! { "$set": { "meta.seen": true } }, false)
            .await
            .expect("updates");
        assert_eq!(ack.affected, 1);
        assert_eq!(store.count("people", doc! { "meta.seen": true }, None).await.expect("counts"), 1);
    }

    #[tokio::test]
    async fn update_replaces_but_keeps_the_id() {
        let store = seeded().await;

        store
            .update("people", doc! { "_id": 2 }, doc! { "name": "turing" }, false)
            .await
            .expect("updates");

        let found = store
            .find_one("people", doc! { "name": "turing" }, FindOptions::default())
            .await
            .expect("finds");
        assert_eq!(found, Some(doc! { "name": "turing", "_id": 2 }));
    }

    #[tokio::test]
    async fn update_rejects_id_changes() {
        let store = seeded().await;

        for update in [
            doc! { "$set": { "_id": 9 } },
            doc! { "$unset": { "_id": "" } },
            doc! { "$inc": { "_id": 1 } },
        ] {
            let result = store.update("people", doc! { "_id": 2 }, update, false).await;
            assert!(matches!(result, Err(DocumentStoreError::InvalidQuery(_))));
        }

        store
            .update("people", doc! { "_id": 2 }, doc! { "$set": { "_id": 2, "name": "alan" } }, false)
            .await
            .expect("same id is allowed");

        assert_eq!(store.count("people", doc! { "_id": 9 }, None).await.expect("counts"), 0);
        assert_eq!(store.count("people", doc! { "_id": 2 }, None).await.expect("counts"), 1);
        assert_eq!(store.count("people", doc! {}, None).await.expect("counts"), 3);
    }

    #[tokio::test]
    async fn save_upserts() {
        let store = seeded().await;

        store.save("people", doc! { "_id": 2, "name": "alan", "age": 42 }).await.expect("saves");
        let saved = store.save("people", doc! { "name": "barbara" }).await.expect("saves");

        assert!(saved.contains_key("_id"));
        assert_eq!(store.count("people", doc! {}, None).await.expect("counts"), 4);
        assert_eq!(store.count("people", doc! { "age": 42 }, None).await.expect("counts"), 1);
    }

    #[tokio::test]
    async fn remove_single_or_all() {
        let store = seeded().await;

        let ack = store.remove("people", doc! { "age": 36 }, true).await.expect("removes");
        assert_eq!(ack.affected, 1);

        let ack = store.remove("people", doc! {}, false).await.expect("removes");
        assert_eq!(ack.affected, 2);
        assert_eq!(store.count("people", doc! {}, None).await.expect("counts"), 0);
    }

    #[tokio::test]
    async fn count_stops_at_limit() {
        let store = seeded().await;

        assert_eq!(store.count("people", doc! {}, Some(1)).await.expect("counts"), 1);
        assert_eq!(store.count("nobody", doc! {}, None).await.expect("counts"), 0);
    }

    #[tokio::test]
    async fn streams_matches() {
        let store = seeded().await;

        let names = store
            .find_stream("people", doc! { "tags": { "$exists": true } }, FindOptions::default())
            .await
            .expect("opens")
            .map_ok(|doc| doc.get_str("name").map(str::to_string).unwrap_or_default())
            .try_collect::<Vec<_>>()
            .await
            .expect("streams");

        assert_eq!(names, vec!["ada", "grace"]);
    }
}
