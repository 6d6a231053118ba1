#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use docmodel::{memory::InMemoryStore, prelude::*};
use docmodel::{backend::DocumentStream, bson::Document};

/// Forwards to an in-memory store and counts every call.
#[derive(Debug, Clone, Default)]
pub struct CountingStore {
    inner: InMemoryStore,
    calls: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreBackend for CountingStore {
    async fn find(&self, collection: &str, criteria: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        self.hit();
        self.inner.find(collection, criteria, options).await
    }

    async fn find_stream(&self, collection: &str, criteria: Document, options: FindOptions) -> DocumentStoreResult<DocumentStream> {
        self.hit();
        self.inner.find_stream(collection, criteria, options).await
    }

    async fn find_one(&self, collection: &str, criteria: Document, options: FindOptions) -> DocumentStoreResult<Option<Document>> {
        self.hit();
        self.inner.find_one(collection, criteria, options).await
    }

    async fn count(&self, collection: &str, criteria: Document, limit: Option<u64>) -> DocumentStoreResult<u64> {
        self.hit();
        self.inner.count(collection, criteria, limit).await
    }

    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
        self.hit();
        self.inner.insert(collection, documents).await
    }

    async fn update(&self, collection: &str, criteria: Document, update: Document, multi: bool) -> DocumentStoreResult<WriteAck> {
        self.hit();
        self.inner.update(collection, criteria, update, multi).await
    }

    async fn save(&self, collection: &str, document: Document) -> DocumentStoreResult<Document> {
        self.hit();
        self.inner.save(collection, document).await
    }

    async fn remove(&self, collection: &str, criteria: Document, single: bool) -> DocumentStoreResult<WriteAck> {
        self.hit();
        self.inner.remove(collection, criteria, single).await
    }
}

pub async fn memory_registry() -> ModelRegistry {
    ModelRegistry::connect(InMemoryStore::builder())
        .await
        .expect("in-memory store builds")
}

pub fn counting_registry() -> (ModelRegistry, CountingStore) {
    let store = CountingStore::default();
    (ModelRegistry::new(store.clone()), store)
}
