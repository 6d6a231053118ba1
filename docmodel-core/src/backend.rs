//! Storage backend abstraction.
//!
//! This module defines the primitive operations the model layer delegates every read
//! and write to. Models never talk to a driver directly: they hold an
//! `Arc<dyn StoreBackend>` and issue criteria documents, option sets and update
//! documents against a named collection.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::backend::{StoreBackend, FindOptions};
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! backend.insert("users", vec![doc! { "name": "Alice", "age": 30 }]).await?;
//! let adults = backend
//!     .find("users", doc! { "age": { "$gte": 18 } }, FindOptions::default())
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Document;
use futures::stream::BoxStream;
use std::fmt::Debug;

use crate::{criteria::Sort, error::DocumentStoreResult};

/// A stream of raw documents read from a cursor.
pub type DocumentStream = BoxStream<'static, DocumentStoreResult<Document>>;

/// Options for read operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Inclusion projection (`field: true`). `_id` is always returned.
    pub projection: Option<Document>,
    /// Sort order.
    pub sort: Option<Sort>,
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return. `None` or `Some(0)` means no limit.
    pub limit: Option<u64>,
}

impl FindOptions {
    /// The effective limit, with `0` treated as "no limit".
    pub fn effective_limit(&self) -> Option<u64> {
        self.limit.filter(|limit| *limit > 0)
    }
}

/// Acknowledgement returned by write operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteAck {
    /// Number of documents matched and written.
    pub affected: u64,
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. Models share one backend across every query and population they run.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult).
/// Driver failures are reported as
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend) and are
/// propagated by the model layer without retries.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Finds every document matching `criteria`.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection to query
    /// * `criteria` - The criteria document
    /// * `options` - Projection, sort, skip and limit
    ///
    /// # Returns
    ///
    /// Returns the matching documents in result order, or a
    /// [`DocumentStoreError`](crate::error::DocumentStoreError) on failure.
    async fn find(
        &self,
        collection: &str,
        criteria: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Opens a cursor over every document matching `criteria`.
    ///
    /// Same semantics as [`find`](StoreBackend::find), but results are yielded as a
    /// stream instead of being materialized.
    async fn find_stream(
        &self,
        collection: &str,
        criteria: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<DocumentStream>;

    /// Finds the first document matching `criteria`.
    ///
    /// `options.limit` is ignored.
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` when nothing matches.
    async fn find_one(
        &self,
        collection: &str,
        criteria: Document,
        options: FindOptions,
    ) -> DocumentStoreResult<Option<Document>>;

    /// Counts the documents matching `criteria`, stopping at `limit` when given.
    async fn count(
        &self,
        collection: &str,
        criteria: Document,
        limit: Option<u64>,
    ) -> DocumentStoreResult<u64>;

    /// Inserts new documents.
    ///
    /// Documents without an `_id` are given a fresh `ObjectId`.
    ///
    /// # Returns
    ///
    /// Returns the inserted documents, including their identifiers.
    ///
    /// # Errors
    ///
    /// Fails with [`DocumentAlreadyExists`](crate::error::DocumentStoreError::DocumentAlreadyExists)
    /// when an identifier is already taken.
    async fn insert(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocumentStoreResult<Vec<Document>>;

    /// Updates documents matching `criteria`.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection
    /// * `criteria` - Selects the documents to update
    /// * `update` - Either an operator document (`$set`, `$unset`, `$inc`) or a
    ///   replacement document
    /// * `multi` - Update every match instead of only the first
    async fn update(
        &self,
        collection: &str,
        criteria: Document,
        update: Document,
        multi: bool,
    ) -> DocumentStoreResult<WriteAck>;

    /// Inserts `document`, or replaces the stored document with the same `_id`.
    ///
    /// # Returns
    ///
    /// Returns the saved document, including its identifier.
    async fn save(&self, collection: &str, document: Document) -> DocumentStoreResult<Document>;

    /// Removes documents matching `criteria`, or only the first match when `single`.
    async fn remove(
        &self,
        collection: &str,
        criteria: Document,
        single: bool,
    ) -> DocumentStoreResult<WriteAck>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(&self) -> DocumentStoreResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
