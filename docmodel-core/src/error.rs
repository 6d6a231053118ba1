//! Error types and result types for schema declaration, querying and store operations.
//!
//! Fallible operations return [`DocumentStoreResult<T>`]. Validation failures are not
//! errors in that sense: [`ValidationError`] values are collected into lists and handed
//! back to the caller, where an empty list means the document is valid.

use bson::error::Error as BsonError;
use serde::Serialize;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when declaring models or interacting
/// with a document store.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The document has an invalid structure for the requested operation.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// The criteria or update document uses a construct the store cannot evaluate.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// A schema or query declaration is malformed.
    ///
    /// Raised synchronously while declaring a model or configuring a query. These are
    /// programming errors and are never retried.
    #[error("Declaration error: {0}")]
    Declaration(String),
    /// A query asked to populate a field that has no relation accessor.
    #[error("Bad population: `{0}`!")]
    BadPopulation(String),
    /// A relation or lookup referenced a model name that was never defined.
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl DocumentStoreError {
    pub(crate) fn declaration(message: impl Into<String>) -> Self {
        DocumentStoreError::Declaration(message.into())
    }
}

/// A specialized `Result` type for document store operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

/// A single failed validation rule.
///
/// Validators create these with a message template that may reference `{field}`.
/// The validation pipeline fills in the property path and replaces `{field}` with the
/// humanized label of the property the rule was declared on.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message}")]
pub struct ValidationError {
    /// Property path the failing rule is attached to.
    pub path: String,
    /// Human readable description.
    pub message: String,
}

impl ValidationError {
    /// Creates an error with the given message template and no path.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            message: message.into(),
        }
    }

    /// Attributes the error to `path` and interpolates `{field}` with `humanized`.
    pub(crate) fn attribute(mut self, path: &str, humanized: &str) -> Self {
        self.path = path.to_string();
        if self.message.contains("{field}") {
            self.message = self.message.replace("{field}", humanized);
        }
        self
    }
}
