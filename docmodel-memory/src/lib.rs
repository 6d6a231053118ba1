//! In-memory document storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development
//! and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Criteria evaluation** - Implicit equality, comparison, membership, existence and logical operators
//! - **Find options** - Projection, multi-field sorting, skip and limit
//! - **Updates** - `$set`, `$unset`, `$inc` and whole-document replacement
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ModelRegistry::connect(InMemoryStore::builder()).await?;
//!     let user = registry.define("user", |schema| {
//!         schema.property("name", PropertySpec::new(TypeKind::String).required())?;
//!         Ok(())
//!     })?;
//!
//!     user.insert_one(doc! { "name": "Alice" }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
