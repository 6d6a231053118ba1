//! Main docmodel crate: schema-compiled models over JSON document stores.
//!
//! This crate is the primary entry point for users of docmodel. It re-exports the core
//! types from the sub-crates and provides access to the storage backends.
//!
//! # Features
//!
//! - **Declarative schemas** - Typed properties with required, enumeration, filter and validation rules
//! - **Normalization and validation** - Filters applied in declaration order; every failed rule reported
//! - **Field mapping** - Rename fields between internal and external representations
//! - **Relations** - `belongs_to`, `has_one` and `has_many`, populated in batched lookups
//! - **Lazy queries** - Fluent builder with select, sort, skip, limit, populate and lean
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::{prelude::*, memory::InMemoryStore};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let registry = ModelRegistry::connect(InMemoryStore::builder()).await?;
//!
//!     let user = registry.define("user", |schema| {
//!         schema
//!             .property("name", PropertySpec::new(TypeKind::String).required().filter("trim"))?
//!             .has_many("post", RelationOptions::new())?;
//!         Ok(())
//!     })?;
//!
//!     let post = registry.define("post", |schema| {
//!         schema
//!             .property("title", PropertySpec::new(TypeKind::String).required())?
//!             .belongs_to("user", RelationOptions::new().required())?;
//!         Ok(())
//!     })?;
//!
//!     let mut ada = user.build(doc! { "name": "  Ada " });
//!     assert!(ada.validate().await.is_empty());
//!     let ada = user.insert_one(ada.into_document()).await?;
//!
//!     post.insert_one(doc! { "title": "Notes", "user": ada.get("_id").cloned() }).await?;
//!
//!     let users = user
//!         .find(doc! {})
//!         .populate("posts")
//!         .exec()
//!         .await?
//!         .into_instances();
//!
//!     println!("{:?}", users[0].get("posts"));
//!
//!     registry.shutdown().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docmodel_core::{
    backend, criteria, error, inflect, instance, mapping, model, query, registry, relation, rules, schema,
    types, value,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmodel_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
