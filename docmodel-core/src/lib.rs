//! A schema-compiling document mapper for JSON document stores.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Type registry** ([`types`]) - Built-in property types with their default filter and validation
//! - **Rule pipeline** ([`rules`]) - Path-addressed filters and validations, and how they run
//! - **Schema compiler** ([`schema`]) - Declarations compiled into immutable models
//! - **Field mapping** ([`mapping`]) - Internal/external field name tables
//! - **Models and instances** ([`model`], [`instance`]) - Store operations, accessors and methods
//! - **Relations** ([`relation`]) - `belongsTo`/`hasOne`/`hasMany` and their population
//! - **Query builder** ([`query`]) - Lazily executed, fluent queries
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Criteria** ([`criteria`]) - Parsing criteria documents for backends that evaluate them
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//! use bson::doc;
//!
//! let registry = ModelRegistry::connect(InMemoryStore::builder()).await?;
//!
//! let post = registry.define("post", |schema| {
//!     schema
//!         .property("title", PropertySpec::new(TypeKind::String).required().filter("trim"))?
//!         .belongs_to("user", RelationOptions::new())?;
//!     Ok(())
//! })?;
//!
//! let mut draft = post.build(doc! { "title": "  Hello  " });
//! assert!(draft.validate().await.is_empty());
//! post.insert_one(draft.into_document()).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod criteria;
pub mod error;
pub mod inflect;
pub mod instance;
pub mod mapping;
pub mod model;
pub mod query;
pub mod registry;
pub mod relation;
pub mod rules;
pub mod schema;
pub mod types;
pub mod value;
