//! Convenient re-exports of commonly used types from docmodel.
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```
//!
//! This provides access to:
//! - The model registry, schema declarations and compiled models
//! - Queries and their results
//! - Store backends and builders
//! - Criteria construction
//! - Error types

pub use docmodel_core::{
    backend::{FindOptions, StoreBackend, StoreBackendBuilder, WriteAck},
    criteria::{Expr, FieldOp, Filter, QueryVisitor, Sort, SortDirection},
    error::{DocumentStoreError, DocumentStoreResult, ValidationError},
    instance::ModelInstance,
    mapping::MappingSpec,
    model::{Model, ModelRef},
    query::{DEFAULT_LIMIT, Query, QueryResult, QueryState},
    registry::ModelRegistry,
    relation::RelationKind,
    rules::{async_validator, filter_fn, validator},
    schema::{AddonKind, Decl, EnumSpec, ModelOptions, PropertySpec, RelationOptions, SchemaBuilder},
    types::{TypeKind, TypeRef},
};
