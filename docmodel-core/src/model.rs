//! Compiled models.
//!
//! A [`Model`] is produced once per name by [`SchemaBuilder::create`](crate::schema::SchemaBuilder::create)
//! and shared as a [`ModelRef`]. It is immutable: compiled rules, mapping tables,
//! relations and method tables are read concurrently by every query and instance
//! without coordination.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

use bson::{Bson, Document, oid::ObjectId};
use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::{
    backend::{StoreBackend, WriteAck},
    error::{DocumentStoreError, DocumentStoreResult, ValidationError},
    instance::ModelInstance,
    mapping::{self, CompiledMapping},
    query::Query,
    registry::RegistryState,
    relation::Relation,
    rules::{FilterRule, ValidationRule, apply_filtering, apply_validation},
    value::{assign, is_truthy},
};

/// Shared handle to a compiled model.
pub type ModelRef = Arc<Model>;

/// Computed accessor installed with `get`.
pub type Getter = Arc<dyn Fn(&ModelInstance) -> Bson + Send + Sync>;

/// Computed mutator installed with `set`.
pub type Setter = Arc<dyn Fn(&mut ModelInstance, Bson) + Send + Sync>;

pub type StaticFn = Arc<dyn Fn(ModelRef, Vec<Bson>) -> BoxFuture<'static, DocumentStoreResult<Bson>> + Send + Sync>;

pub type MethodFn = Arc<dyn Fn(&mut ModelInstance, Vec<Bson>) -> DocumentStoreResult<Bson> + Send + Sync>;

/// Entry of a model's static method table.
#[derive(Clone)]
pub enum StaticMethod {
    /// A user function.
    User(StaticFn),
    /// The population accessor of the relation on this field. Takes a document or an
    /// array of documents, and optional query options.
    Populate(String),
}

/// Entry of a model's instance method table.
#[derive(Clone)]
pub enum InstanceMethod {
    /// A user function.
    Sync(MethodFn),
    /// Calls the named static method with the instance's document prepended.
    Forward(String),
    /// Populates the relation on this field in place.
    Populate(String),
}

/// A compiled model bound to one collection.
pub struct Model {
    pub(crate) name: String,
    pub(crate) collection: String,
    pub(crate) backend: Arc<dyn StoreBackend>,
    pub(crate) registry: Weak<RegistryState>,
    pub(crate) filters: Arc<[FilterRule]>,
    pub(crate) validations: Arc<[ValidationRule]>,
    pub(crate) mapping: CompiledMapping,
    pub(crate) inverse_mapping: CompiledMapping,
    pub(crate) relations: IndexMap<String, Relation>,
    pub(crate) statics: HashMap<String, StaticMethod>,
    pub(crate) methods: HashMap<String, InstanceMethod>,
    pub(crate) getters: HashMap<String, Getter>,
    pub(crate) setters: HashMap<String, Setter>,
    pub(crate) constants: Document,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("filters", &self.filters.len())
            .field("validations", &self.validations.len())
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn coerce_id(id: Bson) -> DocumentStoreResult<Bson> {
    match id {
        Bson::ObjectId(_) => Ok(id),
        Bson::String(hex) => ObjectId::parse_str(&hex)
            .map(Bson::ObjectId)
            .map_err(|_| DocumentStoreError::declaration(format!("Bad ID `{hex}`!"))),
        other => Err(DocumentStoreError::declaration(format!("Bad ID `{other}`!"))),
    }
}

impl Model {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    pub fn filters(&self) -> &[FilterRule] {
        &self.filters
    }

    pub fn validations(&self) -> &[ValidationRule] {
        &self.validations
    }

    /// The relation populating `field`, if one was declared.
    pub fn relation(&self, field: &str) -> Option<&Relation> {
        self.relations.get(field)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    pub fn constant(&self, name: &str) -> Option<&Bson> {
        self.constants.get(name)
    }

    pub fn constants(&self) -> &Document {
        &self.constants
    }

    /// Resolves another model defined in the same registry.
    pub(crate) fn lookup(&self, name: &str) -> DocumentStoreResult<ModelRef> {
        self.registry
            .upgrade()
            .and_then(|registry| registry.get(name))
            .ok_or_else(|| DocumentStoreError::ModelNotFound(name.to_string()))
    }

    /// Starts a multi-document query.
    pub fn find(self: &Arc<Self>, criteria: Document) -> Query {
        Query::new(self.clone(), criteria, false)
    }

    /// Starts a single-document query.
    pub fn find_one(self: &Arc<Self>, criteria: Document) -> Query {
        Query::new(self.clone(), criteria, true)
    }

    /// Starts a single-document query by id. Hex strings are accepted.
    pub fn find_one_by_id(self: &Arc<Self>, id: impl Into<Bson>) -> DocumentStoreResult<Query> {
        let id = coerce_id(id.into())?;
        Ok(self.find_one(bson::doc! { "_id": id }))
    }

    /// Starts a multi-document query for the given ids. Hex strings are accepted.
    pub fn find_by_ids<I, V>(self: &Arc<Self>, ids: I) -> DocumentStoreResult<Query>
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let ids = ids
            .into_iter()
            .map(|id| coerce_id(id.into()))
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        Ok(self.find(bson::doc! { "_id": { "$in": ids } }))
    }

    pub async fn count(&self, criteria: Document) -> DocumentStoreResult<u64> {
        self.backend
            .count(&self.collection, criteria, None)
            .await
    }

    /// Counts at most one match: `1` if anything matches, else `0`.
    pub async fn count_one(&self, criteria: Document) -> DocumentStoreResult<u64> {
        self.backend
            .count(&self.collection, criteria, Some(1))
            .await
    }

    pub async fn insert(&self, documents: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
        self.backend
            .insert(&self.collection, documents)
            .await
    }

    pub async fn insert_one(&self, document: Document) -> DocumentStoreResult<Document> {
        self.backend
            .insert(&self.collection, vec![document])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DocumentStoreError::Backend("insert acknowledged no document".to_string()))
    }

    /// Updates every document matching `criteria`.
    pub async fn update(&self, criteria: Document, update: Document) -> DocumentStoreResult<WriteAck> {
        self.backend
            .update(&self.collection, criteria, update, true)
            .await
    }

    /// Updates the first document matching `criteria`.
    pub async fn update_one(&self, criteria: Document, update: Document) -> DocumentStoreResult<WriteAck> {
        self.backend
            .update(&self.collection, criteria, update, false)
            .await
    }

    pub async fn save(&self, document: Document) -> DocumentStoreResult<Document> {
        self.backend
            .save(&self.collection, document)
            .await
    }

    pub async fn remove(&self, criteria: Document) -> DocumentStoreResult<WriteAck> {
        self.backend
            .remove(&self.collection, criteria, false)
            .await
    }

    pub async fn remove_one(&self, criteria: Document) -> DocumentStoreResult<WriteAck> {
        self.backend
            .remove(&self.collection, criteria, true)
            .await
    }

    /// Applies the compiled filters to `doc` in declaration order.
    pub fn normalize(&self, doc: &mut Document) {
        let normalized = apply_filtering(Bson::Document(std::mem::take(doc)), &self.filters, false);

        if let Bson::Document(normalized) = normalized {
            *doc = normalized;
        }
    }

    /// Normalizes `doc`, then settles every compiled validation against it.
    ///
    /// An empty list means the document is valid.
    pub fn validate(&self, doc: &mut Document) -> BoxFuture<'static, Vec<ValidationError>> {
        self.normalize(doc);

        let value = Bson::Document(std::mem::take(doc));
        let pending = apply_validation(&value, &self.validations);

        if let Bson::Document(original) = value {
            *doc = original;
        }

        pending
    }

    /// Renames keys from internal to external names.
    pub fn transform(&self, doc: &Document) -> Document {
        mapping::transform(doc, &self.mapping)
    }

    /// Renames keys from external back to internal names.
    pub fn inverse_transform(&self, doc: &Document) -> Document {
        mapping::transform(doc, &self.inverse_mapping)
    }

    /// Populates the relation on `field` for every document in `docs`, with a single
    /// unbounded lookup against the target model.
    pub async fn populate(&self, field: &str, docs: &mut [Document], options: &Document) -> DocumentStoreResult<()> {
        let relation = self
            .relations
            .get(field)
            .ok_or_else(|| DocumentStoreError::BadPopulation(field.to_string()))?;

        let pending = {
            let holders = docs.iter().collect::<Vec<_>>();
            relation.resolve(self, &holders, true, options)
        };

        for (doc, value) in docs.iter_mut().zip(pending.await?) {
            assign(doc, field, value);
        }

        Ok(())
    }

    /// Populates the relation on `field` for a single document.
    pub async fn populate_one(&self, field: &str, doc: &mut Document, options: &Document) -> DocumentStoreResult<()> {
        let relation = self
            .relations
            .get(field)
            .ok_or_else(|| DocumentStoreError::BadPopulation(field.to_string()))?;

        let pending = relation.resolve(self, &[&*doc], false, options);

        if let Some(value) = pending.await?.into_iter().next() {
            assign(doc, field, value);
        }

        Ok(())
    }

    /// Invokes a static method by name.
    pub async fn call(self: &Arc<Self>, name: &str, args: Vec<Bson>) -> DocumentStoreResult<Bson> {
        let method = self
            .statics
            .get(name)
            .cloned()
            .ok_or_else(|| DocumentStoreError::declaration(format!("Unknown static method `{name}`!")))?;

        match method {
            StaticMethod::User(f) => f(self.clone(), args).await,
            StaticMethod::Populate(field) => {
                let mut args = args.into_iter();
                let subject = args.next().unwrap_or(Bson::Null);
                let options = match args.next() {
                    Some(Bson::Document(options)) => options,
                    _ => Document::new(),
                };

                match subject {
                    Bson::Document(mut doc) => {
                        self.populate_one(&field, &mut doc, &options).await?;
                        Ok(Bson::Document(doc))
                    }
                    Bson::Array(items) => {
                        let mut docs = items
                            .into_iter()
                            .map(|item| match item {
                                Bson::Document(doc) => Ok(doc),
                                other => Err(DocumentStoreError::InvalidDocument(format!(
                                    "cannot populate `{field}` on {other}"
                                ))),
                            })
                            .collect::<DocumentStoreResult<Vec<_>>>()?;

                        self.populate(&field, &mut docs, &options).await?;
                        Ok(Bson::Array(docs.into_iter().map(Bson::Document).collect()))
                    }
                    other => Err(DocumentStoreError::InvalidDocument(format!(
                        "cannot populate `{field}` on {other}"
                    ))),
                }
            }
        }
    }

    /// Wraps `doc` in an instance, assigning a fresh `ObjectId` when it has no id.
    pub fn build(self: &Arc<Self>, mut doc: Document) -> ModelInstance {
        if !doc.get("_id").is_some_and(is_truthy) {
            doc.insert("_id", ObjectId::new());
        }
        self.wrap(doc)
    }

    /// Wraps `doc` in an instance without generating an id. A hex string id is
    /// coerced to an `ObjectId`.
    pub fn wrap(self: &Arc<Self>, mut doc: Document) -> ModelInstance {
        if let Some(Bson::String(hex)) = doc.get("_id")
            && let Ok(oid) = ObjectId::parse_str(hex)
        {
            doc.insert("_id", oid);
        }
        ModelInstance::new(self.clone(), doc)
    }
}
