//! Documents bound to the model they were loaded or built with.

use std::fmt;

use bson::{Bson, Document};
use serde::{Serialize, Serializer};

use crate::{
    error::{DocumentStoreResult, ValidationError},
    model::{InstanceMethod, ModelRef},
    value::{assign, lookup},
};

/// A document together with its model.
///
/// Getters and setters declared on the schema are consulted by [`get`](Self::get) and
/// [`set`](Self::set); instance methods are invoked through [`call`](Self::call).
#[derive(Clone)]
pub struct ModelInstance {
    model: ModelRef,
    doc: Document,
}

impl ModelInstance {
    pub(crate) fn new(model: ModelRef, doc: Document) -> Self {
        Self { model, doc }
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    pub fn id(&self) -> Option<&Bson> {
        self.doc.get("_id")
    }

    /// Reads `path`, through a getter when one is declared for it.
    pub fn get(&self, path: &str) -> Option<Bson> {
        match self.model.getters.get(path) {
            Some(getter) => Some(getter(self)),
            None => lookup(&self.doc, path).cloned(),
        }
    }

    /// Writes `path`, through a setter when one is declared for it.
    pub fn set(&mut self, path: &str, value: impl Into<Bson>) {
        let value = value.into();
        match self.model.setters.get(path).cloned() {
            Some(setter) => setter(self, value),
            None => assign(&mut self.doc, path, value),
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }

    /// The stored fields plus every getter's value.
    pub fn to_document(&self) -> Document {
        let mut out = self.doc.clone();
        for (path, getter) in &self.model.getters {
            assign(&mut out, path, getter(self));
        }
        out
    }

    /// [`to_document`](Self::to_document) as JSON.
    pub fn to_json(&self) -> DocumentStoreResult<serde_json::Value> {
        Ok(serde_json::to_value(self.to_document())?)
    }

    /// Applies the model's filters in place.
    pub fn normalize(&mut self) {
        self.model.normalize(&mut self.doc);
    }

    /// Normalizes the document and returns every failed validation.
    pub async fn validate(&mut self) -> Vec<ValidationError> {
        self.model.validate(&mut self.doc).await
    }

    /// Replaces the relation field `field` with the referenced document(s).
    pub async fn populate(&mut self, field: &str, options: &Document) -> DocumentStoreResult<()> {
        let model = self.model.clone();
        model.populate_one(field, &mut self.doc, options).await
    }

    /// Invokes an instance method by name.
    pub async fn call(&mut self, name: &str, args: Vec<Bson>) -> DocumentStoreResult<Bson> {
        let method = self.model.methods.get(name).cloned().ok_or_else(|| {
            crate::error::DocumentStoreError::declaration(format!("Unknown instance method `{name}`!"))
        })?;

        match method {
            InstanceMethod::Sync(f) => f(self, args),
            InstanceMethod::Forward(target) => {
                let mut forwarded = Vec::with_capacity(args.len() + 1);
                forwarded.push(Bson::Document(self.doc.clone()));
                forwarded.extend(args);

                let model = self.model.clone();
                model.call(&target, forwarded).await
            }
            InstanceMethod::Populate(field) => {
                let options = match args.into_iter().next() {
                    Some(Bson::Document(options)) => options,
                    _ => Document::new(),
                };
                self.populate(&field, &options).await?;
                Ok(Bson::Document(self.doc.clone()))
            }
        }
    }
}

impl fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInstance")
            .field("model", &self.model.name())
            .field("doc", &self.doc)
            .finish()
    }
}

impl Serialize for ModelInstance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}
