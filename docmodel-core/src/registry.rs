//! The model registry.
//!
//! Models are defined by name against a shared backend. Relations resolve their target
//! model through the registry at population time, so models may reference each other
//! in any definition order.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::debug;

use crate::{
    backend::{StoreBackend, StoreBackendBuilder},
    error::{DocumentStoreError, DocumentStoreResult},
    model::ModelRef,
    schema::{ModelOptions, SchemaBuilder},
};

#[derive(Debug)]
pub(crate) struct RegistryState {
    backend: Arc<dyn StoreBackend>,
    models: RwLock<HashMap<String, ModelRef>>,
}

impl RegistryState {
    pub(crate) fn get(&self, name: &str) -> Option<ModelRef> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

/// Named models sharing one backend.
///
/// Cloning is cheap; clones share the same models. Models keep only a weak handle to
/// the registry, so relations stop resolving once every clone has been dropped.
///
/// ```ignore
/// let registry = ModelRegistry::connect(InMemoryStore::builder()).await?;
///
/// let user = registry.define("user", |schema| {
///     schema.property("name", PropertySpec::new(TypeKind::String).required())?;
///     Ok(())
/// })?;
/// ```
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    state: Arc<RegistryState>,
}

impl ModelRegistry {
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            state: Arc::new(RegistryState {
                backend,
                models: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Builds the backend and creates an empty registry over it.
    pub async fn connect<B>(builder: B) -> DocumentStoreResult<Self>
    where
        B: StoreBackendBuilder,
        B::Backend: 'static,
    {
        Ok(Self::new(builder.build().await?))
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.state.backend
    }

    /// Defines a model with default options.
    pub fn define<F>(&self, name: &str, declare: F) -> DocumentStoreResult<ModelRef>
    where
        F: FnOnce(&mut SchemaBuilder) -> DocumentStoreResult<()>,
    {
        self.define_with(name, ModelOptions::default(), declare)
    }

    /// Defines a model.
    ///
    /// `declare` receives a fresh builder; the compiled model is registered under
    /// `name` once it returns. Defining a name twice is a declaration error.
    pub fn define_with<F>(&self, name: &str, options: ModelOptions, declare: F) -> DocumentStoreResult<ModelRef>
    where
        F: FnOnce(&mut SchemaBuilder) -> DocumentStoreResult<()>,
    {
        if self.state.get(name).is_some() {
            return Err(DocumentStoreError::declaration(format!(
                "Model `{name}` is already defined!"
            )));
        }

        let mut schema = SchemaBuilder::new(
            name,
            options,
            self.state.backend.clone(),
            Arc::downgrade(&self.state),
        );
        declare(&mut schema)?;
        let model = schema.create();

        let mut models = self
            .state
            .models
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if models.contains_key(name) {
            return Err(DocumentStoreError::declaration(format!(
                "Model `{name}` is already defined!"
            )));
        }
        models.insert(name.to_string(), model.clone());

        debug!(model = %name, collection = %model.collection(), "model defined");

        Ok(model)
    }

    /// The model registered under `name`.
    pub fn model(&self, name: &str) -> Option<ModelRef> {
        self.state.get(name)
    }

    /// Names of every registered model.
    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .state
            .models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Shuts the shared backend down.
    pub async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.state.backend.shutdown().await
    }
}
