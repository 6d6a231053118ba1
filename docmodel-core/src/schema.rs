//! The schema compiler.
//!
//! A [`SchemaBuilder`] collects property declarations, a field-name mapping,
//! relations, constants, accessors and methods, and compiles them into an immutable
//! [`Model`]. Declaration problems are reported synchronously as
//! [`DocumentStoreError::Declaration`].
//!
//! # Rule ordering
//!
//! For every leaf property the compiled rules are appended in a fixed order:
//!
//! 1. the `required` validation, if requested
//! 2. the enumeration validation, if requested
//! 3. the type's default filter and validation, unless bypassed
//! 4. user-declared filters and validations, in declaration order
//!
//! Array leaves first get their own rules (the array type validation) and then one
//! fanned rule per kind that runs the element's rules on every element.
//!
//! ```ignore
//! registry.define("post", |schema| {
//!     schema
//!         .property("title", PropertySpec::new(TypeKind::String).required().filter("trim"))?
//!         .property("tags", Decl::array(TypeKind::String))?
//!         .property("status", PropertySpec::new("string").enumeration(EnumSpec::new(["draft", "live"])))?
//!         .belongs_to("user", RelationOptions::new().required())?;
//!     Ok(())
//! })?;
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    future::Future,
    sync::{Arc, Weak},
};

use bson::{Bson, Document};
use futures::FutureExt;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::{
    backend::StoreBackend,
    error::{DocumentStoreError, DocumentStoreResult},
    inflect::{accessor_name, field_name, humanize, humanize_path},
    instance::ModelInstance,
    mapping::{self, CompiledMapping, MappingSpec},
    model::{Getter, InstanceMethod, Model, ModelRef, Setter, StaticMethod},
    registry::RegistryState,
    relation::{Relation, RelationKind},
    rules::{
        self, FilterFn, FilterRule, Rule, Translate, ValidationRule, ValidatorFn, array_filter,
        array_validator, filter_fn, one_of, validator,
    },
    types::{self, TypeDescriptor, TypeKind, TypeRef},
    value::{is_truthy, to_text},
};

/// Static names every model provides.
pub const RESERVED_STATICS: &[&str] = &[
    "find",
    "find_one",
    "find_one_by_id",
    "find_by_ids",
    "count",
    "count_one",
    "insert",
    "insert_one",
    "update",
    "update_one",
    "save",
    "remove",
    "remove_one",
    "normalize",
    "validate",
    "transform",
    "inverse_transform",
    "populate",
    "populate_one",
    "constant",
    "build",
    "wrap",
    "call",
];

/// Instance method names every model instance provides.
pub const RESERVED_METHODS: &[&str] = &[
    "id",
    "get",
    "set",
    "document",
    "to_document",
    "to_json",
    "model",
    "normalize",
    "validate",
    "populate",
    "call",
];

/// A property declaration: a type, a full property spec, or a nested map of
/// declarations.
#[derive(Clone, Debug)]
pub enum Decl {
    Type(TypeRef),
    Spec(PropertySpec),
    Nested(IndexMap<String, Decl>),
}

impl Decl {
    /// An array of `element`.
    pub fn array(element: impl Into<Decl>) -> Self {
        Decl::Type(TypeRef::Array(vec![element.into()]))
    }

    /// A nested map of declarations.
    pub fn nested<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Decl>,
    {
        Decl::Nested(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<TypeKind> for Decl {
    fn from(kind: TypeKind) -> Self {
        Decl::Type(TypeRef::Kind(kind))
    }
}

impl From<&str> for Decl {
    fn from(name: &str) -> Self {
        Decl::Type(TypeRef::from(name))
    }
}

impl From<TypeRef> for Decl {
    fn from(reference: TypeRef) -> Self {
        Decl::Type(reference)
    }
}

impl From<PropertySpec> for Decl {
    fn from(spec: PropertySpec) -> Self {
        Decl::Spec(spec)
    }
}

/// The two addon kinds a property can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddonKind {
    Filter,
    Validation,
}

/// A user-declared addon: a name looked up in the shared registry, or a function.
#[derive(Clone)]
pub enum Addon<M> {
    Named(String),
    Inline(M),
}

impl<M> fmt::Debug for Addon<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addon::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Addon::Inline(_) => f.write_str("Inline(..)"),
        }
    }
}

impl<M> From<&str> for Addon<M> {
    fn from(name: &str) -> Self {
        Addon::Named(name.to_string())
    }
}

impl<M> From<String> for Addon<M> {
    fn from(name: String) -> Self {
        Addon::Named(name)
    }
}

impl From<FilterFn> for Addon<FilterFn> {
    fn from(f: FilterFn) -> Self {
        Addon::Inline(f)
    }
}

impl From<ValidatorFn> for Addon<ValidatorFn> {
    fn from(f: ValidatorFn) -> Self {
        Addon::Inline(f)
    }
}

/// An enumeration constraint.
#[derive(Clone)]
pub struct EnumSpec {
    values: Vec<Bson>,
    translate: Option<Translate>,
}

impl fmt::Debug for EnumSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnumSpec")
            .field("values", &self.values)
            .field("translated", &self.translate.is_some())
            .finish()
    }
}

impl EnumSpec {
    /// Allowed values, rendered as-is in messages.
    pub fn new<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            translate: None,
        }
    }

    /// Renders members through `translate` in messages.
    pub fn translate<F>(mut self, translate: F) -> Self
    where
        F: Fn(&Bson) -> String + Send + Sync + 'static,
    {
        self.translate = Some(Arc::new(translate));
        self
    }

    /// Allowed values paired with the labels shown in messages.
    pub fn labeled<I, V, L>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (V, L)>,
        V: Into<Bson>,
        L: Into<String>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(value, label)| (value.into(), label.into()))
            .collect::<Vec<(Bson, String)>>();
        let values = pairs.iter().map(|(value, _)| value.clone()).collect();

        Self {
            values,
            translate: Some(Arc::new(move |member| {
                pairs
                    .iter()
                    .find(|(value, _)| value == member)
                    .map_or_else(|| to_text(member), |(_, label)| label.clone())
            })),
        }
    }

    /// String values labeled with their humanized form (`"in_review"` -> `"In review"`).
    pub fn humanized<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::labeled(values.into_iter().map(|value| {
            let value = value.into();
            let label = humanize(&value, false);
            (value, label)
        }))
    }

    /// The declared values.
    pub fn values(&self) -> &[Bson] {
        &self.values
    }
}

/// A full property declaration.
#[derive(Clone, Debug)]
pub struct PropertySpec {
    ty: TypeRef,
    required: bool,
    enumeration: Option<EnumSpec>,
    humanized: Option<String>,
    bypass: Vec<AddonKind>,
    filters: Vec<Addon<FilterFn>>,
    validations: Vec<Addon<ValidatorFn>>,
}

impl PropertySpec {
    pub fn new(ty: impl Into<TypeRef>) -> Self {
        Self {
            ty: ty.into(),
            required: false,
            enumeration: None,
            humanized: None,
            bypass: Vec::new(),
            filters: Vec::new(),
            validations: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn enumeration(mut self, enumeration: EnumSpec) -> Self {
        self.enumeration = Some(enumeration);
        self
    }

    /// Overrides the label interpolated into validation messages.
    pub fn humanized(mut self, label: impl Into<String>) -> Self {
        self.humanized = Some(label.into());
        self
    }

    /// Skips the type's default addon of the given kind.
    pub fn bypass(mut self, kind: AddonKind) -> Self {
        self.bypass.push(kind);
        self
    }

    pub fn filter(mut self, addon: impl Into<Addon<FilterFn>>) -> Self {
        self.filters.push(addon.into());
        self
    }

    pub fn validation(mut self, addon: impl Into<Addon<ValidatorFn>>) -> Self {
        self.validations.push(addon.into());
        self
    }
}

/// Options for relation declarations.
#[derive(Clone, Debug, Default)]
pub struct RelationOptions {
    /// Local field holding the populated value. Derived from the target name if absent.
    pub field: Option<String>,
    /// For `has_one`/`has_many`: the target's field referencing this model.
    pub inverse: Option<String>,
    /// For `belongs_to`: whether the reference is required.
    pub required: bool,
    /// For `belongs_to`: label of the reference property.
    pub humanized: Option<String>,
    /// Query options applied to every population (`select`, `sort`, `populate`, ...).
    pub query: Document,
}

impl RelationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn humanized(mut self, label: impl Into<String>) -> Self {
        self.humanized = Some(label.into());
        self
    }

    pub fn query(mut self, query: Document) -> Self {
        self.query = query;
        self
    }
}

/// Options applied when a model is defined.
#[derive(Clone, Debug, Default)]
pub struct ModelOptions {
    /// Collection name. Derived from the model name if absent.
    pub collection: Option<String>,
}

impl ModelOptions {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: Some(name.into()),
        }
    }
}

/// Collects declarations for one model and compiles them.
pub struct SchemaBuilder {
    name: String,
    collection: String,
    backend: Arc<dyn StoreBackend>,
    registry: Weak<RegistryState>,
    paths: HashSet<String>,
    filters: Vec<FilterRule>,
    validations: Vec<ValidationRule>,
    mapping: CompiledMapping,
    inverse_mapping: CompiledMapping,
    relations: IndexMap<String, Relation>,
    constants: Document,
    statics: HashMap<String, StaticMethod>,
    static_names: HashSet<String>,
    methods: HashMap<String, InstanceMethod>,
    method_names: HashSet<String>,
    getters: HashMap<String, Getter>,
    setters: HashMap<String, Setter>,
    model: Option<ModelRef>,
}

impl fmt::Debug for SchemaBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaBuilder")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("filters", &self.filters)
            .field("validations", &self.validations)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl SchemaBuilder {
    pub(crate) fn new(
        name: &str,
        options: ModelOptions,
        backend: Arc<dyn StoreBackend>,
        registry: Weak<RegistryState>,
    ) -> Self {
        let collection = options
            .collection
            .unwrap_or_else(|| crate::inflect::collection_name(name));

        Self {
            name: name.to_string(),
            collection,
            backend,
            registry,
            paths: HashSet::new(),
            filters: Vec::new(),
            validations: Vec::new(),
            mapping: CompiledMapping::default(),
            inverse_mapping: CompiledMapping::default(),
            relations: IndexMap::new(),
            constants: Document::new(),
            statics: HashMap::new(),
            static_names: RESERVED_STATICS.iter().map(|s| s.to_string()).collect(),
            methods: HashMap::new(),
            method_names: RESERVED_METHODS.iter().map(|s| s.to_string()).collect(),
            getters: HashMap::new(),
            setters: HashMap::new(),
            model: None,
        }
    }

    /// A builder not attached to any registry. Relations declared on it cannot
    /// resolve their targets.
    pub fn detached(name: &str, options: ModelOptions, backend: Arc<dyn StoreBackend>) -> Self {
        Self::new(name, options, backend, Weak::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn filters(&self) -> &[FilterRule] {
        &self.filters
    }

    pub fn validations(&self) -> &[ValidationRule] {
        &self.validations
    }

    /// Constants declared so far.
    pub fn constants(&self) -> &Document {
        &self.constants
    }

    fn ensure_open(&self) -> DocumentStoreResult<()> {
        match self.model {
            Some(_) => Err(DocumentStoreError::declaration(format!(
                "Model `{}` is already created!",
                self.name
            ))),
            None => Ok(()),
        }
    }

    /// Declares a property at `path`.
    pub fn property(&mut self, path: &str, decl: impl Into<Decl>) -> DocumentStoreResult<&mut Self> {
        self.ensure_open()?;
        self.define_property(path, decl.into())?;
        Ok(self)
    }

    /// Declares every top-level entry of `schema` as a property.
    pub fn schema<I, K, V>(&mut self, schema: I) -> DocumentStoreResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Decl>,
    {
        for (path, decl) in schema {
            self.property(path.as_ref(), decl)?;
        }
        Ok(self)
    }

    fn define_property(&mut self, path: &str, decl: Decl) -> DocumentStoreResult<()> {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(DocumentStoreError::declaration("Invalid property path!"));
        }

        let spec = match decl {
            Decl::Nested(entries) => {
                for (key, nested) in entries {
                    self.define_property(&format!("{path}.{key}"), nested)?;
                }
                return Ok(());
            }
            Decl::Type(ty) => PropertySpec::new(ty),
            Decl::Spec(spec) => spec,
        };

        let descriptor = types::get(&spec.ty)
            .ok_or_else(|| DocumentStoreError::declaration(format!("Bad property `{path}`!")))?;

        if !self.paths.insert(path.to_string()) {
            return Err(DocumentStoreError::declaration(format!(
                "Duplicate property path `{path}`!"
            )));
        }

        let humanized = spec
            .humanized
            .clone()
            .unwrap_or_else(|| humanize_path(path));

        self.define_simple(path, &humanized, &spec, descriptor)?;

        if let TypeRef::Array(elements) = &spec.ty {
            self.define_array(path, &humanized, elements)?;
        }

        Ok(())
    }

    fn define_simple(
        &mut self,
        path: &str,
        humanized: &str,
        spec: &PropertySpec,
        descriptor: &'static TypeDescriptor,
    ) -> DocumentStoreResult<()> {
        if spec.required {
            self.validations
                .push(Rule::new(path, humanized, rules::required()));
        }

        if let Some(enumeration) = &spec.enumeration {
            let allowed = enumeration
                .values
                .iter()
                .filter(|value| is_truthy(value))
                .cloned()
                .collect::<Vec<_>>();

            if allowed.is_empty() {
                return Err(DocumentStoreError::declaration("Empty enumeration array!"));
            }

            self.validations.push(Rule::new(
                path,
                humanized,
                one_of(allowed, enumeration.translate.clone()),
            ));
        }

        if !spec.bypass.contains(&AddonKind::Filter)
            && let Some(default) = descriptor.filter
        {
            self.filters
                .push(Rule::new(path, humanized, filter_fn(move |value| Some(default(value)))));
        }
        for addon in &spec.filters {
            let method = match addon {
                Addon::Inline(f) => Some(f.clone()),
                Addon::Named(name) => rules::named_filter(name).or_else(|| {
                    warn!(model = %self.name, path, filter = %name, "unknown named filter, skipping");
                    None
                }),
            };
            if let Some(method) = method {
                self.filters.push(Rule::new(path, humanized, method));
            }
        }

        if !spec.bypass.contains(&AddonKind::Validation)
            && let Some(default) = descriptor.validate
        {
            self.validations
                .push(Rule::new(path, humanized, validator(move |value| default(value))));
        }
        for addon in &spec.validations {
            let method = match addon {
                Addon::Inline(f) => Some(f.clone()),
                Addon::Named(name) => rules::named_validator(name).or_else(|| {
                    warn!(model = %self.name, path, validation = %name, "unknown named validation, skipping");
                    None
                }),
            };
            if let Some(method) = method {
                self.validations.push(Rule::new(path, humanized, method));
            }
        }

        Ok(())
    }

    fn define_array(&mut self, path: &str, humanized: &str, elements: &[Decl]) -> DocumentStoreResult<()> {
        let [element] = elements else {
            return Err(DocumentStoreError::declaration("Bad array property"));
        };

        let filters_before = self.filters.len();
        let validations_before = self.validations.len();

        let element_path = format!("{path}.0");
        self.define_property(&element_path, element.clone())?;

        let rehome = |rule_path: &str| -> String {
            rule_path
                .strip_prefix(element_path.as_str())
                .map(|rest| rest.strip_prefix('.').unwrap_or(rest))
                .unwrap_or(rule_path)
                .to_string()
        };

        let element_filters = self
            .filters
            .split_off(filters_before)
            .into_iter()
            .map(|rule| Rule { path: rehome(&rule.path), ..rule })
            .collect::<Vec<_>>();
        let element_validations = self
            .validations
            .split_off(validations_before)
            .into_iter()
            .map(|rule| Rule { path: rehome(&rule.path), ..rule })
            .collect::<Vec<_>>();

        if !element_filters.is_empty() {
            self.filters
                .push(Rule::new(path, humanized, array_filter(element_filters.into())));
        }
        if !element_validations.is_empty() {
            self.validations
                .push(Rule::new(path, humanized, array_validator(element_validations.into())));
        }

        Ok(())
    }

    /// Compiles the field-name mapping in both directions.
    pub fn map(&mut self, spec: MappingSpec) -> DocumentStoreResult<&mut Self> {
        self.ensure_open()?;
        let (forward, inverse) = mapping::compile(&spec)?;
        self.mapping = forward;
        self.inverse_mapping = inverse;
        Ok(self)
    }

    fn declare_relation(&mut self, relation: Relation) -> DocumentStoreResult<()> {
        let accessor = accessor_name(&relation.field);

        self.claim_static(&accessor)?;
        self.claim_method(&accessor)?;

        self.statics
            .insert(accessor.clone(), StaticMethod::Populate(relation.field.clone()));
        self.methods
            .insert(accessor, InstanceMethod::Populate(relation.field.clone()));
        self.relations
            .insert(relation.field.clone(), relation);

        Ok(())
    }

    /// Declares that this model references one `target` document through an id field.
    pub fn belongs_to(&mut self, target: &str, options: RelationOptions) -> DocumentStoreResult<&mut Self> {
        self.ensure_open()?;

        let field = options
            .field
            .clone()
            .unwrap_or_else(|| field_name(target, false));

        let mut id = PropertySpec::new(TypeKind::ObjectId);
        if options.required {
            id = id.required();
        }
        if let Some(label) = &options.humanized {
            id = id.humanized(label.clone());
        }
        self.define_property(&field, Decl::Spec(id))?;

        self.declare_relation(Relation {
            kind: RelationKind::BelongsTo,
            target: target.to_string(),
            field,
            inverse: "_id".to_string(),
            query: options.query,
        })?;

        Ok(self)
    }

    fn has(&mut self, target: &str, options: RelationOptions, many: bool) -> DocumentStoreResult<&mut Self> {
        self.ensure_open()?;

        let inverse = options
            .inverse
            .unwrap_or_else(|| field_name(&self.name, false));
        let field = options
            .field
            .unwrap_or_else(|| field_name(target, many));

        self.declare_relation(Relation {
            kind: if many { RelationKind::HasMany } else { RelationKind::HasOne },
            target: target.to_string(),
            field,
            inverse,
            query: options.query,
        })?;

        Ok(self)
    }

    /// Declares that one `target` document references this model.
    pub fn has_one(&mut self, target: &str, options: RelationOptions) -> DocumentStoreResult<&mut Self> {
        self.has(target, options, false)
    }

    /// Declares that many `target` documents reference this model.
    pub fn has_many(&mut self, target: &str, options: RelationOptions) -> DocumentStoreResult<&mut Self> {
        self.has(target, options, true)
    }

    /// Adds named constants, readable from the builder and from the model.
    pub fn constant(&mut self, constants: Document) -> DocumentStoreResult<&mut Self> {
        self.ensure_open()?;
        self.constants.extend(constants);
        Ok(self)
    }

    /// Runs a reusable schema fragment against this builder.
    pub fn plugin<F>(&mut self, plugin: F, options: &Document) -> DocumentStoreResult<&mut Self>
    where
        F: FnOnce(&mut SchemaBuilder, &Document) -> DocumentStoreResult<()>,
    {
        self.ensure_open()?;
        plugin(self, options)?;
        Ok(self)
    }

    /// Installs a computed accessor on instances.
    pub fn get<F>(&mut self, path: &str, getter: F) -> DocumentStoreResult<&mut Self>
    where
        F: Fn(&ModelInstance) -> Bson + Send + Sync + 'static,
    {
        self.ensure_open()?;
        self.getters.insert(path.to_string(), Arc::new(getter));
        Ok(self)
    }

    /// Installs a computed mutator on instances.
    pub fn set<F>(&mut self, path: &str, setter: F) -> DocumentStoreResult<&mut Self>
    where
        F: Fn(&mut ModelInstance, Bson) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        self.setters.insert(path.to_string(), Arc::new(setter));
        Ok(self)
    }

    fn claim_static(&mut self, name: &str) -> DocumentStoreResult<()> {
        if !self.static_names.insert(name.to_string()) {
            return Err(DocumentStoreError::declaration(format!(
                "Conflict occurred! Static method's name `{name}` is already used!"
            )));
        }
        Ok(())
    }

    fn claim_method(&mut self, name: &str) -> DocumentStoreResult<()> {
        if !self.method_names.insert(name.to_string()) {
            return Err(DocumentStoreError::declaration(format!(
                "Conflict occurred! Method name `{name}` is already used!"
            )));
        }
        Ok(())
    }

    /// Attaches a model-level function.
    pub fn static_method<F, Fut>(&mut self, name: &str, f: F) -> DocumentStoreResult<&mut Self>
    where
        F: Fn(ModelRef, Vec<Bson>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DocumentStoreResult<Bson>> + Send + 'static,
    {
        self.ensure_open()?;
        self.claim_static(name)?;
        self.statics.insert(
            name.to_string(),
            StaticMethod::User(Arc::new(move |model, args| f(model, args).boxed())),
        );
        Ok(self)
    }

    /// Attaches an instance-level function.
    pub fn method<F>(&mut self, name: &str, f: F) -> DocumentStoreResult<&mut Self>
    where
        F: Fn(&mut ModelInstance, Vec<Bson>) -> DocumentStoreResult<Bson> + Send + Sync + 'static,
    {
        self.ensure_open()?;
        self.claim_method(name)?;
        self.methods
            .insert(name.to_string(), InstanceMethod::Sync(Arc::new(f)));
        Ok(self)
    }

    /// Exposes the static method `name` on instances, with the instance's document
    /// prepended to the arguments.
    pub fn instantiate(&mut self, name: &str) -> DocumentStoreResult<&mut Self> {
        self.ensure_open()?;
        if !self.statics.contains_key(name) {
            return Err(DocumentStoreError::declaration(format!(
                "Cannot instantiate unknown static method `{name}`!"
            )));
        }
        self.claim_method(name)?;
        self.methods
            .insert(name.to_string(), InstanceMethod::Forward(name.to_string()));
        Ok(self)
    }

    /// Reserved for index declarations. Currently a no-op.
    pub fn index(&mut self, _fields: Document) -> DocumentStoreResult<&mut Self> {
        self.ensure_open()?;
        Ok(self)
    }

    /// Finalizes the model. Calling it again returns the same model.
    pub fn create(&mut self) -> ModelRef {
        if let Some(model) = &self.model {
            return model.clone();
        }

        let model = Arc::new(Model {
            name: self.name.clone(),
            collection: self.collection.clone(),
            backend: self.backend.clone(),
            registry: self.registry.clone(),
            filters: std::mem::take(&mut self.filters).into(),
            validations: std::mem::take(&mut self.validations).into(),
            mapping: std::mem::take(&mut self.mapping),
            inverse_mapping: std::mem::take(&mut self.inverse_mapping),
            relations: std::mem::take(&mut self.relations),
            statics: std::mem::take(&mut self.statics),
            methods: std::mem::take(&mut self.methods),
            getters: std::mem::take(&mut self.getters),
            setters: std::mem::take(&mut self.setters),
            constants: self.constants.clone(),
        });

        debug!(
            model = %model.name,
            collection = %model.collection,
            filters = model.filters.len(),
            validations = model.validations.len(),
            relations = model.relations.len(),
            "compiled model"
        );

        self.model = Some(model.clone());
        model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{DocumentStream, FindOptions, StoreBackendBuilder, WriteAck},
        rules::apply_validation,
    };
    use async_trait::async_trait;
    use bson::doc;

    #[derive(Debug)]
    struct NullStore;

    #[async_trait]
    impl StoreBackend for NullStore {
        async fn find(&self, _: &str, _: Document, _: FindOptions) -> DocumentStoreResult<Vec<Document>> {
            Ok(vec![])
        }
        async fn find_stream(&self, _: &str, _: Document, _: FindOptions) -> DocumentStoreResult<DocumentStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
        async fn find_one(&self, _: &str, _: Document, _: FindOptions) -> DocumentStoreResult<Option<Document>> {
            Ok(None)
        }
        async fn count(&self, _: &str, _: Document, _: Option<u64>) -> DocumentStoreResult<u64> {
            Ok(0)
        }
        async fn insert(&self, _: &str, documents: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
            Ok(documents)
        }
        async fn update(&self, _: &str, _: Document, _: Document, _: bool) -> DocumentStoreResult<WriteAck> {
            Ok(WriteAck::default())
        }
        async fn save(&self, _: &str, document: Document) -> DocumentStoreResult<Document> {
            Ok(document)
        }
        async fn remove(&self, _: &str, _: Document, _: bool) -> DocumentStoreResult<WriteAck> {
            Ok(WriteAck::default())
        }
    }

    struct NullStoreBuilder;

    #[async_trait]
    impl StoreBackendBuilder for NullStoreBuilder {
        type Backend = NullStore;

        async fn build(self) -> DocumentStoreResult<NullStore> {
            Ok(NullStore)
        }
    }

    fn builder(name: &str) -> SchemaBuilder {
        SchemaBuilder::detached(name, ModelOptions::default(), Arc::new(NullStore))
    }

    fn paths<M>(rules: &[Rule<M>]) -> Vec<&str> {
        rules.iter().map(|r| r.path.as_str()).collect()
    }

    #[tokio::test]
    async fn builds_with_a_backend_builder() {
        let backend = NullStoreBuilder.build().await.expect("builds");
        let mut schema = SchemaBuilder::detached("user", ModelOptions::default(), Arc::new(backend));
        assert_eq!(schema.create().collection(), "users");
    }

    #[test]
    fn orders_rules_per_leaf() {
        let mut schema = builder("post");
        schema
            .property(
                "title",
                PropertySpec::new(TypeKind::String)
                    .required()
                    .enumeration(EnumSpec::new(["a", "b"]))
                    .filter("trim")
                    .validation("notEmpty"),
            )
            .expect("declares");

        assert_eq!(paths(schema.filters()), vec!["title", "title"]);
        assert_eq!(paths(schema.validations()), vec!["title", "title", "title"]);
    }

    #[tokio::test]
    async fn required_then_enum_then_user_validations() {
        let mut schema = builder("post");
        schema
            .property(
                "status",
                PropertySpec::new("string")
                    .required()
                    .enumeration(EnumSpec::new(["draft", "", "live"]))
                    .validation(rules::validator(|_| Some(crate::error::ValidationError::new("{field} custom.")))),
            )
            .expect("declares");

        let errors = apply_validation(&Bson::Document(doc! { "status": "gone" }), schema.validations()).await;
        let messages = errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>();
        assert_eq!(
            messages,
            vec![
                "status must be one of those values: `draft`, `live` (without the quotes).",
                "status custom.",
            ]
        );
    }

    #[test]
    fn rehomes_array_element_rules() {
        let mut schema = builder("post");
        schema
            .property("tags", Decl::array(PropertySpec::new(TypeKind::String).required()))
            .expect("declares")
            .property(
                "authors",
                Decl::array(Decl::nested([("name", TypeKind::String), ("age", TypeKind::Number)])),
            )
            .expect("declares");

        assert_eq!(paths(schema.filters()), vec!["tags", "authors"]);
        assert_eq!(paths(schema.validations()), vec!["tags", "tags", "authors", "authors"]);
    }

    #[test]
    fn rejects_bad_declarations() {
        let mut schema = builder("post");

        assert!(schema.property("", TypeKind::String).is_err());
        assert!(schema.property("a..b", TypeKind::String).is_err());
        assert!(schema.property("a", "decimal").is_err());
        assert!(schema.property("list", TypeRef::Array(vec![])).is_err());
        assert!(schema
            .property("e", PropertySpec::new(TypeKind::String).enumeration(EnumSpec::new([Bson::String(String::new()), Bson::Null])))
            .is_err());

        schema.property("title", TypeKind::String).expect("declares");
        assert!(schema.property("title", TypeKind::Number).is_err());
    }

    #[test]
    fn method_names_conflict() {
        let mut schema = builder("post");
        schema
            .method("publish", |_, _| Ok(Bson::Null))
            .expect("declares");

        assert!(schema.method("publish", |_, _| Ok(Bson::Null)).is_err());
        assert!(schema.method("validate", |_, _| Ok(Bson::Null)).is_err());
        assert!(schema.static_method("find", |_, _| async { Ok(Bson::Null) }).is_err());
        assert!(schema.instantiate("missing").is_err());

        schema
            .static_method("archive", |_, _| async { Ok(Bson::Null) })
            .expect("declares")
            .instantiate("archive")
            .expect("instantiates");
        assert!(schema.method("archive", |_, _| Ok(Bson::Null)).is_err());
    }

    #[test]
    fn relations_install_accessors() {
        let mut schema = builder("post");
        schema
            .belongs_to("user", RelationOptions::new().required())
            .expect("declares")
            .has_many("comment", RelationOptions::new())
            .expect("declares");

        assert!(schema.statics.contains_key("populate_user"));
        assert!(schema.methods.contains_key("populate_comments"));
        assert_eq!(schema.relations["comments"].inverse, "post");
        assert_eq!(paths(schema.validations()), vec!["user"]);

        assert!(schema.belongs_to("user", RelationOptions::new()).is_err());
    }

    #[test]
    fn create_is_idempotent_and_seals_the_builder() {
        let mut schema = builder("blog-post");
        schema
            .constant(doc! { "MAX_TAGS": 5 })
            .expect("declares")
            .plugin(
                |schema, opts| {
                    let field = opts.get_str("field").unwrap_or("createdAt");
                    schema.property(field, TypeKind::Date)?;
                    Ok(())
                },
                &doc! { "field": "publishedAt" },
            )
            .expect("declares");

        let first = schema.create();
        let second = schema.create();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.collection(), "blogPosts");
        assert_eq!(first.constant("MAX_TAGS"), Some(&Bson::Int32(5)));
        assert!(schema.property("late", TypeKind::String).is_err());
        assert!(schema.index(doc! { "title": 1 }).is_err());
    }

    #[tokio::test]
    async fn array_leaf_rules_precede_element_rules() {
        let mut schema = builder("post");
        schema
            .property(
                "tags",
                PropertySpec::new(TypeRef::Array(vec![
                    PropertySpec::new(TypeKind::String)
                        .validation(rules::validator(|_| Some(crate::error::ValidationError::new("element failed."))))
                        .into(),
                ]))
                .required()
                .humanized("tags")
                .validation(rules::validator(|_| Some(crate::error::ValidationError::new("custom failed.")))),
            )
            .expect("declares");

        assert_eq!(paths(schema.validations()), vec!["tags", "tags", "tags", "tags"]);

        let messages = |errors: Vec<crate::error::ValidationError>| {
            errors.into_iter().map(|e| e.message).collect::<Vec<_>>()
        };

        let missing = apply_validation(&Bson::Document(doc! {}), schema.validations()).await;
        assert_eq!(messages(missing), vec!["tags is required.", "custom failed."]);

        let empty = apply_validation(&Bson::Document(doc! { "tags": [] }), schema.validations()).await;
        assert_eq!(messages(empty), vec!["custom failed."]);

        let filled = apply_validation(&Bson::Document(doc! { "tags": ["a"] }), schema.validations()).await;
        assert_eq!(messages(filled), vec!["custom failed.", "element failed."]);
    }

    #[tokio::test]
    async fn bypass_skips_type_defaults() {
        let mut schema = builder("sheet");
        schema
            .property(
                "raw",
                PropertySpec::new(TypeKind::Number)
                    .bypass(AddonKind::Filter)
                    .bypass(AddonKind::Validation),
            )
            .expect("declares")
            .property("loose", PropertySpec::new(TypeKind::Number).bypass(AddonKind::Filter))
            .expect("declares")
            .property("strict", TypeKind::Number)
            .expect("declares");

        assert_eq!(paths(schema.filters()), vec!["strict"]);
        assert_eq!(paths(schema.validations()), vec!["loose", "strict"]);

        let filtered = rules::apply_filtering(
            Bson::Document(doc! { "raw": "abc", "loose": "abc", "strict": "abc" }),
            schema.filters(),
            false,
        );
        let filtered = filtered.as_document().expect("document").clone();
        assert_eq!(filtered.get_str("raw").expect("raw"), "abc");
        assert_eq!(filtered.get_str("loose").expect("loose"), "abc");
        assert!(matches!(filtered.get("strict"), Some(Bson::Double(n)) if n.is_nan()));

        let errors = apply_validation(&Bson::Document(filtered), schema.validations()).await;
        let paths = errors.iter().map(|e| e.path.as_str()).collect::<Vec<_>>();
        assert_eq!(paths, vec!["loose", "strict"]);
        assert!(errors.iter().all(|e| e.message.ends_with("is not a valid number.")));
    }
}
