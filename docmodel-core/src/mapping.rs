//! Field-name mapping between a model's internal property paths and the names used
//! externally (for example in an API payload).
//!
//! A [`MappingSpec`] is declared as a nested tree. Leaves map an internal key to an
//! external name; nodes may rename their own level and recurse. The compiled tables map
//! full dotted paths in both directions. Keys starting with `$` are system keys and are
//! never renamed.

use std::{collections::HashMap, fmt, sync::Arc};

use bson::{Bson, Document};
use indexmap::IndexMap;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// A per-key value transform applied after renaming.
pub type TransformFn = Arc<dyn Fn(Bson) -> Bson + Send + Sync>;

/// One entry of a mapping level.
#[derive(Clone, Debug)]
pub enum MappingEntry {
    /// The external name of a leaf key.
    Name(String),
    /// A nested level.
    Node(MappingSpec),
}

/// Declarative mapping tree.
///
/// ```ignore
/// let mapping = MappingSpec::new()
///     .field("firstName", "first_name")
///     .node("address", MappingSpec::new().rename("addr").field("city", "c"))
///     .transform("c", |v| v);
/// ```
#[derive(Clone, Default)]
pub struct MappingSpec {
    rename: Option<String>,
    entries: IndexMap<String, MappingEntry>,
    transforms: HashMap<String, TransformFn>,
    inverse_transforms: HashMap<String, TransformFn>,
}

impl fmt::Debug for MappingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingSpec")
            .field("rename", &self.rename)
            .field("entries", &self.entries)
            .field("transforms", &self.transforms.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl MappingSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `key` to the external name `name`.
    pub fn field(mut self, key: impl Into<String>, name: impl Into<String>) -> Self {
        self.entries.insert(key.into(), MappingEntry::Name(name.into()));
        self
    }

    /// Declares a nested level under `key`.
    pub fn node(mut self, key: impl Into<String>, node: MappingSpec) -> Self {
        self.entries.insert(key.into(), MappingEntry::Node(node));
        self
    }

    /// Renames this level itself. Ignored on the root level.
    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.rename = Some(name.into());
        self
    }

    /// Attaches a forward transform to the resolved external key `key`.
    pub fn transform<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(Bson) -> Bson + Send + Sync + 'static,
    {
        self.transforms.insert(key.into(), Arc::new(f));
        self
    }

    /// Attaches an inverse transform to the resolved internal key `key`. Only read from
    /// the root level.
    pub fn inverse_transform<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(Bson) -> Bson + Send + Sync + 'static,
    {
        self.inverse_transforms.insert(key.into(), Arc::new(f));
        self
    }
}

/// A compiled, one-directional mapping table.
#[derive(Clone, Default)]
pub struct CompiledMapping {
    names: HashMap<String, String>,
    transforms: HashMap<String, TransformFn>,
}

impl fmt::Debug for CompiledMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledMapping")
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl CompiledMapping {
    /// Mapped name for a full dotted path, if any.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.names.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn compile_into(
    spec: &MappingSpec,
    prefix: &str,
    compiled_prefix: &str,
    compiled: &mut CompiledMapping,
) {
    compiled
        .transforms
        .extend(spec.transforms.iter().map(|(k, f)| (k.clone(), f.clone())));

    for (key, entry) in &spec.entries {
        let full_key = format!("{prefix}{key}");

        match entry {
            MappingEntry::Name(name) => {
                compiled
                    .names
                    .insert(full_key, format!("{compiled_prefix}{name}"));
            }
            MappingEntry::Node(node) => {
                let external = format!(
                    "{compiled_prefix}{}",
                    node.rename.as_deref().unwrap_or(key)
                );
                compile_into(
                    node,
                    &format!("{full_key}."),
                    &format!("{external}."),
                    compiled,
                );
                compiled.names.insert(full_key, external);
            }
        }
    }
}

/// Compiles the forward (internal to external) and inverse tables.
///
/// Fails when two internal paths map onto the same external path, since the inverse
/// would then be ambiguous.
pub fn compile(spec: &MappingSpec) -> DocumentStoreResult<(CompiledMapping, CompiledMapping)> {
    let mut forward = CompiledMapping::default();
    compile_into(spec, "", "", &mut forward);

    let mut inverse = CompiledMapping {
        names: HashMap::with_capacity(forward.names.len()),
        transforms: spec.inverse_transforms.clone(),
    };
    for (internal, external) in &forward.names {
        if let Some(previous) = inverse.names.insert(external.clone(), internal.clone()) {
            return Err(DocumentStoreError::declaration(format!(
                "Conflicting mapping: `{previous}` and `{internal}` both map to `{external}`!"
            )));
        }
    }

    Ok((forward, inverse))
}

/// Renames the keys of `doc` through `mapping`, depth first.
///
/// Nested documents are walked with the original key appended to the prefix. A key
/// without a dot keeps only the last segment of its mapped path; a dotted key keeps the
/// full mapped path. Transforms run on the already renamed and recursed value.
pub fn transform(doc: &Document, mapping: &CompiledMapping) -> Document {
    transform_level(doc, mapping, "")
}

fn transform_level(doc: &Document, mapping: &CompiledMapping, prefix: &str) -> Document {
    let mut out = Document::new();

    for (key, value) in doc {
        let system = key.starts_with('$');

        let mut full_key = if system {
            key.clone()
        } else {
            let path = format!("{prefix}{key}");
            mapping.get(&path).map(str::to_string).unwrap_or(path)
        };

        if !key.contains('.') {
            full_key = full_key
                .rsplit('.')
                .next()
                .unwrap_or_default()
                .to_string();
        }

        let mut value = match value {
            Bson::Document(inner) => {
                let nested_prefix = if system {
                    prefix.to_string()
                } else {
                    format!("{prefix}{key}.")
                };
                Bson::Document(transform_level(inner, mapping, &nested_prefix))
            }
            other => other.clone(),
        };

        if let Some(f) = mapping.transforms.get(&full_key) {
            value = f(value);
        }

        out.insert(full_key, value);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};

    fn spec() -> MappingSpec {
        MappingSpec::new()
            .field("firstName", "first_name")
            .node(
                "address",
                MappingSpec::new()
                    .rename("addr")
                    .field("city", "c"),
            )
    }

    #[test]
    fn renames_nested_keys() {
        let (forward, inverse) = compile(&spec()).expect("compiles");

        assert_eq!(forward.get("address.city"), Some("addr.c"));
        assert_eq!(inverse.get("addr.c"), Some("address.city"));

        let doc = doc! { "firstName": "Ada", "address": { "city": "London" }, "age": 36 };
        let out = transform(&doc, &forward);
        assert_eq!(out, doc! { "first_name": "Ada", "addr": { "c": "London" }, "age": 36 });
    }

    #[test]
    fn inverse_restores_original_names() {
        let (forward, inverse) = compile(&spec()).expect("compiles");
        let id = ObjectId::new();
        let doc = doc! { "_id": id, "firstName": "Ada", "address": { "city": "London" } };

        assert_eq!(transform(&transform(&doc, &forward), &inverse), doc);
    }

    #[test]
    fn system_keys_and_dotted_keys() {
        let (forward, _) = compile(&spec()).expect("compiles");
        let criteria = doc! { "$set": { "firstName": "Bo" }, "address.city": "Oslo" };

        let out = transform(&criteria, &forward);
        assert_eq!(out, doc! { "$set": { "first_name": "Bo" }, "addr.c": "Oslo" });
    }

    #[test]
    fn applies_transforms_and_rejects_collisions() {
        let mapping = MappingSpec::new()
            .field("score", "points")
            .transform("points", |v| match v {
                Bson::Int32(n) => Bson::Int32(n * 10),
                other => other,
            });
        let (forward, _) = compile(&mapping).expect("compiles");
        assert_eq!(transform(&doc! { "score": 4 }, &forward), doc! { "points": 40 });

        let clash = MappingSpec::new().field("a", "x").field("b", "x");
        assert!(matches!(compile(&clash), Err(DocumentStoreError::Declaration(_))));
    }
}
