//! Reference relations between models and their population.
//!
//! Populating a relation replaces a field of each holder document with the referenced
//! document(s). Lookups for all holders are batched into a single query against the
//! target model. Resolution computes the new field values without touching the
//! holders; callers assign them once every relation of a query has resolved, so a
//! failing population never leaves a document half-populated.

use std::collections::HashMap;

use bson::{Bson, Document, doc};
use futures::{FutureExt, future::BoxFuture};
use tracing::debug;

use crate::{
    error::DocumentStoreResult,
    model::Model,
    value::{id_key, is_truthy, lookup},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// The holder stores the target's id in `field`.
    BelongsTo,
    /// One target stores the holder's id in `inverse`.
    HasOne,
    /// Many targets store the holder's id in `inverse`.
    HasMany,
}

/// A declared relation.
#[derive(Debug, Clone)]
pub struct Relation {
    pub(crate) kind: RelationKind,
    pub(crate) target: String,
    pub(crate) field: String,
    pub(crate) inverse: String,
    pub(crate) query: Document,
}

impl Relation {
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// Name of the target model.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Field of the holder receiving the populated value.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Field of the target referencing the holder (`_id` for `BelongsTo`).
    pub fn inverse(&self) -> &str {
        &self.inverse
    }

    /// Resolves the populated value for each of `holders`, in order.
    ///
    /// `multi` selects batch semantics (one unbounded `find`) over a single lookup.
    /// `options` are query options merged over the relation's own.
    ///
    /// Holders whose reference matches nothing resolve to `Bson::Null` (to-one) or an
    /// empty array (to-many).
    pub(crate) fn resolve(
        &self,
        owner: &Model,
        holders: &[&Document],
        multi: bool,
        options: &Document,
    ) -> BoxFuture<'static, DocumentStoreResult<Vec<Bson>>> {
        let target = match owner.lookup(&self.target) {
            Ok(target) => target,
            Err(err) => return async move { Err(err) }.boxed(),
        };

        let mut merged = self.query.clone();
        merged.extend(options.clone());

        debug!(
            model = %owner.name(),
            field = %self.field,
            target = %self.target,
            holders = holders.len(),
            "populating relation"
        );

        match self.kind {
            RelationKind::BelongsTo => {
                let ids = holders
                    .iter()
                    .map(|holder| lookup(holder, &self.field).cloned().unwrap_or(Bson::Null))
                    .collect::<Vec<_>>();

                async move {
                    if !multi {
                        let id = ids.into_iter().next().unwrap_or(Bson::Null);
                        if !is_truthy(&id) {
                            return Ok(vec![Bson::Null]);
                        }

                        let found = target
                            .find_one(doc! { "_id": id })
                            .apply(&merged)?
                            .exec()
                            .await?
                            .into_documents();

                        return Ok(vec![found.into_iter().next().map_or(Bson::Null, Bson::Document)]);
                    }

                    let wanted = ids
                        .iter()
                        .filter(|id| is_truthy(id))
                        .cloned()
                        .collect::<Vec<_>>();

                    let found = target
                        .find(doc! { "_id": { "$in": wanted } })
                        .no_limit()?
                        .apply(&merged)?
                        .exec()
                        .await?
                        .into_documents();

                    let index = found
                        .into_iter()
                        .filter_map(|doc| {
                            let key = id_key(doc.get("_id")?);
                            Some((key, doc))
                        })
                        .collect::<HashMap<_, _>>();

                    Ok(ids
                        .iter()
                        .map(|id| {
                            if !is_truthy(id) {
                                return Bson::Null;
                            }
                            index
                                .get(&id_key(id))
                                .cloned()
                                .map_or(Bson::Null, Bson::Document)
                        })
                        .collect())
                }
                .boxed()
            }
            RelationKind::HasOne | RelationKind::HasMany => {
                let many = self.kind == RelationKind::HasMany;
                let inverse = self.inverse.clone();
                let ids = holders
                    .iter()
                    .map(|holder| holder.get("_id").cloned().unwrap_or(Bson::Null))
                    .collect::<Vec<_>>();

                async move {
                    let criteria = if multi {
                        doc! { inverse.as_str(): { "$in": ids.clone() } }
                    } else {
                        doc! { inverse.as_str(): ids.first().cloned().unwrap_or(Bson::Null) }
                    };

                    let query = if many || multi {
                        target.find(criteria).no_limit()?
                    } else {
                        target.find_one(criteria)
                    };

                    let found = query
                        .apply(&merged)?
                        .exec()
                        .await?
                        .into_documents();

                    let empty = if many { Bson::Array(Vec::new()) } else { Bson::Null };
                    let mut values = vec![empty; ids.len()];

                    let mut slots: HashMap<String, Vec<usize>> = HashMap::new();
                    for (idx, id) in ids.iter().enumerate() {
                        slots.entry(id_key(id)).or_default().push(idx);
                    }

                    for doc in found {
                        let Some(key) = lookup(&doc, &inverse).filter(|v| is_truthy(v)).map(id_key) else {
                            continue;
                        };
                        let Some(indices) = slots.get(&key) else {
                            continue;
                        };

                        for &idx in indices {
                            match &mut values[idx] {
                                Bson::Array(bucket) => bucket.push(Bson::Document(doc.clone())),
                                slot => *slot = Bson::Document(doc.clone()),
                            }
                        }
                    }

                    Ok(values)
                }
                .boxed()
            }
        }
    }
}
