//! The lazy query builder.
//!
//! A [`Query`] accumulates criteria and find options and only touches the store when
//! executed. Multi-document queries are capped at [`DEFAULT_LIMIT`] results unless a
//! limit is set explicitly; single-document queries have no cap and reject `limit`.
//!
//! ```ignore
//! let posts = post
//!     .find(doc! { "status": "live" })
//!     .sort_by(&doc! { "createdAt": "desc", "title": 1 })?
//!     .skip(10)
//!     .limit(5)?
//!     .populate("user")
//!     .exec()
//!     .await?
//!     .into_instances();
//! ```

use bson::{Bson, Document};
use futures::future::try_join_all;
use indexmap::IndexMap;
use tracing::trace;

use crate::{
    backend::{DocumentStream, FindOptions},
    criteria::{Sort, SortDirection},
    error::{DocumentStoreError, DocumentStoreResult},
    instance::ModelInstance,
    model::ModelRef,
    value::{as_f64, assign, is_truthy},
};

/// Result cap applied to multi-document queries without an explicit limit.
pub const DEFAULT_LIMIT: u64 = 20;

/// Lifecycle of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Nothing but criteria set.
    Unconfigured,
    /// At least one option applied.
    Configured,
    /// A store call is in flight.
    Executing,
    /// The last execution succeeded.
    Fulfilled,
    /// The last execution failed.
    Rejected,
}

/// What an executed query produced.
#[derive(Debug)]
pub enum QueryResult {
    One(Option<ModelInstance>),
    Many(Vec<ModelInstance>),
    /// Lean single-document result.
    RawOne(Option<Document>),
    /// Lean multi-document result.
    RawMany(Vec<Document>),
}

impl QueryResult {
    /// The single instance, or the first of many. `None` for lean results.
    pub fn into_instance(self) -> Option<ModelInstance> {
        match self {
            QueryResult::One(instance) => instance,
            QueryResult::Many(instances) => instances.into_iter().next(),
            QueryResult::RawOne(_) | QueryResult::RawMany(_) => None,
        }
    }

    /// All instances. Empty for lean results.
    pub fn into_instances(self) -> Vec<ModelInstance> {
        match self {
            QueryResult::One(instance) => instance.into_iter().collect(),
            QueryResult::Many(instances) => instances,
            QueryResult::RawOne(_) | QueryResult::RawMany(_) => Vec::new(),
        }
    }

    /// The underlying documents, lean or not.
    pub fn into_documents(self) -> Vec<Document> {
        match self {
            QueryResult::One(instance) => instance
                .into_iter()
                .map(ModelInstance::into_document)
                .collect(),
            QueryResult::Many(instances) => instances
                .into_iter()
                .map(ModelInstance::into_document)
                .collect(),
            QueryResult::RawOne(doc) => doc.into_iter().collect(),
            QueryResult::RawMany(docs) => docs,
        }
    }
}

fn parse_direction(direction: &Bson) -> DocumentStoreResult<SortDirection> {
    let token = match direction {
        Bson::String(s) => s.clone(),
        other => match as_f64(other) {
            Some(n) if n == 1.0 => "1".to_string(),
            Some(n) if n == -1.0 => "-1".to_string(),
            _ => String::new(),
        },
    };

    match token.as_str() {
        "1" | "+" | "asc" => Ok(SortDirection::Asc),
        "-1" | "-" | "desc" => Ok(SortDirection::Desc),
        _ => Err(DocumentStoreError::declaration("Bad sorting direction!")),
    }
}

fn as_count(value: &Bson, message: &str) -> DocumentStoreResult<Option<u64>> {
    match as_f64(value) {
        Some(n) if n.is_infinite() && n > 0.0 => Ok(None),
        Some(n) if n.is_finite() && n >= 0.0 => Ok(Some(n as u64)),
        _ => Err(DocumentStoreError::declaration(message)),
    }
}

fn merge_into(target: &mut Document, source: &Document) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Bson::Document(existing)), Bson::Document(incoming)) => merge_into(existing, incoming),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// A lazily executed query against one model.
#[derive(Debug, Clone)]
pub struct Query {
    model: ModelRef,
    criteria: Document,
    fields: Option<Document>,
    sort: Option<Sort>,
    skip: Option<u64>,
    limit: Option<u64>,
    populations: IndexMap<String, Document>,
    single: bool,
    lean: bool,
    state: QueryState,
}

impl Query {
    pub(crate) fn new(model: ModelRef, criteria: Document, single: bool) -> Self {
        Self {
            model,
            criteria,
            fields: None,
            sort: None,
            skip: None,
            limit: if single { None } else { Some(DEFAULT_LIMIT) },
            populations: IndexMap::new(),
            single,
            lean: false,
            state: QueryState::Unconfigured,
        }
    }

    pub fn criteria(&self) -> &Document {
        &self.criteria
    }

    pub fn is_single(&self) -> bool {
        self.single
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    /// The options the store will be called with.
    pub fn find_options(&self) -> FindOptions {
        FindOptions {
            projection: self.fields.clone(),
            sort: self.sort.clone(),
            skip: self.skip,
            limit: if self.single { None } else { self.limit },
        }
    }

    fn configured(mut self) -> Self {
        self.state = QueryState::Configured;
        self
    }

    /// Restricts returned fields to the space-separated names in `fields`.
    pub fn select(self, fields: &str) -> Self {
        self.select_fields(fields.split_whitespace())
    }

    /// Restricts returned fields to `fields`.
    pub fn select_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(
            fields
                .into_iter()
                .map(|field| (field.into(), Bson::Boolean(true)))
                .collect(),
        );
        self.configured()
    }

    /// Sorts ascending on a single field.
    pub fn sort(mut self, field: &str) -> Self {
        self.sort = Some(Sort::Raw(field.to_string()));
        self.configured()
    }

    /// Sorts by several fields in declaration order. Directions may be `1`, `-1`,
    /// `"+"`, `"-"`, `"asc"` or `"desc"`.
    pub fn sort_by(mut self, spec: &Document) -> DocumentStoreResult<Self> {
        let fields = spec
            .iter()
            .map(|(field, direction)| Ok((field.clone(), parse_direction(direction)?)))
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        self.sort = Some(Sort::Fields(fields));
        Ok(self.configured())
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self.configured()
    }

    /// Caps the number of results. Fails on single-document queries.
    pub fn limit(mut self, limit: u64) -> DocumentStoreResult<Self> {
        self.ensure_multi()?;
        self.limit = Some(limit);
        Ok(self.configured())
    }

    /// Removes the result cap. Fails on single-document queries.
    pub fn no_limit(mut self) -> DocumentStoreResult<Self> {
        self.ensure_multi()?;
        self.limit = None;
        Ok(self.configured())
    }

    fn ensure_multi(&self) -> DocumentStoreResult<()> {
        if self.single {
            return Err(DocumentStoreError::declaration(
                "Cannot set limit when querying for a single document!",
            ));
        }
        Ok(())
    }

    /// Populates the relation on `field` after execution.
    pub fn populate(self, field: &str) -> Self {
        self.populate_with(field, Document::new())
    }

    /// Populates the relation on `field` with extra query options for the lookup.
    pub fn populate_with(mut self, field: &str, options: Document) -> Self {
        self.populations.insert(field.to_string(), options);
        self.configured()
    }

    /// Skips instance construction and population; results are raw documents.
    pub fn lean(mut self) -> Self {
        self.lean = true;
        self.configured()
    }

    /// Applies a bag of options.
    ///
    /// `find` is merged into the criteria. `select`, `sort`, `skip`, `limit`,
    /// `populate` and `lean` configure the query as their methods do. Other keys are
    /// ignored.
    pub fn apply(mut self, options: &Document) -> DocumentStoreResult<Self> {
        for (key, value) in options {
            self = match (key.as_str(), value) {
                ("find", Bson::Document(criteria)) => {
                    merge_into(&mut self.criteria, criteria);
                    self
                }
                ("select", Bson::String(fields)) => self.select(fields),
                ("select", Bson::Array(fields)) => {
                    let names = fields
                        .iter()
                        .map(|field| match field {
                            Bson::String(name) => Ok(name.clone()),
                            _ => Err(DocumentStoreError::declaration("Bad fields to select!")),
                        })
                        .collect::<DocumentStoreResult<Vec<_>>>()?;
                    self.select_fields(names)
                }
                ("select", _) => return Err(DocumentStoreError::declaration("Bad fields to select!")),
                ("sort", Bson::String(field)) => self.sort(field),
                ("sort", Bson::Document(spec)) => self.sort_by(spec)?,
                ("sort", _) => return Err(DocumentStoreError::declaration("Bad sorting condition!")),
                ("skip", value) => {
                    let skip = as_count(value, "Bad querying skipping!")?;
                    self.skip(skip.unwrap_or(0))
                }
                ("limit", value) => {
                    self.ensure_multi()?;
                    match as_count(value, "Bad querying limit!")? {
                        Some(limit) => self.limit(limit)?,
                        None => self.no_limit()?,
                    }
                }
                ("populate", Bson::String(field)) => self.populate(field),
                ("populate", Bson::Array(fields)) => {
                    for field in fields {
                        let Bson::String(field) = field else {
                            return Err(DocumentStoreError::declaration(
                                "Field(s) to populate must be a string/an array/an object!",
                            ));
                        };
                        self = self.populate(field);
                    }
                    self
                }
                ("populate", Bson::Document(fields)) => {
                    for (field, options) in fields {
                        let options = match options {
                            Bson::Document(options) => options.clone(),
                            _ => Document::new(),
                        };
                        self = self.populate_with(field, options);
                    }
                    self
                }
                ("populate", _) => {
                    return Err(DocumentStoreError::declaration(
                        "Field(s) to populate must be a string/an array/an object!",
                    ));
                }
                ("lean", value) if is_truthy(value) => self.lean(),
                _ => self,
            };
        }

        Ok(self)
    }

    fn check_populations(&self) -> DocumentStoreResult<()> {
        match self
            .populations
            .keys()
            .find(|field| self.model.relation(field).is_none())
        {
            Some(field) => Err(DocumentStoreError::BadPopulation(field.clone())),
            None => Ok(()),
        }
    }

    /// Populates every requested relation on `instances` concurrently. Values are
    /// assigned only after all of them resolved.
    async fn populate_instances(&self, instances: &mut [ModelInstance]) -> DocumentStoreResult<()> {
        if self.populations.is_empty() || instances.is_empty() {
            return Ok(());
        }

        let pending = {
            let holders = instances
                .iter()
                .map(ModelInstance::document)
                .collect::<Vec<_>>();

            self.populations
                .iter()
                .filter_map(|(field, options)| {
                    self.model
                        .relation(field)
                        .map(|relation| relation.resolve(&self.model, &holders, !self.single, options))
                })
                .collect::<Vec<_>>()
        };

        let resolved = try_join_all(pending).await?;

        for (field, values) in self.populations.keys().zip(resolved) {
            for (instance, value) in instances.iter_mut().zip(values) {
                assign(instance.document_mut(), field, value);
            }
        }

        Ok(())
    }

    async fn run(&self) -> DocumentStoreResult<QueryResult> {
        let collection = self.model.collection();
        let backend = self.model.backend();

        trace!(
            model = %self.model.name(),
            collection,
            single = self.single,
            lean = self.lean,
            populations = self.populations.len(),
            "executing query"
        );

        if self.single {
            let found = backend
                .find_one(collection, self.criteria.clone(), self.find_options())
                .await?;

            return match found {
                None if self.lean => Ok(QueryResult::RawOne(None)),
                None => Ok(QueryResult::One(None)),
                Some(doc) if self.lean => Ok(QueryResult::RawOne(Some(doc))),
                Some(doc) => {
                    let mut instances = vec![self.model.wrap(doc)];
                    self.populate_instances(&mut instances).await?;
                    Ok(QueryResult::One(instances.pop()))
                }
            };
        }

        let docs = backend
            .find(collection, self.criteria.clone(), self.find_options())
            .await?;

        if self.lean {
            return Ok(QueryResult::RawMany(docs));
        }

        let mut instances = docs
            .into_iter()
            .map(|doc| self.model.wrap(doc))
            .collect::<Vec<_>>();
        self.populate_instances(&mut instances).await?;

        Ok(QueryResult::Many(instances))
    }

    /// Executes the query.
    ///
    /// Unknown population fields fail with [`DocumentStoreError::BadPopulation`] before
    /// the store is called. All requested populations run concurrently; if any of them
    /// fails the whole execution fails.
    pub async fn exec(&mut self) -> DocumentStoreResult<QueryResult> {
        if let Err(err) = self.check_populations() {
            self.state = QueryState::Rejected;
            return Err(err);
        }

        self.state = QueryState::Executing;
        let result = self.run().await;
        self.state = match result {
            Ok(_) => QueryState::Fulfilled,
            Err(_) => QueryState::Rejected,
        };

        result
    }

    /// Opens a raw cursor over the results, without instances or population.
    ///
    /// Fails on single-document queries before the store is called.
    pub async fn stream(&mut self) -> DocumentStoreResult<DocumentStream> {
        if self.single {
            return Err(DocumentStoreError::declaration(
                "Cannot stream when querying for a single document!",
            ));
        }

        self.state = QueryState::Executing;
        let result = self
            .model
            .backend()
            .find_stream(self.model.collection(), self.criteria.clone(), self.find_options())
            .await;
        self.state = match result {
            Ok(_) => QueryState::Fulfilled,
            Err(_) => QueryState::Rejected,
        };

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn parses_sort_directions() {
        for asc in [Bson::Int32(1), Bson::String("+".into()), Bson::String("asc".into()), Bson::Double(1.0)] {
            assert_eq!(parse_direction(&asc).expect("direction"), SortDirection::Asc);
        }
        for desc in [Bson::Int64(-1), Bson::String("-".into()), Bson::String("desc".into()), Bson::String("-1".into())] {
            assert_eq!(parse_direction(&desc).expect("direction"), SortDirection::Desc);
        }
        assert!(parse_direction(&Bson::Int32(0)).is_err());
        assert!(parse_direction(&Bson::String("up".into())).is_err());
    }

    #[test]
    fn counts_accept_numbers_only() {
        assert_eq!(as_count(&Bson::Int32(5), "bad").expect("count"), Some(5));
        assert_eq!(as_count(&Bson::Double(f64::INFINITY), "bad").expect("count"), None);
        assert!(as_count(&Bson::String("5".into()), "bad").is_err());
        assert!(as_count(&Bson::Int32(-1), "bad").is_err());
    }

    #[test]
    fn merges_criteria_deeply() {
        let mut criteria = doc! { "age": { "$gt": 18 }, "status": "live" };
        merge_into(&mut criteria, &doc! { "age": { "$lt": 65 }, "role": "admin" });

        assert_eq!(
            criteria,
            doc! { "age": { "$gt": 18, "$lt": 65 }, "status": "live", "role": "admin" }
        );
    }
}
