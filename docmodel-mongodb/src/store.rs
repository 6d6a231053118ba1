use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    Client, Collection as MongoCollection,
    options::{ClientOptions, FindOneOptions, FindOptions as MongoFindOptions},
};
use tracing::{debug, trace};

use docmodel_core::{
    backend::{DocumentStream, FindOptions, StoreBackend, StoreBackendBuilder, WriteAck},
    error::{DocumentStoreError, DocumentStoreResult},
    value::is_truthy,
};

fn backend_error(err: mongodb::error::Error) -> DocumentStoreError {
    DocumentStoreError::Backend(err.to_string())
}

fn ensure_id(doc: &mut Document) {
    if !doc.get("_id").is_some_and(is_truthy) {
        doc.insert("_id", ObjectId::new());
    }
}

fn is_operator_update(update: &Document) -> bool {
    update.keys().any(|key| key.starts_with('$'))
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    fn find_options(options: FindOptions) -> MongoFindOptions {
        let limit = options.effective_limit();
        let mut mongo = MongoFindOptions::default();
        mongo.projection = options.projection;
        mongo.sort = options.sort.map(|sort| sort.to_document());
        mongo.skip = options.skip;
        mongo.limit = limit.map(|limit| limit as i64);
        mongo
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn find(&self, collection: &str, criteria: Document, options: FindOptions) -> DocumentStoreResult<Vec<Document>> {
        trace!(collection, ?criteria, "find");

        self.get_collection(collection)
            .find(criteria)
            .with_options(Self::find_options(options))
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn find_stream(&self, collection: &str, criteria: Document, options: FindOptions) -> DocumentStoreResult<DocumentStream> {
        trace!(collection, ?criteria, "find_stream");

        Ok(self
            .get_collection(collection)
            .find(criteria)
            .with_options(Self::find_options(options))
            .await
            .map_err(backend_error)?
            .map_err(backend_error)
            .boxed())
    }

    async fn find_one(&self, collection: &str, criteria: Document, options: FindOptions) -> DocumentStoreResult<Option<Document>> {
        trace!(collection, ?criteria, "find_one");

        let mut mongo = FindOneOptions::default();
        mongo.projection = options.projection;
        mongo.sort = options.sort.map(|sort| sort.to_document());
        mongo.skip = options.skip;

        self.get_collection(collection)
            .find_one(criteria)
            .with_options(mongo)
            .await
            .map_err(backend_error)
    }

    async fn count(&self, collection: &str, criteria: Document, limit: Option<u64>) -> DocumentStoreResult<u64> {
        let mongo_collection = self.get_collection(collection);
        let action = mongo_collection.count_documents(criteria);

        match limit.filter(|limit| *limit > 0) {
            Some(limit) => action.limit(limit).await,
            None => action.await,
        }
        .map_err(backend_error)
    }

    async fn insert(&self, collection: &str, mut documents: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
        if documents.is_empty() {
            return Ok(documents);
        }

        documents.iter_mut().for_each(ensure_id);

        self.get_collection(collection)
            .insert_many(documents.iter())
            .await
            .map_err(backend_error)?;

        trace!(collection, inserted = documents.len(), "insert");
        Ok(documents)
    }

    async fn update(&self, collection: &str, criteria: Document, update: Document, multi: bool) -> DocumentStoreResult<WriteAck> {
        let target = self.get_collection(collection);

        let result = match (is_operator_update(&update), multi) {
            (true, true) => target.update_many(criteria, update).await,
            (true, false) => target.update_one(criteria, update).await,
            (false, _) => target.replace_one(criteria, update).await,
        }
        .map_err(backend_error)?;

        trace!(collection, matched = result.matched_count, multi, "update");
        Ok(WriteAck {
            affected: result.matched_count,
        })
    }

    async fn save(&self, collection: &str, mut document: Document) -> DocumentStoreResult<Document> {
        ensure_id(&mut document);
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);

        self.get_collection(collection)
            .replace_one(doc! { "_id": id }, &document)
            .upsert(true)
            .await
            .map_err(backend_error)?;

        trace!(collection, "save");
        Ok(document)
    }

    async fn remove(&self, collection: &str, criteria: Document, single: bool) -> DocumentStoreResult<WriteAck> {
        let target = self.get_collection(collection);

        let result = if single {
            target.delete_one(criteria).await
        } else {
            target.delete_many(criteria).await
        }
        .map_err(backend_error)?;

        trace!(collection, deleted = result.deleted_count, single, "remove");
        Ok(WriteAck {
            affected: result.deleted_count,
        })
    }

    async fn shutdown(&self) -> DocumentStoreResult<()> {
        self.client.clone().shutdown().await;

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        debug!(database = %self.database, "connecting to mongodb");

        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
