//! MongoDB document store

use super::{DocumentStore, StaleFilter, StoreResult, CLUSTER_FIELD, IDENTIFIER_FIELD};
use crate::error::StoreError;
use async_trait::async_trait;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::options::ReplaceOptions;
use mongodb::{Client, Database};
use serde_json::Value;
use tracing::info;

/// Store handle backed by one MongoDB database
#[derive(Clone, Debug)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// Connect and verify the server answers a ping
    pub async fn connect(uri: &str, database: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        let database = client.database(database);
        database.run_command(doc! { "ping": 1 }, None).await?;

        info!(database = %database.name(), "Connected to MongoDB");
        Ok(Self { database })
    }

    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

fn to_document(value: &Value) -> StoreResult<Document> {
    if !value.is_object() {
        return Err(StoreError::NotAnObject);
    }
    Ok(bson::to_document(value)?)
}

fn key_query(identifier: &str) -> Document {
    let mut query = Document::new();
    query.insert(IDENTIFIER_FIELD, identifier);
    query
}

/// Build the `$nin` query selecting stale documents
pub fn stale_query(filter: &StaleFilter) -> Document {
    let mut query = Document::new();
    query.insert(
        IDENTIFIER_FIELD,
        doc! { "$nin": Bson::from(filter.live_ids.clone()) },
    );
    if let Some(cluster) = &filter.cluster {
        query.insert(CLUSTER_FIELD, cluster.as_str());
    }
    query
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn upsert(&self, collection: &str, identifier: &str, document: Value) -> StoreResult<()> {
        let replacement = to_document(&document)?;
        let options = ReplaceOptions::builder().upsert(true).build();

        self.collection(collection)
            .replace_one(key_query(identifier), replacement, options)
            .await?;
        Ok(())
    }

    async fn delete_stale(&self, collection: &str, filter: &StaleFilter) -> StoreResult<u64> {
        let result = self
            .collection(collection)
            .delete_many(stale_query(filter), None)
            .await?;
        Ok(result.deleted_count)
    }

    async fn insert(&self, collection: &str, document: Value) -> StoreResult<()> {
        let document = to_document(&document)?;
        self.collection(collection).insert_one(document, None).await?;
        Ok(())
    }
}
