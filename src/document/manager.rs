//! MongoDB client manager with generic CRUD and pagination.

use crate::db::ResourceSlot;
use crate::document::settings::DocumentSettings;
use crate::error::{DbError, DbResult};
use futures_util::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct ClientHandle {
    client: Client,
    database: Database,
    settings: DocumentSettings,
}

/// Options for `find_many`. Zero `limit` or `skip` means unset.
#[derive(Debug, Clone, Default)]
pub struct FindSpec {
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
}

impl FindSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// One page of a paginated query.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub items: Vec<Document>,
}

impl Page {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size)
    }
}

#[derive(Debug)]
pub struct DocumentManager {
    slot: ResourceSlot<ClientHandle>,
}

impl Default for DocumentManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Render an inserted id: ObjectIds as hex, strings as-is.
fn id_to_string(id: Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s,
        other => other.to_string(),
    }
}

impl DocumentManager {
    pub fn new() -> Self {
        Self {
            slot: ResourceSlot::new("MongoDB client"),
        }
    }

    /// Connect once, pinging the server on each of up to `settings.retries`
    /// attempts. The error from the last attempt is returned.
    pub async fn init_client(&self, settings: DocumentSettings) -> DbResult<&Self> {
        settings.validate()?;

        let (handle, created) = self
            .slot
            .get_or_init(|| connect_with_retries(&settings))
            .await?;

        if created {
            info!(
                hosts = %handle.settings.host_list(),
                database = %handle.settings.database,
                max_pool_size = handle.settings.max_pool_size,
                "Connected to MongoDB"
            );
        } else {
            debug!("MongoDB client already initialized, ignoring new settings");
        }
        Ok(self)
    }

    /// The configured database.
    pub fn get_db(&self) -> DbResult<Database> {
        self.slot.get().map(|h| h.database.clone())
    }

    pub fn get_client(&self) -> DbResult<Client> {
        self.slot.get().map(|h| h.client.clone())
    }

    pub fn settings(&self) -> Option<DocumentSettings> {
        self.slot.get().ok().map(|h| h.settings.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.is_initialized()
    }

    pub async fn close(&self) {
        if let Some(handle) = self.slot.take().await {
            handle.client.clone().shutdown().await;
            info!("MongoDB client closed");
        }
    }

    pub async fn ping(&self) -> DbResult<()> {
        self.get_db()?.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    fn collection(&self, name: &str) -> DbResult<Collection<Document>> {
        Ok(self.get_db()?.collection::<Document>(name))
    }

    // =========================================================================
    // CRUD
    // =========================================================================

    pub async fn insert_one(&self, collection: &str, document: Document) -> DbResult<String> {
        let result = self.collection(collection)?.insert_one(document).await?;
        Ok(id_to_string(result.inserted_id))
    }

    /// Insert `documents` and return their ids in input order.
    pub async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DbResult<Vec<String>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let result = self.collection(collection)?.insert_many(documents).await?;
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids.into_iter().map(|(_, id)| id_to_string(id)).collect())
    }

    pub async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> DbResult<Option<Document>> {
        let coll = self.collection(collection)?;
        let mut find = coll.find_one(filter);
        if let Some(projection) = projection {
            find = find.projection(projection);
        }
        Ok(find.await?)
    }

    pub async fn find_many(
        &self,
        collection: &str,
        filter: Document,
        spec: FindSpec,
    ) -> DbResult<Vec<Document>> {
        let coll = self.collection(collection)?;
        let mut find = coll.find(filter);
        if let Some(projection) = spec.projection {
            find = find.projection(projection);
        }
        if let Some(sort) = spec.sort {
            find = find.sort(sort);
        }
        if let Some(skip) = spec.skip.filter(|s| *s > 0) {
            find = find.skip(skip);
        }
        if let Some(limit) = spec.limit.filter(|l| *l > 0) {
            find = find.limit(limit);
        }
        let cursor = find.await?;
        Ok(cursor.try_collect().await?)
    }

    /// Apply `update` to the first match. Returns the modified count.
    pub async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DbResult<u64> {
        let result = self
            .collection(collection)?
            .update_one(filter, update)
            .await?;
        Ok(result.modified_count)
    }

    pub async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DbResult<u64> {
        let result = self
            .collection(collection)?
            .update_many(filter, update)
            .await?;
        Ok(result.modified_count)
    }

    pub async fn delete_one(&self, collection: &str, filter: Document) -> DbResult<u64> {
        let result = self.collection(collection)?.delete_one(filter).await?;
        Ok(result.deleted_count)
    }

    pub async fn delete_many(&self, collection: &str, filter: Document) -> DbResult<u64> {
        let result = self.collection(collection)?.delete_many(filter).await?;
        Ok(result.deleted_count)
    }

    /// Count matching documents. `None` counts the whole collection.
    pub async fn count(&self, collection: &str, filter: Option<Document>) -> DbResult<u64> {
        let count = self
            .collection(collection)?
            .count_documents(filter.unwrap_or_default())
            .await?;
        Ok(count)
    }

    /// Fetch page `page` (1-based) of `page_size` documents plus the total match count.
    pub async fn paginate(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
        sort: Option<Document>,
        page: u64,
        page_size: u64,
    ) -> DbResult<Page> {
        let skip = page_offset(page, page_size)?;
        let limit = i64::try_from(page_size)
            .map_err(|_| DbError::invalid_input("page_size is too large"))?;

        let total = self.count(collection, Some(filter.clone())).await?;
        let spec = FindSpec {
            projection,
            sort,
            limit: Some(limit),
            skip: Some(skip),
        };
        let items = self.find_many(collection, filter, spec).await?;

        Ok(Page {
            total,
            page,
            page_size,
            items,
        })
    }
}

fn page_offset(page: u64, page_size: u64) -> DbResult<u64> {
    if page == 0 {
        return Err(DbError::invalid_input("page starts at 1"));
    }
    if page_size == 0 {
        return Err(DbError::invalid_input("page_size must be greater than 0"));
    }
    (page - 1)
        .checked_mul(page_size)
        .ok_or_else(|| DbError::invalid_input("page offset overflows"))
}

async fn build_client(settings: &DocumentSettings) -> DbResult<(Client, Database)> {
    let mut options = ClientOptions::parse(settings.connection_uri()).await?;
    options.max_pool_size = Some(settings.max_pool_size);
    options.min_pool_size = Some(settings.min_pool_size);
    options.app_name = Some("db-facade".to_string());
    if let Some(secs) = settings.server_selection_timeout_secs {
        options.server_selection_timeout = Some(Duration::from_secs(secs));
    }

    let client = Client::with_options(options)?;
    let database = client.database(&settings.database);
    database.run_command(doc! { "ping": 1 }).await?;
    Ok((client, database))
}

async fn connect_with_retries(settings: &DocumentSettings) -> DbResult<ClientHandle> {
    let attempts = settings.retries.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match build_client(settings).await {
            Ok((client, database)) => {
                return Ok(ClientHandle {
                    client,
                    database,
                    settings: settings.clone(),
                });
            }
            Err(e) => {
                warn!(
                    attempt,
                    attempts,
                    hosts = %settings.host_list(),
                    error = %e,
                    "Failed to connect to MongoDB"
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| DbError::internal("MongoDB connect made no attempts")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_to_string() {
        let oid = mongodb::bson::oid::ObjectId::new();
        assert_eq!(id_to_string(Bson::ObjectId(oid)), oid.to_hex());
        assert_eq!(id_to_string(Bson::String("custom".into())), "custom");
        assert_eq!(id_to_string(Bson::Int32(5)), "5");
    }

    #[test]
    fn test_page_offset() {
        assert_eq!(page_offset(1, 20).unwrap(), 0);
        assert_eq!(page_offset(3, 20).unwrap(), 40);
        assert!(page_offset(0, 20).is_err());
        assert!(page_offset(1, 0).is_err());
        assert!(page_offset(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_total_pages() {
        let page = Page {
            total: 41,
            page: 1,
            page_size: 20,
            items: Vec::new(),
        };
        assert_eq!(page.total_pages(), 3);
    }

    #[tokio::test]
    async fn test_operations_before_init() {
        let manager = DocumentManager::new();
        let err = manager.get_db().unwrap_err();
        assert!(matches!(err, DbError::NotInitialized { .. }));
        let err = manager.count("users", None).await.unwrap_err();
        assert!(matches!(err, DbError::NotInitialized { .. }));
        manager.close().await;
    }

    #[tokio::test]
    async fn test_init_exhausts_retries() {
        let manager = DocumentManager::new();
        let settings = DocumentSettings {
            hosts: vec!["127.0.0.1:1".into()],
            database: "app".into(),
            retries: 2,
            server_selection_timeout_secs: Some(1),
            ..Default::default()
        };
        let err = manager.init_client(settings).await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. } | DbError::Document { .. }));
        assert!(!manager.is_initialized());
    }
}
