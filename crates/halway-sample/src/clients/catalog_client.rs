//! # Catalog Client
//!
//! A domain-level API over the catalog resources. Every call starts at the entry point and
//! navigates by relation names only; the single uri it knows is the entry point's.
use crate::clients::SampleError;
use crate::contracts::{Catalog, EntryPoint, Item};
use crate::model::{CatalogState, ItemState};
use futures::future::try_join_all;
use halway::{HalClient, HalHandle, RequestMetrics, TemplateVariables};
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct CatalogClient {
    client: HalClient,
    entry_point: String,
}

impl CatalogClient {
    pub fn new(client: HalClient, entry_point: impl Into<String>) -> Self {
        Self {
            client,
            entry_point: entry_point.into(),
        }
    }

    pub fn hal_client(&self) -> &HalClient {
        &self.client
    }

    /// Metrics of every request made through this client.
    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        self.client.metrics()
    }

    pub fn entry_point(&self) -> Result<HalHandle<EntryPoint>, SampleError> {
        Ok(self.client.resolve::<EntryPoint>(&self.entry_point)?)
    }

    async fn catalog_handle(&self) -> Result<HalHandle<Catalog>, SampleError> {
        Ok(self.entry_point()?.follow::<Catalog>("catalog").await?)
    }

    #[instrument(skip(self))]
    pub async fn catalog(&self) -> Result<CatalogState, SampleError> {
        Ok(self.catalog_handle().await?.state().await?)
    }

    /// All items, in catalog order.
    #[instrument(skip(self))]
    pub async fn items(&self) -> Result<Vec<ItemState>, SampleError> {
        let handles = self.catalog_handle().await?.follow::<Vec<Item>>("item").await?;
        debug!(count = handles.len(), "Loading items");
        states(&handles).await
    }

    /// The first item of the catalog, if it is not empty.
    #[instrument(skip(self))]
    pub async fn first_item(&self) -> Result<Option<ItemState>, SampleError> {
        match self.catalog_handle().await?.follow::<Option<Item>>("first").await? {
            Some(item) => Ok(Some(item.state().await?)),
            None => Ok(None),
        }
    }

    /// Looks up an item through the entry point's item template.
    #[instrument(skip(self))]
    pub async fn item(&self, id: u32) -> Result<ItemState, SampleError> {
        let item = self.item_handle(id).await?;
        item.state().await.map_err(|e| SampleError::for_item(id, e))
    }

    /// Items related to the item with `id`.
    #[instrument(skip(self))]
    pub async fn related(&self, id: u32) -> Result<Vec<ItemState>, SampleError> {
        let item = self.item_handle(id).await?;
        let related = item
            .follow::<Vec<Item>>("related")
            .await
            .map_err(|e| SampleError::for_item(id, e))?;
        states(&related).await
    }

    async fn item_handle(&self, id: u32) -> Result<HalHandle<Item>, SampleError> {
        let variables = TemplateVariables::new().with("id", id);
        self.entry_point()?
            .follow_with::<Option<Item>>("item", &variables)
            .await?
            .ok_or(SampleError::MissingRelation("item"))
    }
}

async fn states(handles: &[HalHandle<Item>]) -> Result<Vec<ItemState>, SampleError> {
    Ok(try_join_all(handles.iter().map(|item| item.state::<ItemState>())).await?)
}
