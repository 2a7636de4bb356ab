//! # Server Resources
//!
//! [`ServerResource`] implementations of the catalog contracts, and [`route`], which maps a
//! request path to the resource that renders it.
//!
//! The catalog embeds its items; every other relation is rendered as a link.

use crate::contracts::{Catalog, EntryPoint, Item, ENTRY_POINT};
use crate::model::CatalogStore;
use async_trait::async_trait;
use halway::{state_of, ContractRef, HalError, Link, ServerResource};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const CATALOG: &str = "/catalog";
pub const ITEM_TEMPLATE: &str = "/items/{id}";

fn item_uri(id: u32) -> String {
    format!("/items/{id}")
}

fn shared(resource: impl ServerResource + 'static) -> Arc<dyn ServerResource> {
    Arc::new(resource)
}

/// Resolves the resource serving `path`.
pub fn route(path: &str, store: &Arc<CatalogStore>) -> Result<Arc<dyn ServerResource>, HalError> {
    if path == ENTRY_POINT {
        return Ok(shared(EntryPointResource::new(store.clone())));
    }
    if path == CATALOG {
        return Ok(shared(CatalogResource::new(store.clone())));
    }
    if let Some(id) = path.strip_prefix("/items/") {
        let id: u32 = id
            .parse()
            .map_err(|_| HalError::server(400, format!("'{id}' is not a valid item id")))?;
        if store.get(id).is_none() {
            return Err(HalError::not_found(format!("No item with id {id}")));
        }
        return Ok(shared(ItemResource::new(store.clone(), id)));
    }
    debug!(path, "No route");
    Err(HalError::not_found(format!("No resource at {path}")))
}

pub struct EntryPointResource {
    store: Arc<CatalogStore>,
}

impl EntryPointResource {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ServerResource for EntryPointResource {
    fn contract(&self) -> ContractRef {
        ContractRef::of::<EntryPoint>()
    }

    fn create_link(&self) -> Link {
        Link::new(ENTRY_POINT).title("Catalog API")
    }

    async fn related(&self, relation: &str) -> Result<Vec<Arc<dyn ServerResource>>, HalError> {
        Ok(match relation {
            "catalog" => vec![shared(CatalogResource::new(self.store.clone()))],
            "item" => vec![shared(ItemTemplate)],
            _ => Vec::new(),
        })
    }
}

pub struct CatalogResource {
    store: Arc<CatalogStore>,
}

impl CatalogResource {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ServerResource for CatalogResource {
    fn contract(&self) -> ContractRef {
        ContractRef::of::<Catalog>()
    }

    fn create_link(&self) -> Link {
        Link::new(CATALOG).title(self.store.title())
    }

    async fn state(&self) -> Result<Option<Value>, HalError> {
        state_of(&self.store.state())
    }

    async fn related(&self, relation: &str) -> Result<Vec<Arc<dyn ServerResource>>, HalError> {
        let ids = self.store.ids();
        Ok(match relation {
            "item" => ids
                .into_iter()
                .map(|id| shared(ItemResource::new(self.store.clone(), id).embedded()))
                .collect(),
            "first" => ids
                .into_iter()
                .take(1)
                .map(|id| shared(ItemResource::new(self.store.clone(), id)))
                .collect(),
            _ => Vec::new(),
        })
    }
}

pub struct ItemResource {
    store: Arc<CatalogStore>,
    id: u32,
    embedded: bool,
}

impl ItemResource {
    pub fn new(store: Arc<CatalogStore>, id: u32) -> Self {
        Self {
            store,
            id,
            embedded: false,
        }
    }

    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }
}

#[async_trait]
impl ServerResource for ItemResource {
    fn contract(&self) -> ContractRef {
        ContractRef::of::<Item>()
    }

    fn create_link(&self) -> Link {
        let link = Link::new(item_uri(self.id));
        match self.store.get(self.id) {
            Some(item) => link.title(item.name),
            None => link,
        }
    }

    async fn state(&self) -> Result<Option<Value>, HalError> {
        match self.store.get(self.id) {
            Some(item) => state_of(&item),
            None => Err(HalError::not_found(format!("No item with id {}", self.id))),
        }
    }

    async fn related(&self, relation: &str) -> Result<Vec<Arc<dyn ServerResource>>, HalError> {
        Ok(match relation {
            "related" => self
                .store
                .related(self.id)
                .into_iter()
                .map(|id| shared(ItemResource::new(self.store.clone(), id)))
                .collect(),
            "catalog" => vec![shared(CatalogResource::new(self.store.clone()))],
            _ => Vec::new(),
        })
    }

    fn is_embedded(&self) -> bool {
        self.embedded
    }
}

/// The templated item link of the entry point; only ever rendered as a link.
struct ItemTemplate;

#[async_trait]
impl ServerResource for ItemTemplate {
    fn contract(&self) -> ContractRef {
        ContractRef::of::<Item>()
    }

    fn create_link(&self) -> Link {
        Link::new(ITEM_TEMPLATE).title("Item by id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halway::{HalResponseRenderer, RenderConfig};
    use serde_json::json;

    fn store() -> Arc<CatalogStore> {
        Arc::new(CatalogStore::sample())
    }

    #[tokio::test]
    async fn entry_point_links_catalog_and_item_template() {
        let store = store();
        let resource = route(ENTRY_POINT, &store).unwrap();
        let response = HalResponseRenderer::new(RenderConfig::default())
            .render_response(ENTRY_POINT, resource)
            .await;

        assert_eq!(response.status, 200);
        assert_eq!(
            response.body.to_value(),
            json!({
                "_links": {
                    "self": { "href": "/api", "title": "Catalog API" },
                    "catalog": { "href": "/catalog", "title": "Hardware" },
                    "item": { "href": "/items/{id}", "templated": true, "title": "Item by id" }
                }
            })
        );
    }

    #[tokio::test]
    async fn catalog_embeds_its_items_in_id_order() {
        let store = store();
        let resource = route(CATALOG, &store).unwrap();
        let response = HalResponseRenderer::new(RenderConfig::default())
            .render_response(CATALOG, resource)
            .await;

        let body = response.body;
        assert_eq!(body.property("size"), Some(&json!(3)));
        let items = body.embedded("item");
        let names: Vec<_> = items.iter().map(|i| i.property("name").cloned()).collect();
        assert_eq!(names, vec![Some(json!("Hammer")), Some(json!("Nails")), Some(json!("Saw"))]);
        assert_eq!(items[0].link("related").map(|l| l.href), Some("/items/2".to_string()));
        assert_eq!(body.link("first").map(|l| l.href), Some("/items/1".to_string()));
        assert_eq!(body.links("item").len(), 3);
    }

    #[test]
    fn unknown_paths_and_items_are_not_found() {
        let store = store();
        assert_eq!(route("/nothing", &store).err().and_then(|e| e.status()), Some(404));
        assert_eq!(route("/items/17", &store).err().and_then(|e| e.status()), Some(404));
        assert_eq!(route("/items/abc", &store).err().and_then(|e| e.status()), Some(400));
    }
}
