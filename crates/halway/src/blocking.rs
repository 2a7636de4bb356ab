//! Blocking facade over the async client, for call sites without a runtime.
//!
//! Each [`BlockingClient`] owns a current-thread tokio runtime and drives every call to
//! completion on it. Do not use it from inside an async context; calling `block_on` there
//! panics.

use crate::capability::HalContract;
use crate::client::{HalClient, HalHandle};
use crate::error::HalError;
use crate::loader::ResourceLoader;
use crate::model::{HalResource, Link};
use crate::template::TemplateVariables;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

#[derive(Clone)]
pub struct BlockingClient {
    client: HalClient,
    runtime: Arc<Runtime>,
}

impl BlockingClient {
    pub fn new(loader: Arc<dyn ResourceLoader>) -> Result<Self, HalError> {
        Self::from_client(HalClient::new(loader))
    }

    pub fn from_client(client: HalClient) -> Result<Self, HalError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(HalError::internal)?;
        Ok(Self {
            client,
            runtime: Arc::new(runtime),
        })
    }

    pub fn client(&self) -> &HalClient {
        &self.client
    }

    pub fn resolve<C: HalContract>(&self, uri: &str) -> Result<BlockingHandle<C>, HalError> {
        Ok(self.wrap(self.client.resolve::<C>(uri)?))
    }

    fn wrap<T: HalContract>(&self, handle: HalHandle<T>) -> BlockingHandle<T> {
        BlockingHandle {
            handle,
            runtime: self.runtime.clone(),
        }
    }
}

/// Blocking counterpart of [`HalHandle`].
pub struct BlockingHandle<C> {
    handle: HalHandle<C>,
    runtime: Arc<Runtime>,
}

impl<C> Clone for BlockingHandle<C> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<C: HalContract> BlockingHandle<C> {
    pub fn create_link(&self) -> Link {
        self.handle.create_link()
    }

    pub fn as_async(&self) -> &HalHandle<C> {
        &self.handle
    }

    pub fn representation(&self) -> Result<HalResource, HalError> {
        self.runtime
            .block_on(self.handle.representation())
            .cloned()
    }

    pub fn state<S: DeserializeOwned>(&self) -> Result<S, HalError> {
        self.runtime.block_on(self.handle.state())
    }

    /// Follows an exactly-one relation.
    pub fn required<T: HalContract>(&self, relation: &str) -> Result<BlockingHandle<T>, HalError> {
        let handle = self.runtime.block_on(self.handle.follow::<T>(relation))?;
        Ok(self.wrap(handle))
    }

    /// Follows a zero-or-one relation.
    pub fn optional<T: HalContract>(&self, relation: &str) -> Result<Option<BlockingHandle<T>>, HalError> {
        let handle = self.runtime.block_on(self.handle.follow::<Option<T>>(relation))?;
        Ok(handle.map(|h| self.wrap(h)))
    }

    /// Follows a templated zero-or-one relation.
    pub fn optional_with<T: HalContract>(
        &self,
        relation: &str,
        variables: &TemplateVariables,
    ) -> Result<Option<BlockingHandle<T>>, HalError> {
        let handle = self
            .runtime
            .block_on(self.handle.follow_with::<Option<T>>(relation, variables))?;
        Ok(handle.map(|h| self.wrap(h)))
    }

    /// Follows a zero-or-many relation declared as `Vec<T>`.
    pub fn multiple<T: HalContract>(&self, relation: &str) -> Result<Vec<BlockingHandle<T>>, HalError> {
        let handles = self.runtime.block_on(self.handle.follow::<Vec<T>>(relation))?;
        Ok(handles.into_iter().map(|h| self.wrap(h)).collect())
    }

    fn wrap<T>(&self, handle: HalHandle<T>) -> BlockingHandle<T> {
        BlockingHandle {
            handle,
            runtime: self.runtime.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ContractBuilder;
    use crate::mock::MockLoader;
    use serde_json::json;

    struct Catalog;
    struct Item;

    impl HalContract for Catalog {
        fn declare(contract: &mut ContractBuilder) {
            contract
                .relation::<Vec<Item>>("item")
                .relation::<Option<Item>>("first");
        }
    }

    impl HalContract for Item {
        fn declare(contract: &mut ContractBuilder) {
            contract.state().relation::<Catalog>("catalog");
        }
    }

    #[test]
    fn blocking_calls_resolve_relations() {
        let loader = Arc::new(MockLoader::new());
        loader.expect_fetch("/catalog").return_hal(json!({
            "_links": { "item": [ { "href": "/items/1" } ] }
        }));
        loader.expect_fetch("/items/1").return_hal(json!({
            "name": "One",
            "_links": { "catalog": { "href": "/catalog" } }
        }));
        let client = BlockingClient::new(loader.clone()).unwrap();

        let catalog = client.resolve::<Catalog>("/catalog").unwrap();
        assert!(catalog.optional::<Item>("first").unwrap().is_none());

        let items = catalog.multiple::<Item>("item").unwrap();
        assert_eq!(items.len(), 1);
        let state: serde_json::Value = items[0].state().unwrap();
        assert_eq!(state["name"], "One");

        let back = items[0].required::<Catalog>("catalog").unwrap();
        assert_eq!(back.create_link().href, "/catalog");
        assert_eq!(loader.fetch_count("/catalog"), 1);
    }
}
