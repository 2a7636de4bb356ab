//! # Server Rendering Engine
//!
//! [`AsyncHalRenderer`] walks a graph of [`ServerResource`]s and assembles the HAL document
//! described by their contracts. [`HalResponseRenderer`] wraps it for one request: it adds
//! the metadata resource and the max-age, and turns every error into a vnd.error response.
//!
//! # Rendering a Resource
//!
//! Every resource passes through three states:
//!
//! 1. [`RenderState::LinkOnly`]: only `create_link` is called. This is all that happens for
//!    a related resource that is not embedded.
//! 2. [`RenderState::Expanding`]: the state is written as top-level properties, the self link
//!    is added, and every declared relation is resolved. Embedded targets are expanded
//!    recursively.
//! 3. [`RenderState::Assembled`]: the branches have joined and the document is complete.
//!
//! Relations are resolved concurrently, but their entries always appear in the order the
//! contract declares them. The first failing branch fails the whole render.
//!
//! ```rust,ignore
//! struct CatalogResource { store: Arc<Store> }
//!
//! #[async_trait]
//! impl ServerResource for CatalogResource {
//!     fn contract(&self) -> ContractRef {
//!         ContractRef::of::<Catalog>()
//!     }
//!
//!     fn create_link(&self) -> Link {
//!         Link::new("/catalog").title("The catalog")
//!     }
//!
//!     async fn related(&self, relation: &str) -> Result<Vec<Arc<dyn ServerResource>>, HalError> {
//!         match relation {
//!             "item" => Ok(self.store.items().map(ItemResource::shared).collect()),
//!             _ => Ok(Vec::new()),
//!         }
//!     }
//! }
//!
//! let renderer = HalResponseRenderer::new(RenderConfig::default());
//! let response = renderer.render_response("/catalog", Arc::new(catalog)).await;
//! ```

use crate::capability::{Cardinality, Classifier, ContractRef, RelationSpec, ResourceDescriptor};
use crate::config::RenderConfig;
use crate::error::HalError;
use crate::metrics::RequestMetrics;
use crate::model::{HalResource, HalResponse, Link, SELF};
use crate::vnd_error::{ErrorStatusStrategy, ErrorStrategyChain, VndErrorRenderer};
use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Metrics category of resource method invocations on the server.
pub const SERVER_INVOCATIONS: &str = "server";

/// Relation the metadata resource is embedded under.
pub const METADATA: &str = "metadata:debug";

/// A server-side implementation of a contract.
#[async_trait]
pub trait ServerResource: Send + Sync {
    fn contract(&self) -> ContractRef;

    /// The link to this resource. An empty href marks an embedded-only resource.
    fn create_link(&self) -> Link;

    /// The state properties; only called if the contract declares state.
    async fn state(&self) -> Result<Option<Value>, HalError> {
        Ok(None)
    }

    /// The targets of `relation`.
    async fn related(&self, _relation: &str) -> Result<Vec<Arc<dyn ServerResource>>, HalError> {
        Ok(Vec::new())
    }

    /// Embed this resource instead of only linking to it.
    fn is_embedded(&self) -> bool {
        false
    }

    /// Also add a link to an embedded resource.
    fn is_linked_when_embedded(&self) -> bool {
        true
    }
}

/// Serializes a state struct for [`ServerResource::state`].
pub fn state_of<S: Serialize>(state: &S) -> Result<Option<Value>, HalError> {
    Ok(Some(serde_json::to_value(state)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    LinkOnly,
    Expanding,
    Assembled,
}

/// The rendered entries of one relation.
#[derive(Default)]
struct RelationOutput {
    links: Vec<Link>,
    embedded: Vec<HalResource>,
}

/// Recursive, concurrent HAL document renderer.
#[derive(Clone)]
pub struct AsyncHalRenderer {
    classifier: Arc<Classifier>,
    metrics: Arc<RequestMetrics>,
}

impl AsyncHalRenderer {
    pub fn new(metrics: Arc<RequestMetrics>) -> Self {
        Self {
            classifier: Classifier::global(),
            metrics,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Renders `resource` fully expanded.
    pub async fn render(&self, resource: Arc<dyn ServerResource>) -> Result<HalResource, HalError> {
        self.expand(resource).await
    }

    fn expand(&self, resource: Arc<dyn ServerResource>) -> BoxFuture<'_, Result<HalResource, HalError>> {
        async move {
            let descriptor = resource.contract().classify(&self.classifier)?;
            let link = resource.create_link();
            trace!(contract = %descriptor.name, href = %link.href, state = ?RenderState::Expanding);

            let mut document = HalResource::new();
            if descriptor.has_state {
                let started = Instant::now();
                let state = resource.state().await?;
                self.record(&descriptor, "state", started.elapsed());
                if let Some(state) = state {
                    document.set_state(state)?;
                }
            }
            if !link.href.is_empty() {
                document.set_link(SELF, link);
            }

            let branches = descriptor
                .relations
                .iter()
                .map(|spec| self.render_relation(&resource, &descriptor, spec));
            let outputs = try_join_all(branches).await?;

            for (spec, output) in descriptor.relations.iter().zip(outputs) {
                match spec.cardinality {
                    Cardinality::Multiple => {
                        if !output.links.is_empty() {
                            document.add_links(&spec.name, output.links);
                        }
                        if !output.embedded.is_empty() {
                            document.add_embedded(&spec.name, output.embedded);
                        }
                    }
                    Cardinality::Required | Cardinality::Optional => {
                        if let Some(link) = output.links.into_iter().next() {
                            document.set_link(&spec.name, link);
                        }
                        if let Some(embedded) = output.embedded.into_iter().next() {
                            document.set_embedded(&spec.name, embedded);
                        }
                    }
                }
            }
            trace!(contract = %descriptor.name, state = ?RenderState::Assembled);
            Ok(document)
        }
        .boxed()
    }

    async fn render_relation(
        &self,
        resource: &Arc<dyn ServerResource>,
        descriptor: &ResourceDescriptor,
        spec: &RelationSpec,
    ) -> Result<RelationOutput, HalError> {
        let started = Instant::now();
        let targets = resource.related(&spec.name).await?;
        self.record(descriptor, &spec.name, started.elapsed());

        match spec.cardinality {
            Cardinality::Required if targets.is_empty() => {
                return Err(HalError::developer(format!(
                    "{}#{} returned nothing for a required relation",
                    descriptor.name, spec.name
                )));
            }
            Cardinality::Required | Cardinality::Optional if targets.len() > 1 => {
                return Err(HalError::developer(format!(
                    "{}#{} returned {} resources for {} relation",
                    descriptor.name,
                    spec.name,
                    targets.len(),
                    if spec.cardinality == Cardinality::Required { "a required" } else { "an optional" }
                )));
            }
            _ => {}
        }
        for target in &targets {
            let contract = target.contract();
            if contract.id() != spec.shape.target {
                let actual = contract.classify(&self.classifier)?;
                return Err(HalError::developer(format!(
                    "{}#{} returned a {} where a {} is declared",
                    descriptor.name,
                    spec.name,
                    actual.name,
                    spec.target_name()
                )));
            }
        }

        let rendered = try_join_all(
            targets
                .into_iter()
                .map(|target| self.render_target(descriptor, spec, target)),
        )
        .await?;
        let mut output = RelationOutput::default();
        for (link, embedded) in rendered {
            output.links.extend(link);
            output.embedded.extend(embedded);
        }
        Ok(output)
    }

    async fn render_target(
        &self,
        descriptor: &ResourceDescriptor,
        spec: &RelationSpec,
        target: Arc<dyn ServerResource>,
    ) -> Result<(Option<Link>, Option<HalResource>), HalError> {
        if !target.is_embedded() {
            trace!(state = ?RenderState::LinkOnly);
            let link = target.create_link();
            if link.href.is_empty() {
                return Err(HalError::developer(format!(
                    "{}#{} returned a {} that is neither embedded nor linkable",
                    descriptor.name,
                    spec.name,
                    spec.target_name()
                )));
            }
            return Ok((Some(link), None));
        }
        let linked = target.is_linked_when_embedded();
        let embedded = self.expand(target).await?;
        let link = embedded.self_link().filter(|_| linked);
        Ok((link, Some(embedded)))
    }

    fn record(&self, descriptor: &ResourceDescriptor, method: &str, elapsed: Duration) {
        self.metrics.on_method_invocation_finished(
            SERVER_INVOCATIONS,
            format!("{}#{}", descriptor.name, method),
            elapsed,
        );
    }
}

/// Renders the response to one request.
pub struct HalResponseRenderer {
    renderer: AsyncHalRenderer,
    metrics: Arc<RequestMetrics>,
    config: RenderConfig,
    errors: ErrorStrategyChain,
}

impl HalResponseRenderer {
    /// A renderer with fresh per-request metrics.
    pub fn new(config: RenderConfig) -> Self {
        let metrics = Arc::new(RequestMetrics::with_aggregation(config.invocation_aggregation));
        Self::with_metrics(config, metrics)
    }

    /// A renderer sharing `metrics`, e.g. with a client that fetches upstream resources.
    pub fn with_metrics(config: RenderConfig, metrics: Arc<RequestMetrics>) -> Self {
        Self {
            renderer: AsyncHalRenderer::new(metrics.clone()),
            metrics,
            config,
            errors: ErrorStrategyChain::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<Classifier>) -> Self {
        self.renderer = self.renderer.with_classifier(classifier);
        self
    }

    /// Adds an error mapping in front of the existing ones.
    pub fn with_error_strategy(mut self, strategy: impl ErrorStatusStrategy + 'static) -> Self {
        self.errors = self.errors.prepend(strategy);
        self
    }

    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }

    /// Renders `resource`; failures become a vnd.error response, so this never fails.
    pub async fn render_response(&self, request_uri: &str, resource: Arc<dyn ServerResource>) -> HalResponse {
        if let Some(cap) = self.config.max_age_cap_seconds {
            self.metrics.set_response_max_age(Duration::from_secs(cap));
        }
        let started = Instant::now();

        match self.renderer.render(resource).await {
            Ok(mut body) => {
                if self.config.metadata_enabled {
                    body.set_embedded(METADATA, self.metrics.create_metadata_resource(request_uri));
                }
                let mut response = HalResponse::ok(request_uri, body);
                response.max_age = self.metrics.response_max_age().map(|d| d.as_secs());
                info!(
                    uri = request_uri,
                    max_age = ?response.max_age,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Rendered"
                );
                response
            }
            Err(error) => {
                debug!(uri = request_uri, error = %error, "Rendering failed");
                VndErrorRenderer::new(self.errors.clone()).render(request_uri, &error)
            }
        }
    }
}
