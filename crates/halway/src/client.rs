//! # Client Resolution Engine
//!
//! [`HalClient`] turns entry-point uris into lazy [`HalHandle`]s. A handle knows its link
//! and the descriptor of its contract; the representation is fetched on first use (through
//! whatever [`ResourceLoader`] chain the client was built with, usually a
//! [`CachingResourceLoader`](crate::cache::CachingResourceLoader)) and memoized on the handle.
//!
//! ```rust,ignore
//! let client = HalClient::new(loader);
//! let catalog = client.resolve::<Catalog>("/catalog")?;
//!
//! let items = catalog.follow::<Vec<Item>>("item").await?;   // zero-or-many
//! let first = catalog.follow::<Option<Item>>("first").await?; // zero-or-one
//! let entry = items[0].follow::<Catalog>("catalog").await?;   // exactly one
//!
//! let lookup = TemplateVariables::new().with("id", 7);
//! let seven = entry.follow_with::<Option<Item>>("lookup", &lookup).await?;
//! ```
//!
//! # Relation Resolution
//!
//! Following relation `R` collects the links `_links[R]` in document order. A link whose
//! href matches the self link of an entry in `_embedded[R]` uses that embedded body and is
//! never fetched. Embedded entries without a matching link are appended in their own order,
//! and duplicates (by href) are dropped. The declared cardinality then reduces the list:
//! a required relation without candidates is a developer error.
//!
//! Handles deliberately implement neither `PartialEq` nor `Hash`: two handles of a resource
//! that was never fetched cannot be compared meaningfully, so such comparisons do not compile.

use crate::capability::{Cardinality, Classifier, HalContract, RelationShape, RelationSpec, ResourceDescriptor};
use crate::error::HalError;
use crate::loader::ResourceLoader;
use crate::metrics::RequestMetrics;
use crate::model::{HalResource, Link};
use crate::template::TemplateVariables;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

/// Metrics category of relation resolutions on the client.
pub const CLIENT_INVOCATIONS: &str = "client";

/// Entry point of the client engine.
///
/// Cheap to clone. All handles created by a client share its loader, classifier and
/// [`RequestMetrics`]; create one client per resolution chain to get separate metrics.
#[derive(Clone)]
pub struct HalClient {
    loader: Arc<dyn ResourceLoader>,
    classifier: Arc<Classifier>,
    metrics: Arc<RequestMetrics>,
}

impl HalClient {
    /// A client using the process-wide classifier and fresh metrics.
    pub fn new(loader: Arc<dyn ResourceLoader>) -> Self {
        Self {
            loader,
            classifier: Classifier::global(),
            metrics: Arc::new(RequestMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RequestMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }

    /// Creates a handle for the resource at `uri`. Nothing is fetched yet.
    pub fn resolve<C: HalContract>(&self, uri: &str) -> Result<HalHandle<C>, HalError> {
        self.resolve_link(Link::new(uri))
    }

    /// Creates a handle for an entry point given as uri template.
    pub fn resolve_template<C: HalContract>(
        &self,
        template: &str,
        variables: &TemplateVariables,
    ) -> Result<HalHandle<C>, HalError> {
        self.resolve_link(Link::new(template).expand(variables))
    }

    pub fn resolve_link<C: HalContract>(&self, link: Link) -> Result<HalHandle<C>, HalError> {
        let descriptor = self.classifier.classify::<C>()?;
        Ok(HalHandle::new(self.clone(), link, descriptor, None))
    }

    #[instrument(skip(self))]
    async fn fetch(&self, uri: &str) -> Result<HalResource, HalError> {
        let started = Instant::now();
        let response = self.loader.fetch(uri).await.map_err(|e| {
            warn!(uri, status = ?e.status, error = %e, "Fetch failed");
            e
        })?;
        let elapsed = started.elapsed();

        let title = response.body.self_link().and_then(|link| link.title);
        self.metrics
            .on_response_retrieved(&response.uri, title, response.max_age, elapsed);
        debug!(uri = %response.uri, status = response.status, max_age = ?response.max_age, "Fetched");
        Ok(response.body)
    }

    /// Candidate handles of `relation`, in resolution order and without duplicates.
    fn related<T: HalContract>(
        &self,
        representation: &HalResource,
        relation: &str,
        variables: &TemplateVariables,
        descriptor: &Arc<ResourceDescriptor>,
    ) -> Vec<HalHandle<T>> {
        let mut embedded: Vec<(Option<Link>, HalResource)> = representation
            .embedded(relation)
            .into_iter()
            .map(|resource| (resource.self_link(), resource))
            .collect();

        let mut seen = HashSet::new();
        let mut handles = Vec::new();

        for link in representation.links(relation) {
            let link = if variables.is_empty() { link } else { link.expand(variables) };
            if !seen.insert(link.href.clone()) {
                continue;
            }
            let body = embedded
                .iter()
                .position(|(own, _)| own.as_ref().is_some_and(|own| own.href == link.href))
                .map(|index| embedded.remove(index).1);
            handles.push(HalHandle::new(self.clone(), link, descriptor.clone(), body));
        }

        for (own, body) in embedded {
            let link = match own {
                Some(own) if !own.href.is_empty() => {
                    if !seen.insert(own.href.clone()) {
                        continue;
                    }
                    own
                }
                _ => Link::default(),
            };
            handles.push(HalHandle::new(self.clone(), link, descriptor.clone(), Some(body)));
        }
        handles
    }
}

/// A lazy, typed reference to a remote resource of contract `C`.
///
/// Clones share the memoized representation.
pub struct HalHandle<C> {
    link: Link,
    descriptor: Arc<ResourceDescriptor>,
    client: HalClient,
    representation: Arc<OnceCell<HalResource>>,
    _contract: PhantomData<fn() -> C>,
}

impl<C> Clone for HalHandle<C> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.clone(),
            descriptor: self.descriptor.clone(),
            client: self.client.clone(),
            representation: self.representation.clone(),
            _contract: PhantomData,
        }
    }
}

impl<C> fmt::Debug for HalHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HalHandle")
            .field("contract", &self.descriptor.name)
            .field("href", &self.link.href)
            .field("resolved", &self.representation.initialized())
            .finish()
    }
}

impl<C: HalContract> HalHandle<C> {
    fn new(client: HalClient, link: Link, descriptor: Arc<ResourceDescriptor>, body: Option<HalResource>) -> Self {
        let representation = match body {
            Some(body) => OnceCell::from(body),
            None => OnceCell::new(),
        };
        Self {
            link,
            descriptor,
            client,
            representation: Arc::new(representation),
            _contract: PhantomData,
        }
    }

    /// The link of this resource. Never fetches.
    pub fn create_link(&self) -> Link {
        self.link.clone()
    }

    pub fn uri(&self) -> &str {
        &self.link.href
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    /// `true` once the representation is available (fetched or embedded).
    pub fn is_resolved(&self) -> bool {
        self.representation.initialized()
    }

    /// The full HAL document, fetched on first access and memoized.
    pub async fn representation(&self) -> Result<&HalResource, HalError> {
        self.representation
            .get_or_try_init(|| async {
                if self.link.templated {
                    return Err(HalError::developer(format!(
                        "the link {} to a {} is a template; bind its variables before fetching it",
                        self.link.href, self.descriptor.name
                    )));
                }
                if self.link.href.is_empty() {
                    return Err(HalError::developer(format!(
                        "a {} without a link cannot be fetched",
                        self.descriptor.name
                    )));
                }
                self.client.fetch(&self.link.href).await
            })
            .await
    }

    /// The state of the resource: all properties except `_links` and `_embedded`.
    pub async fn state<S: DeserializeOwned>(&self) -> Result<S, HalError> {
        if !self.descriptor.has_state {
            return Err(HalError::developer(format!(
                "{} does not declare any state",
                self.descriptor.name
            )));
        }
        self.representation().await?.state()
    }

    /// Resolves `relation`, declared on the contract with the result shape `S`.
    pub async fn follow<S>(&self, relation: &str) -> Result<S::Output, HalError>
    where
        S: RelationShape,
    {
        self.follow_with::<S>(relation, &TemplateVariables::new()).await
    }

    /// Resolves a templated relation, expanding its links with `variables` first.
    #[instrument(skip(self, variables), fields(contract = %self.descriptor.name))]
    pub async fn follow_with<S>(&self, relation: &str, variables: &TemplateVariables) -> Result<S::Output, HalError>
    where
        S: RelationShape,
    {
        let started = Instant::now();
        let spec = self.relation_spec::<S>(relation)?;
        self.check_variables(&spec, variables)?;
        let target = self.client.classifier.classify::<S::Target>()?;

        let representation = self.representation().await?;
        let mut handles = self
            .client
            .related::<S::Target>(representation, relation, variables, &target);

        match spec.cardinality {
            Cardinality::Required if handles.is_empty() => {
                return Err(HalError::developer(format!(
                    "{}#{}: the required relation '{}' of {} has neither a link nor an embedded resource",
                    self.descriptor.name, relation, relation, self.link.href
                )));
            }
            Cardinality::Required | Cardinality::Optional => handles.truncate(1),
            Cardinality::Multiple => {}
        }
        debug!(relation, count = handles.len(), "Resolved relation");

        self.client.metrics.on_method_invocation_finished(
            CLIENT_INVOCATIONS,
            format!("{}#{}", self.descriptor.name, relation),
            started.elapsed(),
        );

        S::wrap(handles).ok_or_else(|| {
            HalError::developer(format!(
                "the relation '{}' of {} cannot be represented as {}",
                relation,
                self.descriptor.name,
                S::shape()
            ))
        })
    }

    fn relation_spec<S: RelationShape>(&self, relation: &str) -> Result<RelationSpec, HalError> {
        let spec = self.descriptor.relation(relation).ok_or_else(|| {
            HalError::developer(format!(
                "{} does not declare a relation '{}'",
                self.descriptor.name, relation
            ))
        })?;
        let requested = S::shape();
        if spec.shape != requested {
            return Err(HalError::developer(format!(
                "the relation '{}' of {} is declared as {}, not {}",
                relation, self.descriptor.name, spec.shape, requested
            )));
        }
        Ok(spec.clone())
    }

    fn check_variables(&self, spec: &RelationSpec, variables: &TemplateVariables) -> Result<(), HalError> {
        match variables
            .names()
            .find(|name| !spec.template_variables.iter().any(|declared| declared == name))
        {
            Some(unknown) => Err(HalError::developer(format!(
                "{}#{} does not declare the template variable '{}' (declared: {:?})",
                self.descriptor.name, spec.name, unknown, spec.template_variables
            ))),
            None => Ok(()),
        }
    }
}
