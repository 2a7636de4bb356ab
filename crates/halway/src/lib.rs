//! # Halway
//!
//! A typed HAL+JSON hypermedia engine. A resource *contract* is declared once; the engine
//! then renders graphs of resource implementations into HAL documents on the server, and
//! traverses the same graph lazily on the client.
//!
//! ## Architecture Overview
//!
//! The crate is layered, leaves first:
//!
//! 1. **Capability Model** ([`capability`]) - contracts are classified into immutable
//!    [`ResourceDescriptor`]s; the cardinality of each relation is derived from its declared
//!    result shape by an ordered list of multiplicity adapters.
//! 2. **Response Cache** ([`cache`]) - a [`ResourceLoader`] decorator keeping responses while
//!    their max-age lasts.
//! 3. **Client Resolution Engine** ([`client`]) - lazy [`HalHandle`]s that fetch, memoize and
//!    follow relations; a [`blocking`] facade for synchronous call sites.
//! 4. **Server Rendering Engine** ([`renderer`]) - recursive, concurrent rendering of
//!    [`ServerResource`] graphs with deterministic output order, and [`vnd_error`] responses
//!    for anything that goes wrong.
//! 5. **Metrics/Metadata Aggregator** ([`metrics`]) - per-request timings and max-ages,
//!    exposed as an embedded debug resource and as the response max-age.
//!
//! ## Core Abstractions
//!
//! ### [`HalContract`] - The Shape of a Resource
//!
//! ```rust,ignore
//! use halway::{ContractBuilder, HalContract};
//!
//! pub struct Catalog;
//! pub struct Item;
//!
//! impl HalContract for Catalog {
//!     fn declare(contract: &mut ContractBuilder) {
//!         contract
//!             .state()
//!             .relation::<Vec<Item>>("item")        // zero-or-many
//!             .relation::<Option<Item>>("first");   // zero-or-one
//!     }
//! }
//!
//! impl HalContract for Item {
//!     fn declare(contract: &mut ContractBuilder) {
//!         contract.state().relation::<Catalog>("catalog"); // exactly one
//!     }
//! }
//! ```
//!
//! ### [`ServerResource`] - Serving a Contract
//!
//! A server resource names its contract, creates its link, and returns its state and
//! related resources. [`HalResponseRenderer`] turns it into a [`HalResponse`].
//!
//! ### [`HalClient`] - Consuming a Contract
//!
//! ```rust,ignore
//! let loader = CachingResourceLoader::new(Arc::new(HttpResourceLoader::new(transport)), CachingConfig::default());
//! let client = HalClient::new(Arc::new(loader));
//!
//! let catalog = client.resolve::<Catalog>("https://example.org/catalog")?;
//! for item in catalog.follow::<Vec<Item>>("item").await? {
//!     let state: ItemState = item.state().await?;
//! }
//! ```
//!
//! ## Error Handling
//!
//! Everything returns [`HalError`]. [`HalError::is_client_error`] identifies failures of the
//! remote side (worth a retry by the caller; the engine never retries), while
//! [`HalError::is_developer_error`] identifies incorrect use of the API.
//!
//! ## Testing
//!
//! The [`mock`] module provides a scripted [`MockLoader`](mock::MockLoader), a channel-backed
//! HTTP transport and a [`ManualClock`](mock::ManualClock).

pub mod blocking;
pub mod cache;
pub mod capability;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod mock;
pub mod model;
pub mod renderer;
pub mod template;
pub mod tracing;
pub mod vnd_error;

// Re-export core types for convenience
pub use cache::{CacheEntry, CacheStore, CachingResourceLoader, InMemoryCacheStore};
pub use capability::{
    Cardinality, Classifier, ContractBuilder, ContractRef, HalContract, HalStream, MultiplicityAdapter,
    RelationShape, RelationSpec, ResourceDescriptor, ResultShape, WrapperAdapter,
};
pub use client::{HalClient, HalHandle};
pub use clock::{Clock, SystemClock};
pub use config::{CachingConfig, DefaultMaxAge, InvocationAggregation, RenderConfig};
pub use error::{ClientError, HalError};
pub use loader::{HttpCallback, HttpHeaders, HttpResourceLoader, HttpTransport, JsonCodec, ResourceLoader, SerdeJsonCodec};
pub use metrics::RequestMetrics;
pub use model::{HalResource, HalResponse, Link, HAL_JSON, VND_ERROR_JSON};
pub use renderer::{state_of, AsyncHalRenderer, HalResponseRenderer, ServerResource};
pub use template::TemplateVariables;
pub use vnd_error::{DefaultErrorStrategy, ErrorStatusStrategy, ErrorStrategyChain, VndErrorRenderer};
