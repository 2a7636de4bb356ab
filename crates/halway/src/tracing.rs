//! # Observability & Tracing
//!
//! The engine logs through the `tracing` macros with structured fields (`uri`, `status`,
//! `relation`, `contract`, `max_age`); [`setup_tracing`] installs a subscriber for binaries
//! and demos.
//!
//! ## What Gets Traced
//!
//! - **Fetches**: every upstream request of a client, with status and max-age (`debug`),
//!   failures (`warn`).
//! - **Cache**: hits with the remaining freshness, stale entries, stores and idle evictions
//!   (`debug`).
//! - **Rendering**: the render state of each resource (`trace`), the finished response with
//!   its max-age (`info`), errors at the severity chosen by the error strategy chain.
//! - **Classification**: every contract the first time it is classified (`debug`).
//!
//! ## Usage Examples
//!
//! ```bash
//! # Rendered responses and failures
//! RUST_LOG=info cargo run -p halway-sample
//!
//! # Every fetch and cache decision
//! RUST_LOG=halway=debug cargo run -p halway-sample
//!
//! # Render state transitions
//! RUST_LOG=halway::renderer=trace cargo run -p halway-sample
//! ```
//!
//! **With `RUST_LOG=debug`**:
//!
//! ```text
//! DEBUG fetch{uri="/catalog"}: Caching response uri="/catalog" max_age=60 ok=true
//! DEBUG fetch{uri="/catalog"}: Fetched uri="/catalog" status=200 max_age=Some(60)
//! DEBUG follow_with{relation="item" contract=Catalog}: Resolved relation relation="item" count=3
//! DEBUG Cache hit uri="/catalog" remaining=60
//! ```

/// Installs a compact `fmt` subscriber filtered by `RUST_LOG`.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
