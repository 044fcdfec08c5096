//! # crudpaq
//!
//! In-process resource protocol covering seven operations: create, read,
//! update, delete, patch, action and query (CRUDPAQ).
//!
//! ## Features
//!
//! - **Filter chains**: ordered interceptors in front of a handler, mutable while serving
//! - **Providers**: collection and singleton provider traits with adapters to the uniform handler contract
//! - **Routing**: URI templates with `{variable}` capture, and resource API version routing
//! - **Response shaping**: field projection, paging cookies and count policies
//! - **In-memory backend**: a reference collection provider (`memory-backend` feature)
//! - **Ambient stack**: figment configuration, JSON tracing, thiserror errors
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crudpaq::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Load configuration
//!     let config = Config::load()?;
//!
//!     // Initialize tracing
//!     init_tracing(&config)?;
//!
//!     // Route collections by URI template
//!     let router = UriRouter::new();
//!     router.add_collection("users", Arc::new(MemoryBackend::from_config(&config)))?;
//!
//!     // Put shaping and version filters in front
//!     let chain = FilterChain::new(
//!         Arc::new(router),
//!         vec![
//!             Arc::new(ApiVersionRoutingFilter::from_config(&config)),
//!             Arc::new(FieldProjectionFilter::new(config.projection.policy)),
//!         ],
//!     );
//!
//!     let ctx = Context::root();
//!     let create = CreateRequest::new("users", json!({"name": "ada", "age": 36}))
//!         .map_err(|e| Error::Internal(e.to_string()))?;
//!     let _ = chain.handle_create(&ctx, &create).await;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod handler;
pub mod observability;
pub mod protocol;
pub mod provider;
pub mod router;
pub mod shaping;
pub mod versioning;

#[cfg(test)]
mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::Context;
    pub use crate::error::{Error, ResourceException, ResourceResult, Result};
    pub use crate::filter::{ConditionalFilter, Filter, FilterChain, FilterCondition};
    pub use crate::handler::{
        collect_query, ApiDescription, Describable, QueryResourceHandler, RequestHandler,
    };
    pub use crate::observability::init_tracing;
    pub use crate::protocol::{
        ActionRequest, ActionResponse, CountPolicy, CreateRequest, DeleteRequest, JsonPointer,
        PatchOperation, PatchRequest, QueryFilter, QueryRequest, QueryResponse, ReadRequest,
        Request, ResourcePath, ResourceResponse, Response, SortKey, UpdateRequest, Version,
    };
    pub use crate::provider::{
        CollectionAdapter, CollectionResourceProvider, SingletonAdapter, SingletonResourceProvider,
    };
    pub use crate::router::{RoutingMode, UriRouter};
    pub use crate::shaping::{FieldProjectionFilter, ProjectionPolicy};
    pub use crate::versioning::{
        ApiVersionRoutingFilter, DefaultVersionBehaviour, DeprecationInfo, VersionRouter,
    };

    #[cfg(feature = "memory-backend")]
    pub use crate::provider::MemoryBackend;
}
