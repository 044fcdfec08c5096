//! Resource providers
//!
//! Providers come in two shapes:
//!
//! - [`CollectionResourceProvider`]: a collection of instances addressed by id
//! - [`SingletonResourceProvider`]: a single resource
//!
//! [`CollectionAdapter`] and [`SingletonAdapter`] adapt them to the uniform
//! [`RequestHandler`](crate::handler::RequestHandler) contract. Every
//! provider method defaults to a `NotSupported` error, so a provider only
//! implements the operations it actually supports.

mod adapter;
#[cfg(feature = "memory-backend")]
mod memory;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{ResourceException, ResourceResult};
use crate::handler::QueryResourceHandler;
use crate::protocol::{
    ActionRequest, ActionResponse, CreateRequest, DeleteRequest, PatchRequest, QueryRequest,
    QueryResponse, ReadRequest, Request, ResourceResponse, UpdateRequest,
};

pub use adapter::{CollectionAdapter, SingletonAdapter};
#[cfg(feature = "memory-backend")]
pub use memory::MemoryBackend;

/// Error returned by operations a provider does not implement
pub fn not_supported(request: &dyn Request) -> ResourceException {
    ResourceException::not_supported(format!(
        "The {} operation is not supported by the resource {}",
        request.request_type(),
        request.resource_path()
    ))
}

/// A collection of resource instances
#[async_trait]
pub trait CollectionResourceProvider: Send + Sync {
    /// Action on the collection itself
    async fn action_collection(
        &self,
        _context: &Context,
        request: &ActionRequest,
    ) -> ResourceResult<ActionResponse> {
        Err(not_supported(request))
    }

    /// Action on one instance
    async fn action_instance(
        &self,
        _context: &Context,
        _resource_id: &str,
        request: &ActionRequest,
    ) -> ResourceResult<ActionResponse> {
        Err(not_supported(request))
    }

    /// Add an instance to the collection
    async fn create_instance(
        &self,
        _context: &Context,
        request: &CreateRequest,
    ) -> ResourceResult<ResourceResponse> {
        Err(not_supported(request))
    }

    /// Remove an instance
    async fn delete_instance(
        &self,
        _context: &Context,
        _resource_id: &str,
        request: &DeleteRequest,
    ) -> ResourceResult<ResourceResponse> {
        Err(not_supported(request))
    }

    /// Patch an instance
    async fn patch_instance(
        &self,
        _context: &Context,
        _resource_id: &str,
        request: &PatchRequest,
    ) -> ResourceResult<ResourceResponse> {
        Err(not_supported(request))
    }

    /// Search the collection
    async fn query_collection(
        &self,
        _context: &Context,
        request: &QueryRequest,
        _handler: &mut (dyn QueryResourceHandler + Send),
    ) -> ResourceResult<QueryResponse> {
        Err(not_supported(request))
    }

    /// Read an instance
    async fn read_instance(
        &self,
        _context: &Context,
        _resource_id: &str,
        request: &ReadRequest,
    ) -> ResourceResult<ResourceResponse> {
        Err(not_supported(request))
    }

    /// Replace an instance
    async fn update_instance(
        &self,
        _context: &Context,
        _resource_id: &str,
        request: &UpdateRequest,
    ) -> ResourceResult<ResourceResponse> {
        Err(not_supported(request))
    }
}

/// A single resource
#[async_trait]
pub trait SingletonResourceProvider: Send + Sync {
    /// Action on the resource
    async fn action_instance(
        &self,
        _context: &Context,
        request: &ActionRequest,
    ) -> ResourceResult<ActionResponse> {
        Err(not_supported(request))
    }

    /// Patch the resource
    async fn patch_instance(
        &self,
        _context: &Context,
        request: &PatchRequest,
    ) -> ResourceResult<ResourceResponse> {
        Err(not_supported(request))
    }

    /// Read the resource
    async fn read_instance(
        &self,
        _context: &Context,
        request: &ReadRequest,
    ) -> ResourceResult<ResourceResponse> {
        Err(not_supported(request))
    }

    /// Replace the resource
    async fn update_instance(
        &self,
        _context: &Context,
        request: &UpdateRequest,
    ) -> ResourceResult<ResourceResponse> {
        Err(not_supported(request))
    }
}
