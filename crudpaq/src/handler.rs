//! Handler contracts
//!
//! [`RequestHandler`] is the uniform seven-operation contract implemented by
//! filter chains, routers, provider adapters and anything else a request can
//! be sent to. Query results stream to a [`QueryResourceHandler`] one at a
//! time before the terminal [`QueryResponse`] is returned.
//!
//! Handlers that can describe their API expose it through
//! [`RequestHandler::describable`] instead of being type-inspected.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::context::Context;
use crate::error::ResourceResult;
use crate::protocol::{
    ActionRequest, ActionResponse, CreateRequest, DeleteRequest, PatchRequest, QueryRequest,
    QueryResponse, ReadRequest, RequestType, ResourceResponse, UpdateRequest, Version,
};

/// Uniform handler for the seven operations
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Invoke an action
    async fn handle_action(
        &self,
        context: &Context,
        request: &ActionRequest,
    ) -> ResourceResult<ActionResponse>;

    /// Create a resource
    async fn handle_create(
        &self,
        context: &Context,
        request: &CreateRequest,
    ) -> ResourceResult<ResourceResponse>;

    /// Delete a resource
    async fn handle_delete(
        &self,
        context: &Context,
        request: &DeleteRequest,
    ) -> ResourceResult<ResourceResponse>;

    /// Patch a resource
    async fn handle_patch(
        &self,
        context: &Context,
        request: &PatchRequest,
    ) -> ResourceResult<ResourceResponse>;

    /// Query a collection, streaming matches to `handler`
    async fn handle_query(
        &self,
        context: &Context,
        request: &QueryRequest,
        handler: &mut (dyn QueryResourceHandler + Send),
    ) -> ResourceResult<QueryResponse>;

    /// Read a resource
    async fn handle_read(
        &self,
        context: &Context,
        request: &ReadRequest,
    ) -> ResourceResult<ResourceResponse>;

    /// Replace a resource
    async fn handle_update(
        &self,
        context: &Context,
        request: &UpdateRequest,
    ) -> ResourceResult<ResourceResponse>;

    /// API description capability, when the handler has one
    fn describable(&self) -> Option<&dyn Describable> {
        None
    }
}

/// Receives query results in order
///
/// Returning `false` asks the provider to stop sending results.
pub trait QueryResourceHandler {
    /// Accept one result
    fn handle_resource(&mut self, resource: ResourceResponse) -> bool;
}

impl QueryResourceHandler for Vec<ResourceResponse> {
    fn handle_resource(&mut self, resource: ResourceResponse) -> bool {
        self.push(resource);
        true
    }
}

/// Adapts a closure to [`QueryResourceHandler`]
pub struct FnQueryHandler<F>(pub F);

impl<F> QueryResourceHandler for FnQueryHandler<F>
where
    F: FnMut(ResourceResponse) -> bool,
{
    fn handle_resource(&mut self, resource: ResourceResponse) -> bool {
        (self.0)(resource)
    }
}

/// Forwards query results to a channel
///
/// Stops the query once the receiving side is dropped.
#[derive(Debug, Clone)]
pub struct ChannelQueryHandler {
    sender: mpsc::UnboundedSender<ResourceResponse>,
}

impl ChannelQueryHandler {
    /// Handler plus the receiver it feeds
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ResourceResponse>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl QueryResourceHandler for ChannelQueryHandler {
    fn handle_resource(&mut self, resource: ResourceResponse) -> bool {
        self.sender.send(resource).is_ok()
    }
}

/// Run a query and collect its results
pub async fn collect_query(
    handler: &dyn RequestHandler,
    context: &Context,
    request: &QueryRequest,
) -> ResourceResult<(Vec<ResourceResponse>, QueryResponse)> {
    let mut resources = Vec::new();
    let response = handler.handle_query(context, request, &mut resources).await?;
    Ok((resources, response))
}

/// Handler that can describe the API it serves
pub trait Describable: Send + Sync {
    /// Describe the API as seen from `context`
    fn api(&self, context: &Context) -> ApiDescription;
}

/// Description of the operations a handler supports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<Version>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    operations: BTreeSet<RequestType>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    paths: BTreeMap<String, ApiDescription>,
}

impl ApiDescription {
    /// Empty description
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the title
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the version
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Add supported operations
    #[must_use]
    pub fn with_operations(mut self, operations: impl IntoIterator<Item = RequestType>) -> Self {
        self.operations.extend(operations);
        self
    }

    /// Nest a child description under `path`
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>, description: ApiDescription) -> Self {
        self.paths.insert(path.into(), description);
        self
    }

    /// Title
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Version
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Supported operations at this level
    pub fn operations(&self) -> &BTreeSet<RequestType> {
        &self.operations
    }

    /// Child descriptions by path
    pub fn paths(&self) -> &BTreeMap<String, ApiDescription> {
        &self.paths
    }
}
