//! Shared test fixtures

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::Context;
use crate::error::ResourceResult;
use crate::handler::{QueryResourceHandler, RequestHandler};
use crate::protocol::{
    ActionRequest, ActionResponse, CreateRequest, DeleteRequest, PatchRequest, QueryRequest,
    QueryResponse, ReadRequest, Request, ResourceResponse, UpdateRequest,
};

/// Event log shared between fixtures
#[derive(Debug, Clone, Default)]
pub(crate) struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }
}

/// Terminal handler that logs `"{name}:{operation}:{path}"` and echoes the
/// request path back as content
#[derive(Debug, Clone)]
pub(crate) struct EchoHandler {
    name: String,
    log: Log,
    query_results: Vec<Value>,
}

impl EchoHandler {
    pub(crate) fn new(name: &str, log: &Log) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            query_results: Vec::new(),
        }
    }

    pub(crate) fn with_query_results(mut self, results: Vec<Value>) -> Self {
        self.query_results = results;
        self
    }

    fn record(&self, request: &dyn Request) -> ResourceResponse {
        let path = request.resource_path().to_string();
        self.log
            .push(format!("{}:{}:{}", self.name, request.request_type(), path));
        ResourceResponse::new(
            Some(path.clone()),
            Some("0".into()),
            json!({"handler": self.name, "path": path}),
        )
    }
}

#[async_trait]
impl RequestHandler for EchoHandler {
    async fn handle_action(
        &self,
        _context: &Context,
        request: &ActionRequest,
    ) -> ResourceResult<ActionResponse> {
        let response = self.record(request);
        Ok(ActionResponse::new(response.into_content()))
    }

    async fn handle_create(
        &self,
        _context: &Context,
        request: &CreateRequest,
    ) -> ResourceResult<ResourceResponse> {
        Ok(self.record(request))
    }

    async fn handle_delete(
        &self,
        _context: &Context,
        request: &DeleteRequest,
    ) -> ResourceResult<ResourceResponse> {
        Ok(self.record(request))
    }

    async fn handle_patch(
        &self,
        _context: &Context,
        request: &PatchRequest,
    ) -> ResourceResult<ResourceResponse> {
        Ok(self.record(request))
    }

    async fn handle_query(
        &self,
        _context: &Context,
        request: &QueryRequest,
        handler: &mut (dyn QueryResourceHandler + Send),
    ) -> ResourceResult<QueryResponse> {
        self.record(request);
        for (i, content) in self.query_results.iter().enumerate() {
            let resource = ResourceResponse::new(Some(i.to_string()), None, content.clone());
            if !handler.handle_resource(resource) {
                break;
            }
        }
        Ok(QueryResponse::new())
    }

    async fn handle_read(
        &self,
        _context: &Context,
        request: &ReadRequest,
    ) -> ResourceResult<ResourceResponse> {
        Ok(self.record(request))
    }

    async fn handle_update(
        &self,
        _context: &Context,
        request: &UpdateRequest,
    ) -> ResourceResult<ResourceResponse> {
        Ok(self.record(request))
    }
}
