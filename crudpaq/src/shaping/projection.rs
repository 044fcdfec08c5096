//! Partial field projection
//!
//! Each requested pointer contributes the value it points at, keyed by the
//! pointer's last segment. The root pointer contributes every top-level
//! field. Pointers that resolve to nothing contribute nothing; projection
//! never fails.
//!
//! ```rust
//! use crudpaq::protocol::JsonPointer;
//! use crudpaq::shaping::{project, ProjectionPolicy};
//! use serde_json::json;
//!
//! let content = json!({"a": {"b": "1", "c": "2"}, "d": "3"});
//! let fields = [JsonPointer::parse("/a/b"), JsonPointer::parse("/d")];
//! assert_eq!(
//!     project(&content, &fields, ProjectionPolicy::Union),
//!     json!({"b": "1", "d": "3"})
//! );
//! ```

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::{ResourceException, ResourceResult};
use crate::filter::Filter;
use crate::handler::{QueryResourceHandler, RequestHandler};
use crate::protocol::{
    CreateRequest, DeleteRequest, JsonPointer, PatchRequest, QueryRequest, QueryResponse,
    ReadRequest, Request, ResourceResponse, UpdateRequest,
};

/// How overlapping pointers such as `/a` and `/a/b` combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionPolicy {
    /// Every pointer contributes, so `/a/b` also appears as a top-level `b`
    #[default]
    Union,
    /// A pointer is dropped when a strict prefix of it is also requested
    MostGeneral,
}

impl fmt::Display for ProjectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Union => write!(f, "union"),
            Self::MostGeneral => write!(f, "most_general"),
        }
    }
}

impl FromStr for ProjectionPolicy {
    type Err = ResourceException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "union" => Ok(Self::Union),
            "most_general" => Ok(Self::MostGeneral),
            _ => Err(ResourceException::bad_request(format!(
                "'{s}' is not a valid projection policy"
            ))),
        }
    }
}

/// Reduce `content` to the requested `fields`
///
/// Content that is not an object, an empty field list and a field list made
/// only of root pointers all return the content unchanged.
pub fn project(content: &Value, fields: &[JsonPointer], policy: ProjectionPolicy) -> Value {
    let Value::Object(source) = content else {
        return content.clone();
    };
    if fields.iter().all(JsonPointer::is_root) {
        return content.clone();
    }

    let mut projected = Map::new();
    for field in fields {
        if field.is_root() {
            projected.extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
            continue;
        }
        if policy == ProjectionPolicy::MostGeneral
            && fields.iter().any(|other| other.is_strict_prefix_of(field))
        {
            continue;
        }
        if let (Some(leaf), Some(value)) = (field.leaf(), field.get(content)) {
            projected.insert(leaf.to_string(), value.clone());
        }
    }
    Value::Object(projected)
}

/// Applies each request's `fields` to the responses it produces
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldProjectionFilter {
    policy: ProjectionPolicy,
}

impl FieldProjectionFilter {
    /// Filter projecting with `policy`
    pub fn new(policy: ProjectionPolicy) -> Self {
        Self { policy }
    }

    fn shape(&self, request: &dyn Request, response: ResourceResponse) -> ResourceResponse {
        response.projected(request.fields(), self.policy)
    }
}

struct ProjectingHandler<'a> {
    inner: &'a mut (dyn QueryResourceHandler + Send),
    fields: &'a [JsonPointer],
    policy: ProjectionPolicy,
}

impl QueryResourceHandler for ProjectingHandler<'_> {
    fn handle_resource(&mut self, resource: ResourceResponse) -> bool {
        self.inner
            .handle_resource(resource.projected(self.fields, self.policy))
    }
}

#[async_trait]
impl Filter for FieldProjectionFilter {
    async fn filter_create(
        &self,
        context: &Context,
        request: &CreateRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        let response = next.handle_create(context, request).await?;
        Ok(self.shape(request, response))
    }

    async fn filter_delete(
        &self,
        context: &Context,
        request: &DeleteRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        let response = next.handle_delete(context, request).await?;
        Ok(self.shape(request, response))
    }

    async fn filter_patch(
        &self,
        context: &Context,
        request: &PatchRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        let response = next.handle_patch(context, request).await?;
        Ok(self.shape(request, response))
    }

    async fn filter_query(
        &self,
        context: &Context,
        request: &QueryRequest,
        handler: &mut (dyn QueryResourceHandler + Send),
        next: &dyn RequestHandler,
    ) -> ResourceResult<QueryResponse> {
        if request.fields().is_empty() {
            return next.handle_query(context, request, handler).await;
        }
        let mut projecting = ProjectingHandler {
            inner: handler,
            fields: request.fields(),
            policy: self.policy,
        };
        next.handle_query(context, request, &mut projecting).await
    }

    async fn filter_read(
        &self,
        context: &Context,
        request: &ReadRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        let response = next.handle_read(context, request).await?;
        Ok(self.shape(request, response))
    }

    async fn filter_update(
        &self,
        context: &Context,
        request: &UpdateRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        let response = next.handle_update(context, request).await?;
        Ok(self.shape(request, response))
    }
}
