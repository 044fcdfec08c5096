//! Response kinds
//!
//! Every response records the resource API version of the handler that
//! served it ([`Response::resource_api_version`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{CountPolicy, JsonPointer, Version};
use crate::shaping::{project, ProjectionPolicy};

/// Behavior shared by all responses
pub trait Response {
    /// Version of the handler that produced this response
    fn resource_api_version(&self) -> Option<Version>;

    /// Record the serving handler's version
    fn set_resource_api_version(&mut self, version: Option<Version>);
}

/// A single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceResponse {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    revision: Option<String>,
    content: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fields: Vec<JsonPointer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_api_version: Option<Version>,
}

impl ResourceResponse {
    /// Create a response
    pub fn new(id: Option<String>, revision: Option<String>, content: Value) -> Self {
        Self {
            id,
            revision,
            content,
            fields: Vec::new(),
            resource_api_version: None,
        }
    }

    /// Resource id
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Resource revision
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Content
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Take the content
    pub fn into_content(self) -> Value {
        self.content
    }

    /// Field pointers already applied to the content
    pub fn fields(&self) -> &[JsonPointer] {
        &self.fields
    }

    /// Whether the content is a partial projection
    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Reduce the content to `fields`
    ///
    /// A response that already carries a projection keeps it, since its
    /// reduced content cannot be projected onto another field set.
    pub fn project(&mut self, fields: &[JsonPointer], policy: ProjectionPolicy) {
        if fields.is_empty() || self.has_fields() {
            return;
        }
        self.content = project(&self.content, fields, policy);
        self.fields = fields.to_vec();
    }

    /// Builder form of [`ResourceResponse::project`]
    #[must_use]
    pub fn projected(mut self, fields: &[JsonPointer], policy: ProjectionPolicy) -> Self {
        self.project(fields, policy);
        self
    }
}

impl Response for ResourceResponse {
    fn resource_api_version(&self) -> Option<Version> {
        self.resource_api_version
    }

    fn set_resource_api_version(&mut self, version: Option<Version>) {
        self.resource_api_version = version;
    }
}

/// Result of an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_api_version: Option<Version>,
}

impl ActionResponse {
    /// Wrap action output
    pub fn new(content: Value) -> Self {
        Self {
            content,
            resource_api_version: None,
        }
    }

    /// Action output
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Take the output
    pub fn into_content(self) -> Value {
        self.content
    }
}

impl Response for ActionResponse {
    fn resource_api_version(&self) -> Option<Version> {
        self.resource_api_version
    }

    fn set_resource_api_version(&mut self, version: Option<Version>) {
        self.resource_api_version = version;
    }
}

/// Completion of a query
///
/// The matched resources themselves are streamed to a
/// [`QueryResourceHandler`](crate::handler::QueryResourceHandler); this
/// carries paging and count metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    paged_results_cookie: Option<String>,
    total_paged_results_policy: CountPolicy,
    total_paged_results: i64,
    remaining_paged_results: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_api_version: Option<Version>,
}

impl QueryResponse {
    /// Count value meaning "not counted"
    pub const NO_COUNT: i64 = -1;

    /// A response with no count and no further pages
    pub fn new() -> Self {
        Self {
            paged_results_cookie: None,
            total_paged_results_policy: CountPolicy::None,
            total_paged_results: Self::NO_COUNT,
            remaining_paged_results: Self::NO_COUNT,
            resource_api_version: None,
        }
    }

    /// Cookie for the next page
    #[must_use]
    pub fn with_paged_results_cookie(mut self, cookie: Option<String>) -> Self {
        self.paged_results_cookie = cookie;
        self
    }

    /// Report a total count
    ///
    /// A `None` policy always reports [`QueryResponse::NO_COUNT`].
    #[must_use]
    pub fn with_total_paged_results(mut self, policy: CountPolicy, total: i64) -> Self {
        self.total_paged_results_policy = policy;
        self.total_paged_results = match policy {
            CountPolicy::None => Self::NO_COUNT,
            _ => total,
        };
        self
    }

    /// Report how many results follow this page
    #[must_use]
    pub fn with_remaining_paged_results(mut self, remaining: i64) -> Self {
        self.remaining_paged_results = remaining;
        self
    }

    /// Cookie for the next page; `None` on the last page
    pub fn paged_results_cookie(&self) -> Option<&str> {
        self.paged_results_cookie.as_deref()
    }

    /// Count precision actually used
    pub fn total_paged_results_policy(&self) -> CountPolicy {
        self.total_paged_results_policy
    }

    /// Total count, or [`QueryResponse::NO_COUNT`]
    pub fn total_paged_results(&self) -> i64 {
        self.total_paged_results
    }

    /// Results after this page, or [`QueryResponse::NO_COUNT`]
    pub fn remaining_paged_results(&self) -> i64 {
        self.remaining_paged_results
    }
}

impl Default for QueryResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl Response for QueryResponse {
    fn resource_api_version(&self) -> Option<Version> {
        self.resource_api_version
    }

    fn set_resource_api_version(&mut self, version: Option<Version>) {
        self.resource_api_version = version;
    }
}
