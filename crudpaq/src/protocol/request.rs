//! The seven request kinds and their common attributes
//!
//! Every request implements [`Request`], which exposes the attributes all
//! operations share: the resource path, the requested resource version, the
//! field pointers to return, additional parameters and preferred locales.
//! The builder methods on [`Request`] are available on every concrete type.
//!
//! # Example
//!
//! ```rust
//! use crudpaq::protocol::{CountPolicy, QueryRequest, Request, RequestType};
//!
//! let request = QueryRequest::new("users")
//!     .unwrap()
//!     .with_field("name")
//!     .with_page_size(10)
//!     .with_total_paged_results_policy(CountPolicy::Exact);
//!
//! assert_eq!(request.request_type(), RequestType::Query);
//! assert_eq!(request.resource_path().to_string(), "users");
//! assert!(request.validate().is_ok());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{JsonPointer, PatchOperation, QueryFilter, ResourcePath, SortKey, Version, CountPolicy};
use crate::error::{ResourceException, ResourceResult};

/// Operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    /// Create
    Create,
    /// Read
    Read,
    /// Update
    Update,
    /// Delete
    Delete,
    /// Patch
    Patch,
    /// Action
    Action,
    /// Query
    Query,
}

impl RequestType {
    /// All seven operations
    pub const ALL: [RequestType; 7] = [
        Self::Create,
        Self::Read,
        Self::Update,
        Self::Delete,
        Self::Patch,
        Self::Action,
        Self::Query,
    ];
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Read => write!(f, "read"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Patch => write!(f, "patch"),
            Self::Action => write!(f, "action"),
            Self::Query => write!(f, "query"),
        }
    }
}

/// Attributes shared by every request kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestCommon {
    resource_path: ResourcePath,
    resource_version: Option<Version>,
    fields: Vec<JsonPointer>,
    additional_parameters: BTreeMap<String, String>,
    preferred_locales: Vec<String>,
}

impl RequestCommon {
    fn at(resource_path: ResourcePath) -> Self {
        Self {
            resource_path,
            ..Self::default()
        }
    }
}

/// Common view over the seven request kinds
pub trait Request: fmt::Debug + Send + Sync {
    /// Which operation this is
    fn request_type(&self) -> RequestType;

    /// Shared attributes
    fn common(&self) -> &RequestCommon;

    /// Shared attributes, mutably
    fn common_mut(&mut self) -> &mut RequestCommon;

    /// Path of the targeted resource, relative to the current router
    fn resource_path(&self) -> &ResourcePath {
        &self.common().resource_path
    }

    /// Requested resource API version
    fn resource_version(&self) -> Option<Version> {
        self.common().resource_version
    }

    /// Field pointers to return; empty means every field
    fn fields(&self) -> &[JsonPointer] {
        &self.common().fields
    }

    /// Value of an additional parameter
    fn additional_parameter(&self, name: &str) -> Option<&str> {
        self.common().additional_parameters.get(name).map(String::as_str)
    }

    /// All additional parameters
    fn additional_parameters(&self) -> &BTreeMap<String, String> {
        &self.common().additional_parameters
    }

    /// Preferred locales, most preferred first
    fn preferred_locales(&self) -> &[String] {
        &self.common().preferred_locales
    }

    /// Replace the resource path
    fn with_resource_path(mut self, path: ResourcePath) -> Self
    where
        Self: Sized,
    {
        self.common_mut().resource_path = path;
        self
    }

    /// Request a resource API version
    fn with_resource_version(mut self, version: Version) -> Self
    where
        Self: Sized,
    {
        self.common_mut().resource_version = Some(version);
        self
    }

    /// Append a field pointer
    ///
    /// Fields are only ever appended; duplicates are kept.
    fn with_field(mut self, field: impl Into<JsonPointer>) -> Self
    where
        Self: Sized,
    {
        self.common_mut().fields.push(field.into());
        self
    }

    /// Append several field pointers
    fn with_fields<I, F>(mut self, fields: I) -> Self
    where
        Self: Sized,
        I: IntoIterator<Item = F>,
        F: Into<JsonPointer>,
    {
        self.common_mut()
            .fields
            .extend(fields.into_iter().map(Into::into));
        self
    }

    /// Append a field pointer in place
    fn add_field(&mut self, field: impl Into<JsonPointer>)
    where
        Self: Sized,
    {
        self.common_mut().fields.push(field.into());
    }

    /// Add an additional parameter; a repeated name is rejected
    fn with_additional_parameter(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> ResourceResult<Self>
    where
        Self: Sized,
    {
        let name = name.into();
        let params = &mut self.common_mut().additional_parameters;
        if params.contains_key(&name) {
            return Err(ResourceException::bad_request(format!(
                "Multiple values provided for parameter '{name}'"
            )));
        }
        params.insert(name, value.into());
        Ok(self)
    }

    /// Append a preferred locale
    fn with_preferred_locale(mut self, locale: impl Into<String>) -> Self
    where
        Self: Sized,
    {
        self.common_mut().preferred_locales.push(locale.into());
        self
    }
}

macro_rules! impl_request {
    ($ty:ty, $kind:expr) => {
        impl Request for $ty {
            fn request_type(&self) -> RequestType {
                $kind
            }

            fn common(&self) -> &RequestCommon {
                &self.common
            }

            fn common_mut(&mut self) -> &mut RequestCommon {
                &mut self.common
            }
        }
    };
}

/// Read a single resource
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    common: RequestCommon,
}

impl ReadRequest {
    /// Read the resource at `path`
    pub fn new(path: &str) -> ResourceResult<Self> {
        Ok(Self::at(ResourcePath::parse(path)?))
    }

    /// Read the resource at an already-parsed path
    pub fn at(path: ResourcePath) -> Self {
        Self {
            common: RequestCommon::at(path),
        }
    }
}

impl_request!(ReadRequest, RequestType::Read);

/// Create a resource in a collection
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    common: RequestCommon,
    new_resource_id: Option<String>,
    content: Value,
}

impl CreateRequest {
    /// Create `content` in the collection at `path`
    pub fn new(path: &str, content: Value) -> ResourceResult<Self> {
        Ok(Self::at(ResourcePath::parse(path)?, content))
    }

    /// Create `content` in the collection at an already-parsed path
    pub fn at(path: ResourcePath, content: Value) -> Self {
        Self {
            common: RequestCommon::at(path),
            new_resource_id: None,
            content,
        }
    }

    /// Client-supplied id for the new resource
    #[must_use]
    pub fn with_new_resource_id(mut self, id: impl Into<String>) -> Self {
        self.new_resource_id = Some(id.into());
        self
    }

    /// Client-supplied id, if any
    pub fn new_resource_id(&self) -> Option<&str> {
        self.new_resource_id.as_deref()
    }

    /// Content of the new resource
    pub fn content(&self) -> &Value {
        &self.content
    }
}

impl_request!(CreateRequest, RequestType::Create);

/// Replace a resource's content
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    common: RequestCommon,
    revision: Option<String>,
    content: Value,
}

impl UpdateRequest {
    /// Replace the resource at `path` with `content`
    pub fn new(path: &str, content: Value) -> ResourceResult<Self> {
        Ok(Self::at(ResourcePath::parse(path)?, content))
    }

    /// Replace the resource at an already-parsed path
    pub fn at(path: ResourcePath, content: Value) -> Self {
        Self {
            common: RequestCommon::at(path),
            revision: None,
            content,
        }
    }

    /// Only apply if the current revision matches
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Expected revision
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Replacement content
    pub fn content(&self) -> &Value {
        &self.content
    }
}

impl_request!(UpdateRequest, RequestType::Update);

/// Delete a resource
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    common: RequestCommon,
    revision: Option<String>,
}

impl DeleteRequest {
    /// Delete the resource at `path`
    pub fn new(path: &str) -> ResourceResult<Self> {
        Ok(Self::at(ResourcePath::parse(path)?))
    }

    /// Delete the resource at an already-parsed path
    pub fn at(path: ResourcePath) -> Self {
        Self {
            common: RequestCommon::at(path),
            revision: None,
        }
    }

    /// Only delete if the current revision matches
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Expected revision
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }
}

impl_request!(DeleteRequest, RequestType::Delete);

/// Apply an ordered list of patch operations
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRequest {
    common: RequestCommon,
    revision: Option<String>,
    operations: Vec<PatchOperation>,
}

impl PatchRequest {
    /// Patch the resource at `path`
    pub fn new(path: &str, operations: Vec<PatchOperation>) -> ResourceResult<Self> {
        Ok(Self::at(ResourcePath::parse(path)?, operations))
    }

    /// Patch the resource at an already-parsed path
    pub fn at(path: ResourcePath, operations: Vec<PatchOperation>) -> Self {
        Self {
            common: RequestCommon::at(path),
            revision: None,
            operations,
        }
    }

    /// Only apply if the current revision matches
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Expected revision
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Operations, in application order
    pub fn operations(&self) -> &[PatchOperation] {
        &self.operations
    }
}

impl_request!(PatchRequest, RequestType::Patch);

/// Invoke a named action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    common: RequestCommon,
    action: String,
    content: Value,
}

impl ActionRequest {
    /// Invoke `action` on the resource at `path`
    pub fn new(path: &str, action: impl Into<String>) -> ResourceResult<Self> {
        Ok(Self::at(ResourcePath::parse(path)?, action))
    }

    /// Invoke `action` on an already-parsed path
    pub fn at(path: ResourcePath, action: impl Into<String>) -> Self {
        Self {
            common: RequestCommon::at(path),
            action: action.into(),
            content: Value::Null,
        }
    }

    /// Action argument
    #[must_use]
    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    /// Action name
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Action argument
    pub fn content(&self) -> &Value {
        &self.content
    }
}

impl_request!(ActionRequest, RequestType::Action);

/// Search a collection
///
/// At most one of query id, filter and expression may be set, and at most
/// one of paged-results offset and cookie. Builders accept any combination;
/// [`QueryRequest::validate`] rejects the invalid ones.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    common: RequestCommon,
    query_id: Option<String>,
    query_filter: Option<QueryFilter>,
    query_expression: Option<String>,
    sort_keys: Vec<SortKey>,
    page_size: Option<u32>,
    paged_results_offset: u32,
    paged_results_cookie: Option<String>,
    total_paged_results_policy: Option<CountPolicy>,
}

impl QueryRequest {
    /// Query the collection at `path`
    pub fn new(path: &str) -> ResourceResult<Self> {
        Ok(Self::at(ResourcePath::parse(path)?))
    }

    /// Query the collection at an already-parsed path
    pub fn at(path: ResourcePath) -> Self {
        Self {
            common: RequestCommon::at(path),
            query_id: None,
            query_filter: None,
            query_expression: None,
            sort_keys: Vec::new(),
            page_size: None,
            paged_results_offset: 0,
            paged_results_cookie: None,
            total_paged_results_policy: None,
        }
    }

    /// Named, provider-defined query
    #[must_use]
    pub fn with_query_id(mut self, id: impl Into<String>) -> Self {
        self.query_id = Some(id.into());
        self
    }

    /// Filter expression tree
    #[must_use]
    pub fn with_query_filter(mut self, filter: QueryFilter) -> Self {
        self.query_filter = Some(filter);
        self
    }

    /// Provider-native query expression
    #[must_use]
    pub fn with_query_expression(mut self, expression: impl Into<String>) -> Self {
        self.query_expression = Some(expression.into());
        self
    }

    /// Append a sort key
    #[must_use]
    pub fn with_sort_key(mut self, key: SortKey) -> Self {
        self.sort_keys.push(key);
        self
    }

    /// Results per page; zero means unpaged
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Index of the first result to return
    #[must_use]
    pub fn with_paged_results_offset(mut self, offset: u32) -> Self {
        self.paged_results_offset = offset;
        self
    }

    /// Cookie returned by the previous page
    #[must_use]
    pub fn with_paged_results_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.paged_results_cookie = Some(cookie.into());
        self
    }

    /// Requested count precision
    #[must_use]
    pub fn with_total_paged_results_policy(mut self, policy: CountPolicy) -> Self {
        self.total_paged_results_policy = Some(policy);
        self
    }

    /// Named query
    pub fn query_id(&self) -> Option<&str> {
        self.query_id.as_deref()
    }

    /// Filter expression tree
    pub fn query_filter(&self) -> Option<&QueryFilter> {
        self.query_filter.as_ref()
    }

    /// Native query expression
    pub fn query_expression(&self) -> Option<&str> {
        self.query_expression.as_deref()
    }

    /// Sort keys, most significant first
    pub fn sort_keys(&self) -> &[SortKey] {
        &self.sort_keys
    }

    /// Results per page; zero when unpaged or unset
    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(0)
    }

    /// Page size as set by the client, if it set one
    pub fn requested_page_size(&self) -> Option<u32> {
        self.page_size
    }

    /// Offset of the first result
    pub fn paged_results_offset(&self) -> u32 {
        self.paged_results_offset
    }

    /// Cookie from the previous page
    pub fn paged_results_cookie(&self) -> Option<&str> {
        self.paged_results_cookie.as_deref()
    }

    /// Requested count precision
    pub fn total_paged_results_policy(&self) -> CountPolicy {
        self.total_paged_results_policy.unwrap_or_default()
    }

    /// Count policy as set by the client, if it set one
    pub fn requested_total_paged_results_policy(&self) -> Option<CountPolicy> {
        self.total_paged_results_policy
    }

    /// Whether paging was requested
    pub fn is_paged(&self) -> bool {
        self.page_size() > 0
    }

    /// Reject mutually exclusive combinations
    pub fn validate(&self) -> ResourceResult<()> {
        let selectors = [
            self.query_id.is_some(),
            self.query_filter.is_some(),
            self.query_expression.is_some(),
        ];
        if selectors.iter().filter(|set| **set).count() > 1 {
            return Err(ResourceException::bad_request(
                "Query id, query filter and query expression are mutually exclusive",
            ));
        }
        if self.paged_results_offset > 0 && self.paged_results_cookie.is_some() {
            return Err(ResourceException::bad_request(
                "Cookies and offsets are mutually exclusive",
            ));
        }
        Ok(())
    }
}

impl_request!(QueryRequest, RequestType::Query);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_common_attributes() {
        let mut request = ReadRequest::new("/users/1/")
            .unwrap()
            .with_resource_version(Version::new(1, 0))
            .with_field("name")
            .with_field("/name")
            .with_preferred_locale("en-GB");
        request.add_field("name");

        assert_eq!(request.resource_path().to_string(), "users/1");
        assert_eq!(request.resource_version(), Some(Version::new(1, 0)));
        // appended, never deduped
        assert_eq!(request.fields().len(), 3);
        assert_eq!(request.preferred_locales(), ["en-GB"]);
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let request = ReadRequest::new("users/1")
            .unwrap()
            .with_additional_parameter("_prettyPrint", "true")
            .unwrap();
        assert_eq!(request.additional_parameter("_prettyPrint"), Some("true"));

        let err = request
            .with_additional_parameter("_prettyPrint", "false")
            .unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn test_request_types() {
        let create = CreateRequest::new("users", json!({})).unwrap();
        let action = ActionRequest::new("users", "clear").unwrap();
        assert_eq!(create.request_type(), RequestType::Create);
        assert_eq!(action.request_type(), RequestType::Action);
        assert_eq!(RequestType::ALL.len(), 7);
        assert_eq!(RequestType::Patch.to_string(), "patch");
    }

    #[test]
    fn test_query_offset_and_cookie_rejected() {
        let request = QueryRequest::new("users")
            .unwrap()
            .with_page_size(2)
            .with_paged_results_offset(4)
            .with_paged_results_cookie("abc");
        let err = request.validate().unwrap_err();
        assert_eq!(err.code(), 400);
        assert!(err.message().contains("mutually exclusive"));
    }

    #[test]
    fn test_query_selectors_exclusive() {
        let request = QueryRequest::new("users")
            .unwrap()
            .with_query_id("all")
            .with_query_expression("select *");
        assert_eq!(request.validate().unwrap_err().code(), 400);

        let ok = QueryRequest::new("users")
            .unwrap()
            .with_query_filter(QueryFilter::always_true());
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_invalid_path_rejected() {
        assert!(ReadRequest::new("a//b").is_err());
    }
}
