//! In-memory collection provider
//!
//! [`MemoryBackend`] keeps resources in a [`DashMap`] keyed by id. Revisions
//! are decimal counters starting at `"0"` and bumped on every change. Stored
//! content is returned with `_id` and `_rev` fields added.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use crudpaq::context::Context;
//! use crudpaq::handler::RequestHandler;
//! use crudpaq::protocol::{CreateRequest, ReadRequest};
//! use crudpaq::provider::{CollectionAdapter, MemoryBackend};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let users = CollectionAdapter::new(Arc::new(MemoryBackend::new()));
//! let ctx = Context::root();
//!
//! let created = users
//!     .handle_create(&ctx, &CreateRequest::new("", json!({"name": "ada"})).unwrap())
//!     .await
//!     .unwrap();
//! let id = created.id().unwrap().to_string();
//!
//! let read = users.handle_read(&ctx, &ReadRequest::new(&id).unwrap()).await.unwrap();
//! assert_eq!(read.content()["name"], "ada");
//! assert_eq!(read.revision(), Some("0"));
//! # }
//! ```

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{json, Map, Value};

use super::{not_supported, CollectionResourceProvider};
use crate::config::Config;
use crate::context::Context;
use crate::error::{ResourceException, ResourceResult};
use crate::handler::QueryResourceHandler;
use crate::protocol::{
    ActionRequest, ActionResponse, ComparisonOperator, CreateRequest, DeleteRequest, JsonPointer,
    PatchOperation, PatchOperationKind, PatchRequest, QueryFilter, QueryRequest, QueryResponse,
    ReadRequest, ResourceResponse, UpdateRequest,
};
use crate::shaping::{compare_values, Paginator};

const ID_FIELD: &str = "_id";
const REV_FIELD: &str = "_rev";

#[derive(Debug, Clone)]
struct Stored {
    sequence: u64,
    revision: u64,
    content: Map<String, Value>,
}

impl Stored {
    fn response(&self, id: &str) -> ResourceResponse {
        let revision = self.revision.to_string();
        let mut content = self.content.clone();
        content.insert(ID_FIELD.into(), json!(id));
        content.insert(REV_FIELD.into(), json!(revision));
        ResourceResponse::new(Some(id.to_string()), Some(revision), Value::Object(content))
    }

    fn check_revision(&self, id: &str, expected: Option<&str>) -> ResourceResult<()> {
        match expected {
            Some(rev) if rev != "*" && rev != self.revision.to_string() => {
                Err(ResourceException::precondition_failed(format!(
                    "Expected revision {rev} of resource {id} but found {}",
                    self.revision
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Reference collection provider backed by memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    resources: DashMap<String, Stored>,
    next_id: AtomicU64,
    sequence: AtomicU64,
    paginator: Paginator,
}

impl MemoryBackend {
    /// Empty backend with no paging limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty backend using the configured query limits
    pub fn from_config(config: &Config) -> Self {
        Self::with_paginator(Paginator::from_config(&config.query))
    }

    /// Empty backend paging with `paginator`
    pub fn with_paginator(paginator: Paginator) -> Self {
        Self {
            paginator,
            ..Self::default()
        }
    }

    /// Number of stored resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the backend is empty
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn generate_id(&self) -> String {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
            if !self.resources.contains_key(&id) {
                return id;
            }
        }
    }

    fn not_found(id: &str) -> ResourceException {
        ResourceException::not_found(format!("Resource '{id}' not found"))
    }
}

/// Strip metadata fields and require an object
fn into_body(content: &Value) -> ResourceResult<Map<String, Value>> {
    let Value::Object(map) = content else {
        return Err(ResourceException::bad_request(
            "Resource content must be a JSON object",
        ));
    };
    let mut map = map.clone();
    map.remove(ID_FIELD);
    map.remove(REV_FIELD);
    Ok(map)
}

fn apply_patch(content: &mut Value, operation: &PatchOperation) -> ResourceResult<()> {
    let field = operation.field();
    if field.is_root() {
        return Err(ResourceException::bad_request(format!(
            "The {} operation cannot target the whole resource",
            operation.operation()
        )));
    }
    let conflict = || ResourceException::conflict(format!("The field '{field}' does not exist"));
    let required_value = || {
        operation.value().cloned().ok_or_else(|| {
            ResourceException::bad_request(format!(
                "The {} operation on '{field}' requires a value",
                operation.operation()
            ))
        })
    };

    match operation.operation() {
        PatchOperationKind::Add => {
            if !field.set_permissive(content, required_value()?) {
                return Err(conflict());
            }
        }
        PatchOperationKind::Remove => match operation.value() {
            None => {
                field.remove(content);
            }
            Some(value) => {
                let targets: Vec<&Value> = match value {
                    Value::Array(values) => values.iter().collect(),
                    value => vec![value],
                };
                let matches_scalar = match field.get_mut(content) {
                    Some(Value::Array(items)) => {
                        items.retain(|item| !targets.contains(&item));
                        false
                    }
                    Some(current) => targets.contains(&&*current),
                    None => false,
                };
                if matches_scalar {
                    field.remove(content);
                }
            }
        },
        PatchOperationKind::Replace => {
            field.remove(content);
            match operation.value() {
                None | Some(Value::Null) => {}
                Some(value) => {
                    if !field.set_permissive(content, value.clone()) {
                        return Err(conflict());
                    }
                }
            }
        }
        PatchOperationKind::Increment => {
            let amount = required_value()?;
            let Value::Number(amount) = amount else {
                return Err(ResourceException::bad_request(format!(
                    "The increment amount for '{field}' is not a number"
                )));
            };
            let not_numeric =
                || ResourceException::bad_request(format!("The field '{field}' is not a number"));
            match field.get_mut(content) {
                None => {
                    return Err(ResourceException::bad_request(format!(
                        "The field '{field}' does not exist"
                    )))
                }
                Some(Value::Array(items)) => {
                    for item in items.iter_mut() {
                        *item = increment(item, &amount).ok_or_else(not_numeric)?;
                    }
                }
                Some(current) => {
                    *current = increment(current, &amount).ok_or_else(not_numeric)?;
                }
            }
        }
    }
    Ok(())
}

/// Add `amount` to a numeric value, keeping integers integral
fn increment(value: &Value, amount: &serde_json::Number) -> Option<Value> {
    let Value::Number(current) = value else {
        return None;
    };
    Some(match (current.as_i64(), amount.as_i64()) {
        (Some(a), Some(b)) => json!(a.saturating_add(b)),
        _ => json!(current.as_f64()? + amount.as_f64()?),
    })
}

/// Outcome of evaluating a filter against one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Truth {
    True,
    False,
    Undefined,
}

impl Truth {
    fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }

    fn not(self) -> Self {
        match self {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Undefined => Self::Undefined,
        }
    }
}

fn compare(operator: ComparisonOperator, actual: &Value, expected: &Value) -> Truth {
    let same_kind = matches!(
        (actual, expected),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
    );
    match operator {
        ComparisonOperator::Equals => match (actual, expected) {
            (Value::Array(items), _) => Truth::from_bool(
                items
                    .iter()
                    .any(|item| compare(operator, item, expected) == Truth::True),
            ),
            _ if same_kind => Truth::from_bool(compare_values(actual, expected).is_eq()),
            _ => Truth::from_bool(actual == expected),
        },
        ComparisonOperator::Contains => match (actual, expected) {
            (Value::String(a), Value::String(e)) => {
                Truth::from_bool(a.to_lowercase().contains(&e.to_lowercase()))
            }
            (Value::Array(items), _) => Truth::from_bool(
                items
                    .iter()
                    .any(|item| compare(ComparisonOperator::Equals, item, expected) == Truth::True),
            ),
            _ => Truth::Undefined,
        },
        ComparisonOperator::StartsWith => match (actual, expected) {
            (Value::String(a), Value::String(e)) => {
                Truth::from_bool(a.to_lowercase().starts_with(&e.to_lowercase()))
            }
            _ => Truth::Undefined,
        },
        ordering if same_kind => {
            let result = compare_values(actual, expected);
            Truth::from_bool(match ordering {
                ComparisonOperator::GreaterThan => result == CmpOrdering::Greater,
                ComparisonOperator::GreaterThanOrEqual => result != CmpOrdering::Less,
                ComparisonOperator::LessThan => result == CmpOrdering::Less,
                _ => result != CmpOrdering::Greater,
            })
        }
        _ => Truth::Undefined,
    }
}

/// Non-null value at `field`
fn lookup<'a>(field: &JsonPointer, content: &'a Value) -> Option<&'a Value> {
    field.get(content).filter(|value| !value.is_null())
}

fn evaluate(filter: &QueryFilter, content: &Value) -> ResourceResult<Truth> {
    Ok(match filter {
        QueryFilter::Boolean { value } => Truth::from_bool(*value),
        QueryFilter::And { filters } => {
            let mut result = Truth::True;
            for filter in filters {
                match evaluate(filter, content)? {
                    Truth::False => return Ok(Truth::False),
                    Truth::Undefined => result = Truth::Undefined,
                    Truth::True => {}
                }
            }
            result
        }
        QueryFilter::Or { filters } => {
            let mut result = Truth::False;
            for filter in filters {
                match evaluate(filter, content)? {
                    Truth::True => return Ok(Truth::True),
                    Truth::Undefined => result = Truth::Undefined,
                    Truth::False => {}
                }
            }
            result
        }
        QueryFilter::Not { filter } => evaluate(filter, content)?.not(),
        QueryFilter::Present { field } => Truth::from_bool(lookup(field, content).is_some()),
        QueryFilter::Comparison {
            field,
            operator,
            value,
        } => match lookup(field, content) {
            Some(actual) => compare(*operator, actual, value),
            None => Truth::Undefined,
        },
        QueryFilter::Extended { operator, .. } => {
            return Err(ResourceException::bad_request(format!(
                "The filter operator '{operator}' is not supported"
            )))
        }
    })
}

#[async_trait]
impl CollectionResourceProvider for MemoryBackend {
    async fn action_collection(
        &self,
        _context: &Context,
        request: &ActionRequest,
    ) -> ResourceResult<ActionResponse> {
        match request.action() {
            "clear" => {
                let cleared = self.resources.len();
                self.resources.clear();
                tracing::debug!(cleared, "Cleared in-memory collection");
                Ok(ActionResponse::new(json!({ "cleared": cleared })))
            }
            _ => Err(not_supported(request)),
        }
    }

    async fn create_instance(
        &self,
        _context: &Context,
        request: &CreateRequest,
    ) -> ResourceResult<ResourceResponse> {
        let content = into_body(request.content())?;
        let id = match request.new_resource_id() {
            Some(id) => id.to_string(),
            None => self.generate_id(),
        };

        match self.resources.entry(id.clone()) {
            Entry::Occupied(_) => Err(ResourceException::precondition_failed(format!(
                "A resource with id '{id}' already exists"
            ))),
            Entry::Vacant(slot) => {
                let stored = Stored {
                    sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                    revision: 0,
                    content,
                };
                let response = stored.response(&id);
                slot.insert(stored);
                tracing::debug!(id = %id, "Created resource");
                Ok(response)
            }
        }
    }

    async fn delete_instance(
        &self,
        _context: &Context,
        resource_id: &str,
        request: &DeleteRequest,
    ) -> ResourceResult<ResourceResponse> {
        match self.resources.entry(resource_id.to_string()) {
            Entry::Vacant(_) => Err(Self::not_found(resource_id)),
            Entry::Occupied(entry) => {
                entry.get().check_revision(resource_id, request.revision())?;
                let response = entry.get().response(resource_id);
                entry.remove();
                Ok(response)
            }
        }
    }

    async fn patch_instance(
        &self,
        _context: &Context,
        resource_id: &str,
        request: &PatchRequest,
    ) -> ResourceResult<ResourceResponse> {
        let mut stored = self
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| Self::not_found(resource_id))?;
        stored.check_revision(resource_id, request.revision())?;

        let mut content = Value::Object(stored.content.clone());
        for operation in request.operations() {
            apply_patch(&mut content, operation)?;
        }
        stored.content = into_body(&content)?;
        stored.revision += 1;
        Ok(stored.response(resource_id))
    }

    async fn query_collection(
        &self,
        _context: &Context,
        request: &QueryRequest,
        handler: &mut (dyn QueryResourceHandler + Send),
    ) -> ResourceResult<QueryResponse> {
        request.validate()?;
        if request.query_id().is_some() || request.query_expression().is_some() {
            return Err(ResourceException::not_supported(
                "Only query filters are supported by the in-memory backend",
            ));
        }

        let mut snapshot: Vec<(String, Stored)> = self
            .resources
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        snapshot.sort_by_key(|(_, stored)| stored.sequence);

        let mut matches = Vec::with_capacity(snapshot.len());
        for (id, stored) in &snapshot {
            let resource = stored.response(id);
            let matched = match request.query_filter() {
                Some(filter) => evaluate(filter, resource.content())? == Truth::True,
                None => true,
            };
            if matched {
                matches.push(resource);
            }
        }

        let page = self.paginator.paginate(matches, request)?;
        for resource in page.resources {
            if !handler.handle_resource(resource) {
                break;
            }
        }
        Ok(page.response)
    }

    async fn read_instance(
        &self,
        _context: &Context,
        resource_id: &str,
        _request: &ReadRequest,
    ) -> ResourceResult<ResourceResponse> {
        self.resources
            .get(resource_id)
            .map(|stored| stored.response(resource_id))
            .ok_or_else(|| Self::not_found(resource_id))
    }

    async fn update_instance(
        &self,
        _context: &Context,
        resource_id: &str,
        request: &UpdateRequest,
    ) -> ResourceResult<ResourceResponse> {
        let content = into_body(request.content())?;
        let mut stored = self
            .resources
            .get_mut(resource_id)
            .ok_or_else(|| Self::not_found(resource_id))?;
        stored.check_revision(resource_id, request.revision())?;
        stored.content = content;
        stored.revision += 1;
        Ok(stored.response(resource_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{collect_query, RequestHandler};
    use crate::protocol::{CountPolicy, SortKey};
    use crate::provider::CollectionAdapter;
    use futures::future::join_all;
    use std::sync::Arc;

    fn backend() -> (Arc<MemoryBackend>, CollectionAdapter) {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = CollectionAdapter::new(backend.clone());
        (backend, adapter)
    }

    async fn seed(adapter: &CollectionAdapter, people: &[(&str, i64)]) {
        for (name, age) in people {
            adapter
                .handle_create(
                    &Context::root(),
                    &CreateRequest::new("", json!({"name": name, "age": age})).unwrap(),
                )
                .await
                .unwrap();
        }
    }

    fn names(resources: &[ResourceResponse]) -> Vec<&str> {
        resources
            .iter()
            .filter_map(|r| r.content()["name"].as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_create_read_update_delete() {
        let (backend, users) = backend();
        let ctx = Context::root();

        let created = users
            .handle_create(
                &ctx,
                &CreateRequest::new("", json!({"name": "ada"}))
                    .unwrap()
                    .with_new_resource_id("ada"),
            )
            .await
            .unwrap();
        assert_eq!(created.id(), Some("ada"));
        assert_eq!(created.revision(), Some("0"));
        assert_eq!(created.content()["_id"], "ada");

        let updated = users
            .handle_update(
                &ctx,
                &UpdateRequest::new("ada", json!({"name": "Ada", "_rev": "ignored"}))
                    .unwrap()
                    .with_revision("0"),
            )
            .await
            .unwrap();
        assert_eq!(updated.revision(), Some("1"));
        assert_eq!(updated.content()["_rev"], "1");

        let stale = users
            .handle_delete(&ctx, &DeleteRequest::new("ada").unwrap().with_revision("0"))
            .await
            .unwrap_err();
        assert_eq!(stale.code(), 412);

        let deleted = users
            .handle_delete(&ctx, &DeleteRequest::new("ada").unwrap().with_revision("1"))
            .await
            .unwrap();
        assert_eq!(deleted.content()["name"], "Ada");
        assert!(backend.is_empty());

        let missing = users
            .handle_read(&ctx, &ReadRequest::new("ada").unwrap())
            .await
            .unwrap_err();
        assert_eq!(missing.code(), 404);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (_, users) = backend();
        let ctx = Context::root();
        let request = CreateRequest::new("", json!({})).unwrap().with_new_resource_id("x");
        users.handle_create(&ctx, &request).await.unwrap();
        let err = users.handle_create(&ctx, &request).await.unwrap_err();
        assert_eq!(err.code(), 412);
    }

    #[tokio::test]
    async fn test_non_object_content_rejected() {
        let (_, users) = backend();
        let err = users
            .handle_create(&Context::root(), &CreateRequest::new("", json!([1])).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[tokio::test]
    async fn test_patch_operations() {
        let (_, users) = backend();
        let ctx = Context::root();
        users
            .handle_create(
                &ctx,
                &CreateRequest::new("", json!({"name": "bob", "tags": ["a", "b"], "logins": 1, "old": true}))
                    .unwrap()
                    .with_new_resource_id("bob"),
            )
            .await
            .unwrap();

        let patched = users
            .handle_patch(
                &ctx,
                &PatchRequest::new(
                    "bob",
                    vec![
                        PatchOperation::add("/tags/-", json!("c")),
                        PatchOperation::remove_value("/tags", json!("a")),
                        PatchOperation::increment("/logins", json!(2)),
                        PatchOperation::replace("/name", json!("Bob")),
                        PatchOperation::remove("/old"),
                        PatchOperation::add("/email", json!("bob@example.com")),
                    ],
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let content = patched.content();
        assert_eq!(content["tags"], json!(["b", "c"]));
        assert_eq!(content["logins"], 3);
        assert_eq!(content["name"], "Bob");
        assert_eq!(content["email"], "bob@example.com");
        assert!(content.get("old").is_none());
        assert_eq!(patched.revision(), Some("1"));

        let err = users
            .handle_patch(
                &ctx,
                &PatchRequest::new("bob", vec![PatchOperation::increment("/name", json!(1))]).unwrap(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), 400);

        // a failed patch leaves the resource untouched
        let read = users
            .handle_read(&ctx, &ReadRequest::new("bob").unwrap())
            .await
            .unwrap();
        assert_eq!(read.revision(), Some("1"));
    }

    #[tokio::test]
    async fn test_patch_add_creates_parents_and_increments_lists() {
        let (_, users) = backend();
        let ctx = Context::root();
        users
            .handle_create(
                &ctx,
                &CreateRequest::new("", json!({"scores": [1, 2.5], "tags": ["a"]}))
                    .unwrap()
                    .with_new_resource_id("ann"),
            )
            .await
            .unwrap();

        let patched = users
            .handle_patch(
                &ctx,
                &PatchRequest::new(
                    "ann",
                    vec![
                        PatchOperation::add("/contact/mobile", json!("+33 6")),
                        PatchOperation::add("/tags", json!(["x", "y"])),
                        PatchOperation::increment("/scores", json!(1)),
                        PatchOperation::replace("/address/city", json!("Paris")),
                    ],
                )
                .unwrap(),
            )
            .await
            .unwrap();

        let content = patched.content();
        assert_eq!(content["contact"], json!({"mobile": "+33 6"}));
        // add replaces rather than appends
        assert_eq!(content["tags"], json!(["x", "y"]));
        assert_eq!(content["scores"], json!([2, 3.5]));
        assert_eq!(content["address"], json!({"city": "Paris"}));

        let err = users
            .handle_patch(
                &ctx,
                &PatchRequest::new("ann", vec![PatchOperation::add("/tags/9", json!("z"))]).unwrap(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), 409);

        let err = users
            .handle_patch(
                &ctx,
                &PatchRequest::new("ann", vec![PatchOperation::increment("/tags", json!(1))]).unwrap(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), 400);

        let err = users
            .handle_patch(
                &ctx,
                &PatchRequest::new("ann", vec![PatchOperation::increment("/missing", json!(1))])
                    .unwrap(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[tokio::test]
    async fn test_query_filter_sort_and_page() {
        let (_, users) = backend();
        seed(
            &users,
            &[("eve", 35), ("bob", 17), ("Carol", 41), ("dan", 29), ("ada", 52)],
        )
        .await;
        let ctx = Context::root();

        let adults = QueryRequest::new("")
            .unwrap()
            .with_query_filter(QueryFilter::greater_than_or_equal("/age", json!(18)))
            .with_sort_key(SortKey::ascending("name"))
            .with_page_size(2)
            .with_total_paged_results_policy(CountPolicy::Exact);

        let (first, response) = collect_query(&users, &ctx, &adults).await.unwrap();
        assert_eq!(names(&first), ["ada", "Carol"]);
        assert_eq!(response.total_paged_results(), 4);
        assert_eq!(response.remaining_paged_results(), 2);

        let cookie = response.paged_results_cookie().unwrap().to_string();
        let (second, response) = collect_query(
            &users,
            &ctx,
            &adults.clone().with_paged_results_cookie(cookie),
        )
        .await
        .unwrap();
        assert_eq!(names(&second), ["dan", "eve"]);
        assert!(response.paged_results_cookie().is_none());
    }

    #[tokio::test]
    async fn test_three_valued_filters() {
        let (_, users) = backend();
        seed(&users, &[("ann", 30)]).await;
        users
            .handle_create(
                &Context::root(),
                &CreateRequest::new("", json!({"name": "ageless"})).unwrap(),
            )
            .await
            .unwrap();

        // comparing a missing field is undefined, and so is its negation
        let not_young = QueryRequest::new("")
            .unwrap()
            .with_query_filter(QueryFilter::not(QueryFilter::less_than("/age", json!(18))));
        let (matched, _) = collect_query(&users, &Context::root(), &not_young).await.unwrap();
        assert_eq!(names(&matched), ["ann"]);

        let absent = QueryRequest::new("")
            .unwrap()
            .with_query_filter(QueryFilter::not(QueryFilter::present("/age")));
        let (matched, _) = collect_query(&users, &Context::root(), &absent).await.unwrap();
        assert_eq!(names(&matched), ["ageless"]);

        let either = QueryRequest::new("").unwrap().with_query_filter(QueryFilter::or(vec![
            QueryFilter::equals("/age", json!(99)),
            QueryFilter::starts_with("/name", json!("AG")),
        ]));
        let (matched, _) = collect_query(&users, &Context::root(), &either).await.unwrap();
        assert_eq!(names(&matched), ["ageless"]);
    }

    #[tokio::test]
    async fn test_unsupported_queries() {
        let (_, users) = backend();
        let ctx = Context::root();

        let by_id = QueryRequest::new("").unwrap().with_query_id("all");
        let err = collect_query(&users, &ctx, &by_id).await.unwrap_err();
        assert_eq!(err.code(), 501);

        let extended = QueryRequest::new("")
            .unwrap()
            .with_query_filter(QueryFilter::extended("/name", "regex", json!(".*")));
        seed(&users, &[("x", 1)]).await;
        let err = collect_query(&users, &ctx, &extended).await.unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[tokio::test]
    async fn test_early_stop() {
        let (_, users) = backend();
        seed(&users, &[("a", 1), ("b", 2), ("c", 3)]).await;

        let mut seen = Vec::new();
        let mut handler = crate::handler::FnQueryHandler(|resource: ResourceResponse| {
            seen.push(resource);
            false
        });
        users
            .handle_query(&Context::root(), &QueryRequest::new("").unwrap(), &mut handler)
            .await
            .unwrap();
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_action() {
        let (backend, users) = backend();
        seed(&users, &[("a", 1), ("b", 2)]).await;

        let response = users
            .handle_action(&Context::root(), &ActionRequest::new("", "clear").unwrap())
            .await
            .unwrap();
        assert_eq!(response.content(), &json!({"cleared": 2}));
        assert!(backend.is_empty());

        let err = users
            .handle_action(&Context::root(), &ActionRequest::new("", "explode").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 501);
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_unique_ids() {
        let backend = Arc::new(MemoryBackend::new());
        let creates = (0..50).map(|i| {
            let backend = Arc::clone(&backend);
            async move {
                backend
                    .create_instance(
                        &Context::root(),
                        &CreateRequest::new("", json!({"n": i})).unwrap(),
                    )
                    .await
            }
        });
        let results = join_all(creates).await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(backend.len(), 50);
    }
}
