//! Adapters from provider shapes to [`RequestHandler`]

use std::sync::Arc;

use async_trait::async_trait;

use super::{CollectionResourceProvider, SingletonResourceProvider};
use crate::context::Context;
use crate::error::{ResourceException, ResourceResult};
use crate::handler::{ApiDescription, Describable, QueryResourceHandler, RequestHandler};
use crate::protocol::{
    ActionRequest, ActionResponse, CreateRequest, DeleteRequest, PatchRequest, QueryRequest,
    QueryResponse, ReadRequest, Request, ResourcePath, ResourceResponse, UpdateRequest,
};

/// What a collection request's remaining path addresses
enum Target<'a> {
    Collection,
    Instance(&'a str),
}

/// Full path of the addressed resource, for error messages
fn full_path(context: &Context, request: &dyn Request) -> ResourcePath {
    context.matched_path().concat(request.resource_path())
}

fn not_found(context: &Context, request: &dyn Request) -> ResourceException {
    ResourceException::not_found(format!(
        "Resource '{}' not found",
        full_path(context, request)
    ))
}

fn resolve<'a>(context: &Context, request: &'a dyn Request) -> ResourceResult<Target<'a>> {
    match request.resource_path().segments() {
        [] => Ok(Target::Collection),
        [id] => Ok(Target::Instance(id)),
        _ => Err(not_found(context, request)),
    }
}

fn rejected(
    context: &Context,
    request: &dyn Request,
    shape: &str,
    verb: &str,
) -> ResourceException {
    ResourceException::bad_request(format!(
        "The {shape} {} cannot be {verb}",
        full_path(context, request)
    ))
}

/// Serves a [`CollectionResourceProvider`]
///
/// An empty remaining path addresses the collection, a single segment
/// addresses the instance with that id, anything longer is not found.
pub struct CollectionAdapter {
    provider: Arc<dyn CollectionResourceProvider>,
    description: Option<ApiDescription>,
}

impl CollectionAdapter {
    /// Adapt `provider`
    pub fn new(provider: Arc<dyn CollectionResourceProvider>) -> Self {
        Self {
            provider,
            description: None,
        }
    }

    /// Advertise `description` through [`RequestHandler::describable`]
    #[must_use]
    pub fn with_description(mut self, description: ApiDescription) -> Self {
        self.description = Some(description);
        self
    }
}

impl Describable for CollectionAdapter {
    fn api(&self, _context: &Context) -> ApiDescription {
        self.description.clone().unwrap_or_default()
    }
}

#[async_trait]
impl RequestHandler for CollectionAdapter {
    async fn handle_action(
        &self,
        context: &Context,
        request: &ActionRequest,
    ) -> ResourceResult<ActionResponse> {
        match resolve(context, request)? {
            Target::Collection => self.provider.action_collection(context, request).await,
            Target::Instance(id) => self.provider.action_instance(context, id, request).await,
        }
    }

    async fn handle_create(
        &self,
        context: &Context,
        request: &CreateRequest,
    ) -> ResourceResult<ResourceResponse> {
        match resolve(context, request)? {
            Target::Collection => self.provider.create_instance(context, request).await,
            Target::Instance(_) => Err(rejected(context, request, "resource instance", "created")),
        }
    }

    async fn handle_delete(
        &self,
        context: &Context,
        request: &DeleteRequest,
    ) -> ResourceResult<ResourceResponse> {
        match resolve(context, request)? {
            Target::Collection => {
                Err(rejected(context, request, "resource collection", "deleted"))
            }
            Target::Instance(id) => self.provider.delete_instance(context, id, request).await,
        }
    }

    async fn handle_patch(
        &self,
        context: &Context,
        request: &PatchRequest,
    ) -> ResourceResult<ResourceResponse> {
        match resolve(context, request)? {
            Target::Collection => {
                Err(rejected(context, request, "resource collection", "patched"))
            }
            Target::Instance(id) => self.provider.patch_instance(context, id, request).await,
        }
    }

    async fn handle_query(
        &self,
        context: &Context,
        request: &QueryRequest,
        handler: &mut (dyn QueryResourceHandler + Send),
    ) -> ResourceResult<QueryResponse> {
        request.validate()?;
        match resolve(context, request)? {
            Target::Collection => {
                self.provider
                    .query_collection(context, request, handler)
                    .await
            }
            Target::Instance(_) => Err(rejected(context, request, "resource instance", "queried")),
        }
    }

    async fn handle_read(
        &self,
        context: &Context,
        request: &ReadRequest,
    ) -> ResourceResult<ResourceResponse> {
        match resolve(context, request)? {
            Target::Collection => Err(rejected(context, request, "resource collection", "read")),
            Target::Instance(id) => self.provider.read_instance(context, id, request).await,
        }
    }

    async fn handle_update(
        &self,
        context: &Context,
        request: &UpdateRequest,
    ) -> ResourceResult<ResourceResponse> {
        match resolve(context, request)? {
            Target::Collection => {
                Err(rejected(context, request, "resource collection", "updated"))
            }
            Target::Instance(id) => self.provider.update_instance(context, id, request).await,
        }
    }

    fn describable(&self) -> Option<&dyn Describable> {
        self.description.as_ref().map(|_| self as &dyn Describable)
    }
}

/// Serves a [`SingletonResourceProvider`]
///
/// Only an empty remaining path addresses the resource.
pub struct SingletonAdapter {
    provider: Arc<dyn SingletonResourceProvider>,
    description: Option<ApiDescription>,
}

impl SingletonAdapter {
    /// Adapt `provider`
    pub fn new(provider: Arc<dyn SingletonResourceProvider>) -> Self {
        Self {
            provider,
            description: None,
        }
    }

    /// Advertise `description` through [`RequestHandler::describable`]
    #[must_use]
    pub fn with_description(mut self, description: ApiDescription) -> Self {
        self.description = Some(description);
        self
    }

    fn check(&self, context: &Context, request: &dyn Request) -> ResourceResult<()> {
        if request.resource_path().is_empty() {
            Ok(())
        } else {
            Err(not_found(context, request))
        }
    }
}

impl Describable for SingletonAdapter {
    fn api(&self, _context: &Context) -> ApiDescription {
        self.description.clone().unwrap_or_default()
    }
}

#[async_trait]
impl RequestHandler for SingletonAdapter {
    async fn handle_action(
        &self,
        context: &Context,
        request: &ActionRequest,
    ) -> ResourceResult<ActionResponse> {
        self.check(context, request)?;
        self.provider.action_instance(context, request).await
    }

    async fn handle_create(
        &self,
        context: &Context,
        request: &CreateRequest,
    ) -> ResourceResult<ResourceResponse> {
        Err(rejected(context, request, "singleton resource", "created"))
    }

    async fn handle_delete(
        &self,
        context: &Context,
        request: &DeleteRequest,
    ) -> ResourceResult<ResourceResponse> {
        Err(rejected(context, request, "singleton resource", "deleted"))
    }

    async fn handle_patch(
        &self,
        context: &Context,
        request: &PatchRequest,
    ) -> ResourceResult<ResourceResponse> {
        self.check(context, request)?;
        self.provider.patch_instance(context, request).await
    }

    async fn handle_query(
        &self,
        context: &Context,
        request: &QueryRequest,
        _handler: &mut (dyn QueryResourceHandler + Send),
    ) -> ResourceResult<QueryResponse> {
        Err(rejected(context, request, "singleton resource", "queried"))
    }

    async fn handle_read(
        &self,
        context: &Context,
        request: &ReadRequest,
    ) -> ResourceResult<ResourceResponse> {
        self.check(context, request)?;
        self.provider.read_instance(context, request).await
    }

    async fn handle_update(
        &self,
        context: &Context,
        request: &UpdateRequest,
    ) -> ResourceResult<ResourceResponse> {
        self.check(context, request)?;
        self.provider.update_instance(context, request).await
    }

    fn describable(&self) -> Option<&dyn Describable> {
        self.description.as_ref().map(|_| self as &dyn Describable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterChain;
    use crate::protocol::PatchOperation;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Implements only reads
    struct ReadOnlyUsers;

    #[async_trait]
    impl CollectionResourceProvider for ReadOnlyUsers {
        async fn read_instance(
            &self,
            _context: &Context,
            resource_id: &str,
            _request: &ReadRequest,
        ) -> ResourceResult<ResourceResponse> {
            Ok(ResourceResponse::new(
                Some(resource_id.to_string()),
                Some("0".into()),
                json!({"id": resource_id}),
            ))
        }
    }

    struct Settings;

    #[async_trait]
    impl SingletonResourceProvider for Settings {
        async fn read_instance(
            &self,
            _context: &Context,
            _request: &ReadRequest,
        ) -> ResourceResult<ResourceResponse> {
            Ok(ResourceResponse::new(None, None, json!({"theme": "dark"})))
        }
    }

    /// Counts the queries that reach it
    #[derive(Default)]
    struct CountingQueries {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CollectionResourceProvider for CountingQueries {
        async fn query_collection(
            &self,
            _context: &Context,
            _request: &QueryRequest,
            _handler: &mut (dyn QueryResourceHandler + Send),
        ) -> ResourceResult<QueryResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(QueryResponse::default())
        }
    }

    fn users() -> CollectionAdapter {
        CollectionAdapter::new(Arc::new(ReadOnlyUsers))
    }

    fn routed(matched: &str) -> Context {
        Context::root().with_router(
            ResourcePath::parse(matched).unwrap(),
            ResourcePath::root(),
            BTreeMap::new(),
        )
    }

    #[tokio::test]
    async fn test_instance_read_uses_segment_as_id() {
        let response = users()
            .handle_read(&Context::root(), &ReadRequest::new("42").unwrap())
            .await
            .unwrap();
        assert_eq!(response.id(), Some("42"));
    }

    #[tokio::test]
    async fn test_deep_paths_not_found() {
        let err = users()
            .handle_read(&Context::root(), &ReadRequest::new("42/devices").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 404);
    }

    #[tokio::test]
    async fn test_collection_rejections_name_the_path() {
        let ctx = routed("users");
        let adapter = users();

        let err = adapter
            .handle_read(&ctx, &ReadRequest::new("").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 400);
        assert_eq!(err.message(), "The resource collection users cannot be read");

        let err = adapter
            .handle_create(&ctx, &CreateRequest::new("7", json!({})).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "The resource instance users/7 cannot be created");

        let err = adapter
            .handle_query(&ctx, &QueryRequest::new("7").unwrap(), &mut Vec::<ResourceResponse>::new())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "The resource instance users/7 cannot be queried");

        let err = adapter
            .handle_patch(&ctx, &PatchRequest::new("", vec![PatchOperation::remove("x")]).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "The resource collection users cannot be patched");
    }

    #[tokio::test]
    async fn test_unimplemented_operations_not_supported() {
        let adapter = users();
        let ctx = Context::root();

        let err = adapter
            .handle_delete(&ctx, &DeleteRequest::new("1").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 501);

        let err = adapter
            .handle_query(&ctx, &QueryRequest::new("").unwrap(), &mut Vec::<ResourceResponse>::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 501);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_query_never_reaches_provider() {
        let provider = Arc::new(CountingQueries::default());
        let chain = FilterChain::new(Arc::new(CollectionAdapter::new(provider.clone())), vec![]);
        let request = QueryRequest::new("")
            .unwrap()
            .with_page_size(2)
            .with_paged_results_offset(3)
            .with_paged_results_cookie("abc");

        let err = chain
            .handle_query(&Context::root(), &request, &mut Vec::<ResourceResponse>::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 400);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        let valid = QueryRequest::new("").unwrap().with_page_size(2);
        chain
            .handle_query(&Context::root(), &valid, &mut Vec::<ResourceResponse>::new())
            .await
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_singleton() {
        let adapter = SingletonAdapter::new(Arc::new(Settings));
        let ctx = routed("settings");

        let response = adapter
            .handle_read(&ctx, &ReadRequest::new("").unwrap())
            .await
            .unwrap();
        assert_eq!(response.content(), &json!({"theme": "dark"}));

        let err = adapter
            .handle_delete(&ctx, &DeleteRequest::new("").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "The singleton resource settings cannot be deleted");

        let err = adapter
            .handle_create(&ctx, &CreateRequest::new("", json!({})).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "The singleton resource settings cannot be created");

        let err = adapter
            .handle_update(&ctx, &UpdateRequest::new("", json!({})).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 501);

        let err = adapter
            .handle_read(&ctx, &ReadRequest::new("x").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 404);
    }

    #[test]
    fn test_description_capability() {
        assert!(users().describable().is_none());
        let described = users().with_description(ApiDescription::new().with_title("users"));
        let api = described.describable().unwrap().api(&Context::root());
        assert_eq!(api.title(), Some("users"));
    }
}
