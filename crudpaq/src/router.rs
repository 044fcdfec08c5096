//! URI template routing
//!
//! A [`UriRouter`] forwards each request to the handler whose template
//! matches the leading segments of the request's resource path. The matched
//! segments are stripped from the forwarded request and recorded, together
//! with any `{variable}` values, in a router context.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use crudpaq::context::Context;
//! use crudpaq::handler::RequestHandler;
//! use crudpaq::protocol::{CreateRequest, ReadRequest};
//! use crudpaq::provider::MemoryBackend;
//! use crudpaq::router::UriRouter;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let router = UriRouter::new();
//! router.add_collection("users", Arc::new(MemoryBackend::new())).unwrap();
//!
//! let ctx = Context::root();
//! let create = CreateRequest::new("users", json!({"name": "ada"}))
//!     .unwrap()
//!     .with_new_resource_id("ada");
//! router.handle_create(&ctx, &create).await.unwrap();
//!
//! let read = router.handle_read(&ctx, &ReadRequest::new("users/ada").unwrap()).await.unwrap();
//! assert_eq!(read.content()["name"], "ada");
//! # }
//! ```

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use regex::Regex;

use crate::context::Context;
use crate::error::{Error, ResourceException, ResourceResult, Result};
use crate::handler::{ApiDescription, Describable, QueryResourceHandler, RequestHandler};
use crate::protocol::{
    ActionRequest, ActionResponse, CreateRequest, DeleteRequest, PatchRequest, QueryRequest,
    QueryResponse, ReadRequest, Request, ResourcePath, ResourceResponse, UpdateRequest,
};
use crate::provider::{
    CollectionAdapter, CollectionResourceProvider, SingletonAdapter, SingletonResourceProvider,
};

/// A `{name}` template variable
static VARIABLE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{([A-Za-z_][A-Za-z0-9_]*)\}$").expect("variable regex is valid")
});

/// How a template must match a resource path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingMode {
    /// The template must match the whole path
    Equals,
    /// The template must match a leading run of segments
    StartsWith,
}

/// A registered route
pub struct Route {
    template: String,
    mode: RoutingMode,
    regex: Regex,
    variables: Vec<String>,
    segments: usize,
    handler: Arc<dyn RequestHandler>,
}

impl Route {
    fn compile(
        template: &str,
        mode: RoutingMode,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidRoute {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = template.trim_matches('/');
        let mut variables = Vec::new();
        let mut parts = Vec::new();
        if !trimmed.is_empty() {
            for segment in trimmed.split('/') {
                if segment.is_empty() {
                    return Err(invalid("empty path element"));
                }
                if let Some(captures) = VARIABLE_REGEX.captures(segment) {
                    let name = captures[1].to_string();
                    if variables.contains(&name) {
                        return Err(invalid("duplicate variable"));
                    }
                    parts.push(format!("(?P<{name}>[^/]+)"));
                    variables.push(name);
                } else if segment.contains(&['{', '}'][..]) {
                    return Err(invalid("malformed variable"));
                } else {
                    parts.push(regex::escape(&urlencoding::encode(segment)));
                }
            }
        }

        let body = parts.join("/");
        let pattern = match mode {
            RoutingMode::Equals => format!("^{body}$"),
            RoutingMode::StartsWith if body.is_empty() => "^".to_string(),
            RoutingMode::StartsWith => format!("^{body}(?:/|$)"),
        };

        Ok(Self {
            template: trimmed.to_string(),
            mode,
            regex: Regex::new(&pattern)?,
            segments: parts.len(),
            variables,
            handler,
        })
    }

    /// Template the route was registered with, without surrounding `/`
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Matching mode
    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// Handler requests are forwarded to
    pub fn handler(&self) -> &Arc<dyn RequestHandler> {
        &self.handler
    }

    fn matches(&self, encoded: &str) -> Option<BTreeMap<String, String>> {
        let captures = self.regex.captures(encoded)?;
        let mut values = BTreeMap::new();
        for name in &self.variables {
            let raw = captures.name(name)?.as_str();
            let value = urlencoding::decode(raw).ok()?;
            values.insert(name.clone(), value.into_owned());
        }
        Some(values)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("template", &self.template)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// A request resolved against a route
struct Matched<R> {
    handler: Arc<dyn RequestHandler>,
    context: Context,
    request: R,
}

/// Routes requests by URI template
///
/// Routes are tried in registration order and the one matching the most
/// segments wins; among equally long matches the earliest registered wins.
/// Routes may be added and removed while requests are being served.
pub struct UriRouter {
    routes: ArcSwap<Vec<Arc<Route>>>,
}

impl UriRouter {
    /// Router with no routes
    pub fn new() -> Self {
        Self {
            routes: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Register `handler` under `template`
    pub fn add_route(
        &self,
        mode: RoutingMode,
        template: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Arc<Route>> {
        let route = Arc::new(Route::compile(template, mode, handler)?);
        self.routes.rcu(|routes| {
            let mut routes = Vec::clone(routes);
            routes.push(Arc::clone(&route));
            routes
        });
        tracing::debug!(template = %route.template, mode = ?mode, "Route added");
        Ok(route)
    }

    /// Register a collection provider under `template`
    pub fn add_collection(
        &self,
        template: &str,
        provider: Arc<dyn CollectionResourceProvider>,
    ) -> Result<Arc<Route>> {
        self.add_route(
            RoutingMode::StartsWith,
            template,
            Arc::new(CollectionAdapter::new(provider)),
        )
    }

    /// Register a singleton provider under `template`
    pub fn add_singleton(
        &self,
        template: &str,
        provider: Arc<dyn SingletonResourceProvider>,
    ) -> Result<Arc<Route>> {
        self.add_route(
            RoutingMode::Equals,
            template,
            Arc::new(SingletonAdapter::new(provider)),
        )
    }

    /// Remove a route; returns whether it was registered
    pub fn remove_route(&self, route: &Arc<Route>) -> bool {
        let mut removed = false;
        self.routes.rcu(|routes| {
            let mut routes = Vec::clone(routes);
            let before = routes.len();
            routes.retain(|r| !Arc::ptr_eq(r, route));
            removed = routes.len() != before;
            routes
        });
        removed
    }

    /// Remove every route
    pub fn remove_all_routes(&self) {
        self.routes.store(Arc::new(Vec::new()));
    }

    /// Currently registered routes
    pub fn routes(&self) -> Vec<Arc<Route>> {
        Vec::clone(&self.routes.load())
    }

    fn select(&self, path: &ResourcePath) -> Option<(Arc<Route>, BTreeMap<String, String>)> {
        let encoded = path.to_string();
        self.routes
            .load()
            .iter()
            .filter_map(|route| Some((Arc::clone(route), route.matches(&encoded)?)))
            .min_by_key(|(route, _)| Reverse(route.segments))
    }

    fn resolve<R>(&self, context: &Context, request: &R) -> ResourceResult<Matched<R>>
    where
        R: Request + Clone,
    {
        let path = request.resource_path();
        let Some((route, variables)) = self.select(path) else {
            return Err(ResourceException::not_found(format!(
                "Resource '{}' not found",
                context.matched_path().concat(path)
            )));
        };

        let matched = path.head(route.segments);
        let remaining = path.tail(route.segments);
        tracing::trace!(
            operation = %request.request_type(),
            template = %route.template,
            matched = %matched,
            remaining = %remaining,
            "Route selected"
        );

        Ok(Matched {
            handler: Arc::clone(&route.handler),
            context: context.with_router(matched, remaining.clone(), variables),
            request: request.clone().with_resource_path(remaining),
        })
    }
}

fn observed<T>(request: &dyn Request, result: ResourceResult<T>) -> ResourceResult<T> {
    result.inspect_err(|err| err.record(request.request_type(), request.resource_path()))
}

impl Default for UriRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UriRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UriRouter")
            .field("routes", &self.routes.load().len())
            .finish()
    }
}

impl Describable for UriRouter {
    fn api(&self, context: &Context) -> ApiDescription {
        self.routes
            .load()
            .iter()
            .fold(ApiDescription::new(), |description, route| {
                match route.handler.describable() {
                    Some(child) => description.with_path(route.template.clone(), child.api(context)),
                    None => description,
                }
            })
    }
}

#[async_trait]
impl RequestHandler for UriRouter {
    async fn handle_action(
        &self,
        context: &Context,
        request: &ActionRequest,
    ) -> ResourceResult<ActionResponse> {
        let result = match self.resolve(context, request) {
            Ok(m) => m.handler.handle_action(&m.context, &m.request).await,
            Err(err) => Err(err),
        };
        observed(request, result)
    }

    async fn handle_create(
        &self,
        context: &Context,
        request: &CreateRequest,
    ) -> ResourceResult<ResourceResponse> {
        let result = match self.resolve(context, request) {
            Ok(m) => m.handler.handle_create(&m.context, &m.request).await,
            Err(err) => Err(err),
        };
        observed(request, result)
    }

    async fn handle_delete(
        &self,
        context: &Context,
        request: &DeleteRequest,
    ) -> ResourceResult<ResourceResponse> {
        let result = match self.resolve(context, request) {
            Ok(m) => m.handler.handle_delete(&m.context, &m.request).await,
            Err(err) => Err(err),
        };
        observed(request, result)
    }

    async fn handle_patch(
        &self,
        context: &Context,
        request: &PatchRequest,
    ) -> ResourceResult<ResourceResponse> {
        let result = match self.resolve(context, request) {
            Ok(m) => m.handler.handle_patch(&m.context, &m.request).await,
            Err(err) => Err(err),
        };
        observed(request, result)
    }

    async fn handle_query(
        &self,
        context: &Context,
        request: &QueryRequest,
        handler: &mut (dyn QueryResourceHandler + Send),
    ) -> ResourceResult<QueryResponse> {
        let result = match request
            .validate()
            .and_then(|()| self.resolve(context, request))
        {
            Ok(m) => m.handler.handle_query(&m.context, &m.request, handler).await,
            Err(err) => Err(err),
        };
        observed(request, result)
    }

    async fn handle_read(
        &self,
        context: &Context,
        request: &ReadRequest,
    ) -> ResourceResult<ResourceResponse> {
        let result = match self.resolve(context, request) {
            Ok(m) => m.handler.handle_read(&m.context, &m.request).await,
            Err(err) => Err(err),
        };
        observed(request, result)
    }

    async fn handle_update(
        &self,
        context: &Context,
        request: &UpdateRequest,
    ) -> ResourceResult<ResourceResponse> {
        let result = match self.resolve(context, request) {
            Ok(m) => m.handler.handle_update(&m.context, &m.request).await,
            Err(err) => Err(err),
        };
        observed(request, result)
    }

    fn describable(&self) -> Option<&dyn Describable> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::collect_query;
    use crate::protocol::RequestType;
    use crate::provider::MemoryBackend;
    use crate::testing::{EchoHandler, Log};
    use serde_json::json;

    fn echo(name: &str, log: &Log) -> Arc<dyn RequestHandler> {
        Arc::new(EchoHandler::new(name, log))
    }

    #[tokio::test]
    async fn test_strips_matched_prefix() {
        let log = Log::default();
        let router = UriRouter::new();
        router
            .add_route(RoutingMode::StartsWith, "users", echo("users", &log))
            .unwrap();

        let response = router
            .handle_read(&Context::root(), &ReadRequest::new("users/42").unwrap())
            .await
            .unwrap();
        assert_eq!(response.content()["path"], "42");
        assert_eq!(log.entries(), ["users:read:42"]);
    }

    #[tokio::test]
    async fn test_equals_requires_full_match() {
        let log = Log::default();
        let router = UriRouter::new();
        router
            .add_route(RoutingMode::Equals, "config", echo("config", &log))
            .unwrap();

        let ctx = Context::root();
        assert!(router
            .handle_read(&ctx, &ReadRequest::new("config").unwrap())
            .await
            .is_ok());
        let err = router
            .handle_read(&ctx, &ReadRequest::new("config/x").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 404);
        assert_eq!(err.message(), "Resource 'config/x' not found");
    }

    #[tokio::test]
    async fn test_segment_boundaries() {
        let log = Log::default();
        let router = UriRouter::new();
        router
            .add_route(RoutingMode::StartsWith, "user", echo("user", &log))
            .unwrap();

        let err = router
            .handle_read(&Context::root(), &ReadRequest::new("users/1").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 404);
    }

    #[tokio::test]
    async fn test_longest_template_wins() {
        let log = Log::default();
        let router = UriRouter::new();
        router
            .add_route(RoutingMode::StartsWith, "users", echo("users", &log))
            .unwrap();
        router
            .add_route(RoutingMode::StartsWith, "users/{id}/devices", echo("devices", &log))
            .unwrap();
        router
            .add_route(RoutingMode::StartsWith, "users/{uid}/devices", echo("shadowed", &log))
            .unwrap();

        let ctx = Context::root();
        router
            .handle_read(&ctx, &ReadRequest::new("users/7/devices/d1").unwrap())
            .await
            .unwrap();
        router
            .handle_read(&ctx, &ReadRequest::new("users/7").unwrap())
            .await
            .unwrap();
        assert_eq!(log.entries(), ["devices:read:d1", "users:read:7"]);
    }

    #[tokio::test]
    async fn test_router_context_carries_variables() {
        struct Inspect;

        #[async_trait]
        impl crate::filter::Filter for Inspect {
            async fn filter_read(
                &self,
                context: &Context,
                request: &ReadRequest,
                next: &dyn RequestHandler,
            ) -> ResourceResult<ResourceResponse> {
                assert_eq!(context.variable("id"), Some("a b"));
                let router = context.router().unwrap();
                assert_eq!(router.matched_path().to_string(), "users/a%20b/devices");
                assert_eq!(router.remaining_path().to_string(), "d1");
                assert_eq!(context.matched_path().to_string(), "users/a%20b/devices");
                next.handle_read(context, request).await
            }
        }

        let log = Log::default();
        let chain = crate::filter::FilterChain::new(echo("devices", &log), vec![Arc::new(Inspect)]);
        let router = UriRouter::new();
        router
            .add_route(RoutingMode::StartsWith, "users/{id}/devices", Arc::new(chain))
            .unwrap();

        router
            .handle_read(&Context::root(), &ReadRequest::new("users/a%20b/devices/d1").unwrap())
            .await
            .unwrap();
        assert_eq!(log.count("devices:read:d1"), 1);
    }

    #[tokio::test]
    async fn test_nested_routers_accumulate_matched_path() {
        let users = Arc::new(MemoryBackend::new());
        let inner = UriRouter::new();
        inner.add_collection("users", users).unwrap();
        let outer = UriRouter::new();
        outer
            .add_route(RoutingMode::StartsWith, "realms/{realm}", Arc::new(inner))
            .unwrap();

        let err = outer
            .handle_read(&Context::root(), &ReadRequest::new("realms/root/users").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 400);
        assert_eq!(
            err.message(),
            "The resource collection realms/root/users cannot be read"
        );
    }

    #[tokio::test]
    async fn test_query_validated_before_routing() {
        let log = Log::default();
        let router = UriRouter::new();
        router
            .add_route(RoutingMode::StartsWith, "users", echo("users", &log))
            .unwrap();

        let bad = QueryRequest::new("users")
            .unwrap()
            .with_paged_results_offset(1)
            .with_paged_results_cookie("abc");
        let err = collect_query(&router, &Context::root(), &bad).await.unwrap_err();
        assert_eq!(err.code(), 400);
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_singleton_and_collection_routes() {
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

        let router = UriRouter::new();
        router.add_singleton("settings", Arc::new(Settings)).unwrap();
        router
            .add_collection("users", Arc::new(MemoryBackend::new()))
            .unwrap();
        let ctx = Context::root();

        let settings = router
            .handle_read(&ctx, &ReadRequest::new("settings").unwrap())
            .await
            .unwrap();
        assert_eq!(settings.content()["theme"], "dark");

        router
            .handle_create(
                &ctx,
                &CreateRequest::new("users", json!({"name": "ada"}))
                    .unwrap()
                    .with_new_resource_id("ada"),
            )
            .await
            .unwrap();
        let (users, _) = collect_query(&router, &ctx, &QueryRequest::new("users").unwrap())
            .await
            .unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id(), Some("ada"));
    }

    #[tokio::test]
    async fn test_remove_route() {
        let log = Log::default();
        let router = UriRouter::new();
        let route = router
            .add_route(RoutingMode::StartsWith, "users", echo("users", &log))
            .unwrap();
        assert!(router.remove_route(&route));
        assert!(!router.remove_route(&route));
        assert!(router.routes().is_empty());

        let err = router
            .handle_read(&Context::root(), &ReadRequest::new("users/1").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 404);
    }

    #[test]
    fn test_invalid_templates() {
        let log = Log::default();
        let router = UriRouter::new();
        for template in ["a//b", "users/{id", "users/{id}/{id}", "users/{1x}"] {
            let err = router
                .add_route(RoutingMode::Equals, template, echo("x", &log))
                .unwrap_err();
            assert!(matches!(err, Error::InvalidRoute { .. }), "{template}");
        }
    }

    #[test]
    fn test_describes_children() {
        let users = CollectionAdapter::new(Arc::new(MemoryBackend::new())).with_description(
            ApiDescription::new()
                .with_title("Users")
                .with_operations([RequestType::Read, RequestType::Query]),
        );
        let router = UriRouter::new();
        router
            .add_route(RoutingMode::StartsWith, "users", Arc::new(users))
            .unwrap();
        router
            .add_route(RoutingMode::Equals, "health", echo("health", &Log::default()))
            .unwrap();

        let api = router.api(&Context::root());
        assert_eq!(api.paths().len(), 1);
        assert_eq!(api.paths()["users"].title(), Some("Users"));
    }
}
