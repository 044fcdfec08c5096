//! Resource API version routing
//!
//! Clients may ask for a resource API version either on the request itself
//! or through an accept-api-version context. [`VersionRouter`] picks the
//! handler registered for the best matching version, and
//! [`ApiVersionRoutingFilter`] stamps the selected version on every
//! response and error.
//!
//! ## Advice
//!
//! Routing attaches out-of-band advice to the request's advice context:
//!
//! - `Content-API-Version: protocol=2.0,resource=1.5`
//! - `Warning: 100 CREST "Accept-API-Version should be included in the request."`
//!   when the client named no version and warnings are enabled
//! - `Deprecation`, `Sunset`, `Link` and a `299` `Warning` for deprecated versions
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use crudpaq::context::Context;
//! use crudpaq::filter::FilterChain;
//! use crudpaq::handler::RequestHandler;
//! use crudpaq::protocol::{ReadRequest, Request, Version};
//! use crudpaq::provider::{CollectionAdapter, MemoryBackend};
//! use crudpaq::versioning::{ApiVersionRoutingFilter, DefaultVersionBehaviour, VersionRouter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let versions = VersionRouter::new();
//! versions.add_version(Version::new(1, 0), Arc::new(CollectionAdapter::new(Arc::new(MemoryBackend::new()))));
//! versions.add_version(Version::new(1, 5), Arc::new(CollectionAdapter::new(Arc::new(MemoryBackend::new()))));
//!
//! let chain = FilterChain::new(
//!     Arc::new(versions),
//!     vec![Arc::new(ApiVersionRoutingFilter::new(DefaultVersionBehaviour::Latest))],
//! );
//!
//! let request = ReadRequest::new("missing").unwrap().with_resource_version(Version::new(1, 0));
//! let err = chain.handle_read(&Context::root(), &request).await.unwrap_err();
//! assert_eq!(err.code(), 404);
//! assert_eq!(err.resource_api_version(), Some(Version::new(1, 5)));
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Config, VersioningConfig};
use crate::context::Context;
use crate::error::{ResourceException, ResourceResult};
use crate::filter::Filter;
use crate::handler::{ApiDescription, Describable, QueryResourceHandler, RequestHandler};
use crate::protocol::{
    ActionRequest, ActionResponse, CreateRequest, DeleteRequest, PatchRequest, QueryRequest,
    QueryResponse, ReadRequest, Request, ResourceResponse, Response, UpdateRequest, Version,
};

/// Advice name carrying the selected versions
pub const CONTENT_API_VERSION: &str = "Content-API-Version";
/// Advice name for warnings
pub const WARNING: &str = "Warning";
/// Advice name for deprecation notices
pub const DEPRECATION: &str = "Deprecation";
/// Advice name for sunset dates
pub const SUNSET: &str = "Sunset";
/// Advice name for successor links
pub const LINK: &str = "Link";

/// Which handler serves a request that names no version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultVersionBehaviour {
    /// The highest registered version
    #[default]
    Latest,
    /// The lowest registered version
    Oldest,
    /// Reject the request
    None,
}

impl fmt::Display for DefaultVersionBehaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Oldest => write!(f, "oldest"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Policy choosing a registered version for a requested one
pub trait VersionSelector: Send + Sync {
    /// Pick from `available` (ascending, non-empty) the version that serves
    /// `requested`, if any
    fn select(&self, requested: Version, available: &[Version]) -> Option<Version>;
}

/// Highest registered minor version within the requested major
///
/// With routes `1.0`, `1.5` and `2.1`, a request for `1.1` is served by
/// `1.5` while `1.9` and `3.0` match nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighestCompatibleMinor;

impl VersionSelector for HighestCompatibleMinor {
    fn select(&self, requested: Version, available: &[Version]) -> Option<Version> {
        available
            .iter()
            .rev()
            .find(|version| version.is_compatible_with(&requested))
            .copied()
    }
}

/// Deprecation notice for a registered version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprecationInfo {
    /// The deprecated version
    pub version: Version,
    /// The recommended replacement version
    pub replacement: Version,
    /// Sunset date in RFC 3339 format (when the version will be removed)
    pub sunset_date: Option<String>,
    /// Optional deprecation message
    pub message: Option<String>,
}

impl DeprecationInfo {
    /// Create a new deprecation info
    pub fn new(version: Version, replacement: Version) -> Self {
        Self {
            version,
            replacement,
            sunset_date: None,
            message: None,
        }
    }

    /// Set the sunset date (RFC 3339 format)
    pub fn with_sunset_date(mut self, date: impl Into<String>) -> Self {
        self.sunset_date = Some(date.into());
        self
    }

    /// Set a custom deprecation message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn apply(&self, context: &Context) {
        let Some(advice) = context.advice() else {
            return;
        };
        advice.put_advice(DEPRECATION, format!("version=\"{}\"", self.version));
        if let Some(sunset) = &self.sunset_date {
            advice.put_advice(SUNSET, sunset.clone());
        }
        advice.put_advice(
            LINK,
            format!(
                "</{}>; rel=\"successor-version\"; version=\"{}\"",
                context.matched_path(),
                self.replacement
            ),
        );
        let mut warning = format!(
            "299 - \"Resource API version {} is deprecated. Please migrate to version {}.",
            self.version, self.replacement
        );
        if let Some(message) = &self.message {
            warning.push(' ');
            warning.push_str(message);
        }
        warning.push('"');
        advice.put_advice(WARNING, warning);
    }
}

#[derive(Clone)]
struct VersionRoute {
    handler: Arc<dyn RequestHandler>,
    deprecation: Option<DeprecationInfo>,
}

/// Version requested for `request`, from the request or the accept context
fn requested_version(context: &Context, request: &dyn Request) -> Option<Version> {
    request.resource_version().or_else(|| {
        context
            .accept_api_version()
            .and_then(|accept| accept.resource_version())
    })
}

/// Routes requests to handlers by resource API version
///
/// Versions may be added and removed while requests are being served.
pub struct VersionRouter {
    routes: ArcSwap<BTreeMap<Version, VersionRoute>>,
    selector: Arc<dyn VersionSelector>,
    default_behaviour: DefaultVersionBehaviour,
    protocol_version: Version,
}

impl VersionRouter {
    /// Router with no versions, defaulting to the latest one
    pub fn new() -> Self {
        Self::with_config(&VersioningConfig::default())
    }

    /// Router using the configured default behaviour and protocol version
    pub fn from_config(config: &Config) -> Self {
        Self::with_config(&config.versioning)
    }

    fn with_config(config: &VersioningConfig) -> Self {
        Self {
            routes: ArcSwap::from_pointee(BTreeMap::new()),
            selector: Arc::new(HighestCompatibleMinor),
            default_behaviour: config.default_behaviour,
            protocol_version: config.protocol_version,
        }
    }

    /// Use `selector` to match requested versions
    #[must_use]
    pub fn with_selector(mut self, selector: Arc<dyn VersionSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Behaviour when no version is requested and no routing context says otherwise
    #[must_use]
    pub fn with_default_behaviour(mut self, behaviour: DefaultVersionBehaviour) -> Self {
        self.default_behaviour = behaviour;
        self
    }

    /// Register `handler` for `version`, replacing any previous one
    pub fn add_version(&self, version: Version, handler: Arc<dyn RequestHandler>) {
        self.insert(version, VersionRoute {
            handler,
            deprecation: None,
        });
    }

    /// Register a deprecated `handler` for `deprecation.version`
    pub fn add_deprecated_version(
        &self,
        handler: Arc<dyn RequestHandler>,
        deprecation: DeprecationInfo,
    ) {
        self.insert(deprecation.version, VersionRoute {
            handler,
            deprecation: Some(deprecation),
        });
    }

    fn insert(&self, version: Version, route: VersionRoute) {
        self.routes.rcu(|routes| {
            let mut routes = BTreeMap::clone(routes);
            routes.insert(version, route.clone());
            routes
        });
        tracing::debug!(version = %version, "Version route added");
    }

    /// Remove the handler for `version`; returns whether one was registered
    pub fn remove_version(&self, version: Version) -> bool {
        let mut removed = false;
        self.routes.rcu(|routes| {
            let mut routes = BTreeMap::clone(routes);
            removed = routes.remove(&version).is_some();
            routes
        });
        removed
    }

    /// Registered versions, ascending
    pub fn versions(&self) -> Vec<Version> {
        self.routes.load().keys().copied().collect()
    }

    fn select(&self, context: &Context, request: &dyn Request) -> ResourceResult<VersionRoute> {
        let routes = self.routes.load();
        let available: Vec<Version> = routes.keys().copied().collect();
        let path = context.matched_path().concat(request.resource_path());

        let selected = match requested_version(context, request) {
            Some(requested) => self
                .selector
                .select(requested, &available)
                .ok_or_else(|| {
                    ResourceException::not_found(format!(
                        "Version {requested} of resource '{path}' not found"
                    ))
                })?,
            None => {
                let behaviour = context
                    .version_routing()
                    .map_or(self.default_behaviour, |routing| routing.default_behaviour());
                let chosen = match behaviour {
                    DefaultVersionBehaviour::Latest => available.last(),
                    DefaultVersionBehaviour::Oldest => available.first(),
                    DefaultVersionBehaviour::None => {
                        return Err(ResourceException::bad_request(format!(
                            "No resource version requested for '{path}'"
                        )))
                    }
                };
                *chosen.ok_or_else(|| {
                    ResourceException::not_found(format!("Resource '{path}' not found"))
                })?
            }
        };

        let Some(route) = routes.get(&selected) else {
            return Err(ResourceException::not_found(format!(
                "Version {selected} of resource '{path}' not found"
            )));
        };
        tracing::trace!(version = %selected, path = %path, "Version selected");

        if let Some(routing) = context.version_routing() {
            routing.set_resource_version(selected);
        }
        if let Some(advice) = context.advice() {
            let protocol = context
                .accept_api_version()
                .map_or(self.protocol_version, |accept| accept.protocol_version());
            advice.put_advice(
                CONTENT_API_VERSION,
                format!("protocol={protocol},resource={selected}"),
            );
        }
        if let Some(deprecation) = &route.deprecation {
            deprecation.apply(context);
        }
        Ok(route.clone())
    }
}

impl Default for VersionRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VersionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionRouter")
            .field("versions", &self.versions())
            .field("default_behaviour", &self.default_behaviour)
            .finish_non_exhaustive()
    }
}

impl Describable for VersionRouter {
    fn api(&self, context: &Context) -> ApiDescription {
        self.routes
            .load()
            .iter()
            .fold(ApiDescription::new(), |description, (version, route)| {
                match route.handler.describable() {
                    Some(child) => description
                        .with_path(version.to_string(), child.api(context).with_version(*version)),
                    None => description,
                }
            })
    }
}

#[async_trait]
impl RequestHandler for VersionRouter {
    async fn handle_action(
        &self,
        context: &Context,
        request: &ActionRequest,
    ) -> ResourceResult<ActionResponse> {
        let route = self.select(context, request)?;
        route.handler.handle_action(context, request).await
    }

    async fn handle_create(
        &self,
        context: &Context,
        request: &CreateRequest,
    ) -> ResourceResult<ResourceResponse> {
        let route = self.select(context, request)?;
        route.handler.handle_create(context, request).await
    }

    async fn handle_delete(
        &self,
        context: &Context,
        request: &DeleteRequest,
    ) -> ResourceResult<ResourceResponse> {
        let route = self.select(context, request)?;
        route.handler.handle_delete(context, request).await
    }

    async fn handle_patch(
        &self,
        context: &Context,
        request: &PatchRequest,
    ) -> ResourceResult<ResourceResponse> {
        let route = self.select(context, request)?;
        route.handler.handle_patch(context, request).await
    }

    async fn handle_query(
        &self,
        context: &Context,
        request: &QueryRequest,
        handler: &mut (dyn QueryResourceHandler + Send),
    ) -> ResourceResult<QueryResponse> {
        let route = self.select(context, request)?;
        route.handler.handle_query(context, request, handler).await
    }

    async fn handle_read(
        &self,
        context: &Context,
        request: &ReadRequest,
    ) -> ResourceResult<ResourceResponse> {
        let route = self.select(context, request)?;
        route.handler.handle_read(context, request).await
    }

    async fn handle_update(
        &self,
        context: &Context,
        request: &UpdateRequest,
    ) -> ResourceResult<ResourceResponse> {
        let route = self.select(context, request)?;
        route.handler.handle_update(context, request).await
    }

    fn describable(&self) -> Option<&dyn Describable> {
        Some(self)
    }
}

/// Stamps the selected resource API version on responses and errors
///
/// Installs a version routing context and an advice context before
/// forwarding, unless the request already carries them. Whatever the outcome, the version
/// recorded in that context during routing is copied onto the result.
#[derive(Debug, Clone)]
pub struct ApiVersionRoutingFilter {
    default_behaviour: DefaultVersionBehaviour,
    warning_enabled: bool,
    agent_name: String,
}

impl ApiVersionRoutingFilter {
    /// Filter applying `default_behaviour`, with warnings enabled
    pub fn new(default_behaviour: DefaultVersionBehaviour) -> Self {
        let defaults = VersioningConfig::default();
        Self {
            default_behaviour,
            warning_enabled: defaults.warning_enabled,
            agent_name: defaults.agent_name,
        }
    }

    /// Filter using the configured behaviour, warning flag and agent name
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_behaviour: config.versioning.default_behaviour,
            warning_enabled: config.versioning.warning_enabled,
            agent_name: config.versioning.agent_name.clone(),
        }
    }

    /// Enable or disable the missing-version warning
    #[must_use]
    pub fn with_warning(mut self, enabled: bool) -> Self {
        self.warning_enabled = enabled;
        self
    }

    /// Agent name used in warning advice
    #[must_use]
    pub fn with_agent_name(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = agent_name.into();
        self
    }

    /// Warning attached when the client names no version
    pub fn missing_version_warning(&self) -> String {
        format!(
            "100 {} \"Accept-API-Version should be included in the request.\"",
            self.agent_name
        )
    }

    fn prepare(&self, context: &Context, request: &dyn Request) -> Context {
        let context = if context.advice().is_some() {
            context.clone()
        } else {
            context.with_advice()
        };
        let context = if context.version_routing().is_some() {
            context
        } else {
            context.with_version_routing(self.default_behaviour, self.warning_enabled)
        };

        if self.warning_enabled && requested_version(&context, request).is_none() {
            if let Some(advice) = context.advice() {
                advice.put_advice(WARNING, self.missing_version_warning());
            }
        }
        context
    }
}

fn stamped<T: Response>(context: &Context, result: ResourceResult<T>) -> ResourceResult<T> {
    let version = context
        .version_routing()
        .and_then(|routing| routing.resource_version());
    match result {
        Ok(mut response) => {
            response.set_resource_api_version(version);
            Ok(response)
        }
        Err(mut err) => {
            err.set_resource_api_version(version);
            Err(err)
        }
    }
}

#[async_trait]
impl Filter for ApiVersionRoutingFilter {
    async fn filter_action(
        &self,
        context: &Context,
        request: &ActionRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ActionResponse> {
        let context = self.prepare(context, request);
        stamped(&context, next.handle_action(&context, request).await)
    }

    async fn filter_create(
        &self,
        context: &Context,
        request: &CreateRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        let context = self.prepare(context, request);
        stamped(&context, next.handle_create(&context, request).await)
    }

    async fn filter_delete(
        &self,
        context: &Context,
        request: &DeleteRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        let context = self.prepare(context, request);
        stamped(&context, next.handle_delete(&context, request).await)
    }

    async fn filter_patch(
        &self,
        context: &Context,
        request: &PatchRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        let context = self.prepare(context, request);
        stamped(&context, next.handle_patch(&context, request).await)
    }

    async fn filter_query(
        &self,
        context: &Context,
        request: &QueryRequest,
        handler: &mut (dyn QueryResourceHandler + Send),
        next: &dyn RequestHandler,
    ) -> ResourceResult<QueryResponse> {
        let context = self.prepare(context, request);
        stamped(&context, next.handle_query(&context, request, handler).await)
    }

    async fn filter_read(
        &self,
        context: &Context,
        request: &ReadRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        let context = self.prepare(context, request);
        stamped(&context, next.handle_read(&context, request).await)
    }

    async fn filter_update(
        &self,
        context: &Context,
        request: &UpdateRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        let context = self.prepare(context, request);
        stamped(&context, next.handle_update(&context, request).await)
    }
}
