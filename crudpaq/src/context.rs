//! Request context chain
//!
//! A [`Context`] is an immutable, cheaply cloneable chain of layers. Each
//! stage of the pipeline that needs to tell later stages something (the
//! router's matched path, the resolved API version, advice to return to the
//! client) pushes a new layer on top of the one it received and forwards the
//! child. Lookups walk from the innermost layer outwards.
//!
//! # Example
//!
//! ```rust
//! use crudpaq::context::Context;
//! use crudpaq::protocol::{ResourcePath, Version};
//! use std::collections::BTreeMap;
//!
//! let root = Context::root();
//! let ctx = root
//!     .with_accept_api_version(Version::new(2, 0), Some(Version::new(1, 0)))
//!     .with_router(
//!         ResourcePath::parse("users").unwrap(),
//!         ResourcePath::parse("42").unwrap(),
//!         BTreeMap::new(),
//!     );
//!
//! assert_eq!(ctx.router().unwrap().remaining_path().to_string(), "42");
//! assert_eq!(
//!     ctx.accept_api_version().unwrap().resource_version(),
//!     Some(Version::new(1, 0))
//! );
//! assert_eq!(ctx.root_id(), root.id());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::protocol::{ResourcePath, Version};
use crate::versioning::DefaultVersionBehaviour;

/// Outermost layer, created once per request
#[derive(Debug, Clone)]
pub struct RootContext {
    created: DateTime<Utc>,
}

impl RootContext {
    /// When the request entered the system
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

/// Pushed by a router after matching a route
#[derive(Debug, Clone)]
pub struct RouterContext {
    matched_path: ResourcePath,
    remaining_path: ResourcePath,
    variables: BTreeMap<String, String>,
}

impl RouterContext {
    /// Portion of the path consumed by the route
    pub fn matched_path(&self) -> &ResourcePath {
        &self.matched_path
    }

    /// Portion forwarded to the route's handler
    pub fn remaining_path(&self) -> &ResourcePath {
        &self.remaining_path
    }

    /// Values bound to `{name}` segments of the route template
    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }
}

/// Versions the client asked for
#[derive(Debug, Clone)]
pub struct AcceptApiVersionContext {
    protocol_version: Version,
    resource_version: Option<Version>,
}

impl AcceptApiVersionContext {
    /// Protocol version in use
    pub fn protocol_version(&self) -> Version {
        self.protocol_version
    }

    /// Resource version requested, if any
    pub fn resource_version(&self) -> Option<Version> {
        self.resource_version
    }
}

/// Out-of-band response metadata
///
/// Values are kept per name in insertion order. Adding a value that is
/// already present under the same name does nothing.
#[derive(Debug, Default)]
pub struct AdviceContext {
    advice: Mutex<BTreeMap<String, Vec<String>>>,
}

impl AdviceContext {
    /// Attach a value; returns `false` if it was already attached
    pub fn put_advice(&self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let value = value.into();
        let mut advice = self.advice.lock().unwrap_or_else(PoisonError::into_inner);
        let values = advice.entry(name.into()).or_default();
        if values.contains(&value) {
            return false;
        }
        values.push(value);
        true
    }

    /// Values attached under `name`
    pub fn advice_values(&self, name: &str) -> Vec<String> {
        self.advice
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Everything attached so far
    pub fn advice(&self) -> BTreeMap<String, Vec<String>> {
        self.advice
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Per-request state of API version routing
#[derive(Debug)]
pub struct VersionRoutingContext {
    default_behaviour: DefaultVersionBehaviour,
    warning_enabled: bool,
    resource_version: Mutex<Option<Version>>,
}

impl VersionRoutingContext {
    /// What to do when the client named no version
    pub fn default_behaviour(&self) -> DefaultVersionBehaviour {
        self.default_behaviour
    }

    /// Whether a missing version produces a warning
    pub fn is_warning_enabled(&self) -> bool {
        self.warning_enabled
    }

    /// Version of the handler that was selected
    pub fn resource_version(&self) -> Option<Version> {
        *self
            .resource_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the selected handler's version
    pub fn set_resource_version(&self, version: Version) {
        *self
            .resource_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(version);
    }
}

/// Free-form attributes
#[derive(Debug, Clone, Default)]
pub struct AttributesContext {
    attributes: BTreeMap<String, Value>,
}

impl AttributesContext {
    /// Attribute by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// All attributes of this layer
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }
}

/// One layer of a [`Context`]
#[derive(Debug)]
pub enum Layer {
    /// Request root
    Root(RootContext),
    /// Route match
    Router(RouterContext),
    /// Requested versions
    AcceptApiVersion(AcceptApiVersionContext),
    /// Response advice
    Advice(AdviceContext),
    /// Version routing state
    VersionRouting(VersionRoutingContext),
    /// Attributes
    Attributes(AttributesContext),
}

impl Layer {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Root(_) => "root",
            Self::Router(_) => "router",
            Self::AcceptApiVersion(_) => "accept-api-version",
            Self::Advice(_) => "advice",
            Self::VersionRouting(_) => "version-routing",
            Self::Attributes(_) => "attributes",
        }
    }
}

struct Node {
    id: String,
    layer: Layer,
    parent: Option<Context>,
}

/// Immutable chain of context layers
#[derive(Clone)]
pub struct Context(Arc<Node>);

impl Context {
    /// Start a new request
    pub fn root() -> Self {
        Self::with_id(Uuid::now_v7().to_string())
    }

    /// Start a new request with a caller-chosen id
    pub fn with_id(id: impl Into<String>) -> Self {
        Self(Arc::new(Node {
            id: id.into(),
            layer: Layer::Root(RootContext {
                created: Utc::now(),
            }),
            parent: None,
        }))
    }

    fn push(&self, layer: Layer) -> Self {
        Self(Arc::new(Node {
            id: Uuid::now_v7().to_string(),
            layer,
            parent: Some(self.clone()),
        }))
    }

    /// Child carrying a route match
    pub fn with_router(
        &self,
        matched_path: ResourcePath,
        remaining_path: ResourcePath,
        variables: BTreeMap<String, String>,
    ) -> Self {
        self.push(Layer::Router(RouterContext {
            matched_path,
            remaining_path,
            variables,
        }))
    }

    /// Child carrying the requested versions
    pub fn with_accept_api_version(
        &self,
        protocol_version: Version,
        resource_version: Option<Version>,
    ) -> Self {
        self.push(Layer::AcceptApiVersion(AcceptApiVersionContext {
            protocol_version,
            resource_version,
        }))
    }

    /// Child collecting response advice
    pub fn with_advice(&self) -> Self {
        self.push(Layer::Advice(AdviceContext::default()))
    }

    /// Child carrying version routing state
    pub fn with_version_routing(
        &self,
        default_behaviour: DefaultVersionBehaviour,
        warning_enabled: bool,
    ) -> Self {
        self.push(Layer::VersionRouting(VersionRoutingContext {
            default_behaviour,
            warning_enabled,
            resource_version: Mutex::new(None),
        }))
    }

    /// Child carrying attributes
    pub fn with_attributes(&self, attributes: BTreeMap<String, Value>) -> Self {
        self.push(Layer::Attributes(AttributesContext { attributes }))
    }

    /// Id of this layer
    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Id of the request root
    pub fn root_id(&self) -> &str {
        let mut current = self;
        while let Some(parent) = &current.0.parent {
            current = parent;
        }
        current.id()
    }

    /// This layer
    pub fn layer(&self) -> &Layer {
        &self.0.layer
    }

    /// Enclosing context
    pub fn parent(&self) -> Option<&Context> {
        self.0.parent.as_ref()
    }

    /// Layers from innermost to root
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        std::iter::successors(Some(self), |ctx| ctx.parent()).map(Context::layer)
    }

    fn find<'a, T>(&'a self, select: impl Fn(&'a Layer) -> Option<&'a T>) -> Option<&'a T> {
        self.layers().find_map(select)
    }

    /// Request root
    pub fn root_context(&self) -> Option<&RootContext> {
        self.find(|layer| match layer {
            Layer::Root(root) => Some(root),
            _ => None,
        })
    }

    /// Innermost route match
    pub fn router(&self) -> Option<&RouterContext> {
        self.find(|layer| match layer {
            Layer::Router(router) => Some(router),
            _ => None,
        })
    }

    /// Requested versions
    pub fn accept_api_version(&self) -> Option<&AcceptApiVersionContext> {
        self.find(|layer| match layer {
            Layer::AcceptApiVersion(accept) => Some(accept),
            _ => None,
        })
    }

    /// Advice collector
    pub fn advice(&self) -> Option<&AdviceContext> {
        self.find(|layer| match layer {
            Layer::Advice(advice) => Some(advice),
            _ => None,
        })
    }

    /// Version routing state
    pub fn version_routing(&self) -> Option<&VersionRoutingContext> {
        self.find(|layer| match layer {
            Layer::VersionRouting(routing) => Some(routing),
            _ => None,
        })
    }

    /// Innermost value of attribute `name`
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.layers().find_map(|layer| match layer {
            Layer::Attributes(attributes) => attributes.get(name),
            _ => None,
        })
    }

    /// Template variable bound by any enclosing router
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.layers().find_map(|layer| match layer {
            Layer::Router(router) => router.variables.get(name).map(String::as_str),
            _ => None,
        })
    }

    /// Every path matched by enclosing routers, outermost first
    pub fn matched_path(&self) -> ResourcePath {
        let mut matched: Vec<&ResourcePath> = self
            .layers()
            .filter_map(|layer| match layer {
                Layer::Router(router) => Some(&router.matched_path),
                _ => None,
            })
            .collect();
        matched.reverse();
        matched
            .into_iter()
            .fold(ResourcePath::root(), |acc, path| acc.concat(path))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.0.id)
            .field("layer", &self.0.layer.name())
            .field("parent", &self.0.parent)
            .finish()
    }
}
