//! Request interceptors
//!
//! A [`Filter`] sits in front of a [`RequestHandler`] and sees every
//! operation before it is forwarded. Each `filter_*` method receives the
//! continuation as `next`; the default implementations forward unchanged, so
//! a filter overrides only the operations it intercepts. A filter may:
//!
//! - forward once (the usual case),
//! - forward several times, e.g. to fan a request out into sub-requests,
//! - resolve the operation itself without forwarding.
//!
//! [`FilterChain`] runs an ordered list of filters in front of a target.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use crudpaq::context::Context;
//! use crudpaq::error::{ResourceException, ResourceResult};
//! use crudpaq::filter::Filter;
//! use crudpaq::handler::RequestHandler;
//! use crudpaq::protocol::{DeleteRequest, ResourceResponse};
//!
//! /// Refuses every delete
//! struct ReadOnly;
//!
//! #[async_trait]
//! impl Filter for ReadOnly {
//!     async fn filter_delete(
//!         &self,
//!         _context: &Context,
//!         _request: &DeleteRequest,
//!         _next: &dyn RequestHandler,
//!     ) -> ResourceResult<ResourceResponse> {
//!         Err(ResourceException::forbidden("read-only"))
//!     }
//! }
//! ```

mod chain;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::context::Context;
use crate::error::{ResourceResult, Result};
use crate::handler::{QueryResourceHandler, RequestHandler};
use crate::protocol::{
    ActionRequest, ActionResponse, CreateRequest, DeleteRequest, PatchRequest, QueryRequest,
    QueryResponse, ReadRequest, Request, RequestType, ResourceResponse, UpdateRequest,
};

pub use chain::{Cursor, FilterChain};

/// Interceptor for the seven operations
#[async_trait]
pub trait Filter: Send + Sync {
    /// Intercept an action
    async fn filter_action(
        &self,
        context: &Context,
        request: &ActionRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ActionResponse> {
        next.handle_action(context, request).await
    }

    /// Intercept a create
    async fn filter_create(
        &self,
        context: &Context,
        request: &CreateRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        next.handle_create(context, request).await
    }

    /// Intercept a delete
    async fn filter_delete(
        &self,
        context: &Context,
        request: &DeleteRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        next.handle_delete(context, request).await
    }

    /// Intercept a patch
    async fn filter_patch(
        &self,
        context: &Context,
        request: &PatchRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        next.handle_patch(context, request).await
    }

    /// Intercept a query
    async fn filter_query(
        &self,
        context: &Context,
        request: &QueryRequest,
        handler: &mut (dyn QueryResourceHandler + Send),
        next: &dyn RequestHandler,
    ) -> ResourceResult<QueryResponse> {
        next.handle_query(context, request, handler).await
    }

    /// Intercept a read
    async fn filter_read(
        &self,
        context: &Context,
        request: &ReadRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        next.handle_read(context, request).await
    }

    /// Intercept an update
    async fn filter_update(
        &self,
        context: &Context,
        request: &UpdateRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        next.handle_update(context, request).await
    }
}

type Predicate = dyn Fn(&Context, &dyn Request) -> bool + Send + Sync;

/// Predicate deciding whether a [`ConditionalFilter`] applies
#[derive(Clone)]
pub struct FilterCondition {
    predicate: Arc<Predicate>,
}

impl FilterCondition {
    /// Condition from a closure
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Context, &dyn Request) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Matches every request
    pub fn always() -> Self {
        Self::new(|_, _| true)
    }

    /// Matches requests of the given kinds
    pub fn match_request_type(types: impl IntoIterator<Item = RequestType>) -> Self {
        let types: Vec<RequestType> = types.into_iter().collect();
        Self::new(move |_, request| types.contains(&request.request_type()))
    }

    /// Matches requests whose whole resource path matches `pattern`
    pub fn match_resource_path(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(Self::new(move |_, request| {
            regex.is_match(&request.resource_path().to_string())
        }))
    }

    /// Both conditions match
    #[must_use]
    pub fn and(self, other: FilterCondition) -> Self {
        Self::new(move |ctx, request| self.matches(ctx, request) && other.matches(ctx, request))
    }

    /// Either condition matches
    #[must_use]
    pub fn or(self, other: FilterCondition) -> Self {
        Self::new(move |ctx, request| self.matches(ctx, request) || other.matches(ctx, request))
    }

    /// Inverse of this condition
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::new(move |ctx, request| !self.matches(ctx, request))
    }

    /// Evaluate against a request
    pub fn matches(&self, context: &Context, request: &dyn Request) -> bool {
        (self.predicate)(context, request)
    }
}

impl fmt::Debug for FilterCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCondition").finish_non_exhaustive()
    }
}

/// Applies a filter only to requests matching a condition
///
/// Non-matching requests are forwarded unchanged.
pub struct ConditionalFilter {
    condition: FilterCondition,
    filter: Arc<dyn Filter>,
}

impl ConditionalFilter {
    /// Wrap `filter` behind `condition`
    pub fn new(condition: FilterCondition, filter: Arc<dyn Filter>) -> Self {
        Self { condition, filter }
    }
}

#[async_trait]
impl Filter for ConditionalFilter {
    async fn filter_action(
        &self,
        context: &Context,
        request: &ActionRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ActionResponse> {
        if self.condition.matches(context, request) {
            self.filter.filter_action(context, request, next).await
        } else {
            next.handle_action(context, request).await
        }
    }

    async fn filter_create(
        &self,
        context: &Context,
        request: &CreateRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        if self.condition.matches(context, request) {
            self.filter.filter_create(context, request, next).await
        } else {
            next.handle_create(context, request).await
        }
    }

    async fn filter_delete(
        &self,
        context: &Context,
        request: &DeleteRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        if self.condition.matches(context, request) {
            self.filter.filter_delete(context, request, next).await
        } else {
            next.handle_delete(context, request).await
        }
    }

    async fn filter_patch(
        &self,
        context: &Context,
        request: &PatchRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        if self.condition.matches(context, request) {
            self.filter.filter_patch(context, request, next).await
        } else {
            next.handle_patch(context, request).await
        }
    }

    async fn filter_query(
        &self,
        context: &Context,
        request: &QueryRequest,
        handler: &mut (dyn QueryResourceHandler + Send),
        next: &dyn RequestHandler,
    ) -> ResourceResult<QueryResponse> {
        if self.condition.matches(context, request) {
            self.filter.filter_query(context, request, handler, next).await
        } else {
            next.handle_query(context, request, handler).await
        }
    }

    async fn filter_read(
        &self,
        context: &Context,
        request: &ReadRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        if self.condition.matches(context, request) {
            self.filter.filter_read(context, request, next).await
        } else {
            next.handle_read(context, request).await
        }
    }

    async fn filter_update(
        &self,
        context: &Context,
        request: &UpdateRequest,
        next: &dyn RequestHandler,
    ) -> ResourceResult<ResourceResponse> {
        if self.condition.matches(context, request) {
            self.filter.filter_update(context, request, next).await
        } else {
            next.handle_update(context, request).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceException;
    use crate::testing::{EchoHandler, Log};

    struct Deny;

    #[async_trait]
    impl Filter for Deny {
        async fn filter_read(
            &self,
            _context: &Context,
            _request: &ReadRequest,
            _next: &dyn RequestHandler,
        ) -> ResourceResult<ResourceResponse> {
            Err(ResourceException::forbidden("denied"))
        }
    }

    #[test]
    fn test_condition_combinators() {
        let ctx = Context::root();
        let read = ReadRequest::new("users/1").unwrap();
        let query = QueryRequest::new("users").unwrap();

        let is_read = FilterCondition::match_request_type([RequestType::Read]);
        let under_users = FilterCondition::match_resource_path("users/.*").unwrap();

        assert!(is_read.matches(&ctx, &read));
        assert!(!is_read.matches(&ctx, &query));
        assert!(under_users.matches(&ctx, &read));
        // anchored: "users" alone does not match "users/.*"
        assert!(!under_users.matches(&ctx, &query));

        let both = is_read.clone().and(under_users.clone());
        assert!(both.matches(&ctx, &read));
        let either = is_read.clone().not().or(under_users);
        assert!(either.matches(&ctx, &query));
        assert!(FilterCondition::always().matches(&ctx, &query));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        assert!(FilterCondition::match_resource_path("users/(").is_err());
    }

    #[tokio::test]
    async fn test_conditional_filter_only_applies_on_match() {
        let log = Log::default();
        let target = Arc::new(EchoHandler::new("target", &log));
        let chain = FilterChain::new(
            target,
            vec![Arc::new(ConditionalFilter::new(
                FilterCondition::match_resource_path("admin/.*").unwrap(),
                Arc::new(Deny),
            ))],
        );
        let ctx = Context::root();

        let denied = chain
            .handle_read(&ctx, &ReadRequest::new("admin/settings").unwrap())
            .await
            .unwrap_err();
        assert_eq!(denied.code(), 403);

        let allowed = chain
            .handle_read(&ctx, &ReadRequest::new("users/1").unwrap())
            .await
            .unwrap();
        assert_eq!(allowed.id(), Some("users/1"));
        assert_eq!(log.entries(), ["target:read:users/1"]);
    }
}
