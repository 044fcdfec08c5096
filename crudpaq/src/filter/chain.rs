//! Filter chain and cursor
//!
//! The chain publishes its filters and target together as one immutable
//! snapshot through an [`ArcSwap`]. Each request loads the snapshot once
//! and walks it with a [`Cursor`], so mutating the chain never affects a
//! request already in flight.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use super::Filter;
use crate::context::Context;
use crate::error::ResourceResult;
use crate::handler::{ApiDescription, Describable, QueryResourceHandler, RequestHandler};
use crate::protocol::{
    ActionRequest, ActionResponse, CreateRequest, DeleteRequest, PatchRequest, QueryRequest,
    QueryResponse, ReadRequest, Request, RequestType, ResourcePath, ResourceResponse, UpdateRequest,
};

struct Snapshot {
    filters: Vec<Arc<dyn Filter>>,
    target: Arc<dyn RequestHandler>,
}

fn same_filter(a: &Arc<dyn Filter>, b: &Arc<dyn Filter>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Ordered filters in front of a target handler
///
/// All mutators take `&self` and may run while requests are being served.
pub struct FilterChain {
    state: ArcSwap<Snapshot>,
}

impl FilterChain {
    /// Chain with `filters` in front of `target`
    pub fn new(target: Arc<dyn RequestHandler>, filters: Vec<Arc<dyn Filter>>) -> Self {
        Self {
            state: ArcSwap::from_pointee(Snapshot { filters, target }),
        }
    }

    fn update(&self, mut change: impl FnMut(&mut Vec<Arc<dyn Filter>>)) {
        self.state.rcu(|current| {
            let mut filters = current.filters.clone();
            change(&mut filters);
            Snapshot {
                filters,
                target: Arc::clone(&current.target),
            }
        });
    }

    /// Append a filter
    pub fn add_filter(&self, filter: Arc<dyn Filter>) {
        self.update(|filters| filters.push(Arc::clone(&filter)));
    }

    /// Append several filters, keeping their order
    pub fn add_filters(&self, new_filters: Vec<Arc<dyn Filter>>) {
        self.update(|filters| filters.extend(new_filters.iter().cloned()));
    }

    /// Insert a filter at `index`, or at the end if `index` is past it
    pub fn insert_filter(&self, index: usize, filter: Arc<dyn Filter>) {
        self.update(|filters| {
            let index = index.min(filters.len());
            filters.insert(index, Arc::clone(&filter));
        });
    }

    /// Remove the first occurrence of `filter`; returns whether it was present
    pub fn remove_filter(&self, filter: &Arc<dyn Filter>) -> bool {
        let mut removed = false;
        self.update(|filters| {
            removed = false;
            if let Some(index) = filters.iter().position(|f| same_filter(f, filter)) {
                filters.remove(index);
                removed = true;
            }
        });
        removed
    }

    /// Remove the filter at `index`
    pub fn remove_filter_at(&self, index: usize) -> Option<Arc<dyn Filter>> {
        let mut removed = None;
        self.update(|filters| {
            removed = (index < filters.len()).then(|| filters.remove(index));
        });
        removed
    }

    /// Remove every filter
    pub fn clear_filters(&self) {
        self.update(|filters| filters.clear());
    }

    /// Replace the whole filter list
    pub fn set_filters(&self, new_filters: Vec<Arc<dyn Filter>>) {
        self.update(|filters| *filters = new_filters.clone());
    }

    /// Replace the target handler
    pub fn set_target(&self, target: Arc<dyn RequestHandler>) {
        self.state.rcu(|current| Snapshot {
            filters: current.filters.clone(),
            target: Arc::clone(&target),
        });
    }

    /// Current filters
    pub fn filters(&self) -> Vec<Arc<dyn Filter>> {
        self.state.load().filters.clone()
    }

    /// Current target
    pub fn target(&self) -> Arc<dyn RequestHandler> {
        Arc::clone(&self.state.load().target)
    }

    /// Number of filters
    pub fn len(&self) -> usize {
        self.state.load().filters.len()
    }

    /// Whether the chain has no filters
    pub fn is_empty(&self) -> bool {
        self.state.load().filters.is_empty()
    }

    /// Cursor at the start of the current snapshot
    pub fn cursor(&self) -> Cursor {
        Cursor {
            snapshot: self.state.load_full(),
            position: 0,
        }
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.len())
            .finish_non_exhaustive()
    }
}

impl Describable for FilterChain {
    fn api(&self, context: &Context) -> ApiDescription {
        let snapshot = self.state.load();
        snapshot
            .target
            .describable()
            .map(|describable| describable.api(context))
            .unwrap_or_default()
    }
}

#[async_trait]
impl RequestHandler for FilterChain {
    async fn handle_action(
        &self,
        context: &Context,
        request: &ActionRequest,
    ) -> ResourceResult<ActionResponse> {
        self.cursor().handle_action(context, request).await
    }

    async fn handle_create(
        &self,
        context: &Context,
        request: &CreateRequest,
    ) -> ResourceResult<ResourceResponse> {
        self.cursor().handle_create(context, request).await
    }

    async fn handle_delete(
        &self,
        context: &Context,
        request: &DeleteRequest,
    ) -> ResourceResult<ResourceResponse> {
        self.cursor().handle_delete(context, request).await
    }

    async fn handle_patch(
        &self,
        context: &Context,
        request: &PatchRequest,
    ) -> ResourceResult<ResourceResponse> {
        self.cursor().handle_patch(context, request).await
    }

    async fn handle_query(
        &self,
        context: &Context,
        request: &QueryRequest,
        handler: &mut (dyn QueryResourceHandler + Send),
    ) -> ResourceResult<QueryResponse> {
        self.cursor().handle_query(context, request, handler).await
    }

    async fn handle_read(
        &self,
        context: &Context,
        request: &ReadRequest,
    ) -> ResourceResult<ResourceResponse> {
        self.cursor().handle_read(context, request).await
    }

    async fn handle_update(
        &self,
        context: &Context,
        request: &UpdateRequest,
    ) -> ResourceResult<ResourceResponse> {
        self.cursor().handle_update(context, request).await
    }

    fn describable(&self) -> Option<&dyn Describable> {
        self.state
            .load()
            .target
            .describable()
            .is_some()
            .then_some(self as &dyn Describable)
    }
}

/// Position within one request's snapshot of a [`FilterChain`]
///
/// Advancing never mutates a cursor: [`Cursor::next`] returns a new one, so
/// a filter that forwards twice runs the rest of the chain twice.
#[derive(Clone)]
pub struct Cursor {
    snapshot: Arc<Snapshot>,
    position: usize,
}

enum Step<'a> {
    Filter(&'a dyn Filter, Cursor),
    Target(&'a dyn RequestHandler),
}

impl Cursor {
    /// Cursor at the following position
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> Cursor {
        Cursor {
            snapshot: Arc::clone(&self.snapshot),
            position: self.position + 1,
        }
    }

    /// Index of the filter this cursor dispatches to
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether this cursor dispatches straight to the target
    pub fn at_target(&self) -> bool {
        self.position >= self.snapshot.filters.len()
    }

    fn step(&self, operation: RequestType, path: &ResourcePath) -> Step<'_> {
        match self.snapshot.filters.get(self.position) {
            Some(filter) => {
                tracing::trace!(
                    operation = %operation,
                    path = %path,
                    position = self.position,
                    "Dispatching to filter"
                );
                Step::Filter(filter.as_ref(), self.next())
            }
            None => {
                tracing::trace!(
                    operation = %operation,
                    path = %path,
                    position = self.position,
                    "Dispatching to target"
                );
                Step::Target(self.snapshot.target.as_ref())
            }
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("position", &self.position)
            .field("filters", &self.snapshot.filters.len())
            .finish()
    }
}

#[async_trait]
impl RequestHandler for Cursor {
    async fn handle_action(
        &self,
        context: &Context,
        request: &ActionRequest,
    ) -> ResourceResult<ActionResponse> {
        match self.step(RequestType::Action, request.resource_path()) {
            Step::Filter(filter, next) => filter.filter_action(context, request, &next).await,
            Step::Target(target) => target.handle_action(context, request).await,
        }
    }

    async fn handle_create(
        &self,
        context: &Context,
        request: &CreateRequest,
    ) -> ResourceResult<ResourceResponse> {
        match self.step(RequestType::Create, request.resource_path()) {
            Step::Filter(filter, next) => filter.filter_create(context, request, &next).await,
            Step::Target(target) => target.handle_create(context, request).await,
        }
    }

    async fn handle_delete(
        &self,
        context: &Context,
        request: &DeleteRequest,
    ) -> ResourceResult<ResourceResponse> {
        match self.step(RequestType::Delete, request.resource_path()) {
            Step::Filter(filter, next) => filter.filter_delete(context, request, &next).await,
            Step::Target(target) => target.handle_delete(context, request).await,
        }
    }

    async fn handle_patch(
        &self,
        context: &Context,
        request: &PatchRequest,
    ) -> ResourceResult<ResourceResponse> {
        match self.step(RequestType::Patch, request.resource_path()) {
            Step::Filter(filter, next) => filter.filter_patch(context, request, &next).await,
            Step::Target(target) => target.handle_patch(context, request).await,
        }
    }

    async fn handle_query(
        &self,
        context: &Context,
        request: &QueryRequest,
        handler: &mut (dyn QueryResourceHandler + Send),
    ) -> ResourceResult<QueryResponse> {
        match self.step(RequestType::Query, request.resource_path()) {
            Step::Filter(filter, next) => {
                filter.filter_query(context, request, handler, &next).await
            }
            Step::Target(target) => target.handle_query(context, request, handler).await,
        }
    }

    async fn handle_read(
        &self,
        context: &Context,
        request: &ReadRequest,
    ) -> ResourceResult<ResourceResponse> {
        match self.step(RequestType::Read, request.resource_path()) {
            Step::Filter(filter, next) => filter.filter_read(context, request, &next).await,
            Step::Target(target) => target.handle_read(context, request).await,
        }
    }

    async fn handle_update(
        &self,
        context: &Context,
        request: &UpdateRequest,
    ) -> ResourceResult<ResourceResponse> {
        match self.step(RequestType::Update, request.resource_path()) {
            Step::Filter(filter, next) => filter.filter_update(context, request, &next).await,
            Step::Target(target) => target.handle_update(context, request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceException;
    use crate::testing::{EchoHandler, Log};
    use futures::future::join_all;
    use std::sync::Weak;

    /// Logs its name then forwards
    struct Named {
        name: &'static str,
        log: Log,
    }

    #[async_trait]
    impl Filter for Named {
        async fn filter_read(
            &self,
            context: &Context,
            request: &ReadRequest,
            next: &dyn RequestHandler,
        ) -> ResourceResult<ResourceResponse> {
            self.log.push(self.name);
            next.handle_read(context, request).await
        }
    }

    fn named(name: &'static str, log: &Log) -> Arc<dyn Filter> {
        Arc::new(Named {
            name,
            log: log.clone(),
        })
    }

    /// Forwards a read twice, once per sub-path
    struct FanOut;

    #[async_trait]
    impl Filter for FanOut {
        async fn filter_read(
            &self,
            context: &Context,
            request: &ReadRequest,
            next: &dyn RequestHandler,
        ) -> ResourceResult<ResourceResponse> {
            let left = request.clone().with_resource_path(request.resource_path().child("left"));
            let right = request.clone().with_resource_path(request.resource_path().child("right"));
            next.handle_read(context, &left).await?;
            next.handle_read(context, &right).await
        }
    }

    /// Answers reads itself
    struct Cache;

    #[async_trait]
    impl Filter for Cache {
        async fn filter_read(
            &self,
            _context: &Context,
            _request: &ReadRequest,
            _next: &dyn RequestHandler,
        ) -> ResourceResult<ResourceResponse> {
            Ok(ResourceResponse::new(
                Some("cached".into()),
                None,
                serde_json::json!({}),
            ))
        }
    }

    /// Empties the chain it belongs to, then forwards
    struct ClearOnRead {
        chain: Weak<FilterChain>,
    }

    #[async_trait]
    impl Filter for ClearOnRead {
        async fn filter_read(
            &self,
            context: &Context,
            request: &ReadRequest,
            next: &dyn RequestHandler,
        ) -> ResourceResult<ResourceResponse> {
            if let Some(chain) = self.chain.upgrade() {
                chain.clear_filters();
                chain.set_target(Arc::new(EchoHandler::new("replacement", &Log::default())));
            }
            next.handle_read(context, request).await
        }
    }

    fn read(path: &str) -> ReadRequest {
        ReadRequest::new(path).unwrap()
    }

    #[tokio::test]
    async fn test_filters_run_in_registration_order() {
        let log = Log::default();
        let chain = FilterChain::new(
            Arc::new(EchoHandler::new("target", &log)),
            vec![named("a", &log), named("b", &log), named("c", &log)],
        );

        chain.handle_read(&Context::root(), &read("x")).await.unwrap();

        assert_eq!(log.entries(), ["a", "b", "c", "target:read:x"]);
    }

    #[tokio::test]
    async fn test_unintercepted_operations_reach_target() {
        let log = Log::default();
        let chain = FilterChain::new(
            Arc::new(EchoHandler::new("target", &log)),
            vec![named("a", &log)],
        );

        let response = chain
            .handle_delete(&Context::root(), &DeleteRequest::new("x").unwrap())
            .await
            .unwrap();

        assert_eq!(response.id(), Some("x"));
        assert_eq!(log.entries(), ["target:delete:x"]);
    }

    #[tokio::test]
    async fn test_forwarding_twice_runs_the_rest_twice() {
        let log = Log::default();
        let chain = FilterChain::new(
            Arc::new(EchoHandler::new("target", &log)),
            vec![named("a", &log), Arc::new(FanOut), named("b", &log)],
        );

        chain.handle_read(&Context::root(), &read("x")).await.unwrap();

        assert_eq!(
            log.entries(),
            ["a", "b", "target:read:x/left", "b", "target:read:x/right"]
        );
        assert_eq!(log.count("a"), 1);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_downstream() {
        let log = Log::default();
        let chain = FilterChain::new(
            Arc::new(EchoHandler::new("target", &log)),
            vec![named("a", &log), Arc::new(Cache), named("b", &log)],
        );

        let response = chain.handle_read(&Context::root(), &read("x")).await.unwrap();

        assert_eq!(response.id(), Some("cached"));
        assert_eq!(log.entries(), ["a"]);
    }

    #[tokio::test]
    async fn test_errors_propagate_unchanged() {
        struct Fail;

        #[async_trait]
        impl Filter for Fail {
            async fn filter_read(
                &self,
                _context: &Context,
                _request: &ReadRequest,
                _next: &dyn RequestHandler,
            ) -> ResourceResult<ResourceResponse> {
                Err(ResourceException::service_unavailable("down"))
            }
        }

        let log = Log::default();
        let chain = FilterChain::new(
            Arc::new(EchoHandler::new("target", &log)),
            vec![named("a", &log), Arc::new(Fail)],
        );

        let err = chain.handle_read(&Context::root(), &read("x")).await.unwrap_err();
        assert_eq!(err.code(), 503);
        assert_eq!(err.message(), "down");
    }

    #[tokio::test]
    async fn test_in_flight_request_keeps_its_snapshot() {
        let log = Log::default();
        let chain = Arc::new(FilterChain::new(
            Arc::new(EchoHandler::new("target", &log)),
            Vec::new(),
        ));
        chain.add_filter(Arc::new(ClearOnRead {
            chain: Arc::downgrade(&chain),
        }));
        chain.add_filter(named("after", &log));

        chain.handle_read(&Context::root(), &read("x")).await.unwrap();

        // the live chain was emptied and retargeted mid-request
        assert!(chain.is_empty());
        assert_eq!(log.entries(), ["after", "target:read:x"]);

        chain.handle_read(&Context::root(), &read("y")).await.unwrap();
        assert_eq!(log.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_mutators() {
        let log = Log::default();
        let chain = FilterChain::new(Arc::new(EchoHandler::new("target", &log)), Vec::new());
        let a = named("a", &log);
        let b = named("b", &log);
        let c = named("c", &log);

        chain.add_filters(vec![a.clone(), c.clone()]);
        chain.insert_filter(1, b.clone());
        chain.insert_filter(99, named("z", &log));
        assert_eq!(chain.len(), 4);

        assert!(chain.remove_filter_at(3).is_some());
        assert!(chain.remove_filter_at(3).is_none());

        chain.handle_read(&Context::root(), &read("x")).await.unwrap();
        assert_eq!(log.entries(), ["a", "b", "c", "target:read:x"]);

        assert!(chain.remove_filter(&b));
        assert!(!chain.remove_filter(&b));
        assert_eq!(chain.filters().len(), 2);

        chain.set_filters(vec![c.clone()]);
        assert_eq!(chain.len(), 1);
        chain.clear_filters();
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_requests_and_mutation() {
        let log = Log::default();
        let chain = Arc::new(FilterChain::new(
            Arc::new(EchoHandler::new("target", &log)),
            vec![named("a", &log)],
        ));

        let requests = (0..32).map(|i| {
            let chain = Arc::clone(&chain);
            let log = log.clone();
            tokio::spawn(async move {
                if i % 4 == 0 {
                    chain.add_filter(named("late", &log));
                }
                chain
                    .handle_read(&Context::root(), &read(&format!("r{i}")))
                    .await
            })
        });

        for result in join_all(requests).await {
            assert!(result.unwrap().is_ok());
        }

        let entries = log.entries();
        assert_eq!(entries.iter().filter(|e| e.starts_with("target:")).count(), 32);
        assert_eq!(log.count("a"), 32);
        assert_eq!(chain.len(), 9);
    }

    #[tokio::test]
    async fn test_cursor_walks_snapshot() {
        let log = Log::default();
        let chain = FilterChain::new(
            Arc::new(EchoHandler::new("target", &log)),
            vec![named("a", &log), named("b", &log)],
        );

        let cursor = chain.cursor();
        assert_eq!(cursor.position(), 0);
        let skipped = cursor.next();
        assert_eq!(cursor.position(), 0);
        assert!(!skipped.at_target());
        assert!(skipped.next().at_target());

        skipped.handle_read(&Context::root(), &read("x")).await.unwrap();
        assert_eq!(log.entries(), ["b", "target:read:x"]);
        assert!(cursor.describable().is_none());
    }

    #[tokio::test]
    async fn test_query_streams_through_chain() {
        let log = Log::default();
        let target = EchoHandler::new("target", &log)
            .with_query_results(vec![serde_json::json!({"n": 1}), serde_json::json!({"n": 2})]);
        let chain = FilterChain::new(Arc::new(target), vec![named("a", &log)]);

        let (resources, response) = crate::handler::collect_query(
            &chain,
            &Context::root(),
            &QueryRequest::new("items").unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(resources.len(), 2);
        assert_eq!(response.total_paged_results(), QueryResponse::NO_COUNT);
    }
}
