//! Query paging and result counting
//!
//! [`Paginator`] turns the full, filtered match list of a query into one
//! page plus the [`QueryResponse`] metadata that goes with it: the cookie
//! for the next page and the total and remaining counts.
//!
//! Cookies are opaque to clients. They encode the index of the next result
//! together with the sort keys the page was computed under, so a cookie
//! replayed against a differently sorted query is rejected.

use std::cmp::Ordering;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::Value;

use crate::config::QueryConfig;
use crate::error::{ResourceException, ResourceResult};
use crate::protocol::{CountPolicy, QueryRequest, QueryResponse, ResourceResponse, SortKey};

/// Decoded form of a paged-results cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedResultsCookie {
    index: usize,
    sort_keys: String,
}

impl PagedResultsCookie {
    /// Cookie resuming at `index` under `sort_keys`
    pub fn new(index: usize, sort_keys: &[SortKey]) -> Self {
        Self {
            index,
            sort_keys: join_sort_keys(sort_keys),
        }
    }

    /// Index of the first result of the next page
    pub fn index(&self) -> usize {
        self.index
    }

    /// Opaque string form
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.index, self.sort_keys))
    }

    /// Parse a cookie produced by [`PagedResultsCookie::encode`]
    ///
    /// Fails with `BadRequest` if the cookie is malformed or was issued for
    /// different sort keys.
    pub fn decode(cookie: &str, sort_keys: &[SortKey]) -> ResourceResult<Self> {
        let invalid = || {
            ResourceException::bad_request(format!(
                "The paged results cookie '{cookie}' is not valid"
            ))
        };
        let bytes = URL_SAFE_NO_PAD.decode(cookie).map_err(|e| invalid().caused_by(e))?;
        let text = String::from_utf8(bytes).map_err(|e| invalid().caused_by(e))?;
        let (index, keys) = text.split_once(':').ok_or_else(invalid)?;
        let index = index.parse::<usize>().map_err(|e| invalid().caused_by(e))?;
        let expected = join_sort_keys(sort_keys);
        if keys != expected {
            return Err(ResourceException::bad_request(
                "The paged results cookie was issued for different sort keys",
            ));
        }
        Ok(Self {
            index,
            sort_keys: expected,
        })
    }
}

fn join_sort_keys(sort_keys: &[SortKey]) -> String {
    sort_keys
        .iter()
        .map(SortKey::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Count precision a provider reports for a requested policy
///
/// Providers that can count report `Exact` for both `Exact` and `Estimate`,
/// since an estimate is never cheaper for them. Providers that cannot count
/// report `None`.
pub fn resolve_count_policy(requested: CountPolicy, can_count: bool) -> CountPolicy {
    match requested {
        CountPolicy::None => CountPolicy::None,
        CountPolicy::Estimate | CountPolicy::Exact if can_count => CountPolicy::Exact,
        CountPolicy::Estimate | CountPolicy::Exact => CountPolicy::None,
    }
}

/// Order two optional JSON values for sorting
///
/// Numbers compare numerically, strings case-insensitively. Values of
/// different types order null, boolean, number, string, array, object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x.len().cmp(&y.len()),
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Stable sort by `sort_keys`, most significant first
///
/// Resources missing a sort field come last whatever the direction.
pub fn sort_resources(resources: &mut [ResourceResponse], sort_keys: &[SortKey]) {
    if sort_keys.is_empty() {
        return;
    }
    resources.sort_by(|a, b| {
        sort_keys
            .iter()
            .map(|key| {
                let left = key.field().get(a.content()).filter(|v| !v.is_null());
                let right = key.field().get(b.content()).filter(|v| !v.is_null());
                match (left, right) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(_), None) => Ordering::Less,
                    (Some(x), Some(y)) if key.is_ascending() => compare_values(x, y),
                    (Some(x), Some(y)) => compare_values(y, x),
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

/// One page of query results
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Results on this page, in order
    pub resources: Vec<ResourceResponse>,
    /// Paging and count metadata
    pub response: QueryResponse,
}

/// Computes pages from complete match lists
#[derive(Debug, Clone, Default)]
pub struct Paginator {
    default_page_size: u32,
    max_page_size: u32,
    count_policy_default: CountPolicy,
}

impl Paginator {
    /// Paginator with the limits from `config`
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
            count_policy_default: config.count_policy_default,
        }
    }

    /// Page size actually used for `request`
    ///
    /// Zero means unpaged. The configured default only applies when the
    /// request sets no page size, and the maximum (zero for none) only caps
    /// paged requests.
    pub fn effective_page_size(&self, request: &QueryRequest) -> u32 {
        let requested = request
            .requested_page_size()
            .unwrap_or(self.default_page_size);
        match self.max_page_size {
            0 => requested,
            _ if requested == 0 => 0,
            max => requested.min(max),
        }
    }

    /// Count policy actually requested, after applying the configured default
    ///
    /// An explicit `None` from the client is kept.
    pub fn effective_count_policy(&self, request: &QueryRequest) -> CountPolicy {
        request
            .requested_total_paged_results_policy()
            .unwrap_or(self.count_policy_default)
    }

    /// Sort `matches` and cut out the page `request` asks for
    ///
    /// `matches` must already be filtered.
    pub fn paginate(
        &self,
        mut matches: Vec<ResourceResponse>,
        request: &QueryRequest,
    ) -> ResourceResult<Page> {
        request.validate()?;
        sort_resources(&mut matches, request.sort_keys());

        let total = matches.len();
        let start = match request.paged_results_cookie() {
            Some(cookie) => PagedResultsCookie::decode(cookie, request.sort_keys())?.index(),
            None => request.paged_results_offset() as usize,
        }
        .min(total);

        let page_size = self.effective_page_size(request) as usize;
        let end = if page_size == 0 {
            total
        } else {
            start.saturating_add(page_size).min(total)
        };

        let cookie = (page_size > 0 && end < total)
            .then(|| PagedResultsCookie::new(end, request.sort_keys()).encode());
        let policy = resolve_count_policy(self.effective_count_policy(request), true);
        let remaining = match policy {
            CountPolicy::None => QueryResponse::NO_COUNT,
            _ => (total - end) as i64,
        };

        let response = QueryResponse::new()
            .with_paged_results_cookie(cookie)
            .with_total_paged_results(policy, total as i64)
            .with_remaining_paged_results(remaining);
        let resources = matches.into_iter().skip(start).take(end - start).collect();

        Ok(Page {
            resources,
            response,
        })
    }
}

/// [`Paginator::paginate`] with no configured limits
pub fn paginate(matches: Vec<ResourceResponse>, request: &QueryRequest) -> ResourceResult<Page> {
    Paginator::default().paginate(matches, request)
}
