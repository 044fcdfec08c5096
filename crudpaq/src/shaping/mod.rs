//! Response shaping: field projection, paging and counting

mod paging;
mod projection;

pub use paging::{
    compare_values, paginate, resolve_count_policy, sort_resources, Page, PagedResultsCookie,
    Paginator,
};
pub use projection::{project, FieldProjectionFilter, ProjectionPolicy};
