//! Protocol model: paths, versions, requests and responses

mod patch;
mod path;
mod pointer;
mod query;
mod request;
mod response;
mod version;

pub use patch::{PatchOperation, PatchOperationKind};
pub use path::ResourcePath;
pub use pointer::JsonPointer;
pub use query::{ComparisonOperator, CountPolicy, QueryFilter, SortKey};
pub use request::{
    ActionRequest, CreateRequest, DeleteRequest, PatchRequest, QueryRequest, ReadRequest, Request,
    RequestCommon, RequestType, UpdateRequest,
};
pub use response::{ActionResponse, QueryResponse, ResourceResponse, Response};
pub use version::Version;
