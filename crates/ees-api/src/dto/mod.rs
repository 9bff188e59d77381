//! Data Transfer Objects for API requests and responses

pub mod common;
pub mod jsonrpc;
pub mod requests;

pub use common::ApiResponse;
pub use jsonrpc::{RpcRequest, RpcResponse};
pub use requests::{ArchiveEventsRequest, ReplayFailedPostsRequest, ResetMetricsRequest};
