//! HTTP transport: request validation and translation into `DispatchService::submit`.

pub mod dto;
pub mod errors;
pub mod handlers;
pub mod router;

pub use router::{AppState, build_router};
