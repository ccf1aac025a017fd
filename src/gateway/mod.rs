//! HTTP front door: route composition, authentication middleware, server

pub mod context;
pub mod middleware;
pub mod router;
mod server;
pub mod trace;

pub use context::RequestContext;
pub use middleware::{Authorizer, authorize};
pub use router::{AppState, RouteMismatch, create_router};
pub use server::Gateway;
pub use trace::TraceContext;
