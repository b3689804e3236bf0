//! The API layer, containing web handlers, middleware and routing.

pub mod handlers;
pub mod middleware;
pub mod router;

pub use router::create_router;
