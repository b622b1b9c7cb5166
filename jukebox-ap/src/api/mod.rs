//! HTTP control surface
//!
//! Management API for the jukebox: tag registration, manual playback,
//! sink management, player settings and an SSE event stream.

pub mod handlers;
pub mod server;
pub mod sse;

pub use handlers::ApiError;
pub use server::{build_router, run, AppContext};
