//! # tokio-data-router
//!
//! A data-aware navigation core over Tokio: a deterministic state
//! machine that couples location changes with per-route data loading,
//! submission handling, revalidation, and keyed out-of-band fetches.
//!
//! ## Architecture
//!
//! ```text
//! navigate/fetch/revalidate
//!        │
//!        ▼
//!   Planner ──► Engine (action, then loaders, one cancel token per cycle)
//!        │           │
//!        │           ├── redirect?  → new navigation
//!        │           └── exception? → nearest boundary
//!        ▼
//!   Snapshot commit ──► history push/replace ──► subscribers
//! ```
//!
//! Any cycle superseded by a newer one is cancelled; late results from
//! a cancelled cycle are discarded, never committed.

use thiserror::Error;

pub mod handler;
pub mod history;
pub mod http;
pub mod matching;
mod plan;
pub mod route;
pub mod router;
pub mod state;

// Re-exports
pub use handler::{
    Action, DataValue, Exception, HandlerArgs, HandlerResult, HandlerValue, Loader, ReloadArgs,
    ShouldReload, StaticLoader,
};
pub use history::{History, HistoryAction, Location, MemoryHistory, Path};
pub use http::{FormData, FormMethod, Request, Response, Submission};
pub use matching::RouteMatch;
pub use route::Route;
pub use router::{
    create_router, HydrationData, NavigateOptions, Router, RouterInit, Subscription,
};
pub use state::{
    Fetcher, FetcherKind, FetcherState, RevalidationState, RouterState, Transition,
    TransitionKind, TransitionState,
};

/// Construction-time errors. Everything that goes wrong after
/// construction surfaces through `state.exceptions`, never here.
#[derive(Error, Debug)]
pub enum RouterError {
    /// The top-level route list was empty.
    #[error("route tree is empty")]
    EmptyRoutes,

    /// Two routes carry the same id.
    #[error("duplicate route id: {id}")]
    DuplicateRouteId {
        /// The offending id.
        id: String,
    },
}

/// Initialise tracing with env-filter support. Call once at binary startup.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
