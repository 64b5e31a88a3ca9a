//! Loader/action abstraction and outcome normalization.
//!
//! Routes carry their data capabilities as `Arc<dyn Loader>` /
//! `Arc<dyn Action>` — presence of the capability, not a class
//! hierarchy, is what the planner checks. Handlers are async and
//! object-safe so they can be stored on route records and dispatched
//! dynamically.
//!
//! A handler finishes in one of two ways: `Ok` (returned) or `Err`
//! (thrown). Both sides carry either plain data or a [`Response`];
//! [`normalize`] collapses the four combinations into the three
//! outcomes the engine acts on — data, redirect, exception.

use crate::history::Path;
use crate::http::{Request, Response, Submission, REVALIDATE_HEADER};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Loader/action data payload.
pub type DataValue = Value;

/// What a handler hands back, on either the returned or thrown side.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerValue {
    /// Plain data.
    Data(DataValue),
    /// A response; may be a redirect, an exception, or data-with-status.
    Response(Response),
}

/// `Ok` = returned, `Err` = thrown. Both sides accept the same values.
pub type HandlerResult = Result<HandlerValue, HandlerValue>;

/// Arguments handed to every loader and action call.
#[derive(Debug, Clone)]
pub struct HandlerArgs {
    /// Params extracted by the matcher for this route's match.
    pub params: HashMap<String, String>,
    /// Fabricated request for the destination URL.
    pub request: Request,
    /// Signal of the owning navigation or fetcher cycle. Checked by
    /// the engine after every await; handlers may also observe it.
    pub signal: CancellationToken,
    /// Present on submission navigations and fetches.
    pub submission: Option<Submission>,
}

/// Per-route data reader.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Produce data for a match of this route.
    async fn call(&self, args: HandlerArgs) -> HandlerResult;
}

/// Per-route mutation handler. At most one runs per navigation — the
/// submission target's.
#[async_trait]
pub trait Action: Send + Sync {
    /// Perform the mutation for a submission targeting this route.
    async fn call(&self, args: HandlerArgs) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Loader for F
where
    F: Fn(HandlerArgs) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, args: HandlerArgs) -> HandlerResult {
        self(args).await
    }
}

#[async_trait]
impl<F, Fut> Action for F
where
    F: Fn(HandlerArgs) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, args: HandlerArgs) -> HandlerResult {
        self(args).await
    }
}

/// Loader that always resolves to a fixed value. Handy for smoke tests
/// and static branches of a route tree.
pub struct StaticLoader(pub DataValue);

#[async_trait]
impl Loader for StaticLoader {
    async fn call(&self, _args: HandlerArgs) -> HandlerResult {
        Ok(HandlerValue::Data(self.0.clone()))
    }
}

/// Arguments for a route's reload veto.
#[derive(Debug, Clone)]
pub struct ReloadArgs {
    /// URL the router is at.
    pub current_url: Path,
    /// URL the router is going to.
    pub next_url: Path,
    /// Params of this route's match at the destination.
    pub params: HashMap<String, String>,
    /// The submission driving an action-reload, when there is one.
    pub submission: Option<Submission>,
}

/// Optional per-route veto over loader reruns. Consulted only for
/// same-path revalidation, search changes, and action reloads — never
/// for new matches, changed params, or first hydration.
pub trait ShouldReload: Send + Sync {
    /// Return `false` to keep the route's current data.
    fn call(&self, args: ReloadArgs) -> bool;
}

impl<F> ShouldReload for F
where
    F: Fn(ReloadArgs) -> bool + Send + Sync,
{
    fn call(&self, args: ReloadArgs) -> bool {
        self(args)
    }
}

// ── Outcome normalization ────────────────────────────────────────────

/// Redirect extracted from a handler outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectSignal {
    /// Value of the `location` header.
    pub location: String,
    /// The redirect status.
    pub status: u16,
    /// Set when the response demands a full loader revalidation.
    pub revalidate: bool,
}

/// A non-redirect failure routed to an exception boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// A thrown plain value.
    Data(DataValue),
    /// A returned or thrown response with status `>= 400`.
    Response(Response),
}

impl Exception {
    /// The status code, when the exception wraps a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response(resp) => Some(resp.status),
            Self::Data(_) => None,
        }
    }
}

/// Normalized handler outcome the engine acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Commit as data for the route.
    Data(DataValue),
    /// Divert into a new navigation.
    Redirect(RedirectSignal),
    /// Route to the nearest exception boundary.
    Exception(Exception),
}

/// Collapse returned/thrown × data/response into data, redirect, or
/// exception. Throwing and returning the same redirect are equivalent.
pub fn normalize(result: HandlerResult) -> Resolved {
    match result {
        Ok(HandlerValue::Response(resp)) | Err(HandlerValue::Response(resp)) => {
            if resp.is_redirect() {
                let revalidate = resp
                    .header(REVALIDATE_HEADER)
                    .is_some_and(|v| v.eq_ignore_ascii_case("yes"));
                // Header presence is validated by is_redirect.
                let location = resp.header("location").unwrap_or_default().to_string();
                Resolved::Redirect(RedirectSignal {
                    location,
                    status: resp.status,
                    revalidate,
                })
            } else if resp.status >= 400 {
                Resolved::Exception(Exception::Response(resp))
            } else {
                // A returned non-redirect success response is data.
                Resolved::Data(resp.body)
            }
        }
        Ok(HandlerValue::Data(value)) => Resolved::Data(value),
        Err(HandlerValue::Data(value)) => Resolved::Exception(Exception::Data(value)),
    }
}
