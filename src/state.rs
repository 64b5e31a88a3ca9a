//! Snapshot types: transition, revalidation, fetchers, and the router
//! state record handed to subscribers.
//!
//! Everything here is plain data. The engine builds a fresh
//! [`RouterState`] at each commit and installs it atomically;
//! subscribers only ever observe complete snapshots.

use crate::handler::{DataValue, Exception};
use crate::history::{HistoryAction, Location};
use crate::http::Submission;
use crate::matching::RouteMatch;
use std::collections::HashMap;
use std::fmt;

// ── Transition ───────────────────────────────────────────────────────

/// Coarse activity of the in-flight navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionState {
    /// Nothing in flight.
    Idle,
    /// Loaders are running.
    Loading,
    /// An action or loader submission is running.
    Submitting,
}

/// What kind of navigation is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Nothing in flight.
    Idle,
    /// Plain GET navigation.
    NormalLoad,
    /// Navigation started by a loader redirect.
    NormalRedirect,
    /// GET submission running loaders.
    LoaderSubmission,
    /// Mutation submission running the action.
    ActionSubmission,
    /// Post-action loader revalidation.
    ActionReload,
    /// Navigation started by a submission redirect.
    SubmissionRedirect,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Idle => "idle",
            Self::NormalLoad => "normalLoad",
            Self::NormalRedirect => "normalRedirect",
            Self::LoaderSubmission => "loaderSubmission",
            Self::ActionSubmission => "actionSubmission",
            Self::ActionReload => "actionReload",
            Self::SubmissionRedirect => "submissionRedirect",
        };
        f.write_str(tag)
    }
}

/// The in-flight navigation's status.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Coarse activity.
    pub state: TransitionState,
    /// Navigation kind.
    pub kind: TransitionKind,
    /// Destination, absent when idle.
    pub location: Option<Location>,
    /// Submission riding the navigation, when there is one.
    pub submission: Option<Submission>,
}

impl Transition {
    /// The idle transition.
    pub fn idle() -> Self {
        Self {
            state: TransitionState::Idle,
            kind: TransitionKind::Idle,
            location: None,
            submission: None,
        }
    }

    /// Loading toward `location` with the given kind.
    pub fn loading(kind: TransitionKind, location: Location, submission: Option<Submission>) -> Self {
        Self {
            state: TransitionState::Loading,
            kind,
            location: Some(location),
            submission,
        }
    }

    /// Submitting toward `location` with the given kind.
    pub fn submitting(
        kind: TransitionKind,
        location: Location,
        submission: Submission,
    ) -> Self {
        Self {
            state: TransitionState::Submitting,
            kind,
            location: Some(location),
            submission: Some(submission),
        }
    }

    /// Returns `true` when nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.state == TransitionState::Idle
    }
}

impl Default for Transition {
    fn default() -> Self {
        Self::idle()
    }
}

// ── Revalidation ─────────────────────────────────────────────────────

/// Status of an explicit `revalidate()` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevalidationState {
    /// No revalidation in flight.
    #[default]
    Idle,
    /// Loaders are re-running for the current location.
    Loading,
}

// ── Fetchers ─────────────────────────────────────────────────────────

/// Coarse activity of a fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherState {
    /// Nothing in flight for this key.
    Idle,
    /// A loader (or post-action revalidation) is running.
    Loading,
    /// A submission is running.
    Submitting,
}

/// What kind of call a fetcher is in, or finished with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherKind {
    /// Plain loader call.
    NormalLoad,
    /// GET submission loader call.
    LoaderSubmission,
    /// Mutation submission running the action.
    ActionSubmission,
    /// Post-action revalidation of the current page.
    ActionReload,
    /// Action redirect being followed by a navigation.
    ActionRedirect,
    /// Settled.
    Done,
}

impl fmt::Display for FetcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::NormalLoad => "normalLoad",
            Self::LoaderSubmission => "loaderSubmission",
            Self::ActionSubmission => "actionSubmission",
            Self::ActionReload => "actionReload",
            Self::ActionRedirect => "actionRedirect",
            Self::Done => "done",
        };
        f.write_str(tag)
    }
}

/// State of one keyed out-of-band call.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetcher {
    /// Coarse activity.
    pub state: FetcherState,
    /// Call kind.
    pub kind: FetcherKind,
    /// Latest data for this key. Retained across a re-fetch until the
    /// new cycle produces a value.
    pub data: Option<DataValue>,
    /// Submission riding the call, when there is one.
    pub submission: Option<Submission>,
}

impl Fetcher {
    /// The sentinel returned for unknown keys: settled with no data.
    pub fn idle() -> Self {
        Self {
            state: FetcherState::Idle,
            kind: FetcherKind::Done,
            data: None,
            submission: None,
        }
    }

    /// Returns `true` when the fetcher has nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.state == FetcherState::Idle
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::idle()
    }
}

// ── Snapshot ─────────────────────────────────────────────────────────

/// The atomic router snapshot.
///
/// `matches` is `None` only on a 404, in which case `exceptions`
/// carries a synthesized 404 response at the root boundary.
#[derive(Debug, Clone)]
pub struct RouterState {
    /// How the current location was reached.
    pub history_action: HistoryAction,
    /// The committed location.
    pub location: Location,
    /// Matches for `location`, root→leaf. `None` on a 404.
    pub matches: Option<Vec<RouteMatch>>,
    /// False until the initial load completes.
    pub initialized: bool,
    /// The in-flight navigation's status.
    pub transition: Transition,
    /// Status of an explicit revalidation.
    pub revalidation: RevalidationState,
    /// Loader data keyed by route id.
    pub loader_data: HashMap<String, DataValue>,
    /// Action data from the most recent submission, keyed by route id.
    pub action_data: Option<HashMap<String, DataValue>>,
    /// Exceptions keyed by boundary route id.
    pub exceptions: Option<HashMap<String, Exception>>,
    /// All known fetchers by key.
    pub fetchers: HashMap<String, Fetcher>,
}

impl RouterState {
    /// Matched route ids, root→leaf. Empty on a 404.
    pub fn match_ids(&self) -> Vec<&str> {
        self.matches
            .as_deref()
            .map(|matches| matches.iter().map(|m| m.route.id.as_str()).collect())
            .unwrap_or_default()
    }

    /// Loader data for one route id.
    pub fn loader_data_for(&self, route_id: &str) -> Option<&DataValue> {
        self.loader_data.get(route_id)
    }

    /// Exception for one boundary id.
    pub fn exception_for(&self, route_id: &str) -> Option<&Exception> {
        self.exceptions.as_ref().and_then(|map| map.get(route_id))
    }
}
