//! # Router — the navigation engine and state store
//!
//! ## Responsibility
//! Own the atomic snapshot and drive every cycle that changes it:
//! navigations (plain loads, submissions, redirects, POPs),
//! revalidations, and keyed fetcher calls. Run actions then loaders
//! under one cancellation token per cycle, route redirects into new
//! navigations and exceptions to their nearest boundary, and commit
//! complete snapshots to subscribers.
//!
//! ## Loader selection
//!
//! On a navigation to a new match list, a matched route's loader runs
//! when any of these hold, in order:
//! 1. the match is new (not in the current match list by id)
//! 2. the match is kept but its params changed
//! 3. the URL search changed
//! 4. the cycle is a revalidation or follows a completed action
//! 5. hydration left the route without data on the initial load
//!
//! Cases 3 and 4 may be vetoed by the route's `should_reload`; cases
//! 1, 2, and 5 may not. A redirect demanding revalidation overrides
//! the veto. Loaders strictly below a pending exception boundary are
//! skipped.
//!
//! ## Guarantees
//! - Snapshot atomicity: subscribers only ever observe complete states
//! - At most one navigation cycle owns an unaborted token; starting a
//!   new one cancels the old
//! - Each fetcher key owns at most one token; same-key calls cancel
//!   the prior
//! - A cancelled cycle never commits; its late results are discarded
//!
//! ## NOT Responsible For
//! - Rendering or UI bindings (subscribers decide what to do)
//! - Real network I/O (requests are fabricated shapes)

use crate::handler::{
    normalize, DataValue, Exception, HandlerArgs, RedirectSignal, Resolved,
};
use crate::history::{History, HistoryAction, ListenerId, Location, Path};
use crate::http::{FormData, FormMethod, Request, Response, Submission, DEFAULT_ENC_TYPE};
use crate::matching::{match_routes, submission_target_index, RouteMatch};
use crate::plan::{boundary_for, plan_loaders, LoadReason, PlanInput};
use crate::route::{normalize_routes, DataRoute, Route};
use crate::state::{
    Fetcher, FetcherKind, FetcherState, RevalidationState, RouterState, Transition,
    TransitionKind,
};
use crate::RouterError;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ── Construction ─────────────────────────────────────────────────────

/// Server- or cache-provided data to seed the initial snapshot.
#[derive(Debug, Clone, Default)]
pub struct HydrationData {
    /// Loader data keyed by route id.
    pub loader_data: HashMap<String, DataValue>,
    /// Action data keyed by route id.
    pub action_data: Option<HashMap<String, DataValue>>,
    /// Exceptions keyed by boundary route id.
    pub exceptions: Option<HashMap<String, Exception>>,
}

/// Everything the router needs at construction.
pub struct RouterInit {
    /// The route tree.
    pub routes: Vec<Route>,
    /// The session-history seam.
    pub history: Arc<dyn History>,
    /// Prefix applied when rendering hrefs.
    pub basename: Option<String>,
    /// Seed data for the initial snapshot.
    pub hydration_data: Option<HydrationData>,
}

/// Options for [`Router::navigate`] and [`Router::fetch`].
#[derive(Debug, Clone, Default)]
pub struct NavigateOptions {
    /// Replace the current history entry instead of pushing.
    pub replace: bool,
    /// Makes the navigation a submission.
    pub form_method: Option<FormMethod>,
    /// Submission payload.
    pub form_data: Option<FormData>,
    /// Submission encoding; defaults to
    /// `application/x-www-form-urlencoded`.
    pub form_enc_type: Option<String>,
    /// State attached to the new location.
    pub state: Option<Value>,
}

impl NavigateOptions {
    fn submission(&self) -> Option<Submission> {
        self.form_method.map(|form_method| Submission {
            form_method,
            form_enc_type: self
                .form_enc_type
                .clone()
                .unwrap_or_else(|| DEFAULT_ENC_TYPE.to_string()),
            form_data: self.form_data.clone().unwrap_or_default(),
        })
    }
}

/// Build a router. Fails only on an invalid route tree; see
/// [`RouterError`].
pub fn create_router(init: RouterInit) -> Result<Router, RouterError> {
    let routes = normalize_routes(&init.routes)?;
    let basename = init
        .basename
        .map(|b| {
            let trimmed = b.trim_end_matches('/');
            if trimmed.is_empty() {
                String::new()
            } else {
                trimmed.to_string()
            }
        })
        .unwrap_or_default();

    let location = init.history.location();
    let history_action = init.history.action();
    let matches = match_routes(&routes, &location.pathname);
    let hydration = init.hydration_data.unwrap_or_default();

    let (initial_state, needs_initial_load) = match &matches {
        None => {
            // Unmatched start URL: synthesize a 404 at the root
            // boundary; nothing to load.
            let boundary = routes[0].id.clone();
            warn!(target: "router", pathname = %location.pathname, "no routes matched initial location");
            (
                RouterState {
                    history_action,
                    location: location.clone(),
                    matches: None,
                    initialized: true,
                    transition: Transition::idle(),
                    revalidation: RevalidationState::Idle,
                    loader_data: HashMap::new(),
                    action_data: None,
                    exceptions: Some(HashMap::from([(
                        boundary,
                        Exception::Response(Response::not_found()),
                    )])),
                    fetchers: HashMap::new(),
                },
                false,
            )
        }
        Some(matches) => {
            let missing: Vec<&str> = matches
                .iter()
                .filter(|m| m.route.has_loader())
                .filter(|m| !hydration.loader_data.contains_key(&m.route.id))
                .map(|m| m.route.id.as_str())
                .collect();
            let exceptions_cover = hydration
                .exceptions
                .as_ref()
                .is_some_and(|e| !e.is_empty());
            let initialized = missing.is_empty() || exceptions_cover;
            if !initialized && !hydration.loader_data.is_empty() {
                warn!(
                    target: "router",
                    missing = ?missing,
                    "hydration data is partial; kicking off an initial load"
                );
            }
            (
                RouterState {
                    history_action,
                    location: location.clone(),
                    matches: Some(matches.clone()),
                    initialized,
                    transition: Transition::idle(),
                    revalidation: RevalidationState::Idle,
                    loader_data: hydration.loader_data,
                    action_data: hydration.action_data,
                    exceptions: hydration.exceptions,
                    fetchers: HashMap::new(),
                },
                !initialized,
            )
        }
    };

    Ok(Router {
        inner: Arc::new(RouterInner {
            routes,
            history: init.history,
            basename,
            state: Mutex::new(initial_state),
            cycles: Mutex::new(CycleRegistry::default()),
            fetch_controllers: DashMap::new(),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
            history_listener: Mutex::new(None),
            needs_initial_load: AtomicBool::new(needs_initial_load),
        }),
    })
}

// ── Router handle ────────────────────────────────────────────────────

/// Cheaply clonable handle to one router instance.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

/// RAII subscription; dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    inner: Weak<RouterInner>,
}

impl Subscription {
    /// Explicitly remove the listener.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subscribers.lock().remove(&self.id);
        }
    }
}

impl Router {
    /// Clone of the current snapshot.
    pub fn state(&self) -> RouterState {
        self.inner.state.lock().clone()
    }

    /// Register a listener invoked synchronously after every commit.
    /// Listeners must not mutate the router.
    pub fn subscribe(
        &self,
        listener: impl Fn(&RouterState) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .insert(id, Arc::new(listener));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Attach the history listener and, when hydration was partial,
    /// kick off the initial load. Idempotent.
    pub fn initialize(&self) {
        let mut listener_slot = self.inner.history_listener.lock();
        if listener_slot.is_none() {
            let weak = Arc::downgrade(&self.inner);
            let id = self.inner.history.listen(Arc::new(move |_, location| {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(run_navigation(
                        inner,
                        NavRequest {
                            location,
                            history_op: HistoryOp::Pop,
                            submission: None,
                            kind: NavKind::Load,
                            force_reload: false,
                            revalidation: false,
                            initial: false,
                        },
                    ));
                }
            }));
            *listener_slot = Some(id);
        }
        drop(listener_slot);

        if self.inner.needs_initial_load.swap(false, Ordering::SeqCst) {
            let inner = self.inner.clone();
            let location = inner.state.lock().location.clone();
            tokio::spawn(run_navigation(
                inner,
                NavRequest {
                    location,
                    history_op: HistoryOp::None,
                    submission: None,
                    kind: NavKind::Load,
                    force_reload: false,
                    revalidation: false,
                    initial: true,
                },
            ));
        }
    }

    /// Navigate to a path. Resolves when the navigation commits or is
    /// superseded; errors never surface here.
    pub async fn navigate(&self, to: &str, opts: NavigateOptions) {
        let current = self.inner.state.lock().location.clone();
        let path = resolve_path(to, &current.pathname);
        let location = Location::from_path(path, opts.state.clone().unwrap_or(Value::Null));
        let submission = opts.submission();
        let kind = match &submission {
            Some(sub) if sub.form_method.is_mutation() => NavKind::ActionSubmission,
            Some(_) => NavKind::LoaderSubmission,
            None => NavKind::Load,
        };
        let history_op = if opts.replace {
            HistoryOp::Replace
        } else {
            HistoryOp::Push
        };
        let req = NavRequest {
            location,
            history_op,
            submission,
            kind,
            force_reload: false,
            revalidation: false,
            initial: false,
        };
        let inner = self.inner.clone();
        // Spawned so the cycle completes even if the caller drops the
        // future mid-flight.
        let _ = tokio::spawn(run_navigation(inner, req)).await;
    }

    /// Traverse the history stack; the resulting POP drives a
    /// navigation through the history listener.
    pub fn go(&self, delta: isize) {
        self.inner.history.go(delta);
    }

    /// Re-run loaders for the current location without navigating.
    pub fn revalidate(&self) {
        let inner = self.inner.clone();
        let location = inner.state.lock().location.clone();
        tokio::spawn(run_navigation(
            inner,
            NavRequest {
                location,
                history_op: HistoryOp::None,
                submission: None,
                kind: NavKind::Load,
                force_reload: false,
                revalidation: true,
                initial: false,
            },
        ));
    }

    /// Start or restart an out-of-band call for `key`.
    pub fn fetch(&self, key: &str, href: &str, opts: NavigateOptions) {
        let inner = self.inner.clone();
        let key = key.to_string();
        let href = href.to_string();
        tokio::spawn(run_fetch(inner, key, href, opts));
    }

    /// Fetcher state for `key`; the idle sentinel for unknown keys.
    pub fn get_fetcher(&self, key: &str) -> Fetcher {
        self.inner
            .state
            .lock()
            .fetchers
            .get(key)
            .cloned()
            .unwrap_or_else(Fetcher::idle)
    }

    /// Drop a fetcher and cancel anything it has in flight.
    pub fn delete_fetcher(&self, key: &str) {
        let inner = &self.inner;
        {
            let mut cycles = inner.cycles.lock();
            if let Some((_, token)) = inner.fetch_controllers.remove(key) {
                token.cancel();
            }
            cycles.suspended_fetchers.remove(key);
        }
        inner.commit(None, |state| {
            state.fetchers.remove(key);
        });
    }

    /// Render a location as an href, basename applied.
    pub fn create_href(&self, location: &Location) -> String {
        if self.inner.basename.is_empty() {
            self.inner.history.create_href(location)
        } else {
            let mut prefixed = location.clone();
            prefixed.pathname = if location.pathname == "/" {
                self.inner.basename.clone()
            } else {
                format!("{}{}", self.inner.basename, location.pathname)
            };
            self.inner.history.create_href(&prefixed)
        }
    }

    /// Abort all in-flight work and detach from the history.
    pub fn dispose(&self) {
        let inner = &self.inner;
        {
            let mut cycles = inner.cycles.lock();
            if let Some(token) = cycles.nav_controller.take() {
                token.cancel();
            }
            cycles.suspended_fetchers.clear();
            for entry in inner.fetch_controllers.iter() {
                entry.value().cancel();
            }
            inner.fetch_controllers.clear();
        }
        if let Some(id) = self.inner.history_listener.lock().take() {
            self.inner.history.unlisten(id);
        }
        self.inner.subscribers.lock().clear();
    }

    /// Active fetcher controllers, for tests observing cancellation.
    #[doc(hidden)]
    pub fn active_fetch_controllers(&self) -> Vec<(String, CancellationToken)> {
        self.inner
            .fetch_controllers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

// ── Internals ────────────────────────────────────────────────────────

/// How a suspended fetcher settles when the superseding navigation
/// commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettleMode {
    /// Keep the action data already on the fetcher.
    KeepData,
    /// Clear data (the fetcher's action redirected).
    ClearData,
}

/// Cycle bookkeeping; every token install/cancel and every commit
/// check happens under this lock, so a cancelled cycle can never
/// slip a commit in.
#[derive(Default)]
struct CycleRegistry {
    /// Controller of the in-flight navigation or revalidation.
    nav_controller: Option<CancellationToken>,
    /// Set while a mutation submission is in flight or completed
    /// without its loader run committing; forces the next cycle to
    /// revalidate.
    mutation_pending: bool,
    /// URL of the submission whose action data is currently held.
    action_location: Option<String>,
    /// Fetcher keys whose post-action work a navigation subsumed.
    suspended_fetchers: HashMap<String, SettleMode>,
}

struct RouterInner {
    routes: Vec<Arc<DataRoute>>,
    history: Arc<dyn History>,
    basename: String,
    state: Mutex<RouterState>,
    cycles: Mutex<CycleRegistry>,
    fetch_controllers: DashMap<String, CancellationToken>,
    subscribers: Mutex<HashMap<u64, Arc<dyn Fn(&RouterState) + Send + Sync>>>,
    next_subscriber_id: AtomicU64,
    history_listener: Mutex<Option<ListenerId>>,
    needs_initial_load: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryOp {
    Push,
    Replace,
    Pop,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NavKind {
    Load,
    LoaderSubmission,
    ActionSubmission,
    NormalRedirect,
    SubmissionRedirect,
}

struct NavRequest {
    location: Location,
    history_op: HistoryOp,
    submission: Option<Submission>,
    kind: NavKind,
    /// Redirect demanded a full revalidation; overrides reload vetoes.
    force_reload: bool,
    revalidation: bool,
    initial: bool,
}

impl RouterInner {
    /// Install a fresh navigation controller, cancelling the prior one
    /// (unless this cycle is a redirect follow-up, which takes over a
    /// controller whose work already resolved) and any fetcher
    /// revalidations this cycle subsumes. Returns the token and
    /// whether an interrupted or just-completed mutation forces
    /// revalidation.
    fn begin_cycle(&self, cancel_prior: bool) -> (CancellationToken, bool) {
        let mut cycles = self.cycles.lock();
        let mutation_pending = cycles.mutation_pending;
        if let Some(prev) = cycles.nav_controller.take() {
            if cancel_prior {
                prev.cancel();
            }
        }
        for key in cycles.suspended_fetchers.keys() {
            if let Some(entry) = self.fetch_controllers.get(key) {
                entry.value().cancel();
            }
        }
        let token = CancellationToken::new();
        cycles.nav_controller = Some(token.clone());
        (token, mutation_pending)
    }

    /// Guarded state update: checks the owning token under the cycle
    /// lock, mutates, then notifies subscribers with the complete
    /// snapshot. Returns `false` without mutating when the cycle was
    /// superseded.
    fn commit<F: FnOnce(&mut RouterState)>(
        &self,
        token: Option<&CancellationToken>,
        mutate: F,
    ) -> bool {
        self.commit_cycles(token, |state, _| mutate(state))
    }

    /// Like [`RouterInner::commit`], with access to the cycle registry
    /// so fetcher suspension and controller bookkeeping land in the
    /// same critical section as the state change.
    fn commit_cycles<F: FnOnce(&mut RouterState, &mut CycleRegistry)>(
        &self,
        token: Option<&CancellationToken>,
        mutate: F,
    ) -> bool {
        let mut cycles = self.cycles.lock();
        if token.is_some_and(CancellationToken::is_cancelled) {
            return false;
        }
        let snapshot = {
            let mut state = self.state.lock();
            mutate(&mut state, &mut cycles);
            state.clone()
        };
        let subscribers: Vec<Arc<dyn Fn(&RouterState) + Send + Sync>> =
            self.subscribers.lock().values().cloned().collect();
        for subscriber in &subscribers {
            subscriber(&snapshot);
        }
        drop(cycles);
        true
    }

    /// Commit hook for navigation completion: settles suspended
    /// fetchers, releases the controller slot, and applies the
    /// action-data retention rule before notifying.
    fn commit_navigation(
        &self,
        token: &CancellationToken,
        req: &NavRequest,
        mutate: impl FnOnce(&mut RouterState, &mut HashMap<String, SettleMode>),
    ) -> bool {
        let mut cycles = self.cycles.lock();
        if token.is_cancelled() {
            return false;
        }
        let mut settled = std::mem::take(&mut cycles.suspended_fetchers);
        let commit_url = req.location.request_url();
        let snapshot = {
            let mut state = self.state.lock();
            mutate(&mut state, &mut settled);
            for (key, mode) in &settled {
                if let Some(fetcher) = state.fetchers.get_mut(key) {
                    fetcher.state = FetcherState::Idle;
                    fetcher.kind = FetcherKind::Done;
                    fetcher.submission = None;
                    if *mode == SettleMode::ClearData {
                        fetcher.data = None;
                    }
                }
                self.fetch_controllers.remove(key);
            }
            if state.action_data.is_some()
                && cycles.action_location.as_deref() != Some(commit_url.as_str())
            {
                state.action_data = None;
                cycles.action_location = None;
            }
            state.transition = Transition::idle();
            state.revalidation = RevalidationState::Idle;
            state.initialized = true;
            state.clone()
        };
        cycles.nav_controller = None;
        cycles.mutation_pending = false;
        match req.history_op {
            HistoryOp::Push => self.history.push(&req.location),
            HistoryOp::Replace => self.history.replace(&req.location),
            HistoryOp::Pop | HistoryOp::None => {}
        }
        let subscribers: Vec<Arc<dyn Fn(&RouterState) + Send + Sync>> =
            self.subscribers.lock().values().cloned().collect();
        for subscriber in &subscribers {
            subscriber(&snapshot);
        }
        drop(cycles);
        true
    }
}

fn resolve_path(to: &str, current_pathname: &str) -> Path {
    if to.starts_with('/') {
        Path::parse(to)
    } else {
        let base = current_pathname.trim_end_matches('/');
        Path::parse(&format!("{base}/{to}"))
    }
}

fn history_action_for(op: HistoryOp, current: HistoryAction) -> HistoryAction {
    match op {
        HistoryOp::Push => HistoryAction::Push,
        HistoryOp::Replace => HistoryAction::Replace,
        HistoryOp::Pop => HistoryAction::Pop,
        HistoryOp::None => current,
    }
}

/// Redirect follow-ups: a push intent collapses into a replace so the
/// interrupted entry does not linger; POPs keep their action.
fn redirect_history_op(original: HistoryOp) -> HistoryOp {
    match original {
        HistoryOp::Pop => HistoryOp::Pop,
        _ => HistoryOp::Replace,
    }
}

/// Discard merged data for the boundary and every match strictly below
/// it. An exception discovered mid-batch arrives after deeper loaders
/// may have resolved (or been preserved); none of that data may
/// survive the cycle.
fn clear_data_at_and_below_boundary(
    matches: &[RouteMatch],
    boundary: &str,
    loader_data: &mut HashMap<String, DataValue>,
) {
    let Some(index) = matches.iter().position(|m| m.route.id == boundary) else {
        loader_data.remove(boundary);
        return;
    };
    for m in &matches[index..] {
        loader_data.remove(&m.route.id);
    }
}

// ── Navigation cycle ─────────────────────────────────────────────────

fn run_navigation(
    inner: Arc<RouterInner>,
    req: NavRequest,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        // Hash-only moves commit synchronously: no loaders, the
        // transition never leaves idle.
        if matches!(req.kind, NavKind::Load) && !req.revalidation && !req.initial {
            let hash_only = {
                let state = inner.state.lock();
                state.location.pathname == req.location.pathname
                    && state.location.search == req.location.search
                    && state.location.hash != req.location.hash
            };
            if hash_only {
                debug!(target: "router::nav", location = %req.location, "hash-only navigation");
                inner.commit(None, |state| {
                    state.history_action =
                        history_action_for(req.history_op, state.history_action);
                    state.location = req.location.clone();
                });
                match req.history_op {
                    HistoryOp::Push => inner.history.push(&req.location),
                    HistoryOp::Replace => inner.history.replace(&req.location),
                    _ => {}
                }
                return;
            }
        }

        let cancel_prior = !matches!(
            req.kind,
            NavKind::NormalRedirect | NavKind::SubmissionRedirect
        );
        let (token, mutation_pending) = inner.begin_cycle(cancel_prior);
        info!(
            target: "router::nav",
            location = %req.location,
            kind = ?req.kind,
            revalidation = req.revalidation,
            "navigation started"
        );

        let Some(matches) = match_routes(&inner.routes, &req.location.pathname) else {
            warn!(target: "router::nav", pathname = %req.location.pathname, "no routes matched");
            let boundary = inner.routes[0].id.clone();
            inner.commit_navigation(&token, &req, |state, _| {
                state.history_action = history_action_for(req.history_op, state.history_action);
                state.location = req.location.clone();
                state.matches = None;
                state.loader_data = HashMap::new();
                state.exceptions = Some(HashMap::from([(
                    boundary,
                    Exception::Response(Response::not_found()),
                )]));
            });
            return;
        };

        let mut pending_exception: Option<(String, Exception)> = None;
        let mut cycle_action: Option<(String, DataValue)> = None;

        // ── Action phase ─────────────────────────────────────────
        let is_mutation = req
            .submission
            .as_ref()
            .is_some_and(|sub| sub.form_method.is_mutation())
            && matches!(req.kind, NavKind::ActionSubmission);
        if is_mutation {
            let submission = req.submission.clone().unwrap_or_else(|| {
                Submission::new(FormMethod::Post, FormData::new())
            });
            if !inner.commit_cycles(Some(&token), |state, cycles| {
                // A mutation is starting; until a loader run commits,
                // every cycle must treat current data as stale.
                cycles.mutation_pending = true;
                state.transition = Transition::submitting(
                    TransitionKind::ActionSubmission,
                    req.location.clone(),
                    submission.clone(),
                );
            }) {
                return;
            }

            let target_index = submission_target_index(&matches, &req.location.search);
            let target = &matches[target_index];
            match &target.route.action {
                None => {
                    warn!(
                        target: "router::nav",
                        route_id = %target.route.id,
                        "submission targeted a route without an action"
                    );
                    pending_exception = Some((
                        boundary_for(&matches, target_index),
                        Exception::Response(Response::method_not_allowed()),
                    ));
                }
                Some(action) => {
                    let args = HandlerArgs {
                        params: target.params.clone(),
                        request: Request::submit(req.location.request_url(), &submission),
                        signal: token.child_token(),
                        submission: Some(submission.clone()),
                    };
                    let action = action.clone();
                    let result = tokio::select! {
                        result = action.call(args) => result,
                        () = token.cancelled() => return,
                    };
                    if token.is_cancelled() {
                        return;
                    }
                    match normalize(result) {
                        Resolved::Redirect(redirect) => {
                            follow_redirect(
                                inner.clone(),
                                redirect,
                                NavKind::SubmissionRedirect,
                                Some(submission),
                                req.history_op,
                            )
                            .await;
                            return;
                        }
                        Resolved::Exception(exception) => {
                            pending_exception =
                                Some((boundary_for(&matches, target_index), exception));
                        }
                        Resolved::Data(value) => {
                            cycle_action = Some((target.route.id.clone(), value));
                        }
                    }
                }
            }

            // Install action data and switch to the reload phase.
            let reload_submission = submission.clone();
            let committed = inner.commit_cycles(Some(&token), |state, cycles| {
                if let Some((id, value)) = &cycle_action {
                    state.action_data =
                        Some(HashMap::from([(id.clone(), value.clone())]));
                    cycles.action_location = Some(req.location.request_url());
                }
                state.transition = Transition::loading(
                    TransitionKind::ActionReload,
                    req.location.clone(),
                    Some(reload_submission),
                );
            });
            if !committed {
                return;
            }
        } else {
            // ── Loader-phase transition ──────────────────────────
            let emitted = if req.revalidation {
                inner.commit(Some(&token), |state| {
                    state.revalidation = RevalidationState::Loading;
                })
            } else {
                let transition = match req.kind {
                    NavKind::LoaderSubmission => Transition::submitting(
                        TransitionKind::LoaderSubmission,
                        req.location.clone(),
                        req.submission.clone().unwrap_or_else(|| {
                            Submission::new(FormMethod::Get, FormData::new())
                        }),
                    ),
                    NavKind::NormalRedirect => Transition::loading(
                        TransitionKind::NormalRedirect,
                        req.location.clone(),
                        None,
                    ),
                    NavKind::SubmissionRedirect => Transition::loading(
                        TransitionKind::SubmissionRedirect,
                        req.location.clone(),
                        req.submission.clone(),
                    ),
                    _ => Transition::loading(
                        TransitionKind::NormalLoad,
                        req.location.clone(),
                        None,
                    ),
                };
                inner.commit(Some(&token), |state| {
                    state.transition = transition;
                })
            };
            if !emitted {
                return;
            }
        }

        // ── Loader phase ─────────────────────────────────────────
        let (current_location, current_matches, current_loader_data) = {
            let state = inner.state.lock();
            (
                state.location.clone(),
                state.matches.clone(),
                state.loader_data.clone(),
            )
        };
        let reason = if is_mutation || mutation_pending {
            LoadReason::ActionReload
        } else if req.revalidation {
            LoadReason::Revalidation
        } else {
            LoadReason::Navigation
        };
        let plan = plan_loaders(&PlanInput {
            current_matches: current_matches.as_deref(),
            next_matches: &matches,
            current_location: &current_location,
            next_location: &req.location,
            submission: req.submission.as_ref(),
            reason,
            force_reload: req.force_reload,
            pending_exception_boundary: pending_exception.as_ref().map(|(id, _)| id.as_str()),
            loader_data: &current_loader_data,
            initial_load: req.initial,
        });
        debug!(
            target: "router::nav",
            loaders = plan.to_load.len(),
            preserved = plan.preserved.len(),
            "loader plan computed"
        );

        let Some(results) = run_loader_batch(
            &token,
            &plan.to_load,
            &req.location.request_url(),
            req.submission.as_ref(),
        )
        .await
        else {
            debug!(target: "router::nav", "loader batch superseded");
            return;
        };

        // Redirects win over everything else in the batch.
        if let Some((_, Resolved::Redirect(redirect))) = results
            .iter()
            .find(|(_, resolved)| matches!(resolved, Resolved::Redirect(_)))
        {
            let (kind, submission) = if is_mutation || mutation_pending {
                (NavKind::SubmissionRedirect, req.submission.clone())
            } else {
                (NavKind::NormalRedirect, None)
            };
            follow_redirect(
                inner.clone(),
                redirect.clone(),
                kind,
                submission,
                req.history_op,
            )
            .await;
            return;
        }

        // ── Merge and commit ─────────────────────────────────────
        let mut exception = pending_exception;
        let mut new_loader_data: HashMap<String, DataValue> = HashMap::new();
        for id in &plan.preserved {
            if let Some(value) = current_loader_data.get(id) {
                new_loader_data.insert(id.clone(), value.clone());
            }
        }
        for (id, resolved) in results {
            match resolved {
                Resolved::Data(value) => {
                    new_loader_data.insert(id, value);
                }
                Resolved::Exception(thrown) => {
                    if exception.is_none() {
                        let index = matches
                            .iter()
                            .position(|m| m.route.id == id)
                            .unwrap_or(0);
                        exception = Some((boundary_for(&matches, index), thrown));
                    }
                }
                Resolved::Redirect(_) => {}
            }
        }
        if let Some((boundary, _)) = &exception {
            clear_data_at_and_below_boundary(&matches, boundary, &mut new_loader_data);
        }

        let committed = inner.commit_navigation(&token, &req, |state, _| {
            state.history_action = history_action_for(req.history_op, state.history_action);
            state.location = req.location.clone();
            state.matches = Some(matches.clone());
            state.loader_data = new_loader_data;
            state.exceptions = exception
                .take()
                .map(|(boundary, thrown)| HashMap::from([(boundary, thrown)]));
        });
        if committed {
            info!(target: "router::nav", location = %req.location, "navigation committed");
        }
    })
}

async fn follow_redirect(
    inner: Arc<RouterInner>,
    redirect: RedirectSignal,
    kind: NavKind,
    submission: Option<Submission>,
    original_op: HistoryOp,
) {
    info!(
        target: "router::nav",
        location = %redirect.location,
        status = redirect.status,
        "following redirect"
    );
    let location = Location::from_path(Path::parse(&redirect.location), Value::Null);
    run_navigation(
        inner,
        NavRequest {
            location,
            history_op: redirect_history_op(original_op),
            submission,
            kind,
            force_reload: redirect.revalidate,
            revalidation: false,
            initial: false,
        },
    )
    .await;
}

/// Run the planned loaders concurrently under the cycle token.
/// Returns `None` (discarding everything) when the cycle is cancelled.
async fn run_loader_batch(
    token: &CancellationToken,
    to_load: &[RouteMatch],
    url: &str,
    submission: Option<&Submission>,
) -> Option<Vec<(String, Resolved)>> {
    let mut handles = Vec::with_capacity(to_load.len());
    for m in to_load {
        let Some(loader) = m.route.loader.clone() else {
            continue;
        };
        let args = HandlerArgs {
            params: m.params.clone(),
            request: Request::get(url),
            signal: token.child_token(),
            submission: submission.cloned(),
        };
        let id = m.route.id.clone();
        handles.push((
            id,
            tokio::spawn(async move { normalize(loader.call(args).await) }),
        ));
    }
    let mut results = Vec::with_capacity(handles.len());
    for (id, handle) in handles {
        tokio::select! {
            joined = handle => {
                let resolved = match joined {
                    Ok(resolved) => resolved,
                    Err(err) => Resolved::Exception(Exception::Data(Value::String(
                        format!("loader panicked: {err}"),
                    ))),
                };
                results.push((id, resolved));
            }
            () = token.cancelled() => return None,
        }
    }
    if token.is_cancelled() {
        return None;
    }
    Some(results)
}

// ── Fetcher cycle ────────────────────────────────────────────────────

async fn run_fetch(inner: Arc<RouterInner>, key: String, href: String, opts: NavigateOptions) {
    let token = CancellationToken::new();
    {
        let mut cycles = inner.cycles.lock();
        if let Some(prev) = inner.fetch_controllers.insert(key.clone(), token.clone()) {
            prev.cancel();
        }
        cycles.suspended_fetchers.remove(&key);
    }
    info!(target: "router::fetch", key = %key, href = %href, "fetch started");

    let path = Path::parse(&href);
    let Some(matches) = match_routes(&inner.routes, &path.pathname) else {
        let boundary = inner.routes[0].id.clone();
        finish_fetch_with_exception(
            &inner,
            &token,
            &key,
            boundary,
            Exception::Response(Response::not_found()),
        );
        return;
    };

    let submission = opts.submission();
    let target_index = submission_target_index(&matches, &path.search);
    let target = matches[target_index].clone();
    let prior_data = inner
        .state
        .lock()
        .fetchers
        .get(&key)
        .and_then(|f| f.data.clone());

    match submission {
        Some(sub) if sub.form_method.is_mutation() => {
            run_fetch_action(inner, key, token, path, matches, target, sub, prior_data).await;
        }
        sub => {
            run_fetch_load(inner, key, token, path, matches, target, sub, prior_data).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_fetch_action(
    inner: Arc<RouterInner>,
    key: String,
    token: CancellationToken,
    path: Path,
    matches: Vec<RouteMatch>,
    target: RouteMatch,
    submission: Submission,
    prior_data: Option<DataValue>,
) {
    let committed = inner.commit_cycles(Some(&token), |state, cycles| {
        state.fetchers.insert(
            key.clone(),
            Fetcher {
                state: FetcherState::Submitting,
                kind: FetcherKind::ActionSubmission,
                data: prior_data.clone(),
                submission: Some(submission.clone()),
            },
        );
        // A mutation is in flight; until some loader run commits, every
        // cycle must treat current data as stale.
        cycles.mutation_pending = true;
    });
    if !committed {
        return;
    }

    let Some(action) = target.route.action.clone() else {
        warn!(
            target: "router::fetch",
            key = %key,
            route_id = %target.route.id,
            "fetch submission targeted a route without an action"
        );
        let boundary = boundary_for(
            &matches,
            matches
                .iter()
                .position(|m| m.route.id == target.route.id)
                .unwrap_or(0),
        );
        finish_fetch_with_exception(
            &inner,
            &token,
            &key,
            boundary,
            Exception::Response(Response::method_not_allowed()),
        );
        return;
    };

    let args = HandlerArgs {
        params: target.params.clone(),
        request: Request::submit(path.request_url(), &submission),
        signal: token.child_token(),
        submission: Some(submission.clone()),
    };
    let result = tokio::select! {
        result = action.call(args) => result,
        () = token.cancelled() => return,
    };
    if token.is_cancelled() {
        return;
    }

    match normalize(result) {
        Resolved::Redirect(redirect) => {
            let committed = inner.commit_cycles(Some(&token), |state, cycles| {
                state.fetchers.insert(
                    key.clone(),
                    Fetcher {
                        state: FetcherState::Loading,
                        kind: FetcherKind::ActionRedirect,
                        data: prior_data.clone(),
                        submission: Some(submission.clone()),
                    },
                );
                cycles
                    .suspended_fetchers
                    .insert(key.clone(), SettleMode::ClearData);
            });
            if !committed {
                return;
            }
            follow_redirect(
                inner,
                redirect,
                NavKind::SubmissionRedirect,
                Some(submission),
                HistoryOp::Replace,
            )
            .await;
        }
        Resolved::Exception(exception) => {
            let boundary = boundary_for(
                &matches,
                matches
                    .iter()
                    .position(|m| m.route.id == target.route.id)
                    .unwrap_or(0),
            );
            finish_fetch_with_exception(&inner, &token, &key, boundary, exception);
        }
        Resolved::Data(value) => {
            // Registering the suspension in the same critical section
            // as the state change: a navigation beginning after this
            // commit is guaranteed to see (and cancel) the
            // revalidation.
            let committed = inner.commit_cycles(Some(&token), |state, cycles| {
                state.fetchers.insert(
                    key.clone(),
                    Fetcher {
                        state: FetcherState::Loading,
                        kind: FetcherKind::ActionReload,
                        data: Some(value.clone()),
                        submission: Some(submission.clone()),
                    },
                );
                cycles
                    .suspended_fetchers
                    .insert(key.clone(), SettleMode::KeepData);
            });
            if !committed {
                return;
            }
            revalidate_after_fetch_action(inner, key, token, submission, value).await;
        }
    }
}

/// Post-action revalidation: re-run the *current page's* loaders — the
/// fetcher's href only targeted the action. A navigation beginning
/// while this runs aborts it and settles the fetcher at its commit.
async fn revalidate_after_fetch_action(
    inner: Arc<RouterInner>,
    key: String,
    token: CancellationToken,
    submission: Submission,
    action_value: DataValue,
) {
    let (current_location, current_matches, current_loader_data) = {
        let state = inner.state.lock();
        (
            state.location.clone(),
            state.matches.clone(),
            state.loader_data.clone(),
        )
    };
    let Some(current_matches) = current_matches else {
        // Nothing matched on the current page; settle immediately.
        finish_fetch_done(&inner, &token, &key, Some(action_value));
        return;
    };

    let plan = plan_loaders(&PlanInput {
        current_matches: Some(&current_matches),
        next_matches: &current_matches,
        current_location: &current_location,
        next_location: &current_location,
        submission: Some(&submission),
        reason: LoadReason::ActionReload,
        force_reload: false,
        pending_exception_boundary: None,
        loader_data: &current_loader_data,
        initial_load: false,
    });
    debug!(
        target: "router::fetch",
        key = %key,
        loaders = plan.to_load.len(),
        "post-action revalidation"
    );

    let Some(results) = run_loader_batch(
        &token,
        &plan.to_load,
        &current_location.request_url(),
        Some(&submission),
    )
    .await
    else {
        // Superseded by a navigation; it settles the fetcher.
        return;
    };

    if let Some((_, Resolved::Redirect(redirect))) = results
        .iter()
        .find(|(_, resolved)| matches!(resolved, Resolved::Redirect(_)))
    {
        follow_redirect(
            inner.clone(),
            redirect.clone(),
            NavKind::SubmissionRedirect,
            Some(submission),
            HistoryOp::Replace,
        )
        .await;
        return;
    }

    let mut exception: Option<(String, Exception)> = None;
    let mut merged = current_loader_data.clone();
    for (id, resolved) in results {
        match resolved {
            Resolved::Data(value) => {
                merged.insert(id, value);
            }
            Resolved::Exception(thrown) => {
                if exception.is_none() {
                    let index = current_matches
                        .iter()
                        .position(|m| m.route.id == id)
                        .unwrap_or(0);
                    exception = Some((boundary_for(&current_matches, index), thrown));
                }
            }
            Resolved::Redirect(_) => {}
        }
    }
    if let Some((boundary, _)) = &exception {
        clear_data_at_and_below_boundary(&current_matches, boundary, &mut merged);
    }

    let committed = inner.commit_cycles(Some(&token), |state, cycles| {
        state.loader_data = merged;
        if let Some((boundary, thrown)) = exception.take() {
            state
                .exceptions
                .get_or_insert_with(HashMap::new)
                .insert(boundary, thrown);
        }
        state.fetchers.insert(
            key.clone(),
            Fetcher {
                state: FetcherState::Idle,
                kind: FetcherKind::Done,
                data: Some(action_value.clone()),
                submission: None,
            },
        );
        cycles.suspended_fetchers.remove(&key);
        cycles.mutation_pending = false;
        inner.fetch_controllers.remove(&key);
    });
    if committed {
        info!(target: "router::fetch", key = %key, "fetch action cycle complete");
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_fetch_load(
    inner: Arc<RouterInner>,
    key: String,
    token: CancellationToken,
    path: Path,
    matches: Vec<RouteMatch>,
    target: RouteMatch,
    submission: Option<Submission>,
    prior_data: Option<DataValue>,
) {
    let (fetcher_state, kind) = match &submission {
        Some(_) => (FetcherState::Submitting, FetcherKind::LoaderSubmission),
        None => (FetcherState::Loading, FetcherKind::NormalLoad),
    };
    let committed = inner.commit(Some(&token), |state| {
        state.fetchers.insert(
            key.clone(),
            Fetcher {
                state: fetcher_state,
                kind,
                data: prior_data.clone(),
                submission: submission.clone(),
            },
        );
    });
    if !committed {
        return;
    }

    let Some(loader) = target.route.loader.clone() else {
        warn!(
            target: "router::fetch",
            key = %key,
            route_id = %target.route.id,
            "fetch targeted a route without a loader"
        );
        let boundary = boundary_for(
            &matches,
            matches
                .iter()
                .position(|m| m.route.id == target.route.id)
                .unwrap_or(0),
        );
        finish_fetch_with_exception(
            &inner,
            &token,
            &key,
            boundary,
            Exception::Response(Response::not_found()),
        );
        return;
    };

    let args = HandlerArgs {
        params: target.params.clone(),
        request: Request::get(path.request_url()),
        signal: token.child_token(),
        submission: submission.clone(),
    };
    let result = tokio::select! {
        result = loader.call(args) => result,
        () = token.cancelled() => return,
    };
    if token.is_cancelled() {
        return;
    }

    match normalize(result) {
        Resolved::Redirect(redirect) => {
            finish_fetch_done(&inner, &token, &key, prior_data);
            follow_redirect(inner, redirect, NavKind::NormalRedirect, None, HistoryOp::Replace)
                .await;
        }
        Resolved::Exception(exception) => {
            let boundary = boundary_for(
                &matches,
                matches
                    .iter()
                    .position(|m| m.route.id == target.route.id)
                    .unwrap_or(0),
            );
            finish_fetch_with_exception(&inner, &token, &key, boundary, exception);
        }
        Resolved::Data(value) => {
            finish_fetch_done(&inner, &token, &key, Some(value));
        }
    }
}

/// Settle a fetcher as `idle/done`, leaving navigation loader data
/// untouched.
fn finish_fetch_done(
    inner: &RouterInner,
    token: &CancellationToken,
    key: &str,
    data: Option<DataValue>,
) {
    inner.commit_cycles(Some(token), |state, _| {
        state.fetchers.insert(
            key.to_string(),
            Fetcher {
                state: FetcherState::Idle,
                kind: FetcherKind::Done,
                data,
                submission: None,
            },
        );
        inner.fetch_controllers.remove(key);
    });
}

/// Settle a fetcher and record its exception at the boundary.
fn finish_fetch_with_exception(
    inner: &RouterInner,
    token: &CancellationToken,
    key: &str,
    boundary: String,
    exception: Exception,
) {
    inner.commit_cycles(Some(token), |state, _| {
        state.loader_data.remove(&boundary);
        state
            .exceptions
            .get_or_insert_with(HashMap::new)
            .insert(boundary, exception);
        state.fetchers.insert(
            key.to_string(),
            Fetcher {
                state: FetcherState::Idle,
                kind: FetcherKind::Done,
                data: None,
                submission: None,
            },
        );
        inner.fetch_controllers.remove(key);
    });
}
