//! # Planner — which loaders run for a transition
//!
//! ## Responsibility
//! Given the current and next match lists and the reason for the
//! transition, decide which loaders run, which matched routes keep
//! their current data, and which are pruned below a pending exception
//! boundary.
//!
//! ## Guarantees
//! - Pure: reads inputs, produces a plan, touches no router state
//! - New matches and params changes always load — the reload veto is
//!   never consulted for them, nor for first hydration
//! - Forced revalidation loads every matched loader, veto ignored
//!
//! ## NOT Responsible For
//! - Running loaders (see: `router`)
//! - Boundary selection for thrown values happens here only as
//!   pruning; recording exceptions is the engine's job

use crate::handler::{DataValue, ReloadArgs};
use crate::history::Location;
use crate::http::Submission;
use crate::matching::RouteMatch;
use std::collections::{HashMap, HashSet};

/// Why loaders are being (re)run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadReason {
    /// Location-changing navigation (plain load, loader submission,
    /// redirect follow-up).
    Navigation,
    /// Explicit or fetcher-triggered revalidation of the current page.
    Revalidation,
    /// Post-action loader run within a submission navigation.
    ActionReload,
}

/// Planner inputs for one transition.
pub(crate) struct PlanInput<'a> {
    pub current_matches: Option<&'a [RouteMatch]>,
    pub next_matches: &'a [RouteMatch],
    pub current_location: &'a Location,
    pub next_location: &'a Location,
    pub submission: Option<&'a Submission>,
    pub reason: LoadReason,
    /// Forces every matched loader to run, ignoring reload vetoes.
    pub force_reload: bool,
    /// Boundary id of an exception recorded earlier in this cycle;
    /// loaders strictly below it are skipped.
    pub pending_exception_boundary: Option<&'a str>,
    pub loader_data: &'a HashMap<String, DataValue>,
    /// Set during the hydration load: routes without data must load.
    pub initial_load: bool,
}

/// The planner's decision.
#[derive(Debug, Default)]
pub(crate) struct LoadPlan {
    /// Matches whose loaders run, root→leaf.
    pub to_load: Vec<RouteMatch>,
    /// Kept match ids whose current loader data carries over.
    pub preserved: HashSet<String>,
}

/// Decide which loaders run. See the loader-selection rules in the
/// module docs of [`crate::router`].
pub(crate) fn plan_loaders(input: &PlanInput<'_>) -> LoadPlan {
    let boundary_index = input.pending_exception_boundary.and_then(|id| {
        input
            .next_matches
            .iter()
            .position(|m| m.route.id == id)
    });

    let mut plan = LoadPlan::default();
    for (i, m) in input.next_matches.iter().enumerate() {
        if let Some(boundary) = boundary_index {
            if i > boundary {
                continue;
            }
        }
        if !m.route.has_loader() {
            continue;
        }

        let current = input
            .current_matches
            .and_then(|matches| matches.iter().find(|c| c.route.id == m.route.id));
        let is_new = current.is_none();
        let params_changed = current.is_some_and(|c| c.params != m.params);
        let needs_hydration = input.initial_load && !input.loader_data.contains_key(&m.route.id);

        // The veto never applies to these.
        if is_new || params_changed || needs_hydration {
            plan.to_load.push(m.clone());
            continue;
        }

        let search_changed = input.current_location.search != input.next_location.search;
        let default_load = input.force_reload
            || search_changed
            || matches!(input.reason, LoadReason::Revalidation | LoadReason::ActionReload);

        if !default_load {
            plan.preserved.insert(m.route.id.clone());
            continue;
        }
        if !input.force_reload {
            if let Some(veto) = &m.route.should_reload {
                let reload = veto.call(ReloadArgs {
                    current_url: input.current_location.path(),
                    next_url: input.next_location.path(),
                    params: m.params.clone(),
                    submission: input.submission.cloned(),
                });
                if !reload {
                    plan.preserved.insert(m.route.id.clone());
                    continue;
                }
            }
        }
        plan.to_load.push(m.clone());
    }
    plan
}

/// Boundary id for a value thrown at match `from`: the deepest match
/// at or above it that declares a boundary, else the root match.
pub(crate) fn boundary_for(matches: &[RouteMatch], from: usize) -> String {
    matches[..=from.min(matches.len() - 1)]
        .iter()
        .rev()
        .find(|m| m.route.exception_boundary)
        .unwrap_or(&matches[0])
        .route
        .id
        .clone()
}
