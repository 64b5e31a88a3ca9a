//! # Matching — URL → ordered route matches
//!
//! ## Responsibility
//! Resolve a pathname against the normalized route tree into an
//! ordered root→leaf list of [`RouteMatch`]es, and decide which match
//! a submission targets (the `?index` disambiguation).
//!
//! ## Guarantees
//! - Deterministic: same tree and pathname always produce the same
//!   matches
//! - Ordered: matches run parent-first, leaf last
//! - Pure: no state is read or written; the tree is only borrowed
//!
//! ## NOT Responsible For
//! - Deciding which matched loaders run (see: `plan`)
//! - URL parsing beyond pathname segments (see: `history`)

use crate::route::DataRoute;
use std::collections::HashMap;
use std::sync::Arc;

/// One matched route with its resolved params and URL position.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The matched route node.
    pub route: Arc<DataRoute>,
    /// Params captured from the URL for this match and its ancestors.
    pub params: HashMap<String, String>,
    /// Portion of the URL matched from the root through this route.
    pub pathname: String,
    /// `pathname` minus any trailing splat portion.
    pub pathname_base: String,
}

/// Match a pathname against the tree. Returns the root→leaf match
/// list, or `None` when nothing matches (a 404).
pub fn match_routes(routes: &[Arc<DataRoute>], pathname: &str) -> Option<Vec<RouteMatch>> {
    let segments: Vec<&str> = pathname.split('/').filter(|s| !s.is_empty()).collect();
    routes
        .iter()
        .find_map(|route| match_one(route, &segments, "/", &HashMap::new()))
}

fn match_one(
    route: &Arc<DataRoute>,
    remaining: &[&str],
    base: &str,
    inherited: &HashMap<String, String>,
) -> Option<Vec<RouteMatch>> {
    let own: Vec<&str> = route
        .path
        .as_deref()
        .unwrap_or("")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let mut params = inherited.clone();
    let mut consumed = 0usize;
    let mut consumed_before_splat = None;
    for segment in &own {
        if *segment == "*" {
            params.insert("*".to_string(), remaining[consumed..].join("/"));
            consumed_before_splat = Some(consumed);
            consumed = remaining.len();
            break;
        }
        let Some(actual) = remaining.get(consumed) else {
            return None;
        };
        if let Some(name) = segment.strip_prefix(':') {
            params.insert(name.to_string(), (*actual).to_string());
        } else if segment != actual {
            return None;
        }
        consumed += 1;
    }

    let rest = &remaining[consumed..];
    let pathname = join_segments(base, &remaining[..consumed]);
    let pathname_base = match consumed_before_splat {
        Some(n) => join_segments(base, &remaining[..n]),
        None => pathname.clone(),
    };
    let self_match = RouteMatch {
        route: route.clone(),
        params: params.clone(),
        pathname: pathname.clone(),
        pathname_base,
    };

    if rest.is_empty() {
        if route.index {
            return Some(vec![self_match]);
        }
        // Prefer an index descendant (possibly under pathless layouts).
        for child in &route.children {
            if let Some(tail) = match_index_chain(child, &pathname, &params) {
                let mut matches = vec![self_match];
                matches.extend(tail);
                return Some(matches);
            }
        }
        // A route with its own path may stand alone as the leaf.
        if !own.is_empty() || route.path.is_some() {
            return Some(vec![self_match]);
        }
        return None;
    }

    if route.index {
        return None;
    }
    for child in &route.children {
        if let Some(tail) = match_one(child, rest, &pathname, &params) {
            let mut matches = vec![self_match];
            matches.extend(tail);
            return Some(matches);
        }
    }
    None
}

/// Descend through pathless layouts to an index route consuming no
/// segments.
fn match_index_chain(
    route: &Arc<DataRoute>,
    base: &str,
    params: &HashMap<String, String>,
) -> Option<Vec<RouteMatch>> {
    let consumes_segments = route
        .path
        .as_deref()
        .is_some_and(|p| p.split('/').any(|s| !s.is_empty()));
    if consumes_segments {
        return None;
    }
    let self_match = RouteMatch {
        route: route.clone(),
        params: params.clone(),
        pathname: base.to_string(),
        pathname_base: base.to_string(),
    };
    if route.index {
        return Some(vec![self_match]);
    }
    for child in &route.children {
        if let Some(tail) = match_index_chain(child, base, params) {
            let mut matches = vec![self_match];
            matches.extend(tail);
            return Some(matches);
        }
    }
    None
}

fn join_segments(base: &str, segments: &[&str]) -> String {
    if segments.is_empty() {
        return base.to_string();
    }
    let prefix = if base == "/" { "" } else { base };
    format!("{}/{}", prefix, segments.join("/"))
}

// ── Submission targeting ─────────────────────────────────────────────

/// Returns `true` when the search string carries a bare `index`
/// parameter (`?index`, value empty).
pub fn has_naked_index_param(search: &str) -> bool {
    search
        .trim_start_matches('?')
        .split('&')
        .any(|pair| pair == "index" || pair == "index=")
}

/// Index of the match a submission dispatches to.
///
/// Actions target the leaf, except that a leaf index route is only
/// targeted when the URL carries a bare `index` query parameter;
/// otherwise the submission dispatches to its layout parent.
pub fn submission_target_index(matches: &[RouteMatch], search: &str) -> usize {
    let leaf = matches.len() - 1;
    if matches[leaf].route.index && !has_naked_index_param(search) {
        leaf.saturating_sub(1)
    } else {
        leaf
    }
}
