//! Route records and tree normalization.
//!
//! Callers describe their app as a tree of [`Route`]s. Construction
//! walks that tree depth-first into a parallel tree of [`DataRoute`]s:
//! every node gets a stable id (caller-supplied or generated from tree
//! position), duplicates are rejected, and the input tree is left
//! untouched.

use crate::handler::{Action, Loader, ShouldReload};
use crate::RouterError;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A user-supplied route definition.
///
/// `path` segments may be static (`"tasks"`), params (`":id"`), or a
/// trailing splat (`"*"`). An `index` route matches its parent's URL
/// exactly, when no child segment remains.
#[derive(Clone, Default)]
pub struct Route {
    /// Stable id; generated from tree position when absent.
    pub id: Option<String>,
    /// Path pattern relative to the parent route.
    pub path: Option<String>,
    /// Marks an index route.
    pub index: bool,
    /// Nested child routes.
    pub children: Vec<Route>,
    /// Data reader for this route.
    pub loader: Option<Arc<dyn Loader>>,
    /// Mutation handler for this route.
    pub action: Option<Arc<dyn Action>>,
    /// Optional veto over loader reruns.
    pub should_reload: Option<Arc<dyn ShouldReload>>,
    /// Whether this route catches exceptions from itself and
    /// descendants.
    pub exception_boundary: bool,
}

impl Route {
    /// Route matching the given path pattern.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Index route (matches when no child segment remains).
    pub fn index() -> Self {
        Self {
            index: true,
            ..Self::default()
        }
    }

    /// Pathless layout route; matches wherever a child does.
    pub fn layout() -> Self {
        Self::default()
    }

    /// Set an explicit id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach a loader.
    pub fn with_loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Attach an action.
    pub fn with_action(mut self, action: impl Action + 'static) -> Self {
        self.action = Some(Arc::new(action));
        self
    }

    /// Attach a reload veto.
    pub fn with_should_reload(mut self, should_reload: impl ShouldReload + 'static) -> Self {
        self.should_reload = Some(Arc::new(should_reload));
        self
    }

    /// Mark this route as an exception boundary.
    pub fn with_exception_boundary(mut self) -> Self {
        self.exception_boundary = true;
        self
    }

    /// Set child routes.
    pub fn with_children(mut self, children: Vec<Route>) -> Self {
        self.children = children;
        self
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("index", &self.index)
            .field("children", &self.children.len())
            .field("loader", &self.loader.is_some())
            .field("action", &self.action.is_some())
            .field("exception_boundary", &self.exception_boundary)
            .finish()
    }
}

/// Normalized route node: same shape as [`Route`] with a guaranteed id
/// and `Arc`-shared children so matches can reference nodes cheaply.
pub struct DataRoute {
    /// Stable unique id within the tree.
    pub id: String,
    /// Path pattern relative to the parent route.
    pub path: Option<String>,
    /// Marks an index route.
    pub index: bool,
    /// Nested child routes.
    pub children: Vec<Arc<DataRoute>>,
    /// Data reader for this route.
    pub loader: Option<Arc<dyn Loader>>,
    /// Mutation handler for this route.
    pub action: Option<Arc<dyn Action>>,
    /// Optional veto over loader reruns.
    pub should_reload: Option<Arc<dyn ShouldReload>>,
    /// Whether this route catches exceptions from itself and
    /// descendants.
    pub exception_boundary: bool,
}

impl DataRoute {
    /// Returns `true` if the route declares a loader.
    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }

    /// Returns `true` if the route declares an action.
    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }
}

impl fmt::Debug for DataRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataRoute")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("index", &self.index)
            .field("children", &self.children)
            .field("loader", &self.loader.is_some())
            .field("action", &self.action.is_some())
            .field("exception_boundary", &self.exception_boundary)
            .finish()
    }
}

/// Walk the user tree into a parallel normalized tree.
///
/// Generated ids are tree-position strings: the second child of the
/// first top-level route becomes `"0-1"`. Fails on an empty top-level
/// list or any duplicate id.
pub fn normalize_routes(routes: &[Route]) -> Result<Vec<Arc<DataRoute>>, RouterError> {
    if routes.is_empty() {
        return Err(RouterError::EmptyRoutes);
    }
    let mut seen = HashSet::new();
    routes
        .iter()
        .enumerate()
        .map(|(i, route)| normalize_one(route, &i.to_string(), &mut seen))
        .collect()
}

fn normalize_one(
    route: &Route,
    tree_position: &str,
    seen: &mut HashSet<String>,
) -> Result<Arc<DataRoute>, RouterError> {
    let id = route.id.clone().unwrap_or_else(|| tree_position.to_string());
    if !seen.insert(id.clone()) {
        return Err(RouterError::DuplicateRouteId { id });
    }
    let children = route
        .children
        .iter()
        .enumerate()
        .map(|(i, child)| normalize_one(child, &format!("{tree_position}-{i}"), seen))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Arc::new(DataRoute {
        id,
        path: route.path.clone(),
        index: route.index,
        children,
        loader: route.loader.clone(),
        action: route.action.clone(),
        should_reload: route.should_reload.clone(),
        exception_boundary: route.exception_boundary,
    }))
}
