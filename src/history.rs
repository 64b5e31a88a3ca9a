//! # History — location records and the session-history seam
//!
//! ## Responsibility
//! Define `Location`/`Path`, the `HistoryAction` vocabulary, the
//! `History` trait the router consumes, and an in-process
//! `MemoryHistory` for tests and embedders without a browser stack.
//!
//! ## Guarantees
//! - Deterministic: parsing the same path string always yields the
//!   same `Path`
//! - Stable keys: a `Location` key is assigned once and preserved by
//!   the transition that lands it
//! - Loop-free: `push`/`replace` never notify the listener; only
//!   `go` (external traversal) does, with action `POP`
//!
//! ## NOT Responsible For
//! - Route matching (see: `matching`)
//! - Deciding when to push vs replace (see: `router`)

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ── Actions ──────────────────────────────────────────────────────────

/// How the current location was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    /// External traversal (back/forward, `go`).
    Pop,
    /// A new entry was appended.
    Push,
    /// The current entry was overwritten.
    Replace,
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pop => write!(f, "POP"),
            Self::Push => write!(f, "PUSH"),
            Self::Replace => write!(f, "REPLACE"),
        }
    }
}

// ── Path / Location ──────────────────────────────────────────────────

/// The three URL pieces the router cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    /// Leading-slash pathname (`"/users/3"`).
    pub pathname: String,
    /// Query string including its `?`, or empty.
    pub search: String,
    /// Fragment including its `#`, or empty.
    pub hash: String,
}

impl Path {
    /// Split a path string into pathname/search/hash.
    ///
    /// `"/a/b?q=1#top"` → `{ pathname: "/a/b", search: "?q=1", hash: "#top" }`.
    /// A missing piece parses to the empty string; an empty input
    /// parses to pathname `"/"`.
    pub fn parse(raw: &str) -> Self {
        let (rest, hash) = match raw.find('#') {
            Some(i) => (&raw[..i], raw[i..].to_string()),
            None => (raw, String::new()),
        };
        let (pathname, search) = match rest.find('?') {
            Some(i) => (&rest[..i], rest[i..].to_string()),
            None => (rest, String::new()),
        };
        let pathname = if pathname.is_empty() {
            "/".to_string()
        } else {
            pathname.to_string()
        };
        Self {
            pathname,
            search,
            hash,
        }
    }

    /// The URL for handler requests: pathname plus search, no hash.
    pub fn request_url(&self) -> String {
        format!("{}{}", self.pathname, self.search)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.pathname, self.search, self.hash)
    }
}

/// An entry in the history stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Leading-slash pathname.
    pub pathname: String,
    /// Query string including its `?`, or empty.
    pub search: String,
    /// Fragment including its `#`, or empty.
    pub hash: String,
    /// Arbitrary state attached by the caller at navigation time.
    pub state: Value,
    /// Stable opaque key assigned on creation.
    pub key: String,
}

impl Location {
    /// Build a location from a parsed path with a fresh key.
    pub fn from_path(path: Path, state: Value) -> Self {
        Self {
            pathname: path.pathname,
            search: path.search,
            hash: path.hash,
            state,
            key: new_location_key(),
        }
    }

    /// The path portion of this location.
    pub fn path(&self) -> Path {
        Path {
            pathname: self.pathname.clone(),
            search: self.search.clone(),
            hash: self.hash.clone(),
        }
    }

    /// Pathname plus search — what loaders see as the request URL.
    pub fn request_url(&self) -> String {
        format!("{}{}", self.pathname, self.search)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.pathname, self.search, self.hash)
    }
}

/// Fresh opaque location key.
pub(crate) fn new_location_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ── History trait ────────────────────────────────────────────────────

/// Identifier for a registered history listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Listener invoked when the history moves on its own (POP).
pub type HistoryListener = Arc<dyn Fn(HistoryAction, Location) + Send + Sync>;

/// The session-history seam the router consumes.
///
/// Implementations must not notify listeners from `push`/`replace` —
/// the router drives those at commit time. Only externally initiated
/// traversal (`go`, browser back/forward) notifies, with `POP`.
pub trait History: Send + Sync {
    /// Action that produced the current location.
    fn action(&self) -> HistoryAction;

    /// The current location.
    fn location(&self) -> Location;

    /// Append an entry. Does not notify listeners.
    fn push(&self, location: &Location);

    /// Overwrite the current entry. Does not notify listeners.
    fn replace(&self, location: &Location);

    /// Traverse by `delta` entries and notify listeners with `POP`.
    fn go(&self, delta: isize);

    /// Render a location as an href string.
    fn create_href(&self, location: &Location) -> String;

    /// Register a listener; returns an id usable with [`History::unlisten`].
    fn listen(&self, listener: HistoryListener) -> ListenerId;

    /// Remove a previously registered listener.
    fn unlisten(&self, id: ListenerId);
}

// ── Memory history ───────────────────────────────────────────────────

struct MemoryHistoryInner {
    entries: Vec<Location>,
    index: usize,
    action: HistoryAction,
    listeners: HashMap<u64, HistoryListener>,
}

/// In-process history over an entry stack.
pub struct MemoryHistory {
    inner: Mutex<MemoryHistoryInner>,
    next_listener_id: AtomicU64,
}

impl MemoryHistory {
    /// History with a single `/` entry.
    pub fn new() -> Self {
        Self::with_entries(&["/"])
    }

    /// History seeded from path strings; the last entry is current.
    /// An empty slice falls back to `["/"]`.
    pub fn with_entries(initial: &[&str]) -> Self {
        let entries: Vec<Location> = if initial.is_empty() {
            vec![Location::from_path(Path::parse("/"), Value::Null)]
        } else {
            initial
                .iter()
                .map(|p| Location::from_path(Path::parse(p), Value::Null))
                .collect()
        };
        let index = entries.len() - 1;
        Self {
            inner: Mutex::new(MemoryHistoryInner {
                entries,
                index,
                action: HistoryAction::Pop,
                listeners: HashMap::new(),
            }),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Number of entries currently on the stack.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` if the stack is empty. It never is in practice.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current index into the entry stack.
    pub fn index(&self) -> usize {
        self.inner.lock().index
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl History for MemoryHistory {
    fn action(&self) -> HistoryAction {
        self.inner.lock().action
    }

    fn location(&self) -> Location {
        let inner = self.inner.lock();
        inner.entries[inner.index].clone()
    }

    fn push(&self, location: &Location) {
        let mut inner = self.inner.lock();
        let at = inner.index + 1;
        inner.entries.truncate(at);
        inner.entries.push(location.clone());
        inner.index = at;
        inner.action = HistoryAction::Push;
    }

    fn replace(&self, location: &Location) {
        let mut inner = self.inner.lock();
        let at = inner.index;
        inner.entries[at] = location.clone();
        inner.action = HistoryAction::Replace;
    }

    fn go(&self, delta: isize) {
        let (location, listeners) = {
            let mut inner = self.inner.lock();
            let target = inner.index as isize + delta;
            let target = target.clamp(0, inner.entries.len() as isize - 1) as usize;
            inner.index = target;
            inner.action = HistoryAction::Pop;
            let listeners: Vec<HistoryListener> = inner.listeners.values().cloned().collect();
            (inner.entries[target].clone(), listeners)
        };
        for listener in listeners {
            listener(HistoryAction::Pop, location.clone());
        }
    }

    fn create_href(&self, location: &Location) -> String {
        format!("{}{}{}", location.pathname, location.search, location.hash)
    }

    fn listen(&self, listener: HistoryListener) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().listeners.insert(id, listener);
        ListenerId(id)
    }

    fn unlisten(&self, id: ListenerId) {
        self.inner.lock().listeners.remove(&id.0);
    }
}
