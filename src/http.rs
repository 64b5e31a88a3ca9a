//! Request/response shapes handed to loaders and actions.
//!
//! These are fabricated records carrying URL and submission metadata —
//! the router never performs network I/O. A loader that wants to call
//! out does so with its own client; the [`Request`] here only tells it
//! what was asked for.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Header carried on a redirect response to force a full loader
/// revalidation on the follow-up navigation.
pub const REVALIDATE_HEADER: &str = "x-remix-revalidate";

// ── Form method / encoding ───────────────────────────────────────────

/// HTTP verb of a submission. `Get` routes to loaders, everything else
/// routes to the leaf action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormMethod {
    /// Loader submission.
    Get,
    /// Action submission.
    Post,
    /// Action submission.
    Put,
    /// Action submission.
    Patch,
    /// Action submission.
    Delete,
}

impl FormMethod {
    /// Parse a method string, case-insensitively. Unknown verbs map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "patch" => Some(Self::Patch),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Lowercased wire form (`"get"`, `"post"`, …).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Patch => "patch",
            Self::Delete => "delete",
        }
    }

    /// Returns `true` for verbs that dispatch to an action.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl fmt::Display for FormMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default submission encoding.
pub const DEFAULT_ENC_TYPE: &str = "application/x-www-form-urlencoded";

// ── Form data ────────────────────────────────────────────────────────

/// Ordered form fields for a submission.
///
/// Field order is preserved; repeated names are allowed, matching how
/// form encodings behave on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormData(Vec<(String, String)>);

impl FormData {
    /// Empty form.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build from name/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Append a field.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the form has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A submission: method, encoding, and form payload, carried together
/// on transitions, fetchers, and handler args.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Lowercased verb.
    pub form_method: FormMethod,
    /// Encoding; defaults to [`DEFAULT_ENC_TYPE`].
    pub form_enc_type: String,
    /// The submitted fields.
    pub form_data: FormData,
}

impl Submission {
    /// Build a submission with the default encoding.
    pub fn new(form_method: FormMethod, form_data: FormData) -> Self {
        Self {
            form_method,
            form_enc_type: DEFAULT_ENC_TYPE.to_string(),
            form_data,
        }
    }

    /// Override the encoding.
    pub fn with_enc_type(mut self, enc_type: impl Into<String>) -> Self {
        self.form_enc_type = enc_type.into();
        self
    }
}

// ── Request ──────────────────────────────────────────────────────────

/// The request handed to a loader or action.
///
/// `url` is the destination including `search` and excluding `hash`.
/// For submissions the form payload rides along as the body.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Destination URL (pathname plus search, no hash).
    pub url: String,
    /// Verb; `Get` for loads, the submission verb for actions.
    pub method: FormMethod,
    /// Submission payload, when the request carries one.
    pub body: Option<FormData>,
}

impl Request {
    /// A plain GET request for `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: FormMethod::Get,
            body: None,
        }
    }

    /// A submission request for `url`.
    pub fn submit(url: impl Into<String>, submission: &Submission) -> Self {
        Self {
            url: url.into(),
            method: submission.form_method,
            body: Some(submission.form_data.clone()),
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────

/// A response value a loader or action may return or throw.
///
/// Statuses in `300..=399` with a `location` header are redirects and
/// drive a new navigation; `>= 400` is routed to the nearest exception
/// boundary; anything else is plain data.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP-ish status code.
    pub status: u16,
    /// Headers, keyed by lowercased name.
    pub headers: HashMap<String, String>,
    /// Optional body payload.
    pub body: Value,
}

impl Response {
    /// A bare response with the given status and no body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Value::Null,
        }
    }

    /// A redirect response pointing at `location`.
    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self::new(status).with_header("location", location)
    }

    /// Synthesized response for an unmatched URL.
    pub fn not_found() -> Self {
        Self::new(404)
    }

    /// Synthesized response for a submission with no matching action.
    pub fn method_not_allowed() -> Self {
        Self::new(405)
    }

    /// Attach a header. Names are lowercased.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Attach a body payload.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Header lookup by lowercased name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns `true` when the status/location pair marks a redirect.
    pub fn is_redirect(&self) -> bool {
        (300..=399).contains(&self.status) && self.header("location").is_some()
    }
}
