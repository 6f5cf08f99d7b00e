//! Request routing.
//!
//! Patterns are colon-separated sequences of literal tokens and `<name>`
//! placeholders, e.g. `host-serial:<serial>:kill`. A request matches when
//! segment counts agree, literals compare equal, and every placeholder
//! captures a non-empty segment. Among matches the route with the most
//! literal segments wins; remaining ties go to the earliest registration.
//! User routes are consulted before the built-in tier, so embedders can
//! override any built-in service.
//!
//! The dispatching session is installed in a task-local slot for the
//! duration of the handler; `current_session()` retrieves it.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::debug;

use radb_core::error::Result;

use crate::session::SessionHandle;

tokio::task_local! {
    static CURRENT_SESSION: SessionHandle;
}

/// The session whose request is being dispatched.
///
/// # Panics
///
/// Panics when called outside a request handler.
pub fn current_session() -> SessionHandle {
    try_current_session().expect("current_session() called outside a request handler")
}

/// Non-panicking variant of [`current_session`].
pub fn try_current_session() -> Option<SessionHandle> {
    CURRENT_SESSION.try_with(|s| s.clone()).ok()
}

// =============================================================================
// Responses
// =============================================================================

/// Post-response connection fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Close the connection after the response.
    #[default]
    Close,
    /// Loop for another request on the same connection.
    KeepAlive,
    /// The handler consumed the stream; the engine writes nothing more.
    Bidirectional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Okay(Option<Bytes>),
    Fail(Bytes),
    /// The handler wrote (or will write) its own bytes.
    Silent,
}

/// What a handler tells the engine to send, and what happens to the
/// connection afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    reply: Reply,
    disposition: Disposition,
    raw: bool,
}

impl Response {
    /// Bare `OKAY`.
    pub fn ok() -> Self {
        Self {
            reply: Reply::Okay(None),
            disposition: Disposition::Close,
            raw: false,
        }
    }

    /// `OKAY` with a length-prefixed body.
    pub fn ok_with(body: impl Into<Bytes>) -> Self {
        Self {
            reply: Reply::Okay(Some(body.into())),
            disposition: Disposition::Close,
            raw: false,
        }
    }

    /// `FAIL` with a message.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            reply: Reply::Fail(Bytes::from(message.into().into_bytes())),
            disposition: Disposition::Close,
            raw: false,
        }
    }

    /// Nothing; the handler already owns the response bytes.
    pub fn silent() -> Self {
        Self {
            reply: Reply::Silent,
            disposition: Disposition::Close,
            raw: false,
        }
    }

    /// Nothing, and the handler consumed the stream bidirectionally.
    pub fn detached() -> Self {
        Self {
            reply: Reply::Silent,
            disposition: Disposition::Bidirectional,
            raw: false,
        }
    }

    /// Keep the connection open for another request.
    pub fn keep_alive(mut self) -> Self {
        self.disposition = Disposition::KeepAlive;
        self
    }

    /// Send the body verbatim after `OKAY`, without a length prefix.
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }
}

// =============================================================================
// Patterns and handlers
// =============================================================================

/// Captured placeholder values, by name.
#[derive(Debug, Clone, Default)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Placeholder value, panicking on a name absent from the pattern.
    /// Registration guarantees the names line up, so handlers use this.
    pub fn required(&self, name: &str) -> &str {
        self.get(name)
            .unwrap_or_else(|| panic!("no placeholder named {name:?} in matched pattern"))
    }
}

type Handler = Arc<dyn Fn(Params) -> BoxFuture<'static, Response> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

struct Route {
    pattern: String,
    segments: Vec<Segment>,
    literal_count: usize,
    handler: Handler,
}

fn compile(pattern: &str) -> Vec<Segment> {
    pattern
        .split(':')
        .map(|seg| {
            if seg.len() >= 2 && seg.starts_with('<') && seg.ends_with('>') {
                Segment::Placeholder(seg[1..seg.len() - 1].to_string())
            } else {
                Segment::Literal(seg.to_string())
            }
        })
        .collect()
}

fn match_segments(segments: &[Segment], request: &[&str]) -> Option<Params> {
    if segments.len() != request.len() {
        return None;
    }
    let mut params = Vec::new();
    for (seg, value) in segments.iter().zip(request) {
        match seg {
            Segment::Literal(lit) => {
                if lit != value {
                    return None;
                }
            }
            Segment::Placeholder(name) => {
                if value.is_empty() {
                    return None;
                }
                params.push((name.clone(), (*value).to_string()));
            }
        }
    }
    Some(Params(params))
}

// =============================================================================
// Router
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    User,
    Builtin,
}

/// Route table. Built once before serving; read-only afterwards.
#[derive(Default)]
pub struct Router {
    user: Vec<Route>,
    builtin: Vec<Route>,
    builtin_scope: bool,
}

impl Router {
    pub fn new() -> Self {
        Self {
            user: Vec::new(),
            builtin: Vec::new(),
            builtin_scope: false,
        }
    }

    /// Register a handler for a pattern.
    pub fn route<F, Fut>(&mut self, pattern: &str, handler: F)
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let tier = if self.builtin_scope {
            Tier::Builtin
        } else {
            Tier::User
        };
        self.add(tier, pattern, handler);
    }

    /// Run `f` with registrations landing in the built-in tier, which is
    /// consulted only when no user route matches.
    pub(crate) fn with_builtin_scope(&mut self, f: impl FnOnce(&mut Router)) {
        self.builtin_scope = true;
        f(self);
        self.builtin_scope = false;
    }

    fn add<F, Fut>(&mut self, tier: Tier, pattern: &str, handler: F)
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let segments = compile(pattern);
        let literal_count = segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        let route = Route {
            pattern: pattern.to_string(),
            segments,
            literal_count,
            handler: Arc::new(move |params| Box::pin(handler(params))),
        };
        match tier {
            Tier::User => self.user.push(route),
            Tier::Builtin => self.builtin.push(route),
        }
    }

    fn resolve(&self, request: &str) -> Option<(&Route, Params)> {
        let segments: Vec<&str> = request.split(':').collect();
        Self::resolve_tier(&self.user, &segments)
            .or_else(|| Self::resolve_tier(&self.builtin, &segments))
    }

    fn resolve_tier<'a>(routes: &'a [Route], segments: &[&str]) -> Option<(&'a Route, Params)> {
        let mut best: Option<(&Route, Params)> = None;
        for route in routes {
            if let Some(params) = match_segments(&route.segments, segments) {
                let better = match &best {
                    None => true,
                    Some((current, _)) => route.literal_count > current.literal_count,
                };
                if better {
                    best = Some((route, params));
                }
            }
        }
        best
    }

    /// Dispatch one request: resolve, run the handler with the session
    /// installed, write the response atoms, and report the disposition.
    pub async fn dispatch(&self, request: &str, session: &SessionHandle) -> Result<Disposition> {
        let Some((route, params)) = self.resolve(request) else {
            debug!(request, "No matching route");
            session.send_fail("unsupported operation").await?;
            return Ok(Disposition::Close);
        };

        debug!(request, pattern = %route.pattern, "Dispatching");
        let handler = Arc::clone(&route.handler);
        let response = CURRENT_SESSION
            .scope(session.clone(), async move { handler(params).await })
            .await;

        match &response.reply {
            Reply::Okay(None) => session.send_okay().await?,
            Reply::Okay(Some(body)) if response.raw => session.send_okay_raw(body).await?,
            Reply::Okay(Some(body)) => session.send_okay_with(body).await?,
            Reply::Fail(message) => {
                session
                    .send_fail(&String::from_utf8_lossy(message))
                    .await?
            }
            Reply::Silent => {}
        }

        Ok(response.disposition)
    }
}
