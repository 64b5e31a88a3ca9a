//! Shared test harness: a route tree wired with channel-driven stub
//! handlers so tests control exactly when each loader/action resolves
//! and with what, plus a subscriber recorder for snapshot sequences.

// Each test binary uses a different slice of this module.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_data_router::{
    create_router, Action, HandlerArgs, HandlerResult, HandlerValue, HydrationData, Loader,
    MemoryHistory, Response, Route, Router, RouterInit, RouterState,
};
use tokio_util::sync::CancellationToken;

// ── Stub handlers ────────────────────────────────────────────────────

/// One in-flight call to a stub handler. The test resolves it.
pub struct PendingCall {
    /// The args the handler received.
    pub args: HandlerArgs,
    respond: oneshot::Sender<HandlerResult>,
}

impl PendingCall {
    /// Resolve with plain data.
    pub fn resolve(self, value: Value) {
        let _ = self.respond.send(Ok(HandlerValue::Data(value)));
    }

    /// Throw a plain value.
    pub fn reject(self, value: Value) {
        let _ = self.respond.send(Err(HandlerValue::Data(value)));
    }

    /// Return a redirect response.
    pub fn redirect(self, status: u16, location: &str) {
        let _ = self
            .respond
            .send(Ok(HandlerValue::Response(Response::redirect(status, location))));
    }

    /// Throw a redirect response.
    pub fn throw_redirect(self, status: u16, location: &str) {
        let _ = self
            .respond
            .send(Err(HandlerValue::Response(Response::redirect(status, location))));
    }

    /// Return an arbitrary response.
    pub fn resolve_response(self, response: Response) {
        let _ = self.respond.send(Ok(HandlerValue::Response(response)));
    }

    /// The cancel signal this call received.
    pub fn signal(&self) -> CancellationToken {
        self.args.signal.clone()
    }
}

/// Handler half: forwards every call to the test and awaits its answer.
pub struct StubHandler {
    calls: Arc<AtomicUsize>,
    tx: mpsc::UnboundedSender<PendingCall>,
}

/// Test half: observe and resolve calls.
pub struct StubControl {
    calls: Arc<AtomicUsize>,
    rx: Mutex<mpsc::UnboundedReceiver<PendingCall>>,
}

impl StubControl {
    /// Await the next call; panics after two seconds of silence.
    pub async fn next_call(&self) -> PendingCall {
        tokio::time::timeout(Duration::from_secs(2), self.rx.lock().await.recv())
            .await
            .expect("timed out waiting for a handler call")
            .expect("stub handler dropped")
    }

    /// How many times the handler has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Build a paired stub handler and its control.
pub fn stub() -> (StubHandler, StubControl) {
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        StubHandler {
            calls: calls.clone(),
            tx,
        },
        StubControl {
            calls,
            rx: Mutex::new(rx),
        },
    )
}

async fn forward(handler: &StubHandler, args: HandlerArgs) -> HandlerResult {
    handler.calls.fetch_add(1, Ordering::SeqCst);
    let (respond, waiter) = oneshot::channel();
    let _ = handler.tx.send(PendingCall { args, respond });
    match waiter.await {
        Ok(result) => result,
        // Control dropped without answering; surface as a thrown null.
        Err(_) => Err(HandlerValue::Data(Value::Null)),
    }
}

#[async_trait]
impl Loader for StubHandler {
    async fn call(&self, args: HandlerArgs) -> HandlerResult {
        forward(self, args).await
    }
}

#[async_trait]
impl Action for StubHandler {
    async fn call(&self, args: HandlerArgs) -> HandlerResult {
        forward(self, args).await
    }
}

// ── Snapshot recorder ────────────────────────────────────────────────

/// Collects every snapshot a subscriber sees.
#[derive(Clone, Default)]
pub struct Recorder {
    snapshots: Arc<SyncMutex<Vec<RouterState>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, state: &RouterState) {
        self.snapshots.lock().push(state.clone());
    }

    pub fn snapshots(&self) -> Vec<RouterState> {
        self.snapshots.lock().clone()
    }
}

// ── Harness ──────────────────────────────────────────────────────────

/// The standard tree:
///
/// ```text
/// / (root, loader)
/// ├── index        (loader)
/// ├── foo          (loader, action)
/// ├── bar          (loader, action)
/// ├── baz          (loader)
/// └── p/:param     (loader)
/// ```
pub struct Harness {
    pub router: Router,
    pub history: Arc<MemoryHistory>,
    pub root: StubControl,
    pub index: StubControl,
    pub foo_loader: StubControl,
    pub foo_action: StubControl,
    pub bar_loader: StubControl,
    pub bar_action: StubControl,
    pub baz: StubControl,
    pub param: StubControl,
}

/// Harness at `/`, hydrated with root and index data.
pub fn harness() -> Harness {
    harness_at(
        &["/"],
        HashMap::from([
            ("root".to_string(), Value::String("ROOT".into())),
            ("index".to_string(), Value::String("INDEX".into())),
        ]),
    )
}

/// Harness at an arbitrary start location and hydration set.
pub fn harness_at(entries: &[&str], loader_data: HashMap<String, Value>) -> Harness {
    let (root_handler, root) = stub();
    let (index_handler, index) = stub();
    let (foo_loader_handler, foo_loader) = stub();
    let (foo_action_handler, foo_action) = stub();
    let (bar_loader_handler, bar_loader) = stub();
    let (bar_action_handler, bar_action) = stub();
    let (baz_handler, baz) = stub();
    let (param_handler, param) = stub();

    let routes = vec![Route::new("/")
        .with_id("root")
        .with_loader(root_handler)
        .with_children(vec![
            Route::index().with_id("index").with_loader(index_handler),
            Route::new("foo")
                .with_id("foo")
                .with_loader(foo_loader_handler)
                .with_action(foo_action_handler),
            Route::new("bar")
                .with_id("bar")
                .with_loader(bar_loader_handler)
                .with_action(bar_action_handler),
            Route::new("baz").with_id("baz").with_loader(baz_handler),
            Route::new("p/:param").with_id("param").with_loader(param_handler),
        ])];

    let history = Arc::new(MemoryHistory::with_entries(entries));
    let router = create_router(RouterInit {
        routes,
        history: history.clone(),
        basename: None,
        hydration_data: Some(HydrationData {
            loader_data,
            action_data: None,
            exceptions: None,
        }),
    })
    .expect("router construction");
    router.initialize();

    Harness {
        router,
        history,
        root,
        index,
        foo_loader,
        foo_action,
        bar_loader,
        bar_action,
        baz,
        param,
    }
}

/// Poll until `check` passes or two seconds elapse.
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within two seconds"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
