//! Exception routing: nearest-boundary selection, root fallback,
//! boundary data clearing, and exception lifetime across navigations.

mod support;

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use support::{harness, stub};
use tokio_data_router::{
    create_router, Exception, FetcherKind, FetcherState, FormData, FormMethod, HydrationData,
    MemoryHistory, NavigateOptions, Route, Router, RouterInit,
};

struct BoundaryTree {
    router: Router,
    parent: support::StubControl,
    child: support::StubControl,
}

/// `/ (parent, loader)` → `child (loader, exception boundary)`,
/// hydrated at `/`.
fn boundary_tree() -> BoundaryTree {
    let (parent_loader, parent) = stub();
    let (child_loader, child) = stub();
    let router = create_router(RouterInit {
        routes: vec![Route::new("/")
            .with_id("parent")
            .with_loader(parent_loader)
            .with_children(vec![Route::new("child")
                .with_id("child")
                .with_loader(child_loader)
                .with_exception_boundary()])],
        history: Arc::new(MemoryHistory::new()),
        basename: None,
        hydration_data: Some(HydrationData {
            loader_data: HashMap::from([("parent".to_string(), json!("PARENT"))]),
            action_data: None,
            exceptions: None,
        }),
    })
    .expect("router construction");
    router.initialize();
    BoundaryTree {
        router,
        parent,
        child,
    }
}

#[tokio::test]
async fn test_loader_exception_lands_on_its_own_boundary() {
    let t = boundary_tree();

    let nav = {
        let router = t.router.clone();
        tokio::spawn(async move { router.navigate("/child", NavigateOptions::default()).await })
    };
    t.child.next_call().await.reject(json!("Kaboom!"));
    nav.await.expect("navigation task");

    let state = t.router.state();
    assert_eq!(
        state.exception_for("child"),
        Some(&Exception::Data(json!("Kaboom!")))
    );
    assert!(state.exception_for("parent").is_none(), "exactly one boundary key");
    assert_eq!(
        state.loader_data_for("parent"),
        Some(&json!("PARENT")),
        "data above the boundary is untouched"
    );
    assert_eq!(t.parent.call_count(), 0, "kept match not reloaded on a plain load");
    assert!(state.transition.is_idle());
    assert_eq!(state.location.pathname, "/child");
}

#[tokio::test]
async fn test_exception_without_boundary_falls_back_to_root() {
    let h = harness();

    let nav = {
        let router = h.router.clone();
        tokio::spawn(async move { router.navigate("/foo", NavigateOptions::default()).await })
    };
    h.foo_loader.next_call().await.reject(json!("no boundary here"));
    nav.await.expect("navigation task");

    let state = h.router.state();
    assert_eq!(
        state.exception_for("root"),
        Some(&Exception::Data(json!("no boundary here")))
    );
    assert!(
        state.loader_data_for("root").is_none(),
        "boundary loader data is cleared for the cycle"
    );
}

#[tokio::test]
async fn test_exceptions_cleared_by_next_successful_navigation() {
    let t = boundary_tree();

    let failing = {
        let router = t.router.clone();
        tokio::spawn(async move { router.navigate("/child", NavigateOptions::default()).await })
    };
    t.child.next_call().await.reject(json!("Kaboom!"));
    failing.await.expect("navigation task");
    assert!(t.router.state().exceptions.is_some());

    let recovering = {
        let router = t.router.clone();
        tokio::spawn(async move { router.navigate("/", NavigateOptions::default()).await })
    };
    recovering.await.expect("navigation task");

    let state = t.router.state();
    assert!(state.exceptions.is_none(), "a new cycle clears old exceptions");
    assert_eq!(state.location.pathname, "/");
}

#[tokio::test]
async fn test_revalidation_exception_replaces_only_rerun_data() {
    let t = boundary_tree();

    // Land on /child with both loaders resolved.
    let nav = {
        let router = t.router.clone();
        tokio::spawn(async move { router.navigate("/child", NavigateOptions::default()).await })
    };
    t.child.next_call().await.resolve(json!("CHILD"));
    nav.await.expect("navigation task");

    t.router.revalidate();
    t.parent.next_call().await.resolve(json!("PARENT2"));
    t.child.next_call().await.reject(json!("flaky"));
    support::wait_for(|| t.router.state().exceptions.is_some()).await;

    let state = t.router.state();
    assert_eq!(
        state.loader_data_for("parent"),
        Some(&json!("PARENT2")),
        "successful rerun data commits"
    );
    assert!(state.loader_data_for("child").is_none());
    assert_eq!(state.exception_for("child"), Some(&Exception::Data(json!("flaky"))));
}

struct DeepTree {
    router: Router,
    root: support::StubControl,
    section: support::StubControl,
    detail: support::StubControl,
    detail_action: support::StubControl,
}

/// `/ (root, loader)` → `section (loader, exception boundary)` →
/// `detail (loader, action)`: a non-leaf boundary with a live
/// descendant loader below it.
fn deep_tree(entries: &[&str], loader_data: HashMap<String, Value>) -> DeepTree {
    let (root_loader, root) = stub();
    let (section_loader, section) = stub();
    let (detail_loader, detail) = stub();
    let (detail_action_handler, detail_action) = stub();
    let router = create_router(RouterInit {
        routes: vec![Route::new("/")
            .with_id("root")
            .with_loader(root_loader)
            .with_children(vec![Route::new("section")
                .with_id("section")
                .with_loader(section_loader)
                .with_exception_boundary()
                .with_children(vec![Route::new("detail")
                    .with_id("detail")
                    .with_loader(detail_loader)
                    .with_action(detail_action_handler)])])],
        history: Arc::new(MemoryHistory::with_entries(entries)),
        basename: None,
        hydration_data: Some(HydrationData {
            loader_data,
            action_data: None,
            exceptions: None,
        }),
    })
    .expect("router construction");
    router.initialize();
    DeepTree {
        router,
        root,
        section,
        detail,
        detail_action,
    }
}

#[tokio::test]
async fn test_non_leaf_boundary_discards_deeper_data_from_same_batch() {
    let t = deep_tree(&["/"], HashMap::from([("root".to_string(), json!("ROOT"))]));

    let nav = {
        let router = t.router.clone();
        tokio::spawn(async move {
            router
                .navigate("/section/detail", NavigateOptions::default())
                .await
        })
    };

    // The deeper loader resolves before the boundary throws; its data
    // must still be discarded with the rest of the subtree.
    t.detail.next_call().await.resolve(json!("DETAIL"));
    t.section.next_call().await.reject(json!("section down"));
    nav.await.expect("navigation task");

    let state = t.router.state();
    assert_eq!(
        state.exception_for("section"),
        Some(&Exception::Data(json!("section down")))
    );
    assert_eq!(state.loader_data_for("root"), Some(&json!("ROOT")));
    assert!(state.loader_data_for("section").is_none());
    assert!(
        state.loader_data_for("detail").is_none(),
        "data strictly below the boundary must not survive the cycle"
    );
    assert_eq!(t.root.call_count(), 0, "kept match not reloaded on a plain load");
}

#[tokio::test]
async fn test_fetcher_revalidation_discards_data_below_mid_batch_boundary() {
    let t = deep_tree(
        &["/section/detail"],
        HashMap::from([
            ("root".to_string(), json!("ROOT")),
            ("section".to_string(), json!("SECTION")),
            ("detail".to_string(), json!("DETAIL")),
        ]),
    );

    t.router.fetch(
        "key",
        "/section/detail",
        NavigateOptions {
            form_method: Some(FormMethod::Post),
            form_data: Some(FormData::new()),
            ..Default::default()
        },
    );
    t.detail_action.next_call().await.resolve(json!("DONE"));

    // Post-action revalidation re-runs all three loaders; the deeper
    // one resolves before the boundary throws.
    t.detail.next_call().await.resolve(json!("D2"));
    t.root.next_call().await.resolve(json!("R2"));
    t.section.next_call().await.reject(json!("flaky"));
    support::wait_for(|| t.router.get_fetcher("key").state == FetcherState::Idle).await;

    let state = t.router.state();
    assert_eq!(state.exception_for("section"), Some(&Exception::Data(json!("flaky"))));
    assert_eq!(state.loader_data_for("root"), Some(&json!("R2")));
    assert!(state.loader_data_for("section").is_none());
    assert!(
        state.loader_data_for("detail").is_none(),
        "revalidated data below the boundary is discarded too"
    );

    let fetcher = t.router.get_fetcher("key");
    assert_eq!(fetcher.kind, FetcherKind::Done);
    assert_eq!(fetcher.data, Some(json!("DONE")));
}

#[tokio::test]
async fn test_loader_redirect_navigates_instead_of_throwing() {
    let h = harness();

    let nav = {
        let router = h.router.clone();
        tokio::spawn(async move { router.navigate("/foo", NavigateOptions::default()).await })
    };
    h.foo_loader.next_call().await.throw_redirect(302, "/baz");
    h.baz.next_call().await.resolve(json!("BAZ"));
    nav.await.expect("navigation task");

    let state = h.router.state();
    assert!(state.exceptions.is_none(), "a redirect is not an exception");
    assert_eq!(state.location.pathname, "/baz");
    assert_eq!(state.loader_data_for("baz"), Some(&json!("BAZ")));
    assert_eq!(state.loader_data_for("root"), Some(&json!("ROOT")));
}
