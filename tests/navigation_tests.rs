//! Navigation flows: plain loads, loader selection, interruption,
//! revalidation, history traversal.

mod support;

use serde_json::json;
use std::collections::HashMap;
use support::{harness, harness_at, wait_for};
use tokio_data_router::{HistoryAction, NavigateOptions, RevalidationState};

// ── Basic loads ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_basic_get_load_runs_only_new_loader() {
    let h = harness();

    let nav = {
        let router = h.router.clone();
        tokio::spawn(async move { router.navigate("/foo", NavigateOptions::default()).await })
    };

    let call = h.foo_loader.next_call().await;
    assert_eq!(call.args.request.url, "/foo");
    assert!(call.args.submission.is_none());
    call.resolve(json!("FOO"));
    nav.await.expect("navigation task");

    let state = h.router.state();
    assert_eq!(state.location.pathname, "/foo");
    assert_eq!(state.match_ids(), vec!["root", "foo"]);
    assert_eq!(state.loader_data_for("root"), Some(&json!("ROOT")));
    assert_eq!(state.loader_data_for("foo"), Some(&json!("FOO")));
    assert!(state.loader_data_for("index").is_none(), "index dropped from matches");
    assert_eq!(h.root.call_count(), 0, "kept match must not reload");
    assert!(state.transition.is_idle());
    assert_eq!(state.history_action, HistoryAction::Push);
    assert_eq!(h.history.len(), 2);
}

#[tokio::test]
async fn test_replace_navigation_keeps_history_length() {
    let h = harness();

    let nav = {
        let router = h.router.clone();
        tokio::spawn(async move {
            router
                .navigate(
                    "/foo",
                    NavigateOptions {
                        replace: true,
                        ..Default::default()
                    },
                )
                .await
        })
    };
    h.foo_loader.next_call().await.resolve(json!("FOO"));
    nav.await.expect("navigation task");

    let state = h.router.state();
    assert_eq!(state.history_action, HistoryAction::Replace);
    assert_eq!(h.history.len(), 1);
}

#[tokio::test]
async fn test_null_loader_data_is_committed() {
    let h = harness();

    let nav = {
        let router = h.router.clone();
        tokio::spawn(async move { router.navigate("/foo", NavigateOptions::default()).await })
    };
    h.foo_loader.next_call().await.resolve(json!(null));
    nav.await.expect("navigation task");

    let state = h.router.state();
    assert_eq!(state.loader_data_for("foo"), Some(&json!(null)));
}

// ── Reload rules ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_search_change_reloads_every_kept_loader() {
    let h = harness_at(
        &["/foo?q=1"],
        HashMap::from([
            ("root".to_string(), json!("R1")),
            ("foo".to_string(), json!("1")),
        ]),
    );

    let nav = {
        let router = h.router.clone();
        tokio::spawn(async move { router.navigate("/foo?q=2", NavigateOptions::default()).await })
    };

    let root_call = h.root.next_call().await;
    assert_eq!(root_call.args.request.url, "/foo?q=2");
    root_call.resolve(json!("R2"));
    h.foo_loader.next_call().await.resolve(json!("2"));
    nav.await.expect("navigation task");

    let state = h.router.state();
    assert_eq!(state.loader_data_for("root"), Some(&json!("R2")));
    assert_eq!(state.loader_data_for("foo"), Some(&json!("2")));
    assert_eq!(state.location.search, "?q=2");
}

#[tokio::test]
async fn test_params_change_reloads_only_that_match() {
    let h = harness_at(
        &["/p/one"],
        HashMap::from([
            ("root".to_string(), json!("ROOT")),
            ("param".to_string(), json!("ONE")),
        ]),
    );

    let nav = {
        let router = h.router.clone();
        tokio::spawn(async move { router.navigate("/p/two", NavigateOptions::default()).await })
    };

    let call = h.param.next_call().await;
    assert_eq!(call.args.params.get("param").map(String::as_str), Some("two"));
    call.resolve(json!("TWO"));
    nav.await.expect("navigation task");

    let state = h.router.state();
    assert_eq!(state.loader_data_for("param"), Some(&json!("TWO")));
    assert_eq!(state.loader_data_for("root"), Some(&json!("ROOT")));
    assert_eq!(h.root.call_count(), 0, "same params and search, no reload");
}

// ── Interruption ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_interrupted_navigation_aborts_first_and_commits_second() {
    let h = harness();

    let first = {
        let router = h.router.clone();
        tokio::spawn(async move { router.navigate("/foo", NavigateOptions::default()).await })
    };
    let foo_call = h.foo_loader.next_call().await;
    let foo_signal = foo_call.signal();
    assert!(!foo_signal.is_cancelled());

    let second = {
        let router = h.router.clone();
        tokio::spawn(async move { router.navigate("/bar", NavigateOptions::default()).await })
    };
    let bar_call = h.bar_loader.next_call().await;
    assert!(foo_signal.is_cancelled(), "superseded navigation must abort");

    // Resolving the aborted loader must not commit anything.
    foo_call.resolve(json!("STALE FOO"));
    bar_call.resolve(json!("BAR"));
    first.await.expect("first navigation task");
    second.await.expect("second navigation task");

    let state = h.router.state();
    assert_eq!(state.location.pathname, "/bar");
    assert_eq!(state.loader_data_for("bar"), Some(&json!("BAR")));
    assert!(state.loader_data_for("foo").is_none(), "aborted result discarded");
}

#[tokio::test]
async fn test_revalidation_interrupted_by_navigation() {
    let h = harness();

    h.router.revalidate();
    let root_call = h.root.next_call().await;
    let index_call = h.index.next_call().await;
    let root_signal = root_call.signal();
    assert_eq!(h.router.state().revalidation, RevalidationState::Loading);

    let nav = {
        let router = h.router.clone();
        tokio::spawn(async move { router.navigate("/foo", NavigateOptions::default()).await })
    };
    let foo_call = h.foo_loader.next_call().await;
    assert!(root_signal.is_cancelled(), "revalidation loaders must abort");
    assert!(index_call.signal().is_cancelled());

    foo_call.resolve(json!("FOO"));
    nav.await.expect("navigation task");

    let state = h.router.state();
    assert_eq!(state.revalidation, RevalidationState::Idle);
    assert_eq!(state.location.pathname, "/foo");
    assert_eq!(state.loader_data_for("foo"), Some(&json!("FOO")));
    assert_eq!(state.loader_data_for("root"), Some(&json!("ROOT")));
}

#[tokio::test]
async fn test_revalidate_reruns_current_loaders_in_place() {
    let h = harness();

    h.router.revalidate();
    h.root.next_call().await.resolve(json!("ROOT2"));
    h.index.next_call().await.resolve(json!("INDEX2"));

    wait_for(|| h.router.state().revalidation == RevalidationState::Idle && h.root.call_count() == 1)
        .await;
    wait_for(|| h.router.state().loader_data_for("root") == Some(&json!("ROOT2"))).await;

    let state = h.router.state();
    assert_eq!(state.location.pathname, "/", "revalidation never navigates");
    assert_eq!(state.loader_data_for("index"), Some(&json!("INDEX2")));
    assert!(state.transition.is_idle(), "revalidation leaves the transition idle");
}

// ── History traversal ────────────────────────────────────────────────

#[tokio::test]
async fn test_pop_navigation_reloads_dropped_match() {
    let h = harness();

    let nav = {
        let router = h.router.clone();
        tokio::spawn(async move { router.navigate("/foo", NavigateOptions::default()).await })
    };
    h.foo_loader.next_call().await.resolve(json!("FOO"));
    nav.await.expect("navigation task");

    h.router.go(-1);
    h.index.next_call().await.resolve(json!("INDEX AGAIN"));

    wait_for(|| h.router.state().location.pathname == "/").await;
    let state = h.router.state();
    assert_eq!(state.history_action, HistoryAction::Pop);
    assert_eq!(state.loader_data_for("index"), Some(&json!("INDEX AGAIN")));
    assert_eq!(state.loader_data_for("root"), Some(&json!("ROOT")));
    assert!(state.transition.is_idle());
}

#[tokio::test]
async fn test_navigation_to_unknown_url_synthesizes_404() {
    let h = harness();

    h.router
        .navigate("/no/such/page", NavigateOptions::default())
        .await;

    let state = h.router.state();
    assert_eq!(state.location.pathname, "/no/such/page");
    assert!(state.matches.is_none());
    let exception = state.exception_for("root").expect("root boundary 404");
    assert_eq!(exception.status(), Some(404));
    assert!(state.loader_data.is_empty());
    assert!(state.transition.is_idle());
}
