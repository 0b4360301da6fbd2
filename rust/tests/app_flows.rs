mod support;

use std::sync::Arc;
use std::time::Duration;

use deskline_core::{
    AppAction, ConnectionState, ConversationStatus, FfiApp, Scope, ScopeCounts,
};
use support::{
    conv, credential, ids, msg, notification, wait_until, write_config, FakeSource,
    TestReconciler, AGENT,
};
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(5);

fn app_with(source: &FakeSource, extra: serde_json::Value) -> (Arc<FfiApp>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap().to_string();
    write_config(&data_dir, extra);
    let app = FfiApp::with_source(data_dir, Arc::new(source.clone()));
    (app, dir)
}

fn activate_and_wait(app: &FfiApp, source: &FakeSource) {
    app.dispatch(AppAction::Activate {
        credential: credential(AGENT),
    });
    // The activation snapshot always has page 1 in flight.
    wait_until("first page fetched", WAIT, || {
        let state = app.state();
        state.rev > 0 && !state.is_fetching && !source.page_requests().is_empty()
    });
}

#[test]
fn activation_loads_first_page_and_counts() {
    let source = FakeSource::new();
    source.set_page(
        Scope::Mine,
        1,
        vec![conv(1, Some(AGENT), 100), conv(2, Some(AGENT), 200)],
    );
    source.set_meta(ScopeCounts {
        mine: 2,
        unassigned: 5,
        all: 9,
    });
    let (app, _dir) = app_with(&source, serde_json::json!({}));

    activate_and_wait(&app, &source);
    wait_until("conversations shown", WAIT, || app.state().conversations.len() == 2);

    let state = app.state();
    assert_eq!(ids(&state.conversations), vec![2, 1]);
    assert_eq!(state.counts.unassigned, 5);
    assert_eq!(state.scope, Scope::Mine);
    assert_eq!(state.connection, ConnectionState::Closed);

    let first = &source.page_requests()[0];
    assert_eq!(first.scope, Scope::Mine);
    assert_eq!(first.page, 1);
    assert_eq!(first.status, ConversationStatus::Open);
    assert_eq!(first.inbox_id, None);
}

#[test]
fn expired_credential_is_rejected_without_fetching() {
    let source = FakeSource::new();
    let (app, _dir) = app_with(&source, serde_json::json!({}));

    let mut expired = credential(AGENT);
    expired.expires_at = Some(1);
    app.dispatch(AppAction::Activate {
        credential: expired,
    });

    wait_until("sign-in toast", WAIT, || app.state().toast.is_some());
    let state = app.state();
    assert!(state.toast.unwrap().contains("Sign-in failed"));
    assert!(matches!(state.connection, ConnectionState::Error { .. }));
    assert!(source.page_requests().is_empty());
}

#[test]
fn reached_end_advances_once_while_in_flight() {
    let source = FakeSource::new();
    source.set_page(Scope::Mine, 1, vec![conv(1, Some(AGENT), 300)]);
    source.set_page(Scope::Mine, 2, vec![conv(2, Some(AGENT), 200)]);
    let (app, _dir) = app_with(&source, serde_json::json!({}));
    activate_and_wait(&app, &source);

    source.set_delay(Duration::from_millis(300));
    for _ in 0..3 {
        app.dispatch(AppAction::ReachedEnd);
    }
    wait_until("page 2 requested", WAIT, || source.requested_pages(Scope::Mine).len() == 2);
    wait_until("page 2 loaded", WAIT, || app.state().conversations.len() == 2);
    assert_eq!(source.requested_pages(Scope::Mine), vec![1, 2]);

    // Without a new scroll gesture the end signal is not honored again.
    source.set_delay(Duration::ZERO);
    app.dispatch(AppAction::ReachedEnd);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(source.requested_pages(Scope::Mine), vec![1, 2]);

    // Page 3 is empty: the scope is exhausted.
    app.dispatch(AppAction::ScrollBegan);
    app.dispatch(AppAction::ReachedEnd);
    wait_until("all loaded", WAIT, || app.state().all_loaded);

    app.dispatch(AppAction::ScrollBegan);
    app.dispatch(AppAction::ReachedEnd);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(source.requested_pages(Scope::Mine), vec![1, 2, 3]);
}

#[test]
fn conversation_moving_between_pages_is_not_duplicated() {
    let source = FakeSource::new();
    source.set_page(
        Scope::Mine,
        1,
        vec![conv(5, Some(AGENT), 500), conv(6, Some(AGENT), 400)],
    );
    let (app, _dir) = app_with(&source, serde_json::json!({}));
    activate_and_wait(&app, &source);

    // 6 got new activity server-side and also shows up on page 2.
    let mut bumped = conv(6, Some(AGENT), 900);
    bumped.messages = vec![msg(60, 6, 900)];
    source.set_page(Scope::Mine, 2, vec![bumped, conv(7, Some(AGENT), 300)]);
    app.dispatch(AppAction::ReachedEnd);

    wait_until("page 2 merged", WAIT, || app.state().conversations.len() == 3);
    assert_eq!(ids(&app.state().conversations), vec![6, 5, 7]);
}

#[test]
fn scope_change_shows_cached_data_and_restarts_at_page_one() {
    let source = FakeSource::new();
    source.set_page(
        Scope::Mine,
        1,
        vec![conv(1, Some(AGENT), 100), conv(2, Some(AGENT), 200)],
    );
    source.set_page(Scope::Mine, 2, vec![conv(3, Some(AGENT), 50)]);
    source.set_page(Scope::Unassigned, 1, vec![conv(4, None, 400)]);
    let (app, _dir) = app_with(&source, serde_json::json!({}));
    activate_and_wait(&app, &source);
    app.dispatch(AppAction::ReachedEnd);
    wait_until("mine page 2", WAIT, || app.state().conversations.len() == 3);

    source.set_delay(Duration::from_millis(300));
    app.dispatch(AppAction::SelectScope { scope: Scope::All });
    // Cached conversations are visible before the All fetch returns.
    wait_until("cached view", WAIT, || {
        let s = app.state();
        s.scope == Scope::All && s.conversations.len() == 3 && s.is_fetching
    });
    wait_until("all fetched", WAIT, || !app.state().is_fetching);
    assert_eq!(source.requested_pages(Scope::All), vec![1]);

    source.set_delay(Duration::ZERO);
    app.dispatch(AppAction::SelectScope {
        scope: Scope::Unassigned,
    });
    wait_until("unassigned view", WAIT, || {
        ids(&app.state().conversations) == vec![4]
    });

    // Back to Mine starts over at page 1 instead of resuming at page 2.
    app.dispatch(AppAction::SelectScope { scope: Scope::Mine });
    wait_until("mine refetched", WAIT, || {
        source.requested_pages(Scope::Mine) == vec![1, 2, 1]
    });
    assert_eq!(app.state().conversations.len(), 3);
}

#[test]
fn failed_page_keeps_state_and_can_be_retried() {
    let source = FakeSource::new();
    source.set_page(Scope::Mine, 1, vec![conv(1, Some(AGENT), 100)]);
    source.set_page(Scope::Mine, 2, vec![conv(2, Some(AGENT), 50)]);
    source.fail_page(Scope::Mine, 2, true);
    let (app, _dir) = app_with(&source, serde_json::json!({"max_fetch_attempts": 2}));
    activate_and_wait(&app, &source);

    app.dispatch(AppAction::ReachedEnd);
    wait_until("failure toast", WAIT, || app.state().toast.is_some());
    // Retried once inside the fetch before giving up.
    assert_eq!(source.requested_pages(Scope::Mine), vec![1, 2, 2]);
    assert_eq!(ids(&app.state().conversations), vec![1]);
    assert!(!app.state().is_fetching);

    app.dispatch(AppAction::ClearToast);
    source.fail_page(Scope::Mine, 2, false);
    app.dispatch(AppAction::ReachedEnd);
    wait_until("page 2 after retry", WAIT, || app.state().conversations.len() == 2);
    assert!(app.state().toast.is_none());
}

#[test]
fn failed_first_page_is_retried_before_advancing() {
    let source = FakeSource::new();
    source.set_page(Scope::Mine, 1, vec![conv(1, Some(AGENT), 100)]);
    source.set_page(Scope::Mine, 2, vec![conv(2, Some(AGENT), 50)]);
    source.fail_page(Scope::Mine, 1, true);
    let (app, _dir) = app_with(&source, serde_json::json!({}));
    activate_and_wait(&app, &source);
    wait_until("failure toast", WAIT, || app.state().toast.is_some());
    assert!(app.state().conversations.is_empty());

    source.fail_page(Scope::Mine, 1, false);
    app.dispatch(AppAction::ReachedEnd);
    wait_until("page 1 loaded", WAIT, || app.state().conversations.len() == 1);
    assert_eq!(source.requested_pages(Scope::Mine), vec![1, 1]);

    app.dispatch(AppAction::ScrollBegan);
    app.dispatch(AppAction::ReachedEnd);
    wait_until("page 2 loaded", WAIT, || app.state().conversations.len() == 2);
    assert_eq!(source.requested_pages(Scope::Mine), vec![1, 1, 2]);
    assert_eq!(ids(&app.state().conversations), vec![1, 2]);
}

#[test]
fn auth_failure_on_fetch_asks_to_sign_in_again() {
    let source = FakeSource::new();
    source.reject_auth(true);
    let (app, _dir) = app_with(&source, serde_json::json!({"max_fetch_attempts": 3}));
    app.dispatch(AppAction::Activate {
        credential: credential(AGENT),
    });
    wait_until("auth toast", WAIT, || app.state().toast.is_some());
    assert!(app.state().toast.unwrap().contains("sign in again"));
    // Auth errors are not retried.
    assert_eq!(source.page_requests().len(), 1);
}

#[test]
fn status_and_inbox_filters_restart_pagination() {
    let source = FakeSource::new();
    let mut resolved = conv(2, Some(AGENT), 200);
    resolved.status = ConversationStatus::Resolved;
    let mut other_inbox = conv(3, Some(AGENT), 300);
    other_inbox.inbox_id = 9;
    source.set_page(
        Scope::Mine,
        1,
        vec![conv(1, Some(AGENT), 100), resolved, other_inbox],
    );
    let (app, _dir) = app_with(&source, serde_json::json!({}));
    activate_and_wait(&app, &source);
    wait_until("open view", WAIT, || ids(&app.state().conversations) == vec![3, 1]);

    app.dispatch(AppAction::SetStatusFilter {
        status: ConversationStatus::Resolved,
    });
    wait_until("resolved view", WAIT, || ids(&app.state().conversations) == vec![2]);
    wait_until("resolved page 1 requested", WAIT, || {
        source
            .page_requests()
            .last()
            .is_some_and(|r| r.page == 1 && r.status == ConversationStatus::Resolved)
    });

    app.dispatch(AppAction::SetStatusFilter {
        status: ConversationStatus::Open,
    });
    app.dispatch(AppAction::SetInboxFilter { inbox_id: Some(9) });
    wait_until("inbox view", WAIT, || ids(&app.state().conversations) == vec![3]);
    wait_until("inbox page 1 requested", WAIT, || {
        source
            .page_requests()
            .last()
            .is_some_and(|r| r.inbox_id == Some(9) && r.status == ConversationStatus::Open)
    });
}

#[test]
fn refresh_refetches_first_page_without_moving_cursor() {
    let source = FakeSource::new();
    source.set_page(Scope::Mine, 1, vec![conv(1, Some(AGENT), 100)]);
    source.set_page(Scope::Mine, 2, vec![conv(2, Some(AGENT), 50)]);
    let (app, _dir) = app_with(&source, serde_json::json!({}));
    activate_and_wait(&app, &source);
    app.dispatch(AppAction::ReachedEnd);
    wait_until("page 2", WAIT, || app.state().conversations.len() == 2);

    source.set_page(Scope::Mine, 1, vec![conv(1, Some(AGENT), 100), conv(8, Some(AGENT), 800)]);
    app.dispatch(AppAction::Refresh);
    wait_until("refreshed", WAIT, || app.state().conversations.len() == 3);

    app.dispatch(AppAction::ScrollBegan);
    app.dispatch(AppAction::ReachedEnd);
    wait_until("page 3 requested", WAIT, || {
        source.requested_pages(Scope::Mine) == vec![1, 2, 1, 3]
    });
}

#[test]
fn notifications_are_loaded_and_marked_read() {
    let source = FakeSource::new();
    source.set_notifications(vec![
        notification(1, false),
        notification(2, false),
        notification(3, true),
    ]);
    let (app, _dir) = app_with(&source, serde_json::json!({}));
    activate_and_wait(&app, &source);
    wait_until("unread count", WAIT, || app.state().unread_notifications == 2);
    assert_eq!(source.notification_requests(), 1);

    app.dispatch(AppAction::MarkNotificationRead { notification_id: 1 });
    wait_until("marked read", WAIT, || app.state().unread_notifications == 1);
}

#[test]
fn deactivate_discards_late_results() {
    let source = FakeSource::new();
    source.set_page(Scope::Mine, 1, vec![conv(1, Some(AGENT), 100)]);
    source.set_delay(Duration::from_millis(200));
    let (app, _dir) = app_with(&source, serde_json::json!({}));

    app.dispatch(AppAction::Activate {
        credential: credential(AGENT),
    });
    app.dispatch(AppAction::Deactivate);
    wait_until("fetch issued", WAIT, || !source.page_requests().is_empty());
    std::thread::sleep(Duration::from_millis(400));

    let state = app.state();
    assert!(state.conversations.is_empty());
    assert!(!state.is_fetching);
}

#[test]
fn updates_carry_increasing_revs() {
    let source = FakeSource::new();
    source.set_page(Scope::Mine, 1, vec![conv(1, Some(AGENT), 100)]);
    let (app, _dir) = app_with(&source, serde_json::json!({}));
    let (reconciler, updates) = TestReconciler::new();
    app.listen_for_updates(Box::new(reconciler));

    activate_and_wait(&app, &source);
    app.dispatch(AppAction::SelectScope { scope: Scope::All });
    wait_until("updates", WAIT, || updates.lock().unwrap().len() >= 3);

    let revs: Vec<u64> = updates.lock().unwrap().iter().map(|u| u.rev()).collect();
    assert!(revs.windows(2).all(|w| w[0] < w[1]), "revs not increasing: {revs:?}");
    wait_until("snapshot caught up", WAIT, || {
        let last = updates.lock().unwrap().last().map(|u| u.rev());
        last == Some(app.state().rev)
    });
}
