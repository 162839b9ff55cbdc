//! Route guard enforcement over a live SessionContext. No backend is needed: sessions are
//! driven with `login` and auth-entry bootstraps, and timers run on paused tokio time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use gameshelf::client::HttpClient;
use gameshelf::config::ClientConfig;
use gameshelf::identity::{
    enforce, enforce_with, AccessToken, GuardDecision, GuardOutcome, RouteGuard, SessionContext, User, ADMIN_DENIED_MESSAGE,
};
use gameshelf::nav::{NavigationKind, Navigator, Route};

fn session_at(route: Route) -> SessionContext {
    // Unroutable backend; guard tests never touch the network.
    let cfg = ClientConfig::new("http://127.0.0.1:9").unwrap();
    SessionContext::new(HttpClient::new(cfg, Navigator::new(route)).unwrap())
}

fn user(admin: bool) -> User {
    User { id: 1, username: if admin { "admin".into() } else { "player".into() }, email: "u@example.com".into(), admin, avatar: None }
}

async fn anonymous_session(route: Route) -> SessionContext {
    let s = session_at(route);
    // Auth-entry bootstrap settles to anonymous without any network call.
    s.bootstrap(&Route::Login).await;
    s
}

#[tokio::test]
async fn authenticated_only_redirects_anonymous_to_login() {
    let s = anonymous_session(Route::Dashboard).await;
    let outcome = enforce(RouteGuard::AuthenticatedOnly, &s).await;
    assert_eq!(outcome, GuardOutcome::Redirected(Route::Login));
    assert_eq!(s.navigator().current(), Route::Login);
    assert_eq!(s.navigator().last().map(|n| n.kind), Some(NavigationKind::Redirect));
}

#[tokio::test]
async fn authenticated_only_renders_with_token() {
    let s = session_at(Route::Dashboard);
    s.login(AccessToken::new("tok"), user(false));
    assert_eq!(enforce(RouteGuard::AuthenticatedOnly, &s).await, GuardOutcome::Rendered);
    assert_eq!(s.navigator().current(), Route::Dashboard);
}

#[tokio::test]
async fn guard_holds_loading_until_session_settles() {
    let s = session_at(Route::Dashboard);
    let seen: Arc<Mutex<Vec<GuardDecision>>> = Arc::new(Mutex::new(Vec::new()));

    let task = {
        let s = s.clone();
        let seen = seen.clone();
        tokio::spawn(async move {
            enforce_with(RouteGuard::AuthenticatedOnly, &s, |d| seen.lock().push(d.clone())).await
        })
    };
    while seen.lock().is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(*seen.lock(), vec![GuardDecision::Loading]);
    assert!(!task.is_finished());

    s.login(AccessToken::new("tok"), user(false));
    let outcome = task.await.unwrap();
    assert_eq!(outcome, GuardOutcome::Rendered);
    assert_eq!(*seen.lock(), vec![GuardDecision::Loading]);
}

#[tokio::test]
async fn public_only_sends_logged_in_users_home() {
    let s = session_at(Route::Login);
    s.login(AccessToken::new("tok"), user(false));
    assert_eq!(enforce(RouteGuard::PublicOnly, &s).await, GuardOutcome::Redirected(Route::Home));

    let anon = anonymous_session(Route::Register).await;
    assert_eq!(enforce(RouteGuard::PublicOnly, &anon).await, GuardOutcome::Rendered);
}

#[tokio::test(start_paused = true)]
async fn admin_only_shows_error_then_redirects_after_two_seconds() {
    let s = session_at(Route::Admin);
    s.login(AccessToken::new("tok"), user(false));

    let nav = s.navigator().clone();
    let shown: Arc<Mutex<Vec<(GuardDecision, Route)>>> = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();
    let outcome = {
        let shown = shown.clone();
        enforce_with(RouteGuard::AdminOnly, &s, move |d| shown.lock().push((d.clone(), nav.current()))).await
    };

    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(
        outcome,
        GuardOutcome::Denied { message: ADMIN_DENIED_MESSAGE.to_string(), redirected_to: Route::Home }
    );
    // The inline error was shown while still on the admin route.
    let shown = shown.lock();
    assert_eq!(shown.len(), 1);
    assert!(matches!(shown[0].0, GuardDecision::Deny { .. }));
    assert_eq!(shown[0].1, Route::Admin);
    assert_eq!(s.navigator().current(), Route::Home);
}

#[tokio::test(start_paused = true)]
async fn admin_only_renders_admin_immediately() {
    let s = session_at(Route::Admin);
    s.login(AccessToken::new("tok"), user(true));
    let start = Instant::now();
    assert_eq!(enforce(RouteGuard::AdminOnly, &s).await, GuardOutcome::Rendered);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(s.navigator().current(), Route::Admin);
}

#[tokio::test]
async fn admin_only_without_user_goes_home() {
    let s = anonymous_session(Route::Admin).await;
    assert_eq!(enforce(RouteGuard::AdminOnly, &s).await, GuardOutcome::Redirected(Route::Home));
}
