//! Client location and navigation.
//!
//! Two kinds of movement exist. Client-side navigation (`push`, `redirect`) only changes the
//! current route. Hard navigation (`hard_navigate`) stands in for a full page load: every
//! registered reset hook runs first, so no authenticated state survives it.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Login,
    Register,
    Dashboard,
    Admin,
    Path(String),
}

impl Route {
    pub fn from_path(path: &str) -> Route {
        let p = path.split(['?', '#']).next().unwrap_or("");
        let p = p.trim_end_matches('/');
        match p {
            "" => Route::Home,
            "/login" => Route::Login,
            "/register" => Route::Register,
            "/dashboard" => Route::Dashboard,
            "/admin" => Route::Admin,
            other => Route::Path(other.to_string()),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Route::Home => "/",
            Route::Login => "/login",
            Route::Register => "/register",
            Route::Dashboard => "/dashboard",
            Route::Admin => "/admin",
            Route::Path(p) => p.as_str(),
        }
    }

    /// Login and register pages obtain tokens directly, so session bootstrap skips refresh on them.
    pub fn is_auth_entry(&self) -> bool {
        matches!(self, Route::Login | Route::Register)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    Push,
    Redirect,
    Reload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub route: Route,
    pub kind: NavigationKind,
}

type ResetHook = Arc<dyn Fn() + Send + Sync>;

struct NavInner {
    current: RwLock<Route>,
    history: RwLock<Vec<Navigation>>,
    reset_hooks: RwLock<Vec<ResetHook>>,
}

#[derive(Clone)]
pub struct Navigator {
    inner: Arc<NavInner>,
}

impl std::fmt::Debug for Navigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Navigator").field("current", &*self.inner.current.read()).finish()
    }
}

impl Default for Navigator {
    fn default() -> Self { Self::new(Route::Home) }
}

impl Navigator {
    pub fn new(initial: Route) -> Self {
        Self {
            inner: Arc::new(NavInner {
                current: RwLock::new(initial),
                history: RwLock::new(Vec::new()),
                reset_hooks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn current(&self) -> Route {
        self.inner.current.read().clone()
    }

    pub fn push(&self, route: Route) {
        self.record(route, NavigationKind::Push);
    }

    /// Guard redirect: replaces the current location.
    pub fn redirect(&self, route: Route) {
        self.record(route, NavigationKind::Redirect);
    }

    /// Full reset of in-memory client state followed by a move to `route`.
    pub fn hard_navigate(&self, route: Route) {
        info!(target: "nav", "hard navigation to {}", route.path());
        let hooks: Vec<ResetHook> = self.inner.reset_hooks.read().clone();
        for hook in hooks {
            hook();
        }
        self.record(route, NavigationKind::Reload);
    }

    /// Register state to be discarded on hard navigation.
    pub fn on_reset<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.reset_hooks.write().push(Arc::new(hook));
    }

    pub fn history(&self) -> Vec<Navigation> {
        self.inner.history.read().clone()
    }

    pub fn last(&self) -> Option<Navigation> {
        self.inner.history.read().last().cloned()
    }

    pub fn reload_count(&self) -> usize {
        self.inner.history.read().iter().filter(|n| n.kind == NavigationKind::Reload).count()
    }

    fn record(&self, route: Route, kind: NavigationKind) {
        debug!(target: "nav", kind = ?kind, "navigate {}", route.path());
        *self.inner.current.write() = route.clone();
        self.inner.history.write().push(Navigation { route, kind });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn route_paths_round_trip_through_from_path() {
        assert_eq!(Route::from_path("/"), Route::Home);
        assert_eq!(Route::from_path(""), Route::Home);
        assert_eq!(Route::from_path("/login?next=/admin"), Route::Login);
        assert_eq!(Route::from_path("/register/"), Route::Register);
        assert_eq!(Route::from_path("/dashboard"), Route::Dashboard);
        assert_eq!(Route::from_path("/games/42"), Route::Path("/games/42".into()));
        assert_eq!(Route::Admin.path(), "/admin");
        assert!(Route::Login.is_auth_entry());
        assert!(!Route::Dashboard.is_auth_entry());
    }

    #[test]
    fn hard_navigation_runs_reset_hooks_before_recording() {
        let nav = Navigator::new(Route::Dashboard);
        let resets = Arc::new(AtomicUsize::new(0));
        let r = resets.clone();
        nav.on_reset(move || { r.fetch_add(1, Ordering::SeqCst); });

        nav.push(Route::Admin);
        assert_eq!(resets.load(Ordering::SeqCst), 0);

        nav.hard_navigate(Route::Login);
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(nav.current(), Route::Login);
        assert_eq!(nav.reload_count(), 1);
        assert_eq!(nav.last(), Some(Navigation { route: Route::Login, kind: NavigationKind::Reload }));
        assert_eq!(nav.history().len(), 2);
    }

    #[test]
    fn reset_hook_may_use_the_navigator() {
        let nav = Navigator::new(Route::Dashboard);
        let inner = Arc::new(AtomicUsize::new(0));
        let (n, i) = (nav.clone(), inner.clone());
        nav.on_reset(move || {
            let i = i.clone();
            n.on_reset(move || { i.fetch_add(1, Ordering::SeqCst); });
            let _ = n.current();
        });
        nav.hard_navigate(Route::Home);
        nav.hard_navigate(Route::Login);
        assert_eq!(inner.load(Ordering::SeqCst), 1);
        assert_eq!(nav.reload_count(), 2);
    }
}
