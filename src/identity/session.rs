use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::client::{AccountApi, HttpClient};
use crate::error::AppResult;
use crate::nav::{Navigator, Route};
use crate::tprintln;

use super::token::{AccessToken, TokenManager};
use super::user::{User, UserPatch};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<AccessToken>,
    pub user: Option<User>,
    pub initializing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Initializing,
    Anonymous,
    Authenticated,
}

impl Session {
    pub fn initializing() -> Self {
        Self { access_token: None, user: None, initializing: true }
    }

    pub fn anonymous() -> Self {
        Self { access_token: None, user: None, initializing: false }
    }

    pub fn authenticated(token: AccessToken, user: User) -> Self {
        Self { access_token: Some(token), user: Some(user), initializing: false }
    }

    pub fn phase(&self) -> SessionPhase {
        if self.initializing {
            SessionPhase::Initializing
        } else if self.user.is_some() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Anonymous
        }
    }
}

struct SessionInner {
    state: watch::Sender<Session>,
    client: HttpClient,
    account: AccountApi,
    // Incremented by each bootstrap; only the latest may settle the session.
    boot: AtomicU64,
}

impl SessionInner {
    fn reset(&self) {
        self.state.send_replace(Session::anonymous());
        self.client.tokens().clear();
    }
}

/// Application-wide session state.
///
/// Starts `Initializing`; `bootstrap` settles it into `Authenticated` or `Anonymous`. The
/// session's token is mirrored into the `TokenManager` on every change, and tokens obtained by
/// the manager's own refreshes flow back into the session while it is initializing or
/// authenticated. An anonymous session never holds a token. A hard navigation resets the
/// session to `Anonymous`; `reload` also bootstraps it again.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext").field("phase", &self.phase()).finish()
    }
}

impl SessionContext {
    pub fn new(client: HttpClient) -> Self {
        let (state, _) = watch::channel(Session::initializing());
        let account = AccountApi::new(client.clone());
        let inner = Arc::new(SessionInner { state, client, account, boot: AtomicU64::new(0) });

        let weak = Arc::downgrade(&inner);
        inner.client.tokens().on_change(move |token| {
            if let Some(inner) = weak.upgrade() {
                inner.state.send_if_modified(|s| {
                    if s.access_token.as_ref() == token {
                        return false;
                    }
                    if token.is_some() && !s.initializing && s.user.is_none() {
                        return false;
                    }
                    s.access_token = token.cloned();
                    true
                });
            }
        });

        let weak = Arc::downgrade(&inner);
        inner.client.navigator().on_reset(move || {
            if let Some(inner) = weak.upgrade() {
                inner.reset();
            }
        });

        Self { inner }
    }

    /// Settle the state for a page load at `route`.
    ///
    /// In-memory state does not survive a load: the session goes back to `Initializing` and
    /// the token is dropped. Login and register pages skip the silent refresh. Elsewhere one
    /// refresh is attempted and, if it succeeds, the profile is fetched. A result that arrives
    /// after something else settled the session (a login, a hard navigation, a newer
    /// bootstrap) is discarded.
    pub async fn bootstrap(&self, route: &Route) -> SessionPhase {
        let boot = self.inner.boot.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_replace(Session::initializing());
        self.inner.client.tokens().clear();

        if route.is_auth_entry() {
            debug!(target: "session", route = route.path(), "auth entry route; skipping silent refresh");
            self.settle(boot, Session::anonymous());
            return self.phase();
        }
        match self.restore().await {
            Ok(user) => {
                let token = self.inner.client.tokens().access_token();
                info!(target: "session", user = %user.username, "session restored");
                self.settle(boot, Session { access_token: token, user: Some(user), initializing: false });
            }
            Err(e) => {
                debug!(target: "session", code = e.code_str(), "no session to restore: {}", e.message());
                if self.settle(boot, Session::anonymous()) {
                    self.inner.client.tokens().clear();
                }
            }
        }
        self.phase()
    }

    /// Hard navigation to `route` followed by a fresh bootstrap, as a full page load does.
    pub async fn reload(&self, route: Route) -> SessionPhase {
        self.inner.client.navigator().hard_navigate(route.clone());
        self.bootstrap(&route).await
    }

    async fn restore(&self) -> AppResult<User> {
        self.inner.client.tokens().refresh_access_token().await?;
        self.inner.account.me().await
    }

    fn settle(&self, boot: u64, next: Session) -> bool {
        let current = self.inner.boot.load(Ordering::SeqCst) == boot;
        self.inner.state.send_if_modified(|s| {
            if !current || !s.initializing {
                return false;
            }
            *s = next;
            true
        })
    }

    /// Replace the session with a freshly issued token and user.
    pub fn login(&self, token: AccessToken, user: User) {
        tprintln!("session.login user={}", user.username);
        info!(target: "session", user = %user.username, "logged in");
        self.inner.state.send_replace(Session::authenticated(token.clone(), user));
        self.inner.client.tokens().set_access_token(Some(token));
    }

    /// Best-effort server logout, then local teardown and a hard navigation home.
    /// Always ends `Anonymous`, whatever the server answered.
    pub async fn logout(&self) {
        if let Err(e) = self.inner.account.logout().await {
            debug!(target: "session", code = e.code_str(), "logout request failed; continuing");
        }
        self.inner.reset();
        info!(target: "session", "logged out");
        self.inner.client.navigator().hard_navigate(Route::Home);
    }

    pub fn set_access_token(&self, token: Option<AccessToken>) {
        self.inner.state.send_modify(|s| s.access_token = token.clone());
        self.inner.client.tokens().set_access_token(token);
    }

    /// Apply profile edits to the current user. Returns false when nobody is logged in.
    pub fn patch_user(&self, patch: &UserPatch) -> bool {
        self.inner.state.send_if_modified(|s| match s.user.as_mut() {
            Some(u) if !patch.is_empty() => {
                u.apply(patch);
                true
            }
            _ => false,
        });
        self.user().is_some()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.state.borrow().access_token.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.borrow().phase()
    }

    pub fn snapshot(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    /// Wait until the session has left `Initializing`.
    pub async fn initialized(&self) -> Session {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(|s| !s.initializing).await.map(|s| s.clone());
        // The sender lives in `self`, so the channel cannot close while we wait.
        settled.unwrap_or_else(|_| self.snapshot())
    }

    pub fn client(&self) -> &HttpClient { &self.inner.client }
    pub fn account(&self) -> &AccountApi { &self.inner.account }
    pub fn navigator(&self) -> &Navigator { self.inner.client.navigator() }
    pub fn tokens(&self) -> &TokenManager { self.inner.client.tokens() }
}
