use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

/// Short-lived bearer credential. Lives in memory only; `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new<S: Into<String>>(value: S) -> Self { Self(value.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn bearer(&self) -> String { format!("Bearer {}", self.0) }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AccessToken(<{} bytes>)", self.0.len())
    }
}

impl From<&str> for AccessToken {
    fn from(s: &str) -> Self { Self(s.to_string()) }
}

impl From<String> for AccessToken {
    fn from(s: String) -> Self { Self(s) }
}

pub type RefreshFuture = BoxFuture<'static, AppResult<AccessToken>>;

/// Obtains a new access token. The HTTP implementation relies on the cookie jar for the
/// refresh credential; tests substitute their own.
pub trait TokenRefresher: Send + Sync {
    fn refresh(&self) -> RefreshFuture;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

/// `POST <refresh endpoint>` with no body. Must share the `reqwest::Client` (and so the
/// cookie store) used for login, otherwise the refresh cookie is never sent.
#[derive(Debug, Clone)]
pub struct HttpRefresher {
    http: reqwest::Client,
    url: Url,
}

impl HttpRefresher {
    pub fn new(http: reqwest::Client, url: Url) -> Self { Self { http, url } }
}

impl TokenRefresher for HttpRefresher {
    fn refresh(&self) -> RefreshFuture {
        let http = self.http.clone();
        let url = self.url.clone();
        async move {
            let resp = http
                .post(url)
                .send()
                .await
                .map_err(|e| AppError::from(e).into_refresh_failure())?;
            if !resp.status().is_success() {
                return Err(AppError::from_response(resp).await.into_refresh_failure());
            }
            let body: RefreshResponse = resp
                .json()
                .await
                .map_err(|e| AppError::from(e).into_refresh_failure())?;
            if body.access_token.trim().is_empty() {
                return Err(AppError::refresh_failed("empty_token", "refresh endpoint returned an empty access token"));
            }
            Ok(AccessToken::new(body.access_token))
        }
        .boxed()
    }
}

type TokenListener = Arc<dyn Fn(Option<&AccessToken>) + Send + Sync>;

struct InFlight {
    id: u64,
    epoch: u64,
    fut: Shared<RefreshFuture>,
}

struct TokenInner {
    slot: RwLock<Option<AccessToken>>,
    // Bumped by every outside write to the slot. A refresh started in an older epoch never
    // stores its result.
    epoch: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
    refresher: Arc<dyn TokenRefresher>,
    refreshes: AtomicU64,
    listeners: RwLock<Vec<TokenListener>>,
}

impl TokenInner {
    fn replace(&self, token: &Option<AccessToken>) -> bool {
        let mut slot = self.slot.write();
        if *slot == *token {
            return false;
        }
        *slot = token.clone();
        true
    }

    /// Outside write (login, logout, reset). Starts a new epoch and abandons any running
    /// refresh when the value actually changes.
    fn store_external(&self, token: Option<AccessToken>) {
        let changed = {
            let mut in_flight = self.in_flight.lock();
            let changed = self.replace(&token);
            if changed {
                self.epoch.fetch_add(1, Ordering::SeqCst);
                if in_flight.take().is_some() {
                    debug!(target: "token", "abandoning in-flight refresh");
                }
            }
            changed
        };
        if changed {
            self.notify(token.as_ref());
        }
    }

    fn notify(&self, token: Option<&AccessToken>) {
        let listeners: Vec<TokenListener> = self.listeners.read().clone();
        for l in listeners {
            l(token);
        }
    }
}

/// Holder of the current access token.
///
/// Reads and writes are synchronous so the request path never awaits to attach a header.
/// Refreshes are single-flight: every caller that asks while one is running awaits the same
/// future and receives the same outcome. A refresh that is overtaken by a login, logout or
/// reset does not touch the slot. Clones share state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<TokenInner>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("has_token", &self.inner.slot.read().is_some())
            .field("epoch", &self.epoch())
            .field("refreshes", &self.refresh_count())
            .finish()
    }
}

fn session_reset() -> AppError {
    AppError::refresh_failed("session_reset", "session ended while the token was being refreshed")
}

impl TokenManager {
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                slot: RwLock::new(None),
                epoch: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                refresher,
                refreshes: AtomicU64::new(0),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.slot.read().clone()
    }

    /// `None` clears the slot.
    pub fn set_access_token(&self, token: Option<AccessToken>) {
        self.inner.store_external(token);
    }

    pub fn clear(&self) {
        self.inner.store_external(None);
    }

    /// Called with the new value whenever the slot changes. Listeners run with no lock held.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(Option<&AccessToken>) + Send + Sync + 'static,
    {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    /// Number of refresh calls actually issued to the refresher.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refreshes.load(Ordering::SeqCst)
    }

    /// Current token epoch. Changes on every login, logout or reset.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner
            .in_flight
            .lock()
            .as_ref()
            .map(|f| f.fut.peek().is_none())
            .unwrap_or(false)
    }

    /// Obtain a new token from the backend. On success the slot is updated; on failure it is
    /// left as it was and the caller decides whether to clear it.
    pub async fn refresh_access_token(&self) -> AppResult<AccessToken> {
        let (_, fut) = self.join_refresh();
        fut.await
    }

    /// Refresh on behalf of a request that failed while carrying `stale`. If the slot already
    /// holds a different token, some other refresh (or a login) superseded `stale` and that
    /// token is returned without another network call.
    pub async fn refresh_after(&self, stale: Option<&AccessToken>) -> AppResult<AccessToken> {
        self.refresh_tracked(stale).await.1
    }

    /// As `refresh_after`, also returning the epoch the refresh belonged to. `None` means no
    /// refresh ran for the current session, so a failure needs no teardown.
    pub(crate) async fn refresh_tracked(&self, stale: Option<&AccessToken>) -> (Option<u64>, AppResult<AccessToken>) {
        match (self.access_token(), stale) {
            (Some(current), _) if Some(&current) != stale => {
                debug!(target: "token", "token already replaced; reusing current");
                return (None, Ok(current));
            }
            (None, Some(_)) => {
                // Slot went from a token to empty: the session ended under this request.
                debug!(target: "token", "token cleared since request was sent; not refreshing");
                return (None, Err(session_reset()));
            }
            _ => {}
        }
        let (epoch, fut) = self.join_refresh();
        (Some(epoch), fut.await)
    }

    /// End the session after a failed refresh from `epoch`. Only the first caller for a given
    /// epoch gets `true`; later callers sharing the same failure get `false`.
    pub(crate) fn invalidate(&self, epoch: u64) -> bool {
        let changed = {
            let mut in_flight = self.inner.in_flight.lock();
            if self
                .inner
                .epoch
                .compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return false;
            }
            in_flight.take();
            self.inner.replace(&None)
        };
        if changed {
            self.inner.notify(None);
        }
        true
    }

    fn join_refresh(&self) -> (u64, Shared<RefreshFuture>) {
        let mut guard = self.inner.in_flight.lock();
        if let Some(existing) = guard.as_ref() {
            // A finished future is never joined; its outcome belongs to earlier callers.
            if existing.fut.peek().is_none() {
                debug!(target: "token", "joining in-flight refresh");
                return (existing.epoch, existing.fut.clone());
            }
        }
        let id = self.inner.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        debug!(target: "token", refresh = id, epoch, "starting refresh");
        let call = self.inner.refresher.refresh();
        let weak: Weak<TokenInner> = Arc::downgrade(&self.inner);
        let fut: RefreshFuture = async move {
            let out = call.await;
            let Some(inner) = weak.upgrade() else { return out };
            let (out, changed) = {
                let mut in_flight = inner.in_flight.lock();
                if in_flight.as_ref().map(|f| f.id) == Some(id) {
                    in_flight.take();
                }
                if inner.epoch.load(Ordering::SeqCst) != epoch {
                    debug!(target: "token", refresh = id, "refresh overtaken by a session change; discarding");
                    let current = inner.slot.read().clone();
                    (current.ok_or_else(session_reset), false)
                } else {
                    match out {
                        Ok(token) => {
                            let changed = inner.replace(&Some(token.clone()));
                            (Ok(token), changed)
                        }
                        Err(e) => {
                            warn!(target: "token", code = e.code_str(), "refresh failed: {}", e.message());
                            (Err(e), false)
                        }
                    }
                }
            };
            if changed {
                if let Ok(token) = &out {
                    inner.notify(Some(token));
                }
            }
            out
        }
        .boxed();
        let shared = fut.shared();
        *guard = Some(InFlight { id, epoch, fut: shared.clone() });
        (epoch, shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct CountingRefresher {
        calls: AtomicU64,
        delay: Duration,
        fail: bool,
    }

    impl CountingRefresher {
        fn new(delay_ms: u64, fail: bool) -> Arc<Self> {
            Arc::new(Self { calls: AtomicU64::new(0), delay: Duration::from_millis(delay_ms), fail })
        }
    }

    impl TokenRefresher for CountingRefresher {
        fn refresh(&self) -> RefreshFuture {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = self.delay;
            let fail = self.fail;
            async move {
                tokio::time::sleep(delay).await;
                if fail {
                    Err(AppError::refresh_failed("invalid_refresh", "cookie rejected"))
                } else {
                    Ok(AccessToken::new(format!("token-{}", n)))
                }
            }
            .boxed()
        }
    }

    #[test]
    fn set_get_and_clear() {
        let tm = TokenManager::new(CountingRefresher::new(0, false));
        assert!(tm.access_token().is_none());
        tm.set_access_token(Some("abc".into()));
        assert_eq!(tm.access_token().unwrap().as_str(), "abc");
        assert_eq!(tm.access_token().unwrap().bearer(), "Bearer abc");
        tm.clear();
        assert!(tm.access_token().is_none());
    }

    #[test]
    fn debug_output_redacts_token() {
        let t = AccessToken::new("super-secret");
        assert!(!format!("{:?}", t).contains("super-secret"));
    }

    #[tokio::test]
    async fn refresh_stores_new_token() {
        let r = CountingRefresher::new(1, false);
        let tm = TokenManager::new(r.clone());
        let t = tm.refresh_access_token().await.unwrap();
        assert_eq!(t.as_str(), "token-1");
        assert_eq!(tm.access_token(), Some(t));
        assert_eq!(tm.refresh_count(), 1);
        assert!(!tm.is_refreshing());
    }

    #[tokio::test]
    async fn failed_refresh_leaves_slot_untouched() {
        let tm = TokenManager::new(CountingRefresher::new(1, true));
        tm.set_access_token(Some("old".into()));
        let err = tm.refresh_access_token().await.unwrap_err();
        assert_eq!(err.code_str(), "invalid_refresh");
        assert_eq!(tm.access_token().unwrap().as_str(), "old");
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_call() {
        let r = CountingRefresher::new(50, false);
        let tm = TokenManager::new(r.clone());
        let waiters: Vec<_> = (0..5)
            .map(|_| {
                let tm = tm.clone();
                tokio::spawn(async move { tm.refresh_access_token().await })
            })
            .collect();
        for w in waiters {
            assert_eq!(w.await.unwrap().unwrap().as_str(), "token-1");
        }
        assert_eq!(r.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tm.refresh_count(), 1);
    }

    #[tokio::test]
    async fn sequential_refreshes_each_hit_the_backend() {
        let r = CountingRefresher::new(1, false);
        let tm = TokenManager::new(r.clone());
        tm.refresh_access_token().await.unwrap();
        let second = tm.refresh_access_token().await.unwrap();
        assert_eq!(second.as_str(), "token-2");
        assert_eq!(r.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_after_superseded_token_skips_network() {
        let r = CountingRefresher::new(1, false);
        let tm = TokenManager::new(r.clone());
        tm.set_access_token(Some("fresh".into()));
        let stale = AccessToken::new("stale");
        let t = tm.refresh_after(Some(&stale)).await.unwrap();
        assert_eq!(t.as_str(), "fresh");
        assert_eq!(r.calls.load(Ordering::SeqCst), 0);

        let current = tm.access_token();
        let t = tm.refresh_after(current.as_ref()).await.unwrap();
        assert_eq!(t.as_str(), "token-1");
        assert_eq!(r.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listeners_see_refreshed_tokens() {
        let tm = TokenManager::new(CountingRefresher::new(1, false));
        let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        tm.on_change(move |t| s.lock().push(t.map(|t| t.as_str().to_string())));
        tm.refresh_access_token().await.unwrap();
        tm.set_access_token(Some("token-1".into())); // unchanged value: no notification
        tm.clear();
        assert_eq!(*seen.lock(), vec![Some("token-1".to_string()), None]);
    }

    async fn spawn_refresh(tm: &TokenManager) -> tokio::task::JoinHandle<AppResult<AccessToken>> {
        let task = {
            let tm = tm.clone();
            tokio::spawn(async move { tm.refresh_access_token().await })
        };
        while !tm.is_refreshing() {
            tokio::task::yield_now().await;
        }
        task
    }

    #[tokio::test(start_paused = true)]
    async fn clear_during_refresh_discards_its_token() {
        let r = CountingRefresher::new(200, false);
        let tm = TokenManager::new(r.clone());
        tm.set_access_token(Some("old".into()));
        let task = spawn_refresh(&tm).await;

        tm.clear();
        assert!(!tm.is_refreshing());
        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.code_str(), "session_reset");
        assert!(tm.access_token().is_none());
        assert_eq!(r.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn login_during_refresh_keeps_login_token() {
        let tm = TokenManager::new(CountingRefresher::new(200, false));
        let task = spawn_refresh(&tm).await;
        tm.set_access_token(Some("from-login".into()));
        assert_eq!(task.await.unwrap().unwrap().as_str(), "from-login");
        assert_eq!(tm.access_token().unwrap().as_str(), "from-login");
    }

    #[tokio::test(start_paused = true)]
    async fn shared_failure_invalidates_once() {
        let tm = TokenManager::new(CountingRefresher::new(50, true));
        tm.set_access_token(Some("old".into()));
        let stale = tm.access_token();
        let (a, b) = tokio::join!(tm.refresh_tracked(stale.as_ref()), tm.refresh_tracked(stale.as_ref()));
        assert!(a.1.is_err() && b.1.is_err());
        let epoch = a.0.unwrap();
        assert_eq!(b.0, Some(epoch));

        assert!(tm.invalidate(epoch));
        assert!(!tm.invalidate(epoch));
        assert!(tm.access_token().is_none());
        assert_eq!(tm.refresh_count(), 1);
    }

    #[tokio::test]
    async fn cleared_token_is_not_refreshed_for_late_401() {
        let r = CountingRefresher::new(1, false);
        let tm = TokenManager::new(r.clone());
        tm.set_access_token(Some("t".into()));
        let stale = tm.access_token();
        tm.clear();
        let (epoch, out) = tm.refresh_tracked(stale.as_ref()).await;
        assert_eq!(epoch, None);
        assert_eq!(out.unwrap_err().code_str(), "session_reset");
        assert_eq!(r.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_may_register_listeners() {
        let tm = TokenManager::new(CountingRefresher::new(0, false));
        let hits = Arc::new(AtomicU64::new(0));
        let (tm2, h) = (tm.clone(), hits.clone());
        tm.on_change(move |_| {
            let h = h.clone();
            tm2.on_change(move |_| { h.fetch_add(1, Ordering::SeqCst); });
        });
        tm.set_access_token(Some("a".into()));
        tm.set_access_token(Some("b".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
