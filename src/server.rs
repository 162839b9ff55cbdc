//!
//! gameshelf development backend
//! -----------------------------
//! Axum implementation of the endpoints the session core talks to. It exists for local
//! development and for the integration tests; production clients talk to the real API.
//!
//! Responsibilities:
//! - Login/register with Argon2-hashed passwords, issuing an access token plus an HttpOnly
//!   refresh cookie.
//! - Refresh, logout and profile endpoints.
//! - One protected resource and one admin-only resource.
//! - Test controls: request counters, token expiry, an artificial refresh delay.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::identity::User;

pub const REFRESH_COOKIE: &str = "gs_refresh";

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub access_ttl: Duration,
    /// Mark the refresh cookie `Secure`. Off for plain-http local runs.
    pub secure_cookie: bool,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self { access_ttl: Duration::from_secs(15 * 60), secure_cookie: false }
    }
}

impl BackendSettings {
    /// `GAMESHELF_ACCESS_TTL_SECS` and `GAMESHELF_SECURE_COOKIE` overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut s = Self::default();
        if let Ok(raw) = std::env::var("GAMESHELF_ACCESS_TTL_SECS") {
            let secs: u64 = raw.trim().parse().with_context(|| format!("GAMESHELF_ACCESS_TTL_SECS={}", raw))?;
            s.access_ttl = Duration::from_secs(secs);
        }
        if let Ok(raw) = std::env::var("GAMESHELF_SECURE_COOKIE") {
            s.secure_cookie = matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(s)
    }
}

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    password_hash: String,
}

#[derive(Debug, Clone)]
struct AccessGrant {
    user_id: i64,
    expires_at: Instant,
}

/// Per-endpoint request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    pub login: u64,
    pub register: u64,
    pub refresh: u64,
    pub logout: u64,
    pub me: u64,
    pub protected: u64,
    pub unauthorized: u64,
}

#[derive(Default)]
struct Counters {
    login: AtomicU64,
    register: AtomicU64,
    refresh: AtomicU64,
    logout: AtomicU64,
    me: AtomicU64,
    protected: AtomicU64,
    unauthorized: AtomicU64,
}

struct BackendInner {
    settings: BackendSettings,
    users: RwLock<HashMap<String, StoredUser>>,
    next_id: AtomicI64,
    refresh_sessions: RwLock<HashMap<String, i64>>,
    access_tokens: RwLock<HashMap<String, AccessGrant>>,
    counters: Counters,
    refresh_delay_ms: AtomicU64,
}

#[derive(Clone)]
pub struct BackendState {
    inner: Arc<BackendInner>,
}

impl BackendState {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            inner: Arc::new(BackendInner {
                settings,
                users: RwLock::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                refresh_sessions: RwLock::new(HashMap::new()),
                access_tokens: RwLock::new(HashMap::new()),
                counters: Counters::default(),
                refresh_delay_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Create a user directly, bypassing the HTTP register path.
    pub async fn seed_user(&self, username: &str, email: &str, password: &str, admin: bool) -> anyhow::Result<User> {
        let password_hash = hash_password(password)?;
        let mut users = self.inner.users.write().await;
        if users.contains_key(&username.to_lowercase()) {
            return Err(anyhow!("user '{}' already exists", username));
        }
        let user = User {
            id: self.inner.next_id.fetch_add(1, Ordering::SeqCst),
            username: username.to_string(),
            email: email.to_string(),
            admin,
            avatar: None,
        };
        users.insert(username.to_lowercase(), StoredUser { user: user.clone(), password_hash });
        Ok(user)
    }

    /// Expire every outstanding access token, as if their TTL had elapsed.
    pub async fn expire_access_tokens(&self) {
        let mut tokens = self.inner.access_tokens.write().await;
        let past = Instant::now();
        for grant in tokens.values_mut() {
            grant.expires_at = past;
        }
    }

    /// Drop all refresh sessions; later refresh calls answer 401.
    pub async fn revoke_refresh_sessions(&self) {
        self.inner.refresh_sessions.write().await.clear();
    }

    /// Hold each refresh response for `delay` before answering.
    pub fn set_refresh_delay(&self, delay: Duration) {
        self.inner.refresh_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn stats(&self) -> BackendStats {
        let c = &self.inner.counters;
        BackendStats {
            login: c.login.load(Ordering::SeqCst),
            register: c.register.load(Ordering::SeqCst),
            refresh: c.refresh.load(Ordering::SeqCst),
            logout: c.logout.load(Ordering::SeqCst),
            me: c.me.load(Ordering::SeqCst),
            protected: c.protected.load(Ordering::SeqCst),
            unauthorized: c.unauthorized.load(Ordering::SeqCst),
        }
    }

    /// Issue an access token, dropping grants that have already expired.
    async fn issue_access_token(&self, user_id: i64) -> anyhow::Result<String> {
        let token = gen_id()?;
        let now = Instant::now();
        let grant = AccessGrant { user_id, expires_at: now + self.inner.settings.access_ttl };
        let mut tokens = self.inner.access_tokens.write().await;
        tokens.retain(|_, g| g.expires_at > now);
        tokens.insert(token.clone(), grant);
        Ok(token)
    }

    async fn issue_refresh_session(&self, user_id: i64) -> anyhow::Result<String> {
        let sid = gen_id()?;
        self.inner.refresh_sessions.write().await.insert(sid.clone(), user_id);
        Ok(sid)
    }

    async fn user_by_id(&self, user_id: i64) -> Option<User> {
        let users = self.inner.users.read().await;
        users.values().find(|u| u.user.id == user_id).map(|u| u.user.clone())
    }

    /// Resolve the bearer token to a user, or the 401 response to send.
    async fn authenticate(&self, headers: &HeaderMap) -> Result<User, Response> {
        let Some(token) = bearer_token(headers) else {
            return Err(self.unauthorized("missing_token", "authorization header required"));
        };
        let grant = self.inner.access_tokens.read().await.get(&token).cloned();
        let Some(grant) = grant else {
            return Err(self.unauthorized("invalid_token", "unknown access token"));
        };
        if grant.expires_at <= Instant::now() {
            return Err(self.unauthorized("token_expired", "access token expired"));
        }
        match self.user_by_id(grant.user_id).await {
            Some(u) => Ok(u),
            None => Err(self.unauthorized("invalid_token", "user no longer exists")),
        }
    }

    fn unauthorized(&self, code: &str, message: &str) -> Response {
        self.inner.counters.unauthorized.fetch_add(1, Ordering::SeqCst);
        error_response(StatusCode::UNAUTHORIZED, code, message)
    }

    fn set_refresh_cookie(&self, sid: &str) -> HeaderValue {
        let secure = if self.inner.settings.secure_cookie { "; Secure" } else { "" };
        HeaderValue::from_str(&format!("{}={}; HttpOnly; SameSite=Strict; Path=/{}", REFRESH_COOKIE, sid, secure))
            .unwrap_or_else(|_| HeaderValue::from_static("gs_refresh=; Max-Age=0; Path=/"))
    }
}

pub fn router(state: BackendState) -> Router {
    Router::new()
        .route("/", get(|| async { "gameshelf dev backend ok" }))
        .route("/login", post(login))
        .route("/register", post(register))
        .route("/api/token/refresh", post(refresh))
        .route("/api/logout", post(logout))
        .route("/api/me", get(me))
        .route("/api/collection", get(collection))
        .route("/api/admin/reports", get(admin_reports))
        .with_state(state)
}

/// Serve on `addr` in a background task. Binding to port 0 picks a free port; the bound
/// address is returned.
pub async fn spawn(state: BackendState, addr: SocketAddr) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding dev backend to {}", addr))?;
    let bound = listener.local_addr()?;
    let app = router(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(target: "backend", "dev backend stopped: {}", e);
        }
    });
    info!(target: "backend", "dev backend listening on {}", bound);
    Ok((bound, handle))
}

/// Run in the foreground with demo accounts `admin/admin` and `player/player`.
pub async fn run_with_port(port: u16) -> anyhow::Result<()> {
    let state = BackendState::new(BackendSettings::from_env()?);
    state.seed_user("admin", "admin@gameshelf.local", "admin", true).await?;
    state.seed_user("player", "player@gameshelf.local", "player", false).await?;
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "backend", "Starting dev backend on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn gen_id() -> anyhow::Result<String> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow!("random source unavailable: {}", e))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

// Reduced Argon2 cost: this backend is for local runs and tests only.
fn hasher() -> anyhow::Result<Argon2<'static>> {
    let params = Params::new(4 * 1024, 1, 1, None).map_err(|e| anyhow!(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let phc = hasher()?.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else { return false };
    match hasher() {
        Ok(h) => h.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all("cookie").iter() {
        let Ok(s) = cookie.to_str() else { continue };
        for part in s.split(';') {
            if let Some((k, v)) = part.trim().split_once('=') {
                if k == name && !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("authorization")?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ").or_else(|| raw.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() { None } else { Some(token.to_string()) }
}

fn clear_refresh_cookie() -> HeaderValue {
    HeaderValue::from_static("gs_refresh=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; HttpOnly; SameSite=Strict; Path=/")
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({"error": code, "message": message}))).into_response()
}

#[derive(Debug, Deserialize)]
struct LoginPayload { username: String, password: String }

#[derive(Debug, Deserialize)]
struct RegisterPayload { username: String, email: String, password: String }

fn internal_error(e: anyhow::Error) -> Response {
    error!(target: "backend", "internal error: {:#}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal server error")
}

async fn start_session(state: &BackendState, user: User) -> Response {
    let access = match state.issue_access_token(user.id).await {
        Ok(t) => t,
        Err(e) => return internal_error(e),
    };
    let sid = match state.issue_refresh_session(user.id).await {
        Ok(s) => s,
        Err(e) => return internal_error(e),
    };
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, state.set_refresh_cookie(&sid));
    (StatusCode::OK, headers, Json(json!({"accessToken": access, "user": user}))).into_response()
}

async fn login(State(state): State<BackendState>, Json(payload): Json<LoginPayload>) -> Response {
    state.inner.counters.login.fetch_add(1, Ordering::SeqCst);
    let stored = state.inner.users.read().await.get(&payload.username.to_lowercase()).cloned();
    match stored {
        Some(s) if verify_password(&s.password_hash, &payload.password) => {
            debug!(target: "backend", user = %s.user.username, "login ok");
            start_session(&state, s.user).await
        }
        _ => state.unauthorized("invalid_credentials", "invalid username or password"),
    }
}

async fn register(State(state): State<BackendState>, Json(payload): Json<RegisterPayload>) -> Response {
    state.inner.counters.register.fetch_add(1, Ordering::SeqCst);
    if payload.username.trim().is_empty() || payload.password.is_empty() || !payload.email.contains('@') {
        return error_response(StatusCode::BAD_REQUEST, "invalid_input", "username, email and password are required");
    }
    match state.seed_user(payload.username.trim(), payload.email.trim(), &payload.password, false).await {
        Ok(user) => start_session(&state, user).await,
        Err(e) => error_response(StatusCode::CONFLICT, "user_exists", &e.to_string()),
    }
}

async fn refresh(State(state): State<BackendState>, headers: HeaderMap) -> Response {
    state.inner.counters.refresh.fetch_add(1, Ordering::SeqCst);
    let delay = state.inner.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let Some(sid) = parse_cookie(&headers, REFRESH_COOKIE) else {
        return state.unauthorized("missing_refresh", "refresh cookie required");
    };
    let user_id = state.inner.refresh_sessions.read().await.get(&sid).copied();
    let Some(user_id) = user_id else {
        return state.unauthorized("invalid_refresh", "refresh session not found");
    };
    match state.issue_access_token(user_id).await {
        Ok(access) => (StatusCode::OK, Json(json!({"accessToken": access}))).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn logout(State(state): State<BackendState>, headers: HeaderMap) -> Response {
    state.inner.counters.logout.fetch_add(1, Ordering::SeqCst);
    if let Some(sid) = parse_cookie(&headers, REFRESH_COOKIE) {
        state.inner.refresh_sessions.write().await.remove(&sid);
    }
    if let Some(token) = bearer_token(&headers) {
        state.inner.access_tokens.write().await.remove(&token);
    }
    let mut h = HeaderMap::new();
    h.insert(SET_COOKIE, clear_refresh_cookie());
    (StatusCode::OK, h, Json(json!({"status": "ok"}))).into_response()
}

async fn me(State(state): State<BackendState>, headers: HeaderMap) -> Response {
    state.inner.counters.me.fetch_add(1, Ordering::SeqCst);
    match state.authenticate(&headers).await {
        Ok(user) => (StatusCode::OK, Json(json!({"user": user}))).into_response(),
        Err(resp) => resp,
    }
}

async fn collection(State(state): State<BackendState>, headers: HeaderMap) -> Response {
    state.inner.counters.protected.fetch_add(1, Ordering::SeqCst);
    match state.authenticate(&headers).await {
        Ok(user) => (
            StatusCode::OK,
            Json(json!({
                "owner": user.username,
                "items": [
                    {"gameId": 1, "title": "Chrono Trigger", "owned": true, "condition": "complete"},
                    {"gameId": 2, "title": "EarthBound", "owned": false, "condition": null}
                ]
            })),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

async fn admin_reports(State(state): State<BackendState>, headers: HeaderMap) -> Response {
    state.inner.counters.protected.fetch_add(1, Ordering::SeqCst);
    let user = match state.authenticate(&headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if !user.admin {
        return error_response(StatusCode::FORBIDDEN, "forbidden", "admin only");
    }
    let users = state.inner.users.read().await.len();
    let sessions = state.inner.refresh_sessions.read().await.len();
    (StatusCode::OK, Json(json!({"users": users, "activeSessions": sessions}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_cookie() {
        let mut h = HeaderMap::new();
        h.insert("cookie", HeaderValue::from_static("theme=dark; gs_refresh=abc123; other=1"));
        assert_eq!(parse_cookie(&h, REFRESH_COOKIE).as_deref(), Some("abc123"));
        assert_eq!(parse_cookie(&h, "missing"), None);
    }

    #[test]
    fn parses_bearer_header() {
        let mut h = HeaderMap::new();
        assert_eq!(bearer_token(&h), None);
        h.insert("authorization", HeaderValue::from_static("Bearer tok-1"));
        assert_eq!(bearer_token(&h).as_deref(), Some("tok-1"));
        h.insert("authorization", HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert_eq!(bearer_token(&h), None);
    }

    #[test]
    fn password_hash_round_trip() {
        let phc = hash_password("hunter2").unwrap();
        assert!(verify_password(&phc, "hunter2"));
        assert!(!verify_password(&phc, "hunter3"));
        assert!(!verify_password("not-a-phc-string", "hunter2"));
    }

    #[test]
    fn refresh_cookie_is_http_only() {
        let state = BackendState::new(BackendSettings::default());
        let v = state.set_refresh_cookie("sid");
        let s = v.to_str().unwrap();
        assert!(s.starts_with("gs_refresh=sid"));
        assert!(s.contains("HttpOnly"));
        assert!(!s.contains("Secure"));

        let state = BackendState::new(BackendSettings { secure_cookie: true, ..Default::default() });
        assert!(state.set_refresh_cookie("sid").to_str().unwrap().contains("Secure"));
    }

    #[tokio::test]
    async fn duplicate_seed_is_rejected() {
        let state = BackendState::new(BackendSettings::default());
        state.seed_user("kai", "kai@example.com", "pw", false).await.unwrap();
        assert!(state.seed_user("KAI", "kai2@example.com", "pw", false).await.is_err());
    }

    #[test]
    fn generated_ids_are_distinct_and_url_safe() {
        let a = gen_id().unwrap();
        let b = gen_id().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn issuing_a_token_prunes_expired_grants() {
        let state = BackendState::new(BackendSettings::default());
        let first = state.issue_access_token(1).await.unwrap();
        state.issue_access_token(1).await.unwrap();
        state.expire_access_tokens().await;
        let fresh = state.issue_access_token(1).await.unwrap();

        let tokens = state.inner.access_tokens.read().await;
        assert_eq!(tokens.len(), 1);
        assert!(tokens.contains_key(&fresh));
        assert!(!tokens.contains_key(&first));
    }
}
