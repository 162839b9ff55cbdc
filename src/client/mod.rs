//!
//! gameshelf HTTP client
//! ---------------------
//! Wraps `reqwest` with the two interceptors the session model depends on:
//! - request side: attach `Authorization: Bearer <token>` when the token slot holds one;
//! - response side: on 401, refresh once and re-issue the same logical request.
//!
//! A single `reqwest::Client` with a cookie store backs every call, so the HttpOnly refresh
//! cookie set by login travels with refresh and logout without this code ever touching it.

use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{AccessToken, HttpRefresher, TokenManager};
use crate::nav::{Navigator, Route};

pub mod account;

pub use account::{AccountApi, AuthResponse, LoginRequest, RegisterRequest};

/// One logical request. Kept by value so the exact request can be re-issued after a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new<P: Into<String>>(method: Method, path: P) -> Self {
        Self { method, path: path.into(), query: Vec::new(), body: None }
    }

    pub fn get<P: Into<String>>(path: P) -> Self { Self::new(Method::GET, path) }
    pub fn post<P: Into<String>>(path: P) -> Self { Self::new(Method::POST, path) }
    pub fn put<P: Into<String>>(path: P) -> Self { Self::new(Method::PUT, path) }
    pub fn delete<P: Into<String>>(path: P) -> Self { Self::new(Method::DELETE, path) }

    pub fn with_query<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_json<B: Serialize>(mut self, body: &B) -> AppResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }
}

#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    tokens: TokenManager,
    navigator: Navigator,
    refresh_url: Url,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base", &self.config.base_url.as_str())
            .field("tokens", &self.tokens)
            .finish()
    }
}

impl HttpClient {
    /// Build the cookie-carrying client and the token manager that refreshes through it.
    pub fn new(config: ClientConfig, navigator: Navigator) -> AppResult<Self> {
        let mut builder = reqwest::Client::builder().cookie_store(true);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        let refresh_url = config.refresh_url()?;
        let tokens = TokenManager::new(Arc::new(HttpRefresher::new(http.clone(), refresh_url.clone())));
        Self::from_parts(http, config, tokens, navigator)
    }

    /// Assemble from existing parts, e.g. a token manager with a custom refresher.
    pub fn from_parts(http: reqwest::Client, config: ClientConfig, tokens: TokenManager, navigator: Navigator) -> AppResult<Self> {
        let refresh_url = config.refresh_url()?;
        Ok(Self { http, config: Arc::new(config), tokens, navigator, refresh_url })
    }

    pub fn tokens(&self) -> &TokenManager { &self.tokens }
    pub fn navigator(&self) -> &Navigator { &self.navigator }
    pub fn config(&self) -> &ClientConfig { &self.config }

    /// Send `req`, recovering once from an expired access token.
    ///
    /// Non-2xx responses become errors. A 401 triggers a refresh and one retry carrying the
    /// refreshed token; a 401 on the retry is returned as is. A failed refresh clears the
    /// token, hard-navigates to login and is returned to the caller. Concurrent requests that
    /// share one failed refresh navigate once. Calls to the refresh
    /// endpoint itself never recurse into a refresh.
    pub async fn execute(&self, req: &ApiRequest) -> AppResult<reqwest::Response> {
        let url = self.resolve(req)?;
        let is_refresh = self.is_refresh_endpoint(&url);
        let mut token = self.tokens.access_token();
        let mut retried = false;
        loop {
            let resp = self.send_once(req, &url, token.as_ref()).await?;
            let status = resp.status();
            if status.is_success() {
                return Ok(resp);
            }
            let err = AppError::from_response(resp).await;
            if is_refresh || status != StatusCode::UNAUTHORIZED || retried {
                debug!(target: "http", method = %req.method, path = %url.path(), status = status.as_u16(), retried, "request failed");
                return Err(err);
            }
            retried = true;
            info!(target: "http", method = %req.method, path = %url.path(), "401 received; refreshing access token");
            let (epoch, refreshed) = self.tokens.refresh_tracked(token.as_ref()).await;
            match refreshed {
                Ok(fresh) => token = Some(fresh),
                Err(refresh_err) => {
                    // Requests sharing one failed refresh end the session once.
                    if epoch.map(|e| self.tokens.invalidate(e)).unwrap_or(false) {
                        warn!(target: "http", code = refresh_err.code_str(), "refresh failed; ending session");
                        self.navigator.hard_navigate(Route::Login);
                    } else {
                        debug!(target: "http", code = refresh_err.code_str(), "refresh failed; session already ended");
                    }
                    return Err(refresh_err);
                }
            }
        }
    }

    /// Single attempt with the bearer header but without 401 recovery. Used for account
    /// endpoints that must not enter the refresh protocol.
    pub async fn execute_once(&self, req: &ApiRequest) -> AppResult<reqwest::Response> {
        let url = self.resolve(req)?;
        let token = self.tokens.access_token();
        let resp = self.send_once(req, &url, token.as_ref()).await?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(AppError::from_response(resp).await)
        }
    }

    pub async fn send_json<T: DeserializeOwned>(&self, req: &ApiRequest) -> AppResult<T> {
        let resp = self.execute(req).await?;
        decode_json(resp).await
    }

    /// Send and discard the body; for endpoints answering 204 or an ignorable payload.
    pub async fn send(&self, req: &ApiRequest) -> AppResult<()> {
        self.execute(req).await.map(|_| ())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        self.send_json(&ApiRequest::get(path)).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> AppResult<T> {
        self.send_json(&ApiRequest::post(path).with_json(body)?).await
    }

    fn resolve(&self, req: &ApiRequest) -> AppResult<Url> {
        let mut url = self.config.resolve(&req.path)?;
        if !req.query.is_empty() {
            url.query_pairs_mut().extend_pairs(req.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }

    fn is_refresh_endpoint(&self, url: &Url) -> bool {
        let mut bare = url.clone();
        bare.set_query(None);
        bare.set_fragment(None);
        bare == self.refresh_url
    }

    async fn send_once(&self, req: &ApiRequest, url: &Url, token: Option<&AccessToken>) -> AppResult<reqwest::Response> {
        let mut rb = self.http.request(req.method.clone(), url.clone());
        if let Some(t) = token {
            rb = rb.header(AUTHORIZATION, t.bearer());
        }
        if let Some(body) = &req.body {
            rb = rb.json(body);
        }
        Ok(rb.send().await?)
    }
}

pub(crate) async fn decode_json<T: DeserializeOwned>(resp: reqwest::Response) -> AppResult<T> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(AppError::from)
}
