//! Client configuration: backend base URL, request timeout and endpoint paths.
//! Values come from code (`ClientConfig::new`) or from `GAMESHELF_*` environment variables.

use std::time::Duration;

use reqwest::Url;

use crate::error::{AppError, AppResult};

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:5000";

/// How long the admin guard shows its inline permission error before redirecting.
pub const ADMIN_DENIED_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub refresh: String,
    pub logout: String,
    pub me: String,
    pub login: String,
    pub register: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            refresh: "/api/token/refresh".to_string(),
            logout: "/api/logout".to_string(),
            me: "/api/me".to_string(),
            login: "/login".to_string(),
            register: "/register".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub timeout: Option<Duration>,
    pub endpoints: Endpoints,
}

impl ClientConfig {
    pub fn new(base: &str) -> AppResult<Self> {
        let base_url = Url::parse(base)
            .map_err(|e| AppError::config("invalid_base_url", format!("{}: {}", base, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::config("invalid_base_url", format!("{} cannot be used as a base URL", base)));
        }
        Ok(Self { base_url, timeout: Some(Duration::from_secs(30)), endpoints: Endpoints::default() })
    }

    /// Read `GAMESHELF_API_BASE`, `GAMESHELF_HTTP_TIMEOUT_MS` and the `GAMESHELF_*_PATH` overrides.
    pub fn from_env() -> AppResult<Self> {
        let base = std::env::var("GAMESHELF_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let mut cfg = Self::new(&base)?;
        if let Ok(raw) = std::env::var("GAMESHELF_HTTP_TIMEOUT_MS") {
            let ms: u64 = raw
                .trim()
                .parse()
                .map_err(|_| AppError::config("invalid_timeout", format!("GAMESHELF_HTTP_TIMEOUT_MS={}", raw)))?;
            // 0 disables the client-side timeout
            cfg.timeout = if ms == 0 { None } else { Some(Duration::from_millis(ms)) };
        }
        let overrides: [(&str, &mut String); 5] = [
            ("GAMESHELF_REFRESH_PATH", &mut cfg.endpoints.refresh),
            ("GAMESHELF_LOGOUT_PATH", &mut cfg.endpoints.logout),
            ("GAMESHELF_ME_PATH", &mut cfg.endpoints.me),
            ("GAMESHELF_LOGIN_PATH", &mut cfg.endpoints.login),
            ("GAMESHELF_REGISTER_PATH", &mut cfg.endpoints.register),
        ];
        for (var, slot) in overrides {
            if let Ok(v) = std::env::var(var) {
                if !v.trim().is_empty() { *slot = v.trim().to_string(); }
            }
        }
        Ok(cfg)
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve an endpoint path against the base URL. Absolute URLs pass through;
    /// relative paths are appended to the base path rather than replacing it.
    pub fn resolve(&self, path: &str) -> AppResult<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(|e| AppError::config("invalid_url", format!("{}: {}", path, e)));
        }
        let base = self.base_url.as_str().trim_end_matches('/');
        let joined = format!("{}/{}", base, path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|e| AppError::config("invalid_url", format!("{}: {}", joined, e)))
    }

    pub fn refresh_url(&self) -> AppResult<Url> { self.resolve(&self.endpoints.refresh) }
}
