use serde::{Deserialize, Serialize};
use tracing::info;

use super::{decode_json, ApiRequest, HttpClient};
use crate::error::AppResult;
use crate::identity::{AccessToken, User};

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Body returned by login and register. The refresh cookie arrives alongside it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: AccessToken,
    pub user: User,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    user: User,
}

/// Account endpoints. Login and register issue tokens directly and never go through the
/// refresh protocol; the profile fetch does.
#[derive(Debug, Clone)]
pub struct AccountApi {
    client: HttpClient,
}

impl AccountApi {
    pub fn new(client: HttpClient) -> Self { Self { client } }

    pub async fn login(&self, req: &LoginRequest) -> AppResult<AuthResponse> {
        let path = self.client.config().endpoints.login.clone();
        let resp = self.client.execute_once(&ApiRequest::post(path).with_json(req)?).await?;
        let out: AuthResponse = decode_json(resp).await?;
        info!(target: "session", user = %out.user.username, "login accepted");
        Ok(out)
    }

    pub async fn register(&self, req: &RegisterRequest) -> AppResult<AuthResponse> {
        let path = self.client.config().endpoints.register.clone();
        let resp = self.client.execute_once(&ApiRequest::post(path).with_json(req)?).await?;
        let out: AuthResponse = decode_json(resp).await?;
        info!(target: "session", user = %out.user.username, "registration accepted");
        Ok(out)
    }

    /// Profile of the bearer-authenticated caller.
    pub async fn me(&self) -> AppResult<User> {
        let path = self.client.config().endpoints.me.clone();
        let out: MeResponse = self.client.send_json(&ApiRequest::get(path)).await?;
        Ok(out.user)
    }

    /// Invalidate the server-side refresh state. Single attempt.
    pub async fn logout(&self) -> AppResult<()> {
        let path = self.client.config().endpoints.logout.clone();
        self.client.execute_once(&ApiRequest::post(path)).await.map(|_| ())
    }
}
