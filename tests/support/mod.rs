#![allow(dead_code)]

use std::net::SocketAddr;

use tokio::task::JoinHandle;

use gameshelf::client::{AccountApi, HttpClient, LoginRequest};
use gameshelf::config::ClientConfig;
use gameshelf::identity::SessionContext;
use gameshelf::nav::{Navigator, Route};
use gameshelf::server::{self, BackendSettings, BackendState};

/// In-process dev backend on an ephemeral localhost port. Seeded with `admin/admin` (admin)
/// and `player/player`. The server task is aborted on drop.
pub struct Backend {
    pub state: BackendState,
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl Backend {
    pub async fn start() -> Backend {
        Self::start_with(BackendSettings::default()).await
    }

    pub async fn start_with(settings: BackendSettings) -> Backend {
        let state = BackendState::new(settings);
        state.seed_user("admin", "admin@example.com", "admin", true).await.expect("seed admin");
        state.seed_user("player", "player@example.com", "player", false).await.expect("seed player");
        let (addr, handle) = server::spawn(state.clone(), "127.0.0.1:0".parse().unwrap()).await.expect("spawn backend");
        Backend { state, addr, handle }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(&self.base_url()).expect("client config")
    }

    /// Fresh client (own cookie jar) starting at `route`.
    pub fn client(&self, route: Route) -> HttpClient {
        HttpClient::new(self.config(), Navigator::new(route)).expect("http client")
    }

    pub fn session(&self, route: Route) -> SessionContext {
        SessionContext::new(self.client(route))
    }

    /// Session that has logged in through the HTTP login endpoint.
    pub async fn logged_in(&self, username: &str, password: &str) -> SessionContext {
        let session = self.session(Route::Login);
        session.bootstrap(&Route::Login).await;
        let resp = session
            .account()
            .login(&LoginRequest { username: username.into(), password: password.into() })
            .await
            .expect("login");
        session.login(resp.access_token, resp.user);
        session
    }
}

/// Log in over `client` without creating a session, leaving the refresh cookie in its jar.
pub async fn login_cookie_only(client: &HttpClient, username: &str, password: &str) {
    AccountApi::new(client.clone())
        .login(&LoginRequest { username: username.into(), password: password.into() })
        .await
        .expect("login");
}
