use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ADMIN_DENIED_DELAY;
use crate::nav::Route;

use super::session::{Session, SessionContext};

pub const ADMIN_DENIED_MESSAGE: &str = "You do not have permission to view this page.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteGuard {
    AuthenticatedOnly,
    PublicOnly,
    AdminOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session not settled yet; show a placeholder, never the nested content.
    Loading,
    Render,
    Redirect(Route),
    /// Show `message` inline, then move to `redirect` once `after` has elapsed.
    Deny { message: String, redirect: Route, after: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Rendered,
    Redirected(Route),
    Denied { message: String, redirected_to: Route },
}

impl RouteGuard {
    /// Guard protecting `route`, if any. Unknown application paths are protected.
    pub fn for_route(route: &Route) -> Option<RouteGuard> {
        match route {
            Route::Home => None,
            Route::Login | Route::Register => Some(RouteGuard::PublicOnly),
            Route::Admin => Some(RouteGuard::AdminOnly),
            Route::Dashboard | Route::Path(_) => Some(RouteGuard::AuthenticatedOnly),
        }
    }

    pub fn decide(&self, session: &Session) -> GuardDecision {
        if session.initializing {
            return GuardDecision::Loading;
        }
        match self {
            RouteGuard::AuthenticatedOnly => {
                if session.access_token.is_some() { GuardDecision::Render } else { GuardDecision::Redirect(Route::Login) }
            }
            RouteGuard::PublicOnly => {
                if session.user.is_none() { GuardDecision::Render } else { GuardDecision::Redirect(Route::Home) }
            }
            RouteGuard::AdminOnly => match &session.user {
                None => GuardDecision::Redirect(Route::Home),
                Some(u) if !u.admin => GuardDecision::Deny {
                    message: ADMIN_DENIED_MESSAGE.to_string(),
                    redirect: Route::Home,
                    after: ADMIN_DENIED_DELAY,
                },
                Some(_) => GuardDecision::Render,
            },
        }
    }
}

/// Drive `guard` to a final outcome against the live session.
pub async fn enforce(guard: RouteGuard, session: &SessionContext) -> GuardOutcome {
    enforce_with(guard, session, |_| {}).await
}

/// As `enforce`, reporting interim decisions (`Loading`, `Deny`) to `observe` so a view can show
/// a placeholder or the inline error while the guard waits.
pub async fn enforce_with<F>(guard: RouteGuard, session: &SessionContext, mut observe: F) -> GuardOutcome
where
    F: FnMut(&GuardDecision),
{
    let mut rx = session.subscribe();
    loop {
        let snapshot = rx.borrow_and_update().clone();
        let decision = guard.decide(&snapshot);
        match decision {
            GuardDecision::Loading => {
                observe(&decision);
                if rx.changed().await.is_err() {
                    // Sender gone: the session was torn down; treat as anonymous.
                    return redirect(session, Route::Login);
                }
            }
            GuardDecision::Render => {
                debug!(target: "guard", guard = ?guard, "render");
                return GuardOutcome::Rendered;
            }
            GuardDecision::Redirect(route) => {
                debug!(target: "guard", guard = ?guard, "redirect to {}", route.path());
                return redirect(session, route);
            }
            GuardDecision::Deny { ref message, ref redirect, after } => {
                warn!(target: "guard", guard = ?guard, "access denied; redirecting in {:?}", after);
                observe(&decision);
                tokio::time::sleep(after).await;
                session.navigator().redirect(redirect.clone());
                return GuardOutcome::Denied { message: message.clone(), redirected_to: redirect.clone() };
            }
        }
    }
}

fn redirect(session: &SessionContext, route: Route) -> GuardOutcome {
    session.navigator().redirect(route.clone());
    GuardOutcome::Redirected(route)
}
