//! Client-side identity: the in-memory access token, the session lifecycle and route guards.
//! Keep the public surface thin and split implementation across sub-modules.

mod user;
mod token;
mod session;
mod guards;

pub use user::{User, UserPatch};
pub use token::{AccessToken, HttpRefresher, RefreshFuture, TokenManager, TokenRefresher};
pub use session::{Session, SessionContext, SessionPhase};
pub use guards::{enforce, enforce_with, GuardDecision, GuardOutcome, RouteGuard, ADMIN_DENIED_MESSAGE};
