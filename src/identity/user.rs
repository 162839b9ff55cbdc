use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Fields the view layer may change after a successful account-settings call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPatch {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// `Some(None)` removes the avatar.
    #[serde(default)]
    pub avatar: Option<Option<String>>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.avatar.is_none()
    }
}

impl User {
    pub fn apply(&mut self, patch: &UserPatch) {
        if let Some(u) = &patch.username { self.username = u.clone(); }
        if let Some(e) = &patch.email { self.email = e.clone(); }
        if let Some(a) = &patch.avatar { self.avatar = a.clone(); }
    }
}
