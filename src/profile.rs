use serde_json::Value;
use std::sync::RwLock;

#[derive(Debug, Default, Clone)]
struct ProfileData {
    username: String,
    nickname: String,
}

/// The local account's own identity, populated once from the post-login
/// initialization payload and read by the sync loop to drop self-authored
/// messages.
#[derive(Debug, Default)]
pub struct Profile {
    inner: RwLock<ProfileData>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the `User` object from the init payload.
    pub fn apply(&self, user: &Value) {
        let mut data = self.inner.write().expect("profile poisoned");
        if let Some(username) = user.get("UserName").and_then(Value::as_str) {
            data.username = username.to_string();
        }
        if let Some(nickname) = user.get("NickName").and_then(Value::as_str) {
            data.nickname = nickname.to_string();
        }
    }

    pub fn username(&self) -> String {
        self.inner.read().expect("profile poisoned").username.clone()
    }

    pub fn nickname(&self) -> String {
        self.inner.read().expect("profile poisoned").nickname.clone()
    }

    pub fn clear(&self) {
        *self.inner.write().expect("profile poisoned") = ProfileData::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_populates_identity() {
        let profile = Profile::new();
        profile.apply(&json!({"UserName": "@me", "NickName": "Me"}));
        assert_eq!(profile.username(), "@me");
        assert_eq!(profile.nickname(), "Me");
    }

    #[test]
    fn clear_resets_identity() {
        let profile = Profile::new();
        profile.apply(&json!({"UserName": "@me", "NickName": "Me"}));
        profile.clear();
        assert_eq!(profile.username(), "");
    }
}
