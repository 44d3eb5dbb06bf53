use std::fmt;

pub const ACCESS_TOKEN_ENV: &str = "CDSE_ACCESS_TOKEN";

/// Bearer token attached to download requests. How it was obtained is not our concern.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Returns `None` when the variable is unset or blank.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var(ACCESS_TOKEN_ENV).ok()?;
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        Some(Self::new(token))
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

// Keep tokens out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("token", &"***").finish()
    }
}
