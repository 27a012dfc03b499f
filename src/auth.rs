//! Request identity and API secret matching.

use subtle::ConstantTimeEq;

use crate::config::AuthApiSecret;

/// Authentication context attached to each request by the auth middleware.
///
/// `id` is the authenticated client identifier and doubles as the user id
/// for scheduling, notifications and usage accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Auth {
    pub id: Option<String>,
    /// WebSocket connected without a token; the first message must be `auth`.
    pub pending: bool,
}

impl Auth {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            pending: false,
        }
    }

    /// Authentication disabled.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn pending() -> Self {
        Self {
            id: None,
            pending: true,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }
}

/// Find the id of the API secret matching `token`.
///
/// Every configured secret is compared in constant time so the match position
/// does not leak through timing.
pub fn match_api_secret_id<'a>(token: &str, secrets: &'a [AuthApiSecret]) -> Option<&'a str> {
    let mut matched = None;
    for entry in secrets {
        let equal: bool = entry.secret.as_bytes().ct_eq(token.as_bytes()).into();
        if equal && matched.is_none() {
            matched = Some(entry.id.as_str());
        }
    }
    matched
}
