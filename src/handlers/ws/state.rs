use std::collections::HashSet;

use crate::auth::Auth;

/// Per-connection state shared between the socket loop and message handlers.
#[derive(Debug)]
pub struct ConnectionState {
    pub connection_id: String,
    pub auth: Auth,
    /// Identity used when authentication is disabled
    anonymous_user: String,
    /// Documents this connection has requested or moved within
    pub documents: HashSet<String>,
}

impl ConnectionState {
    pub fn new(connection_id: String, auth: Auth, anonymous_user: String) -> Self {
        Self {
            connection_id,
            auth,
            anonymous_user,
            documents: HashSet::new(),
        }
    }

    /// User the scheduler knows this connection as. `None` until first-message auth succeeds.
    pub fn user_id(&self) -> Option<String> {
        if self.auth.is_pending() {
            return None;
        }
        Some(
            self.auth
                .id
                .clone()
                .unwrap_or_else(|| self.anonymous_user.clone()),
        )
    }

    pub fn tracks(&self, document_id: &str) -> bool {
        self.documents.contains(document_id)
    }
}
