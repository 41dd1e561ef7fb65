use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::time::timeout;

use crate::{
    directory::IdentityDirectory,
    session::{SessionRegistry, SessionToken},
};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials rejected")]
    Rejected,
    #[error("identity directory unavailable: {0}")]
    DirectoryUnavailable(String),
}

impl AuthError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::DirectoryUnavailable(_))
    }
}

/// Checks operator credentials against the identity directory and owns the
/// session registry that remembers successful logins.
#[derive(Clone)]
pub struct AuthGate {
    directory: Arc<dyn IdentityDirectory>,
    sessions: SessionRegistry,
    directory_timeout: Duration,
}

impl AuthGate {
    pub fn new(
        directory: Arc<dyn IdentityDirectory>,
        sessions: SessionRegistry,
        directory_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            sessions,
            directory_timeout,
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<SessionToken, AuthError> {
        match timeout(
            self.directory_timeout,
            self.directory.authenticate(username, password),
        )
        .await
        {
            Ok(Ok(())) => Ok(self.sessions.open(username)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(AuthError::DirectoryUnavailable(format!(
                "no answer within {:?}",
                self.directory_timeout
            ))),
        }
    }

    pub fn logout(&self, token: &str) -> Option<String> {
        self.sessions.close(token)
    }

    pub fn resolve(&self, token: &str) -> Option<String> {
        self.sessions.resolve(token)
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}
