//! Shared handler state for the control panel router.

use std::path::{Path, PathBuf};

use crate::{auth::AuthGate, dispatch::Dispatcher, orchestrator::FleetHandle};

#[derive(Clone)]
pub struct AppState {
    auth: AuthGate,
    fleet: FleetHandle,
    dispatcher: Dispatcher,
    secure_cookies: bool,
    public_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(auth: AuthGate, fleet: FleetHandle, dispatcher: Dispatcher) -> Self {
        Self {
            auth,
            fleet,
            dispatcher,
            secure_cookies: false,
            public_dir: None,
        }
    }

    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    /// Serves the operator dashboard from `dir` for paths outside `/api`.
    pub fn with_public_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.public_dir = Some(dir.into());
        self
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    pub fn fleet(&self) -> &FleetHandle {
        &self.fleet
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }

    pub fn public_dir(&self) -> Option<&Path> {
        self.public_dir.as_deref()
    }
}
