//! Fleet member lifecycle against the orchestration substrate.
//!
//! The substrate is the only source of truth for members; nothing here caches
//! member state beyond a single call.

mod kubernetes;
mod memory;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub use kubernetes::{KubeOrchestrator, RoverTemplate};
pub use memory::InMemoryOrchestrator;

const MAX_NAME_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberStatus {
    pub name: String,
    pub phase: String,
    pub address: Option<String>,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("rover {0} not found")]
    NotFound(String),
    #[error("rover {0} already exists")]
    AlreadyExists(String),
    #[error("invalid rover name {0:?}: expected a lowercase DNS-1123 label")]
    InvalidName(String),
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("{operation} failed: {message}")]
    Substrate {
        operation: &'static str,
        message: String,
    },
}

impl OrchestratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Timeout { .. } | OrchestratorError::Substrate { .. }
        )
    }
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn list_members(&self) -> Result<Vec<String>, OrchestratorError>;
    /// Provisions a member, generating a name when none is given.
    async fn create_member(&self, name: Option<String>) -> Result<String, OrchestratorError>;
    async fn get_member(&self, name: &str) -> Result<MemberStatus, OrchestratorError>;
    async fn delete_member(&self, name: &str) -> Result<(), OrchestratorError>;
}

pub type FleetHandle = Arc<dyn Orchestrator>;

pub fn generate_member_name() -> String {
    format!("rover-{}", Uuid::new_v4().simple())
}

pub fn validate_member_name(name: &str) -> Result<(), OrchestratorError> {
    let bytes = name.as_bytes();
    let valid = !bytes.is_empty()
        && bytes.len() <= MAX_NAME_LEN
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric();
    if valid {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidName(name.to_owned()))
    }
}

/// Picks the caller's name or generates one.
pub(crate) fn resolve_member_name(requested: Option<String>) -> Result<String, OrchestratorError> {
    match requested {
        Some(name) => {
            validate_member_name(&name)?;
            Ok(name)
        }
        None => Ok(generate_member_name()),
    }
}

/// A name that cannot be a member is simply not found; it is never handed to
/// the substrate.
pub(crate) fn ensure_addressable(name: &str) -> Result<(), OrchestratorError> {
    validate_member_name(name).map_err(|_| OrchestratorError::NotFound(name.to_owned()))
}
