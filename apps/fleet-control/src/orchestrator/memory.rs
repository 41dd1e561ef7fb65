use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    ensure_addressable, resolve_member_name, MemberStatus, Orchestrator, OrchestratorError,
};

/// Process-local fleet for development runs and tests. Every created member is
/// immediately `Running` at the configured address.
pub struct InMemoryOrchestrator {
    members: RwLock<BTreeMap<String, MemberStatus>>,
    address: String,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::with_address("127.0.0.1")
    }

    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            members: RwLock::new(BTreeMap::new()),
            address: address.into(),
        }
    }

    /// Seeds a member in an arbitrary phase, e.g. one still waiting for an address.
    pub fn insert(&self, member: MemberStatus) {
        self.members.write().insert(member.name.clone(), member);
    }
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn list_members(&self) -> Result<Vec<String>, OrchestratorError> {
        Ok(self.members.read().keys().cloned().collect())
    }

    async fn create_member(&self, name: Option<String>) -> Result<String, OrchestratorError> {
        let name = resolve_member_name(name)?;
        let mut members = self.members.write();
        if members.contains_key(&name) {
            return Err(OrchestratorError::AlreadyExists(name));
        }
        members.insert(
            name.clone(),
            MemberStatus {
                name: name.clone(),
                phase: "Running".into(),
                address: Some(self.address.clone()),
            },
        );
        Ok(name)
    }

    async fn get_member(&self, name: &str) -> Result<MemberStatus, OrchestratorError> {
        ensure_addressable(name)?;
        self.members
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(name.to_owned()))
    }

    async fn delete_member(&self, name: &str) -> Result<(), OrchestratorError> {
        ensure_addressable(name)?;
        self.members
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::NotFound(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_round_trip() {
        let fleet = InMemoryOrchestrator::with_address("10.0.0.7");
        let name = fleet.create_member(Some("rover-x".into())).await.unwrap();
        assert_eq!(name, "rover-x");
        assert_eq!(fleet.list_members().await.unwrap(), vec!["rover-x"]);

        let member = fleet.get_member("rover-x").await.unwrap();
        assert_eq!(member.phase, "Running");
        assert_eq!(member.address.as_deref(), Some("10.0.0.7"));

        fleet.delete_member("rover-x").await.unwrap();
        assert!(matches!(
            fleet.get_member("rover-x").await,
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(matches!(
            fleet.delete_member("rover-x").await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_and_invalid_names_are_refused() {
        let fleet = InMemoryOrchestrator::new();
        fleet.create_member(Some("rover-a".into())).await.unwrap();
        assert!(matches!(
            fleet.create_member(Some("rover-a".into())).await,
            Err(OrchestratorError::AlreadyExists(_))
        ));
        assert!(matches!(
            fleet.create_member(Some("Rover_A".into())).await,
            Err(OrchestratorError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn generated_name_is_listed() {
        let fleet = InMemoryOrchestrator::new();
        let name = fleet.create_member(None).await.unwrap();
        assert!(fleet.list_members().await.unwrap().contains(&name));
    }
}
