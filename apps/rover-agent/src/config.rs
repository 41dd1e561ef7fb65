use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use serde::Deserialize;

use crate::executor::ExecPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_command_workdir")]
    pub command_workdir: PathBuf,
    #[serde(default = "default_command_env_allow")]
    pub command_env_allow: String,
    #[serde(default)]
    pub command_uid: Option<u32>,
    #[serde(default)]
    pub command_gid: Option<u32>,
    #[serde(default = "default_command_max_output_bytes")]
    pub command_max_output_bytes: usize,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .ignore_empty(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.server_port))
    }

    pub fn exec_policy(&self) -> ExecPolicy {
        ExecPolicy {
            workdir: self.command_workdir.clone(),
            timeout: Duration::from_secs(self.command_timeout_secs),
            env_allow: self
                .command_env_allow
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_owned)
                .collect(),
            uid: self.command_uid,
            gid: self.command_gid,
            max_output_bytes: self.command_max_output_bytes,
            ..ExecPolicy::default()
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            command_timeout_secs: default_command_timeout_secs(),
            command_workdir: default_command_workdir(),
            command_env_allow: default_command_env_allow(),
            command_uid: None,
            command_gid: None,
            command_max_output_bytes: default_command_max_output_bytes(),
        }
    }
}

fn default_server_port() -> u16 {
    80
}

/// Matches the control panel's default dispatch deadline.
fn default_command_timeout_secs() -> u64 {
    30
}

fn default_command_workdir() -> PathBuf {
    PathBuf::from("/")
}

fn default_command_env_allow() -> String {
    "PATH,HOME,LANG,TALOSCONFIG,KUBECONFIG".to_string()
}

fn default_command_max_output_bytes() -> usize {
    1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_allow_list_is_split_and_trimmed() {
        let cfg = AgentConfig {
            command_env_allow: " PATH, ,HOME ,TALOSCONFIG".into(),
            ..AgentConfig::default()
        };
        assert_eq!(cfg.exec_policy().env_allow, vec!["PATH", "HOME", "TALOSCONFIG"]);
    }

    #[test]
    fn defaults_keep_root_identity() {
        let policy = AgentConfig::default().exec_policy();
        assert_eq!(policy.uid, None);
        assert_eq!(policy.gid, None);
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(AgentConfig::default().bind_addr().port(), 80);
    }
}
