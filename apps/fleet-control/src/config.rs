use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetBackend {
    Kubernetes,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    #[serde(default = "default_port")]
    pub server_port: u16,
    #[serde(default = "default_port")]
    pub client_port: u16,
    #[serde(default)]
    pub kubeconfig: Option<String>,
    #[serde(default)]
    pub rover_image: Option<String>,
    #[serde(default = "default_rover_namespace")]
    pub rover_namespace: String,
    #[serde(default = "default_rover_secret")]
    pub rover_secret: String,
    #[serde(default = "default_rover_secret_mount")]
    pub rover_secret_mount: String,
    #[serde(default = "default_fleet_backend")]
    pub fleet_backend: String,
    #[serde(default = "default_ldap_url")]
    pub ldap_url: String,
    #[serde(default = "default_ldap_base_dn")]
    pub ldap_base_dn: String,
    #[serde(default = "default_directory_timeout_secs")]
    pub directory_timeout_secs: u64,
    #[serde(default = "default_substrate_timeout_secs")]
    pub substrate_timeout_secs: u64,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    #[serde(default)]
    pub cookie_secure: bool,
}

impl FleetConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .ignore_empty(true),
            )
            .build()?
            .try_deserialize()
            .map(FleetConfig::normalize)
    }

    fn normalize(mut self) -> Self {
        self.kubeconfig = Self::normalize_opt(self.kubeconfig.take());
        self.rover_image = Self::normalize_opt(self.rover_image.take());
        self.fleet_backend = self.fleet_backend.trim().to_ascii_lowercase();
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    pub fn backend(&self) -> Result<FleetBackend, String> {
        match self.fleet_backend.as_str() {
            "kubernetes" | "k8s" => Ok(FleetBackend::Kubernetes),
            "memory" => Ok(FleetBackend::Memory),
            other => Err(format!(
                "unknown FLEET_BACKEND {other:?} (expected kubernetes or memory)"
            )),
        }
    }

    /// Falls back to the conventional per-user location when `KUBECONFIG` is unset.
    pub fn kubeconfig_path(&self) -> PathBuf {
        match &self.kubeconfig {
            Some(path) => PathBuf::from(path),
            None => {
                let home = std::env::var_os("HOME").unwrap_or_default();
                PathBuf::from(home).join(".kube").join("config")
            }
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.server_port))
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_secs(self.directory_timeout_secs)
    }

    pub fn substrate_timeout(&self) -> Duration {
        Duration::from_secs(self.substrate_timeout_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            server_port: default_port(),
            client_port: default_port(),
            kubeconfig: None,
            rover_image: None,
            rover_namespace: default_rover_namespace(),
            rover_secret: default_rover_secret(),
            rover_secret_mount: default_rover_secret_mount(),
            fleet_backend: default_fleet_backend(),
            ldap_url: default_ldap_url(),
            ldap_base_dn: default_ldap_base_dn(),
            directory_timeout_secs: default_directory_timeout_secs(),
            substrate_timeout_secs: default_substrate_timeout_secs(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            public_dir: default_public_dir(),
            cookie_secure: false,
        }
    }
}

fn default_port() -> u16 {
    80
}

fn default_rover_namespace() -> String {
    "rovers".to_string()
}

fn default_rover_secret() -> String {
    "talosconfig".to_string()
}

fn default_rover_secret_mount() -> String {
    "/etc/talos/config".to_string()
}

fn default_fleet_backend() -> String {
    "kubernetes".to_string()
}

fn default_ldap_url() -> String {
    "ldap://kerberos.alien.moon.mine:389".to_string()
}

fn default_ldap_base_dn() -> String {
    "OU=Users,dc=alien,dc=moon,dc=mine".to_string()
}

fn default_directory_timeout_secs() -> u64 {
    10
}

fn default_substrate_timeout_secs() -> u64 {
    15
}

fn default_dispatch_timeout_secs() -> u64 {
    30
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("./public")
}
