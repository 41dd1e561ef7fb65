//! Rover fleet control panel: operator sessions against the identity
//! directory, fleet member lifecycle on the orchestration substrate, and
//! synchronous command dispatch to the agents.

pub mod auth;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod orchestrator;
pub mod routes;
pub mod session;
pub mod state;

use std::{future::Future, sync::Arc};

use anyhow::{anyhow, Context};
use tracing::{info, warn};

pub use auth::{AuthError, AuthGate};
pub use config::{FleetBackend, FleetConfig};
pub use directory::{IdentityDirectory, LdapDirectory, StaticDirectory};
pub use dispatch::{CommandOutcome, DispatchError, Dispatcher};
pub use orchestrator::{
    FleetHandle, InMemoryOrchestrator, KubeOrchestrator, MemberStatus, Orchestrator,
    OrchestratorError, RoverTemplate,
};
pub use routes::build_router;
pub use session::{SessionRegistry, SessionToken};
pub use state::AppState;

/// Connects the configured fleet backend. Failure here is fatal; there is no
/// silent fallback to the in-memory fleet.
pub async fn build_fleet(cfg: &FleetConfig) -> anyhow::Result<FleetHandle> {
    let backend = cfg.backend().map_err(|msg| anyhow!(msg))?;
    match backend {
        FleetBackend::Memory => {
            warn!("FLEET_BACKEND=memory: rovers exist only inside this process");
            Ok(Arc::new(InMemoryOrchestrator::new()))
        }
        FleetBackend::Kubernetes => {
            let image = cfg
                .rover_image
                .clone()
                .context("ROVER_IMAGE must be set for the kubernetes backend")?;
            if cfg.kubeconfig.is_none() {
                warn!("KUBECONFIG not set; using the default kubeconfig path");
            }
            let kubeconfig = cfg.kubeconfig_path();
            let template = RoverTemplate {
                image,
                agent_port: cfg.client_port,
                secret_name: cfg.rover_secret.clone(),
                secret_mount: cfg.rover_secret_mount.clone(),
                command_timeout_secs: cfg.dispatch_timeout_secs,
            };
            let fleet = KubeOrchestrator::connect(
                &kubeconfig,
                &cfg.rover_namespace,
                template,
                cfg.substrate_timeout(),
            )
            .await
            .with_context(|| {
                format!(
                    "failed to initialise kubernetes client from {}",
                    kubeconfig.display()
                )
            })?;
            Ok(Arc::new(fleet))
        }
    }
}

/// Serves the control panel until `shutdown` resolves.
pub async fn run<F>(cfg: FleetConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let fleet = build_fleet(&cfg).await?;
    let directory = LdapDirectory::new(
        cfg.ldap_url.clone(),
        &cfg.ldap_base_dn,
        cfg.directory_timeout(),
    );
    let auth = AuthGate::new(
        Arc::new(directory),
        SessionRegistry::new(),
        cfg.directory_timeout(),
    );
    let dispatcher = Dispatcher::new(cfg.client_port, cfg.dispatch_timeout())
        .context("failed to build agent http client")?;
    let state = AppState::new(auth, fleet, dispatcher)
        .with_secure_cookies(cfg.cookie_secure)
        .with_public_dir(cfg.public_dir.clone());
    let app = build_router(state);

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control panel on {addr}"))?;
    info!(
        namespace = %cfg.rover_namespace,
        ldap = %cfg.ldap_url,
        agent_port = cfg.client_port,
        "Starting control panel on {addr}"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("control panel server failed")?;
    Ok(())
}
