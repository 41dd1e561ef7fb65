//! Rover agent: runs inside each fleet member and executes the single command
//! forwarded to it by the control panel.

pub mod config;
pub mod executor;
pub mod routes;

use std::future::Future;

use anyhow::Context;
use tracing::info;

pub use config::AgentConfig;
pub use executor::{ExecError, ExecPolicy, Executor};
pub use routes::{build_router, AgentState};

/// Serves the agent until `shutdown` resolves.
pub async fn run<F>(cfg: AgentConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let policy = cfg.exec_policy();
    info!(
        workdir = %policy.workdir.display(),
        timeout = ?policy.timeout,
        env_allow = ?policy.env_allow,
        uid = ?policy.uid,
        gid = ?policy.gid,
        "command policy loaded"
    );
    let app = build_router(AgentState::new(Executor::new(policy)));

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind rover agent on {addr}"))?;
    info!("Starting rover agent on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("rover agent server failed")?;
    Ok(())
}
