//! Synchronous command forwarding from the control panel to one agent.

use std::{net::SocketAddr, time::Duration};

use axum::http::{header, HeaderValue};
use bytes::Bytes;
use rover_proto::{command_envelope, EnvelopeError, COMMAND_OUTPUT_HEADER, COMMAND_PATH};
use thiserror::Error;
use tracing::{info, warn};

use crate::orchestrator::{Orchestrator, OrchestratorError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Fleet(#[from] OrchestratorError),
    #[error("rover {rover} has no address yet (phase {phase})")]
    AddressPending { rover: String, phase: String },
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] EnvelopeError),
    #[error("rover {rover} at {address} did not answer within {timeout:?}")]
    Timeout {
        rover: String,
        address: String,
        timeout: Duration,
    },
    #[error("could not reach rover {rover} at {address}: {message}")]
    Transport {
        rover: String,
        address: String,
        message: String,
    },
    #[error("{message}")]
    Execution {
        rover: String,
        status: u16,
        message: String,
    },
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Fleet(err) => err.is_retryable(),
            DispatchError::AddressPending { .. }
            | DispatchError::Timeout { .. }
            | DispatchError::Transport { .. } => true,
            DispatchError::InvalidCommand(_) | DispatchError::Execution { .. } => false,
        }
    }
}

/// What the agent reported for one command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// The agent's `Command-Output` header, when it sent one.
    pub indicator: Option<HeaderValue>,
    pub output: Bytes,
}

#[derive(Clone)]
pub struct Dispatcher {
    http: reqwest::Client,
    agent_port: u16,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(agent_port: u16, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            agent_port,
            timeout,
        })
    }

    pub fn agent_url(&self, address: &str) -> String {
        match address.parse() {
            Ok(ip) => format!("http://{}{COMMAND_PATH}", SocketAddr::new(ip, self.agent_port)),
            Err(_) => format!("http://{address}:{}{COMMAND_PATH}", self.agent_port),
        }
    }

    /// Resolves `rover` against the fleet, forwards `body` to its agent and
    /// waits for the single reply. Nothing is retried.
    pub async fn dispatch(
        &self,
        fleet: &dyn Orchestrator,
        rover: &str,
        body: &[u8],
    ) -> Result<CommandOutcome, DispatchError> {
        let member = fleet.get_member(rover).await?;
        let Some(address) = member.address else {
            return Err(DispatchError::AddressPending {
                rover: member.name,
                phase: member.phase,
            });
        };
        let envelope = command_envelope(body)?;
        let url = self.agent_url(&address);

        let response = self
            .http
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(envelope.into_owned())
            .send()
            .await
            .map_err(|err| self.transport_error(rover, &address, err))?;

        let status = response.status();
        let indicator = response.headers().get(COMMAND_OUTPUT_HEADER).cloned();
        let output = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(rover, &address, err))?;

        if !status.is_success() {
            let message = String::from_utf8_lossy(&output).into_owned();
            warn!(rover, %address, status = status.as_u16(), error = %message, "command failed on rover");
            return Err(DispatchError::Execution {
                rover: rover.to_owned(),
                status: status.as_u16(),
                message,
            });
        }

        info!(
            rover,
            %address,
            status = status.as_u16(),
            command_output = ?indicator,
            bytes = output.len(),
            "command dispatched"
        );
        Ok(CommandOutcome { indicator, output })
    }

    fn transport_error(&self, rover: &str, address: &str, err: reqwest::Error) -> DispatchError {
        warn!(rover, %address, error = %err, "rover unreachable");
        if err.is_timeout() {
            DispatchError::Timeout {
                rover: rover.to_owned(),
                address: address.to_owned(),
                timeout: self.timeout,
            }
        } else {
            DispatchError::Transport {
                rover: rover.to_owned(),
                address: address.to_owned(),
                message: err.to_string(),
            }
        }
    }
}
