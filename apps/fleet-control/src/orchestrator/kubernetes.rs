use std::{collections::BTreeMap, future::Future, path::Path, time::Duration};

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{
        Container, ContainerPort, EnvVar, HTTPGetAction, Namespace, Pod, PodSecurityContext,
        PodSpec, Probe, SecretVolumeSource, Volume, VolumeMount,
    },
    apimachinery::pkg::{apis::meta::v1::ObjectMeta, util::intstr::IntOrString},
};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client,
};
use tokio::time::timeout;
use tracing::{debug, info};

use super::{
    ensure_addressable, resolve_member_name, MemberStatus, Orchestrator, OrchestratorError,
};

const CONTAINER_NAME: &str = "rover";
const AGENT_ARGS: &[&str] = &["agent"];
const NAME_LABEL: &str = "app.kubernetes.io/name";
const ROOT_ID: i64 = 0;

/// Static shape of every provisioned member.
#[derive(Debug, Clone)]
pub struct RoverTemplate {
    pub image: String,
    pub agent_port: u16,
    pub secret_name: String,
    pub secret_mount: String,
    /// Agent-side command deadline; kept within the dispatch deadline so a
    /// command never outlives the operator's request.
    pub command_timeout_secs: u64,
}

impl RoverTemplate {
    /// One root container exposing the agent port, with the credential secret
    /// mounted read-only.
    pub fn pod(&self, name: &str) -> Pod {
        let port = i32::from(self.agent_port);
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                labels: Some(BTreeMap::from([(
                    NAME_LABEL.to_string(),
                    CONTAINER_NAME.to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                security_context: Some(PodSecurityContext {
                    run_as_user: Some(ROOT_ID),
                    run_as_group: Some(ROOT_ID),
                    ..Default::default()
                }),
                containers: vec![Container {
                    name: CONTAINER_NAME.to_string(),
                    image: Some(self.image.clone()),
                    args: Some(AGENT_ARGS.iter().map(|arg| arg.to_string()).collect()),
                    env: Some(vec![
                        EnvVar {
                            name: "SERVER_PORT".to_string(),
                            value: Some(self.agent_port.to_string()),
                            ..Default::default()
                        },
                        EnvVar {
                            name: "COMMAND_TIMEOUT_SECS".to_string(),
                            value: Some(self.command_timeout_secs.to_string()),
                            ..Default::default()
                        },
                    ]),
                    ports: Some(vec![ContainerPort {
                        container_port: port,
                        ..Default::default()
                    }]),
                    readiness_probe: Some(Probe {
                        http_get: Some(HTTPGetAction {
                            path: Some("/health".to_string()),
                            port: IntOrString::Int(port),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    volume_mounts: Some(vec![VolumeMount {
                        name: self.secret_name.clone(),
                        mount_path: self.secret_mount.clone(),
                        read_only: Some(true),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                volumes: Some(vec![Volume {
                    name: self.secret_name.clone(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(self.secret_name.clone()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Members are pods in one fixed namespace.
pub struct KubeOrchestrator {
    pods: Api<Pod>,
    template: RoverTemplate,
    call_timeout: Duration,
}

impl KubeOrchestrator {
    /// Builds a cluster connection from `kubeconfig` and makes sure the
    /// namespace exists. Any failure here is fatal to the control panel.
    pub async fn connect(
        kubeconfig: &Path,
        namespace: &str,
        template: RoverTemplate,
        call_timeout: Duration,
    ) -> Result<Self, OrchestratorError> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig).map_err(|err| {
            OrchestratorError::Substrate {
                operation: "read kubeconfig",
                message: err.to_string(),
            }
        })?;
        let mut config =
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|err| OrchestratorError::Substrate {
                    operation: "load kubeconfig",
                    message: err.to_string(),
                })?;
        config.connect_timeout = Some(call_timeout);
        config.read_timeout = Some(call_timeout);
        let client = Client::try_from(config).map_err(|err| OrchestratorError::Substrate {
            operation: "build cluster client",
            message: err.to_string(),
        })?;

        ensure_namespace(client.clone(), namespace, call_timeout).await?;
        info!(namespace, "kubernetes client ready");

        Ok(Self {
            pods: Api::namespaced(client, namespace),
            template,
            call_timeout,
        })
    }
}

async fn ensure_namespace(
    client: Client,
    namespace: &str,
    call_timeout: Duration,
) -> Result<(), OrchestratorError> {
    let namespaces: Api<Namespace> = Api::all(client);
    let existing = bounded(
        "get namespace",
        None,
        call_timeout,
        namespaces.get_opt(namespace),
    )
    .await?;
    if existing.is_some() {
        return Ok(());
    }

    let object = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_owned()),
            ..Default::default()
        },
        ..Default::default()
    };
    match bounded(
        "create namespace",
        Some(namespace),
        call_timeout,
        namespaces.create(&PostParams::default(), &object),
    )
    .await
    {
        Ok(_) => {
            info!(namespace, "created namespace");
            Ok(())
        }
        // Another control panel won the race.
        Err(OrchestratorError::AlreadyExists(_)) => Ok(()),
        Err(err) => Err(err),
    }
}

/// Runs one substrate call under the deadline and classifies its failure.
async fn bounded<T, F>(
    operation: &'static str,
    subject: Option<&str>,
    call_timeout: Duration,
    call: F,
) -> Result<T, OrchestratorError>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    match timeout(call_timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(kube::Error::Api(response))) => match (subject, response.code) {
            (Some(name), 404) => Err(OrchestratorError::NotFound(name.to_owned())),
            (Some(name), 409) => Err(OrchestratorError::AlreadyExists(name.to_owned())),
            _ => Err(OrchestratorError::Substrate {
                operation,
                message: response.to_string(),
            }),
        },
        Ok(Err(err)) => Err(OrchestratorError::Substrate {
            operation,
            message: err.to_string(),
        }),
        Err(_) => Err(OrchestratorError::Timeout {
            operation,
            timeout: call_timeout,
        }),
    }
}

fn member_status(pod: Pod, fallback_name: &str) -> MemberStatus {
    let status = pod.status.unwrap_or_default();
    MemberStatus {
        name: pod.metadata.name.unwrap_or_else(|| fallback_name.to_owned()),
        phase: status.phase.unwrap_or_else(|| "Unknown".to_string()),
        address: status.pod_ip.filter(|ip| !ip.is_empty()),
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn list_members(&self) -> Result<Vec<String>, OrchestratorError> {
        let pods = bounded(
            "list pods",
            None,
            self.call_timeout,
            self.pods.list(&ListParams::default()),
        )
        .await?;
        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect())
    }

    async fn create_member(&self, name: Option<String>) -> Result<String, OrchestratorError> {
        let name = resolve_member_name(name)?;
        let pod = self.template.pod(&name);
        bounded(
            "create pod",
            Some(&name),
            self.call_timeout,
            self.pods.create(&PostParams::default(), &pod),
        )
        .await?;
        debug!(rover = %name, image = %self.template.image, "pod created");
        Ok(name)
    }

    async fn get_member(&self, name: &str) -> Result<MemberStatus, OrchestratorError> {
        ensure_addressable(name)?;
        let pod = bounded("get pod", Some(name), self.call_timeout, self.pods.get(name)).await?;
        Ok(member_status(pod, name))
    }

    async fn delete_member(&self, name: &str) -> Result<(), OrchestratorError> {
        ensure_addressable(name)?;
        bounded(
            "delete pod",
            Some(name),
            self.call_timeout,
            self.pods.delete(name, &DeleteParams::default()),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("request failed with {code}"),
            reason: "Test".into(),
            code,
        })
    }

    fn template() -> RoverTemplate {
        RoverTemplate {
            image: "registry.local/rover:1.2".into(),
            agent_port: 8080,
            secret_name: "talosconfig".into(),
            secret_mount: "/etc/talos/config".into(),
            command_timeout_secs: 30,
        }
    }

    #[test]
    fn pod_runs_agent_as_root_with_one_port() {
        let pod = template().pod("rover-x");
        assert_eq!(pod.metadata.name.as_deref(), Some("rover-x"));
        let spec = pod.spec.unwrap();
        let security = spec.security_context.unwrap();
        assert_eq!(security.run_as_user, Some(0));
        assert_eq!(security.run_as_group, Some(0));

        assert_eq!(spec.containers.len(), 1);
        let container = &spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("registry.local/rover:1.2"));
        assert_eq!(container.args.as_deref(), Some(&["agent".to_string()][..]));
        let ports = container.ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].container_port, 8080);
        let env = container.env.as_ref().unwrap();
        assert_eq!(env[0].name, "SERVER_PORT");
        assert_eq!(env[0].value.as_deref(), Some("8080"));
        assert_eq!(env[1].name, "COMMAND_TIMEOUT_SECS");
        assert_eq!(env[1].value.as_deref(), Some("30"));
    }

    #[test]
    fn pod_mounts_the_credential_secret() {
        let spec = template().pod("rover-x").spec.unwrap();
        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/etc/talos/config");
        let volumes = spec.volumes.unwrap();
        assert_eq!(volumes[0].name, mounts[0].name);
        assert_eq!(
            volumes[0].secret.as_ref().unwrap().secret_name.as_deref(),
            Some("talosconfig")
        );
    }

    #[test]
    fn status_without_address_is_pending() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("rover-x".into()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Pending".into()),
                pod_ip: Some(String::new()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let status = member_status(pod, "rover-x");
        assert_eq!(status.phase, "Pending");
        assert_eq!(status.address, None);
    }

    #[test]
    fn missing_status_is_unknown() {
        let status = member_status(Pod::default(), "rover-y");
        assert_eq!(status.name, "rover-y");
        assert_eq!(status.phase, "Unknown");
    }

    #[tokio::test]
    async fn api_status_codes_map_to_distinct_errors() {
        let deadline = Duration::from_secs(1);

        let err = bounded::<(), _>("get pod", Some("rover-x"), deadline, async {
            Err(api_error(404))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(ref name) if name == "rover-x"));

        let err = bounded::<(), _>("create pod", Some("rover-x"), deadline, async {
            Err(api_error(409))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::AlreadyExists(ref name) if name == "rover-x"));

        let err = bounded::<(), _>("delete pod", Some("rover-x"), deadline, async {
            Err(api_error(500))
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Substrate {
                operation: "delete pod",
                ..
            }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_resource_without_subject_is_a_substrate_failure() {
        let err = bounded::<(), _>("list pods", None, Duration::from_secs(1), async {
            Err(api_error(404))
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Substrate {
                operation: "list pods",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn successful_call_passes_through() {
        let value = bounded("get pod", Some("rover-x"), Duration::from_secs(1), async {
            Ok::<_, kube::Error>(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_hits_the_deadline() {
        let err = bounded::<(), _>(
            "get pod",
            Some("rover-x"),
            Duration::from_secs(15),
            std::future::pending(),
        )
        .await
        .unwrap_err();
        match err {
            OrchestratorError::Timeout { operation, timeout } => {
                assert_eq!(operation, "get pod");
                assert_eq!(timeout, Duration::from_secs(15));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
