// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Startup and the gRPC front door: dial the backend, probe which CRI
//! versions it speaks, rebuild the checkpoint store from its listings, then
//! serve both CRI versions on the proxy socket.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use protocols::{v1 as criv1, v1alpha2 as criv1alpha2};
use proxy_hooks::HookDispatcher;
use proxy_types::ProxyConfig;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::{Channel, Server};
use tonic::{Code, Status};

use crate::cri::backend::{connect_uds, ImageBackendClient, RuntimeBackendClient, DEFAULT_TIMEOUT};
use crate::cri::{v1 as front_v1, v1alpha2 as front_v1alpha2, RuntimeResponse};
use crate::executor::{ContainerResourceExecutor, PodResourceExecutor, RuntimeResourceExecutor};
use crate::interceptor::RuntimeInterceptor;
use crate::store::CheckpointStore;

/// The proxy's front door. Owns the probed backend clients, the checkpoint
/// store and the interception pipeline.
pub struct CriServer {
    config: ProxyConfig,
    store: Arc<CheckpointStore>,
    interceptor: Arc<RuntimeInterceptor>,
    runtime_backend: Arc<RuntimeBackendClient>,
    image_backend: Arc<ImageBackendClient>,
}

/// Maps a probe reply to "supported"; `Unimplemented` is the only
/// non-fatal failure.
fn evaluate_probe(result: Result<(), Status>, service: &str, version: &str) -> Result<bool> {
    match result {
        Ok(()) => {
            info!(
                sl!(),
                "the backend {} service supports CRI {} API", service, version
            );
            Ok(true)
        }
        Err(status) if status.code() == Code::Unimplemented => {
            info!(
                sl!(),
                "the backend {} service doesn't support CRI {} API", service, version
            );
            Ok(false)
        }
        Err(status) => Err(anyhow!(
            "failed to probe the backend {} service for CRI {}: {}",
            service,
            version,
            status
        )),
    }
}

async fn probe_runtime(channel: &Channel) -> Result<(bool, bool)> {
    let mut client = criv1::runtime_service_client::RuntimeServiceClient::new(channel.clone());
    let result = tokio::time::timeout(
        DEFAULT_TIMEOUT,
        client.version(criv1::VersionRequest::default()),
    )
    .await
    .map_err(|_| anyhow!("probe of the backend runtime service timed out"))?;
    let v1 = evaluate_probe(result.map(|_| ()), "runtime", "v1")?;

    let mut client =
        criv1alpha2::runtime_service_client::RuntimeServiceClient::new(channel.clone());
    let result = tokio::time::timeout(
        DEFAULT_TIMEOUT,
        client.version(criv1alpha2::VersionRequest::default()),
    )
    .await
    .map_err(|_| anyhow!("probe of the backend runtime service timed out"))?;
    let v1alpha2 = evaluate_probe(result.map(|_| ()), "runtime", "v1alpha2")?;

    Ok((v1, v1alpha2))
}

async fn probe_image(channel: &Channel) -> Result<(bool, bool)> {
    let mut client = criv1::image_service_client::ImageServiceClient::new(channel.clone());
    let result = tokio::time::timeout(
        DEFAULT_TIMEOUT,
        client.image_fs_info(criv1::ImageFsInfoRequest::default()),
    )
    .await
    .map_err(|_| anyhow!("probe of the backend image service timed out"))?;
    let v1 = evaluate_probe(result.map(|_| ()), "image", "v1")?;

    let mut client = criv1alpha2::image_service_client::ImageServiceClient::new(channel.clone());
    let result = tokio::time::timeout(
        DEFAULT_TIMEOUT,
        client.image_fs_info(criv1alpha2::ImageFsInfoRequest::default()),
    )
    .await
    .map_err(|_| anyhow!("probe of the backend image service timed out"))?;
    let v1alpha2 = evaluate_probe(result.map(|_| ()), "image", "v1alpha2")?;

    Ok((v1, v1alpha2))
}

/// Rebuilds pod checkpoints from the backend's listing; a bad entry is
/// skipped, not fatal. Returns how many records were written.
fn restore_pods(store: &Arc<CheckpointStore>, pods: &[criv1::PodSandbox]) -> usize {
    let mut restored = 0;
    for pod in pods {
        let mut executor = PodResourceExecutor::new(store.clone());
        if let Err(e) = executor.parse_pod(pod) {
            warn!(sl!(), "failed to parse pod {}: {}", pod.id, e);
            continue;
        }
        let response = RuntimeResponse::RunPodSandbox(criv1::RunPodSandboxResponse {
            pod_sandbox_id: pod.id.clone(),
        });
        if let Err(e) = executor.resource_checkpoint(&response) {
            warn!(sl!(), "failed to checkpoint pod {}: {}", pod.id, e);
            continue;
        }
        restored += 1;
    }
    restored
}

/// Same for containers. Pods must be restored first so the pod side of each
/// container record can be denormalised.
fn restore_containers(store: &Arc<CheckpointStore>, containers: &[criv1::Container]) -> usize {
    let mut restored = 0;
    for container in containers {
        let mut executor = ContainerResourceExecutor::new(store.clone());
        if let Err(e) = executor.parse_container(container) {
            warn!(sl!(), "failed to parse container {}: {}", container.id, e);
            continue;
        }
        let response = RuntimeResponse::CreateContainer(criv1::CreateContainerResponse {
            container_id: container.id.clone(),
        });
        if let Err(e) = executor.resource_checkpoint(&response) {
            warn!(sl!(), "failed to checkpoint container {}: {}", container.id, e);
            continue;
        }
        restored += 1;
    }
    restored
}

impl CriServer {
    /// Dials and probes the backend, then rebuilds the checkpoint store
    /// from its live listings. Fails when the backend supports neither CRI
    /// version for either service, or when listing fails.
    pub async fn new(config: ProxyConfig) -> Result<Self> {
        let runtime_channel = tokio::time::timeout(
            DEFAULT_TIMEOUT,
            connect_uds(&config.runtime_endpoint),
        )
        .await
        .map_err(|_| anyhow!("dialing {} timed out", config.runtime_endpoint))?
        .with_context(|| format!("connect backend runtime {}", config.runtime_endpoint))?;

        let image_endpoint = config.image_endpoint().to_string();
        let image_channel = if image_endpoint == config.runtime_endpoint {
            runtime_channel.clone()
        } else {
            tokio::time::timeout(DEFAULT_TIMEOUT, connect_uds(&image_endpoint))
                .await
                .map_err(|_| anyhow!("dialing {} timed out", image_endpoint))?
                .with_context(|| format!("connect backend image {}", image_endpoint))?
        };

        let (runtime_v1, runtime_v1alpha2) = probe_runtime(&runtime_channel).await?;
        if !runtime_v1 && !runtime_v1alpha2 {
            bail!("the backend runtime service supports neither CRI v1 nor v1alpha2");
        }
        let (image_v1, image_v1alpha2) = probe_image(&image_channel).await?;
        if !image_v1 && !image_v1alpha2 {
            bail!("the backend image service supports neither CRI v1 nor v1alpha2");
        }

        let runtime_backend = Arc::new(if runtime_v1 {
            RuntimeBackendClient::new_v1(runtime_channel)
        } else {
            RuntimeBackendClient::new_v1alpha2(runtime_channel)
        });
        let image_backend = Arc::new(if image_v1 {
            ImageBackendClient::new_v1(image_channel)
        } else {
            ImageBackendClient::new_v1alpha2(image_channel)
        });

        let store = Arc::new(CheckpointStore::new());
        let dispatcher = Arc::new(HookDispatcher::from_config(&config.plugins));
        let interceptor = Arc::new(RuntimeInterceptor::new(
            store.clone(),
            dispatcher,
            runtime_backend.clone(),
        ));

        let server = Self {
            config,
            store,
            interceptor,
            runtime_backend,
            image_backend,
        };
        server
            .fail_over()
            .await
            .context("rebuild checkpoint store from the backend")?;
        Ok(server)
    }

    /// Enumerates the backend's live pods and containers and repopulates
    /// the store, so hooks see complete state for workloads that predate
    /// this proxy instance.
    async fn fail_over(&self) -> Result<()> {
        let pods = tokio::time::timeout(
            DEFAULT_TIMEOUT,
            self.runtime_backend
                .list_pod_sandbox(criv1::ListPodSandboxRequest::default()),
        )
        .await
        .map_err(|_| anyhow!("listing pod sandboxes timed out"))?
        .map_err(|status| anyhow!("list pod sandboxes: {}", status))?;

        let containers = tokio::time::timeout(
            DEFAULT_TIMEOUT,
            self.runtime_backend
                .list_containers(criv1::ListContainersRequest::default()),
        )
        .await
        .map_err(|_| anyhow!("listing containers timed out"))?
        .map_err(|status| anyhow!("list containers: {}", status))?;

        let pod_count = restore_pods(&self.store, &pods.items);
        let container_count = restore_containers(&self.store, &containers.containers);
        info!(
            sl!(),
            "failover done, recovered {} pods and {} containers", pod_count, container_count
        );
        Ok(())
    }

    /// Binds the proxy socket and serves both CRI versions until the
    /// process is stopped. Whatever version the backend speaks natively,
    /// both front ends work: requests are bridged through the version
    /// adapter.
    pub async fn serve(self) -> Result<()> {
        let listen = self.config.listen.clone();
        if let Some(parent) = Path::new(&listen).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        // a previous instance may have left its socket behind
        if Path::new(&listen).exists() {
            std::fs::remove_file(&listen).with_context(|| format!("remove stale {}", listen))?;
        }
        let listener = UnixListener::bind(&listen).with_context(|| format!("bind {}", listen))?;
        let incoming = UnixListenerStream::new(listener);

        info!(
            sl!(),
            "serving CRI v1 and v1alpha2 on {} (backend speaks {:?})",
            listen,
            self.runtime_backend.api_version()
        );

        let runtime_v1 =
            front_v1::RuntimeServer::new(self.interceptor.clone(), self.runtime_backend.clone());
        let image_v1 = front_v1::ImageServer::new(self.image_backend.clone());
        let runtime_v1alpha2 = front_v1alpha2::RuntimeServer::new(
            self.interceptor.clone(),
            self.runtime_backend.clone(),
        );
        let image_v1alpha2 = front_v1alpha2::ImageServer::new(self.image_backend.clone());

        Server::builder()
            .add_service(criv1::runtime_service_server::RuntimeServiceServer::new(
                runtime_v1,
            ))
            .add_service(criv1::image_service_server::ImageServiceServer::new(
                image_v1,
            ))
            .add_service(
                criv1alpha2::runtime_service_server::RuntimeServiceServer::new(runtime_v1alpha2),
            )
            .add_service(criv1alpha2::image_service_server::ImageServiceServer::new(
                image_v1alpha2,
            ))
            .serve_with_incoming(incoming)
            .await
            .context("serve CRI")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_probe() {
        assert!(evaluate_probe(Ok(()), "runtime", "v1").unwrap());
        assert!(!evaluate_probe(
            Err(Status::unimplemented("nope")),
            "runtime",
            "v1"
        )
        .unwrap());
        // anything else aborts startup
        assert!(evaluate_probe(Err(Status::unavailable("down")), "runtime", "v1").is_err());
    }

    #[test]
    fn test_restore_pods_skips_corrupt_entries() {
        let store = Arc::new(CheckpointStore::new());
        let pods = vec![
            criv1::PodSandbox {
                id: "pod-1".to_string(),
                ..Default::default()
            },
            // corrupt entry: no id
            criv1::PodSandbox::default(),
            criv1::PodSandbox {
                id: "pod-3".to_string(),
                ..Default::default()
            },
        ];

        assert_eq!(restore_pods(&store, &pods), 2);
        assert!(store.get_pod("pod-1").is_some());
        assert!(store.get_pod("pod-3").is_some());
        assert_eq!(store.pod_count(), 2);
    }

    #[test]
    fn test_restore_containers_denormalises_pods() {
        let store = Arc::new(CheckpointStore::new());
        let pods = vec![criv1::PodSandbox {
            id: "sandbox-0".to_string(),
            metadata: Some(criv1::PodSandboxMetadata {
                name: "podName".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }];
        restore_pods(&store, &pods);

        let containers = vec![
            criv1::Container {
                id: "container-0".to_string(),
                pod_sandbox_id: "sandbox-0".to_string(),
                metadata: Some(criv1::ContainerMetadata {
                    name: "container".to_string(),
                    attempt: 2,
                }),
                ..Default::default()
            },
            criv1::Container::default(),
        ];
        assert_eq!(restore_containers(&store, &containers), 1);

        let stored = store.get_container("container-0").unwrap();
        assert_eq!(stored.pod_meta.name, "podName");
        assert_eq!(stored.container_meta.name, "container");
        assert_eq!(stored.container_meta.id, "container-0");
    }
}
