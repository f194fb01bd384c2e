// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! End-to-end checks against a backend that only speaks CRI v1alpha2:
//! probing must classify it correctly and the v1-typed backend client must
//! bridge requests and responses through wire re-encoding.

use std::sync::Arc;

use protocols::v1alpha2;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tonic::{Code, Request, Response, Status};

use runtime_proxy::cri::backend::{connect_uds, RuntimeBackendClient};
use runtime_proxy::cri::RuntimeRequest;
use runtime_proxy::interceptor::RuntimeBackend;

/// A v1alpha2-only runtime: answers the probe, lists one pod, runs pod
/// sandboxes. Everything else is unimplemented.
#[derive(Default)]
struct OldRuntime;

#[async_trait::async_trait]
impl v1alpha2::runtime_service_server::RuntimeService for OldRuntime {
    async fn version(
        &self,
        _request: Request<v1alpha2::VersionRequest>,
    ) -> Result<Response<v1alpha2::VersionResponse>, Status> {
        Ok(Response::new(v1alpha2::VersionResponse {
            version: "0.1.0".to_string(),
            runtime_name: "old-runtime".to_string(),
            runtime_version: "1.5.0".to_string(),
            runtime_api_version: "v1alpha2".to_string(),
        }))
    }

    async fn run_pod_sandbox(
        &self,
        request: Request<v1alpha2::RunPodSandboxRequest>,
    ) -> Result<Response<v1alpha2::RunPodSandboxResponse>, Status> {
        let uid = request
            .into_inner()
            .config
            .and_then(|c| c.metadata)
            .map(|m| m.uid)
            .unwrap_or_default();
        Ok(Response::new(v1alpha2::RunPodSandboxResponse {
            pod_sandbox_id: format!("sandbox-{}", uid),
        }))
    }

    async fn list_pod_sandbox(
        &self,
        _request: Request<v1alpha2::ListPodSandboxRequest>,
    ) -> Result<Response<v1alpha2::ListPodSandboxResponse>, Status> {
        Ok(Response::new(v1alpha2::ListPodSandboxResponse {
            items: vec![v1alpha2::PodSandbox {
                id: "sandbox-live".to_string(),
                metadata: Some(v1alpha2::PodSandboxMetadata {
                    name: "live-pod".to_string(),
                    uid: "uid-live".to_string(),
                    namespace: "default".to_string(),
                    attempt: 0,
                }),
                ..Default::default()
            }],
        }))
    }

    async fn stop_pod_sandbox(
        &self,
        _request: Request<v1alpha2::StopPodSandboxRequest>,
    ) -> Result<Response<v1alpha2::StopPodSandboxResponse>, Status> {
        Err(Status::unimplemented("stop_pod_sandbox"))
    }

    async fn remove_pod_sandbox(
        &self,
        _request: Request<v1alpha2::RemovePodSandboxRequest>,
    ) -> Result<Response<v1alpha2::RemovePodSandboxResponse>, Status> {
        Err(Status::unimplemented("remove_pod_sandbox"))
    }

    async fn pod_sandbox_status(
        &self,
        _request: Request<v1alpha2::PodSandboxStatusRequest>,
    ) -> Result<Response<v1alpha2::PodSandboxStatusResponse>, Status> {
        Err(Status::unimplemented("pod_sandbox_status"))
    }

    async fn create_container(
        &self,
        _request: Request<v1alpha2::CreateContainerRequest>,
    ) -> Result<Response<v1alpha2::CreateContainerResponse>, Status> {
        Err(Status::unimplemented("create_container"))
    }

    async fn start_container(
        &self,
        _request: Request<v1alpha2::StartContainerRequest>,
    ) -> Result<Response<v1alpha2::StartContainerResponse>, Status> {
        Err(Status::unimplemented("start_container"))
    }

    async fn stop_container(
        &self,
        _request: Request<v1alpha2::StopContainerRequest>,
    ) -> Result<Response<v1alpha2::StopContainerResponse>, Status> {
        Err(Status::unimplemented("stop_container"))
    }

    async fn remove_container(
        &self,
        _request: Request<v1alpha2::RemoveContainerRequest>,
    ) -> Result<Response<v1alpha2::RemoveContainerResponse>, Status> {
        Err(Status::unimplemented("remove_container"))
    }

    async fn list_containers(
        &self,
        _request: Request<v1alpha2::ListContainersRequest>,
    ) -> Result<Response<v1alpha2::ListContainersResponse>, Status> {
        Err(Status::unimplemented("list_containers"))
    }

    async fn container_status(
        &self,
        _request: Request<v1alpha2::ContainerStatusRequest>,
    ) -> Result<Response<v1alpha2::ContainerStatusResponse>, Status> {
        Err(Status::unimplemented("container_status"))
    }

    async fn update_container_resources(
        &self,
        _request: Request<v1alpha2::UpdateContainerResourcesRequest>,
    ) -> Result<Response<v1alpha2::UpdateContainerResourcesResponse>, Status> {
        Err(Status::unimplemented("update_container_resources"))
    }

    async fn reopen_container_log(
        &self,
        _request: Request<v1alpha2::ReopenContainerLogRequest>,
    ) -> Result<Response<v1alpha2::ReopenContainerLogResponse>, Status> {
        Err(Status::unimplemented("reopen_container_log"))
    }

    async fn exec_sync(
        &self,
        _request: Request<v1alpha2::ExecSyncRequest>,
    ) -> Result<Response<v1alpha2::ExecSyncResponse>, Status> {
        Err(Status::unimplemented("exec_sync"))
    }

    async fn exec(
        &self,
        _request: Request<v1alpha2::ExecRequest>,
    ) -> Result<Response<v1alpha2::ExecResponse>, Status> {
        Err(Status::unimplemented("exec"))
    }

    async fn attach(
        &self,
        _request: Request<v1alpha2::AttachRequest>,
    ) -> Result<Response<v1alpha2::AttachResponse>, Status> {
        Err(Status::unimplemented("attach"))
    }

    async fn port_forward(
        &self,
        _request: Request<v1alpha2::PortForwardRequest>,
    ) -> Result<Response<v1alpha2::PortForwardResponse>, Status> {
        Err(Status::unimplemented("port_forward"))
    }

    async fn container_stats(
        &self,
        _request: Request<v1alpha2::ContainerStatsRequest>,
    ) -> Result<Response<v1alpha2::ContainerStatsResponse>, Status> {
        Err(Status::unimplemented("container_stats"))
    }

    async fn list_container_stats(
        &self,
        _request: Request<v1alpha2::ListContainerStatsRequest>,
    ) -> Result<Response<v1alpha2::ListContainerStatsResponse>, Status> {
        Err(Status::unimplemented("list_container_stats"))
    }

    async fn pod_sandbox_stats(
        &self,
        _request: Request<v1alpha2::PodSandboxStatsRequest>,
    ) -> Result<Response<v1alpha2::PodSandboxStatsResponse>, Status> {
        Err(Status::unimplemented("pod_sandbox_stats"))
    }

    async fn list_pod_sandbox_stats(
        &self,
        _request: Request<v1alpha2::ListPodSandboxStatsRequest>,
    ) -> Result<Response<v1alpha2::ListPodSandboxStatsResponse>, Status> {
        Err(Status::unimplemented("list_pod_sandbox_stats"))
    }

    async fn update_runtime_config(
        &self,
        _request: Request<v1alpha2::UpdateRuntimeConfigRequest>,
    ) -> Result<Response<v1alpha2::UpdateRuntimeConfigResponse>, Status> {
        Err(Status::unimplemented("update_runtime_config"))
    }

    async fn status(
        &self,
        _request: Request<v1alpha2::StatusRequest>,
    ) -> Result<Response<v1alpha2::StatusResponse>, Status> {
        Err(Status::unimplemented("status"))
    }
}

async fn serve_old_runtime() -> (tempfile::TempDir, tokio::task::JoinHandle<()>) {
    let dir = tempfile::tempdir().unwrap();
    let sock_path = dir.path().join("old-runtime.sock");
    let listener = UnixListener::bind(&sock_path).unwrap();
    let incoming = UnixListenerStream::new(listener);

    let handle = tokio::spawn(async move {
        let _ = Server::builder()
            .add_service(v1alpha2::runtime_service_server::RuntimeServiceServer::new(
                OldRuntime::default(),
            ))
            .serve_with_incoming(incoming)
            .await;
    });
    (dir, handle)
}

#[tokio::test]
async fn test_v1_probe_is_unimplemented_on_v1alpha2_backend() {
    let (dir, server) = serve_old_runtime().await;
    let channel = connect_uds(dir.path().join("old-runtime.sock").to_str().unwrap())
        .await
        .unwrap();

    // the v1 surface is not registered on the backend
    let mut v1_client =
        protocols::v1::runtime_service_client::RuntimeServiceClient::new(channel.clone());
    let err = v1_client
        .version(protocols::v1::VersionRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);

    // the v1alpha2 surface answers
    let mut v1alpha2_client =
        v1alpha2::runtime_service_client::RuntimeServiceClient::new(channel);
    let version = v1alpha2_client
        .version(v1alpha2::VersionRequest::default())
        .await
        .unwrap()
        .into_inner();
    assert_eq!(version.runtime_name, "old-runtime");

    server.abort();
}

#[tokio::test]
async fn test_backend_client_bridges_v1_requests() {
    let (dir, server) = serve_old_runtime().await;
    let channel = connect_uds(dir.path().join("old-runtime.sock").to_str().unwrap())
        .await
        .unwrap();
    let backend = Arc::new(RuntimeBackendClient::new_v1alpha2(channel));

    // a v1-typed call travels to the v1alpha2 backend and back
    let request = RuntimeRequest::RunPodSandbox(protocols::v1::RunPodSandboxRequest {
        config: Some(protocols::v1::PodSandboxConfig {
            metadata: Some(protocols::v1::PodSandboxMetadata {
                name: "bridged".to_string(),
                uid: "uid-0".to_string(),
                namespace: "default".to_string(),
                attempt: 0,
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
    let response = backend.handle(request).await.unwrap();
    match response {
        runtime_proxy::cri::RuntimeResponse::RunPodSandbox(r) => {
            assert_eq!(r.pod_sandbox_id, "sandbox-uid-0");
        }
        other => panic!("unexpected response {}", other),
    }

    // the v1-typed listing is bridged the same way
    let pods = backend
        .list_pod_sandbox(protocols::v1::ListPodSandboxRequest::default())
        .await
        .unwrap();
    assert_eq!(pods.items.len(), 1);
    assert_eq!(pods.items[0].id, "sandbox-live");
    assert_eq!(pods.items[0].metadata.as_ref().unwrap().name, "live-pod");

    server.abort();
}
