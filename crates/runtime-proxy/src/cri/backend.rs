// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Clients towards the backend runtime. The proxy speaks CRI v1 internally;
//! when the backend only understands v1alpha2 every message is re-coded on
//! the way through.

use std::convert::TryFrom;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use protocols::{v1, v1alpha2};
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::Status;
use tower::service_fn;

use crate::convert::{ConvertError, CriVersion, ToV1, ToV1alpha2};
use crate::cri::{RuntimeRequest, RuntimeResponse};
use crate::interceptor::RuntimeBackend;

/// Timeout for capability probes and the failover listing.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

type RuntimeClientV1 = v1::runtime_service_client::RuntimeServiceClient<Channel>;
type RuntimeClientV1alpha2 = v1alpha2::runtime_service_client::RuntimeServiceClient<Channel>;
type ImageClientV1 = v1::image_service_client::ImageServiceClient<Channel>;
type ImageClientV1alpha2 = v1alpha2::image_service_client::ImageServiceClient<Channel>;

/// Connects a plain-text gRPC channel over a Unix socket.
pub async fn connect_uds(sock_path: &str) -> Result<Channel> {
    let sock_path = sock_path.to_string();
    let channel = Endpoint::try_from("http://[::]")
        .context("build endpoint")?
        .connect_with_connector(service_fn(move |_: Uri| {
            UnixStream::connect(sock_path.clone())
        }))
        .await
        .context("dial unix socket")?;
    Ok(channel)
}

fn from_convert_err(e: ConvertError) -> Status {
    Status::internal(e.to_string())
}

#[derive(Clone)]
enum RuntimeClient {
    V1(RuntimeClientV1),
    V1alpha2(RuntimeClientV1alpha2),
}

/// The runtime service of the backend, exposed with v1 types regardless of
/// the version the backend natively speaks.
#[derive(Clone)]
pub struct RuntimeBackendClient {
    client: RuntimeClient,
}

macro_rules! forward_runtime {
    ($($method:ident($req:ident) -> $resp:ident;)+) => {
        $(
            pub async fn $method(&self, request: v1::$req) -> Result<v1::$resp, Status> {
                match &self.client {
                    RuntimeClient::V1(client) => client
                        .clone()
                        .$method(request)
                        .await
                        .map(|r| r.into_inner()),
                    RuntimeClient::V1alpha2(client) => {
                        let request = request.to_v1alpha2().map_err(from_convert_err)?;
                        let response = client.clone().$method(request).await?.into_inner();
                        response.to_v1().map_err(from_convert_err)
                    }
                }
            }
        )+
    };
}

impl RuntimeBackendClient {
    pub fn new_v1(channel: Channel) -> Self {
        Self {
            client: RuntimeClient::V1(RuntimeClientV1::new(channel)),
        }
    }

    pub fn new_v1alpha2(channel: Channel) -> Self {
        Self {
            client: RuntimeClient::V1alpha2(RuntimeClientV1alpha2::new(channel)),
        }
    }

    /// The CRI version the backend natively speaks.
    pub fn api_version(&self) -> CriVersion {
        match &self.client {
            RuntimeClient::V1(_) => CriVersion::V1,
            RuntimeClient::V1alpha2(_) => CriVersion::V1alpha2,
        }
    }

    forward_runtime! {
        version(VersionRequest) -> VersionResponse;
        run_pod_sandbox(RunPodSandboxRequest) -> RunPodSandboxResponse;
        stop_pod_sandbox(StopPodSandboxRequest) -> StopPodSandboxResponse;
        remove_pod_sandbox(RemovePodSandboxRequest) -> RemovePodSandboxResponse;
        pod_sandbox_status(PodSandboxStatusRequest) -> PodSandboxStatusResponse;
        list_pod_sandbox(ListPodSandboxRequest) -> ListPodSandboxResponse;
        create_container(CreateContainerRequest) -> CreateContainerResponse;
        start_container(StartContainerRequest) -> StartContainerResponse;
        stop_container(StopContainerRequest) -> StopContainerResponse;
        remove_container(RemoveContainerRequest) -> RemoveContainerResponse;
        list_containers(ListContainersRequest) -> ListContainersResponse;
        container_status(ContainerStatusRequest) -> ContainerStatusResponse;
        update_container_resources(UpdateContainerResourcesRequest) -> UpdateContainerResourcesResponse;
        reopen_container_log(ReopenContainerLogRequest) -> ReopenContainerLogResponse;
        exec_sync(ExecSyncRequest) -> ExecSyncResponse;
        exec(ExecRequest) -> ExecResponse;
        attach(AttachRequest) -> AttachResponse;
        port_forward(PortForwardRequest) -> PortForwardResponse;
        container_stats(ContainerStatsRequest) -> ContainerStatsResponse;
        list_container_stats(ListContainerStatsRequest) -> ListContainerStatsResponse;
        pod_sandbox_stats(PodSandboxStatsRequest) -> PodSandboxStatsResponse;
        list_pod_sandbox_stats(ListPodSandboxStatsRequest) -> ListPodSandboxStatsResponse;
        update_runtime_config(UpdateRuntimeConfigRequest) -> UpdateRuntimeConfigResponse;
        status(StatusRequest) -> StatusResponse;
    }

    // The remaining RPCs exist in v1 only.

    pub async fn checkpoint_container(
        &self,
        request: v1::CheckpointContainerRequest,
    ) -> Result<v1::CheckpointContainerResponse, Status> {
        match &self.client {
            RuntimeClient::V1(client) => client
                .clone()
                .checkpoint_container(request)
                .await
                .map(|r| r.into_inner()),
            RuntimeClient::V1alpha2(_) => Err(Status::unimplemented(
                "CheckpointContainer requires a CRI v1 backend",
            )),
        }
    }

    pub async fn get_container_events(
        &self,
        request: v1::GetEventsRequest,
    ) -> Result<tonic::codec::Streaming<v1::ContainerEventResponse>, Status> {
        match &self.client {
            RuntimeClient::V1(client) => client
                .clone()
                .get_container_events(request)
                .await
                .map(|r| r.into_inner()),
            RuntimeClient::V1alpha2(_) => Err(Status::unimplemented(
                "GetContainerEvents requires a CRI v1 backend",
            )),
        }
    }
}

#[async_trait]
impl RuntimeBackend for RuntimeBackendClient {
    async fn handle(&self, request: RuntimeRequest) -> Result<RuntimeResponse, Status> {
        match request {
            RuntimeRequest::RunPodSandbox(req) => self
                .run_pod_sandbox(req)
                .await
                .map(RuntimeResponse::RunPodSandbox),
            RuntimeRequest::StopPodSandbox(req) => self
                .stop_pod_sandbox(req)
                .await
                .map(RuntimeResponse::StopPodSandbox),
            RuntimeRequest::RemovePodSandbox(req) => self
                .remove_pod_sandbox(req)
                .await
                .map(RuntimeResponse::RemovePodSandbox),
            RuntimeRequest::CreateContainer(req) => self
                .create_container(req)
                .await
                .map(RuntimeResponse::CreateContainer),
            RuntimeRequest::StartContainer(req) => self
                .start_container(req)
                .await
                .map(RuntimeResponse::StartContainer),
            RuntimeRequest::StopContainer(req) => self
                .stop_container(req)
                .await
                .map(RuntimeResponse::StopContainer),
            RuntimeRequest::RemoveContainer(req) => self
                .remove_container(req)
                .await
                .map(RuntimeResponse::RemoveContainer),
            RuntimeRequest::UpdateContainerResources(req) => self
                .update_container_resources(req)
                .await
                .map(RuntimeResponse::UpdateContainerResources),
        }
    }
}

#[derive(Clone)]
enum ImageClient {
    V1(ImageClientV1),
    V1alpha2(ImageClientV1alpha2),
}

/// The image service of the backend, exposed with v1 types.
#[derive(Clone)]
pub struct ImageBackendClient {
    client: ImageClient,
}

macro_rules! forward_image {
    ($($method:ident($req:ident) -> $resp:ident;)+) => {
        $(
            pub async fn $method(&self, request: v1::$req) -> Result<v1::$resp, Status> {
                match &self.client {
                    ImageClient::V1(client) => client
                        .clone()
                        .$method(request)
                        .await
                        .map(|r| r.into_inner()),
                    ImageClient::V1alpha2(client) => {
                        let request = request.to_v1alpha2().map_err(from_convert_err)?;
                        let response = client.clone().$method(request).await?.into_inner();
                        response.to_v1().map_err(from_convert_err)
                    }
                }
            }
        )+
    };
}

impl ImageBackendClient {
    pub fn new_v1(channel: Channel) -> Self {
        Self {
            client: ImageClient::V1(ImageClientV1::new(channel)),
        }
    }

    pub fn new_v1alpha2(channel: Channel) -> Self {
        Self {
            client: ImageClient::V1alpha2(ImageClientV1alpha2::new(channel)),
        }
    }

    /// The CRI version the backend natively speaks.
    pub fn api_version(&self) -> CriVersion {
        match &self.client {
            ImageClient::V1(_) => CriVersion::V1,
            ImageClient::V1alpha2(_) => CriVersion::V1alpha2,
        }
    }

    forward_image! {
        list_images(ListImagesRequest) -> ListImagesResponse;
        image_status(ImageStatusRequest) -> ImageStatusResponse;
        pull_image(PullImageRequest) -> PullImageResponse;
        remove_image(RemoveImageRequest) -> RemoveImageResponse;
        image_fs_info(ImageFsInfoRequest) -> ImageFsInfoResponse;
    }
}
