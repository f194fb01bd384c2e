// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::Arc;

use protocols::v1alpha2;
use tonic::{Request, Response, Status};

use crate::convert::{ConvertError, ToV1, ToV1alpha2};
use crate::cri::backend::RuntimeBackendClient;
use crate::cri::{RuntimeRequest, RuntimeResponse};
use crate::interceptor::RuntimeInterceptor;

fn from_convert_err(e: ConvertError) -> Status {
    Status::internal(e.to_string())
}

/// Converts to v1, forwards to the backend, converts the reply back.
macro_rules! forwarded {
    ($self:ident, $request:ident, $method:ident) => {{
        let request = $request.into_inner().to_v1().map_err(from_convert_err)?;
        let response = $self.backend.$method(request).await?;
        Ok(Response::new(
            response.to_v1alpha2().map_err(from_convert_err)?,
        ))
    }};
}

/// Converts to v1, runs the interception pipeline, converts the reply back.
macro_rules! intercepted {
    ($self:ident, $request:ident, $variant:ident) => {{
        let request = $request.into_inner().to_v1().map_err(from_convert_err)?;
        let response = $self
            .interceptor
            .intercept_runtime_request(RuntimeRequest::$variant(request))
            .await?;
        match response {
            RuntimeResponse::$variant(r) => Ok(Response::new(
                r.to_v1alpha2().map_err(from_convert_err)?,
            )),
            other => Err(Status::internal(format!(
                "unexpected response {} to {}",
                other,
                stringify!($variant)
            ))),
        }
    }};
}

pub struct RuntimeServer {
    interceptor: Arc<RuntimeInterceptor>,
    backend: Arc<RuntimeBackendClient>,
}

impl RuntimeServer {
    pub fn new(interceptor: Arc<RuntimeInterceptor>, backend: Arc<RuntimeBackendClient>) -> Self {
        Self {
            interceptor,
            backend,
        }
    }
}

#[async_trait::async_trait]
impl v1alpha2::runtime_service_server::RuntimeService for RuntimeServer {
    async fn version(
        &self,
        request: Request<v1alpha2::VersionRequest>,
    ) -> Result<Response<v1alpha2::VersionResponse>, Status> {
        forwarded!(self, request, version)
    }

    async fn run_pod_sandbox(
        &self,
        request: Request<v1alpha2::RunPodSandboxRequest>,
    ) -> Result<Response<v1alpha2::RunPodSandboxResponse>, Status> {
        intercepted!(self, request, RunPodSandbox)
    }

    async fn stop_pod_sandbox(
        &self,
        request: Request<v1alpha2::StopPodSandboxRequest>,
    ) -> Result<Response<v1alpha2::StopPodSandboxResponse>, Status> {
        intercepted!(self, request, StopPodSandbox)
    }

    async fn remove_pod_sandbox(
        &self,
        request: Request<v1alpha2::RemovePodSandboxRequest>,
    ) -> Result<Response<v1alpha2::RemovePodSandboxResponse>, Status> {
        intercepted!(self, request, RemovePodSandbox)
    }

    async fn pod_sandbox_status(
        &self,
        request: Request<v1alpha2::PodSandboxStatusRequest>,
    ) -> Result<Response<v1alpha2::PodSandboxStatusResponse>, Status> {
        forwarded!(self, request, pod_sandbox_status)
    }

    async fn list_pod_sandbox(
        &self,
        request: Request<v1alpha2::ListPodSandboxRequest>,
    ) -> Result<Response<v1alpha2::ListPodSandboxResponse>, Status> {
        forwarded!(self, request, list_pod_sandbox)
    }

    async fn create_container(
        &self,
        request: Request<v1alpha2::CreateContainerRequest>,
    ) -> Result<Response<v1alpha2::CreateContainerResponse>, Status> {
        intercepted!(self, request, CreateContainer)
    }

    async fn start_container(
        &self,
        request: Request<v1alpha2::StartContainerRequest>,
    ) -> Result<Response<v1alpha2::StartContainerResponse>, Status> {
        intercepted!(self, request, StartContainer)
    }

    async fn stop_container(
        &self,
        request: Request<v1alpha2::StopContainerRequest>,
    ) -> Result<Response<v1alpha2::StopContainerResponse>, Status> {
        intercepted!(self, request, StopContainer)
    }

    async fn remove_container(
        &self,
        request: Request<v1alpha2::RemoveContainerRequest>,
    ) -> Result<Response<v1alpha2::RemoveContainerResponse>, Status> {
        intercepted!(self, request, RemoveContainer)
    }

    async fn list_containers(
        &self,
        request: Request<v1alpha2::ListContainersRequest>,
    ) -> Result<Response<v1alpha2::ListContainersResponse>, Status> {
        forwarded!(self, request, list_containers)
    }

    async fn container_status(
        &self,
        request: Request<v1alpha2::ContainerStatusRequest>,
    ) -> Result<Response<v1alpha2::ContainerStatusResponse>, Status> {
        forwarded!(self, request, container_status)
    }

    async fn update_container_resources(
        &self,
        request: Request<v1alpha2::UpdateContainerResourcesRequest>,
    ) -> Result<Response<v1alpha2::UpdateContainerResourcesResponse>, Status> {
        intercepted!(self, request, UpdateContainerResources)
    }

    async fn reopen_container_log(
        &self,
        request: Request<v1alpha2::ReopenContainerLogRequest>,
    ) -> Result<Response<v1alpha2::ReopenContainerLogResponse>, Status> {
        forwarded!(self, request, reopen_container_log)
    }

    async fn exec_sync(
        &self,
        request: Request<v1alpha2::ExecSyncRequest>,
    ) -> Result<Response<v1alpha2::ExecSyncResponse>, Status> {
        forwarded!(self, request, exec_sync)
    }

    async fn exec(
        &self,
        request: Request<v1alpha2::ExecRequest>,
    ) -> Result<Response<v1alpha2::ExecResponse>, Status> {
        forwarded!(self, request, exec)
    }

    async fn attach(
        &self,
        request: Request<v1alpha2::AttachRequest>,
    ) -> Result<Response<v1alpha2::AttachResponse>, Status> {
        forwarded!(self, request, attach)
    }

    async fn port_forward(
        &self,
        request: Request<v1alpha2::PortForwardRequest>,
    ) -> Result<Response<v1alpha2::PortForwardResponse>, Status> {
        forwarded!(self, request, port_forward)
    }

    async fn container_stats(
        &self,
        request: Request<v1alpha2::ContainerStatsRequest>,
    ) -> Result<Response<v1alpha2::ContainerStatsResponse>, Status> {
        forwarded!(self, request, container_stats)
    }

    async fn list_container_stats(
        &self,
        request: Request<v1alpha2::ListContainerStatsRequest>,
    ) -> Result<Response<v1alpha2::ListContainerStatsResponse>, Status> {
        forwarded!(self, request, list_container_stats)
    }

    async fn pod_sandbox_stats(
        &self,
        request: Request<v1alpha2::PodSandboxStatsRequest>,
    ) -> Result<Response<v1alpha2::PodSandboxStatsResponse>, Status> {
        forwarded!(self, request, pod_sandbox_stats)
    }

    async fn list_pod_sandbox_stats(
        &self,
        request: Request<v1alpha2::ListPodSandboxStatsRequest>,
    ) -> Result<Response<v1alpha2::ListPodSandboxStatsResponse>, Status> {
        forwarded!(self, request, list_pod_sandbox_stats)
    }

    async fn update_runtime_config(
        &self,
        request: Request<v1alpha2::UpdateRuntimeConfigRequest>,
    ) -> Result<Response<v1alpha2::UpdateRuntimeConfigResponse>, Status> {
        forwarded!(self, request, update_runtime_config)
    }

    async fn status(
        &self,
        request: Request<v1alpha2::StatusRequest>,
    ) -> Result<Response<v1alpha2::StatusResponse>, Status> {
        forwarded!(self, request, status)
    }
}
