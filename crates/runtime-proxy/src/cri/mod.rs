// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! The CRI-facing side of the proxy: typed request/response pairs for the
//! intercepted RPCs, the backend clients, and the two gRPC front ends.

pub mod backend;
pub mod server;
pub mod v1;
pub mod v1alpha2;

use protocols::v1 as criv1;
use proxy_types::RuntimeRequestPath;
use strum::Display;

/// Which executor variant an intercepted RPC is handled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeResourceType {
    Pod,
    Container,
    Noop,
}

/// An intercepted runtime request, normalised to CRI v1.
/// Request and response variants must stay paired.
#[derive(Debug, Clone, Display)]
pub enum RuntimeRequest {
    RunPodSandbox(criv1::RunPodSandboxRequest),
    StopPodSandbox(criv1::StopPodSandboxRequest),
    RemovePodSandbox(criv1::RemovePodSandboxRequest),
    CreateContainer(criv1::CreateContainerRequest),
    StartContainer(criv1::StartContainerRequest),
    StopContainer(criv1::StopContainerRequest),
    RemoveContainer(criv1::RemoveContainerRequest),
    UpdateContainerResources(criv1::UpdateContainerResourcesRequest),
}

/// The backend's reply to an intercepted runtime request.
#[derive(Debug, Clone, Display)]
pub enum RuntimeResponse {
    RunPodSandbox(criv1::RunPodSandboxResponse),
    StopPodSandbox(criv1::StopPodSandboxResponse),
    RemovePodSandbox(criv1::RemovePodSandboxResponse),
    CreateContainer(criv1::CreateContainerResponse),
    StartContainer(criv1::StartContainerResponse),
    StopContainer(criv1::StopContainerResponse),
    RemoveContainer(criv1::RemoveContainerResponse),
    UpdateContainerResources(criv1::UpdateContainerResourcesResponse),
}

/// A checkpoint record scheduled for deletion when the request finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Pod(String),
    Container(String),
}

impl RuntimeRequest {
    /// The fixed routing table: which hook path the request dispatches to
    /// and which executor variant handles it. RemovePodSandbox and
    /// RemoveContainer never call hook plugins; they are routed only so the
    /// scoped checkpoint release runs.
    pub fn hook_info(&self) -> (RuntimeRequestPath, RuntimeResourceType) {
        match self {
            RuntimeRequest::RunPodSandbox(_) => {
                (RuntimeRequestPath::RunPodSandbox, RuntimeResourceType::Pod)
            }
            RuntimeRequest::StopPodSandbox(_) => {
                (RuntimeRequestPath::StopPodSandbox, RuntimeResourceType::Pod)
            }
            RuntimeRequest::CreateContainer(_) => (
                RuntimeRequestPath::CreateContainer,
                RuntimeResourceType::Container,
            ),
            RuntimeRequest::StartContainer(_) => (
                RuntimeRequestPath::StartContainer,
                RuntimeResourceType::Container,
            ),
            RuntimeRequest::StopContainer(_) => (
                RuntimeRequestPath::StopContainer,
                RuntimeResourceType::Container,
            ),
            RuntimeRequest::UpdateContainerResources(_) => (
                RuntimeRequestPath::UpdateContainerResources,
                RuntimeResourceType::Container,
            ),
            RuntimeRequest::RemoveContainer(_) => {
                (RuntimeRequestPath::None, RuntimeResourceType::Container)
            }
            RuntimeRequest::RemovePodSandbox(_) => {
                (RuntimeRequestPath::None, RuntimeResourceType::Noop)
            }
        }
    }

    /// The checkpoint record the terminal RPCs release on completion.
    pub fn delete_target(&self) -> Option<DeleteTarget> {
        match self {
            RuntimeRequest::StopPodSandbox(req) => {
                Some(DeleteTarget::Pod(req.pod_sandbox_id.clone()))
            }
            RuntimeRequest::RemovePodSandbox(req) => {
                Some(DeleteTarget::Pod(req.pod_sandbox_id.clone()))
            }
            RuntimeRequest::RemoveContainer(req) => {
                Some(DeleteTarget::Container(req.container_id.clone()))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_info_table() {
        let request = RuntimeRequest::CreateContainer(Default::default());
        assert_eq!(
            request.hook_info(),
            (
                RuntimeRequestPath::CreateContainer,
                RuntimeResourceType::Container
            )
        );

        let request = RuntimeRequest::RemoveContainer(Default::default());
        assert_eq!(
            request.hook_info(),
            (RuntimeRequestPath::None, RuntimeResourceType::Container)
        );

        let request = RuntimeRequest::RemovePodSandbox(Default::default());
        assert_eq!(
            request.hook_info(),
            (RuntimeRequestPath::None, RuntimeResourceType::Noop)
        );
    }

    #[test]
    fn test_delete_target() {
        let request = RuntimeRequest::StopPodSandbox(criv1::StopPodSandboxRequest {
            pod_sandbox_id: "sandbox-0".to_string(),
        });
        assert_eq!(
            request.delete_target(),
            Some(DeleteTarget::Pod("sandbox-0".to_string()))
        );

        let request = RuntimeRequest::StartContainer(Default::default());
        assert_eq!(request.delete_target(), None);
    }
}
