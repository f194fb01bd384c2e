// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::resources::{update_resource, LinuxContainerResources};
use crate::utils::merge_map;
use crate::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandboxMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub attempt: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub attempt: u32,
    /// The backend's container id. Empty until the CreateContainer response
    /// has been checkpointed.
    #[serde(default)]
    pub id: String,
}

/// The checkpoint record for one pod sandbox. This struct is also the
/// pod-side payload sent to hook plugins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSandboxInfo {
    #[serde(default)]
    pub pod_meta: PodSandboxMetadata,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub cgroup_parent: String,
    #[serde(default)]
    pub runtime_handler: String,
    #[serde(default)]
    pub resources: Option<LinuxContainerResources>,
    #[serde(default)]
    pub overhead: Option<LinuxContainerResources>,
}

/// The checkpoint record for one container, with the owning pod's metadata
/// denormalised in so hook plugins see a single merged view. This struct is
/// also the container-side payload sent to hook plugins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    #[serde(default)]
    pub pod_meta: PodSandboxMetadata,
    #[serde(default)]
    pub pod_labels: HashMap<String, String>,
    #[serde(default)]
    pub pod_annotations: HashMap<String, String>,
    #[serde(default)]
    pub pod_cgroup_parent: String,
    #[serde(default)]
    pub container_meta: ContainerMetadata,
    #[serde(default)]
    pub container_labels: HashMap<String, String>,
    #[serde(default)]
    pub container_annotations: HashMap<String, String>,
    #[serde(default)]
    pub container_envs: HashMap<String, String>,
    #[serde(default)]
    pub container_resources: Option<LinuxContainerResources>,
}

/// What a hook plugin may send back for a pod-level request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSandboxHookResponse {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub cgroup_parent: String,
    #[serde(default)]
    pub resources: Option<LinuxContainerResources>,
}

/// What a hook plugin may send back for a container-level request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerHookResponse {
    #[serde(default)]
    pub container_annotations: HashMap<String, String>,
    #[serde(default)]
    pub container_resources: Option<LinuxContainerResources>,
    #[serde(default)]
    pub pod_cgroup_parent: String,
}

/// The neutral request shape handed to hook plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HookRequest {
    PodSandbox(PodSandboxInfo),
    Container(ContainerInfo),
}

/// The neutral response shape received from hook plugins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HookResponse {
    PodSandbox(PodSandboxHookResponse),
    Container(ContainerHookResponse),
}

impl HookRequest {
    /// Folds a plugin's response back into the request, so the next plugin in
    /// the chain sees the accumulated view. Annotations are unioned with the
    /// response winning, a non-empty cgroup parent overwrites, and resources
    /// are merged with the general rules.
    pub fn apply_response(&mut self, resp: &HookResponse) -> Result<(), Error> {
        match (self, resp) {
            (HookRequest::PodSandbox(info), HookResponse::PodSandbox(r)) => {
                info.labels = merge_map(&info.labels, &r.labels);
                info.annotations = merge_map(&info.annotations, &r.annotations);
                if !r.cgroup_parent.is_empty() {
                    info.cgroup_parent = r.cgroup_parent.clone();
                }
                if r.resources.is_some() {
                    info.resources = r.resources.clone();
                }
                Ok(())
            }
            (HookRequest::Container(info), HookResponse::Container(r)) => {
                info.container_annotations =
                    merge_map(&info.container_annotations, &r.container_annotations);
                if !r.pod_cgroup_parent.is_empty() {
                    info.pod_cgroup_parent = r.pod_cgroup_parent.clone();
                }
                info.container_resources = update_resource(
                    info.container_resources.take(),
                    r.container_resources.as_ref(),
                );
                Ok(())
            }
            (HookRequest::PodSandbox(_), _) => Err(Error::IncompatibleHookResponse("pod sandbox")),
            (HookRequest::Container(_), _) => Err(Error::IncompatibleHookResponse("container")),
        }
    }
}

/// Whether the interception pipeline should dispatch to hook plugins for the
/// parsed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallHookPluginOperation {
    ShouldCallHookPlugin,
    ShouldNotCallHookPlugin,
    Unknown,
}

impl Default for CallHookPluginOperation {
    fn default() -> Self {
        CallHookPluginOperation::Unknown
    }
}

/// Dispatch stage relative to the backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookStage {
    PreHook,
    PostHook,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookStage::PreHook => write!(f, "PreHook"),
            HookStage::PostHook => write!(f, "PostHook"),
        }
    }
}

/// Governs what the pipeline does when a plugin registered for a request
/// path fails at the pre stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// The RPC fails without the backend being contacted.
    Fail,
    /// The failure is logged and the plugin skipped.
    Ignore,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Ignore
    }
}

/// The hook registration key: one per intercepted lifecycle RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeRequestPath {
    #[serde(rename = "/runpodsandbox")]
    RunPodSandbox,
    #[serde(rename = "/stoppodsandbox")]
    StopPodSandbox,
    #[serde(rename = "/createcontainer")]
    CreateContainer,
    #[serde(rename = "/startcontainer")]
    StartContainer,
    #[serde(rename = "/stopcontainer")]
    StopContainer,
    #[serde(rename = "/updatecontainerresources")]
    UpdateContainerResources,
    #[serde(rename = "")]
    None,
}

impl RuntimeRequestPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeRequestPath::RunPodSandbox => "/runpodsandbox",
            RuntimeRequestPath::StopPodSandbox => "/stoppodsandbox",
            RuntimeRequestPath::CreateContainer => "/createcontainer",
            RuntimeRequestPath::StartContainer => "/startcontainer",
            RuntimeRequestPath::StopContainer => "/stopcontainer",
            RuntimeRequestPath::UpdateContainerResources => "/updatecontainerresources",
            RuntimeRequestPath::None => "",
        }
    }
}

impl fmt::Display for RuntimeRequestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_apply_response_pod() {
        let mut req = HookRequest::PodSandbox(PodSandboxInfo {
            annotations: map(&[("k1", "v1")]),
            cgroup_parent: "/kubepods/besteffort".to_string(),
            ..Default::default()
        });
        let resp = HookResponse::PodSandbox(PodSandboxHookResponse {
            annotations: map(&[("k2", "v2")]),
            cgroup_parent: "/offline/besteffort".to_string(),
            ..Default::default()
        });
        req.apply_response(&resp).unwrap();

        match req {
            HookRequest::PodSandbox(info) => {
                assert_eq!(info.annotations, map(&[("k1", "v1"), ("k2", "v2")]));
                assert_eq!(info.cgroup_parent, "/offline/besteffort");
            }
            _ => panic!("request changed kind"),
        }
    }

    #[test]
    fn test_apply_response_kind_mismatch() {
        let mut req = HookRequest::PodSandbox(PodSandboxInfo::default());
        let resp = HookResponse::Container(ContainerHookResponse::default());
        assert!(req.apply_response(&resp).is_err());
    }

    #[test]
    fn test_request_path_serde() {
        let path: RuntimeRequestPath = serde_json::from_str("\"/createcontainer\"").unwrap();
        assert_eq!(path, RuntimeRequestPath::CreateContainer);
        assert_eq!(path.as_str(), "/createcontainer");
    }
}
