// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::Arc;

use protocols::v1;
use proxy_types::utils::merge_map;
use proxy_types::{
    CallHookPluginOperation, HookRequest, HookResponse, PodSandboxInfo, PodSandboxMetadata,
};

use crate::cri::{RuntimeRequest, RuntimeResponse};
use crate::executor::utils::{to_cri_resources, to_hook_resources};
use crate::executor::{ExecutorError, RuntimeResourceExecutor};
use crate::store::CheckpointStore;

/// Executor for the pod-level lifecycle RPCs.
pub struct PodResourceExecutor {
    store: Arc<CheckpointStore>,
    sandbox_id: String,
    pub info: PodSandboxInfo,
}

impl PodResourceExecutor {
    pub fn new(store: Arc<CheckpointStore>) -> Self {
        Self {
            store,
            sandbox_id: String::new(),
            info: PodSandboxInfo::default(),
        }
    }

    /// Rebuilds the record from one entry of the backend's pod listing
    /// during failover. The listing carries no cgroup or resource data, so
    /// those fields stay empty until kubelet touches the pod again.
    pub fn parse_pod(&mut self, pod: &v1::PodSandbox) -> Result<(), ExecutorError> {
        if pod.id.is_empty() {
            return Err(ExecutorError::EmptyId("pod sandbox"));
        }
        let meta = pod.metadata.clone().unwrap_or_default();
        self.sandbox_id = pod.id.clone();
        self.info = PodSandboxInfo {
            pod_meta: PodSandboxMetadata {
                name: meta.name,
                namespace: meta.namespace,
                uid: meta.uid,
                attempt: meta.attempt,
            },
            labels: pod.labels.clone(),
            annotations: pod.annotations.clone(),
            runtime_handler: pod.runtime_handler.clone(),
            ..Default::default()
        };
        Ok(())
    }

    fn load(&mut self, sandbox_id: &str) -> Result<(), ExecutorError> {
        let info = self
            .store
            .get_pod(sandbox_id)
            .ok_or_else(|| ExecutorError::PodNotFound(sandbox_id.to_string()))?;
        self.sandbox_id = sandbox_id.to_string();
        self.info = (*info).clone();
        Ok(())
    }
}

impl RuntimeResourceExecutor for PodResourceExecutor {
    fn parse_request(
        &mut self,
        request: &RuntimeRequest,
    ) -> Result<CallHookPluginOperation, ExecutorError> {
        match request {
            RuntimeRequest::RunPodSandbox(req) => {
                let config = req
                    .config
                    .as_ref()
                    .ok_or(ExecutorError::MalformedRequest(
                        "run pod sandbox request without config",
                    ))?;
                let meta = config.metadata.clone().unwrap_or_default();
                self.info = PodSandboxInfo {
                    pod_meta: PodSandboxMetadata {
                        name: meta.name,
                        namespace: meta.namespace,
                        uid: meta.uid,
                        attempt: meta.attempt,
                    },
                    labels: config.labels.clone(),
                    annotations: config.annotations.clone(),
                    cgroup_parent: config
                        .linux
                        .as_ref()
                        .map(|l| l.cgroup_parent.clone())
                        .unwrap_or_default(),
                    runtime_handler: req.runtime_handler.clone(),
                    resources: config
                        .linux
                        .as_ref()
                        .and_then(|l| l.resources.as_ref())
                        .map(to_hook_resources),
                    overhead: config
                        .linux
                        .as_ref()
                        .and_then(|l| l.overhead.as_ref())
                        .map(to_hook_resources),
                };
                Ok(CallHookPluginOperation::ShouldCallHookPlugin)
            }
            RuntimeRequest::StopPodSandbox(req) => {
                self.load(&req.pod_sandbox_id)?;
                Ok(CallHookPluginOperation::ShouldCallHookPlugin)
            }
            _ => Ok(CallHookPluginOperation::ShouldNotCallHookPlugin),
        }
    }

    fn generate_hook_request(&self) -> Option<HookRequest> {
        Some(HookRequest::PodSandbox(self.info.clone()))
    }

    fn update_request(
        &mut self,
        response: &HookResponse,
        request: &mut RuntimeRequest,
    ) -> Result<(), ExecutorError> {
        let resp = match response {
            HookResponse::PodSandbox(r) => r,
            _ => {
                return Err(proxy_types::Error::IncompatibleHookResponse("pod sandbox").into());
            }
        };

        self.info.labels = merge_map(&self.info.labels, &resp.labels);
        self.info.annotations = merge_map(&self.info.annotations, &resp.annotations);
        if !resp.cgroup_parent.is_empty() {
            self.info.cgroup_parent = resp.cgroup_parent.clone();
        }
        if resp.resources.is_some() {
            self.info.resources = resp.resources.clone();
        }

        if let RuntimeRequest::RunPodSandbox(req) = request {
            if let Some(config) = req.config.as_mut() {
                config.labels = self.info.labels.clone();
                config.annotations = self.info.annotations.clone();
                let linux = config.linux.get_or_insert_with(Default::default);
                linux.cgroup_parent = self.info.cgroup_parent.clone();
                if resp.resources.is_some() {
                    linux.resources = self.info.resources.as_ref().map(to_cri_resources);
                }
            }
        }
        Ok(())
    }

    fn resource_checkpoint(&mut self, response: &RuntimeResponse) -> Result<(), ExecutorError> {
        if let RuntimeResponse::RunPodSandbox(resp) = response {
            self.sandbox_id = resp.pod_sandbox_id.clone();
        }
        if self.sandbox_id.is_empty() {
            return Err(ExecutorError::EmptyId("pod sandbox"));
        }
        self.store.write_pod(&self.sandbox_id, self.info.clone());
        Ok(())
    }

    fn meta_info(&self) -> String {
        format!(
            "pod sandbox {}/{}",
            self.info.pod_meta.namespace, self.info.pod_meta.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_types::{LinuxContainerResources, PodSandboxHookResponse};
    use std::collections::HashMap;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn run_pod_sandbox_request() -> v1::RunPodSandboxRequest {
        v1::RunPodSandboxRequest {
            config: Some(v1::PodSandboxConfig {
                metadata: Some(v1::PodSandboxMetadata {
                    name: "mock pod sandbox".to_string(),
                    uid: "202207121604".to_string(),
                    namespace: "mock namespace".to_string(),
                    attempt: 0,
                }),
                labels: map(&[("pod-label", "true")]),
                annotations: map(&[("pod-annotation", "true")]),
                linux: Some(v1::LinuxPodSandboxConfig {
                    cgroup_parent: "/kubepods/besteffort".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            runtime_handler: "runc".to_string(),
        }
    }

    #[test]
    fn test_parse_run_pod_sandbox_request() {
        let store = Arc::new(CheckpointStore::new());
        let mut executor = PodResourceExecutor::new(store);

        let operation = executor
            .parse_request(&RuntimeRequest::RunPodSandbox(run_pod_sandbox_request()))
            .unwrap();
        assert_eq!(operation, CallHookPluginOperation::ShouldCallHookPlugin);
        assert_eq!(executor.info.pod_meta.name, "mock pod sandbox");
        assert_eq!(executor.info.pod_meta.uid, "202207121604");
        assert_eq!(executor.info.cgroup_parent, "/kubepods/besteffort");
        assert_eq!(executor.info.runtime_handler, "runc");
        assert_eq!(executor.info.annotations, map(&[("pod-annotation", "true")]));
    }

    #[test]
    fn test_parse_stop_pod_sandbox_requires_checkpoint() {
        let store = Arc::new(CheckpointStore::new());
        let mut executor = PodResourceExecutor::new(store.clone());

        let request = RuntimeRequest::StopPodSandbox(v1::StopPodSandboxRequest {
            pod_sandbox_id: "sandbox-0".to_string(),
        });
        assert!(executor.parse_request(&request).is_err());

        store.write_pod(
            "sandbox-0",
            PodSandboxInfo {
                pod_meta: PodSandboxMetadata {
                    name: "stored".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let operation = executor.parse_request(&request).unwrap();
        assert_eq!(operation, CallHookPluginOperation::ShouldCallHookPlugin);
        assert_eq!(executor.info.pod_meta.name, "stored");
    }

    #[test]
    fn test_update_request() {
        let store = Arc::new(CheckpointStore::new());
        let mut executor = PodResourceExecutor::new(store);
        let mut request = RuntimeRequest::RunPodSandbox(run_pod_sandbox_request());
        executor.parse_request(&request).unwrap();

        let response = HookResponse::PodSandbox(PodSandboxHookResponse {
            annotations: map(&[("hook-annotation", "true")]),
            cgroup_parent: "/offline/besteffort".to_string(),
            resources: Some(LinuxContainerResources {
                cpu_shares: 2,
                ..Default::default()
            }),
            ..Default::default()
        });
        executor.update_request(&response, &mut request).unwrap();

        match request {
            RuntimeRequest::RunPodSandbox(req) => {
                let config = req.config.unwrap();
                assert_eq!(
                    config.annotations,
                    map(&[("pod-annotation", "true"), ("hook-annotation", "true")])
                );
                let linux = config.linux.unwrap();
                assert_eq!(linux.cgroup_parent, "/offline/besteffort");
                assert_eq!(linux.resources.unwrap().cpu_shares, 2);
            }
            _ => panic!("request changed kind"),
        }
    }

    #[test]
    fn test_update_request_incompatible_response() {
        let store = Arc::new(CheckpointStore::new());
        let mut executor = PodResourceExecutor::new(store);
        let mut request = RuntimeRequest::RunPodSandbox(run_pod_sandbox_request());
        executor.parse_request(&request).unwrap();

        let response = HookResponse::Container(Default::default());
        assert!(executor.update_request(&response, &mut request).is_err());
    }

    #[test]
    fn test_resource_checkpoint_keyed_by_response() {
        let store = Arc::new(CheckpointStore::new());
        let mut executor = PodResourceExecutor::new(store.clone());
        executor
            .parse_request(&RuntimeRequest::RunPodSandbox(run_pod_sandbox_request()))
            .unwrap();

        executor
            .resource_checkpoint(&RuntimeResponse::RunPodSandbox(v1::RunPodSandboxResponse {
                pod_sandbox_id: "sandbox-0".to_string(),
            }))
            .unwrap();

        let stored = store.get_pod("sandbox-0").unwrap();
        assert_eq!(stored.pod_meta.name, "mock pod sandbox");
    }

    #[test]
    fn test_parse_pod_listing() {
        let store = Arc::new(CheckpointStore::new());
        let mut executor = PodResourceExecutor::new(store.clone());

        assert!(executor.parse_pod(&v1::PodSandbox::default()).is_err());

        let pod = v1::PodSandbox {
            id: "sandbox-0".to_string(),
            metadata: Some(v1::PodSandboxMetadata {
                name: "podName".to_string(),
                ..Default::default()
            }),
            annotations: map(&[("annotationKey1", "annotationValue1")]),
            labels: map(&[("labelsKey1", "labelsValue1")]),
            ..Default::default()
        };
        executor.parse_pod(&pod).unwrap();
        executor
            .resource_checkpoint(&RuntimeResponse::RunPodSandbox(v1::RunPodSandboxResponse {
                pod_sandbox_id: pod.id.clone(),
            }))
            .unwrap();

        let stored = store.get_pod("sandbox-0").unwrap();
        assert_eq!(stored.pod_meta.name, "podName");
        assert_eq!(stored.annotations, map(&[("annotationKey1", "annotationValue1")]));
        assert_eq!(stored.labels, map(&[("labelsKey1", "labelsValue1")]));
    }
}
