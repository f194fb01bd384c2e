// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::sync::Arc;

use protocols::v1;
use proxy_types::utils::merge_map;
use proxy_types::{
    update_resource, update_resource_by_update_request, CallHookPluginOperation,
    ContainerHookResponse, ContainerInfo, ContainerMetadata, HookRequest, HookResponse,
};

use crate::cri::{RuntimeRequest, RuntimeResponse};
use crate::executor::utils::{to_cri_resources, to_hook_envs, to_hook_resources};
use crate::executor::{ExecutorError, RuntimeResourceExecutor};
use crate::store::CheckpointStore;

/// Executor for the container-level lifecycle RPCs.
pub struct ContainerResourceExecutor {
    store: Arc<CheckpointStore>,
    pub info: ContainerInfo,
}

impl ContainerResourceExecutor {
    pub fn new(store: Arc<CheckpointStore>) -> Self {
        Self {
            store,
            info: ContainerInfo::default(),
        }
    }

    /// Rebuilds the record from one entry of the backend's container
    /// listing during failover, denormalising the owning pod from the store
    /// when it is already known.
    pub fn parse_container(&mut self, container: &v1::Container) -> Result<(), ExecutorError> {
        if container.id.is_empty() {
            return Err(ExecutorError::EmptyId("container"));
        }
        let mut info = ContainerInfo::default();
        if let Some(pod) = self.store.get_pod(&container.pod_sandbox_id) {
            info.pod_meta = pod.pod_meta.clone();
            info.pod_labels = pod.labels.clone();
            info.pod_annotations = pod.annotations.clone();
            info.pod_cgroup_parent = pod.cgroup_parent.clone();
        }
        let meta = container.metadata.clone().unwrap_or_default();
        info.container_meta = ContainerMetadata {
            name: meta.name,
            attempt: meta.attempt,
            id: String::new(),
        };
        info.container_labels = container.labels.clone();
        info.container_annotations = container.annotations.clone();
        self.info = info;
        Ok(())
    }

    fn load(&mut self, container_id: &str) -> Result<(), ExecutorError> {
        let info = self
            .store
            .get_container(container_id)
            .ok_or_else(|| ExecutorError::ContainerNotFound(container_id.to_string()))?;
        self.info = (*info).clone();
        Ok(())
    }

    fn apply_response(&mut self, resp: &ContainerHookResponse) {
        self.info.container_annotations = merge_map(
            &self.info.container_annotations,
            &resp.container_annotations,
        );
        if !resp.pod_cgroup_parent.is_empty() {
            self.info.pod_cgroup_parent = resp.pod_cgroup_parent.clone();
        }
    }
}

impl RuntimeResourceExecutor for ContainerResourceExecutor {
    fn parse_request(
        &mut self,
        request: &RuntimeRequest,
    ) -> Result<CallHookPluginOperation, ExecutorError> {
        match request {
            RuntimeRequest::CreateContainer(req) => {
                let config = req.config.as_ref().ok_or(ExecutorError::MalformedRequest(
                    "create container request without config",
                ))?;
                let mut info = ContainerInfo::default();
                // the owning pod may be unknown (e.g. created before the
                // proxy started); hooks then see container-only state
                match self.store.get_pod(&req.pod_sandbox_id) {
                    Some(pod) => {
                        info.pod_meta = pod.pod_meta.clone();
                        info.pod_labels = pod.labels.clone();
                        info.pod_annotations = pod.annotations.clone();
                    }
                    None => {
                        info!(
                            sl!(),
                            "pod sandbox {} is not checkpointed, create container with container-only info",
                            req.pod_sandbox_id
                        );
                    }
                }
                let meta = config.metadata.clone().unwrap_or_default();
                info.container_meta = ContainerMetadata {
                    name: meta.name,
                    attempt: meta.attempt,
                    id: String::new(),
                };
                info.container_labels = config.labels.clone();
                info.container_annotations = config.annotations.clone();
                info.container_envs = to_hook_envs(&config.envs);
                info.container_resources = config
                    .linux
                    .as_ref()
                    .and_then(|l| l.resources.as_ref())
                    .map(to_hook_resources);
                info.pod_cgroup_parent = req
                    .sandbox_config
                    .as_ref()
                    .and_then(|c| c.linux.as_ref())
                    .map(|l| l.cgroup_parent.clone())
                    .unwrap_or_default();
                self.info = info;
                Ok(CallHookPluginOperation::ShouldCallHookPlugin)
            }
            RuntimeRequest::StartContainer(req) => {
                self.load(&req.container_id)?;
                Ok(CallHookPluginOperation::ShouldCallHookPlugin)
            }
            RuntimeRequest::StopContainer(req) => {
                self.load(&req.container_id)?;
                Ok(CallHookPluginOperation::ShouldCallHookPlugin)
            }
            RuntimeRequest::UpdateContainerResources(req) => {
                self.load(&req.container_id)?;
                // fold kubelet's delta into the stored envelope
                self.info.container_resources = update_resource_by_update_request(
                    self.info.container_resources.take(),
                    req.linux.as_ref().map(to_hook_resources).as_ref(),
                );
                Ok(CallHookPluginOperation::ShouldCallHookPlugin)
            }
            RuntimeRequest::RemoveContainer(req) => {
                // no hook dispatch; parsed only so the scoped release and
                // the log lines know which container this is
                self.load(&req.container_id)?;
                Ok(CallHookPluginOperation::ShouldNotCallHookPlugin)
            }
            _ => Ok(CallHookPluginOperation::ShouldNotCallHookPlugin),
        }
    }

    fn generate_hook_request(&self) -> Option<HookRequest> {
        Some(HookRequest::Container(self.info.clone()))
    }

    fn update_request(
        &mut self,
        response: &HookResponse,
        request: &mut RuntimeRequest,
    ) -> Result<(), ExecutorError> {
        let resp = match response {
            HookResponse::Container(r) => r,
            _ => {
                return Err(proxy_types::Error::IncompatibleHookResponse("container").into());
            }
        };

        match request {
            RuntimeRequest::CreateContainer(req) => {
                self.apply_response(resp);
                self.info.container_resources = update_resource(
                    self.info.container_resources.take(),
                    resp.container_resources.as_ref(),
                );

                if let Some(config) = req.config.as_mut() {
                    config.annotations = self.info.container_annotations.clone();
                    if let Some(resources) = &self.info.container_resources {
                        let linux = config.linux.get_or_insert_with(Default::default);
                        linux.resources = Some(to_cri_resources(resources));
                    }
                }
                if !resp.pod_cgroup_parent.is_empty() {
                    if let Some(sandbox_config) = req.sandbox_config.as_mut() {
                        sandbox_config
                            .linux
                            .get_or_insert_with(Default::default)
                            .cgroup_parent = resp.pod_cgroup_parent.clone();
                    }
                }
                Ok(())
            }
            RuntimeRequest::UpdateContainerResources(req) => {
                self.apply_response(resp);
                // oom_score_adj keeps kubelet's semantics on this path
                self.info.container_resources = update_resource_by_update_request(
                    self.info.container_resources.take(),
                    resp.container_resources.as_ref(),
                );

                req.annotations = self.info.container_annotations.clone();
                if let Some(resources) = &self.info.container_resources {
                    req.linux = Some(to_cri_resources(resources));
                }
                Ok(())
            }
            _ => Err(proxy_types::Error::IncompatibleHookResponse("container").into()),
        }
    }

    fn resource_checkpoint(&mut self, response: &RuntimeResponse) -> Result<(), ExecutorError> {
        if let RuntimeResponse::CreateContainer(resp) = response {
            self.info.container_meta.id = resp.container_id.clone();
        }
        let container_id = self.info.container_meta.id.clone();
        if container_id.is_empty() {
            return Err(ExecutorError::EmptyId("container"));
        }
        self.store.write_container(&container_id, self.info.clone());
        Ok(())
    }

    fn meta_info(&self) -> String {
        format!(
            "pod sandbox {}/{} container {}",
            self.info.pod_meta.namespace, self.info.pod_meta.name, self.info.container_meta.name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_types::{LinuxContainerResources, PodSandboxInfo, PodSandboxMetadata};
    use std::collections::HashMap;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn stored_pod() -> PodSandboxInfo {
        PodSandboxInfo {
            pod_meta: PodSandboxMetadata {
                name: "mock pod sandbox".to_string(),
                namespace: "mock namespace".to_string(),
                uid: "202207121604".to_string(),
                ..Default::default()
            },
            labels: map(&[("pod-label", "true")]),
            annotations: map(&[("pod-annotation", "true")]),
            cgroup_parent: "/kubepods/besteffort".to_string(),
            ..Default::default()
        }
    }

    fn create_container_request() -> v1::CreateContainerRequest {
        v1::CreateContainerRequest {
            pod_sandbox_id: "202207121604".to_string(),
            config: Some(v1::ContainerConfig {
                metadata: Some(v1::ContainerMetadata {
                    name: "test".to_string(),
                    attempt: 101010,
                }),
                annotations: map(&[("K1", "v1")]),
                labels: map(&[("container-label", "true")]),
                linux: Some(v1::LinuxContainerConfig {
                    resources: Some(v1::LinuxContainerResources {
                        cpu_period: 1000,
                        cpu_shares: 500,
                        oom_score_adj: 10,
                        unified: map(&[("resourceA", "A")]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            sandbox_config: Some(v1::PodSandboxConfig {
                linux: Some(v1::LinuxPodSandboxConfig {
                    cgroup_parent: "/kubepods/besteffort".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    fn hook_response() -> HookResponse {
        HookResponse::Container(ContainerHookResponse {
            container_annotations: map(&[("K2", "v2")]),
            container_resources: Some(LinuxContainerResources {
                cpu_period: 2000,
                cpu_shares: 100,
                oom_score_adj: 20,
                unified: map(&[("resourceB", "B")]),
                ..Default::default()
            }),
            pod_cgroup_parent: "/offline/besteffort".to_string(),
        })
    }

    #[test]
    fn test_parse_create_container_request() {
        let store = Arc::new(CheckpointStore::new());
        store.write_pod("202207121604", stored_pod());
        let mut executor = ContainerResourceExecutor::new(store);

        let operation = executor
            .parse_request(&RuntimeRequest::CreateContainer(create_container_request()))
            .unwrap();
        assert_eq!(operation, CallHookPluginOperation::ShouldCallHookPlugin);

        // the owning pod is denormalised into the record
        assert_eq!(executor.info.pod_meta.name, "mock pod sandbox");
        assert_eq!(executor.info.pod_meta.uid, "202207121604");
        assert_eq!(executor.info.pod_labels, map(&[("pod-label", "true")]));
        assert_eq!(
            executor.info.pod_annotations,
            map(&[("pod-annotation", "true")])
        );

        assert_eq!(executor.info.container_meta.name, "test");
        assert_eq!(executor.info.container_meta.attempt, 101010);
        assert_eq!(executor.info.container_meta.id, "");
        assert_eq!(executor.info.container_annotations, map(&[("K1", "v1")]));
        assert_eq!(executor.info.container_envs, HashMap::new());
        assert_eq!(executor.info.pod_cgroup_parent, "/kubepods/besteffort");
        let resources = executor.info.container_resources.as_ref().unwrap();
        assert_eq!(resources.cpu_period, 1000);
        assert_eq!(resources.cpu_shares, 500);
        assert_eq!(resources.oom_score_adj, 10);
    }

    #[test]
    fn test_parse_create_container_without_pod_checkpoint() {
        let store = Arc::new(CheckpointStore::new());
        let mut executor = ContainerResourceExecutor::new(store);

        let operation = executor
            .parse_request(&RuntimeRequest::CreateContainer(create_container_request()))
            .unwrap();
        // still proceeds, with container-only state
        assert_eq!(operation, CallHookPluginOperation::ShouldCallHookPlugin);
        assert_eq!(executor.info.pod_meta, PodSandboxMetadata::default());
        assert_eq!(executor.info.container_meta.name, "test");
    }

    #[test]
    fn test_update_request_for_create_container() {
        let store = Arc::new(CheckpointStore::new());
        store.write_pod("202207121604", stored_pod());
        let mut executor = ContainerResourceExecutor::new(store);
        let mut request = RuntimeRequest::CreateContainer(create_container_request());
        executor.parse_request(&request).unwrap();

        executor.update_request(&hook_response(), &mut request).unwrap();

        match request {
            RuntimeRequest::CreateContainer(req) => {
                let config = req.config.unwrap();
                assert_eq!(config.annotations, map(&[("K1", "v1"), ("K2", "v2")]));

                let resources = config.linux.unwrap().resources.unwrap();
                assert_eq!(resources.cpu_period, 2000);
                assert_eq!(resources.cpu_shares, 100);
                assert_eq!(resources.oom_score_adj, 20);
                assert_eq!(resources.unified, map(&[("resourceA", "A"), ("resourceB", "B")]));

                assert_eq!(
                    req.sandbox_config
                        .unwrap()
                        .linux
                        .unwrap()
                        .cgroup_parent,
                    "/offline/besteffort"
                );
            }
            _ => panic!("request changed kind"),
        }
    }

    #[test]
    fn test_update_request_incompatible_response() {
        let store = Arc::new(CheckpointStore::new());
        let mut executor = ContainerResourceExecutor::new(store);
        let mut request = RuntimeRequest::CreateContainer(create_container_request());
        executor.parse_request(&request).unwrap();

        let response = HookResponse::PodSandbox(Default::default());
        assert!(executor.update_request(&response, &mut request).is_err());
    }

    #[test]
    fn test_parse_update_container_resources_merges_delta() {
        let store = Arc::new(CheckpointStore::new());
        store.write_container(
            "10101010",
            ContainerInfo {
                container_meta: ContainerMetadata {
                    name: "test".to_string(),
                    attempt: 101010,
                    id: "10101010".to_string(),
                },
                container_annotations: map(&[("K1", "v1")]),
                container_resources: Some(LinuxContainerResources {
                    cpu_period: 1000,
                    cpu_shares: 500,
                    oom_score_adj: 10,
                    unified: map(&[("resourceA", "A")]),
                    ..Default::default()
                }),
                pod_cgroup_parent: "/kubepods/besteffort".to_string(),
                ..Default::default()
            },
        );
        let mut executor = ContainerResourceExecutor::new(store);

        let request = RuntimeRequest::UpdateContainerResources(
            v1::UpdateContainerResourcesRequest {
                container_id: "10101010".to_string(),
                linux: Some(v1::LinuxContainerResources {
                    cpuset_cpus: "0-31".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let operation = executor.parse_request(&request).unwrap();
        assert_eq!(operation, CallHookPluginOperation::ShouldCallHookPlugin);

        let resources = executor.info.container_resources.as_ref().unwrap();
        assert_eq!(resources.cpuset_cpus, "0-31");
        // untouched fields keep their stored value; the delta's zero
        // oom_score_adj does not clobber the stored one
        assert_eq!(resources.cpu_period, 1000);
        assert_eq!(resources.cpu_shares, 500);
        assert_eq!(resources.oom_score_adj, 10);
        assert_eq!(resources.unified, map(&[("resourceA", "A")]));
    }

    #[test]
    fn test_update_request_for_update_container_resources_keeps_oom_score() {
        let store = Arc::new(CheckpointStore::new());
        store.write_container(
            "10101010",
            ContainerInfo {
                container_meta: ContainerMetadata {
                    name: "test".to_string(),
                    attempt: 101010,
                    id: "10101010".to_string(),
                },
                container_annotations: map(&[("K1", "v1")]),
                container_resources: Some(LinuxContainerResources {
                    cpu_period: 1000,
                    cpu_shares: 500,
                    oom_score_adj: 10,
                    unified: map(&[("resourceA", "A")]),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let mut executor = ContainerResourceExecutor::new(store);

        let mut request = RuntimeRequest::UpdateContainerResources(
            v1::UpdateContainerResourcesRequest {
                container_id: "10101010".to_string(),
                ..Default::default()
            },
        );
        executor.parse_request(&request).unwrap();
        executor.update_request(&hook_response(), &mut request).unwrap();

        match request {
            RuntimeRequest::UpdateContainerResources(req) => {
                assert_eq!(req.annotations, map(&[("K1", "v1"), ("K2", "v2")]));
                let resources = req.linux.unwrap();
                assert_eq!(resources.cpu_period, 2000);
                assert_eq!(resources.cpu_shares, 100);
                // hook responses cannot change oom_score_adj on this path
                assert_eq!(resources.oom_score_adj, 10);
                assert_eq!(resources.unified, map(&[("resourceA", "A"), ("resourceB", "B")]));
            }
            _ => panic!("request changed kind"),
        }
    }

    #[test]
    fn test_resource_checkpoint_sets_container_id() {
        let store = Arc::new(CheckpointStore::new());
        store.write_pod("202207121604", stored_pod());
        let mut executor = ContainerResourceExecutor::new(store.clone());
        executor
            .parse_request(&RuntimeRequest::CreateContainer(create_container_request()))
            .unwrap();

        executor
            .resource_checkpoint(&RuntimeResponse::CreateContainer(
                v1::CreateContainerResponse {
                    container_id: "111111".to_string(),
                },
            ))
            .unwrap();

        let stored = store.get_container("111111").unwrap();
        assert_eq!(stored.container_meta.id, "111111");
        assert_eq!(stored.container_meta.name, "test");
        assert_eq!(stored.pod_meta.name, "mock pod sandbox");
    }

    #[test]
    fn test_resource_checkpoint_without_id_fails() {
        let store = Arc::new(CheckpointStore::new());
        let mut executor = ContainerResourceExecutor::new(store);
        assert!(executor
            .resource_checkpoint(&RuntimeResponse::StartContainer(Default::default()))
            .is_err());
    }

    #[test]
    fn test_parse_container_listing() {
        let store = Arc::new(CheckpointStore::new());
        store.write_pod(
            "podSandboxID0",
            PodSandboxInfo {
                pod_meta: PodSandboxMetadata {
                    name: "podName".to_string(),
                    ..Default::default()
                },
                annotations: map(&[("annotationKey1", "annotationValue1")]),
                labels: map(&[("labelsKey1", "labelsValue1")]),
                ..Default::default()
            },
        );
        let mut executor = ContainerResourceExecutor::new(store.clone());

        assert!(executor.parse_container(&v1::Container::default()).is_err());

        let container = v1::Container {
            id: "containerID0".to_string(),
            pod_sandbox_id: "podSandboxID0".to_string(),
            metadata: Some(v1::ContainerMetadata {
                name: "container".to_string(),
                attempt: 2,
            }),
            annotations: map(&[("containerAnnotationKey1", "containerAnnotationValue1")]),
            ..Default::default()
        };
        executor.parse_container(&container).unwrap();

        assert_eq!(executor.info.pod_meta.name, "podName");
        assert_eq!(
            executor.info.pod_annotations,
            map(&[("annotationKey1", "annotationValue1")])
        );
        assert_eq!(executor.info.pod_labels, map(&[("labelsKey1", "labelsValue1")]));
        assert_eq!(executor.info.container_meta.name, "container");
        assert_eq!(executor.info.container_meta.attempt, 2);
        // the id is only recorded at checkpoint time
        assert_eq!(executor.info.container_meta.id, "");

        executor
            .resource_checkpoint(&RuntimeResponse::CreateContainer(
                v1::CreateContainerResponse {
                    container_id: container.id.clone(),
                },
            ))
            .unwrap();
        assert_eq!(
            store.get_container("containerID0").unwrap().container_meta.id,
            "containerID0"
        );
    }
}
