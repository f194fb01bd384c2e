// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! The interception pipeline. For every intercepted RPC the order is
//! strict: parse -> pre hook -> backend -> checkpoint -> post hook, with
//! the checkpoint release guaranteed on every exit path.

use std::sync::Arc;

use async_trait::async_trait;
use proxy_hooks::HookDispatcher;
use proxy_types::{CallHookPluginOperation, FailurePolicy, HookStage};
use tonic::Status;

use crate::cri::{RuntimeRequest, RuntimeResponse};
use crate::executor::{new_executor, CheckpointRelease};
use crate::store::CheckpointStore;

/// The backend runtime as seen by the pipeline. The production
/// implementation wraps the gRPC client; tests substitute fakes.
#[async_trait]
pub trait RuntimeBackend: Send + Sync {
    async fn handle(&self, request: RuntimeRequest) -> Result<RuntimeResponse, Status>;
}

pub struct RuntimeInterceptor {
    store: Arc<CheckpointStore>,
    dispatcher: Arc<HookDispatcher>,
    backend: Arc<dyn RuntimeBackend>,
}

impl RuntimeInterceptor {
    pub fn new(
        store: Arc<CheckpointStore>,
        dispatcher: Arc<HookDispatcher>,
        backend: Arc<dyn RuntimeBackend>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            backend,
        }
    }

    pub async fn intercept_runtime_request(
        &self,
        mut request: RuntimeRequest,
    ) -> Result<RuntimeResponse, Status> {
        let (hook_path, resource_type) = request.hook_info();
        let mut executor = new_executor(resource_type, self.store.clone());

        // a parse failure is not fatal: e.g. a StopContainer for a container
        // the failover listing missed still has to reach the backend
        let operation = match executor.parse_request(&request) {
            Ok(operation) => operation,
            Err(e) => {
                warn!(sl!(), "fail to parse {} request: {}", request, e);
                CallHookPluginOperation::Unknown
            }
        };

        let _release = CheckpointRelease::for_request(self.store.clone(), &request);

        if operation == CallHookPluginOperation::ShouldCallHookPlugin {
            if let Some(hook_request) = executor.generate_hook_request() {
                match self
                    .dispatcher
                    .dispatch(hook_path, HookStage::PreHook, hook_request)
                    .await
                {
                    Ok(Some(response)) => {
                        if let Err(e) = executor.update_request(&response, &mut request) {
                            warn!(sl!(), "failed to update {} request: {}", request, e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(sl!(), "fail to call hook server: {}", e);
                        if e.policy == FailurePolicy::Fail {
                            return Err(Status::internal(format!("hook server err: {}", e)));
                        }
                    }
                }
            }
        }

        let result = self.backend.handle(request).await;
        match &result {
            Ok(response) => {
                info!(
                    sl!(),
                    "{} call backend {} success",
                    executor.meta_info(),
                    hook_path
                );
                // the backend's outcome is authoritative; a failed
                // checkpoint write must not fail the RPC
                if let Err(e) = executor.resource_checkpoint(response) {
                    error!(sl!(), "fail to checkpoint {}: {}", executor.meta_info(), e);
                }
            }
            Err(status) => {
                error!(
                    sl!(),
                    "{} call backend {} fail: {}",
                    executor.meta_info(),
                    hook_path,
                    status
                );
            }
        }

        if operation == CallHookPluginOperation::ShouldCallHookPlugin {
            if let Some(hook_request) = executor.generate_hook_request() {
                // fire and forget; the dispatcher never propagates post
                // stage errors
                let _ = self
                    .dispatcher
                    .dispatch(hook_path, HookStage::PostHook, hook_request)
                    .await;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use protocols::v1;
    use proxy_hooks::{HookPlugin, HookRegistration};
    use proxy_types::{
        ContainerHookResponse, ContainerInfo, HookRequest, HookResponse, LinuxContainerResources,
        PodSandboxInfo, PodSandboxMetadata, RuntimeRequestPath,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    struct FakeBackend {
        seen: Mutex<Vec<RuntimeRequest>>,
    }

    impl FakeBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(vec![]),
            })
        }

        fn last_request(&self) -> RuntimeRequest {
            self.seen.lock().unwrap().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl RuntimeBackend for FakeBackend {
        async fn handle(&self, request: RuntimeRequest) -> Result<RuntimeResponse, Status> {
            self.seen.lock().unwrap().push(request.clone());
            let response = match request {
                RuntimeRequest::RunPodSandbox(_) => {
                    RuntimeResponse::RunPodSandbox(v1::RunPodSandboxResponse {
                        pod_sandbox_id: "sandbox-0".to_string(),
                    })
                }
                RuntimeRequest::StopPodSandbox(_) => {
                    RuntimeResponse::StopPodSandbox(Default::default())
                }
                RuntimeRequest::RemovePodSandbox(_) => {
                    RuntimeResponse::RemovePodSandbox(Default::default())
                }
                RuntimeRequest::CreateContainer(_) => {
                    RuntimeResponse::CreateContainer(v1::CreateContainerResponse {
                        container_id: "111111".to_string(),
                    })
                }
                RuntimeRequest::StartContainer(_) => {
                    RuntimeResponse::StartContainer(Default::default())
                }
                RuntimeRequest::StopContainer(_) => {
                    RuntimeResponse::StopContainer(Default::default())
                }
                RuntimeRequest::RemoveContainer(_) => {
                    RuntimeResponse::RemoveContainer(Default::default())
                }
                RuntimeRequest::UpdateContainerResources(_) => {
                    RuntimeResponse::UpdateContainerResources(Default::default())
                }
            };
            Ok(response)
        }
    }

    struct RefusingBackend;

    #[async_trait]
    impl RuntimeBackend for RefusingBackend {
        async fn handle(&self, _request: RuntimeRequest) -> Result<RuntimeResponse, Status> {
            Err(Status::unavailable("backend down"))
        }
    }

    struct FixedPlugin {
        response: Result<Option<HookResponse>, String>,
        calls: Mutex<Vec<HookStage>>,
    }

    impl FixedPlugin {
        fn replying(response: Option<HookResponse>) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(response),
                calls: Mutex::new(vec![]),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                response: Err("plugin exploded".to_string()),
                calls: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl HookPlugin for FixedPlugin {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn handle(
            &self,
            _path: RuntimeRequestPath,
            stage: HookStage,
            _request: &HookRequest,
        ) -> anyhow::Result<Option<HookResponse>> {
            self.calls.lock().unwrap().push(stage);
            match &self.response {
                Ok(r) => Ok(r.clone()),
                Err(e) => Err(anyhow!(e.clone())),
            }
        }
    }

    fn stored_pod() -> PodSandboxInfo {
        PodSandboxInfo {
            pod_meta: PodSandboxMetadata {
                name: "mock pod".to_string(),
                namespace: "default".to_string(),
                uid: "202207121604".to_string(),
                ..Default::default()
            },
            cgroup_parent: "/kubepods/besteffort".to_string(),
            ..Default::default()
        }
    }

    fn create_container_request() -> RuntimeRequest {
        RuntimeRequest::CreateContainer(v1::CreateContainerRequest {
            pod_sandbox_id: "202207121604".to_string(),
            config: Some(v1::ContainerConfig {
                metadata: Some(v1::ContainerMetadata {
                    name: "test".to_string(),
                    attempt: 101010,
                }),
                annotations: map(&[("K1", "v1")]),
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
        })
    }

    fn interceptor_with(
        dispatcher: HookDispatcher,
        backend: Arc<dyn RuntimeBackend>,
    ) -> (Arc<CheckpointStore>, RuntimeInterceptor) {
        let store = Arc::new(CheckpointStore::new());
        store.write_pod("202207121604", stored_pod());
        let interceptor =
            RuntimeInterceptor::new(store.clone(), Arc::new(dispatcher), backend);
        (store, interceptor)
    }

    #[tokio::test]
    async fn test_create_container_without_plugins() {
        let backend = FakeBackend::new();
        let (store, interceptor) = interceptor_with(HookDispatcher::new(), backend.clone());

        let response = interceptor
            .intercept_runtime_request(create_container_request())
            .await
            .unwrap();
        match response {
            RuntimeResponse::CreateContainer(r) => assert_eq!(r.container_id, "111111"),
            other => panic!("unexpected response {}", other),
        }

        // the backend saw the request unmodified
        match backend.last_request() {
            RuntimeRequest::CreateContainer(req) => {
                let config = req.config.unwrap();
                assert_eq!(config.annotations, map(&[("K1", "v1")]));
                let resources = config.linux.unwrap().resources.unwrap();
                assert_eq!(resources.cpu_period, 1000);
                assert_eq!(resources.cpu_shares, 500);
                assert_eq!(resources.oom_score_adj, 10);
            }
            other => panic!("unexpected request {}", other),
        }

        // and the store now carries the denormalised container record
        let stored = store.get_container("111111").unwrap();
        assert_eq!(stored.pod_meta.name, "mock pod");
        assert_eq!(stored.pod_meta.uid, "202207121604");
        assert_eq!(stored.container_meta.id, "111111");
    }

    #[tokio::test]
    async fn test_create_container_with_failing_ignore_plugin() {
        let plugin = FixedPlugin::failing();
        let mut dispatcher = HookDispatcher::new();
        dispatcher.register(
            RuntimeRequestPath::CreateContainer,
            HookRegistration {
                plugin: plugin.clone(),
                policy: FailurePolicy::Ignore,
                stages: vec![HookStage::PreHook],
            },
        );
        let backend = FakeBackend::new();
        let (_store, interceptor) = interceptor_with(dispatcher, backend.clone());

        // the RPC still succeeds with the original request
        let response = interceptor
            .intercept_runtime_request(create_container_request())
            .await
            .unwrap();
        match response {
            RuntimeResponse::CreateContainer(r) => assert_eq!(r.container_id, "111111"),
            other => panic!("unexpected response {}", other),
        }
        match backend.last_request() {
            RuntimeRequest::CreateContainer(req) => {
                assert_eq!(req.config.unwrap().annotations, map(&[("K1", "v1")]));
            }
            other => panic!("unexpected request {}", other),
        }
        // the pre stage ran; no post call was subscribed
        assert_eq!(*plugin.calls.lock().unwrap(), vec![HookStage::PreHook]);
    }

    #[tokio::test]
    async fn test_create_container_with_failing_fail_plugin() {
        let mut dispatcher = HookDispatcher::new();
        dispatcher.register(
            RuntimeRequestPath::CreateContainer,
            HookRegistration {
                plugin: FixedPlugin::failing(),
                policy: FailurePolicy::Fail,
                stages: vec![HookStage::PreHook],
            },
        );
        let backend = FakeBackend::new();
        let (_store, interceptor) = interceptor_with(dispatcher, backend.clone());

        let err = interceptor
            .intercept_runtime_request(create_container_request())
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
        // the backend was never contacted
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_container_with_mutating_plugin() {
        let plugin = FixedPlugin::replying(Some(HookResponse::Container(ContainerHookResponse {
            container_annotations: map(&[("K2", "v2")]),
            container_resources: Some(LinuxContainerResources {
                cpu_period: 2000,
                cpu_shares: 100,
                oom_score_adj: 20,
                unified: map(&[("resourceB", "B")]),
                ..Default::default()
            }),
            pod_cgroup_parent: "/offline/besteffort".to_string(),
        })));
        let mut dispatcher = HookDispatcher::new();
        dispatcher.register(
            RuntimeRequestPath::CreateContainer,
            HookRegistration {
                plugin: plugin.clone(),
                policy: FailurePolicy::Fail,
                stages: vec![HookStage::PreHook, HookStage::PostHook],
            },
        );
        let backend = FakeBackend::new();
        let (_store, interceptor) = interceptor_with(dispatcher, backend.clone());

        interceptor
            .intercept_runtime_request(create_container_request())
            .await
            .unwrap();

        match backend.last_request() {
            RuntimeRequest::CreateContainer(req) => {
                let config = req.config.unwrap();
                assert_eq!(config.annotations, map(&[("K1", "v1"), ("K2", "v2")]));

                let resources = config.linux.unwrap().resources.unwrap();
                assert_eq!(resources.cpu_period, 2000);
                assert_eq!(resources.cpu_shares, 100);
                assert_eq!(resources.oom_score_adj, 20);
                assert_eq!(
                    resources.unified,
                    map(&[("resourceA", "A"), ("resourceB", "B")])
                );

                assert_eq!(
                    req.sandbox_config.unwrap().linux.unwrap().cgroup_parent,
                    "/offline/besteffort"
                );
            }
            other => panic!("unexpected request {}", other),
        }

        // both stages were dispatched
        assert_eq!(
            *plugin.calls.lock().unwrap(),
            vec![HookStage::PreHook, HookStage::PostHook]
        );
    }

    #[tokio::test]
    async fn test_stop_pod_sandbox_releases_checkpoint() {
        let backend = FakeBackend::new();
        let (store, interceptor) = interceptor_with(HookDispatcher::new(), backend);

        interceptor
            .intercept_runtime_request(RuntimeRequest::StopPodSandbox(
                v1::StopPodSandboxRequest {
                    pod_sandbox_id: "202207121604".to_string(),
                },
            ))
            .await
            .unwrap();
        assert!(store.get_pod("202207121604").is_none());
    }

    #[tokio::test]
    async fn test_remove_container_releases_checkpoint_without_hooks() {
        let plugin = FixedPlugin::replying(None);
        let mut dispatcher = HookDispatcher::new();
        // even a plugin registered on every path never sees RemoveContainer
        for path in [
            RuntimeRequestPath::CreateContainer,
            RuntimeRequestPath::StopContainer,
        ] {
            dispatcher.register(
                path,
                HookRegistration {
                    plugin: plugin.clone(),
                    policy: FailurePolicy::Ignore,
                    stages: vec![HookStage::PreHook, HookStage::PostHook],
                },
            );
        }
        let backend = FakeBackend::new();
        let (store, interceptor) = interceptor_with(dispatcher, backend);
        store.write_container(
            "111111",
            ContainerInfo {
                container_meta: proxy_types::ContainerMetadata {
                    id: "111111".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        interceptor
            .intercept_runtime_request(RuntimeRequest::RemoveContainer(
                v1::RemoveContainerRequest {
                    container_id: "111111".to_string(),
                },
            ))
            .await
            .unwrap();

        assert!(store.get_container("111111").is_none());
        assert!(plugin.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_skips_checkpoint() {
        let (store, interceptor) =
            interceptor_with(HookDispatcher::new(), Arc::new(RefusingBackend));

        let err = interceptor
            .intercept_runtime_request(create_container_request())
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
        assert_eq!(store.container_count(), 0);
    }

    #[tokio::test]
    async fn test_parse_failure_still_reaches_backend() {
        let backend = FakeBackend::new();
        let (_store, interceptor) = interceptor_with(HookDispatcher::new(), backend.clone());

        // no checkpoint for this container; the lookup fails but the stop
        // must still be forwarded
        interceptor
            .intercept_runtime_request(RuntimeRequest::StopContainer(v1::StopContainerRequest {
                container_id: "unknown".to_string(),
                timeout: 0,
            }))
            .await
            .unwrap();
        assert_eq!(backend.seen.lock().unwrap().len(), 1);
    }
}
