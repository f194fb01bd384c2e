// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashMap;
use std::sync::Arc;

use proxy_types::{
    FailurePolicy, HookRequest, HookResponse, HookStage, PluginConfig, RuntimeRequestPath,
};

use crate::plugin::{HookPlugin, RemoteHookPlugin, DEFAULT_PLUGIN_TIMEOUT};

/// A plugin error surfaced to the interception pipeline, carrying the
/// registration's failure policy so the pipeline can decide fail-vs-ignore
/// without knowing which plugin errored.
#[derive(thiserror::Error, Debug)]
#[error("hook plugin {name} failed on {path}: {source}")]
pub struct DispatchError {
    pub name: String,
    pub path: RuntimeRequestPath,
    pub policy: FailurePolicy,
    #[source]
    pub source: anyhow::Error,
}

/// One registered plugin for one request path.
pub struct HookRegistration {
    pub plugin: Arc<dyn HookPlugin>,
    pub policy: FailurePolicy,
    pub stages: Vec<HookStage>,
}

/// Routes `(request path, stage, request)` to the registered plugins.
/// The registry is built once at startup and read-only afterwards.
#[derive(Default)]
pub struct HookDispatcher {
    registry: HashMap<RuntimeRequestPath, Vec<HookRegistration>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from configuration, one remote plugin per entry.
    pub fn from_config(plugins: &[PluginConfig]) -> Self {
        let mut dispatcher = Self::new();
        for config in plugins {
            let plugin: Arc<dyn HookPlugin> = Arc::new(RemoteHookPlugin::new(
                &config.name,
                &config.endpoint,
                DEFAULT_PLUGIN_TIMEOUT,
            ));
            for sub in &config.subscriptions {
                info!(
                    sl!(),
                    "register hook plugin {} for {} {:?}", config.name, sub.path, sub.stages
                );
                dispatcher.register(
                    sub.path,
                    HookRegistration {
                        plugin: plugin.clone(),
                        policy: config.failure_policy,
                        stages: sub.stages.clone(),
                    },
                );
            }
        }
        dispatcher
    }

    pub fn register(&mut self, path: RuntimeRequestPath, registration: HookRegistration) {
        self.registry.entry(path).or_default().push(registration);
    }

    /// Calls every plugin registered for `(path, stage)` in registration
    /// order. Each plugin's response is folded into the request seen by the
    /// next one, and the last response wins as the dispatch result.
    ///
    /// Pre-stage errors propagate together with the failing registration's
    /// policy; the post stage is best-effort and only logs (kubelet has
    /// already observed the outcome by then).
    pub async fn dispatch(
        &self,
        path: RuntimeRequestPath,
        stage: HookStage,
        mut request: HookRequest,
    ) -> Result<Option<HookResponse>, DispatchError> {
        let registrations = match self.registry.get(&path) {
            Some(r) => r,
            None => return Ok(None),
        };

        let mut result = None;
        for reg in registrations.iter().filter(|r| r.stages.contains(&stage)) {
            match reg.plugin.handle(path, stage, &request).await {
                Ok(Some(response)) => {
                    if let Err(e) = request.apply_response(&response) {
                        warn!(
                            sl!(),
                            "ignore response of hook plugin {} on {}: {}",
                            reg.plugin.name(),
                            path,
                            e
                        );
                        continue;
                    }
                    result = Some(response);
                }
                Ok(None) => {}
                Err(e) => {
                    if stage == HookStage::PostHook {
                        warn!(
                            sl!(),
                            "post hook plugin {} failed on {}: {:?}",
                            reg.plugin.name(),
                            path,
                            e
                        );
                        continue;
                    }
                    match reg.policy {
                        FailurePolicy::Fail => {
                            return Err(DispatchError {
                                name: reg.plugin.name().to_string(),
                                path,
                                policy: reg.policy,
                                source: e,
                            });
                        }
                        FailurePolicy::Ignore => {
                            warn!(
                                sl!(),
                                "skip failed hook plugin {} on {}: {:?}",
                                reg.plugin.name(),
                                path,
                                e
                            );
                        }
                    }
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use proxy_types::{ContainerHookResponse, ContainerInfo, LinuxContainerResources};
    use std::collections::HashMap as Map;
    use std::sync::Mutex;

    struct FakePlugin {
        name: String,
        response: Result<Option<HookResponse>, String>,
        seen: Mutex<Vec<HookRequest>>,
    }

    impl FakePlugin {
        fn replying(name: &str, response: Option<HookResponse>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                response: Ok(response),
                seen: Mutex::new(vec![]),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                response: Err("boom".to_string()),
                seen: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl HookPlugin for FakePlugin {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(
            &self,
            _path: RuntimeRequestPath,
            _stage: HookStage,
            request: &HookRequest,
        ) -> anyhow::Result<Option<HookResponse>> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.response {
                Ok(r) => Ok(r.clone()),
                Err(e) => Err(anyhow!(e.clone())),
            }
        }
    }

    fn registration(plugin: Arc<FakePlugin>, policy: FailurePolicy) -> HookRegistration {
        HookRegistration {
            plugin,
            policy,
            stages: vec![HookStage::PreHook, HookStage::PostHook],
        }
    }

    fn container_request() -> HookRequest {
        HookRequest::Container(ContainerInfo {
            container_annotations: vec![("k1".to_string(), "v1".to_string())]
                .into_iter()
                .collect::<Map<_, _>>(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_dispatch_no_registration() {
        let dispatcher = HookDispatcher::new();
        let result = dispatcher
            .dispatch(
                RuntimeRequestPath::CreateContainer,
                HookStage::PreHook,
                container_request(),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_chains_responses() {
        let first = FakePlugin::replying(
            "first",
            Some(HookResponse::Container(ContainerHookResponse {
                container_annotations: vec![("k2".to_string(), "v2".to_string())]
                    .into_iter()
                    .collect(),
                container_resources: Some(LinuxContainerResources {
                    cpu_shares: 100,
                    ..Default::default()
                }),
                ..Default::default()
            })),
        );
        let second = FakePlugin::replying("second", None);

        let mut dispatcher = HookDispatcher::new();
        dispatcher.register(
            RuntimeRequestPath::CreateContainer,
            registration(first.clone(), FailurePolicy::Ignore),
        );
        dispatcher.register(
            RuntimeRequestPath::CreateContainer,
            registration(second.clone(), FailurePolicy::Ignore),
        );

        let result = dispatcher
            .dispatch(
                RuntimeRequestPath::CreateContainer,
                HookStage::PreHook,
                container_request(),
            )
            .await
            .unwrap();
        // the first plugin's response is the dispatch result
        assert!(result.is_some());

        // and the second plugin saw the folded request
        let seen = second.seen.lock().unwrap();
        match &seen[0] {
            HookRequest::Container(info) => {
                assert_eq!(info.container_annotations.get("k1").unwrap(), "v1");
                assert_eq!(info.container_annotations.get("k2").unwrap(), "v2");
                assert_eq!(info.container_resources.as_ref().unwrap().cpu_shares, 100);
            }
            _ => panic!("unexpected request kind"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_policy_fail() {
        let mut dispatcher = HookDispatcher::new();
        dispatcher.register(
            RuntimeRequestPath::CreateContainer,
            registration(FakePlugin::failing("bad"), FailurePolicy::Fail),
        );

        let err = dispatcher
            .dispatch(
                RuntimeRequestPath::CreateContainer,
                HookStage::PreHook,
                container_request(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.policy, FailurePolicy::Fail);
        assert_eq!(err.name, "bad");
    }

    #[tokio::test]
    async fn test_dispatch_policy_ignore_continues() {
        let good = FakePlugin::replying(
            "good",
            Some(HookResponse::Container(ContainerHookResponse::default())),
        );
        let mut dispatcher = HookDispatcher::new();
        dispatcher.register(
            RuntimeRequestPath::CreateContainer,
            registration(FakePlugin::failing("bad"), FailurePolicy::Ignore),
        );
        dispatcher.register(
            RuntimeRequestPath::CreateContainer,
            registration(good.clone(), FailurePolicy::Ignore),
        );

        let result = dispatcher
            .dispatch(
                RuntimeRequestPath::CreateContainer,
                HookStage::PreHook,
                container_request(),
            )
            .await
            .unwrap();
        assert!(result.is_some());
        assert_eq!(good.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_post_stage_absorbs_failures() {
        let mut dispatcher = HookDispatcher::new();
        dispatcher.register(
            RuntimeRequestPath::StopContainer,
            registration(FakePlugin::failing("bad"), FailurePolicy::Fail),
        );

        // PolicyFail does not propagate at the post stage
        let result = dispatcher
            .dispatch(
                RuntimeRequestPath::StopContainer,
                HookStage::PostHook,
                container_request(),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_respects_stage_subscription() {
        let plugin = FakePlugin::replying("pre-only", None);
        let mut dispatcher = HookDispatcher::new();
        dispatcher.register(
            RuntimeRequestPath::StartContainer,
            HookRegistration {
                plugin: plugin.clone(),
                policy: FailurePolicy::Ignore,
                stages: vec![HookStage::PreHook],
            },
        );

        dispatcher
            .dispatch(
                RuntimeRequestPath::StartContainer,
                HookStage::PostHook,
                container_request(),
            )
            .await
            .unwrap();
        assert!(plugin.seen.lock().unwrap().is_empty());

        dispatcher
            .dispatch(
                RuntimeRequestPath::StartContainer,
                HookStage::PreHook,
                container_request(),
            )
            .await
            .unwrap();
        assert_eq!(plugin.seen.lock().unwrap().len(), 1);
    }
}
