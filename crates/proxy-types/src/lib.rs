// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Data model shared by the proxy crates: the neutral resource envelope and
//! its merge rules, the pod/container checkpoint records (which double as
//! the hook-plugin payloads), and the proxy configuration.

pub mod config;
pub mod hook;
pub mod resources;
pub mod utils;

pub use config::{PluginConfig, ProxyConfig, SubscriptionConfig};
pub use hook::{
    CallHookPluginOperation, ContainerHookResponse, ContainerInfo, ContainerMetadata,
    FailurePolicy, HookRequest, HookResponse, HookStage, PodSandboxHookResponse, PodSandboxInfo,
    PodSandboxMetadata, RuntimeRequestPath,
};
pub use resources::{
    update_resource, update_resource_by_update_request, HugepageLimit, LinuxContainerResources,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("hook response is not compatible with {0}")]
    IncompatibleHookResponse(&'static str),
}
