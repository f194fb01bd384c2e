// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::hook::{FailurePolicy, HookStage, RuntimeRequestPath};

/// Default socket the proxy listens on; kubelet is pointed here via
/// `--container-runtime-endpoint`.
pub const DEFAULT_PROXY_ENDPOINT: &str = "/var/run/runtime-proxy/runtime-proxy.sock";

/// Default backend runtime socket.
pub const DEFAULT_RUNTIME_ENDPOINT: &str = "/var/run/containerd/containerd.sock";

fn default_listen() -> String {
    DEFAULT_PROXY_ENDPOINT.to_string()
}

fn default_runtime_endpoint() -> String {
    DEFAULT_RUNTIME_ENDPOINT.to_string()
}

fn default_stages() -> Vec<HookStage> {
    vec![HookStage::PreHook, HookStage::PostHook]
}

/// Proxy configuration, loaded from a TOML file and overridable by command
/// line flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Unix socket path the proxy serves CRI on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Unix socket path of the backend runtime service.
    #[serde(default = "default_runtime_endpoint")]
    pub runtime_endpoint: String,

    /// Unix socket path of the backend image service. Empty means "same as
    /// the runtime endpoint".
    #[serde(default)]
    pub image_endpoint: String,

    /// Hook plugin registrations.
    #[serde(default, rename = "plugin")]
    pub plugins: Vec<PluginConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            listen: default_listen(),
            runtime_endpoint: default_runtime_endpoint(),
            image_endpoint: String::new(),
            plugins: vec![],
        }
    }
}

/// One hook plugin endpoint with its subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,

    /// Unix socket path the plugin serves its hook endpoint on.
    pub endpoint: String,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default, rename = "subscription")]
    pub subscriptions: Vec<SubscriptionConfig>,
}

/// One (request path, stages) subscription of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub path: RuntimeRequestPath,

    #[serde(default = "default_stages")]
    pub stages: Vec<HookStage>,
}

impl ProxyConfig {
    /// Loads configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<ProxyConfig> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("read config file {}", path.as_ref().display()))?;
        let config: ProxyConfig = toml::from_str(&content)
            .with_context(|| format!("parse config file {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// The effective image endpoint (falls back to the runtime endpoint).
    pub fn image_endpoint(&self) -> &str {
        if self.image_endpoint.is_empty() {
            &self.runtime_endpoint
        } else {
            &self.image_endpoint
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen, DEFAULT_PROXY_ENDPOINT);
        assert_eq!(config.image_endpoint(), DEFAULT_RUNTIME_ENDPOINT);
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let content = r#"
listen = "/tmp/proxy.sock"
runtime_endpoint = "/tmp/containerd.sock"

[[plugin]]
name = "resource-hook"
endpoint = "/tmp/hooks.sock"
failure_policy = "Fail"

[[plugin.subscription]]
path = "/createcontainer"
stages = ["PreHook"]

[[plugin.subscription]]
path = "/runpodsandbox"
"#;
        let config: ProxyConfig = toml::from_str(content).unwrap();
        assert_eq!(config.listen, "/tmp/proxy.sock");
        assert_eq!(config.image_endpoint(), "/tmp/containerd.sock");

        assert_eq!(config.plugins.len(), 1);
        let plugin = &config.plugins[0];
        assert_eq!(plugin.name, "resource-hook");
        assert_eq!(plugin.failure_policy, FailurePolicy::Fail);
        assert_eq!(plugin.subscriptions.len(), 2);
        assert_eq!(
            plugin.subscriptions[0].path,
            RuntimeRequestPath::CreateContainer
        );
        assert_eq!(plugin.subscriptions[0].stages, vec![HookStage::PreHook]);
        // stages default to both
        assert_eq!(
            plugin.subscriptions[1].stages,
            vec![HookStage::PreHook, HookStage::PostHook]
        );
    }

    #[test]
    fn test_missing_file() {
        assert!(ProxyConfig::load_from_file("/does/not/exist.toml").is_err());
    }
}
