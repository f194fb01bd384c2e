// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hyper::{Body, Client, Method, Request, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};

use proxy_types::{HookRequest, HookResponse, HookStage, RuntimeRequestPath};

/// Header carrying the dispatch stage on each plugin call.
pub const HOOK_STAGE_HEADER: &str = "x-hook-stage";

/// Default per-call timeout towards a plugin.
pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A hook plugin as seen by the dispatcher. Returning `None` means the
/// plugin observed the request but proposes no mutation.
#[async_trait]
pub trait HookPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(
        &self,
        path: RuntimeRequestPath,
        stage: HookStage,
        request: &HookRequest,
    ) -> Result<Option<HookResponse>>;
}

/// The shipped plugin transport: HTTP/1.1 over the plugin's Unix socket.
/// Each dispatch is one POST to the registered request path with the stage
/// in a header and a JSON-encoded payload; a 204 (or empty 200) reply means
/// "no mutation".
pub struct RemoteHookPlugin {
    name: String,
    sock_path: PathBuf,
    client: Client<UnixConnector, Body>,
    timeout: Duration,
}

impl RemoteHookPlugin {
    pub fn new(name: &str, endpoint: &str, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            sock_path: PathBuf::from(endpoint),
            client: Client::unix(),
            timeout,
        }
    }
}

#[async_trait]
impl HookPlugin for RemoteHookPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(
        &self,
        path: RuntimeRequestPath,
        stage: HookStage,
        request: &HookRequest,
    ) -> Result<Option<HookResponse>> {
        let url: hyper::Uri = Uri::new(&self.sock_path, path.as_str()).into();
        let body = serde_json::to_vec(request).context("encode hook request")?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header("content-type", "application/json")
            .header(HOOK_STAGE_HEADER, stage.to_string())
            .body(Body::from(body))?;

        let resp = match tokio::time::timeout(self.timeout, self.client.request(req)).await {
            Ok(result) => result.with_context(|| format!("call hook plugin {}", self.name))?,
            Err(_) => {
                return Err(anyhow!(
                    "hook plugin {} timed out after {:?}",
                    self.name,
                    self.timeout
                ))
            }
        };

        let status = resp.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(anyhow!("hook plugin {} replied {}", self.name, status));
        }

        let body = hyper::body::to_bytes(resp.into_body())
            .await
            .context("read hook response body")?;
        if body.is_empty() {
            return Ok(None);
        }
        let response: HookResponse =
            serde_json::from_slice(&body).context("decode hook response")?;
        Ok(Some(response))
    }
}
