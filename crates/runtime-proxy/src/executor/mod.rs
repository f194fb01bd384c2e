// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Resource executors. One executor is constructed per intercepted RPC; it
//! parses the request into a checkpoint record, rewrites the request from
//! hook responses, and commits the record once the backend succeeded.

mod container;
mod noop;
mod pod;
pub mod utils;

pub use container::ContainerResourceExecutor;
pub use noop::NoopResourceExecutor;
pub use pod::PodResourceExecutor;

use std::sync::Arc;

use proxy_types::{CallHookPluginOperation, HookRequest, HookResponse};

use crate::cri::{DeleteTarget, RuntimeRequest, RuntimeResourceType, RuntimeResponse};
use crate::store::CheckpointStore;

#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    #[error("pod sandbox {0} is not found in checkpoint")]
    PodNotFound(String),
    #[error("container {0} is not found in checkpoint")]
    ContainerNotFound(String),
    #[error("malformed {0}")]
    MalformedRequest(&'static str),
    #[error("listed {0} has an empty id")]
    EmptyId(&'static str),
    #[error(transparent)]
    IncompatibleHookResponse(#[from] proxy_types::Error),
}

/// The capability set every executor variant provides.
pub trait RuntimeResourceExecutor: Send {
    /// Populates the executor from the inbound request and tells the
    /// pipeline whether hook plugins should be consulted.
    fn parse_request(
        &mut self,
        request: &RuntimeRequest,
    ) -> Result<CallHookPluginOperation, ExecutorError>;

    /// The executor state shaped for the hook transport; `None` when the
    /// executor carries no state (noop).
    fn generate_hook_request(&self) -> Option<HookRequest>;

    /// Rewrites the still-unsent request from a pre-hook response.
    fn update_request(
        &mut self,
        response: &HookResponse,
        request: &mut RuntimeRequest,
    ) -> Result<(), ExecutorError>;

    /// Commits the executor state to the store after the backend succeeded.
    fn resource_checkpoint(&mut self, response: &RuntimeResponse) -> Result<(), ExecutorError>;

    /// A human-readable identifier for log lines.
    fn meta_info(&self) -> String;
}

/// Builds the executor variant for the given resource kind.
pub fn new_executor(
    kind: RuntimeResourceType,
    store: Arc<CheckpointStore>,
) -> Box<dyn RuntimeResourceExecutor> {
    match kind {
        RuntimeResourceType::Pod => Box::new(PodResourceExecutor::new(store)),
        RuntimeResourceType::Container => Box::new(ContainerResourceExecutor::new(store)),
        RuntimeResourceType::Noop => Box::new(NoopResourceExecutor::default()),
    }
}

/// Scoped release of a terminal RPC's checkpoint record. Armed from the
/// request before the pipeline does any work, so the record is dropped on
/// every exit path, panics included.
pub struct CheckpointRelease {
    store: Arc<CheckpointStore>,
    target: Option<DeleteTarget>,
}

impl CheckpointRelease {
    pub fn for_request(store: Arc<CheckpointStore>, request: &RuntimeRequest) -> Self {
        Self {
            store,
            target: request.delete_target(),
        }
    }
}

impl Drop for CheckpointRelease {
    fn drop(&mut self) {
        match self.target.take() {
            Some(DeleteTarget::Pod(sandbox_id)) => {
                debug!(sl!(), "release pod sandbox checkpoint {}", sandbox_id);
                self.store.delete_pod(&sandbox_id);
            }
            Some(DeleteTarget::Container(container_id)) => {
                debug!(sl!(), "release container checkpoint {}", container_id);
                self.store.delete_container(&container_id);
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocols::v1;
    use proxy_types::PodSandboxInfo;

    #[test]
    fn test_checkpoint_release_deletes_on_drop() {
        let store = Arc::new(CheckpointStore::new());
        store.write_pod("sandbox-0", PodSandboxInfo::default());

        let request = RuntimeRequest::StopPodSandbox(v1::StopPodSandboxRequest {
            pod_sandbox_id: "sandbox-0".to_string(),
        });
        {
            let _release = CheckpointRelease::for_request(store.clone(), &request);
            // still present while the request is in flight
            assert!(store.get_pod("sandbox-0").is_some());
        }
        assert!(store.get_pod("sandbox-0").is_none());
    }

    #[test]
    fn test_checkpoint_release_runs_on_panic() {
        let store = Arc::new(CheckpointStore::new());
        store.write_pod("sandbox-0", PodSandboxInfo::default());

        let request = RuntimeRequest::StopPodSandbox(v1::StopPodSandboxRequest {
            pod_sandbox_id: "sandbox-0".to_string(),
        });
        let inner = store.clone();
        let result = std::panic::catch_unwind(move || {
            let _release = CheckpointRelease::for_request(inner, &request);
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(store.get_pod("sandbox-0").is_none());
    }

    #[test]
    fn test_checkpoint_release_noop_for_non_terminal() {
        let store = Arc::new(CheckpointStore::new());
        store.write_pod("sandbox-0", PodSandboxInfo::default());

        let request = RuntimeRequest::RunPodSandbox(Default::default());
        drop(CheckpointRelease::for_request(store.clone(), &request));
        assert!(store.get_pod("sandbox-0").is_some());
    }
}
