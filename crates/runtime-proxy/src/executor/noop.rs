// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use proxy_types::{CallHookPluginOperation, HookRequest, HookResponse};

use crate::cri::{RuntimeRequest, RuntimeResponse};
use crate::executor::{ExecutorError, RuntimeResourceExecutor};

/// Executor for RPCs with no hook path and no state of their own. The
/// scoped checkpoint release still runs for them.
#[derive(Default)]
pub struct NoopResourceExecutor;

impl RuntimeResourceExecutor for NoopResourceExecutor {
    fn parse_request(
        &mut self,
        _request: &RuntimeRequest,
    ) -> Result<CallHookPluginOperation, ExecutorError> {
        Ok(CallHookPluginOperation::ShouldNotCallHookPlugin)
    }

    fn generate_hook_request(&self) -> Option<HookRequest> {
        None
    }

    fn update_request(
        &mut self,
        _response: &HookResponse,
        _request: &mut RuntimeRequest,
    ) -> Result<(), ExecutorError> {
        Ok(())
    }

    fn resource_checkpoint(&mut self, _response: &RuntimeResponse) -> Result<(), ExecutorError> {
        Ok(())
    }

    fn meta_info(&self) -> String {
        "noop".to_string()
    }
}
