// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Hook plugin dispatch. Plugins are out-of-process services that observe
//! and may mutate intercepted lifecycle requests; the dispatcher routes a
//! `(request path, stage)` pair to every plugin registered for it and folds
//! the responses together, honouring each registration's failure policy.

#[macro_use]
extern crate slog;

logging::logger_with_subsystem!(sl, "hooks");

mod dispatcher;
mod plugin;

pub use dispatcher::{DispatchError, HookDispatcher, HookRegistration};
pub use plugin::{HookPlugin, RemoteHookPlugin};
