// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! A transparent CRI proxy. Kubelet dials the proxy's socket believing it is
//! the container runtime; the proxy forwards every RPC to the real backend
//! while letting out-of-process hook plugins observe and mutate a designated
//! subset of lifecycle requests. An in-memory checkpoint store keeps a
//! merged per-pod / per-container view so plugins always see complete state.

#[macro_use]
extern crate slog;

logging::logger_with_subsystem!(sl, "runtime-proxy");

pub mod convert;
pub mod cri;
pub mod executor;
pub mod interceptor;
pub mod store;
