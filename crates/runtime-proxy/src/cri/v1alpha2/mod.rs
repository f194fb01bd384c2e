// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! The CRI v1alpha2 service surface. Everything is bridged to the v1-typed
//! pipeline through the version adapter, so an old kubelet can talk to any
//! backend the proxy supports.

mod image;
mod runtime;

pub use image::ImageServer;
pub use runtime::RuntimeServer;
