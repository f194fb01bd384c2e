// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! The CRI v1 service surface kubelet connects to.

mod image;
mod runtime;

pub use image::ImageServer;
pub use runtime::RuntimeServer;
