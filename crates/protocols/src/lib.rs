// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Checked-in tonic/prost bindings for the Kubernetes Container Runtime
//! Interface. Two API versions coexist on the wire: `runtime.v1` and the
//! older `runtime.v1alpha2`. The message schemas are line-compatible; the
//! v1alpha2 service surface lacks the RPCs added after it was frozen
//! (`CheckpointContainer`, `GetContainerEvents`).

/// CRI `runtime.v1` messages and services.
#[allow(clippy::large_enum_variant)]
pub mod v1;

/// CRI `runtime.v1alpha2` messages and services.
#[allow(clippy::large_enum_variant)]
pub mod v1alpha2;
