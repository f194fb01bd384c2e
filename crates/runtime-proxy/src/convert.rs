// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

//! Conversion between CRI v1 and v1alpha2 messages.
//!
//! The two schemas are line-compatible, so conversion re-serialises with the
//! source schema and decodes with the target schema instead of copying
//! fields by hand; the static pair list below only picks the target type.
//! Fields added in v1 that v1alpha2 never had decode to their zero value in
//! that direction and are skipped in the other.

use prost::Message;
use protocols::{v1, v1alpha2};

/// Which API surface a message type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriVersion {
    V1,
    V1alpha2,
}

#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    #[error("failed to decode {0} from re-encoded bytes: {1}")]
    Decode(&'static str, prost::DecodeError),
}

/// Implemented for every CRI message the proxy touches, in both versions.
pub trait CriMessage: Message {
    const VERSION: CriVersion;
}

/// v1alpha2 -> v1, via the wire format.
pub trait ToV1: CriMessage {
    type Output: CriMessage + Default;

    fn to_v1(&self) -> Result<Self::Output, ConvertError>;
}

/// v1 -> v1alpha2, via the wire format.
pub trait ToV1alpha2: CriMessage {
    type Output: CriMessage + Default;

    fn to_v1alpha2(&self) -> Result<Self::Output, ConvertError>;
}

fn recode<S, D>(src: &S, name: &'static str) -> Result<D, ConvertError>
where
    S: Message,
    D: Message + Default,
{
    let buf = src.encode_to_vec();
    D::decode(buf.as_slice()).map_err(|e| ConvertError::Decode(name, e))
}

// One entry per message pair the proxy may need to carry across versions:
// every request/response of the shared service surface plus the nested
// messages the executors look into.
macro_rules! convertible_messages {
    ($($name:ident),+ $(,)?) => {
        $(
            impl CriMessage for v1::$name {
                const VERSION: CriVersion = CriVersion::V1;
            }

            impl CriMessage for v1alpha2::$name {
                const VERSION: CriVersion = CriVersion::V1alpha2;
            }

            impl ToV1 for v1alpha2::$name {
                type Output = v1::$name;

                fn to_v1(&self) -> Result<v1::$name, ConvertError> {
                    recode(self, stringify!($name))
                }
            }

            impl ToV1alpha2 for v1::$name {
                type Output = v1alpha2::$name;

                fn to_v1alpha2(&self) -> Result<v1alpha2::$name, ConvertError> {
                    recode(self, stringify!($name))
                }
            }
        )+
    };
}

convertible_messages!(
    AttachRequest,
    AttachResponse,
    ContainerStatsRequest,
    ContainerStatsResponse,
    ContainerStatusRequest,
    ContainerStatusResponse,
    CreateContainerRequest,
    CreateContainerResponse,
    ExecRequest,
    ExecResponse,
    ExecSyncRequest,
    ExecSyncResponse,
    ImageFsInfoRequest,
    ImageFsInfoResponse,
    ImageStatusRequest,
    ImageStatusResponse,
    ListContainersRequest,
    ListContainersResponse,
    ListContainerStatsRequest,
    ListContainerStatsResponse,
    ListImagesRequest,
    ListImagesResponse,
    ListPodSandboxRequest,
    ListPodSandboxResponse,
    ListPodSandboxStatsRequest,
    ListPodSandboxStatsResponse,
    PodSandboxStatsRequest,
    PodSandboxStatsResponse,
    PodSandboxStatusRequest,
    PodSandboxStatusResponse,
    PortForwardRequest,
    PortForwardResponse,
    PullImageRequest,
    PullImageResponse,
    RemoveContainerRequest,
    RemoveContainerResponse,
    RemoveImageRequest,
    RemoveImageResponse,
    RemovePodSandboxRequest,
    RemovePodSandboxResponse,
    ReopenContainerLogRequest,
    ReopenContainerLogResponse,
    RunPodSandboxRequest,
    RunPodSandboxResponse,
    StartContainerRequest,
    StartContainerResponse,
    StatusRequest,
    StatusResponse,
    StopContainerRequest,
    StopContainerResponse,
    StopPodSandboxRequest,
    StopPodSandboxResponse,
    UpdateContainerResourcesRequest,
    UpdateContainerResourcesResponse,
    UpdateRuntimeConfigRequest,
    UpdateRuntimeConfigResponse,
    VersionRequest,
    VersionResponse,
    // Nested by the requests and responses above.
    PodSandbox,
    Container,
    LinuxContainerResources,
    KeyValue,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_classification() {
        assert_eq!(
            <v1::AttachRequest as CriMessage>::VERSION,
            CriVersion::V1
        );
        assert_eq!(
            <v1alpha2::AttachRequest as CriMessage>::VERSION,
            CriVersion::V1alpha2
        );
        // every mapped type belongs to exactly one version
        assert_ne!(
            <v1::LinuxContainerResources as CriMessage>::VERSION,
            <v1alpha2::LinuxContainerResources as CriMessage>::VERSION
        );
    }

    #[test]
    fn test_resources_round_trip() {
        let original = v1alpha2::LinuxContainerResources {
            cpu_period: 1000,
            cpu_quota: -1,
            cpu_shares: 500,
            memory_limit_in_bytes: 1 << 30,
            oom_score_adj: 10,
            cpuset_cpus: "0-3".to_string(),
            cpuset_mems: "0".to_string(),
            hugepage_limits: vec![v1alpha2::HugepageLimit {
                page_size: "2MB".to_string(),
                limit: 4096,
            }],
            unified: vec![("memory.max".to_string(), "6937202688".to_string())]
                .into_iter()
                .collect(),
            memory_swap_limit_in_bytes: 2 << 30,
        };

        let converted = original.to_v1().unwrap();
        assert_eq!(converted.cpu_period, 1000);
        assert_eq!(converted.cpu_quota, -1);
        assert_eq!(converted.cpu_shares, 500);
        assert_eq!(converted.memory_limit_in_bytes, 1 << 30);
        assert_eq!(converted.oom_score_adj, 10);
        assert_eq!(converted.cpuset_cpus, "0-3");
        assert_eq!(converted.hugepage_limits[0].page_size, "2MB");
        assert_eq!(converted.unified.get("memory.max").unwrap(), "6937202688");

        // and back again
        let back = converted.to_v1alpha2().unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_nested_message_conversion() {
        let response = v1alpha2::ListPodSandboxResponse {
            items: vec![v1alpha2::PodSandbox {
                id: "sandbox-0".to_string(),
                metadata: Some(v1alpha2::PodSandboxMetadata {
                    name: "pod".to_string(),
                    uid: "uid-0".to_string(),
                    namespace: "default".to_string(),
                    attempt: 1,
                }),
                annotations: vec![("k".to_string(), "v".to_string())].into_iter().collect(),
                ..Default::default()
            }],
        };

        let converted = response.to_v1().unwrap();
        assert_eq!(converted.items.len(), 1);
        let pod = &converted.items[0];
        assert_eq!(pod.id, "sandbox-0");
        assert_eq!(pod.metadata.as_ref().unwrap().name, "pod");
        assert_eq!(pod.annotations.get("k").unwrap(), "v");
    }

    #[test]
    fn test_default_message_conversion() {
        let empty = v1alpha2::StopPodSandboxResponse::default();
        assert_eq!(empty.to_v1().unwrap(), v1::StopPodSandboxResponse::default());
    }
}
