// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashMap;

use protocols::v1;
use proxy_types::{HugepageLimit, LinuxContainerResources};

/// CRI resource envelope -> the neutral envelope stored in checkpoints and
/// sent to hook plugins.
pub fn to_hook_resources(r: &v1::LinuxContainerResources) -> LinuxContainerResources {
    LinuxContainerResources {
        cpu_period: r.cpu_period,
        cpu_quota: r.cpu_quota,
        cpu_shares: r.cpu_shares,
        memory_limit_in_bytes: r.memory_limit_in_bytes,
        memory_swap_limit_in_bytes: r.memory_swap_limit_in_bytes,
        oom_score_adj: r.oom_score_adj,
        cpuset_cpus: r.cpuset_cpus.clone(),
        cpuset_mems: r.cpuset_mems.clone(),
        hugepage_limits: r
            .hugepage_limits
            .iter()
            .map(|item| HugepageLimit {
                page_size: item.page_size.clone(),
                limit: item.limit,
            })
            .collect(),
        unified: r.unified.clone(),
    }
}

/// The neutral envelope -> the CRI v1 envelope written into requests.
pub fn to_cri_resources(r: &LinuxContainerResources) -> v1::LinuxContainerResources {
    v1::LinuxContainerResources {
        cpu_period: r.cpu_period,
        cpu_quota: r.cpu_quota,
        cpu_shares: r.cpu_shares,
        memory_limit_in_bytes: r.memory_limit_in_bytes,
        memory_swap_limit_in_bytes: r.memory_swap_limit_in_bytes,
        oom_score_adj: r.oom_score_adj,
        cpuset_cpus: r.cpuset_cpus.clone(),
        cpuset_mems: r.cpuset_mems.clone(),
        hugepage_limits: r
            .hugepage_limits
            .iter()
            .map(|item| v1::HugepageLimit {
                page_size: item.page_size.clone(),
                limit: item.limit,
            })
            .collect(),
        unified: r.unified.clone(),
    }
}

/// Flattens the ordered env bag of a container config to a name -> value
/// map, last assignment winning.
pub fn to_hook_envs(envs: &[v1::KeyValue]) -> HashMap<String, String> {
    envs.iter()
        .map(|kv| (kv.key.clone(), kv.value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resources_transfer_round_trip() {
        let cri = v1::LinuxContainerResources {
            cpu_period: 1000,
            cpu_shares: 500,
            oom_score_adj: 10,
            unified: vec![("resourceA".to_string(), "resource A".to_string())]
                .into_iter()
                .collect(),
            hugepage_limits: vec![v1::HugepageLimit {
                page_size: "2MB".to_string(),
                limit: 4096,
            }],
            ..Default::default()
        };

        let hook = to_hook_resources(&cri);
        assert_eq!(hook.cpu_period, 1000);
        assert_eq!(hook.cpu_shares, 500);
        assert_eq!(hook.oom_score_adj, 10);
        assert_eq!(hook.unified.get("resourceA").unwrap(), "resource A");
        assert_eq!(hook.hugepage_limits[0].limit, 4096);

        assert_eq!(to_cri_resources(&hook), cri);
    }

    #[test]
    fn test_to_hook_envs() {
        assert_eq!(to_hook_envs(&[]), HashMap::new());

        let envs = vec![
            v1::KeyValue {
                key: "key1".to_string(),
                value: "value1".to_string(),
            },
            v1::KeyValue {
                key: "key2".to_string(),
                value: "value2".to_string(),
            },
            v1::KeyValue {
                key: "key1".to_string(),
                value: "value3".to_string(),
            },
        ];
        let flattened = to_hook_envs(&envs);
        assert_eq!(flattened.len(), 2);
        // the last assignment of a repeated name wins
        assert_eq!(flattened.get("key1").unwrap(), "value3");
        assert_eq!(flattened.get("key2").unwrap(), "value2");
    }
}
