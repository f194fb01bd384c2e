// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::utils::merge_map;

/// The valid range for `oom_score_adj`; values outside it are ignored by the
/// merge rules.
pub const OOM_SCORE_ADJ_MIN: i64 = -1000;
pub const OOM_SCORE_ADJ_MAX: i64 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HugepageLimit {
    #[serde(default)]
    pub page_size: String,
    #[serde(default)]
    pub limit: u64,
}

/// The linux resource envelope carried by pod and container records.
///
/// Zero values mean "not specified", with one exception: `cpu_quota == -1`
/// is a valid explicit "unlimited".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinuxContainerResources {
    #[serde(default)]
    pub cpu_period: i64,
    #[serde(default)]
    pub cpu_quota: i64,
    #[serde(default)]
    pub cpu_shares: i64,
    #[serde(default)]
    pub memory_limit_in_bytes: i64,
    #[serde(default)]
    pub memory_swap_limit_in_bytes: i64,
    #[serde(default)]
    pub oom_score_adj: i64,
    #[serde(default)]
    pub cpuset_cpus: String,
    #[serde(default)]
    pub cpuset_mems: String,
    #[serde(default)]
    pub hugepage_limits: Vec<HugepageLimit>,
    #[serde(default)]
    pub unified: HashMap<String, String>,
}

impl LinuxContainerResources {
    fn update_common(&mut self, b: &LinuxContainerResources) {
        if b.cpu_period > 0 {
            self.cpu_period = b.cpu_period;
        }
        if b.cpu_quota != 0 {
            // -1 is valid
            self.cpu_quota = b.cpu_quota;
        }
        if b.cpu_shares > 0 {
            self.cpu_shares = b.cpu_shares;
        }
        if b.memory_limit_in_bytes > 0 {
            self.memory_limit_in_bytes = b.memory_limit_in_bytes;
        }
        if b.memory_swap_limit_in_bytes > 0 {
            self.memory_swap_limit_in_bytes = b.memory_swap_limit_in_bytes;
        }
        self.unified = merge_map(&self.unified, &b.unified);
    }

    /// Folds `b` into `self` following the general merge rules.
    pub fn update(&mut self, b: &LinuxContainerResources) {
        self.update_common(b);
        if (OOM_SCORE_ADJ_MIN..=OOM_SCORE_ADJ_MAX).contains(&b.oom_score_adj) {
            self.oom_score_adj = b.oom_score_adj;
        }
        self.cpuset_cpus = b.cpuset_cpus.clone();
        self.cpuset_mems = b.cpuset_mems.clone();
    }

    /// Folds `b` into `self` following the rules for an
    /// UpdateContainerResources request: `oom_score_adj` is never touched
    /// (components that need to change it must go through a hook plugin),
    /// and the cpuset fields only overwrite when non-empty.
    pub fn update_by_update_request(&mut self, b: &LinuxContainerResources) {
        self.update_common(b);
        if !b.cpuset_cpus.is_empty() {
            self.cpuset_cpus = b.cpuset_cpus.clone();
        }
        if !b.cpuset_mems.is_empty() {
            self.cpuset_mems = b.cpuset_mems.clone();
        }
    }
}

/// Merges `b` into `a`. The first operand controls identity: a missing `a`
/// stays missing and a missing `b` leaves `a` untouched.
pub fn update_resource(
    a: Option<LinuxContainerResources>,
    b: Option<&LinuxContainerResources>,
) -> Option<LinuxContainerResources> {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            a.update(b);
            Some(a)
        }
        (a, _) => a,
    }
}

/// Same as [`update_resource`] but with the UpdateContainerResources rules.
pub fn update_resource_by_update_request(
    a: Option<LinuxContainerResources>,
    b: Option<&LinuxContainerResources>,
) -> Option<LinuxContainerResources> {
    match (a, b) {
        (Some(mut a), Some(b)) => {
            a.update_by_update_request(b);
            Some(a)
        }
        (a, _) => a,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn stored() -> LinuxContainerResources {
        LinuxContainerResources {
            cpu_period: 1000,
            cpu_quota: 2000,
            cpu_shares: 500,
            oom_score_adj: 10,
            memory_swap_limit_in_bytes: 100,
            memory_limit_in_bytes: 300,
            cpuset_cpus: "0-64".to_string(),
            cpuset_mems: "0-2".to_string(),
            unified: map(&[("resourceA", "resource A")]),
            ..Default::default()
        }
    }

    fn proposed() -> LinuxContainerResources {
        LinuxContainerResources {
            cpu_period: 2000,
            cpu_quota: 4000,
            cpu_shares: 1000,
            oom_score_adj: 20,
            memory_swap_limit_in_bytes: 200,
            memory_limit_in_bytes: 600,
            cpuset_cpus: "0-31".to_string(),
            cpuset_mems: "0-4".to_string(),
            unified: map(&[("resourceB", "resource B")]),
            ..Default::default()
        }
    }

    #[test]
    fn test_update_resource_identity() {
        assert_eq!(update_resource(None, None), None);
        assert_eq!(update_resource(None, Some(&proposed())), None);
        assert_eq!(update_resource(Some(stored()), None), Some(stored()));
    }

    #[test]
    fn test_update_resource() {
        let got = update_resource(Some(stored()), Some(&proposed())).unwrap();
        let want = LinuxContainerResources {
            cpu_period: 2000,
            cpu_quota: 4000,
            cpu_shares: 1000,
            oom_score_adj: 20,
            memory_swap_limit_in_bytes: 200,
            memory_limit_in_bytes: 600,
            cpuset_cpus: "0-31".to_string(),
            cpuset_mems: "0-4".to_string(),
            unified: map(&[("resourceA", "resource A"), ("resourceB", "resource B")]),
            ..Default::default()
        };
        assert_eq!(got, want);
    }

    #[test]
    fn test_update_resource_cpu_quota_unlimited() {
        let b = LinuxContainerResources {
            cpu_quota: -1,
            ..Default::default()
        };
        let got = update_resource(Some(stored()), Some(&b)).unwrap();
        assert_eq!(got.cpu_quota, -1);
        // a zero quota in the delta is "not specified"
        let got = update_resource(Some(stored()), Some(&Default::default())).unwrap();
        assert_eq!(got.cpu_quota, 2000);
    }

    #[test]
    fn test_update_resource_oom_score_adj_range() {
        let b = LinuxContainerResources {
            oom_score_adj: 1001,
            ..Default::default()
        };
        let got = update_resource(Some(stored()), Some(&b)).unwrap();
        assert_eq!(got.oom_score_adj, 10);

        let b = LinuxContainerResources {
            oom_score_adj: -1000,
            ..Default::default()
        };
        let got = update_resource(Some(stored()), Some(&b)).unwrap();
        assert_eq!(got.oom_score_adj, -1000);
    }

    #[test]
    fn test_update_resource_cpuset_cleared() {
        // the general merge overwrites cpusets unconditionally
        let got = update_resource(Some(stored()), Some(&Default::default())).unwrap();
        assert_eq!(got.cpuset_cpus, "");
        assert_eq!(got.cpuset_mems, "");
    }

    #[test]
    fn test_update_resource_by_update_request() {
        let got = update_resource_by_update_request(Some(stored()), Some(&proposed())).unwrap();
        let want = LinuxContainerResources {
            cpu_period: 2000,
            cpu_quota: 4000,
            cpu_shares: 1000,
            // never overwritten on this path
            oom_score_adj: 10,
            memory_swap_limit_in_bytes: 200,
            memory_limit_in_bytes: 600,
            cpuset_cpus: "0-31".to_string(),
            cpuset_mems: "0-4".to_string(),
            unified: map(&[("resourceA", "resource A"), ("resourceB", "resource B")]),
            ..Default::default()
        };
        assert_eq!(got, want);
    }

    #[test]
    fn test_update_resource_by_update_request_keeps_cpusets() {
        // empty cpusets in the delta do not clear the stored value
        let got =
            update_resource_by_update_request(Some(stored()), Some(&Default::default())).unwrap();
        assert_eq!(got.cpuset_cpus, "0-64");
        assert_eq!(got.cpuset_mems, "0-2");
        assert_eq!(update_resource_by_update_request(None, None), None);
    }
}
