// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use proxy_types::{ContainerInfo, PodSandboxInfo};

/// The in-memory checkpoint store: `sandbox id -> PodSandboxInfo` and
/// `container id -> ContainerInfo`. The two maps are independent; no
/// operation spans both.
///
/// Records are published by value: a write replaces the stored `Arc`, so a
/// reader that already fetched a record keeps its snapshot while later
/// readers see the new one.
///
/// Process-wide and never persisted; failover rebuilds it from the backend
/// on every start.
#[derive(Default)]
pub struct CheckpointStore {
    pods: RwLock<HashMap<String, Arc<PodSandboxInfo>>>,
    containers: RwLock<HashMap<String, Arc<ContainerInfo>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_pod(&self, sandbox_id: &str) -> Option<Arc<PodSandboxInfo>> {
        read(&self.pods).get(sandbox_id).cloned()
    }

    pub fn write_pod(&self, sandbox_id: &str, info: PodSandboxInfo) {
        write(&self.pods).insert(sandbox_id.to_string(), Arc::new(info));
    }

    pub fn delete_pod(&self, sandbox_id: &str) {
        write(&self.pods).remove(sandbox_id);
    }

    pub fn get_container(&self, container_id: &str) -> Option<Arc<ContainerInfo>> {
        read(&self.containers).get(container_id).cloned()
    }

    pub fn write_container(&self, container_id: &str, info: ContainerInfo) {
        write(&self.containers).insert(container_id.to_string(), Arc::new(info));
    }

    pub fn delete_container(&self, container_id: &str) {
        write(&self.containers).remove(container_id);
    }

    #[cfg(test)]
    pub fn pod_count(&self) -> usize {
        read(&self.pods).len()
    }

    #[cfg(test)]
    pub fn container_count(&self) -> usize {
        read(&self.containers).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_types::PodSandboxMetadata;

    fn pod(name: &str) -> PodSandboxInfo {
        PodSandboxInfo {
            pod_meta: PodSandboxMetadata {
                name: name.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_round_trip() {
        let store = CheckpointStore::new();
        assert!(store.get_pod("sandbox-0").is_none());

        store.write_pod("sandbox-0", pod("pod-0"));
        assert_eq!(store.get_pod("sandbox-0").unwrap().pod_meta.name, "pod-0");

        store.delete_pod("sandbox-0");
        assert!(store.get_pod("sandbox-0").is_none());
        // deleting again is a no-op
        store.delete_pod("sandbox-0");
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let store = CheckpointStore::new();
        store.write_pod("sandbox-0", pod("before"));

        let snapshot = store.get_pod("sandbox-0").unwrap();
        store.write_pod("sandbox-0", pod("after"));

        assert_eq!(snapshot.pod_meta.name, "before");
        assert_eq!(store.get_pod("sandbox-0").unwrap().pod_meta.name, "after");
    }

    #[test]
    fn test_maps_are_independent() {
        let store = CheckpointStore::new();
        store.write_pod("id", pod("pod"));
        assert!(store.get_container("id").is_none());

        store.write_container("id", ContainerInfo::default());
        store.delete_pod("id");
        assert!(store.get_container("id").is_some());
    }
}
