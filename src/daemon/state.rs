// src/daemon/state.rs
// Shared daemon state: one independently locked collection per entity

use crate::daemon::types::{Container, ContainerGroup, Pod, SecurityPolicy};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Container id -> pids currently alive inside that container.
///
/// Written only by the event monitor's process trace loop; the audit logger
/// and enforcer read it. An entry exists only while its pid set is non-empty.
#[derive(Default)]
pub struct AttributionMap {
    inner: Mutex<HashMap<String, BTreeSet<u32>>>,
}

impl AttributionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a process start. Returns false if the pid was already tracked.
    pub fn process_started(&self, container_id: &str, pid: u32) -> bool {
        let mut map = self.inner.lock();
        map.entry(container_id.to_string())
            .or_default()
            .insert(pid)
    }

    /// Record a process exit. Returns false if the pid was not tracked.
    pub fn process_exited(&self, container_id: &str, pid: u32) -> bool {
        let mut map = self.inner.lock();
        let Some(pids) = map.get_mut(container_id) else {
            return false;
        };
        let removed = pids.remove(&pid);
        if pids.is_empty() {
            map.remove(container_id);
        }
        removed
    }

    pub fn pids(&self, container_id: &str) -> BTreeSet<u32> {
        self.inner
            .lock()
            .get(container_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn container_of(&self, pid: u32) -> Option<String> {
        self.inner
            .lock()
            .iter()
            .find(|(_, pids)| pids.contains(&pid))
            .map(|(id, _)| id.clone())
    }

    pub fn snapshot(&self) -> HashMap<String, BTreeSet<u32>> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateCounts {
    pub containers: usize,
    pub container_groups: usize,
    pub pods: usize,
    pub policies: usize,
    pub attributed_containers: usize,
}

/// The daemon state store.
///
/// Every accessor takes exactly one collection lock for a single read or
/// mutation and returns owned snapshots, so no caller ever holds a lock while
/// it processes the result. There is no cross-collection atomicity.
#[derive(Default)]
pub struct DaemonState {
    containers: Mutex<HashMap<String, Container>>,
    container_groups: Mutex<HashMap<String, ContainerGroup>>,
    pods: Mutex<HashMap<String, Pod>>,
    policies: Mutex<HashMap<String, Arc<SecurityPolicy>>>,
    /// Bumped under the policies lock on every policy upsert or removal
    policy_generation: AtomicU64,
    attribution: AttributionMap,
}

impl DaemonState {
    pub fn new() -> Self {
        Self::default()
    }

    // Containers

    pub fn containers(&self) -> Vec<Container> {
        self.containers.lock().values().cloned().collect()
    }

    pub fn container(&self, id: &str) -> Option<Container> {
        self.containers.lock().get(id).cloned()
    }

    /// Insert or replace by id. Returns the previous entry, if any.
    pub fn upsert_container(&self, container: Container) -> Option<Container> {
        self.containers
            .lock()
            .insert(container.id.clone(), container)
    }

    pub fn remove_container(&self, id: &str) -> Option<Container> {
        self.containers.lock().remove(id)
    }

    // Container groups

    pub fn container_groups(&self) -> Vec<ContainerGroup> {
        self.container_groups.lock().values().cloned().collect()
    }

    pub fn container_group(&self, id: &str) -> Option<ContainerGroup> {
        self.container_groups.lock().get(id).cloned()
    }

    pub fn upsert_container_group(&self, group: ContainerGroup) -> Option<ContainerGroup> {
        self.container_groups
            .lock()
            .insert(group.id.clone(), group)
    }

    /// Mutate one group in place under the group lock. Returns false if absent.
    pub fn modify_container_group(&self, id: &str, f: impl FnOnce(&mut ContainerGroup)) -> bool {
        match self.container_groups.lock().get_mut(id) {
            Some(group) => {
                f(group);
                true
            }
            None => false,
        }
    }

    pub fn remove_container_group(&self, id: &str) -> Option<ContainerGroup> {
        self.container_groups.lock().remove(id)
    }

    // Pods

    pub fn pods(&self) -> Vec<Pod> {
        self.pods.lock().values().cloned().collect()
    }

    pub fn pod(&self, uid: &str) -> Option<Pod> {
        self.pods.lock().get(uid).cloned()
    }

    pub fn upsert_pod(&self, pod: Pod) -> Option<Pod> {
        self.pods.lock().insert(pod.uid.clone(), pod)
    }

    pub fn remove_pod(&self, uid: &str) -> Option<Pod> {
        self.pods.lock().remove(uid)
    }

    // Security policies

    pub fn security_policies(&self) -> Vec<Arc<SecurityPolicy>> {
        self.policies.lock().values().cloned().collect()
    }

    /// Policy snapshot together with the generation it was taken at.
    pub fn security_policies_versioned(&self) -> (u64, Vec<Arc<SecurityPolicy>>) {
        let policies = self.policies.lock();
        let generation = self.policy_generation.load(Ordering::Acquire);
        (generation, policies.values().cloned().collect())
    }

    pub fn policy_generation(&self) -> u64 {
        self.policy_generation.load(Ordering::Acquire)
    }

    pub fn security_policy(&self, key: &str) -> Option<Arc<SecurityPolicy>> {
        self.policies.lock().get(key).cloned()
    }

    /// Whole-entry replace keyed by `namespace/name`.
    pub fn upsert_security_policy(&self, policy: SecurityPolicy) -> Option<Arc<SecurityPolicy>> {
        let key = policy.key();
        let mut policies = self.policies.lock();
        self.policy_generation.fetch_add(1, Ordering::AcqRel);
        policies.insert(key, Arc::new(policy))
    }

    pub fn remove_security_policy(&self, key: &str) -> Option<Arc<SecurityPolicy>> {
        let mut policies = self.policies.lock();
        self.policy_generation.fetch_add(1, Ordering::AcqRel);
        policies.remove(key)
    }

    // Process attribution

    pub fn attribution(&self) -> &AttributionMap {
        &self.attribution
    }

    /// Collection sizes; each count is read under its own lock, so the result
    /// is not a consistent cut across collections.
    pub fn counts(&self) -> StateCounts {
        StateCounts {
            containers: self.containers.lock().len(),
            container_groups: self.container_groups.lock().len(),
            pods: self.pods.lock().len(),
            policies: self.policies.lock().len(),
            attributed_containers: self.attribution.len(),
        }
    }
}
