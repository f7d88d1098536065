// src/watchers/handlers.rs
// Translate watch events into state store mutations

use crate::daemon::state::DaemonState;
use crate::daemon::types::{Container, ContainerGroup, Pod, SecurityPolicy, WatchEvent};
use crate::watchers::RuntimeFlavor;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Strip a `<runtime>://` scheme from a container id.
pub fn normalize_container_id(raw: &str) -> &str {
    match raw.split_once("://") {
        Some((_, id)) => id,
        None => raw,
    }
}

pub fn apply_container_event(state: &DaemonState, flavor: RuntimeFlavor, event: WatchEvent<Container>) {
    let kind = event.kind();
    match event {
        WatchEvent::Added(mut container) | WatchEvent::Modified(mut container) => {
            container.id = normalize_container_id(&container.id).to_string();
            debug!(runtime = %flavor, container_id = %container.id, kind, "Container event");
            state.upsert_container(container);
        }
        WatchEvent::Deleted(container) => {
            let id = normalize_container_id(&container.id);
            debug!(runtime = %flavor, container_id = %id, kind, "Container event");
            state.remove_container(id);
        }
    }
}

fn matching_policies(policies: &[Arc<SecurityPolicy>], group: &ContainerGroup) -> BTreeSet<String> {
    policies
        .iter()
        .filter(|policy| policy.applies_to(group))
        .map(|policy| policy.key())
        .collect()
}

/// Store the policies selecting one group, repeating until no policy change
/// landed between the snapshot and the write. Groups and policies are never
/// locked together, so a policy event racing a pod event is caught here.
pub fn settle_group_policies(state: &DaemonState, group_id: &str) {
    loop {
        let (generation, policies) = state.security_policies_versioned();
        let present = state.modify_container_group(group_id, |group| {
            group.policies = matching_policies(&policies, group);
        });
        if !present || state.policy_generation() == generation {
            return;
        }
    }
}

/// Pods are mirrored into both the pod and container group collections,
/// one lock at a time.
pub fn apply_pod_event(state: &DaemonState, event: WatchEvent<Pod>) {
    let kind = event.kind();
    match event {
        WatchEvent::Added(pod) | WatchEvent::Modified(pod) => {
            let group = ContainerGroup {
                id: pod.group_id(),
                namespace: pod.namespace.clone(),
                labels: pod.labels.clone(),
                containers: pod
                    .containers
                    .iter()
                    .map(|id| normalize_container_id(id).to_string())
                    .collect(),
                policies: BTreeSet::new(),
            };
            let group_id = group.id.clone();
            debug!(pod = %group_id, kind, "Pod event");

            // A rename keeps the uid; drop the group stored under the old name
            if let Some(previous) = state.upsert_pod(pod) {
                if previous.group_id() != group.id {
                    state.remove_container_group(&previous.group_id());
                }
            }
            state.upsert_container_group(group);
            settle_group_policies(state, &group_id);
        }
        WatchEvent::Deleted(pod) => {
            debug!(pod = %pod.group_id(), kind, "Pod event");
            let stored = state.remove_pod(&pod.uid).unwrap_or(pod);
            state.remove_container_group(&stored.group_id());
        }
    }
}

pub fn apply_policy_event(state: &DaemonState, event: WatchEvent<SecurityPolicy>) {
    let kind = event.kind();
    match event {
        WatchEvent::Added(policy) | WatchEvent::Modified(policy) => {
            debug!(policy = %policy.key(), kind, "Security policy event");
            state.upsert_security_policy(policy);
        }
        WatchEvent::Deleted(policy) => {
            debug!(policy = %policy.key(), kind, "Security policy event");
            state.remove_security_policy(&policy.key());
        }
    }
    refresh_group_policies(state);
}

/// Recompute which policies select each container group.
pub fn refresh_group_policies(state: &DaemonState) {
    for group in state.container_groups() {
        settle_group_policies(state, &group.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::types::Selector;
    use std::collections::BTreeMap;

    fn pod(uid: &str, name: &str, containers: &[&str], app: &str) -> Pod {
        Pod {
            uid: uid.to_string(),
            namespace: "default".to_string(),
            name: name.to_string(),
            containers: containers.iter().map(|c| c.to_string()).collect(),
            labels: BTreeMap::from([("app".to_string(), app.to_string())]),
        }
    }

    fn policy(name: &str, app: &str) -> SecurityPolicy {
        SecurityPolicy {
            name: name.to_string(),
            namespace: "default".to_string(),
            selector: Selector {
                match_labels: BTreeMap::from([("app".to_string(), app.to_string())]),
            },
            spec: serde_json::json!({"process": {"matchPaths": [{"path": "/bin/sh"}]}}),
        }
    }

    #[test]
    fn test_normalize_container_id() {
        assert_eq!(normalize_container_id("containerd://abc123"), "abc123");
        assert_eq!(normalize_container_id("docker://def456"), "def456");
        assert_eq!(normalize_container_id("789"), "789");
    }

    #[test]
    fn test_container_events_apply_in_order() {
        let state = DaemonState::new();
        let flavor = RuntimeFlavor::Docker;
        apply_container_event(&state, flavor, WatchEvent::Added(Container::new("docker://c1", "web")));
        apply_container_event(&state, flavor, WatchEvent::Modified(Container::new("c1", "web-2")));
        assert_eq!(state.containers().len(), 1);
        assert_eq!(state.container("c1").unwrap().name, "web-2");

        apply_container_event(&state, flavor, WatchEvent::Deleted(Container::new("docker://c1", "")));
        assert!(state.containers().is_empty());
    }

    #[test]
    fn test_pod_event_builds_group_with_matching_policies() {
        let state = DaemonState::new();
        state.upsert_security_policy(policy("no-shell", "web"));
        state.upsert_security_policy(policy("db-only", "db"));

        apply_pod_event(
            &state,
            WatchEvent::Added(pod("u1", "web-0", &["containerd://c1", "containerd://c2"], "web")),
        );

        let group = state.container_group("default/web-0").unwrap();
        assert_eq!(group.containers, BTreeSet::from(["c1".to_string(), "c2".to_string()]));
        assert_eq!(group.policies, BTreeSet::from(["default/no-shell".to_string()]));
        assert!(state.pod("u1").is_some());
    }

    #[test]
    fn test_pod_rename_and_delete_clean_up_groups() {
        let state = DaemonState::new();
        apply_pod_event(&state, WatchEvent::Added(pod("u1", "web-0", &["c1"], "web")));
        apply_pod_event(&state, WatchEvent::Modified(pod("u1", "web-1", &["c1"], "web")));
        assert!(state.container_group("default/web-0").is_none());
        assert!(state.container_group("default/web-1").is_some());

        apply_pod_event(&state, WatchEvent::Deleted(pod("u1", "web-1", &[], "web")));
        assert!(state.pods().is_empty());
        assert!(state.container_groups().is_empty());
    }

    #[test]
    fn test_policy_events_refresh_existing_groups() {
        let state = DaemonState::new();
        apply_pod_event(&state, WatchEvent::Added(pod("u1", "web-0", &["c1"], "web")));
        assert!(state.container_group("default/web-0").unwrap().policies.is_empty());

        apply_policy_event(&state, WatchEvent::Added(policy("no-shell", "web")));
        assert_eq!(
            state.container_group("default/web-0").unwrap().policies,
            BTreeSet::from(["default/no-shell".to_string()])
        );

        apply_policy_event(&state, WatchEvent::Deleted(policy("no-shell", "web")));
        assert!(state.container_group("default/web-0").unwrap().policies.is_empty());
        assert!(state.security_policies().is_empty());
    }

    #[test]
    fn test_policy_racing_pod_events_reaches_every_group() {
        for _ in 0..200 {
            let state = Arc::new(DaemonState::new());
            std::thread::scope(|scope| {
                let pods = Arc::clone(&state);
                scope.spawn(move || {
                    for i in 0..50 {
                        let name = format!("web-{}", i);
                        let uid = format!("u{}", i);
                        apply_pod_event(&pods, WatchEvent::Added(pod(&uid, &name, &["c1"], "web")));
                    }
                });
                let policies = Arc::clone(&state);
                scope.spawn(move || {
                    apply_policy_event(&policies, WatchEvent::Added(policy("no-shell", "web")));
                });
            });

            let expected = BTreeSet::from(["default/no-shell".to_string()]);
            let groups = state.container_groups();
            assert_eq!(groups.len(), 50);
            for group in groups {
                assert_eq!(group.policies, expected, "group {} missed the policy", group.id);
            }
        }
    }
}
