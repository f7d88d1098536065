// src/daemon/types.rs
// Entities mirrored into the daemon state store

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Runtime-assigned status of an observed container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Exited,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Group (pod) this container belongs to, when known
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub status: ContainerStatus,
}

impl Container {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Container {
            id: id.into(),
            name: name.into(),
            namespace: String::new(),
            group: None,
            status: ContainerStatus::Unknown,
        }
    }
}

/// Logical grouping of containers sharing one policy scope
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerGroup {
    pub id: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub containers: BTreeSet<String>,
    pub policies: BTreeSet<String>,
}

impl ContainerGroup {
    pub fn group_id(namespace: &str, name: &str) -> String {
        format!("{}/{}", namespace, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub containers: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Pod {
    pub fn group_id(&self) -> String {
        ContainerGroup::group_id(&self.namespace, &self.name)
    }
}

/// Label selector; an empty selector matches every pod in the namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Selector {
    #[serde(default, rename = "matchLabels")]
    pub match_labels: BTreeMap<String, String>,
}

impl Selector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub selector: Selector,
    /// Rule body, opaque to the daemon core
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl SecurityPolicy {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn applies_to(&self, group: &ContainerGroup) -> bool {
        self.namespace == group.namespace && self.selector.matches(&group.labels)
    }
}

/// Add/update/delete notification from an external event source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object")]
pub enum WatchEvent<T> {
    #[serde(rename = "ADDED")]
    Added(T),
    #[serde(rename = "MODIFIED")]
    Modified(T),
    #[serde(rename = "DELETED")]
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Modified(_) => "modified",
            WatchEvent::Deleted(_) => "deleted",
        }
    }
}
