//! Active tag sets used to gate boot configuration fragments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Infrastructure provider a node is booted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Iaas {
    Ec2,
    Packet,
    Sandbox,
}

impl Iaas {
    pub fn as_str(&self) -> &'static str {
        match self {
            Iaas::Ec2 => "ec2",
            Iaas::Packet => "packet",
            Iaas::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for Iaas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether quorum members form a brand new cluster or join an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStateFlag {
    New,
    Existing,
}

impl ClusterStateFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStateFlag::New => "new",
            ClusterStateFlag::Existing => "existing",
        }
    }

    /// Tag name used by fragment filters.
    pub fn tag(&self) -> &'static str {
        match self {
            ClusterStateFlag::New => "cluster-state-new",
            ClusterStateFlag::Existing => "cluster-state-existing",
        }
    }
}

/// Set of active tags for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: BTreeSet<String>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the tag set for a node from its role names and cluster-wide flags.
    pub fn for_node<I, S>(
        roles: I,
        iaas: Iaas,
        cluster_state: ClusterStateFlag,
        has_ca_cert: bool,
        prometheus: bool,
        alertmanager: bool,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = TagSet::new();
        for role in roles {
            set.insert(role.as_ref());
        }
        set.insert(iaas.as_str());
        set.insert(cluster_state.tag());
        if has_ca_cert {
            set.insert("cacert");
        }
        if prometheus {
            set.insert("prometheus");
        }
        if alertmanager {
            set.insert("alertmanager");
        }
        set
    }

    pub fn insert(&mut self, tag: &str) {
        self.tags.insert(tag.to_string());
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for TagSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut set = TagSet::new();
        for tag in iter {
            set.insert(tag.as_ref());
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_node_collects_roles_and_flags() {
        let tags = TagSet::for_node(
            ["master", "worker"],
            Iaas::Ec2,
            ClusterStateFlag::New,
            true,
            false,
            true,
        );
        assert!(tags.contains("master"));
        assert!(tags.contains("worker"));
        assert!(tags.contains("ec2"));
        assert!(tags.contains("cluster-state-new"));
        assert!(tags.contains("cacert"));
        assert!(tags.contains("alertmanager"));
        assert!(!tags.contains("prometheus"));
        assert_eq!(tags.len(), 6);
    }

    #[test]
    fn duplicate_tags_collapse() {
        let tags: TagSet = ["quorum", "quorum", "ec2"].into_iter().collect();
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn existing_cluster_uses_its_own_tag() {
        let tags = TagSet::for_node(
            Vec::<String>::new(),
            Iaas::Packet,
            ClusterStateFlag::Existing,
            false,
            false,
            false,
        );
        assert!(tags.contains("cluster-state-existing"));
        assert!(!tags.contains("cluster-state-new"));
        assert!(tags.contains("packet"));
    }
}
