//! Static catalog of the services each role runs and the ports they listen on.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::topology::Role;

/// Feature group that is always enabled.
pub const BASE_FEATURE: &str = "base";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may reach a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exposure {
    /// Reachable from inside the cluster network.
    Internal,
    /// Reachable from anywhere.
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
    pub protocol: Protocol,
}

impl PortRange {
    pub const fn tcp(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            protocol: Protocol::Tcp,
        }
    }

    pub const fn udp(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            protocol: Protocol::Udp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Service {
    pub name: &'static str,
    pub feature: &'static str,
    pub roles: &'static [Role],
    pub exposure: Exposure,
    pub ports: &'static [PortRange],
}

impl Service {
    pub fn runs_on(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

const ALL_ROLES: &[Role] = &Role::ALL;

pub static SERVICES: &[Service] = &[
    Service {
        name: "ssh",
        feature: BASE_FEATURE,
        roles: ALL_ROLES,
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(22, 22)],
    },
    Service {
        name: "ssh-bastion",
        feature: BASE_FEATURE,
        roles: &[Role::Border],
        exposure: Exposure::Public,
        ports: &[PortRange::tcp(22, 22)],
    },
    Service {
        name: "etcd",
        feature: BASE_FEATURE,
        roles: &[Role::Quorum],
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(2379, 2379), PortRange::tcp(2380, 2380)],
    },
    Service {
        name: "zookeeper",
        feature: BASE_FEATURE,
        roles: &[Role::Quorum],
        exposure: Exposure::Internal,
        ports: &[
            PortRange::tcp(2181, 2181),
            PortRange::tcp(2888, 2888),
            PortRange::tcp(3888, 3888),
        ],
    },
    Service {
        name: "mesos-master",
        feature: BASE_FEATURE,
        roles: &[Role::Master],
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(5050, 5050)],
    },
    Service {
        name: "marathon",
        feature: BASE_FEATURE,
        roles: &[Role::Master],
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(8080, 8080), PortRange::tcp(8081, 8081)],
    },
    Service {
        name: "mesos-dns",
        feature: BASE_FEATURE,
        roles: &[Role::Master],
        exposure: Exposure::Internal,
        ports: &[
            PortRange::tcp(53, 53),
            PortRange::udp(53, 53),
            PortRange::tcp(8123, 8123),
        ],
    },
    Service {
        name: "mesos-agent",
        feature: BASE_FEATURE,
        roles: &[Role::Worker],
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(5051, 5051)],
    },
    Service {
        name: "task-ports",
        feature: BASE_FEATURE,
        roles: &[Role::Worker],
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(31000, 32000), PortRange::udp(31000, 32000)],
    },
    Service {
        name: "marathon-lb",
        feature: BASE_FEATURE,
        roles: &[Role::Border],
        exposure: Exposure::Public,
        ports: &[PortRange::tcp(80, 80), PortRange::tcp(443, 443)],
    },
    Service {
        name: "marathon-lb-stats",
        feature: BASE_FEATURE,
        roles: &[Role::Border],
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(9090, 9091)],
    },
    Service {
        name: "vpn",
        feature: BASE_FEATURE,
        roles: &[Role::Border],
        exposure: Exposure::Public,
        ports: &[PortRange::udp(1194, 1194)],
    },
    Service {
        name: "node-exporter",
        feature: "insight",
        roles: ALL_ROLES,
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(9100, 9100)],
    },
    Service {
        name: "cadvisor",
        feature: "insight",
        roles: &[Role::Worker],
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(4194, 4194)],
    },
    Service {
        name: "mesos-exporter",
        feature: "insight",
        roles: &[Role::Master, Role::Worker],
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(9104, 9105)],
    },
    Service {
        name: "prometheus",
        feature: "insight",
        roles: &[Role::Master],
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(9191, 9191)],
    },
    Service {
        name: "alertmanager",
        feature: "insight",
        roles: &[Role::Master],
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(9093, 9094)],
    },
    Service {
        name: "haproxy-exporter",
        feature: "insight",
        roles: &[Role::Border],
        exposure: Exposure::Internal,
        ports: &[PortRange::tcp(9101, 9101)],
    },
];

/// Services assigned to `role` whose feature group is enabled.
pub fn services_for<'a>(role: Role, features: &'a [String]) -> impl Iterator<Item = &'static Service> + 'a {
    SERVICES.iter().filter(move |s| {
        s.runs_on(role) && (s.feature == BASE_FEATURE || features.iter().any(|f| f == s.feature))
    })
}

/// Every feature group named in the catalog.
pub fn known_features() -> Vec<&'static str> {
    let mut features: Vec<&'static str> = SERVICES.iter().map(|s| s.feature).collect();
    features.sort_unstable();
    features.dedup();
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(role: Role, features: &[&str]) -> Vec<&'static str> {
        let features: Vec<String> = features.iter().map(|f| f.to_string()).collect();
        services_for(role, &features).map(|s| s.name).collect()
    }

    #[test]
    fn base_services_are_always_enabled() {
        assert_eq!(names(Role::Quorum, &[]), vec!["ssh", "etcd", "zookeeper"]);
    }

    #[test]
    fn insight_adds_monitoring() {
        let quorum = names(Role::Quorum, &["insight"]);
        assert!(quorum.contains(&"node-exporter"));
        let master = names(Role::Master, &["base", "insight"]);
        assert!(master.contains(&"prometheus"));
        assert!(master.contains(&"alertmanager"));
        assert!(!master.contains(&"cadvisor"));
    }

    #[test]
    fn catalog_ranges_are_well_formed() {
        for service in SERVICES {
            assert!(!service.ports.is_empty(), "{}", service.name);
            for range in service.ports {
                assert!(range.start <= range.end, "{}", service.name);
            }
        }
    }

    #[test]
    fn known_features_lists_groups() {
        assert_eq!(known_features(), vec!["base", "insight"]);
    }
}
