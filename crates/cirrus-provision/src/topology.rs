//! Parsing and validation of `count:instanceType:hostName:roles` node batch descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{ProvisionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Quorum,
    Master,
    Worker,
    Border,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Quorum, Role::Master, Role::Worker, Role::Border];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Quorum => "quorum",
            Role::Master => "master",
            Role::Worker => "worker",
            Role::Border => "border",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "quorum" => Ok(Role::Quorum),
            "master" => Ok(Role::Master),
            "worker" => Ok(Role::Worker),
            "border" => Ok(Role::Border),
            _ => Err(ProvisionError::validation(
                "role",
                s,
                "one of quorum, master, worker, border",
            )),
        }
    }
}

/// Size classes accepted in place of a provider instance type, and what they map to.
const SIZE_CLASSES: &[(&str, &str)] = &[
    ("nano", "t3.nano"),
    ("micro", "t3.micro"),
    ("small", "t3.small"),
    ("medium", "t3.medium"),
    ("large", "m5.large"),
    ("xlarge", "m5.xlarge"),
    ("2xlarge", "m5.2xlarge"),
    ("4xlarge", "m5.4xlarge"),
];

const FAMILIES: &[&str] = &["t2", "t3", "m4", "m5", "c4", "c5", "r4", "r5", "i3"];

const SIZES: &[&str] = &[
    "nano", "micro", "small", "medium", "large", "xlarge", "2xlarge", "4xlarge", "8xlarge",
];

/// Whether `name` is a size class or a `family.size` instance type in the catalog.
pub fn is_known_instance_type(name: &str) -> bool {
    if SIZE_CLASSES.iter().any(|(class, _)| *class == name) {
        return true;
    }
    match name.split_once('.') {
        Some((family, size)) => FAMILIES.contains(&family) && SIZES.contains(&size),
        None => false,
    }
}

/// Provider instance type for a catalog entry; size classes are expanded.
pub fn resolve_instance_type(name: &str) -> &str {
    SIZE_CLASSES
        .iter()
        .find(|(class, _)| *class == name)
        .map(|(_, concrete)| *concrete)
        .unwrap_or(name)
}

/// DNS label: 1-63 lowercase letters, digits or hyphens, not starting or ending with a hyphen.
pub fn is_dns_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 63
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// A homogeneous batch of nodes to add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyQuadruplet {
    pub count: u32,
    pub instance_type: String,
    pub host_name: String,
    pub roles: BTreeSet<Role>,
}

impl TopologyQuadruplet {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// `<host_name>-1` .. `<host_name>-<count>`
    pub fn hostnames(&self) -> impl Iterator<Item = String> + '_ {
        (1..=self.count).map(move |id| format!("{}-{}", self.host_name, id))
    }
}

impl fmt::Display for TopologyQuadruplet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roles: Vec<&str> = self.roles.iter().map(Role::as_str).collect();
        write!(
            f,
            "{}:{}:{}:{}",
            self.count,
            self.instance_type,
            self.host_name,
            roles.join(",")
        )
    }
}

impl FromStr for TopologyQuadruplet {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != 4 {
            return Err(ProvisionError::validation(
                "quadruplet",
                s,
                "exactly four ':'-separated fields count:instanceType:hostName:roles",
            ));
        }

        let count_str = fields[0];
        let digits_only = !count_str.is_empty() && count_str.bytes().all(|b| b.is_ascii_digit());
        if !digits_only {
            return Err(ProvisionError::validation(
                "count",
                count_str,
                "a non-negative integer",
            ));
        }
        let count = count_str.parse::<u32>().map_err(|_| {
            ProvisionError::validation(
                "count",
                count_str,
                format!("a non-negative integer no greater than {}", u32::MAX),
            )
        })?;

        let instance_type = fields[1];
        if !is_known_instance_type(instance_type) {
            return Err(ProvisionError::validation(
                "instance type",
                instance_type,
                "a size class (e.g. large) or a known family.size instance type",
            ));
        }

        let host_name = fields[2];
        if !is_dns_label(host_name) {
            return Err(ProvisionError::validation(
                "host name",
                host_name,
                "a DNS label of lowercase letters, digits and hyphens",
            ));
        }

        let roles = fields[3]
            .split(',')
            .map(Role::from_str)
            .collect::<Result<BTreeSet<Role>>>()?;

        Ok(TopologyQuadruplet {
            count,
            instance_type: instance_type.to_string(),
            host_name: host_name.to_string(),
            roles,
        })
    }
}

/// Validated, ordered list of node batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub batches: Vec<TopologyQuadruplet>,
}

impl Topology {
    /// Parses every descriptor; the first invalid one fails the whole topology.
    ///
    /// Host ids restart at 1 in every batch, so two batches may not share a host name.
    pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<Self> {
        let batches = specs
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<TopologyQuadruplet>>>()?;

        let mut seen = BTreeSet::new();
        for batch in &batches {
            if !seen.insert(batch.host_name.as_str()) {
                return Err(ProvisionError::validation(
                    "host name",
                    &batch.host_name,
                    "a host name not used by another batch",
                ));
            }
        }
        Ok(Topology { batches })
    }

    /// Total nodes across batches that carry `role`.
    pub fn role_count(&self, role: Role) -> u32 {
        self.batches
            .iter()
            .filter(|b| b.has_role(role))
            .map(|b| b.count)
            .sum()
    }

    /// Host names of every node carrying `role`, in batch order.
    pub fn role_members(&self, role: Role) -> Vec<String> {
        self.batches
            .iter()
            .filter(|b| b.has_role(role))
            .flat_map(|b| b.hostnames())
            .collect()
    }

    pub fn node_count(&self) -> u32 {
        self.batches.iter().map(|b| b.count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn field_of(err: ProvisionError) -> String {
        match err {
            ProvisionError::Validation { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parses_valid_quadruplet() {
        let q: TopologyQuadruplet = "1:large:border:worker,border".parse().unwrap();
        assert_eq!(q.count, 1);
        assert_eq!(q.instance_type, "large");
        assert_eq!(q.host_name, "border");
        assert_eq!(
            q.roles.iter().copied().collect::<Vec<_>>(),
            vec![Role::Worker, Role::Border]
        );
        assert_eq!(q.to_string(), "1:large:border:worker,border");
    }

    #[test]
    fn zero_count_is_accepted() {
        let q: TopologyQuadruplet = "0:m5.xlarge:worker:worker".parse().unwrap();
        assert_eq!(q.count, 0);
    }

    #[test]
    fn duplicate_roles_collapse() {
        let q: TopologyQuadruplet = "2:small:edge:border,border".parse().unwrap();
        assert_eq!(q.roles.len(), 1);
    }

    #[test]
    fn reports_first_invalid_field() {
        let cases = [
            ("3:large:quorum", "quadruplet"),
            ("3:large:quorum:quorum:extra", "quadruplet"),
            ("-1:large:quorum:quorum", "count"),
            ("+3:large:quorum:quorum", "count"),
            ("x:huge:Quorum:nope", "count"),
            ("3:huge:Quorum:nope", "instance type"),
            ("3:large:Quorum:nope", "host name"),
            ("3:large:-quorum:quorum", "host name"),
            ("3:large:quorum:nope", "role"),
            ("3:large:quorum:quorum,", "role"),
        ];
        for (input, field) in cases {
            let err = input.parse::<TopologyQuadruplet>().unwrap_err();
            assert_eq!(field_of(err), field, "input {input}");
        }
    }

    #[test]
    fn validation_error_names_value_and_constraint() {
        let err = "3:large:quorum:leader".parse::<TopologyQuadruplet>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("role"));
        assert!(msg.contains("leader"));
        assert!(msg.contains("quorum, master, worker, border"));
    }

    #[test]
    fn topology_fails_without_partial_results() {
        let specs = ["3:large:quorum:quorum", "1:large:bad_host:worker"];
        assert!(Topology::parse(&specs).is_err());
    }

    #[test]
    fn role_counts_and_prefixes() {
        let topology = Topology::parse(&[
            "3:large:quorum:quorum",
            "3:large:master:master",
            "1:large:border:worker,border",
            "2:large:worker:worker",
        ])
        .unwrap();
        assert_eq!(topology.role_count(Role::Quorum), 3);
        assert_eq!(topology.role_count(Role::Worker), 3);
        assert_eq!(
            topology.role_members(Role::Master),
            vec!["master-1", "master-2", "master-3"]
        );
        assert_eq!(
            topology.role_members(Role::Worker),
            vec!["border-1", "worker-1", "worker-2"]
        );
        assert!(topology.role_members(Role::Border).contains(&"border-1".to_string()));
        assert_eq!(topology.node_count(), 9);
    }

    #[test]
    fn role_split_across_batches_keeps_every_member() {
        let topology = Topology::parse(&["2:large:qa:quorum", "1:large:qb:quorum"]).unwrap();
        assert_eq!(topology.role_count(Role::Quorum), 3);
        assert_eq!(topology.role_members(Role::Quorum), vec!["qa-1", "qa-2", "qb-1"]);
    }

    #[test]
    fn host_name_shared_by_two_batches_is_rejected() {
        let err = Topology::parse(&["1:large:node:quorum", "1:large:node:master"]).unwrap_err();
        match err {
            ProvisionError::Validation { field, value, .. } => {
                assert_eq!(field, "host name");
                assert_eq!(value, "node");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn count_beyond_u32_names_the_limit() {
        let err = "99999999999:large:quorum:quorum"
            .parse::<TopologyQuadruplet>()
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("count"));
        assert!(msg.contains(&u32::MAX.to_string()));
    }

    #[test]
    fn size_classes_resolve() {
        assert_eq!(resolve_instance_type("large"), "m5.large");
        assert_eq!(resolve_instance_type("c5.2xlarge"), "c5.2xlarge");
        assert!(is_known_instance_type("r4.8xlarge"));
        assert!(!is_known_instance_type("z9.large"));
        assert!(!is_known_instance_type("m5"));
    }

    proptest! {
        #[test]
        fn accepts_iff_every_field_is_valid(
            count in prop_oneof!["[0-9]{1,6}", "-?[a-z0-9]{1,4}"],
            itype in prop_oneof![Just("large".to_string()), Just("m5.large".to_string()), "[a-z0-9.]{1,8}"],
            host in "[a-zA-Z0-9_-]{0,12}",
            roles in proptest::collection::vec(
                prop_oneof![Just("quorum"), Just("master"), Just("worker"), Just("border"), Just("leader")],
                1..4,
            ),
        ) {
            let input = format!("{}:{}:{}:{}", count, itype, host, roles.join(","));
            let count_ok = count.bytes().all(|b| b.is_ascii_digit());
            let type_ok = is_known_instance_type(&itype);
            let host_ok = is_dns_label(&host);
            let roles_ok = roles.iter().all(|r| *r != "leader");

            match input.parse::<TopologyQuadruplet>() {
                Ok(q) => {
                    prop_assert!(count_ok && type_ok && host_ok && roles_ok);
                    prop_assert_eq!(q.count, count.parse::<u32>().unwrap());
                }
                Err(err) => {
                    let expected = if !count_ok {
                        "count"
                    } else if !type_ok {
                        "instance type"
                    } else if !host_ok {
                        "host name"
                    } else {
                        "role"
                    };
                    prop_assert!(!(count_ok && type_ok && host_ok && roles_ok));
                    prop_assert_eq!(field_of(err), expected);
                }
            }
        }
    }
}
