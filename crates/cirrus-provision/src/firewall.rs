//! Reduction of per-role service port sets to a minimal list of ingress rules.

use std::fmt;

use crate::cloud::IngressRule;
use crate::services::{services_for, Exposure, PortRange, Protocol, Service};
use crate::topology::Role;

/// Source of publicly exposed services.
pub const ANYWHERE: &str = "0.0.0.0/0";

/// A single port or an inclusive port range in an ingress rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PortRule {
    Single(u16),
    Range(u16, u16),
}

impl PortRule {
    pub fn bounds(&self) -> (u16, u16) {
        match *self {
            PortRule::Single(p) => (p, p),
            PortRule::Range(start, end) => (start, end),
        }
    }
}

impl fmt::Display for PortRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRule::Single(p) => write!(f, "{}", p),
            PortRule::Range(start, end) => write!(f, "{}:{}", start, end),
        }
    }
}

/// Merges overlapping, nested and numerically adjacent intervals.
///
/// Intervals are walked in descending order of start. Each one absorbs previously
/// emitted intervals that begin at or before its end + 1, so the result holds no
/// two intervals that touch. The order of the output is not significant.
pub fn merge_intervals(mut intervals: Vec<(u16, u16)>) -> Vec<(u16, u16)> {
    intervals.sort_unstable_by(|a, b| b.0.cmp(&a.0));

    let mut merged: Vec<(u16, u16)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        let mut current = (start, end);
        while let Some(&(top_start, top_end)) = merged.last() {
            if u32::from(top_start) <= u32::from(current.1) + 1 {
                current = (current.0.min(top_start), current.1.max(top_end));
                merged.pop();
            } else {
                break;
            }
        }
        merged.push(current);
    }
    merged
}

/// Minimal port rules covering every `protocol` range of `services`.
pub fn aggregate<'a, I>(services: I, protocol: Protocol) -> Vec<PortRule>
where
    I: IntoIterator<Item = &'a Service>,
{
    let intervals: Vec<(u16, u16)> = services
        .into_iter()
        .flat_map(|s| s.ports.iter())
        .filter(|p: &&PortRange| p.protocol == protocol)
        .map(|p| (p.start, p.end))
        .collect();

    merge_intervals(intervals)
        .into_iter()
        .map(|(start, end)| {
            if start == end {
                PortRule::Single(start)
            } else {
                PortRule::Range(start, end)
            }
        })
        .collect()
}

/// Ingress rules for the security group of `role`.
///
/// Internal services are opened to `internal_cidr`, public ones to [`ANYWHERE`].
pub fn ingress_plan(role: Role, features: &[String], internal_cidr: &str) -> Vec<IngressRule> {
    let services: Vec<&Service> = services_for(role, features).collect();
    let mut rules = Vec::new();

    for (exposure, cidr) in [(Exposure::Internal, internal_cidr), (Exposure::Public, ANYWHERE)] {
        let exposed: Vec<&Service> = services
            .iter()
            .copied()
            .filter(|s| s.exposure == exposure)
            .collect();
        for protocol in [Protocol::Tcp, Protocol::Udp] {
            for rule in aggregate(exposed.iter().copied(), protocol) {
                let (from_port, to_port) = rule.bounds();
                rules.push(IngressRule {
                    protocol,
                    from_port,
                    to_port,
                    cidr: cidr.to_string(),
                });
            }
        }
    }
    rules
}

/// Ingress rules for the load balancer group.
pub fn load_balancer_plan() -> Vec<IngressRule> {
    [80u16, 443]
        .into_iter()
        .map(|port| IngressRule {
            protocol: Protocol::Tcp,
            from_port: port,
            to_port: port,
            cidr: ANYWHERE.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn sorted(mut v: Vec<(u16, u16)>) -> Vec<(u16, u16)> {
        v.sort_unstable();
        v
    }

    #[test]
    fn adjacent_intervals_merge() {
        assert_eq!(merge_intervals(vec![(10, 20), (21, 30)]), vec![(10, 30)]);
    }

    #[test]
    fn gap_of_two_stays_separate() {
        assert_eq!(
            sorted(merge_intervals(vec![(10, 20), (22, 30)])),
            vec![(10, 20), (22, 30)]
        );
    }

    #[test]
    fn nested_interval_is_absorbed() {
        assert_eq!(merge_intervals(vec![(10, 30), (15, 20)]), vec![(10, 30)]);
    }

    #[test]
    fn wide_interval_absorbs_already_emitted_ones() {
        assert_eq!(
            merge_intervals(vec![(50, 60), (40, 45), (10, 100)]),
            vec![(10, 100)]
        );
    }

    #[test]
    fn top_of_port_space_does_not_overflow() {
        assert_eq!(
            merge_intervals(vec![(65535, 65535), (65000, 65534)]),
            vec![(65000, 65535)]
        );
    }

    #[test]
    fn rules_render_single_and_range() {
        assert_eq!(PortRule::Single(22).to_string(), "22");
        assert_eq!(PortRule::Range(2379, 2380).to_string(), "2379:2380");
    }

    #[test]
    fn quorum_rules_are_minimal() {
        let features: Vec<String> = vec![];
        let services: Vec<&Service> = services_for(Role::Quorum, &features).collect();
        let mut rules = aggregate(services, Protocol::Tcp);
        rules.sort_by_key(PortRule::bounds);
        assert_eq!(
            rules,
            vec![
                PortRule::Single(22),
                PortRule::Single(2181),
                PortRule::Range(2379, 2380),
                PortRule::Single(2888),
                PortRule::Single(3888),
            ]
        );
    }

    #[test]
    fn border_plan_splits_internal_and_public() {
        let plan = ingress_plan(Role::Border, &[], "10.136.0.0/16");
        let public: BTreeSet<(Protocol, u16, u16)> = plan
            .iter()
            .filter(|r| r.cidr == ANYWHERE)
            .map(|r| (r.protocol, r.from_port, r.to_port))
            .collect();
        assert!(public.contains(&(Protocol::Tcp, 22, 22)));
        assert!(public.contains(&(Protocol::Tcp, 80, 80)));
        assert!(public.contains(&(Protocol::Tcp, 443, 443)));
        assert!(public.contains(&(Protocol::Udp, 1194, 1194)));
        assert!(plan
            .iter()
            .any(|r| r.cidr == "10.136.0.0/16" && r.from_port == 9090 && r.to_port == 9091));
    }

    #[test]
    fn worker_udp_task_ports() {
        let plan = ingress_plan(Role::Worker, &["insight".to_string()], "10.0.0.0/16");
        let udp: Vec<_> = plan.iter().filter(|r| r.protocol == Protocol::Udp).collect();
        assert_eq!(udp.len(), 1);
        assert_eq!((udp[0].from_port, udp[0].to_port), (31000, 32000));
    }

    proptest! {
        #[test]
        fn merged_intervals_cover_exactly_the_input(
            input in proptest::collection::vec((0u16..200, 0u16..20), 0..20)
        ) {
            let intervals: Vec<(u16, u16)> = input.iter().map(|(s, len)| (*s, s + len)).collect();
            let merged = merge_intervals(intervals.clone());

            let covered = |set: &[(u16, u16)]| -> BTreeSet<u16> {
                set.iter().flat_map(|(s, e)| *s..=*e).collect()
            };
            prop_assert_eq!(covered(&merged), covered(&intervals));

            let mut out = merged.clone();
            out.sort_unstable();
            for pair in out.windows(2) {
                prop_assert!(u32::from(pair[0].1) + 1 < u32::from(pair[1].0));
            }
        }
    }
}
