//! Peer-list helpers used while rendering boot configuration templates.
//!
//! Every helper joins the listed member host names with a separator and never
//! emits a leading or trailing separator. Zero members yield an empty string.

/// Internal DNS name of the `id`-th host sharing `prefix`.
pub fn internal_fqdn(prefix: &str, id: usize, domain: &str) -> String {
    format!("{}-{}.int.{}", prefix, id, domain)
}

/// External DNS name of the `id`-th host sharing `prefix`.
pub fn external_fqdn(prefix: &str, id: usize, domain: &str) -> String {
    format!("{}-{}.ext.{}", prefix, id, domain)
}

/// Internal DNS name of a member host name such as `quorum-2`.
pub fn member_fqdn(member: &str, domain: &str) -> String {
    format!("{}.int.{}", member, domain)
}

/// Joins `member(index, name)` over `members` with `sep`; indexes are 1-based.
pub fn join_members<F>(members: &[String], sep: &str, member: F) -> String
where
    F: Fn(usize, &str) -> String,
{
    members
        .iter()
        .enumerate()
        .map(|(i, name)| member(i + 1, name))
        .collect::<Vec<_>>()
        .join(sep)
}

/// `quorum-1=http://quorum-1.int.example.com:2380,...` for etcd static bootstrap.
pub fn etcd_initial_cluster(members: &[String], domain: &str) -> String {
    join_members(members, ",", |_, name| {
        format!("{}=http://{}:2380", name, member_fqdn(name, domain))
    })
}

/// Client URLs of every quorum member.
pub fn etcd_endpoints(members: &[String], domain: &str) -> String {
    join_members(members, ",", |_, name| {
        format!("http://{}:2379", member_fqdn(name, domain))
    })
}

/// `host:2181,...` connection string for the coordination service.
pub fn zk_servers(members: &[String], domain: &str) -> String {
    join_members(members, ",", |_, name| {
        format!("{}:2181", member_fqdn(name, domain))
    })
}

/// `server.N=host:2888:3888` ensemble definition, one member per `sep`.
pub fn zk_ensemble(members: &[String], domain: &str, sep: &str) -> String {
    join_members(members, sep, |i, name| {
        format!("server.{}={}:2888:3888", i, member_fqdn(name, domain))
    })
}

/// `zk://.../mesos` url, empty when there are no quorum members.
pub fn mesos_zk_url(members: &[String], domain: &str) -> String {
    if members.is_empty() {
        return String::new();
    }
    format!("zk://{}/mesos", zk_servers(members, domain))
}

/// `host:5050,...` list of scheduler masters.
pub fn master_endpoints(members: &[String], domain: &str) -> String {
    join_members(members, ",", |_, name| {
        format!("{}:5050", member_fqdn(name, domain))
    })
}

/// Indents every non-empty line of `text` by `spaces`.
pub fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn members(prefix: &str, count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("{}-{}", prefix, i)).collect()
    }

    #[test]
    fn zero_members_is_empty() {
        let none: Vec<String> = Vec::new();
        assert_eq!(etcd_initial_cluster(&none, "a.lan"), "");
        assert_eq!(etcd_endpoints(&none, "a.lan"), "");
        assert_eq!(zk_servers(&none, "a.lan"), "");
        assert_eq!(zk_ensemble(&none, "a.lan", " "), "");
        assert_eq!(mesos_zk_url(&none, "a.lan"), "");
        assert_eq!(master_endpoints(&none, "a.lan"), "");
    }

    #[test]
    fn one_member_has_no_separator() {
        let quorum = members("quorum", 1);
        assert_eq!(
            etcd_initial_cluster(&quorum, "a.lan"),
            "quorum-1=http://quorum-1.int.a.lan:2380"
        );
        assert_eq!(zk_servers(&quorum, "a.lan"), "quorum-1.int.a.lan:2181");
        assert_eq!(
            mesos_zk_url(&quorum, "a.lan"),
            "zk://quorum-1.int.a.lan:2181/mesos"
        );
    }

    #[test]
    fn many_members() {
        assert_eq!(
            etcd_endpoints(&members("quorum", 3), "a.lan"),
            "http://quorum-1.int.a.lan:2379,http://quorum-2.int.a.lan:2379,http://quorum-3.int.a.lan:2379"
        );
        assert_eq!(
            zk_ensemble(&members("quorum", 2), "a.lan", " "),
            "server.1=quorum-1.int.a.lan:2888:3888 server.2=quorum-2.int.a.lan:2888:3888"
        );
        assert_eq!(
            master_endpoints(&members("master", 2), "a.lan"),
            "master-1.int.a.lan:5050,master-2.int.a.lan:5050"
        );
    }

    #[test]
    fn members_from_different_batches_keep_their_names() {
        let quorum = vec!["qa-1".to_string(), "qa-2".to_string(), "qb-1".to_string()];
        assert_eq!(
            zk_servers(&quorum, "a.lan"),
            "qa-1.int.a.lan:2181,qa-2.int.a.lan:2181,qb-1.int.a.lan:2181"
        );
        assert_eq!(
            zk_ensemble(&quorum, "a.lan", " "),
            "server.1=qa-1.int.a.lan:2888:3888 server.2=qa-2.int.a.lan:2888:3888 server.3=qb-1.int.a.lan:2888:3888"
        );
        assert!(etcd_initial_cluster(&quorum, "a.lan").ends_with("qb-1=http://qb-1.int.a.lan:2380"));
    }

    #[test]
    fn member_fqdn_matches_indexed_form() {
        assert_eq!(member_fqdn("master-3", "a.lan"), internal_fqdn("master", 3, "a.lan"));
    }

    #[test]
    fn indent_skips_blank_lines() {
        assert_eq!(indent("a\n\nb", 2), "  a\n\n  b");
        assert_eq!(indent("", 4), "");
    }

    proptest! {
        #[test]
        fn never_dangling_separator(count in 0usize..40) {
            let list = etcd_endpoints(&members("quorum", count), "x.lan");
            prop_assert!(!list.starts_with(','));
            prop_assert!(!list.ends_with(','));
            let members = if list.is_empty() { 0 } else { list.split(',').count() };
            prop_assert_eq!(members, count);
        }
    }
}
