use crate::tags::TagSet;

/// Tag predicate attached to a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TagFilter {
    pub any_of: &'static [&'static str],
    pub none_of: &'static [&'static str],
    pub all_of: &'static [&'static str],
}

impl TagFilter {
    /// Matches every tag set.
    pub const ALWAYS: TagFilter = TagFilter {
        any_of: &[],
        none_of: &[],
        all_of: &[],
    };

    pub const fn any_of(tags: &'static [&'static str]) -> Self {
        TagFilter {
            any_of: tags,
            none_of: &[],
            all_of: &[],
        }
    }

    pub const fn none_of(mut self, tags: &'static [&'static str]) -> Self {
        self.none_of = tags;
        self
    }

    pub const fn all_of(mut self, tags: &'static [&'static str]) -> Self {
        self.all_of = tags;
        self
    }

    /// An empty `any_of` list is vacuously satisfied.
    pub fn matches(&self, active: &TagSet) -> bool {
        let any = self.any_of.is_empty() || self.any_of.iter().any(|t| active.contains(t));
        let none = !self.none_of.iter().any(|t| active.contains(t));
        let all = self.all_of.iter().all(|t| active.contains(t));
        any && none && all
    }
}

/// A tag-gated unit of boot configuration template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub name: &'static str,
    pub filter: TagFilter,
    pub text: &'static str,
}

/// Concatenates, in declaration order, the text of every fragment whose filter matches.
pub fn select(fragments: &[Fragment], active: &TagSet) -> String {
    let mut out = String::new();
    for fragment in fragments {
        if fragment.filter.matches(active) {
            tracing::trace!("including fragment {}", fragment.name);
            out.push_str(fragment.text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> TagSet {
        list.iter().collect()
    }

    #[test]
    fn any_of_with_none_of() {
        let filter = TagFilter::any_of(&["master"]).none_of(&["worker"]);
        assert!(filter.matches(&tags(&["master", "ec2"])));
        assert!(!filter.matches(&tags(&["master", "worker"])));
    }

    #[test]
    fn empty_any_of_is_vacuously_satisfied() {
        assert!(TagFilter::ALWAYS.matches(&TagSet::new()));
        assert!(TagFilter::ALWAYS.matches(&tags(&["border"])));

        let filter = TagFilter::ALWAYS.none_of(&["packet"]);
        assert!(filter.matches(&tags(&["ec2"])));
        assert!(!filter.matches(&tags(&["packet"])));
    }

    #[test]
    fn all_of_requires_every_tag() {
        let filter = TagFilter::any_of(&["master", "worker"]).all_of(&["prometheus", "ec2"]);
        assert!(filter.matches(&tags(&["worker", "prometheus", "ec2"])));
        assert!(!filter.matches(&tags(&["worker", "prometheus"])));
        assert!(!filter.matches(&tags(&["prometheus", "ec2"])));
    }

    #[test]
    fn select_keeps_declaration_order() {
        const FRAGMENTS: &[Fragment] = &[
            Fragment {
                name: "a",
                filter: TagFilter::ALWAYS,
                text: "a\n",
            },
            Fragment {
                name: "b",
                filter: TagFilter::any_of(&["worker"]),
                text: "b\n",
            },
            Fragment {
                name: "c",
                filter: TagFilter::any_of(&["quorum"]),
                text: "c\n",
            },
        ];
        assert_eq!(select(FRAGMENTS, &tags(&["quorum"])), "a\nc\n");
        assert_eq!(select(FRAGMENTS, &tags(&["quorum", "worker"])), "a\nb\nc\n");
    }
}
