//! Cluster membership types

use serde::{Deserialize, Serialize};

/// Identifier assigned to a member by the membership service
pub type MemberId = u64;

/// Sort a copy of an endpoint list so it can be compared as a set.
pub fn canonical_endpoints(urls: &[String]) -> Vec<String> {
    let mut sorted = urls.to_vec();
    sorted.sort();
    sorted
}

/// Compare two endpoint lists as unordered sets of strings.
///
/// Both sides are canonicalized by sorting and then compared element by
/// element, so `["b", "a"]` and `["a", "b"]` are the same endpoint set.
pub fn same_endpoints(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && canonical_endpoints(a) == canonical_endpoints(b)
}

/// Split a comma separated URL list, dropping blanks and surrounding whitespace
pub fn split_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// A registered participant of the consensus cluster
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterMember {
    /// Identifier assigned by the membership service
    pub id: MemberId,
    /// Member name; empty until the member has started and advertised itself
    pub name: String,
    /// URLs used for inter-member traffic
    pub peer_urls: Vec<String>,
    /// URLs used by external callers
    pub client_urls: Vec<String>,
    /// Non-voting member
    pub is_learner: bool,
}

impl ClusterMember {
    /// Create a named voting member
    pub fn new(id: MemberId, name: impl Into<String>, peer_urls: Vec<String>) -> Self {
        Self {
            id,
            name: name.into(),
            peer_urls,
            client_urls: Vec::new(),
            is_learner: false,
        }
    }

    /// Registered but not yet started: the service knows it only by its peer URLs
    pub fn is_unnamed(&self) -> bool {
        self.name.is_empty()
    }

    /// True if this member advertises exactly the given peer endpoint set
    pub fn has_peer_urls(&self, peer_urls: &[String]) -> bool {
        same_endpoints(&self.peer_urls, peer_urls)
    }
}

/// A point-in-time read of the whole cluster's membership
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    pub members: Vec<ClusterMember>,
}

impl MembershipSnapshot {
    pub fn new(members: Vec<ClusterMember>) -> Self {
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClusterMember> {
        self.members.iter()
    }

    /// Find a member by identifier
    pub fn get(&self, id: MemberId) -> Option<&ClusterMember> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Number of voting members
    pub fn voter_count(&self) -> usize {
        self.members.iter().filter(|m| !m.is_learner).count()
    }

    /// Unnamed members whose peer endpoints differ from `own_peer_urls`,
    /// i.e. registrations of some other node that are still in flight
    pub fn foreign_pending<'a>(
        &'a self,
        own_peer_urls: &'a [String],
    ) -> impl Iterator<Item = &'a ClusterMember> + 'a {
        self.members
            .iter()
            .filter(move |m| m.is_unnamed() && !m.has_peer_urls(own_peer_urls))
    }
}

impl<'a> IntoIterator for &'a MembershipSnapshot {
    type Item = &'a ClusterMember;
    type IntoIter = std::slice::Iter<'a, ClusterMember>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_endpoint_sets_ignore_order() {
        assert!(same_endpoints(
            &urls(&["http://b:2380", "http://a:2380"]),
            &urls(&["http://a:2380", "http://b:2380"])
        ));
        assert!(!same_endpoints(
            &urls(&["http://a:2380"]),
            &urls(&["http://a:2380", "http://b:2380"])
        ));
        assert!(!same_endpoints(&urls(&["http://a:2380"]), &urls(&["http://c:2380"])));
    }

    #[test]
    fn test_split_urls() {
        assert_eq!(
            split_urls(" http://a:2379, ,http://b:2379 "),
            urls(&["http://a:2379", "http://b:2379"])
        );
        assert!(split_urls("").is_empty());
    }

    #[test]
    fn test_snapshot_queries() {
        let mut learner = ClusterMember::new(4, "", urls(&["http://d:2380"]));
        learner.is_learner = true;
        let snapshot = MembershipSnapshot::new(vec![
            ClusterMember::new(1, "a", urls(&["http://a:2380"])),
            ClusterMember::new(2, "b", urls(&["http://b:2380"])),
            learner,
        ]);

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.voter_count(), 2);
        assert_eq!(snapshot.get(2).map(|m| m.name.as_str()), Some("b"));
        assert!(snapshot.get(9).is_none());

        let own = urls(&["http://d:2380"]);
        assert_eq!(snapshot.foreign_pending(&own).count(), 0);
        let other = urls(&["http://e:2380"]);
        assert_eq!(snapshot.foreign_pending(&other).count(), 1);
    }
}
