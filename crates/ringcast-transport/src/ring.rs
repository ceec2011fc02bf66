use std::collections::BTreeMap;

use parking_lot::RwLock;
use ringcast_core::KeyPoint;

/// Resolves a subject's rendezvous point to the node responsible for it.
pub trait Rendezvous: Send + Sync {
    fn resolve_rendezvous(&self, point: &KeyPoint) -> Option<String>;
}

/// Flat view of ring membership, closest-point lookup.
///
/// A node is responsible for every point to which its own key is nearest
/// by [`KeyPoint::distance`]; ties go to the smaller key.
#[derive(Debug, Default)]
pub struct RingDirectory {
    members: RwLock<BTreeMap<KeyPoint, String>>,
}

impl RingDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, point: KeyPoint, node_id: impl Into<String>) {
        self.members.write().insert(point, node_id.into());
    }

    pub fn leave(&self, point: &KeyPoint) -> Option<String> {
        self.members.write().remove(point)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Up to `count` member ids ordered by distance from `point`.
    pub fn neighbors(&self, point: &KeyPoint, count: usize) -> Vec<String> {
        let members = self.members.read();
        let mut ranked: Vec<(KeyPoint, &KeyPoint, &String)> = members
            .iter()
            .map(|(key, id)| (key.distance(point), key, id))
            .collect();
        ranked.sort();
        ranked
            .into_iter()
            .take(count)
            .map(|(_, _, id)| id.clone())
            .collect()
    }
}

impl Rendezvous for RingDirectory {
    fn resolve_rendezvous(&self, point: &KeyPoint) -> Option<String> {
        let members = self.members.read();
        members
            .iter()
            .min_by(|(a, _), (b, _)| a.distance(point).cmp(&b.distance(point)).then(a.cmp(b)))
            .map(|(_, id)| id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{Rendezvous, RingDirectory};
    use ringcast_core::KeyPoint;

    fn point(low: u64) -> KeyPoint {
        KeyPoint::from_words([0, 0, 0, low])
    }

    #[test]
    fn resolves_to_closest_member() {
        let ring = RingDirectory::new();
        ring.join(point(10), "a");
        ring.join(point(100), "b");
        ring.join(point(1000), "c");

        assert_eq!(ring.resolve_rendezvous(&point(40)), Some("a".to_string()));
        assert_eq!(ring.resolve_rendezvous(&point(70)), Some("b".to_string()));
        assert_eq!(ring.resolve_rendezvous(&point(5000)), Some("c".to_string()));
        // tie at 55 goes to the smaller key
        assert_eq!(ring.resolve_rendezvous(&point(55)), Some("a".to_string()));
    }

    #[test]
    fn independent_directories_agree_on_subject_owner() {
        let one = RingDirectory::new();
        let two = RingDirectory::new();
        for (idx, name) in ["n1", "n2", "n3", "n4"].iter().enumerate() {
            let key = KeyPoint::from_string(&format!("host-{idx}"));
            one.join(key, *name);
            two.join(key, *name);
        }
        let subject = KeyPoint::from_string("topic-x");
        assert_eq!(one.resolve_rendezvous(&subject), two.resolve_rendezvous(&subject));
    }

    #[test]
    fn empty_ring_resolves_nothing_and_leave_shrinks() {
        let ring = RingDirectory::new();
        assert!(ring.resolve_rendezvous(&point(1)).is_none());
        ring.join(point(1), "a");
        ring.join(point(9), "b");
        assert_eq!(ring.neighbors(&point(8), 2), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(ring.leave(&point(9)), Some("b".to_string()));
        assert_eq!(ring.len(), 1);
    }
}
