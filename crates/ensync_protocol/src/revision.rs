//! Document revisions and their lineage.
//!
//! A [`Revision`] names one version of a document. A [`Lineage`] pairs a
//! revision with every revision it supersedes, which is enough to decide
//! whether two versions are ordered or concurrent without any shared clock.
//!
//! Revision hashes are content addressed: the same edit applied to the same
//! parents on two replicas yields the same revision.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

const REVISION_DOMAIN: &[u8] = b"ensync-revision-v1";

/// A single document version.
///
/// Ordering is by `(depth, hash)`; it is a total order used only for
/// deterministic tie-breaking, not for causality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Revision {
    /// Length of the longest edit chain leading to this revision.
    pub depth: u64,
    /// SHA-256 over the parents, the content digest and the tombstone flag.
    pub hash: [u8; 32],
}

impl Revision {
    /// Returns the lowercase hex form of the hash.
    pub fn hash_hex(&self) -> String {
        self.hash.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.depth, self.hash_hex())
    }
}

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps test failures readable.
        write!(f, "Revision({}-{})", self.depth, &self.hash_hex()[..12])
    }
}

impl FromStr for Revision {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidRevision(s.to_string());
        let (depth, hex) = s.split_once('-').ok_or_else(invalid)?;
        let depth: u64 = depth.parse().map_err(|_| invalid())?;
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(invalid());
        }
        let mut hash = [0u8; 32];
        for (i, byte) in hash.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Revision { depth, hash })
    }
}

/// How two lineages relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionOrder {
    /// Both name the same revision.
    Equal,
    /// `self` is superseded by the other lineage.
    Ancestor,
    /// `self` supersedes the other lineage.
    Descendant,
    /// Neither supersedes the other.
    Concurrent,
}

/// A revision plus the set of revisions it supersedes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    /// The revision this lineage describes.
    pub head: Revision,
    /// Every revision superseded by `head`.
    pub ancestors: BTreeSet<Revision>,
}

impl Lineage {
    /// Creates the first revision of a document.
    pub fn root(content_digest: &[u8; 32], deleted: bool) -> Self {
        Self::merge(&[], content_digest, deleted)
    }

    /// Creates an edit of this revision.
    pub fn child(&self, content_digest: &[u8; 32], deleted: bool) -> Self {
        Self::merge(&[self], content_digest, deleted)
    }

    /// Creates a revision that supersedes all `parents` at once.
    ///
    /// Used to resolve conflicts: the result descends from every conflicting
    /// leaf, so any replica holding those leaves will collapse them.
    pub fn merge(parents: &[&Lineage], content_digest: &[u8; 32], deleted: bool) -> Self {
        let mut ancestors = BTreeSet::new();
        for parent in parents {
            ancestors.insert(parent.head);
            ancestors.extend(parent.ancestors.iter().copied());
        }

        let depth = parents.iter().map(|p| p.head.depth).max().unwrap_or(0) + 1;

        let mut parent_hashes: Vec<[u8; 32]> = parents.iter().map(|p| p.head.hash).collect();
        parent_hashes.sort_unstable();
        parent_hashes.dedup();

        let mut hasher = Sha256::new();
        hasher.update(REVISION_DOMAIN);
        hasher.update(depth.to_be_bytes());
        hasher.update((parent_hashes.len() as u64).to_be_bytes());
        for hash in &parent_hashes {
            hasher.update(hash);
        }
        hasher.update([u8::from(deleted)]);
        hasher.update(content_digest);

        Self {
            head: Revision {
                depth,
                hash: hasher.finalize().into(),
            },
            ancestors,
        }
    }

    /// Returns true if `revision` is the head or one of its ancestors.
    pub fn contains(&self, revision: &Revision) -> bool {
        self.head == *revision || self.ancestors.contains(revision)
    }

    /// Returns true if `revision` is strictly superseded by this lineage.
    pub fn supersedes(&self, revision: &Revision) -> bool {
        self.ancestors.contains(revision)
    }

    /// Compares two lineages.
    pub fn compare(&self, other: &Lineage) -> RevisionOrder {
        if self.head == other.head {
            RevisionOrder::Equal
        } else if other.supersedes(&self.head) {
            RevisionOrder::Ancestor
        } else if self.supersedes(&other.head) {
            RevisionOrder::Descendant
        } else {
            RevisionOrder::Concurrent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn digest(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    #[test]
    fn child_descends_from_parent() {
        let root = Lineage::root(&digest(1), false);
        let child = root.child(&digest(2), false);

        assert_eq!(child.head.depth, 2);
        assert_eq!(root.compare(&child), RevisionOrder::Ancestor);
        assert_eq!(child.compare(&root), RevisionOrder::Descendant);
        assert_eq!(child.compare(&child.clone()), RevisionOrder::Equal);
    }

    #[test]
    fn sibling_edits_are_concurrent() {
        let root = Lineage::root(&digest(1), false);
        let left = root.child(&digest(2), false);
        let right = root.child(&digest(3), false);

        assert_eq!(left.compare(&right), RevisionOrder::Concurrent);
        assert_eq!(right.compare(&left), RevisionOrder::Concurrent);
    }

    #[test]
    fn identical_edits_converge() {
        let root = Lineage::root(&digest(1), false);
        assert_eq!(root.child(&digest(9), false), root.child(&digest(9), false));
        assert_ne!(
            root.child(&digest(9), false).head,
            root.child(&digest(9), true).head
        );
    }

    #[test]
    fn merge_supersedes_every_parent() {
        let root = Lineage::root(&digest(1), false);
        let left = root.child(&digest(2), false);
        let right = root.child(&digest(3), false).child(&digest(4), false);

        let merged = Lineage::merge(&[&left, &right], &digest(4), false);
        assert_eq!(merged.head.depth, 4);
        for parent in [&root, &left, &right] {
            assert_eq!(merged.compare(parent), RevisionOrder::Descendant);
        }
    }

    #[test]
    fn revision_display_roundtrip() {
        let rev = Lineage::root(&digest(7), false).head;
        let text = rev.to_string();
        assert!(text.starts_with("1-"));
        assert_eq!(text.parse::<Revision>().unwrap(), rev);
    }

    #[test]
    fn revision_parse_rejects_garbage() {
        assert!("".parse::<Revision>().is_err());
        assert!("x-00".parse::<Revision>().is_err());
        assert!("1-zz".parse::<Revision>().is_err());
    }

    fn chain(from: &Lineage, digests: &[u8]) -> Vec<Lineage> {
        let mut lineages = Vec::with_capacity(digests.len());
        let mut current = from.clone();
        for &byte in digests {
            current = current.child(&digest(byte), false);
            lineages.push(current.clone());
        }
        lineages
    }

    proptest! {
        #[test]
        fn history_orders_like_a_tree(
            trunk in prop::collection::vec(any::<u8>(), 1..6),
            left in prop::collection::vec(any::<u8>(), 1..6),
            right in prop::collection::vec(any::<u8>(), 1..6),
        ) {
            prop_assume!(left[0] != right[0]);

            let root = Lineage::root(&digest(0), false);
            let mut trunk = chain(&root, &trunk);
            trunk.insert(0, root);
            let fork = trunk.last().unwrap();
            let left = chain(fork, &left);
            let right = chain(fork, &right);

            // Every revision descends from everything before it on its path.
            for path in [&left, &right] {
                let history: Vec<_> = trunk.iter().chain(path.iter()).collect();
                for (i, later) in history.iter().enumerate() {
                    for earlier in &history[..i] {
                        prop_assert_eq!(later.compare(earlier), RevisionOrder::Descendant);
                        prop_assert_eq!(earlier.compare(later), RevisionOrder::Ancestor);
                    }
                }
            }

            // Nothing on one branch relates to anything on the other.
            for l in &left {
                for r in &right {
                    prop_assert_eq!(l.compare(r), RevisionOrder::Concurrent);
                    prop_assert_eq!(r.compare(l), RevisionOrder::Concurrent);
                }
            }

            let (left_tip, right_tip) = (left.last().unwrap(), right.last().unwrap());
            let merged = Lineage::merge(&[left_tip, right_tip], &digest(0), false);
            prop_assert_eq!(
                merged.head.depth,
                left_tip.head.depth.max(right_tip.head.depth) + 1
            );
            for lineage in trunk.iter().chain(&left).chain(&right) {
                prop_assert_eq!(merged.compare(lineage), RevisionOrder::Descendant);
            }
        }
    }
}
