//! Revision sequence and the order probes are handed out in.

use std::collections::HashMap;
use std::ops::Index;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::SearchError;

/// Immutable, oldest-first list of revisions.
///
/// Index 0 is the known-good boundary and the last index the known-bad one.
/// Clones share the same storage.
#[derive(Debug, Clone)]
pub struct RevisionSequence {
    revisions: Arc<[String]>,
    positions: Arc<HashMap<String, usize>>,
}

impl RevisionSequence {
    pub fn new(revisions: Vec<String>) -> Result<Self, SearchError> {
        if revisions.len() < 2 {
            return Err(SearchError::TooShort {
                len: revisions.len(),
            });
        }

        let mut positions = HashMap::with_capacity(revisions.len());
        for (i, revision) in revisions.iter().enumerate() {
            if positions.insert(revision.clone(), i).is_some() {
                return Err(SearchError::DuplicateRevision(revision.clone()));
            }
        }

        Ok(Self {
            revisions: revisions.into(),
            positions: Arc::new(positions),
        })
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    /// Always false; a sequence holds at least two revisions.
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.revisions.get(index).map(String::as_str)
    }

    pub fn index_of(&self, revision: &str) -> Option<usize> {
        self.positions.get(revision).copied()
    }

    pub fn good(&self) -> &str {
        &self.revisions[0]
    }

    pub fn bad(&self) -> &str {
        &self.revisions[self.revisions.len() - 1]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.revisions
    }
}

impl Index<usize> for RevisionSequence {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.revisions[index]
    }
}

/// Fixed permutation of every index of a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOrder {
    indices: Vec<usize>,
}

impl ProbeOrder {
    /// Deterministic shuffle of `0..len`: the same seed gives the same order.
    pub fn shuffled(len: usize, seed: u64) -> Self {
        let mut indices: Vec<usize> = (0..len).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        Self { indices }
    }

    /// Use an explicit order; it must be a permutation of `0..len`.
    pub fn from_indices(indices: Vec<usize>, len: usize) -> Result<Self, SearchError> {
        let mut seen = vec![false; len];
        for &i in &indices {
            match seen.get_mut(i) {
                Some(slot) if !*slot => *slot = true,
                _ => return Err(SearchError::InvalidOrder { len }),
            }
        }
        if indices.len() != len {
            return Err(SearchError::InvalidOrder { len });
        }
        Ok(Self { indices })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }
}

impl Index<usize> for ProbeOrder {
    type Output = usize;

    fn index(&self, position: usize) -> &usize {
        &self.indices[position]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revs(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("r{i}")).collect()
    }

    #[test]
    fn test_sequence_lookup() {
        let seq = RevisionSequence::new(revs(4)).unwrap();
        assert_eq!(seq.len(), 4);
        assert_eq!(seq.good(), "r0");
        assert_eq!(seq.bad(), "r3");
        assert_eq!(seq.index_of("r2"), Some(2));
        assert_eq!(seq.index_of("r9"), None);
        assert_eq!(&seq[1], "r1");
        assert_eq!(seq.get(4), None);
    }

    #[test]
    fn test_sequence_rejects_short_and_duplicate() {
        assert!(matches!(
            RevisionSequence::new(revs(1)),
            Err(SearchError::TooShort { len: 1 })
        ));
        assert!(matches!(
            RevisionSequence::new(vec!["a".into(), "b".into(), "a".into()]),
            Err(SearchError::DuplicateRevision(r)) if r == "a"
        ));
    }

    #[test]
    fn test_shuffle_is_a_reproducible_permutation() {
        let a = ProbeOrder::shuffled(50, 1);
        let b = ProbeOrder::shuffled(50, 1);
        assert_eq!(a, b);

        let mut sorted = a.as_slice().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());

        assert_ne!(a, ProbeOrder::shuffled(50, 2));
    }

    #[test]
    fn test_from_indices_validates_permutation() {
        assert!(ProbeOrder::from_indices(vec![2, 0, 1], 3).is_ok());
        assert!(ProbeOrder::from_indices(vec![0, 0, 1], 3).is_err());
        assert!(ProbeOrder::from_indices(vec![0, 1], 3).is_err());
        assert!(ProbeOrder::from_indices(vec![0, 1, 3], 3).is_err());
    }
}
