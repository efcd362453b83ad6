//! Version vectors for container-level divergence detection.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How two version vectors relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Causality {
    Equal,
    /// `self` has seen everything `other` has, and more.
    Ahead,
    /// `other` has seen everything `self` has, and more.
    Behind,
    /// Both sides have changes the other has not seen.
    Concurrent,
}

/// Replica id → number of commits that replica has made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector(BTreeMap<String, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, replica: &str) -> u64 {
        self.0.get(replica).copied().unwrap_or(0)
    }

    /// Record one more local commit by `replica`.
    pub fn bump(&mut self, replica: &str) {
        *self.0.entry(replica.to_string()).or_insert(0) += 1;
    }

    /// Pointwise maximum.
    pub fn merge(&mut self, other: &Self) {
        for (replica, &counter) in &other.0 {
            let entry = self.0.entry(replica.clone()).or_insert(0);
            *entry = (*entry).max(counter);
        }
    }

    pub fn compare(&self, other: &Self) -> Causality {
        let mut ordering = Ordering::Equal;
        for replica in self.0.keys().chain(other.0.keys()) {
            match (self.get(replica).cmp(&other.get(replica)), ordering) {
                (Ordering::Equal, _) => {}
                (step, Ordering::Equal) => ordering = step,
                (step, current) if step != current => return Causality::Concurrent,
                _ => {}
            }
        }
        match ordering {
            Ordering::Equal => Causality::Equal,
            Ordering::Greater => Causality::Ahead,
            Ordering::Less => Causality::Behind,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_covers_all_cases() {
        let mut a = VersionVector::new();
        let mut b = VersionVector::new();
        assert_eq!(a.compare(&b), Causality::Equal);

        a.bump("a");
        assert_eq!(a.compare(&b), Causality::Ahead);
        assert_eq!(b.compare(&a), Causality::Behind);

        b.bump("b");
        assert_eq!(a.compare(&b), Causality::Concurrent);

        a.merge(&b);
        assert_eq!(a.compare(&b), Causality::Ahead);
        b.merge(&a);
        assert_eq!(a.compare(&b), Causality::Equal);
    }

    #[test]
    fn serializes_as_plain_map() {
        let mut v = VersionVector::new();
        v.bump("laptop");
        v.bump("laptop");
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"laptop":2}"#);
    }
}
