use std::collections::HashMap;

use crate::model::{ChallengeId, ChallengeRecord};

/// Read-only index over a snapshot of challenges.
///
/// Lookups never fail: a missing id is reported as `None`. The index is
/// immutable, so repeated lookups against one snapshot always agree.
#[derive(Debug, Clone, Default)]
pub struct ChallengeLookup {
    records: Vec<ChallengeRecord>,
    by_id: HashMap<ChallengeId, usize>,
}

impl ChallengeLookup {
    /// Builds the index. When an id appears twice the later record wins.
    #[must_use]
    pub fn new(records: Vec<ChallengeRecord>) -> Self {
        let mut deduped: Vec<ChallengeRecord> = Vec::with_capacity(records.len());
        let mut by_id = HashMap::with_capacity(records.len());
        for record in records {
            match by_id.get(record.id()).copied() {
                Some(idx) => deduped[idx] = record,
                None => {
                    by_id.insert(record.id().clone(), deduped.len());
                    deduped.push(record);
                }
            }
        }
        Self {
            records: deduped,
            by_id,
        }
    }

    /// Resolve a challenge by its identifier.
    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<&ChallengeRecord> {
        self.by_id.get(id).map(|&idx| &self.records[idx])
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &ChallengeRecord> {
        self.records.iter()
    }
}

impl FromIterator<ChallengeRecord> for ChallengeLookup {
    fn from_iter<T: IntoIterator<Item = ChallengeRecord>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
