//! Deduplicated per-work-identity concurrency state.
//!
//! Every admitted task references exactly one entry here, keyed by its
//! opaque [`WorkIdentity`]. The entry pins the threading policy for the
//! identity (mismatches are rejected at admission) and, for INTRA
//! identities, remembers the most recently submitted task so the next
//! one can be chained behind it.

use takt_core::SchedError;

use crate::types::{Handle, ThreadingPolicy, WorkIdentity};

#[derive(Debug)]
struct OccEntry {
    identity: WorkIdentity,
    policy: ThreadingPolicy,
    thread_count: u32,
    /// Live tasks referencing this entry.
    refs: u32,
    /// Most recent INTRA task of this identity, chained as an implicit
    /// predecessor of the next submission.
    last_intra: Option<Handle>,
}

pub(crate) struct OccupancyTable {
    entries: Vec<OccEntry>,
    capacity: usize,
}

impl OccupancyTable {
    pub fn new(capacity: usize) -> Self {
        Self { entries: Vec::new(), capacity }
    }

    /// Look up (or create) the entry for `identity`, bumping its
    /// reference count. Policy or thread-count conflicts with live
    /// tasks of the same identity are rejected without mutating state.
    pub fn index_for(
        &mut self,
        identity: WorkIdentity,
        policy: ThreadingPolicy,
        thread_count: u32,
    ) -> Result<usize, SchedError> {
        if let Some(idx) = self.entries.iter().position(|e| e.identity == identity) {
            let entry = &mut self.entries[idx];
            if entry.refs > 0 {
                if entry.policy != policy {
                    return Err(SchedError::InvalidParam("threading policy conflict for work identity"));
                }
                if entry.thread_count != thread_count {
                    return Err(SchedError::InvalidParam("thread count conflict for work identity"));
                }
            } else {
                // idle entry: the identity may be resubmitted under a
                // different policy
                entry.policy = policy;
                entry.thread_count = thread_count;
                if policy != ThreadingPolicy::Intra {
                    entry.last_intra = None;
                }
            }
            entry.refs += 1;
            return Ok(idx);
        }

        // reuse an idle entry in place so live indices stay stable
        if let Some(idx) = self.entries.iter().position(|e| e.refs == 0) {
            self.entries[idx] = OccEntry {
                identity,
                policy,
                thread_count,
                refs: 1,
                last_intra: None,
            };
            return Ok(idx);
        }

        if self.entries.len() >= self.capacity {
            return Err(SchedError::Busy);
        }
        self.entries.push(OccEntry {
            identity,
            policy,
            thread_count,
            refs: 1,
            last_intra: None,
        });
        Ok(self.entries.len() - 1)
    }

    pub fn release(&mut self, idx: usize) {
        let entry = &mut self.entries[idx];
        entry.refs = entry.refs.saturating_sub(1);
        // trim idle tail entries to keep lookups short
        while self.entries.last().is_some_and(|e| e.refs == 0) {
            self.entries.pop();
        }
    }

    pub fn last_intra(&self, idx: usize) -> Option<Handle> {
        self.entries[idx].last_intra
    }

    pub fn set_last_intra(&mut self, idx: usize, handle: Handle) {
        self.entries[idx].last_intra = Some(handle);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_identity_shares_entry() {
        let mut table = OccupancyTable::new(4);
        let a = table
            .index_for(WorkIdentity(1), ThreadingPolicy::Inter, 2)
            .unwrap();
        let b = table
            .index_for(WorkIdentity(1), ThreadingPolicy::Inter, 2)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn policy_conflict_rejected() {
        let mut table = OccupancyTable::new(4);
        table
            .index_for(WorkIdentity(1), ThreadingPolicy::Inter, 2)
            .unwrap();
        assert_eq!(
            table.index_for(WorkIdentity(1), ThreadingPolicy::Intra, 1),
            Err(SchedError::InvalidParam("threading policy conflict for work identity"))
        );
        assert_eq!(
            table.index_for(WorkIdentity(1), ThreadingPolicy::Inter, 4),
            Err(SchedError::InvalidParam("thread count conflict for work identity"))
        );
    }

    #[test]
    fn idle_entry_allows_policy_change() {
        let mut table = OccupancyTable::new(4);
        let idx = table
            .index_for(WorkIdentity(1), ThreadingPolicy::Inter, 2)
            .unwrap();
        table.release(idx);
        // entry was trimmed or reset; resubmission under a new policy works
        table
            .index_for(WorkIdentity(1), ThreadingPolicy::Dedicated, 1)
            .unwrap();
    }

    #[test]
    fn exhaustion_reports_busy_after_compaction() {
        let mut table = OccupancyTable::new(2);
        let a = table
            .index_for(WorkIdentity(1), ThreadingPolicy::Inter, 1)
            .unwrap();
        table
            .index_for(WorkIdentity(2), ThreadingPolicy::Inter, 1)
            .unwrap();
        assert_eq!(
            table.index_for(WorkIdentity(3), ThreadingPolicy::Inter, 1),
            Err(SchedError::Busy)
        );

        // freeing one identity makes room for another
        table.release(a);
        table
            .index_for(WorkIdentity(3), ThreadingPolicy::Inter, 1)
            .unwrap();
    }

    #[test]
    fn intra_chain_bookkeeping() {
        let mut table = OccupancyTable::new(2);
        let idx = table
            .index_for(WorkIdentity(9), ThreadingPolicy::Intra, 1)
            .unwrap();
        assert!(table.last_intra(idx).is_none());
        let h = Handle { task: 0, job: 1 };
        table.set_last_intra(idx, h);
        assert_eq!(table.last_intra(idx), Some(h));
    }
}
