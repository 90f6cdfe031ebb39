//! Flat table of in-flight producer/consumer resources.
//!
//! Each live entry says "this resource will be produced by that task".
//! Consumers link themselves to the entry at admission time, so
//! producers never need to know their consumers in advance. The table
//! is a fixed-capacity linear-scan array (bounded by twice the task
//! capacity), which keeps lookups trivially correct for the small
//! dependency counts codec pipelines declare.

use takt_core::SchedError;

use crate::types::{Handle, ResourceId, TaskId};

/// Result status of a pending resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DepStatus {
    /// The producer has not reached a terminal status yet.
    InExecution,
    /// The producer failed; consumers inherit this status instead of
    /// running. Kept visible until the entry is replaced or purged.
    Failed(SchedError),
}

#[derive(Debug)]
struct DepEntry {
    resource: ResourceId,
    producer: Handle,
    status: DepStatus,
    /// Tasks blocked on this resource, generation-checked at notify time.
    dependents: Vec<Handle>,
}

/// Outcome of linking a consumer to a source resource.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SourceLink {
    /// No pending producer; the input counts as resolved.
    Resolved,
    /// Linked to a live producer; the consumer gains one unresolved input.
    Linked,
    /// The producer already failed; the consumer inherits this status.
    Failed(SchedError),
}

pub(crate) struct DependencyTable {
    entries: Vec<Option<DepEntry>>,
}

impl DependencyTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: (0..capacity).map(|_| None).collect(),
        }
    }

    fn find(&self, resource: ResourceId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.resource == resource))
    }

    /// Link `consumer` to the pending producer of `resource`, if any.
    pub fn register_source(&mut self, resource: ResourceId, consumer: Handle) -> SourceLink {
        match self.find(resource) {
            None => SourceLink::Resolved,
            Some(idx) => {
                let entry = self.entries[idx].as_mut().unwrap();
                match entry.status {
                    DepStatus::InExecution => {
                        entry.dependents.push(consumer);
                        SourceLink::Linked
                    }
                    DepStatus::Failed(err) => SourceLink::Failed(err),
                }
            }
        }
    }

    /// Record that `producer` will produce `resource`. At most one live
    /// entry may exist per resource; a pending duplicate is a caller
    /// error, while a failed leftover is replaced.
    pub fn insert_output(&mut self, resource: ResourceId, producer: Handle) -> Result<(), SchedError> {
        if let Some(idx) = self.find(resource) {
            let entry = self.entries[idx].as_ref().unwrap();
            match entry.status {
                DepStatus::InExecution => {
                    return Err(SchedError::InvalidParam("duplicate pending destination resource"));
                }
                DepStatus::Failed(_) => self.entries[idx] = None,
            }
        }

        let free = match self.entries.iter().position(Option::is_none) {
            Some(i) => i,
            // Purge observed failures before giving up; the design
            // bounds live pending entries by task capacity.
            None => {
                self.purge_failed();
                self.entries.iter().position(Option::is_none).ok_or(SchedError::Busy)?
            }
        };
        self.entries[free] = Some(DepEntry {
            resource,
            producer,
            status: DepStatus::InExecution,
            dependents: Vec::new(),
        });
        Ok(())
    }

    /// Mark all of `producer`'s pending outputs terminal and return the
    /// consumers to notify. Successful outputs are removed outright;
    /// failed outputs stay visible so late consumers inherit the error.
    pub fn complete_outputs(&mut self, producer: TaskId, failure: Option<SchedError>) -> Vec<Handle> {
        let mut notified = Vec::new();
        for slot in &mut self.entries {
            let produced_here = slot
                .as_ref()
                .is_some_and(|e| e.producer.task == producer && e.status == DepStatus::InExecution);
            if !produced_here {
                continue;
            }
            match failure {
                None => {
                    let entry = slot.take().unwrap();
                    notified.extend(entry.dependents);
                }
                Some(err) => {
                    let entry = slot.as_mut().unwrap();
                    entry.status = DepStatus::Failed(err);
                    notified.append(&mut entry.dependents);
                }
            }
        }
        notified
    }

    /// Current pending producer of `resource`, if any.
    pub fn producer_of(&self, resource: ResourceId) -> Option<Handle> {
        self.find(resource).and_then(|idx| {
            let entry = self.entries[idx].as_ref().unwrap();
            (entry.status == DepStatus::InExecution).then_some(entry.producer)
        })
    }

    /// Drop entries whose failure has already been propagated.
    pub fn purge_failed(&mut self) {
        for slot in &mut self.entries {
            if slot.as_ref().is_some_and(|e| matches!(e.status, DepStatus::Failed(_))) {
                *slot = None;
            }
        }
    }

    /// No pending (in-execution) entries remain.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries
            .iter()
            .all(|e| !e.as_ref().is_some_and(|e| e.status == DepStatus::InExecution))
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(task: TaskId) -> Handle {
        Handle { task, job: 1 }
    }

    #[test]
    fn source_without_producer_is_resolved() {
        let mut table = DependencyTable::new(4);
        assert_eq!(table.register_source(ResourceId(1), handle(0)), SourceLink::Resolved);
    }

    #[test]
    fn link_then_complete_notifies_dependents() {
        let mut table = DependencyTable::new(4);
        table.insert_output(ResourceId(1), handle(0)).unwrap();
        assert_eq!(table.register_source(ResourceId(1), handle(1)), SourceLink::Linked);
        assert_eq!(table.register_source(ResourceId(1), handle(2)), SourceLink::Linked);

        let notified = table.complete_outputs(0, None);
        assert_eq!(notified, vec![handle(1), handle(2)]);
        assert!(table.is_empty(), "successful outputs must leave the table");
        assert!(table.producer_of(ResourceId(1)).is_none());
    }

    #[test]
    fn failure_stays_visible_for_late_consumers() {
        let mut table = DependencyTable::new(4);
        table.insert_output(ResourceId(7), handle(0)).unwrap();
        let notified = table.complete_outputs(0, Some(SchedError::Unknown));
        assert!(notified.is_empty());

        assert_eq!(
            table.register_source(ResourceId(7), handle(3)),
            SourceLink::Failed(SchedError::Unknown)
        );
        // a failed leftover is no longer "pending"
        assert!(table.is_empty());
        assert!(table.producer_of(ResourceId(7)).is_none());
    }

    #[test]
    fn duplicate_pending_destination_rejected() {
        let mut table = DependencyTable::new(4);
        table.insert_output(ResourceId(1), handle(0)).unwrap();
        assert_eq!(
            table.insert_output(ResourceId(1), handle(1)),
            Err(SchedError::InvalidParam("duplicate pending destination resource"))
        );
    }

    #[test]
    fn failed_leftover_is_replaced_by_new_producer() {
        let mut table = DependencyTable::new(4);
        table.insert_output(ResourceId(1), handle(0)).unwrap();
        table.complete_outputs(0, Some(SchedError::Aborted));
        table.insert_output(ResourceId(1), handle(5)).unwrap();
        assert_eq!(table.producer_of(ResourceId(1)), Some(handle(5)));
    }

    #[test]
    fn capacity_exhaustion_reports_busy() {
        let mut table = DependencyTable::new(2);
        table.insert_output(ResourceId(1), handle(0)).unwrap();
        table.insert_output(ResourceId(2), handle(1)).unwrap();
        assert_eq!(
            table.insert_output(ResourceId(3), handle(2)),
            Err(SchedError::Busy)
        );

        // failed entries are purged to make room
        table.complete_outputs(0, Some(SchedError::Unknown));
        table.insert_output(ResourceId(3), handle(2)).unwrap();
    }
}
