//! Ready/running task lists, organized by priority class and by
//! hardware-vs-software type.
//!
//! A task lives in exactly one bucket from admission until its terminal
//! wrap-up. Buckets are FIFO; the selection loop walks a bucket in
//! order and takes the first ready task, which preserves submission
//! order within one priority/type class.

use std::collections::VecDeque;

use crate::types::{Priority, TaskId, TaskType};

pub(crate) struct QueueMatrix {
    buckets: [[VecDeque<TaskId>; TaskType::COUNT]; Priority::COUNT],
}

impl QueueMatrix {
    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
        }
    }

    pub fn push(&mut self, priority: Priority, task_type: TaskType, id: TaskId) {
        self.buckets[priority.index()][task_type.index()].push_back(id);
    }

    pub fn remove(&mut self, priority: Priority, task_type: TaskType, id: TaskId) {
        self.buckets[priority.index()][task_type.index()].retain(|&t| t != id);
    }

    pub fn bucket(&self, priority: Priority, task_type: TaskType) -> &VecDeque<TaskId> {
        &self.buckets[priority.index()][task_type.index()]
    }

    #[cfg(test)]
    pub fn total_len(&self) -> usize {
        self.buckets
            .iter()
            .flat_map(|row| row.iter())
            .map(VecDeque::len)
            .sum()
    }

    pub fn clear(&mut self) {
        self.buckets
            .iter_mut()
            .flat_map(|row| row.iter_mut())
            .for_each(VecDeque::clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_within_bucket() {
        let mut queues = QueueMatrix::new();
        queues.push(Priority::High, TaskType::Software, 1);
        queues.push(Priority::High, TaskType::Software, 2);
        queues.push(Priority::High, TaskType::Software, 3);
        let order: Vec<_> = queues
            .bucket(Priority::High, TaskType::Software)
            .iter()
            .copied()
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn remove_targets_single_bucket() {
        let mut queues = QueueMatrix::new();
        queues.push(Priority::High, TaskType::Hardware, 1);
        queues.push(Priority::Low, TaskType::Hardware, 2);
        assert_eq!(queues.total_len(), 2);

        queues.remove(Priority::High, TaskType::Hardware, 1);
        assert_eq!(queues.total_len(), 1);
        assert_eq!(queues.bucket(Priority::Low, TaskType::Hardware).front(), Some(&2));
    }
}
