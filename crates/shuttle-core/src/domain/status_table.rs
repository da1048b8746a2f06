//! Transition validator: reverse-edge tables over the status graphs.
//!
//! Design:
//! - `StatusTable<S>` is built once from the static graph and is read-only afterwards.
//! - `prev(X)` = every state that has `X` among its successors.
//! - The three tables are bundled in `StatusTables` and shared by reference
//!   (the scheduler holds an `Arc<StatusTables>`), so no global cache is needed.

use std::collections::HashMap;

use super::status::{DatasetStatus, JobStatus, Status, TaskStatus};

/// Reverse index of one status graph.
#[derive(Debug, Clone)]
pub struct StatusTable<S: Status> {
    prev: HashMap<S, Vec<S>>,
}

impl<S: Status> StatusTable<S> {
    pub fn build() -> Self {
        let mut prev: HashMap<S, Vec<S>> = S::ALL.iter().map(|&s| (s, Vec::new())).collect();
        for &from in S::ALL {
            for &to in from.successors() {
                prev.entry(to).or_default().push(from);
            }
        }
        Self { prev }
    }

    /// Legal predecessors of `target`, in graph order.
    pub fn prev(&self, target: S) -> &[S] {
        self.prev.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Is `from -> to` an edge of the graph?
    pub fn allows(&self, from: S, to: S) -> bool {
        self.prev(to).contains(&from)
    }
}

impl<S: Status> Default for StatusTable<S> {
    fn default() -> Self {
        Self::build()
    }
}

/// All three tables, built together at startup.
#[derive(Debug, Clone, Default)]
pub struct StatusTables {
    pub dataset: StatusTable<DatasetStatus>,
    pub job: StatusTable<JobStatus>,
    pub task: StatusTable<TaskStatus>,
}

impl StatusTables {
    pub fn build() -> Self {
        Self {
            dataset: StatusTable::build(),
            job: StatusTable::build(),
            task: StatusTable::build(),
        }
    }
}
