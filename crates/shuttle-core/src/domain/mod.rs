//! Domain model (IDs, statuses, records, reports, errors).

pub mod errors;
pub mod failure;
pub mod ids;
pub mod job;
pub mod query;
pub mod report;
pub mod resources;
pub mod status;
pub mod status_table;
pub mod task;

pub use errors::{ErrorKind, SchedulerError, StoreError};
pub use failure::FailureReason;
pub use ids::{DatasetId, InstanceId, JobId, TaskId};
pub use job::{DatasetRecord, JobRecord};
pub use query::{Pick, RequirementClause, TaskChange, TaskFilter, TaskUpdate};
pub use report::{
    BulkScope, CompletionReport, DirectStatusChange, FailureReport, FailureTarget,
    ProcessingReport, QueueRequest, UpdateCount,
};
pub use resources::{RequirementValue, Requirements, Resource};
pub use status::{DatasetStatus, JobStatus, ParseStatusError, Status, TaskStatus};
pub use status_table::{StatusTable, StatusTables};
pub use task::{NewTask, TaskRecord};
