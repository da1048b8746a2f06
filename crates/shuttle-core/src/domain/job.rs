//! Dataset and job records.
//!
//! The scheduler only owns their status; everything else about a dataset or
//! job (config, submitter, ...) lives upstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DatasetId, JobId};
use super::status::{DatasetStatus, JobStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub dataset_id: DatasetId,
    pub status: DatasetStatus,
    pub status_changed: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub dataset_id: DatasetId,
    pub status: JobStatus,
    pub status_changed: DateTime<Utc>,
}
