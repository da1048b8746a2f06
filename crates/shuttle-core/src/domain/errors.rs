//! Errors - エラー型と分類
//!
//! 呼び出し側（HTTP 層など）は `SchedulerError::kind()` で分類を見て応答を決めます。

/// ErrorKind はエラーの運用分類
///
/// - Client: 入力が不正（400）
/// - NotFound: 対象が存在しない（404）
/// - Conflict: 状態遷移が不正、または fencing token の不一致（400）
/// - Infrastructure: ストア障害（500、リトライ可能）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Client,
    NotFound,
    Conflict,
    Infrastructure,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Infrastructure)
    }
}

/// Failure reported by a `TaskStore` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),
}

/// SchedulerError はスケジューラ操作の失敗
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("{0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("bad state transition for {entity} {id}: {reason}")]
    Conflict {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedulerError {
    pub fn validation(message: impl Into<String>) -> Self {
        SchedulerError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        SchedulerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, id: impl ToString, reason: impl Into<String>) -> Self {
        SchedulerError::Conflict {
            entity,
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::Validation(_) => ErrorKind::Client,
            SchedulerError::NotFound { .. } => ErrorKind::NotFound,
            SchedulerError::Conflict { .. } => ErrorKind::Conflict,
            SchedulerError::Store(StoreError::Duplicate(_)) => ErrorKind::Client,
            SchedulerError::Store(StoreError::Unavailable(_)) => ErrorKind::Infrastructure,
        }
    }
}
