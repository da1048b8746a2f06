//! SchedulerBuilder - スケジューラの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use crate::app::scheduler::Scheduler;
use crate::app::tuner::RequirementTuner;
use crate::config::{ConfigError, SchedulerConfig};
use crate::domain::status_table::StatusTables;
use crate::ports::{Clock, IdGenerator, SystemClock, TaskStore, UlidGenerator};

/// SchedulerBuilder はスケジューラを構築
///
/// # 使用例
/// ```ignore
/// let scheduler = SchedulerBuilder::new()
///     .store(Arc::new(InMemoryTaskStore::new()))
///     .config(config)
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - store が設定されていなければ BuildError
/// - config は build() 時に検証
/// - 状態遷移表はここで一度だけ構築する
pub struct SchedulerBuilder {
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: SchedulerConfig,
}

/// BuildError はスケジューラ構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("No task store configured. Call SchedulerBuilder::store() before build().")]
    MissingStore,

    #[error("Invalid scheduler config: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            clock: None,
            ids: None,
            config: SchedulerConfig::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 省略時は SystemClock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 省略時は clock を使う UlidGenerator
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Scheduler, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        self.config.validate()?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(clock.clone())),
        };
        let tuner = RequirementTuner::new(self.config.tuning.clone());

        Ok(Scheduler {
            store,
            tables: Arc::new(StatusTables::build()),
            clock,
            ids,
            tuner,
            config: Arc::new(self.config),
        })
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryTaskStore;

    #[test]
    fn test_build_success() {
        let scheduler = SchedulerBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .build();
        assert!(scheduler.is_ok());
    }

    #[test]
    fn test_build_missing_store() {
        let scheduler = SchedulerBuilder::new().build();
        assert!(matches!(scheduler, Err(BuildError::MissingStore)));
    }

    #[test]
    fn test_build_invalid_config() {
        let config = SchedulerConfig {
            waiting_release_limit: 0,
            ..Default::default()
        };
        let scheduler = SchedulerBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .config(config)
            .build();
        assert!(matches!(
            scheduler,
            Err(BuildError::InvalidConfig(ConfigError::NotPositive {
                field: "waiting_release_limit"
            }))
        ));
    }
}
