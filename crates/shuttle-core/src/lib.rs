//! shuttle-core
//!
//! Grid workload scheduler core: task / job / dataset state machines and the
//! priority + resource-matching queue-assignment engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, status_table, resources, task, job, query, report, failure, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryTaskStore）
//! - **app**: アプリケーションロジック（builder, scheduler, assign, lifecycle, tuner, bulk, status）
//! - **config**: SchedulerConfig

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{BuildError, Scheduler, SchedulerBuilder};
pub use config::{ConfigError, SchedulerConfig, TuningConfig};
pub use domain::{ErrorKind, SchedulerError, StoreError};
