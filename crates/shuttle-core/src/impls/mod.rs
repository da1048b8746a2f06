//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 本番用実装
//! 永続ストアの実装は別クレートに配置する想定です。
//! 必要な契約は `TaskStore` のドキュメントを参照してください。

pub mod inmem_store;

pub use self::inmem_store::InMemoryTaskStore;
