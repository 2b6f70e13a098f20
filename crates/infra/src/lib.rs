//! # Notifier インフラ層
//!
//! 外部システムとの接続・通信を担当するインフラストラクチャ層。
//!
//! ## 設計方針
//!
//! 配信処理が依存する外部の協調者（候補ストア、配信台帳、メールプロバイダ）を
//! トレイトで抽象化し、その具体的な実装を提供する。dispatch-service は
//! トレイトにのみ依存し、テストでは [`mock`] のインメモリ実装に差し替える。
//!
//! ## 責務
//!
//! - **データベース接続**: PostgreSQL への接続プール管理とマイグレーション
//! - **リポジトリ実装**: 候補ストア・配信台帳・配信ランサマリ
//! - **メール送信**: SMTP（lettre）と Noop の送信実装
//!
//! ## 依存関係
//!
//! ```text
//! dispatch-service → infra → domain
//!         ↘                    ↑
//!           ──────────────────
//! ```
//!
//! ## モジュール構成
//!
//! - [`db`] - PostgreSQL データベース接続管理
//! - [`error`] - インフラ層エラー定義
//! - [`notification`] - メール送信
//! - [`repository`] - リポジトリ実装
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use notifier_infra::{db, repository::PostgresDeliveryLedger};
//!
//! async fn setup() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = db::create_pool("postgres://localhost/notifier").await?;
//!     db::run_migrations(&pool).await?;
//!
//!     let ledger = PostgresDeliveryLedger::new(pool.clone());
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod notification;
pub mod repository;

pub use error::InfraError;
