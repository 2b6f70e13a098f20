//! # リポジトリ実装
//!
//! 配信処理が依存するストアの抽象（トレイト）と PostgreSQL 実装を提供する。
//!
//! ## 設計方針
//!
//! - **トレイトで抽象化**: dispatch-service はトレイトにのみ依存し、
//!   テストではインメモリ実装（[`crate::mock`]）に差し替える
//! - **追記専用の台帳**: 配信結果は INSERT のみ。冪等性の判定は台帳が唯一の根拠
//! - **候補はストリームで返す**: 候補を一度にメモリへ載せない
//!
//! ## 含まれるリポジトリ
//!
//! | トレイト | 実装 | テーブル |
//! |---------|------|---------|
//! | [`CandidateSelector`] | [`PostgresCandidateSelector`] | `notification_schedules` |
//! | [`DeliveryLedger`] | [`PostgresDeliveryLedger`] | `delivery_outcomes` |
//! | [`DispatchRunRepository`] | [`PostgresDispatchRunRepository`] | `dispatch_runs` |

pub mod candidate_repository;
pub mod delivery_ledger_repository;
pub mod dispatch_run_repository;

pub use candidate_repository::{CandidateSelector, PostgresCandidateSelector};
pub use delivery_ledger_repository::{DeliveryLedger, PostgresDeliveryLedger};
pub use dispatch_run_repository::{DispatchRunRepository, PostgresDispatchRunRepository};
