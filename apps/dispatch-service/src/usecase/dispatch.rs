//! # 一括通知配信
//!
//! 期限を迎えた配信候補を選び、メッセージを組み立て、有界のワーカープールで
//! 並行送信し、結果を配信台帳に記録する。
//!
//! ## モジュール構成
//!
//! - [`composer`] - 候補 → メッセージ（tera テンプレート）
//! - [`worker_pool`] - 並行数・キュー長を制限した送信ワーカー
//! - [`coordinator`] - 1 回のランの取り込み・投入・記録
//! - [`job`] - 排他制御とランサマリの保存

pub mod composer;
pub mod coordinator;
pub mod job;
pub mod worker_pool;

pub use composer::{MessageComposer, REMINDER_TEMPLATE, TemplateRenderer};
pub use coordinator::DispatchCoordinator;
pub use job::{DISPATCH_JOB, DispatchJob, JobGuard, JobPermit};
pub use worker_pool::{
    DeliveryFailure,
    DeliveryHandle,
    DeliveryReport,
    DeliveryWorkerPool,
    PoolConfig,
    PoolError,
};
