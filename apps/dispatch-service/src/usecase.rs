//! # ユースケース層
//!
//! 配信サービスのビジネスロジックを実装する。
//! 外部の協調者（候補ストア・配信台帳・メール送信）は infra のトレイト越しに受け取る。

pub mod dispatch;

pub use dispatch::{DispatchCoordinator, DispatchJob, DeliveryWorkerPool, TemplateRenderer};
