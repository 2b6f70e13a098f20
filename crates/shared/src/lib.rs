//! # Notifier 共有ユーティリティ
//!
//! ワークスペース全体（domain, infra, dispatch-service）で使用する
//! 横断的なユーティリティを提供する。
//!
//! ## 設計方針
//!
//! - ビジネスロジックを含まない純粋なユーティリティのみを配置
//! - ログ初期化とログフィールド規約をここに集約し、各クレートで重複させない
//!
//! ## モジュール構成
//!
//! - [`event_log`] - ビジネスイベントログのマクロとフィールド定数
//! - [`observability`] - トレーシング初期化と出力形式の設定

pub mod event_log;
pub mod observability;

pub use observability::{LogFormat, TracingConfig};
