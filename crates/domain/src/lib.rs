//! # Notifier ドメイン層
//!
//! 一括通知配信の中核となるドメインモデルを定義する。
//!
//! ## 設計方針
//!
//! - **値オブジェクト**: 生成時に検証し、不正なメールアドレスや空の重複排除キーを型で排除
//! - **集計の一元化**: 配信ランの件数とステータス遷移は [`dispatch_run::DispatchRun`] だけが持つ
//! - **I/O を持たない**: 候補ストア・台帳・メール送信はインフラ層の責務
//!
//! ## 依存関係の方向
//!
//! ```text
//! dispatch-service → infra → domain
//! ```
//!
//! ## モジュール構成
//!
//! - [`clock`] - 時刻プロバイダ
//! - [`dispatch_run`] - 配信ランと集計
//! - [`error`] - ドメイン層エラー
//! - [`notification`] - 配信候補・メッセージ・配信結果
//! - [`value_objects`] - メールアドレスと重複排除キー

#[macro_use]
mod macros;

pub mod clock;
pub mod dispatch_run;
pub mod error;
pub mod notification;
pub mod value_objects;

pub use error::DomainError;
