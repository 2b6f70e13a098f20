//! # 通知送信
//!
//! メール通知の送信を担当するインフラストラクチャモジュール。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: `NotificationSender` trait でメール送信を抽象化
//! - **2 つの実装**: SMTP（Mailpit / SMTP リレー）、Noop（通知無効化時）
//! - **環境変数切替**: `NOTIFICATION_BACKEND` でランタイム選択
//!
//! 送信の並行度・タイムアウトは呼び出し側（配信ワーカープール）が制御する。
//! 実装はメッセージ 1 件を送るだけでよい。

mod noop;
mod smtp;

use async_trait::async_trait;
pub use noop::NoopNotificationSender;
use notifier_domain::notification::{EmailMessage, NotificationError};
pub use smtp::SmtpNotificationSender;

/// メール送信トレイト
///
/// 配信ワーカーが呼び出すメールプロバイダの抽象。
/// 複数ワーカーから同時に呼ばれるため `Send + Sync` を要求する。
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// メールを送信する
    async fn send_email(&self, email: &EmailMessage) -> Result<(), NotificationError>;
}
