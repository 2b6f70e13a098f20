//! # ドメイン層エラー定義
//!
//! 値オブジェクトの生成時に検出される不正な値を表現するエラー型。
//!
//! ## 設計方針
//!
//! - **型による分類**: エラーの種類を列挙型で明示し、パターンマッチで処理可能に
//! - **thiserror 活用**: `#[error(...)]` マクロでエラーメッセージを自動生成
//!
//! 配信処理そのものの失敗（送信失敗・テンプレート失敗）は
//! [`NotificationError`](crate::notification::NotificationError) で表現する。
//!
//! ## 使用例
//!
//! ```rust
//! use notifier_domain::DomainError;
//!
//! fn validate_period(period: &str) -> Result<(), DomainError> {
//!     if period.is_empty() {
//!         return Err(DomainError::Validation("期間は必須です".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// ドメイン層で発生するエラー
#[derive(Debug, Error)]
pub enum DomainError {
    /// バリデーションエラー
    ///
    /// 入力値がドメインルールに違反している場合に使用する。
    ///
    /// # 例
    ///
    /// - 重複排除キーが空
    /// - メールアドレスの形式が不正
    /// - 文字数制限の超過
    #[error("バリデーションエラー: {0}")]
    Validation(String),
}
