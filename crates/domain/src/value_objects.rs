//! # 共通値オブジェクト
//!
//! 配信候補・メッセージ・配信結果で共有される値オブジェクトを定義する。
//!
//! ## 設計方針
//!
//! - **Newtype パターン**: プリミティブ型をラップし、型安全性を確保
//! - **バリデーション**: 生成時に検証し、不正な値の存在を型レベルで排除
//! - **不変性**: 一度作成したら変更不可
//!
//! ## 含まれる型
//!
//! | 型 | ラップ対象 | 用途 |
//! |---|-----------|------|
//! | [`Email`] | `String` | 送信先メールアドレス |
//! | [`DedupeKey`] | `String` | 通知機会ごとの重複排除キー |

use serde::{Deserialize, Serialize};

use crate::DomainError;

// =========================================================================
// Email（メールアドレス）
// =========================================================================

/// メールアドレス（値オブジェクト）
///
/// 送信先として最低限の構造（`local@domain`）を満たすことを保証する。
/// 配送可能性の検証はメールプロバイダに委ねる。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    /// メールアドレスを作成する
    ///
    /// # バリデーション
    ///
    /// - 空文字列ではない（前後の空白は除去）
    /// - `local@domain` の形式
    /// - 最大 255 文字
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_string();

        if value.is_empty() {
            return Err(DomainError::Validation(
                "メールアドレスは必須です".to_string(),
            ));
        }

        let Some((local, domain)) = value.split_once('@') else {
            return Err(DomainError::Validation(
                "メールアドレスの形式が不正です".to_string(),
            ));
        };

        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(DomainError::Validation(
                "メールアドレスの形式が不正です".to_string(),
            ));
        }

        if value.len() > 255 {
            return Err(DomainError::Validation(
                "メールアドレスは255文字以内である必要があります".to_string(),
            ));
        }

        Ok(Self(value))
    }

    /// 文字列参照を取得する
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 所有権を持つ文字列に変換する
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =========================================================================
// DedupeKey（重複排除キー）
// =========================================================================

define_validated_string! {
    /// 重複排除キー（値オブジェクト）
    ///
    /// 1 回の通知機会（例: エンティティ × 期間）を一意に識別する。
    /// 配信台帳はこのキー単位で `sent` を記録し、同じ機会への二重送信を防ぐ。
    ///
    /// # 使用例
    ///
    /// ```rust
    /// use notifier_domain::value_objects::DedupeKey;
    ///
    /// let key = DedupeKey::for_occasion("user-42", "2026-10").unwrap();
    /// assert_eq!(key.as_str(), "user-42:2026-10");
    /// ```
    pub struct DedupeKey {
        label: "重複排除キー",
        max_length: 255,
    }
}

impl DedupeKey {
    /// エンティティ ID と期間スタンプから重複排除キーを組み立てる
    ///
    /// 形式は `{entity_id}:{period_stamp}`。どちらかが空の場合はエラー。
    pub fn for_occasion(
        entity_id: impl AsRef<str>,
        period_stamp: impl AsRef<str>,
    ) -> Result<Self, DomainError> {
        let entity_id = entity_id.as_ref().trim();
        let period_stamp = period_stamp.as_ref().trim();

        if entity_id.is_empty() || period_stamp.is_empty() {
            return Err(DomainError::Validation(
                "重複排除キーにはエンティティ ID と期間の両方が必要です".to_string(),
            ));
        }

        Self::new(format!("{entity_id}:{period_stamp}"))
    }
}
