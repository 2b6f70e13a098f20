//! # 通知
//!
//! 一括通知配信で扱うドメインモデルを定義する。
//!
//! ## ドメイン用語
//!
//! | 型 | ドメイン用語 | ライフサイクル |
//! |---|------------|---------------|
//! | [`Candidate`] | 配信候補 | ラン内でのみ存在（候補ストアが毎回生成） |
//! | [`MalformedCandidate`] | 保存値が不正な候補 | ラン内でのみ存在。`failed` として記録される |
//! | [`EmailMessage`] | 送信メッセージ | ワーカープールが一度だけ消費 |
//! | [`DeliveryOutcome`] | 配信結果 | 配信台帳に追記され、永続化される |
//!
//! ## 設計方針
//!
//! - **配信失敗は値で表す**: 送信・テンプレートの失敗は [`DeliveryStatus::Failed`] として
//!   記録され、ランを中断しない
//! - **テンプレート分離**: 候補からメッセージへの変換は dispatch-service の
//!   `TemplateRenderer` が担う

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use thiserror::Error;

use crate::{
    dispatch_run::DispatchRunId,
    value_objects::{DedupeKey, Email},
};

define_uuid_id! {
    /// 配信結果 ID（一意識別子）
    ///
    /// delivery_outcomes テーブルの主キー。UUID v7 を使用。
    pub struct DeliveryOutcomeId;
}

/// 通知処理エラー
#[derive(Debug, Error)]
pub enum NotificationError {
    /// メール送信に失敗
    #[error("メール送信に失敗: {0}")]
    SendFailed(String),

    /// テンプレートレンダリングに失敗
    #[error("テンプレートレンダリングに失敗: {0}")]
    TemplateFailed(String),
}

/// 配信候補
///
/// 通知期限を迎えたエンティティ 1 件。候補ストアがラン開始時点の
/// カットオフ時刻をもとに生成する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// エンティティ ID
    pub id:         String,
    /// 送信先
    pub recipient:  Email,
    /// 通知機会の重複排除キー
    pub dedupe_key: DedupeKey,
    /// テンプレート名（例: `reminder`）
    pub template:   String,
    /// テンプレートに渡すデータ（JSON オブジェクト）
    pub payload:    serde_json::Value,
}

/// 保存値が不正で配信できない候補
///
/// 候補ストアの行がドメインの制約（送信先・重複排除キー）を満たさない場合に生成される。
/// 読み出し自体は成功しているため、ランは中断せずこの候補だけを失敗として扱う。
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedCandidate {
    pub id:         String,
    /// 保存されていた送信先（検証前の値）
    pub recipient:  String,
    /// 重複排除キー。キー自体が不正な場合は `None`
    pub dedupe_key: Option<DedupeKey>,
    pub reason:     String,
}

/// 候補ストアから読み出した 1 件
#[derive(Debug, Clone, PartialEq)]
pub enum SelectedCandidate {
    /// 配信できる候補
    Ready(Candidate),
    /// 保存値が不正な候補
    Malformed(MalformedCandidate),
}

impl From<Candidate> for SelectedCandidate {
    fn from(candidate: Candidate) -> Self {
        Self::Ready(candidate)
    }
}

impl From<MalformedCandidate> for SelectedCandidate {
    fn from(candidate: MalformedCandidate) -> Self {
        Self::Malformed(candidate)
    }
}

/// 送信メッセージ
///
/// テンプレートレンダリングの出力。`NotificationSender` に渡される。
#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    /// 送信先メールアドレス
    pub to:           String,
    /// 件名
    pub subject:      String,
    /// HTML 本文
    pub html_body:    String,
    /// プレーンテキスト本文
    pub text_body:    String,
    /// 元になった候補の重複排除キー
    pub dedupe_key:   DedupeKey,
    /// 元になった候補のエンティティ ID
    pub candidate_id: String,
}

/// 配信ステータス
///
/// delivery_outcomes テーブルの `status` カラムに格納される値。
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryStatus {
    /// 送信成功。以降のランはこの重複排除キーを再送しない
    Sent,
    /// 送信またはテンプレートレンダリングに失敗
    Failed,
}

/// 配信結果
///
/// 試行したメッセージ 1 件につき 1 行、配信台帳に追記される。
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub id: DeliveryOutcomeId,
    pub run_id: DispatchRunId,
    pub dedupe_key: DedupeKey,
    pub candidate_id: String,
    pub recipient: String,
    /// 件名（テンプレートレンダリング前に失敗した場合は空）
    pub subject: String,
    pub status: DeliveryStatus,
    pub failure_reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl DeliveryOutcome {
    /// 送信成功の結果を作成する
    pub fn sent(run_id: DispatchRunId, message: &EmailMessage, now: DateTime<Utc>) -> Self {
        Self {
            id: DeliveryOutcomeId::new(),
            run_id,
            dedupe_key: message.dedupe_key.clone(),
            candidate_id: message.candidate_id.clone(),
            recipient: message.to.clone(),
            subject: message.subject.clone(),
            status: DeliveryStatus::Sent,
            failure_reason: None,
            recorded_at: now,
        }
    }

    /// 送信失敗の結果を作成する
    pub fn failed(
        run_id: DispatchRunId,
        message: &EmailMessage,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            failure_reason: Some(reason.into()),
            ..Self::sent(run_id, message, now)
        }
    }

    /// メッセージを組み立てる前に失敗した候補の結果を作成する
    pub fn failed_before_send(
        run_id: DispatchRunId,
        candidate: &Candidate,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeliveryOutcomeId::new(),
            run_id,
            dedupe_key: candidate.dedupe_key.clone(),
            candidate_id: candidate.id.clone(),
            recipient: candidate.recipient.to_string(),
            subject: String::new(),
            status: DeliveryStatus::Failed,
            failure_reason: Some(reason.into()),
            recorded_at: now,
        }
    }

    /// 保存値が不正な候補の結果を作成する
    ///
    /// 台帳の行は重複排除キー単位のため、キーを持つ候補にだけ使う。
    pub fn malformed(
        run_id: DispatchRunId,
        candidate: &MalformedCandidate,
        dedupe_key: DedupeKey,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeliveryOutcomeId::new(),
            run_id,
            dedupe_key,
            candidate_id: candidate.id.clone(),
            recipient: candidate.recipient.clone(),
            subject: String::new(),
            status: DeliveryStatus::Failed,
            failure_reason: Some(candidate.reason.clone()),
            recorded_at: now,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == DeliveryStatus::Sent
    }
}
