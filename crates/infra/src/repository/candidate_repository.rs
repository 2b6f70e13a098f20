//! # CandidateSelector
//!
//! 通知期限を迎えた配信候補を読み出すリポジトリ。
//!
//! ## 設計方針
//!
//! - **読み取り専用**: 候補ストアには一切書き込まない
//! - **ストリーム**: `fetch` で行を逐次取り出し、候補を一度にメモリへ載せない
//! - **送信済みの除外**: 配信台帳に `sent` 行がある重複排除キーは SQL で除外する。
//!   コーディネーター側でも `has_sent` で再確認する
//! - **不正な行はその候補だけの失敗**: 送信先や重複排除キーが不正な行は
//!   `SelectedCandidate::Malformed` として流し、ストリームは止めない

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use notifier_domain::{
    notification::{Candidate, MalformedCandidate, SelectedCandidate},
    value_objects::{DedupeKey, Email},
};
use sqlx::PgPool;

use crate::error::InfraError;

/// 候補ストアトレイト
pub trait CandidateSelector: Send + Sync {
    /// カットオフ時刻までに期限を迎えた候補を返す
    ///
    /// `Err` は候補ストア自体の障害を表し、呼び出し側はランを中断する。
    /// 行の値が不正な候補は [`SelectedCandidate::Malformed`] として流す。
    fn select_due(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxStream<'_, Result<SelectedCandidate, InfraError>>;
}

/// DB の notification_schedules テーブルの行を表す中間構造体
///
/// `From` で `SelectedCandidate` への変換ロジックを一箇所に集約する。
#[derive(sqlx::FromRow)]
struct CandidateRow {
    entity_id:       String,
    recipient_email: String,
    dedupe_key:      String,
    template:        String,
    payload:         serde_json::Value,
}

impl From<CandidateRow> for SelectedCandidate {
    fn from(row: CandidateRow) -> Self {
        match (Email::new(&row.recipient_email), DedupeKey::new(&row.dedupe_key)) {
            (Ok(recipient), Ok(dedupe_key)) => Self::Ready(Candidate {
                id: row.entity_id,
                recipient,
                dedupe_key,
                template: row.template,
                payload: row.payload,
            }),
            (Err(e), dedupe_key) => {
                row.into_malformed(dedupe_key.ok(), format!("送信先が不正です: {e}"))
            }
            (Ok(_), Err(e)) => row.into_malformed(None, format!("重複排除キーが不正です: {e}")),
        }
    }
}

impl CandidateRow {
    fn into_malformed(self, dedupe_key: Option<DedupeKey>, reason: String) -> SelectedCandidate {
        SelectedCandidate::Malformed(MalformedCandidate {
            id: self.entity_id,
            recipient: self.recipient_email,
            dedupe_key,
            reason,
        })
    }
}

/// PostgreSQL 実装の CandidateSelector
#[derive(Debug, Clone)]
pub struct PostgresCandidateSelector {
    pool: PgPool,
}

impl PostgresCandidateSelector {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CandidateSelector for PostgresCandidateSelector {
    fn select_due(
        &self,
        cutoff: DateTime<Utc>,
    ) -> BoxStream<'_, Result<SelectedCandidate, InfraError>> {
        tracing::debug!(%cutoff, "配信候補の読み出しを開始");
        sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT
                s.entity_id,
                s.recipient_email,
                s.dedupe_key,
                s.template,
                s.payload
            FROM notification_schedules s
            WHERE s.due_at <= $1
              AND NOT EXISTS (
                  SELECT 1
                  FROM delivery_outcomes d
                  WHERE d.dedupe_key = s.dedupe_key
                    AND d.status = 'sent'
              )
            ORDER BY s.due_at ASC, s.id ASC
            "#,
        )
        .bind(cutoff)
        .fetch(&self.pool)
        .map(|row| row.map(SelectedCandidate::from).map_err(InfraError::from))
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn make_row(email: &str, key: &str) -> CandidateRow {
        CandidateRow {
            entity_id:       "user-1".to_string(),
            recipient_email: email.to_string(),
            dedupe_key:      key.to_string(),
            template:        "reminder".to_string(),
            payload:         json!({"name": "田中"}),
        }
    }

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresCandidateSelector>();
    }

    #[test]
    fn 正しい行はreadyに変換される() {
        let selected = SelectedCandidate::from(make_row("tanaka@example.com", "user-1:2026-10"));

        let SelectedCandidate::Ready(candidate) = selected else {
            panic!("Ready になること: {selected:?}");
        };
        assert_eq!(candidate.id, "user-1");
        assert_eq!(candidate.recipient.as_str(), "tanaka@example.com");
        assert_eq!(candidate.dedupe_key.as_str(), "user-1:2026-10");
        assert_eq!(candidate.payload, json!({"name": "田中"}));
    }

    #[test]
    fn 不正なメールアドレスはキー付きのmalformedになる() {
        let selected = SelectedCandidate::from(make_row("broken", "user-1:2026-10"));

        let SelectedCandidate::Malformed(candidate) = selected else {
            panic!("Malformed になること: {selected:?}");
        };
        assert_eq!(candidate.id, "user-1");
        assert_eq!(candidate.recipient, "broken");
        assert_eq!(
            candidate.dedupe_key.map(|k| k.into_string()),
            Some("user-1:2026-10".to_string())
        );
        assert!(candidate.reason.contains("送信先"));
    }

    #[test]
    fn 空の重複排除キーはキーなしのmalformedになる() {
        let selected = SelectedCandidate::from(make_row("tanaka@example.com", ""));

        let SelectedCandidate::Malformed(candidate) = selected else {
            panic!("Malformed になること: {selected:?}");
        };
        assert!(candidate.dedupe_key.is_none());
        assert!(candidate.reason.contains("重複排除キー"));
    }
}
