//! # DeliveryLedger
//!
//! 配信結果の永続化を担当するリポジトリ（配信台帳）。
//!
//! ## 設計方針
//!
//! - **追記専用**: 送信成功・失敗どちらも 1 行ずつ INSERT し、更新しない
//! - **冪等性の根拠**: `has_sent` が true の重複排除キーは二度と送信しない
//! - **sent の一意性**: `delivery_outcomes (dedupe_key) WHERE status = 'sent'` の
//!   部分ユニークインデックスで二重記録を防ぐ。同じキーの sent を重ねて
//!   記録しようとした場合は何もしない

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifier_domain::{
    dispatch_run::DispatchRunId,
    notification::{DeliveryOutcome, DeliveryOutcomeId, DeliveryStatus},
    value_objects::DedupeKey,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 配信台帳トレイト
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    /// 重複排除キーに対して送信成功が記録済みかどうか
    async fn has_sent(&self, dedupe_key: &DedupeKey) -> Result<bool, InfraError>;

    /// 配信結果を追記する
    async fn record(&self, outcome: &DeliveryOutcome) -> Result<(), InfraError>;

    /// ランに属する配信結果を記録順で取得する
    async fn find_by_run(&self, run_id: &DispatchRunId)
    -> Result<Vec<DeliveryOutcome>, InfraError>;
}

/// DB の delivery_outcomes テーブルの行を表す中間構造体
#[derive(sqlx::FromRow)]
struct DeliveryOutcomeRow {
    id:              Uuid,
    run_id:          Uuid,
    dedupe_key:      String,
    candidate_id:    String,
    recipient_email: String,
    subject:         String,
    status:          String,
    failure_reason:  Option<String>,
    recorded_at:     DateTime<Utc>,
}

impl TryFrom<DeliveryOutcomeRow> for DeliveryOutcome {
    type Error = InfraError;

    fn try_from(row: DeliveryOutcomeRow) -> Result<Self, Self::Error> {
        Ok(DeliveryOutcome {
            id:             DeliveryOutcomeId::from_uuid(row.id),
            run_id:         DispatchRunId::from_uuid(row.run_id),
            dedupe_key:     DedupeKey::new(row.dedupe_key)?,
            candidate_id:   row.candidate_id,
            recipient:      row.recipient_email,
            subject:        row.subject,
            status:         row
                .status
                .parse::<DeliveryStatus>()
                .map_err(|e| InfraError::invalid_data(format!("配信ステータス: {e}")))?,
            failure_reason: row.failure_reason,
            recorded_at:    row.recorded_at,
        })
    }
}

/// PostgreSQL 実装の DeliveryLedger
#[derive(Debug, Clone)]
pub struct PostgresDeliveryLedger {
    pool: PgPool,
}

impl PostgresDeliveryLedger {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryLedger for PostgresDeliveryLedger {
    #[tracing::instrument(skip_all, level = "debug", fields(%dedupe_key))]
    async fn has_sent(&self, dedupe_key: &DedupeKey) -> Result<bool, InfraError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM delivery_outcomes
                WHERE dedupe_key = $1
                  AND status = 'sent'
            )
            "#,
        )
        .bind(dedupe_key.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(dedupe_key = %outcome.dedupe_key, status = %outcome.status))]
    async fn record(&self, outcome: &DeliveryOutcome) -> Result<(), InfraError> {
        let status: &'static str = outcome.status.into();

        sqlx::query(
            r#"
            INSERT INTO delivery_outcomes (
                id, run_id, dedupe_key, candidate_id,
                recipient_email, subject, status, failure_reason, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (dedupe_key) WHERE status = 'sent' DO NOTHING
            "#,
        )
        .bind(outcome.id.as_uuid())
        .bind(outcome.run_id.as_uuid())
        .bind(outcome.dedupe_key.as_str())
        .bind(&outcome.candidate_id)
        .bind(&outcome.recipient)
        .bind(&outcome.subject)
        .bind(status)
        .bind(&outcome.failure_reason)
        .bind(outcome.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%run_id))]
    async fn find_by_run(
        &self,
        run_id: &DispatchRunId,
    ) -> Result<Vec<DeliveryOutcome>, InfraError> {
        let rows = sqlx::query_as::<_, DeliveryOutcomeRow>(
            r#"
            SELECT
                id, run_id, dedupe_key, candidate_id,
                recipient_email, subject, status, failure_reason, recorded_at
            FROM delivery_outcomes
            WHERE run_id = $1
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(run_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeliveryOutcome::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InfraErrorKind;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresDeliveryLedger>();
    }

    #[test]
    fn 未知のステータスはinvalid_dataになる() {
        let row = DeliveryOutcomeRow {
            id:              Uuid::now_v7(),
            run_id:          Uuid::now_v7(),
            dedupe_key:      "user-1:2026-10".to_string(),
            candidate_id:    "user-1".to_string(),
            recipient_email: "tanaka@example.com".to_string(),
            subject:         "件名".to_string(),
            status:          "bounced".to_string(),
            failure_reason:  None,
            recorded_at:     Utc::now(),
        };

        let err = DeliveryOutcome::try_from(row).unwrap_err();
        assert!(matches!(err.kind(), InfraErrorKind::InvalidData(_)));
    }
}
