//! # DispatchRunRepository
//!
//! 配信ランのサマリを永続化するリポジトリ。運用者が過去のランを確認するために使う。
//! 冪等性の判定には使わない（それは配信台帳の役割）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifier_domain::dispatch_run::{
    AbortReason,
    DispatchRun,
    DispatchRunId,
    RunCounts,
    RunStatus,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 配信ランリポジトリトレイト
#[async_trait]
pub trait DispatchRunRepository: Send + Sync {
    /// 終了したランのサマリを挿入する
    async fn insert(&self, run: &DispatchRun) -> Result<(), InfraError>;

    /// ID でランを検索する
    async fn find_by_id(&self, id: &DispatchRunId) -> Result<Option<DispatchRun>, InfraError>;

    /// 開始時刻の新しい順にランを取得する
    async fn list_recent(&self, limit: i64) -> Result<Vec<DispatchRun>, InfraError>;
}

/// DB の dispatch_runs テーブルの行を表す中間構造体
#[derive(sqlx::FromRow)]
struct DispatchRunRow {
    id:           Uuid,
    started_at:   DateTime<Utc>,
    finished_at:  Option<DateTime<Utc>>,
    considered:   i64,
    sent:         i64,
    failed:       i64,
    skipped:      i64,
    status:       String,
    abort_reason: Option<serde_json::Value>,
}

fn to_count(value: i64, column: &str) -> Result<u64, InfraError> {
    u64::try_from(value).map_err(|_| InfraError::invalid_data(format!("{column} が負数: {value}")))
}

impl TryFrom<DispatchRunRow> for DispatchRun {
    type Error = InfraError;

    fn try_from(row: DispatchRunRow) -> Result<Self, Self::Error> {
        let counts = RunCounts {
            considered: to_count(row.considered, "considered")?,
            sent:       to_count(row.sent, "sent")?,
            failed:     to_count(row.failed, "failed")?,
            skipped:    to_count(row.skipped, "skipped")?,
        };
        let status = row
            .status
            .parse::<RunStatus>()
            .map_err(|e| InfraError::invalid_data(format!("ランステータス: {e}")))?;
        let abort_reason = row
            .abort_reason
            .map(serde_json::from_value::<AbortReason>)
            .transpose()?;

        Ok(DispatchRun::from_db(
            DispatchRunId::from_uuid(row.id),
            row.started_at,
            row.finished_at,
            counts,
            status,
            abort_reason,
        ))
    }
}

/// PostgreSQL 実装の DispatchRunRepository
#[derive(Debug, Clone)]
pub struct PostgresDispatchRunRepository {
    pool: PgPool,
}

impl PostgresDispatchRunRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DispatchRunRepository for PostgresDispatchRunRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(run_id = %run.id()))]
    async fn insert(&self, run: &DispatchRun) -> Result<(), InfraError> {
        let status: &'static str = run.status().into();
        let abort_reason = run.abort_reason().map(serde_json::to_value).transpose()?;
        let counts = run.counts();

        sqlx::query(
            r#"
            INSERT INTO dispatch_runs (
                id, started_at, finished_at,
                considered, sent, failed, skipped,
                status, abort_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(run.id().as_uuid())
        .bind(run.started_at())
        .bind(run.finished_at())
        .bind(counts.considered as i64)
        .bind(counts.sent as i64)
        .bind(counts.failed as i64)
        .bind(counts.skipped as i64)
        .bind(status)
        .bind(abort_reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%id))]
    async fn find_by_id(&self, id: &DispatchRunId) -> Result<Option<DispatchRun>, InfraError> {
        let row = sqlx::query_as::<_, DispatchRunRow>(
            r#"
            SELECT
                id, started_at, finished_at,
                considered, sent, failed, skipped,
                status, abort_reason
            FROM dispatch_runs
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(DispatchRun::try_from).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(limit = limit))]
    async fn list_recent(&self, limit: i64) -> Result<Vec<DispatchRun>, InfraError> {
        let rows = sqlx::query_as::<_, DispatchRunRow>(
            r#"
            SELECT
                id, started_at, finished_at,
                considered, sent, failed, skipped,
                status, abort_reason
            FROM dispatch_runs
            ORDER BY started_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DispatchRun::try_from).collect()
    }
}
