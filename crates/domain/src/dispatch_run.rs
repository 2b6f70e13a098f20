//! # 配信ラン
//!
//! スケジューラの 1 回の起動に対応する配信処理の集計を表す。
//!
//! ## 不変条件
//!
//! - 候補 1 件は必ず `sent` / `failed` / `skipped` のいずれか 1 つに数えられる
//!   （中断されなかったランでは `considered == sent + failed + skipped`）
//! - 終端ステータスは一度確定したら変わらない
//!
//! ## ステータス遷移
//!
//! ```text
//! Running ─┬─ finish() ─→ Completed / CompletedWithFailures
//!          └─ abort()  ─→ Aborted
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

define_uuid_id! {
    /// 配信ラン ID（一意識別子）
    ///
    /// dispatch_runs テーブルの主キー。配信結果の `run_id` からも参照される。
    pub struct DispatchRunId;
}

/// 配信ランのステータス
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    /// 実行中
    Running,
    /// 全候補を処理し、失敗なし
    Completed,
    /// 全候補を処理し、1 件以上の失敗あり
    CompletedWithFailures,
    /// 候補ストアまたは台帳の障害、もしくは停止要求で中断
    Aborted,
}

impl RunStatus {
    /// 終端ステータスかどうか
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// 配信ランの中断理由
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    /// 候補の読み出しに失敗
    #[display("候補の読み出しに失敗: {_0}")]
    Selection(String),
    /// 配信台帳の参照・記録に失敗
    #[display("配信台帳の操作に失敗: {_0}")]
    Ledger(String),
    /// 停止要求を受けた
    #[display("停止要求により中断")]
    Cancelled,
}

/// 配信ラン
///
/// `DispatchCoordinator` が生成・更新し、終了後はサマリとしてログ出力・永続化される。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRun {
    id: DispatchRunId,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    considered: u64,
    sent: u64,
    failed: u64,
    skipped: u64,
    status: RunStatus,
    abort_reason: Option<AbortReason>,
}

impl DispatchRun {
    /// 新しいランを開始する
    pub fn start(id: DispatchRunId, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            started_at,
            finished_at: None,
            considered: 0,
            sent: 0,
            failed: 0,
            skipped: 0,
            status: RunStatus::Running,
            abort_reason: None,
        }
    }

    /// 永続化された値からランを復元する
    pub fn from_db(
        id: DispatchRunId,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
        counts: RunCounts,
        status: RunStatus,
        abort_reason: Option<AbortReason>,
    ) -> Self {
        Self {
            id,
            started_at,
            finished_at,
            considered: counts.considered,
            sent: counts.sent,
            failed: counts.failed,
            skipped: counts.skipped,
            status,
            abort_reason,
        }
    }

    // ===== 集計 =====

    /// 候補を 1 件受け付けた
    pub fn consider(&mut self) {
        self.considered += 1;
    }

    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    // ===== 終了 =====

    /// 正常終了する
    ///
    /// 失敗が 1 件でもあれば `CompletedWithFailures`、なければ `Completed`。
    /// 既に終端ステータスの場合は何もしない。
    pub fn finish(&mut self, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = if self.failed > 0 {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Completed
        };
        self.finished_at = Some(now);
    }

    /// 中断する
    ///
    /// 最初の中断理由だけを保持する。
    pub fn abort(&mut self, reason: AbortReason, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = RunStatus::Aborted;
        self.abort_reason = Some(reason);
        self.finished_at = Some(now);
    }

    // ===== Getter =====

    pub fn id(&self) -> &DispatchRunId {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn considered(&self) -> u64 {
        self.considered
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        self.abort_reason.as_ref()
    }

    /// 集計値をまとめて取得する
    pub fn counts(&self) -> RunCounts {
        RunCounts {
            considered: self.considered,
            sent:       self.sent,
            failed:     self.failed,
            skipped:    self.skipped,
        }
    }

    /// 処理結果が確定した候補数（sent + failed + skipped）
    pub fn resolved(&self) -> u64 {
        self.sent + self.failed + self.skipped
    }
}

/// 配信ランの集計値
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub considered: u64,
    pub sent:       u64,
    pub failed:     u64,
    pub skipped:    u64,
}
