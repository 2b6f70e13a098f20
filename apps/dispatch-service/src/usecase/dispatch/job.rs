//! # 配信ジョブ
//!
//! スケジューラの 1 回の起動を 1 回の配信ランに変換する。
//!
//! - 同じジョブが実行中なら今回の起動はスキップする（待ち行列には積まない）
//! - ラン終了後、サマリを `dispatch_runs` に保存しログに出力する。
//!   サマリの保存に失敗してもランの結果は変わらない

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use notifier_domain::dispatch_run::DispatchRun;
use notifier_infra::repository::{CandidateSelector, DispatchRunRepository};
use notifier_shared::{
    event_log::{error as log_error, event},
    log_business_event,
};
use tokio_util::sync::CancellationToken;

use super::coordinator::DispatchCoordinator;

/// ジョブの排他キー
pub const DISPATCH_JOB: &str = "dispatch";

/// プロセス内のジョブ排他制御
///
/// ジョブ名ごとに実行中フラグを持つ。取得した [`JobPermit`] をドロップすると解放される。
#[derive(Clone, Default)]
pub struct JobGuard {
    running: Arc<Mutex<HashSet<String>>>,
}

impl JobGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 実行権を取得する。既に実行中なら `None`
    pub fn try_acquire(&self, job: &str) -> Option<JobPermit> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(job.to_string()) {
            return None;
        }
        Some(JobPermit {
            job:     job.to_string(),
            running: self.running.clone(),
        })
    }

    pub fn is_running(&self, job: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(job)
    }
}

/// ジョブの実行権
#[must_use = "ドロップした時点で実行権が解放される"]
pub struct JobPermit {
    job:     String,
    running: Arc<Mutex<HashSet<String>>>,
}

impl Drop for JobPermit {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job);
    }
}

/// 配信ジョブ
pub struct DispatchJob {
    selector:    Arc<dyn CandidateSelector>,
    coordinator: DispatchCoordinator,
    runs:        Arc<dyn DispatchRunRepository>,
    guard:       JobGuard,
}

impl DispatchJob {
    pub fn new(
        selector: Arc<dyn CandidateSelector>,
        coordinator: DispatchCoordinator,
        runs: Arc<dyn DispatchRunRepository>,
    ) -> Self {
        Self {
            selector,
            coordinator,
            runs,
            guard: JobGuard::new(),
        }
    }

    /// 配信ランを 1 回実行する
    ///
    /// `cutoff` までに期限を迎えた候補が対象。前回のランが実行中の場合は
    /// 何もせず `None` を返す。
    pub async fn execute(
        &self,
        cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Option<DispatchRun> {
        let Some(_permit) = self.guard.try_acquire(DISPATCH_JOB) else {
            log_business_event!(
                event.category = event::category::DISPATCH,
                event.action = event::action::DISPATCH_RUN_SKIPPED,
                event.entity_type = event::entity_type::DISPATCH_RUN,
                event.result = event::result::SKIPPED,
                %cutoff,
                "前回の配信ランが実行中のため、今回の起動をスキップ"
            );
            return None;
        };

        let candidates = self.selector.select_due(cutoff);
        let run = self.coordinator.run_once(candidates, cancel).await;

        if let Err(e) = self.runs.insert(&run).await {
            tracing::error!(
                error.category = log_error::category::INFRASTRUCTURE,
                error.kind = log_error::kind::DATABASE,
                error = %e,
                dispatch.run_id = %run.id(),
                "配信ランのサマリを保存できませんでした"
            );
        }

        Some(run)
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running(DISPATCH_JOB)
    }
}
