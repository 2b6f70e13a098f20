//! # 配信スケジューラ
//!
//! cron 式に従って [`DispatchJob`] を起動する。
//!
//! - 起動時刻の計算は `cron` クレート（秒フィールドを含む 6/7 フィールド形式）
//! - ジョブは別タスクで実行し、長いランが次の起動時刻の計算を遅らせない。
//!   重なった起動はジョブ側の排他制御でスキップされる
//! - 停止要求を受けたら新しい起動をやめ、実行中のランの終了を待つ

use std::{str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use cron::Schedule;
use notifier_domain::{clock::Clock, dispatch_run::DispatchRun};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{config::ConfigError, usecase::DispatchJob};

/// 配信スケジューラ
pub struct DispatchScheduler {
    job:      Arc<DispatchJob>,
    schedule: Schedule,
    clock:    Arc<dyn Clock>,
}

impl DispatchScheduler {
    /// cron 式を解析してスケジューラを作成する
    pub fn new(
        job: Arc<DispatchJob>,
        expression: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let schedule = Schedule::from_str(expression).map_err(|e| ConfigError::Invalid {
            name:   "DISPATCH_SCHEDULE",
            value:  expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            job,
            schedule,
            clock,
        })
    }

    /// `after` より後の最初の起動時刻
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// 停止要求を受けるまで起動を繰り返す
    pub async fn run(&self, cancel: CancellationToken) {
        let mut executions: JoinSet<Option<DispatchRun>> = JoinSet::new();
        let mut last_fire: Option<DateTime<Utc>> = None;

        loop {
            let now = self.clock.now();
            let from = last_fire.map_or(now, |last| last.max(now));
            let Some(next) = self.next_fire_after(from) else {
                tracing::warn!("次回の起動時刻がありません。スケジューラを終了します");
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!(next_fire = %next, "次回の配信ランを待機");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            last_fire = Some(next);
            self.trigger(next, &cancel, &mut executions);

            while let Some(finished) = executions.try_join_next() {
                log_join_error(finished);
            }
        }

        tracing::info!("スケジューラを停止します。実行中の配信ランを待機します");
        while let Some(finished) = executions.join_next().await {
            log_join_error(finished);
        }
    }

    fn trigger(
        &self,
        cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
        executions: &mut JoinSet<Option<DispatchRun>>,
    ) {
        let job = self.job.clone();
        let cancel = cancel.clone();
        executions.spawn(async move { job.execute(cutoff, &cancel).await });
    }
}

fn log_join_error(result: Result<Option<DispatchRun>, tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "配信ランのタスクが異常終了しました");
    }
}
