//! # 配信コーディネーター
//!
//! 1 回の配信ランを所有し、候補の取り込みからワーカープールへの投入、
//! 配信結果の台帳記録までを統括する。
//!
//! ## 処理の流れ
//!
//! ```text
//! 候補ストリーム ─→ 重複排除 ─→ 組み立て ─→ submit ─→ 送信中
//!                    │            │                    │
//!                    └ skipped    └ failed             └ sent / failed
//!                                     ↓                      ↓
//!                                  配信台帳 ←────────────────┘
//! ```
//!
//! - 候補は 1 件ずつ取り込み、ストリーム全体をメモリに載せない
//! - 送信完了した結果は取り込みと並行して台帳に記録する
//! - 組み立て・送信の失敗、保存値が不正な候補はその候補の `failed` として数え、
//!   ランは続行する
//! - 候補ストア・台帳の障害、停止要求ではランを中断する。中断時も
//!   送信中のメッセージは待ち合わせ、結果を記録してから終える

use std::{collections::HashSet, sync::Arc};

use futures::{
    StreamExt,
    stream::{BoxStream, FuturesUnordered},
};
use notifier_domain::{
    clock::Clock,
    dispatch_run::{AbortReason, DispatchRun, DispatchRunId},
    notification::{Candidate, DeliveryOutcome, MalformedCandidate, SelectedCandidate},
    value_objects::DedupeKey,
};
use notifier_infra::{InfraError, repository::DeliveryLedger};
use notifier_shared::{
    event_log::{error as log_error, event},
    log_business_event,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{
    composer::MessageComposer,
    worker_pool::{DeliveryHandle, DeliveryReport, DeliveryWorkerPool},
};

/// 取り込みを止める理由
enum Halt {
    Ledger(InfraError),
    Cancelled,
}

/// 配信コーディネーター
pub struct DispatchCoordinator {
    ledger:   Arc<dyn DeliveryLedger>,
    composer: Arc<dyn MessageComposer>,
    pool:     Arc<DeliveryWorkerPool>,
    clock:    Arc<dyn Clock>,
}

impl DispatchCoordinator {
    pub fn new(
        ledger: Arc<dyn DeliveryLedger>,
        composer: Arc<dyn MessageComposer>,
        pool: Arc<DeliveryWorkerPool>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            composer,
            pool,
            clock,
        }
    }

    /// 配信ランを 1 回実行する
    ///
    /// 戻り値のランは必ず終端ステータス（`completed` / `completed_with_failures` /
    /// `aborted`）になっている。
    pub async fn run_once(
        &self,
        candidates: BoxStream<'_, Result<SelectedCandidate, InfraError>>,
        cancel: &CancellationToken,
    ) -> DispatchRun {
        let run = DispatchRun::start(DispatchRunId::new(), self.clock.now());
        let span = tracing::info_span!("dispatch_run", dispatch.run_id = %run.id());
        self.drive(run, candidates, cancel).instrument(span).await
    }

    async fn drive(
        &self,
        mut run: DispatchRun,
        mut candidates: BoxStream<'_, Result<SelectedCandidate, InfraError>>,
        cancel: &CancellationToken,
    ) -> DispatchRun {
        log_business_event!(
            event.category = event::category::DISPATCH,
            event.action = event::action::DISPATCH_RUN_STARTED,
            event.entity_type = event::entity_type::DISPATCH_RUN,
            event.entity_id = %run.id(),
            event.result = event::result::SUCCESS,
            "配信ランを開始"
        );

        let mut seen: HashSet<DedupeKey> = HashSet::new();
        let mut in_flight: FuturesUnordered<DeliveryHandle> = FuturesUnordered::new();

        let mut abort = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break Some(AbortReason::Cancelled),

                Some(report) = in_flight.next(), if !in_flight.is_empty() => {
                    if let Err(e) = self.settle(&mut run, report).await {
                        break Some(ledger_abort(e));
                    }
                }

                item = candidates.next() => match item {
                    None => break None,
                    Some(Err(e)) => {
                        tracing::error!(
                            error.category = log_error::category::INFRASTRUCTURE,
                            error.kind = log_error::kind::SELECTION,
                            error = %e,
                            "配信候補の読み出しに失敗"
                        );
                        break Some(AbortReason::Selection(e.to_string()));
                    }
                    Some(Ok(SelectedCandidate::Malformed(candidate))) => {
                        if let Err(e) = self.reject(&mut run, &mut seen, candidate).await {
                            break Some(ledger_abort(e));
                        }
                    }
                    Some(Ok(SelectedCandidate::Ready(candidate))) => {
                        match self.admit(&mut run, &mut seen, &mut in_flight, candidate, cancel).await {
                            Ok(()) => {}
                            Err(Halt::Ledger(e)) => break Some(ledger_abort(e)),
                            Err(Halt::Cancelled) => break Some(AbortReason::Cancelled),
                        }
                    }
                },
            }
        };

        // 中断した場合も、送信済み・送信中のメッセージの結果は記録する
        drop(candidates);
        while let Some(report) = in_flight.next().await {
            if let Err(e) = self.settle(&mut run, report).await {
                if abort.is_none() {
                    abort = Some(ledger_abort(e));
                } else {
                    tracing::error!(
                        error.category = log_error::category::INFRASTRUCTURE,
                        error.kind = log_error::kind::LEDGER,
                        error = %e,
                        "中断処理中に配信結果を記録できませんでした"
                    );
                }
            }
        }

        let now = self.clock.now();
        match abort {
            Some(reason) => {
                run.abort(reason, now);
                log_business_event!(
                    event.category = event::category::DISPATCH,
                    event.action = event::action::DISPATCH_RUN_ABORTED,
                    event.entity_type = event::entity_type::DISPATCH_RUN,
                    event.entity_id = %run.id(),
                    event.result = event::result::FAILURE,
                    dispatch.considered = run.considered(),
                    dispatch.sent = run.sent(),
                    dispatch.failed = run.failed(),
                    dispatch.skipped = run.skipped(),
                    dispatch.abort_reason = %run.abort_reason().map(ToString::to_string).unwrap_or_default(),
                    "配信ランを中断"
                );
            }
            None => {
                run.finish(now);
                let status: &'static str = run.status().into();
                log_business_event!(
                    event.category = event::category::DISPATCH,
                    event.action = event::action::DISPATCH_RUN_COMPLETED,
                    event.entity_type = event::entity_type::DISPATCH_RUN,
                    event.entity_id = %run.id(),
                    event.result = event::result::SUCCESS,
                    dispatch.status = status,
                    dispatch.considered = run.considered(),
                    dispatch.sent = run.sent(),
                    dispatch.failed = run.failed(),
                    dispatch.skipped = run.skipped(),
                    "配信ランを完了"
                );
            }
        }

        run
    }

    /// 候補 1 件を取り込む
    async fn admit(
        &self,
        run: &mut DispatchRun,
        seen: &mut HashSet<DedupeKey>,
        in_flight: &mut FuturesUnordered<DeliveryHandle>,
        candidate: Candidate,
        cancel: &CancellationToken,
    ) -> Result<(), Halt> {
        run.consider();

        // 同じラン内で同じ機会が 2 度流れてきた場合も 1 件として扱う
        if !seen.insert(candidate.dedupe_key.clone()) {
            self.skip(run, &candidate.id, candidate.dedupe_key.as_str(), "ラン内で重複");
            return Ok(());
        }

        if self
            .ledger
            .has_sent(&candidate.dedupe_key)
            .await
            .map_err(Halt::Ledger)?
        {
            self.skip(run, &candidate.id, candidate.dedupe_key.as_str(), "送信済み");
            return Ok(());
        }

        let message = match self.composer.compose(&candidate) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    error.category = log_error::category::INFRASTRUCTURE,
                    error.kind = log_error::kind::TEMPLATE,
                    error = %e,
                    candidate_id = %candidate.id,
                    "メッセージの組み立てに失敗"
                );
                let outcome = DeliveryOutcome::failed_before_send(
                    run.id().clone(),
                    &candidate,
                    e.to_string(),
                    self.clock.now(),
                );
                return self.record(run, outcome).await.map_err(Halt::Ledger);
            }
        };

        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Halt::Cancelled),
            submitted = self.pool.submit(message) => submitted.map_err(|_| Halt::Cancelled)?,
        };
        in_flight.push(handle);
        Ok(())
    }

    /// 保存値が不正な候補を送信せずに処理する
    ///
    /// 重複排除キーがあれば `failed` として台帳に記録する。キーがなければ
    /// 台帳に書けないため、エラーログを出して `skipped` として数える。
    async fn reject(
        &self,
        run: &mut DispatchRun,
        seen: &mut HashSet<DedupeKey>,
        candidate: MalformedCandidate,
    ) -> Result<(), InfraError> {
        run.consider();
        tracing::error!(
            error.category = log_error::category::INFRASTRUCTURE,
            error.kind = log_error::kind::INVALID_CANDIDATE,
            candidate_id = %candidate.id,
            error = %candidate.reason,
            "配信候補の保存値が不正です"
        );

        let Some(dedupe_key) = candidate.dedupe_key.clone() else {
            self.skip(run, &candidate.id, "", "重複排除キーなし");
            return Ok(());
        };
        if !seen.insert(dedupe_key.clone()) {
            self.skip(run, &candidate.id, dedupe_key.as_str(), "ラン内で重複");
            return Ok(());
        }

        let outcome =
            DeliveryOutcome::malformed(run.id().clone(), &candidate, dedupe_key, self.clock.now());
        self.record(run, outcome).await
    }

    /// 送信完了したメッセージの結果を記録する
    async fn settle(&self, run: &mut DispatchRun, report: DeliveryReport) -> Result<(), InfraError> {
        let now = self.clock.now();
        let outcome = match &report.result {
            Ok(()) => DeliveryOutcome::sent(run.id().clone(), &report.message, now),
            Err(failure) => {
                DeliveryOutcome::failed(run.id().clone(), &report.message, failure.to_string(), now)
            }
        };
        self.record(run, outcome).await
    }

    async fn record(&self, run: &mut DispatchRun, outcome: DeliveryOutcome) -> Result<(), InfraError> {
        if outcome.is_sent() {
            run.record_sent();
            log_business_event!(
                event.category = event::category::NOTIFICATION,
                event.action = event::action::NOTIFICATION_SENT,
                event.entity_type = event::entity_type::DELIVERY_OUTCOME,
                event.entity_id = %outcome.id,
                event.result = event::result::SUCCESS,
                notification.dedupe_key = %outcome.dedupe_key,
                notification.recipient = %outcome.recipient,
                "通知メール送信成功"
            );
        } else {
            run.record_failed();
            log_business_event!(
                event.category = event::category::NOTIFICATION,
                event.action = event::action::NOTIFICATION_FAILED,
                event.entity_type = event::entity_type::DELIVERY_OUTCOME,
                event.entity_id = %outcome.id,
                event.result = event::result::FAILURE,
                notification.dedupe_key = %outcome.dedupe_key,
                notification.recipient = %outcome.recipient,
                error = outcome.failure_reason.as_deref().unwrap_or_default(),
                "通知メール送信失敗"
            );
        }

        self.ledger.record(&outcome).await
    }

    fn skip(&self, run: &mut DispatchRun, candidate_id: &str, dedupe_key: &str, reason: &str) {
        run.record_skipped();
        log_business_event!(
            event.category = event::category::NOTIFICATION,
            event.action = event::action::NOTIFICATION_SKIPPED,
            event.result = event::result::SKIPPED,
            notification.dedupe_key = dedupe_key,
            notification.candidate_id = candidate_id,
            reason,
            "通知をスキップ"
        );
    }
}

fn ledger_abort(e: InfraError) -> AbortReason {
    tracing::error!(
        error.category = log_error::category::INFRASTRUCTURE,
        error.kind = log_error::kind::LEDGER,
        error = %e,
        span_trace = %e.span_trace(),
        "配信台帳の操作に失敗"
    );
    AbortReason::Ledger(e.to_string())
}
