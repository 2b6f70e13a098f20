//! 統合テスト共通ヘルパー
//!
//! インメモリモックでコーディネーター・ジョブを組み立てる。

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use notifier_dispatch_service::usecase::dispatch::{
    DeliveryWorkerPool,
    DispatchCoordinator,
    DispatchJob,
    PoolConfig,
    REMINDER_TEMPLATE,
    TemplateRenderer,
};
use notifier_domain::{
    clock::FixedClock,
    notification::{Candidate, MalformedCandidate, SelectedCandidate},
    value_objects::{DedupeKey, Email},
};
use notifier_infra::{
    InfraError,
    mock::{
        MockCandidateSelector,
        MockDeliveryLedger,
        MockDispatchRunRepository,
        MockNotificationSender,
    },
};
use serde_json::json;

/// テスト用の固定日時
pub fn test_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// reminder テンプレートを使う候補を作成する
pub fn candidate(name: &str) -> Candidate {
    candidate_with_template(name, REMINDER_TEMPLATE)
}

pub fn candidate_with_template(name: &str, template: &str) -> Candidate {
    Candidate {
        id:         name.to_string(),
        recipient:  Email::new(format!("{name}@example.com")).unwrap(),
        dedupe_key: DedupeKey::for_occasion(name, "2026-10").unwrap(),
        template:   template.to_string(),
        payload:    json!({"name": name, "title": "お知らせ"}),
    }
}

pub fn email_of(name: &str) -> String {
    format!("{name}@example.com")
}

/// 送信先が不正な候補（重複排除キーは正しい）
pub fn malformed(name: &str) -> MalformedCandidate {
    MalformedCandidate {
        id:         name.to_string(),
        recipient:  format!("{name}-at-example.com"),
        dedupe_key: Some(DedupeKey::for_occasion(name, "2026-10").unwrap()),
        reason:     "送信先が不正です: メールアドレスの形式が不正です".to_string(),
    }
}

/// 候補の列をストリームにする
pub fn stream_of(
    candidates: Vec<Candidate>,
) -> BoxStream<'static, Result<SelectedCandidate, InfraError>> {
    items_of(candidates.into_iter().map(SelectedCandidate::from).collect())
}

/// 読み出し結果の列をストリームにする
pub fn items_of(
    items: Vec<SelectedCandidate>,
) -> BoxStream<'static, Result<SelectedCandidate, InfraError>> {
    futures::stream::iter(items.into_iter().map(Ok)).boxed()
}

/// モック一式とコーディネーター
pub struct Harness {
    pub sender:      MockNotificationSender,
    pub ledger:      MockDeliveryLedger,
    pub pool:        Arc<DeliveryWorkerPool>,
    pub coordinator: DispatchCoordinator,
    pub clock:       Arc<FixedClock>,
}

impl Harness {
    pub fn new(worker_count: usize, sender: MockNotificationSender) -> Self {
        Self::with_ledger(worker_count, sender, MockDeliveryLedger::new())
    }

    pub fn with_ledger(
        worker_count: usize,
        sender: MockNotificationSender,
        ledger: MockDeliveryLedger,
    ) -> Self {
        Self::build(
            PoolConfig {
                worker_count,
                queue_capacity: worker_count * 2,
                send_timeout: Duration::from_secs(5),
            },
            sender,
            ledger,
        )
    }

    pub fn build(config: PoolConfig, sender: MockNotificationSender, ledger: MockDeliveryLedger) -> Self {
        let clock = Arc::new(FixedClock::new(test_now()));
        let pool = Arc::new(DeliveryWorkerPool::new(Arc::new(sender.clone()), config).unwrap());
        let coordinator = DispatchCoordinator::new(
            Arc::new(ledger.clone()),
            Arc::new(TemplateRenderer::new().unwrap()),
            pool.clone(),
            clock.clone(),
        );
        Self {
            sender,
            ledger,
            pool,
            coordinator,
            clock,
        }
    }

    /// 同じ構成で DispatchJob を組み立てる
    pub fn into_job(
        self,
        selector: MockCandidateSelector,
        runs: MockDispatchRunRepository,
    ) -> DispatchJob {
        DispatchJob::new(Arc::new(selector), self.coordinator, Arc::new(runs))
    }
}
