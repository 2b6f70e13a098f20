//! 代表シナリオの統合テスト
//!
//! ワーカー 2、候補 A/B/C、送信 100ms、B はプロバイダに拒否される。

mod helpers;

use std::time::Duration;

use helpers::{Harness, candidate, email_of, stream_of};
use notifier_domain::{
    dispatch_run::{RunCounts, RunStatus},
    notification::DeliveryStatus,
};
use notifier_infra::{mock::MockNotificationSender, repository::DeliveryLedger};
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_ワーカー2で3件送信し1件失敗するラン() {
    let sender = MockNotificationSender::new().with_delay(Duration::from_millis(100));
    sender.fail_for(&email_of("b"), "provider rejected");
    let harness = Harness::new(2, sender);
    let started = Instant::now();

    let run = harness
        .coordinator
        .run_once(
            stream_of(vec![candidate("a"), candidate("b"), candidate("c")]),
            &CancellationToken::new(),
        )
        .await;

    // 2 並列なので 2 波で終わる
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200), "elapsed: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(300), "elapsed: {elapsed:?}");

    assert_eq!(run.status(), RunStatus::CompletedWithFailures);
    assert_eq!(
        run.counts(),
        RunCounts {
            considered: 3,
            sent:       2,
            failed:     1,
            skipped:    0,
        }
    );

    let outcomes = harness.ledger.find_by_run(run.id()).await.unwrap();
    assert_eq!(outcomes.len(), 3);
    let failed: Vec<_> = outcomes
        .iter()
        .filter(|o| o.status == DeliveryStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].candidate_id, "b");
    assert_eq!(failed[0].failure_reason.as_deref(), Some("provider rejected"));
    assert_eq!(harness.sender.max_in_flight(), 2);
}
