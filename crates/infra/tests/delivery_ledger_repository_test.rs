//! DeliveryLedger 統合テスト
//!
//! データベースを使用したテスト。sqlx::test マクロがテストごとに
//! 独立したデータベースを作成し、マイグレーションを適用する。
//!
//! 実行方法:
//! ```bash
//! cargo test -p notifier-infra --test delivery_ledger_repository_test
//! ```

mod common;

use common::{failed_outcome, sent_outcome};
use notifier_domain::{
    dispatch_run::DispatchRunId,
    notification::DeliveryStatus,
    value_objects::DedupeKey,
};
use notifier_infra::repository::{DeliveryLedger, PostgresDeliveryLedger};
use pretty_assertions::assert_eq;
use sqlx::PgPool;

#[sqlx::test(migrations = "../../migrations")]
async fn test_送信成功を記録するとhas_sentがtrueになる(pool: PgPool) {
    let sut = PostgresDeliveryLedger::new(pool);
    let run_id = DispatchRunId::new();
    let key = DedupeKey::new("user-1:2026-10").unwrap();

    assert!(!sut.has_sent(&key).await.unwrap());

    sut.record(&sent_outcome(&run_id, "user-1", "user-1:2026-10"))
        .await
        .unwrap();

    assert!(sut.has_sent(&key).await.unwrap());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_失敗の記録ではhas_sentはfalseのまま(pool: PgPool) {
    let sut = PostgresDeliveryLedger::new(pool);
    let run_id = DispatchRunId::new();
    let key = DedupeKey::new("user-2:2026-10").unwrap();

    sut.record(&failed_outcome(
        &run_id,
        "user-2",
        "user-2:2026-10",
        "provider rejected",
    ))
    .await
    .unwrap();

    assert!(!sut.has_sent(&key).await.unwrap());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_同じキーの送信成功は二重に記録されない(pool: PgPool) {
    let sut = PostgresDeliveryLedger::new(pool.clone());
    let first_run = DispatchRunId::new();
    let second_run = DispatchRunId::new();

    sut.record(&sent_outcome(&first_run, "user-3", "user-3:2026-10"))
        .await
        .unwrap();
    sut.record(&sent_outcome(&second_run, "user-3", "user-3:2026-10"))
        .await
        .unwrap();

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM delivery_outcomes WHERE dedupe_key = 'user-3:2026-10'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_find_by_runはランの結果だけを返す(pool: PgPool) {
    let sut = PostgresDeliveryLedger::new(pool);
    let run_id = DispatchRunId::new();
    let other_run = DispatchRunId::new();

    let sent = sent_outcome(&run_id, "a", "a:1");
    let failed = failed_outcome(&run_id, "b", "b:1", "provider rejected");
    sut.record(&sent).await.unwrap();
    sut.record(&failed).await.unwrap();
    sut.record(&sent_outcome(&other_run, "c", "c:1"))
        .await
        .unwrap();

    let outcomes = sut.find_by_run(&run_id).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.contains(&sent));
    let stored_failed = outcomes
        .iter()
        .find(|o| o.status == DeliveryStatus::Failed)
        .unwrap();
    assert_eq!(
        stored_failed.failure_reason.as_deref(),
        Some("provider rejected")
    );
}
