//! DispatchRunRepository 統合テスト
//!
//! 実行方法:
//! ```bash
//! cargo test -p notifier-infra --test dispatch_run_repository_test
//! ```

mod common;

use chrono::Duration;
use common::test_now;
use notifier_domain::dispatch_run::{AbortReason, DispatchRun, DispatchRunId, RunStatus};
use notifier_infra::repository::{DispatchRunRepository, PostgresDispatchRunRepository};
use pretty_assertions::assert_eq;
use sqlx::PgPool;

fn finished_run(started_offset_minutes: i64) -> DispatchRun {
    let started_at = test_now() + Duration::minutes(started_offset_minutes);
    let mut run = DispatchRun::start(DispatchRunId::new(), started_at);
    for _ in 0..2 {
        run.consider();
        run.record_sent();
    }
    run.consider();
    run.record_failed();
    run.finish(started_at + Duration::seconds(1));
    run
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_挿入したランをidで取得できる(pool: PgPool) {
    let sut = PostgresDispatchRunRepository::new(pool);
    let run = finished_run(0);

    sut.insert(&run).await.unwrap();
    let found = sut.find_by_id(run.id()).await.unwrap();

    assert_eq!(found, Some(run));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_中断理由を含むランを往復できる(pool: PgPool) {
    let sut = PostgresDispatchRunRepository::new(pool);
    let mut run = DispatchRun::start(DispatchRunId::new(), test_now());
    run.consider();
    run.abort(
        AbortReason::Ledger("connection refused".to_string()),
        test_now() + Duration::seconds(2),
    );

    sut.insert(&run).await.unwrap();
    let found = sut.find_by_id(run.id()).await.unwrap().unwrap();

    assert_eq!(found.status(), RunStatus::Aborted);
    assert_eq!(
        found.abort_reason(),
        Some(&AbortReason::Ledger("connection refused".to_string()))
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_list_recentは開始時刻の新しい順に返す(pool: PgPool) {
    let sut = PostgresDispatchRunRepository::new(pool);
    let old = finished_run(-120);
    let new = finished_run(-10);
    let middle = finished_run(-60);
    for run in [&old, &new, &middle] {
        sut.insert(run).await.unwrap();
    }

    let runs = sut.list_recent(2).await.unwrap();

    let ids: Vec<_> = runs.iter().map(|r| r.id().clone()).collect();
    assert_eq!(ids, vec![new.id().clone(), middle.id().clone()]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_存在しないidはnoneを返す(pool: PgPool) {
    let sut = PostgresDispatchRunRepository::new(pool);

    let found = sut.find_by_id(&DispatchRunId::new()).await.unwrap();

    assert!(found.is_none());
}
