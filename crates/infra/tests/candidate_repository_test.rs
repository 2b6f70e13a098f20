//! CandidateSelector 統合テスト
//!
//! 実行方法:
//! ```bash
//! cargo test -p notifier-infra --test candidate_repository_test
//! ```

mod common;

use common::{insert_schedule, sent_outcome, test_now};
use futures::TryStreamExt;
use notifier_domain::{
    dispatch_run::DispatchRunId,
    notification::{Candidate, SelectedCandidate},
};
use notifier_infra::repository::{
    CandidateSelector,
    DeliveryLedger,
    PostgresCandidateSelector,
    PostgresDeliveryLedger,
};
use pretty_assertions::assert_eq;
use sqlx::PgPool;

fn ready(items: Vec<SelectedCandidate>) -> Vec<Candidate> {
    items
        .into_iter()
        .map(|item| match item {
            SelectedCandidate::Ready(candidate) => candidate,
            SelectedCandidate::Malformed(m) => panic!("不正な候補が含まれている: {m:?}"),
        })
        .collect()
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_期限を迎えた候補だけを期限順に返す(pool: PgPool) {
    insert_schedule(&pool, "later", "later@example.com", "later:1", 30).await;
    insert_schedule(&pool, "second", "second@example.com", "second:1", -5).await;
    insert_schedule(&pool, "first", "first@example.com", "first:1", -60).await;
    let sut = PostgresCandidateSelector::new(pool);

    let candidates = ready(sut.select_due(test_now()).try_collect().await.unwrap());

    let ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second"]);
    assert_eq!(candidates[0].recipient.as_str(), "first@example.com");
    assert_eq!(candidates[0].template, "reminder");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_送信済みの重複排除キーは候補に含まれない(pool: PgPool) {
    insert_schedule(&pool, "done", "done@example.com", "done:1", -10).await;
    insert_schedule(&pool, "todo", "todo@example.com", "todo:1", -10).await;
    PostgresDeliveryLedger::new(pool.clone())
        .record(&sent_outcome(&DispatchRunId::new(), "done", "done:1"))
        .await
        .unwrap();
    let sut = PostgresCandidateSelector::new(pool);

    let candidates = ready(sut.select_due(test_now()).try_collect().await.unwrap());

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].id, "todo");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_不正な行はmalformedとして流れ後続の候補も返る(pool: PgPool) {
    insert_schedule(&pool, "broken", "not-an-email", "broken:1", -20).await;
    insert_schedule(&pool, "after", "after@example.com", "after:1", -10).await;
    let sut = PostgresCandidateSelector::new(pool);

    let items: Vec<SelectedCandidate> = sut.select_due(test_now()).try_collect().await.unwrap();

    assert_eq!(items.len(), 2);
    let SelectedCandidate::Malformed(broken) = &items[0] else {
        panic!("先頭は不正な候補になること: {:?}", items[0]);
    };
    assert_eq!(broken.id, "broken");
    assert_eq!(broken.recipient, "not-an-email");
    assert_eq!(
        broken.dedupe_key.as_ref().map(|k| k.as_str()),
        Some("broken:1")
    );
    assert!(matches!(&items[1], SelectedCandidate::Ready(c) if c.id == "after"));
}
