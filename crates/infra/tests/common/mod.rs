//! テスト共通フィクスチャ
//!
//! DB を使用する統合テストで共通利用するデータ投入・エンティティ生成ヘルパー。
//! Rust の統合テスト規約に従い `tests/common/mod.rs` に配置。

// 各テストファイルが独立したクレートとしてコンパイルされるため、
// 使用しない関数に dead_code 警告が出る。モジュール全体で抑制する。
#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use notifier_domain::{
    dispatch_run::DispatchRunId,
    notification::{DeliveryOutcome, EmailMessage},
    value_objects::DedupeKey,
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

/// テスト用の固定日時
pub fn test_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// notification_schedules に 1 行投入する
///
/// `due_offset_minutes` は [`test_now`] からの相対分（負なら過去）。
pub async fn insert_schedule(
    pool: &PgPool,
    entity_id: &str,
    email: &str,
    dedupe_key: &str,
    due_offset_minutes: i64,
) {
    sqlx::query(
        r#"
        INSERT INTO notification_schedules (
            id, entity_id, recipient_email, dedupe_key, template, payload, due_at
        )
        VALUES ($1, $2, $3, $4, 'reminder', $5, $6)
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(entity_id)
    .bind(email)
    .bind(dedupe_key)
    .bind(json!({"name": entity_id}))
    .bind(test_now() + Duration::minutes(due_offset_minutes))
    .execute(pool)
    .await
    .expect("notification_schedules への投入に失敗");
}

/// テスト用の送信メッセージを作成する
pub fn make_message(candidate_id: &str, dedupe_key: &str) -> EmailMessage {
    EmailMessage {
        to:           format!("{candidate_id}@example.com"),
        subject:      "お知らせ".to_string(),
        html_body:    "<p>本文</p>".to_string(),
        text_body:    "本文".to_string(),
        dedupe_key:   DedupeKey::new(dedupe_key).unwrap(),
        candidate_id: candidate_id.to_string(),
    }
}

/// 送信成功の配信結果を作成する
pub fn sent_outcome(run_id: &DispatchRunId, candidate_id: &str, dedupe_key: &str) -> DeliveryOutcome {
    DeliveryOutcome::sent(
        run_id.clone(),
        &make_message(candidate_id, dedupe_key),
        test_now(),
    )
}

/// 送信失敗の配信結果を作成する
pub fn failed_outcome(
    run_id: &DispatchRunId,
    candidate_id: &str,
    dedupe_key: &str,
    reason: &str,
) -> DeliveryOutcome {
    DeliveryOutcome::failed(
        run_id.clone(),
        &make_message(candidate_id, dedupe_key),
        reason,
        test_now(),
    )
}
