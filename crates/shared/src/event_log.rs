//! # ビジネスイベントログとエラーコンテキストの構造化ヘルパー
//!
//! 配信ランの調査を `jq` で完結できるよう、ログフィールドの命名規約と
//! ヘルパーマクロを提供する。
//!
//! ## ビジネスイベント
//!
//! [`log_business_event!`] マクロで出力する。`event.kind = "business_event"` マーカーが
//! 自動付与され、`jq 'select(.["event.kind"] == "business_event")'` でフィルタできる。
//!
//! ## エラーコンテキスト
//!
//! `tracing::error!` に `error.category` + `error.kind` フィールドを直接追加する。
//! 定数は [`error`] モジュールで提供。
//!
//! ## フィールド命名規約
//!
//! ドット記法（`event.category`、`dispatch.run_id`）を使用する。JSON 出力では
//! フラットなキーになる。

/// ビジネスイベントを構造化ログとして出力する。
///
/// `event.kind = "business_event"` マーカーを自動付与し、
/// `tracing::info!` レベルで出力する。
///
/// ## 必須フィールド（慣例）
///
/// - `event.category`: イベントカテゴリ（[`event::category`] の定数を使用）
/// - `event.action`: アクション名（[`event::action`] の定数を使用）
/// - `event.result`: 結果（[`event::result`] の定数を使用）
///
/// ## 推奨フィールド
///
/// - `event.entity_type`: エンティティ種別（[`event::entity_type`] の定数を使用）
/// - `event.entity_id`: エンティティ ID
/// - `dispatch.run_id`: 配信ラン ID
#[macro_export]
macro_rules! log_business_event {
    ($($args:tt)*) => {
        ::tracing::info!(
            event.kind = "business_event",
            $($args)*
        )
    };
}

/// イベントフィールドの定数
pub mod event {
    /// イベントカテゴリ
    pub mod category {
        pub const DISPATCH: &str = "dispatch";
        pub const NOTIFICATION: &str = "notification";
    }

    /// イベントアクション
    pub mod action {
        // 配信ラン
        pub const DISPATCH_RUN_STARTED: &str = "dispatch_run.started";
        pub const DISPATCH_RUN_COMPLETED: &str = "dispatch_run.completed";
        pub const DISPATCH_RUN_ABORTED: &str = "dispatch_run.aborted";
        pub const DISPATCH_RUN_SKIPPED: &str = "dispatch_run.skipped";

        // 通知
        pub const NOTIFICATION_SENT: &str = "notification.sent";
        pub const NOTIFICATION_FAILED: &str = "notification.failed";
        pub const NOTIFICATION_SKIPPED: &str = "notification.skipped";
    }

    /// エンティティ種別
    pub mod entity_type {
        pub const DISPATCH_RUN: &str = "dispatch_run";
        pub const DELIVERY_OUTCOME: &str = "delivery_outcome";
    }

    /// イベント結果
    pub mod result {
        pub const SUCCESS: &str = "success";
        pub const FAILURE: &str = "failure";
        pub const SKIPPED: &str = "skipped";
    }
}

/// エラーコンテキストフィールドの定数
pub mod error {
    /// エラーカテゴリ
    pub mod category {
        /// インフラストラクチャ（DB、台帳、候補ストア）
        pub const INFRASTRUCTURE: &str = "infrastructure";
        /// 外部サービス呼び出し（メールプロバイダ）
        pub const EXTERNAL_SERVICE: &str = "external_service";
    }

    /// エラー種別
    pub mod kind {
        pub const DATABASE: &str = "database";
        pub const LEDGER: &str = "ledger";
        pub const SELECTION: &str = "selection";
        pub const INVALID_CANDIDATE: &str = "invalid_candidate";
        pub const TEMPLATE: &str = "template";
        pub const MAIL_DELIVERY: &str = "mail_delivery";
        pub const INTERNAL: &str = "internal";
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    /// ログ出力をメモリに溜めるライター
    #[derive(Clone, Default)]
    struct BufferWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn log_business_eventがevent_kindマーカーを付与する() {
        let writer = BufferWriter::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_writer(writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            log_business_event!(
                event.category = event::category::NOTIFICATION,
                event.action = event::action::NOTIFICATION_SENT,
                event.result = event::result::SUCCESS,
                "通知メール送信成功"
            );
        });

        let output = String::from_utf8(writer.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains(r#""event.kind":"business_event""#), "{output}");
        assert!(output.contains(r#""event.action":"notification.sent""#), "{output}");
    }

    #[test]
    fn アクション定数はカテゴリ接頭辞を持つ() {
        for action in [
            event::action::DISPATCH_RUN_STARTED,
            event::action::DISPATCH_RUN_COMPLETED,
            event::action::DISPATCH_RUN_ABORTED,
            event::action::DISPATCH_RUN_SKIPPED,
        ] {
            assert!(action.starts_with("dispatch_run."), "{action}");
        }
        for action in [
            event::action::NOTIFICATION_SENT,
            event::action::NOTIFICATION_FAILED,
            event::action::NOTIFICATION_SKIPPED,
        ] {
            assert!(action.starts_with("notification."), "{action}");
        }
    }
}
