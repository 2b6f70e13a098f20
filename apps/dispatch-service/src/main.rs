//! # Dispatch Service
//!
//! 期限を迎えたエンティティにリマインダーメールを一括配信するバッチサービス。
//!
//! ## 役割
//!
//! - **スケジュール起動**: cron 式（`DISPATCH_SCHEDULE`）に従って配信ランを実行
//! - **並行送信**: 有界のワーカープールでメールプロバイダへの同時接続数を制限
//! - **冪等性**: 配信台帳（`delivery_outcomes`）に送信済みの機会は再送しない
//!
//! ## 環境変数
//!
//! 一覧は [`notifier_dispatch_service::config`] を参照。
//!
//! ## 起動方法
//!
//! ```bash
//! # 開発環境（Mailpit に送信）
//! NOTIFICATION_BACKEND=smtp cargo run -p notifier-dispatch-service
//!
//! # 起動直後に 1 回だけ実行して確認する
//! DISPATCH_RUN_ON_START=true cargo run -p notifier-dispatch-service
//! ```
//!
//! ## 停止
//!
//! SIGINT / SIGTERM を受けると新しいランを開始せず、実行中のランは
//! 候補の取り込みを止めて送信中のメッセージを記録してから終了する。

use std::sync::Arc;

use notifier_dispatch_service::{
    config::{DispatchConfig, NotificationBackend},
    scheduler::DispatchScheduler,
    usecase::dispatch::{
        DeliveryWorkerPool,
        DispatchCoordinator,
        DispatchJob,
        PoolConfig,
        TemplateRenderer,
    },
};
use notifier_domain::clock::{Clock, SystemClock};
use notifier_infra::{
    db,
    notification::{NoopNotificationSender, NotificationSender, SmtpNotificationSender},
    repository::{PostgresCandidateSelector, PostgresDeliveryLedger, PostgresDispatchRunRepository},
};
use notifier_shared::observability::{TracingConfig, init_tracing};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Dispatch Service のエントリーポイント
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    // トレーシング初期化
    let tracing_config = TracingConfig::from_env("dispatch-service");
    let _app_span = init_tracing(&tracing_config).entered();

    // 設定読み込み
    let config = DispatchConfig::from_env()?;
    tracing::info!(
        schedule = %config.schedule,
        worker_count = config.pool.worker_count,
        queue_capacity = config.pool.queue_capacity,
        "Dispatch Service を起動します"
    );

    // データベース接続プールを作成
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("データベースに接続しました");

    // メール送信バックエンド
    let sender: Arc<dyn NotificationSender> = match config.notification.backend {
        NotificationBackend::Smtp => {
            tracing::info!(
                host = %config.notification.smtp_host,
                port = config.notification.smtp_port,
                "SMTP 送信を使用します"
            );
            Arc::new(SmtpNotificationSender::new(
                &config.notification.smtp_host,
                config.notification.smtp_port,
                config.notification.from_address.clone(),
            ))
        }
        NotificationBackend::Noop => {
            tracing::info!("Noop 送信を使用します（メールは送信されません）");
            Arc::new(NoopNotificationSender)
        }
    };

    // 依存コンポーネントを初期化
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let worker_pool = Arc::new(DeliveryWorkerPool::new(
        sender,
        PoolConfig {
            worker_count:   config.pool.worker_count,
            queue_capacity: config.pool.queue_capacity,
            send_timeout:   config.pool.send_timeout,
        },
    )?);
    let coordinator = DispatchCoordinator::new(
        Arc::new(PostgresDeliveryLedger::new(pool.clone())),
        Arc::new(TemplateRenderer::new()?),
        worker_pool.clone(),
        clock.clone(),
    );
    let job = Arc::new(DispatchJob::new(
        Arc::new(PostgresCandidateSelector::new(pool.clone())),
        coordinator,
        Arc::new(PostgresDispatchRunRepository::new(pool.clone())),
    ));
    let scheduler = DispatchScheduler::new(job.clone(), &config.schedule, clock.clone())?;

    // 停止シグナルでランを止める
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            wait_for_shutdown_signal().await;
            cancel.cancel();
        }
    });

    if config.run_on_start {
        job.execute(clock.now(), &cancel).await;
    }

    scheduler.run(cancel).await;

    worker_pool.shutdown().await;
    pool.close().await;
    tracing::info!("Dispatch Service を停止しました");

    Ok(())
}

/// SIGINT / SIGTERM を待つ
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C ハンドラを登録できませんでした");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM ハンドラを登録できませんでした");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT を受信しました"),
        _ = terminate => tracing::info!("SIGTERM を受信しました"),
    }
}
