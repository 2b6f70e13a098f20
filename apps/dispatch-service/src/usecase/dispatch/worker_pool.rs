//! # 配信ワーカープール
//!
//! 固定数のワーカーが 1 本の有界キューを共有し、メッセージを 1 件ずつ送信する。
//!
//! ## 設計方針
//!
//! - **並行数の上限**: 同時に実行される送信はワーカー数 `N` を超えない
//! - **背圧**: キューが満杯の間 `submit` は待機する。コーディネーターは
//!   プールの処理速度を超えて候補を取り込まない
//! - **失敗の隔離**: 送信エラー・タイムアウト・パニックはそのメッセージの
//!   [`DeliveryFailure`] として返し、ワーカーは次のメッセージに進む
//! - **リトライしない**: 再送は次回以降のランに任せる
//!
//! ```text
//! submit ──→ [ 有界キュー ] ──→ worker 0..N ──→ NotificationSender
//!   ↑                               │
//!   └──── DeliveryHandle ←─ oneshot ┘
//! ```

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use futures::FutureExt;
use notifier_domain::notification::{EmailMessage, NotificationError};
use notifier_infra::notification::NotificationSender;
use thiserror::Error;
use tokio::{
    sync::{Semaphore, mpsc, oneshot},
    task::JoinHandle,
};

/// プール生成時の設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// ワーカー数（同時送信数の上限）
    pub worker_count:   usize,
    /// キューに積めるメッセージ数
    pub queue_capacity: usize,
    /// 1 件あたりの送信タイムアウト
    pub send_timeout:   Duration,
}

/// プール操作のエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("ワーカー数は 1 以上である必要があります")]
    InvalidWorkerCount,

    #[error("キュー容量は 1 以上かつ上限以下である必要があります")]
    InvalidQueueCapacity,

    /// シャットダウン開始後の投入
    #[error("ワーカープールは停止しています")]
    Closed,
}

/// メッセージ 1 件の配信失敗
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// メールプロバイダが拒否した、または接続に失敗した
    #[error("{0}")]
    Rejected(String),

    #[error("送信がタイムアウトしました（{0:?}）")]
    Timeout(Duration),

    #[error("送信処理がパニックしました: {0}")]
    Panicked(String),

    /// ワーカーが結果を返さずに終了した
    #[error("配信ワーカーが応答しませんでした")]
    WorkerLost,
}

/// 配信結果の報告
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub message: Arc<EmailMessage>,
    pub result:  Result<(), DeliveryFailure>,
}

/// 投入したメッセージの配信完了を待つハンドル
///
/// `Future` として await すると [`DeliveryReport`] を返す。
pub struct DeliveryHandle {
    message: Arc<EmailMessage>,
    reply:   oneshot::Receiver<Result<(), DeliveryFailure>>,
}

impl Future for DeliveryHandle {
    type Output = DeliveryReport;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.reply).poll(cx).map(|reply| DeliveryReport {
            message: this.message.clone(),
            result:  reply.unwrap_or(Err(DeliveryFailure::WorkerLost)),
        })
    }
}

struct Job {
    message: Arc<EmailMessage>,
    reply:   oneshot::Sender<Result<(), DeliveryFailure>>,
}

/// 配信ワーカープール
pub struct DeliveryWorkerPool {
    queue:        Mutex<Option<mpsc::Sender<Job>>>,
    workers:      Mutex<Vec<JoinHandle<()>>>,
    in_flight:    Arc<AtomicUsize>,
    worker_count: usize,
}

impl DeliveryWorkerPool {
    /// ワーカーを起動してプールを作成する
    ///
    /// tokio ランタイム上で呼び出す必要がある。
    pub fn new(sender: Arc<dyn NotificationSender>, config: PoolConfig) -> Result<Self, PoolError> {
        if config.worker_count == 0 {
            return Err(PoolError::InvalidWorkerCount);
        }
        if config.queue_capacity == 0 || config.queue_capacity > Semaphore::MAX_PERMITS {
            return Err(PoolError::InvalidQueueCapacity);
        }

        let (tx, rx) = mpsc::channel::<Job>(config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let workers = (0..config.worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    rx.clone(),
                    sender.clone(),
                    config.send_timeout,
                    in_flight.clone(),
                ))
            })
            .collect();

        tracing::debug!(
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            "配信ワーカープールを起動しました"
        );

        Ok(Self {
            queue: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            in_flight,
            worker_count: config.worker_count,
        })
    }

    /// メッセージを投入する
    ///
    /// キューが満杯の場合は空きが出るまで待機する。
    /// シャットダウン開始後は [`PoolError::Closed`] を返す。
    pub async fn submit(&self, message: EmailMessage) -> Result<DeliveryHandle, PoolError> {
        let queue = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(PoolError::Closed)?;

        let message = Arc::new(message);
        let (reply_tx, reply_rx) = oneshot::channel();
        queue
            .send(Job {
                message: message.clone(),
                reply:   reply_tx,
            })
            .await
            .map_err(|_| PoolError::Closed)?;

        Ok(DeliveryHandle {
            message,
            reply: reply_rx,
        })
    }

    /// 投入を締め切り、キューに残ったメッセージを含めて処理し終えるまで待つ
    ///
    /// 2 回目以降の呼び出しは何もしない。
    pub async fn shutdown(&self) {
        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner()).take();
        if queue.is_none() {
            return;
        }
        drop(queue);

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "配信ワーカーが異常終了しました");
            }
        }
        tracing::debug!("配信ワーカープールを停止しました");
    }

    /// 送信中のメッセージ数
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    sender: Arc<dyn NotificationSender>,
    send_timeout: Duration,
    in_flight: Arc<AtomicUsize>,
) {
    loop {
        // 受信待ちの間だけロックを保持する
        let job = queue.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        in_flight.fetch_add(1, Ordering::SeqCst);
        let result = deliver(sender.as_ref(), &job.message, send_timeout).await;
        in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Err(failure) = &result {
            tracing::debug!(
                worker_id,
                dedupe_key = %job.message.dedupe_key,
                error = %failure,
                "メッセージの配信に失敗"
            );
        }

        // 受け手が既にいない場合は結果を捨てる
        let _ = job.reply.send(result);
    }
    tracing::trace!(worker_id, "配信ワーカーを終了します");
}

async fn deliver(
    sender: &dyn NotificationSender,
    message: &EmailMessage,
    send_timeout: Duration,
) -> Result<(), DeliveryFailure> {
    let send = AssertUnwindSafe(sender.send_email(message)).catch_unwind();

    match tokio::time::timeout(send_timeout, send).await {
        Err(_) => Err(DeliveryFailure::Timeout(send_timeout)),
        Ok(Err(panic)) => Err(DeliveryFailure::Panicked(panic_message(panic.as_ref()))),
        Ok(Ok(Err(NotificationError::SendFailed(reason)))) => Err(DeliveryFailure::Rejected(reason)),
        Ok(Ok(Err(other))) => Err(DeliveryFailure::Rejected(other.to_string())),
        Ok(Ok(Ok(()))) => Ok(()),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "不明なパニック".to_string()
    }
}
