//! # テスト用モック
//!
//! ユースケーステストで使用するインメモリモック。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! notifier-infra = { workspace = true, features = ["test-utils"] }
//! ```

use std::{
   collections::{HashMap, HashSet},
   sync::{
      Arc,
      Mutex,
      atomic::{AtomicBool, AtomicUsize, Ordering},
   },
   time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use notifier_domain::{
   dispatch_run::{DispatchRun, DispatchRunId},
   notification::{
      Candidate,
      DeliveryOutcome,
      EmailMessage,
      MalformedCandidate,
      NotificationError,
      SelectedCandidate,
   },
   value_objects::DedupeKey,
};

use crate::{
   error::InfraError,
   notification::NotificationSender,
   repository::{CandidateSelector, DeliveryLedger, DispatchRunRepository},
};

// ===== MockNotificationSender =====

/// 送信内容を記録するメール送信モック
///
/// - `with_delay`: 1 件ごとの送信所要時間（tokio の仮想時間でも動作する）
/// - `fail_for`: 指定した宛先への送信を失敗させる
/// - `panic_for`: 指定した宛先への送信でパニックさせる
/// - `max_in_flight`: 同時に実行中だった送信数の最大値
#[derive(Clone, Default)]
pub struct MockNotificationSender {
   sent:          Arc<Mutex<Vec<EmailMessage>>>,
   attempts:      Arc<AtomicUsize>,
   failures:      Arc<Mutex<HashMap<String, String>>>,
   panics:        Arc<Mutex<HashSet<String>>>,
   delay:         Option<Duration>,
   in_flight:     Arc<AtomicUsize>,
   max_in_flight: Arc<AtomicUsize>,
}

impl MockNotificationSender {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_delay(mut self, delay: Duration) -> Self {
      self.delay = Some(delay);
      self
   }

   pub fn fail_for(&self, to: &str, reason: &str) {
      self
         .failures
         .lock()
         .unwrap()
         .insert(to.to_string(), reason.to_string());
   }

   pub fn panic_for(&self, to: &str) {
      self.panics.lock().unwrap().insert(to.to_string());
   }

   /// 送信に成功したメッセージ
   pub fn sent_messages(&self) -> Vec<EmailMessage> {
      self.sent.lock().unwrap().clone()
   }

   /// 送信を試みた回数（成功・失敗を含む）
   pub fn attempts(&self) -> usize {
      self.attempts.load(Ordering::SeqCst)
   }

   pub fn max_in_flight(&self) -> usize {
      self.max_in_flight.load(Ordering::SeqCst)
   }
}

/// 実行中カウンタをドロップ時に戻す（パニック時も含む）
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
   fn drop(&mut self) {
      self.0.fetch_sub(1, Ordering::SeqCst);
   }
}

#[async_trait]
impl NotificationSender for MockNotificationSender {
   async fn send_email(&self, email: &EmailMessage) -> Result<(), NotificationError> {
      self.attempts.fetch_add(1, Ordering::SeqCst);
      let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
      let _guard = InFlightGuard(self.in_flight.clone());
      self.max_in_flight.fetch_max(current, Ordering::SeqCst);

      if let Some(delay) = self.delay {
         tokio::time::sleep(delay).await;
      }

      if self.panics.lock().unwrap().contains(&email.to) {
         panic!("mock sender panicked for {}", email.to);
      }

      let failure = self.failures.lock().unwrap().get(&email.to).cloned();
      if let Some(reason) = failure {
         return Err(NotificationError::SendFailed(reason));
      }

      self.sent.lock().unwrap().push(email.clone());
      Ok(())
   }
}

// ===== MockDeliveryLedger =====

#[derive(Clone, Default)]
pub struct MockDeliveryLedger {
   outcomes:        Arc<Mutex<Vec<DeliveryOutcome>>>,
   previously_sent: Arc<Mutex<HashSet<String>>>,
   fail_has_sent:   Arc<AtomicBool>,
   fail_record:     Arc<AtomicBool>,
   has_sent_calls:  Arc<AtomicUsize>,
}

impl MockDeliveryLedger {
   pub fn new() -> Self {
      Self::default()
   }

   /// 過去のランで送信済みだったことにする
   pub fn mark_sent(&self, key: &DedupeKey) {
      self.previously_sent.lock().unwrap().insert(key.as_str().to_string());
   }

   /// 以降の `has_sent` をエラーにする
   pub fn fail_on_has_sent(&self) {
      self.fail_has_sent.store(true, Ordering::SeqCst);
   }

   /// 以降の `record` をエラーにする
   pub fn fail_on_record(&self) {
      self.fail_record.store(true, Ordering::SeqCst);
   }

   pub fn outcomes(&self) -> Vec<DeliveryOutcome> {
      self.outcomes.lock().unwrap().clone()
   }

   pub fn has_sent_calls(&self) -> usize {
      self.has_sent_calls.load(Ordering::SeqCst)
   }
}

#[async_trait]
impl DeliveryLedger for MockDeliveryLedger {
   async fn has_sent(&self, dedupe_key: &DedupeKey) -> Result<bool, InfraError> {
      self.has_sent_calls.fetch_add(1, Ordering::SeqCst);
      if self.fail_has_sent.load(Ordering::SeqCst) {
         return Err(InfraError::unexpected("配信台帳に接続できません"));
      }
      if self.previously_sent.lock().unwrap().contains(dedupe_key.as_str()) {
         return Ok(true);
      }
      Ok(self
         .outcomes
         .lock()
         .unwrap()
         .iter()
         .any(|o| o.is_sent() && &o.dedupe_key == dedupe_key))
   }

   async fn record(&self, outcome: &DeliveryOutcome) -> Result<(), InfraError> {
      if self.fail_record.load(Ordering::SeqCst) {
         return Err(InfraError::unexpected("配信台帳に接続できません"));
      }
      let mut outcomes = self.outcomes.lock().unwrap();
      // sent は重複排除キーごとに 1 行だけ
      if outcome.is_sent()
         && outcomes
            .iter()
            .any(|o| o.is_sent() && o.dedupe_key == outcome.dedupe_key)
      {
         return Ok(());
      }
      outcomes.push(outcome.clone());
      Ok(())
   }

   async fn find_by_run(
      &self,
      run_id: &DispatchRunId,
   ) -> Result<Vec<DeliveryOutcome>, InfraError> {
      Ok(self
         .outcomes
         .lock()
         .unwrap()
         .iter()
         .filter(|o| &o.run_id == run_id)
         .cloned()
         .collect())
   }
}

// ===== MockCandidateSelector =====

/// 固定の候補列を返す候補ストアモック
///
/// `fail_after(n, msg)` で n 件目の後にエラーを流す。
#[derive(Clone, Default)]
pub struct MockCandidateSelector {
   candidates: Arc<Mutex<Vec<SelectedCandidate>>>,
   fail_after: Arc<Mutex<Option<(usize, String)>>>,
   cutoffs:    Arc<Mutex<Vec<DateTime<Utc>>>>,
}

impl MockCandidateSelector {
   pub fn new(candidates: Vec<Candidate>) -> Self {
      Self {
         candidates: Arc::new(Mutex::new(
            candidates.into_iter().map(SelectedCandidate::from).collect(),
         )),
         ..Default::default()
      }
   }

   /// 保存値が不正な候補を末尾に追加する
   pub fn push_malformed(&self, candidate: MalformedCandidate) {
      self.candidates.lock().unwrap().push(candidate.into());
   }

   pub fn fail_after(&self, count: usize, message: &str) {
      *self.fail_after.lock().unwrap() = Some((count, message.to_string()));
   }

   /// `select_due` に渡されたカットオフ時刻
   pub fn cutoffs(&self) -> Vec<DateTime<Utc>> {
      self.cutoffs.lock().unwrap().clone()
   }
}

impl CandidateSelector for MockCandidateSelector {
   fn select_due(
      &self,
      cutoff: DateTime<Utc>,
   ) -> BoxStream<'_, Result<SelectedCandidate, InfraError>> {
      self.cutoffs.lock().unwrap().push(cutoff);

      let candidates = self.candidates.lock().unwrap().clone();
      let fail_after = self.fail_after.lock().unwrap().clone();

      let items: Vec<Result<SelectedCandidate, InfraError>> = match fail_after {
         Some((count, message)) => candidates
            .into_iter()
            .take(count)
            .map(Ok)
            .chain(std::iter::once(Err(InfraError::unexpected(message))))
            .collect(),
         None => candidates.into_iter().map(Ok).collect(),
      };

      futures::stream::iter(items).boxed()
   }
}

// ===== MockDispatchRunRepository =====

#[derive(Clone, Default)]
pub struct MockDispatchRunRepository {
   runs:        Arc<Mutex<Vec<DispatchRun>>>,
   fail_insert: Arc<AtomicBool>,
}

impl MockDispatchRunRepository {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn fail_on_insert(&self) {
      self.fail_insert.store(true, Ordering::SeqCst);
   }

   pub fn runs(&self) -> Vec<DispatchRun> {
      self.runs.lock().unwrap().clone()
   }
}

#[async_trait]
impl DispatchRunRepository for MockDispatchRunRepository {
   async fn insert(&self, run: &DispatchRun) -> Result<(), InfraError> {
      if self.fail_insert.load(Ordering::SeqCst) {
         return Err(InfraError::unexpected("dispatch_runs に書き込めません"));
      }
      self.runs.lock().unwrap().push(run.clone());
      Ok(())
   }

   async fn find_by_id(&self, id: &DispatchRunId) -> Result<Option<DispatchRun>, InfraError> {
      Ok(self
         .runs
         .lock()
         .unwrap()
         .iter()
         .find(|r| r.id() == id)
         .cloned())
   }

   async fn list_recent(&self, limit: i64) -> Result<Vec<DispatchRun>, InfraError> {
      let mut runs = self.runs.lock().unwrap().clone();
      runs.sort_by_key(|r| std::cmp::Reverse(r.started_at()));
      runs.truncate(usize::try_from(limit).unwrap_or(0));
      Ok(runs)
   }
}
