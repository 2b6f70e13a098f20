//! # Dispatch Service ライブラリ
//!
//! 一括通知配信のユースケースとスケジューラを公開する。
//! バイナリ（`main.rs`）と統合テストから利用する。

pub mod config;
pub mod scheduler;
pub mod usecase;
