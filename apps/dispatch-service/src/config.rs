//! # Dispatch Service 設定
//!
//! 環境変数から配信サービスの設定を読み込む。
//!
//! | 変数名 | 必須 | デフォルト |
//! |--------|------|-----------|
//! | `DATABASE_URL` | **Yes** | |
//! | `DISPATCH_SCHEDULE` | No | `0 0 9 * * * *`（毎日 9:00 UTC） |
//! | `DISPATCH_WORKER_COUNT` | No | `4` |
//! | `DISPATCH_QUEUE_CAPACITY` | No | ワーカー数 × 2 |
//! | `DISPATCH_SEND_TIMEOUT_SECS` | No | `30` |
//! | `DISPATCH_RUN_ON_START` | No | `false` |
//! | `NOTIFICATION_BACKEND` | No | `noop` |
//! | `SMTP_HOST` / `SMTP_PORT` | No | `localhost` / `1025` |
//! | `NOTIFICATION_FROM_ADDRESS` | No | `noreply@notifier.example.com` |

use std::{env, str::FromStr, time::Duration};

use thiserror::Error;

pub const DEFAULT_SCHEDULE: &str = "0 0 9 * * * *";
const DEFAULT_WORKER_COUNT: usize = 4;
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;

/// 設定エラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} が設定されていません")]
    Missing(&'static str),

    #[error("{name} の値が不正です: {value}（{reason}）")]
    Invalid {
        name:   &'static str,
        value:  String,
        reason: String,
    },
}

/// Dispatch Service の設定
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// データベース接続 URL
    pub database_url: String,
    /// 起動スケジュール（cron 式、秒フィールドあり）
    pub schedule:     String,
    /// 起動直後に 1 回実行するか
    pub run_on_start: bool,
    /// ワーカープール設定
    pub pool:         PoolSettings,
    /// 通知設定
    pub notification: NotificationConfig,
}

/// ワーカープールの設定値
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub worker_count:   usize,
    pub queue_capacity: usize,
    pub send_timeout:   Duration,
}

/// 送信バックエンド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationBackend {
    /// SMTP サーバー経由で送信
    Smtp,
    /// 送信しない（ログ出力のみ）
    Noop,
}

impl FromStr for NotificationBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smtp" => Ok(Self::Smtp),
            "noop" => Ok(Self::Noop),
            other => Err(format!("smtp または noop を指定してください: {other}")),
        }
    }
}

/// 通知機能の設定
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationConfig {
    pub backend:      NotificationBackend,
    pub smtp_host:    String,
    pub smtp_port:    u16,
    pub from_address: String,
}

impl DispatchConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// キー → 値の関数から設定を読み込む
    ///
    /// 空文字列は未設定として扱う。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let worker_count: usize =
            parse_or("DISPATCH_WORKER_COUNT", get("DISPATCH_WORKER_COUNT"), DEFAULT_WORKER_COUNT)?;
        if worker_count == 0 {
            return Err(ConfigError::Invalid {
                name:   "DISPATCH_WORKER_COUNT",
                value:  "0".to_string(),
                reason: "1 以上を指定してください".to_string(),
            });
        }

        let queue_capacity: usize = parse_or(
            "DISPATCH_QUEUE_CAPACITY",
            get("DISPATCH_QUEUE_CAPACITY"),
            worker_count.saturating_mul(2),
        )?;
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                name:   "DISPATCH_QUEUE_CAPACITY",
                value:  "0".to_string(),
                reason: "1 以上を指定してください".to_string(),
            });
        }

        let send_timeout_secs: u64 = parse_or(
            "DISPATCH_SEND_TIMEOUT_SECS",
            get("DISPATCH_SEND_TIMEOUT_SECS"),
            DEFAULT_SEND_TIMEOUT_SECS,
        )?;

        let run_on_start: bool =
            parse_or("DISPATCH_RUN_ON_START", get("DISPATCH_RUN_ON_START"), false)?;

        Ok(Self {
            database_url,
            schedule: get("DISPATCH_SCHEDULE").unwrap_or_else(|| DEFAULT_SCHEDULE.to_string()),
            run_on_start,
            pool: PoolSettings {
                worker_count,
                queue_capacity,
                send_timeout: Duration::from_secs(send_timeout_secs),
            },
            notification: NotificationConfig {
                backend:      parse_or(
                    "NOTIFICATION_BACKEND",
                    get("NOTIFICATION_BACKEND"),
                    NotificationBackend::Noop,
                )?,
                smtp_host:    get("SMTP_HOST").unwrap_or_else(|| "localhost".to_string()),
                smtp_port:    parse_or("SMTP_PORT", get("SMTP_PORT"), 1025)?,
                from_address: get("NOTIFICATION_FROM_ADDRESS")
                    .unwrap_or_else(|| "noreply@notifier.example.com".to_string()),
            },
        })
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    impl DispatchConfig {
        fn from_map(vars: &HashMap<&str, &str>) -> Result<Self, ConfigError> {
            Self::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
        }
    }

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([("DATABASE_URL", "postgres://localhost/notifier")])
    }

    #[test]
    fn 必須項目だけでデフォルト値が使われる() {
        let config = DispatchConfig::from_map(&base_vars()).unwrap();

        assert_eq!(config.schedule, DEFAULT_SCHEDULE);
        assert!(!config.run_on_start);
        assert_eq!(
            config.pool,
            PoolSettings {
                worker_count:   4,
                queue_capacity: 8,
                send_timeout:   Duration::from_secs(30),
            }
        );
        assert_eq!(config.notification.backend, NotificationBackend::Noop);
        assert_eq!(config.notification.smtp_port, 1025);
    }

    #[test]
    fn database_urlがないとmissingになる() {
        let result = DispatchConfig::from_map(&HashMap::new());
        assert_eq!(result, Err(ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn キュー容量はワーカー数の2倍がデフォルト() {
        let mut vars = base_vars();
        vars.insert("DISPATCH_WORKER_COUNT", "3");

        let config = DispatchConfig::from_map(&vars).unwrap();

        assert_eq!(config.pool.worker_count, 3);
        assert_eq!(config.pool.queue_capacity, 6);
    }

    #[test]
    fn 巨大なワーカー数でもキュー容量の計算はあふれない() {
        let mut vars = base_vars();
        vars.insert("DISPATCH_WORKER_COUNT", "18446744073709551615");

        let config = DispatchConfig::from_map(&vars).unwrap();

        assert_eq!(config.pool.worker_count, usize::MAX);
        assert_eq!(config.pool.queue_capacity, usize::MAX);
    }

    #[rstest]
    #[case("DISPATCH_WORKER_COUNT", "0")]
    #[case("DISPATCH_WORKER_COUNT", "-1")]
    #[case("DISPATCH_WORKER_COUNT", "many")]
    #[case("DISPATCH_QUEUE_CAPACITY", "0")]
    #[case("DISPATCH_SEND_TIMEOUT_SECS", "abc")]
    #[case("DISPATCH_RUN_ON_START", "yes")]
    #[case("NOTIFICATION_BACKEND", "ses")]
    #[case("SMTP_PORT", "70000")]
    fn 不正な値はinvalidになる(#[case] name: &'static str, #[case] value: &'static str) {
        let mut vars = base_vars();
        vars.insert(name, value);

        let result = DispatchConfig::from_map(&vars);

        assert!(
            matches!(result, Err(ConfigError::Invalid { name: n, .. }) if n == name),
            "{name}={value} は Invalid になるべき: {result:?}"
        );
    }

    #[test]
    fn backendは大文字小文字を区別しない() {
        let mut vars = base_vars();
        vars.insert("NOTIFICATION_BACKEND", " SMTP ");

        let config = DispatchConfig::from_map(&vars).unwrap();

        assert_eq!(config.notification.backend, NotificationBackend::Smtp);
    }
}
