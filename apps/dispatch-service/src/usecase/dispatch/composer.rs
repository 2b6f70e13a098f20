//! # メッセージ組み立て
//!
//! 配信候補 1 件を送信メッセージ 1 件に変換する。
//!
//! ## 設計方針
//!
//! - **`include_str!` によるコンパイル時埋め込み**: 標準テンプレート `reminder` はバイナリに埋め込む
//! - **3 パート構成**: テンプレート名ごとに `{name}.subject` / `{name}.html` / `{name}.txt`
//! - **コンテキスト**: 候補のペイロード（JSON オブジェクト）に `recipient` と `candidate_id` を加える
//! - **純粋関数**: 外部 I/O は行わない。失敗は `NotificationError::TemplateFailed` で返し、
//!   呼び出し側はその候補を `failed` として記録する

use notifier_domain::notification::{Candidate, EmailMessage, NotificationError};
use tera::{Context, Tera};

/// 標準で登録されるテンプレート名
pub const REMINDER_TEMPLATE: &str = "reminder";

/// 候補からメッセージを組み立てるトレイト
pub trait MessageComposer: Send + Sync {
    fn compose(&self, candidate: &Candidate) -> Result<EmailMessage, NotificationError>;
}

/// テンプレートレンダラー
///
/// tera テンプレートエンジンをラップし、`Candidate` から `EmailMessage` を生成する。
pub struct TemplateRenderer {
    engine: Tera,
}

impl TemplateRenderer {
    /// 新しいレンダラーインスタンスを作成
    ///
    /// `include_str!` で埋め込んだ標準テンプレートを tera に登録する。
    pub fn new() -> Result<Self, NotificationError> {
        let mut renderer = Self {
            engine: Tera::default(),
        };

        renderer.register(
            REMINDER_TEMPLATE,
            include_str!("../../../templates/notifications/reminder.subject"),
            include_str!("../../../templates/notifications/reminder.html"),
            include_str!("../../../templates/notifications/reminder.txt"),
        )?;

        Ok(renderer)
    }

    /// テンプレートを登録する（同名は上書き）
    pub fn register(
        &mut self,
        name: &str,
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<(), NotificationError> {
        self.engine
            .add_raw_templates(vec![
                (format!("{name}.subject"), subject),
                (format!("{name}.html"), html),
                (format!("{name}.txt"), text),
            ])
            .map_err(|e| NotificationError::TemplateFailed(describe(&e)))
    }

    /// 登録済みテンプレートかどうか
    pub fn has_template(&self, name: &str) -> bool {
        let subject = format!("{name}.subject");
        self.engine.get_template_names().any(|n| n == subject)
    }

    fn build_context(candidate: &Candidate) -> Result<Context, NotificationError> {
        let mut context = match &candidate.payload {
            serde_json::Value::Null => Context::new(),
            payload @ serde_json::Value::Object(_) => Context::from_value(payload.clone())
                .map_err(|e| NotificationError::TemplateFailed(describe(&e)))?,
            other => {
                return Err(NotificationError::TemplateFailed(format!(
                    "ペイロードは JSON オブジェクトである必要があります: {other}"
                )));
            }
        };
        context.insert("recipient", candidate.recipient.as_str());
        context.insert("candidate_id", &candidate.id);
        // HTML の href はエスケープせずに出力するため、検証済みの値だけを渡す
        let link_url = candidate
            .payload
            .get("url")
            .and_then(|v| v.as_str())
            .filter(|url| is_link_url(url));
        if let Some(url) = link_url {
            context.insert("link_url", url);
        }
        Ok(context)
    }

    fn render_part(
        &self,
        template: &str,
        part: &str,
        context: &Context,
    ) -> Result<String, NotificationError> {
        self.engine
            .render(&format!("{template}.{part}"), context)
            .map_err(|e| NotificationError::TemplateFailed(describe(&e)))
    }
}

impl MessageComposer for TemplateRenderer {
    fn compose(&self, candidate: &Candidate) -> Result<EmailMessage, NotificationError> {
        if !self.has_template(&candidate.template) {
            return Err(NotificationError::TemplateFailed(format!(
                "テンプレート '{}' は登録されていません",
                candidate.template
            )));
        }

        let context = Self::build_context(candidate)?;
        let subject = self.render_part(&candidate.template, "subject", &context)?;
        let html_body = self.render_part(&candidate.template, "html", &context)?;
        let text_body = self.render_part(&candidate.template, "txt", &context)?;

        Ok(EmailMessage {
            to: candidate.recipient.to_string(),
            subject: subject.trim().to_string(),
            html_body,
            text_body,
            dedupe_key: candidate.dedupe_key.clone(),
            candidate_id: candidate.id.clone(),
        })
    }
}

/// href にそのまま埋め込める http(s) URL か
fn is_link_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            !rest.is_empty()
                && !rest.chars().any(|c| {
                    c.is_whitespace() || c.is_control() || matches!(c, '"' | '\'' | '<' | '>' | '`')
                })
        }
        None => false,
    }
}

/// tera のエラーは原因がネストされるため、連鎖をたどって 1 行にまとめる
fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
