//! 失敗通知（Telegram Bot API）
//!
//! エンジン自身は通知を送りません。CLI が実行失敗時に
//! Run Report の `error` をこのモジュール経由で送信します。

use serde::Serialize;
use tracing::warn;

use crate::config::settings::NotifySettings;
use crate::engine::result::RunReport;
use crate::error::NotifyError;

/// Telegram への通知クライアント
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_ids: Vec<String>,
    api_base: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    /// 設定から通知クライアントを生成
    pub fn new(settings: &NotifySettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: settings.bot_token.clone(),
            chat_ids: settings.chat_ids.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    /// 設定されたすべてのチャットにメッセージを送信する
    ///
    /// 一部のチャットへの送信に失敗しても残りには送信を続け、
    /// 最初に発生したエラーを返します。
    pub async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let url = self.endpoint();
        let mut first_error = None;

        for chat_id in &self.chat_ids {
            if let Err(e) = self.send_one(&url, chat_id, text).await {
                warn!(chat_id = %chat_id, error = %e, "failed to send notification");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn send_one(&self, url: &str, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .json(&SendMessage { chat_id, text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// 失敗した実行を通知する（成功した実行では何もしない）
    pub async fn notify_failure(&self, report: &RunReport) -> Result<(), NotifyError> {
        if report.is_success() {
            return Ok(());
        }
        self.send(&failure_message(report)).await
    }
}

/// 失敗通知の本文
pub fn failure_message(report: &RunReport) -> String {
    let mut text = format!("ワークフロー '{}' が失敗しました", report.workflow);
    if let Some(kind) = report.error_kind {
        text.push_str(&format!(" [{}]", kind.as_str()));
    }
    if let Some(error) = &report.error {
        text.push('\n');
        text.push_str(error);
    }
    text.push_str(&format!(
        "\n{}",
        report.finished_at.format("%Y-%m-%d %H:%M:%S")
    ));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::result::{ErrorKind, RunStatus};
    use chrono::Local;
    use serde_json::Map;

    fn failed_report() -> RunReport {
        let now = Local::now();
        RunReport {
            workflow: "citas".to_string(),
            status: RunStatus::Failed,
            context: Map::new(),
            logs: Vec::new(),
            error: Some("ノード 'login' のステップが失敗しました".to_string()),
            error_kind: Some(ErrorKind::StepFailure),
            started_at: now,
            finished_at: now,
            nodes_visited: 3,
        }
    }

    fn settings(api_base: &str) -> NotifySettings {
        NotifySettings {
            bot_token: "123:abc".to_string(),
            chat_ids: vec!["42".to_string()],
            api_base: api_base.to_string(),
        }
    }

    #[test]
    fn test_failure_message() {
        let text = failure_message(&failed_report());

        assert!(text.starts_with("ワークフロー 'citas' が失敗しました [step_failure]"));
        assert!(text.contains("'login'"));
    }

    #[test]
    fn test_endpoint() {
        let notifier = TelegramNotifier::new(&settings("https://api.telegram.org/"));
        assert_eq!(
            notifier.endpoint(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[tokio::test]
    async fn test_success_report_is_not_sent() {
        // 接続できない宛先でも、成功した実行では送信しないのでエラーにならない
        let notifier = TelegramNotifier::new(&settings("http://127.0.0.1:1"));
        let mut report = failed_report();
        report.status = RunStatus::Success;

        assert!(notifier.notify_failure(&report).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_api_is_http_error() {
        let notifier = TelegramNotifier::new(&settings("http://127.0.0.1:1"));
        let result = notifier.notify_failure(&failed_report()).await;

        assert!(matches!(result, Err(NotifyError::Http(_))));
    }
}
