//! エンジン設定（TOML）
//!
//! # 責務
//!
//! 実行エンジン・ステップランナー・ログ出力・通知の設定を TOML から読み込みます。
//! すべての項目にデフォルト値があるため、設定ファイルは省略できます。
//!
//! 設定はグローバル変数ではなく、[`EngineSettings`] として
//! エグゼキューターとステップランナーに明示的に渡されます。
//!
//! # 例
//!
//! ```toml
//! [engine]
//! max_node_visits = 1000
//! max_loop_iterations = 10000
//!
//! [step]
//! timeout_secs = 60
//!
//! [step.interpreters]
//! py = "python3"
//!
//! [logging]
//! dir = "logs"
//! level = "info"
//! format = "json"
//!
//! [notify]
//! bot_token = "123:abc"
//! chat_ids = ["42"]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// エンジン設定のルート
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub engine: LimitSettings,
    pub step: StepSettings,
    pub logging: LoggingSettings,
    /// 未設定の場合、失敗通知は送信されない
    pub notify: Option<NotifySettings>,
}

/// 実行上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// 1回の実行でディスパッチできるノード数の上限
    pub max_node_visits: usize,
    /// 1つの LOOP ノードの繰り返し回数の上限
    pub max_loop_iterations: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_node_visits: 1000,
            max_loop_iterations: 10_000,
        }
    }
}

/// ステップランナー設定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StepSettings {
    /// 1ステップのタイムアウト（秒）
    pub timeout_secs: u64,
    /// 拡張子（ドットなし）→ インタプリタ
    pub interpreters: HashMap<String, String>,
}

impl StepSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// スクリプトの拡張子に対応するインタプリタ
    pub fn interpreter_for(&self, script: &str) -> Option<&str> {
        let ext = Path::new(script).extension()?.to_str()?;
        self.interpreters.get(ext).map(String::as_str)
    }
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            interpreters: HashMap::from([("py".to_string(), "python".to_string())]),
        }
    }
}

/// ログ出力形式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// ログ設定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// 実行ごとのログファイルを書き出すディレクトリ
    pub dir: PathBuf,
    /// `RUST_LOG` が未設定のときのフィルタ
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// 失敗通知（Telegram Bot API）の設定
#[derive(Debug, Clone, Deserialize)]
pub struct NotifySettings {
    pub bot_token: String,
    #[serde(default)]
    pub chat_ids: Vec<String>,
    /// API のベース URL（テストで差し替える）
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl EngineSettings {
    /// TOML ファイルから設定を読み込む
    ///
    /// # エラー
    ///
    /// - [`ConfigError::FileRead`] - ファイルの読み込みに失敗
    /// - [`ConfigError::TomlDeserialize`] - TOML として不正
    /// - [`ConfigError::Validation`] - 値が範囲外
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// TOML 文字列から設定を読み込む
    ///
    /// # 例
    ///
    /// ```rust
    /// use rpa_flow::config::EngineSettings;
    ///
    /// let settings = EngineSettings::from_toml("[step]\ntimeout_secs = 5\n").unwrap();
    /// assert_eq!(settings.step.timeout_secs, 5);
    /// assert_eq!(settings.engine.max_node_visits, 1000);
    /// ```
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let settings: EngineSettings = toml::from_str(source)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_node_visits == 0 {
            return Err(ConfigError::Validation(
                "engine.max_node_visits は1以上である必要があります".to_string(),
            ));
        }
        if self.step.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "step.timeout_secs は1以上である必要があります".to_string(),
            ));
        }
        match &self.notify {
            Some(notify) if notify.bot_token.trim().is_empty() => Err(ConfigError::Validation(
                "notify.bot_token が空です".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let settings = EngineSettings::from_toml("").unwrap();

        assert_eq!(settings.engine.max_node_visits, 1000);
        assert_eq!(settings.engine.max_loop_iterations, 10_000);
        assert_eq!(settings.step.timeout_secs, 60);
        assert_eq!(settings.step.interpreter_for("job.py"), Some("python"));
        assert_eq!(settings.logging.format, LogFormat::Text);
        assert!(settings.notify.is_none());
    }

    #[test]
    fn test_full_toml() {
        let toml = r#"
            [engine]
            max_node_visits = 50
            max_loop_iterations = 7

            [step]
            timeout_secs = 3

            [step.interpreters]
            py = "python3"
            ps1 = "pwsh"

            [logging]
            dir = "/var/log/rpa"
            level = "debug"
            format = "json"

            [notify]
            bot_token = "123:abc"
            chat_ids = ["1", "2"]
        "#;

        let settings = EngineSettings::from_toml(toml).unwrap();

        assert_eq!(settings.engine.max_node_visits, 50);
        assert_eq!(settings.engine.max_loop_iterations, 7);
        assert_eq!(settings.step.timeout(), Duration::from_secs(3));
        assert_eq!(settings.step.interpreter_for("a/b/run.ps1"), Some("pwsh"));
        assert_eq!(settings.step.interpreter_for("run.py"), Some("python3"));
        assert_eq!(settings.step.interpreter_for("run.sh"), None);
        assert_eq!(settings.step.interpreter_for("echo hi"), None);
        assert_eq!(settings.logging.dir, PathBuf::from("/var/log/rpa"));
        assert_eq!(settings.logging.format, LogFormat::Json);

        let notify = settings.notify.unwrap();
        assert_eq!(notify.chat_ids, vec!["1", "2"]);
        assert_eq!(notify.api_base, "https://api.telegram.org");
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let result = EngineSettings::from_toml("[step]\ntimeout_secs = 0\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = EngineSettings::from_toml("[engine\nmax_node_visits = ");
        assert!(matches!(result, Err(ConfigError::TomlDeserialize(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[engine]\nmax_node_visits = 9\n").unwrap();

        let settings = EngineSettings::from_file(&path).unwrap();
        assert_eq!(settings.engine.max_node_visits, 9);
    }
}
